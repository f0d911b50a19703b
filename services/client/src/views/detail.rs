//! services/client/src/views/detail.rs

use std::sync::Arc;

use study_assistant_core::domain::{Output, Session, SessionStatus};
use study_assistant_core::ports::{
    ChangeFeed, ChangeFilter, PortError, PortResult, RecordStore, Table,
};
use tracing::info;
use uuid::Uuid;

use super::{spawn_view, ViewHandle, ViewOptions};

#[derive(Debug, Clone, PartialEq)]
pub struct SessionDetail {
    pub session: Session,
    pub output: Option<Output>,
}

/// What the body of a session page shows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DetailContent {
    Processing,
    Failed(String),
    Text(String),
    Empty,
}

impl SessionDetail {
    pub fn content(&self) -> DetailContent {
        match self.session.status {
            SessionStatus::Processing => DetailContent::Processing,
            SessionStatus::Failed => DetailContent::Failed(
                self.session
                    .error_message
                    .clone()
                    .unwrap_or_else(|| "Processing failed".to_string()),
            ),
            SessionStatus::Completed | SessionStatus::Archived => {
                let text = self
                    .output
                    .as_ref()
                    .and_then(Output::display_text)
                    .or(self.session.raw_content.as_deref().filter(|t| !t.is_empty()));
                match text {
                    Some(text) => DetailContent::Text(text.to_string()),
                    None => DetailContent::Empty,
                }
            }
        }
    }
}

/// One session together with its extracted output.
pub struct SessionDetailView;

impl SessionDetailView {
    pub async fn mount(
        store: Arc<dyn RecordStore>,
        feed: &dyn ChangeFeed,
        session_id: Uuid,
        options: ViewOptions,
    ) -> PortResult<ViewHandle<SessionDetail>> {
        let session_changes = feed
            .subscribe(ChangeFilter::new(Table::Sessions, "id", session_id))
            .await?;
        let output_changes = feed
            .subscribe(ChangeFilter::new(Table::Outputs, "session_id", session_id))
            .await?;
        info!(%session_id, "Session detail mounted");

        Ok(spawn_view(
            "session_detail",
            move || {
                let store = store.clone();
                async move {
                    let (session, output) = tokio::try_join!(
                        store.get_session(session_id),
                        store.get_output(session_id)
                    )?;
                    Ok::<_, PortError>(SessionDetail { session, output })
                }
            },
            vec![session_changes, output_changes],
            options.debounce,
        ))
    }
}
