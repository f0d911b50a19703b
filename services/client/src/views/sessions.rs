//! services/client/src/views/sessions.rs

use std::sync::Arc;

use study_assistant_core::domain::Session;
use study_assistant_core::ports::{ChangeFeed, ChangeFilter, PortResult, RecordStore, Table};
use tracing::info;
use uuid::Uuid;

use super::{spawn_view, ViewHandle, ViewOptions};

/// The signed-in user's most recent sessions, newest first.
pub struct SessionListView;

impl SessionListView {
    pub async fn mount(
        store: Arc<dyn RecordStore>,
        feed: &dyn ChangeFeed,
        user_id: Uuid,
        options: ViewOptions,
    ) -> PortResult<ViewHandle<Vec<Session>>> {
        let changes = feed
            .subscribe(ChangeFilter::new(Table::Sessions, "user_id", user_id))
            .await?;
        info!(%user_id, "Session list mounted");

        let limit = options.session_limit;
        Ok(spawn_view(
            "session_list",
            move || {
                let store = store.clone();
                async move { store.list_sessions(user_id, limit).await }
            },
            vec![changes],
            options.debounce,
        ))
    }
}
