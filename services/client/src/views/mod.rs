//! services/client/src/views/mod.rs
//!
//! Live views over hosted records. A mounted view fetches its records, listens
//! for change notifications on them, and refetches in full whenever something
//! changes. Renderers observe the result through a `watch` channel.

pub mod detail;
pub mod quiz;
pub mod sessions;

use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::stream::{SelectAll, StreamExt};
use study_assistant_core::ports::{ChangeStream, PortResult};
use study_assistant_core::sync::FetchGeneration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

pub use detail::{DetailContent, SessionDetail, SessionDetailView};
pub use quiz::QuizView;
pub use sessions::SessionListView;

/// Shown once a view's change feed has ended and its data can no longer refresh.
pub const FEED_CLOSED_MESSAGE: &str = "Live updates disconnected";

/// Number of sessions a list view shows.
pub const DEFAULT_SESSION_LIMIT: usize = 10;

#[derive(Debug, Clone, PartialEq)]
pub enum ViewState<T> {
    Loading,
    Ready(T),
    Failed(String),
}

impl<T> ViewState<T> {
    pub fn ready(&self) -> Option<&T> {
        match self {
            ViewState::Ready(value) => Some(value),
            _ => None,
        }
    }

    pub fn failure(&self) -> Option<&str> {
        match self {
            ViewState::Failed(message) => Some(message),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ViewOptions {
    /// Notifications arriving within this window of the first one share one refetch.
    pub debounce: Duration,
    pub session_limit: usize,
}

impl Default for ViewOptions {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(250),
            session_limit: DEFAULT_SESSION_LIMIT,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Publish {
    Applied,
    Superseded,
    Unmounted,
}

/// Write side of a view's state. Closed exactly once, on unmount; every
/// publish after that is dropped.
struct Publisher<T> {
    sender: Mutex<Option<watch::Sender<ViewState<T>>>>,
}

impl<T: PartialEq> Publisher<T> {
    fn new(sender: watch::Sender<ViewState<T>>) -> Self {
        Self {
            sender: Mutex::new(Some(sender)),
        }
    }

    /// Replaces the state, notifying receivers only when it actually changed.
    fn publish(&self, next: ViewState<T>) -> Publish {
        self.publish_if(|| true, next)
    }

    /// Like [`publish`](Self::publish), but only while `still_current` holds.
    /// The check runs under the same lock as the write, so a result cannot be
    /// judged current and then land after a newer one.
    fn publish_if(&self, still_current: impl FnOnce() -> bool, next: ViewState<T>) -> Publish {
        let guard = self.sender.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let Some(sender) = guard.as_ref() else {
            return Publish::Unmounted;
        };
        if !still_current() {
            return Publish::Superseded;
        }
        sender.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        });
        Publish::Applied
    }

    fn close(&self) {
        self.sender
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
    }
}

/// Owner of a mounted view. Dropping it unmounts the view.
pub struct ViewHandle<T: PartialEq> {
    state: watch::Receiver<ViewState<T>>,
    publisher: Arc<Publisher<T>>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl<T: PartialEq> ViewHandle<T> {
    pub fn subscribe(&self) -> watch::Receiver<ViewState<T>> {
        self.state.clone()
    }

    pub fn current(&self) -> ViewState<T>
    where
        T: Clone,
    {
        self.state.borrow().clone()
    }

    pub fn is_mounted(&self) -> bool {
        !self.cancel.is_cancelled()
    }

    /// Releases the view's subscriptions and stops all further state updates,
    /// including those of fetches still in flight.
    pub fn unmount(self) {
        drop(self);
    }
}

impl<T: PartialEq> Drop for ViewHandle<T> {
    fn drop(&mut self) {
        self.cancel.cancel();
        self.publisher.close();
        self.task.abort();
    }
}

/// Spawns the task that keeps a view current and returns its handle.
///
/// `streams` must already be subscribed so nothing emitted between the first
/// fetch and the subscription is missed.
pub(crate) fn spawn_view<T, F, Fut>(
    name: &'static str,
    fetch: F,
    streams: Vec<ChangeStream>,
    debounce: Duration,
) -> ViewHandle<T>
where
    T: PartialEq + Send + Sync + 'static,
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = PortResult<T>> + Send + 'static,
{
    let (sender, state) = watch::channel(ViewState::Loading);
    let publisher = Arc::new(Publisher::new(sender));
    let cancel = CancellationToken::new();

    let task = tokio::spawn(run_view(
        name,
        Arc::new(fetch),
        streams.into_iter().collect(),
        publisher.clone(),
        debounce,
        cancel.clone(),
    ));

    ViewHandle {
        state,
        publisher,
        cancel,
        task,
    }
}

async fn run_view<T, F, Fut>(
    name: &'static str,
    fetch: Arc<F>,
    mut changes: SelectAll<ChangeStream>,
    publisher: Arc<Publisher<T>>,
    debounce: Duration,
    cancel: CancellationToken,
) where
    T: PartialEq + Send + Sync + 'static,
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = PortResult<T>> + Send + 'static,
{
    let generation = Arc::new(FetchGeneration::new());
    spawn_refetch(name, &fetch, &generation, &publisher, &cancel);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            event = changes.next() => match event {
                Some(event) => {
                    debug!(view = name, table = event.table.as_str(), kind = ?event.kind, "Change received");
                    let coalesced = match coalesce(&mut changes, debounce, &cancel).await {
                        Some(count) => count,
                        None => break,
                    };
                    debug!(view = name, coalesced, "Refetching after changes");
                    spawn_refetch(name, &fetch, &generation, &publisher, &cancel);
                }
                None => {
                    warn!(view = name, "Change feed closed; view will no longer refresh");
                    // Supersede fetches still in flight so they cannot cover the error.
                    generation.issue();
                    publisher.publish(ViewState::Failed(FEED_CLOSED_MESSAGE.to_string()));
                    cancel.cancelled().await;
                    break;
                }
            }
        }
    }

    debug!(view = name, "View task stopped");
}

/// Absorbs notifications until the debounce window after the first one closes.
/// Returns how many extra notifications were absorbed, or `None` when cancelled.
async fn coalesce(
    changes: &mut SelectAll<ChangeStream>,
    debounce: Duration,
    cancel: &CancellationToken,
) -> Option<usize> {
    let deadline = Instant::now() + debounce;
    let mut absorbed = 0;
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return None,
            _ = tokio::time::sleep_until(deadline) => return Some(absorbed),
            event = changes.next() => match event {
                Some(_) => absorbed += 1,
                None => return Some(absorbed),
            }
        }
    }
}

/// Starts one full refetch. Its result is applied only if no newer refetch
/// was issued meanwhile and the view is still mounted.
fn spawn_refetch<T, F, Fut>(
    name: &'static str,
    fetch: &Arc<F>,
    generation: &Arc<FetchGeneration>,
    publisher: &Arc<Publisher<T>>,
    cancel: &CancellationToken,
) where
    T: PartialEq + Send + Sync + 'static,
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = PortResult<T>> + Send + 'static,
{
    let ticket = generation.issue();
    let request = fetch();
    let generation = generation.clone();
    let publisher = publisher.clone();
    let cancel = cancel.clone();

    tokio::spawn(async move {
        let result = tokio::select! {
            _ = cancel.cancelled() => return,
            result = request => result,
        };

        let next = match result {
            Ok(value) => ViewState::Ready(value),
            Err(e) => {
                warn!(view = name, error = %e, "View fetch failed");
                ViewState::Failed(e.to_string())
            }
        };
        match publisher.publish_if(|| generation.is_latest(ticket), next) {
            Publish::Applied => {}
            Publish::Superseded => debug!(view = name, ?ticket, "Discarding superseded fetch result"),
            Publish::Unmounted => debug!(view = name, "View unmounted before fetch resolved"),
        }
    });
}

#[cfg(test)]
mod tests {
    use futures::stream;
    use study_assistant_core::ports::PortError;
    use tokio::time::timeout;

    use super::*;

    #[test]
    fn test_stale_result_cannot_follow_newer_one() {
        let generation = FetchGeneration::new();
        let (sender, state) = watch::channel(ViewState::Loading);
        let publisher = Publisher::new(sender);

        let older = generation.issue();
        let newer = generation.issue();
        assert_eq!(
            publisher.publish_if(|| generation.is_latest(newer), ViewState::Ready(2)),
            Publish::Applied
        );
        assert_eq!(
            publisher.publish_if(|| generation.is_latest(older), ViewState::Ready(1)),
            Publish::Superseded
        );
        assert_eq!(*state.borrow(), ViewState::Ready(2));
    }

    #[test]
    fn test_closed_publisher_rejects_everything() {
        let (sender, state) = watch::channel(ViewState::<u32>::Loading);
        let publisher = Publisher::new(sender);
        publisher.close();

        assert_eq!(
            publisher.publish_if(|| panic!("checked after unmount"), ViewState::Ready(1)),
            Publish::Unmounted
        );
        assert_eq!(*state.borrow(), ViewState::Loading);
    }

    #[tokio::test]
    async fn test_closed_feed_marks_view_failed() {
        let view = spawn_view(
            "closed_feed",
            || async {
                tokio::time::sleep(Duration::from_millis(30)).await;
                Ok::<_, PortError>(vec![1])
            },
            vec![Box::pin(stream::empty()) as ChangeStream],
            Duration::from_millis(10),
        );

        let mut state = view.subscribe();
        timeout(Duration::from_secs(1), state.wait_for(|s| s.failure().is_some()))
            .await
            .unwrap()
            .unwrap();

        // The initial fetch resolves after the feed closed and must not hide the error.
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(
            view.current(),
            ViewState::Failed(FEED_CLOSED_MESSAGE.to_string())
        );
        assert!(view.is_mounted());
    }
}
