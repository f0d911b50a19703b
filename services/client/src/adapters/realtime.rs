//! services/client/src/adapters/realtime.rs
//!
//! Row-level change notifications over the backend's realtime websocket.
//!
//! One connection is shared by every subscription. Each subscription joins its
//! own channel topic with a single `postgres_changes` filter; dropping the
//! returned stream leaves the channel.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use async_trait::async_trait;
use futures::Stream;
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use study_assistant_core::ports::{
    ChangeEvent, ChangeFeed, ChangeFilter, ChangeKind, ChangeStream, CredentialProvider,
    PortError, PortResult, Table,
};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use url::Url;

pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(25);

//=========================================================================================
// Wire Protocol
//=========================================================================================

/// A Phoenix channel frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhoenixMessage {
    pub topic: String,
    pub event: String,
    #[serde(default)]
    pub payload: Value,
    #[serde(rename = "ref", default)]
    pub msg_ref: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub join_ref: Option<String>,
}

impl PhoenixMessage {
    fn heartbeat(msg_ref: String) -> Self {
        Self {
            topic: "phoenix".to_string(),
            event: "heartbeat".to_string(),
            payload: json!({}),
            msg_ref: Some(msg_ref),
            join_ref: None,
        }
    }

    fn join(topic: &str, filter: &ChangeFilter, access_token: Option<&str>, msg_ref: String) -> Self {
        let mut payload = json!({
            "config": {
                "broadcast": { "self": false },
                "presence": { "key": "" },
                "postgres_changes": [{
                    "event": "*",
                    "schema": "public",
                    "table": filter.table.as_str(),
                    "filter": filter.to_string(),
                }],
            }
        });
        if let Some(token) = access_token {
            payload["access_token"] = Value::String(token.to_string());
        }
        Self {
            topic: topic.to_string(),
            event: "phx_join".to_string(),
            payload,
            msg_ref: Some(msg_ref.clone()),
            join_ref: Some(msg_ref),
        }
    }

    fn leave(topic: &str, msg_ref: String) -> Self {
        Self {
            topic: topic.to_string(),
            event: "phx_leave".to_string(),
            payload: json!({}),
            msg_ref: Some(msg_ref),
            join_ref: None,
        }
    }

    /// Decodes a `postgres_changes` frame into a change event.
    pub fn change_event(&self) -> Option<ChangeEvent> {
        if self.event != "postgres_changes" {
            return None;
        }
        let data = self.payload.get("data")?;
        let table = Table::from_name(data.get("table")?.as_str()?)?;
        let kind = match data.get("type")?.as_str()? {
            "INSERT" => ChangeKind::Insert,
            "UPDATE" => ChangeKind::Update,
            "DELETE" => ChangeKind::Delete,
            _ => return None,
        };
        let non_empty = |v: Option<&Value>| {
            v.filter(|v| !v.is_null() && v.as_object().map_or(true, |o| !o.is_empty()))
                .cloned()
        };
        Some(ChangeEvent {
            table,
            kind,
            record: non_empty(data.get("record")),
            old_record: non_empty(data.get("old_record")),
        })
    }
}

/// Builds the websocket endpoint from the project URL.
pub fn websocket_url(project_url: &Url, anon_key: &str) -> PortResult<Url> {
    let mut url = project_url
        .join("realtime/v1/websocket")
        .map_err(|e| PortError::Unexpected(format!("Invalid realtime URL: {}", e)))?;
    let scheme = match url.scheme() {
        "https" => "wss",
        "http" => "ws",
        other => other,
    }
    .to_string();
    url.set_scheme(&scheme)
        .map_err(|_| PortError::Unexpected(format!("Unsupported scheme '{}'", scheme)))?;
    url.query_pairs_mut()
        .append_pair("apikey", anon_key)
        .append_pair("vsn", "1.0.0");
    Ok(url)
}

//=========================================================================================
// Connection
//=========================================================================================

enum Command {
    Join {
        topic: String,
        filter: ChangeFilter,
        access_token: Option<String>,
        events: mpsc::UnboundedSender<ChangeEvent>,
    },
    Leave {
        topic: String,
    },
}

/// Shared realtime connection implementing [`ChangeFeed`].
pub struct RealtimeFeed {
    commands: mpsc::UnboundedSender<Command>,
    credentials: Arc<dyn CredentialProvider>,
    next_topic: AtomicU64,
    shutdown: CancellationToken,
    connection: JoinHandle<()>,
}

impl RealtimeFeed {
    pub async fn connect(
        project_url: &Url,
        anon_key: &str,
        credentials: Arc<dyn CredentialProvider>,
        heartbeat_interval: Duration,
    ) -> PortResult<Self> {
        let url = websocket_url(project_url, anon_key)?;
        let (socket, _) = tokio_tungstenite::connect_async(url.as_str())
            .await
            .map_err(|e| PortError::Unexpected(format!("Realtime connection failed: {}", e)))?;
        info!(host = ?url.host_str(), "Realtime connection established");

        let (commands, command_rx) = mpsc::unbounded_channel();
        let shutdown = CancellationToken::new();
        let connection = tokio::spawn(run_connection(
            socket,
            command_rx,
            heartbeat_interval,
            shutdown.clone(),
        ));

        Ok(Self {
            commands,
            credentials,
            next_topic: AtomicU64::new(1),
            shutdown,
            connection,
        })
    }

    pub fn is_connected(&self) -> bool {
        !self.connection.is_finished()
    }

    pub fn close(&self) {
        self.shutdown.cancel();
    }
}

impl Drop for RealtimeFeed {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

#[async_trait]
impl ChangeFeed for RealtimeFeed {
    async fn subscribe(&self, filter: ChangeFilter) -> PortResult<ChangeStream> {
        let id = self.next_topic.fetch_add(1, Ordering::Relaxed);
        let topic = format!("realtime:{}-{}", filter.table.as_str(), id);
        let (events, event_rx) = mpsc::unbounded_channel();

        self.commands
            .send(Command::Join {
                topic: topic.clone(),
                filter,
                access_token: self.credentials.access_token().await,
                events,
            })
            .map_err(|_| PortError::Unexpected("Realtime connection is closed".to_string()))?;

        Ok(Box::pin(Subscription {
            topic,
            events: event_rx,
            commands: self.commands.clone(),
        }))
    }
}

/// The stream handed to a subscriber. Leaves its channel when dropped.
struct Subscription {
    topic: String,
    events: mpsc::UnboundedReceiver<ChangeEvent>,
    commands: mpsc::UnboundedSender<Command>,
}

impl Stream for Subscription {
    type Item = ChangeEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<ChangeEvent>> {
        self.events.poll_recv(cx)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        // The connection may already be gone, in which case there is nothing to leave.
        let _ = self.commands.send(Command::Leave {
            topic: std::mem::take(&mut self.topic),
        });
    }
}

async fn run_connection<S>(
    socket: S,
    mut commands: mpsc::UnboundedReceiver<Command>,
    heartbeat_interval: Duration,
    shutdown: CancellationToken,
) where
    S: Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>>
        + futures::Sink<Message, Error = tokio_tungstenite::tungstenite::Error>
        + Unpin,
{
    let (mut sink, mut stream) = socket.split();
    let mut subscribers: HashMap<String, mpsc::UnboundedSender<ChangeEvent>> = HashMap::new();
    let mut heartbeat = tokio::time::interval(heartbeat_interval);
    let mut next_ref: u64 = 0;
    let mut msg_ref = move || {
        next_ref += 1;
        next_ref.to_string()
    };

    loop {
        let outgoing = tokio::select! {
            _ = shutdown.cancelled() => {
                debug!("Realtime connection shutting down");
                let _ = sink.close().await;
                break;
            }
            _ = heartbeat.tick() => PhoenixMessage::heartbeat(msg_ref()),
            command = commands.recv() => match command {
                Some(Command::Join { topic, filter, access_token, events }) => {
                    debug!(topic = %topic, filter = %filter, "Joining realtime channel");
                    let join = PhoenixMessage::join(&topic, &filter, access_token.as_deref(), msg_ref());
                    subscribers.insert(topic, events);
                    join
                }
                Some(Command::Leave { topic }) => {
                    debug!(topic = %topic, "Leaving realtime channel");
                    subscribers.remove(&topic);
                    PhoenixMessage::leave(&topic, msg_ref())
                }
                None => break,
            },
            frame = stream.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => {
                        route_frame(&text, &mut subscribers);
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        warn!("Realtime connection closed by the server");
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        error!(error = %e, "Realtime connection failed");
                        break;
                    }
                }
                continue;
            }
        };

        let encoded = match serde_json::to_string(&outgoing) {
            Ok(encoded) => encoded,
            Err(e) => {
                error!(error = %e, "Failed to encode realtime frame");
                continue;
            }
        };
        if let Err(e) = sink.send(Message::Text(encoded.into())).await {
            error!(error = %e, "Failed to send realtime frame");
            break;
        }
    }
    // Dropping the senders ends every subscriber stream.
}

fn route_frame(text: &str, subscribers: &mut HashMap<String, mpsc::UnboundedSender<ChangeEvent>>) {
    let message: PhoenixMessage = match serde_json::from_str(text) {
        Ok(message) => message,
        Err(e) => {
            warn!(error = %e, "Ignoring malformed realtime frame");
            return;
        }
    };

    if message.event == "phx_reply" {
        let status = message.payload.get("status").and_then(Value::as_str);
        if status != Some("ok") {
            warn!(topic = %message.topic, payload = %message.payload, "Realtime request was rejected");
        }
        return;
    }

    let Some(event) = message.change_event() else {
        return;
    };
    if let Some(subscriber) = subscribers.get(&message.topic) {
        if subscriber.send(event).is_err() {
            subscribers.remove(&message.topic);
        }
    }
}
