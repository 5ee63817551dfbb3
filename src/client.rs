//! Client-side connection wrapper: one persistent lobby socket with liveness
//! heartbeats and typed message routing.

use std::collections::HashMap;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use crate::protocol::{Envelope, OutboundMessage, PING, PONG, RoomId, UPGRADE_PREFIX, Tag};

/// How often an open connection probes the server with a literal "ping".
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(4);

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("websocket connect failed: {0}")]
    Connect(#[from] tokio_tungstenite::tungstenite::Error),
}

pub type Handler = Box<dyn Fn(Value) + Send + Sync>;
pub type Handlers = HashMap<Tag, Handler>;

/// Tag-to-handler table, built once per connection attempt and immutable for
/// the lifetime of the socket that installed it.
struct HandlerTable {
    entries: Handlers,
}

impl HandlerTable {
    fn merged(defaults: Handlers, overrides: Handlers) -> Self {
        let mut entries = defaults;
        entries.extend(overrides);
        Self { entries }
    }

    /// Route one inbound text frame. "pong" acknowledges the heartbeat and is
    /// consumed here; everything else must be an envelope whose tag has a
    /// registered handler, or it is dropped.
    fn dispatch(&self, text: &str) {
        if text == PONG {
            debug!("heartbeat acknowledged");
            return;
        }

        let envelope = match Envelope::parse(text) {
            Ok(e) => e,
            Err(e) => {
                warn!("dropping malformed frame: {}", e);
                return;
            }
        };

        let Some(tag) = envelope.tag() else {
            debug!("ignoring frame with unrecognized tag {:?}", envelope.t);
            return;
        };

        if let Some(handler) = self.entries.get(&tag) {
            handler(envelope.d);
        }
    }
}

/// Recurring "ping" sender. Owned by exactly one connection attempt and
/// cancelled before any new one is armed.
struct Heartbeat {
    task: JoinHandle<()>,
}

impl Heartbeat {
    fn arm(tx: mpsc::UnboundedSender<OutboundMessage>, interval: Duration) -> Self {
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // the first tick resolves immediately; the first ping waits a full period
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if tx.send(OutboundMessage::from(PING)).is_err() {
                    break;
                }
            }
        });
        Self { task }
    }

    fn cancel(&self) {
        self.task.abort();
    }
}

/// One connection attempt: the outbound channel, its heartbeat, and the two
/// transport tasks.
struct Connection {
    tx: mpsc::UnboundedSender<OutboundMessage>,
    heartbeat: Heartbeat,
    send_task: JoinHandle<()>,
    read_task: JoinHandle<()>,
}

impl Connection {
    fn shutdown(&self) {
        self.heartbeat.cancel();
        self.read_task.abort();
        self.send_task.abort();
    }
}

/// A single logical persistent connection to a room. Reconnection is always
/// caller-initiated: call [`LobbySocket::connect`] again and the previous
/// attempt is fully superseded.
pub struct LobbySocket {
    origin: String,
    room: RoomId,
    heartbeat_interval: Duration,
    conn: Option<Connection>,
}

impl LobbySocket {
    pub fn new(origin: impl Into<String>, room: RoomId) -> Self {
        Self {
            origin: origin.into(),
            room,
            heartbeat_interval: HEARTBEAT_INTERVAL,
            conn: None,
        }
    }

    #[must_use]
    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    /// Target URL derived from the configured origin and room path;
    /// `ws`/`wss` mirrors `http`/`https`.
    pub fn url(&self) -> String {
        socket_url(&self.origin, self.room)
    }

    /// Open a new transport and install `handlers` (merged over the default
    /// set, overrides winning) as the active table. Any previous attempt's
    /// heartbeat is cancelled first, so there is never more than one active
    /// timer per socket. The heartbeat is armed only once the transport has
    /// reported a successful open.
    pub async fn connect(&mut self, handlers: Handlers) -> Result<(), ClientError> {
        if let Some(previous) = self.conn.take() {
            previous.shutdown();
        }

        let (ws_stream, _) = tokio_tungstenite::connect_async(self.url()).await?;
        info!("connected at: {}", self.room);

        let (mut ws_tx, mut ws_rx) = ws_stream.split();
        let (tx, mut rx) = mpsc::unbounded_channel::<OutboundMessage>();

        let send_task = tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                if ws_tx.send(Message::Text(msg.into_inner())).await.is_err() {
                    break;
                }
            }
        });

        let table = HandlerTable::merged(Self::default_handlers(), handlers);
        let read_task = tokio::spawn(async move {
            while let Some(msg) = ws_rx.next().await {
                match msg {
                    Ok(Message::Text(text)) => table.dispatch(text.as_str()),
                    Ok(Message::Close(_)) => {
                        info!("close received");
                        break;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!("websocket error: {}", e);
                        break;
                    }
                }
            }
        });

        let heartbeat = Heartbeat::arm(tx.clone(), self.heartbeat_interval);

        self.conn = Some(Connection {
            tx,
            heartbeat,
            send_task,
            read_task,
        });
        Ok(())
    }

    fn default_handlers() -> Handlers {
        Handlers::new()
    }

    /// Best-effort send: structured messages arrive here already serialized
    /// through [`OutboundMessage`]'s conversions, text goes verbatim. Dropped
    /// silently when no transport is open.
    pub fn send(&self, msg: impl Into<OutboundMessage>) {
        if let Some(conn) = &self.conn {
            let _ = conn.tx.send(msg.into());
        }
    }
}

impl Drop for LobbySocket {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            conn.shutdown();
        }
    }
}

fn socket_url(origin: &str, room: RoomId) -> String {
    let origin = origin.trim_end_matches('/');
    let ws_origin = if let Some(rest) = origin.strip_prefix("https://") {
        format!("wss://{}", rest)
    } else if let Some(rest) = origin.strip_prefix("http://") {
        format!("ws://{}", rest)
    } else {
        origin.to_string()
    };
    format!("{}{}/{}", ws_origin, UPGRADE_PREFIX, room)
}
