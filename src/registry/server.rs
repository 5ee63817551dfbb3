use std::net::SocketAddr;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::Utf8Bytes;
use tokio_tungstenite::tungstenite::handshake::server::{Request, Response};
use tracing::{debug, error, info, warn};

use super::actor::{RegistryHandle, RoomCommand, registry_actor};
use super::types::ConnId;
use crate::protocol::{ChatPayload, Envelope, OutboundMessage, PING, PONG, RoomId, Tag};

pub const DEFAULT_PORT: u16 = 3030;

pub struct LobbyServer {
    listener: TcpListener,
    handle: RegistryHandle,
}

impl LobbyServer {
    /// Bind the accept socket and start the registry actor.
    pub async fn bind(addr: &str) -> std::io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;

        let (tx, rx) = mpsc::channel::<RoomCommand>(1024);
        tokio::spawn(registry_actor(rx));

        info!("lobby server listening on {}", listener.local_addr()?);

        Ok(Self {
            listener,
            handle: RegistryHandle { tx },
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept upgrades forever, one task per connection.
    pub async fn run(self) -> std::io::Result<()> {
        loop {
            let (stream, addr) = self.listener.accept().await?;
            let handle = self.handle.clone();

            tokio::spawn(async move {
                if let Err(e) = handle_connection(stream, addr, handle).await {
                    error!("connection error from {}: {}", addr, e);
                }
            });
        }
    }
}

async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    handle: RegistryHandle,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let mut request_path = None;
    let mut ws_stream =
        tokio_tungstenite::accept_hdr_async(stream, |req: &Request, resp: Response| {
            request_path = Some(req.uri().path().to_owned());
            Ok(resp)
        })
        .await?;
    let path = request_path.unwrap_or_default();

    // unknown room: fatal to this connection only, and no join broadcast
    let Some(room) = RoomId::from_request_path(&path) else {
        warn!("unknown room path {:?} from {}, terminating", path, addr);
        let _ = ws_stream.close(None).await;
        return Ok(());
    };

    let (mut ws_tx, mut ws_rx) = ws_stream.split();
    let id = ConnId::generate();

    info!("websocket connection from {} ({}) joining {}", addr, id, room);

    let (tx, mut rx) = mpsc::unbounded_channel::<OutboundMessage>();

    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if ws_tx.send(Message::Text(msg.into_inner())).await.is_err() {
                break;
            }
        }
    });

    handle.join(room, id, tx.clone()).await;

    while let Some(msg) = ws_rx.next().await {
        let msg = match msg {
            Ok(m) => m,
            Err(e) => {
                // logged only; eviction happens through the close path below
                warn!("websocket error on {}: {}", path, e);
                break;
            }
        };

        match msg {
            Message::Text(text) => {
                if text.as_str() == PING {
                    debug!("heartbeat from {}", id);
                    let _ = tx.send(OutboundMessage::from(PONG));
                    continue;
                }
                dispatch_frame(&text, room, &handle).await;
            }
            Message::Close(_) => {
                info!("close received from {}", addr);
                break;
            }
            _ => {}
        }
    }

    handle.leave(room, id).await;
    send_task.abort();
    info!("websocket disconnected: {} ({})", addr, id);

    Ok(())
}

/// Route one non-heartbeat frame. Malformed frames and bad payload shapes are
/// logged and dropped; unrecognized tags are ignored; a valid chat frame is
/// re-broadcast verbatim to the whole room, sender included.
async fn dispatch_frame(text: &Utf8Bytes, room: RoomId, handle: &RegistryHandle) {
    let envelope = match Envelope::parse(text.as_str()) {
        Ok(e) => e,
        Err(e) => {
            warn!("dropping malformed frame: {}", e);
            return;
        }
    };

    match envelope.tag() {
        Some(Tag::Chat) => match serde_json::from_value::<ChatPayload>(envelope.d) {
            Ok(chat) => {
                debug!("chat from {:?} in {}", chat.name, room);
                handle
                    .broadcast(room, OutboundMessage::new(text.clone()))
                    .await;
            }
            Err(e) => warn!("dropping chat with bad payload: {}", e),
        },
        None => debug!("ignoring frame with unrecognized tag {:?}", envelope.t),
    }
}
