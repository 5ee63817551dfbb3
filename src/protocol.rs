use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use thiserror::Error;
use tokio_tungstenite::tungstenite::Utf8Bytes;

/// Heartbeat probe, client to server. Bare literal, never wrapped in an envelope.
pub const PING: &str = "ping";

/// Heartbeat acknowledgment, server to client.
pub const PONG: &str = "pong";

/// Path prefix WebSocket upgrade requests arrive on.
pub const UPGRADE_PREFIX: &str = "/_ws";

/// Protocol errors
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("malformed envelope: {0}")]
    MalformedEnvelope(#[from] serde_json::Error),
}

/// Rooms a connection can be admitted into, resolved from the upgrade path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RoomId {
    Lobby,
}

impl RoomId {
    pub fn as_str(self) -> &'static str {
        match self {
            RoomId::Lobby => "lobby",
        }
    }

    /// Resolve a room from the final segment of an upgrade request path.
    /// Returns `None` for unrecognized segments, which is fatal to that
    /// connection only.
    pub fn from_request_path(path: &str) -> Option<Self> {
        match path.rsplit('/').next().unwrap_or("") {
            "lobby" => Some(RoomId::Lobby),
            _ => None,
        }
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Recognized message-type tags. Frames carrying any other tag pass the
/// envelope shape check but dispatch to nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tag {
    Chat,
}

impl Tag {
    pub fn as_str(self) -> &'static str {
        match self {
            Tag::Chat => "chat",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "chat" => Some(Tag::Chat),
            _ => None,
        }
    }
}

/// The `{t, d}` wrapper every non-heartbeat frame must decode to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub t: String,
    pub d: Value,
}

impl Envelope {
    pub fn new(tag: Tag, d: Value) -> Self {
        Self {
            t: tag.as_str().to_string(),
            d,
        }
    }

    pub fn chat(payload: &ChatPayload) -> Self {
        let d = serde_json::to_value(payload).expect("chat payload serialization should never fail");
        Self::new(Tag::Chat, d)
    }

    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(text)?)
    }

    /// The recognized tag, if any. `None` means the frame is well-formed but
    /// addressed to nothing this protocol knows about.
    pub fn tag(&self) -> Option<Tag> {
        Tag::parse(&self.t)
    }

    pub fn to_text(&self) -> String {
        serde_json::to_string(self).expect("envelope serialization should never fail")
    }
}

/// Payload of a `chat` envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatPayload {
    pub name: String,
    pub text: String,
}

/// Presence push sent to every member on each join and leave. Goes out as a
/// bare object, not an envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Presence {
    pub n: usize,
}

impl Presence {
    pub fn to_text(&self) -> String {
        serde_json::to_string(self).expect("presence serialization should never fail")
    }
}

/// Wrapper for outbound text frames using tungstenite's Utf8Bytes,
/// so broadcast fan-out clones in O(1).
#[derive(Debug, Clone)]
pub struct OutboundMessage(Utf8Bytes);

impl OutboundMessage {
    pub fn new(s: impl Into<Utf8Bytes>) -> Self {
        Self(s.into())
    }

    /// Get the inner Utf8Bytes for tungstenite Message::Text
    pub fn into_inner(self) -> Utf8Bytes {
        self.0
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl From<String> for OutboundMessage {
    fn from(s: String) -> Self {
        Self(Utf8Bytes::from(s))
    }
}

impl From<&str> for OutboundMessage {
    fn from(s: &str) -> Self {
        Self(Utf8Bytes::from(s))
    }
}

impl From<&Envelope> for OutboundMessage {
    fn from(envelope: &Envelope) -> Self {
        Self::from(envelope.to_text())
    }
}

impl From<&Presence> for OutboundMessage {
    fn from(presence: &Presence) -> Self {
        Self::from(presence.to_text())
    }
}
