//! Real-time lobby presence and chat over WebSocket.

pub mod client;
pub mod protocol;
pub mod registry;
