//! WebSocket connection registry and room broadcast dispatcher

mod actor;
mod server;
mod types;

pub use actor::RegistryHandle;
pub use server::{DEFAULT_PORT, LobbyServer};
pub use types::ConnId;
