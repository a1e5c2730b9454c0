//! Real-time updates for logwarden
//!
//! Completed analyses are pushed to every connected WebSocket client.

mod broadcaster;
mod server;

pub use broadcaster::{Broadcaster, ClientId, DEFAULT_CLIENT_BUFFER};
pub use server::LiveServer;

// Re-export types used in our public API
pub use logwarden_types::LiveUpdate;
