/// MCP relay HTTP layer
///
/// This module handles the wire-facing side of the relay: error codes and
/// listing shapes, plus the axum router serving streams and messages.

pub mod protocol;
pub mod server;

// Re-export main types
pub use server::{router, AppState};
