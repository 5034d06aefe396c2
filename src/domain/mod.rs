/// Domain module containing the relay's core data types
///
/// This module defines the identifiers, message envelopes and prompt result
/// shapes shared by the queue, registry, dispatcher and stream producer.

pub mod message;
pub mod prompt;
pub mod types;

// Re-export public types for easy access
pub use message::*;
pub use prompt::*;
pub use types::*;

use thiserror::Error;

/// Errors that can occur while interpreting client input
#[derive(Error, Debug)]
pub enum DomainError {
    #[error("Invalid session id: {0}")]
    InvalidSessionId(String),

    #[error("Invalid capability kind: {0}")]
    InvalidKind(String),

    #[error("Malformed message: {0}")]
    MalformedMessage(String),
}
