/// Response queue layer
///
/// The response queue decouples dispatch from stream delivery. Posting a
/// request and serving the stream may happen in different worker processes,
/// so every backend except the in-memory one keeps its state in a store all
/// workers can reach.

pub mod memory;
pub mod migrations;
pub mod redis_backend;
pub mod retry;
pub mod sqlite;

// Re-export the main queue types
pub use memory::MemoryResponseQueue;
pub use redis_backend::RedisResponseQueue;
pub use retry::{RetryPolicy, RetryingQueue};
pub use sqlite::SqliteResponseQueue;

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::{OutboundMessage, SessionId};

/// How often polling backends look for a new entry while `pop` waits
pub const POLL_STEP: Duration = Duration::from_millis(50);

/// Errors that can occur during queue operations
#[derive(Error, Debug)]
pub enum QueueError {
    #[error("Queue connection error: {0}")]
    Connection(String),

    #[error("Session is not open: {0}")]
    SessionClosed(SessionId),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("Redis error: {0}")]
    Redis(#[from] ::redis::RedisError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Migration error: {0}")]
    Migration(String),

    #[error("Background task failed: {0}")]
    Task(String),
}

impl QueueError {
    /// Whether retrying the same operation could plausibly succeed
    pub fn is_transient(&self) -> bool {
        match self {
            QueueError::Connection(_) | QueueError::Pool(_) | QueueError::Task(_) => true,
            QueueError::Sqlite(e) => matches!(
                e.sqlite_error_code(),
                Some(rusqlite::ErrorCode::DatabaseBusy) | Some(rusqlite::ErrorCode::DatabaseLocked)
            ),
            QueueError::Redis(e) => e.is_io_error() || e.is_connection_dropped() || e.is_timeout(),
            QueueError::SessionClosed(_) | QueueError::Serialization(_) | QueueError::Migration(_) => false,
        }
    }
}

/// Per-session ordered buffer of outbound messages
///
/// Entries are FIFO within a session and unordered across sessions. Delivery is
/// best effort: an entry removed by `pop` is gone even if it never reaches the
/// client.
///
/// The queue also carries the shared "session is open" marker. A worker that
/// did not create a session still has to know whether it may accept posts for
/// it, and the queue store is the one thing every worker can see.
#[async_trait]
pub trait ResponseQueue: Send + Sync {
    /// Append a message to the tail of a session's buffer
    ///
    /// Fails with `SessionClosed` when the session has no unexpired open
    /// marker; no storage is created for it.
    async fn push(&self, session_id: &SessionId, message: &OutboundMessage) -> Result<(), QueueError>;

    /// Remove and return the head entry, waiting at most `timeout` for one
    async fn pop(&self, session_id: &SessionId, timeout: Duration) -> Result<Option<OutboundMessage>, QueueError>;

    /// Release everything stored for a session, including its open marker
    async fn expire(&self, session_id: &SessionId) -> Result<(), QueueError>;

    /// Record (or refresh) the open marker, valid for `ttl`
    async fn mark_open(&self, session_id: &SessionId, ttl: Duration) -> Result<(), QueueError>;

    /// Whether an unexpired open marker exists
    async fn is_open(&self, session_id: &SessionId) -> Result<bool, QueueError>;

    /// Short backend name for logs
    fn backend_name(&self) -> &'static str;
}

/// Repeatedly try a non-blocking pop until it yields an entry or `timeout` elapses
///
/// Backends without a native blocking pop share this loop.
pub(crate) async fn poll_until<F, Fut>(timeout: Duration, mut try_pop: F) -> Result<Option<OutboundMessage>, QueueError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Option<OutboundMessage>, QueueError>>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if let Some(message) = try_pop().await? {
            return Ok(Some(message));
        }
        let now = tokio::time::Instant::now();
        if now >= deadline {
            return Ok(None);
        }
        tokio::time::sleep(POLL_STEP.min(deadline - now)).await;
    }
}
