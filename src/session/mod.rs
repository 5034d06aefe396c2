/// Session lifecycle
///
/// A session is minted when a client opens a stream and lives until the stream
/// ends or its open marker expires. The manager keeps local bookkeeping for
/// the sessions this process streams, and publishes an open marker through the
/// response queue so that every worker agrees on which sessions accept posts.
///
/// State machine: `Open -> Streaming -> Closed`. Closed is terminal; a client
/// that reconnects always gets a new session.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rand::rngs::OsRng;
use rand::TryRngCore;
use thiserror::Error;
use tokio::time::Instant;

use crate::domain::SessionId;
use crate::queue::{QueueError, ResponseQueue};

/// Errors that can occur while managing sessions
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Random source unavailable, refusing to mint a session id: {0}")]
    Entropy(String),

    #[error("Session not found: {0}")]
    NotFound(SessionId),

    #[error("Session {id} cannot go from {from} to {to}")]
    InvalidTransition {
        id: SessionId,
        from: SessionState,
        to: SessionState,
    },

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),
}

/// Where a session is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Minted, stream not yet polling
    Open,
    /// A stream producer is draining the queue
    Streaming,
    /// Terminal
    Closed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Open => "open",
            SessionState::Streaming => "streaming",
            SessionState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Local record of a session this process created
#[derive(Debug, Clone)]
pub struct Session {
    pub id: SessionId,
    pub created_at: DateTime<Utc>,
    pub state: SessionState,
    closed_at: Option<Instant>,
}

/// Issues session ids and tracks which sessions are open
pub struct SessionManager {
    sessions: Mutex<HashMap<SessionId, Session>>,
    queue: Arc<dyn ResponseQueue>,
    ttl: Duration,
}

impl SessionManager {
    /// Create a manager publishing open markers through `queue`
    ///
    /// `ttl` is how long a session stays open without its stream refreshing it.
    pub fn new(queue: Arc<dyn ResponseQueue>, ttl: Duration) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            queue,
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Mint a new session id and record it as open
    ///
    /// The id comes from 128 bits of OS randomness. If the OS random source
    /// fails this returns an error instead of falling back to anything weaker.
    pub async fn create_session(&self) -> Result<SessionId, SessionError> {
        let mut bytes = [0u8; 16];
        OsRng
            .try_fill_bytes(&mut bytes)
            .map_err(|e| SessionError::Entropy(e.to_string()))?;
        let id = SessionId::from_random_bytes(bytes);

        self.queue.mark_open(&id, self.ttl).await?;

        {
            let mut sessions = self.sessions.lock();
            prune_closed(&mut sessions, self.ttl);
            sessions.insert(
                id.clone(),
                Session {
                    id: id.clone(),
                    created_at: Utc::now(),
                    state: SessionState::Open,
                    closed_at: None,
                },
            );
        }

        tracing::info!("Created session {}", id);
        Ok(id)
    }

    /// Whether dispatches against this session should be accepted
    ///
    /// A session closed by this process is closed regardless of the shared
    /// marker. Otherwise the shared marker decides, so sessions streamed by
    /// another worker are visible here too.
    pub async fn is_open(&self, id: &SessionId) -> bool {
        let local = self.state(id);
        if local == Some(SessionState::Closed) {
            return false;
        }

        match self.queue.is_open(id).await {
            Ok(open) => open,
            Err(e) => {
                tracing::warn!("Could not read open marker for session {}: {}", id, e);
                local.is_some()
            }
        }
    }

    /// Move a session from Open to Streaming
    pub fn begin_streaming(&self, id: &SessionId) -> Result<(), SessionError> {
        let mut sessions = self.sessions.lock();
        let session = sessions
            .get_mut(id)
            .ok_or_else(|| SessionError::NotFound(id.clone()))?;

        if session.state != SessionState::Open {
            return Err(SessionError::InvalidTransition {
                id: id.clone(),
                from: session.state,
                to: SessionState::Streaming,
            });
        }
        session.state = SessionState::Streaming;
        Ok(())
    }

    /// Extend the open marker by another TTL
    pub async fn refresh(&self, id: &SessionId) -> Result<(), SessionError> {
        self.queue.mark_open(id, self.ttl).await?;
        Ok(())
    }

    /// Close a session and release its queue storage
    ///
    /// Calling this more than once is harmless. The local state flips to
    /// Closed before the queue is touched, so even if the queue is unreachable
    /// this process stops accepting dispatches for the session.
    pub async fn close_session(&self, id: &SessionId) -> Result<(), SessionError> {
        let was_open = {
            let mut sessions = self.sessions.lock();
            match sessions.get_mut(id) {
                Some(session) if session.state != SessionState::Closed => {
                    session.state = SessionState::Closed;
                    session.closed_at = Some(Instant::now());
                    true
                }
                Some(_) => false,
                None => {
                    // Created elsewhere; remember the close locally anyway
                    sessions.insert(
                        id.clone(),
                        Session {
                            id: id.clone(),
                            created_at: Utc::now(),
                            state: SessionState::Closed,
                            closed_at: Some(Instant::now()),
                        },
                    );
                    true
                }
            }
        };

        self.queue.expire(id).await?;

        if was_open {
            tracing::info!("Closed session {}", id);
        }
        Ok(())
    }

    /// Local state of a session, if this process knows it
    pub fn state(&self, id: &SessionId) -> Option<SessionState> {
        self.sessions.lock().get(id).map(|s| s.state)
    }

    /// Local record of a session
    pub fn get(&self, id: &SessionId) -> Option<Session> {
        self.sessions.lock().get(id).cloned()
    }

    /// Number of sessions this process holds open or streaming
    pub fn active_count(&self) -> usize {
        self.sessions
            .lock()
            .values()
            .filter(|s| s.state != SessionState::Closed)
            .count()
    }
}

/// Forget closed sessions once their tombstone is older than `ttl`
///
/// By then any shared marker they had has expired as well.
fn prune_closed(sessions: &mut HashMap<SessionId, Session>, ttl: Duration) {
    let now = Instant::now();
    sessions.retain(|_, s| match s.closed_at {
        Some(closed_at) => now.duration_since(closed_at) < ttl,
        None => true,
    });
}
