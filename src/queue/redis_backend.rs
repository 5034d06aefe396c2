/// Redis implementation of the response queue
///
/// Each session owns a list key (`<prefix>:responses:<id>`) and a marker key
/// (`<prefix>:session:<id>`). Entries go in with RPUSH and come out with LPOP.
/// The connection manager is multiplexed, so `pop` polls with LPOP instead of
/// issuing BLPOP, which would stall every other command on the connection.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;

use crate::domain::{OutboundMessage, SessionId};
use crate::queue::{poll_until, QueueError, ResponseQueue};

/// Default namespace for every key this queue touches
pub const DEFAULT_KEY_PREFIX: &str = "mcp";

/// Redis-based response queue
#[derive(Clone)]
pub struct RedisResponseQueue {
    conn: ConnectionManager,
    prefix: String,
    entry_ttl: Duration,
}

impl RedisResponseQueue {
    /// Connect to the Redis server at `url`
    ///
    /// `entry_ttl` bounds how long an undelivered list survives without a
    /// stream refreshing it; use the session TTL.
    pub async fn connect(url: &str, entry_ttl: Duration) -> Result<Self, QueueError> {
        let client = redis::Client::open(url)
            .map_err(|e| QueueError::Connection(format!("Invalid Redis URL '{}': {}", url, e)))?;
        let conn = ConnectionManager::new(client)
            .await
            .map_err(|e| QueueError::Connection(format!("Failed to connect to Redis: {}", e)))?;

        tracing::info!("Redis response queue connected to {}", url);

        Ok(Self {
            conn,
            prefix: DEFAULT_KEY_PREFIX.to_string(),
            entry_ttl,
        })
    }

    /// Use a different key namespace (several relays sharing one Redis)
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    fn list_key(&self, session_id: &SessionId) -> String {
        format!("{}:responses:{}", self.prefix, session_id)
    }

    fn marker_key(&self, session_id: &SessionId) -> String {
        format!("{}:session:{}", self.prefix, session_id)
    }

    async fn try_pop(&self, session_id: &SessionId) -> Result<Option<OutboundMessage>, QueueError> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn.lpop(self.list_key(session_id), None).await?;
        match raw {
            Some(payload) => Ok(Some(OutboundMessage::from_bytes(payload.as_bytes())?)),
            None => Ok(None),
        }
    }
}

/// Whole seconds for EXPIRE/SET EX, never zero
fn ttl_secs(ttl: Duration) -> u64 {
    ttl.as_secs().max(1)
}

#[async_trait]
impl ResponseQueue for RedisResponseQueue {
    async fn push(&self, session_id: &SessionId, message: &OutboundMessage) -> Result<(), QueueError> {
        let key = self.list_key(session_id);
        let payload = serde_json::to_string(message)?;
        let mut conn = self.conn.clone();

        // An expire landing between this check and the RPUSH leaves a list
        // that the EXPIRE below still reclaims
        let open: bool = conn.exists(self.marker_key(session_id)).await?;
        if !open {
            return Err(QueueError::SessionClosed(session_id.clone()));
        }

        let _: () = redis::pipe()
            .atomic()
            .cmd("RPUSH")
            .arg(&key)
            .arg(payload)
            .ignore()
            .cmd("EXPIRE")
            .arg(&key)
            .arg(ttl_secs(self.entry_ttl))
            .ignore()
            .query_async(&mut conn)
            .await?;

        tracing::debug!("Queued response for session {}", session_id);
        Ok(())
    }

    async fn pop(&self, session_id: &SessionId, timeout: Duration) -> Result<Option<OutboundMessage>, QueueError> {
        poll_until(timeout, move || self.try_pop(session_id)).await
    }

    async fn expire(&self, session_id: &SessionId) -> Result<(), QueueError> {
        let mut conn = self.conn.clone();
        let _: () = redis::cmd("DEL")
            .arg(self.list_key(session_id))
            .arg(self.marker_key(session_id))
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn mark_open(&self, session_id: &SessionId, ttl: Duration) -> Result<(), QueueError> {
        let secs = ttl_secs(ttl);
        let mut conn = self.conn.clone();

        // The list TTL follows the marker so an abandoned session's entries go with it
        let _: () = redis::pipe()
            .atomic()
            .cmd("SET")
            .arg(self.marker_key(session_id))
            .arg(1)
            .arg("EX")
            .arg(secs)
            .ignore()
            .cmd("EXPIRE")
            .arg(self.list_key(session_id))
            .arg(secs)
            .ignore()
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn is_open(&self, session_id: &SessionId) -> Result<bool, QueueError> {
        let mut conn = self.conn.clone();
        let open: bool = conn.exists(self.marker_key(session_id)).await?;
        Ok(open)
    }

    fn backend_name(&self) -> &'static str {
        "redis"
    }
}
