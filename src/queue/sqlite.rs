/// SQLite implementation of the response queue
///
/// A single database file shared by every worker process on one host. Queue
/// operations borrow a connection from an r2d2 pool on the blocking thread
/// pool, so one session's slow statement never holds up another session.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, Connection, OptionalExtension};

use crate::domain::{OutboundMessage, SessionId};
use crate::queue::{migrations, poll_until, QueueError, ResponseQueue};

/// How long a writer waits on a lock held by another connection
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Connections kept per queue handle
const POOL_SIZE: u32 = 8;

/// Pragmas applied to every pooled connection
#[derive(Debug)]
struct PragmaCustomizer;

impl r2d2::CustomizeConnection<Connection, rusqlite::Error> for PragmaCustomizer {
    fn on_acquire(&self, conn: &mut Connection) -> Result<(), rusqlite::Error> {
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.execute_batch("PRAGMA synchronous = NORMAL;")?;
        Ok(())
    }
}

/// SQLite-based response queue
///
/// This struct holds a connection pool for the queue database and implements
/// the ResponseQueue contract on top of two tables: `response_queue` for
/// entries and `relay_sessions` for open markers.
pub struct SqliteResponseQueue {
    pool: Pool<SqliteConnectionManager>,
    path: PathBuf,
}

impl SqliteResponseQueue {
    /// Open (or create) the queue database
    ///
    /// This opens the database file, switches it to WAL so readers and the
    /// writer in other processes don't block each other, and runs any
    /// necessary migrations.
    pub fn new(db_path: PathBuf) -> Result<Self, QueueError> {
        let pool = Pool::builder()
            .max_size(POOL_SIZE)
            .connection_timeout(BUSY_TIMEOUT)
            .connection_customizer(Box::new(PragmaCustomizer))
            .build(SqliteConnectionManager::file(&db_path))
            .map_err(|e| QueueError::Connection(format!("Failed to open queue database: {}", e)))?;

        let conn = pool.get()?;
        // journal mode is stored in the file, once is enough
        let mode: String = conn
            .query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))
            .map_err(|e| QueueError::Connection(format!("Failed to enable WAL: {}", e)))?;
        tracing::debug!("Queue database journal mode: {}", mode);

        migrations::initialize_database(&conn)?;
        drop(conn);

        tracing::info!("SQLite response queue initialized at: {:?}", db_path);

        Ok(Self { pool, path: db_path })
    }

    /// Location of the database file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Run a closure against a pooled connection on the blocking pool
    async fn with_conn<T, F>(&self, f: F) -> Result<T, QueueError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T, QueueError> + Send + 'static,
    {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;
            f(&mut *conn)
        })
        .await
        .map_err(|e| QueueError::Task(e.to_string()))?
    }

    /// Remove and return the head entry without waiting
    ///
    /// An empty queue costs one read; the write lock is only taken to delete
    /// a head row that exists.
    async fn try_pop(&self, session_id: &SessionId) -> Result<Option<OutboundMessage>, QueueError> {
        let id = session_id.to_string();
        self.with_conn(move |conn| loop {
            let head: Option<i64> = conn
                .query_row(
                    "SELECT seq FROM response_queue WHERE session_id = ?1 ORDER BY seq LIMIT 1",
                    params![id],
                    |row| row.get(0),
                )
                .optional()?;
            let Some(seq) = head else {
                return Ok(None);
            };

            let payload: Option<String> = conn
                .query_row(
                    "DELETE FROM response_queue WHERE seq = ?1 RETURNING payload",
                    params![seq],
                    |row| row.get(0),
                )
                .optional()?;
            // None means another connection took this row first
            if let Some(payload) = payload {
                return Ok(Some(OutboundMessage::from_bytes(payload.as_bytes())?));
            }
        })
        .await
    }

    /// Number of entries waiting for a session
    pub async fn len(&self, session_id: &SessionId) -> Result<usize, QueueError> {
        let id = session_id.to_string();
        self.with_conn(move |conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM response_queue WHERE session_id = ?1",
                params![id],
                |row| row.get(0),
            )?;
            Ok(count as usize)
        })
        .await
    }
}

#[async_trait]
impl ResponseQueue for SqliteResponseQueue {
    async fn push(&self, session_id: &SessionId, message: &OutboundMessage) -> Result<(), QueueError> {
        let id = session_id.to_string();
        let payload = serde_json::to_string(message)?;
        let now = Utc::now();
        let inserted = self
            .with_conn(move |conn| {
                // the marker check and the insert are one statement, so a
                // concurrent expire can't leave a row behind
                let inserted = conn.execute(
                    "INSERT INTO response_queue (session_id, payload, enqueued_at)
                     SELECT ?1, ?2, ?3 WHERE EXISTS
                     (SELECT 1 FROM relay_sessions WHERE session_id = ?1 AND expires_at > ?4)",
                    params![id, payload, now.to_rfc3339(), now.timestamp_millis()],
                )?;
                Ok(inserted)
            })
            .await?;

        if inserted == 0 {
            return Err(QueueError::SessionClosed(session_id.clone()));
        }
        tracing::debug!("Queued response for session {}", session_id);
        Ok(())
    }

    async fn pop(&self, session_id: &SessionId, timeout: Duration) -> Result<Option<OutboundMessage>, QueueError> {
        poll_until(timeout, move || self.try_pop(session_id)).await
    }

    async fn expire(&self, session_id: &SessionId) -> Result<(), QueueError> {
        let id = session_id.to_string();
        let dropped = self
            .with_conn(move |conn| {
                let tx = conn.transaction()?;
                let dropped = tx.execute("DELETE FROM response_queue WHERE session_id = ?1", params![id])?;
                tx.execute("DELETE FROM relay_sessions WHERE session_id = ?1", params![id])?;
                tx.commit()?;
                Ok(dropped)
            })
            .await?;

        if dropped > 0 {
            tracing::debug!("Dropped {} undelivered messages for session {}", dropped, session_id);
        }
        Ok(())
    }

    async fn mark_open(&self, session_id: &SessionId, ttl: Duration) -> Result<(), QueueError> {
        let id = session_id.to_string();
        let now = Utc::now().timestamp_millis();
        let expires_at = now + ttl.as_millis() as i64;
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "INSERT INTO relay_sessions (session_id, expires_at) VALUES (?1, ?2)
                 ON CONFLICT(session_id) DO UPDATE SET expires_at = excluded.expires_at",
                params![id, expires_at],
            )?;
            // Sessions whose stream never refreshed them release their storage here
            tx.execute("DELETE FROM relay_sessions WHERE expires_at <= ?1", params![now])?;
            tx.execute(
                "DELETE FROM response_queue WHERE session_id NOT IN (SELECT session_id FROM relay_sessions)",
                [],
            )?;
            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn is_open(&self, session_id: &SessionId) -> Result<bool, QueueError> {
        let id = session_id.to_string();
        let now = Utc::now().timestamp_millis();
        self.with_conn(move |conn| {
            let expires_at: Option<i64> = conn
                .query_row(
                    "SELECT expires_at FROM relay_sessions WHERE session_id = ?1",
                    params![id],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(expires_at.map(|at| at > now).unwrap_or(false))
        })
        .await
    }

    fn backend_name(&self) -> &'static str {
        "sqlite"
    }
}
