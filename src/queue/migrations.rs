/// Queue database migration management
///
/// This module creates and updates the SQLite schema used by the shared
/// response queue. Several worker processes may open the same file at once,
/// so every statement is idempotent.

use rusqlite::Connection;

use crate::queue::QueueError;

/// Current queue schema version
///
/// Increment this when you add new migrations
const CURRENT_VERSION: i32 = 1;

/// Initialize the queue schema
///
/// This creates all required tables and indexes if they don't exist.
/// It also sets up the version tracking for future migrations.
pub fn initialize_database(conn: &Connection) -> Result<(), QueueError> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY
        )",
        [],
    )?;

    let current_version = get_current_version(conn);

    if current_version < CURRENT_VERSION {
        run_migrations(conn, current_version)?;
        set_version(conn, CURRENT_VERSION)?;
    }

    Ok(())
}

/// Get the current schema version, 0 for a fresh database
fn get_current_version(conn: &Connection) -> i32 {
    conn.query_row("SELECT version FROM schema_version LIMIT 1", [], |row| {
        row.get::<_, i32>(0)
    })
    .unwrap_or(0)
}

fn set_version(conn: &Connection, version: i32) -> Result<(), QueueError> {
    conn.execute("DELETE FROM schema_version", [])?;
    conn.execute("INSERT INTO schema_version (version) VALUES (?1)", [version])?;
    Ok(())
}

/// Run migrations from the current version to the latest
fn run_migrations(conn: &Connection, from_version: i32) -> Result<(), QueueError> {
    if from_version < 1 {
        migration_v1(conn).map_err(|e| QueueError::Migration(format!("v1: {}", e)))?;
    }

    Ok(())
}

/// Migration to version 1: queue entries and session markers
fn migration_v1(conn: &Connection) -> Result<(), rusqlite::Error> {
    // seq is AUTOINCREMENT so ids are never reused; FIFO order is by seq
    conn.execute(
        "CREATE TABLE IF NOT EXISTS response_queue (
            seq INTEGER PRIMARY KEY AUTOINCREMENT,
            session_id TEXT NOT NULL,
            payload TEXT NOT NULL,
            enqueued_at TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_response_queue_session
         ON response_queue (session_id, seq)",
        [],
    )?;

    // expires_at is unix milliseconds
    conn.execute(
        "CREATE TABLE IF NOT EXISTS relay_sessions (
            session_id TEXT PRIMARY KEY,
            expires_at INTEGER NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_relay_sessions_expiry
         ON relay_sessions (expires_at)",
        [],
    )?;

    tracing::info!("Applied queue schema migration v1");
    Ok(())
}
