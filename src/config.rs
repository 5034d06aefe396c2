/// Relay configuration
///
/// Every setting is a command line flag with an `MCP_RELAY_*` environment
/// variable fallback. Workers meant to serve the same clients must agree on
/// the backend and its connection target.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::ValueEnum;

use crate::queue::{MemoryResponseQueue, QueueError, RedisResponseQueue, ResponseQueue, RetryPolicy, SqliteResponseQueue};
use crate::stream::StreamSettings;

/// Where response queues live
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Backend {
    /// In-process only; valid for a single worker
    Memory,
    /// Shared database file; workers on one host
    Sqlite,
    /// Shared Redis server; workers anywhere
    Redis,
}

/// Runtime settings of a relay server
#[derive(Debug, Clone, clap::Args)]
pub struct RelayConfig {
    /// Address to listen on
    #[arg(long, env = "MCP_RELAY_BIND", default_value = "0.0.0.0:9000")]
    pub bind: SocketAddr,

    /// Server name reported in the capability listing
    #[arg(long, env = "MCP_RELAY_NAME", default_value = "weather")]
    pub server_name: String,

    /// Path of the event-stream endpoint
    #[arg(long, env = "MCP_RELAY_STREAM_PATH", default_value = "/sse")]
    pub stream_path: String,

    /// Path of the message-posting endpoint
    #[arg(long, env = "MCP_RELAY_MESSAGE_PATH", default_value = "/message")]
    pub message_path: String,

    /// Response queue backend
    #[arg(long, value_enum, env = "MCP_RELAY_BACKEND", default_value_t = Backend::Memory)]
    pub backend: Backend,

    /// Redis connection URL (redis backend)
    #[arg(long, env = "MCP_RELAY_REDIS_URL", default_value = "redis://127.0.0.1:6379/0")]
    pub redis_url: String,

    /// Queue database file (sqlite backend)
    /// If not provided, uses a default location in the user's home directory
    #[arg(long, env = "MCP_RELAY_SQLITE_PATH")]
    pub sqlite_path: Option<PathBuf>,

    /// Longest single wait on the queue, in milliseconds
    #[arg(long, env = "MCP_RELAY_POLL_INTERVAL_MS", default_value_t = 1000)]
    pub poll_interval_ms: u64,

    /// Idle seconds before a keepalive frame; 0 disables keepalives
    #[arg(long, env = "MCP_RELAY_KEEPALIVE_SECS", default_value_t = 15)]
    pub keepalive_secs: u64,

    /// Seconds a session stays open without its stream refreshing it
    #[arg(long, env = "MCP_RELAY_SESSION_TTL_SECS", default_value_t = 300)]
    pub session_ttl_secs: u64,

    /// Attempts per queue operation before giving up
    #[arg(long, env = "MCP_RELAY_RETRY_ATTEMPTS", default_value_t = 3)]
    pub retry_attempts: u32,

    /// Delay before the first retry, in milliseconds (doubles each retry)
    #[arg(long, env = "MCP_RELAY_RETRY_BASE_DELAY_MS", default_value_t = 100)]
    pub retry_base_delay_ms: u64,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([0, 0, 0, 0], 9000)),
            server_name: "weather".to_string(),
            stream_path: "/sse".to_string(),
            message_path: "/message".to_string(),
            backend: Backend::Memory,
            redis_url: "redis://127.0.0.1:6379/0".to_string(),
            sqlite_path: None,
            poll_interval_ms: 1000,
            keepalive_secs: 15,
            session_ttl_secs: 300,
            retry_attempts: 3,
            retry_base_delay_ms: 100,
        }
    }
}

impl RelayConfig {
    /// Check settings that clap can't check on its own
    pub fn validate(&self) -> Result<(), String> {
        for (name, path) in [("stream path", &self.stream_path), ("message path", &self.message_path)] {
            if !path.starts_with('/') {
                return Err(format!("{} '{}' must start with '/'", name, path));
            }
        }
        if self.stream_path == self.message_path {
            return Err("stream path and message path must differ".to_string());
        }
        if self.poll_interval_ms == 0 {
            return Err("poll interval must be at least 1 ms".to_string());
        }
        if self.session_ttl_secs == 0 {
            return Err("session TTL must be at least 1 second".to_string());
        }
        Ok(())
    }

    pub fn stream_settings(&self) -> StreamSettings {
        StreamSettings {
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            keepalive_interval: (self.keepalive_secs > 0).then(|| Duration::from_secs(self.keepalive_secs)),
        }
    }

    pub fn session_ttl(&self) -> Duration {
        Duration::from_secs(self.session_ttl_secs)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.retry_attempts, Duration::from_millis(self.retry_base_delay_ms))
    }

    /// Build the configured queue backend (without retries)
    pub async fn build_queue(&self) -> Result<Arc<dyn ResponseQueue>, QueueError> {
        let queue: Arc<dyn ResponseQueue> = match self.backend {
            Backend::Memory => {
                tracing::warn!("Using the in-memory queue; run a single worker only");
                Arc::new(MemoryResponseQueue::new())
            }
            Backend::Sqlite => {
                let path = match &self.sqlite_path {
                    Some(path) => {
                        if let Some(parent) = path.parent() {
                            if !parent.as_os_str().is_empty() && !parent.exists() {
                                std::fs::create_dir_all(parent).map_err(|e| {
                                    QueueError::Connection(format!("Cannot create {}: {}", parent.display(), e))
                                })?;
                            }
                        }
                        path.clone()
                    }
                    None => default_sqlite_path()
                        .map_err(|e| QueueError::Connection(format!("No usable queue directory: {}", e)))?,
                };
                Arc::new(SqliteResponseQueue::new(path)?)
            }
            Backend::Redis => Arc::new(RedisResponseQueue::connect(&self.redis_url, self.session_ttl()).await?),
        };
        Ok(queue)
    }
}

/// Get the default queue database path with robust fallback strategy
pub fn default_sqlite_path() -> Result<PathBuf, std::io::Error> {
    // Try various locations in order of preference
    let potential_paths = [
        dirs::data_dir().map(|mut p| {
            p.push("mcp_relay");
            p
        }),
        dirs::home_dir().map(|mut p| {
            p.push(".mcp_relay");
            p
        }),
        std::env::current_dir().ok().map(|mut p| {
            p.push(".mcp_relay");
            p
        }),
    ];

    for potential_path in potential_paths.iter().flatten() {
        if std::fs::create_dir_all(potential_path).is_ok() {
            // Test if we can write to this directory
            let test_file = potential_path.join(".test_write");
            if std::fs::write(&test_file, "test").is_ok() {
                let _ = std::fs::remove_file(&test_file);
                return Ok(potential_path.join("queue.db"));
            }
        }
    }

    // Ultimate fallback: use a temporary directory
    let mut temp_path = std::env::temp_dir();
    temp_path.push("mcp_relay");
    std::fs::create_dir_all(&temp_path)?;
    temp_path.push("queue.db");

    tracing::warn!("Using temporary directory for queue database: {}", temp_path.display());
    Ok(temp_path)
}
