/// Retry with exponential backoff for queue operations
///
/// A shared backend can be briefly unreachable (Redis failover, a SQLite file
/// locked by another worker). `RetryingQueue` wraps any backend and retries
/// transient failures before giving up and surfacing a transport error.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::domain::{OutboundMessage, SessionId};
use crate::queue::{QueueError, ResponseQueue};

/// How many times to try a queue operation and how long to wait in between
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first one
    pub max_attempts: u32,
    /// Delay before the second attempt; doubled for each later one
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(100),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
        }
    }

    /// A policy that never retries
    pub fn none() -> Self {
        Self::new(1, Duration::ZERO)
    }

    /// Delay to wait after the given failed attempt (1-based)
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay.saturating_mul(factor)
    }

    /// Run `op` until it succeeds, fails permanently, or attempts run out
    pub async fn run<T, F, Fut>(&self, operation: &str, mut op: F) -> Result<T, QueueError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, QueueError>>,
    {
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempt < self.max_attempts => {
                    let delay = self.delay_after(attempt);
                    tracing::warn!(
                        "Queue {} failed (attempt {}/{}), retrying in {:?}: {}",
                        operation,
                        attempt,
                        self.max_attempts,
                        delay,
                        e
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Decorator applying a `RetryPolicy` to every operation of a queue
pub struct RetryingQueue {
    inner: Arc<dyn ResponseQueue>,
    policy: RetryPolicy,
}

impl RetryingQueue {
    pub fn new(inner: Arc<dyn ResponseQueue>, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }
}

#[async_trait]
impl ResponseQueue for RetryingQueue {
    async fn push(&self, session_id: &SessionId, message: &OutboundMessage) -> Result<(), QueueError> {
        self.policy
            .run("push", || self.inner.push(session_id, message))
            .await
    }

    async fn pop(&self, session_id: &SessionId, timeout: Duration) -> Result<Option<OutboundMessage>, QueueError> {
        self.policy
            .run("pop", || self.inner.pop(session_id, timeout))
            .await
    }

    async fn expire(&self, session_id: &SessionId) -> Result<(), QueueError> {
        self.policy
            .run("expire", || self.inner.expire(session_id))
            .await
    }

    async fn mark_open(&self, session_id: &SessionId, ttl: Duration) -> Result<(), QueueError> {
        self.policy
            .run("mark_open", || self.inner.mark_open(session_id, ttl))
            .await
    }

    async fn is_open(&self, session_id: &SessionId) -> Result<bool, QueueError> {
        self.policy
            .run("is_open", || self.inner.is_open(session_id))
            .await
    }

    fn backend_name(&self) -> &'static str {
        self.inner.backend_name()
    }
}
