/// Response queue backends and the retry decorator
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use mcp_relay::queue::{MemoryResponseQueue, SqliteResponseQueue};
use mcp_relay::*;
use serde_json::json;
use tempfile::TempDir;
use tokio_test::{assert_err, assert_ok};

fn sid(s: &str) -> SessionId {
    SessionId::parse(s).unwrap()
}

fn reply(id: i64) -> OutboundMessage {
    OutboundMessage::success(RequestId::from(id), json!(id))
}

const SHORT: Duration = Duration::from_millis(10);
const TTL: Duration = Duration::from_secs(60);

/// Backend whose pushes fail with a transient error a fixed number of times
struct FlakyQueue {
    inner: MemoryResponseQueue,
    failures_left: AtomicU32,
    attempts: AtomicU32,
}

impl FlakyQueue {
    fn new(failures: u32) -> Self {
        Self {
            inner: MemoryResponseQueue::new(),
            failures_left: AtomicU32::new(failures),
            attempts: AtomicU32::new(0),
        }
    }
}

#[async_trait]
impl ResponseQueue for FlakyQueue {
    async fn push(&self, session_id: &SessionId, message: &OutboundMessage) -> Result<(), QueueError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let left = self.failures_left.load(Ordering::SeqCst);
        if left > 0 {
            self.failures_left.store(left - 1, Ordering::SeqCst);
            return Err(QueueError::Connection("broker unreachable".to_string()));
        }
        self.inner.push(session_id, message).await
    }

    async fn pop(&self, session_id: &SessionId, timeout: Duration) -> Result<Option<OutboundMessage>, QueueError> {
        self.inner.pop(session_id, timeout).await
    }

    async fn expire(&self, session_id: &SessionId) -> Result<(), QueueError> {
        self.inner.expire(session_id).await
    }

    async fn mark_open(&self, session_id: &SessionId, ttl: Duration) -> Result<(), QueueError> {
        self.inner.mark_open(session_id, ttl).await
    }

    async fn is_open(&self, session_id: &SessionId) -> Result<bool, QueueError> {
        self.inner.is_open(session_id).await
    }

    fn backend_name(&self) -> &'static str {
        "flaky"
    }
}

#[cfg(test)]
mod memory_queue_tests {
    use super::*;

    #[tokio::test]
    async fn test_fifo_within_session() {
        let queue = MemoryResponseQueue::new();
        queue.mark_open(&sid("a"), TTL).await.unwrap();
        for id in 1..=3 {
            queue.push(&sid("a"), &reply(id)).await.unwrap();
        }
        for id in 1..=3 {
            assert_eq!(queue.pop(&sid("a"), SHORT).await.unwrap(), Some(reply(id)));
        }
        assert_eq!(queue.pop(&sid("a"), SHORT).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_sessions_do_not_share_entries() {
        let queue = MemoryResponseQueue::new();
        queue.mark_open(&sid("a"), TTL).await.unwrap();
        queue.mark_open(&sid("b"), TTL).await.unwrap();
        queue.push(&sid("a"), &reply(1)).await.unwrap();

        assert_eq!(queue.pop(&sid("b"), SHORT).await.unwrap(), None);
        assert_eq!(queue.pop(&sid("a"), SHORT).await.unwrap(), Some(reply(1)));
    }

    #[tokio::test]
    async fn test_push_without_open_marker_is_refused() {
        let queue = MemoryResponseQueue::new();

        let err = assert_err!(queue.push(&sid("never-opened"), &reply(1)).await);
        assert!(matches!(err, QueueError::SessionClosed(_)));
        assert!(!err.is_transient());
        assert_eq!(queue.session_count(), 0);
    }
}

#[cfg(test)]
mod sqlite_queue_tests {
    use super::*;

    fn open(dir: &TempDir) -> SqliteResponseQueue {
        SqliteResponseQueue::new(dir.path().join("queue.db")).expect("Failed to open queue database")
    }

    #[tokio::test]
    async fn test_fifo_within_session() {
        let dir = TempDir::new().unwrap();
        let queue = open(&dir);
        queue.mark_open(&sid("a"), TTL).await.unwrap();

        for id in 1..=3 {
            queue.push(&sid("a"), &reply(id)).await.unwrap();
        }
        assert_eq!(queue.len(&sid("a")).await.unwrap(), 3);

        for id in 1..=3 {
            assert_eq!(queue.pop(&sid("a"), SHORT).await.unwrap(), Some(reply(id)));
        }
        assert_eq!(queue.pop(&sid("a"), SHORT).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_entries_visible_through_second_handle() {
        let dir = TempDir::new().unwrap();
        let producer = open(&dir);
        let consumer = open(&dir);
        producer.mark_open(&sid("a"), TTL).await.unwrap();
        producer.mark_open(&sid("b"), TTL).await.unwrap();

        producer.push(&sid("a"), &reply(1)).await.unwrap();
        producer.push(&sid("b"), &reply(2)).await.unwrap();

        assert_eq!(consumer.pop(&sid("a"), SHORT).await.unwrap(), Some(reply(1)));
        assert_eq!(consumer.pop(&sid("a"), SHORT).await.unwrap(), None);
        assert_eq!(consumer.pop(&sid("b"), SHORT).await.unwrap(), Some(reply(2)));
    }

    #[tokio::test]
    async fn test_pop_waits_for_late_push() {
        let dir = TempDir::new().unwrap();
        let consumer = open(&dir);
        let producer = open(&dir);
        consumer.mark_open(&sid("a"), TTL).await.unwrap();

        let handle = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(60)).await;
            producer.push(&sid("a"), &reply(7)).await.unwrap();
        });

        let got = consumer.pop(&sid("a"), Duration::from_secs(2)).await.unwrap();
        assert_eq!(got, Some(reply(7)));
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_open_marker_lifecycle() {
        let dir = TempDir::new().unwrap();
        let queue = open(&dir);
        let other = open(&dir);

        assert!(!queue.is_open(&sid("a")).await.unwrap());
        queue.mark_open(&sid("a"), Duration::from_secs(60)).await.unwrap();
        assert!(other.is_open(&sid("a")).await.unwrap());

        queue.push(&sid("a"), &reply(1)).await.unwrap();
        other.expire(&sid("a")).await.unwrap();

        assert!(!queue.is_open(&sid("a")).await.unwrap());
        assert_eq!(queue.len(&sid("a")).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_stale_sessions_are_purged() {
        let dir = TempDir::new().unwrap();
        let queue = open(&dir);

        queue.mark_open(&sid("stale"), Duration::from_millis(100)).await.unwrap();
        queue.push(&sid("stale"), &reply(1)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(!queue.is_open(&sid("stale")).await.unwrap());

        // any later mark_open sweeps expired sessions
        queue.mark_open(&sid("fresh"), Duration::from_secs(60)).await.unwrap();
        assert_eq!(queue.len(&sid("stale")).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_entries_survive_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let queue = open(&dir);
            queue.mark_open(&sid("a"), TTL).await.unwrap();
            queue.push(&sid("a"), &reply(1)).await.unwrap();
        }
        let queue = open(&dir);
        assert_eq!(queue.pop(&sid("a"), SHORT).await.unwrap(), Some(reply(1)));
    }

    #[tokio::test]
    async fn test_push_after_expire_leaves_no_rows() {
        let dir = TempDir::new().unwrap();
        let queue = open(&dir);
        let other = open(&dir);

        queue.mark_open(&sid("a"), TTL).await.unwrap();
        other.expire(&sid("a")).await.unwrap();

        let err = assert_err!(queue.push(&sid("a"), &reply(1)).await);
        assert!(matches!(err, QueueError::SessionClosed(_)));
        assert_eq!(queue.len(&sid("a")).await.unwrap(), 0);

        // a lapsed marker refuses pushes as well
        queue.mark_open(&sid("b"), Duration::from_millis(20)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_err!(queue.push(&sid("b"), &reply(2)).await);
        assert_eq!(queue.len(&sid("b")).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_pops_across_sessions_and_handles() {
        let dir = TempDir::new().unwrap();
        let handles: Vec<Arc<SqliteResponseQueue>> = (0..2).map(|_| Arc::new(open(&dir))).collect();

        let sessions: Vec<SessionId> = (0..8).map(|n| sid(&format!("s{}", n))).collect();
        for session in &sessions {
            handles[0].mark_open(session, TTL).await.unwrap();
            for id in 1..=5 {
                handles[0].push(session, &reply(id)).await.unwrap();
            }
        }

        // two streams per session on different handles, all running at once
        let mut tasks = Vec::new();
        for session in &sessions {
            for queue in &handles {
                let queue = queue.clone();
                let session = session.clone();
                tasks.push(tokio::spawn(async move {
                    let mut got = Vec::new();
                    while let Some(message) = queue.pop(&session, SHORT).await.unwrap() {
                        got.push(message);
                    }
                    (session, got)
                }));
            }
        }

        let mut delivered: std::collections::HashMap<SessionId, Vec<OutboundMessage>> = Default::default();
        for task in tasks {
            let (session, got) = task.await.unwrap();
            delivered.entry(session).or_default().extend(got);
        }

        for session in &sessions {
            let mut ids: Vec<i64> = delivered[session].iter().map(|m| m.result().unwrap().as_i64().unwrap()).collect();
            ids.sort_unstable();
            // every entry delivered exactly once
            assert_eq!(ids, vec![1, 2, 3, 4, 5]);
            assert_eq!(handles[1].len(session).await.unwrap(), 0);
        }
    }
}

#[cfg(test)]
mod retry_tests {
    use super::*;

    #[tokio::test]
    async fn test_transient_failures_are_retried() {
        let flaky = Arc::new(FlakyQueue::new(2));
        let queue = RetryingQueue::new(flaky.clone(), RetryPolicy::new(3, Duration::from_millis(1)));
        queue.mark_open(&sid("a"), TTL).await.unwrap();

        assert_ok!(queue.push(&sid("a"), &reply(1)).await);
        assert_eq!(flaky.attempts.load(Ordering::SeqCst), 3);
        assert_eq!(queue.pop(&sid("a"), SHORT).await.unwrap(), Some(reply(1)));
    }

    #[tokio::test]
    async fn test_gives_up_after_max_attempts() {
        let flaky = Arc::new(FlakyQueue::new(5));
        let queue = RetryingQueue::new(flaky.clone(), RetryPolicy::new(3, Duration::from_millis(1)));

        let err = assert_err!(queue.push(&sid("a"), &reply(1)).await);
        assert!(matches!(err, QueueError::Connection(_)));
        assert_eq!(flaky.attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_closed_session_is_not_retried() {
        let flaky = Arc::new(FlakyQueue::new(0));
        let queue = RetryingQueue::new(flaky.clone(), RetryPolicy::new(3, Duration::from_millis(1)));

        let err = assert_err!(queue.push(&sid("a"), &reply(1)).await);
        assert!(matches!(err, QueueError::SessionClosed(_)));
        assert_eq!(flaky.attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_dispatch_reports_transport_error() {
        let flaky = Arc::new(FlakyQueue::new(u32::MAX));
        let queue: Arc<dyn ResponseQueue> = Arc::new(RetryingQueue::new(flaky, RetryPolicy::none()));
        let sessions = Arc::new(SessionManager::new(queue.clone(), Duration::from_secs(60)));
        let registry = mcp_relay::tools::weather_registry().unwrap();
        let dispatcher = Dispatcher::new(Arc::new(registry), sessions.clone(), queue);

        let session = sessions.create_session().await.unwrap();
        let message = InboundMessage::from_json(json!({
            "id": 1,
            "kind": "tool",
            "name": "get_weather",
            "params": {"city": "Paris"}
        }))
        .unwrap();

        let err = assert_err!(dispatcher.dispatch(&session, message).await);
        assert!(matches!(err, DispatchError::Transport(_)));
        assert_eq!(err.kind(), ErrorKind::TransportError);
    }
}
