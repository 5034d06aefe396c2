/// Session lifecycle tests
use std::sync::Arc;
use std::time::Duration;

use mcp_relay::queue::MemoryResponseQueue;
use mcp_relay::*;
use tokio_test::{assert_err, assert_ok};

fn manager(ttl: Duration) -> (SessionManager, Arc<MemoryResponseQueue>) {
    let queue = Arc::new(MemoryResponseQueue::new());
    (SessionManager::new(queue.clone(), ttl), queue)
}

#[cfg(test)]
mod session_unit_tests {
    use super::*;

    #[tokio::test]
    async fn test_new_sessions_are_open_and_distinct() {
        let (sessions, _) = manager(Duration::from_secs(60));
        let a = sessions.create_session().await.unwrap();
        let b = sessions.create_session().await.unwrap();

        assert_ne!(a, b);
        assert_eq!(a.as_str().len(), 32);
        assert!(sessions.is_open(&a).await);
        assert_eq!(sessions.state(&a), Some(SessionState::Open));
        assert_eq!(sessions.active_count(), 2);
    }

    #[tokio::test]
    async fn test_lifecycle_transitions() {
        let (sessions, _) = manager(Duration::from_secs(60));
        let id = sessions.create_session().await.unwrap();

        assert_ok!(sessions.begin_streaming(&id));
        assert_eq!(sessions.state(&id), Some(SessionState::Streaming));

        // only one stream per session
        let err = assert_err!(sessions.begin_streaming(&id));
        assert!(matches!(err, SessionError::InvalidTransition { .. }));

        assert_ok!(sessions.close_session(&id).await);
        assert_eq!(sessions.state(&id), Some(SessionState::Closed));
        assert!(!sessions.is_open(&id).await);

        // closed is terminal
        assert!(sessions.begin_streaming(&id).is_err());
    }

    #[tokio::test]
    async fn test_close_is_idempotent_and_releases_storage() {
        let (sessions, queue) = manager(Duration::from_secs(60));
        let id = sessions.create_session().await.unwrap();
        queue
            .push(&id, &OutboundMessage::success(RequestId::from(1), serde_json::json!("x")))
            .await
            .unwrap();

        assert_ok!(sessions.close_session(&id).await);
        assert_ok!(sessions.close_session(&id).await);
        assert_eq!(queue.len(&id), 0);
        assert_eq!(sessions.active_count(), 0);
    }

    #[tokio::test]
    async fn test_unrefreshed_session_expires() {
        let (sessions, _) = manager(Duration::from_millis(30));
        let id = sessions.create_session().await.unwrap();
        assert!(sessions.is_open(&id).await);

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(!sessions.is_open(&id).await);
    }

    #[tokio::test]
    async fn test_refresh_extends_session() {
        let (sessions, _) = manager(Duration::from_millis(80));
        let id = sessions.create_session().await.unwrap();

        for _ in 0..3 {
            tokio::time::sleep(Duration::from_millis(40)).await;
            assert_ok!(sessions.refresh(&id).await);
        }
        assert!(sessions.is_open(&id).await);
    }

    #[tokio::test]
    async fn test_other_manager_sees_shared_marker() {
        let queue = Arc::new(MemoryResponseQueue::new());
        let creator = SessionManager::new(queue.clone(), Duration::from_secs(60));
        let observer = SessionManager::new(queue, Duration::from_secs(60));

        let id = creator.create_session().await.unwrap();
        assert!(observer.is_open(&id).await);

        observer.close_session(&id).await.unwrap();
        assert!(!creator.is_open(&id).await);
    }
}
