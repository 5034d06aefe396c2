/// Two relay workers sharing one queue backend
use std::sync::Arc;
use std::time::Duration;

use axum::http::StatusCode;
use mcp_relay::queue::SqliteResponseQueue;
use mcp_relay::tools::weather_registry;
use mcp_relay::*;
use serde_json::json;
use tempfile::TempDir;

use crate::support::*;

fn sqlite_worker(dir: &TempDir) -> RelayServer {
    let queue = SqliteResponseQueue::new(dir.path().join("queue.db")).expect("Failed to open queue database");
    RelayServer::with_queue(test_config(), weather_registry().unwrap(), Arc::new(queue))
}

#[cfg(test)]
mod shared_backend_tests {
    use super::*;

    #[tokio::test]
    async fn test_post_to_other_worker_reaches_stream() {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let streaming = sqlite_worker(&dir);
        let accepting = sqlite_worker(&dir);
        let stream_router = streaming.router();
        let post_router = accepting.router();

        let mut stream = open_stream(&stream_router).await;

        // the accepting worker never saw this session locally
        assert_eq!(accepting.sessions().state(&stream.session_id), None);
        assert!(accepting.sessions().is_open(&stream.session_id).await);

        let status = post_json(
            &post_router,
            &stream.endpoint,
            &json!({"id": 1, "kind": "tool", "name": "get_weather", "params": {"city": "Paris"}}),
        )
        .await;
        assert_eq!(status, StatusCode::ACCEPTED);

        let frame = stream.reader.next_message().await.expect("response frame");
        assert_eq!(frame, json!({"id": 1, "status": "ok", "result": "sunny"}));
    }

    #[tokio::test]
    async fn test_close_is_visible_to_other_worker() {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let streaming = sqlite_worker(&dir);
        let accepting = sqlite_worker(&dir);
        let stream_router = streaming.router();
        let post_router = accepting.router();

        let stream = open_stream(&stream_router).await;
        let OpenStream {
            reader,
            endpoint,
            session_id,
        } = stream;

        drop(reader);
        assert!(wait_closed(streaming.sessions(), &session_id).await);
        assert!(wait_closed(accepting.sessions(), &session_id).await);

        let status = post_json(
            &post_router,
            &endpoint,
            &json!({"id": 2, "kind": "tool", "name": "get_weather", "params": {"city": "Paris"}}),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_responses_for_many_requests_arrive() {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let streaming = sqlite_worker(&dir);
        let accepting = sqlite_worker(&dir);
        let stream_router = streaming.router();
        let post_router = accepting.router();

        let mut stream = open_stream(&stream_router).await;
        for id in 1..=3 {
            let router = if id % 2 == 0 { &stream_router } else { &post_router };
            post_json(
                router,
                &stream.endpoint,
                &json!({"id": id, "kind": "tool", "name": "get_weather", "params": {"city": "Oslo"}}),
            )
            .await;
        }

        let mut ids = Vec::new();
        for _ in 0..3 {
            let frame = stream.reader.next_message().await.expect("response frame");
            ids.push(frame["id"].as_i64().unwrap());
        }
        ids.sort_unstable();
        assert_eq!(ids, vec![1, 2, 3]);
        assert!(stream.reader.next_event(Duration::from_millis(200)).await.is_none());
    }
}
