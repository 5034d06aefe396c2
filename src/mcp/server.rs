/// HTTP surface of the relay
///
/// This module wires the relay onto axum:
/// 1. The stream endpoint mints a session and streams its responses as SSE
/// 2. The message endpoint accepts one request, hands it to a background
///    dispatch task and acknowledges immediately
/// 3. Capability listing and health endpoints for operators

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::sse::Sse;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};

use crate::dispatch::{DispatchError, Dispatcher};
use crate::domain::{InboundMessage, SessionId};
use crate::mcp::protocol::{CapabilityListing, ErrorResponse};
use crate::queue::ResponseQueue;
use crate::registry::HandlerRegistry;
use crate::session::SessionManager;
use crate::stream::{StreamProducer, StreamSettings};

/// Everything a request handler needs, shared by all connections
#[derive(Clone)]
pub struct AppState {
    pub sessions: Arc<SessionManager>,
    pub queue: Arc<dyn ResponseQueue>,
    pub dispatcher: Dispatcher,
    pub registry: Arc<HandlerRegistry>,
    pub settings: StreamSettings,
    pub stream_path: String,
    pub message_path: String,
    pub server_name: String,
    pub shutdown: CancellationToken,
}

/// Query string of the message endpoint
#[derive(Debug, Deserialize)]
pub struct MessageQuery {
    pub session_id: Option<String>,
}

/// Build the relay's router
pub fn router(state: AppState) -> Router {
    let stream_path = state.stream_path.clone();
    let message_path = state.message_path.clone();

    Router::new()
        .route(&stream_path, get(stream_handler))
        .route(&message_path, post(message_handler))
        .route("/capabilities", get(capabilities_handler))
        .route("/health", get(health_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn error_response(status: StatusCode, code: &str, error: impl Into<String>) -> Response {
    (status, Json(ErrorResponse::new(code, error))).into_response()
}

/// Open a session and stream its responses until either side goes away
async fn stream_handler(State(state): State<AppState>) -> Response {
    let session_id = match state.sessions.create_session().await {
        Ok(id) => id,
        Err(e) => {
            error!("Could not open a session: {}", e);
            return error_response(StatusCode::SERVICE_UNAVAILABLE, "session_unavailable", e.to_string());
        }
    };

    let endpoint = format!("{}?session_id={}", state.message_path, session_id);
    info!("Session {} opened, posting endpoint {}", session_id, endpoint);

    let producer = match StreamProducer::new(
        session_id.clone(),
        endpoint,
        state.sessions.clone(),
        state.queue.clone(),
        state.settings,
        state.shutdown.clone(),
    ) {
        Ok(producer) => producer,
        Err(e) => {
            error!("Could not start stream for session {}: {}", session_id, e);
            if let Err(e) = state.sessions.close_session(&session_id).await {
                warn!("Failed to release session {}: {}", session_id, e);
            }
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, "stream_failed", e.to_string());
        }
    };

    Sse::new(producer.into_event_stream()).into_response()
}

/// Accept one inbound message for an open session
///
/// Returns as soon as the message is handed off; the outcome arrives on the
/// session's stream.
async fn message_handler(
    State(state): State<AppState>,
    Query(query): Query<MessageQuery>,
    body: Bytes,
) -> Response {
    let Some(raw_id) = query.session_id else {
        return error_response(StatusCode::BAD_REQUEST, "missing_session_id", "session_id query parameter is required");
    };
    let session_id = match SessionId::parse(&raw_id) {
        Ok(id) => id,
        Err(e) => return error_response(StatusCode::BAD_REQUEST, "invalid_session_id", e.to_string()),
    };

    let value: Value = match serde_json::from_slice(&body) {
        Ok(value) => value,
        Err(e) => {
            warn!("Rejecting non-JSON body for session {}: {}", session_id, e);
            return error_response(StatusCode::BAD_REQUEST, "invalid_json", e.to_string());
        }
    };

    if !state.sessions.is_open(&session_id).await {
        warn!("Post for closed or unknown session {}", session_id);
        return error_response(
            StatusCode::NOT_FOUND,
            "session_not_found",
            format!("Session not found: {}", session_id),
        );
    }

    match InboundMessage::from_json(value) {
        Ok(message) => {
            debug!("Accepted {} '{}' (id {}) for session {}", message.kind, message.name, message.id, session_id);
            let dispatcher = state.dispatcher.clone();
            tokio::spawn(async move {
                if let Err(e) = dispatcher.dispatch(&session_id, message).await {
                    debug!("Dispatch for session {} delivered nothing: {}", session_id, e);
                }
            });
            StatusCode::ACCEPTED.into_response()
        }
        Err((Some(request_id), e)) => {
            let dispatcher = state.dispatcher.clone();
            tokio::spawn(async move {
                if let Err(e) = dispatcher.reject(&session_id, request_id, DispatchError::from(e)).await {
                    debug!("Rejection for session {} delivered nothing: {}", session_id, e);
                }
            });
            StatusCode::ACCEPTED.into_response()
        }
        Err((None, e)) => {
            warn!("Rejecting envelope without an id for session {}: {}", session_id, e);
            error_response(StatusCode::BAD_REQUEST, "malformed_message", e.to_string())
        }
    }
}

async fn capabilities_handler(State(state): State<AppState>) -> Json<CapabilityListing> {
    Json(CapabilityListing::from_registry(&state.server_name, &state.registry))
}

async fn health_handler() -> &'static str {
    "ok"
}
