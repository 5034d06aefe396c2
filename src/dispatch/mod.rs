/// Message dispatch
///
/// The dispatcher turns one inbound message into exactly one outbound message
/// on the originating session's queue. Every failure after the session check
/// becomes an error response correlated to the request id; nothing a handler
/// does can take the dispatcher down or leak into another session.

use std::any::Any;
use std::sync::Arc;

use serde_json::{json, Value};
use thiserror::Error;

use crate::domain::{CapabilityKind, DomainError, ErrorKind, InboundMessage, OutboundMessage, RequestId, SessionId};
use crate::mcp::protocol::error_codes;
use crate::queue::{QueueError, ResponseQueue};
use crate::registry::{HandlerError, HandlerRegistry, ParamSchema, ParamType, RegistryError, ValidationError};
use crate::session::SessionManager;

/// Parameter names of a completion request
pub const COMPLETION_ARGUMENT: &str = "argument";
pub const COMPLETION_VALUE: &str = "value";

/// Errors that can occur while dispatching a message
#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("Session not found: {0}")]
    SessionNotFound(SessionId),

    #[error("Unknown capability: {0}")]
    UnknownCapability(#[from] RegistryError),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Malformed message: {0}")]
    Malformed(String),

    #[error("Handler error: {0}")]
    Handler(#[from] HandlerError),

    #[error("Transport error: {0}")]
    Transport(#[from] QueueError),
}

impl From<ValidationError> for DispatchError {
    fn from(e: ValidationError) -> Self {
        DispatchError::Validation(e.to_string())
    }
}

impl From<DomainError> for DispatchError {
    fn from(e: DomainError) -> Self {
        DispatchError::Malformed(e.to_string())
    }
}

impl DispatchError {
    /// Numeric code carried on the outbound error
    pub fn code(&self) -> i32 {
        match self {
            DispatchError::SessionNotFound(_) => error_codes::SESSION_NOT_FOUND,
            DispatchError::UnknownCapability(_) => error_codes::UNKNOWN_CAPABILITY,
            DispatchError::Validation(_) => error_codes::INVALID_PARAMS,
            DispatchError::Malformed(_) => error_codes::INVALID_REQUEST,
            DispatchError::Handler(_) => error_codes::HANDLER_ERROR,
            DispatchError::Transport(_) => error_codes::TRANSPORT_ERROR,
        }
    }

    /// Taxonomy name carried on the outbound error
    pub fn kind(&self) -> ErrorKind {
        match self {
            DispatchError::SessionNotFound(_) => ErrorKind::SessionNotFound,
            DispatchError::UnknownCapability(_) => ErrorKind::UnknownCapability,
            DispatchError::Validation(_) => ErrorKind::ValidationError,
            DispatchError::Malformed(_) => ErrorKind::MalformedMessage,
            DispatchError::Handler(_) => ErrorKind::HandlerError,
            DispatchError::Transport(_) => ErrorKind::TransportError,
        }
    }

    /// Convert to the error response for a request
    pub fn to_outbound(&self, id: RequestId) -> OutboundMessage {
        let message = match self {
            DispatchError::UnknownCapability(e) => e.to_string(),
            DispatchError::Validation(m) | DispatchError::Malformed(m) => m.clone(),
            DispatchError::Handler(e) => e.to_string(),
            other => other.to_string(),
        };
        OutboundMessage::error(id, self.code(), self.kind(), message)
    }
}

/// Resolves inbound messages, runs handlers and queues the results
#[derive(Clone)]
pub struct Dispatcher {
    registry: Arc<HandlerRegistry>,
    sessions: Arc<SessionManager>,
    queue: Arc<dyn ResponseQueue>,
}

impl Dispatcher {
    pub fn new(registry: Arc<HandlerRegistry>, sessions: Arc<SessionManager>, queue: Arc<dyn ResponseQueue>) -> Self {
        Self {
            registry,
            sessions,
            queue,
        }
    }

    /// Dispatch one message and queue its response
    ///
    /// Returns `Ok` once a response (success or error) is on the session's
    /// queue. A message for a closed or unknown session is dropped with a log
    /// line and `SessionNotFound` is returned, since no stream exists to
    /// receive an error. The same holds when the session closes while the
    /// handler is still running. A queue failure is logged and returned as
    /// `Transport`.
    pub async fn dispatch(&self, session_id: &SessionId, message: InboundMessage) -> Result<(), DispatchError> {
        if !self.sessions.is_open(session_id).await {
            tracing::warn!(
                "Dropping {} '{}' (id {}) for closed or unknown session {}",
                message.kind,
                message.name,
                message.id,
                session_id
            );
            return Err(DispatchError::SessionNotFound(session_id.clone()));
        }

        tracing::debug!("Dispatching {} '{}' (id {}) for session {}", message.kind, message.name, message.id, session_id);

        let id = message.id.clone();
        let outbound = match self.execute(message).await {
            Ok(result) => OutboundMessage::success(id, result),
            Err(e) => {
                tracing::warn!("Request {} on session {} failed: {}", id, session_id, e);
                e.to_outbound(id)
            }
        };

        self.deliver(session_id, &outbound).await
    }

    /// Answer a request that never reached a handler (e.g. a malformed envelope)
    pub async fn reject(&self, session_id: &SessionId, id: RequestId, error: DispatchError) -> Result<(), DispatchError> {
        if !self.sessions.is_open(session_id).await {
            tracing::warn!("Dropping rejection of request {} for closed session {}", id, session_id);
            return Err(DispatchError::SessionNotFound(session_id.clone()));
        }
        tracing::warn!("Rejecting request {} on session {}: {}", id, session_id, error);
        self.deliver(session_id, &error.to_outbound(id)).await
    }

    async fn deliver(&self, session_id: &SessionId, outbound: &OutboundMessage) -> Result<(), DispatchError> {
        self.queue.push(session_id, outbound).await.map_err(|e| match e {
            // closed while the handler ran
            QueueError::SessionClosed(_) => {
                tracing::warn!("Dropping response {} for session {} closed mid-dispatch", outbound.id, session_id);
                DispatchError::SessionNotFound(session_id.clone())
            }
            e => {
                tracing::error!("Failed to queue response {} for session {}: {}", outbound.id, session_id, e);
                DispatchError::Transport(e)
            }
        })
    }

    /// Resolve, validate and run; the registry is only borrowed briefly and
    /// no lock is held while the handler runs
    async fn execute(&self, message: InboundMessage) -> Result<Value, DispatchError> {
        let InboundMessage { kind, name, params, .. } = message;
        let descriptor = self.registry.resolve(kind, &name)?;

        match kind {
            CapabilityKind::Tool | CapabilityKind::Prompt => {
                let binding = descriptor.schema.bind(params)?;
                log_ignored(kind, &name, &binding.ignored);

                let handler = descriptor.handler();
                run_handler(move || handler(binding.params)).await
            }
            CapabilityKind::Completion => {
                let binding = completion_schema().bind(params)?;
                log_ignored(kind, &name, &binding.ignored);

                let argument = binding.params.str(COMPLETION_ARGUMENT).map_err(|e| DispatchError::Validation(e.to_string()))?;
                let partial = binding.params.str(COMPLETION_VALUE).map_err(|e| DispatchError::Validation(e.to_string()))?.to_string();
                let complete = self.registry.resolve_completion(&name, argument)?;

                let values = run_handler(move || complete(&partial)).await?;
                Ok(json!(values))
            }
        }
    }
}

/// Declared parameters of every completion request
fn completion_schema() -> ParamSchema {
    ParamSchema::new()
        .required(COMPLETION_ARGUMENT, ParamType::String)
        .describe("Name of the prompt parameter to complete")
        .required(COMPLETION_VALUE, ParamType::String)
        .describe("Partial value typed so far")
}

fn log_ignored(kind: CapabilityKind, name: &str, ignored: &[String]) {
    if !ignored.is_empty() {
        tracing::warn!("Ignoring undeclared parameters for {} '{}': {}", kind, name, ignored.join(", "));
    }
}

/// Run handler code on the blocking pool, turning panics into handler errors
async fn run_handler<T, F>(f: F) -> Result<T, DispatchError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, HandlerError> + Send + 'static,
{
    match tokio::task::spawn_blocking(f).await {
        Ok(result) => result.map_err(DispatchError::Handler),
        Err(e) if e.is_panic() => {
            let message = panic_message(e.into_panic());
            Err(DispatchError::Handler(HandlerError::Panicked(message)))
        }
        Err(e) => Err(DispatchError::Handler(HandlerError::failed(e.to_string()))),
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
