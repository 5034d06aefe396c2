/// Inbound and outbound message envelopes
///
/// An `InboundMessage` is what a client posts to the message endpoint. An
/// `OutboundMessage` is what the dispatcher pushes onto the session's response
/// queue and what the stream finally delivers as one event frame.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::domain::{CapabilityKind, DomainError, RequestId};

/// A request posted by a client against an open session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboundMessage {
    /// Correlation id echoed on the response
    pub id: RequestId,
    /// Which registry table the name is looked up in
    pub kind: CapabilityKind,
    /// Capability name (for completions, the prompt name)
    pub name: String,
    /// Named parameter values
    #[serde(default)]
    pub params: Map<String, Value>,
}

impl InboundMessage {
    /// Create a new inbound message
    pub fn new(id: RequestId, kind: CapabilityKind, name: impl Into<String>, params: Map<String, Value>) -> Self {
        Self {
            id,
            kind,
            name: name.into(),
            params,
        }
    }

    /// Parse an envelope from raw JSON
    ///
    /// On failure the error carries whatever request id could be salvaged so
    /// the caller can still answer the client on the stream.
    pub fn from_json(value: Value) -> Result<Self, (Option<RequestId>, DomainError)> {
        let salvaged = value.get("id").and_then(RequestId::from_value);
        serde_json::from_value(value)
            .map_err(|e| (salvaged, DomainError::MalformedMessage(e.to_string())))
    }
}

/// Taxonomy name carried on error responses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    SessionNotFound,
    UnknownCapability,
    ValidationError,
    HandlerError,
    TransportError,
    MalformedMessage,
}

/// Structured error delivered to the client in place of a result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorPayload {
    /// Numeric code in the JSON-RPC style
    pub code: i32,
    /// Taxonomy name
    pub kind: ErrorKind,
    /// Human-readable error message
    pub message: String,
}

/// Success or error discriminant plus payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum Outcome {
    Ok { result: Value },
    Error { error: ErrorPayload },
}

/// A response routed back to the stream of the session that asked for it
///
/// Serializes to `{"id":1,"status":"ok","result":...}` or
/// `{"id":1,"status":"error","error":{...}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub id: RequestId,
    #[serde(flatten)]
    pub outcome: Outcome,
}

impl OutboundMessage {
    /// Create a successful response
    pub fn success(id: RequestId, result: Value) -> Self {
        Self {
            id,
            outcome: Outcome::Ok { result },
        }
    }

    /// Create an error response
    pub fn error(id: RequestId, code: i32, kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            id,
            outcome: Outcome::Error {
                error: ErrorPayload {
                    code,
                    kind,
                    message: message.into(),
                },
            },
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.outcome, Outcome::Ok { .. })
    }

    /// The result value, if this is a success
    pub fn result(&self) -> Option<&Value> {
        match &self.outcome {
            Outcome::Ok { result } => Some(result),
            Outcome::Error { .. } => None,
        }
    }

    /// The error payload, if this is a failure
    pub fn error_payload(&self) -> Option<&ErrorPayload> {
        match &self.outcome {
            Outcome::Ok { .. } => None,
            Outcome::Error { error } => Some(error),
        }
    }

    /// Serialize for storage in a queue entry
    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Decode a queue entry
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}
