/// Core identifier types and enums used throughout the relay
///
/// This module defines the session and request identifiers and the capability
/// kind tag that every inbound message carries.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::DomainError;

/// Unique identifier for a session
///
/// This is a wrapper around a string token so a session id can't be confused
/// with a capability name or a request id. Tokens minted by this server are
/// 32 lowercase hex characters built from 128 bits of OS randomness.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    /// Build a session id from 16 random bytes
    ///
    /// The bytes are stamped as a version 4 UUID and rendered without hyphens.
    pub fn from_random_bytes(bytes: [u8; 16]) -> Self {
        let uuid = uuid::Builder::from_random_bytes(bytes).into_uuid();
        Self(uuid.simple().to_string())
    }

    /// Parse a session id received from a client
    ///
    /// Only the shape is checked here; whether the session is open is the
    /// session manager's business.
    pub fn parse(s: &str) -> Result<Self, DomainError> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err(DomainError::InvalidSessionId("session id cannot be empty".to_string()));
        }
        if trimmed.len() > 128 || !trimmed.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
            return Err(DomainError::InvalidSessionId(format!("malformed session id '{}'", trimmed)));
        }
        Ok(Self(trimmed.to_string()))
    }

    /// Borrow the raw token
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<Uuid> for SessionId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid.simple().to_string())
    }
}

/// Correlation identifier carried by a request and echoed on its response
///
/// Clients may use numbers or strings, the same way JSON-RPC ids work. Any
/// JSON number is kept as sent, fractions and large integers included.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    Number(serde_json::Number),
    String(String),
}

impl RequestId {
    /// Try to recover a request id from an arbitrary JSON value
    ///
    /// Used when an envelope is too broken to deserialize but still carries
    /// something that looks like an id.
    pub fn from_value(value: &serde_json::Value) -> Option<Self> {
        match value {
            serde_json::Value::Number(n) => Some(RequestId::Number(n.clone())),
            serde_json::Value::String(s) => Some(RequestId::String(s.clone())),
            _ => None,
        }
    }
}

impl From<i64> for RequestId {
    fn from(n: i64) -> Self {
        RequestId::Number(n.into())
    }
}

impl From<String> for RequestId {
    fn from(s: String) -> Self {
        RequestId::String(s)
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestId::Number(n) => write!(f, "{}", n),
            RequestId::String(s) => f.write_str(s),
        }
    }
}

/// The kind of capability a message targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CapabilityKind {
    /// A callable tool returning an arbitrary result
    Tool,
    /// A prompt template rendered from parameters
    Prompt,
    /// Candidate values for one parameter of a prompt
    Completion,
}

impl CapabilityKind {
    /// Get the wire name for this kind
    pub fn as_str(&self) -> &'static str {
        match self {
            CapabilityKind::Tool => "tool",
            CapabilityKind::Prompt => "prompt",
            CapabilityKind::Completion => "completion",
        }
    }
}

impl fmt::Display for CapabilityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CapabilityKind {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "tool" => Ok(CapabilityKind::Tool),
            "prompt" => Ok(CapabilityKind::Prompt),
            "completion" => Ok(CapabilityKind::Completion),
            other => Err(DomainError::InvalidKind(other.to_string())),
        }
    }
}
