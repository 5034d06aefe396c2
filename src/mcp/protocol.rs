/// HTTP-facing message structures
///
/// This module defines the error codes carried on outbound error messages and
/// the JSON shapes returned by the plain HTTP endpoints (capability listing,
/// error bodies).

use serde::Serialize;
use serde_json::Value;

use crate::domain::CapabilityKind;
use crate::registry::{CapabilityDescriptor, HandlerRegistry};

/// Protocol version advertised in the capability listing
pub const MCP_VERSION: &str = "2024-11-05";

// Error codes in the JSON-RPC style
pub mod error_codes {
    /// Invalid Request - the JSON sent is not a valid message envelope
    pub const INVALID_REQUEST: i32 = -32600;
    /// Method not found - no capability registered under that kind and name
    pub const UNKNOWN_CAPABILITY: i32 = -32601;
    /// Invalid parameters - capability exists but parameters are wrong
    pub const INVALID_PARAMS: i32 = -32602;

    // Application-specific error codes (-32000 to -32099)
    /// The session is unknown or already closed
    pub const SESSION_NOT_FOUND: i32 = -32001;
    /// The handler failed or panicked while running
    pub const HANDLER_ERROR: i32 = -32002;
    /// The response could not be queued
    pub const TRANSPORT_ERROR: i32 = -32003;
}

/// Error body for non-2xx HTTP responses
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

impl ErrorResponse {
    pub fn new(code: &str, error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            code: code.to_string(),
        }
    }
}

/// A tool as shown in the capability listing
#[derive(Debug, Serialize)]
pub struct ToolDefinition {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// JSON schema for the tool's input parameters
    pub input_schema: Value,
}

/// A prompt as shown in the capability listing
#[derive(Debug, Serialize)]
pub struct PromptDefinition {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub input_schema: Value,
    /// Parameters that accept completion requests
    pub completions: Vec<String>,
}

/// Response of the capability listing endpoint
#[derive(Debug, Serialize)]
pub struct CapabilityListing {
    pub protocol_version: String,
    pub server_info: ServerInfo,
    pub tools: Vec<ToolDefinition>,
    pub prompts: Vec<PromptDefinition>,
}

/// Information about this relay
#[derive(Debug, Serialize)]
pub struct ServerInfo {
    pub name: String,
    pub version: String,
}

impl CapabilityListing {
    /// Snapshot the registry
    pub fn from_registry(server_name: &str, registry: &HandlerRegistry) -> Self {
        let tools = registry
            .list(CapabilityKind::Tool)
            .into_iter()
            .map(|d: &CapabilityDescriptor| ToolDefinition {
                name: d.name.clone(),
                description: d.description.clone(),
                input_schema: d.schema.to_json_schema(),
            })
            .collect();

        let prompts = registry
            .list(CapabilityKind::Prompt)
            .into_iter()
            .map(|d: &CapabilityDescriptor| PromptDefinition {
                name: d.name.clone(),
                description: d.description.clone(),
                input_schema: d.schema.to_json_schema(),
                completions: registry
                    .completable_params(&d.name)
                    .into_iter()
                    .map(str::to_string)
                    .collect(),
            })
            .collect();

        Self {
            protocol_version: MCP_VERSION.to_string(),
            server_info: ServerInfo {
                name: server_name.to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
            tools,
            prompts,
        }
    }
}
