// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Types shared between the downstream client and the registry.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A tool as advertised by a downstream server's `tools/list`.
///
/// Carries downstream-canonical data only; the registry derives the
/// sanitized title and provenance on top of this.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveredTool {
    /// Downstream-canonical tool name, used verbatim on the wire.
    pub name: String,

    /// Tool description.
    pub description: Option<String>,

    /// JSON Schema for tool input.
    pub input_schema: Value,

    /// JSON Schema for tool output, if the server supplies one.
    pub output_schema: Option<Value>,
}

/// A tool as seen by the registry and everything above it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDescriptor {
    /// Downstream-canonical tool name, used verbatim on the wire.
    pub name: String,

    /// Sanitized alias, safe as a script identifier and path component.
    /// Unique within the owning server's tools.
    pub title: String,

    /// Tool description.
    pub description: Option<String>,

    /// JSON Schema for tool input.
    pub input_schema: Value,

    /// JSON Schema for tool output.
    pub output_schema: Option<Value>,

    /// True iff `output_schema` came from the downstream server rather
    /// than from observed-output inference.
    pub original_output_schema: bool,
}

impl ToolDescriptor {
    /// Description text used for embedding and search payloads.
    pub fn description_text(&self) -> &str {
        self.description.as_deref().unwrap_or("")
    }
}

/// Server identity captured during the `initialize` handshake.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownstreamInfo {
    /// Server-reported name.
    pub name: String,

    /// Server-reported version.
    pub version: String,

    /// Negotiated protocol version.
    pub protocol_version: Option<String>,

    /// Server-supplied usage instructions, if any.
    pub instructions: Option<String>,
}

impl Default for DownstreamInfo {
    fn default() -> Self {
        Self {
            name: "unknown".to_string(),
            version: "0.0.0".to_string(),
            protocol_version: None,
            instructions: None,
        }
    }
}

/// Raw result of a downstream `tools/call`.
///
/// The wire object is kept intact so the sandbox can hand it to scripts
/// and the schema-inference drain unmodified.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallResponse {
    /// The `result` object exactly as the downstream server returned it.
    pub raw: Value,
}

impl ToolCallResponse {
    /// Wrap a raw result object.
    pub fn new(raw: Value) -> Self {
        Self { raw }
    }

    /// Build an error-shaped response from a message.
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            raw: serde_json::json!({
                "content": [{ "type": "text", "text": message.into() }],
                "isError": true
            }),
        }
    }

    /// The `content` array, or an empty array if absent.
    pub fn content(&self) -> Value {
        self.raw
            .get("content")
            .cloned()
            .unwrap_or_else(|| Value::Array(Vec::new()))
    }

    /// The `isError` flag, defaulting to false.
    pub fn is_error(&self) -> bool {
        self.raw
            .get("isError")
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    /// The `structuredContent` value, if the server returned one.
    pub fn structured_content(&self) -> Option<&Value> {
        self.raw.get("structuredContent")
    }

    /// First `text` content item, if any.
    pub fn first_text(&self) -> Option<&str> {
        self.raw
            .get("content")?
            .as_array()?
            .iter()
            .find(|item| item.get("type").and_then(Value::as_str) == Some("text"))?
            .get("text")?
            .as_str()
    }
}

/// Connection state for a downstream server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    /// Not connected.
    Disconnected,

    /// Currently connecting.
    Connecting,

    /// Fully initialized and ready.
    Ready,

    /// Connection failed.
    Failed,

    /// Closing connection.
    Closing,
}

impl Default for ConnectionState {
    fn default() -> Self {
        Self::Disconnected
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::Connecting => write!(f, "connecting"),
            Self::Ready => write!(f, "ready"),
            Self::Failed => write!(f, "failed"),
            Self::Closing => write!(f, "closing"),
        }
    }
}
