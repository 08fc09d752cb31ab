// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Downstream MCP error types.

use thiserror::Error;

/// Errors that can occur while talking to a downstream MCP server.
#[derive(Debug, Error)]
pub enum McpError {
    /// The child process could not be launched.
    #[error("Failed to spawn MCP server '{server}': {message}")]
    SpawnFailed { server: String, message: String },

    /// The MCP handshake did not complete.
    #[error("Handshake with MCP server '{server}' failed: {message}")]
    HandshakeFailed { server: String, message: String },

    /// Handshake timeout.
    #[error("Connection to MCP server '{server}' timed out after {timeout_secs}s")]
    ConnectionTimeout { server: String, timeout_secs: u64 },

    /// Tool call failed at the transport level.
    #[error("Tool call '{tool}' failed: {message}")]
    ToolCallFailed { tool: String, message: String },

    /// Tool call timeout.
    #[error("Tool call '{tool}' timed out after {timeout_secs}s")]
    ToolCallTimeout { tool: String, timeout_secs: u64 },

    /// Invalid response from server.
    #[error("Invalid response from MCP server: {0}")]
    InvalidResponse(String),

    /// Server is not connected.
    #[error("MCP server '{0}' is not ready")]
    NotReady(String),

    /// Server already registered with the connection manager.
    #[error("MCP server '{0}' is already connected")]
    AlreadyConnected(String),

    /// Protocol error (JSON-RPC).
    #[error("Protocol error: code={code}, message={message}")]
    Protocol { code: i64, message: String },

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl McpError {
    /// Create a spawn failed error.
    pub fn spawn_failed(server: impl Into<String>, message: impl Into<String>) -> Self {
        Self::SpawnFailed {
            server: server.into(),
            message: message.into(),
        }
    }

    /// Create a handshake failed error.
    pub fn handshake_failed(server: impl Into<String>, message: impl Into<String>) -> Self {
        Self::HandshakeFailed {
            server: server.into(),
            message: message.into(),
        }
    }

    /// Create a tool call failed error.
    pub fn tool_failed(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ToolCallFailed {
            tool: tool.into(),
            message: message.into(),
        }
    }

    /// Create a protocol error.
    pub fn protocol(code: i64, message: impl Into<String>) -> Self {
        Self::Protocol {
            code,
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = McpError::spawn_failed("weather", "no such file");
        assert!(err.to_string().contains("weather"));
        assert!(err.to_string().contains("no such file"));

        let err = McpError::protocol(-32601, "Method not found");
        assert!(err.to_string().contains("-32601"));
    }

    #[test]
    fn test_error_helpers() {
        assert!(matches!(
            McpError::handshake_failed("s", "m"),
            McpError::HandshakeFailed { .. }
        ));
        assert!(matches!(
            McpError::tool_failed("t", "m"),
            McpError::ToolCallFailed { .. }
        ));
    }
}
