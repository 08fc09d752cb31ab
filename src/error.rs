// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Error types for the MCP meta-server.
//!
//! This module provides strongly-typed errors for the persistence, search,
//! registry, and sandbox layers, using `thiserror` for ergonomic error
//! definitions and `anyhow` for propagation in composition code. Downstream
//! connection errors live in [`crate::mcp::error`].

use thiserror::Error;

/// Errors that can occur while loading server descriptors.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Config file not found: {0}")]
    NotFound(String),

    #[error("Invalid config format: {0}")]
    InvalidFormat(String),

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Duplicate server name: {0}")]
    DuplicateServer(String),

    #[error("IO error reading config: {0}")]
    IoError(String),

    #[error("JSON parsing error: {0}")]
    JsonError(String),
}

impl From<std::io::Error> for ConfigError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => Self::NotFound(err.to_string()),
            _ => Self::IoError(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for ConfigError {
    fn from(err: serde_json::Error) -> Self {
        Self::JsonError(err.to_string())
    }
}

/// Errors that can occur in the tool metadata store.
#[derive(Error, Debug)]
pub enum PersistenceError {
    #[error("Failed to open metadata store: {0}")]
    OpenFailed(String),

    #[error("Query failed: {0}")]
    QueryFailed(String),

    #[error("Write failed: {0}")]
    WriteFailed(String),

    #[error("Row corrupted for {server}/{tool}: {message}")]
    Corrupted {
        server: String,
        tool: String,
        message: String,
    },
}

impl From<rusqlite::Error> for PersistenceError {
    fn from(err: rusqlite::Error) -> Self {
        Self::QueryFailed(err.to_string())
    }
}

/// Errors that can occur in the embeddings provider or vector index.
#[derive(Error, Debug)]
pub enum IndexError {
    #[error("Failed to open vector index: {0}")]
    OpenFailed(String),

    #[error("Index rebuild failed: {0}")]
    RebuildFailed(String),

    #[error("Search failed: {0}")]
    SearchFailed(String),

    #[error("Embedding failed: {0}")]
    EmbeddingFailed(String),

    #[error("Embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
}

impl From<rusqlite::Error> for IndexError {
    fn from(err: rusqlite::Error) -> Self {
        Self::SearchFailed(err.to_string())
    }
}

/// Errors that can occur in the server registry.
#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("Server already registered: {0}")]
    AlreadyRegistered(String),

    #[error("No connection handle for server: {0}")]
    MissingHandle(String),

    #[error("Server not found: {0}")]
    ServerNotFound(String),

    #[error("Tool not found: {server}/{tool}")]
    ToolNotFound { server: String, tool: String },

    #[error("Invalid tool path: {0}")]
    InvalidToolPath(String),

    #[error("Persistence error: {0}")]
    Persistence(#[from] PersistenceError),

    #[error("Downstream error: {0}")]
    Downstream(#[from] crate::mcp::McpError),
}

/// Errors that can occur in the composition sandbox.
#[derive(Error, Debug)]
pub enum SandboxError {
    #[error("Failed to materialize sandbox: {0}")]
    MaterializeFailed(String),

    #[error("Failed to launch script runner: {0}")]
    RunnerSpawnFailed(String),

    #[error("Script failed: {0}")]
    ScriptFailed(String),

    #[error("Runner protocol violation: {0}")]
    Protocol(String),

    #[error("IO error: {0}")]
    Io(String),
}

impl From<std::io::Error> for SandboxError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

/// Result type alias using anyhow for flexible error handling.
pub type Result<T> = anyhow::Result<T>;
