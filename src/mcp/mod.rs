// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Downstream MCP plumbing.
//!
//! Each configured server is spawned as a child process and spoken to over
//! line-delimited JSON-RPC on its stdio. The meta-server uses exactly three
//! protocol operations downstream: `initialize` (which also yields the
//! server's instructions), `tools/list`, and `tools/call`.
//!
//! ```text
//! ┌────────────────────────────────────────────────────┐
//! │                 ConnectionManager                  │
//! │  ┌────────────┐  ┌────────────┐  ┌────────────┐    │
//! │  │ McpClient  │  │ McpClient  │  │ McpClient  │    │
//! │  │ (weather)  │  │ (time)     │  │ (search)   │    │
//! │  └─────┬──────┘  └─────┬──────┘  └─────┬──────┘    │
//! └────────┼───────────────┼───────────────┼───────────┘
//!          │ stdio         │ stdio         │ stdio
//!      subprocess      subprocess      subprocess
//! ```

pub mod client;
pub mod error;
pub mod types;

pub use client::{ClientHandle, ConnectionManager, McpClient};
pub use error::McpError;
pub use types::{
    ConnectionState, DiscoveredTool, DownstreamInfo, ToolCallResponse, ToolDescriptor,
};
