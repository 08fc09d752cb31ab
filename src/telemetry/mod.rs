// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Tracing infrastructure.
//!
//! Initialize once at startup; `RUST_LOG` takes precedence over the
//! configured default level. Everything writes to stderr because stdout
//! carries the upstream MCP protocol.

pub mod init;

pub use init::{init_telemetry, TelemetryConfig};
