// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Upstream surface: JSON-RPC protocol, the four meta-tools, the stdio
//! transport, and startup orchestration.

pub mod dispatcher;
pub mod protocol;
pub mod startup;
pub mod stdio;

pub use dispatcher::MetaToolDispatcher;
pub use protocol::{JsonRpcRequest, JsonRpcResponse};
pub use startup::Orchestrator;
