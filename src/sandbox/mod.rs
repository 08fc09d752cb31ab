// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Scripted composition sandbox.
//!
//! Scripts compose downstream tools without their intermediate results ever
//! passing through the upstream client. The surface a script sees is small:
//! `require` of tool stubs under the sandbox root, `require` of the two
//! mock names `serversInfo` (frozen) and `toolOutputCache` (mutable), and a
//! single exported value — awaited when it is a promise.
//!
//! Execution happens in a `node` child process speaking line-framed JSON
//! back to the host; tool calls route through the registry's live clients,
//! and captured outputs feed schema inference after every run.

pub mod materialize;
pub mod runtime;
pub mod schema;

pub use materialize::{stub_path, RUNNER_FILE, SANDBOX_DIR};
pub use runtime::{CapturedOutput, Sandbox};
pub use schema::{infer_schema, response_value};
