// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Authoritative tool view: registry, title sanitization, and the two
//! discovery renderings.

pub mod overview;
pub mod registry;
pub mod titles;

pub use overview::{example_usage, servers_overview, tools_overview};
pub use registry::{RegisteredServer, ServerRegistry};
pub use titles::{sanitize, unique_title};
