// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Persistent tool metadata.

pub mod metadata;

pub use metadata::{PersistedTool, StoreStats, ToolMetadataStore, WriteOutcome};
