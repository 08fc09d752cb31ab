// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Startup orchestration.
//!
//! Sequencing with barriers:
//!
//! ```text
//! open store → spawn all downstream servers
//!            → register all (writes store)
//!            → reconcile orphans (deletes from store)
//!            → rebuild vector index
//!            → materialize sandbox
//!            → bind upstream stdio transport
//! ```
//!
//! A single subprocess failing to spawn is non-fatal; a failure to open the
//! store, rebuild the index, materialize the sandbox, or bind the transport
//! aborts startup.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;

use crate::config::ServerDescriptor;
use crate::error::Result;
use crate::mcp::ConnectionManager;
use crate::registry::ServerRegistry;
use crate::sandbox::Sandbox;
use crate::search::{HashedEmbeddingProvider, VectorIndex, VectorRecord};
use crate::store::ToolMetadataStore;

use super::dispatcher::MetaToolDispatcher;
use super::stdio;

/// Composes the downstream, persistence, search, and sandbox layers and
/// runs the upstream transport to completion.
pub struct Orchestrator {
    working_dir: PathBuf,
    descriptors: Vec<ServerDescriptor>,
}

impl Orchestrator {
    /// Create an orchestrator for the given descriptors, rooted at the
    /// working directory all state paths are relative to.
    pub fn new(working_dir: impl AsRef<Path>, descriptors: Vec<ServerDescriptor>) -> Self {
        Self {
            working_dir: working_dir.as_ref().to_path_buf(),
            descriptors,
        }
    }

    /// Run startup and serve until the upstream client disconnects.
    pub async fn run(self) -> Result<()> {
        let store = Arc::new(
            ToolMetadataStore::open(&self.working_dir).context("failed to open metadata store")?,
        );
        match store.stats() {
            Ok(stats) => tracing::info!(
                tool_rows = stats.tool_rows,
                servers = stats.servers,
                "metadata store opened"
            ),
            Err(e) => tracing::warn!(error = %e, "failed to read store stats"),
        }

        let mut manager = ConnectionManager::new();
        let total = self.descriptors.len();
        let connected = manager.spawn_all(self.descriptors).await;
        tracing::info!(connected, total, "downstream servers spawned");

        let registry = Arc::new(ServerRegistry::new(store));
        let registered = registry.register_all(&manager).await;
        tracing::info!(
            registered,
            tools = registry.total_tool_count().await,
            "servers registered"
        );

        match registry.reconcile_orphans().await {
            Ok(removed) if removed > 0 => {
                tracing::info!(rows = removed, "orphaned metadata reconciled");
            }
            Ok(_) => {}
            Err(e) => tracing::error!(error = %e, "orphan reconciliation failed"),
        }

        let provider = Arc::new(HashedEmbeddingProvider::new());
        let index = Arc::new(
            VectorIndex::open(&self.working_dir, provider).context("failed to open vector index")?,
        );
        index
            .rebuild(&index_records(&registry).await)
            .await
            .context("failed to rebuild vector index")?;

        let sandbox = Arc::new(Sandbox::new(&self.working_dir, registry.clone()));
        sandbox
            .materialize()
            .await
            .context("failed to materialize sandbox")?;

        let dispatcher = MetaToolDispatcher::new(registry, index, sandbox);

        tracing::info!("upstream transport bound");
        let served = stdio::serve(&dispatcher).await;

        manager.shutdown().await;
        served.context("upstream transport failed")
    }
}

/// Build the index records from the registry's current view. Tools with no
/// description are embedded by their wire name so they stay findable.
async fn index_records(registry: &ServerRegistry) -> Vec<VectorRecord> {
    let mut records = Vec::new();
    for server in registry.all_servers().await {
        for tool in &server.tools {
            let description = tool.description.as_deref().unwrap_or(&tool.name);
            records.push(VectorRecord::new(&server.name, &tool.name, description));
        }
    }
    records
}
