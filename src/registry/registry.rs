// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Server registry: the authoritative in-memory view of what tools exist.
//!
//! The registry merges the live tool lists fetched through the connection
//! manager with the schemas the metadata store preserved from earlier runs.
//! Everything above it — formatter, vector index, sandbox, dispatcher —
//! reads tools from here and only from here.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::RwLock;

use crate::error::RegistryError;
use crate::mcp::{
    ClientHandle, ConnectionManager, DiscoveredTool, ToolCallResponse, ToolDescriptor,
};
use crate::store::{PersistedTool, ToolMetadataStore, WriteOutcome};

use super::titles::unique_title;

/// One registered server: identity, optional live client, and its tools.
#[derive(Clone)]
pub struct RegisteredServer {
    pub name: String,
    pub instructions: Option<String>,
    pub client: Option<ClientHandle>,
    pub tools: Vec<ToolDescriptor>,
}

impl RegisteredServer {
    /// True when a live client handle is attached.
    pub fn connected(&self) -> bool {
        self.client.is_some()
    }

    /// Look up a tool by its downstream-canonical name.
    pub fn tool_by_name(&self, name: &str) -> Option<&ToolDescriptor> {
        self.tools.iter().find(|t| t.name == name)
    }

    /// Look up a tool by its sanitized title.
    pub fn tool_by_title(&self, title: &str) -> Option<&ToolDescriptor> {
        self.tools.iter().find(|t| t.title == title)
    }
}

/// Authoritative projection of connection manager plus metadata store.
pub struct ServerRegistry {
    store: Arc<ToolMetadataStore>,
    servers: RwLock<HashMap<String, RegisteredServer>>,
}

impl ServerRegistry {
    /// Create an empty registry writing through the given store.
    pub fn new(store: Arc<ToolMetadataStore>) -> Self {
        Self {
            store,
            servers: RwLock::new(HashMap::new()),
        }
    }

    /// Handle to the backing store.
    pub fn store(&self) -> &Arc<ToolMetadataStore> {
        &self.store
    }

    /// Register one server from its live connection: fetch the tool list,
    /// compute titles, persist provenance, and inject preserved schemas
    /// where the live response lacks one.
    pub async fn register_server(
        &self,
        name: &str,
        manager: &ConnectionManager,
    ) -> Result<(), RegistryError> {
        if self.has_server(name).await {
            return Err(RegistryError::AlreadyRegistered(name.to_string()));
        }

        let handle = manager
            .get(name)
            .ok_or_else(|| RegistryError::MissingHandle(name.to_string()))?;

        let (discovered, instructions) = {
            let mut client = handle.write().await;
            let discovered = client.list_tools().await?;
            let instructions = client.instructions().map(String::from);
            (discovered, instructions)
        };

        self.register_discovered(name, instructions, Some(handle), discovered)
            .await
    }

    /// Register a server from an already-fetched tool list.
    ///
    /// This is the merge step proper; `register_server` is the thin live
    /// wrapper around it, and tests drive it directly in place of spawned
    /// subprocesses.
    pub async fn register_discovered(
        &self,
        name: &str,
        instructions: Option<String>,
        client: Option<ClientHandle>,
        discovered: Vec<DiscoveredTool>,
    ) -> Result<(), RegistryError> {
        if self.has_server(name).await {
            return Err(RegistryError::AlreadyRegistered(name.to_string()));
        }

        let mut taken = HashSet::new();
        let mut tools = Vec::with_capacity(discovered.len());

        for tool in discovered {
            let title = unique_title(&tool.name, &taken);
            taken.insert(title.clone());

            let persisted = self.store.get_tool(name, &tool.name)?;

            let (output_schema, original) = match (&tool.output_schema, &persisted) {
                // A schema straight from the server is authoritative.
                (Some(live), _) => (Some(live.clone()), true),
                // Live response lacks one: fall back to what survived.
                (None, Some(row)) if row.output_schema.is_some() => {
                    (row.output_schema.clone(), row.original_output_schema)
                }
                (None, _) => (None, false),
            };

            if tool.output_schema.is_some() {
                self.store.save_or_update(&PersistedTool::original(
                    name,
                    &tool.name,
                    output_schema.clone(),
                ))?;
            } else if persisted.is_none() {
                self.store
                    .save_or_update(&PersistedTool::inferred(name, &tool.name, None))?;
            }

            tools.push(ToolDescriptor {
                name: tool.name,
                title,
                description: tool.description,
                input_schema: tool.input_schema,
                output_schema,
                original_output_schema: original,
            });
        }

        tracing::info!(server = %name, tools = tools.len(), "server registered");

        let mut servers = self.servers.write().await;
        servers.insert(
            name.to_string(),
            RegisteredServer {
                name: name.to_string(),
                instructions,
                client,
                tools,
            },
        );

        Ok(())
    }

    /// Register every connected server concurrently. Per-server failures
    /// are logged and skipped; returns the number registered.
    pub async fn register_all(&self, manager: &ConnectionManager) -> usize {
        let names = manager.names();
        let outcomes = futures::future::join_all(names.into_iter().map(|name| async move {
            let outcome = self.register_server(&name, manager).await;
            (name, outcome)
        }))
        .await;

        let mut registered = 0;
        for (name, outcome) in outcomes {
            match outcome {
                Ok(()) => registered += 1,
                Err(e) => {
                    tracing::warn!(server = %name, error = %e, "failed to register server");
                }
            }
        }
        registered
    }

    /// Delete persisted rows for servers that are no longer registered.
    /// Returns the number of rows removed.
    pub async fn reconcile_orphans(&self) -> Result<u64, RegistryError> {
        let known: HashSet<String> = self.servers.read().await.keys().cloned().collect();

        let mut removed = 0;
        for server in self.store.list_all_servers()? {
            if !known.contains(&server) {
                let rows = self.store.delete_server_tools(&server)?;
                tracing::info!(server = %server, rows, "removed orphaned server metadata");
                removed += rows;
            }
        }
        Ok(removed)
    }

    /// Apply a schema inferred from an observed response, in the store and
    /// in memory. A tool whose schema came from the server is left alone.
    pub async fn record_observed_output(
        &self,
        server: &str,
        tool_name: &str,
        schema: Value,
    ) -> Result<WriteOutcome, RegistryError> {
        let outcome = self
            .store
            .save_or_update(&PersistedTool::inferred(server, tool_name, Some(schema.clone())))?;

        if outcome != WriteOutcome::Unchanged {
            let mut servers = self.servers.write().await;
            if let Some(registered) = servers.get_mut(server) {
                if let Some(tool) = registered
                    .tools
                    .iter_mut()
                    .find(|t| t.name == tool_name && !t.original_output_schema)
                {
                    tool.output_schema = Some(schema);
                }
            }
        }

        Ok(outcome)
    }

    /// Route a tool call to the server's live client.
    pub async fn call_tool(
        &self,
        server: &str,
        tool_name: &str,
        arguments: Value,
    ) -> Result<ToolCallResponse, RegistryError> {
        let (handle, exists) = {
            let servers = self.servers.read().await;
            let registered = servers
                .get(server)
                .ok_or_else(|| RegistryError::ServerNotFound(server.to_string()))?;
            (
                registered.client.clone(),
                registered.tool_by_name(tool_name).is_some(),
            )
        };

        if !exists {
            return Err(RegistryError::ToolNotFound {
                server: server.to_string(),
                tool: tool_name.to_string(),
            });
        }

        let handle = handle.ok_or_else(|| RegistryError::MissingHandle(server.to_string()))?;
        let mut client = handle.write().await;
        Ok(client.call_tool(tool_name, arguments).await?)
    }

    /// Get one server's registration (cloned snapshot).
    pub async fn get_server(&self, name: &str) -> Option<RegisteredServer> {
        self.servers.read().await.get(name).cloned()
    }

    /// Get one tool by server and downstream-canonical tool name.
    pub async fn get_tool(&self, server: &str, tool_name: &str) -> Option<ToolDescriptor> {
        self.servers
            .read()
            .await
            .get(server)?
            .tool_by_name(tool_name)
            .cloned()
    }

    /// All registered servers, sorted by name (cloned snapshot).
    pub async fn all_servers(&self) -> Vec<RegisteredServer> {
        let servers = self.servers.read().await;
        let mut all: Vec<RegisteredServer> = servers.values().cloned().collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        all
    }

    /// Number of registered servers.
    pub async fn server_count(&self) -> usize {
        self.servers.read().await.len()
    }

    /// Total number of tools across all servers.
    pub async fn total_tool_count(&self) -> usize {
        self.servers.read().await.values().map(|s| s.tools.len()).sum()
    }

    /// Check whether a server is registered.
    pub async fn has_server(&self, name: &str) -> bool {
        self.servers.read().await.contains_key(name)
    }

    /// Drop every registration.
    pub async fn clear(&self) {
        self.servers.write().await.clear();
    }
}
