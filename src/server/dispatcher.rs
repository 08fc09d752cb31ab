// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Meta-tool dispatcher.
//!
//! Exactly four meta-tools are exposed upstream. Arguments are shape-checked
//! here; every failure — bad arguments, unknown names, downstream trouble,
//! script errors — is converted into the MCP error envelope rather than
//! thrown across the transport.

use std::sync::Arc;

use serde_json::{json, Value};

use crate::registry::{self, ServerRegistry};
use crate::sandbox::Sandbox;
use crate::search::VectorIndex;

use super::protocol::{error_result, text_result};

/// Default result count for semantic search.
const DEFAULT_SEARCH_LIMIT: u64 = 5;

/// Routes the four meta-tool calls to registry, formatter, index, and
/// sandbox.
pub struct MetaToolDispatcher {
    registry: Arc<ServerRegistry>,
    index: Arc<VectorIndex>,
    sandbox: Arc<Sandbox>,
}

impl MetaToolDispatcher {
    /// Create a dispatcher over the live collaborators.
    pub fn new(
        registry: Arc<ServerRegistry>,
        index: Arc<VectorIndex>,
        sandbox: Arc<Sandbox>,
    ) -> Self {
        Self {
            registry,
            index,
            sandbox,
        }
    }

    /// The meta-tool definitions advertised in `tools/list`.
    pub fn meta_tools() -> Vec<Value> {
        vec![
            json!({
                "name": "semantic_search_tools",
                "description": "Semantically search the tools of all downstream MCP servers by natural-language query.",
                "inputSchema": {
                    "type": "object",
                    "properties": {
                        "query": { "type": "string", "description": "Natural-language description of the capability you need" },
                        "limit": { "type": "number", "description": "Maximum number of results (default 5)" }
                    },
                    "required": ["query"]
                }
            }),
            json!({
                "name": "get_mcps_servers_overview",
                "description": "Get a plain-text overview of every downstream server and its tool paths.",
                "inputSchema": { "type": "object", "properties": {} }
            }),
            json!({
                "name": "get_tools_overview",
                "description": "Get full schemas and example usage for specific tools, addressed by server/title paths.",
                "inputSchema": {
                    "type": "object",
                    "properties": {
                        "toolPaths": {
                            "type": "array",
                            "items": { "type": "string" },
                            "description": "Tool paths of the form server/title"
                        }
                    },
                    "required": ["toolPaths"]
                }
            }),
            json!({
                "name": "run_functions_code",
                "description": "Run a CommonJS script that composes downstream tools via require('./server/title.cjs') stubs and exports its result.",
                "inputSchema": {
                    "type": "object",
                    "properties": {
                        "code": { "type": "string", "description": "CommonJS source assigning its result to module.exports" }
                    },
                    "required": ["code"]
                }
            }),
        ]
    }

    /// Dispatch one `tools/call`. Always returns a content envelope.
    pub async fn handle_tool_call(&self, name: &str, arguments: &Value) -> Value {
        match name {
            "semantic_search_tools" => self.semantic_search(arguments).await,
            "get_mcps_servers_overview" => self.servers_overview().await,
            "get_tools_overview" => self.tools_overview(arguments).await,
            "run_functions_code" => self.run_functions_code(arguments).await,
            other => error_result(format!("Tool '{}' not found", other)),
        }
    }

    async fn semantic_search(&self, arguments: &Value) -> Value {
        let query = match arguments.get("query").and_then(Value::as_str) {
            Some(q) => q,
            None => return error_result("Error: 'query' must be a string"),
        };

        let limit = match arguments.get("limit") {
            None | Some(Value::Null) => DEFAULT_SEARCH_LIMIT,
            Some(value) => match value.as_u64() {
                Some(n) => n,
                None => return error_result("Error: 'limit' must be a non-negative integer"),
            },
        };

        let results = match self.index.search(query, limit as usize).await {
            Ok(results) => results,
            Err(e) => return error_result(format!("Error: {}", e)),
        };

        let mut entries = Vec::with_capacity(results.len());
        for hit in results {
            // The index stores wire names; paths are built from titles.
            let title = self
                .registry
                .get_tool(&hit.server_name, &hit.tool_name)
                .await
                .map(|t| t.title)
                .unwrap_or_else(|| registry::sanitize(&hit.tool_name));

            entries.push(json!({
                "serverName": hit.server_name,
                "toolName": hit.tool_name,
                "description": hit.description,
                "similarityScore": format!("{:.3}", hit.score),
                "fullPath": format!("{}/{}", hit.server_name, title),
            }));
        }

        match serde_json::to_string(&entries) {
            Ok(text) => text_result(text),
            Err(e) => error_result(format!("Error: {}", e)),
        }
    }

    async fn servers_overview(&self) -> Value {
        let servers = self.registry.all_servers().await;
        text_result(registry::servers_overview(&servers))
    }

    async fn tools_overview(&self, arguments: &Value) -> Value {
        let paths = match arguments.get("toolPaths").and_then(Value::as_array) {
            Some(array) => {
                let mut paths = Vec::with_capacity(array.len());
                for item in array {
                    match item.as_str() {
                        Some(path) => paths.push(path.to_string()),
                        None => {
                            return error_result("Error: 'toolPaths' must be an array of strings")
                        }
                    }
                }
                paths
            }
            None => return error_result("Error: 'toolPaths' must be an array of strings"),
        };

        let servers = self.registry.all_servers().await;
        match registry::tools_overview(&servers, &paths) {
            Ok(entries) => match serde_json::to_string(&entries) {
                Ok(text) => text_result(text),
                Err(e) => error_result(format!("Error: {}", e)),
            },
            Err(e) => error_result(format!("Error: {}", e)),
        }
    }

    async fn run_functions_code(&self, arguments: &Value) -> Value {
        let code = match arguments.get("code").and_then(Value::as_str) {
            Some(code) => code,
            None => return error_result("Error: 'code' must be a string"),
        };

        match self.sandbox.run_script(code).await {
            Ok(value) => match serde_json::to_string(&value) {
                Ok(text) => text_result(text),
                Err(e) => error_result(format!("Error: {}", e)),
            },
            Err(e) => error_result(format!("Error: {}", e)),
        }
    }
}
