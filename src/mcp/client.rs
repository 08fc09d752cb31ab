// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Downstream MCP client and connection manager.
//!
//! Each downstream server is a child process speaking line-delimited
//! JSON-RPC 2.0 over its stdio. [`McpClient`] owns one such process and the
//! three protocol operations the meta-server needs (`initialize`,
//! `tools/list`, `tools/call`); [`ConnectionManager`] owns the name-to-client
//! map and the concurrent startup spawn.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::RwLock;

use crate::config::ServerDescriptor;

use super::error::McpError;
use super::types::{ConnectionState, DiscoveredTool, DownstreamInfo, ToolCallResponse};

/// MCP protocol version requested during the handshake.
const PROTOCOL_VERSION: &str = "2024-11-05";

/// Client for a single downstream MCP server.
pub struct McpClient {
    /// Server name (the descriptor's namespace key).
    name: String,

    /// Launch description.
    descriptor: ServerDescriptor,

    /// Connection state.
    state: ConnectionState,

    /// Child process handle.
    process: Option<Child>,

    /// Child stdin, taken at spawn.
    stdin: Option<ChildStdin>,

    /// Buffered child stdout, taken at spawn.
    stdout: Option<BufReader<ChildStdout>>,

    /// Identity captured during the handshake.
    info: Option<DownstreamInfo>,

    /// Request ID counter.
    request_id: u64,
}

impl McpClient {
    /// Create a new client for a descriptor. Does not spawn anything.
    pub fn new(descriptor: ServerDescriptor) -> Self {
        Self {
            name: descriptor.name.clone(),
            descriptor,
            state: ConnectionState::Disconnected,
            process: None,
            stdin: None,
            stdout: None,
            info: None,
            request_id: 0,
        }
    }

    /// Get the server name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the connection state.
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Check if the client is ready for protocol calls.
    pub fn is_ready(&self) -> bool {
        self.state == ConnectionState::Ready
    }

    /// Identity captured during the handshake, if connected.
    pub fn info(&self) -> Option<&DownstreamInfo> {
        self.info.as_ref()
    }

    /// Server-supplied usage instructions, if any.
    pub fn instructions(&self) -> Option<&str> {
        self.info.as_ref().and_then(|i| i.instructions.as_deref())
    }

    fn next_request_id(&mut self) -> u64 {
        self.request_id += 1;
        self.request_id
    }

    /// Spawn the child process and perform the MCP handshake.
    pub async fn connect(&mut self) -> Result<(), McpError> {
        if self.state == ConnectionState::Ready {
            return Ok(());
        }

        self.state = ConnectionState::Connecting;

        match self.connect_inner().await {
            Ok(()) => {
                self.state = ConnectionState::Ready;
                Ok(())
            }
            Err(e) => {
                self.state = ConnectionState::Failed;
                // A failed connection leaves no half-open child behind.
                if let Some(mut process) = self.process.take() {
                    let _ = process.start_kill();
                }
                self.stdin = None;
                self.stdout = None;
                Err(e)
            }
        }
    }

    async fn connect_inner(&mut self) -> Result<(), McpError> {
        let mut cmd = Command::new(&self.descriptor.command);
        cmd.args(&self.descriptor.argv);

        for (key, value) in &self.descriptor.env {
            cmd.env(key, value);
        }

        if let Some(cwd) = &self.descriptor.cwd {
            cmd.current_dir(cwd);
        }

        cmd.stdin(Stdio::piped());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::null());
        cmd.kill_on_drop(true);

        let mut child = cmd
            .spawn()
            .map_err(|e| McpError::spawn_failed(&self.name, e.to_string()))?;

        self.stdin = Some(child.stdin.take().ok_or_else(|| {
            McpError::spawn_failed(&self.name, "failed to capture child stdin")
        })?);
        self.stdout = Some(BufReader::new(child.stdout.take().ok_or_else(|| {
            McpError::spawn_failed(&self.name, "failed to capture child stdout")
        })?));
        self.process = Some(child);

        let timeout = Duration::from_secs(self.descriptor.startup_timeout_sec);
        let info = tokio::time::timeout(timeout, self.initialize())
            .await
            .map_err(|_| McpError::ConnectionTimeout {
                server: self.name.clone(),
                timeout_secs: self.descriptor.startup_timeout_sec,
            })??;

        self.info = Some(info);
        Ok(())
    }

    /// Send `initialize`, parse the identity, and confirm with
    /// `notifications/initialized`.
    async fn initialize(&mut self) -> Result<DownstreamInfo, McpError> {
        let params = serde_json::json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": { "tools": {} },
            "clientInfo": {
                "name": "mcp-of-mcps",
                "version": crate::VERSION
            }
        });

        let result = self
            .send_request("initialize", Some(params))
            .await
            .map_err(|e| McpError::handshake_failed(&self.name, e.to_string()))?;

        let info = DownstreamInfo {
            name: result
                .pointer("/serverInfo/name")
                .and_then(Value::as_str)
                .unwrap_or("unknown")
                .to_string(),
            version: result
                .pointer("/serverInfo/version")
                .and_then(Value::as_str)
                .unwrap_or("0.0.0")
                .to_string(),
            protocol_version: result
                .get("protocolVersion")
                .and_then(Value::as_str)
                .map(String::from),
            instructions: result
                .get("instructions")
                .and_then(Value::as_str)
                .map(String::from),
        };

        self.send_notification("notifications/initialized").await?;

        Ok(info)
    }

    /// Fetch the downstream tool list.
    pub async fn list_tools(&mut self) -> Result<Vec<DiscoveredTool>, McpError> {
        let result = self.send_request("tools/list", None).await?;

        let tools = result
            .get("tools")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        Ok(tools
            .into_iter()
            .filter_map(|t| {
                let name = t.get("name")?.as_str()?.to_string();
                Some(DiscoveredTool {
                    name,
                    description: t
                        .get("description")
                        .and_then(Value::as_str)
                        .map(String::from),
                    input_schema: t
                        .get("inputSchema")
                        .cloned()
                        .unwrap_or_else(|| serde_json::json!({})),
                    output_schema: t.get("outputSchema").cloned(),
                })
            })
            .collect())
    }

    /// Call a tool by its downstream-canonical name.
    ///
    /// A JSON-RPC level error from the server is folded into an error-shaped
    /// response rather than a transport failure, so scripts see it in-band.
    pub async fn call_tool(
        &mut self,
        tool_name: &str,
        arguments: Value,
    ) -> Result<ToolCallResponse, McpError> {
        let timeout_secs = self.descriptor.tool_timeout_sec;
        let timeout = Duration::from_secs(timeout_secs);

        let params = serde_json::json!({
            "name": tool_name,
            "arguments": arguments
        });

        let outcome = tokio::time::timeout(timeout, self.send_request("tools/call", Some(params)))
            .await
            .map_err(|_| McpError::ToolCallTimeout {
                tool: tool_name.to_string(),
                timeout_secs,
            })?;

        match outcome {
            Ok(result) => Ok(ToolCallResponse::new(result)),
            Err(McpError::Protocol { message, .. }) => Ok(ToolCallResponse::error(message)),
            Err(e) => Err(e),
        }
    }

    /// Send a request and wait for the response with the matching id.
    ///
    /// Lines carrying notifications or other ids are skipped.
    async fn send_request(
        &mut self,
        method: &str,
        params: Option<Value>,
    ) -> Result<Value, McpError> {
        let id = self.next_request_id();
        let mut request = serde_json::json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method
        });
        if let Some(params) = params {
            request["params"] = params;
        }

        let name = self.name.clone();
        let payload = serde_json::to_string(&request)?;

        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| McpError::NotReady(name.clone()))?;
        stdin.write_all(payload.as_bytes()).await?;
        stdin.write_all(b"\n").await?;
        stdin.flush().await?;

        let stdout = self
            .stdout
            .as_mut()
            .ok_or_else(|| McpError::NotReady(name.clone()))?;

        loop {
            let mut line = String::new();
            let read = stdout.read_line(&mut line).await?;
            if read == 0 {
                return Err(McpError::InvalidResponse(format!(
                    "server '{}' closed its stdout",
                    name
                )));
            }

            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }

            let response: Value = serde_json::from_str(trimmed)
                .map_err(|e| McpError::InvalidResponse(e.to_string()))?;

            if response.get("id").and_then(Value::as_u64) != Some(id) {
                continue;
            }

            if let Some(error) = response.get("error") {
                let code = error.get("code").and_then(Value::as_i64).unwrap_or(-1);
                let message = error
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("Unknown error");
                return Err(McpError::protocol(code, message));
            }

            return response.get("result").cloned().ok_or_else(|| {
                McpError::InvalidResponse(format!("missing result in '{}' response", method))
            });
        }
    }

    async fn send_notification(&mut self, method: &str) -> Result<(), McpError> {
        let notification = serde_json::json!({
            "jsonrpc": "2.0",
            "method": method
        });

        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| McpError::NotReady(self.name.clone()))?;

        let payload = serde_json::to_string(&notification)?;
        stdin.write_all(payload.as_bytes()).await?;
        stdin.write_all(b"\n").await?;
        stdin.flush().await?;

        Ok(())
    }

    /// Terminate the child process.
    pub async fn disconnect(&mut self) {
        self.state = ConnectionState::Closing;

        self.stdin = None;
        self.stdout = None;
        if let Some(mut process) = self.process.take() {
            let _ = process.kill().await;
        }

        self.state = ConnectionState::Disconnected;
    }
}

/// Shared handle to a downstream client.
pub type ClientHandle = Arc<RwLock<McpClient>>;

/// Manager for all downstream server connections.
pub struct ConnectionManager {
    clients: HashMap<String, ClientHandle>,
}

impl Default for ConnectionManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionManager {
    /// Create an empty connection manager.
    pub fn new() -> Self {
        Self {
            clients: HashMap::new(),
        }
    }

    /// Spawn and register one server. Fails if the name is taken or the
    /// connection cannot be established; a failed spawn leaves no entry.
    pub async fn spawn(&mut self, descriptor: ServerDescriptor) -> Result<(), McpError> {
        let name = descriptor.name.clone();
        if self.clients.contains_key(&name) {
            return Err(McpError::AlreadyConnected(name));
        }

        let mut client = McpClient::new(descriptor);
        client.connect().await?;

        self.clients.insert(name, Arc::new(RwLock::new(client)));
        Ok(())
    }

    /// Spawn all descriptors concurrently. Per-server failures are logged
    /// and skipped; returns the number of servers that connected.
    pub async fn spawn_all(&mut self, descriptors: Vec<ServerDescriptor>) -> usize {
        let mut handles = Vec::new();

        for descriptor in descriptors {
            let name = descriptor.name.clone();
            if self.clients.contains_key(&name) {
                tracing::warn!(server = %name, "duplicate server name, skipping spawn");
                continue;
            }

            handles.push(tokio::spawn(async move {
                let mut client = McpClient::new(descriptor);
                match client.connect().await {
                    Ok(()) => Some((name, client)),
                    Err(e) => {
                        tracing::warn!(server = %name, error = %e, "failed to connect downstream server");
                        None
                    }
                }
            }));
        }

        let mut connected = 0;
        for handle in handles {
            if let Ok(Some((name, client))) = handle.await {
                tracing::info!(server = %name, "downstream server connected");
                self.clients.insert(name, Arc::new(RwLock::new(client)));
                connected += 1;
            }
        }

        connected
    }

    /// Look up a client handle by server name.
    pub fn get(&self, name: &str) -> Option<ClientHandle> {
        self.clients.get(name).cloned()
    }

    /// All registered handles, keyed by server name.
    pub fn all(&self) -> &HashMap<String, ClientHandle> {
        &self.clients
    }

    /// Registered server names.
    pub fn names(&self) -> Vec<String> {
        self.clients.keys().cloned().collect()
    }

    /// Number of live connections.
    pub fn len(&self) -> usize {
        self.clients.len()
    }

    /// True when no server is connected.
    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    /// Terminate all children.
    pub async fn shutdown(&mut self) {
        for (name, client) in self.clients.drain() {
            let mut guard = client.write().await;
            guard.disconnect().await;
            tracing::debug!(server = %name, "downstream server stopped");
        }
    }
}
