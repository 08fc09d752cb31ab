// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Script execution.
//!
//! The host side of the sandbox: spawns the generated runner in a `node`
//! child process, feeds it the script and a frozen snapshot of the server
//! map, serves its tool-call frames against the registry's live clients,
//! and drains the captured outputs into schema inference afterwards —
//! whether the script succeeded or failed.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;

use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;

use crate::error::SandboxError;
use crate::registry::{RegisteredServer, ServerRegistry};

use super::materialize::{self, RUNNER_FILE, SANDBOX_DIR};
use super::schema;

/// Environment variable overriding the node executable.
const NODE_ENV_VAR: &str = "MCP_OF_MCPS_NODE";

/// One captured tool output, in observation order within its server bucket.
#[derive(Debug, Clone)]
pub struct CapturedOutput {
    pub tool_name: String,
    pub raw_response: Value,
}

/// The composition sandbox: stub tree plus script runtime.
pub struct Sandbox {
    root: PathBuf,
    node_command: String,
    registry: Arc<ServerRegistry>,
}

impl Sandbox {
    /// Create a sandbox rooted at `.sandbox/` under the working directory.
    pub fn new(working_dir: impl AsRef<Path>, registry: Arc<ServerRegistry>) -> Self {
        Self {
            root: working_dir.as_ref().join(SANDBOX_DIR),
            node_command: std::env::var(NODE_ENV_VAR).unwrap_or_else(|_| "node".to_string()),
            registry,
        }
    }

    /// Sandbox root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Wipe and regenerate the stub tree from the registry's current view.
    pub async fn materialize(&self) -> Result<usize, SandboxError> {
        let servers = self.registry.all_servers().await;
        materialize::materialize(&self.root, &servers)
    }

    /// Run a user script and return its exported value.
    ///
    /// The output-cache drain runs on success and on failure alike; a script
    /// failure surfaces as [`SandboxError::ScriptFailed`] with the
    /// underlying message.
    pub async fn run_script(&self, code: &str) -> Result<Value, SandboxError> {
        let servers = self.registry.all_servers().await;
        let snapshot = servers_snapshot(&servers);

        let outcome = self.run_in_runner(code, snapshot).await;

        let (result, outputs) = match outcome {
            Ok(RunnerOutcome { value, outputs }) => (Ok(value), outputs),
            Err((err, outputs)) => (Err(err), outputs),
        };

        self.drain_outputs(&outputs).await;

        result
    }

    async fn run_in_runner(
        &self,
        code: &str,
        snapshot: Value,
    ) -> Result<RunnerOutcome, (SandboxError, HashMap<String, Vec<CapturedOutput>>)> {
        let runner = self.root.join(RUNNER_FILE);

        let mut child = Command::new(&self.node_command)
            .arg(&runner)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                (
                    SandboxError::RunnerSpawnFailed(format!(
                        "{} {}: {}",
                        self.node_command,
                        runner.display(),
                        e
                    )),
                    HashMap::new(),
                )
            })?;

        let Some(mut stdin) = child.stdin.take() else {
            return Err((
                SandboxError::RunnerSpawnFailed("failed to capture runner stdin".to_string()),
                HashMap::new(),
            ));
        };
        let Some(stdout) = child.stdout.take() else {
            return Err((
                SandboxError::RunnerSpawnFailed("failed to capture runner stdout".to_string()),
                HashMap::new(),
            ));
        };
        let mut lines = BufReader::new(stdout).lines();

        // Partially-captured outputs, used when the child dies without a
        // terminal frame.
        let mut served: HashMap<String, Vec<CapturedOutput>> = HashMap::new();

        let run_frame = json!({
            "type": "run",
            "code": code,
            "serversInfo": snapshot,
        });
        let sent = async {
            stdin
                .write_all(serde_json::to_string(&run_frame).map_err(|e| SandboxError::Protocol(e.to_string()))?.as_bytes())
                .await?;
            stdin.write_all(b"\n").await?;
            stdin.flush().await?;
            Ok::<(), SandboxError>(())
        }
        .await;
        if let Err(e) = sent {
            return Err((e, served));
        }

        loop {
            let line = match lines.next_line().await {
                Ok(Some(line)) => line,
                Ok(None) => {
                    let _ = child.wait().await;
                    return Err((
                        SandboxError::Protocol("runner exited without a result".to_string()),
                        served,
                    ));
                }
                Err(e) => {
                    let _ = child.wait().await;
                    return Err((SandboxError::Io(e.to_string()), served));
                }
            };

            let frame: Value = match serde_json::from_str(line.trim()) {
                Ok(frame) => frame,
                Err(e) => {
                    let _ = child.wait().await;
                    return Err((
                        SandboxError::Protocol(format!("unparseable runner frame: {}", e)),
                        served,
                    ));
                }
            };

            match frame.get("type").and_then(Value::as_str) {
                Some("call") => {
                    if let Err(e) = self.serve_call(&frame, &mut stdin, &mut served).await {
                        let _ = child.wait().await;
                        return Err((e, served));
                    }
                }
                Some("log") => {
                    let text = frame.get("text").and_then(Value::as_str).unwrap_or("");
                    match frame.get("level").and_then(Value::as_str) {
                        Some("warn") => tracing::warn!(target: "sandbox", "{}", text),
                        Some("error") => tracing::error!(target: "sandbox", "{}", text),
                        _ => tracing::info!(target: "sandbox", "{}", text),
                    }
                }
                Some("done") => {
                    let value = frame.get("value").cloned().unwrap_or(Value::Null);
                    let outputs = parse_tool_outputs(frame.get("toolOutputs"));
                    let _ = child.wait().await;
                    return Ok(RunnerOutcome { value, outputs });
                }
                Some("error") => {
                    let message = frame
                        .get("message")
                        .and_then(Value::as_str)
                        .unwrap_or("unknown script error")
                        .to_string();
                    let outputs = parse_tool_outputs(frame.get("toolOutputs"));
                    let _ = child.wait().await;
                    return Err((SandboxError::ScriptFailed(message), outputs));
                }
                other => {
                    let _ = child.wait().await;
                    return Err((
                        SandboxError::Protocol(format!("unexpected frame type {:?}", other)),
                        served,
                    ));
                }
            }
        }
    }

    async fn serve_call(
        &self,
        frame: &Value,
        stdin: &mut tokio::process::ChildStdin,
        served: &mut HashMap<String, Vec<CapturedOutput>>,
    ) -> Result<(), SandboxError> {
        let id = frame
            .get("id")
            .and_then(Value::as_u64)
            .ok_or_else(|| SandboxError::Protocol("call frame without id".to_string()))?;
        let server = frame
            .get("server")
            .and_then(Value::as_str)
            .ok_or_else(|| SandboxError::Protocol("call frame without server".to_string()))?;
        let tool = frame
            .get("tool")
            .and_then(Value::as_str)
            .ok_or_else(|| SandboxError::Protocol("call frame without tool".to_string()))?;
        let arguments = frame.get("arguments").cloned().unwrap_or(json!({}));

        let reply = match self.registry.call_tool(server, tool, arguments).await {
            Ok(response) => {
                served.entry(server.to_string()).or_default().push(CapturedOutput {
                    tool_name: tool.to_string(),
                    raw_response: response.raw.clone(),
                });
                json!({ "type": "result", "id": id, "response": response.raw })
            }
            Err(e) => {
                tracing::warn!(server = %server, tool = %tool, error = %e, "sandbox tool call failed");
                json!({ "type": "error", "id": id, "message": e.to_string() })
            }
        };

        stdin
            .write_all(
                serde_json::to_string(&reply)
                    .map_err(|e| SandboxError::Protocol(e.to_string()))?
                    .as_bytes(),
            )
            .await?;
        stdin.write_all(b"\n").await?;
        stdin.flush().await?;
        Ok(())
    }

    /// Push every captured output through schema inference and into the
    /// registry, then let the per-run cache go.
    async fn drain_outputs(&self, outputs: &HashMap<String, Vec<CapturedOutput>>) {
        for (server, entries) in outputs {
            for entry in entries {
                let Some(value) = schema::response_value(&entry.raw_response) else {
                    continue;
                };
                let inferred = schema::infer_schema(&value);
                if let Err(e) = self
                    .registry
                    .record_observed_output(server, &entry.tool_name, inferred)
                    .await
                {
                    tracing::warn!(
                        server = %server,
                        tool = %entry.tool_name,
                        error = %e,
                        "failed to record observed output"
                    );
                }
            }
        }
    }
}

struct RunnerOutcome {
    value: Value,
    outputs: HashMap<String, Vec<CapturedOutput>>,
}

/// Build the read-only server map handed to scripts.
fn servers_snapshot(servers: &[RegisteredServer]) -> Value {
    let mut map = serde_json::Map::new();
    for server in servers {
        map.insert(
            server.name.clone(),
            json!({
                "connected": server.connected(),
                "tools": server
                    .tools
                    .iter()
                    .map(|t| {
                        json!({
                            "name": t.name,
                            "title": t.title,
                            "description": t.description.as_deref().unwrap_or(""),
                        })
                    })
                    .collect::<Vec<_>>(),
            }),
        );
    }
    Value::Object(map)
}

/// Parse the `toolOutputs` mapping from a terminal runner frame.
fn parse_tool_outputs(value: Option<&Value>) -> HashMap<String, Vec<CapturedOutput>> {
    let mut outputs = HashMap::new();

    let Some(Value::Object(map)) = value else {
        return outputs;
    };

    for (server, entries) in map {
        let Some(entries) = entries.as_array() else {
            continue;
        };
        let bucket: Vec<CapturedOutput> = entries
            .iter()
            .filter_map(|entry| {
                Some(CapturedOutput {
                    tool_name: entry.get("toolName")?.as_str()?.to_string(),
                    raw_response: entry.get("rawResponse")?.clone(),
                })
            })
            .collect();
        outputs.insert(server.clone(), bucket);
    }

    outputs
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::ToolMetadataStore;
    use tempfile::tempdir;

    #[test]
    fn test_parse_tool_outputs() {
        let frame = json!({
            "weather": [
                { "toolName": "get_forecast", "rawResponse": { "content": [] } },
                { "toolName": "get_forecast", "rawResponse": { "isError": true } }
            ],
            "empty": []
        });

        let outputs = parse_tool_outputs(Some(&frame));
        assert_eq!(outputs["weather"].len(), 2);
        assert_eq!(outputs["weather"][0].tool_name, "get_forecast");
        assert!(outputs["empty"].is_empty());
    }

    #[test]
    fn test_parse_tool_outputs_missing() {
        assert!(parse_tool_outputs(None).is_empty());
        assert!(parse_tool_outputs(Some(&json!("bogus"))).is_empty());
    }

    #[tokio::test]
    async fn test_servers_snapshot_shape() {
        let temp = tempdir().unwrap();
        let store = Arc::new(ToolMetadataStore::open(temp.path()).unwrap());
        let registry = Arc::new(ServerRegistry::new(store));

        registry
            .register_discovered(
                "weather",
                None,
                None,
                vec![crate::mcp::DiscoveredTool {
                    name: "get_forecast".to_string(),
                    description: Some("weather predictions".to_string()),
                    input_schema: json!({}),
                    output_schema: None,
                }],
            )
            .await
            .unwrap();

        let servers = registry.all_servers().await;
        let snapshot = servers_snapshot(&servers);

        assert_eq!(snapshot["weather"]["connected"], json!(false));
        assert_eq!(snapshot["weather"]["tools"][0]["name"], "get_forecast");
        assert_eq!(
            snapshot["weather"]["tools"][0]["description"],
            "weather predictions"
        );
    }

    #[tokio::test]
    async fn test_materialize_through_sandbox() {
        let temp = tempdir().unwrap();
        let store = Arc::new(ToolMetadataStore::open(temp.path()).unwrap());
        let registry = Arc::new(ServerRegistry::new(store));

        registry
            .register_discovered(
                "weather",
                None,
                None,
                vec![crate::mcp::DiscoveredTool {
                    name: "get_forecast".to_string(),
                    description: None,
                    input_schema: json!({}),
                    output_schema: None,
                }],
            )
            .await
            .unwrap();

        let sandbox = Sandbox::new(temp.path(), registry);
        let written = sandbox.materialize().await.unwrap();

        assert_eq!(written, 1);
        assert!(sandbox.root().join(RUNNER_FILE).exists());
        assert!(sandbox.root().join("weather").join("get_forecast.cjs").exists());
    }

    #[tokio::test]
    async fn test_run_script_with_missing_runner_fails() {
        let temp = tempdir().unwrap();
        let store = Arc::new(ToolMetadataStore::open(temp.path()).unwrap());
        let registry = Arc::new(ServerRegistry::new(store));

        let sandbox = Sandbox::new(temp.path(), registry);
        // No materialize: either node is absent (spawn fails) or the runner
        // file is missing (node exits without a result frame).
        let result = sandbox.run_script("module.exports = 1;").await;
        assert!(result.is_err());
    }
}
