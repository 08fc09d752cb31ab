// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Upstream stdio transport.
//!
//! One request is dispatched at a time: the loop reads a line from stdin,
//! handles it, writes the response line to stdout, and only then reads the
//! next. Logging goes to stderr; stdout belongs to the protocol.

use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};

use crate::error::Result;

use super::dispatcher::MetaToolDispatcher;
use super::protocol::{JsonRpcRequest, JsonRpcResponse, PROTOCOL_VERSION, SERVER_NAME};

/// Serve the upstream protocol over this process's stdio until EOF.
pub async fn serve(dispatcher: &MetaToolDispatcher) -> Result<()> {
    let stdin = tokio::io::stdin();
    let stdout = tokio::io::stdout();
    serve_streams(dispatcher, stdin, stdout).await
}

/// Serve over arbitrary streams (the seam tests use).
pub async fn serve_streams(
    dispatcher: &MetaToolDispatcher,
    input: impl tokio::io::AsyncRead + Unpin,
    mut output: impl AsyncWrite + Unpin,
) -> Result<()> {
    let mut lines = BufReader::new(input).lines();

    while let Some(line) = lines.next_line().await? {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let request: JsonRpcRequest = match serde_json::from_str(trimmed) {
            Ok(request) => request,
            Err(e) => {
                let response =
                    JsonRpcResponse::error(Value::Null, -32700, format!("Parse error: {}", e));
                write_response(&mut output, &response).await?;
                continue;
            }
        };

        if request.is_notification() {
            tracing::debug!(method = %request.method, "notification received");
            continue;
        }

        let response = handle_request(dispatcher, request).await;
        write_response(&mut output, &response).await?;
    }

    tracing::info!("upstream transport closed");
    Ok(())
}

/// Handle one request and shape the JSON-RPC response.
pub async fn handle_request(
    dispatcher: &MetaToolDispatcher,
    request: JsonRpcRequest,
) -> JsonRpcResponse {
    let id = request.id.clone().unwrap_or(Value::Null);

    match request.method.as_str() {
        "initialize" => JsonRpcResponse::success(
            id,
            json!({
                "protocolVersion": PROTOCOL_VERSION,
                "capabilities": { "tools": {} },
                "serverInfo": {
                    "name": SERVER_NAME,
                    "version": crate::VERSION
                }
            }),
        ),
        "ping" => JsonRpcResponse::success(id, json!({})),
        "tools/list" => JsonRpcResponse::success(
            id,
            json!({ "tools": MetaToolDispatcher::meta_tools() }),
        ),
        "tools/call" => {
            let params = request.params.unwrap_or(Value::Null);
            let name = params.get("name").and_then(Value::as_str).unwrap_or("");
            let arguments = params
                .get("arguments")
                .cloned()
                .unwrap_or_else(|| json!({}));

            tracing::debug!(tool = %name, "meta-tool call");
            let result = dispatcher.handle_tool_call(name, &arguments).await;
            JsonRpcResponse::success(id, result)
        }
        other => JsonRpcResponse::error(id, -32601, format!("Method not found: {}", other)),
    }
}

async fn write_response(
    output: &mut (impl AsyncWrite + Unpin),
    response: &JsonRpcResponse,
) -> Result<()> {
    let payload = serde_json::to_string(response)?;
    output.write_all(payload.as_bytes()).await?;
    output.write_all(b"\n").await?;
    output.flush().await?;
    Ok(())
}
