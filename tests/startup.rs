// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! End-to-end composition tests over registry, store, index, formatter,
//! and sandbox materialization.
//!
//! No downstream subprocess is spawned: servers are registered from
//! pre-fetched tool lists, the same seam the live path funnels through.

use std::sync::Arc;

use serde_json::{json, Value};

use mcp_of_mcps::mcp::DiscoveredTool;
use mcp_of_mcps::registry::ServerRegistry;
use mcp_of_mcps::sandbox::{stub_path, Sandbox, SANDBOX_DIR};
use mcp_of_mcps::search::{HashedEmbeddingProvider, VectorIndex, VectorRecord};
use mcp_of_mcps::server::MetaToolDispatcher;
use mcp_of_mcps::store::ToolMetadataStore;

// ============================================================================
// Fixtures
// ============================================================================

fn weather_tool() -> DiscoveredTool {
    DiscoveredTool {
        name: "get_forecast".to_string(),
        description: Some("weather predictions".to_string()),
        input_schema: json!({
            "type": "object",
            "properties": { "lat": {"type": "number"}, "lon": {"type": "number"} }
        }),
        output_schema: None,
    }
}

fn time_tool() -> DiscoveredTool {
    DiscoveredTool {
        name: "now".to_string(),
        description: Some("current time".to_string()),
        input_schema: json!({"type": "object"}),
        output_schema: None,
    }
}

async fn boot(dir: &std::path::Path, servers: Vec<(&str, Vec<DiscoveredTool>)>) -> Arc<ServerRegistry> {
    let store = Arc::new(ToolMetadataStore::open(dir).unwrap());
    let registry = Arc::new(ServerRegistry::new(store));
    for (name, tools) in servers {
        registry
            .register_discovered(name, None, None, tools)
            .await
            .unwrap();
    }
    registry.reconcile_orphans().await.unwrap();
    registry
}

async fn dispatcher_over(dir: &std::path::Path, registry: Arc<ServerRegistry>) -> MetaToolDispatcher {
    let index = Arc::new(
        VectorIndex::open(dir, Arc::new(HashedEmbeddingProvider::new())).unwrap(),
    );
    let mut records = Vec::new();
    for server in registry.all_servers().await {
        for tool in &server.tools {
            records.push(VectorRecord::new(
                &server.name,
                &tool.name,
                tool.description.as_deref().unwrap_or(&tool.name),
            ));
        }
    }
    index.rebuild(&records).await.unwrap();

    let sandbox = Arc::new(Sandbox::new(dir, registry.clone()));
    sandbox.materialize().await.unwrap();

    MetaToolDispatcher::new(registry, index, sandbox)
}

fn envelope_text(result: &Value) -> &str {
    result["content"][0]["text"].as_str().unwrap()
}

// ============================================================================
// Boot and discovery
// ============================================================================

#[tokio::test]
async fn boot_and_list() {
    let temp = tempfile::tempdir().unwrap();
    let registry = boot(temp.path(), vec![("weather", vec![weather_tool()])]).await;
    let dispatcher = dispatcher_over(temp.path(), registry).await;

    let result = dispatcher
        .handle_tool_call("get_mcps_servers_overview", &json!({}))
        .await;

    let text = envelope_text(&result);
    assert_eq!(text.matches("weather/get_forecast").count(), 1);
}

#[tokio::test]
async fn selective_schema_load() {
    let temp = tempfile::tempdir().unwrap();
    let registry = boot(temp.path(), vec![("weather", vec![weather_tool()])]).await;
    let dispatcher = dispatcher_over(temp.path(), registry).await;

    let result = dispatcher
        .handle_tool_call(
            "get_tools_overview",
            &json!({"toolPaths": ["weather/get_forecast"]}),
        )
        .await;

    let parsed: Vec<Value> = serde_json::from_str(envelope_text(&result)).unwrap();
    assert_eq!(parsed.len(), 1);
    assert_eq!(
        parsed[0]["exampleUsage"],
        "const get_forecast = require('./weather/get_forecast.cjs');\nmodule.exports = get_forecast({ /* your parameters here */ });"
    );
}

#[tokio::test]
async fn semantic_hit() {
    let temp = tempfile::tempdir().unwrap();
    let registry = boot(
        temp.path(),
        vec![("weather", vec![weather_tool()]), ("time", vec![time_tool()])],
    )
    .await;
    let dispatcher = dispatcher_over(temp.path(), registry).await;

    let result = dispatcher
        .handle_tool_call(
            "semantic_search_tools",
            &json!({"query": "weather predictions tomorrow", "limit": 1}),
        )
        .await;

    let parsed: Vec<Value> = serde_json::from_str(envelope_text(&result)).unwrap();
    assert_eq!(parsed.len(), 1);
    assert_eq!(parsed[0]["toolName"], "get_forecast");
}

// ============================================================================
// Stub materialization (I1)
// ============================================================================

#[tokio::test]
async fn every_registered_tool_has_a_stub() {
    let temp = tempfile::tempdir().unwrap();
    let registry = boot(
        temp.path(),
        vec![
            ("weather", vec![weather_tool()]),
            ("time", vec![time_tool()]),
        ],
    )
    .await;

    let sandbox = Sandbox::new(temp.path(), registry.clone());
    sandbox.materialize().await.unwrap();

    let root = temp.path().join(SANDBOX_DIR);
    for server in registry.all_servers().await {
        for tool in &server.tools {
            let path = stub_path(&root, &server.name, &tool.title);
            assert!(path.exists(), "missing stub {}", path.display());
            let body = std::fs::read_to_string(&path).unwrap();
            assert!(body.contains("module.exports = async function (args)"));
        }
    }
}

#[tokio::test]
async fn slash_in_tool_name_round_trips() {
    let temp = tempfile::tempdir().unwrap();
    let registry = boot(
        temp.path(),
        vec![(
            "fs",
            vec![DiscoveredTool {
                name: "fs/read".to_string(),
                description: Some("read a file".to_string()),
                input_schema: json!({}),
                output_schema: None,
            }],
        )],
    )
    .await;

    // Wire name unchanged, title sanitized.
    let tool = registry.get_tool("fs", "fs/read").await.unwrap();
    assert_eq!(tool.name, "fs/read");
    assert_eq!(tool.title, "fs_read");

    // The overview path uses the title and resolves back to the tool.
    let dispatcher = dispatcher_over(temp.path(), registry).await;
    let result = dispatcher
        .handle_tool_call("get_tools_overview", &json!({"toolPaths": ["fs/fs_read"]}))
        .await;
    let parsed: Vec<Value> = serde_json::from_str(envelope_text(&result)).unwrap();
    assert_eq!(parsed.len(), 1);
    assert_eq!(parsed[0]["name"], "fs/read");
}

// ============================================================================
// Restart behavior (schema preservation, orphan cleanup)
// ============================================================================

#[tokio::test]
async fn schema_preserved_across_restart() {
    let temp = tempfile::tempdir().unwrap();
    let schema = json!({
        "type": "object",
        "properties": { "temperature": {"type": "number"} }
    });

    // First boot: downstream supplies an output schema.
    {
        let mut tool = weather_tool();
        tool.output_schema = Some(schema.clone());
        boot(temp.path(), vec![("weather", vec![tool])]).await;
    }

    // Second boot: downstream no longer returns one.
    let registry = boot(temp.path(), vec![("weather", vec![weather_tool()])]).await;

    let tool = registry.get_tool("weather", "get_forecast").await.unwrap();
    assert_eq!(tool.output_schema, Some(schema));
    assert!(tool.original_output_schema);

    let row = registry
        .store()
        .get_tool("weather", "get_forecast")
        .unwrap()
        .unwrap();
    assert!(row.original_output_schema);
}

#[tokio::test]
async fn orphan_cleanup() {
    let temp = tempfile::tempdir().unwrap();

    // First boot with servers A and B.
    boot(
        temp.path(),
        vec![("A", vec![weather_tool()]), ("B", vec![time_tool()])],
    )
    .await;

    // Second boot with only A.
    let registry = boot(temp.path(), vec![("A", vec![weather_tool()])]).await;

    assert_eq!(registry.store().list_all_servers().unwrap(), vec!["A"]);
}

#[tokio::test]
async fn observed_schema_survives_restart_without_overwriting_original() {
    let temp = tempfile::tempdir().unwrap();

    // Boot, then absorb an inferred schema for a schema-less tool.
    {
        let registry = boot(temp.path(), vec![("time", vec![time_tool()])]).await;
        registry
            .record_observed_output(
                "time",
                "now",
                json!({"type": "object", "properties": {"iso": {"type": "string"}}}),
            )
            .await
            .unwrap();
    }

    // Restart: the inferred schema is injected, still marked inferred.
    let registry = boot(temp.path(), vec![("time", vec![time_tool()])]).await;
    let tool = registry.get_tool("time", "now").await.unwrap();
    assert!(!tool.original_output_schema);
    assert_eq!(
        tool.output_schema,
        Some(json!({"type": "object", "properties": {"iso": {"type": "string"}}}))
    );
}

// ============================================================================
// Dispatcher boundaries
// ============================================================================

#[tokio::test]
async fn unknown_tool_and_bad_arguments_stay_in_envelope() {
    let temp = tempfile::tempdir().unwrap();
    let registry = boot(temp.path(), vec![("weather", vec![weather_tool()])]).await;
    let dispatcher = dispatcher_over(temp.path(), registry).await;

    let result = dispatcher.handle_tool_call("nope", &json!({})).await;
    assert_eq!(result["isError"], json!(true));
    assert_eq!(envelope_text(&result), "Tool 'nope' not found");

    let result = dispatcher
        .handle_tool_call("semantic_search_tools", &json!({"query": 7}))
        .await;
    assert_eq!(result["isError"], json!(true));
    assert!(envelope_text(&result).starts_with("Error:"));
}

#[tokio::test]
async fn unknown_tool_in_overview_is_skipped_not_fatal() {
    let temp = tempfile::tempdir().unwrap();
    let registry = boot(temp.path(), vec![("weather", vec![weather_tool()])]).await;
    let dispatcher = dispatcher_over(temp.path(), registry).await;

    let result = dispatcher
        .handle_tool_call(
            "get_tools_overview",
            &json!({"toolPaths": ["weather/ghost", "weather/get_forecast"]}),
        )
        .await;

    let parsed: Vec<Value> = serde_json::from_str(envelope_text(&result)).unwrap();
    assert_eq!(parsed.len(), 1);
    assert_eq!(parsed[0]["name"], "get_forecast");
}
