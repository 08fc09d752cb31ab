// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Discovery artifacts: the servers overview text and the per-tool JSON.
//!
//! Both renderings are deterministic: servers sort by name, tools by title,
//! so the same registry state always produces byte-identical output.

use serde_json::{json, Value};

use crate::error::RegistryError;

use super::registry::RegisteredServer;

/// Standing hint appended to the servers overview.
const OVERVIEW_HINT: &str =
    "Call get_tools_overview with one or more of the tool paths above to get \
     each tool's full schema and example usage.";

/// Render the plain-text overview of every server and its tool paths.
pub fn servers_overview(servers: &[RegisteredServer]) -> String {
    let mut sorted: Vec<&RegisteredServer> = servers.iter().collect();
    sorted.sort_by(|a, b| a.name.cmp(&b.name));

    let mut out = String::new();
    for server in sorted {
        out.push_str(&format!(
            "# {} mcp server instructions: {}\n",
            server.name,
            server.instructions.as_deref().unwrap_or("")
        ));

        let mut titles: Vec<&str> = server.tools.iter().map(|t| t.title.as_str()).collect();
        titles.sort_unstable();
        for title in titles {
            out.push_str(&format!("{}/{}\n", server.name, title));
        }
        out.push('\n');
    }

    out.push_str(OVERVIEW_HINT);
    out
}

/// Render the per-tool JSON objects for the requested `server/title` paths.
///
/// A malformed path or unknown server fails the whole call; an unknown tool
/// within a known server is skipped with a warning and the rest of the
/// array is still returned.
pub fn tools_overview(
    servers: &[RegisteredServer],
    paths: &[String],
) -> Result<Vec<Value>, RegistryError> {
    let mut out = Vec::with_capacity(paths.len());

    for path in paths {
        let (server_name, title) = path
            .split_once('/')
            .filter(|(s, t)| !s.is_empty() && !t.is_empty())
            .ok_or_else(|| RegistryError::InvalidToolPath(path.clone()))?;

        let server = servers
            .iter()
            .find(|s| s.name == server_name)
            .ok_or_else(|| RegistryError::ServerNotFound(server_name.to_string()))?;

        let Some(tool) = server.tool_by_title(title) else {
            tracing::warn!(path = %path, "unknown tool in overview request, skipping");
            continue;
        };

        let mut entry = json!({
            "name": tool.name,
            "title": tool.title,
            "description": tool.description.as_deref().unwrap_or(""),
            "inputSchema": tool.input_schema,
            "exampleUsage": example_usage(server_name, &tool.title),
        });
        if let Some(schema) = &tool.output_schema {
            entry["outputSchema"] = schema.clone();
        }

        out.push(entry);
    }

    Ok(out)
}

/// The literal usage snippet shown for a tool path.
pub fn example_usage(server: &str, title: &str) -> String {
    format!(
        "const {title} = require('./{server}/{title}.cjs');\nmodule.exports = {title}({{ /* your parameters here */ }});"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp::ToolDescriptor;
    use serde_json::json;

    fn server(name: &str, instructions: Option<&str>, tools: &[(&str, &str)]) -> RegisteredServer {
        RegisteredServer {
            name: name.to_string(),
            instructions: instructions.map(String::from),
            client: None,
            tools: tools
                .iter()
                .map(|(tool_name, title)| ToolDescriptor {
                    name: tool_name.to_string(),
                    title: title.to_string(),
                    description: Some(format!("{} description", tool_name)),
                    input_schema: json!({"type": "object"}),
                    output_schema: None,
                    original_output_schema: false,
                })
                .collect(),
        }
    }

    #[test]
    fn test_servers_overview_format() {
        let servers = vec![
            server("weather", Some("stay dry"), &[("get_forecast", "get_forecast")]),
            server("time", None, &[("now", "now")]),
        ];

        let text = servers_overview(&servers);

        // Sorted by server name, one path line per tool.
        let time_pos = text.find("# time mcp server instructions:").unwrap();
        let weather_pos = text
            .find("# weather mcp server instructions: stay dry")
            .unwrap();
        assert!(time_pos < weather_pos);
        assert_eq!(text.matches("weather/get_forecast").count(), 1);
        assert_eq!(text.matches("time/now").count(), 1);
        assert!(text.contains("get_tools_overview"));
    }

    #[test]
    fn test_servers_overview_tools_sorted_by_title() {
        let servers = vec![server("s", None, &[("zebra", "zebra"), ("apple", "apple")])];
        let text = servers_overview(&servers);
        assert!(text.find("s/apple").unwrap() < text.find("s/zebra").unwrap());
    }

    #[test]
    fn test_servers_overview_deterministic() {
        let servers = vec![
            server("b", None, &[("t1", "t1")]),
            server("a", None, &[("t2", "t2")]),
        ];
        assert_eq!(servers_overview(&servers), servers_overview(&servers));
    }

    #[test]
    fn test_tools_overview_entry() {
        let servers = vec![server("weather", None, &[("get_forecast", "get_forecast")])];
        let paths = vec!["weather/get_forecast".to_string()];

        let entries = tools_overview(&servers, &paths).unwrap();
        assert_eq!(entries.len(), 1);

        let entry = &entries[0];
        assert_eq!(entry["name"], "get_forecast");
        assert_eq!(entry["title"], "get_forecast");
        assert_eq!(
            entry["exampleUsage"],
            "const get_forecast = require('./weather/get_forecast.cjs');\nmodule.exports = get_forecast({ /* your parameters here */ });"
        );
        assert!(entry.get("outputSchema").is_none());
    }

    #[test]
    fn test_tools_overview_includes_output_schema_when_present() {
        let mut s = server("s", None, &[("t", "t")]);
        s.tools[0].output_schema = Some(json!({"type": "object"}));

        let entries = tools_overview(&[s], &["s/t".to_string()]).unwrap();
        assert_eq!(entries[0]["outputSchema"], json!({"type": "object"}));
    }

    #[test]
    fn test_tools_overview_malformed_path_fails() {
        let servers = vec![server("s", None, &[("t", "t")])];

        for bad in ["no-slash", "/t", "s/"] {
            let err = tools_overview(&servers, &[bad.to_string()]).unwrap_err();
            match err {
                RegistryError::InvalidToolPath(path) => assert_eq!(path, bad),
                other => panic!("expected InvalidToolPath, got {other}"),
            }
        }
    }

    #[test]
    fn test_tools_overview_unknown_server_fails() {
        let servers = vec![server("s", None, &[("t", "t")])];
        let err = tools_overview(&servers, &["ghost/t".to_string()]).unwrap_err();
        assert!(matches!(err, RegistryError::ServerNotFound(name) if name == "ghost"));
    }

    #[test]
    fn test_tools_overview_unknown_tool_skipped() {
        let servers = vec![server("s", None, &[("t", "t")])];
        let paths = vec!["s/missing".to_string(), "s/t".to_string()];

        let entries = tools_overview(&servers, &paths).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0]["name"], "t");
    }
}
