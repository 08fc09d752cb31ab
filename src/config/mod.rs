// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Downstream server descriptors.
//!
//! Descriptors enter the process exactly once, at startup, either as a JSON
//! literal (`--config`) or from a file (`--config-file`). Both forms resolve
//! to an array of [`ServerDescriptor`]s whose names must be unique.
//!
//! # Example Configuration
//!
//! ```json
//! [
//!   {
//!     "name": "weather",
//!     "command": "npx",
//!     "argv": ["-y", "@example/weather-mcp"],
//!     "env": { "WEATHER_API_MODE": "offline" }
//!   },
//!   { "name": "time", "command": "time-mcp", "argv": [] }
//! ]
//! ```

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

fn default_startup_timeout() -> u64 {
    30
}

fn default_tool_timeout() -> u64 {
    300
}

/// Launch description for a single downstream MCP server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerDescriptor {
    /// Namespace key for the server. Must be unique across descriptors.
    pub name: String,

    /// Executable to spawn.
    pub command: String,

    /// Arguments passed to the executable.
    #[serde(default)]
    pub argv: Vec<String>,

    /// Extra environment variables for the child process.
    #[serde(default)]
    pub env: HashMap<String, String>,

    /// Working directory for the child process.
    #[serde(default)]
    pub cwd: Option<String>,

    /// Handshake timeout in seconds.
    #[serde(default = "default_startup_timeout")]
    pub startup_timeout_sec: u64,

    /// Per-call timeout in seconds.
    #[serde(default = "default_tool_timeout")]
    pub tool_timeout_sec: u64,
}

impl ServerDescriptor {
    /// Create a descriptor with defaults for everything but name and command.
    pub fn new(name: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            command: command.into(),
            argv: Vec::new(),
            env: HashMap::new(),
            cwd: None,
            startup_timeout_sec: default_startup_timeout(),
            tool_timeout_sec: default_tool_timeout(),
        }
    }

    /// Set command arguments.
    pub fn with_argv(mut self, argv: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.argv = argv.into_iter().map(|s| s.into()).collect();
        self
    }

    /// Set environment variables.
    pub fn with_env(
        mut self,
        env: impl IntoIterator<Item = (impl Into<String>, impl Into<String>)>,
    ) -> Self {
        self.env = env.into_iter().map(|(k, v)| (k.into(), v.into())).collect();
        self
    }
}

/// Parse descriptors from a JSON literal.
///
/// Rejects empty names, empty commands, and duplicate server names.
pub fn parse_descriptors(json: &str) -> Result<Vec<ServerDescriptor>, ConfigError> {
    let descriptors: Vec<ServerDescriptor> = serde_json::from_str(json)?;
    validate(&descriptors)?;
    Ok(descriptors)
}

/// Load descriptors from a file containing the JSON literal.
pub fn load_descriptors(path: impl AsRef<Path>) -> Result<Vec<ServerDescriptor>, ConfigError> {
    let content = std::fs::read_to_string(path.as_ref())?;
    parse_descriptors(&content)
}

fn validate(descriptors: &[ServerDescriptor]) -> Result<(), ConfigError> {
    let mut seen = std::collections::HashSet::new();
    for desc in descriptors {
        if desc.name.is_empty() {
            return Err(ConfigError::MissingField("name".to_string()));
        }
        if desc.command.is_empty() {
            return Err(ConfigError::MissingField(format!(
                "command (server '{}')",
                desc.name
            )));
        }
        if !seen.insert(desc.name.as_str()) {
            return Err(ConfigError::DuplicateServer(desc.name.clone()));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_descriptors() {
        let json = r#"
        [
            {
                "name": "weather",
                "command": "npx",
                "argv": ["-y", "@example/weather-mcp"],
                "env": { "MODE": "offline" }
            },
            { "name": "time", "command": "time-mcp" }
        ]
        "#;

        let descriptors = parse_descriptors(json).unwrap();
        assert_eq!(descriptors.len(), 2);

        let weather = &descriptors[0];
        assert_eq!(weather.name, "weather");
        assert_eq!(weather.command, "npx");
        assert_eq!(weather.argv.len(), 2);
        assert_eq!(weather.env.get("MODE").map(|s| s.as_str()), Some("offline"));
        assert_eq!(weather.startup_timeout_sec, 30);
        assert_eq!(weather.tool_timeout_sec, 300);

        let time = &descriptors[1];
        assert!(time.argv.is_empty());
        assert!(time.cwd.is_none());
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let json = r#"
        [
            { "name": "a", "command": "cmd1" },
            { "name": "a", "command": "cmd2" }
        ]
        "#;

        let err = parse_descriptors(json).unwrap_err();
        assert!(matches!(err, ConfigError::DuplicateServer(name) if name == "a"));
    }

    #[test]
    fn test_empty_name_rejected() {
        let json = r#"[{ "name": "", "command": "cmd" }]"#;
        assert!(matches!(
            parse_descriptors(json),
            Err(ConfigError::MissingField(_))
        ));
    }

    #[test]
    fn test_empty_command_rejected() {
        let json = r#"[{ "name": "a", "command": "" }]"#;
        let err = parse_descriptors(json).unwrap_err();
        assert!(err.to_string().contains("'a'"));
    }

    #[test]
    fn test_invalid_json_rejected() {
        assert!(matches!(
            parse_descriptors("{not json"),
            Err(ConfigError::JsonError(_))
        ));
    }

    #[test]
    fn test_builders() {
        let desc = ServerDescriptor::new("weather", "echo-mcp")
            .with_argv(["weather-fixture"])
            .with_env([("KEY", "value")]);

        assert_eq!(desc.argv, vec!["weather-fixture"]);
        assert_eq!(desc.env.get("KEY").map(|s| s.as_str()), Some("value"));
    }

    #[test]
    fn test_load_descriptors_missing_file() {
        let err = load_descriptors("/nonexistent/config.json").unwrap_err();
        assert!(matches!(err, ConfigError::NotFound(_)));
    }
}
