// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! mcp-of-mcps entry point.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing::Level;

use mcp_of_mcps::config::{self, ServerDescriptor};
use mcp_of_mcps::server::Orchestrator;
use mcp_of_mcps::telemetry::{init_telemetry, TelemetryConfig};

/// MCP meta-server: many downstream MCP servers behind one endpoint.
#[derive(Parser)]
#[command(name = "mcp-of-mcps")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Server descriptors as a JSON array literal
    #[arg(long, conflicts_with = "config_file")]
    config: Option<String>,

    /// Path to a file containing the server descriptor JSON array
    #[arg(long, conflicts_with = "config")]
    config_file: Option<PathBuf>,

    /// Show debug output
    #[arg(short = 'v', long)]
    verbose: bool,

    /// Show trace output
    #[arg(long)]
    debug: bool,
}

impl Cli {
    fn descriptors(&self) -> Result<Vec<ServerDescriptor>, mcp_of_mcps::ConfigError> {
        match (&self.config, &self.config_file) {
            (Some(json), None) => config::parse_descriptors(json),
            (None, Some(path)) => config::load_descriptors(path),
            _ => Err(mcp_of_mcps::ConfigError::MissingField(
                "one of --config or --config-file".to_string(),
            )),
        }
    }

    fn log_level(&self) -> Level {
        if self.debug {
            Level::TRACE
        } else if self.verbose {
            Level::DEBUG
        } else {
            Level::INFO
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let _ = init_telemetry(&TelemetryConfig::default().with_level(cli.log_level()));

    let descriptors = match cli.descriptors() {
        Ok(descriptors) => descriptors,
        Err(e) => {
            tracing::error!(error = %e, "invalid configuration");
            return ExitCode::FAILURE;
        }
    };

    tracing::info!(servers = descriptors.len(), version = mcp_of_mcps::VERSION, "starting");

    match Orchestrator::new(".", descriptors).run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "fatal startup failure");
            ExitCode::FAILURE
        }
    }
}
