// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! CLI argument parsing and command definitions.
//!
//! - `hello`: Handshake only, prints the server's limits
//! - `read`: Read node values
//! - `subscribe`: Print data changes until interrupted

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

// =============================================================================
// Main CLI Structure
// =============================================================================

/// uaconv - OPC UA secure conversation client
#[derive(Parser, Debug)]
#[command(
    name = "uaconv",
    author = "Sylvex <contact@sylvex.io>",
    version,
    about = "OPC UA secure conversation client",
    long_about = None,
    propagate_version = true
)]
pub struct Cli {
    /// Configuration file path (YAML or TOML)
    #[arg(short, long, env = "UACONV_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Server endpoint, overrides the configuration file
    #[arg(short, long, env = "UACONV_ENDPOINT", global = true)]
    pub endpoint: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(
        short,
        long,
        default_value = "info",
        env = "UACONV_LOG_LEVEL",
        global = true
    )]
    pub log_level: String,

    /// Log format (text, json, compact)
    #[arg(long, default_value = "text", env = "UACONV_LOG_FORMAT", global = true)]
    pub log_format: LogFormat,

    /// Output format for command results
    #[arg(short, long, default_value = "text", global = true)]
    pub output: OutputFormat,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

// =============================================================================
// Subcommands
// =============================================================================

/// Available subcommands.
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Perform the Hello/Acknowledge handshake and print the result
    Hello,

    /// Read the Value attribute of nodes
    Read(ReadArgs),

    /// Print data changes of nodes until Ctrl-C
    Subscribe(SubscribeArgs),
}

/// Arguments for the `read` command.
#[derive(Args, Debug, Clone)]
pub struct ReadArgs {
    /// Nodes to read, e.g. `ns=2;s=Tank.Level`
    #[arg(required = true)]
    pub nodes: Vec<String>,
}

/// Arguments for the `subscribe` command.
#[derive(Args, Debug, Clone)]
pub struct SubscribeArgs {
    /// Nodes to monitor
    #[arg(required = true)]
    pub nodes: Vec<String>,

    /// Publishing interval, e.g. `500ms`
    #[arg(short, long, value_parser = parse_duration)]
    pub interval: Option<std::time::Duration>,

    /// Capacity of the delivery channel
    #[arg(long, default_value = "64")]
    pub buffer: usize,
}

// =============================================================================
// Enums
// =============================================================================

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum LogFormat {
    /// Human-readable text format
    #[default]
    Text,
    /// JSON format for structured logging
    Json,
    /// Compact format for minimal output
    Compact,
}

/// Output format for command results.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text format
    #[default]
    Text,
    /// JSON lines for programmatic parsing
    Json,
}

fn parse_duration(value: &str) -> Result<std::time::Duration, String> {
    let value = value.trim();
    let (number, scale) = if let Some(ms) = value.strip_suffix("ms") {
        (ms, 1)
    } else if let Some(s) = value.strip_suffix('s') {
        (s, 1000)
    } else {
        (value, 1)
    };
    number
        .trim()
        .parse::<u64>()
        .map(|n| std::time::Duration::from_millis(n * scale))
        .map_err(|_| format!("invalid duration: {value}"))
}

impl Cli {
    /// Parse CLI arguments from the command line.
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

// =============================================================================
// Tests
// =============================================================================
