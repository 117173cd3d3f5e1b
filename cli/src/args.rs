//! Command-line interface.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(name = "tether")]
#[command(about = "Native handle lifecycle manager with a reference peer service")]
pub struct Cli {
    /// Config file (defaults to $TETHER_CONFIG, then ~/.tether/config.toml)
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, PartialEq, Subcommand)]
pub enum Commands {
    /// Serve the reference peer on stdin/stdout
    Peer {
        /// Name announced in the welcome frame
        #[arg(long, default_value = "tether-peer")]
        name: String,
    },
    /// Send one command through a peer and print the reply
    Request {
        /// Command name
        name: String,
        /// Peer the command is addressed to
        target: String,
        /// Command payload as JSON
        #[arg(value_parser = parse_payload)]
        payload: Option<serde_json::Value>,
    },
}

fn parse_payload(raw: &str) -> Result<serde_json::Value, String> {
    serde_json::from_str(raw).map_err(|e| format!("payload is not valid JSON: {e}"))
}
