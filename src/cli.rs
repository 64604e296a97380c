//! Command-Line Interface (CLI) argument parsing.
//!
//! This module defines the command-line arguments for the application using the
//! `clap` crate. Global options are merged into the configuration as the
//! highest-priority `figment` provider.

use clap::{Args, Parser, Subcommand};
use figment::{
    value::{Dict, Map, Tag, Value},
    Error, Metadata, Profile, Provider,
};
use std::path::PathBuf;

/// In-process notification dispatch.
#[derive(Parser, Debug, Clone, Default)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short, long, value_name = "FILE", global = true)]
    pub config: Option<PathBuf>,

    /// Logging level (overridden by RUST_LOG).
    #[arg(long, value_name = "LEVEL", global = true)]
    pub log_level: Option<String>,

    /// Maximum number of sends running at once.
    #[arg(long, value_name = "N", global = true)]
    pub max_workers: Option<usize>,

    /// File used to persist activation state.
    #[arg(long, value_name = "FILE", global = true)]
    pub state_path: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// List the configured targets and their last activation.
    List {
        /// Print JSON instead of a table.
        #[arg(long)]
        json: bool,
    },
    /// Send a message to one or more targets and wait for delivery.
    Send(SendArgs),
}

#[derive(Args, Debug, Clone, Default)]
pub struct SendArgs {
    /// Target identity. May be repeated.
    #[arg(short, long = "target", value_name = "ID", required = true)]
    pub targets: Vec<String>,

    #[arg(short, long)]
    pub message: Option<String>,

    #[arg(long)]
    pub title: Option<String>,

    /// Recipient. May be repeated.
    #[arg(short, long = "recipient", value_name = "RECIPIENT")]
    pub recipients: Vec<String>,

    /// Structured payload as a JSON object.
    #[arg(long, value_name = "JSON")]
    pub data: Option<String>,

    /// Seconds to wait for delivery before giving up.
    #[arg(long, value_name = "SECONDS")]
    pub timeout_secs: Option<u64>,
}

impl SendArgs {
    /// Builds the `send_message` service data for these arguments.
    pub fn to_service_data(&self) -> anyhow::Result<serde_json::Value> {
        let mut call = serde_json::Map::new();
        call.insert("target".into(), serde_json::json!(self.targets));
        if let Some(message) = &self.message {
            call.insert("message".into(), message.clone().into());
        }
        if let Some(title) = &self.title {
            call.insert("title".into(), title.clone().into());
        }
        if !self.recipients.is_empty() {
            call.insert("recipients".into(), serde_json::json!(self.recipients));
        }
        if let Some(raw) = &self.data {
            let data: serde_json::Value = serde_json::from_str(raw)
                .map_err(|e| anyhow::anyhow!("--data is not valid JSON: {e}"))?;
            call.insert("data".into(), data);
        }
        Ok(serde_json::Value::Object(call))
    }
}

impl Provider for Cli {
    fn metadata(&self) -> Metadata {
        Metadata::named("Command-Line Arguments")
    }

    fn data(&self) -> Result<Map<Profile, Dict>, Error> {
        let mut dict = Dict::new();

        if let Some(level) = &self.log_level {
            dict.insert("log_level".into(), Value::from(level.clone()));
        }

        if let Some(workers) = self.max_workers {
            let mut offload = Dict::new();
            offload.insert("max_workers".into(), Value::from(workers as u64));
            dict.insert("offload".into(), Value::Dict(Tag::Default, offload));
        }

        if let Some(path) = &self.state_path {
            let mut state = Dict::new();
            state.insert("path".into(), Value::from(path.display().to_string()));
            dict.insert("state".into(), Value::Dict(Tag::Default, state));
        }

        let mut map = Map::new();
        map.insert(Profile::Default, dict);
        Ok(map)
    }
}
