//! Configuration management for notifyhub
//!
//! This module defines the main `Config` struct and its sub-structs,
//! responsible for holding all application settings. It uses the `figment`
//! crate to layer defaults, a `notifyhub.toml` file, environment variables
//! and command-line arguments.

use crate::cli::Cli;
use crate::core::{DeviceClass, NotifyFeature};
use crate::targets::WebhookFormat;
use anyhow::Result;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// The main configuration struct for the application.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Config {
    /// The logging level for the application.
    pub log_level: String,
    /// Configuration for the send worker pool.
    pub offload: OffloadConfig,
    /// Configuration for the dispatch service.
    pub dispatch: DispatchConfig,
    /// Configuration for the event bus.
    pub events: EventsConfig,
    /// Configuration for activation state persistence.
    pub state: StateConfig,
    /// Targets registered at startup.
    #[serde(default)]
    pub targets: Vec<TargetConfig>,
}

/// Configuration for the send worker pool.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct OffloadConfig {
    /// Maximum number of sends running at once.
    pub max_workers: usize,
}

/// Configuration for the dispatch service.
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct DispatchConfig {
    /// Reject message fields a target does not advertise.
    #[serde(default)]
    pub enforce_features: bool,
    /// Deadline applied by callers that wait for confirmation.
    pub default_timeout_seconds: Option<u64>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct EventsConfig {
    /// Capacity of the broadcast channel.
    pub capacity: usize,
}

/// Configuration for activation state persistence.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct StateConfig {
    /// JSON file holding the last activation of every target. State is kept
    /// in memory only when unset.
    pub path: Option<PathBuf>,
    /// How often pending activations are written out.
    pub flush_interval_seconds: u64,
}

/// One `[[targets]]` entry.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct TargetConfig {
    /// Explicit identity. Derived from `name` when absent.
    #[serde(default)]
    pub id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub device_class: Option<DeviceClass>,
    /// Overrides the feature flags the target kind declares by default.
    #[serde(default)]
    pub supported_features: Option<NotifyFeature>,
    #[serde(flatten)]
    pub kind: TargetKind,
}

/// The transport of a configured target.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TargetKind {
    Log,
    Persistent,
    Webhook {
        url: String,
        #[serde(default)]
        format: WebhookFormat,
        #[serde(default = "default_webhook_timeout")]
        timeout_seconds: u64,
    },
    Websocket {
        host: String,
    },
}

fn default_webhook_timeout() -> u64 {
    10
}

impl Config {
    /// Loads the application configuration.
    ///
    /// Sources are layered in order: built-in defaults, the TOML file named
    /// by `--config` (if any), `NOTIFYHUB_` environment variables (nested keys
    /// separated by `__`), then command-line arguments.
    pub fn load(cli: &Cli) -> Result<Self> {
        let mut figment = Figment::new().merge(Serialized::defaults(Config::default()));
        if let Some(path) = &cli.config {
            if !path.exists() {
                anyhow::bail!("configuration file not found: {}", path.display());
            }
            figment = figment.merge(Toml::file(path));
        }
        let config: Config = figment
            // e.g. NOTIFYHUB_OFFLOAD__MAX_WORKERS=4
            .merge(Env::prefixed("NOTIFYHUB_").split("__"))
            .merge(cli.clone())
            .extract()?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.offload.max_workers == 0 {
            anyhow::bail!("offload.max_workers must be at least 1");
        }
        if self.state.flush_interval_seconds == 0 {
            anyhow::bail!("state.flush_interval_seconds must be at least 1");
        }
        Ok(())
    }
}

// Provide a default implementation for tests and easy setup.
impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            offload: OffloadConfig {
                max_workers: num_cpus::get().max(1),
            },
            dispatch: DispatchConfig {
                enforce_features: false,
                default_timeout_seconds: Some(30),
            },
            events: EventsConfig { capacity: 1024 },
            state: StateConfig {
                path: None,
                flush_interval_seconds: 5,
            },
            targets: vec![],
        }
    }
}
