//! Built-in notify target implementations.
//!
//! Each target implements `NotifyTarget` and is constructed either directly
//! or from a `[[targets]]` entry of the configuration via `build_target`.
pub mod function;
pub mod log;
pub mod persistent;
pub mod webhook;
pub mod websocket;

pub use function::FnTarget;
pub use log::LogTarget;
pub use persistent::{PersistentNotification, PersistentNotifications, PersistentTarget};
pub use webhook::{WebhookFormat, WebhookTarget};
pub use websocket::WebSocketTarget;

use crate::config::{TargetConfig, TargetKind};
use crate::core::{slugify, NotifyTarget, TargetDescription};
use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;

/// Shared services a configured target may need.
#[derive(Clone, Default)]
pub struct TargetContext {
    pub persistent: PersistentNotifications,
}

/// The identity a configured target registers under.
pub fn target_identity(config: &TargetConfig) -> Result<String> {
    let identity = match &config.id {
        Some(id) => id.trim().to_string(),
        None => slugify(&config.name),
    };
    if identity.is_empty() {
        anyhow::bail!("target '{}' does not yield a usable identity", config.name);
    }
    Ok(identity)
}

/// Builds a target from its configuration entry.
pub fn build_target(config: &TargetConfig, ctx: &TargetContext) -> Result<Arc<dyn NotifyTarget>> {
    let mut description = TargetDescription::named(config.name.clone());
    description.device_class = config.device_class;

    let target: Arc<dyn NotifyTarget> = match &config.kind {
        TargetKind::Log => Arc::new(LogTarget::new(description.with_features(
            config.supported_features.unwrap_or_else(LogTarget::default_features),
        ))),
        TargetKind::Persistent => Arc::new(PersistentTarget::new(
            ctx.persistent.clone(),
            description.with_features(
                config
                    .supported_features
                    .unwrap_or_else(PersistentTarget::default_features),
            ),
        )),
        TargetKind::Webhook {
            url,
            format,
            timeout_seconds,
        } => {
            if url.trim().is_empty() {
                anyhow::bail!("webhook target '{}' has an empty url", config.name);
            }
            Arc::new(
                WebhookTarget::new(
                    url.clone(),
                    *format,
                    description.with_features(
                        config
                            .supported_features
                            .unwrap_or_else(|| WebhookTarget::default_features(*format)),
                    ),
                )
                .with_timeout(Duration::from_secs(*timeout_seconds)),
            )
        }
        TargetKind::Websocket { host } => {
            if host.trim().is_empty() {
                anyhow::bail!("websocket target '{}' has an empty host", config.name);
            }
            Arc::new(WebSocketTarget::new(
                host.clone(),
                description.with_features(
                    config
                        .supported_features
                        .unwrap_or_else(WebSocketTarget::default_features),
                ),
            ))
        }
    };
    Ok(target)
}
