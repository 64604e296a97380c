//! The dispatch service: the single entry point for "send to target X".
//!
//! A dispatch resolves the target, stamps its activation time, publishes the
//! new state and only then hands the send to the offload pool. The returned
//! `SendHandle` may be awaited by callers that need confirmation.

use crate::core::{Message, MessageData};
use crate::error::DispatchError;
use crate::events::{EventBus, TargetEvent};
use crate::offload::{Offload, SendHandle};
use crate::registry::{TargetEntry, TargetInfo, TargetRegistry};
use chrono::Utc;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument, warn};

/// Name of the service exposed to callers.
pub const SERVICE_SEND_MESSAGE: &str = "send_message";

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

impl From<OneOrMany> for Vec<String> {
    fn from(value: OneOrMany) -> Self {
        match value {
            OneOrMany::One(one) => vec![one],
            OneOrMany::Many(many) => many,
        }
    }
}

/// A validated `send_message` service call.
#[derive(Debug, Clone, PartialEq)]
pub struct SendMessageCall {
    pub targets: Vec<String>,
    pub message: Message,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawSendMessageCall {
    target: OneOrMany,
    message: Option<String>,
    title: Option<String>,
    recipients: Option<OneOrMany>,
    data: Option<MessageData>,
}

impl SendMessageCall {
    /// Validates the raw service data.
    ///
    /// `target` and `recipients` accept a single string or a list of strings.
    pub fn from_value(value: serde_json::Value) -> Result<Self, DispatchError> {
        let raw: RawSendMessageCall = serde_json::from_value(value)
            .map_err(|e| DispatchError::Validation(e.to_string()))?;

        let mut targets: Vec<String> = raw.target.into();
        let mut seen = std::collections::HashSet::new();
        targets.retain(|t| seen.insert(t.clone()));
        if targets.is_empty() {
            return Err(DispatchError::Validation("at least one target is required".into()));
        }
        if let Some(blank) = targets.iter().find(|t| t.trim().is_empty()) {
            return Err(DispatchError::Validation(format!("invalid target identity '{blank}'")));
        }

        Ok(Self {
            targets,
            message: Message {
                message: raw.message,
                title: raw.title,
                recipients: raw.recipients.map(Into::into),
                data: raw.data,
            },
        })
    }
}

/// Routes service calls to registered targets.
pub struct Dispatcher {
    registry: Arc<TargetRegistry>,
    offload: Offload,
    events: EventBus,
    enforce_features: bool,
}

impl Dispatcher {
    pub fn new(registry: Arc<TargetRegistry>, offload: Offload, events: EventBus) -> Self {
        Self {
            registry,
            offload,
            events,
            enforce_features: false,
        }
    }

    /// Rejects fields a target does not advertise in its feature flags.
    pub fn enforce_features(mut self, enforce: bool) -> Self {
        self.enforce_features = enforce;
        self
    }

    pub fn registry(&self) -> &Arc<TargetRegistry> {
        &self.registry
    }

    /// Discovery surface: every registered target.
    pub fn targets(&self) -> Vec<TargetInfo> {
        self.registry.snapshot()
    }

    /// Dispatches `message` to `identity`. Returns once the send is handed off.
    #[instrument(skip(self, message))]
    pub fn dispatch(&self, identity: &str, message: Message) -> Result<SendHandle, DispatchError> {
        let entry = self.resolve_checked(identity, &message)?;
        Ok(self.activate(entry, message))
    }

    /// Dispatches and waits for the send to finish, optionally bounded by
    /// `timeout`.
    pub async fn send_and_wait(
        &self,
        identity: &str,
        message: Message,
        timeout: Option<Duration>,
    ) -> Result<(), DispatchError> {
        let handle = self.dispatch(identity, message)?;
        match timeout {
            Some(timeout) => handle.wait_timeout(timeout).await,
            None => handle.wait().await,
        }
    }

    /// Handles a raw `send_message` service call.
    ///
    /// Every target is resolved before any is stamped, so one unknown
    /// identity rejects the whole call without side effects.
    #[instrument(skip_all)]
    pub fn call_service(&self, data: serde_json::Value) -> Result<Vec<SendHandle>, DispatchError> {
        let call = SendMessageCall::from_value(data)?;
        let entries = call
            .targets
            .iter()
            .map(|identity| self.resolve_checked(identity, &call.message))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(entries
            .into_iter()
            .map(|entry| self.activate(entry, call.message.clone()))
            .collect())
    }

    fn resolve_checked(
        &self,
        identity: &str,
        message: &Message,
    ) -> Result<Arc<TargetEntry>, DispatchError> {
        let entry = self.registry.resolve(identity).ok_or_else(|| {
            warn!(target_id = identity, "Dispatch to unknown notify target");
            metrics::counter!("notify_dispatch_rejected_total").increment(1);
            DispatchError::TargetNotFound(identity.to_string())
        })?;

        if self.enforce_features {
            let missing = entry
                .supported_features()
                .missing(message.required_features());
            if !missing.is_empty() {
                return Err(DispatchError::Validation(format!(
                    "target '{identity}' does not support: {missing}"
                )));
            }
        }
        Ok(entry)
    }

    fn activate(&self, entry: Arc<TargetEntry>, message: Message) -> SendHandle {
        let at = entry.state().stamp(Utc::now());
        debug!(target_id = entry.identity(), at = %at.to_rfc3339(), "Stamped activation");
        metrics::counter!("notify_dispatch_total", "target" => entry.identity().to_string())
            .increment(1);
        self.events.publish(TargetEvent::Activated {
            identity: entry.identity().to_string(),
            at,
        });
        self.offload
            .submit(entry.identity(), entry.target().clone(), message)
    }
}
