//! A target that posts notifications to an HTTP webhook.

use crate::core::{Message, NotifyFeature, NotifyTarget, TargetDescription};
use crate::formatting::{SlackTextFormatter, TextFormatter};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{error, info, instrument};

/// Body layout of the webhook request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum WebhookFormat {
    /// The whole message as a JSON object.
    #[default]
    Json,
    /// A Slack incoming-webhook body: `{"text": ...}`.
    Slack,
}

/// Posts each message to `url`. Every send blocks until the server answers
/// or the timeout expires.
pub struct WebhookTarget {
    url: String,
    format: WebhookFormat,
    timeout: Duration,
    description: TargetDescription,
}

impl WebhookTarget {
    pub fn new(url: String, format: WebhookFormat, description: TargetDescription) -> Self {
        Self {
            url,
            format,
            timeout: Duration::from_secs(10),
            description,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn default_features(format: WebhookFormat) -> NotifyFeature {
        match format {
            WebhookFormat::Json => NotifyFeature::all(),
            WebhookFormat::Slack => {
                NotifyFeature::MESSAGE | NotifyFeature::TITLE | NotifyFeature::RECIPIENTS
            }
        }
    }

    fn payload(&self, message: &Message) -> anyhow::Result<Value> {
        Ok(match self.format {
            WebhookFormat::Json => serde_json::to_value(message)?,
            WebhookFormat::Slack => json!({ "text": SlackTextFormatter.format_message(message) }),
        })
    }
}

impl NotifyTarget for WebhookTarget {
    fn description(&self) -> TargetDescription {
        self.description.clone()
    }

    #[instrument(skip(self, message), fields(url = %self.url))]
    fn send_message(&self, message: &Message) -> anyhow::Result<()> {
        let payload = self.payload(message)?;
        // A blocking client must not be dropped inside an async context.
        let client = reqwest::blocking::Client::builder()
            .timeout(self.timeout)
            .build()?;

        let response = client.post(&self.url).json(&payload).send();
        match response {
            Ok(res) => {
                if res.status().is_success() {
                    info!("Successfully sent notification to webhook.");
                    Ok(())
                } else {
                    let status = res.status();
                    let text = res.text().unwrap_or_default();
                    error!(
                        status = %status,
                        body = %text,
                        "Webhook rejected notification"
                    );
                    anyhow::bail!("webhook returned status {}, body: {}", status, text);
                }
            }
            Err(e) => {
                error!(error = %e, "HTTP request to webhook failed");
                Err(e.into())
            }
        }
    }
}
