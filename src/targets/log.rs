//! A target that writes notifications to the application log.

use crate::core::{Message, NotifyFeature, NotifyTarget, TargetDescription};
use crate::formatting::{PlainTextFormatter, TextFormatter};
use tracing::info;

pub struct LogTarget {
    description: TargetDescription,
}

impl LogTarget {
    pub fn new(description: TargetDescription) -> Self {
        Self { description }
    }

    pub fn default_features() -> NotifyFeature {
        NotifyFeature::all()
    }
}

impl NotifyTarget for LogTarget {
    fn description(&self) -> TargetDescription {
        self.description.clone()
    }

    fn send_message(&self, message: &Message) -> anyhow::Result<()> {
        let name = self.description.name.as_deref().unwrap_or("log");
        let text = PlainTextFormatter.format_message(message);
        match &message.data {
            Some(data) => info!(notifier = name, data = %serde_json::Value::Object(data.clone()), "{}", text),
            None => info!(notifier = name, "{}", text),
        }
        Ok(())
    }
}
