//! An in-process inbox of notifications that stay until dismissed.

use crate::core::{Message, NotifyFeature, NotifyTarget, TargetDescription};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::{Arc, Mutex};

/// Key in `Message::data` that names the notification to create or replace.
pub const ATTR_NOTIFICATION_ID: &str = "notification_id";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PersistentNotification {
    pub notification_id: String,
    pub title: Option<String>,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Default)]
struct Inbox {
    notifications: Vec<PersistentNotification>,
    next_id: u64,
}

/// Shared inbox. Clones refer to the same notifications.
#[derive(Clone, Default)]
pub struct PersistentNotifications {
    inner: Arc<Mutex<Inbox>>,
}

impl PersistentNotifications {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a notification, replacing any existing one with the same id.
    /// Returns the id used.
    pub fn create(
        &self,
        message: impl Into<String>,
        title: Option<String>,
        notification_id: Option<String>,
    ) -> String {
        let mut inbox = self.inner.lock().unwrap();
        let notification_id = match notification_id {
            Some(id) => id,
            None => {
                inbox.next_id += 1;
                format!("notification_{}", inbox.next_id)
            }
        };
        inbox
            .notifications
            .retain(|n| n.notification_id != notification_id);
        inbox.notifications.push(PersistentNotification {
            notification_id: notification_id.clone(),
            title,
            message: message.into(),
            created_at: Utc::now(),
        });
        notification_id
    }

    /// Removes a notification. Returns false if it did not exist.
    pub fn dismiss(&self, notification_id: &str) -> bool {
        let mut inbox = self.inner.lock().unwrap();
        let before = inbox.notifications.len();
        inbox
            .notifications
            .retain(|n| n.notification_id != notification_id);
        inbox.notifications.len() != before
    }

    pub fn list(&self) -> Vec<PersistentNotification> {
        self.inner.lock().unwrap().notifications.clone()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().notifications.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Turns every send into a persistent notification describing the call.
pub struct PersistentTarget {
    inbox: PersistentNotifications,
    description: TargetDescription,
}

impl PersistentTarget {
    pub fn new(inbox: PersistentNotifications, description: TargetDescription) -> Self {
        Self { inbox, description }
    }

    pub fn default_features() -> NotifyFeature {
        NotifyFeature::all()
    }

    fn status_line(&self, message: &Message) -> String {
        let data = message
            .data
            .as_ref()
            .map(|d| serde_json::Value::Object(d.clone()).to_string());
        format!(
            "Name: {}, Message: {}, Title: {}, Recipients: {}, Data: {}",
            self.description.name.as_deref().unwrap_or("persistent"),
            message.message.as_deref().unwrap_or("None"),
            message.title.as_deref().unwrap_or("None"),
            message
                .recipients
                .as_ref()
                .map(|r| format!("[{}]", r.join(", ")))
                .unwrap_or_else(|| "None".to_string()),
            data.as_deref().unwrap_or("None"),
        )
    }
}

impl NotifyTarget for PersistentTarget {
    fn description(&self) -> TargetDescription {
        self.description.clone()
    }

    fn send_message(&self, message: &Message) -> anyhow::Result<()> {
        let notification_id = match message.data.as_ref().and_then(|d| d.get(ATTR_NOTIFICATION_ID)) {
            None => None,
            Some(serde_json::Value::String(id)) => Some(id.clone()),
            Some(other) => anyhow::bail!("{ATTR_NOTIFICATION_ID} must be a string, got {other}"),
        };
        let title = message
            .title
            .clone()
            .or_else(|| self.description.name.clone());
        self.inbox
            .create(self.status_line(message), title, notification_id);
        Ok(())
    }
}
