// src/formatting.rs

use crate::core::Message;

/// A trait for rendering a message into a single line of text.
pub trait TextFormatter: Send + Sync {
    fn format_message(&self, message: &Message) -> String;
}

/// Renders `title: message`, or whichever of the two is present.
pub struct PlainTextFormatter;

impl TextFormatter for PlainTextFormatter {
    fn format_message(&self, message: &Message) -> String {
        let mut text = match (&message.title, &message.message) {
            (Some(title), Some(body)) => format!("{}: {}", title, body),
            (Some(title), None) => title.clone(),
            (None, Some(body)) => body.clone(),
            (None, None) => String::new(),
        };
        if let Some(recipients) = message.recipients.as_ref().filter(|r| !r.is_empty()) {
            text.push_str(&format!(" (to: {})", recipients.join(", ")));
        }
        text
    }
}

/// A formatter for Slack incoming webhooks: bold title, recipients as mentions.
pub struct SlackTextFormatter;

impl TextFormatter for SlackTextFormatter {
    fn format_message(&self, message: &Message) -> String {
        let mut parts = Vec::new();
        if let Some(title) = &message.title {
            parts.push(format!("*{}*", escape_slack(title)));
        }
        if let Some(body) = &message.message {
            parts.push(escape_slack(body));
        }
        if let Some(recipients) = message.recipients.as_ref().filter(|r| !r.is_empty()) {
            let mentions: Vec<String> = recipients.iter().map(|r| format!("<@{}>", r)).collect();
            parts.push(mentions.join(" "));
        }
        parts.join("\n")
    }
}

/// Escapes the three characters Slack treats as control sequences.
fn escape_slack(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}
