//! Core domain types and the notification target contract
//!
//! This module defines the data that flows through a dispatch (`Message`),
//! the advisory metadata a target declares about itself, and the
//! `NotifyTarget` trait every notification endpoint implements.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{BitOr, BitOrAssign};
use std::str::FromStr;

/// Free-form structured payload attached to a message.
pub type MessageData = serde_json::Map<String, serde_json::Value>;

/// Optional message fields a target declares it understands.
///
/// The flags are advisory: the dispatcher only checks them when feature
/// enforcement is switched on in the configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct NotifyFeature(u8);

impl NotifyFeature {
    pub const MESSAGE: Self = Self(1);
    pub const TITLE: Self = Self(1 << 1);
    pub const RECIPIENTS: Self = Self(1 << 2);
    pub const DATA: Self = Self(1 << 3);

    const NAMED: [(Self, &'static str); 4] = [
        (Self::MESSAGE, "message"),
        (Self::TITLE, "title"),
        (Self::RECIPIENTS, "recipients"),
        (Self::DATA, "data"),
    ];

    pub const fn empty() -> Self {
        Self(0)
    }

    pub const fn all() -> Self {
        Self(Self::MESSAGE.0 | Self::TITLE.0 | Self::RECIPIENTS.0 | Self::DATA.0)
    }

    pub const fn bits(self) -> u8 {
        self.0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Returns true if every flag in `other` is also set in `self`.
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Returns the flags of `required` that `self` lacks.
    pub const fn missing(self, required: Self) -> Self {
        Self(required.0 & !self.0)
    }

    /// Names of the set flags, in declaration order.
    pub fn names(self) -> Vec<&'static str> {
        Self::NAMED
            .iter()
            .filter(|(flag, _)| self.contains(*flag))
            .map(|(_, name)| *name)
            .collect()
    }
}

impl BitOr for NotifyFeature {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for NotifyFeature {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl fmt::Display for NotifyFeature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return f.write_str("none");
        }
        f.write_str(&self.names().join("|"))
    }
}

impl FromStr for NotifyFeature {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lowered = s.trim().to_ascii_lowercase();
        Self::NAMED
            .iter()
            .find(|(_, name)| *name == lowered)
            .map(|(flag, _)| *flag)
            .ok_or_else(|| anyhow::anyhow!("unknown notify feature: {s}"))
    }
}

impl Serialize for NotifyFeature {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.names().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for NotifyFeature {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let names = Vec::<String>::deserialize(deserializer)?;
        names.iter().try_fold(Self::empty(), |acc, name| {
            name.parse::<Self>()
                .map(|flag| acc | flag)
                .map_err(serde::de::Error::custom)
        })
    }
}

/// Classification tag used for display and default naming.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceClass {
    MessageNotifier,
}

impl DeviceClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceClass::MessageNotifier => "message_notifier",
        }
    }

    /// Human readable name used for targets that carry no explicit name.
    pub fn display_name(&self) -> &'static str {
        match self {
            DeviceClass::MessageNotifier => "Message notifier",
        }
    }
}

impl fmt::Display for DeviceClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeviceClass {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "message_notifier" => Ok(DeviceClass::MessageNotifier),
            other => anyhow::bail!("unknown device class: {other}"),
        }
    }
}

impl Serialize for DeviceClass {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for DeviceClass {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Static descriptor a target declares at registration time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TargetDescription {
    /// Explicit display name.
    pub name: Option<String>,
    pub device_class: Option<DeviceClass>,
    pub supported_features: NotifyFeature,
}

impl TargetDescription {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Default::default()
        }
    }

    pub fn with_device_class(mut self, device_class: DeviceClass) -> Self {
        self.device_class = Some(device_class);
        self
    }

    pub fn with_features(mut self, features: NotifyFeature) -> Self {
        self.supported_features = features;
        self
    }
}

/// The fully resolved arguments of a single send.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Message {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recipients: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<MessageData>,
}

impl Message {
    pub fn text(message: impl Into<String>) -> Self {
        Self {
            message: Some(message.into()),
            ..Default::default()
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_recipients<I, S>(mut self, recipients: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.recipients = Some(recipients.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_data(mut self, data: MessageData) -> Self {
        self.data = Some(data);
        self
    }

    /// The feature flags a target must advertise to accept every field present.
    pub fn required_features(&self) -> NotifyFeature {
        let mut required = NotifyFeature::empty();
        if self.message.is_some() {
            required |= NotifyFeature::MESSAGE;
        }
        if self.title.is_some() {
            required |= NotifyFeature::TITLE;
        }
        if self.recipients.is_some() {
            required |= NotifyFeature::RECIPIENTS;
        }
        if self.data.is_some() {
            required |= NotifyFeature::DATA;
        }
        required
    }
}

/// One way of delivering a notification.
///
/// `send_message` may block on network or disk I/O; the dispatcher always
/// runs it on the offload pool. Overlapping calls to the same target are not
/// serialized, so implementations that are not reentrant must guard
/// themselves.
pub trait NotifyTarget: Send + Sync {
    /// Static metadata declared by the implementation.
    fn description(&self) -> TargetDescription {
        TargetDescription::default()
    }

    /// Explicit device class override. Takes precedence over the description.
    fn device_class(&self) -> Option<DeviceClass> {
        None
    }

    /// Performs the delivery.
    fn send_message(&self, message: &Message) -> anyhow::Result<()>;

    /// Releases resources before the target is dropped from the registry.
    fn teardown(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Resolves the device class of a target: override, then description, then none.
pub fn resolve_device_class(target: &dyn NotifyTarget) -> Option<DeviceClass> {
    target
        .device_class()
        .or_else(|| target.description().device_class)
}

/// Display name of a target. Unnamed targets with a device class are named
/// after it; everything else falls back to the identity.
pub fn display_name(identity: &str, target: &dyn NotifyTarget) -> String {
    if let Some(name) = target.description().name {
        return name;
    }
    match resolve_device_class(target) {
        Some(class) => class.display_name().to_string(),
        None => identity.to_string(),
    }
}

/// Derives a stable identity from a display name.
pub fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    let mut pending_separator = false;
    for c in name.chars() {
        if c.is_ascii_alphanumeric() {
            if pending_separator && !slug.is_empty() {
                slug.push('_');
            }
            pending_separator = false;
            slug.push(c.to_ascii_lowercase());
        } else {
            pending_separator = true;
        }
    }
    slug
}
