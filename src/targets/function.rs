//! Adapter for plain send functions.
//!
//! Wraps a closure into the `NotifyTarget` contract so a notifier that is
//! just a function can be registered like any other target.

use crate::core::{Message, NotifyTarget, TargetDescription};

pub struct FnTarget<F> {
    description: TargetDescription,
    send: F,
}

impl<F> FnTarget<F>
where
    F: Fn(&Message) -> anyhow::Result<()> + Send + Sync,
{
    pub fn new(send: F) -> Self {
        Self {
            description: TargetDescription::default(),
            send,
        }
    }

    pub fn with_description(mut self, description: TargetDescription) -> Self {
        self.description = description;
        self
    }
}

impl<F> NotifyTarget for FnTarget<F>
where
    F: Fn(&Message) -> anyhow::Result<()> + Send + Sync,
{
    fn description(&self) -> TargetDescription {
        self.description.clone()
    }

    fn send_message(&self, message: &Message) -> anyhow::Result<()> {
        (self.send)(message)
    }
}
