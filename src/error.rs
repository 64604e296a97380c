//! Errors surfaced to callers of the dispatch service.

use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("no notify target registered as '{0}'")]
    TargetNotFound(String),

    #[error("invalid send_message call: {0}")]
    Validation(String),

    #[error("notify target '{identity}' failed to send: {source}")]
    SendFailure {
        identity: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("notify target '{identity}' did not confirm within {timeout:?}")]
    Timeout { identity: String, timeout: Duration },
}

impl DispatchError {
    pub fn send_failure(identity: impl Into<String>, source: anyhow::Error) -> Self {
        Self::SendFailure {
            identity: identity.into(),
            source,
        }
    }

    /// Returns true if the error was raised before any state was touched.
    pub fn is_rejection(&self) -> bool {
        matches!(self, Self::TargetNotFound(_) | Self::Validation(_))
    }
}
