/// notifyhub - in-process notification dispatch
///
/// This library provides a registry of notify targets, a single dispatch
/// entry point that stamps each target's last activation, and a bounded
/// worker pool that runs the (possibly blocking) sends off the caller's path.
pub mod app;
pub mod cli;
pub mod config;
pub mod core;
pub mod dispatch;
pub mod error;
pub mod events;
pub mod formatting;
pub mod offload;
pub mod registry;
pub mod state;
pub mod targets;
pub mod task_manager;

// Re-export core types for convenience
pub use crate::core::*;
pub use crate::dispatch::{Dispatcher, SendMessageCall};
pub use crate::error::DispatchError;
pub use crate::offload::SendHandle;
pub use crate::registry::{TargetInfo, TargetRegistry};
