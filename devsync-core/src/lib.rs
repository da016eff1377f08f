//! # devsync core
//!
//! Shared vocabulary for cross-tab media device coordination: device
//! identity, activation intents, session states, events, timing
//! configuration, the error taxonomy and the host context lifecycle.

#![deny(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod context;
pub mod device;
pub mod error;
pub mod event;
pub mod intent;
pub mod state;

// Re-export main types
pub use config::SessionTiming;
pub use context::HostContext;
pub use device::{DeviceDescriptor, DeviceKind, DeviceTarget, SwitchTarget, NONE_DEVICE};
pub use error::{ErrorCategory, SyncError, SyncResult};
pub use event::{Event, Notice};
pub use intent::{ActivationIntent, IntentAction, IntentReason};
pub use state::SessionState;
