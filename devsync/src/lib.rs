//! # devsync - cross-tab camera and microphone sessions
//!
//! devsync keeps one camera stream and one microphone stream consistent
//! across the tabs and surfaces of a recorder: a tab owns at most one live
//! stream per device kind, follows device choices made in other tabs by
//! stable label, survives busy virtual cameras with bounded retries, and
//! never drops its camera on an unforced deactivation while recording.
//!
//! ## Key Features
//!
//! - **Single owner per kind**: stop-then-acquire with a settle delay
//! - **Label-based identity**: device ids stay local, labels travel
//! - **Busy tolerance**: bounded retries, then one fallback to any device
//! - **Superseded discard**: late acquisitions are stopped, never installed
//! - **Hot-plug**: a vanished device is replaced without user action
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use devsync::{ControllerConfig, InboundMessage, MemoryBus, MemoryStore, MockPlatform, TabController};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     devsync::init_logging("info")?;
//!
//!     let controller = TabController::new(
//!         Arc::new(MockPlatform::new()),
//!         Arc::new(MemoryBus::new()),
//!         Arc::new(MemoryStore::new()),
//!         ControllerConfig::default(),
//!     )?;
//!
//!     // Resolve camera and microphone from persisted state
//!     controller.start().await?;
//!
//!     // Follow a device choice made in another tab
//!     controller
//!         .handle_message(InboundMessage::ActivateCameraByLabel {
//!             camera_label: "Logi Webcam".to_string(),
//!             is_tab_switch: true,
//!         })
//!         .await?;
//!
//!     controller.shutdown();
//!     Ok(())
//! }
//! ```

#![deny(missing_docs)]
#![warn(clippy::all)]

// Re-export core types for easy access
pub use devsync_core::{
    ActivationIntent, DeviceDescriptor, DeviceKind, DeviceTarget, ErrorCategory, Event,
    HostContext, IntentAction, IntentReason, Notice, SessionState, SessionTiming, SwitchTarget,
    SyncError, SyncResult, NONE_DEVICE,
};

pub use devsync_media::{
    AcquireOptions, DeviceDirectory, LabelResolution, MediaPlatform, MediaStream, MediaTrack,
    MockPlatform, PlatformError, SessionSnapshot, StreamSession,
};

pub use devsync_signaling::{
    CoordinatorBus, InboundMessage, KeyValueStore, MemoryBus, MemoryStore, OutboundMessage,
    PersistedState, StoreChange,
};

// Public API modules
pub mod config;
pub mod controller;
pub mod debounce;
pub mod logging;
pub mod policy;
pub mod surface;

// Re-export main API types
pub use config::ControllerConfig;
pub use controller::{ColdStart, Outcome, TabController};
pub use logging::init_logging;
pub use policy::{ActivationPolicy, Decision};
pub use surface::PipSurface;
