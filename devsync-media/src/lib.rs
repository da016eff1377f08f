//! # devsync media
//!
//! Device enumeration and stream ownership for one tab: the device
//! directory resolves devices by id or stable label, and a stream session
//! owns at most one live stream per device kind, with bounded busy retries,
//! a single fallback, and post-hoc discard of superseded acquisitions.

#![warn(clippy::all)]

pub mod directory;
pub mod error;
pub mod mock;
pub mod platform;
pub mod session;

// Re-export main types
pub use directory::{DeviceDirectory, LabelResolution};
pub use error::{FailureClass, PlatformError};
pub use mock::{MockPlatform, MockTrack};
pub use platform::{MediaPlatform, MediaStream, MediaTrack};
pub use session::{AcquireOptions, SessionPorts, SessionSnapshot, StreamSession, Ticket};
