//! Per-kind session state machine states

use std::fmt;

/// Lifecycle state of one stream session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    /// No stream and nothing in flight
    #[default]
    Idle,
    /// Waiting on the platform for a stream
    Acquiring,
    /// Holding a live stream
    Active,
    /// Tearing the live stream down
    Deactivating,
    /// Acquisition and fallback both failed
    Failed,
}

impl SessionState {
    /// Whether a live stream is installed
    pub fn is_active(&self) -> bool {
        matches!(self, SessionState::Active)
    }

    /// Whether the session is busy with the platform
    pub fn is_transitioning(&self) -> bool {
        matches!(self, SessionState::Acquiring | SessionState::Deactivating)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Idle => "idle",
            SessionState::Acquiring => "acquiring",
            SessionState::Active => "active",
            SessionState::Deactivating => "deactivating",
            SessionState::Failed => "failed",
        };
        f.write_str(name)
    }
}
