//! Platform failures and their translation into the session error taxonomy

use devsync_core::{DeviceKind, DeviceTarget, SyncError};
use thiserror::Error;

/// Raw failure reported by the media platform, shaped like a DOMException
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{name}: {message}")]
pub struct PlatformError {
    /// Exception name, e.g. `NotReadableError`
    pub name: String,
    /// Human-readable message
    pub message: String,
}

/// How the session should react to a platform failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Device held by another process; retry with backoff
    Busy,
    /// Stale id or unsatisfiable constraint; fall back to any device
    NotFound,
    /// Access refused; terminal for this attempt
    PermissionDenied,
    /// Host context torn down; abort silently
    ContextGone,
    /// Anything else; fall back to any device
    Other,
}

impl PlatformError {
    /// Create a platform error
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message: message.into(),
        }
    }

    /// Device already in use
    pub fn busy() -> Self {
        Self::new("NotReadableError", "Could not start video source")
    }

    /// Requested device does not exist
    pub fn not_found() -> Self {
        Self::new("NotFoundError", "Requested device not found")
    }

    /// Exact device constraint cannot be satisfied
    pub fn overconstrained() -> Self {
        Self::new("OverconstrainedError", "Constraints could not be satisfied")
    }

    /// User or policy refused access
    pub fn permission_denied() -> Self {
        Self::new("NotAllowedError", "Permission denied")
    }

    /// Extension context was invalidated
    pub fn context_invalidated() -> Self {
        Self::new("Error", "Extension context invalidated.")
    }

    /// Classify the failure
    pub fn failure_class(&self) -> FailureClass {
        if self.message.contains("Extension context invalidated") {
            return FailureClass::ContextGone;
        }

        if self.message.contains("already in use")
            || self.message.contains("Could not start video source")
        {
            return FailureClass::Busy;
        }

        match self.name.as_str() {
            "NotReadableError" | "TrackStartError" => FailureClass::Busy,
            "NotFoundError" | "DevicesNotFoundError" | "OverconstrainedError"
            | "ConstraintNotSatisfiedError" => FailureClass::NotFound,
            "NotAllowedError" | "PermissionDeniedError" | "SecurityError" => {
                FailureClass::PermissionDenied
            }
            _ => FailureClass::Other,
        }
    }

    /// Translate into the session error taxonomy
    pub fn to_sync_error(&self, kind: DeviceKind, target: &DeviceTarget, attempts: u32) -> SyncError {
        match self.failure_class() {
            FailureClass::Busy => SyncError::DeviceBusy {
                device: target.to_string(),
                attempts,
            },
            FailureClass::NotFound => SyncError::DeviceNotFound {
                device: target.to_string(),
            },
            FailureClass::PermissionDenied => SyncError::PermissionDenied { kind },
            FailureClass::ContextGone => SyncError::ContextGone,
            FailureClass::Other => SyncError::Platform {
                reason: self.to_string(),
            },
        }
    }
}
