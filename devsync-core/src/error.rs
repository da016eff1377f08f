//! Error types for device session coordination

use crate::device::DeviceKind;
use thiserror::Error;

/// Main error type for devsync operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SyncError {
    /// Device locked by another process
    #[error("Device busy: {device} still in use after {attempts} attempt(s)")]
    DeviceBusy {
        /// Device id or "any"
        device: String,
        /// Attempts made before giving up
        attempts: u32,
    },

    /// Stale or unknown device id
    #[error("Device not found: {device}")]
    DeviceNotFound {
        /// Device id, label or "any"
        device: String,
    },

    /// User or policy refused access
    #[error("Permission denied for {kind}")]
    PermissionDenied {
        /// Device class that was refused
        kind: DeviceKind,
    },

    /// The hosting tab or extension context was torn down
    #[error("Host context is gone")]
    ContextGone,

    /// A newer intent replaced this one
    #[error("Superseded: acquisition of {target} replaced by a newer intent")]
    Superseded {
        /// Target of the discarded acquisition
        target: String,
    },

    /// Unclassified platform failure
    #[error("Platform error: {reason}")]
    Platform {
        /// Reason reported by the platform
        reason: String,
    },

    /// Cross-tab message delivery failed
    #[error("Coordinator error: {reason}")]
    Coordinator {
        /// Reason for the failure
        reason: String,
    },

    /// Persisted state could not be read or written
    #[error("Storage error: {reason}")]
    Storage {
        /// Reason for the failure
        reason: String,
    },

    /// Invalid configuration provided
    #[error("Invalid configuration: {message}")]
    InvalidConfiguration {
        /// Error message
        message: String,
    },

    /// Operation not valid in the current state
    #[error("Invalid state: expected {expected}, got {actual}")]
    InvalidState {
        /// Expected state
        expected: String,
        /// Actual state
        actual: String,
    },
}

/// Result type alias for devsync operations
pub type SyncResult<T> = Result<T, SyncError>;

impl SyncError {
    /// Whether the bounded retry loop should try the same device again
    pub fn is_retryable(&self) -> bool {
        matches!(self, SyncError::DeviceBusy { .. })
    }

    /// Whether the error warrants a user-facing notice
    pub fn is_user_visible(&self) -> bool {
        matches!(
            self,
            SyncError::DeviceBusy { .. } | SyncError::PermissionDenied { .. }
        )
    }

    /// Whether the error must be swallowed without surfacing anything
    pub fn is_silent(&self) -> bool {
        matches!(self, SyncError::ContextGone | SyncError::Superseded { .. })
    }

    /// Get error category
    pub fn category(&self) -> ErrorCategory {
        match self {
            SyncError::DeviceBusy { .. } => ErrorCategory::Device,
            SyncError::DeviceNotFound { .. } => ErrorCategory::Device,
            SyncError::PermissionDenied { .. } => ErrorCategory::Permission,
            SyncError::ContextGone => ErrorCategory::Lifecycle,
            SyncError::Superseded { .. } => ErrorCategory::Lifecycle,
            SyncError::Platform { .. } => ErrorCategory::Platform,
            SyncError::Coordinator { .. } => ErrorCategory::Coordination,
            SyncError::Storage { .. } => ErrorCategory::Coordination,
            SyncError::InvalidConfiguration { .. } => ErrorCategory::Configuration,
            SyncError::InvalidState { .. } => ErrorCategory::State,
        }
    }
}

/// Error categories for classification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Device availability errors
    Device,
    /// Permission errors
    Permission,
    /// Context teardown and supersession
    Lifecycle,
    /// Unclassified platform errors
    Platform,
    /// Message bus and persisted state errors
    Coordination,
    /// Configuration and parameter errors
    Configuration,
    /// State management errors
    State,
}
