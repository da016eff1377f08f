//! Session events and user-facing notices

use crate::device::DeviceKind;

/// Non-blocking message shown to the user
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Notice {
    /// A user-selected switch has started
    Switching,
    /// A stream came up after at least one busy retry
    SwitchedAfterRetry,
    /// The device stayed busy through every retry
    DeviceBusy,
    /// Access was refused
    PermissionDenied,
    /// No device of the kind is present
    NoDeviceAvailable,
}

impl Notice {
    /// Default English text
    pub fn message(&self) -> &'static str {
        match self {
            Notice::Switching => "Switching camera...",
            Notice::SwitchedAfterRetry => "Camera switched successfully",
            Notice::DeviceBusy => {
                "Camera is in use by another application. Please close other camera apps and try again."
            }
            Notice::PermissionDenied => "Device is unavailable or permission denied",
            Notice::NoDeviceAvailable => "No device available",
        }
    }
}

/// Events published to local UI state
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// A stream is installed, freshly acquired or reused
    StreamActivated {
        /// Device class
        kind: DeviceKind,
        /// Resolved device id
        device_id: String,
        /// Resolved device label
        label: String,
        /// Whether an existing stream was kept
        reused: bool,
    },
    /// The stream of a kind was torn down
    StreamReleased {
        /// Device class
        kind: DeviceKind,
    },
    /// Acquisition and fallback failed
    AcquisitionFailed {
        /// Device class
        kind: DeviceKind,
        /// Failure description
        reason: String,
    },
    /// A stream resolved after being superseded and was stopped
    AcquisitionDiscarded {
        /// Device class
        kind: DeviceKind,
        /// Device of the discarded stream
        device_id: String,
    },
    /// An unforced deactivate was ignored because a recording is running
    DeactivationSuppressed {
        /// Device class
        kind: DeviceKind,
    },
    /// The active device disappeared and a replacement was chosen
    DeviceReplaced {
        /// Device class
        kind: DeviceKind,
        /// Device that went away
        previous: String,
        /// Replacement, or `None` when nothing is left
        replacement: Option<String>,
    },
    /// User-facing notice
    Notice {
        /// Device class
        kind: DeviceKind,
        /// Notice to show
        notice: Notice,
    },
    /// Picture-in-picture state changed
    PipChanged {
        /// Whether the floating surface is shown
        active: bool,
    },
}

impl Event {
    /// Get the event type as a string
    pub fn event_type(&self) -> &'static str {
        match self {
            Event::StreamActivated { .. } => "stream_activated",
            Event::StreamReleased { .. } => "stream_released",
            Event::AcquisitionFailed { .. } => "acquisition_failed",
            Event::AcquisitionDiscarded { .. } => "acquisition_discarded",
            Event::DeactivationSuppressed { .. } => "deactivation_suppressed",
            Event::DeviceReplaced { .. } => "device_replaced",
            Event::Notice { .. } => "notice",
            Event::PipChanged { .. } => "pip_changed",
        }
    }

    /// Device class the event concerns, if any
    pub fn kind(&self) -> Option<DeviceKind> {
        match self {
            Event::StreamActivated { kind, .. }
            | Event::StreamReleased { kind }
            | Event::AcquisitionFailed { kind, .. }
            | Event::AcquisitionDiscarded { kind, .. }
            | Event::DeactivationSuppressed { kind }
            | Event::DeviceReplaced { kind, .. }
            | Event::Notice { kind, .. } => Some(*kind),
            Event::PipChanged { .. } => None,
        }
    }
}
