//! Device identity types

use serde::{Deserialize, Serialize};
use std::fmt;

/// Wire value meaning "no device selected"
pub const NONE_DEVICE: &str = "none";

/// Device class a session manages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceKind {
    /// Video input
    Camera,
    /// Audio input
    Microphone,
}

impl DeviceKind {
    /// Every kind, camera first
    pub const ALL: [DeviceKind; 2] = [DeviceKind::Camera, DeviceKind::Microphone];

    /// Kind string reported by platform device enumeration
    pub fn platform_kind(&self) -> &'static str {
        match self {
            DeviceKind::Camera => "videoinput",
            DeviceKind::Microphone => "audioinput",
        }
    }

    /// Parse a platform enumeration kind; output devices are not managed
    pub fn from_platform_kind(kind: &str) -> Option<Self> {
        match kind {
            "videoinput" => Some(DeviceKind::Camera),
            "audioinput" => Some(DeviceKind::Microphone),
            _ => None,
        }
    }

    /// Short lowercase name
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceKind::Camera => "camera",
            DeviceKind::Microphone => "microphone",
        }
    }
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One enumerated input device.
///
/// `id` is assigned by the platform and may change across permission grants;
/// `label` is the stable, human-readable identity used across tabs. Labels are
/// empty until permission has been granted at least once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceDescriptor {
    /// Platform device id
    pub id: String,
    /// Human-readable label, possibly empty
    pub label: String,
    /// Device class
    pub kind: DeviceKind,
}

impl DeviceDescriptor {
    /// Create a descriptor
    pub fn new(kind: DeviceKind, id: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
            kind,
        }
    }

    /// Whether the platform exposed a usable label
    pub fn has_label(&self) -> bool {
        !self.label.trim().is_empty()
    }
}

/// Constraint handed to the platform when opening a stream
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DeviceTarget {
    /// Exactly this device id
    Exact(String),
    /// Whatever device of the kind the platform picks
    Any,
}

impl DeviceTarget {
    /// Exact target for a device id
    pub fn exact(id: impl Into<String>) -> Self {
        DeviceTarget::Exact(id.into())
    }

    /// Requested device id, if specific
    pub fn exact_id(&self) -> Option<&str> {
        match self {
            DeviceTarget::Exact(id) => Some(id),
            DeviceTarget::Any => None,
        }
    }

    /// Whether a specific device was requested
    pub fn is_specific(&self) -> bool {
        matches!(self, DeviceTarget::Exact(_))
    }
}

impl fmt::Display for DeviceTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceTarget::Exact(id) => f.write_str(id),
            DeviceTarget::Any => f.write_str("any"),
        }
    }
}

/// Target of a switch intent
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SwitchTarget {
    /// Switch to this device id
    Device(String),
    /// Turn the device off
    None,
}

impl SwitchTarget {
    /// Parse the wire form, where `"none"` and the empty string turn the device off
    pub fn parse(id: &str) -> Self {
        match id.trim() {
            "" | NONE_DEVICE => SwitchTarget::None,
            other => SwitchTarget::Device(other.to_string()),
        }
    }

    /// Wire form of this target
    pub fn as_wire(&self) -> &str {
        match self {
            SwitchTarget::Device(id) => id,
            SwitchTarget::None => NONE_DEVICE,
        }
    }

    /// Platform constraint, or `None` when the device should be off
    pub fn device_target(&self) -> Option<DeviceTarget> {
        match self {
            SwitchTarget::Device(id) => Some(DeviceTarget::Exact(id.clone())),
            SwitchTarget::None => None,
        }
    }
}

impl From<Option<&DeviceDescriptor>> for SwitchTarget {
    fn from(device: Option<&DeviceDescriptor>) -> Self {
        match device {
            Some(device) => SwitchTarget::Device(device.id.clone()),
            None => SwitchTarget::None,
        }
    }
}
