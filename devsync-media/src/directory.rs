//! Device directory
//!
//! Enumerates input devices on demand and resolves devices by stable label.
//! Ids are only meaningful inside this tab and permission grant; labels
//! travel between tabs. Before the first permission grant labels are empty,
//! in which case label lookups report no match and callers fall back to the
//! first device of the kind.

use crate::error::{FailureClass, PlatformError};
use crate::platform::MediaPlatform;
use devsync_core::{DeviceDescriptor, DeviceKind, DeviceTarget, HostContext, SyncError, SyncResult};
use parking_lot::RwLock;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, warn};

/// Outcome of resolving a label to a local device
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LabelResolution {
    /// A device carries exactly this label
    Matched(DeviceDescriptor),
    /// No match; first device of the kind instead
    Fallback(DeviceDescriptor),
    /// No device of the kind at all
    NoDevices,
}

impl LabelResolution {
    /// Resolved device, if any
    pub fn device(&self) -> Option<&DeviceDescriptor> {
        match self {
            LabelResolution::Matched(device) | LabelResolution::Fallback(device) => Some(device),
            LabelResolution::NoDevices => None,
        }
    }

    /// Whether the label itself matched
    pub fn is_match(&self) -> bool {
        matches!(self, LabelResolution::Matched(_))
    }
}

/// Lazily refreshed view of the platform's input devices
pub struct DeviceDirectory {
    platform: Arc<dyn MediaPlatform>,
    context: HostContext,
    cache: RwLock<Vec<DeviceDescriptor>>,
}

impl DeviceDirectory {
    /// Create a directory over a platform
    pub fn new(platform: Arc<dyn MediaPlatform>, context: HostContext) -> Self {
        Self {
            platform,
            context,
            cache: RwLock::new(Vec::new()),
        }
    }

    /// Re-query the platform and return every input device
    pub async fn refresh(&self) -> SyncResult<Vec<DeviceDescriptor>> {
        self.context.ensure_alive()?;

        let devices = self
            .platform
            .enumerate_devices()
            .await
            .map_err(|e| enumeration_error(&e))?;
        self.context.ensure_alive()?;

        let mut seen = HashSet::new();
        let devices: Vec<DeviceDescriptor> = devices
            .into_iter()
            .filter(|device| {
                let fresh = seen.insert((device.kind, device.id.clone()));
                if !fresh {
                    warn!(kind = %device.kind, device_id = %device.id, "Duplicate device id in enumeration");
                }
                fresh
            })
            .collect();

        debug!(count = devices.len(), "Device directory refreshed");
        *self.cache.write() = devices.clone();
        Ok(devices)
    }

    /// Fresh list of devices of one kind, in platform order
    pub async fn list(&self, kind: DeviceKind) -> SyncResult<Vec<DeviceDescriptor>> {
        Ok(self
            .refresh()
            .await?
            .into_iter()
            .filter(|device| device.kind == kind)
            .collect())
    }

    /// Devices of one kind from the last refresh
    pub fn cached(&self, kind: DeviceKind) -> Vec<DeviceDescriptor> {
        self.cache
            .read()
            .iter()
            .filter(|device| device.kind == kind)
            .cloned()
            .collect()
    }

    /// Device with exactly this label, after a refresh
    pub async fn find_by_label(
        &self,
        kind: DeviceKind,
        label: &str,
    ) -> SyncResult<Option<DeviceDescriptor>> {
        let devices = self.list(kind).await?;
        Ok(match_label(&devices, label).cloned())
    }

    /// Resolve a label, falling back to the first device of the kind
    pub async fn resolve_label(&self, kind: DeviceKind, label: &str) -> SyncResult<LabelResolution> {
        let devices = self.list(kind).await?;
        if let Some(device) = match_label(&devices, label) {
            return Ok(LabelResolution::Matched(device.clone()));
        }

        Ok(match devices.into_iter().next() {
            Some(first) => {
                warn!(%kind, label, fallback = %first.label, "No device matches label, using first available");
                LabelResolution::Fallback(first)
            }
            None => LabelResolution::NoDevices,
        })
    }

    /// First device of a kind, after a refresh
    pub async fn first(&self, kind: DeviceKind) -> SyncResult<Option<DeviceDescriptor>> {
        Ok(self.list(kind).await?.into_iter().next())
    }

    /// Whether the last refresh still lists this device id
    pub fn contains(&self, kind: DeviceKind, id: &str) -> bool {
        self.cache
            .read()
            .iter()
            .any(|device| device.kind == kind && device.id == id)
    }

    /// Turn a cached device id back into an open constraint
    pub fn target_for(&self, kind: DeviceKind, id: &str) -> Option<DeviceTarget> {
        self.contains(kind, id).then(|| DeviceTarget::exact(id))
    }
}

/// Exact label match; redacted (empty) labels never match
pub fn match_label<'a>(devices: &'a [DeviceDescriptor], label: &str) -> Option<&'a DeviceDescriptor> {
    if label.is_empty() {
        return None;
    }
    devices
        .iter()
        .find(|device| device.has_label() && device.label == label)
}

fn enumeration_error(error: &PlatformError) -> SyncError {
    match error.failure_class() {
        FailureClass::ContextGone => SyncError::ContextGone,
        _ => SyncError::Platform {
            reason: format!("device enumeration failed: {}", error),
        },
    }
}
