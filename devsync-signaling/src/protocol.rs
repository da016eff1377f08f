//! Coordinator protocol messages
//!
//! Wire names follow the extension's message `type` strings; payload fields
//! are camelCase.

use devsync_core::{ActivationIntent, DeviceKind, IntentReason, SwitchTarget, SyncError, SyncResult};
use serde::{Deserialize, Serialize};

/// Messages delivered from the broker (or a peer tab) to this tab
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum InboundMessage {
    /// Switch the camera to a device id or `"none"`
    SwitchCamera {
        /// Device id or `"none"`
        id: String,
    },
    /// Activate the local camera carrying this label
    #[serde(rename_all = "camelCase")]
    ActivateCameraByLabel {
        /// Stable device label
        camera_label: String,
        /// Raised by a tab switch during recording
        #[serde(default)]
        is_tab_switch: bool,
    },
    /// Stop the camera, subject to the recording suppression rule
    DeactivateCamera {
        /// Stop even while recording
        #[serde(default)]
        force: bool,
    },
    /// A peer tab chose a different camera
    #[serde(rename_all = "camelCase")]
    CameraSelectionChanged {
        /// Label chosen by the peer
        camera_label: String,
    },
    /// Switch the microphone to a device id or `"none"`
    SwitchMic {
        /// Device id or `"none"`
        id: String,
    },
    /// Stop the microphone, subject to the recording suppression rule
    DeactivateMic {
        /// Stop even while recording
        #[serde(default)]
        force: bool,
    },
    /// The popup hosting the preview closed
    PopupClosed,
    /// Toggle the floating picture-in-picture surface
    TogglePip,
    /// Capture surface changed
    SetSurface {
        /// Surface name, `"monitor"` requests picture-in-picture
        surface: String,
    },
    /// Camera toggled from the in-page toolbar
    CameraToggledToolbar {
        /// Whether the camera should be on
        active: bool,
        /// Device to switch to when turning on
        #[serde(default)]
        id: Option<String>,
    },
}

impl InboundMessage {
    /// Parse a JSON message
    pub fn from_json(json: &str) -> SyncResult<Self> {
        serde_json::from_str(json).map_err(|e| SyncError::Coordinator {
            reason: format!("malformed inbound message: {}", e),
        })
    }

    /// Wire `type` of this message
    pub fn message_type(&self) -> &'static str {
        match self {
            InboundMessage::SwitchCamera { .. } => "switch-camera",
            InboundMessage::ActivateCameraByLabel { .. } => "activate-camera-by-label",
            InboundMessage::DeactivateCamera { .. } => "deactivate-camera",
            InboundMessage::CameraSelectionChanged { .. } => "camera-selection-changed",
            InboundMessage::SwitchMic { .. } => "switch-mic",
            InboundMessage::DeactivateMic { .. } => "deactivate-mic",
            InboundMessage::PopupClosed => "popup-closed",
            InboundMessage::TogglePip => "toggle-pip",
            InboundMessage::SetSurface { .. } => "set-surface",
            InboundMessage::CameraToggledToolbar { .. } => "camera-toggled-toolbar",
        }
    }

    /// Activation intent carried by this message; surface messages carry none
    pub fn intent(&self) -> Option<ActivationIntent> {
        let intent = match self {
            InboundMessage::SwitchCamera { id } => {
                ActivationIntent::switch(DeviceKind::Camera, SwitchTarget::parse(id))
            }
            InboundMessage::ActivateCameraByLabel {
                camera_label,
                is_tab_switch,
            } => ActivationIntent::activate_by_label(
                DeviceKind::Camera,
                camera_label.clone(),
                *is_tab_switch,
            ),
            InboundMessage::DeactivateCamera { force } => {
                ActivationIntent::deactivate(DeviceKind::Camera, *force)
            }
            InboundMessage::CameraSelectionChanged { camera_label } => {
                ActivationIntent::activate_by_label(DeviceKind::Camera, camera_label.clone(), false)
            }
            InboundMessage::SwitchMic { id } => {
                ActivationIntent::switch(DeviceKind::Microphone, SwitchTarget::parse(id))
            }
            InboundMessage::DeactivateMic { force } => {
                ActivationIntent::deactivate(DeviceKind::Microphone, *force)
            }
            InboundMessage::PopupClosed => ActivationIntent::deactivate(DeviceKind::Camera, true),
            InboundMessage::CameraToggledToolbar { active, id } => match (active, id) {
                (true, Some(id)) => {
                    ActivationIntent::switch(DeviceKind::Camera, SwitchTarget::parse(id))
                }
                _ => ActivationIntent::deactivate(DeviceKind::Camera, true)
                    .with_reason(IntentReason::UserSelect),
            },
            InboundMessage::TogglePip | InboundMessage::SetSurface { .. } => return None,
        };
        Some(intent)
    }
}

/// Messages a tab sends to the broker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum OutboundMessage {
    /// Which tab and camera currently own the camera
    #[serde(rename_all = "camelCase")]
    SetCameraActiveTab {
        /// Whether this tab holds the camera
        active: bool,
        /// Device id in use
        #[serde(default, skip_serializing_if = "Option::is_none")]
        default_device_id: Option<String>,
        /// Device label in use
        #[serde(default, skip_serializing_if = "Option::is_none")]
        label: Option<String>,
    },
    /// Which tab and microphone currently own the microphone
    #[serde(rename_all = "camelCase")]
    SetMicActiveTab {
        /// Whether this tab holds the microphone
        active: bool,
        /// Device id in use
        #[serde(default, skip_serializing_if = "Option::is_none")]
        default_device_id: Option<String>,
        /// Device label in use
        #[serde(default, skip_serializing_if = "Option::is_none")]
        label: Option<String>,
    },
    /// Picture-in-picture surface opened
    PipStarted,
    /// Picture-in-picture surface closed or was refused
    PipEnded,
    /// Ask the broker for the last chosen camera label
    GetStoredCamera,
}

impl OutboundMessage {
    /// Active-tab report for a device kind
    pub fn active_tab(
        kind: DeviceKind,
        active: bool,
        default_device_id: Option<String>,
        label: Option<String>,
    ) -> Self {
        match kind {
            DeviceKind::Camera => OutboundMessage::SetCameraActiveTab {
                active,
                default_device_id,
                label,
            },
            DeviceKind::Microphone => OutboundMessage::SetMicActiveTab {
                active,
                default_device_id,
                label,
            },
        }
    }

    /// Encode as JSON
    pub fn to_json(&self) -> SyncResult<String> {
        serde_json::to_string(self).map_err(|e| SyncError::Coordinator {
            reason: format!("failed to encode outbound message: {}", e),
        })
    }

    /// Kind and active flag when this is an active-tab report
    pub fn active_report(&self) -> Option<(DeviceKind, bool)> {
        match self {
            OutboundMessage::SetCameraActiveTab { active, .. } => Some((DeviceKind::Camera, *active)),
            OutboundMessage::SetMicActiveTab { active, .. } => {
                Some((DeviceKind::Microphone, *active))
            }
            _ => None,
        }
    }
}

/// Broker reply to [`OutboundMessage::GetStoredCamera`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredCamera {
    /// Last camera label chosen in any tab
    #[serde(default)]
    pub camera_label: Option<String>,
}
