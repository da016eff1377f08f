//! Activation policy
//!
//! Pure decision functions: given an intent, the session it targets and
//! whether the tab is recording, say what the controller must do. Nothing
//! here touches the platform, the bus or the clock.

use devsync_core::{ActivationIntent, DeviceTarget, IntentAction, IntentReason, SwitchTarget};
use devsync_media::{AcquireOptions, LabelResolution, SessionSnapshot};

/// What the controller should do with an intent
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Keep the live stream and re-announce it
    Reuse,
    /// Release the session
    Release,
    /// Ignore an unforced deactivation while recording
    Suppress,
    /// Release, wait the switch settle delay, then acquire
    Switch {
        /// Device to open
        target: DeviceTarget,
    },
    /// Look the label up in the device directory first
    ResolveLabel {
        /// Label to resolve
        label: String,
        /// Whether the intent comes from a tab switch
        tab_switch: bool,
    },
    /// Acquire directly, tearing down whatever is live
    Acquire {
        /// Device to open
        target: DeviceTarget,
        /// Reuse options
        options: AcquireOptions,
    },
    /// No device of the kind exists
    Unavailable,
}

/// Activation policy for one tab
#[derive(Debug, Clone, Copy, Default)]
pub struct ActivationPolicy;

impl ActivationPolicy {
    /// Decide how to handle an intent against the current session
    pub fn decide(intent: &ActivationIntent, session: &SessionSnapshot, recording: bool) -> Decision {
        match &intent.action {
            IntentAction::Switch {
                target: SwitchTarget::None,
            } => Decision::Release,
            IntentAction::Switch {
                target: SwitchTarget::Device(id),
            } => {
                let keeps_stream = matches!(
                    intent.reason,
                    IntentReason::TabSwitch | IntentReason::RecordingRestart
                );
                if keeps_stream
                    && !intent.force
                    && session.live
                    && session.device_id.as_deref() == Some(id.as_str())
                {
                    Decision::Reuse
                } else {
                    Decision::Switch {
                        target: DeviceTarget::exact(id.clone()),
                    }
                }
            }
            IntentAction::ActivateByLabel { label, tab_switch } => {
                if *tab_switch
                    && !intent.force
                    && session.live
                    && !label.is_empty()
                    && session.device_label.as_deref() == Some(label.as_str())
                {
                    Decision::Reuse
                } else {
                    Decision::ResolveLabel {
                        label: label.clone(),
                        tab_switch: *tab_switch,
                    }
                }
            }
            IntentAction::Deactivate => {
                if intent.force || !session.live || !recording {
                    Decision::Release
                } else {
                    Decision::Suppress
                }
            }
        }
    }

    /// Decide how to acquire after a label lookup.
    ///
    /// A matched label on a tab switch may keep the live stream; a fallback
    /// device always gets a fresh stream.
    pub fn after_resolution(resolution: &LabelResolution, tab_switch: bool) -> Decision {
        match resolution {
            LabelResolution::Matched(device) => Decision::Acquire {
                target: DeviceTarget::exact(device.id.clone()),
                options: if tab_switch {
                    AcquireOptions::reuse()
                } else {
                    AcquireOptions::fresh()
                },
            },
            LabelResolution::Fallback(device) => Decision::Acquire {
                target: DeviceTarget::exact(device.id.clone()),
                options: AcquireOptions::fresh(),
            },
            LabelResolution::NoDevices => Decision::Unavailable,
        }
    }
}
