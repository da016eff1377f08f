//! Activation intents consumed by the activation policy

use crate::device::{DeviceKind, SwitchTarget};

/// Why an intent was raised
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntentReason {
    /// The user picked a device
    UserSelect,
    /// The user moved to another tab
    TabSwitch,
    /// A recording restarted and wants its device back
    RecordingRestart,
    /// The system or broker asked for the device to stop
    SystemDeactivate,
}

/// What the intent asks for
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IntentAction {
    /// Switch to a device id, or off
    Switch {
        /// Requested target
        target: SwitchTarget,
    },
    /// Activate whatever local device carries this label
    ActivateByLabel {
        /// Stable device label
        label: String,
        /// Raised because the user switched tabs
        tab_switch: bool,
    },
    /// Release the device
    Deactivate,
}

/// A request to change the device session of one kind
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivationIntent {
    /// Device class affected
    pub kind: DeviceKind,
    /// Requested action
    pub action: IntentAction,
    /// Tab that raised the intent, when known
    pub source_tab: Option<String>,
    /// Bypass reuse and suppression rules
    pub force: bool,
    /// Why the intent was raised
    pub reason: IntentReason,
}

impl ActivationIntent {
    /// Switch intent raised by a user selection
    pub fn switch(kind: DeviceKind, target: SwitchTarget) -> Self {
        Self {
            kind,
            action: IntentAction::Switch { target },
            source_tab: None,
            force: false,
            reason: IntentReason::UserSelect,
        }
    }

    /// Activate-by-label intent
    pub fn activate_by_label(kind: DeviceKind, label: impl Into<String>, tab_switch: bool) -> Self {
        Self {
            kind,
            action: IntentAction::ActivateByLabel {
                label: label.into(),
                tab_switch,
            },
            source_tab: None,
            force: false,
            reason: if tab_switch {
                IntentReason::TabSwitch
            } else {
                IntentReason::UserSelect
            },
        }
    }

    /// Deactivate intent
    pub fn deactivate(kind: DeviceKind, force: bool) -> Self {
        Self {
            kind,
            action: IntentAction::Deactivate,
            source_tab: None,
            force,
            reason: IntentReason::SystemDeactivate,
        }
    }

    /// Attach the originating tab
    pub fn with_source_tab(mut self, tab: impl Into<String>) -> Self {
        self.source_tab = Some(tab.into());
        self
    }

    /// Override the reason
    pub fn with_reason(mut self, reason: IntentReason) -> Self {
        self.reason = reason;
        self
    }

    /// Whether the intent came from a tab switch
    pub fn is_tab_switch(&self) -> bool {
        match &self.action {
            IntentAction::ActivateByLabel { tab_switch, .. } => *tab_switch,
            _ => self.reason == IntentReason::TabSwitch,
        }
    }
}
