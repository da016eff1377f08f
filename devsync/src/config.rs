//! Configuration types and defaults

use devsync_core::config::millis;
use devsync_core::{SessionTiming, SyncError, SyncResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Tab controller configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    /// Stream session timings
    pub timing: SessionTiming,
    /// Pause between releasing a camera and opening the next one on a switch
    #[serde(with = "millis")]
    pub switch_settle: Duration,
    /// Window in which repeated switch intents collapse into the last one
    #[serde(with = "millis")]
    pub debounce_window: Duration,
    /// Delay before activating by label outside a tab switch
    #[serde(with = "millis")]
    pub label_activation_delay: Duration,
    /// Delay before activating by label on a tab switch
    #[serde(with = "millis")]
    pub tab_switch_activation_delay: Duration,
    /// Delay before following a peer tab's camera choice
    #[serde(with = "millis")]
    pub selection_changed_delay: Duration,
    /// Default tracing filter when `RUST_LOG` is unset
    pub log_filter: String,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            timing: SessionTiming::default(),
            switch_settle: Duration::from_millis(1200),
            debounce_window: Duration::from_millis(500),
            label_activation_delay: Duration::from_millis(100),
            tab_switch_activation_delay: Duration::from_millis(50),
            selection_changed_delay: Duration::from_millis(150),
            log_filter: "info".to_string(),
        }
    }
}

impl ControllerConfig {
    /// Parse a JSON configuration; missing fields take their defaults
    pub fn from_json_str(json: &str) -> SyncResult<Self> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| SyncError::InvalidConfiguration {
                message: format!("failed to parse controller config: {}", e),
            })?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> SyncResult<()> {
        self.timing.validate()?;

        if self.debounce_window.is_zero() {
            return Err(SyncError::InvalidConfiguration {
                message: "debounce window must be > 0".to_string(),
            });
        }

        Ok(())
    }
}
