//! Timing configuration for stream sessions

use crate::error::{SyncError, SyncResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Minimum pause after stopping tracks before the device may be reopened
pub const BASELINE_RELEASE_SETTLE: Duration = Duration::from_millis(100);

/// Settle and retry timings used by a stream session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionTiming {
    /// Pause after release; sized for virtual cameras that unlock late
    #[serde(with = "millis")]
    pub release_settle: Duration,
    /// Backoff unit between busy retries, multiplied by the attempt number
    #[serde(with = "millis")]
    pub retry_backoff: Duration,
    /// Attempts on a specific busy device before falling back
    pub max_attempts: u32,
    /// Pause before the single fallback after busy retries are exhausted
    #[serde(with = "millis")]
    pub fallback_delay: Duration,
}

impl Default for SessionTiming {
    fn default() -> Self {
        Self {
            release_settle: Duration::from_millis(800),
            retry_backoff: Duration::from_millis(1000),
            max_attempts: 3,
            fallback_delay: Duration::from_millis(1000),
        }
    }
}

impl SessionTiming {
    /// Validate configuration
    pub fn validate(&self) -> SyncResult<()> {
        if self.release_settle < BASELINE_RELEASE_SETTLE {
            return Err(SyncError::InvalidConfiguration {
                message: format!(
                    "release settle must be at least {}ms",
                    BASELINE_RELEASE_SETTLE.as_millis()
                ),
            });
        }

        if self.max_attempts == 0 {
            return Err(SyncError::InvalidConfiguration {
                message: "max attempts must be > 0".to_string(),
            });
        }

        Ok(())
    }

    /// Delay before retry number `attempt` (1-based)
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        self.retry_backoff.saturating_mul(attempt.max(1))
    }
}

/// Serde adapter storing a `Duration` as whole milliseconds
pub mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    /// Serialize as milliseconds
    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(u64::try_from(duration.as_millis()).unwrap_or(u64::MAX))
    }

    /// Deserialize from milliseconds
    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
