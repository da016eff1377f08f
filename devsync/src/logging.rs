//! Logging bootstrap for hosts embedding the controller

use devsync_core::{SyncError, SyncResult};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Install a global `fmt` subscriber filtered by `RUST_LOG`, or by
/// `default_filter` when the variable is unset or invalid.
///
/// Fails if a global subscriber is already installed.
pub fn init_logging(default_filter: &str) -> SyncResult<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init()
        .map_err(|e| SyncError::InvalidConfiguration {
            message: format!("logging already initialized: {}", e),
        })
}
