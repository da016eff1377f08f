//! Host context lifecycle.
//!
//! A [`HostContext`] is the single capability-loss signal for a tab or
//! document. Every platform call checks it on entry and every deliberate
//! delay goes through [`HostContext::sleep`], so invalidating the context
//! aborts pending retries and settle waits without further side effects.

use crate::error::{SyncError, SyncResult};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Liveness signal of the hosting tab or extension context
#[derive(Debug, Clone, Default)]
pub struct HostContext {
    token: CancellationToken,
}

impl HostContext {
    /// Create a live context
    pub fn new() -> Self {
        Self::default()
    }

    /// Derive a context that dies with this one but can also be invalidated alone
    pub fn child(&self) -> Self {
        Self {
            token: self.token.child_token(),
        }
    }

    /// Whether the context is still usable
    pub fn is_alive(&self) -> bool {
        !self.token.is_cancelled()
    }

    /// Fail with [`SyncError::ContextGone`] once invalidated
    pub fn ensure_alive(&self) -> SyncResult<()> {
        if self.is_alive() {
            Ok(())
        } else {
            Err(SyncError::ContextGone)
        }
    }

    /// Mark the context as torn down
    pub fn invalidate(&self) {
        self.token.cancel();
    }

    /// Resolve once the context is invalidated
    pub async fn invalidated(&self) {
        self.token.cancelled().await;
    }

    /// Sleep unless the context is invalidated first
    pub async fn sleep(&self, duration: Duration) -> SyncResult<()> {
        self.ensure_alive()?;
        if duration.is_zero() {
            return Ok(());
        }

        tokio::select! {
            biased;
            _ = self.token.cancelled() => Err(SyncError::ContextGone),
            _ = tokio::time::sleep(duration) => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_sleep_completes_while_alive() {
        let context = HostContext::new();
        tokio_test::assert_ok!(context.sleep(Duration::from_millis(800)).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalidate_interrupts_sleep() {
        let context = HostContext::new();
        let sleeper = context.clone();
        let handle = tokio::spawn(async move { sleeper.sleep(Duration::from_secs(10)).await });

        tokio::time::advance(Duration::from_millis(10)).await;
        context.invalidate();

        assert_eq!(handle.await.unwrap(), Err(SyncError::ContextGone));
        assert_eq!(context.ensure_alive(), Err(SyncError::ContextGone));
    }

    #[test]
    fn test_child_follows_parent() {
        let parent = HostContext::new();
        let child = parent.child();
        child.invalidate();
        assert!(parent.is_alive());

        let child = parent.child();
        parent.invalidate();
        assert!(!child.is_alive());
    }
}
