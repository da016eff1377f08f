//! Coordinator bus abstraction
//!
//! The bus itself belongs to the host (extension messaging); sessions only
//! publish on it and issue the occasional request.

use crate::protocol::{OutboundMessage, StoredCamera};
use async_trait::async_trait;
use devsync_core::{SyncError, SyncResult};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::broadcast;
use tracing::debug;

/// Outbound side of the cross-tab coordinator
#[async_trait]
pub trait CoordinatorBus: Send + Sync {
    /// Deliver a message to the broker
    async fn publish(&self, message: OutboundMessage) -> SyncResult<()>;

    /// Ask the broker for the last chosen camera (`get-stored-camera`)
    async fn stored_camera(&self) -> SyncResult<StoredCamera>;
}

/// In-process bus that records what was published
#[derive(Debug)]
pub struct MemoryBus {
    published: Mutex<Vec<OutboundMessage>>,
    stored: Mutex<StoredCamera>,
    tx: broadcast::Sender<OutboundMessage>,
    closed: AtomicBool,
}

impl MemoryBus {
    /// Create an open bus with no stored camera
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(64);
        Self {
            published: Mutex::new(Vec::new()),
            stored: Mutex::new(StoredCamera::default()),
            tx,
            closed: AtomicBool::new(false),
        }
    }

    /// Answer `get-stored-camera` with this label
    pub fn set_stored_camera(&self, label: Option<String>) {
        self.stored.lock().camera_label = label;
    }

    /// Everything published so far, oldest first
    pub fn published(&self) -> Vec<OutboundMessage> {
        self.published.lock().clone()
    }

    /// Forget recorded messages
    pub fn clear(&self) {
        self.published.lock().clear();
    }

    /// Observe messages as they are published
    pub fn subscribe(&self) -> broadcast::Receiver<OutboundMessage> {
        self.tx.subscribe()
    }

    /// Simulate the extension context going away; later calls fail
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    fn ensure_open(&self) -> SyncResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            Err(SyncError::ContextGone)
        } else {
            Ok(())
        }
    }
}

impl Default for MemoryBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CoordinatorBus for MemoryBus {
    async fn publish(&self, message: OutboundMessage) -> SyncResult<()> {
        self.ensure_open()?;
        debug!(?message, "publishing to coordinator");
        self.published.lock().push(message.clone());
        let _ = self.tx.send(message);
        Ok(())
    }

    async fn stored_camera(&self) -> SyncResult<StoredCamera> {
        self.ensure_open()?;
        self.published.lock().push(OutboundMessage::GetStoredCamera);
        Ok(self.stored.lock().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use devsync_core::DeviceKind;

    #[tokio::test]
    async fn test_memory_bus_records_messages() {
        let bus = MemoryBus::new();
        let mut rx = bus.subscribe();

        bus.publish(OutboundMessage::PipStarted).await.unwrap();
        assert_eq!(bus.published(), vec![OutboundMessage::PipStarted]);
        assert_eq!(rx.recv().await.unwrap(), OutboundMessage::PipStarted);
    }

    #[tokio::test]
    async fn test_stored_camera_request() {
        let bus = MemoryBus::new();
        assert_eq!(bus.stored_camera().await.unwrap().camera_label, None);

        bus.set_stored_camera(Some("Logi Webcam".to_string()));
        let stored = bus.stored_camera().await.unwrap();
        assert_eq!(stored.camera_label.as_deref(), Some("Logi Webcam"));
    }

    #[tokio::test]
    async fn test_closed_bus_reports_context_gone() {
        let bus = MemoryBus::new();
        bus.close();
        let result = bus
            .publish(OutboundMessage::active_tab(DeviceKind::Camera, false, None, None))
            .await;
        assert_eq!(result, Err(SyncError::ContextGone));
        assert!(bus.published().is_empty());
    }
}
