//! Picture-in-picture surface toggles

use devsync_core::{Event, SyncResult};
use devsync_media::{MediaPlatform, MediaStream, PlatformError};
use devsync_signaling::{CoordinatorBus, OutboundMessage};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, warn};

/// Surface a screen recording asks for when it captures the whole monitor
pub const MONITOR_SURFACE: &str = "monitor";

/// Always-on-top camera preview
pub struct PipSurface {
    platform: Arc<dyn MediaPlatform>,
    bus: Arc<dyn CoordinatorBus>,
    events: broadcast::Sender<Event>,
    active: AtomicBool,
}

impl PipSurface {
    /// Create an inactive surface
    pub fn new(
        platform: Arc<dyn MediaPlatform>,
        bus: Arc<dyn CoordinatorBus>,
        events: broadcast::Sender<Event>,
    ) -> Self {
        Self {
            platform,
            bus,
            events,
            active: AtomicBool::new(false),
        }
    }

    /// Whether the surface is believed open
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Close the surface when open, otherwise open it over `stream`
    pub async fn toggle(&self, stream: Option<MediaStream>) -> SyncResult<bool> {
        if self.is_active() {
            self.close().await?;
            Ok(false)
        } else {
            self.open(stream).await
        }
    }

    /// Open the surface for a `set-surface` request that targets the monitor
    pub async fn set_surface(&self, surface: &str, stream: Option<MediaStream>) -> SyncResult<bool> {
        if surface != MONITOR_SURFACE || self.is_active() {
            return Ok(self.is_active());
        }
        self.open(stream).await
    }

    /// Request the surface. A refusal reverts the flag and reports `pip-ended`;
    /// there is no retry.
    pub async fn open(&self, stream: Option<MediaStream>) -> SyncResult<bool> {
        self.active.store(true, Ordering::SeqCst);

        let result = match &stream {
            Some(stream) => self.platform.request_picture_in_picture(stream).await,
            None => Err(PlatformError::new(
                "InvalidStateError",
                "no camera stream to show",
            )),
        };

        match result {
            Ok(()) => {
                debug!("Picture-in-picture started");
                self.bus.publish(OutboundMessage::PipStarted).await?;
                self.emit(true);
                Ok(true)
            }
            Err(e) => {
                warn!(error = %e, "Picture-in-picture refused");
                self.active.store(false, Ordering::SeqCst);
                self.bus.publish(OutboundMessage::PipEnded).await?;
                self.emit(false);
                Ok(false)
            }
        }
    }

    /// Close the surface
    pub async fn close(&self) -> SyncResult<()> {
        if let Err(e) = self.platform.exit_picture_in_picture().await {
            warn!(error = %e, "Failed to exit picture-in-picture");
        }
        self.active.store(false, Ordering::SeqCst);
        self.bus.publish(OutboundMessage::PipEnded).await?;
        self.emit(false);
        Ok(())
    }

    fn emit(&self, active: bool) {
        let _ = self.events.send(Event::PipChanged { active });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use devsync_core::{DeviceDescriptor, DeviceKind, DeviceTarget};
    use devsync_media::MockPlatform;
    use devsync_signaling::MemoryBus;

    async fn setup() -> (Arc<MockPlatform>, Arc<MemoryBus>, PipSurface, MediaStream) {
        let platform = Arc::new(MockPlatform::with_devices(vec![DeviceDescriptor::new(
            DeviceKind::Camera,
            "cam-1",
            "FaceTime HD",
        )]));
        let bus = Arc::new(MemoryBus::new());
        let (events, _) = broadcast::channel(8);
        let stream = platform
            .open_stream(DeviceKind::Camera, &DeviceTarget::Any)
            .await
            .unwrap();
        let surface = PipSurface::new(platform.clone(), bus.clone(), events);
        (platform, bus, surface, stream)
    }

    #[tokio::test]
    async fn test_toggle_opens_then_closes() {
        let (platform, bus, surface, stream) = setup().await;

        assert!(surface.toggle(Some(stream.clone())).await.unwrap());
        assert!(platform.pip_active());
        assert!(!surface.toggle(Some(stream)).await.unwrap());
        assert!(!platform.pip_active());
        assert_eq!(
            bus.published(),
            vec![OutboundMessage::PipStarted, OutboundMessage::PipEnded]
        );
    }

    #[tokio::test]
    async fn test_refusal_reverts_flag() {
        let (platform, bus, surface, stream) = setup().await;
        platform.reject_pip(Some(PlatformError::new(
            "NotAllowedError",
            "must be handling a user gesture",
        )));

        assert!(!surface.toggle(Some(stream)).await.unwrap());
        assert!(!surface.is_active());
        assert_eq!(bus.published(), vec![OutboundMessage::PipEnded]);
    }

    #[tokio::test]
    async fn test_set_surface_ignores_other_surfaces() {
        let (_, bus, surface, stream) = setup().await;

        assert!(!surface.set_surface("browser", Some(stream.clone())).await.unwrap());
        assert!(bus.published().is_empty());
        assert!(surface.set_surface(MONITOR_SURFACE, Some(stream)).await.unwrap());
    }
}
