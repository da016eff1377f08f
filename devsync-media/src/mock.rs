//! In-memory media platform for tests and unsupported hosts

use crate::error::PlatformError;
use crate::platform::{MediaPlatform, MediaStream, MediaTrack};
use async_trait::async_trait;
use devsync_core::{DeviceDescriptor, DeviceKind, DeviceTarget};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Track handed out by [`MockPlatform`]
#[derive(Debug)]
pub struct MockTrack {
    id: String,
    kind: DeviceKind,
    label: String,
    device_id: String,
    live: AtomicBool,
    stop_calls: AtomicUsize,
    platform_stop_calls: Arc<AtomicUsize>,
    fail_stop: bool,
}

impl MockTrack {
    /// How many times `stop` was called on this track
    pub fn stop_calls(&self) -> usize {
        self.stop_calls.load(Ordering::SeqCst)
    }
}

impl MediaTrack for MockTrack {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> DeviceKind {
        self.kind
    }

    fn label(&self) -> &str {
        &self.label
    }

    fn device_id(&self) -> &str {
        &self.device_id
    }

    fn is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }

    fn stop(&self) -> Result<(), PlatformError> {
        self.stop_calls.fetch_add(1, Ordering::SeqCst);
        self.platform_stop_calls.fetch_add(1, Ordering::SeqCst);
        self.live.store(false, Ordering::SeqCst);
        if self.fail_stop {
            return Err(PlatformError::new("InvalidStateError", "track already detached"));
        }
        Ok(())
    }
}

/// Scriptable media platform.
///
/// Devices, per-target failures and per-target open latencies can be set up
/// front; every open call and track stop is recorded.
#[derive(Debug, Default)]
pub struct MockPlatform {
    devices: Mutex<Vec<DeviceDescriptor>>,
    failures: Mutex<HashMap<(DeviceKind, DeviceTarget), VecDeque<PlatformError>>>,
    open_delays: Mutex<HashMap<(DeviceKind, DeviceTarget), Duration>>,
    enumerate_failure: Mutex<Option<PlatformError>>,
    enumerate_delay: Mutex<Option<Duration>>,
    pip_failure: Mutex<Option<PlatformError>>,
    opens: Mutex<Vec<(DeviceKind, DeviceTarget)>>,
    tracks: Mutex<Vec<Arc<MockTrack>>>,
    stop_calls: Arc<AtomicUsize>,
    pip_active: AtomicBool,
    fail_stops: AtomicBool,
}

impl MockPlatform {
    /// Platform with no devices
    pub fn new() -> Self {
        Self::default()
    }

    /// Platform exposing these devices
    pub fn with_devices(devices: Vec<DeviceDescriptor>) -> Self {
        let platform = Self::new();
        platform.set_devices(devices);
        platform
    }

    /// Replace the visible devices, as after a hot-plug
    pub fn set_devices(&self, devices: Vec<DeviceDescriptor>) {
        *self.devices.lock() = devices;
    }

    /// Unplug a device
    pub fn remove_device(&self, id: &str) {
        self.devices.lock().retain(|device| device.id != id);
    }

    /// Plug a device in
    pub fn add_device(&self, device: DeviceDescriptor) {
        self.devices.lock().push(device);
    }

    /// Fail the next open of `target` with `error`
    pub fn fail_next(&self, kind: DeviceKind, target: DeviceTarget, error: PlatformError) {
        self.fail_times(kind, target, error, 1);
    }

    /// Fail the next `times` opens of `target` with `error`
    pub fn fail_times(&self, kind: DeviceKind, target: DeviceTarget, error: PlatformError, times: usize) {
        let mut failures = self.failures.lock();
        let queue = failures.entry((kind, target)).or_default();
        queue.extend(std::iter::repeat(error).take(times));
    }

    /// Make opens of `target` take `delay`
    pub fn set_open_delay(&self, kind: DeviceKind, target: DeviceTarget, delay: Duration) {
        self.open_delays.lock().insert((kind, target), delay);
    }

    /// Fail device enumeration until cleared
    pub fn fail_enumeration(&self, error: Option<PlatformError>) {
        *self.enumerate_failure.lock() = error;
    }

    /// Make device enumeration take `delay`
    pub fn set_enumeration_delay(&self, delay: Option<Duration>) {
        *self.enumerate_delay.lock() = delay;
    }

    /// Refuse picture-in-picture requests until cleared
    pub fn reject_pip(&self, error: Option<PlatformError>) {
        *self.pip_failure.lock() = error;
    }

    /// Make every track handed out from now on fail when stopped
    pub fn fail_track_stops(&self, fail: bool) {
        self.fail_stops.store(fail, Ordering::SeqCst);
    }

    /// Every open call, oldest first
    pub fn open_calls(&self) -> Vec<(DeviceKind, DeviceTarget)> {
        self.opens.lock().clone()
    }

    /// Number of open calls
    pub fn open_count(&self) -> usize {
        self.opens.lock().len()
    }

    /// Total `stop` calls across all tracks
    pub fn stop_calls(&self) -> usize {
        self.stop_calls.load(Ordering::SeqCst)
    }

    /// Every track handed out, oldest first
    pub fn tracks(&self) -> Vec<Arc<MockTrack>> {
        self.tracks.lock().clone()
    }

    /// Tracks still holding a device
    pub fn live_track_count(&self) -> usize {
        self.tracks.lock().iter().filter(|track| track.is_live()).count()
    }

    /// Whether the floating surface is shown
    pub fn pip_active(&self) -> bool {
        self.pip_active.load(Ordering::SeqCst)
    }

    fn resolve(&self, kind: DeviceKind, target: &DeviceTarget) -> Option<DeviceDescriptor> {
        let devices = self.devices.lock();
        match target {
            DeviceTarget::Exact(id) => devices
                .iter()
                .find(|device| device.kind == kind && &device.id == id)
                .cloned(),
            DeviceTarget::Any => devices.iter().find(|device| device.kind == kind).cloned(),
        }
    }
}

#[async_trait]
impl MediaPlatform for MockPlatform {
    async fn enumerate_devices(&self) -> Result<Vec<DeviceDescriptor>, PlatformError> {
        let delay = *self.enumerate_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(error) = self.enumerate_failure.lock().clone() {
            return Err(error);
        }
        Ok(self.devices.lock().clone())
    }

    async fn open_stream(
        &self,
        kind: DeviceKind,
        target: &DeviceTarget,
    ) -> Result<MediaStream, PlatformError> {
        let key = (kind, target.clone());
        self.opens.lock().push(key.clone());

        let delay = self.open_delays.lock().get(&key).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let failure = self
            .failures
            .lock()
            .get_mut(&key)
            .and_then(|queue| queue.pop_front());
        if let Some(error) = failure {
            debug!(%kind, %target, %error, "mock open failing");
            return Err(error);
        }

        let device = match self.resolve(kind, target) {
            Some(device) => device,
            None if target.is_specific() => return Err(PlatformError::overconstrained()),
            None => return Err(PlatformError::not_found()),
        };

        let track = Arc::new(MockTrack {
            id: uuid::Uuid::new_v4().to_string(),
            kind,
            label: device.label.clone(),
            device_id: device.id.clone(),
            live: AtomicBool::new(true),
            stop_calls: AtomicUsize::new(0),
            platform_stop_calls: self.stop_calls.clone(),
            fail_stop: self.fail_stops.load(Ordering::SeqCst),
        });
        self.tracks.lock().push(track.clone());

        let track: Arc<dyn MediaTrack> = track;
        Ok(MediaStream::new(kind, vec![track]))
    }

    async fn request_picture_in_picture(&self, stream: &MediaStream) -> Result<(), PlatformError> {
        if let Some(error) = self.pip_failure.lock().clone() {
            return Err(error);
        }
        if !stream.is_live() {
            return Err(PlatformError::new("InvalidStateError", "stream has ended"));
        }
        self.pip_active.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn exit_picture_in_picture(&self) -> Result<(), PlatformError> {
        self.pip_active.store(false, Ordering::SeqCst);
        Ok(())
    }
}
