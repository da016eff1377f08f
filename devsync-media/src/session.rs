//! Stream session
//!
//! A [`StreamSession`] owns at most one live stream of one device kind for
//! the current tab. Ownership only changes by stop-then-acquire: the old
//! stream's tracks are stopped and a settle delay elapses before the
//! platform is asked for a new one, because virtual cameras keep their
//! exclusive lock for a while after `stop()`.
//!
//! Every intent claims a [`Ticket`]. An acquisition checks its ticket when
//! the platform call resolves; if a newer intent has claimed the session in
//! the meantime the fresh stream is stopped on the spot and never installed.

use crate::error::{FailureClass, PlatformError};
use crate::platform::{MediaPlatform, MediaStream};
use devsync_core::{
    DeviceKind, DeviceTarget, Event, HostContext, Notice, SessionState, SessionTiming, SyncError,
    SyncResult,
};
use devsync_signaling::{device_key, keys, CoordinatorBus, KeyValueStore, OutboundMessage};
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Acquisition options
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AcquireOptions {
    /// Keep the live stream when it already uses the exact requested device
    pub reuse_if_matching: bool,
}

impl AcquireOptions {
    /// Always open a new stream
    pub fn fresh() -> Self {
        Self::default()
    }

    /// Keep a matching live stream
    pub fn reuse() -> Self {
        Self {
            reuse_if_matching: true,
        }
    }
}

/// Claim on a session's target. Only the newest claim may install a stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ticket {
    serial: u64,
    target: Option<DeviceTarget>,
}

impl Ticket {
    /// Monotonic claim number
    pub fn serial(&self) -> u64 {
        self.serial
    }

    /// Requested target, `None` for a release
    pub fn target(&self) -> Option<&DeviceTarget> {
        self.target.as_ref()
    }
}

/// Point-in-time view of a session, as read by the activation policy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSnapshot {
    /// Device class
    pub kind: DeviceKind,
    /// Lifecycle state
    pub state: SessionState,
    /// Device of the installed stream
    pub device_id: Option<String>,
    /// Label of the installed stream
    pub device_label: Option<String>,
    /// Id of the installed stream
    pub stream_id: Option<String>,
    /// Whether the installed stream still has live tracks
    pub live: bool,
}

/// Collaborators shared by every session of a tab
#[derive(Clone)]
pub struct SessionPorts {
    /// Media capabilities
    pub platform: Arc<dyn MediaPlatform>,
    /// Cross-tab coordinator
    pub bus: Arc<dyn CoordinatorBus>,
    /// Persisted state shared with other tabs
    pub store: Arc<dyn KeyValueStore>,
    /// Liveness of the hosting tab
    pub context: HostContext,
    /// Local UI events
    pub events: broadcast::Sender<Event>,
}

#[derive(Debug, Default)]
struct SessionInner {
    state: SessionState,
    device_id: Option<String>,
    device_label: Option<String>,
    live: Option<MediaStream>,
    sink: Option<MediaStream>,
    intended: Option<DeviceTarget>,
    last_teardown: Option<Instant>,
}

/// The single stream owner for one device kind in one tab
pub struct StreamSession {
    kind: DeviceKind,
    timing: SessionTiming,
    ports: SessionPorts,
    inner: Mutex<SessionInner>,
    serial: AtomicU64,
}

impl StreamSession {
    /// Create an idle session
    pub fn new(kind: DeviceKind, timing: SessionTiming, ports: SessionPorts) -> Self {
        Self {
            kind,
            timing,
            ports,
            inner: Mutex::new(SessionInner::default()),
            serial: AtomicU64::new(0),
        }
    }

    /// Device class
    pub fn kind(&self) -> DeviceKind {
        self.kind
    }

    /// Timings in use
    pub fn timing(&self) -> &SessionTiming {
        &self.timing
    }

    /// Current lifecycle state
    pub fn state(&self) -> SessionState {
        self.inner.lock().state
    }

    /// Installed stream, if any
    pub fn current_stream(&self) -> Option<MediaStream> {
        self.inner.lock().live.clone()
    }

    /// Stream attached to the preview sink, if any
    pub fn sink(&self) -> Option<MediaStream> {
        self.inner.lock().sink.clone()
    }

    /// Target of the newest claim
    pub fn intended_target(&self) -> Option<DeviceTarget> {
        self.inner.lock().intended.clone()
    }

    /// Time left until `release_settle + extra` has passed since the last
    /// stream was torn down. Zero when nothing was ever torn down.
    pub fn settle_remaining(&self, extra: Duration) -> Duration {
        match self.inner.lock().last_teardown {
            Some(at) => (self.timing.release_settle + extra).saturating_sub(at.elapsed()),
            None => Duration::ZERO,
        }
    }

    /// Point-in-time view
    pub fn snapshot(&self) -> SessionSnapshot {
        let inner = self.inner.lock();
        SessionSnapshot {
            kind: self.kind,
            state: inner.state,
            device_id: inner.device_id.clone(),
            device_label: inner.device_label.clone(),
            stream_id: inner.live.as_ref().map(|stream| stream.id().to_string()),
            live: inner.live.as_ref().is_some_and(MediaStream::is_live),
        }
    }

    /// Claim the session for a new target, superseding every older claim
    pub fn claim(&self, target: Option<DeviceTarget>) -> Ticket {
        let mut inner = self.inner.lock();
        let serial = self.serial.fetch_add(1, Ordering::SeqCst) + 1;
        inner.intended = target.clone();
        debug!(kind = %self.kind, serial, target = ?target, "Session claimed");
        Ticket { serial, target }
    }

    /// Narrow a still-current claim to a resolved target.
    ///
    /// Used after label resolution; fails if a newer intent arrived meanwhile.
    pub fn retarget(&self, ticket: &Ticket, target: DeviceTarget) -> SyncResult<Ticket> {
        let mut inner = self.inner.lock();
        if !self.is_current(ticket) {
            return Err(self.superseded(ticket));
        }
        let serial = self.serial.fetch_add(1, Ordering::SeqCst) + 1;
        inner.intended = Some(target.clone());
        Ok(Ticket {
            serial,
            target: Some(target),
        })
    }

    /// Whether no newer claim exists
    pub fn is_current(&self, ticket: &Ticket) -> bool {
        self.serial.load(Ordering::SeqCst) == ticket.serial
    }

    /// Whether a live stream uses exactly this device
    pub fn matches_device(&self, device_id: &str) -> bool {
        let inner = self.inner.lock();
        inner
            .live
            .as_ref()
            .is_some_and(|stream| stream.is_live() && stream.device_id() == Some(device_id))
    }

    /// Whether a live stream comes from a device with this label
    pub fn matches_label(&self, label: &str) -> bool {
        let inner = self.inner.lock();
        !label.is_empty()
            && inner
                .live
                .as_ref()
                .is_some_and(|stream| stream.is_live() && stream.label() == Some(label))
    }

    /// Point the preview sink at a stream
    pub fn attach_sink(&self, stream: MediaStream) {
        self.inner.lock().sink = Some(stream);
    }

    /// Acquire a stream for `target` under a fresh claim
    pub async fn acquire(&self, target: DeviceTarget, options: AcquireOptions) -> SyncResult<MediaStream> {
        let ticket = self.claim(Some(target));
        self.acquire_with(&ticket, options).await
    }

    /// Acquire a stream under an existing claim.
    ///
    /// Busy devices are retried up to `max_attempts` times with growing
    /// backoff, then a single fallback to any device of the kind is tried.
    /// Other failures on a specific device, a permission refusal included,
    /// fall back once immediately. The refused device itself is never retried.
    pub async fn acquire_with(&self, ticket: &Ticket, options: AcquireOptions) -> SyncResult<MediaStream> {
        self.ports.context.ensure_alive()?;
        let target = ticket.target.clone().ok_or_else(|| SyncError::InvalidState {
            expected: "device target".to_string(),
            actual: "none".to_string(),
        })?;
        self.ensure_current(ticket)?;

        if options.reuse_if_matching {
            if let Some(id) = target.exact_id() {
                if self.matches_device(id) {
                    info!(kind = %self.kind, device_id = id, "Reusing live stream for same device");
                    return self.reuse_current().await;
                }
            }
        }

        if self.teardown() {
            self.report_inactive().await;
        }
        let settle = self.settle_remaining(Duration::ZERO);
        if !settle.is_zero() {
            debug!(kind = %self.kind, settle_ms = settle.as_millis() as u64, "Waiting for released device to settle");
            self.ports.context.sleep(settle).await?;
            self.ensure_current(ticket)?;
        }
        self.set_state_if_current(ticket, SessionState::Acquiring);

        let mut attempt = 0;
        let primary = loop {
            attempt += 1;
            debug!(kind = %self.kind, %target, attempt, "Opening stream");
            match self.open(ticket, &target).await? {
                Ok(stream) => break Ok(stream),
                Err(e) if e.failure_class() == FailureClass::Busy && attempt < self.timing.max_attempts => {
                    let backoff = self.timing.backoff_for(attempt);
                    warn!(
                        kind = %self.kind,
                        %target,
                        attempt,
                        max_attempts = self.timing.max_attempts,
                        backoff_ms = backoff.as_millis() as u64,
                        "Device busy, retrying"
                    );
                    self.ports.context.sleep(backoff).await?;
                }
                Err(e) => break Err(e),
            }
        };

        let failure = match primary {
            Ok(stream) => return self.install(ticket, stream, attempt > 1).await,
            Err(failure) => failure,
        };

        let cause = failure.to_sync_error(self.kind, &target, attempt);
        match failure.failure_class() {
            FailureClass::ContextGone => Err(SyncError::ContextGone),
            FailureClass::PermissionDenied => {
                self.notice(Notice::PermissionDenied);
                if !target.is_specific() {
                    return Err(self.fail(ticket, cause));
                }
                warn!(kind = %self.kind, %target, "Permission refused for device, falling back to any device");
                self.fallback(ticket, true).await
            }
            FailureClass::Busy => {
                error!(kind = %self.kind, %target, attempts = attempt, "Device still in use after maximum retries");
                self.notice(Notice::DeviceBusy);
                if !target.is_specific() {
                    return Err(self.fail(ticket, cause));
                }
                self.ports.context.sleep(self.timing.fallback_delay).await?;
                self.fallback(ticket, false).await
            }
            FailureClass::NotFound | FailureClass::Other => {
                if !target.is_specific() {
                    return Err(self.fail(ticket, cause));
                }
                warn!(kind = %self.kind, %target, error = %cause, "Falling back to any device");
                self.fallback(ticket, false).await
            }
        }
    }

    /// Re-announce the installed stream without touching the platform
    pub async fn reuse_current(&self) -> SyncResult<MediaStream> {
        let stream = {
            let mut inner = self.inner.lock();
            let stream = match inner.live.as_ref().filter(|stream| stream.is_live()) {
                Some(stream) => stream.clone(),
                None => {
                    return Err(SyncError::InvalidState {
                        expected: "live stream".to_string(),
                        actual: inner.state.to_string(),
                    })
                }
            };
            if !inner.sink.as_ref().is_some_and(|sink| sink.same_stream(&stream)) {
                inner.sink = Some(stream.clone());
            }
            inner.state = SessionState::Active;
            stream
        };

        self.report_active(&stream, true).await;
        Ok(stream)
    }

    /// Stop the stream of this kind and announce that the tab no longer holds it.
    ///
    /// Idempotent. Supersedes any acquisition in flight. Resolves only after
    /// the settle delay so that a chained acquire does not hit a busy device.
    pub async fn release(&self) -> SyncResult<()> {
        self.ports.context.ensure_alive()?;
        self.claim(None);
        self.release_and_settle().await
    }

    /// Release on behalf of a claim that will acquire next.
    ///
    /// Fails with `Superseded` if a newer intent arrives before the settle
    /// delay is over; the stream is released either way.
    pub async fn release_under(&self, ticket: &Ticket) -> SyncResult<()> {
        self.ports.context.ensure_alive()?;
        self.ensure_current(ticket)?;
        self.release_and_settle().await?;
        self.ensure_current(ticket)
    }

    /// Stop everything for good on tab unload; no messages, no settle delay
    pub fn shutdown(&self) {
        self.claim(None);
        self.teardown();
        info!(kind = %self.kind, "Stream session shut down");
    }

    async fn release_and_settle(&self) -> SyncResult<()> {
        self.teardown();
        self.report_inactive().await;
        self.ports.context.sleep(self.timing.release_settle).await
    }

    fn ensure_current(&self, ticket: &Ticket) -> SyncResult<()> {
        if self.is_current(ticket) {
            Ok(())
        } else {
            Err(self.superseded(ticket))
        }
    }

    fn superseded(&self, ticket: &Ticket) -> SyncError {
        SyncError::Superseded {
            target: ticket
                .target
                .as_ref()
                .map(ToString::to_string)
                .unwrap_or_else(|| "none".to_string()),
        }
    }

    /// One platform call. The outer error means the result must be dropped.
    async fn open(
        &self,
        ticket: &Ticket,
        target: &DeviceTarget,
    ) -> SyncResult<Result<MediaStream, PlatformError>> {
        self.ensure_current(ticket)?;
        self.ports.context.ensure_alive()?;

        let result = self.ports.platform.open_stream(self.kind, target).await;

        let gone = !self.ports.context.is_alive();
        if gone || !self.is_current(ticket) {
            if let Ok(stream) = &result {
                self.discard(stream);
            }
            return Err(if gone {
                SyncError::ContextGone
            } else {
                self.superseded(ticket)
            });
        }
        Ok(result)
    }

    async fn fallback(&self, ticket: &Ticket, refusal_noticed: bool) -> SyncResult<MediaStream> {
        info!(kind = %self.kind, "Trying fallback to any available device");
        match self.open(ticket, &DeviceTarget::Any).await? {
            Ok(stream) => self.install(ticket, stream, false).await,
            Err(failure) => {
                let error = failure.to_sync_error(self.kind, &DeviceTarget::Any, 1);
                match failure.failure_class() {
                    FailureClass::ContextGone => Err(SyncError::ContextGone),
                    class => {
                        if class == FailureClass::PermissionDenied && !refusal_noticed {
                            self.notice(Notice::PermissionDenied);
                        }
                        error!(kind = %self.kind, error = %error, "Fallback device also failed");
                        Err(self.fail(ticket, error))
                    }
                }
            }
        }
    }

    async fn install(&self, ticket: &Ticket, stream: MediaStream, retried: bool) -> SyncResult<MediaStream> {
        let replaced = {
            let mut inner = self.inner.lock();
            if !self.is_current(ticket) {
                None
            } else {
                let previous = [inner.live.replace(stream.clone()), inner.sink.replace(stream.clone())];
                inner.device_id = stream.device_id().map(str::to_string);
                inner.device_label = stream.label().map(str::to_string);
                inner.state = SessionState::Active;
                Some(previous)
            }
        };

        let Some(previous) = replaced else {
            self.discard(&stream);
            return Err(self.superseded(ticket));
        };
        for previous in previous.into_iter().flatten() {
            if !previous.same_stream(&stream) {
                previous.stop();
            }
        }

        info!(
            kind = %self.kind,
            device_id = stream.device_id().unwrap_or_default(),
            label = stream.label().unwrap_or_default(),
            "Stream obtained"
        );
        self.report_active(&stream, false).await;
        if retried {
            self.notice(Notice::SwitchedAfterRetry);
        }
        Ok(stream)
    }

    fn discard(&self, stream: &MediaStream) {
        let stopped = stream.stop();
        warn!(
            kind = %self.kind,
            stream_id = %stream.id(),
            stopped,
            "Discarding stream of superseded acquisition"
        );
        self.emit(Event::AcquisitionDiscarded {
            kind: self.kind,
            device_id: stream.device_id().unwrap_or_default().to_string(),
        });
    }

    fn fail(&self, ticket: &Ticket, error: SyncError) -> SyncError {
        self.set_state_if_current(ticket, SessionState::Failed);
        self.emit(Event::AcquisitionFailed {
            kind: self.kind,
            reason: error.to_string(),
        });
        error
    }

    fn set_state_if_current(&self, ticket: &Ticket, state: SessionState) {
        let mut inner = self.inner.lock();
        if self.is_current(ticket) {
            inner.state = state;
        }
    }

    /// Stop the live stream and the sink. Returns whether anything was installed.
    fn teardown(&self) -> bool {
        let (live, sink) = {
            let mut inner = self.inner.lock();
            if inner.live.is_some() || inner.sink.is_some() {
                inner.state = SessionState::Deactivating;
                inner.last_teardown = Some(Instant::now());
            }
            inner.device_id = None;
            inner.device_label = None;
            (inner.live.take(), inner.sink.take())
        };

        let had_stream = live.is_some() || sink.is_some();
        let mut stopped = 0;
        if let Some(live) = &live {
            stopped += live.stop();
        }
        if let Some(sink) = &sink {
            stopped += sink.stop();
        }
        if had_stream {
            debug!(kind = %self.kind, stopped, "Stopped stream tracks");
            self.emit(Event::StreamReleased { kind: self.kind });
        }

        self.inner.lock().state = SessionState::Idle;
        had_stream
    }

    async fn report_active(&self, stream: &MediaStream, reused: bool) {
        let device_id = stream.device_id().unwrap_or_default().to_string();
        let label = stream.label().unwrap_or_default().to_string();

        let message = OutboundMessage::active_tab(
            self.kind,
            true,
            Some(device_id.clone()),
            Some(label.clone()),
        );
        if let Err(e) = self.ports.bus.publish(message).await {
            warn!(kind = %self.kind, error = %e, "Failed to report active device");
        }

        let mut entries = vec![(device_key(self.kind).to_string(), Value::from(device_id.clone()))];
        if self.kind == DeviceKind::Camera && !label.is_empty() {
            entries.push((keys::CAMERA_LABEL.to_string(), Value::from(label.clone())));
        }
        if let Err(e) = self.ports.store.set(entries).await {
            warn!(kind = %self.kind, error = %e, "Failed to persist active device");
        }

        self.emit(Event::StreamActivated {
            kind: self.kind,
            device_id,
            label,
            reused,
        });
    }

    async fn report_inactive(&self) {
        let message = OutboundMessage::active_tab(self.kind, false, None, None);
        if let Err(e) = self.ports.bus.publish(message).await {
            warn!(kind = %self.kind, error = %e, "Failed to report inactive device");
        }
    }

    fn notice(&self, notice: Notice) {
        self.emit(Event::Notice {
            kind: self.kind,
            notice,
        });
    }

    fn emit(&self, event: Event) {
        let _ = self.ports.events.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockPlatform;
    use devsync_core::DeviceDescriptor;
    use devsync_signaling::{MemoryBus, MemoryStore};

    fn session(platform: Arc<MockPlatform>) -> (StreamSession, Arc<MemoryBus>) {
        let bus = Arc::new(MemoryBus::new());
        let (events, _) = broadcast::channel(32);
        let ports = SessionPorts {
            platform,
            bus: bus.clone(),
            store: Arc::new(MemoryStore::new()),
            context: HostContext::new(),
            events,
        };
        (
            StreamSession::new(DeviceKind::Camera, SessionTiming::default(), ports),
            bus,
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_claim_supersedes_older_ticket() {
        let platform = Arc::new(MockPlatform::new());
        let (session, _) = session(platform);

        let first = session.claim(Some(DeviceTarget::exact("a")));
        let second = session.claim(Some(DeviceTarget::exact("b")));
        assert!(!session.is_current(&first));
        assert!(session.is_current(&second));
        assert_eq!(session.intended_target(), Some(DeviceTarget::exact("b")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_installs_and_reports() {
        let platform = Arc::new(MockPlatform::with_devices(vec![DeviceDescriptor::new(
            DeviceKind::Camera,
            "cam-1",
            "Logi Webcam",
        )]));
        let (session, bus) = session(platform);

        let stream = session
            .acquire(DeviceTarget::exact("cam-1"), AcquireOptions::fresh())
            .await
            .unwrap();
        let snapshot = session.snapshot();
        assert_eq!(snapshot.state, SessionState::Active);
        assert_eq!(snapshot.device_label.as_deref(), Some("Logi Webcam"));
        assert_eq!(snapshot.stream_id.as_deref(), Some(stream.id()));
        assert!(session.sink().unwrap().same_stream(&stream));
        assert_eq!(
            bus.published(),
            vec![OutboundMessage::active_tab(
                DeviceKind::Camera,
                true,
                Some("cam-1".to_string()),
                Some("Logi Webcam".to_string())
            )]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_without_target_is_invalid() {
        let platform = Arc::new(MockPlatform::new());
        let (session, _) = session(platform);
        let ticket = session.claim(None);

        let result = session.acquire_with(&ticket, AcquireOptions::fresh()).await;
        assert!(matches!(result, Err(SyncError::InvalidState { .. })));
    }
}
