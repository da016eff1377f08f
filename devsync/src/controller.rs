//! Tab controller
//!
//! Owns the per-kind stream sessions of one tab and carries out activation
//! policy decisions: inbound coordinator messages, persisted-state changes,
//! device hot-plug and cold start all end up as intents applied here.

use crate::config::ControllerConfig;
use crate::debounce::{Debouncer, Gate};
use crate::policy::{ActivationPolicy, Decision};
use crate::surface::PipSurface;
use devsync_core::{
    ActivationIntent, DeviceKind, DeviceTarget, Event, HostContext, IntentAction, IntentReason,
    Notice, SwitchTarget, SyncError, SyncResult, NONE_DEVICE,
};
use devsync_media::{
    AcquireOptions, DeviceDirectory, MediaPlatform, MediaStream, SessionPorts, SessionSnapshot,
    StreamSession, Ticket,
};
use devsync_signaling::{
    active_key, device_key, keys, CoordinatorBus, InboundMessage, KeyValueStore, PersistedState,
    StoreChange, StoredCamera,
};
use futures::{Stream, StreamExt};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

const EVENT_CAPACITY: usize = 256;

/// Result of applying an intent
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// A stream is live for the kind
    Activated {
        /// Device class
        kind: DeviceKind,
        /// Device in use
        device_id: String,
        /// Label of the device in use
        label: String,
        /// The previous stream was kept
        reused: bool,
    },
    /// The kind was released
    Released {
        /// Device class
        kind: DeviceKind,
    },
    /// An unforced deactivation was ignored while recording
    Suppressed {
        /// Device class
        kind: DeviceKind,
    },
    /// The intent was folded into a later one of the same burst
    Coalesced {
        /// Device class
        kind: DeviceKind,
    },
    /// No device of the kind is available
    Unavailable {
        /// Device class
        kind: DeviceKind,
    },
    /// Picture-in-picture state after a surface request
    Pip {
        /// Whether the surface is open
        active: bool,
    },
    /// Nothing to do
    Unchanged,
}

impl Outcome {
    fn activated(kind: DeviceKind, before: Option<&MediaStream>, stream: &MediaStream) -> Self {
        Outcome::Activated {
            kind,
            device_id: stream.device_id().unwrap_or_default().to_string(),
            label: stream.label().unwrap_or_default().to_string(),
            reused: before.is_some_and(|before| before.same_stream(stream)),
        }
    }
}

/// Per-kind results of a cold start
#[derive(Debug)]
pub struct ColdStart {
    /// Camera result
    pub camera: SyncResult<Outcome>,
    /// Microphone result
    pub microphone: SyncResult<Outcome>,
}

struct ControllerInner {
    config: ControllerConfig,
    ports: SessionPorts,
    directory: DeviceDirectory,
    surface: PipSurface,
    sessions: Mutex<HashMap<DeviceKind, Arc<StreamSession>>>,
    debouncers: HashMap<DeviceKind, Debouncer<Ticket>>,
}

/// Device session controller for one tab
#[derive(Clone)]
pub struct TabController {
    inner: Arc<ControllerInner>,
}

impl TabController {
    /// Create a controller with a fresh host context
    pub fn new(
        platform: Arc<dyn MediaPlatform>,
        bus: Arc<dyn CoordinatorBus>,
        store: Arc<dyn KeyValueStore>,
        config: ControllerConfig,
    ) -> SyncResult<Self> {
        Self::with_context(platform, bus, store, config, HostContext::new())
    }

    /// Create a controller bound to an existing host context
    pub fn with_context(
        platform: Arc<dyn MediaPlatform>,
        bus: Arc<dyn CoordinatorBus>,
        store: Arc<dyn KeyValueStore>,
        config: ControllerConfig,
        context: HostContext,
    ) -> SyncResult<Self> {
        config.validate()?;

        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let ports = SessionPorts {
            platform: platform.clone(),
            bus: bus.clone(),
            store,
            context: context.clone(),
            events: events.clone(),
        };
        let debouncers = DeviceKind::ALL
            .iter()
            .map(|kind| (*kind, Debouncer::new(config.debounce_window)))
            .collect();

        info!("Tab controller created");
        Ok(Self {
            inner: Arc::new(ControllerInner {
                directory: DeviceDirectory::new(platform.clone(), context),
                surface: PipSurface::new(platform, bus, events),
                config,
                ports,
                sessions: Mutex::new(HashMap::new()),
                debouncers,
            }),
        })
    }

    /// Configuration in use
    pub fn config(&self) -> &ControllerConfig {
        &self.inner.config
    }

    /// Host context lifecycle
    pub fn context(&self) -> &HostContext {
        &self.inner.ports.context
    }

    /// Device directory
    pub fn directory(&self) -> &DeviceDirectory {
        &self.inner.directory
    }

    /// Picture-in-picture surface
    pub fn surface(&self) -> &PipSurface {
        &self.inner.surface
    }

    /// Subscribe to local UI events
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.inner.ports.events.subscribe()
    }

    /// Session of a kind, created on first use
    pub fn session(&self, kind: DeviceKind) -> Arc<StreamSession> {
        self.inner
            .sessions
            .lock()
            .entry(kind)
            .or_insert_with(|| {
                debug!(%kind, "Creating stream session");
                Arc::new(StreamSession::new(
                    kind,
                    self.inner.config.timing.clone(),
                    self.inner.ports.clone(),
                ))
            })
            .clone()
    }

    /// Current view of a kind's session
    pub fn snapshot(&self, kind: DeviceKind) -> SessionSnapshot {
        self.session(kind).snapshot()
    }

    /// Apply an intent now
    pub async fn apply(&self, intent: ActivationIntent) -> SyncResult<Outcome> {
        self.context().ensure_alive()?;

        let kind = intent.kind;
        let session = self.session(kind);
        let recording = match intent.action {
            IntentAction::Deactivate => self.is_recording().await?,
            _ => false,
        };
        let decision = ActivationPolicy::decide(&intent, &session.snapshot(), recording);
        debug!(%kind, reason = ?intent.reason, ?decision, "Applying intent");

        match decision {
            Decision::Reuse => {
                // Supersede any acquisition still in flight for this kind
                session.claim(session.snapshot().device_id.map(DeviceTarget::exact));
                let stream = session.reuse_current().await?;
                Ok(Outcome::activated(kind, Some(&stream), &stream))
            }
            Decision::Release => {
                session.release().await?;
                Ok(Outcome::Released { kind })
            }
            Decision::Suppress => {
                info!(%kind, "Recording in progress, ignoring unforced deactivation");
                self.emit(Event::DeactivationSuppressed { kind });
                Ok(Outcome::Suppressed { kind })
            }
            Decision::Switch { target } => {
                let ticket = session.claim(Some(target));
                let ticket = match self.debouncer(kind).offer(ticket) {
                    Gate::Now(ticket) => ticket,
                    Gate::Arm(wait) => {
                        self.context().sleep(wait).await?;
                        match self.debouncer(kind).take() {
                            Some(ticket) => ticket,
                            None => return Ok(Outcome::Coalesced { kind }),
                        }
                    }
                    Gate::Deferred => {
                        debug!(%kind, "Switch folded into pending one");
                        return Ok(Outcome::Coalesced { kind });
                    }
                };
                if intent.reason == IntentReason::UserSelect {
                    self.emit(Event::Notice {
                        kind,
                        notice: Notice::Switching,
                    });
                }
                self.switch(&session, &ticket).await
            }
            Decision::ResolveLabel { label, tab_switch } => {
                self.activate_by_label(&session, &label, tab_switch).await
            }
            Decision::Acquire { target, options } => {
                let ticket = session.claim(Some(target));
                self.acquire(&session, &ticket, options).await
            }
            Decision::Unavailable => Ok(Outcome::Unavailable { kind }),
        }
    }

    /// Handle one coordinator message, honouring its dispatch delay
    pub async fn handle_message(&self, message: InboundMessage) -> SyncResult<Outcome> {
        self.context().ensure_alive()?;
        debug!(message_type = message.message_type(), "Inbound message");

        match &message {
            InboundMessage::TogglePip => {
                let camera = self.session(DeviceKind::Camera).current_stream();
                let active = self.surface().toggle(camera).await?;
                return Ok(Outcome::Pip { active });
            }
            InboundMessage::SetSurface { surface } => {
                let camera = self.session(DeviceKind::Camera).current_stream();
                let active = self.surface().set_surface(surface, camera).await?;
                return Ok(Outcome::Pip { active });
            }
            _ => {}
        }

        let Some(intent) = message.intent() else {
            return Ok(Outcome::Unchanged);
        };
        let delay = self.dispatch_delay(&message);
        if !delay.is_zero() {
            self.context().sleep(delay).await?;
        }
        self.apply(intent).await
    }

    /// Parse and handle a raw JSON message
    pub async fn handle_json(&self, json: &str) -> SyncResult<Outcome> {
        let message = InboundMessage::from_json(json)?;
        self.handle_message(message).await
    }

    /// Handle a message on its own task
    pub fn dispatch(&self, message: InboundMessage) -> JoinHandle<SyncResult<Outcome>> {
        let controller = self.clone();
        tokio::spawn(async move {
            let message_type = message.message_type();
            let result = controller.handle_message(message).await;
            match &result {
                Ok(outcome) => debug!(message_type, ?outcome, "Message handled"),
                Err(e) if e.is_silent() => debug!(message_type, error = %e, "Message dropped"),
                Err(e) => warn!(message_type, error = %e, "Message failed"),
            }
            result
        })
    }

    /// Dispatch every message of a stream until it ends or the context goes away
    pub async fn run<S>(&self, messages: S)
    where
        S: Stream<Item = InboundMessage> + Send,
    {
        futures::pin_mut!(messages);
        loop {
            tokio::select! {
                biased;
                _ = self.context().invalidated() => {
                    debug!("Host context gone, stopping message loop");
                    break;
                }
                next = messages.next() => match next {
                    Some(message) => {
                        self.dispatch(message);
                    }
                    None => break,
                },
            }
        }
    }

    /// Resolve both kinds from persisted state when the tab loads
    pub async fn start(&self) -> SyncResult<ColdStart> {
        self.context().ensure_alive()?;
        let state = PersistedState::load(self.inner.ports.store.as_ref()).await?;
        info!(recording = state.is_recording(), "Cold start");

        let camera = self.start_camera(&state).await;
        if matches!(camera, Err(SyncError::ContextGone)) {
            return Err(SyncError::ContextGone);
        }
        let microphone = self.start_microphone(&state).await;
        if matches!(microphone, Err(SyncError::ContextGone)) {
            return Err(SyncError::ContextGone);
        }

        for (kind, result) in [(DeviceKind::Camera, &camera), (DeviceKind::Microphone, &microphone)] {
            if let Err(e) = result {
                warn!(%kind, error = %e, "Cold start left device inactive");
            }
        }
        Ok(ColdStart { camera, microphone })
    }

    /// React to a platform device-change notification.
    ///
    /// A kind whose device disappeared switches to the first remaining
    /// device, or off when none is left, and the choice is persisted.
    pub async fn on_devices_changed(&self) -> SyncResult<Vec<Outcome>> {
        let devices = self.directory().refresh().await?;
        let mut outcomes = Vec::new();

        for kind in DeviceKind::ALL {
            let session = self.session(kind);
            let Some(current) = session.snapshot().device_id else {
                continue;
            };
            if self.directory().contains(kind, &current) {
                continue;
            }

            let replacement = devices.iter().find(|device| device.kind == kind);
            let replacement_id = replacement.map(|device| device.id.clone());
            warn!(%kind, device_id = %current, replacement = ?replacement_id, "Active device disappeared");
            self.emit(Event::DeviceReplaced {
                kind,
                previous: current,
                replacement: replacement_id.clone(),
            });

            let intent = ActivationIntent::switch(kind, SwitchTarget::from(replacement))
                .with_reason(IntentReason::SystemDeactivate);
            let result = self.apply(intent).await;
            let acquired = matches!(result, Ok(Outcome::Activated { .. }));

            let entries = vec![
                (
                    device_key(kind).to_string(),
                    Value::from(replacement_id.unwrap_or_else(|| NONE_DEVICE.to_string())),
                ),
                (active_key(kind).to_string(), Value::from(acquired)),
            ];
            if let Err(e) = self.inner.ports.store.set(entries).await {
                warn!(%kind, error = %e, "Failed to persist replacement device");
            }

            match result {
                Ok(outcome) => outcomes.push(outcome),
                Err(SyncError::ContextGone) => return Err(SyncError::ContextGone),
                Err(e) => warn!(%kind, error = %e, "Replacement device failed"),
            }
        }

        Ok(outcomes)
    }

    /// React to a change of the persisted state made by any tab
    pub async fn on_store_change(&self, change: &StoreChange) -> SyncResult<Outcome> {
        let flag = change.new_value.as_ref().and_then(Value::as_bool);

        match change.key.as_str() {
            keys::CAMERA_ACTIVE => match flag {
                Some(false) => {
                    self.apply(
                        ActivationIntent::deactivate(DeviceKind::Camera, true)
                            .with_reason(IntentReason::SystemDeactivate),
                    )
                    .await
                }
                Some(true) if !self.snapshot(DeviceKind::Camera).live => {
                    let state = PersistedState::load(self.inner.ports.store.as_ref()).await?;
                    if let Some(label) = state.camera_label {
                        self.apply(ActivationIntent::activate_by_label(DeviceKind::Camera, label, false))
                            .await
                    } else {
                        match state.device_for(DeviceKind::Camera) {
                            Some(id) if id != NONE_DEVICE => {
                                self.apply(
                                    ActivationIntent::switch(DeviceKind::Camera, SwitchTarget::parse(id))
                                        .with_reason(IntentReason::SystemDeactivate),
                                )
                                .await
                            }
                            _ => Ok(Outcome::Unchanged),
                        }
                    }
                }
                _ => Ok(Outcome::Unchanged),
            },
            keys::MIC_ACTIVE if flag == Some(false) => {
                self.apply(
                    ActivationIntent::deactivate(DeviceKind::Microphone, true)
                        .with_reason(IntentReason::SystemDeactivate),
                )
                .await
            }
            keys::DEFAULT_AUDIO_INPUT => {
                let snapshot = self.snapshot(DeviceKind::Microphone);
                let id = change.new_value.as_ref().and_then(Value::as_str);
                match id {
                    Some(id) if snapshot.live && snapshot.device_id.as_deref() != Some(id) => {
                        self.apply(
                            ActivationIntent::switch(DeviceKind::Microphone, SwitchTarget::parse(id))
                                .with_reason(IntentReason::SystemDeactivate),
                        )
                        .await
                    }
                    _ => Ok(Outcome::Unchanged),
                }
            }
            _ => Ok(Outcome::Unchanged),
        }
    }

    /// Follow store changes on a background task until the context goes away
    pub fn spawn_store_watch(&self) -> JoinHandle<()> {
        let controller = self.clone();
        let mut changes = self.inner.ports.store.subscribe();
        tokio::spawn(async move {
            loop {
                let change = tokio::select! {
                    biased;
                    _ = controller.context().invalidated() => break,
                    change = changes.recv() => change,
                };
                match change {
                    Ok(change) => {
                        if let Err(e) = controller.on_store_change(&change).await {
                            if !e.is_silent() {
                                warn!(key = %change.key, error = %e, "Failed to apply store change");
                            }
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Store watch lagging");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            debug!("Store watch stopped");
        })
    }

    /// Stop every stream and invalidate the host context; nothing runs afterwards
    pub fn shutdown(&self) {
        let sessions: Vec<_> = self.inner.sessions.lock().values().cloned().collect();
        for session in sessions {
            session.shutdown();
        }
        self.context().invalidate();
        info!("Tab controller shut down");
    }

    fn dispatch_delay(&self, message: &InboundMessage) -> Duration {
        match message {
            InboundMessage::ActivateCameraByLabel { is_tab_switch, .. } => {
                if *is_tab_switch {
                    self.inner.config.tab_switch_activation_delay
                } else {
                    self.inner.config.label_activation_delay
                }
            }
            InboundMessage::CameraSelectionChanged { .. } => self.inner.config.selection_changed_delay,
            _ => Duration::ZERO,
        }
    }

    async fn is_recording(&self) -> SyncResult<bool> {
        match PersistedState::load(self.inner.ports.store.as_ref()).await {
            Ok(state) => Ok(state.is_recording()),
            Err(SyncError::ContextGone) => Err(SyncError::ContextGone),
            Err(e) => {
                warn!(error = %e, "Could not read recording flag, assuming not recording");
                Ok(false)
            }
        }
    }

    async fn switch(&self, session: &StreamSession, ticket: &Ticket) -> SyncResult<Outcome> {
        let switch_settle = self.inner.config.switch_settle;
        if session.current_stream().is_some() {
            session.release_under(ticket).await?;
            self.context().sleep(switch_settle).await?;
        } else {
            // An earlier switch may have torn the old stream down moments ago
            let settle = session.settle_remaining(switch_settle);
            if !settle.is_zero() {
                debug!(kind = %session.kind(), settle_ms = settle.as_millis() as u64, "Waiting out settle of previous release");
                self.context().sleep(settle).await?;
            }
        }
        self.acquire(session, ticket, AcquireOptions::fresh()).await
    }

    async fn activate_by_label(
        &self,
        session: &StreamSession,
        label: &str,
        tab_switch: bool,
    ) -> SyncResult<Outcome> {
        let kind = session.kind();
        let ticket = session.claim(Some(DeviceTarget::Any));
        let resolution = self.directory().resolve_label(kind, label).await?;

        match ActivationPolicy::after_resolution(&resolution, tab_switch) {
            Decision::Acquire { target, options } => {
                let ticket = session.retarget(&ticket, target)?;
                self.acquire(session, &ticket, options).await
            }
            Decision::Unavailable => {
                warn!(%kind, label, "No device available to activate");
                self.emit(Event::Notice {
                    kind,
                    notice: Notice::NoDeviceAvailable,
                });
                Ok(Outcome::Unavailable { kind })
            }
            other => Err(SyncError::InvalidState {
                expected: "acquire decision".to_string(),
                actual: format!("{:?}", other),
            }),
        }
    }

    async fn acquire(
        &self,
        session: &StreamSession,
        ticket: &Ticket,
        options: AcquireOptions,
    ) -> SyncResult<Outcome> {
        let before = session.current_stream();
        let stream = session.acquire_with(ticket, options).await?;
        Ok(Outcome::activated(session.kind(), before.as_ref(), &stream))
    }

    async fn start_camera(&self, state: &PersistedState) -> SyncResult<Outcome> {
        let kind = DeviceKind::Camera;
        if state.is_switched_off(kind) {
            return self.ensure_released(kind).await;
        }

        if let Some(label) = &state.camera_label {
            let intent = ActivationIntent::activate_by_label(kind, label.clone(), state.is_recording());
            return self.apply(intent).await;
        }

        if let Some(id) = state.device_for(kind) {
            return self
                .apply_direct(kind, DeviceTarget::exact(id), AcquireOptions::reuse())
                .await;
        }

        let stored = match self.inner.ports.bus.stored_camera().await {
            Ok(stored) => stored,
            Err(SyncError::ContextGone) => return Err(SyncError::ContextGone),
            Err(e) => {
                warn!(error = %e, "Broker did not return a stored camera");
                StoredCamera::default()
            }
        };
        match stored.camera_label.filter(|label| !label.is_empty()) {
            Some(label) => {
                self.apply(ActivationIntent::activate_by_label(kind, label, false))
                    .await
            }
            None => {
                self.apply_direct(kind, DeviceTarget::Any, AcquireOptions::fresh())
                    .await
            }
        }
    }

    async fn start_microphone(&self, state: &PersistedState) -> SyncResult<Outcome> {
        let kind = DeviceKind::Microphone;
        if state.is_switched_off(kind) {
            return self.ensure_released(kind).await;
        }

        let target = state
            .device_for(kind)
            .map(DeviceTarget::exact)
            .unwrap_or(DeviceTarget::Any);
        self.apply_direct(kind, target, AcquireOptions::reuse()).await
    }

    async fn apply_direct(
        &self,
        kind: DeviceKind,
        target: DeviceTarget,
        options: AcquireOptions,
    ) -> SyncResult<Outcome> {
        self.context().ensure_alive()?;
        let session = self.session(kind);
        let ticket = session.claim(Some(target));
        self.acquire(&session, &ticket, options).await
    }

    async fn ensure_released(&self, kind: DeviceKind) -> SyncResult<Outcome> {
        let session = self.session(kind);
        if session.current_stream().is_some() {
            session.release().await?;
        }
        Ok(Outcome::Released { kind })
    }

    fn debouncer(&self, kind: DeviceKind) -> &Debouncer<Ticket> {
        // Built for every kind at construction
        &self.inner.debouncers[&kind]
    }

    fn emit(&self, event: Event) {
        let _ = self.inner.ports.events.send(event);
    }
}
