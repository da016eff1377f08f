//! Stream session tests
//!
//! Cover ownership transfer, busy retries with a single fallback, permission
//! refusal, and discard of superseded acquisitions. All tests run on a paused
//! clock so settle and backoff delays are observable without waiting.

use devsync_core::*;
use devsync_media::*;
use devsync_signaling::*;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::Instant;

struct Harness {
    platform: Arc<MockPlatform>,
    bus: Arc<MemoryBus>,
    store: Arc<MemoryStore>,
    context: HostContext,
    events: broadcast::Receiver<Event>,
    session: Arc<StreamSession>,
}

fn harness(kind: DeviceKind) -> Harness {
    let platform = Arc::new(MockPlatform::with_devices(vec![
        DeviceDescriptor::new(DeviceKind::Camera, "cam-1", "FaceTime HD"),
        DeviceDescriptor::new(DeviceKind::Camera, "cam-2", "OBS Virtual Camera"),
        DeviceDescriptor::new(DeviceKind::Microphone, "mic-1", "MacBook Microphone"),
    ]));
    let bus = Arc::new(MemoryBus::new());
    let store = Arc::new(MemoryStore::new());
    let context = HostContext::new();
    let (tx, events) = broadcast::channel(64);
    let ports = SessionPorts {
        platform: platform.clone(),
        bus: bus.clone(),
        store: store.clone(),
        context: context.clone(),
        events: tx,
    };
    let session = Arc::new(StreamSession::new(kind, SessionTiming::default(), ports));

    Harness {
        platform,
        bus,
        store,
        context,
        events,
        session,
    }
}

fn drain(events: &mut broadcast::Receiver<Event>) -> Vec<Event> {
    let mut out = Vec::new();
    while let Ok(event) = events.try_recv() {
        out.push(event);
    }
    out
}

#[tokio::test(start_paused = true)]
async fn test_acquire_persists_device_and_label() {
    let h = harness(DeviceKind::Camera);

    h.session
        .acquire(DeviceTarget::Any, AcquireOptions::fresh())
        .await
        .unwrap();

    assert_eq!(
        h.store.value(keys::DEFAULT_VIDEO_INPUT),
        Some(serde_json::json!("cam-1"))
    );
    assert_eq!(
        h.store.value(keys::CAMERA_LABEL),
        Some(serde_json::json!("FaceTime HD"))
    );
}

#[tokio::test(start_paused = true)]
async fn test_microphone_does_not_write_camera_label() {
    let h = harness(DeviceKind::Microphone);

    h.session
        .acquire(DeviceTarget::exact("mic-1"), AcquireOptions::fresh())
        .await
        .unwrap();

    assert_eq!(
        h.store.value(keys::DEFAULT_AUDIO_INPUT),
        Some(serde_json::json!("mic-1"))
    );
    assert_eq!(h.store.value(keys::CAMERA_LABEL), None);
    assert_eq!(
        h.bus.published(),
        vec![OutboundMessage::active_tab(
            DeviceKind::Microphone,
            true,
            Some("mic-1".to_string()),
            Some("MacBook Microphone".to_string())
        )]
    );
}

#[tokio::test(start_paused = true)]
async fn test_switch_stops_old_stream_and_settles() {
    let h = harness(DeviceKind::Camera);

    let first = h
        .session
        .acquire(DeviceTarget::exact("cam-1"), AcquireOptions::fresh())
        .await
        .unwrap();

    let started = Instant::now();
    let second = h
        .session
        .acquire(DeviceTarget::exact("cam-2"), AcquireOptions::fresh())
        .await
        .unwrap();

    assert!(started.elapsed() >= Duration::from_millis(800));
    assert!(!first.is_live());
    assert!(second.is_live());
    assert_eq!(h.platform.live_track_count(), 1);
    assert_eq!(
        h.bus.published(),
        vec![
            OutboundMessage::active_tab(
                DeviceKind::Camera,
                true,
                Some("cam-1".to_string()),
                Some("FaceTime HD".to_string())
            ),
            OutboundMessage::active_tab(DeviceKind::Camera, false, None, None),
            OutboundMessage::active_tab(
                DeviceKind::Camera,
                true,
                Some("cam-2".to_string()),
                Some("OBS Virtual Camera".to_string())
            ),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_first_acquire_skips_settle() {
    let h = harness(DeviceKind::Camera);

    let started = Instant::now();
    h.session
        .acquire(DeviceTarget::exact("cam-1"), AcquireOptions::fresh())
        .await
        .unwrap();

    assert_eq!(started.elapsed(), Duration::ZERO);
}

#[tokio::test(start_paused = true)]
async fn test_reuse_keeps_stream_identity() {
    let mut h = harness(DeviceKind::Camera);

    let first = h
        .session
        .acquire(DeviceTarget::exact("cam-1"), AcquireOptions::fresh())
        .await
        .unwrap();
    drain(&mut h.events);

    let second = h
        .session
        .acquire(DeviceTarget::exact("cam-1"), AcquireOptions::reuse())
        .await
        .unwrap();

    assert!(first.same_stream(&second));
    assert_eq!(h.platform.open_count(), 1);
    assert_eq!(h.platform.stop_calls(), 0);
    assert_eq!(
        drain(&mut h.events),
        vec![Event::StreamActivated {
            kind: DeviceKind::Camera,
            device_id: "cam-1".to_string(),
            label: "FaceTime HD".to_string(),
            reused: true,
        }]
    );
}

#[tokio::test(start_paused = true)]
async fn test_reuse_opens_when_device_differs() {
    let h = harness(DeviceKind::Camera);

    h.session
        .acquire(DeviceTarget::exact("cam-1"), AcquireOptions::fresh())
        .await
        .unwrap();
    let second = h
        .session
        .acquire(DeviceTarget::exact("cam-2"), AcquireOptions::reuse())
        .await
        .unwrap();

    assert_eq!(second.device_id(), Some("cam-2"));
    assert_eq!(h.platform.open_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_busy_retries_then_falls_back_once() {
    let mut h = harness(DeviceKind::Camera);
    h.platform.fail_times(
        DeviceKind::Camera,
        DeviceTarget::exact("cam-2"),
        PlatformError::busy(),
        3,
    );

    let started = Instant::now();
    let stream = h
        .session
        .acquire(DeviceTarget::exact("cam-2"), AcquireOptions::fresh())
        .await
        .unwrap();

    assert_eq!(stream.device_id(), Some("cam-1"));
    assert_eq!(
        h.platform.open_calls(),
        vec![
            (DeviceKind::Camera, DeviceTarget::exact("cam-2")),
            (DeviceKind::Camera, DeviceTarget::exact("cam-2")),
            (DeviceKind::Camera, DeviceTarget::exact("cam-2")),
            (DeviceKind::Camera, DeviceTarget::Any),
        ]
    );
    // 1s + 2s backoff, then the 1s fallback delay
    assert_eq!(started.elapsed(), Duration::from_millis(4000));

    let events = drain(&mut h.events);
    assert!(events.contains(&Event::Notice {
        kind: DeviceKind::Camera,
        notice: Notice::DeviceBusy,
    }));
}

#[tokio::test(start_paused = true)]
async fn test_busy_recovers_within_retries() {
    let mut h = harness(DeviceKind::Camera);
    h.platform.fail_times(
        DeviceKind::Camera,
        DeviceTarget::exact("cam-2"),
        PlatformError::busy(),
        2,
    );

    let stream = h
        .session
        .acquire(DeviceTarget::exact("cam-2"), AcquireOptions::fresh())
        .await
        .unwrap();

    assert_eq!(stream.device_id(), Some("cam-2"));
    assert_eq!(h.platform.open_count(), 3);
    let events = drain(&mut h.events);
    assert!(events.contains(&Event::Notice {
        kind: DeviceKind::Camera,
        notice: Notice::SwitchedAfterRetry,
    }));
    assert!(!events.contains(&Event::Notice {
        kind: DeviceKind::Camera,
        notice: Notice::DeviceBusy,
    }));
}

#[tokio::test(start_paused = true)]
async fn test_busy_on_any_has_no_fallback() {
    let h = harness(DeviceKind::Camera);
    h.platform
        .fail_times(DeviceKind::Camera, DeviceTarget::Any, PlatformError::busy(), 5);

    let result = h
        .session
        .acquire(DeviceTarget::Any, AcquireOptions::fresh())
        .await;

    assert_eq!(
        result.unwrap_err(),
        SyncError::DeviceBusy {
            device: "any".to_string(),
            attempts: 3,
        }
    );
    assert_eq!(h.platform.open_count(), 3);
    assert_eq!(h.session.state(), SessionState::Failed);
}

#[tokio::test(start_paused = true)]
async fn test_missing_device_falls_back_immediately() {
    let h = harness(DeviceKind::Camera);

    let started = Instant::now();
    let stream = h
        .session
        .acquire(DeviceTarget::exact("unplugged"), AcquireOptions::fresh())
        .await
        .unwrap();

    assert_eq!(stream.device_id(), Some("cam-1"));
    assert_eq!(started.elapsed(), Duration::ZERO);
    assert_eq!(
        h.platform.open_calls(),
        vec![
            (DeviceKind::Camera, DeviceTarget::exact("unplugged")),
            (DeviceKind::Camera, DeviceTarget::Any),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_permission_denied_falls_back_once() {
    let mut h = harness(DeviceKind::Camera);
    h.platform.fail_next(
        DeviceKind::Camera,
        DeviceTarget::exact("cam-2"),
        PlatformError::permission_denied(),
    );

    let started = Instant::now();
    let stream = h
        .session
        .acquire(DeviceTarget::exact("cam-2"), AcquireOptions::fresh())
        .await
        .unwrap();

    assert_eq!(stream.device_id(), Some("cam-1"));
    assert_eq!(started.elapsed(), Duration::ZERO);
    assert_eq!(
        h.platform.open_calls(),
        vec![
            (DeviceKind::Camera, DeviceTarget::exact("cam-2")),
            (DeviceKind::Camera, DeviceTarget::Any),
        ]
    );
    assert_eq!(h.session.state(), SessionState::Active);

    let events = drain(&mut h.events);
    assert!(events.contains(&Event::Notice {
        kind: DeviceKind::Camera,
        notice: Notice::PermissionDenied,
    }));
}

#[tokio::test(start_paused = true)]
async fn test_permission_denied_on_any_is_terminal() {
    let mut h = harness(DeviceKind::Camera);
    h.platform.fail_next(
        DeviceKind::Camera,
        DeviceTarget::Any,
        PlatformError::permission_denied(),
    );

    let result = h
        .session
        .acquire(DeviceTarget::Any, AcquireOptions::fresh())
        .await;

    assert_eq!(
        result.unwrap_err(),
        SyncError::PermissionDenied {
            kind: DeviceKind::Camera,
        }
    );
    assert_eq!(h.platform.open_count(), 1);
    assert_eq!(h.session.state(), SessionState::Failed);

    let events = drain(&mut h.events);
    assert!(events.contains(&Event::Notice {
        kind: DeviceKind::Camera,
        notice: Notice::PermissionDenied,
    }));
    assert!(events
        .iter()
        .any(|event| event.event_type() == "acquisition_failed"));
}

#[tokio::test(start_paused = true)]
async fn test_refused_fallback_notices_once() {
    let mut h = harness(DeviceKind::Camera);
    h.platform.fail_next(
        DeviceKind::Camera,
        DeviceTarget::exact("cam-2"),
        PlatformError::permission_denied(),
    );
    h.platform.fail_next(
        DeviceKind::Camera,
        DeviceTarget::Any,
        PlatformError::permission_denied(),
    );

    let result = h
        .session
        .acquire(DeviceTarget::exact("cam-2"), AcquireOptions::fresh())
        .await;

    assert_eq!(
        result.unwrap_err(),
        SyncError::PermissionDenied {
            kind: DeviceKind::Camera,
        }
    );
    assert_eq!(h.platform.open_count(), 2);
    assert_eq!(h.session.state(), SessionState::Failed);

    let notices = drain(&mut h.events)
        .into_iter()
        .filter(|event| {
            *event
                == Event::Notice {
                    kind: DeviceKind::Camera,
                    notice: Notice::PermissionDenied,
                }
        })
        .count();
    assert_eq!(notices, 1);
}

#[tokio::test(start_paused = true)]
async fn test_overtaking_acquire_waits_out_settle() {
    let h = harness(DeviceKind::Camera);
    h.session
        .acquire(DeviceTarget::exact("cam-1"), AcquireOptions::fresh())
        .await
        .unwrap();

    let started = Instant::now();
    let session = h.session.clone();
    let first = tokio::spawn(async move {
        session
            .acquire(DeviceTarget::exact("cam-2"), AcquireOptions::fresh())
            .await
    });
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(h.platform.live_track_count(), 0);

    let stream = h
        .session
        .acquire(DeviceTarget::exact("cam-1"), AcquireOptions::fresh())
        .await
        .unwrap();

    assert!(started.elapsed() >= Duration::from_millis(800));
    assert_eq!(stream.device_id(), Some("cam-1"));
    assert!(matches!(
        first.await.unwrap(),
        Err(SyncError::Superseded { .. })
    ));
    assert!(!h
        .platform
        .open_calls()
        .contains(&(DeviceKind::Camera, DeviceTarget::exact("cam-2"))));
}

#[tokio::test(start_paused = true)]
async fn test_fallback_failure_is_returned() {
    let h = harness(DeviceKind::Camera);
    h.platform.fail_next(
        DeviceKind::Camera,
        DeviceTarget::exact("cam-2"),
        PlatformError::not_found(),
    );
    h.platform.fail_next(
        DeviceKind::Camera,
        DeviceTarget::Any,
        PlatformError::not_found(),
    );

    let result = h
        .session
        .acquire(DeviceTarget::exact("cam-2"), AcquireOptions::fresh())
        .await;

    assert_eq!(
        result.unwrap_err(),
        SyncError::DeviceNotFound {
            device: "any".to_string(),
        }
    );
    assert_eq!(h.platform.open_count(), 2);
    assert_eq!(h.platform.live_track_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_superseded_acquisition_is_discarded() {
    let mut h = harness(DeviceKind::Camera);
    h.platform.set_open_delay(
        DeviceKind::Camera,
        DeviceTarget::exact("cam-1"),
        Duration::from_secs(5),
    );

    let slow = {
        let session = h.session.clone();
        tokio::spawn(async move {
            session
                .acquire(DeviceTarget::exact("cam-1"), AcquireOptions::fresh())
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;

    let fast = h
        .session
        .acquire(DeviceTarget::exact("cam-2"), AcquireOptions::fresh())
        .await
        .unwrap();

    let result = slow.await.unwrap();
    assert!(matches!(result, Err(SyncError::Superseded { .. })));
    assert!(fast.is_live());
    assert_eq!(h.platform.live_track_count(), 1);
    assert_eq!(h.session.snapshot().device_id.as_deref(), Some("cam-2"));
    assert!(h.session.sink().unwrap().same_stream(&fast));

    let events = drain(&mut h.events);
    assert!(events.contains(&Event::AcquisitionDiscarded {
        kind: DeviceKind::Camera,
        device_id: "cam-1".to_string(),
    }));
    // The discarded stream never reaches the coordinator
    assert!(h.bus.published().iter().all(|message| !matches!(
        message,
        OutboundMessage::SetCameraActiveTab {
            default_device_id: Some(id),
            ..
        } if id == "cam-1"
    )));
}

#[tokio::test(start_paused = true)]
async fn test_release_supersedes_pending_acquisition() {
    let h = harness(DeviceKind::Camera);
    h.platform.set_open_delay(
        DeviceKind::Camera,
        DeviceTarget::exact("cam-1"),
        Duration::from_secs(2),
    );

    let pending = {
        let session = h.session.clone();
        tokio::spawn(async move {
            session
                .acquire(DeviceTarget::exact("cam-1"), AcquireOptions::fresh())
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;

    h.session.release().await.unwrap();
    let result = pending.await.unwrap();

    assert!(matches!(result, Err(SyncError::Superseded { .. })));
    assert_eq!(h.platform.live_track_count(), 0);
    assert_eq!(h.session.state(), SessionState::Idle);
}

#[tokio::test(start_paused = true)]
async fn test_release_is_idempotent() {
    let h = harness(DeviceKind::Camera);

    h.session
        .acquire(DeviceTarget::exact("cam-1"), AcquireOptions::fresh())
        .await
        .unwrap();

    let started = Instant::now();
    tokio_test::assert_ok!(h.session.release().await);
    assert!(started.elapsed() >= Duration::from_millis(800));
    tokio_test::assert_ok!(h.session.release().await);

    assert_eq!(h.platform.stop_calls(), 1);
    assert_eq!(h.platform.live_track_count(), 0);
    assert_eq!(h.session.state(), SessionState::Idle);
    assert!(h.session.current_stream().is_none());

    let inactive = OutboundMessage::active_tab(DeviceKind::Camera, false, None, None);
    let published = h.bus.published();
    assert_eq!(published.len(), 3);
    assert_eq!(published[1], inactive);
    assert_eq!(published[2], inactive);
}

#[tokio::test(start_paused = true)]
async fn test_release_stops_detached_sink() {
    let h = harness(DeviceKind::Camera);

    h.session
        .acquire(DeviceTarget::exact("cam-1"), AcquireOptions::fresh())
        .await
        .unwrap();
    let stray = h
        .platform
        .open_stream(DeviceKind::Camera, &DeviceTarget::exact("cam-2"))
        .await
        .unwrap();
    h.session.attach_sink(stray.clone());

    h.session.release().await.unwrap();

    assert!(!stray.is_live());
    assert_eq!(h.platform.live_track_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_context_loss_aborts_retries() {
    let h = harness(DeviceKind::Camera);
    h.platform.fail_times(
        DeviceKind::Camera,
        DeviceTarget::exact("cam-2"),
        PlatformError::busy(),
        3,
    );

    let pending = {
        let session = h.session.clone();
        tokio::spawn(async move {
            session
                .acquire(DeviceTarget::exact("cam-2"), AcquireOptions::fresh())
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(500)).await;
    h.context.invalidate();

    let result = pending.await.unwrap();
    assert_eq!(result.unwrap_err(), SyncError::ContextGone);
    assert_eq!(h.platform.open_count(), 1);
    assert!(h.session.release().await.unwrap_err().is_silent());
}

#[tokio::test(start_paused = true)]
async fn test_context_invalidated_error_is_silent() {
    let mut h = harness(DeviceKind::Camera);
    h.platform.fail_next(
        DeviceKind::Camera,
        DeviceTarget::exact("cam-1"),
        PlatformError::context_invalidated(),
    );

    let result = h
        .session
        .acquire(DeviceTarget::exact("cam-1"), AcquireOptions::fresh())
        .await;

    assert_eq!(result.unwrap_err(), SyncError::ContextGone);
    assert_eq!(h.platform.open_count(), 1);
    assert!(drain(&mut h.events)
        .iter()
        .all(|event| !matches!(event, Event::Notice { .. })));
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_stops_without_messages() {
    let h = harness(DeviceKind::Camera);

    h.session
        .acquire(DeviceTarget::exact("cam-1"), AcquireOptions::fresh())
        .await
        .unwrap();
    h.bus.clear();

    h.session.shutdown();

    assert_eq!(h.platform.live_track_count(), 0);
    assert!(h.bus.published().is_empty());
}
