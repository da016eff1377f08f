//! Persisted state shared across tabs

use async_trait::async_trait;
use dashmap::DashMap;
use devsync_core::{DeviceKind, SyncError, SyncResult, NONE_DEVICE};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::broadcast;

/// Storage keys
pub mod keys {
    /// Selected camera id, or `"none"`
    pub const DEFAULT_VIDEO_INPUT: &str = "defaultVideoInput";
    /// Selected microphone id, or `"none"`
    pub const DEFAULT_AUDIO_INPUT: &str = "defaultAudioInput";
    /// Whether the camera should be on
    pub const CAMERA_ACTIVE: &str = "cameraActive";
    /// Whether the microphone should be on
    pub const MIC_ACTIVE: &str = "micActive";
    /// Label of the selected camera
    pub const CAMERA_LABEL: &str = "cameraLabel";
    /// A recording is running
    pub const RECORDING: &str = "recording";
    /// A recording is about to start
    pub const PENDING_RECORDING: &str = "pendingRecording";

    /// Every key a session reads at start
    pub const SESSION_KEYS: [&str; 7] = [
        DEFAULT_VIDEO_INPUT,
        DEFAULT_AUDIO_INPUT,
        CAMERA_ACTIVE,
        MIC_ACTIVE,
        CAMERA_LABEL,
        RECORDING,
        PENDING_RECORDING,
    ];
}

/// Key holding the selected device of a kind
pub fn device_key(kind: DeviceKind) -> &'static str {
    match kind {
        DeviceKind::Camera => keys::DEFAULT_VIDEO_INPUT,
        DeviceKind::Microphone => keys::DEFAULT_AUDIO_INPUT,
    }
}

/// Key holding the on/off flag of a kind
pub fn active_key(kind: DeviceKind) -> &'static str {
    match kind {
        DeviceKind::Camera => keys::CAMERA_ACTIVE,
        DeviceKind::Microphone => keys::MIC_ACTIVE,
    }
}

/// One observed change to the store
#[derive(Debug, Clone, PartialEq)]
pub struct StoreChange {
    /// Key that changed
    pub key: String,
    /// Value before the change
    pub old_value: Option<Value>,
    /// Value after the change
    pub new_value: Option<Value>,
}

/// Ambient key-value store shared by every tab
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Read the given keys; missing keys are absent from the map
    async fn get(&self, keys: &[&str]) -> SyncResult<HashMap<String, Value>>;

    /// Write entries, notifying subscribers of values that changed
    async fn set(&self, entries: Vec<(String, Value)>) -> SyncResult<()>;

    /// Observe changes made by any writer
    fn subscribe(&self) -> broadcast::Receiver<StoreChange>;
}

/// In-process store backed by a concurrent map
#[derive(Debug)]
pub struct MemoryStore {
    entries: DashMap<String, Value>,
    changes: broadcast::Sender<StoreChange>,
    closed: AtomicBool,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(64);
        Self {
            entries: DashMap::new(),
            changes,
            closed: AtomicBool::new(false),
        }
    }

    /// Create a store pre-filled with entries, without notifications
    pub fn with_entries<I, K>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        let store = Self::new();
        for (key, value) in entries {
            store.entries.insert(key.into(), value);
        }
        store
    }

    /// Synchronous read for tests and diagnostics
    pub fn value(&self, key: &str) -> Option<Value> {
        self.entries.get(key).map(|entry| entry.value().clone())
    }

    /// Simulate the extension context going away
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

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, keys: &[&str]) -> SyncResult<HashMap<String, Value>> {
        self.ensure_open()?;
        Ok(keys
            .iter()
            .filter_map(|key| {
                self.entries
                    .get(*key)
                    .map(|entry| (key.to_string(), entry.value().clone()))
            })
            .collect())
    }

    async fn set(&self, entries: Vec<(String, Value)>) -> SyncResult<()> {
        self.ensure_open()?;
        for (key, value) in entries {
            let old_value = self.entries.insert(key.clone(), value.clone());
            if old_value.as_ref() != Some(&value) {
                let _ = self.changes.send(StoreChange {
                    key,
                    old_value,
                    new_value: Some(value),
                });
            }
        }
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<StoreChange> {
        self.changes.subscribe()
    }
}

/// Typed view of the keys a session cares about
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PersistedState {
    /// Selected camera id
    pub default_video_input: Option<String>,
    /// Selected microphone id
    pub default_audio_input: Option<String>,
    /// Camera on/off, absent when never set
    pub camera_active: Option<bool>,
    /// Microphone on/off, absent when never set
    pub mic_active: Option<bool>,
    /// Label of the selected camera
    pub camera_label: Option<String>,
    /// A recording is running
    pub recording: bool,
    /// A recording is about to start
    pub pending_recording: bool,
}

impl PersistedState {
    /// Read every session key from the store
    pub async fn load(store: &dyn KeyValueStore) -> SyncResult<Self> {
        let entries = store.get(&keys::SESSION_KEYS).await?;
        Ok(Self::from_entries(&entries))
    }

    /// Build from raw entries, ignoring values of the wrong type
    pub fn from_entries(entries: &HashMap<String, Value>) -> Self {
        let string = |key: &str| {
            entries
                .get(key)
                .and_then(Value::as_str)
                .filter(|value| !value.is_empty())
                .map(str::to_string)
        };
        let flag = |key: &str| entries.get(key).and_then(Value::as_bool);

        Self {
            default_video_input: string(keys::DEFAULT_VIDEO_INPUT),
            default_audio_input: string(keys::DEFAULT_AUDIO_INPUT),
            camera_active: flag(keys::CAMERA_ACTIVE),
            mic_active: flag(keys::MIC_ACTIVE),
            camera_label: string(keys::CAMERA_LABEL),
            recording: flag(keys::RECORDING).unwrap_or(false),
            pending_recording: flag(keys::PENDING_RECORDING).unwrap_or(false),
        }
    }

    /// Whether a recording is running or about to start
    pub fn is_recording(&self) -> bool {
        self.recording || self.pending_recording
    }

    /// Selected device id of a kind, including `"none"`
    pub fn device_for(&self, kind: DeviceKind) -> Option<&str> {
        match kind {
            DeviceKind::Camera => self.default_video_input.as_deref(),
            DeviceKind::Microphone => self.default_audio_input.as_deref(),
        }
    }

    /// Stored on/off flag of a kind
    pub fn active_for(&self, kind: DeviceKind) -> Option<bool> {
        match kind {
            DeviceKind::Camera => self.camera_active,
            DeviceKind::Microphone => self.mic_active,
        }
    }

    /// Whether the stored state says the kind should be off
    pub fn is_switched_off(&self, kind: DeviceKind) -> bool {
        self.active_for(kind) == Some(false) || self.device_for(kind) == Some(NONE_DEVICE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_set_notifies_only_on_change() {
        let store = MemoryStore::new();
        let mut rx = store.subscribe();

        store
            .set(vec![(keys::CAMERA_ACTIVE.to_string(), json!(true))])
            .await
            .unwrap();
        store
            .set(vec![(keys::CAMERA_ACTIVE.to_string(), json!(true))])
            .await
            .unwrap();

        let change = rx.recv().await.unwrap();
        assert_eq!(change.key, keys::CAMERA_ACTIVE);
        assert_eq!(change.new_value, Some(json!(true)));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_persisted_state_load() {
        let store = MemoryStore::with_entries([
            (keys::DEFAULT_VIDEO_INPUT, json!("cam-1")),
            (keys::CAMERA_LABEL, json!("Logi Webcam")),
            (keys::PENDING_RECORDING, json!(true)),
            (keys::MIC_ACTIVE, json!("yes")),
        ]);

        let state = PersistedState::load(&store).await.unwrap();
        assert_eq!(state.device_for(DeviceKind::Camera), Some("cam-1"));
        assert_eq!(state.camera_label.as_deref(), Some("Logi Webcam"));
        assert!(state.is_recording());
        assert_eq!(state.mic_active, None);
        assert!(!state.is_switched_off(DeviceKind::Camera));
    }

    #[test]
    fn test_closed_store_reports_context_gone() {
        let store = MemoryStore::new();
        store.close();

        let read = tokio_test::block_on(store.get(&[keys::RECORDING]));
        assert_eq!(read.unwrap_err(), SyncError::ContextGone);
        let write = tokio_test::block_on(store.set(vec![(keys::RECORDING.to_string(), json!(true))]));
        assert_eq!(write.unwrap_err(), SyncError::ContextGone);
    }

    #[test]
    fn test_switched_off() {
        let state = PersistedState {
            default_audio_input: Some(NONE_DEVICE.to_string()),
            camera_active: Some(false),
            ..PersistedState::default()
        };
        assert!(state.is_switched_off(DeviceKind::Camera));
        assert!(state.is_switched_off(DeviceKind::Microphone));
    }
}
