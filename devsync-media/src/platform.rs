//! Media platform seam
//!
//! The browser (or any host) supplies device enumeration, stream
//! acquisition and the floating video surface through [`MediaPlatform`].

use crate::error::PlatformError;
use async_trait::async_trait;
use devsync_core::{DeviceDescriptor, DeviceKind, DeviceTarget};
use std::fmt;
use std::sync::Arc;
use tracing::warn;

/// One track of a live stream
pub trait MediaTrack: Send + Sync + fmt::Debug {
    /// Track id
    fn id(&self) -> &str;
    /// Device class
    fn kind(&self) -> DeviceKind;
    /// Label of the device feeding the track
    fn label(&self) -> &str;
    /// Id of the device feeding the track
    fn device_id(&self) -> &str;
    /// Whether the track still holds the device
    fn is_live(&self) -> bool;
    /// Stop the track and release the device
    fn stop(&self) -> Result<(), PlatformError>;
}

/// Handle to a platform stream; clones share the same tracks
#[derive(Debug, Clone)]
pub struct MediaStream {
    id: String,
    kind: DeviceKind,
    tracks: Vec<Arc<dyn MediaTrack>>,
}

impl MediaStream {
    /// Wrap tracks under a fresh stream id
    pub fn new(kind: DeviceKind, tracks: Vec<Arc<dyn MediaTrack>>) -> Self {
        Self::with_id(uuid::Uuid::new_v4().to_string(), kind, tracks)
    }

    /// Wrap tracks under a known stream id
    pub fn with_id(id: impl Into<String>, kind: DeviceKind, tracks: Vec<Arc<dyn MediaTrack>>) -> Self {
        Self {
            id: id.into(),
            kind,
            tracks,
        }
    }

    /// Stream id; identity is preserved across clones
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Device class
    pub fn kind(&self) -> DeviceKind {
        self.kind
    }

    /// All tracks
    pub fn tracks(&self) -> &[Arc<dyn MediaTrack>] {
        &self.tracks
    }

    /// First track of the stream's kind
    pub fn primary_track(&self) -> Option<&Arc<dyn MediaTrack>> {
        self.tracks.iter().find(|track| track.kind() == self.kind)
    }

    /// Device feeding the primary track
    pub fn device_id(&self) -> Option<&str> {
        self.primary_track().map(|track| track.device_id())
    }

    /// Label of the device feeding the primary track
    pub fn label(&self) -> Option<&str> {
        self.primary_track().map(|track| track.label())
    }

    /// Whether any track is still live
    pub fn is_live(&self) -> bool {
        self.tracks.iter().any(|track| track.is_live())
    }

    /// Same underlying stream
    pub fn same_stream(&self, other: &MediaStream) -> bool {
        self.id == other.id
    }

    /// Stop every live track, returning how many were stopped.
    ///
    /// Ended tracks are skipped. A failing track is logged and the rest are
    /// still stopped.
    pub fn stop(&self) -> usize {
        let mut stopped = 0;
        for track in self.tracks.iter().filter(|track| track.is_live()) {
            match track.stop() {
                Ok(()) => stopped += 1,
                Err(e) => warn!(
                    stream_id = %self.id,
                    track_id = %track.id(),
                    error = %e,
                    "Failed to stop track"
                ),
            }
        }
        stopped
    }
}

/// Host media capabilities
#[async_trait]
pub trait MediaPlatform: Send + Sync {
    /// List every camera and microphone currently visible
    async fn enumerate_devices(&self) -> Result<Vec<DeviceDescriptor>, PlatformError>;

    /// Open a stream of `kind` honoring `target`
    async fn open_stream(
        &self,
        kind: DeviceKind,
        target: &DeviceTarget,
    ) -> Result<MediaStream, PlatformError>;

    /// Show the stream in an always-on-top surface
    async fn request_picture_in_picture(&self, stream: &MediaStream) -> Result<(), PlatformError>;

    /// Close the always-on-top surface
    async fn exit_picture_in_picture(&self) -> Result<(), PlatformError>;
}
