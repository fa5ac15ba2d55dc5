// src/source.rs
//
// Capture-source abstractions.
//
// Browser media objects (capture streams, tracks) are modelled as opaque
// handles behind the `CaptureProvider` seam: a native build binds them to a
// camera/screen capture backend, tests substitute synthetic tracks.  A
// `MediaTrack` is a cheaply clonable handle; stopping any clone stops the
// underlying track for every holder, mirroring `MediaStreamTrack` semantics.
//
// ────────────────────────────────────────────────────────────────────────────

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::error::MeshError;

// ─── Kinds and provenance ───────────────────────────────────────────────────

/// Media kind of a track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackKind {
    Audio,
    Video,
}

/// Provenance of a local source — decides what "toggle" or "switch" means.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Camera,
    Screen,
    Composite,
}

// ─── MediaTrack ─────────────────────────────────────────────────────────────

struct TrackInner {
    id: String,
    kind: TrackKind,
    label: String,
    enabled: AtomicBool,
    // `false` once stopped; watchers use it as the end-of-capture signal
    // (the browser's "stop sharing" affordance surfaces here).
    live_tx: watch::Sender<bool>,
}

/// Handle to one audio or video track.
#[derive(Clone)]
pub struct MediaTrack {
    inner: Arc<TrackInner>,
}

impl MediaTrack {
    pub fn new(kind: TrackKind, label: impl Into<String>) -> Self {
        let (live_tx, _) = watch::channel(true);
        Self {
            inner: Arc::new(TrackInner {
                id: uuid::Uuid::new_v4().to_string(),
                kind,
                label: label.into(),
                enabled: AtomicBool::new(true),
                live_tx,
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn kind(&self) -> TrackKind {
        self.inner.kind
    }

    pub fn label(&self) -> &str {
        &self.inner.label
    }

    /// True until `stop` is called on any clone of this handle.
    pub fn is_live(&self) -> bool {
        *self.inner.live_tx.borrow()
    }

    /// Mute/unmute without stopping the device (mic mute semantics).
    pub fn set_enabled(&self, enabled: bool) {
        self.inner.enabled.store(enabled, Ordering::Relaxed);
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.enabled.load(Ordering::Relaxed)
    }

    /// Permanently stop the track. Idempotent.
    pub fn stop(&self) {
        self.inner.live_tx.send_replace(false);
    }

    /// Resolves when the track ends, whether stopped through this API or by
    /// the capture backend (e.g. the user hitting the browser-native "stop
    /// sharing" button).
    pub async fn ended(&self) {
        let mut rx = self.inner.live_tx.subscribe();
        loop {
            if !*rx.borrow() {
                return;
            }
            if rx.changed().await.is_err() {
                return;
            }
        }
    }
}

impl std::fmt::Debug for MediaTrack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaTrack")
            .field("id", &self.inner.id)
            .field("kind", &self.inner.kind)
            .field("label", &self.inner.label)
            .field("live", &self.is_live())
            .finish()
    }
}

// ─── LocalSource ────────────────────────────────────────────────────────────

/// The current outgoing audio/video source.
///
/// Replaced whole, never mutated in place: a swap produces a new
/// `LocalSource` and the old one's tracks are stopped only after every
/// session carries the replacement.
#[derive(Debug, Clone)]
pub struct LocalSource {
    pub kind: SourceKind,
    pub audio: Option<MediaTrack>,
    pub video: Option<MediaTrack>,
}

impl LocalSource {
    pub fn new(kind: SourceKind, audio: Option<MediaTrack>, video: Option<MediaTrack>) -> Self {
        Self { kind, audio, video }
    }

    /// Live tracks, audio first.
    pub fn tracks(&self) -> Vec<MediaTrack> {
        self.audio
            .iter()
            .chain(self.video.iter())
            .filter(|t| t.is_live())
            .cloned()
            .collect()
    }

    pub fn stop_all(&self) {
        if let Some(t) = &self.audio {
            t.stop();
        }
        if let Some(t) = &self.video {
            t.stop();
        }
    }
}

// ─── SourceSlot ─────────────────────────────────────────────────────────────

/// Shared read view of the active `LocalSource`.
///
/// Exclusively written by the renegotiation engine; the session manager only
/// reads it when attaching tracks to a freshly created session.
#[derive(Default)]
pub struct SourceSlot {
    current: std::sync::RwLock<Option<LocalSource>>,
}

impl SourceSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> Option<LocalSource> {
        self.current.read().unwrap().clone()
    }

    /// Install a new source, returning the previous one (not yet stopped).
    pub fn replace(&self, source: LocalSource) -> Option<LocalSource> {
        self.current.write().unwrap().replace(source)
    }

    pub fn take(&self) -> Option<LocalSource> {
        self.current.write().unwrap().take()
    }
}

// ─── Inbound streams ────────────────────────────────────────────────────────

/// Handle to a remote participant's inbound media.
#[derive(Debug, Clone)]
pub struct MediaStreamHandle {
    pub id: String,
    pub tracks: Vec<MediaTrack>,
}

impl MediaStreamHandle {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            tracks: Vec::new(),
        }
    }

    pub fn audio_track(&self) -> Option<&MediaTrack> {
        self.tracks.iter().find(|t| t.kind() == TrackKind::Audio)
    }

    pub fn video_track(&self) -> Option<&MediaTrack> {
        self.tracks.iter().find(|t| t.kind() == TrackKind::Video)
    }
}

// ─── Video frames ───────────────────────────────────────────────────────────

/// One decoded video frame handed to the compositor.
#[derive(Debug, Clone)]
pub struct VideoFrame {
    pub width: u32,
    pub height: u32,
    pub data: Bytes,
}

impl VideoFrame {
    /// Frames with no pixels are skipped by the compositor rather than drawn
    /// as black.
    pub fn is_drawable(&self) -> bool {
        self.width > 0 && self.height > 0
    }
}

/// Pull interface for the latest frame of a video track.
pub trait VideoFrameSource: Send + Sync {
    fn latest_frame(&self) -> Option<VideoFrame>;
}

// ─── CaptureProvider ────────────────────────────────────────────────────────

/// Produces local capture sources.
///
/// Failures (permission denied, device busy) surface as
/// [`MeshError::SourceUnavailable`] and must leave no partially acquired
/// device behind.
#[async_trait]
pub trait CaptureProvider: Send + Sync {
    /// Acquire a full audio+video source of the given provenance.
    async fn acquire(&self, kind: SourceKind) -> Result<LocalSource, MeshError>;

    /// Acquire a microphone-only track (used by the recording compositor).
    async fn acquire_microphone(&self) -> Result<MediaTrack, MeshError>;

    /// Acquire a video-only track of the given provenance.
    async fn acquire_video(&self, kind: SourceKind) -> Result<MediaTrack, MeshError>;

    /// Frame source for a video track acquired from this provider.
    fn frame_source(&self, track: &MediaTrack) -> Arc<dyn VideoFrameSource>;
}

// ─── Tests ──────────────────────────────────────────────────────────────────
