// src/compositor.rs
//
// Merged recording.
//
// The host records the room into a single artifact: a compositor task pulls
// frames from a dedicated local video capture at a fixed rate while an
// `AudioMixBus` tracks the audio inputs (the local microphone plus every
// remote participant), following mid-recording churn through the event bus.
// Encoding itself sits behind `RecordingEncoder`; chunk assembly and the
// final upload happen here.
//
// ────────────────────────────────────────────────────────────────────────────

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::MeshConfig;
use crate::error::MeshError;
use crate::events::RoomEvent;
use crate::mesh::PeerSessionManager;
use crate::signal::Role;
use crate::source::{CaptureProvider, MediaTrack, SourceKind, VideoFrame, VideoFrameSource};

// ─── Encoder and sink seams ─────────────────────────────────────────────────

/// Media encoder behind the compositor.  Produces container chunks that,
/// concatenated in order, form the final artifact.
#[async_trait]
pub trait RecordingEncoder: Send + Sync {
    async fn start(&self, width: u32, height: u32) -> Result<(), MeshError>;

    /// Feed one composited frame, stamped with time since recording start.
    async fn push_frame(&self, frame: &VideoFrame, elapsed: Duration) -> Result<(), MeshError>;

    /// Replace the set of audio inputs being mixed in.
    async fn set_audio_inputs(&self, inputs: &[String]) -> Result<(), MeshError>;

    /// Chunks encoded since the last poll.
    async fn poll_chunks(&self) -> Vec<Bytes>;

    /// Flush and return any remaining chunks.
    async fn finish(&self) -> Result<Vec<Bytes>, MeshError>;
}

/// Destination of finished recordings.
#[async_trait]
pub trait ArtifactSink: Send + Sync {
    async fn upload(&self, artifact: &RecordingArtifact) -> Result<(), MeshError>;
}

/// A finished recording.
#[derive(Debug, Clone)]
pub struct RecordingArtifact {
    pub file_name: String,
    pub mime_type: String,
    pub data: Bytes,
    pub duration: Duration,
}

fn artifact_name() -> String {
    format!("merged-recording-{}.webm", chrono::Utc::now().timestamp_millis())
}

// ─── AudioMixBus ────────────────────────────────────────────────────────────

/// The set of audio tracks feeding the recording mix, keyed by participant
/// ("local" for the host's microphone, session ids for remotes).
#[derive(Default)]
pub struct AudioMixBus {
    inputs: Mutex<BTreeMap<String, MediaTrack>>,
}

impl AudioMixBus {
    pub const LOCAL: &'static str = "local";

    pub fn new() -> Self {
        Self::default()
    }

    pub fn attach(&self, id: impl Into<String>, track: MediaTrack) {
        self.inputs.lock().unwrap().insert(id.into(), track);
    }

    pub fn detach(&self, id: &str) -> bool {
        self.inputs.lock().unwrap().remove(id).is_some()
    }

    /// Input keys in stable order.
    pub fn input_ids(&self) -> Vec<String> {
        self.inputs.lock().unwrap().keys().cloned().collect()
    }
}

// ─── RecordingCompositor ────────────────────────────────────────────────────

struct ActiveRecording {
    encoder: Arc<dyn RecordingEncoder>,
    cancel: CancellationToken,
    mic: MediaTrack,
    video: Mutex<MediaTrack>,
    // Swapped when the recorded source switches mid-recording.
    frame_source: Arc<Mutex<Arc<dyn VideoFrameSource>>>,
    chunks: Arc<Mutex<Vec<Bytes>>>,
    started_at: Instant,
    tick_task: JoinHandle<()>,
    churn_task: JoinHandle<()>,
}

/// Drives one recording at a time for the room host.
pub struct RecordingCompositor {
    capture: Arc<dyn CaptureProvider>,
    manager: Arc<PeerSessionManager>,
    sink: Arc<dyn ArtifactSink>,
    config: MeshConfig,
    active: tokio::sync::Mutex<Option<ActiveRecording>>,
}

impl RecordingCompositor {
    pub fn new(
        capture: Arc<dyn CaptureProvider>,
        manager: Arc<PeerSessionManager>,
        sink: Arc<dyn ArtifactSink>,
        config: MeshConfig,
    ) -> Self {
        Self {
            capture,
            manager,
            sink,
            config,
            active: tokio::sync::Mutex::new(None),
        }
    }

    pub async fn is_recording(&self) -> bool {
        self.active.lock().await.is_some()
    }

    // ─── Start ──────────────────────────────────────────────────────────

    /// Start recording.  Host only, one at a time.  Capture acquisition is
    /// all-or-nothing: a failure releases anything already acquired.
    pub async fn start(&self, encoder: Arc<dyn RecordingEncoder>) -> Result<(), MeshError> {
        if self.manager.role() != Some(Role::Host) {
            return Err(MeshError::recording("only the host can record"));
        }
        let mut active = self.active.lock().await;
        if active.is_some() {
            return Err(MeshError::recording("a recording is already running"));
        }

        let mic = self.capture.acquire_microphone().await?;
        let video = match self.capture.acquire_video(SourceKind::Camera).await {
            Ok(video) => video,
            Err(e) => {
                mic.stop();
                return Err(e);
            }
        };

        if let Err(e) = encoder
            .start(self.config.recording_width, self.config.recording_height)
            .await
        {
            mic.stop();
            video.stop();
            return Err(e);
        }

        // Seed the mix: our microphone plus every remote already delivering
        // media, then follow churn through the event bus.
        let mix = Arc::new(AudioMixBus::new());
        mix.attach(AudioMixBus::LOCAL, mic.clone());
        for (remote_id, stream) in self.manager.inbound_streams() {
            if let Some(audio) = stream.audio_track() {
                mix.attach(remote_id, audio.clone());
            }
        }
        if let Err(e) = encoder.set_audio_inputs(&mix.input_ids()).await {
            mic.stop();
            video.stop();
            return Err(e);
        }

        let cancel = CancellationToken::new();
        let frame_source = Arc::new(Mutex::new(self.capture.frame_source(&video)));
        let chunks = Arc::new(Mutex::new(Vec::new()));
        let started_at = Instant::now();

        let tick_task = tokio::spawn(Self::tick_loop(
            encoder.clone(),
            frame_source.clone(),
            chunks.clone(),
            cancel.clone(),
            self.config.recording_fps,
            started_at,
        ));
        let churn_task = tokio::spawn(Self::churn_loop(
            encoder.clone(),
            mix.clone(),
            self.manager.events().subscribe(),
            cancel.clone(),
        ));

        *active = Some(ActiveRecording {
            encoder,
            cancel,
            mic,
            video: Mutex::new(video),
            frame_source,
            chunks,
            started_at,
            tick_task,
            churn_task,
        });
        info!(
            width = self.config.recording_width,
            height = self.config.recording_height,
            fps = self.config.recording_fps,
            "recording started"
        );
        Ok(())
    }

    // ─── Compositor tick ────────────────────────────────────────────────

    /// Fixed-rate draw loop.  Frames with zero dimensions (a source mid-
    /// switch, a camera warming up) are not drawn; the last good frame is
    /// repeated instead, so the output never flashes black.
    async fn tick_loop(
        encoder: Arc<dyn RecordingEncoder>,
        frame_source: Arc<Mutex<Arc<dyn VideoFrameSource>>>,
        chunks: Arc<Mutex<Vec<Bytes>>>,
        cancel: CancellationToken,
        fps: u32,
        started_at: Instant,
    ) {
        let mut ticker = interval(Duration::from_millis(1000 / u64::from(fps.max(1))));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut last_good: Option<VideoFrame> = None;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let frame = frame_source.lock().unwrap().latest_frame();
                    if let Some(frame) = frame {
                        if frame.is_drawable() {
                            last_good = Some(frame);
                        }
                    }
                    if let Some(frame) = &last_good {
                        if let Err(e) = encoder.push_frame(frame, started_at.elapsed()).await {
                            warn!("frame encode failed: {e}");
                        }
                    }
                    let mut fresh = encoder.poll_chunks().await;
                    if !fresh.is_empty() {
                        chunks.lock().unwrap().append(&mut fresh);
                    }
                }
            }
        }
    }

    /// Follows participant churn while recording: new inbound audio joins
    /// the mix, departed peers leave it.
    async fn churn_loop(
        encoder: Arc<dyn RecordingEncoder>,
        mix: Arc<AudioMixBus>,
        mut events: broadcast::Receiver<RoomEvent>,
        cancel: CancellationToken,
    ) {
        loop {
            let event = tokio::select! {
                _ = cancel.cancelled() => break,
                event = events.recv() => event,
            };
            let changed = match event {
                Ok(RoomEvent::RemoteStream { remote_id, stream }) => {
                    match stream.audio_track() {
                        Some(audio) => {
                            debug!(remote_id, "audio joined the recording mix");
                            mix.attach(remote_id, audio.clone());
                            true
                        }
                        None => false,
                    }
                }
                Ok(RoomEvent::PeerLeft { remote_id }) => {
                    let removed = mix.detach(&remote_id);
                    if removed {
                        debug!(remote_id, "audio left the recording mix");
                    }
                    removed
                }
                Ok(_) => false,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "recording mix lagged behind room events");
                    false
                }
                Err(broadcast::error::RecvError::Closed) => break,
            };
            if changed {
                if let Err(e) = encoder.set_audio_inputs(&mix.input_ids()).await {
                    warn!("audio input update failed: {e}");
                }
            }
        }
    }

    // ─── Mid-recording source switch ────────────────────────────────────

    /// Point the recording at a different local video source.  The mesh's
    /// outgoing tracks are untouched; only the recorded frames change.
    pub async fn switch_recording_source(&self, kind: SourceKind) -> Result<(), MeshError> {
        let active = self.active.lock().await;
        let Some(active) = active.as_ref() else {
            return Err(MeshError::recording("no recording is running"));
        };

        let new_video = self.capture.acquire_video(kind).await?;
        let new_source = self.capture.frame_source(&new_video);

        *active.frame_source.lock().unwrap() = new_source;
        let old = std::mem::replace(&mut *active.video.lock().unwrap(), new_video);
        old.stop();
        info!(?kind, "recording source switched");
        Ok(())
    }

    // ─── Stop ───────────────────────────────────────────────────────────

    /// Stop the recording and hand the artifact to the sink.  A failed
    /// upload is logged, not fatal — the artifact is still returned to the
    /// caller.  No-op when idle.
    pub async fn stop(&self) -> Result<Option<RecordingArtifact>, MeshError> {
        let Some(active) = self.active.lock().await.take() else {
            return Ok(None);
        };

        active.cancel.cancel();
        let _ = active.tick_task.await;
        let _ = active.churn_task.await;

        let tail = active.encoder.finish().await;
        active.mic.stop();
        active.video.lock().unwrap().stop();

        let mut data = BytesMut::new();
        for chunk in active.chunks.lock().unwrap().drain(..) {
            data.extend_from_slice(&chunk);
        }
        for chunk in tail? {
            data.extend_from_slice(&chunk);
        }

        let artifact = RecordingArtifact {
            file_name: artifact_name(),
            mime_type: "video/webm".into(),
            data: data.freeze(),
            duration: active.started_at.elapsed(),
        };
        info!(
            file = artifact.file_name,
            bytes = artifact.data.len(),
            "recording finished"
        );

        if let Err(e) = self.sink.upload(&artifact).await {
            warn!(file = artifact.file_name, "recording upload failed: {e}");
        }
        Ok(Some(artifact))
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────
