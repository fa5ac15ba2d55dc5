// src/renegotiate.rs
//
// Live source switching.
//
// Camera ↔ screen switches never renegotiate descriptions: the outgoing video
// track is substituted on every open session via the transport's
// replace-track path, and only after every session carries the replacement is
// the old capture stopped.  Sessions still mid-negotiation are substituted
// too, so they come up sending the current source rather than a stopped one.
// Audio rides across switches untouched.
//
// One switch at a time: a second request while one is in flight is rejected
// with `RenegotiationInProgress`, never queued.
//
// ────────────────────────────────────────────────────────────────────────────

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::error::MeshError;
use crate::mesh::PeerSessionManager;
use crate::signal::Role;
use crate::source::{CaptureProvider, LocalSource, MediaTrack, SourceKind, SourceSlot};

// ─── Swap guard ─────────────────────────────────────────────────────────────

/// Clears the in-flight flag on every exit path.
struct SwapGuard<'a>(&'a AtomicBool);

impl Drop for SwapGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

// ─── RenegotiationEngine ────────────────────────────────────────────────────

/// Swaps the outgoing video source across the whole mesh.
pub struct RenegotiationEngine {
    capture: Arc<dyn CaptureProvider>,
    manager: Arc<PeerSessionManager>,
    slot: Arc<SourceSlot>,
    swap_in_flight: AtomicBool,
}

impl RenegotiationEngine {
    pub fn new(capture: Arc<dyn CaptureProvider>, manager: Arc<PeerSessionManager>) -> Self {
        let slot = manager.source_slot();
        Self {
            capture,
            manager,
            slot,
            swap_in_flight: AtomicBool::new(false),
        }
    }

    /// Acquire the initial camera source.  Meant to run before `join`, so
    /// freshly created sessions pick the tracks up at negotiation time.
    pub async fn start_camera(&self) -> Result<(), MeshError> {
        let source = self.capture.acquire(SourceKind::Camera).await?;
        if let Some(old) = self.slot.replace(source) {
            old.stop_all();
        }
        info!("camera source started");
        Ok(())
    }

    /// Stop and drop the current local source.
    pub fn release_source(&self) {
        if let Some(source) = self.slot.take() {
            source.stop_all();
        }
    }

    // ─── Source switching ───────────────────────────────────────────────

    /// Switch the outgoing video to `kind`.
    ///
    /// Participants switching to the screen first wait for the host's grant;
    /// a denial (or a host that vanished) surfaces as `ScreenShareDenied`.
    /// On any failure the previous source stays current and live.
    pub async fn switch_video_source(self: &Arc<Self>, kind: SourceKind) -> Result<(), MeshError> {
        if self
            .swap_in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(MeshError::RenegotiationInProgress);
        }
        let _guard = SwapGuard(&self.swap_in_flight);

        let current = self
            .slot
            .current()
            .ok_or_else(|| MeshError::source("no active source to switch from"))?;
        if current.kind == kind {
            debug!(?kind, "already on requested source");
            return Ok(());
        }

        if kind == SourceKind::Screen && self.manager.role() != Some(Role::Host) {
            let verdict = self.manager.request_screen_share().await?;
            // A dropped verdict channel reads as denial.
            if !verdict.await.unwrap_or(false) {
                return Err(MeshError::ScreenShareDenied);
            }
        }

        let new_video = self.capture.acquire_video(kind).await?;
        self.substitute_everywhere(&new_video, current.video.as_ref())
            .await?;

        let old = self.slot.replace(LocalSource::new(
            kind,
            current.audio.clone(),
            Some(new_video.clone()),
        ));

        info!(from = ?current.kind, to = ?kind, "video source switched");
        self.announce_switch(current.kind, kind).await;

        // Old video capture goes down last; audio was carried over.
        if let Some(old) = old.and_then(|s| s.video) {
            old.stop();
        }

        if kind == SourceKind::Screen {
            self.watch_screen_end(new_video);
        }
        Ok(())
    }

    /// Substitute `new_video` on every open session before the old capture is
    /// touched, so no peer ever observes a dead outgoing track.  Sessions
    /// mid-negotiation are included: they would otherwise connect still
    /// holding the track the swap is about to stop.  On a mid-swap failure,
    /// sessions already carrying the replacement are rolled back to
    /// `old_video` and the new track is stopped.
    async fn substitute_everywhere(
        &self,
        new_video: &MediaTrack,
        old_video: Option<&MediaTrack>,
    ) -> Result<(), MeshError> {
        let mut swapped = Vec::new();
        for session in self.manager.active_sessions() {
            match session.replace_video_track(new_video.clone()).await {
                Ok(()) => swapped.push(session),
                Err(MeshError::StaleMessage(reason)) => {
                    // Session closed while we were swapping; its peer is gone.
                    debug!(remote_id = session.remote_id(), "skipping closed session: {reason}");
                }
                Err(e) => {
                    if let Some(old_video) = old_video {
                        for session in &swapped {
                            if let Err(e) = session.replace_video_track(old_video.clone()).await {
                                warn!(
                                    remote_id = session.remote_id(),
                                    "rollback after failed swap: {e}"
                                );
                            }
                        }
                    }
                    new_video.stop();
                    return Err(e);
                }
            }
        }
        Ok(())
    }

    async fn announce_switch(&self, from: SourceKind, to: SourceKind) {
        let notice = match (from, to) {
            (_, SourceKind::Screen) => Some(true),
            (SourceKind::Screen, _) => Some(false),
            _ => None,
        };
        if let Some(started) = notice {
            if let Err(e) = self.manager.notify_screen_share(started).await {
                warn!("screen-share notice failed: {e}");
            }
        }
    }

    /// The capture backend can end a screen track on its own (the user's
    /// native "stop sharing" control).  When that happens while the screen is
    /// still the active source, fall back to the camera through the normal
    /// switch path.
    fn watch_screen_end(self: &Arc<Self>, track: MediaTrack) {
        let engine = self.clone();
        tokio::spawn(async move {
            track.ended().await;

            let still_current = engine
                .slot
                .current()
                .and_then(|s| s.video)
                .map(|v| v.id() == track.id())
                .unwrap_or(false);
            if !still_current {
                return;
            }
            info!("screen capture ended, restoring camera");
            if let Err(e) = engine.switch_video_source(SourceKind::Camera).await {
                warn!("camera restore after screen end failed: {e}");
            }
        });
    }

    // ─── Device toggles ─────────────────────────────────────────────────

    /// Mute or unmute the microphone without releasing the device.
    pub fn set_microphone_enabled(&self, enabled: bool) {
        if let Some(audio) = self.slot.current().and_then(|s| s.audio) {
            audio.set_enabled(enabled);
            debug!(enabled, "microphone toggled");
        }
    }

    /// Turn the camera off (stopping the capture device entirely) or back on
    /// (re-acquiring and substituting across sessions), announcing the state
    /// to the room either way.
    pub async fn set_camera_enabled(self: &Arc<Self>, enabled: bool) -> Result<(), MeshError> {
        if enabled {
            self.resume_camera().await?;
        } else {
            self.pause_camera()?;
        }
        self.manager.notify_camera(!enabled).await
    }

    fn pause_camera(&self) -> Result<(), MeshError> {
        // Same guard as the switch path: the slot write below must not race a
        // swap's own slot.replace.
        if self
            .swap_in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(MeshError::RenegotiationInProgress);
        }
        let _guard = SwapGuard(&self.swap_in_flight);

        let current = self
            .slot
            .current()
            .ok_or_else(|| MeshError::source("no active source"))?;
        if let Some(video) = &current.video {
            video.stop();
        }
        self.slot
            .replace(LocalSource::new(current.kind, current.audio.clone(), None));
        debug!("camera paused");
        Ok(())
    }

    async fn resume_camera(self: &Arc<Self>) -> Result<(), MeshError> {
        if self
            .swap_in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(MeshError::RenegotiationInProgress);
        }
        let _guard = SwapGuard(&self.swap_in_flight);

        let current = self
            .slot
            .current()
            .ok_or_else(|| MeshError::source("no active source"))?;
        if current.video.as_ref().map(|v| v.is_live()).unwrap_or(false) {
            return Ok(());
        }

        let video = self.capture.acquire_video(SourceKind::Camera).await?;
        self.substitute_everywhere(&video, None).await?;
        self.slot.replace(LocalSource::new(
            SourceKind::Camera,
            current.audio.clone(),
            Some(video),
        ));
        debug!("camera resumed");
        Ok(())
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────
