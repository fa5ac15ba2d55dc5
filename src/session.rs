// src/session.rs
//
// Per-peer session state machine.
//
// One `PeerSession` per remote participant, driving exactly one transport
// through the offer/answer exchange.  The machine only advances on signaling
// input, so its transitions are fully deterministic and testable without a
// real media stack:
//
//   offerer:   New ──start_offer──▶ HaveLocalOffer ──accept_answer──▶ Connected
//   answerer:  New ──accept_offer─────────────────────────────────────▶ Connected
//   any state ──close──▶ Closed (terminal)
//
// Out-of-order or duplicate input surfaces as `MeshError::StaleMessage`; the
// manager logs and drops those rather than tearing the session down.
//
// ────────────────────────────────────────────────────────────────────────────

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use tracing::{debug, warn};

use crate::error::MeshError;
use crate::signal::{IceCandidateInit, SessionDescription};
use crate::source::{LocalSource, MediaTrack};
use crate::transport::{ConnectionState, PeerTransport};

// ─── States and roles ───────────────────────────────────────────────────────

/// Signaling progress of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalingState {
    New,
    HaveLocalOffer,
    HaveRemoteOffer,
    Connected,
    Closed,
}

/// Which side of the offer/answer exchange this session takes.  Derived from
/// lexical comparison of session ids: the lower id offers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiationRole {
    Offerer,
    Answerer,
}

// ─── PeerSession ────────────────────────────────────────────────────────────

/// Signaling session with one remote peer.
pub struct PeerSession {
    remote_id: String,
    role: NegotiationRole,
    transport: Arc<dyn PeerTransport>,
    state: RwLock<SignalingState>,
    // Candidates that arrived before the remote description; applied in
    // arrival order once it lands.
    pending_candidates: Mutex<Vec<IceCandidateInit>>,
    remote_desc_applied: AtomicBool,
}

impl PeerSession {
    pub fn new(
        remote_id: impl Into<String>,
        role: NegotiationRole,
        transport: Arc<dyn PeerTransport>,
    ) -> Self {
        Self {
            remote_id: remote_id.into(),
            role,
            transport,
            state: RwLock::new(SignalingState::New),
            pending_candidates: Mutex::new(Vec::new()),
            remote_desc_applied: AtomicBool::new(false),
        }
    }

    pub fn remote_id(&self) -> &str {
        &self.remote_id
    }

    pub fn role(&self) -> NegotiationRole {
        self.role
    }

    pub fn state(&self) -> SignalingState {
        *self.state.read().unwrap()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == SignalingState::Connected
    }

    pub fn is_closed(&self) -> bool {
        self.state() == SignalingState::Closed
    }

    /// Transport-level connection state (distinct from signaling state).
    pub fn connection_state(&self) -> ConnectionState {
        self.transport.connection_state()
    }

    fn set_state(&self, next: SignalingState) {
        let mut state = self.state.write().unwrap();
        // Closed is terminal.
        if *state == SignalingState::Closed {
            return;
        }
        debug!(remote_id = %self.remote_id, from = ?*state, to = ?next, "session state");
        *state = next;
    }

    fn stale(&self, what: &str) -> MeshError {
        MeshError::stale(format!(
            "{what} for {} in state {:?}",
            self.remote_id,
            self.state()
        ))
    }

    // ─── Media attachment ───────────────────────────────────────────────

    /// Attach the live tracks of the current local source.  Called once,
    /// before the first offer/answer, so the tracks are covered by the
    /// initial negotiation.
    pub async fn attach_source(&self, source: &LocalSource) -> Result<(), MeshError> {
        for track in source.tracks() {
            self.transport.add_track(track).await?;
        }
        Ok(())
    }

    /// Substitute the outgoing video track without renegotiating.  Valid on
    /// any open session: the transport-level replace is independent of
    /// signaling progress, so a session still awaiting its answer keeps
    /// sending the current source once it connects.
    pub async fn replace_video_track(&self, track: MediaTrack) -> Result<(), MeshError> {
        if self.is_closed() {
            return Err(self.stale("video track replacement"));
        }
        self.transport.replace_video_track(track).await?;
        // The swap may race with a disconnect; a replacement applied to a
        // session that closed mid-flight is harmless, the transport is gone.
        Ok(())
    }

    // ─── Offer / answer ─────────────────────────────────────────────────

    /// Produce and install the local offer. Valid only in `New`; a repeat
    /// call (duplicate roster delivery) is stale, not fatal.
    pub async fn start_offer(&self) -> Result<SessionDescription, MeshError> {
        if self.state() != SignalingState::New {
            return Err(self.stale("offer creation"));
        }
        let offer = self.transport.create_offer().await?;
        if self.is_closed() {
            return Err(self.stale("offer creation"));
        }
        self.set_state(SignalingState::HaveLocalOffer);
        Ok(offer)
    }

    /// Apply a remote offer and produce the answer.  Valid only in `New`
    /// (glare is resolved by the manager before this is called).
    pub async fn accept_offer(
        &self,
        desc: SessionDescription,
    ) -> Result<SessionDescription, MeshError> {
        if self.state() != SignalingState::New {
            return Err(self.stale("remote offer"));
        }
        self.set_state(SignalingState::HaveRemoteOffer);

        self.transport.set_remote_description(desc).await?;
        self.remote_desc_applied.store(true, Ordering::SeqCst);
        self.drain_pending_candidates().await;

        let answer = self.transport.create_answer().await?;
        if self.is_closed() {
            return Err(self.stale("remote offer"));
        }
        self.set_state(SignalingState::Connected);
        Ok(answer)
    }

    /// Apply the remote answer to our outstanding offer.  Duplicate answers
    /// are stale.
    pub async fn accept_answer(&self, desc: SessionDescription) -> Result<(), MeshError> {
        if self.state() != SignalingState::HaveLocalOffer {
            return Err(self.stale("remote answer"));
        }
        self.transport.set_remote_description(desc).await?;
        self.remote_desc_applied.store(true, Ordering::SeqCst);
        self.drain_pending_candidates().await;

        if self.is_closed() {
            return Err(self.stale("remote answer"));
        }
        self.set_state(SignalingState::Connected);
        Ok(())
    }

    // ─── ICE candidates ─────────────────────────────────────────────────

    /// Apply a remote candidate, or buffer it if the remote description has
    /// not landed yet.  Buffered candidates are applied in arrival order.
    pub async fn add_ice_candidate(&self, candidate: IceCandidateInit) -> Result<(), MeshError> {
        if self.is_closed() {
            return Err(self.stale("ICE candidate"));
        }
        if !self.remote_desc_applied.load(Ordering::SeqCst) {
            debug!(remote_id = %self.remote_id, "buffering early ICE candidate");
            self.pending_candidates.lock().unwrap().push(candidate);
            return Ok(());
        }
        self.transport.add_ice_candidate(candidate).await
    }

    async fn drain_pending_candidates(&self) {
        let pending: Vec<IceCandidateInit> =
            std::mem::take(&mut *self.pending_candidates.lock().unwrap());
        if pending.is_empty() {
            return;
        }
        debug!(
            remote_id = %self.remote_id,
            count = pending.len(),
            "applying buffered ICE candidates"
        );
        for candidate in pending {
            // A bad candidate is not fatal to the session; others may still
            // yield a working pair.
            if let Err(e) = self.transport.add_ice_candidate(candidate).await {
                warn!(remote_id = %self.remote_id, "buffered ICE candidate rejected: {e}");
            }
        }
    }

    // ─── Teardown ───────────────────────────────────────────────────────

    /// Close the session and its transport. Idempotent.
    pub async fn close(&self) {
        {
            let mut state = self.state.write().unwrap();
            if *state == SignalingState::Closed {
                return;
            }
            *state = SignalingState::Closed;
        }
        self.pending_candidates.lock().unwrap().clear();
        self.transport.close().await;
        debug!(remote_id = %self.remote_id, "session closed");
    }
}

impl std::fmt::Debug for PeerSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeerSession")
            .field("remote_id", &self.remote_id)
            .field("role", &self.role)
            .field("state", &self.state())
            .finish()
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────
