use thiserror::Error;

// ─── MeshError ──────────────────────────────────────────────────────────────

/// Error taxonomy for the mesh coordinator.
///
/// Propagation policy: per-session failures (`NegotiationFailed`, `StaleMessage`)
/// never abort the room — the affected session is closed or the message dropped.
/// Only `SignalingUnavailable` is terminal for the room and requires a rejoin.
#[derive(Debug, Error)]
pub enum MeshError {
    /// The signaling transport cannot be reached. Surfaced to the caller,
    /// never retried internally.
    #[error("signaling channel unavailable: {0}")]
    SignalingUnavailable(String),

    /// Device or permission failure while acquiring a capture source.
    /// The previously active source is left fully intact.
    #[error("capture source unavailable: {0}")]
    SourceUnavailable(String),

    /// A source swap is already in flight for this room. The caller retries
    /// after the current swap resolves; requests are not queued.
    #[error("a source swap is already in flight")]
    RenegotiationInProgress,

    /// A signaling message referenced a closed or unknown session, or arrived
    /// in a state where it cannot apply. Logged and dropped, never fatal.
    #[error("stale signaling message: {0}")]
    StaleMessage(String),

    /// The media transport rejected a description exchange. The affected
    /// session is closed and the remote treated as disconnected.
    #[error("negotiation with peer '{remote_id}' failed: {reason}")]
    NegotiationFailed { remote_id: String, reason: String },

    /// The host denied a screen-share request. Local state is unchanged.
    #[error("host denied the screen-share request")]
    ScreenShareDenied,

    /// Recording lifecycle failure (double start, encoder error, upload
    /// failure after finalization).
    #[error("recording error: {0}")]
    RecordingFailed(String),
}

impl MeshError {
    /// Stable machine-readable code, used in logs and by presentation layers
    /// that map errors to user-visible strings.
    pub fn code(&self) -> &'static str {
        match self {
            Self::SignalingUnavailable(_) => "signaling_unavailable",
            Self::SourceUnavailable(_) => "source_unavailable",
            Self::RenegotiationInProgress => "renegotiation_in_progress",
            Self::StaleMessage(_) => "stale_message",
            Self::NegotiationFailed { .. } => "negotiation_failed",
            Self::ScreenShareDenied => "screen_share_denied",
            Self::RecordingFailed(_) => "recording_failed",
        }
    }

    /// True when the error ends the room for the local participant.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::SignalingUnavailable(_))
    }

    // ── Constructors ────────────────────────────────────────────────────

    pub fn signaling(msg: impl Into<String>) -> Self {
        Self::SignalingUnavailable(msg.into())
    }

    pub fn source(msg: impl Into<String>) -> Self {
        Self::SourceUnavailable(msg.into())
    }

    pub fn stale(msg: impl Into<String>) -> Self {
        Self::StaleMessage(msg.into())
    }

    pub fn negotiation(remote_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::NegotiationFailed {
            remote_id: remote_id.into(),
            reason: reason.into(),
        }
    }

    pub fn recording(msg: impl Into<String>) -> Self {
        Self::RecordingFailed(msg.into())
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────
