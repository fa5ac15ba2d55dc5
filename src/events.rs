// src/events.rs
//
// Room event fan-out.
//
// Every observable state change of the mesh (participant lifecycle, inbound
// media arrival, camera/screen-share notices) is represented as a
// `RoomEvent`.  A single `EventBus` backed by a `tokio::sync::broadcast`
// channel fans each event out to every consumer: the recording compositor
// (for mid-recording participant churn) and the presentation layer.
//
// ────────────────────────────────────────────────────────────────────────────

use tokio::sync::broadcast;
use tracing::debug;

use crate::signal::Role;
use crate::source::MediaStreamHandle;

// ─── Event types ────────────────────────────────────────────────────────────

/// Observable room state change.
#[derive(Debug, Clone)]
pub enum RoomEvent {
    /// A participant entered the room (from the roster or a join notice).
    PeerJoined {
        remote_id: String,
        identity: String,
        role: Role,
    },
    /// A participant disconnected; their session and inbound stream are gone.
    PeerLeft { remote_id: String },
    /// Inbound media from a peer became available or changed.
    RemoteStream {
        remote_id: String,
        stream: MediaStreamHandle,
    },
    /// A peer toggled their camera.
    CameraToggled { remote_id: String, camera_off: bool },
    /// A participant asks to share their screen; the host decides and calls
    /// `PeerSessionManager::respond_screen_share`.
    ScreenShareRequested { from: String },
    /// A peer's screen share started or stopped.
    ScreenShareChanged { remote_id: String, sharing: bool },
}

impl RoomEvent {
    /// Stable label for logs.
    pub fn label(&self) -> &'static str {
        match self {
            Self::PeerJoined { .. } => "peer.joined",
            Self::PeerLeft { .. } => "peer.left",
            Self::RemoteStream { .. } => "peer.stream",
            Self::CameraToggled { .. } => "peer.camera-toggled",
            Self::ScreenShareRequested { .. } => "screen-share.requested",
            Self::ScreenShareChanged { .. } => "screen-share.changed",
        }
    }
}

// ─── EventBus ───────────────────────────────────────────────────────────────

/// Broadcast-based fan-out channel for `RoomEvent`.
///
/// Subscribers that lag more than the capacity skip events (same semantic as
/// `broadcast::RecvError::Lagged`).  The bus is cheap to clone.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<RoomEvent>,
}

impl EventBus {
    /// Create a new bus with the default capacity.
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(256);
        Self { tx }
    }

    /// Publish an event.  Returns the number of active subscribers.  Silently
    /// succeeds with zero subscribers (normal before anyone listens).
    pub fn emit(&self, event: RoomEvent) -> usize {
        debug!(event = event.label(), "room event");
        self.tx.send(event).unwrap_or(0)
    }

    /// Obtain a new receiver.  Each receiver sees every event published after
    /// this call.
    pub fn subscribe(&self) -> broadcast::Receiver<RoomEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────
