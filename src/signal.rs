// src/signal.rs
//
// Wire protocol of the signaling relay.
//
// The relay only carries metadata: session descriptions, ICE candidates and
// room lifecycle notices.  Media never touches it.  Messages are JSON with a
// `type` tag; payload shapes match the browser dictionaries so a web client
// on the other end of the relay interoperates without translation.
//
// ────────────────────────────────────────────────────────────────────────────

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::MeshError;

// ─── Roles ──────────────────────────────────────────────────────────────────

/// Room role of a participant. The host arbitrates screen-share requests and
/// owns recordings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Host,
    Participant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Host => "host",
            Self::Participant => "participant",
        }
    }
}

// ─── Session descriptions and candidates ────────────────────────────────────

/// SDP payload kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpKind {
    Offer,
    Answer,
}

/// A session description, shaped like the W3C `RTCSessionDescriptionInit`
/// dictionary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub kind: SdpKind,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Answer,
            sdp: sdp.into(),
        }
    }
}

/// An ICE candidate, shaped like the W3C `RTCIceCandidateInit` dictionary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceCandidateInit {
    pub candidate: String,
    #[serde(rename = "sdpMid", skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    #[serde(rename = "sdpMLineIndex", skip_serializing_if = "Option::is_none")]
    pub sdp_mline_index: Option<u16>,
}

// ─── Roster entries ─────────────────────────────────────────────────────────

/// One participant as announced by the relay.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RosterEntry {
    pub remote_id: String,
    pub identity: String,
    pub role: Role,
}

// ─── Client → server messages ───────────────────────────────────────────────

/// Messages the local participant sends to the relay.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ClientMessage {
    /// Register in a room. The relay replies with a roster.
    Join {
        room: String,
        identity: String,
        role: Role,
    },
    /// Relay an offer to one peer.
    Offer {
        to: String,
        description: SessionDescription,
    },
    /// Relay an answer to one peer.
    Answer {
        to: String,
        description: SessionDescription,
    },
    /// Relay an ICE candidate to one peer.
    IceCandidate {
        to: String,
        candidate: IceCandidateInit,
    },
    /// Ask the host for permission to share the screen.
    ScreenShareRequest { room: String },
    /// Host's verdict on a pending screen-share request.
    ScreenShareResponse { to: String, granted: bool },
    /// Broadcast that the local screen share started.
    ScreenShareStarted,
    /// Broadcast that the local screen share ended.
    ScreenShareStopped,
    /// Broadcast the local camera on/off state.
    CameraToggle { room: String, camera_off: bool },
    /// Leave the room.
    Leave { room: String },
}

// ─── Server → client messages ───────────────────────────────────────────────

/// Messages the relay delivers to the local participant.
///
/// Delivery contract assumed by the core: at-least-once, ordered per sender.
/// Handlers are therefore idempotent against duplicates but rely on per-peer
/// ordering.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ServerMessage {
    /// Join acknowledgement: the session id the relay assigned to us plus
    /// every participant already present.
    Roster {
        self_id: String,
        participants: Vec<RosterEntry>,
    },
    /// A new participant entered the room after us.
    PeerJoined {
        remote_id: String,
        identity: String,
        role: Role,
    },
    /// A participant disconnected.
    PeerLeft { remote_id: String },
    /// An offer from a peer.
    Offer {
        from: String,
        description: SessionDescription,
    },
    /// An answer from a peer.
    Answer {
        from: String,
        description: SessionDescription,
    },
    /// An ICE candidate from a peer.
    IceCandidate {
        from: String,
        candidate: IceCandidateInit,
    },
    /// A participant asks to share their screen (host only receives this).
    ScreenShareRequest { from: String },
    /// The host's verdict on our pending screen-share request.
    ScreenShareResponse { granted: bool },
    /// A peer started sharing their screen.
    ScreenShareStarted { remote_id: String },
    /// A peer stopped sharing their screen.
    ScreenShareStopped { remote_id: String },
    /// A peer toggled their camera.
    CameraToggled { remote_id: String, camera_off: bool },
    /// The relay rejected our camera toggle.
    CameraToggleRejected { reason: String },
}

// ─── SignalingChannel ───────────────────────────────────────────────────────

/// Outbound half of the signaling transport.
///
/// The transport is an external collaborator: implementations wrap a
/// WebSocket, a message bus, or (in tests) an in-memory hub.  Inbound
/// messages arrive on an `mpsc` receiver that the caller pumps into
/// [`crate::mesh::PeerSessionManager::run`].
#[async_trait]
pub trait SignalingChannel: Send + Sync {
    /// Send one message to the relay. Fails with
    /// [`MeshError::SignalingUnavailable`] when the transport is unreachable.
    async fn send(&self, msg: ClientMessage) -> Result<(), MeshError>;

    /// Tear down the transport. Idempotent.
    async fn disconnect(&self);
}

// ─── Tests ──────────────────────────────────────────────────────────────────
