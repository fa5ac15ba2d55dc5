// src/lib.rs
//
// LiveMesh — peer-mesh coordination for WebRTC rooms.
//
// A room is a full mesh: every participant holds one peer connection to each
// other participant, negotiated over a thin signaling relay that only ever
// carries metadata.  This crate is the coordination core around those
// connections:
//
//   * `mesh`        — session ownership, roster handling, offer/answer/ICE
//                     dispatch with glare resolution and per-peer failure
//                     isolation
//   * `session`     — the deterministic per-peer signaling state machine
//   * `renegotiate` — live camera ↔ screen switching via track replacement,
//                     including the host-arbitrated screen-share grant
//   * `compositor`  — the host's merged recording (fixed-rate frame ticks,
//                     audio mix that follows participant churn, artifact
//                     upload)
//
// External concerns sit behind traits: `SignalingChannel` (the relay),
// `PeerTransportFactory` (media connections; `WebRtcTransport` is the
// webrtc-rs binding), `CaptureProvider` (devices), `RecordingEncoder` and
// `ArtifactSink` (recording output).
//
// ────────────────────────────────────────────────────────────────────────────

pub mod compositor;
pub mod config;
pub mod error;
pub mod events;
pub mod mesh;
pub mod renegotiate;
pub mod session;
pub mod signal;
pub mod source;
pub mod transport;

#[cfg(test)]
pub(crate) mod testutil;

pub use compositor::{
    ArtifactSink, AudioMixBus, RecordingArtifact, RecordingCompositor, RecordingEncoder,
};
pub use config::{IceServerConfig, MeshConfig};
pub use error::MeshError;
pub use events::{EventBus, RoomEvent};
pub use mesh::{Participant, PeerSessionManager};
pub use renegotiate::RenegotiationEngine;
pub use session::{NegotiationRole, PeerSession, SignalingState};
pub use signal::{
    ClientMessage, IceCandidateInit, Role, RosterEntry, SdpKind, ServerMessage,
    SessionDescription, SignalingChannel,
};
pub use source::{
    CaptureProvider, LocalSource, MediaStreamHandle, MediaTrack, SourceKind, SourceSlot,
    TrackKind, VideoFrame, VideoFrameSource,
};
pub use transport::{
    ConnectionState, PeerTransport, PeerTransportFactory, WebRtcTransportFactory,
};

/// Install the global tracing subscriber.  `RUST_LOG` wins over the
/// configured level.  Call once, early.
pub fn init_tracing(config: &MeshConfig) {
    use tracing_subscriber::EnvFilter;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.log_level)),
        )
        .init();
}
