// src/transport.rs
//
// Media-transport seam.
//
// `PeerTransport` is the surface the session state machine drives; the
// production binding wraps a webrtc-rs `RTCPeerConnection`, tests substitute
// mocks.  The binding stays deliberately thin: description exchange, candidate
// application, track attachment and live track replacement — codec policy is
// whatever the media engine's defaults negotiate.
//
// ────────────────────────────────────────────────────────────────────────────

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tracing::{debug, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::{MediaEngine, MIME_TYPE_OPUS, MIME_TYPE_VP8};
use webrtc::api::APIBuilder;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::{RTCRtpCodecCapability, RTPCodecType};
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;

use crate::config::MeshConfig;
use crate::error::MeshError;
use crate::signal::{IceCandidateInit, SdpKind, SessionDescription};
use crate::source::{MediaStreamHandle, MediaTrack, TrackKind};

// ─── Connection state ───────────────────────────────────────────────────────

/// Transport-level connection state, mirroring the W3C
/// `RTCPeerConnectionState` values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

impl From<RTCPeerConnectionState> for ConnectionState {
    fn from(state: RTCPeerConnectionState) -> Self {
        match state {
            RTCPeerConnectionState::New | RTCPeerConnectionState::Unspecified => Self::New,
            RTCPeerConnectionState::Connecting => Self::Connecting,
            RTCPeerConnectionState::Connected => Self::Connected,
            RTCPeerConnectionState::Disconnected => Self::Disconnected,
            RTCPeerConnectionState::Failed => Self::Failed,
            RTCPeerConnectionState::Closed => Self::Closed,
        }
    }
}

// ─── Handler types ──────────────────────────────────────────────────────────

/// Invoked when inbound media for the remote becomes available or changes.
pub type RemoteStreamHandler = Box<dyn Fn(MediaStreamHandle) + Send + Sync>;
/// Invoked for each locally gathered ICE candidate.
pub type IceCandidateHandler = Box<dyn Fn(IceCandidateInit) + Send + Sync>;

// ─── PeerTransport ──────────────────────────────────────────────────────────

/// One media connection to a remote peer.
///
/// `create_offer`/`create_answer` also install the produced description as
/// the local description, matching the browser call sequence.
#[async_trait]
pub trait PeerTransport: Send + Sync {
    async fn create_offer(&self) -> Result<SessionDescription, MeshError>;
    async fn create_answer(&self) -> Result<SessionDescription, MeshError>;
    async fn set_remote_description(&self, desc: SessionDescription) -> Result<(), MeshError>;
    async fn add_ice_candidate(&self, candidate: IceCandidateInit) -> Result<(), MeshError>;

    /// Attach an outgoing track.
    async fn add_track(&self, track: MediaTrack) -> Result<(), MeshError>;

    /// Substitute the outgoing video track in place — a live replacement, not
    /// a renegotiation at the description level.
    async fn replace_video_track(&self, track: MediaTrack) -> Result<(), MeshError>;

    fn on_remote_stream(&self, handler: RemoteStreamHandler);
    fn on_ice_candidate(&self, handler: IceCandidateHandler);

    fn connection_state(&self) -> ConnectionState;

    async fn close(&self);
}

/// Creates transports. One per remote peer; a transport is never reused after
/// `close`.
#[async_trait]
pub trait PeerTransportFactory: Send + Sync {
    async fn create(&self, remote_id: &str) -> Result<Arc<dyn PeerTransport>, MeshError>;
}

// ─── webrtc-rs binding ──────────────────────────────────────────────────────

/// Production `PeerTransport` over a webrtc-rs `RTCPeerConnection`.
pub struct WebRtcTransport {
    remote_id: String,
    pc: Arc<RTCPeerConnection>,
}

impl WebRtcTransport {
    /// Wire the peer connection callbacks into the handler slots.  Handlers
    /// registered later through the trait see every event from that point on;
    /// callers register them before any description work starts.
    fn wire_callbacks(
        pc: &Arc<RTCPeerConnection>,
        remote_id: &str,
        stream_handler: Arc<Mutex<Option<RemoteStreamHandler>>>,
        ice_handler: Arc<Mutex<Option<IceCandidateHandler>>>,
    ) {
        let rid = remote_id.to_string();
        // One peer, one inbound stream: tracks accumulate on a single handle.
        let stream: Arc<Mutex<MediaStreamHandle>> = Arc::new(Mutex::new(
            MediaStreamHandle::new(format!("{remote_id}-inbound")),
        ));

        pc.on_track(Box::new(move |track, _receiver, _transceiver| {
            let rid = rid.clone();
            let stream = stream.clone();
            let stream_handler = stream_handler.clone();

            Box::pin(async move {
                let kind = match track.kind() {
                    RTPCodecType::Audio => TrackKind::Audio,
                    _ => TrackKind::Video,
                };
                let ssrc = track.ssrc();
                debug!(remote_id = %rid, ?kind, ssrc, "remote track received");

                let handle = {
                    let mut stream = stream.lock().unwrap();
                    stream.tracks.push(MediaTrack::new(kind, format!("ssrc-{ssrc}")));
                    stream.clone()
                };

                if let Some(handler) = stream_handler.lock().unwrap().as_ref() {
                    handler(handle);
                }
            })
        }));

        let rid = remote_id.to_string();
        pc.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
            if let Some(candidate) = candidate {
                match candidate.to_json() {
                    Ok(init) => {
                        if let Some(handler) = ice_handler.lock().unwrap().as_ref() {
                            handler(IceCandidateInit {
                                candidate: init.candidate,
                                sdp_mid: init.sdp_mid,
                                sdp_mline_index: init.sdp_mline_index,
                            });
                        }
                    }
                    Err(e) => warn!(remote_id = %rid, "ICE candidate serialization failed: {e}"),
                }
            }
            Box::pin(async {})
        }));
    }

    fn negotiation_err(&self, reason: impl std::fmt::Display) -> MeshError {
        MeshError::negotiation(&self.remote_id, reason.to_string())
    }

    /// Build the sample track that carries one outgoing media kind.
    fn local_track(track: &MediaTrack) -> Arc<TrackLocalStaticSample> {
        let mime_type = match track.kind() {
            TrackKind::Audio => MIME_TYPE_OPUS,
            TrackKind::Video => MIME_TYPE_VP8,
        };
        Arc::new(TrackLocalStaticSample::new(
            RTCRtpCodecCapability {
                mime_type: mime_type.to_owned(),
                ..Default::default()
            },
            track.id().to_string(),
            "livemesh".to_string(),
        ))
    }
}

struct WebRtcHandlers {
    stream: Arc<Mutex<Option<RemoteStreamHandler>>>,
    ice: Arc<Mutex<Option<IceCandidateHandler>>>,
}

/// `WebRtcTransport` plus its handler slots (kept apart so the callbacks can
/// hold them without holding the transport).
pub struct BoundWebRtcTransport {
    inner: WebRtcTransport,
    handlers: WebRtcHandlers,
}

#[async_trait]
impl PeerTransport for BoundWebRtcTransport {
    async fn create_offer(&self) -> Result<SessionDescription, MeshError> {
        let offer = self
            .inner
            .pc
            .create_offer(None)
            .await
            .map_err(|e| self.inner.negotiation_err(e))?;
        self.inner
            .pc
            .set_local_description(offer.clone())
            .await
            .map_err(|e| self.inner.negotiation_err(e))?;
        Ok(SessionDescription::offer(offer.sdp))
    }

    async fn create_answer(&self) -> Result<SessionDescription, MeshError> {
        let answer = self
            .inner
            .pc
            .create_answer(None)
            .await
            .map_err(|e| self.inner.negotiation_err(e))?;
        self.inner
            .pc
            .set_local_description(answer.clone())
            .await
            .map_err(|e| self.inner.negotiation_err(e))?;
        Ok(SessionDescription::answer(answer.sdp))
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<(), MeshError> {
        let rtc_desc = match desc.kind {
            SdpKind::Offer => RTCSessionDescription::offer(desc.sdp),
            SdpKind::Answer => RTCSessionDescription::answer(desc.sdp),
        }
        .map_err(|e| self.inner.negotiation_err(e))?;

        self.inner
            .pc
            .set_remote_description(rtc_desc)
            .await
            .map_err(|e| self.inner.negotiation_err(e))
    }

    async fn add_ice_candidate(&self, candidate: IceCandidateInit) -> Result<(), MeshError> {
        self.inner
            .pc
            .add_ice_candidate(RTCIceCandidateInit {
                candidate: candidate.candidate,
                sdp_mid: candidate.sdp_mid,
                sdp_mline_index: candidate.sdp_mline_index,
                username_fragment: None,
            })
            .await
            .map_err(|e| self.inner.negotiation_err(e))
    }

    async fn add_track(&self, track: MediaTrack) -> Result<(), MeshError> {
        let local = WebRtcTransport::local_track(&track);
        self.inner
            .pc
            .add_track(local as Arc<dyn TrackLocal + Send + Sync>)
            .await
            .map_err(|e| self.inner.negotiation_err(e))?;
        Ok(())
    }

    async fn replace_video_track(&self, track: MediaTrack) -> Result<(), MeshError> {
        let replacement = WebRtcTransport::local_track(&track);

        for sender in self.inner.pc.get_senders().await {
            let is_video = match sender.track().await {
                Some(t) => t.kind() == RTPCodecType::Video,
                None => false,
            };
            if is_video {
                sender
                    .replace_track(Some(
                        replacement.clone() as Arc<dyn TrackLocal + Send + Sync>
                    ))
                    .await
                    .map_err(|e| self.inner.negotiation_err(e))?;
                return Ok(());
            }
        }

        // No video sender yet (e.g. camera was off when the session formed);
        // attach instead of replacing.
        self.add_track(track).await
    }

    fn on_remote_stream(&self, handler: RemoteStreamHandler) {
        *self.handlers.stream.lock().unwrap() = Some(handler);
    }

    fn on_ice_candidate(&self, handler: IceCandidateHandler) {
        *self.handlers.ice.lock().unwrap() = Some(handler);
    }

    fn connection_state(&self) -> ConnectionState {
        self.inner.pc.connection_state().into()
    }

    async fn close(&self) {
        if let Err(e) = self.inner.pc.close().await {
            warn!(remote_id = %self.inner.remote_id, "peer connection close failed: {e}");
        }
    }
}

// ─── Factory ────────────────────────────────────────────────────────────────

/// Builds `RTCPeerConnection`s from the mesh configuration's ICE endpoints.
pub struct WebRtcTransportFactory {
    config: MeshConfig,
}

impl WebRtcTransportFactory {
    pub fn new(config: MeshConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl PeerTransportFactory for WebRtcTransportFactory {
    async fn create(&self, remote_id: &str) -> Result<Arc<dyn PeerTransport>, MeshError> {
        let mut media_engine = MediaEngine::default();
        media_engine
            .register_default_codecs()
            .map_err(|e| MeshError::negotiation(remote_id, e.to_string()))?;

        let mut registry = Registry::new();
        registry = register_default_interceptors(registry, &mut media_engine)
            .map_err(|e| MeshError::negotiation(remote_id, e.to_string()))?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let ice_servers: Vec<RTCIceServer> = self
            .config
            .ice_servers()
            .into_iter()
            .map(|s| RTCIceServer {
                urls: s.urls,
                username: s.username.unwrap_or_default(),
                credential: s.credential.unwrap_or_default(),
                ..Default::default()
            })
            .collect();

        let rtc_config = RTCConfiguration {
            ice_servers,
            ..Default::default()
        };

        let pc = Arc::new(
            api.new_peer_connection(rtc_config)
                .await
                .map_err(|e| MeshError::negotiation(remote_id, e.to_string()))?,
        );

        let handlers = WebRtcHandlers {
            stream: Arc::new(Mutex::new(None)),
            ice: Arc::new(Mutex::new(None)),
        };
        WebRtcTransport::wire_callbacks(&pc, remote_id, handlers.stream.clone(), handlers.ice.clone());

        Ok(Arc::new(BoundWebRtcTransport {
            inner: WebRtcTransport {
                remote_id: remote_id.to_string(),
                pc,
            },
            handlers,
        }))
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────
