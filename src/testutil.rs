// src/testutil.rs
//
// Test doubles shared across the crate's test modules: a recording transport,
// a scriptable capture provider, an in-memory signaling hub that routes
// messages between managers the way a relay would, and encoder/sink doubles
// for the compositor.
//
// ────────────────────────────────────────────────────────────────────────────

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::oneshot;

use crate::compositor::{ArtifactSink, RecordingArtifact, RecordingEncoder};
use crate::error::MeshError;
use crate::mesh::PeerSessionManager;
use crate::signal::{
    ClientMessage, IceCandidateInit, SdpKind, ServerMessage, SessionDescription, SignalingChannel,
};
use crate::source::{
    CaptureProvider, LocalSource, MediaStreamHandle, MediaTrack, SourceKind, TrackKind,
    VideoFrame, VideoFrameSource,
};
use crate::transport::{
    ConnectionState, IceCandidateHandler, PeerTransport, PeerTransportFactory,
    RemoteStreamHandler,
};

// ─── MockTransport ──────────────────────────────────────────────────────────

/// Everything a transport was asked to do, in order.
#[derive(Debug, Clone)]
pub enum MockOp {
    CreateOffer,
    CreateAnswer,
    SetRemote(SdpKind),
    AddCandidate(String),
    AddTrack { kind: TrackKind, track_id: String },
    ReplaceVideo {
        track_id: String,
        /// Whether the track being displaced was still live at replace time.
        displaced_live: bool,
    },
    Close,
}

#[derive(Default)]
struct Failures {
    replace: Mutex<HashSet<String>>,
    answer: Mutex<HashSet<String>>,
}

/// Transport double that records operations instead of negotiating.
pub struct MockTransport {
    remote_id: String,
    ops: Mutex<Vec<MockOp>>,
    state: Mutex<ConnectionState>,
    current_video: Mutex<Option<MediaTrack>>,
    stream_handler: Mutex<Option<RemoteStreamHandler>>,
    ice_handler: Mutex<Option<IceCandidateHandler>>,
    failures: Arc<Failures>,
}

impl MockTransport {
    pub fn new(remote_id: &str) -> Self {
        Self::with_failures(remote_id, Arc::new(Failures::default()))
    }

    fn with_failures(remote_id: &str, failures: Arc<Failures>) -> Self {
        Self {
            remote_id: remote_id.to_string(),
            ops: Mutex::new(Vec::new()),
            state: Mutex::new(ConnectionState::New),
            current_video: Mutex::new(None),
            stream_handler: Mutex::new(None),
            ice_handler: Mutex::new(None),
            failures,
        }
    }

    pub fn ops(&self) -> Vec<MockOp> {
        self.ops.lock().unwrap().clone()
    }

    fn record(&self, op: MockOp) {
        self.ops.lock().unwrap().push(op);
    }

    /// Simulate inbound media arriving on this transport.
    pub fn emit_remote_stream(&self, stream: MediaStreamHandle) {
        if let Some(handler) = self.stream_handler.lock().unwrap().as_ref() {
            handler(stream);
        }
    }

    /// Simulate a locally gathered candidate.
    pub fn emit_ice_candidate(&self, candidate: IceCandidateInit) {
        if let Some(handler) = self.ice_handler.lock().unwrap().as_ref() {
            handler(candidate);
        }
    }

    /// The video track this transport is currently sending.
    pub fn outgoing_video(&self) -> Option<MediaTrack> {
        self.current_video.lock().unwrap().clone()
    }
}

#[async_trait]
impl PeerTransport for MockTransport {
    async fn create_offer(&self) -> Result<SessionDescription, MeshError> {
        self.record(MockOp::CreateOffer);
        Ok(SessionDescription::offer(format!(
            "offer-for-{}",
            self.remote_id
        )))
    }

    async fn create_answer(&self) -> Result<SessionDescription, MeshError> {
        if self.failures.answer.lock().unwrap().contains(&self.remote_id) {
            return Err(MeshError::negotiation(&self.remote_id, "answer refused"));
        }
        self.record(MockOp::CreateAnswer);
        Ok(SessionDescription::answer(format!(
            "answer-for-{}",
            self.remote_id
        )))
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<(), MeshError> {
        self.record(MockOp::SetRemote(desc.kind));
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: IceCandidateInit) -> Result<(), MeshError> {
        self.record(MockOp::AddCandidate(candidate.candidate));
        Ok(())
    }

    async fn add_track(&self, track: MediaTrack) -> Result<(), MeshError> {
        self.record(MockOp::AddTrack {
            kind: track.kind(),
            track_id: track.id().to_string(),
        });
        if track.kind() == TrackKind::Video {
            *self.current_video.lock().unwrap() = Some(track);
        }
        Ok(())
    }

    async fn replace_video_track(&self, track: MediaTrack) -> Result<(), MeshError> {
        if self.failures.replace.lock().unwrap().contains(&self.remote_id) {
            return Err(MeshError::negotiation(&self.remote_id, "replace refused"));
        }
        let mut current = self.current_video.lock().unwrap();
        let displaced_live = current.as_ref().map(|t| t.is_live()).unwrap_or(false);
        self.record(MockOp::ReplaceVideo {
            track_id: track.id().to_string(),
            displaced_live,
        });
        *current = Some(track);
        Ok(())
    }

    fn on_remote_stream(&self, handler: RemoteStreamHandler) {
        *self.stream_handler.lock().unwrap() = Some(handler);
    }

    fn on_ice_candidate(&self, handler: IceCandidateHandler) {
        *self.ice_handler.lock().unwrap() = Some(handler);
    }

    fn connection_state(&self) -> ConnectionState {
        *self.state.lock().unwrap()
    }

    async fn close(&self) {
        self.record(MockOp::Close);
        *self.state.lock().unwrap() = ConnectionState::Closed;
    }
}

/// Hands out `MockTransport`s and keeps every one it created for inspection.
#[derive(Default)]
pub struct MockTransportFactory {
    created: Mutex<HashMap<String, Vec<Arc<MockTransport>>>>,
    failures: Arc<Failures>,
}

impl MockTransportFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every transport created for `remote_id`, oldest first.
    pub fn transports_for(&self, remote_id: &str) -> Vec<Arc<MockTransport>> {
        self.created
            .lock()
            .unwrap()
            .get(remote_id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn fail_replace_for(&self, remote_id: &str) {
        self.failures
            .replace
            .lock()
            .unwrap()
            .insert(remote_id.to_string());
    }

    pub fn fail_answer_for(&self, remote_id: &str) {
        self.failures
            .answer
            .lock()
            .unwrap()
            .insert(remote_id.to_string());
    }

    pub fn clear_failures(&self) {
        self.failures.replace.lock().unwrap().clear();
        self.failures.answer.lock().unwrap().clear();
    }
}

#[async_trait]
impl PeerTransportFactory for MockTransportFactory {
    async fn create(&self, remote_id: &str) -> Result<Arc<dyn PeerTransport>, MeshError> {
        let transport = Arc::new(MockTransport::with_failures(remote_id, self.failures.clone()));
        self.created
            .lock()
            .unwrap()
            .entry(remote_id.to_string())
            .or_default()
            .push(transport.clone());
        Ok(transport)
    }
}

// ─── MockSignalingChannel ───────────────────────────────────────────────────

/// Channel double that logs outbound messages.
#[derive(Default)]
pub struct MockSignalingChannel {
    sent: Mutex<Vec<ClientMessage>>,
    fail: AtomicBool,
    disconnected: AtomicBool,
}

impl MockSignalingChannel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<ClientMessage> {
        self.sent.lock().unwrap().clone()
    }

    pub fn set_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn is_disconnected(&self) -> bool {
        self.disconnected.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SignalingChannel for MockSignalingChannel {
    async fn send(&self, msg: ClientMessage) -> Result<(), MeshError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(MeshError::signaling("mock channel down"));
        }
        self.sent.lock().unwrap().push(msg);
        Ok(())
    }

    async fn disconnect(&self) {
        self.disconnected.store(true, Ordering::SeqCst);
    }
}

// ─── MockCaptureProvider ────────────────────────────────────────────────────

/// Capture double producing synthetic tracks, with scriptable failures and a
/// per-track frame source the tests feed frames into.
#[derive(Default)]
pub struct MockCaptureProvider {
    acquired: Mutex<Vec<MediaTrack>>,
    fail_mic: AtomicBool,
    fail_video: Mutex<HashSet<SourceKind>>,
    video_gate: Mutex<Option<oneshot::Receiver<()>>>,
    video_pending: AtomicBool,
    frames: Mutex<HashMap<String, Arc<MockFrameSource>>>,
}

impl MockCaptureProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_microphone(&self) {
        self.fail_mic.store(true, Ordering::SeqCst);
    }

    pub fn fail_video(&self, kind: SourceKind) {
        self.fail_video.lock().unwrap().insert(kind);
    }

    /// Park the next `acquire_video` call until the sender fires.
    pub fn gate_next_video(&self, gate: oneshot::Receiver<()>) {
        *self.video_gate.lock().unwrap() = Some(gate);
    }

    pub fn video_acquire_pending(&self) -> bool {
        self.video_pending.load(Ordering::SeqCst)
    }

    /// Every track this provider handed out, oldest first.
    pub fn acquired_tracks(&self) -> Vec<MediaTrack> {
        self.acquired.lock().unwrap().clone()
    }

    pub fn last_acquired_video(&self) -> Option<MediaTrack> {
        self.acquired
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|t| t.kind() == TrackKind::Video)
            .cloned()
    }

    /// The frame source backing `track` (creating it on first use, same as
    /// the trait method does).
    pub fn frame_source_for(&self, track: &MediaTrack) -> Arc<MockFrameSource> {
        self.frames
            .lock()
            .unwrap()
            .entry(track.id().to_string())
            .or_default()
            .clone()
    }

    fn label(kind: SourceKind) -> &'static str {
        match kind {
            SourceKind::Camera => "camera",
            SourceKind::Screen => "screen",
            SourceKind::Composite => "composite",
        }
    }

    fn make_track(&self, kind: TrackKind, label: &str) -> MediaTrack {
        let track = MediaTrack::new(kind, label);
        self.acquired.lock().unwrap().push(track.clone());
        track
    }
}

#[async_trait]
impl CaptureProvider for MockCaptureProvider {
    async fn acquire(&self, kind: SourceKind) -> Result<LocalSource, MeshError> {
        if self.fail_video.lock().unwrap().contains(&kind) {
            return Err(MeshError::source(format!(
                "{} capture unavailable",
                Self::label(kind)
            )));
        }
        let audio = self.make_track(TrackKind::Audio, "mic");
        let video = self.make_track(TrackKind::Video, Self::label(kind));
        Ok(LocalSource::new(kind, Some(audio), Some(video)))
    }

    async fn acquire_microphone(&self) -> Result<MediaTrack, MeshError> {
        if self.fail_mic.load(Ordering::SeqCst) {
            return Err(MeshError::source("microphone unavailable"));
        }
        Ok(self.make_track(TrackKind::Audio, "mic"))
    }

    async fn acquire_video(&self, kind: SourceKind) -> Result<MediaTrack, MeshError> {
        let gate = self.video_gate.lock().unwrap().take();
        if let Some(gate) = gate {
            self.video_pending.store(true, Ordering::SeqCst);
            let _ = gate.await;
            self.video_pending.store(false, Ordering::SeqCst);
        }
        if self.fail_video.lock().unwrap().contains(&kind) {
            return Err(MeshError::source(format!(
                "{} capture unavailable",
                Self::label(kind)
            )));
        }
        Ok(self.make_track(TrackKind::Video, Self::label(kind)))
    }

    fn frame_source(&self, track: &MediaTrack) -> Arc<dyn VideoFrameSource> {
        self.frame_source_for(track)
    }
}

/// Frame source whose current frame the test sets directly.
#[derive(Default)]
pub struct MockFrameSource {
    frame: Mutex<Option<VideoFrame>>,
}

impl MockFrameSource {
    pub fn set_frame(&self, frame: VideoFrame) {
        *self.frame.lock().unwrap() = Some(frame);
    }
}

impl VideoFrameSource for MockFrameSource {
    fn latest_frame(&self) -> Option<VideoFrame> {
        self.frame.lock().unwrap().clone()
    }
}

// ─── MockEncoder and MockSink ───────────────────────────────────────────────

#[derive(Default)]
struct EncoderState {
    started: Option<(u32, u32)>,
    frames: Vec<(u32, u32)>,
    audio: Vec<String>,
    pending: Vec<Bytes>,
    finished: bool,
}

/// Encoder double: records frames and audio input sets, emits one synthetic
/// chunk per frame.
#[derive(Default)]
pub struct MockEncoder {
    state: Mutex<EncoderState>,
    fail_audio: AtomicBool,
}

impl MockEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_audio_inputs(&self) {
        self.fail_audio.store(true, Ordering::SeqCst);
    }

    pub fn frame_count(&self) -> usize {
        self.state.lock().unwrap().frames.len()
    }

    pub fn frame_dimensions(&self) -> Vec<(u32, u32)> {
        self.state.lock().unwrap().frames.clone()
    }

    pub fn audio_inputs(&self) -> Vec<String> {
        self.state.lock().unwrap().audio.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.state.lock().unwrap().finished
    }
}

#[async_trait]
impl RecordingEncoder for MockEncoder {
    async fn start(&self, width: u32, height: u32) -> Result<(), MeshError> {
        self.state.lock().unwrap().started = Some((width, height));
        Ok(())
    }

    async fn push_frame(&self, frame: &VideoFrame, _elapsed: Duration) -> Result<(), MeshError> {
        let mut state = self.state.lock().unwrap();
        state.frames.push((frame.width, frame.height));
        state.pending.push(Bytes::from_static(b"chunk"));
        Ok(())
    }

    async fn set_audio_inputs(&self, inputs: &[String]) -> Result<(), MeshError> {
        if self.fail_audio.load(Ordering::SeqCst) {
            return Err(MeshError::recording("audio graph rejected"));
        }
        self.state.lock().unwrap().audio = inputs.to_vec();
        Ok(())
    }

    async fn poll_chunks(&self) -> Vec<Bytes> {
        std::mem::take(&mut self.state.lock().unwrap().pending)
    }

    async fn finish(&self) -> Result<Vec<Bytes>, MeshError> {
        let mut state = self.state.lock().unwrap();
        state.finished = true;
        let mut tail = std::mem::take(&mut state.pending);
        tail.push(Bytes::from_static(b"tail"));
        Ok(tail)
    }
}

/// Sink double that stores uploads in memory.
#[derive(Default)]
pub struct MockSink {
    uploads: Mutex<Vec<RecordingArtifact>>,
    fail: AtomicBool,
}

impl MockSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn uploads(&self) -> Vec<RecordingArtifact> {
        self.uploads.lock().unwrap().clone()
    }
}

#[async_trait]
impl ArtifactSink for MockSink {
    async fn upload(&self, artifact: &RecordingArtifact) -> Result<(), MeshError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(MeshError::recording("upload refused"));
        }
        self.uploads.lock().unwrap().push(artifact.clone());
        Ok(())
    }
}

// ─── SignalHub ──────────────────────────────────────────────────────────────

/// In-memory relay: routes `ClientMessage`s from one manager into the other
/// managers' inbound handlers, with the same per-sender ordering a real relay
/// gives.
#[derive(Default)]
pub struct SignalHub {
    queue: Mutex<VecDeque<(String, ClientMessage)>>,
}

impl SignalHub {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Channel for the participant the relay will know as `id`.
    pub fn channel(self: &Arc<Self>, id: &str) -> Arc<HubChannel> {
        Arc::new(HubChannel {
            hub: self.clone(),
            id: id.to_string(),
        })
    }

    /// Deliver queued messages until the hub drains, letting spawned send
    /// tasks (candidate relays) enqueue along the way.
    pub async fn deliver_all(
        &self,
        managers: &[(String, Arc<PeerSessionManager>)],
        host_id: &str,
    ) {
        loop {
            let next = self.queue.lock().unwrap().pop_front();
            let Some((from, msg)) = next else {
                // Give spawned sends a chance to land before giving up.
                tokio::task::yield_now().await;
                tokio::task::yield_now().await;
                if self.queue.lock().unwrap().is_empty() {
                    break;
                }
                continue;
            };

            for (to, server_msg) in Self::route(&from, msg, managers, host_id) {
                if let Some((_, manager)) = managers.iter().find(|(id, _)| *id == to) {
                    manager.handle_message(server_msg).await;
                }
            }
        }
    }

    fn route(
        from: &str,
        msg: ClientMessage,
        managers: &[(String, Arc<PeerSessionManager>)],
        host_id: &str,
    ) -> Vec<(String, ServerMessage)> {
        let broadcast = |make: &dyn Fn() -> ServerMessage| {
            managers
                .iter()
                .filter(|(id, _)| id != from)
                .map(|(id, _)| (id.clone(), make()))
                .collect::<Vec<_>>()
        };

        match msg {
            ClientMessage::Join { .. } => vec![],
            ClientMessage::Offer { to, description } => vec![(
                to,
                ServerMessage::Offer {
                    from: from.to_string(),
                    description,
                },
            )],
            ClientMessage::Answer { to, description } => vec![(
                to,
                ServerMessage::Answer {
                    from: from.to_string(),
                    description,
                },
            )],
            ClientMessage::IceCandidate { to, candidate } => vec![(
                to,
                ServerMessage::IceCandidate {
                    from: from.to_string(),
                    candidate,
                },
            )],
            ClientMessage::ScreenShareRequest { .. } => vec![(
                host_id.to_string(),
                ServerMessage::ScreenShareRequest {
                    from: from.to_string(),
                },
            )],
            ClientMessage::ScreenShareResponse { to, granted } => {
                vec![(to, ServerMessage::ScreenShareResponse { granted })]
            }
            ClientMessage::ScreenShareStarted => broadcast(&|| ServerMessage::ScreenShareStarted {
                remote_id: from.to_string(),
            }),
            ClientMessage::ScreenShareStopped => broadcast(&|| ServerMessage::ScreenShareStopped {
                remote_id: from.to_string(),
            }),
            ClientMessage::CameraToggle { camera_off, .. } => {
                broadcast(&|| ServerMessage::CameraToggled {
                    remote_id: from.to_string(),
                    camera_off,
                })
            }
            ClientMessage::Leave { .. } => broadcast(&|| ServerMessage::PeerLeft {
                remote_id: from.to_string(),
            }),
        }
    }
}

/// The hub-facing side of one participant's signaling.
pub struct HubChannel {
    hub: Arc<SignalHub>,
    id: String,
}

#[async_trait]
impl SignalingChannel for HubChannel {
    async fn send(&self, msg: ClientMessage) -> Result<(), MeshError> {
        self.hub
            .queue
            .lock()
            .unwrap()
            .push_back((self.id.clone(), msg));
        Ok(())
    }

    async fn disconnect(&self) {}
}

// ─── Integration tests ──────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventBus;
    use crate::session::NegotiationRole;
    use crate::signal::{Role, RosterEntry};
    use crate::source::SourceSlot;

    struct Node {
        id: String,
        manager: Arc<PeerSessionManager>,
        factory: Arc<MockTransportFactory>,
    }

    async fn node(hub: &Arc<SignalHub>, id: &str, role: Role) -> Node {
        let factory = Arc::new(MockTransportFactory::new());
        let manager = Arc::new(PeerSessionManager::new(
            hub.channel(id),
            factory.clone(),
            EventBus::new(),
            Arc::new(SourceSlot::new()),
        ));
        manager.join("room-1", &format!("user-{id}"), role).await.unwrap();
        Node {
            id: id.to_string(),
            manager,
            factory,
        }
    }

    fn entries(nodes: &[&Node]) -> Vec<RosterEntry> {
        nodes
            .iter()
            .map(|n| RosterEntry {
                remote_id: n.id.clone(),
                identity: format!("user-{}", n.id),
                role: Role::Participant,
            })
            .collect()
    }

    fn managers(nodes: &[&Node]) -> Vec<(String, Arc<PeerSessionManager>)> {
        nodes
            .iter()
            .map(|n| (n.id.clone(), n.manager.clone()))
            .collect()
    }

    /// Staggered joins end in a full mesh: every node holds a connected
    /// session to every other node.
    #[tokio::test]
    async fn three_nodes_form_a_full_mesh() {
        let hub = SignalHub::new();
        let a = node(&hub, "s-1", Role::Host).await;
        let b = node(&hub, "s-2", Role::Participant).await;
        let c = node(&hub, "s-3", Role::Participant).await;
        let all = [&a, &b, &c];
        let routing = managers(&all);

        a.manager
            .handle_message(ServerMessage::Roster {
                self_id: "s-1".into(),
                participants: vec![],
            })
            .await;
        b.manager
            .handle_message(ServerMessage::Roster {
                self_id: "s-2".into(),
                participants: entries(&[&a]),
            })
            .await;
        hub.deliver_all(&routing, "s-1").await;
        c.manager
            .handle_message(ServerMessage::Roster {
                self_id: "s-3".into(),
                participants: entries(&[&a, &b]),
            })
            .await;
        hub.deliver_all(&routing, "s-1").await;

        for n in all {
            let connected = n.manager.connected_sessions();
            assert_eq!(connected.len(), 2, "node {} is missing sessions", n.id);
            assert!(connected.iter().all(|s| s.is_connected()));
        }
    }

    /// Both sides offer at once; the lower id yields, both end connected with
    /// one surviving description pair.
    #[tokio::test]
    async fn crossed_offers_converge() {
        let hub = SignalHub::new();
        let a = node(&hub, "s-1", Role::Host).await;
        let b = node(&hub, "s-2", Role::Participant).await;
        let routing = managers(&[&a, &b]);

        // A race at the relay: each roster lists the other node.
        a.manager
            .handle_message(ServerMessage::Roster {
                self_id: "s-1".into(),
                participants: entries(&[&b]),
            })
            .await;
        b.manager
            .handle_message(ServerMessage::Roster {
                self_id: "s-2".into(),
                participants: entries(&[&a]),
            })
            .await;
        hub.deliver_all(&routing, "s-1").await;

        let a_session = a.manager.session("s-2").unwrap();
        let b_session = b.manager.session("s-1").unwrap();
        assert!(a_session.is_connected());
        assert!(b_session.is_connected());
        // The lower id yielded its offer.
        assert_eq!(a_session.role(), NegotiationRole::Answerer);
        assert_eq!(b_session.role(), NegotiationRole::Offerer);
    }

    /// Candidates gathered on one side land on the other side's transport.
    #[tokio::test]
    async fn candidates_relay_end_to_end() {
        let hub = SignalHub::new();
        let a = node(&hub, "s-1", Role::Host).await;
        let b = node(&hub, "s-2", Role::Participant).await;
        let routing = managers(&[&a, &b]);

        a.manager
            .handle_message(ServerMessage::Roster {
                self_id: "s-1".into(),
                participants: vec![],
            })
            .await;
        b.manager
            .handle_message(ServerMessage::Roster {
                self_id: "s-2".into(),
                participants: entries(&[&a]),
            })
            .await;
        hub.deliver_all(&routing, "s-1").await;

        let b_transport = b.factory.transports_for("s-1").pop().unwrap();
        b_transport.emit_ice_candidate(IceCandidateInit {
            candidate: "candidate:7 1 UDP 2122260223 192.0.2.7 5007 typ host".into(),
            sdp_mid: Some("0".into()),
            sdp_mline_index: Some(0),
        });
        hub.deliver_all(&routing, "s-1").await;

        let a_transport = a.factory.transports_for("s-2").pop().unwrap();
        assert!(a_transport
            .ops()
            .iter()
            .any(|op| matches!(op, MockOp::AddCandidate(c) if c.starts_with("candidate:7"))));
    }

    /// A departing node propagates as PeerLeft and the survivors clean up.
    #[tokio::test]
    async fn leave_propagates_to_survivors() {
        let hub = SignalHub::new();
        let a = node(&hub, "s-1", Role::Host).await;
        let b = node(&hub, "s-2", Role::Participant).await;
        let routing = managers(&[&a, &b]);

        a.manager
            .handle_message(ServerMessage::Roster {
                self_id: "s-1".into(),
                participants: vec![],
            })
            .await;
        b.manager
            .handle_message(ServerMessage::Roster {
                self_id: "s-2".into(),
                participants: entries(&[&a]),
            })
            .await;
        hub.deliver_all(&routing, "s-1").await;
        assert!(a.manager.session("s-2").is_some());

        b.manager.leave().await;
        hub.deliver_all(&routing, "s-1").await;

        assert!(a.manager.session("s-2").is_none());
        assert!(a.manager.participants().is_empty());
    }
}
