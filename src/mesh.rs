// src/mesh.rs
//
// Mesh session management.
//
// `PeerSessionManager` owns every `PeerSession` in the room and is the single
// consumer of inbound signaling.  Topology is a full mesh: one session per
// remote participant, N·(N−1)/2 sessions room-wide.  The joiner offers to
// every peer already in the room; peers that join later offer to us.  When
// offers cross (glare), the lexically lower session id yields its own offer
// and answers the remote one, so exactly one description pair survives per
// peer pair.
//
// Signaling failures are scoped to one peer: a failed negotiation closes that
// session and leaves the rest of the mesh untouched.
//
// ────────────────────────────────────────────────────────────────────────────

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::error::MeshError;
use crate::events::{EventBus, RoomEvent};
use crate::session::{NegotiationRole, PeerSession, SignalingState};
use crate::signal::{
    ClientMessage, IceCandidateInit, Role, RosterEntry, ServerMessage, SessionDescription,
    SignalingChannel,
};
use crate::source::{MediaStreamHandle, SourceSlot};
use crate::transport::PeerTransportFactory;

// ─── Participants ───────────────────────────────────────────────────────────

/// A remote participant as currently known to the mesh.
#[derive(Debug, Clone)]
pub struct Participant {
    pub remote_id: String,
    pub identity: String,
    pub role: Role,
    /// Last announced camera state; joins start with the camera assumed on.
    pub camera_off: bool,
}

impl From<RosterEntry> for Participant {
    fn from(entry: RosterEntry) -> Self {
        Self {
            remote_id: entry.remote_id,
            identity: entry.identity,
            role: entry.role,
            camera_off: false,
        }
    }
}

struct JoinParams {
    room: String,
    identity: String,
    role: Role,
}

// ─── PeerSessionManager ─────────────────────────────────────────────────────

/// Owns the room's peer sessions and drives them from signaling input.
pub struct PeerSessionManager {
    channel: Arc<dyn SignalingChannel>,
    transports: Arc<dyn PeerTransportFactory>,
    events: EventBus,
    slot: Arc<SourceSlot>,

    join: Mutex<Option<JoinParams>>,
    self_id: RwLock<Option<String>>,
    sessions: RwLock<HashMap<String, Arc<PeerSession>>>,
    participants: RwLock<HashMap<String, Participant>>,
    // Inbound media per remote.  Kept in its own Arc so transport callbacks
    // capture only this map, not the manager.
    inbound: Arc<RwLock<HashMap<String, MediaStreamHandle>>>,
    // Waiter for the host's verdict on our outstanding screen-share request.
    screen_grant: Mutex<Option<oneshot::Sender<bool>>>,
    left: AtomicBool,
}

impl PeerSessionManager {
    pub fn new(
        channel: Arc<dyn SignalingChannel>,
        transports: Arc<dyn PeerTransportFactory>,
        events: EventBus,
        slot: Arc<SourceSlot>,
    ) -> Self {
        Self {
            channel,
            transports,
            events,
            slot,
            join: Mutex::new(None),
            self_id: RwLock::new(None),
            sessions: RwLock::new(HashMap::new()),
            participants: RwLock::new(HashMap::new()),
            inbound: Arc::new(RwLock::new(HashMap::new())),
            screen_grant: Mutex::new(None),
            left: AtomicBool::new(false),
        }
    }

    // ─── Accessors ──────────────────────────────────────────────────────

    pub fn events(&self) -> EventBus {
        self.events.clone()
    }

    pub fn source_slot(&self) -> Arc<SourceSlot> {
        self.slot.clone()
    }

    /// Our relay-assigned session id; `None` until the roster arrives.
    pub fn self_id(&self) -> Option<String> {
        self.self_id.read().unwrap().clone()
    }

    pub fn role(&self) -> Option<Role> {
        self.join.lock().unwrap().as_ref().map(|j| j.role)
    }

    pub fn session(&self, remote_id: &str) -> Option<Arc<PeerSession>> {
        self.sessions.read().unwrap().get(remote_id).cloned()
    }

    /// Sessions that completed the offer/answer exchange, sorted by remote id
    /// for deterministic iteration.
    pub fn connected_sessions(&self) -> Vec<Arc<PeerSession>> {
        let mut sessions: Vec<_> = self
            .sessions
            .read()
            .unwrap()
            .values()
            .filter(|s| s.is_connected())
            .cloned()
            .collect();
        sessions.sort_by(|a, b| a.remote_id().cmp(b.remote_id()));
        sessions
    }

    /// Every session that has not been closed, sorted by remote id.  Includes
    /// sessions still mid-negotiation, whose attached tracks are covered by
    /// the exchange in flight.
    pub fn active_sessions(&self) -> Vec<Arc<PeerSession>> {
        let mut sessions: Vec<_> = self
            .sessions
            .read()
            .unwrap()
            .values()
            .filter(|s| !s.is_closed())
            .cloned()
            .collect();
        sessions.sort_by(|a, b| a.remote_id().cmp(b.remote_id()));
        sessions
    }

    pub fn participants(&self) -> Vec<Participant> {
        let mut list: Vec<_> = self.participants.read().unwrap().values().cloned().collect();
        list.sort_by(|a, b| a.remote_id.cmp(&b.remote_id));
        list
    }

    pub fn inbound_stream(&self, remote_id: &str) -> Option<MediaStreamHandle> {
        self.inbound.read().unwrap().get(remote_id).cloned()
    }

    /// Snapshot of every remote's inbound media.
    pub fn inbound_streams(&self) -> HashMap<String, MediaStreamHandle> {
        self.inbound.read().unwrap().clone()
    }

    fn room(&self) -> Result<String, MeshError> {
        self.join
            .lock()
            .unwrap()
            .as_ref()
            .map(|j| j.room.clone())
            .ok_or_else(|| MeshError::signaling("not joined to a room"))
    }

    // ─── Lifecycle ──────────────────────────────────────────────────────

    /// Register in a room.  Session setup starts when the relay's roster
    /// arrives on the inbound channel.
    pub async fn join(&self, room: &str, identity: &str, role: Role) -> Result<(), MeshError> {
        self.channel
            .send(ClientMessage::Join {
                room: room.to_string(),
                identity: identity.to_string(),
                role,
            })
            .await?;
        *self.join.lock().unwrap() = Some(JoinParams {
            room: room.to_string(),
            identity: identity.to_string(),
            role,
        });
        info!(room, identity, role = role.as_str(), "joining room");
        Ok(())
    }

    /// Pump inbound signaling until the channel closes or `leave` runs.
    pub async fn run(&self, mut rx: mpsc::Receiver<ServerMessage>) {
        while let Some(msg) = rx.recv().await {
            if self.left.load(Ordering::SeqCst) {
                break;
            }
            self.handle_message(msg).await;
        }
        debug!("signaling pump finished");
    }

    /// Leave the room: announce, close every session, drop inbound media and
    /// tear the channel down. Idempotent.
    pub async fn leave(&self) {
        if self.left.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Ok(room) = self.room() {
            if let Err(e) = self.channel.send(ClientMessage::Leave { room }).await {
                warn!("leave announcement failed: {e}");
            }
        }

        let sessions: Vec<_> = self.sessions.write().unwrap().drain().collect();
        for (_, session) in sessions {
            session.close().await;
        }
        if let Some(source) = self.slot.take() {
            source.stop_all();
        }
        self.inbound.write().unwrap().clear();
        self.participants.write().unwrap().clear();
        self.channel.disconnect().await;
        info!("left room");
    }

    // ─── Inbound dispatch ───────────────────────────────────────────────

    /// Handle one relay message.  Stale and duplicate input is logged and
    /// dropped; only per-peer failures close anything, and then only that
    /// peer's session.
    pub async fn handle_message(&self, msg: ServerMessage) {
        match msg {
            ServerMessage::Roster {
                self_id,
                participants,
            } => self.on_roster(self_id, participants).await,
            ServerMessage::PeerJoined {
                remote_id,
                identity,
                role,
            } => self.on_peer_joined(remote_id, identity, role),
            ServerMessage::PeerLeft { remote_id } => self.on_peer_left(&remote_id).await,
            ServerMessage::Offer { from, description } => self.on_offer(&from, description).await,
            ServerMessage::Answer { from, description } => {
                self.on_answer(&from, description).await
            }
            ServerMessage::IceCandidate { from, candidate } => {
                self.on_ice_candidate(&from, candidate).await
            }
            ServerMessage::ScreenShareRequest { from } => {
                self.events.emit(RoomEvent::ScreenShareRequested { from });
            }
            ServerMessage::ScreenShareResponse { granted } => {
                if let Some(tx) = self.screen_grant.lock().unwrap().take() {
                    let _ = tx.send(granted);
                } else {
                    debug!("screen-share verdict with no pending request");
                }
            }
            ServerMessage::ScreenShareStarted { remote_id } => {
                self.events.emit(RoomEvent::ScreenShareChanged {
                    remote_id,
                    sharing: true,
                });
            }
            ServerMessage::ScreenShareStopped { remote_id } => {
                self.events.emit(RoomEvent::ScreenShareChanged {
                    remote_id,
                    sharing: false,
                });
            }
            ServerMessage::CameraToggled {
                remote_id,
                camera_off,
            } => {
                if let Some(p) = self.participants.write().unwrap().get_mut(&remote_id) {
                    p.camera_off = camera_off;
                }
                self.events.emit(RoomEvent::CameraToggled {
                    remote_id,
                    camera_off,
                });
            }
            ServerMessage::CameraToggleRejected { reason } => {
                warn!("camera toggle rejected by relay: {reason}");
            }
        }
    }

    /// Roster is the join acknowledgement: record our id, then offer to every
    /// participant already present.  Replays are harmless — peers we already
    /// hold a session for are skipped.
    async fn on_roster(&self, self_id: String, mut participants: Vec<RosterEntry>) {
        info!(self_id, count = participants.len(), "roster received");
        *self.self_id.write().unwrap() = Some(self_id);

        participants.sort_by(|a, b| a.remote_id.cmp(&b.remote_id));
        for entry in participants {
            self.on_peer_joined(entry.remote_id.clone(), entry.identity.clone(), entry.role);
            self.ensure_offer_session(&entry.remote_id).await;
        }
    }

    fn on_peer_joined(&self, remote_id: String, identity: String, role: Role) {
        let inserted = {
            let mut participants = self.participants.write().unwrap();
            if participants.contains_key(&remote_id) {
                false
            } else {
                participants.insert(
                    remote_id.clone(),
                    Participant {
                        remote_id: remote_id.clone(),
                        identity: identity.clone(),
                        role,
                        camera_off: false,
                    },
                );
                true
            }
        };
        if inserted {
            info!(remote_id, identity, "peer joined");
            self.events.emit(RoomEvent::PeerJoined {
                remote_id,
                identity,
                role,
            });
        }
    }

    async fn on_peer_left(&self, remote_id: &str) {
        let session = self.sessions.write().unwrap().remove(remote_id);
        if let Some(session) = session {
            session.close().await;
        }
        self.inbound.write().unwrap().remove(remote_id);
        let known = self.participants.write().unwrap().remove(remote_id).is_some();
        if known {
            info!(remote_id, "peer left");
            self.events.emit(RoomEvent::PeerLeft {
                remote_id: remote_id.to_string(),
            });
        }
    }

    async fn on_offer(&self, from: &str, description: SessionDescription) {
        let existing = self.session(from);
        match existing {
            None => self.answer_offer(from, description).await,
            Some(session) if session.state() == SignalingState::HaveLocalOffer => {
                // Glare: both sides offered.  The lexically lower id yields
                // its own offer and answers; the higher id ignores the
                // incoming offer and waits for its answer.
                let yields = match self.self_id() {
                    Some(self_id) => self_id.as_str() < from,
                    None => false,
                };
                if yields {
                    info!(remote_id = from, "offer glare, yielding ours");
                    self.sessions.write().unwrap().remove(from);
                    session.close().await;
                    self.answer_offer(from, description).await;
                } else {
                    debug!(remote_id = from, "offer glare, keeping ours");
                }
            }
            Some(_) => {
                debug!(remote_id = from, "duplicate offer ignored");
            }
        }
    }

    async fn answer_offer(&self, from: &str, description: SessionDescription) {
        let session = match self.create_session(from, NegotiationRole::Answerer).await {
            Ok(session) => session,
            Err(e) => {
                warn!(remote_id = from, "session setup failed: {e}");
                return;
            }
        };

        let answer = match session.accept_offer(description).await {
            Ok(answer) => answer,
            Err(e) => {
                self.fail_session(from, &e).await;
                return;
            }
        };
        if let Err(e) = self
            .channel
            .send(ClientMessage::Answer {
                to: from.to_string(),
                description: answer,
            })
            .await
        {
            self.fail_session(from, &e).await;
        }
    }

    async fn on_answer(&self, from: &str, description: SessionDescription) {
        let Some(session) = self.session(from) else {
            warn!(remote_id = from, "answer for unknown session dropped");
            return;
        };
        match session.accept_answer(description).await {
            Ok(()) => info!(remote_id = from, "session connected"),
            Err(MeshError::StaleMessage(reason)) => {
                debug!(remote_id = from, "stale answer ignored: {reason}");
            }
            Err(e) => self.fail_session(from, &e).await,
        }
    }

    async fn on_ice_candidate(&self, from: &str, candidate: IceCandidateInit) {
        let Some(session) = self.session(from) else {
            debug!(remote_id = from, "candidate for unknown session dropped");
            return;
        };
        match session.add_ice_candidate(candidate).await {
            Ok(()) => {}
            Err(MeshError::StaleMessage(reason)) => {
                debug!(remote_id = from, "stale candidate ignored: {reason}");
            }
            Err(e) => warn!(remote_id = from, "candidate rejected: {e}"),
        }
    }

    // ─── Session construction ───────────────────────────────────────────

    /// Create an offerer session for `remote_id` and send the offer.  No-op
    /// when a session already exists (duplicate roster delivery).
    async fn ensure_offer_session(&self, remote_id: &str) {
        if self.sessions.read().unwrap().contains_key(remote_id) {
            debug!(remote_id, "session already exists, skipping offer");
            return;
        }
        let session = match self.create_session(remote_id, NegotiationRole::Offerer).await {
            Ok(session) => session,
            Err(e) => {
                warn!(remote_id, "session setup failed: {e}");
                return;
            }
        };

        let offer = match session.start_offer().await {
            Ok(offer) => offer,
            Err(e) => {
                self.fail_session(remote_id, &e).await;
                return;
            }
        };
        if let Err(e) = self
            .channel
            .send(ClientMessage::Offer {
                to: remote_id.to_string(),
                description: offer,
            })
            .await
        {
            self.fail_session(remote_id, &e).await;
        }
    }

    /// Build transport + session for one remote, wire its callbacks, attach
    /// the current local source and register it in the map.
    async fn create_session(
        &self,
        remote_id: &str,
        role: NegotiationRole,
    ) -> Result<Arc<PeerSession>, MeshError> {
        let transport = self.transports.create(remote_id).await?;

        // Gathered candidates go straight out through the relay.
        let channel = self.channel.clone();
        let to = remote_id.to_string();
        transport.on_ice_candidate(Box::new(move |candidate| {
            let channel = channel.clone();
            let to = to.clone();
            tokio::spawn(async move {
                if let Err(e) = channel
                    .send(ClientMessage::IceCandidate { to: to.clone(), candidate })
                    .await
                {
                    warn!(remote_id = %to, "candidate relay failed: {e}");
                }
            });
        }));

        // Inbound media lands in the shared map and is announced on the bus.
        let inbound = self.inbound.clone();
        let events = self.events.clone();
        let from = remote_id.to_string();
        transport.on_remote_stream(Box::new(move |stream| {
            inbound.write().unwrap().insert(from.clone(), stream.clone());
            events.emit(RoomEvent::RemoteStream {
                remote_id: from.clone(),
                stream,
            });
        }));

        let session = Arc::new(PeerSession::new(remote_id, role, transport));
        if let Some(source) = self.slot.current() {
            session.attach_source(&source).await?;
        }
        self.sessions
            .write()
            .unwrap()
            .insert(remote_id.to_string(), session.clone());
        Ok(session)
    }

    /// Negotiation with one peer failed: close and drop that session, leave
    /// the rest of the mesh alone.
    async fn fail_session(&self, remote_id: &str, err: &MeshError) {
        warn!(remote_id, "negotiation failed, closing session: {err}");
        let session = self.sessions.write().unwrap().remove(remote_id);
        if let Some(session) = session {
            session.close().await;
        }
        self.inbound.write().unwrap().remove(remote_id);
    }

    // ─── Screen share and camera signaling ──────────────────────────────

    /// Ask the host for screen-share permission.  Resolves with the verdict;
    /// a dropped channel (host left, superseding request) reads as denial.
    pub async fn request_screen_share(&self) -> Result<oneshot::Receiver<bool>, MeshError> {
        let room = self.room()?;
        let (tx, rx) = oneshot::channel();
        *self.screen_grant.lock().unwrap() = Some(tx);
        self.channel
            .send(ClientMessage::ScreenShareRequest { room })
            .await?;
        Ok(rx)
    }

    /// Host-side verdict on a pending request from `to`.
    pub async fn respond_screen_share(&self, to: &str, granted: bool) -> Result<(), MeshError> {
        self.channel
            .send(ClientMessage::ScreenShareResponse {
                to: to.to_string(),
                granted,
            })
            .await
    }

    /// Broadcast that the local screen share started or stopped.
    pub async fn notify_screen_share(&self, started: bool) -> Result<(), MeshError> {
        let msg = if started {
            ClientMessage::ScreenShareStarted
        } else {
            ClientMessage::ScreenShareStopped
        };
        self.channel.send(msg).await
    }

    /// Broadcast the local camera on/off state.
    pub async fn notify_camera(&self, camera_off: bool) -> Result<(), MeshError> {
        let room = self.room()?;
        self.channel
            .send(ClientMessage::CameraToggle { room, camera_off })
            .await
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────
