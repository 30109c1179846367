//! `SessionActor` - per-session actor that owns session state.
//!
//! Each `SessionActor`:
//! - Owns all state for one session (seated participants, pending
//!   admissions, whiteboard/chat logs, mode, host identity)
//! - Serializes every operation on that state through its mailbox, so
//!   handlers that read-then-write session fields are atomic with respect
//!   to each other
//! - Pushes outbound frames into per-connection channels; delivery is
//!   fire-and-forget and a dead receiver never aborts sibling deliveries
//!
//! The actor exits when its seated and pending sets both drain while the
//! session is not mid-whiteboard-transition, or when the host ends the
//! meeting. On exit it tells the registry to drop the session id.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::messages::{
    JoinOutcome, JoinRequest, RegistryMessage, SessionMessage, SessionSnapshot,
};
use crate::errors::RelayError;
use crate::observability::RelayMetrics;
use crate::protocol::{sanitize_opaque, ClientFrame, Role, ServerFrame, UserRef};

/// Session-wide mode, set by the switch messages.
///
/// Whiteboard mode suppresses disconnect notifications and keeps an empty
/// session alive, because a mode switch makes every client drop its video
/// transport and reconnect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionMode {
    Video,
    Whiteboard,
}

/// A seated (or pending) participant's connection.
#[derive(Debug)]
struct Seat {
    user_id: String,
    user_name: String,
    role: Role,
    connection_id: String,
    outbound: mpsc::Sender<ServerFrame>,
    /// Cancelling this token force-closes the connection's socket.
    cancel: CancellationToken,
}

impl Seat {
    fn user_ref(&self) -> UserRef {
        UserRef {
            user_id: self.user_id.clone(),
            user_name: self.user_name.clone(),
        }
    }
}

/// Handle to a running `SessionActor`, held by the registry.
#[derive(Debug)]
pub struct SessionActorHandle {
    pub sender: mpsc::Sender<SessionMessage>,
    pub cancel_token: CancellationToken,
    pub task_handle: JoinHandle<()>,
}

pub struct SessionActor {
    session_id: String,
    receiver: mpsc::Receiver<SessionMessage>,
    /// Clone of our own mailbox sender, used by the grace timer task.
    self_sender: mpsc::Sender<SessionMessage>,
    registry: mpsc::Sender<RegistryMessage>,
    cancel_token: CancellationToken,
    whiteboard_end_grace: Duration,
    metrics: Arc<RelayMetrics>,

    /// Seated participants by participant id.
    seated: HashMap<String, Seat>,
    /// Seated participant ids in join order (broadcast and index-resolution
    /// order).
    join_order: Vec<String>,
    /// Participants waiting for host admission, by participant id.
    pending: HashMap<String, Seat>,
    /// connection id -> participant id, across both maps.
    connections: HashMap<String, String>,

    host_id: Option<String>,
    mode: SessionMode,
    whiteboard_controller: Option<String>,
    /// Connection id of the host that issued end-whiteboard-meeting, spared
    /// by the grace-timer force-close.
    whiteboard_ender: Option<String>,

    /// Stored frames are exactly what was broadcast, so replay to a late
    /// joiner is verbatim. Draw/Shape only.
    whiteboard_log: Vec<ServerFrame>,
    /// Chat frames only.
    chat_log: Vec<ServerFrame>,

    /// Whether anyone was ever seated; a pre-created session that nobody
    /// joined yet must not tear itself down.
    ever_seated: bool,
}

impl SessionActor {
    /// Spawn a new session actor and return its handle.
    pub fn spawn(
        session_id: String,
        registry: mpsc::Sender<RegistryMessage>,
        mailbox_capacity: usize,
        whiteboard_end_grace: Duration,
        cancel_token: CancellationToken,
        metrics: Arc<RelayMetrics>,
    ) -> SessionActorHandle {
        let (sender, receiver) = mpsc::channel(mailbox_capacity);

        let actor = SessionActor {
            session_id,
            receiver,
            self_sender: sender.clone(),
            registry,
            cancel_token: cancel_token.clone(),
            whiteboard_end_grace,
            metrics,
            seated: HashMap::new(),
            join_order: Vec::new(),
            pending: HashMap::new(),
            connections: HashMap::new(),
            host_id: None,
            mode: SessionMode::Video,
            whiteboard_controller: None,
            whiteboard_ender: None,
            whiteboard_log: Vec::new(),
            chat_log: Vec::new(),
            ever_seated: false,
        };

        let task_handle = tokio::spawn(actor.run());

        SessionActorHandle {
            sender,
            cancel_token,
            task_handle,
        }
    }

    async fn run(mut self) {
        info!(
            target: "relay.actor.session",
            session_id = %self.session_id,
            "SessionActor started"
        );

        loop {
            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    info!(
                        target: "relay.actor.session",
                        session_id = %self.session_id,
                        "SessionActor received cancellation signal"
                    );
                    self.close_all_connections();
                    break;
                }

                msg = self.receiver.recv() => {
                    match msg {
                        Some(message) => {
                            if self.handle_message(message) {
                                self.notify_registry_ended().await;
                                break;
                            }
                        }
                        None => {
                            debug!(
                                target: "relay.actor.session",
                                session_id = %self.session_id,
                                "SessionActor mailbox closed"
                            );
                            break;
                        }
                    }
                }
            }
        }

        info!(
            target: "relay.actor.session",
            session_id = %self.session_id,
            "SessionActor stopped"
        );
    }

    /// Dispatch one mailbox message. Returns true when the session is over
    /// and the actor should exit.
    fn handle_message(&mut self, message: SessionMessage) -> bool {
        match message {
            SessionMessage::Join {
                request,
                respond_to,
            } => {
                let result = self.handle_join(request);
                let _ = respond_to.send(result);
                false
            }
            SessionMessage::ClientFrame {
                connection_id,
                frame,
            } => self.handle_client_frame(&connection_id, frame),
            SessionMessage::Disconnected { connection_id } => {
                self.handle_disconnected(&connection_id)
            }
            SessionMessage::WhiteboardGraceElapsed => self.handle_whiteboard_grace_elapsed(),
            SessionMessage::GetState { respond_to } => {
                let _ = respond_to.send(self.snapshot());
                false
            }
        }
    }

    // ========================================================================
    // Join and admission
    // ========================================================================

    fn handle_join(&mut self, request: JoinRequest) -> Result<JoinOutcome, RelayError> {
        let user_id = match request.user_id.clone() {
            Some(id) => id,
            None => crate::ids::generate_id()?,
        };

        if request.role.is_host() {
            return Ok(self.join_host(request, user_id));
        }

        if request.whiteboard_mode {
            return Ok(self.join_whiteboard(request, user_id));
        }

        // Video participants go through admission control, which needs a
        // host to grant it.
        if self.host_id.is_none() {
            info!(
                target: "relay.actor.session",
                session_id = %self.session_id,
                user_id = %user_id,
                "Video join refused, no host in session"
            );
            return Err(RelayError::NoHost(self.session_id.clone()));
        }

        Ok(self.join_pending(request, user_id))
    }

    /// Seat a host-role join immediately. The first host claims `host_id`;
    /// a later host-role join is seated but never silently steals hostship.
    fn join_host(&mut self, request: JoinRequest, user_id: String) -> JoinOutcome {
        let user_name = request
            .user_name
            .clone()
            .unwrap_or_else(|| "Host".to_string());

        let claims_host = match &self.host_id {
            None => true,
            Some(existing) => existing == &user_id,
        };
        if claims_host {
            self.host_id = Some(user_id.clone());
            if self.whiteboard_controller.is_none() {
                self.whiteboard_controller = Some(user_id.clone());
            }
        }

        info!(
            target: "relay.actor.session",
            session_id = %self.session_id,
            user_id = %user_id,
            user_name = %user_name,
            claims_host,
            "Host-role participant joined"
        );

        self.seat(request, user_id.clone(), user_name.clone());
        // The joiner gets full state; nobody is announced for a host-role
        // join (clients learn of the host from hostInfo / admission).
        self.send_session_state(&user_id, claims_host.then_some(true));

        JoinOutcome { user_id, user_name }
    }

    /// Whiteboard-flag joins bypass admission control entirely.
    fn join_whiteboard(&mut self, request: JoinRequest, user_id: String) -> JoinOutcome {
        let user_name = request
            .user_name
            .clone()
            .unwrap_or_else(|| "Participant".to_string());

        info!(
            target: "relay.actor.session",
            session_id = %self.session_id,
            user_id = %user_id,
            user_name = %user_name,
            "Participant joined whiteboard session"
        );

        self.seat(request, user_id.clone(), user_name.clone());
        self.send_session_state(&user_id, None);
        self.broadcast_user_joined(&user_id);

        JoinOutcome { user_id, user_name }
    }

    /// Queue a video participant for admission and alert the host.
    fn join_pending(&mut self, request: JoinRequest, user_id: String) -> JoinOutcome {
        let user_name = request
            .user_name
            .clone()
            .unwrap_or_else(|| format!("User{}", self.pending.len() + 1));

        let seat = Seat {
            user_id: user_id.clone(),
            user_name: user_name.clone(),
            role: request.role,
            connection_id: request.connection_id.clone(),
            outbound: request.outbound,
            cancel: request.cancel,
        };

        self.deliver(
            &seat,
            ServerFrame::WaitingForAdmission {
                message: "Waiting for host to admit you to the meeting".to_string(),
            },
        );

        self.connections
            .insert(request.connection_id, user_id.clone());
        self.pending.insert(user_id.clone(), seat);

        info!(
            target: "relay.actor.session",
            session_id = %self.session_id,
            user_id = %user_id,
            user_name = %user_name,
            "Participant queued for admission"
        );

        // Admission request goes to the host only.
        let frame = ServerFrame::AdmissionRequest {
            user_id: user_id.clone(),
            user_name: user_name.clone(),
            session_id: self.session_id.clone(),
        };
        if let Some(host) = self.host_seat() {
            self.deliver(host, frame);
        }

        JoinOutcome { user_id, user_name }
    }

    /// Put a connection into the seated set.
    fn seat(&mut self, request: JoinRequest, user_id: String, user_name: String) {
        let seat = Seat {
            user_id: user_id.clone(),
            user_name,
            role: request.role,
            connection_id: request.connection_id.clone(),
            outbound: request.outbound,
            cancel: request.cancel,
        };
        self.connections.insert(request.connection_id, user_id.clone());
        if self.seated.insert(user_id.clone(), seat).is_none() {
            self.join_order.push(user_id);
        }
        self.ever_seated = true;
    }

    /// Replay the whiteboard and chat logs to one participant, verbatim and
    /// in append order, before any live broadcast reaches them.
    fn send_session_state(&self, user_id: &str, is_host: Option<bool>) {
        let Some(seat) = self.seated.get(user_id) else {
            return;
        };
        let frame = ServerFrame::SessionState {
            whiteboard: self.whiteboard_log.clone(),
            messages: self.chat_log.clone(),
            participant_count: self.seated.len(),
            your_user_id: seat.user_id.clone(),
            your_user_name: seat.user_name.clone(),
            is_host,
        };
        self.deliver(seat, frame);
    }

    fn broadcast_user_joined(&mut self, user_id: &str) {
        let Some(seat) = self.seated.get(user_id) else {
            return;
        };
        let frame = ServerFrame::UserJoined {
            user_id: seat.user_id.clone(),
            user_name: seat.user_name.clone(),
            participant_count: self.seated.len(),
        };
        self.broadcast(&frame, Some(user_id));
    }

    // ========================================================================
    // Post-join frame dispatch
    // ========================================================================

    /// Dispatch a frame from a registered connection, seated or still
    /// pending; only frames from unknown connections are dropped. Returns
    /// true when the frame ended the session.
    fn handle_client_frame(&mut self, connection_id: &str, frame: ClientFrame) -> bool {
        let Some(user_id) = self.connections.get(connection_id).cloned() else {
            debug!(
                target: "relay.actor.session",
                session_id = %self.session_id,
                connection_id = %connection_id,
                frame = frame.kind(),
                "Dropping frame from unknown connection"
            );
            return false;
        };

        match frame {
            ClientFrame::Join { .. } => {
                // A second join on a live connection is a no-op.
                false
            }
            ClientFrame::VideoOffer { to, offer } => {
                self.relay_signaling(&user_id, to, |from| ServerFrame::VideoOffer {
                    from,
                    offer,
                });
                false
            }
            ClientFrame::VideoAnswer { to, answer } => {
                self.relay_signaling(&user_id, to, |from| ServerFrame::VideoAnswer {
                    from,
                    answer,
                });
                false
            }
            ClientFrame::IceCandidate { to, candidate } => {
                self.relay_signaling(&user_id, to, |from| ServerFrame::IceCandidate {
                    from,
                    candidate,
                });
                false
            }
            ClientFrame::Draw { data } => {
                self.handle_whiteboard_op(&user_id, data, true);
                false
            }
            ClientFrame::Shape { data } => {
                self.handle_whiteboard_op(&user_id, data, false);
                false
            }
            ClientFrame::Clear => {
                self.handle_clear(&user_id);
                false
            }
            ClientFrame::Chat { message } => {
                self.handle_chat(&user_id, message);
                false
            }
            ClientFrame::Mute { muted } => {
                let frame = ServerFrame::Mute {
                    from: user_id.clone(),
                    muted,
                };
                self.broadcast(&frame, Some(&user_id));
                false
            }
            ClientFrame::VideoToggle { video_off } => {
                let frame = ServerFrame::VideoToggle {
                    from: user_id.clone(),
                    video_off,
                };
                self.broadcast(&frame, Some(&user_id));
                false
            }
            ClientFrame::AdmitUser { user_id: target } => {
                if self.is_host(&user_id) {
                    self.handle_admit(&target);
                }
                false
            }
            ClientFrame::RejectUser { user_id: target } => {
                if self.is_host(&user_id) {
                    self.handle_reject(&target);
                }
                false
            }
            ClientFrame::EndMeeting => self.is_host(&user_id) && self.handle_end_meeting(),
            ClientFrame::SwitchToWhiteboard => {
                if self.is_host(&user_id) {
                    self.handle_switch_to_whiteboard(&user_id);
                }
                false
            }
            ClientFrame::SwitchToVideo => {
                self.handle_switch_to_video(&user_id);
                false
            }
            ClientFrame::UserLeaving { reason } => {
                self.handle_user_leaving(&user_id, reason);
                false
            }
            ClientFrame::TransferWhiteboardControl {
                to_user_id,
                to_user_name,
                to_participant_index,
            } => {
                if self.is_host(&user_id) {
                    self.handle_transfer_control(
                        &user_id,
                        to_user_id,
                        to_user_name,
                        to_participant_index,
                    );
                }
                false
            }
            ClientFrame::TakeWhiteboardControl => {
                if self.is_host(&user_id) {
                    self.handle_take_control(&user_id);
                }
                false
            }
            ClientFrame::EndWhiteboardMeeting => {
                if self.is_host(&user_id) {
                    self.handle_end_whiteboard_meeting(&user_id, connection_id);
                }
                false
            }
        }
    }

    // ========================================================================
    // Signaling relay
    // ========================================================================

    /// Targeted relay when `to` names a seated participant; broadcast to
    /// everyone else otherwise. An unknown target is dropped.
    fn relay_signaling<F>(&mut self, from: &str, to: Option<String>, build: F)
    where
        F: FnOnce(String) -> ServerFrame,
    {
        let frame = build(from.to_string());
        match to {
            Some(target) => {
                if let Some(seat) = self.seated.get(&target) {
                    self.deliver(seat, frame);
                } else {
                    debug!(
                        target: "relay.actor.session",
                        session_id = %self.session_id,
                        from = %from,
                        to = %target,
                        frame = frame.kind(),
                        "Dropping relay to unknown target"
                    );
                }
            }
            None => self.broadcast(&frame, Some(from)),
        }
    }

    // ========================================================================
    // Whiteboard and chat
    // ========================================================================

    /// Stamp a draw/shape payload with its author, append it to the log,
    /// and echo it to everyone including the sender. The echo-to-sender is
    /// deliberate: the stored log is authoritative, and every client renders
    /// exactly what the log says.
    fn handle_whiteboard_op(
        &mut self,
        user_id: &str,
        mut data: serde_json::Map<String, serde_json::Value>,
        is_draw: bool,
    ) {
        let Some(seat) = self.participant(user_id) else {
            return;
        };
        sanitize_opaque(&mut data);
        let frame = if is_draw {
            ServerFrame::Draw {
                data,
                user_id: seat.user_id.clone(),
                user_name: seat.user_name.clone(),
            }
        } else {
            ServerFrame::Shape {
                data,
                user_id: seat.user_id.clone(),
                user_name: seat.user_name.clone(),
            }
        };
        self.whiteboard_log.push(frame.clone());
        self.broadcast(&frame, None);
    }

    fn handle_clear(&mut self, user_id: &str) {
        let Some(seat) = self.participant(user_id) else {
            return;
        };
        let frame = ServerFrame::Clear {
            user_id: seat.user_id.clone(),
            user_name: seat.user_name.clone(),
        };
        self.whiteboard_log.clear();
        self.broadcast(&frame, None);
    }

    fn handle_chat(&mut self, user_id: &str, message: String) {
        let Some(seat) = self.participant(user_id) else {
            return;
        };
        let frame = ServerFrame::Chat {
            user_id: seat.user_id.clone(),
            user_name: seat.user_name.clone(),
            message,
            timestamp: chrono::Utc::now().timestamp_millis(),
        };
        self.chat_log.push(frame.clone());
        self.broadcast(&frame, None);
    }

    // ========================================================================
    // Admission decisions (host only, checked by the dispatcher)
    // ========================================================================

    fn handle_admit(&mut self, target: &str) {
        let Some(seat) = self.pending.remove(target) else {
            return;
        };

        let user_name = seat.user_name.clone();
        self.seated.insert(target.to_string(), seat);
        self.join_order.push(target.to_string());
        self.ever_seated = true;

        info!(
            target: "relay.actor.session",
            session_id = %self.session_id,
            user_id = %target,
            user_name = %user_name,
            "Host admitted participant"
        );

        let existing_users: Vec<UserRef> = self
            .join_order
            .iter()
            .filter(|id| id.as_str() != target)
            .filter_map(|id| self.seated.get(id))
            .map(Seat::user_ref)
            .collect();
        let host_info = self
            .host_seat()
            .map(Seat::user_ref)
            .unwrap_or_else(|| UserRef {
                user_id: self.host_id.clone().unwrap_or_default(),
                user_name: "Host".to_string(),
            });

        if let Some(admitted) = self.seated.get(target) {
            self.deliver(
                admitted,
                ServerFrame::AdmittedToMeeting {
                    session_id: self.session_id.clone(),
                    your_user_id: target.to_string(),
                    existing_users,
                    host_info,
                },
            );
        }

        let frame = ServerFrame::UserJoined {
            user_id: target.to_string(),
            user_name,
            participant_count: self.seated.len(),
        };
        self.broadcast(&frame, Some(target));
    }

    fn handle_reject(&mut self, target: &str) {
        let Some(seat) = self.pending.remove(target) else {
            return;
        };
        self.connections.remove(&seat.connection_id);

        info!(
            target: "relay.actor.session",
            session_id = %self.session_id,
            user_id = %target,
            "Host rejected participant"
        );

        self.deliver(
            &seat,
            ServerFrame::RejectedFromMeeting {
                message: "Host has denied your request to join the meeting".to_string(),
            },
        );
        seat.cancel.cancel();
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// End the meeting for everyone: notice to seated and pending alike,
    /// then force-close them all. Returns true (session over).
    fn handle_end_meeting(&mut self) -> bool {
        info!(
            target: "relay.actor.session",
            session_id = %self.session_id,
            "Host ended meeting"
        );

        let frame = ServerFrame::MeetingEnded {
            message: "Host has ended the meeting".to_string(),
        };
        self.broadcast(&frame, None);
        for seat in self.pending.values() {
            self.deliver(seat, frame.clone());
        }
        self.close_all_connections();
        true
    }

    fn handle_switch_to_whiteboard(&mut self, user_id: &str) {
        let Some(seat) = self.seated.get(user_id) else {
            return;
        };
        self.mode = SessionMode::Whiteboard;

        info!(
            target: "relay.actor.session",
            session_id = %self.session_id,
            host_id = %user_id,
            "Session switched to whiteboard mode"
        );

        let frame = ServerFrame::SwitchToWhiteboard {
            session_id: self.session_id.clone(),
            host_name: seat.user_name.clone(),
        };
        self.broadcast(&frame, None);
    }

    fn handle_switch_to_video(&mut self, user_id: &str) {
        let Some(user_name) = self.participant(user_id).map(|seat| seat.user_name.clone())
        else {
            return;
        };
        self.mode = SessionMode::Video;

        info!(
            target: "relay.actor.session",
            session_id = %self.session_id,
            user_id = %user_id,
            "Session switched to video mode"
        );

        let frame = ServerFrame::SwitchToVideo {
            session_id: self.session_id.clone(),
            user_name,
            is_transition: true,
        };
        self.broadcast(&frame, Some(user_id));
    }

    /// An explicit goodbye, announced to everyone including the sender. The
    /// seat itself is only released when the socket actually closes.
    fn handle_user_leaving(&mut self, user_id: &str, reason: Option<String>) {
        let Some(seat) = self.participant(user_id) else {
            return;
        };
        let frame = ServerFrame::UserLeft {
            user_id: seat.user_id.clone(),
            user_name: seat.user_name.clone(),
            participant_count: self.seated.len().saturating_sub(1),
            reason: Some(reason.unwrap_or_else(|| "left_meeting".to_string())),
            is_transition: None,
        };
        self.broadcast(&frame, None);
    }

    // ========================================================================
    // Whiteboard control
    // ========================================================================

    /// Resolve the transfer target by explicit id+name, by 1-based index
    /// into the non-host seated participants, or by matching `toUserId`
    /// against display names. No target, no broadcast.
    fn handle_transfer_control(
        &mut self,
        from: &str,
        to_user_id: Option<String>,
        to_user_name: Option<String>,
        to_participant_index: Option<usize>,
    ) {
        let target = if let Some(index) = to_participant_index {
            self.join_order
                .iter()
                .filter_map(|id| self.seated.get(id))
                .filter(|seat| !seat.role.is_host())
                .nth(index.wrapping_sub(1))
                .map(Seat::user_ref)
        } else {
            match (to_user_id, to_user_name) {
                (Some(user_id), Some(user_name)) => Some(UserRef { user_id, user_name }),
                (Some(name_or_id), None) => self
                    .join_order
                    .iter()
                    .filter_map(|id| self.seated.get(id))
                    .find(|seat| seat.user_name == name_or_id)
                    .map(Seat::user_ref),
                _ => None,
            }
        };

        let Some(target) = target else {
            debug!(
                target: "relay.actor.session",
                session_id = %self.session_id,
                "Whiteboard control transfer target not resolved"
            );
            return;
        };

        let from_name = self
            .seated
            .get(from)
            .map(|seat| seat.user_name.clone())
            .unwrap_or_default();

        info!(
            target: "relay.actor.session",
            session_id = %self.session_id,
            to_user_id = %target.user_id,
            to_user_name = %target.user_name,
            "Whiteboard control transferred"
        );

        self.whiteboard_controller = Some(target.user_id.clone());
        let frame = ServerFrame::TransferWhiteboardControl {
            to_user_id: target.user_id,
            to_user_name: target.user_name,
            from_user: from_name,
        };
        self.broadcast(&frame, None);
    }

    fn handle_take_control(&mut self, user_id: &str) {
        let Some(seat) = self.seated.get(user_id) else {
            return;
        };
        self.whiteboard_controller = Some(user_id.to_string());
        let frame = ServerFrame::TakeWhiteboardControl {
            from_user: seat.user_name.clone(),
        };
        self.broadcast(&frame, None);
    }

    /// Broadcast the end notice, then give clients a grace period to render
    /// it before the timer force-closes their sockets.
    fn handle_end_whiteboard_meeting(&mut self, user_id: &str, connection_id: &str) {
        let Some(seat) = self.seated.get(user_id) else {
            return;
        };

        info!(
            target: "relay.actor.session",
            session_id = %self.session_id,
            host_id = %user_id,
            "Host ended whiteboard meeting, starting grace period"
        );

        let frame = ServerFrame::WhiteboardMeetingEnded {
            message: "Host has ended the whiteboard meeting".to_string(),
            host_name: seat.user_name.clone(),
        };
        self.broadcast(&frame, None);

        self.whiteboard_ender = Some(connection_id.to_string());

        let sender = self.self_sender.clone();
        let grace = self.whiteboard_end_grace;
        tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            // A closed mailbox means the session is already gone.
            let _ = sender.send(SessionMessage::WhiteboardGraceElapsed).await;
        });
    }

    /// The grace period is over; close everyone but the host that ended the
    /// meeting. Returns true (session over).
    fn handle_whiteboard_grace_elapsed(&mut self) -> bool {
        let spared = self.whiteboard_ender.take();
        for seat in self.seated.values().chain(self.pending.values()) {
            if spared.as_deref() != Some(seat.connection_id.as_str()) {
                seat.cancel.cancel();
            }
        }
        info!(
            target: "relay.actor.session",
            session_id = %self.session_id,
            "Whiteboard meeting cleaned up after grace period"
        );
        true
    }

    // ========================================================================
    // Disconnects
    // ========================================================================

    /// A socket closed. Pending connections vanish silently; seated ones
    /// are announced unless the session is mid-whiteboard-transition.
    /// Returns true when the session has drained and should end.
    fn handle_disconnected(&mut self, connection_id: &str) -> bool {
        let Some(user_id) = self.connections.remove(connection_id) else {
            return false;
        };

        if let Some(seat) = self.pending.remove(&user_id) {
            debug!(
                target: "relay.actor.session",
                session_id = %self.session_id,
                user_id = %seat.user_id,
                "Pending participant disconnected"
            );
            return self.maybe_drained();
        }

        // A stale disconnect for a seat that was already replaced by a
        // newer connection must not unseat the newcomer.
        let replaced = self
            .seated
            .get(&user_id)
            .is_some_and(|seat| seat.connection_id == connection_id);
        if !replaced {
            return false;
        }
        let Some(seat) = self.seated.remove(&user_id) else {
            return false;
        };
        self.join_order.retain(|id| id != &user_id);

        info!(
            target: "relay.actor.session",
            session_id = %self.session_id,
            user_id = %seat.user_id,
            user_name = %seat.user_name,
            whiteboard_mode = self.mode == SessionMode::Whiteboard,
            "Participant disconnected"
        );

        if self.mode == SessionMode::Video {
            let frame = ServerFrame::UserLeft {
                user_id: seat.user_id.clone(),
                user_name: seat.user_name.clone(),
                participant_count: self.seated.len(),
                reason: None,
                is_transition: Some(false),
            };
            self.broadcast(&frame, None);
        }

        self.maybe_drained()
    }

    /// Whether the session should tear itself down: everyone left, it was
    /// ever populated, and it is not being kept alive for a whiteboard
    /// transition.
    fn maybe_drained(&self) -> bool {
        self.ever_seated
            && self.seated.is_empty()
            && self.pending.is_empty()
            && self.mode == SessionMode::Video
    }

    // ========================================================================
    // Delivery
    // ========================================================================

    /// Fan a frame out to seated participants in join order. Delivery is
    /// fire-and-forget; a full or closed channel costs that one client its
    /// connection and never the rest of the broadcast.
    fn broadcast(&self, frame: &ServerFrame, exclude: Option<&str>) {
        for user_id in &self.join_order {
            if exclude == Some(user_id.as_str()) {
                continue;
            }
            if let Some(seat) = self.seated.get(user_id) {
                self.deliver(seat, frame.clone());
            }
        }
    }

    fn deliver(&self, seat: &Seat, frame: ServerFrame) {
        match seat.outbound.try_send(frame) {
            Ok(()) => self.metrics.record_frame_relayed(),
            Err(e) => {
                self.metrics.record_frame_dropped();
                warn!(
                    target: "relay.actor.session",
                    user_id = %seat.user_id,
                    connection_id = %seat.connection_id,
                    error = %e,
                    "Dropping connection that cannot keep up"
                );
                seat.cancel.cancel();
            }
        }
    }

    fn close_all_connections(&self) {
        for seat in self.seated.values().chain(self.pending.values()) {
            seat.cancel.cancel();
        }
    }

    async fn notify_registry_ended(&self) {
        let _ = self
            .registry
            .send(RegistryMessage::SessionEnded {
                session_id: self.session_id.clone(),
            })
            .await;
    }

    // ========================================================================
    // Queries
    // ========================================================================

    fn is_host(&self, user_id: &str) -> bool {
        self.host_id.as_deref() == Some(user_id)
    }

    /// Resolve a sender whether seated or still pending admission. Frames
    /// are attributed by registration, not by admission state.
    fn participant(&self, user_id: &str) -> Option<&Seat> {
        self.seated.get(user_id).or_else(|| self.pending.get(user_id))
    }

    fn host_seat(&self) -> Option<&Seat> {
        self.host_id.as_ref().and_then(|id| self.seated.get(id))
    }

    fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            session_id: self.session_id.clone(),
            participant_count: self.seated.len(),
            pending_count: self.pending.len(),
            host_id: self.host_id.clone(),
            whiteboard_mode: self.mode == SessionMode::Whiteboard,
            whiteboard_controller: self.whiteboard_controller.clone(),
            whiteboard_log_len: self.whiteboard_log.len(),
            chat_log_len: self.chat_log.len(),
        }
    }
}
