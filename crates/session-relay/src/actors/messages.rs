//! Message types for actor communication.
//!
//! All inter-actor communication uses strongly-typed message passing via
//! `tokio::sync::mpsc`. Response patterns use `tokio::sync::oneshot` for
//! request-reply semantics.

use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::errors::RelayError;
use crate::protocol::{ClientFrame, Role, ServerFrame};

/// Messages sent to `SessionRegistryActor`.
#[derive(Debug)]
pub enum RegistryMessage {
    /// Allocate a fresh session id and create an empty session for it.
    AllocateSession {
        /// Response channel for the new session id.
        respond_to: oneshot::Sender<Result<String, RelayError>>,
    },

    /// Get a handle to a session, creating the session if it does not exist.
    GetOrCreateSession {
        session_id: String,
        /// Response channel for the session handle.
        respond_to: oneshot::Sender<Result<SessionLink, RelayError>>,
    },

    /// Look up a session without creating it (status endpoint).
    GetSessionStatus {
        session_id: String,
        /// Response channel for the status snapshot.
        respond_to: oneshot::Sender<SessionStatus>,
    },

    /// A session actor finished and should be dropped from the map.
    SessionEnded { session_id: String },

    /// Current registry status (for health checks and tests).
    GetStatus {
        respond_to: oneshot::Sender<RegistryStatus>,
    },
}

/// Status snapshot for a single session, as reported over REST.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionStatus {
    pub exists: bool,
    pub participant_count: usize,
}

/// Registry-wide status snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryStatus {
    pub session_count: usize,
}

/// Handle to a session actor's mailbox.
#[derive(Debug, Clone)]
pub struct SessionLink {
    pub sender: mpsc::Sender<SessionMessage>,
}

/// A new connection announcing itself to a session.
///
/// Carries everything the session actor needs to seat (or queue) the
/// participant and to push frames back at it for the rest of its life.
#[derive(Debug)]
pub struct JoinRequest {
    /// Server-assigned connection id, unique per WebSocket.
    pub connection_id: String,
    /// Caller-supplied participant id, if any; the session assigns one
    /// otherwise.
    pub user_id: Option<String>,
    pub user_name: Option<String>,
    pub role: Role,
    /// Whether the client is joining in whiteboard mode.
    pub whiteboard_mode: bool,
    /// Outbound frame channel for this connection.
    pub outbound: mpsc::Sender<ServerFrame>,
    /// Cancelling this token force-closes the connection's socket.
    pub cancel: CancellationToken,
}

/// Result of a join: the identity the session settled on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinOutcome {
    pub user_id: String,
    pub user_name: String,
}

/// Messages sent to `SessionActor`.
#[derive(Debug)]
pub enum SessionMessage {
    /// A connection wants to join this session.
    Join {
        request: JoinRequest,
        /// Response channel for the join result. An `Err` means the join
        /// was refused (no host present) and the connection should report
        /// it and close.
        respond_to: oneshot::Sender<Result<JoinOutcome, RelayError>>,
    },

    /// A seated or pending connection sent a post-join frame.
    ClientFrame {
        connection_id: String,
        frame: ClientFrame,
    },

    /// The connection's socket closed (client went away).
    Disconnected { connection_id: String },

    /// The whiteboard-end grace period elapsed; force-close whoever is
    /// still connected.
    WhiteboardGraceElapsed,

    /// Current session state snapshot (for status queries and tests).
    GetState {
        respond_to: oneshot::Sender<SessionSnapshot>,
    },
}

/// Point-in-time view of a session's state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub session_id: String,
    pub participant_count: usize,
    pub pending_count: usize,
    pub host_id: Option<String>,
    pub whiteboard_mode: bool,
    pub whiteboard_controller: Option<String>,
    pub whiteboard_log_len: usize,
    pub chat_log_len: usize,
}
