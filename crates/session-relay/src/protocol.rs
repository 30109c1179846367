//! Wire protocol for the session relay.
//!
//! Every frame on the wire is a JSON object with a mandatory kebab-case
//! `type` discriminator. Inbound frames deserialize into [`ClientFrame`];
//! anything the enum does not recognize (unknown `type`, malformed JSON)
//! fails deserialization and is dropped by the connection task without an
//! error frame.
//!
//! Outbound frames are built as [`ServerFrame`] values. The WebRTC
//! `offer`/`answer`/`candidate` payloads and the drawing fields of
//! `draw`/`shape` are deliberately opaque: the relay stamps sender identity
//! onto them and forwards them without interpretation.
//!
//! Whiteboard and chat logs store the exact `ServerFrame` values that were
//! broadcast, so replaying a log to a late joiner is verbatim by
//! construction.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Role of a participant within a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// The session's single privileged participant.
    Host,
    /// An ordinary participant.
    Participant,
}

impl Role {
    /// Interpret the client-supplied `userRole` string.
    ///
    /// The browser clients send either `"admin"` or `"host"` for host
    /// intent; everything else (including absence) is a plain participant.
    #[must_use]
    pub fn from_wire(user_role: Option<&str>) -> Self {
        match user_role {
            Some("admin" | "host") => Role::Host,
            _ => Role::Participant,
        }
    }

    /// Whether this role carries host privileges.
    #[must_use]
    pub fn is_host(self) -> bool {
        matches!(self, Role::Host)
    }
}

/// A `{userId, userName}` pair used in rosters and host info.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserRef {
    pub user_id: String,
    pub user_name: String,
}

/// Inbound frames from clients.
///
/// Extra fields the clients attach (e.g. `sessionId` on every frame after
/// join, client-side timestamps) are ignored unless a handler needs them;
/// the opaque `draw`/`shape` payloads keep everything via `flatten`.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum ClientFrame {
    #[serde(rename = "join", rename_all = "camelCase")]
    Join {
        session_id: String,
        #[serde(default)]
        user_id: Option<String>,
        #[serde(default)]
        user_role: Option<String>,
        #[serde(default)]
        user_name: Option<String>,
        #[serde(default)]
        is_whiteboard_mode: bool,
    },

    #[serde(rename = "video-offer")]
    VideoOffer {
        #[serde(default)]
        to: Option<String>,
        #[serde(default)]
        offer: Option<Value>,
    },
    #[serde(rename = "video-answer")]
    VideoAnswer {
        #[serde(default)]
        to: Option<String>,
        #[serde(default)]
        answer: Option<Value>,
    },
    #[serde(rename = "ice-candidate")]
    IceCandidate {
        #[serde(default)]
        to: Option<String>,
        #[serde(default)]
        candidate: Option<Value>,
    },

    #[serde(rename = "draw")]
    Draw {
        #[serde(flatten)]
        data: Map<String, Value>,
    },
    #[serde(rename = "shape")]
    Shape {
        #[serde(flatten)]
        data: Map<String, Value>,
    },
    #[serde(rename = "clear")]
    Clear,

    #[serde(rename = "chat")]
    Chat { message: String },

    #[serde(rename = "mute")]
    Mute {
        #[serde(default)]
        muted: bool,
    },
    #[serde(rename = "video-toggle", rename_all = "camelCase")]
    VideoToggle {
        #[serde(default)]
        video_off: bool,
    },

    #[serde(rename = "admit-user", rename_all = "camelCase")]
    AdmitUser { user_id: String },
    #[serde(rename = "reject-user", rename_all = "camelCase")]
    RejectUser { user_id: String },

    #[serde(rename = "end-meeting")]
    EndMeeting,
    #[serde(rename = "switch-to-whiteboard")]
    SwitchToWhiteboard,
    #[serde(rename = "switch-to-video")]
    SwitchToVideo,
    #[serde(rename = "user-leaving")]
    UserLeaving {
        #[serde(default)]
        reason: Option<String>,
    },
    #[serde(rename = "transfer-whiteboard-control", rename_all = "camelCase")]
    TransferWhiteboardControl {
        #[serde(default)]
        to_user_id: Option<String>,
        #[serde(default)]
        to_user_name: Option<String>,
        #[serde(default)]
        to_participant_index: Option<usize>,
    },
    #[serde(rename = "take-whiteboard-control")]
    TakeWhiteboardControl,
    #[serde(rename = "end-whiteboard-meeting")]
    EndWhiteboardMeeting,
}

impl ClientFrame {
    /// Frame type name for log lines.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            ClientFrame::Join { .. } => "join",
            ClientFrame::VideoOffer { .. } => "video-offer",
            ClientFrame::VideoAnswer { .. } => "video-answer",
            ClientFrame::IceCandidate { .. } => "ice-candidate",
            ClientFrame::Draw { .. } => "draw",
            ClientFrame::Shape { .. } => "shape",
            ClientFrame::Clear => "clear",
            ClientFrame::Chat { .. } => "chat",
            ClientFrame::Mute { .. } => "mute",
            ClientFrame::VideoToggle { .. } => "video-toggle",
            ClientFrame::AdmitUser { .. } => "admit-user",
            ClientFrame::RejectUser { .. } => "reject-user",
            ClientFrame::EndMeeting => "end-meeting",
            ClientFrame::SwitchToWhiteboard => "switch-to-whiteboard",
            ClientFrame::SwitchToVideo => "switch-to-video",
            ClientFrame::UserLeaving { .. } => "user-leaving",
            ClientFrame::TransferWhiteboardControl { .. } => "transfer-whiteboard-control",
            ClientFrame::TakeWhiteboardControl => "take-whiteboard-control",
            ClientFrame::EndWhiteboardMeeting => "end-whiteboard-meeting",
        }
    }
}

/// Outbound frames to clients.
///
/// Field names are the wire contract; browser clients consume them as-is.
/// `SessionState` embeds stored log frames, which are always
/// `Draw`/`Shape` (whiteboard log) or `Chat` (chat log) by construction.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type")]
pub enum ServerFrame {
    #[serde(rename = "session-state", rename_all = "camelCase")]
    SessionState {
        whiteboard: Vec<ServerFrame>,
        messages: Vec<ServerFrame>,
        participant_count: usize,
        your_user_id: String,
        your_user_name: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        is_host: Option<bool>,
    },

    #[serde(rename = "user-joined", rename_all = "camelCase")]
    UserJoined {
        user_id: String,
        user_name: String,
        participant_count: usize,
    },
    #[serde(rename = "user-left", rename_all = "camelCase")]
    UserLeft {
        user_id: String,
        user_name: String,
        participant_count: usize,
        #[serde(skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        is_transition: Option<bool>,
    },

    #[serde(rename = "admission-request", rename_all = "camelCase")]
    AdmissionRequest {
        user_id: String,
        user_name: String,
        session_id: String,
    },
    #[serde(rename = "waiting-for-admission")]
    WaitingForAdmission { message: String },
    #[serde(rename = "admitted-to-meeting", rename_all = "camelCase")]
    AdmittedToMeeting {
        session_id: String,
        your_user_id: String,
        existing_users: Vec<UserRef>,
        host_info: UserRef,
    },
    #[serde(rename = "rejected-from-meeting")]
    RejectedFromMeeting { message: String },

    #[serde(rename = "meeting-ended")]
    MeetingEnded { message: String },
    #[serde(rename = "whiteboard-meeting-ended", rename_all = "camelCase")]
    WhiteboardMeetingEnded { message: String, host_name: String },

    #[serde(rename = "draw", rename_all = "camelCase")]
    Draw {
        #[serde(flatten)]
        data: Map<String, Value>,
        user_id: String,
        user_name: String,
    },
    #[serde(rename = "shape", rename_all = "camelCase")]
    Shape {
        #[serde(flatten)]
        data: Map<String, Value>,
        user_id: String,
        user_name: String,
    },
    #[serde(rename = "clear", rename_all = "camelCase")]
    Clear { user_id: String, user_name: String },

    #[serde(rename = "chat", rename_all = "camelCase")]
    Chat {
        user_id: String,
        user_name: String,
        message: String,
        /// Epoch milliseconds, matching `Date.now()` on the clients.
        timestamp: i64,
    },

    #[serde(rename = "video-offer")]
    VideoOffer {
        from: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        offer: Option<Value>,
    },
    #[serde(rename = "video-answer")]
    VideoAnswer {
        from: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        answer: Option<Value>,
    },
    #[serde(rename = "ice-candidate")]
    IceCandidate {
        from: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        candidate: Option<Value>,
    },

    #[serde(rename = "mute")]
    Mute { from: String, muted: bool },
    #[serde(rename = "video-toggle", rename_all = "camelCase")]
    VideoToggle { from: String, video_off: bool },

    #[serde(rename = "switch-to-whiteboard", rename_all = "camelCase")]
    SwitchToWhiteboard {
        session_id: String,
        host_name: String,
    },
    #[serde(rename = "switch-to-video", rename_all = "camelCase")]
    SwitchToVideo {
        session_id: String,
        user_name: String,
        is_transition: bool,
    },
    #[serde(rename = "transfer-whiteboard-control", rename_all = "camelCase")]
    TransferWhiteboardControl {
        to_user_id: String,
        to_user_name: String,
        from_user: String,
    },
    #[serde(rename = "take-whiteboard-control", rename_all = "camelCase")]
    TakeWhiteboardControl { from_user: String },

    #[serde(rename = "error")]
    Error { message: String },
}

impl ServerFrame {
    /// Frame type name for log lines.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            ServerFrame::SessionState { .. } => "session-state",
            ServerFrame::UserJoined { .. } => "user-joined",
            ServerFrame::UserLeft { .. } => "user-left",
            ServerFrame::AdmissionRequest { .. } => "admission-request",
            ServerFrame::WaitingForAdmission { .. } => "waiting-for-admission",
            ServerFrame::AdmittedToMeeting { .. } => "admitted-to-meeting",
            ServerFrame::RejectedFromMeeting { .. } => "rejected-from-meeting",
            ServerFrame::MeetingEnded { .. } => "meeting-ended",
            ServerFrame::WhiteboardMeetingEnded { .. } => "whiteboard-meeting-ended",
            ServerFrame::Draw { .. } => "draw",
            ServerFrame::Shape { .. } => "shape",
            ServerFrame::Clear { .. } => "clear",
            ServerFrame::Chat { .. } => "chat",
            ServerFrame::VideoOffer { .. } => "video-offer",
            ServerFrame::VideoAnswer { .. } => "video-answer",
            ServerFrame::IceCandidate { .. } => "ice-candidate",
            ServerFrame::Mute { .. } => "mute",
            ServerFrame::VideoToggle { .. } => "video-toggle",
            ServerFrame::SwitchToWhiteboard { .. } => "switch-to-whiteboard",
            ServerFrame::SwitchToVideo { .. } => "switch-to-video",
            ServerFrame::TransferWhiteboardControl { .. } => "transfer-whiteboard-control",
            ServerFrame::TakeWhiteboardControl { .. } => "take-whiteboard-control",
            ServerFrame::Error { .. } => "error",
        }
    }
}

/// Strip keys the relay stamps itself from an opaque client payload, so a
/// crafted frame cannot smuggle a forged identity past the stamp.
pub fn sanitize_opaque(data: &mut Map<String, Value>) {
    data.remove("type");
    data.remove("userId");
    data.remove("userName");
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn join_frame_deserializes_with_defaults() {
        let frame: ClientFrame = serde_json::from_str(
            r#"{"type":"join","sessionId":"abc123","userRole":"admin","userName":"Alice"}"#,
        )
        .unwrap();

        match frame {
            ClientFrame::Join {
                session_id,
                user_id,
                user_role,
                user_name,
                is_whiteboard_mode,
            } => {
                assert_eq!(session_id, "abc123");
                assert_eq!(user_id, None);
                assert_eq!(user_role.as_deref(), Some("admin"));
                assert_eq!(user_name.as_deref(), Some("Alice"));
                assert!(!is_whiteboard_mode);
            }
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    #[test]
    fn unknown_type_is_rejected() {
        let result: Result<ClientFrame, _> =
            serde_json::from_str(r#"{"type":"spin-up-lasers","sessionId":"abc"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn malformed_json_is_rejected() {
        let result: Result<ClientFrame, _> = serde_json::from_str("not json at all");
        assert!(result.is_err());
    }

    #[test]
    fn draw_frame_keeps_opaque_fields() {
        let frame: ClientFrame = serde_json::from_value(json!({
            "type": "draw",
            "sessionId": "abc123",
            "fromX": 1.0, "fromY": 2.0, "toX": 3.0, "toY": 4.0,
            "tool": "pen", "timestamp": 1234,
        }))
        .unwrap();

        match frame {
            ClientFrame::Draw { data } => {
                assert_eq!(data.get("fromX"), Some(&json!(1.0)));
                assert_eq!(data.get("tool"), Some(&json!("pen")));
                // The tag itself is consumed by the enum.
                assert!(!data.contains_key("type"));
            }
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    #[test]
    fn unit_variants_ignore_extra_fields() {
        let frame: ClientFrame =
            serde_json::from_str(r#"{"type":"end-meeting","sessionId":"abc123"}"#).unwrap();
        assert!(matches!(frame, ClientFrame::EndMeeting));

        let frame: ClientFrame = serde_json::from_value(json!({
            "type": "user-leaving",
            "sessionId": "abc123",
            "userName": "Alice",
            "reason": "left_meeting",
        }))
        .unwrap();
        match frame {
            ClientFrame::UserLeaving { reason } => {
                assert_eq!(reason.as_deref(), Some("left_meeting"));
            }
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    #[test]
    fn role_from_wire() {
        assert_eq!(Role::from_wire(Some("admin")), Role::Host);
        assert_eq!(Role::from_wire(Some("host")), Role::Host);
        assert_eq!(Role::from_wire(Some("participant")), Role::Participant);
        assert_eq!(Role::from_wire(None), Role::Participant);
        assert!(Role::Host.is_host());
        assert!(!Role::Participant.is_host());
    }

    #[test]
    fn server_frames_serialize_with_wire_names() {
        let frame = ServerFrame::UserJoined {
            user_id: "u1".to_string(),
            user_name: "Alice".to_string(),
            participant_count: 2,
        };
        assert_eq!(
            serde_json::to_value(&frame).unwrap(),
            json!({
                "type": "user-joined",
                "userId": "u1",
                "userName": "Alice",
                "participantCount": 2,
            })
        );
    }

    #[test]
    fn session_state_omits_is_host_for_participants() {
        let frame = ServerFrame::SessionState {
            whiteboard: vec![],
            messages: vec![],
            participant_count: 1,
            your_user_id: "u1".to_string(),
            your_user_name: "Alice".to_string(),
            is_host: None,
        };
        let value = serde_json::to_value(&frame).unwrap();
        assert!(value.get("isHost").is_none());
        assert_eq!(value.get("yourUserId"), Some(&json!("u1")));
    }

    #[test]
    fn stamped_draw_serializes_flat() {
        let mut data = Map::new();
        data.insert("fromX".to_string(), json!(1));
        data.insert("toX".to_string(), json!(2));
        let frame = ServerFrame::Draw {
            data,
            user_id: "u1".to_string(),
            user_name: "Alice".to_string(),
        };
        assert_eq!(
            serde_json::to_value(&frame).unwrap(),
            json!({
                "type": "draw",
                "fromX": 1,
                "toX": 2,
                "userId": "u1",
                "userName": "Alice",
            })
        );
    }

    #[test]
    fn relay_frames_omit_absent_payloads() {
        let frame = ServerFrame::IceCandidate {
            from: "u1".to_string(),
            candidate: None,
        };
        assert_eq!(
            serde_json::to_value(&frame).unwrap(),
            json!({"type": "ice-candidate", "from": "u1"})
        );
    }

    #[test]
    fn sanitize_opaque_strips_stamped_keys() {
        let mut data = Map::new();
        data.insert("userId".to_string(), json!("forged"));
        data.insert("userName".to_string(), json!("Mallory"));
        data.insert("fromX".to_string(), json!(7));
        sanitize_opaque(&mut data);
        assert!(!data.contains_key("userId"));
        assert!(!data.contains_key("userName"));
        assert_eq!(data.get("fromX"), Some(&json!(7)));
    }
}
