//! Wire protocol for the realtime channel.
//!
//! Frames are JSON envelopes of the form `{"event": <name>, "data": <payload>}`.
//! Event names (including the kebab-case call events) match the client
//! contract. SDP offers/answers and ICE candidates are carried as opaque
//! JSON values - the controller relays them without interpretation.

use crate::messages::ChatMessage;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Inbound events from a client connection.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ClientEvent {
    /// Bind a username to this connection and mark it online.
    #[serde(rename = "register_user")]
    RegisterUser(String),

    /// Persist a chat message and fan it out.
    #[serde(rename = "private_message")]
    PrivateMessage(PrivateMessagePayload),

    /// Ephemeral typing indicator. Never persisted.
    #[serde(rename = "typing")]
    Typing { to: String },

    /// The recipient opened a conversation; reset its unread counter.
    #[serde(rename = "clear_unread")]
    ClearUnread { me: String, other: String },

    /// Start a call: relay the WebRTC offer to the callee.
    #[serde(rename = "call-user")]
    CallUser { to: String, offer: Value },

    /// Relay the WebRTC answer back to the caller.
    #[serde(rename = "answer-call")]
    AnswerCall { to: String, answer: Value },

    /// Relay an ICE candidate. Pure relay, no state change.
    #[serde(rename = "ice-candidate")]
    IceCandidate { to: String, candidate: Value },

    /// Callee declined the ringing call.
    #[serde(rename = "reject-call")]
    RejectCall { to: String },

    /// Either party hung up an established call.
    #[serde(rename = "end-call")]
    EndCall { to: String },

    /// Client-side ring timeout elapsed without an answer.
    #[serde(rename = "missed-call")]
    MissedCall { to: String },

    /// In-call chat overlay message. Relay only, never persisted.
    #[serde(rename = "call_message")]
    CallMessage(CallMessagePayload),
}

/// Payload of an inbound `private_message`.
#[derive(Debug, Clone, Deserialize)]
pub struct PrivateMessagePayload {
    pub from: String,
    pub to: String,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub file: Option<String>,
    #[serde(default, rename = "fileName")]
    pub file_name: Option<String>,
}

/// Payload of an inbound `call_message`.
#[derive(Debug, Clone, Deserialize)]
pub struct CallMessagePayload {
    pub to: String,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub file: Option<String>,
    #[serde(default, rename = "fileName")]
    pub file_name: Option<String>,
}

/// Outbound events to client connections.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", content = "data")]
pub enum ServerEvent {
    /// All known usernames (sidebar listing). Broadcast.
    #[serde(rename = "users_list")]
    UsersList(Vec<String>),

    /// Online map (username -> connection id). Broadcast.
    #[serde(rename = "users_status")]
    UsersStatus(HashMap<String, String>),

    /// A chat or system message, delivered to both parties.
    #[serde(rename = "receive_message")]
    ReceiveMessage(ChatMessage),

    /// Peer is typing.
    #[serde(rename = "typing")]
    Typing { from: String },

    /// Unread counter changed for a conversation.
    #[serde(rename = "unread_update")]
    UnreadUpdate { from: String, count: i64 },

    /// An offer arrived; the callee's client starts ringing.
    #[serde(rename = "incoming-call")]
    IncomingCall { from: String, offer: Value },

    /// The callee answered; carries the WebRTC answer.
    #[serde(rename = "call-accepted")]
    CallAccepted { answer: Value },

    /// Relayed ICE candidate.
    #[serde(rename = "ice-candidate")]
    IceCandidate { candidate: Value },

    /// The call was torn down (reject, hang-up or peer disconnect).
    #[serde(rename = "call-ended")]
    CallEnded,

    /// Caller or callee is already in a call. Sent to the caller only.
    #[serde(rename = "user-busy")]
    UserBusy,

    /// Relayed in-call chat overlay message.
    #[serde(rename = "call_message")]
    CallMessage(CallMessageOut),
}

/// Outbound `call_message` payload.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CallMessageOut {
    pub from: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    #[serde(rename = "fileName", skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    pub time: i64,
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_register_user() {
        let frame = r#"{"event":"register_user","data":"alice"}"#;
        let event: ClientEvent = serde_json::from_str(frame).unwrap();
        assert!(matches!(event, ClientEvent::RegisterUser(u) if u == "alice"));
    }

    #[test]
    fn test_parse_private_message_with_file() {
        let frame = r#"{
            "event": "private_message",
            "data": {"from":"alice","to":"bob","message":"look","file":"https://h/u/1.png","fileName":"1.png"}
        }"#;
        let event: ClientEvent = serde_json::from_str(frame).unwrap();

        let ClientEvent::PrivateMessage(payload) = event else {
            unreachable!("expected private_message");
        };
        assert_eq!(payload.from, "alice");
        assert_eq!(payload.file_name.as_deref(), Some("1.png"));
    }

    #[test]
    fn test_parse_call_user_keeps_offer_opaque() {
        let frame = r#"{
            "event": "call-user",
            "data": {"to":"bob","offer":{"type":"offer","sdp":"v=0..."}}
        }"#;
        let event: ClientEvent = serde_json::from_str(frame).unwrap();

        let ClientEvent::CallUser { to, offer } = event else {
            unreachable!("expected call-user");
        };
        assert_eq!(to, "bob");
        assert_eq!(offer.get("type").and_then(Value::as_str), Some("offer"));
    }

    #[test]
    fn test_parse_unknown_event_fails() {
        let frame = r#"{"event":"join_group","data":{}}"#;
        assert!(serde_json::from_str::<ClientEvent>(frame).is_err());
    }

    #[test]
    fn test_serialize_unit_events() {
        let json = serde_json::to_value(&ServerEvent::CallEnded).unwrap();
        assert_eq!(json, json!({"event": "call-ended"}));

        let json = serde_json::to_value(&ServerEvent::UserBusy).unwrap();
        assert_eq!(json, json!({"event": "user-busy"}));
    }

    #[test]
    fn test_serialize_unread_update() {
        let json = serde_json::to_value(&ServerEvent::UnreadUpdate {
            from: "alice".to_string(),
            count: 3,
        })
        .unwrap();
        assert_eq!(
            json,
            json!({"event": "unread_update", "data": {"from": "alice", "count": 3}})
        );
    }

    #[test]
    fn test_serialize_incoming_call() {
        let json = serde_json::to_value(&ServerEvent::IncomingCall {
            from: "alice".to_string(),
            offer: json!({"sdp": "v=0..."}),
        })
        .unwrap();
        assert_eq!(
            json,
            json!({"event": "incoming-call", "data": {"from": "alice", "offer": {"sdp": "v=0..."}}})
        );
    }

    #[test]
    fn test_serialize_call_message_omits_absent_fields() {
        let json = serde_json::to_string(&ServerEvent::CallMessage(CallMessageOut {
            from: "alice".to_string(),
            message: Some("hi".to_string()),
            file: None,
            file_name: None,
            time: 1_700_000_000_000,
        }))
        .unwrap();

        assert!(json.contains("\"event\":\"call_message\""));
        assert!(!json.contains("file"));
    }
}
