use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;
use crate::model::Message;
use crate::types::{CallId, CallKind, ConversationId, MessageId, UserId};

/// All events exchanged with the signaling hub, in both directions.
///
/// The hub relays structured JSON of the form `{"event": ..., "data": ...}`
/// between connected clients; it neither inspects nor acknowledges payloads.
/// Delivery is best-effort and at-most-once — reliability for messages comes
/// from the API server, not from this channel.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum SignalEvent {
    /// Announce the local identity so the hub can route events to us.
    /// Sent once after every successful (re)connect.
    UserConnected { user_id: UserId },

    /// Join the room of a 1:1 conversation to receive its live events.
    JoinConversation { user_id: UserId, other_user_id: UserId },

    /// A freshly persisted message, fanned out to the peer.
    NewMessage { message: Message },

    /// Receiver-side acknowledgment that a message arrived at the client.
    MessageReceived { message_id: MessageId, sender_id: UserId },

    /// Sender-side tick: the message reached the peer's device.
    MessageDelivered { message_id: MessageId },

    /// Sender-side tick: the peer has seen the message.
    MessageRead { message_id: MessageId },

    TypingStatus {
        conversation_id: ConversationId,
        user_id: UserId,
        is_typing: bool,
    },

    MessageEdited { message_id: MessageId, content: String },

    MessageDeleted { message_id: MessageId },

    MessageReaction {
        message_id: MessageId,
        user_id: UserId,
        emoji: String,
        action: ReactionAction,
    },

    IncomingCall {
        call_id: CallId,
        call_type: CallKind,
        caller_id: UserId,
        caller_name: String,
    },

    CallAccepted { call_id: CallId },

    CallRejected { call_id: CallId, reason: RejectReason },

    CallEnded { call_id: CallId },

    /// SDP offer from the call initiator.
    WebrtcOffer {
        offer: String,
        call_id: CallId,
        receiver_id: UserId,
    },

    /// SDP answer from the callee.
    WebrtcAnswer {
        answer: String,
        call_id: CallId,
        receiver_id: UserId,
    },

    /// A trickled ICE candidate, forwarded as discovered.
    WebrtcIceCandidate {
        candidate: String,
        call_id: CallId,
        receiver_id: UserId,
    },
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ReactionAction {
    Add,
    Remove,
}

/// Why a call was rejected before being accepted.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    /// The callee declined the ring.
    Declined,
    /// The callee was already in a call; sent automatically so the caller's
    /// client stops ringing instead of waiting indefinitely.
    Busy,
}

impl SignalEvent {
    /// Serialize to the hub's JSON frame.
    pub fn to_json(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Deserialize from a hub JSON frame.
    pub fn from_json(raw: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(raw)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_roundtrip() {
        let event = SignalEvent::TypingStatus {
            conversation_id: ConversationId(12),
            user_id: UserId(4),
            is_typing: true,
        };

        let json = event.to_json().unwrap();
        let restored = SignalEvent::from_json(&json).unwrap();
        assert_eq!(event, restored);
    }

    #[test]
    fn test_event_tag_is_snake_case() {
        let event = SignalEvent::WebrtcIceCandidate {
            candidate: "candidate:0 1 UDP 2122252543 192.0.2.1 52000 typ host".to_string(),
            call_id: CallId(9),
            receiver_id: UserId(2),
        };

        let value: serde_json::Value = serde_json::from_str(&event.to_json().unwrap()).unwrap();
        assert_eq!(value["event"], "webrtc_ice_candidate");
        assert_eq!(value["data"]["call_id"], 9);
    }

    #[test]
    fn test_unknown_event_is_an_error() {
        let raw = r#"{"event":"server_maintenance","data":{}}"#;
        assert!(SignalEvent::from_json(raw).is_err());
    }

    #[test]
    fn test_busy_reason_wire_format() {
        let event = SignalEvent::CallRejected {
            call_id: CallId(3),
            reason: RejectReason::Busy,
        };
        let value: serde_json::Value = serde_json::from_str(&event.to_json().unwrap()).unwrap();
        assert_eq!(value["data"]["reason"], "busy");
    }
}
