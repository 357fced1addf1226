//! UI-facing change notifications emitted by the engine.
//!
//! Every payload derives `Serialize` so it can be handed to the view layer
//! over IPC unchanged.

use serde::Serialize;

use apothek_shared::{
    CallId, CallKind, Conversation, ConversationId, DeliveryStatus, Message, MessageId, UserId,
};

/// Snapshot of the call session, for rendering call UI.
#[derive(Debug, Clone, Serialize)]
pub struct CallStatePayload {
    /// `idle`, `outgoing`, `incoming` or `active`.
    pub state: String,
    pub call_id: Option<CallId>,
    pub kind: Option<CallKind>,
    pub peer: Option<UserId>,
    pub peer_name: Option<String>,
    pub muted: bool,
    pub screen_sharing: bool,
}

#[derive(Debug, Clone, Serialize)]
pub enum UiEvent {
    /// Signaling channel availability changed.
    SignalingOnline { online: bool },

    /// The conversation list was (re)loaded from the API.
    ConversationsLoaded { conversations: Vec<Conversation> },

    /// A single conversation's preview or unread counter changed.
    ConversationUpdated { conversation: Conversation },

    /// A message entered the open conversation's log.
    MessageAppended {
        conversation_id: ConversationId,
        message: Message,
    },

    /// An existing message changed in place (edit, delete, reaction).
    MessageUpdated {
        conversation_id: ConversationId,
        message: Message,
    },

    /// A delivery tick advanced.
    MessageStatusChanged {
        message_id: MessageId,
        status: DeliveryStatus,
    },

    /// A page of older messages was prepended. `anchor` is the previously
    /// oldest message; the view keeps its viewport offset relative to it.
    PageLoaded {
        conversation_id: ConversationId,
        inserted: usize,
        anchor: Option<MessageId>,
    },

    TypingChanged {
        conversation_id: ConversationId,
        user_id: UserId,
        is_typing: bool,
    },

    CallStateChanged { call: CallStatePayload },

    /// The call left the session, with a human-readable reason
    /// (`hung_up`, `rejected`, `busy`, `cancelled`, `failed`, `peer_ended`).
    CallEnded { call_id: CallId, reason: String },

    /// The global unread indicator, as recomputed by the API server.
    UnreadBadge { count: u32 },

    /// A user-initiated action failed; the input is left intact for retry.
    ActionFailed { action: String, error: String },
}
