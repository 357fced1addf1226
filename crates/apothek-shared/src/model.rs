//! Domain model structs handed between the engine and the UI layer.
//!
//! Every struct derives `Serialize` and `Deserialize` so it can travel
//! unchanged through the API client and over IPC to the view layer.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{ConversationId, MessageId, UserId};

// ---------------------------------------------------------------------------
// Delivery status
// ---------------------------------------------------------------------------

/// Delivery lifecycle of a message, from the sender's perspective.
///
/// Transitions are strictly one-directional: `Sent → Delivered → Read`.
/// A message never regresses, and `Read` implies `Delivered`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    Sent,
    Delivered,
    Read,
}

impl DeliveryStatus {
    /// Whether moving to `next` is a strictly forward transition.
    pub fn can_advance_to(self, next: DeliveryStatus) -> bool {
        next > self
    }
}

// ---------------------------------------------------------------------------
// Attachment
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AttachmentKind {
    Image,
    Video,
    Audio,
    Document,
}

/// A file reference attached to a message. Immutable once attached.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Attachment {
    pub kind: AttachmentKind,
    /// Remote URL issued by the API server after upload.
    pub url: String,
    /// Original file name, for display.
    pub name: String,
    /// File size in bytes.
    pub size: u64,
}

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

/// A single chat message as confirmed by the API server.
///
/// The id and timestamp are server-assigned; the engine never fabricates
/// either. Edits and deletions flip flags in place rather than rewriting
/// history, so the log keeps one record per id for its whole lifetime.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    pub id: MessageId,
    pub conversation_id: ConversationId,
    pub sender_id: UserId,
    /// Text body. May be empty when the message only carries attachments.
    pub content: String,
    /// Ordered attachment references.
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    /// Server-assigned creation time; the rendering order within a
    /// conversation follows this, never local receipt time.
    pub created_at: DateTime<Utc>,
    pub status: DeliveryStatus,
    #[serde(default)]
    pub edited: bool,
    #[serde(default)]
    pub deleted: bool,
    /// Reaction multiset: emoji → users who reacted with it.
    #[serde(default)]
    pub reactions: BTreeMap<String, BTreeSet<UserId>>,
}

impl Message {
    /// Apply a status event, honouring the monotonic order. Returns whether
    /// the status actually changed; regressive or repeated events are no-ops.
    pub fn apply_status(&mut self, next: DeliveryStatus) -> bool {
        if self.status.can_advance_to(next) {
            self.status = next;
            true
        } else {
            false
        }
    }

    /// Replace the text body in place and mark the message as edited.
    pub fn apply_edit(&mut self, content: String) {
        self.content = content;
        self.edited = true;
    }

    /// Tombstone the message. Content is cleared so the UI renders a stub.
    pub fn apply_delete(&mut self) {
        self.deleted = true;
        self.content.clear();
        self.attachments.clear();
    }

    pub fn add_reaction(&mut self, emoji: &str, user: UserId) {
        self.reactions.entry(emoji.to_string()).or_default().insert(user);
    }

    pub fn remove_reaction(&mut self, emoji: &str, user: UserId) {
        if let Some(users) = self.reactions.get_mut(emoji) {
            users.remove(&user);
            if users.is_empty() {
                self.reactions.remove(emoji);
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Conversation
// ---------------------------------------------------------------------------

/// The counterpart user of a 1:1 conversation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Peer {
    pub id: UserId,
    pub display_name: String,
    #[serde(default)]
    pub avatar_url: Option<String>,
}

/// A 1:1 conversation as listed by the API server.
///
/// Never deleted locally, only refetched; the preview and unread counter are
/// denormalized and patched in place on new-message and read events.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Conversation {
    pub id: ConversationId,
    pub peer: Peer,
    #[serde(default)]
    pub last_message_preview: Option<String>,
    #[serde(default)]
    pub unread_count: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn message(status: DeliveryStatus) -> Message {
        Message {
            id: MessageId(1),
            conversation_id: ConversationId(7),
            sender_id: UserId(3),
            content: "Bonjour".to_string(),
            attachments: Vec::new(),
            created_at: Utc::now(),
            status,
            edited: false,
            deleted: false,
            reactions: BTreeMap::new(),
        }
    }

    #[test]
    fn test_status_advances_forward_only() {
        let mut m = message(DeliveryStatus::Sent);
        assert!(m.apply_status(DeliveryStatus::Delivered));
        assert!(m.apply_status(DeliveryStatus::Read));
        // Regression and repeats are no-ops.
        assert!(!m.apply_status(DeliveryStatus::Delivered));
        assert!(!m.apply_status(DeliveryStatus::Read));
        assert_eq!(m.status, DeliveryStatus::Read);
    }

    #[test]
    fn test_status_can_skip_delivered() {
        // A read receipt can arrive before the delivered tick.
        let mut m = message(DeliveryStatus::Sent);
        assert!(m.apply_status(DeliveryStatus::Read));
        assert_eq!(m.status, DeliveryStatus::Read);
    }

    #[test]
    fn test_reactions_multiset() {
        let mut m = message(DeliveryStatus::Sent);
        m.add_reaction("👍", UserId(1));
        m.add_reaction("👍", UserId(2));
        m.add_reaction("👍", UserId(2));
        assert_eq!(m.reactions["👍"].len(), 2);

        m.remove_reaction("👍", UserId(1));
        assert_eq!(m.reactions["👍"].len(), 1);
        m.remove_reaction("👍", UserId(2));
        assert!(m.reactions.is_empty());
    }

    #[test]
    fn test_delete_clears_content() {
        let mut m = message(DeliveryStatus::Delivered);
        m.apply_delete();
        assert!(m.deleted);
        assert!(m.content.is_empty());
    }
}
