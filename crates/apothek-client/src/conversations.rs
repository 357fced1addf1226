//! Loaded conversation list and backward-pagination bookkeeping.

use std::collections::{HashMap, HashSet};

use tracing::debug;

use apothek_shared::{Conversation, ConversationId, Message, UserId};

/// In-memory cache of the conversation list.
///
/// Conversations are never deleted locally, only refetched; previews and
/// unread counters are patched in place. Also tracks which conversations
/// have a pagination request in flight so concurrent loads are serialized.
#[derive(Debug, Default)]
pub struct ConversationCache {
    conversations: HashMap<ConversationId, Conversation>,
    paging: HashSet<ConversationId>,
}

impl ConversationCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the cached list with a fresh fetch.
    pub fn replace_all(&mut self, conversations: Vec<Conversation>) {
        self.conversations = conversations.into_iter().map(|c| (c.id, c)).collect();
    }

    pub fn get(&self, id: ConversationId) -> Option<&Conversation> {
        self.conversations.get(&id)
    }

    pub fn peer_of(&self, id: ConversationId) -> Option<UserId> {
        self.conversations.get(&id).map(|c| c.peer.id)
    }

    /// The conversation whose counterpart is `peer`.
    pub fn by_peer(&self, peer: UserId) -> Option<&Conversation> {
        self.conversations.values().find(|c| c.peer.id == peer)
    }

    pub fn len(&self) -> usize {
        self.conversations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.conversations.is_empty()
    }

    /// Patch the denormalized preview (and optionally the unread counter)
    /// for a new message. Returns the updated conversation.
    pub fn apply_new_message(
        &mut self,
        message: &Message,
        count_unread: bool,
    ) -> Option<&Conversation> {
        let conversation = self.conversations.get_mut(&message.conversation_id)?;
        conversation.last_message_preview = Some(preview_of(message));
        if count_unread {
            conversation.unread_count = conversation.unread_count.saturating_add(1);
        }
        Some(conversation)
    }

    /// Zero the unread counter. Returns the conversation if it changed.
    pub fn clear_unread(&mut self, id: ConversationId) -> Option<&Conversation> {
        let conversation = self.conversations.get_mut(&id)?;
        if conversation.unread_count == 0 {
            return None;
        }
        conversation.unread_count = 0;
        Some(conversation)
    }

    /// Claim the pagination slot for a conversation. Returns `false` when a
    /// request is already in flight — the caller must treat that as a no-op.
    pub fn begin_page(&mut self, id: ConversationId) -> bool {
        if self.paging.contains(&id) {
            debug!(conversation = %id, "Pagination already in flight");
            return false;
        }
        self.paging.insert(id);
        true
    }

    pub fn finish_page(&mut self, id: ConversationId) {
        self.paging.remove(&id);
    }
}

/// One-line preview for the conversation list.
fn preview_of(message: &Message) -> String {
    if message.deleted {
        return "Message supprimé".to_string();
    }
    if !message.content.is_empty() {
        let mut preview = message.content.clone();
        if preview.chars().count() > 80 {
            preview = preview.chars().take(79).collect::<String>() + "…";
        }
        return preview;
    }
    match message.attachments.len() {
        0 => String::new(),
        1 => format!("📎 {}", message.attachments[0].name),
        n => format!("📎 {n} fichiers"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use apothek_shared::{DeliveryStatus, MessageId, Peer};
    use chrono::Utc;

    fn conversation(id: i64, peer: i64) -> Conversation {
        Conversation {
            id: ConversationId(id),
            peer: Peer {
                id: UserId(peer),
                display_name: format!("user {peer}"),
                avatar_url: None,
            },
            last_message_preview: None,
            unread_count: 0,
        }
    }

    fn message(conversation: i64, content: &str) -> Message {
        Message {
            id: MessageId(1),
            conversation_id: ConversationId(conversation),
            sender_id: UserId(2),
            content: content.to_string(),
            attachments: Vec::new(),
            created_at: Utc::now(),
            status: DeliveryStatus::Sent,
            edited: false,
            deleted: false,
            reactions: Default::default(),
        }
    }

    #[test]
    fn test_new_message_updates_preview_and_unread() {
        let mut cache = ConversationCache::new();
        cache.replace_all(vec![conversation(1, 2)]);

        let updated = cache.apply_new_message(&message(1, "Bonjour"), true).unwrap();
        assert_eq!(updated.last_message_preview.as_deref(), Some("Bonjour"));
        assert_eq!(updated.unread_count, 1);

        cache.apply_new_message(&message(1, "Encore"), true);
        assert_eq!(cache.get(ConversationId(1)).unwrap().unread_count, 2);
    }

    #[test]
    fn test_clear_unread_reports_change_once() {
        let mut cache = ConversationCache::new();
        cache.replace_all(vec![conversation(1, 2)]);
        cache.apply_new_message(&message(1, "Bonjour"), true);

        assert!(cache.clear_unread(ConversationId(1)).is_some());
        assert!(cache.clear_unread(ConversationId(1)).is_none());
    }

    #[test]
    fn test_pagination_guard_serializes() {
        let mut cache = ConversationCache::new();
        cache.replace_all(vec![conversation(1, 2)]);

        assert!(cache.begin_page(ConversationId(1)));
        assert!(!cache.begin_page(ConversationId(1)));
        // A different conversation is unaffected.
        assert!(cache.begin_page(ConversationId(9)));

        cache.finish_page(ConversationId(1));
        assert!(cache.begin_page(ConversationId(1)));
    }

    #[test]
    fn test_attachment_preview() {
        let mut cache = ConversationCache::new();
        cache.replace_all(vec![conversation(1, 2)]);

        let mut m = message(1, "");
        m.attachments.push(apothek_shared::Attachment {
            kind: apothek_shared::AttachmentKind::Document,
            url: "https://files.example/ordonnance.pdf".to_string(),
            name: "ordonnance.pdf".to_string(),
            size: 12_345,
        });

        let updated = cache.apply_new_message(&m, false).unwrap();
        assert_eq!(
            updated.last_message_preview.as_deref(),
            Some("📎 ordonnance.pdf")
        );
    }
}
