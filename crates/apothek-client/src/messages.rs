//! Per-conversation ordered message log.
//!
//! The log renders in server-assigned creation order; message ids increase
//! with creation time, so ordering by id is ordering by creation. Inbound
//! events patch entries in place — the log never reloads wholesale, and an
//! entry keeps its identity for its whole lifetime.

use tracing::debug;

use apothek_shared::{DeliveryStatus, Message, MessageId, ReactionAction, UserId};

/// Outcome of prepending a page of older messages.
///
/// `anchor` is the message that was at the top before the prepend; because
/// existing entries are never reordered or rewritten, a viewport pinned to
/// the anchor keeps its pixel offset — the view only shifts its scroll
/// position by the height of the `inserted` new rows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrependOutcome {
    pub inserted: usize,
    pub anchor: Option<MessageId>,
}

#[derive(Debug, Default)]
pub struct MessageLog {
    entries: Vec<Message>,
}

impl MessageLog {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn messages(&self) -> &[Message] {
        &self.entries
    }

    pub fn get(&self, id: MessageId) -> Option<&Message> {
        self.entries.iter().find(|m| m.id == id)
    }

    pub fn contains(&self, id: MessageId) -> bool {
        self.entries.iter().any(|m| m.id == id)
    }

    /// Oldest message id, the cursor for backward pagination.
    pub fn oldest_id(&self) -> Option<MessageId> {
        self.entries.first().map(|m| m.id)
    }

    /// Append a newly arrived or newly sent message. Duplicates (the same
    /// server id seen twice) are ignored. Returns whether it was added.
    pub fn append(&mut self, message: Message) -> bool {
        if self.contains(message.id) {
            debug!(message = %message.id, "Ignoring duplicate message");
            return false;
        }
        // Arrival order normally matches id order; a straggler is placed
        // by id so the rendered order stays the server's creation order.
        let position = self
            .entries
            .iter()
            .rposition(|m| m.id < message.id)
            .map(|i| i + 1)
            .unwrap_or(0);
        self.entries.insert(position, message);
        true
    }

    /// Prepend a page of strictly-older messages (oldest first, as returned
    /// by the API). Existing entries are untouched, which is what keeps the
    /// caller's scroll anchor valid.
    pub fn prepend_page(&mut self, mut older: Vec<Message>) -> PrependOutcome {
        let anchor = self.oldest_id();

        older.retain(|m| !self.contains(m.id));
        older.sort_by_key(|m| m.id);
        let inserted = older.len();

        older.extend(std::mem::take(&mut self.entries));
        self.entries = older;

        PrependOutcome { inserted, anchor }
    }

    /// Advance a message's delivery status. Regressive or repeated events
    /// are no-ops. Returns whether anything changed.
    pub fn apply_status(&mut self, id: MessageId, status: DeliveryStatus) -> bool {
        match self.entries.iter_mut().find(|m| m.id == id) {
            Some(message) => message.apply_status(status),
            None => false,
        }
    }

    /// Mark every message *not* sent by `local_user` as read. Returns the
    /// ids that actually transitioned; a second call returns nothing.
    pub fn mark_inbound_read(&mut self, local_user: UserId) -> Vec<MessageId> {
        self.entries
            .iter_mut()
            .filter(|m| m.sender_id != local_user)
            .filter_map(|m| m.apply_status(DeliveryStatus::Read).then_some(m.id))
            .collect()
    }

    pub fn apply_edit(&mut self, id: MessageId, content: String) -> Option<&Message> {
        let message = self.entries.iter_mut().find(|m| m.id == id)?;
        message.apply_edit(content);
        Some(message)
    }

    pub fn apply_delete(&mut self, id: MessageId) -> Option<&Message> {
        let message = self.entries.iter_mut().find(|m| m.id == id)?;
        message.apply_delete();
        Some(message)
    }

    pub fn apply_reaction(
        &mut self,
        id: MessageId,
        user: UserId,
        emoji: &str,
        action: ReactionAction,
    ) -> Option<&Message> {
        let message = self.entries.iter_mut().find(|m| m.id == id)?;
        match action {
            ReactionAction::Add => message.add_reaction(emoji, user),
            ReactionAction::Remove => message.remove_reaction(emoji, user),
        }
        Some(message)
    }

    /// Index of a message, for scroll-anchor assertions.
    pub fn index_of(&self, id: MessageId) -> Option<usize> {
        self.entries.iter().position(|m| m.id == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    fn msg(id: i64, sender: i64) -> Message {
        Message {
            id: MessageId(id),
            conversation_id: apothek_shared::ConversationId(1),
            sender_id: UserId(sender),
            content: format!("message {id}"),
            attachments: Vec::new(),
            created_at: Utc::now() + Duration::seconds(id),
            status: DeliveryStatus::Sent,
            edited: false,
            deleted: false,
            reactions: Default::default(),
        }
    }

    #[test]
    fn test_append_keeps_creation_order() {
        let mut log = MessageLog::new();
        log.append(msg(10, 1));
        log.append(msg(12, 2));
        // A straggler delivered late still lands in creation order.
        log.append(msg(11, 1));

        let ids: Vec<i64> = log.messages().iter().map(|m| m.id.0).collect();
        assert_eq!(ids, vec![10, 11, 12]);
    }

    #[test]
    fn test_append_dedupes_by_id() {
        let mut log = MessageLog::new();
        assert!(log.append(msg(1, 1)));
        assert!(!log.append(msg(1, 1)));
        assert_eq!(log.len(), 1);
    }

    #[test]
    fn test_status_event_is_monotonic() {
        let mut log = MessageLog::new();
        log.append(msg(1, 1));

        assert!(log.apply_status(MessageId(1), DeliveryStatus::Read));
        // Late delivered tick after the read receipt must not regress.
        assert!(!log.apply_status(MessageId(1), DeliveryStatus::Delivered));
        assert_eq!(log.get(MessageId(1)).unwrap().status, DeliveryStatus::Read);
    }

    #[test]
    fn test_status_event_for_unknown_message_is_noop() {
        let mut log = MessageLog::new();
        assert!(!log.apply_status(MessageId(99), DeliveryStatus::Delivered));
    }

    #[test]
    fn test_mark_inbound_read_is_idempotent() {
        let local = UserId(1);
        let mut log = MessageLog::new();
        log.append(msg(1, 2));
        log.append(msg(2, 2));
        log.append(msg(3, 1)); // our own, untouched

        let first = log.mark_inbound_read(local);
        assert_eq!(first, vec![MessageId(1), MessageId(2)]);

        let second = log.mark_inbound_read(local);
        assert!(second.is_empty());
        assert_eq!(log.get(MessageId(3)).unwrap().status, DeliveryStatus::Sent);
    }

    #[test]
    fn test_prepend_preserves_anchor() {
        let mut log = MessageLog::new();
        log.append(msg(50, 1));
        log.append(msg(51, 2));

        let anchor_before = log.oldest_id().unwrap();
        let outcome = log.prepend_page(vec![msg(47, 2), msg(48, 1), msg(49, 2)]);

        assert_eq!(outcome.inserted, 3);
        assert_eq!(outcome.anchor, Some(anchor_before));
        // The anchor message is untouched and sits exactly `inserted` rows
        // lower; a viewport pinned to it keeps its offset.
        assert_eq!(log.index_of(anchor_before), Some(3));
        assert_eq!(log.get(anchor_before).unwrap().content, "message 50");
    }

    #[test]
    fn test_prepend_dedupes_overlap() {
        let mut log = MessageLog::new();
        log.append(msg(10, 1));

        let outcome = log.prepend_page(vec![msg(9, 2), msg(10, 1)]);
        assert_eq!(outcome.inserted, 1);
        assert_eq!(log.len(), 2);
    }

    #[test]
    fn test_targeted_patches() {
        let mut log = MessageLog::new();
        log.append(msg(1, 2));

        log.apply_reaction(MessageId(1), UserId(3), "💊", ReactionAction::Add);
        assert_eq!(log.get(MessageId(1)).unwrap().reactions["💊"].len(), 1);

        log.apply_edit(MessageId(1), "corrected".to_string());
        let m = log.get(MessageId(1)).unwrap();
        assert!(m.edited);
        assert_eq!(m.content, "corrected");

        log.apply_delete(MessageId(1));
        assert!(log.get(MessageId(1)).unwrap().deleted);
        // Identity survives the tombstone.
        assert_eq!(log.len(), 1);
    }
}
