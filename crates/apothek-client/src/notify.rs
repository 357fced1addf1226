//! User-facing alerts for events outside the focused conversation.

use std::sync::Arc;

use tracing::debug;

use apothek_shared::{CallId, ConversationId, Message};

/// Platform notification surface.
///
/// Implementations wrap the OS notification center; activation of a message
/// alert is expected to open the named conversation.
pub trait Notifier: Send + Sync {
    /// Whether the user has granted notification permission.
    fn permission_granted(&self) -> bool;

    fn message_alert(&self, conversation: ConversationId, title: &str, body: &str);

    fn incoming_call_alert(&self, call: CallId, caller_name: &str);

    /// Update the single global unread indicator.
    fn set_unread_badge(&self, count: u32);
}

pub struct NotificationDispatcher {
    notifier: Arc<dyn Notifier>,
}

impl NotificationDispatcher {
    pub fn new(notifier: Arc<dyn Notifier>) -> Self {
        Self { notifier }
    }

    /// Alert for a message in a conversation that is not open. No-op when
    /// permission is unavailable.
    pub fn notify_new_message(&self, message: &Message, sender_name: &str) {
        if !self.notifier.permission_granted() {
            debug!("Notification permission unavailable, skipping alert");
            return;
        }

        let body = if message.content.is_empty() {
            "Pièce jointe".to_string()
        } else {
            message.content.clone()
        };
        self.notifier
            .message_alert(message.conversation_id, sender_name, &body);
    }

    /// Alert for an incoming call. No-op when permission is unavailable.
    pub fn notify_incoming_call(&self, call: CallId, caller_name: &str) {
        if !self.notifier.permission_granted() {
            return;
        }
        self.notifier.incoming_call_alert(call, caller_name);
    }

    /// Push the server-computed total to the badge. The count always comes
    /// from the API, never from summing local state, so read receipts from
    /// the user's other devices are reflected.
    pub fn update_badge(&self, count: u32) {
        self.notifier.set_unread_badge(count);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use apothek_shared::{DeliveryStatus, MessageId, UserId};
    use chrono::Utc;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingNotifier {
        permitted: bool,
        alerts: Mutex<Vec<(ConversationId, String, String)>>,
        badges: Mutex<Vec<u32>>,
    }

    impl Notifier for RecordingNotifier {
        fn permission_granted(&self) -> bool {
            self.permitted
        }

        fn message_alert(&self, conversation: ConversationId, title: &str, body: &str) {
            self.alerts
                .lock()
                .unwrap()
                .push((conversation, title.to_string(), body.to_string()));
        }

        fn incoming_call_alert(&self, _call: CallId, _caller_name: &str) {}

        fn set_unread_badge(&self, count: u32) {
            self.badges.lock().unwrap().push(count);
        }
    }

    fn message() -> Message {
        Message {
            id: MessageId(1),
            conversation_id: ConversationId(4),
            sender_id: UserId(2),
            content: "Commande prête".to_string(),
            attachments: Vec::new(),
            created_at: Utc::now(),
            status: DeliveryStatus::Sent,
            edited: false,
            deleted: false,
            reactions: Default::default(),
        }
    }

    #[test]
    fn test_no_permission_is_a_noop() {
        let notifier = Arc::new(RecordingNotifier::default());
        let dispatcher = NotificationDispatcher::new(notifier.clone());

        dispatcher.notify_new_message(&message(), "Dr. Martin");
        assert!(notifier.alerts.lock().unwrap().is_empty());
    }

    #[test]
    fn test_alert_carries_conversation_and_sender() {
        let notifier = Arc::new(RecordingNotifier {
            permitted: true,
            ..Default::default()
        });
        let dispatcher = NotificationDispatcher::new(notifier.clone());

        dispatcher.notify_new_message(&message(), "Dr. Martin");
        let alerts = notifier.alerts.lock().unwrap();
        assert_eq!(
            alerts.as_slice(),
            &[(
                ConversationId(4),
                "Dr. Martin".to_string(),
                "Commande prête".to_string()
            )]
        );
    }

    #[test]
    fn test_badge_passthrough() {
        let notifier = Arc::new(RecordingNotifier {
            permitted: true,
            ..Default::default()
        });
        let dispatcher = NotificationDispatcher::new(notifier.clone());

        dispatcher.update_badge(7);
        dispatcher.update_badge(0);
        assert_eq!(notifier.badges.lock().unwrap().as_slice(), &[7, 0]);
    }
}
