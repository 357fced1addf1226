//! Typing presence: outbound debounce and inbound indicator lifetimes.
//!
//! Purely timer-driven and cosmetic; nothing here is persisted or
//! acknowledged. The tracker is a pure state machine over injected instants
//! so the engine can drive it from its event loop and tests can drive it
//! from a fake clock.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use apothek_shared::constants::{TYPING_DEBOUNCE, TYPING_INDICATOR_TTL, TYPING_STOP_AFTER};
use apothek_shared::{ConversationId, UserId};

/// An outbound `typing_status` signal the engine must emit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypingEmit {
    Start(ConversationId),
    Stop(ConversationId),
}

/// A visible change to a remote party's indicator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndicatorUpdate {
    Shown {
        conversation: ConversationId,
        user: UserId,
    },
    Cleared {
        conversation: ConversationId,
        user: UserId,
    },
}

#[derive(Debug)]
struct OutboundTyping {
    last_start: Instant,
    stop_at: Instant,
}

#[derive(Debug)]
pub struct TypingTracker {
    debounce: Duration,
    stop_after: Duration,
    indicator_ttl: Duration,
    outbound: HashMap<ConversationId, OutboundTyping>,
    inbound: HashMap<(ConversationId, UserId), Instant>,
}

impl TypingTracker {
    pub fn new() -> Self {
        Self {
            debounce: TYPING_DEBOUNCE,
            stop_after: TYPING_STOP_AFTER,
            indicator_ttl: TYPING_INDICATOR_TTL,
            outbound: HashMap::new(),
            inbound: HashMap::new(),
        }
    }

    /// A local keystroke in `conversation`. Emits a start at most once per
    /// debounce window and re-arms the single pending stop deadline.
    pub fn on_local_input(
        &mut self,
        conversation: ConversationId,
        now: Instant,
    ) -> Option<TypingEmit> {
        let stop_at = now + self.stop_after;
        match self.outbound.get_mut(&conversation) {
            Some(entry) => {
                entry.stop_at = stop_at;
                if now.duration_since(entry.last_start) >= self.debounce {
                    entry.last_start = now;
                    Some(TypingEmit::Start(conversation))
                } else {
                    None
                }
            }
            None => {
                self.outbound.insert(
                    conversation,
                    OutboundTyping {
                        last_start: now,
                        stop_at,
                    },
                );
                Some(TypingEmit::Start(conversation))
            }
        }
    }

    /// The local user sent their message: the pending stop deadline is
    /// cancelled and an immediate stop is emitted if a start went out.
    pub fn on_local_send(&mut self, conversation: ConversationId) -> Option<TypingEmit> {
        self.outbound
            .remove(&conversation)
            .map(|_| TypingEmit::Stop(conversation))
    }

    /// An inbound `typing_status` signal.
    pub fn on_remote(
        &mut self,
        conversation: ConversationId,
        user: UserId,
        is_typing: bool,
        now: Instant,
    ) -> Option<IndicatorUpdate> {
        let key = (conversation, user);
        if is_typing {
            let newly_shown = self
                .inbound
                .insert(key, now + self.indicator_ttl)
                .is_none();
            newly_shown.then_some(IndicatorUpdate::Shown { conversation, user })
        } else {
            self.inbound
                .remove(&key)
                .map(|_| IndicatorUpdate::Cleared { conversation, user })
        }
    }

    /// Fire every deadline at or before `now`: overdue stop signals for our
    /// own typing and expired remote indicators.
    pub fn poll(&mut self, now: Instant) -> (Vec<TypingEmit>, Vec<IndicatorUpdate>) {
        let mut emits = Vec::new();
        self.outbound.retain(|&conversation, entry| {
            if entry.stop_at <= now {
                emits.push(TypingEmit::Stop(conversation));
                false
            } else {
                true
            }
        });

        let mut updates = Vec::new();
        self.inbound.retain(|&(conversation, user), &mut expires_at| {
            if expires_at <= now {
                updates.push(IndicatorUpdate::Cleared { conversation, user });
                false
            } else {
                true
            }
        });

        (emits, updates)
    }

    /// The next instant `poll` should run at, if any deadline is pending.
    pub fn next_deadline(&self) -> Option<Instant> {
        let outbound = self.outbound.values().map(|e| e.stop_at).min();
        let inbound = self.inbound.values().copied().min();
        match (outbound, inbound) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// Remote users currently shown as typing in `conversation`.
    pub fn typing_users(&self, conversation: ConversationId, now: Instant) -> Vec<UserId> {
        let mut users: Vec<UserId> = self
            .inbound
            .iter()
            .filter(|&(&(c, _), &expires_at)| c == conversation && expires_at > now)
            .map(|(&(_, user), _)| user)
            .collect();
        users.sort();
        users
    }
}

impl Default for TypingTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONV: ConversationId = ConversationId(1);
    const PEER: UserId = UserId(9);

    #[test]
    fn test_start_debounced_to_one_per_window() {
        let mut tracker = TypingTracker::new();
        let t0 = Instant::now();

        assert_eq!(
            tracker.on_local_input(CONV, t0),
            Some(TypingEmit::Start(CONV))
        );
        // Keystrokes inside the window stay silent.
        assert_eq!(tracker.on_local_input(CONV, t0 + Duration::from_millis(500)), None);
        assert_eq!(tracker.on_local_input(CONV, t0 + Duration::from_millis(1900)), None);
        // The window elapses while typing continues: re-emit.
        assert_eq!(
            tracker.on_local_input(CONV, t0 + Duration::from_secs(4)),
            Some(TypingEmit::Start(CONV))
        );
    }

    #[test]
    fn test_auto_stop_after_inactivity() {
        let mut tracker = TypingTracker::new();
        let t0 = Instant::now();
        tracker.on_local_input(CONV, t0);

        // Deadline re-armed by the second keystroke.
        tracker.on_local_input(CONV, t0 + Duration::from_secs(1));
        let (emits, _) = tracker.poll(t0 + Duration::from_millis(2500));
        assert!(emits.is_empty());

        let (emits, _) = tracker.poll(t0 + Duration::from_secs(3));
        assert_eq!(emits, vec![TypingEmit::Stop(CONV)]);

        // After the stop, the next keystroke starts a fresh window.
        assert_eq!(
            tracker.on_local_input(CONV, t0 + Duration::from_secs(4)),
            Some(TypingEmit::Start(CONV))
        );
    }

    #[test]
    fn test_indicator_clears_after_ttl_without_stop() {
        let mut tracker = TypingTracker::new();
        let t0 = Instant::now();

        assert_eq!(
            tracker.on_remote(CONV, PEER, true, t0),
            Some(IndicatorUpdate::Shown {
                conversation: CONV,
                user: PEER
            })
        );
        assert_eq!(tracker.typing_users(CONV, t0 + Duration::from_secs(2)), vec![PEER]);

        let (_, updates) = tracker.poll(t0 + Duration::from_secs(3));
        assert_eq!(
            updates,
            vec![IndicatorUpdate::Cleared {
                conversation: CONV,
                user: PEER
            }]
        );
        assert!(tracker.typing_users(CONV, t0 + Duration::from_secs(3)).is_empty());
    }

    #[test]
    fn test_fresh_start_extends_indicator() {
        let mut tracker = TypingTracker::new();
        let t0 = Instant::now();

        tracker.on_remote(CONV, PEER, true, t0);
        // A refresh inside the TTL is not a visible change.
        assert_eq!(tracker.on_remote(CONV, PEER, true, t0 + Duration::from_secs(2)), None);

        let (_, updates) = tracker.poll(t0 + Duration::from_secs(4));
        assert!(updates.is_empty(), "extended indicator must survive");
        assert_eq!(tracker.typing_users(CONV, t0 + Duration::from_secs(4)), vec![PEER]);
    }

    #[test]
    fn test_explicit_stop_clears_immediately() {
        let mut tracker = TypingTracker::new();
        let t0 = Instant::now();

        tracker.on_remote(CONV, PEER, true, t0);
        assert_eq!(
            tracker.on_remote(CONV, PEER, false, t0 + Duration::from_millis(100)),
            Some(IndicatorUpdate::Cleared {
                conversation: CONV,
                user: PEER
            })
        );
        // A stop without a visible indicator is silent.
        assert_eq!(tracker.on_remote(CONV, PEER, false, t0), None);
    }

    #[test]
    fn test_send_emits_stop_and_resets_window() {
        let mut tracker = TypingTracker::new();
        let t0 = Instant::now();

        tracker.on_local_input(CONV, t0);
        assert_eq!(tracker.on_local_send(CONV), Some(TypingEmit::Stop(CONV)));
        // No lingering deadline after the send.
        assert!(tracker.next_deadline().is_none());
        // A send without a prior start is silent.
        assert_eq!(tracker.on_local_send(CONV), None);
    }

    #[test]
    fn test_next_deadline_is_earliest() {
        let mut tracker = TypingTracker::new();
        let t0 = Instant::now();
        assert!(tracker.next_deadline().is_none());

        tracker.on_local_input(CONV, t0); // stop at t0+2s
        tracker.on_remote(CONV, PEER, true, t0); // expiry at t0+3s
        assert_eq!(tracker.next_deadline(), Some(t0 + Duration::from_secs(2)));
    }
}
