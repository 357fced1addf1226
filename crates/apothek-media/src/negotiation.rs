//! Offer/answer/ICE exchange bound to the active call session.
//!
//! The initiating side creates an offer; the receiving side answers; both
//! sides trickle locally discovered candidates as they appear. Candidates
//! that arrive before the remote description is set are queued and drained
//! exactly once when it lands — never dropped, never applied twice.

use tracing::debug;

use apothek_shared::{CallId, SignalEvent, UserId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiationState {
    Idle,
    OfferSent,
    OfferReceived,
    Connected,
    Closed,
}

/// What the RTC stack must do in response to an inbound signal.
#[derive(Debug, PartialEq, Eq)]
pub enum NegotiationAction {
    /// An offer arrived: set it as remote description, create and send an
    /// answer, then apply the drained candidates in order.
    CreateAnswer {
        remote_offer: String,
        candidates: Vec<String>,
    },
    /// The answer arrived: set it as remote description, then apply the
    /// drained candidates in order.
    ApplyAnswer {
        remote_answer: String,
        candidates: Vec<String>,
    },
    /// A candidate arrived after the remote description: apply immediately.
    ApplyCandidate(String),
    /// A candidate arrived early and was queued; nothing to do yet.
    CandidateQueued,
    /// The negotiated session failed; the call manager must run `end()`.
    EndCall,
}

/// Signaling-side state of one peer connection.
pub struct NegotiationSession {
    call_id: CallId,
    local_user: UserId,
    remote_user: UserId,
    state: NegotiationState,
    local_sdp: Option<String>,
    remote_sdp: Option<String>,
    pending_candidates: Vec<String>,
}

impl NegotiationSession {
    pub fn new(call_id: CallId, local_user: UserId, remote_user: UserId) -> Self {
        Self {
            call_id,
            local_user,
            remote_user,
            state: NegotiationState::Idle,
            local_sdp: None,
            remote_sdp: None,
            pending_candidates: Vec::new(),
        }
    }

    pub fn state(&self) -> NegotiationState {
        self.state
    }

    pub fn call_id(&self) -> CallId {
        self.call_id
    }

    /// Record the local offer and produce the outbound signal.
    pub fn create_offer(&mut self, sdp: String) -> SignalEvent {
        self.local_sdp = Some(sdp.clone());
        self.state = NegotiationState::OfferSent;
        debug!(call = %self.call_id, remote = %self.remote_user, "Creating SDP offer");

        SignalEvent::WebrtcOffer {
            offer: sdp,
            call_id: self.call_id,
            receiver_id: self.remote_user,
        }
    }

    /// Record the local answer and produce the outbound signal.
    pub fn create_answer(&mut self, sdp: String) -> SignalEvent {
        self.local_sdp = Some(sdp.clone());
        self.state = NegotiationState::Connected;
        debug!(call = %self.call_id, remote = %self.remote_user, "Creating SDP answer");

        SignalEvent::WebrtcAnswer {
            answer: sdp,
            call_id: self.call_id,
            receiver_id: self.remote_user,
        }
    }

    /// Produce the outbound signal for a locally discovered candidate.
    pub fn local_candidate(&self, candidate: String) -> SignalEvent {
        SignalEvent::WebrtcIceCandidate {
            candidate,
            call_id: self.call_id,
            receiver_id: self.remote_user,
        }
    }

    /// An offer arrived from the initiating side.
    pub fn handle_offer(&mut self, sdp: String) -> NegotiationAction {
        debug!(call = %self.call_id, from = %self.remote_user, "Received SDP offer");
        self.state = NegotiationState::OfferReceived;
        let candidates = self.set_remote_description(sdp.clone());
        NegotiationAction::CreateAnswer {
            remote_offer: sdp,
            candidates,
        }
    }

    /// The answer to our offer arrived.
    pub fn handle_answer(&mut self, sdp: String) -> NegotiationAction {
        debug!(call = %self.call_id, from = %self.remote_user, "Received SDP answer");
        self.state = NegotiationState::Connected;
        let candidates = self.set_remote_description(sdp.clone());
        NegotiationAction::ApplyAnswer {
            remote_answer: sdp,
            candidates,
        }
    }

    /// A trickled candidate arrived from the peer.
    pub fn handle_candidate(&mut self, candidate: String) -> NegotiationAction {
        if self.remote_sdp.is_some() {
            NegotiationAction::ApplyCandidate(candidate)
        } else {
            debug!(call = %self.call_id, "Queueing early ICE candidate");
            self.pending_candidates.push(candidate);
            NegotiationAction::CandidateQueued
        }
    }

    /// The underlying transport failed or disconnected.
    pub fn handle_failure(&mut self) -> NegotiationAction {
        self.state = NegotiationState::Closed;
        NegotiationAction::EndCall
    }

    pub fn close(&mut self) {
        self.state = NegotiationState::Closed;
        self.pending_candidates.clear();
    }

    pub fn local_sdp(&self) -> Option<&str> {
        self.local_sdp.as_deref()
    }

    pub fn remote_sdp(&self) -> Option<&str> {
        self.remote_sdp.as_deref()
    }

    /// Store the remote description and drain the candidate queue. The take
    /// guarantees each queued candidate is handed out exactly once.
    fn set_remote_description(&mut self, sdp: String) -> Vec<String> {
        self.remote_sdp = Some(sdp);
        std::mem::take(&mut self.pending_candidates)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> NegotiationSession {
        NegotiationSession::new(CallId(5), UserId(1), UserId(2))
    }

    #[test]
    fn test_offer_answer_states() {
        let mut caller = session();
        let event = caller.create_offer("offer-sdp".to_string());
        assert_eq!(caller.state(), NegotiationState::OfferSent);
        assert!(matches!(event, SignalEvent::WebrtcOffer { .. }));

        let action = caller.handle_answer("answer-sdp".to_string());
        assert_eq!(caller.state(), NegotiationState::Connected);
        assert_eq!(
            action,
            NegotiationAction::ApplyAnswer {
                remote_answer: "answer-sdp".to_string(),
                candidates: Vec::new(),
            }
        );
    }

    #[test]
    fn test_early_candidates_drained_exactly_once() {
        let mut callee = session();

        assert_eq!(
            callee.handle_candidate("cand-1".to_string()),
            NegotiationAction::CandidateQueued
        );
        assert_eq!(
            callee.handle_candidate("cand-2".to_string()),
            NegotiationAction::CandidateQueued
        );

        let action = callee.handle_offer("offer-sdp".to_string());
        match action {
            NegotiationAction::CreateAnswer { candidates, .. } => {
                assert_eq!(candidates, vec!["cand-1".to_string(), "cand-2".to_string()]);
            }
            other => panic!("unexpected action: {other:?}"),
        }

        // Anything after the remote description applies directly; the queue
        // must not replay.
        assert_eq!(
            callee.handle_candidate("cand-3".to_string()),
            NegotiationAction::ApplyCandidate("cand-3".to_string())
        );
        assert!(callee.pending_candidates.is_empty());
    }

    #[test]
    fn test_failure_requests_end() {
        let mut s = session();
        s.create_offer("offer".to_string());
        assert_eq!(s.handle_failure(), NegotiationAction::EndCall);
        assert_eq!(s.state(), NegotiationState::Closed);
    }

    #[test]
    fn test_close_clears_queue() {
        let mut s = session();
        s.handle_candidate("cand".to_string());
        s.close();
        assert!(s.pending_candidates.is_empty());
        assert_eq!(s.state(), NegotiationState::Closed);
    }
}
