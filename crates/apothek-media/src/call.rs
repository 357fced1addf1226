//! State machine for the single active 1:1 call.
//!
//! States: `Idle → Outgoing → (Active | Idle)`, `Idle → Incoming →
//! (Active | Idle)`, `Active → Idle`. The session exclusively owns the local
//! capture tracks; they are released only by [`CallSession::end`], which is
//! idempotent so every terminal trigger (local hangup, peer hangup,
//! negotiation failure) can call it without error.

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use apothek_shared::{CallId, CallKind, UserId};

use crate::error::MediaError;
use crate::negotiation::NegotiationSession;
use crate::tracks::{LocalMedia, MediaTrack, RemoteStream};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallState {
    Idle,
    Outgoing,
    Incoming,
    Active,
}

impl CallState {
    pub fn name(self) -> &'static str {
        match self {
            CallState::Idle => "idle",
            CallState::Outgoing => "outgoing",
            CallState::Incoming => "incoming",
            CallState::Active => "active",
        }
    }
}

/// The one call session a client may hold at a time.
pub struct CallSession {
    local_user: UserId,
    state: CallState,
    call_id: Option<CallId>,
    kind: Option<CallKind>,
    peer: Option<UserId>,
    peer_name: Option<String>,
    is_caller: bool,
    local_media: Option<LocalMedia>,
    remote_stream: Option<RemoteStream>,
    negotiation: Option<NegotiationSession>,
    connected_at: Option<DateTime<Utc>>,
}

impl CallSession {
    pub fn new(local_user: UserId) -> Self {
        Self {
            local_user,
            state: CallState::Idle,
            call_id: None,
            kind: None,
            peer: None,
            peer_name: None,
            is_caller: false,
            local_media: None,
            remote_stream: None,
            negotiation: None,
            connected_at: None,
        }
    }

    pub fn state(&self) -> CallState {
        self.state
    }

    pub fn is_idle(&self) -> bool {
        self.state == CallState::Idle
    }

    pub fn call_id(&self) -> Option<CallId> {
        self.call_id
    }

    pub fn kind(&self) -> Option<CallKind> {
        self.kind
    }

    pub fn peer(&self) -> Option<UserId> {
        self.peer
    }

    pub fn peer_name(&self) -> Option<&str> {
        self.peer_name.as_deref()
    }

    pub fn is_caller(&self) -> bool {
        self.is_caller
    }

    /// Elapsed time since both sides went active.
    pub fn duration(&self) -> Option<chrono::Duration> {
        self.connected_at.map(|t| Utc::now() - t)
    }

    /// `Idle → Outgoing`. The caller has already acquired media and
    /// persisted the call record; this transition only takes ownership.
    pub fn start_outgoing(
        &mut self,
        call_id: CallId,
        peer: UserId,
        kind: CallKind,
        media: LocalMedia,
    ) -> Result<(), MediaError> {
        self.require_state(CallState::Idle)?;

        info!(call = %call_id, peer = %peer, kind = %kind, "Outgoing call");
        self.state = CallState::Outgoing;
        self.call_id = Some(call_id);
        self.kind = Some(kind);
        self.peer = Some(peer);
        self.is_caller = true;
        self.local_media = Some(media);
        Ok(())
    }

    /// `Idle → Incoming`. No media is acquired until `accept`. Returns
    /// `Busy` when any session already exists, so the engine can answer the
    /// new caller with an explicit busy rejection.
    pub fn ring_incoming(
        &mut self,
        call_id: CallId,
        caller: UserId,
        caller_name: String,
        kind: CallKind,
    ) -> Result<(), MediaError> {
        if self.state != CallState::Idle {
            warn!(call = %call_id, caller = %caller, "Incoming call while busy");
            return Err(MediaError::Busy);
        }

        info!(call = %call_id, caller = %caller, kind = %kind, "Incoming call");
        self.state = CallState::Incoming;
        self.call_id = Some(call_id);
        self.kind = Some(kind);
        self.peer = Some(caller);
        self.peer_name = Some(caller_name);
        self.is_caller = false;
        Ok(())
    }

    /// `Incoming → Active`, callee side. Media matching the call kind has
    /// just been acquired; negotiation starts when the caller's offer lands.
    pub fn accept(&mut self, media: LocalMedia) -> Result<(), MediaError> {
        self.require_state(CallState::Incoming)?;
        self.local_media = Some(media);
        self.activate();
        Ok(())
    }

    /// `Outgoing → Active`, caller side, on the peer's accept signal.
    pub fn on_accepted(&mut self) -> Result<(), MediaError> {
        self.require_state(CallState::Outgoing)?;
        self.activate();
        Ok(())
    }

    fn activate(&mut self) {
        // call_id and peer are set by the entry transition.
        let call_id = self.call_id.expect("active call has an id");
        let peer = self.peer.expect("active call has a peer");

        self.negotiation = Some(NegotiationSession::new(call_id, self.local_user, peer));
        self.connected_at = Some(Utc::now());
        self.state = CallState::Active;
        info!(call = %call_id, "Call active");
    }

    pub fn negotiation_mut(&mut self) -> Option<&mut NegotiationSession> {
        self.negotiation.as_mut()
    }

    pub fn attach_remote_stream(&mut self, stream: RemoteStream) -> Result<(), MediaError> {
        self.require_state(CallState::Active)?;
        self.remote_stream = Some(stream);
        Ok(())
    }

    pub fn remote_stream(&self) -> Option<&RemoteStream> {
        self.remote_stream.as_ref()
    }

    /// Flip the outgoing audio track. Returns the new muted state.
    pub fn toggle_mute(&mut self) -> Result<bool, MediaError> {
        self.require_state(CallState::Active)?;
        let media = self.local_media.as_ref().ok_or(MediaError::NotInCall)?;

        let muted = media.audio().is_enabled();
        media.audio().set_enabled(!muted);
        info!(muted, "Mute toggled");
        Ok(muted)
    }

    pub fn is_muted(&self) -> bool {
        self.local_media
            .as_ref()
            .is_some_and(|m| !m.audio().is_enabled())
    }

    /// Flip the outgoing camera track. Only valid on video calls.
    pub fn toggle_video(&mut self) -> Result<bool, MediaError> {
        self.require_state(CallState::Active)?;
        let media = self.local_media.as_ref().ok_or(MediaError::NotInCall)?;
        let camera = media.camera().ok_or(MediaError::NoVideoTrack)?;

        let enabled = !camera.is_enabled();
        camera.set_enabled(enabled);
        info!(video = enabled, "Video toggled");
        Ok(enabled)
    }

    /// Swap the outgoing video for a captured-display track.
    pub fn start_screen_share(&mut self, screen: MediaTrack) -> Result<(), MediaError> {
        self.require_state(CallState::Active)?;
        let media = self.local_media.as_mut().ok_or(MediaError::NotInCall)?;
        media.start_screen_share(screen);
        info!("Screen share started");
        Ok(())
    }

    /// Stop sharing and fall back to the camera track.
    pub fn stop_screen_share(&mut self) -> Result<(), MediaError> {
        self.require_state(CallState::Active)?;
        let media = self.local_media.as_mut().ok_or(MediaError::NotInCall)?;
        media.stop_screen_share();
        info!("Screen share stopped");
        Ok(())
    }

    pub fn is_screen_sharing(&self) -> bool {
        self.local_media.as_ref().is_some_and(|m| m.is_screen_sharing())
    }

    /// Capture devices still held, local and remote.
    pub fn live_track_count(&self) -> usize {
        let local = self
            .local_media
            .as_ref()
            .map(|m| m.live_track_count())
            .unwrap_or(0);
        let remote = self
            .remote_stream
            .as_ref()
            .is_some_and(|s| s.is_live()) as usize;
        local + remote
    }

    /// Tear down to `Idle` from any state. Always runs in this order: stop
    /// all local and remote tracks, close the negotiation session, clear the
    /// duration clock, reset call-scoped fields. Idempotent.
    pub fn end(&mut self) {
        if self.state == CallState::Idle && self.call_id.is_none() {
            debug!("Teardown on idle session is a no-op");
            return;
        }

        if let Some(ref mut media) = self.local_media {
            media.stop_all();
        }
        self.local_media = None;

        if let Some(ref stream) = self.remote_stream {
            stream.stop();
        }
        self.remote_stream = None;

        if let Some(ref mut negotiation) = self.negotiation {
            negotiation.close();
        }
        self.negotiation = None;

        self.connected_at = None;
        let ended = self.call_id.take();
        self.kind = None;
        self.peer = None;
        self.peer_name = None;
        self.is_caller = false;
        self.state = CallState::Idle;

        if let Some(call_id) = ended {
            info!(call = %call_id, "Call torn down");
        }
    }

    fn require_state(&self, expected: CallState) -> Result<(), MediaError> {
        if self.state == expected {
            Ok(())
        } else {
            Err(MediaError::InvalidState {
                expected: expected.name(),
                actual: self.state.name(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracks::TrackKind;

    fn video_media() -> LocalMedia {
        LocalMedia::new(
            MediaTrack::new(TrackKind::Audio),
            Some(MediaTrack::new(TrackKind::Camera)),
        )
    }

    fn voice_media() -> LocalMedia {
        LocalMedia::new(MediaTrack::new(TrackKind::Audio), None)
    }

    fn session() -> CallSession {
        CallSession::new(UserId(1))
    }

    #[test]
    fn test_only_idle_accepts_entry_transitions() {
        let mut s = session();
        s.start_outgoing(CallId(1), UserId(2), CallKind::Video, video_media())
            .unwrap();

        // A second outgoing attempt is rejected.
        assert!(matches!(
            s.start_outgoing(CallId(2), UserId(3), CallKind::Voice, voice_media()),
            Err(MediaError::InvalidState { .. })
        ));
        // An incoming ring while outgoing reports busy.
        assert!(matches!(
            s.ring_incoming(CallId(3), UserId(4), "Dr. Martin".into(), CallKind::Voice),
            Err(MediaError::Busy)
        ));
    }

    #[test]
    fn test_caller_flow_to_active() {
        let mut s = session();
        s.start_outgoing(CallId(1), UserId(2), CallKind::Video, video_media())
            .unwrap();
        assert_eq!(s.state(), CallState::Outgoing);
        assert!(s.is_caller());

        s.on_accepted().unwrap();
        assert_eq!(s.state(), CallState::Active);
        assert!(s.duration().is_some());
        assert!(s.negotiation_mut().is_some());
    }

    #[test]
    fn test_callee_flow_to_active() {
        let mut s = session();
        s.ring_incoming(CallId(1), UserId(2), "Dr. Martin".into(), CallKind::Voice)
            .unwrap();
        assert_eq!(s.state(), CallState::Incoming);
        // No media before accept.
        assert_eq!(s.live_track_count(), 0);

        s.accept(voice_media()).unwrap();
        assert_eq!(s.state(), CallState::Active);
        assert_eq!(s.live_track_count(), 1);
    }

    #[test]
    fn test_teardown_releases_everything_and_is_idempotent() {
        let mut s = session();
        s.start_outgoing(CallId(1), UserId(2), CallKind::Video, video_media())
            .unwrap();
        s.on_accepted().unwrap();
        s.attach_remote_stream(RemoteStream::new()).unwrap();
        assert_eq!(s.live_track_count(), 3);

        s.end();
        assert_eq!(s.state(), CallState::Idle);
        assert_eq!(s.live_track_count(), 0);
        assert!(s.call_id().is_none());
        assert!(s.kind().is_none());
        assert!(s.duration().is_none());

        // Peer-hangup and failure paths may re-run teardown.
        s.end();
        s.end();
        assert_eq!(s.state(), CallState::Idle);
    }

    #[test]
    fn test_teardown_from_incoming_without_media() {
        let mut s = session();
        s.ring_incoming(CallId(1), UserId(2), "Dr. Martin".into(), CallKind::Video)
            .unwrap();
        s.end();
        assert_eq!(s.state(), CallState::Idle);
        assert_eq!(s.live_track_count(), 0);
    }

    #[test]
    fn test_controls_require_active() {
        let mut s = session();
        assert!(matches!(s.toggle_mute(), Err(MediaError::InvalidState { .. })));

        s.start_outgoing(CallId(1), UserId(2), CallKind::Video, video_media())
            .unwrap();
        assert!(matches!(s.toggle_mute(), Err(MediaError::InvalidState { .. })));

        s.on_accepted().unwrap();
        assert!(s.toggle_mute().unwrap());
        assert!(s.is_muted());
        assert!(!s.toggle_mute().unwrap());
    }

    #[test]
    fn test_video_toggle_rejected_on_voice_call() {
        let mut s = session();
        s.ring_incoming(CallId(1), UserId(2), "Dr. Martin".into(), CallKind::Voice)
            .unwrap();
        s.accept(voice_media()).unwrap();
        assert!(matches!(s.toggle_video(), Err(MediaError::NoVideoTrack)));
    }

    #[test]
    fn test_screen_share_swap_and_revert() {
        let mut s = session();
        s.start_outgoing(CallId(1), UserId(2), CallKind::Video, video_media())
            .unwrap();
        s.on_accepted().unwrap();

        s.start_screen_share(MediaTrack::new(TrackKind::Screen)).unwrap();
        assert!(s.is_screen_sharing());

        s.stop_screen_share().unwrap();
        assert!(!s.is_screen_sharing());
        // Camera still live for the swap-back.
        assert_eq!(s.live_track_count(), 2);
    }
}
