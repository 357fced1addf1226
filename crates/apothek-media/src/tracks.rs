//! Local capture track handles and the capture-device seam.
//!
//! The engine never touches frames; it only decides when tracks are
//! acquired, enabled, swapped and released. The actual capture stack sits
//! behind [`MediaSource`] so the engine can be driven against a fake.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use apothek_shared::CallKind;

use crate::error::MediaError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackKind {
    Audio,
    Camera,
    Screen,
}

/// A single outgoing capture track.
///
/// `enabled` gates whether frames are sent (mute / camera-off); `live`
/// reflects whether the underlying device is still held. Flags are shared
/// with the capture stack, which observes them from its own threads.
#[derive(Debug, Clone)]
pub struct MediaTrack {
    kind: TrackKind,
    enabled: Arc<AtomicBool>,
    live: Arc<AtomicBool>,
}

impl MediaTrack {
    pub fn new(kind: TrackKind) -> Self {
        Self {
            kind,
            enabled: Arc::new(AtomicBool::new(true)),
            live: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn kind(&self) -> TrackKind {
        self.kind
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    /// Release the underlying device. Idempotent.
    pub fn stop(&self) {
        if self.live.swap(false, Ordering::Relaxed) {
            debug!(kind = ?self.kind, "Stopped media track");
        }
    }

    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::Relaxed)
    }
}

/// The set of local capture tracks owned by one call session.
///
/// The camera track is kept while a screen track temporarily replaces it as
/// the outgoing video, so the swap-back on share end needs no re-acquisition.
#[derive(Debug)]
pub struct LocalMedia {
    audio: MediaTrack,
    camera: Option<MediaTrack>,
    screen: Option<MediaTrack>,
}

impl LocalMedia {
    pub fn new(audio: MediaTrack, camera: Option<MediaTrack>) -> Self {
        Self {
            audio,
            camera,
            screen: None,
        }
    }

    pub fn audio(&self) -> &MediaTrack {
        &self.audio
    }

    pub fn camera(&self) -> Option<&MediaTrack> {
        self.camera.as_ref()
    }

    /// The track currently sent as outgoing video.
    pub fn outgoing_video(&self) -> Option<&MediaTrack> {
        self.screen.as_ref().or(self.camera.as_ref())
    }

    /// Replace the outgoing video with a captured-display track.
    pub fn start_screen_share(&mut self, screen: MediaTrack) {
        if let Some(old) = self.screen.replace(screen) {
            old.stop();
        }
    }

    /// Stop the display track and fall back to the camera.
    pub fn stop_screen_share(&mut self) {
        if let Some(screen) = self.screen.take() {
            screen.stop();
        }
    }

    pub fn is_screen_sharing(&self) -> bool {
        self.screen.is_some()
    }

    /// Number of tracks still holding a capture device.
    pub fn live_track_count(&self) -> usize {
        let mut count = usize::from(self.audio.is_live());
        if let Some(ref camera) = self.camera {
            count += usize::from(camera.is_live());
        }
        if let Some(ref screen) = self.screen {
            count += usize::from(screen.is_live());
        }
        count
    }

    /// Release every capture device. Idempotent.
    pub fn stop_all(&mut self) {
        self.audio.stop();
        if let Some(ref camera) = self.camera {
            camera.stop();
        }
        if let Some(screen) = self.screen.take() {
            screen.stop();
        }
    }
}

/// Handle to the peer's incoming stream, attached by the negotiation layer.
#[derive(Debug, Clone)]
pub struct RemoteStream {
    live: Arc<AtomicBool>,
}

impl RemoteStream {
    pub fn new() -> Self {
        Self {
            live: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn stop(&self) {
        self.live.store(false, Ordering::Relaxed);
    }

    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::Relaxed)
    }
}

impl Default for RemoteStream {
    fn default() -> Self {
        Self::new()
    }
}

/// Capture-device collaborator.
///
/// Implementations map the platform's permission failure to
/// [`MediaError::PermissionDenied`] so the call pipeline can abort cleanly.
#[async_trait]
pub trait MediaSource: Send + Sync {
    /// Acquire microphone (and camera, for video calls).
    async fn acquire(&self, kind: CallKind) -> Result<LocalMedia, MediaError>;

    /// Capture the display for screen sharing.
    async fn acquire_screen(&self) -> Result<MediaTrack, MediaError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stop_all_is_idempotent() {
        let mut media = LocalMedia::new(
            MediaTrack::new(TrackKind::Audio),
            Some(MediaTrack::new(TrackKind::Camera)),
        );
        assert_eq!(media.live_track_count(), 2);

        media.stop_all();
        assert_eq!(media.live_track_count(), 0);
        media.stop_all();
        assert_eq!(media.live_track_count(), 0);
    }

    #[test]
    fn test_screen_share_swaps_outgoing_video() {
        let mut media = LocalMedia::new(
            MediaTrack::new(TrackKind::Audio),
            Some(MediaTrack::new(TrackKind::Camera)),
        );
        assert_eq!(media.outgoing_video().unwrap().kind(), TrackKind::Camera);

        media.start_screen_share(MediaTrack::new(TrackKind::Screen));
        assert_eq!(media.outgoing_video().unwrap().kind(), TrackKind::Screen);

        media.stop_screen_share();
        assert_eq!(media.outgoing_video().unwrap().kind(), TrackKind::Camera);
        // The camera survived the share untouched.
        assert!(media.camera().unwrap().is_live());
    }

    #[test]
    fn test_screen_track_released_on_stop_all() {
        let mut media = LocalMedia::new(MediaTrack::new(TrackKind::Audio), None);
        let screen = MediaTrack::new(TrackKind::Screen);
        let probe = screen.clone();
        media.start_screen_share(screen);

        media.stop_all();
        assert!(!probe.is_live());
        assert_eq!(media.live_track_count(), 0);
    }
}
