// Call session management and SDP/ICE negotiation for 1:1 calls.

pub mod call;
pub mod error;
pub mod negotiation;
pub mod rtc;
pub mod tracks;

pub use call::{CallSession, CallState};
pub use error::MediaError;
pub use negotiation::{NegotiationAction, NegotiationSession, NegotiationState};
pub use rtc::PeerConnector;
pub use tracks::{LocalMedia, MediaSource, MediaTrack, RemoteStream, TrackKind};
