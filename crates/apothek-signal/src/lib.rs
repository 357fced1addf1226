// Transport session to the signaling hub over WebSocket.

pub mod error;
pub mod session;

pub use error::SignalError;
pub use session::{spawn_session, SessionConfig, SignalCommand, SignalNotification};
