//! Seam to the platform RTC stack.
//!
//! The engine decides *when* descriptions and candidates are created or
//! applied; the stack behind this trait does the actual media plumbing.
//! Every method is a suspension point: the engine re-validates the active
//! call id after each await before acting on the result.

use async_trait::async_trait;

use crate::error::MediaError;

#[async_trait]
pub trait PeerConnector: Send + Sync {
    /// Create the local SDP offer for the active peer connection.
    async fn create_offer(&self) -> Result<String, MediaError>;

    /// Set the remote offer and create the matching local answer.
    async fn create_answer(&self, remote_offer: &str) -> Result<String, MediaError>;

    /// Set the remote answer on the initiating side.
    async fn apply_answer(&self, remote_answer: &str) -> Result<(), MediaError>;

    /// Apply one remote ICE candidate. Only called once a remote
    /// description is in place; earlier candidates are queued upstream.
    async fn apply_candidate(&self, candidate: &str) -> Result<(), MediaError>;

    /// Close the peer connection. Must be safe to call more than once.
    async fn close(&self);
}
