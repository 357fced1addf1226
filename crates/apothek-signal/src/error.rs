use thiserror::Error;

use apothek_shared::ProtocolError;

/// Errors produced by the signaling transport layer.
#[derive(Error, Debug)]
pub enum SignalError {
    /// WebSocket transport error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// Malformed frame on the wire.
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}
