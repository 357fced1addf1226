use thiserror::Error;

use apothek_media::MediaError;
use apothek_shared::ProtocolError;
use apothek_signal::SignalError;

use crate::api::ApiError;

/// Top-level engine error.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("API error: {0}")]
    Api(#[from] ApiError),

    #[error("Signaling error: {0}")]
    Signal(#[from] SignalError),

    #[error("Media error: {0}")]
    Media(#[from] MediaError),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Unknown conversation: {0}")]
    UnknownConversation(apothek_shared::ConversationId),
}
