// Shared domain model and signaling protocol for the Apothek client engine.

pub mod constants;
pub mod error;
pub mod model;
pub mod protocol;
pub mod types;

pub use error::ProtocolError;
pub use model::{Attachment, AttachmentKind, Conversation, DeliveryStatus, Message, Peer};
pub use protocol::{ReactionAction, RejectReason, SignalEvent};
pub use types::{CallId, CallKind, ConversationId, MessageId, UserId};
