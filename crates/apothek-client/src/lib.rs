//! Client engine: message lifecycle, typing presence, notifications and
//! call orchestration for the Apothek desktop client.

pub mod api;
pub mod config;
pub mod conversations;
pub mod engine;
pub mod error;
pub mod events;
pub mod messages;
pub mod notify;
pub mod typing;

use tracing_subscriber::{fmt, EnvFilter};

pub use api::{ApiClient, ApiError, Backend, CallRecord};
pub use config::EngineConfig;
pub use engine::{start, Engine, EngineCommand, EngineHandle, LocalIdentity};
pub use error::EngineError;
pub use events::UiEvent;

/// Initialise structured logging for an embedding binary.
///
/// Honours `RUST_LOG`; defaults keep the engine chatty and the transport
/// quieter.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new("apothek_client=debug,apothek_signal=debug,apothek_media=info,warn")
    });

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();
}
