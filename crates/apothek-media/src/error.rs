use thiserror::Error;

/// Errors produced by the call and media layer.
#[derive(Error, Debug)]
pub enum MediaError {
    /// The user denied camera/microphone access. The call transition that
    /// required the device is aborted; no record is persisted.
    #[error("Media permission denied: {0}")]
    PermissionDenied(String),

    /// Capture device failure other than a permission denial.
    #[error("Media device error: {0}")]
    Device(String),

    /// A second call was attempted while one is already in progress.
    #[error("Already in a call")]
    Busy,

    /// A transition was requested from the wrong state.
    #[error("Invalid call state: expected {expected}, got {actual}")]
    InvalidState {
        expected: &'static str,
        actual: &'static str,
    },

    /// An in-call control was used outside an active call.
    #[error("No active call")]
    NotInCall,

    /// Video controls were used on a voice call.
    #[error("No video track on a voice call")]
    NoVideoTrack,
}
