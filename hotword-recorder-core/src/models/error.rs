use thiserror::Error;

/// Errors that can occur while listening for hotwords and recording.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CaptureError {
    #[error("configuration failed: {0}")]
    ConfigurationFailed(String),

    #[error("device not available: {0}")]
    DeviceNotAvailable(String),

    #[error("detector error: {0}")]
    Detector(String),

    #[error("storage error: {0}")]
    StorageError(String),

    #[error("listener already running")]
    AlreadyRunning,

    #[error("audio handler terminated")]
    Terminated,

    #[error("unknown error: {0}")]
    Unknown(String),
}
