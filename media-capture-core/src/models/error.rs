use thiserror::Error;

/// Errors that can occur while capturing, converting or encoding media.
///
/// `Timeout` is deliberately absent: a frame acquire that finds nothing new is
/// reported as [`AcquireOutcome::Timeout`](crate::traits::display_device::AcquireOutcome),
/// which drives frame duplication rather than error handling.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CaptureError {
    /// Invalid adapter/output, duplication already claimed, or the OS refused
    /// to open the device. Fatal to that attempt.
    #[error("device initialization failed: {0}")]
    DeviceInit(String),

    /// Display mode change or an exclusive fullscreen takeover invalidated the
    /// duplication. Recoverable by reinitializing on the capture thread.
    #[error("display access lost")]
    AccessLost,

    /// Requested audio output encoding has no converter.
    #[error("unsupported audio format: {0}")]
    UnsupportedFormat(String),

    /// The encoder process exited non-zero (or could not be launched, in which
    /// case `exit_code` is `None`).
    #[error("encoder failed (exit code {exit_code:?}): {diagnostics}")]
    EncodeFailure {
        exit_code: Option<i32>,
        diagnostics: String,
    },

    #[error("{0} used after dispose")]
    UseAfterDispose(String),

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("invalid buffer: {0}")]
    InvalidBuffer(String),

    #[error("configuration failed: {0}")]
    ConfigurationFailed(String),

    #[error("device not available")]
    DeviceNotAvailable,

    #[error("pipe error: {0}")]
    Pipe(String),

    #[error("unknown error: {0}")]
    Unknown(String),
}

impl CaptureError {
    /// Whether the per-tick capture loop may continue after this error.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::AccessLost | Self::Unknown(_) | Self::InvalidBuffer(_))
    }
}
