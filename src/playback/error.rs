//! Error types for audio playback operations.

use crate::streaming::StreamError;

/// Playback-specific error types.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PlaybackError {
    /// Fetching or decoding audio failed
    #[error("Stream error: {0}")]
    Stream(#[from] StreamError),

    /// The output could not be created or driven
    #[error("Output error: {0}")]
    Output(String),

    /// Backend-specific errors (CPAL, etc.)
    #[error("Backend error: {backend} - {details}")]
    Backend {
        backend: &'static str,
        details: String,
    },

    /// Player configuration errors
    #[error("Invalid player configuration: {0}")]
    InvalidConfig(String),
}

impl PlaybackError {
    /// Create an output error
    pub fn output(details: impl Into<String>) -> Self {
        Self::Output(details.into())
    }

    /// Create a backend error
    pub fn backend(backend: &'static str, details: impl Into<String>) -> Self {
        Self::Backend {
            backend,
            details: details.into(),
        }
    }

    /// Check if this is a recoverable error
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Stream(err) => err.is_recoverable(),
            Self::Backend { .. } => true,
            _ => false,
        }
    }
}

/// Result type for playback operations
pub type PlaybackResult<T> = Result<T, PlaybackError>;

/// Helper macro for creating playback errors
#[macro_export]
macro_rules! playback_error {
    ($kind:ident, $($args:tt)*) => {
        $crate::playback::PlaybackError::$kind(format!($($args)*))
    };
}

#[cfg(feature = "device")]
impl From<cpal::BuildStreamError> for PlaybackError {
    fn from(err: cpal::BuildStreamError) -> Self {
        Self::backend("cpal", format!("Failed to build stream: {}", err))
    }
}

#[cfg(feature = "device")]
impl From<cpal::PlayStreamError> for PlaybackError {
    fn from(err: cpal::PlayStreamError) -> Self {
        Self::backend("cpal", format!("Failed to play stream: {}", err))
    }
}

#[cfg(feature = "device")]
impl From<cpal::PauseStreamError> for PlaybackError {
    fn from(err: cpal::PauseStreamError) -> Self {
        Self::backend("cpal", format!("Failed to pause stream: {}", err))
    }
}
