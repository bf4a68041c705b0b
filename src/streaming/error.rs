//! Error types for streaming operations.

use crate::rpc::RpcError;

/// Streaming-specific error types.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StreamError {
    /// The underlying request failed
    #[error("Request failed: {0}")]
    Rpc(#[from] RpcError),

    /// A chunk reply did not carry the expected sample buffers
    #[error("Malformed chunk {frame}: {details}")]
    MalformedChunk { frame: u64, details: String },

    /// The backend reported metadata that cannot be streamed
    #[error("Invalid metadata: {0}")]
    InvalidMetadata(String),

    /// A frame past the end of the track was requested
    #[error("Frame {frame} out of range, track has {frames} frames")]
    FrameOutOfRange { frame: u64, frames: u64 },

    /// The source was closed
    #[error("Audio source is closed")]
    Closed,
}

impl StreamError {
    /// Create a malformed chunk error
    pub fn malformed_chunk(frame: u64, details: impl Into<String>) -> Self {
        Self::MalformedChunk {
            frame,
            details: details.into(),
        }
    }

    /// Check if this is a recoverable error
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Rpc(err) => err.is_recoverable(),
            Self::MalformedChunk { .. } => true,
            _ => false,
        }
    }

    /// Check if this is a fatal error that should terminate the stream
    pub fn is_fatal(&self) -> bool {
        !self.is_recoverable()
    }
}

/// Result type for streaming operations
pub type StreamResult<T> = Result<T, StreamError>;

/// Helper macro for creating stream errors
#[macro_export]
macro_rules! stream_error {
    ($kind:ident, $($args:tt)*) => {
        $crate::streaming::StreamError::$kind(format!($($args)*))
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rpc_errors_convert() {
        let err: StreamError = RpcError::timed_out("render").into();
        assert!(matches!(err, StreamError::Rpc(RpcError::TimedOut { .. })));
        assert!(err.is_recoverable());

        let err: StreamError = RpcError::Closed.into();
        assert!(err.is_fatal());
    }

    #[test]
    fn test_macro_builds_message_variants() {
        let err = stream_error!(InvalidMetadata, "sample rate {} too high", 96000);
        assert_eq!(
            err,
            StreamError::InvalidMetadata("sample rate 96000 too high".to_string())
        );
        assert!(err.is_fatal());
    }

    #[test]
    fn test_display() {
        let err = StreamError::malformed_chunk(3, "expected 1 buffer, got 0");
        assert_eq!(
            err.to_string(),
            "Malformed chunk 3: expected 1 buffer, got 0"
        );
    }
}
