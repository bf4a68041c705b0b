//! Error types for the RPC correlation layer.

use thiserror::Error;

/// Errors surfaced to the caller of an RPC request.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RpcError {
    /// The client was closed (or never opened a subscription) while the request was pending.
    #[error("Client closed.")]
    Closed,

    /// The request's cancel policy fired before any response arrived.
    #[error("Request '{method}' timed out.")]
    TimedOut { method: String },

    /// The remote side answered with a `failure` packet.
    #[error("Remote failure: {0}")]
    Remote(String),

    /// The channel refused to deliver a packet.
    #[error("Channel error: {0}")]
    Channel(String),

    /// No caller is bound under this name in a method table.
    #[error("No remote method bound as '{0}'")]
    UnknownMethod(String),

    /// A packet header or payload could not be encoded or decoded.
    #[error("Decode error in {context}: {details}")]
    Decode {
        context: &'static str,
        details: String,
    },
}

impl RpcError {
    /// Create a timeout error for the given method.
    pub fn timed_out(method: impl Into<String>) -> Self {
        Self::TimedOut {
            method: method.into(),
        }
    }

    /// Create a channel error.
    pub fn channel(details: impl Into<String>) -> Self {
        Self::Channel(details.into())
    }

    /// Create a decode error.
    pub fn decode(context: &'static str, details: impl ToString) -> Self {
        Self::Decode {
            context,
            details: details.to_string(),
        }
    }

    /// Check whether retrying the same request could succeed.
    pub const fn is_recoverable(&self) -> bool {
        matches!(self, Self::TimedOut { .. } | Self::Channel(_))
    }
}

/// Result type for RPC operations.
pub type RpcResult<T> = Result<T, RpcError>;
