//! Error types for the cache client.

use std::io;
use thiserror::Error;

/// Result type alias for cache client operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the cache client.
#[derive(Error, Debug)]
pub enum Error {
    /// A caller-supplied argument failed validation. Never retried.
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    /// Every bucket in the routing table is offline.
    #[error("no cache hosts available")]
    NoCacheHostsAvailable,

    /// Value could not be serialized for a write. Never retried.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Raw bytes could not be deserialized into the requested type.
    #[error("deserialization error: {0}")]
    Deserialization(String),

    /// Network communication errors. Retried by the facade.
    #[error("network error: {0}")]
    Network(#[from] NetworkError),

    /// Configuration errors.
    #[error("config error: {0}")]
    Config(String),

    /// The configured operation deadline elapsed while retrying.
    #[error("operation deadline exceeded")]
    Timeout,

    /// The client has been shut down.
    #[error("client is shut down")]
    Shutdown,
}

impl Error {
    /// Whether this error is a transient transport failure that the
    /// facade retry loop should absorb.
    pub fn is_transport(&self) -> bool {
        matches!(self, Error::Network(_))
    }
}

/// Network communication errors.
#[derive(Error, Debug)]
pub enum NetworkError {
    /// Connection failed.
    #[error("connection failed to {addr}: {reason}")]
    ConnectionFailed { addr: String, reason: String },

    /// Connection was closed mid-request.
    #[error("connection closed")]
    ConnectionClosed,

    /// No live connection to the selected host.
    #[error("not connected")]
    NotConnected,

    /// Failed to send a request frame.
    #[error("send failed: {0}")]
    SendFailed(String),

    /// Failed to receive or decode a response frame.
    #[error("receive failed: {0}")]
    ReceiveFailed(String),

    /// The per-request timeout elapsed.
    #[error("request timed out")]
    RequestTimeout,

    /// The host reported an error executing the request.
    #[error("remote error: {0}")]
    Remote(String),

    /// I/O error.
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_classification() {
        assert!(Error::Network(NetworkError::ConnectionClosed).is_transport());
        assert!(Error::Network(NetworkError::RequestTimeout).is_transport());
        assert!(!Error::InvalidArgument("cacheKey").is_transport());
        assert!(!Error::NoCacheHostsAvailable.is_transport());
        assert!(!Error::Serialization("bad".into()).is_transport());
    }
}
