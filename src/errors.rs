use std::time::Duration;
use thiserror::Error;

/// Errors that can occur in the transport layer.
#[derive(Error, Debug)]
pub enum NetError {
    /// Connection establishment or health probe exceeded its deadline
    #[error("connection to {peer} timed out after {timeout:?}")]
    ConnectionTimeout { peer: String, timeout: Duration },

    /// Transient transport failure (peer unreachable, connection dropped).
    /// Retried with bounded backoff before being surfaced.
    #[error("peer unavailable: {0}")]
    Unavailable(String),

    /// Malformed wire data (bad envelope, shape/dtype/length mismatch).
    /// Fatal for the call, never retried.
    #[error("protocol decode error: {0}")]
    Decode(String),

    /// The remote handler failed; its error message is echoed back
    #[error("remote call failed: {0}")]
    Remote(String),

    /// IO error (socket operations, framing)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for transport operations.
pub type Result<T> = std::result::Result<T, NetError>;

impl NetError {
    /// Whether the retry policy applies to this error.
    ///
    /// Only transient transport failures are retried; decode errors and
    /// remote handler failures are surfaced immediately, and a connect
    /// timeout has already consumed its full deadline.
    pub fn is_retryable(&self) -> bool {
        matches!(self, NetError::Unavailable(_) | NetError::Io(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = NetError::Unavailable("connection refused".to_string());
        assert_eq!(err.to_string(), "peer unavailable: connection refused");
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe closed");
        let err: NetError = io_err.into();
        assert!(err.to_string().contains("IO error"));
    }

    #[test]
    fn test_retryability() {
        assert!(NetError::Unavailable("x".into()).is_retryable());
        assert!(NetError::Io(std::io::Error::other("x")).is_retryable());
        assert!(!NetError::Decode("bad dtype".into()).is_retryable());
        assert!(!NetError::Remote("handler failed".into()).is_retryable());
        assert!(!NetError::ConnectionTimeout {
            peer: "a".into(),
            timeout: Duration::from_secs(10)
        }
        .is_retryable());
    }
}
