//! Error types for the data channel.

use chunkferry_protocol::{ErrorKind, WireError};

/// Errors produced by the TCP data channel.
#[derive(Debug, thiserror::Error)]
pub enum DataChannelError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("authentication failed: {0}")]
    AuthFailed(String),

    #[error("connection timed out")]
    Timeout,

    #[error("cancelled")]
    Cancelled,

    #[error("protocol error: {0}")]
    Protocol(String),

    /// Replies no longer line up with requests on this connection.
    #[error("connection out of sync: {0}")]
    OutOfSync(String),

    /// The receiver answered with an error envelope.
    #[error("receiver error: {0}")]
    Remote(WireError),
}

impl DataChannelError {
    /// Classifies the error. Transport failures are transient; a broken
    /// conversation is an invalid request.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Io(_) | Self::Timeout | Self::OutOfSync(_) => ErrorKind::TransientNetwork,
            Self::AuthFailed(_) => ErrorKind::Auth,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::Json(_) | Self::Protocol(_) => ErrorKind::InvalidRequest,
            Self::Remote(e) => e.kind(),
        }
    }

    /// Returns `true` if the connection can no longer be used.
    pub fn breaks_connection(&self) -> bool {
        !matches!(self, Self::Remote(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds() {
        let io = DataChannelError::Io(std::io::Error::from(std::io::ErrorKind::BrokenPipe));
        assert_eq!(io.kind(), ErrorKind::TransientNetwork);
        assert!(io.breaks_connection());
        assert_eq!(DataChannelError::Timeout.kind(), ErrorKind::TransientNetwork);
        assert_eq!(
            DataChannelError::AuthFailed("no".into()).kind(),
            ErrorKind::Auth
        );

        let remote = DataChannelError::Remote(WireError {
            code: ErrorKind::QuotaExceeded.code(),
            message: "full".into(),
        });
        assert_eq!(remote.kind(), ErrorKind::QuotaExceeded);
        assert!(!remote.breaks_connection());

        let stale = DataChannelError::OutOfSync("reply id 2 does not match request 3".into());
        assert_eq!(stale.kind(), ErrorKind::TransientNetwork);
        assert!(stale.breaks_connection());
    }
}
