use chunkferry_data_channel::DataChannelError;
use chunkferry_protocol::ErrorKind;
use chunkferry_retry::Classify;
use chunkferry_transfer::TransferError;

/// A failed endpoint operation, classified by [`ErrorKind`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct EndpointError {
    pub kind: ErrorKind,
    pub message: String,
}

impl EndpointError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::TransientNetwork, message)
    }

    pub fn checksum_mismatch(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ChecksumMismatch, message)
    }

    pub fn auth(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Auth, message)
    }

    pub fn quota_exceeded(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::QuotaExceeded, message)
    }

    pub fn incomplete(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::IncompleteUpload, message)
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidRequest, message)
    }

    /// Retryable under the default classification.
    pub fn is_retryable(&self) -> bool {
        self.kind.is_retryable_by_default()
    }
}

impl Classify for EndpointError {
    fn kind(&self) -> ErrorKind {
        self.kind
    }
}

impl From<TransferError> for EndpointError {
    fn from(e: TransferError) -> Self {
        Self::new(e.kind(), e.to_string())
    }
}

impl From<DataChannelError> for EndpointError {
    fn from(e: DataChannelError) -> Self {
        match e {
            DataChannelError::Remote(wire) => Self::new(wire.kind(), wire.message),
            other => Self::new(other.kind(), other.to_string()),
        }
    }
}

impl From<reqwest::Error> for EndpointError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_builder() {
            Self::invalid_request(e.to_string())
        } else {
            Self::transient(e.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chunkferry_protocol::WireError;

    #[test]
    fn retryable_kinds() {
        assert!(EndpointError::transient("reset").is_retryable());
        assert!(EndpointError::checksum_mismatch("bad").is_retryable());
        assert!(!EndpointError::auth("denied").is_retryable());
        assert!(!EndpointError::quota_exceeded("full").is_retryable());
        assert!(!EndpointError::incomplete("gap").is_retryable());
    }

    #[test]
    fn from_transfer_error() {
        let e: EndpointError = TransferError::ChecksumMismatch.into();
        assert_eq!(e.kind, ErrorKind::ChecksumMismatch);
        let e: EndpointError = TransferError::QuotaExceeded {
            used: 1,
            requested: 2,
            limit: 2,
        }
        .into();
        assert_eq!(e.kind, ErrorKind::QuotaExceeded);
    }

    #[test]
    fn from_remote_error_keeps_message() {
        let e: EndpointError = DataChannelError::Remote(WireError {
            code: ErrorKind::IncompleteUpload.code(),
            message: "missing part 1".into(),
        })
        .into();
        assert_eq!(e, EndpointError::incomplete("missing part 1"));
    }

    #[test]
    fn display_includes_kind() {
        let e = EndpointError::auth("token rejected");
        assert_eq!(e.to_string(), format!("{}: token rejected", ErrorKind::Auth));
    }
}
