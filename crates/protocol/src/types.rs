use std::fmt;

use serde::{Deserialize, Serialize};

/// Classification of a transfer failure.
///
/// Every backend maps its native errors onto one of these kinds; retry
/// policies and exit codes are decided on the kind alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Connectivity loss, timeout, reset. Retryable.
    TransientNetwork,
    /// Data corrupted in transit. Retryable (the part is re-sent).
    ChecksumMismatch,
    /// Credentials rejected. Fatal.
    Auth,
    /// Destination refuses for capacity or policy reasons. Fatal.
    QuotaExceeded,
    /// Finalize attempted without every part staged. Recoverable by resuming.
    IncompleteUpload,
    /// Malformed key, length mismatch, protocol violation. Fatal.
    InvalidRequest,
    /// Deadline expired or the caller cancelled.
    Cancelled,
}

impl ErrorKind {
    /// Returns `true` for the kinds retried by the default policy.
    pub fn is_retryable_by_default(self) -> bool {
        matches!(self, Self::TransientNetwork | Self::ChecksumMismatch)
    }

    /// Numeric code used in wire error envelopes.
    pub fn code(self) -> i32 {
        match self {
            Self::TransientNetwork => 503,
            Self::ChecksumMismatch => 422,
            Self::Auth => 401,
            Self::QuotaExceeded => 507,
            Self::IncompleteUpload => 409,
            Self::InvalidRequest => 400,
            Self::Cancelled => 499,
        }
    }

    /// Maps a wire error code back to a kind.
    ///
    /// Unknown 5xx codes are treated as transient, anything else as an
    /// invalid request.
    pub fn from_code(code: i32) -> Self {
        match code {
            503 => Self::TransientNetwork,
            422 => Self::ChecksumMismatch,
            401 | 403 => Self::Auth,
            507 => Self::QuotaExceeded,
            409 => Self::IncompleteUpload,
            499 => Self::Cancelled,
            500..=599 => Self::TransientNetwork,
            _ => Self::InvalidRequest,
        }
    }

    /// Short stable name (used in CLI summaries and logs).
    pub fn as_str(self) -> &'static str {
        match self {
            Self::TransientNetwork => "transient_network",
            Self::ChecksumMismatch => "checksum_mismatch",
            Self::Auth => "auth",
            Self::QuotaExceeded => "quota_exceeded",
            Self::IncompleteUpload => "incomplete_upload",
            Self::InvalidRequest => "invalid_request",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Backend acknowledgement for one uploaded part.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartReceipt {
    pub sequence_index: u32,
    pub offset: u64,
    pub length: u64,
    /// SHA-256 hex digest of the part bytes.
    pub checksum: String,
    /// Backend-specific tag (object-store ETag), if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
}

/// Lifecycle state of a part.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum PartStatus {
    Pending,
    InFlight,
    Committed { receipt: PartReceipt },
    Failed { kind: ErrorKind },
}

/// A contiguous byte range of a larger transfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Part {
    pub sequence_index: u32,
    pub offset: u64,
    pub length: u64,
    pub status: PartStatus,
}

impl Part {
    /// Creates a pending part.
    pub fn new(sequence_index: u32, offset: u64, length: u64) -> Self {
        Self {
            sequence_index,
            offset,
            length,
            status: PartStatus::Pending,
        }
    }

    /// Exclusive end offset.
    pub fn end(&self) -> u64 {
        self.offset + self.length
    }

    pub fn is_committed(&self) -> bool {
        matches!(self.status, PartStatus::Committed { .. })
    }

    /// Returns the receipt if the part is committed.
    pub fn receipt(&self) -> Option<&PartReceipt> {
        match &self.status {
            PartStatus::Committed { receipt } => Some(receipt),
            _ => None,
        }
    }

    /// Returns `true` if `receipt` acknowledges exactly this byte range.
    pub fn matches_receipt(&self, receipt: &PartReceipt) -> bool {
        receipt.sequence_index == self.sequence_index
            && receipt.offset == self.offset
            && receipt.length == self.length
    }
}

/// The object produced by a successful finalize.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FinalizedObject {
    pub key: String,
    pub size: u64,
    pub part_count: u32,
    /// SHA-256 of the assembled object when the backend computes one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
}

/// Final outcome of a transfer attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferStatus {
    Succeeded,
    Partial,
    Failed,
}

impl fmt::Display for TransferStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Succeeded => "succeeded",
            Self::Partial => "partial",
            Self::Failed => "failed",
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn receipt(index: u32) -> PartReceipt {
        PartReceipt {
            sequence_index: index,
            offset: u64::from(index) * 4,
            length: 4,
            checksum: "ab".repeat(32),
            etag: None,
        }
    }

    #[test]
    fn error_kind_code_roundtrip() {
        for kind in [
            ErrorKind::TransientNetwork,
            ErrorKind::ChecksumMismatch,
            ErrorKind::Auth,
            ErrorKind::QuotaExceeded,
            ErrorKind::IncompleteUpload,
            ErrorKind::InvalidRequest,
            ErrorKind::Cancelled,
        ] {
            assert_eq!(ErrorKind::from_code(kind.code()), kind);
        }
    }

    #[test]
    fn unknown_codes_are_classified() {
        assert_eq!(ErrorKind::from_code(502), ErrorKind::TransientNetwork);
        assert_eq!(ErrorKind::from_code(403), ErrorKind::Auth);
        assert_eq!(ErrorKind::from_code(418), ErrorKind::InvalidRequest);
    }

    #[test]
    fn default_retryability() {
        assert!(ErrorKind::TransientNetwork.is_retryable_by_default());
        assert!(ErrorKind::ChecksumMismatch.is_retryable_by_default());
        assert!(!ErrorKind::Auth.is_retryable_by_default());
        assert!(!ErrorKind::QuotaExceeded.is_retryable_by_default());
        assert!(!ErrorKind::IncompleteUpload.is_retryable_by_default());
    }

    #[test]
    fn error_kind_serialization() {
        assert_eq!(
            serde_json::to_string(&ErrorKind::QuotaExceeded).unwrap(),
            "\"quota_exceeded\""
        );
        assert_eq!(ErrorKind::Auth.to_string(), "auth");
    }

    #[test]
    fn part_status_tagged_json() {
        let part = Part::new(0, 0, 4);
        let json = serde_json::to_value(&part).unwrap();
        assert_eq!(json["status"]["state"], "pending");
        assert_eq!(json["sequenceIndex"], 0);

        let committed = Part {
            status: PartStatus::Committed {
                receipt: receipt(0),
            },
            ..part
        };
        let json = serde_json::to_string(&committed).unwrap();
        let parsed: Part = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, committed);
        assert!(parsed.is_committed());
    }

    #[test]
    fn part_matches_receipt() {
        let part = Part::new(2, 8, 4);
        assert!(part.matches_receipt(&receipt(2)));
        assert!(!part.matches_receipt(&receipt(1)));
        assert_eq!(part.end(), 12);
    }

    #[test]
    fn receipt_omits_missing_etag() {
        let json = serde_json::to_string(&receipt(1)).unwrap();
        assert!(!json.contains("etag"));
    }
}
