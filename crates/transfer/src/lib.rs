//! Chunked transfer planning, part I/O, verification and resume support.

mod chunked;
mod journal;
mod ledger;
mod plan;
mod planner;
mod progress;
mod staging;
mod validation;
mod verify;

use chunkferry_protocol::ErrorKind;

pub use chunked::{
    FileSource, MemorySource, PartSource, calculate_file_checksum, checksum_bytes,
};
pub use journal::{Journal, JournalRecord};
pub use ledger::{LedgerSnapshot, PartLedger};
pub use plan::{TransferFailure, TransferPlan, TransferResult};
pub use planner::{PartPlan, plan};
pub use progress::{ProgressCallback, ProgressTracker, SpeedCalculator};
pub use staging::StagingArea;
pub use validation::validate_key;
pub use verify::{IntegrityVerifier, Verification};

/// Default part size: 4 MiB.
///
/// Larger parts reduce per-part overhead (SHA-256, receipts, round trips);
/// object stores usually require at least 5 MiB for every part but the last.
pub const DEFAULT_PART_SIZE: u64 = 4 * 1024 * 1024;

/// Errors produced by the transfer crate.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("checksum mismatch")]
    ChecksumMismatch,

    #[error("part size must be greater than zero (got {0})")]
    InvalidPartSize(u64),

    #[error("{total_size} bytes in parts of {part_size} exceeds the part index range")]
    TooManyParts { total_size: u64, part_size: u64 },

    #[error("invalid key: {0}")]
    InvalidKey(String),

    #[error("part length mismatch: expected {expected} bytes, got {actual}")]
    LengthMismatch { expected: u64, actual: u64 },

    #[error("part {index} is out of range for the source")]
    PartOutOfRange { index: u32 },

    #[error("incomplete upload: {0}")]
    IncompleteUpload(String),

    #[error("quota exceeded: {used} + {requested} bytes over limit of {limit}")]
    QuotaExceeded { used: u64, requested: u64, limit: u64 },

    #[error("journal does not match this transfer: {0}")]
    JournalMismatch(String),
}

impl TransferError {
    /// Classifies the error for callers that retry or report over the wire.
    ///
    /// A full disk counts as `QuotaExceeded`; any other I/O failure is
    /// treated as transient.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Io(e) if e.kind() == std::io::ErrorKind::StorageFull => {
                ErrorKind::QuotaExceeded
            }
            Self::Io(_) => ErrorKind::TransientNetwork,
            Self::ChecksumMismatch => ErrorKind::ChecksumMismatch,
            Self::IncompleteUpload(_) => ErrorKind::IncompleteUpload,
            Self::QuotaExceeded { .. } => ErrorKind::QuotaExceeded,
            Self::Json(_)
            | Self::InvalidPartSize(_)
            | Self::TooManyParts { .. }
            | Self::InvalidKey(_)
            | Self::LengthMismatch { .. }
            | Self::PartOutOfRange { .. }
            | Self::JournalMismatch(_) => ErrorKind::InvalidRequest,
        }
    }
}
