//! Events, requests and outcomes of the transfer flow.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use chunkferry_protocol::{ErrorKind, TransferStatus};
use chunkferry_transfer::{TransferResult, Verification};

/// Event emitted while a transfer runs.
#[derive(Debug, Clone, PartialEq)]
pub enum TransferEvent {
    /// The coordinator accepted a plan.
    Started {
        transfer_id: String,
        key: String,
        total_bytes: u64,
        total_parts: u32,
        /// Parts already committed by an earlier run.
        committed_parts: u32,
    },
    /// A part was committed in this run.
    PartCommitted {
        index: u32,
        attempts: u32,
        /// The receipt came from `committed_part` rather than a fresh upload.
        deduplicated: bool,
    },
    /// A part was committed by an earlier run and not re-sent.
    PartSkipped { index: u32 },
    /// An operation failed and will be retried after `delay`.
    Retrying {
        /// `None` for finalize.
        index: Option<u32>,
        attempt: u32,
        delay: Duration,
        kind: ErrorKind,
        error: String,
    },
    /// Committed progress.
    Progress {
        committed_bytes: u64,
        total_bytes: u64,
        committed_parts: u32,
        total_parts: u32,
        bytes_per_second: f64,
        eta: Option<Duration>,
    },
    /// The object was assembled.
    Finalized { key: String, size: u64 },
    /// The transfer ended without a finalized object.
    Failed {
        status: TransferStatus,
        index: Option<u32>,
        kind: ErrorKind,
        error: String,
    },
}

/// A file to send with [`TransferCoordinator::transfer_file`](crate::TransferCoordinator::transfer_file).
#[derive(Debug, Clone)]
pub struct FileTransfer {
    pub source: PathBuf,
    pub key: String,
    pub part_size: u64,
    /// Keep a journal beside the source and resume from it.
    pub journal: bool,
    /// Expected SHA-256 of the source; falls back to the object's checksum.
    pub expected_sha256: Option<String>,
}

/// Result of a file transfer plus its verification.
#[derive(Debug, Clone)]
pub struct FileOutcome {
    pub result: TransferResult,
    pub verification: Verification,
    /// The plan was restored from a journal.
    pub resumed: bool,
}

impl FileOutcome {
    pub fn exit_status(&self) -> ExitStatus {
        ExitStatus::from_result(&self.result, &self.verification)
    }

    /// One-line description for operators.
    pub fn summary(&self) -> String {
        let mut line = summarize(&self.result);
        if self.result.is_success() && !self.verification.is_verified() {
            line.push_str(&format!("; verification failed: {}", self.verification));
        }
        line
    }
}

/// Process exit status for a transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitStatus {
    /// Finalized and verified.
    Success,
    /// Partial, or failed for a reason a rerun may fix.
    Resumable,
    /// Failed for a reason a rerun cannot fix, or verification failed.
    Fatal,
}

impl ExitStatus {
    pub fn from_result(result: &TransferResult, verification: &Verification) -> Self {
        match result.status {
            TransferStatus::Succeeded if verification.is_verified() => Self::Success,
            TransferStatus::Succeeded => Self::Fatal,
            TransferStatus::Partial => Self::Resumable,
            TransferStatus::Failed => match &result.failure {
                Some(f) if f.kind.is_retryable_by_default() => Self::Resumable,
                _ => Self::Fatal,
            },
        }
    }

    pub fn code(self) -> i32 {
        match self {
            Self::Success => 0,
            Self::Resumable => 1,
            Self::Fatal => 2,
        }
    }
}

impl fmt::Display for ExitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Success => "success",
            Self::Resumable => "resumable",
            Self::Fatal => "fatal",
        })
    }
}

/// Formats a result as `<status>: <committed>/<total> parts committed[; cause]`.
pub fn summarize(result: &TransferResult) -> String {
    let mut line = format!(
        "{}: {}/{} parts committed",
        result.status,
        result.committed.len(),
        result.plan.part_count()
    );
    if let Some(f) = &result.failure {
        match f.part {
            Some(index) => line.push_str(&format!("; part {index} failed with {}", f.kind)),
            None => line.push_str(&format!("; failed with {}", f.kind)),
        }
        line.push_str(&format!(" after {} attempt(s): {}", f.attempts, f.message));
    }
    line
}
