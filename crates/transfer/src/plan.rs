use chunkferry_protocol::{ErrorKind, FinalizedObject, Part, PartReceipt, PartStatus, TransferStatus};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{TransferError, validate_key};

/// Everything needed to run (or resume) one transfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferPlan {
    pub transfer_id: Uuid,
    /// Description of the source (usually a path).
    pub source: String,
    pub destination_key: String,
    pub total_size: u64,
    pub part_size: u64,
    pub parts: Vec<Part>,
}

impl TransferPlan {
    /// Plans a new transfer with every part pending.
    pub fn new(
        source: impl Into<String>,
        destination_key: impl Into<String>,
        total_size: u64,
        part_size: u64,
    ) -> Result<Self, TransferError> {
        let destination_key = destination_key.into();
        validate_key(&destination_key)?;
        let parts = crate::plan(total_size, part_size)?.collect();
        Ok(Self {
            transfer_id: Uuid::new_v4(),
            source: source.into(),
            destination_key,
            total_size,
            part_size,
            parts,
        })
    }

    pub fn part_count(&self) -> usize {
        self.parts.len()
    }

    /// Marks a part committed with the backend's receipt.
    pub fn mark_committed(&mut self, receipt: PartReceipt) -> Result<(), TransferError> {
        let part = self
            .parts
            .get_mut(receipt.sequence_index as usize)
            .ok_or(TransferError::PartOutOfRange {
                index: receipt.sequence_index,
            })?;
        if !part.matches_receipt(&receipt) {
            return Err(TransferError::IncompleteUpload(format!(
                "receipt for part {} does not match its range",
                receipt.sequence_index
            )));
        }
        part.status = PartStatus::Committed { receipt };
        Ok(())
    }

    /// Moves an uncommitted part to `status`.
    ///
    /// Committed parts keep their receipt; use [`mark_committed`](Self::mark_committed)
    /// to commit.
    pub fn set_status(&mut self, index: u32, status: PartStatus) {
        if let Some(part) = self.parts.get_mut(index as usize)
            && !part.is_committed()
            && !matches!(status, PartStatus::Committed { .. })
        {
            part.status = status;
        }
    }

    /// Parts that still need uploading, in sequence order.
    pub fn pending_parts(&self) -> impl Iterator<Item = &Part> {
        self.parts.iter().filter(|p| !p.is_committed())
    }

    /// Receipts of every committed part, in sequence order.
    pub fn committed_receipts(&self) -> Vec<PartReceipt> {
        self.parts.iter().filter_map(Part::receipt).cloned().collect()
    }

    pub fn committed_bytes(&self) -> u64 {
        self.parts
            .iter()
            .filter(|p| p.is_committed())
            .map(|p| p.length)
            .sum()
    }

    pub fn is_fully_committed(&self) -> bool {
        self.parts.iter().all(Part::is_committed)
    }

    /// Checks the partition invariant: contiguous indices from 0 covering
    /// `[0, total_size)` without gaps or overlaps.
    pub fn validate(&self) -> Result<(), TransferError> {
        if self.parts.is_empty() {
            return Err(TransferError::IncompleteUpload("plan has no parts".into()));
        }
        let mut cursor = 0u64;
        for (i, part) in self.parts.iter().enumerate() {
            if part.sequence_index as usize != i || part.offset != cursor {
                return Err(TransferError::IncompleteUpload(format!(
                    "part {i} breaks the partition of [0, {})",
                    self.total_size
                )));
            }
            if let Some(receipt) = part.receipt()
                && !part.matches_receipt(receipt)
            {
                return Err(TransferError::IncompleteUpload(format!(
                    "part {i} carries a receipt for another range"
                )));
            }
            cursor = part.end();
        }
        if cursor != self.total_size {
            return Err(TransferError::IncompleteUpload(format!(
                "parts cover {cursor} of {} bytes",
                self.total_size
            )));
        }
        Ok(())
    }
}

/// Why a transfer did not succeed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferFailure {
    /// Part that caused the failure (`None` for finalize or deadline).
    pub part: Option<u32>,
    pub kind: ErrorKind,
    pub attempts: u32,
    pub message: String,
}

/// Outcome of one `transfer` call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferResult {
    pub status: TransferStatus,
    pub committed: Vec<PartReceipt>,
    pub object: Option<FinalizedObject>,
    /// SHA-256 of the source bytes, when every part passed through the hasher.
    pub digest: Option<String>,
    pub failure: Option<TransferFailure>,
    /// The plan with committed parts marked, ready to resume.
    pub plan: TransferPlan,
}

impl TransferResult {
    pub fn is_success(&self) -> bool {
        self.status == TransferStatus::Succeeded
    }

    /// Bytes covered by committed parts.
    pub fn committed_bytes(&self) -> u64 {
        self.committed.iter().map(|r| r.length).sum()
    }

    /// Observed size: the finalized object's size, else the committed bytes.
    pub fn observed_size(&self) -> u64 {
        self.object
            .as_ref()
            .map_or_else(|| self.committed_bytes(), |o| o.size)
    }

    /// Returns the plan to pass to the next `transfer` call.
    pub fn resume_plan(&self) -> TransferPlan {
        self.plan.clone()
    }
}
