use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{TransferError, TransferPlan};

/// Current journal format version.
pub const JOURNAL_VERSION: u32 = 1;

const JOURNAL_SUFFIX: &str = ".chunkferry-journal.json";

/// Persisted state of an interrupted transfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JournalRecord {
    pub version: u32,
    /// Name of the endpoint the parts were committed to.
    pub endpoint: String,
    pub updated_at: DateTime<Utc>,
    pub plan: TransferPlan,
}

impl JournalRecord {
    /// Returns the journaled plan if it describes the same transfer.
    pub fn resume_plan(
        &self,
        endpoint: &str,
        destination_key: &str,
        total_size: u64,
        part_size: u64,
    ) -> Result<TransferPlan, TransferError> {
        if self.version != JOURNAL_VERSION {
            return Err(TransferError::JournalMismatch(format!(
                "unsupported journal version {}",
                self.version
            )));
        }
        if self.endpoint != endpoint {
            return Err(TransferError::JournalMismatch(format!(
                "journal targets endpoint {}",
                self.endpoint
            )));
        }
        let plan = &self.plan;
        if plan.destination_key != destination_key {
            return Err(TransferError::JournalMismatch(format!(
                "journal targets key {}",
                plan.destination_key
            )));
        }
        if plan.total_size != total_size {
            return Err(TransferError::JournalMismatch(format!(
                "source size changed from {} to {total_size}",
                plan.total_size
            )));
        }
        if plan.part_size != part_size {
            return Err(TransferError::JournalMismatch(format!(
                "journal uses part size {}",
                plan.part_size
            )));
        }
        plan.validate()
            .map_err(|e| TransferError::JournalMismatch(e.to_string()))?;
        Ok(plan.clone())
    }
}

/// Side file recording committed parts so a later run can resume.
#[derive(Debug, Clone)]
pub struct Journal {
    path: PathBuf,
}

impl Journal {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Journal stored next to `source`, e.g. `video.mkv.chunkferry-journal.json`.
    pub fn beside(source: &Path) -> Self {
        let mut name = source
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(JOURNAL_SUFFIX);
        Self::new(source.with_file_name(name))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Loads the journal, returning `None` if it does not exist.
    pub fn load(&self) -> Result<Option<JournalRecord>, TransferError> {
        let data = match std::fs::read(&self.path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let record = serde_json::from_slice(&data)?;
        Ok(Some(record))
    }

    /// Writes the plan atomically (temp file + rename).
    pub fn save(&self, endpoint: &str, plan: &TransferPlan) -> Result<(), TransferError> {
        let record = JournalRecord {
            version: JOURNAL_VERSION,
            endpoint: endpoint.to_string(),
            updated_at: Utc::now(),
            plan: plan.clone(),
        };
        let data = serde_json::to_vec_pretty(&record)?;

        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);
        std::fs::write(&tmp, data)?;
        std::fs::rename(&tmp, &self.path)?;

        debug!(
            path = %self.path.display(),
            committed = plan.committed_receipts().len(),
            "journal saved"
        );
        Ok(())
    }

    /// Deletes the journal. Missing files are not an error.
    pub fn remove(&self) -> Result<(), TransferError> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
