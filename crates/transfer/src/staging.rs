//! Receiver-side part staging and object assembly.
//!
//! Parts land in a per-key staging directory next to a small JSON receipt;
//! `assemble` concatenates them in sequence order into the final object.
//!
//! ```text
//! <root>/.chunkferry-staging/<key digest>/<index>.part
//! <root>/.chunkferry-staging/<key digest>/<index>.json
//! <root>/<key>
//! ```

use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use chunkferry_protocol::{FinalizedObject, Part, PartReceipt};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::{TransferError, checksum_bytes, validate_key};

/// Name of the staging directory under the root.
pub const STAGING_DIR: &str = ".chunkferry-staging";

/// Stages parts on disk and assembles them into objects.
#[derive(Debug, Clone)]
pub struct StagingArea {
    root: PathBuf,
    quota_bytes: Option<u64>,
}

impl StagingArea {
    /// Creates a staging area rooted at `root`.
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
            quota_bytes: None,
        }
    }

    /// Limits the total bytes (objects plus staged part data) under the root.
    pub fn with_quota(mut self, quota_bytes: Option<u64>) -> Self {
        self.quota_bytes = quota_bytes;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of the assembled object for `key`.
    pub fn object_path(&self, key: &str) -> Result<PathBuf, TransferError> {
        validate_key(key)?;
        Ok(self.root.join(key))
    }

    /// Returns `true` if an assembled object exists at `key`.
    pub fn exists(&self, key: &str) -> Result<bool, TransferError> {
        Ok(self.object_path(key)?.is_file())
    }

    /// Writes one part to the staging directory.
    ///
    /// - Verifies the length against the part descriptor.
    /// - Verifies `checksum` if non-empty.
    /// - Re-staging an index overwrites the previous copy.
    pub fn stage_part(
        &self,
        key: &str,
        part: &Part,
        data: &[u8],
        checksum: &str,
    ) -> Result<PartReceipt, TransferError> {
        validate_key(key)?;

        if data.len() as u64 != part.length {
            return Err(TransferError::LengthMismatch {
                expected: part.length,
                actual: data.len() as u64,
            });
        }

        let actual = checksum_bytes(data);
        if !checksum.is_empty() && !checksum.eq_ignore_ascii_case(&actual) {
            return Err(TransferError::ChecksumMismatch);
        }

        if let Some(limit) = self.quota_bytes {
            // A re-sent index replaces its previous copy.
            let replaced = match fs::metadata(self.part_path(key, part.sequence_index)) {
                Ok(m) => m.len(),
                Err(e) if e.kind() == io::ErrorKind::NotFound => 0,
                Err(e) => return Err(e.into()),
            };
            let used = self.used_bytes()?.saturating_sub(replaced);
            if used + part.length > limit {
                return Err(TransferError::QuotaExceeded {
                    used,
                    requested: part.length,
                    limit,
                });
            }
        }

        let dir = self.upload_dir(key);
        fs::create_dir_all(&dir)?;

        let part_path = self.part_path(key, part.sequence_index);
        let tmp_path = dir.join(format!("{}.part.tmp", part.sequence_index));
        {
            let mut file = File::create(&tmp_path)?;
            file.write_all(data)?;
            file.sync_data()?;
        }
        fs::rename(&tmp_path, &part_path)?;

        let receipt = PartReceipt {
            sequence_index: part.sequence_index,
            offset: part.offset,
            length: part.length,
            checksum: actual,
            etag: None,
        };
        let meta_path = dir.join(format!("{}.json", part.sequence_index));
        fs::write(&meta_path, serde_json::to_vec(&receipt)?)?;

        debug!(key, index = part.sequence_index, bytes = part.length, "part staged");
        Ok(receipt)
    }

    /// Returns the receipt of a staged part, if it is present and intact.
    pub fn staged_part(&self, key: &str, index: u32) -> Result<Option<PartReceipt>, TransferError> {
        validate_key(key)?;
        let dir = self.upload_dir(key);
        let meta_path = dir.join(format!("{index}.json"));
        let part_path = self.part_path(key, index);

        let meta = match fs::read(&meta_path) {
            Ok(m) => m,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let receipt: PartReceipt = serde_json::from_slice(&meta)?;

        match fs::metadata(&part_path) {
            Ok(m) if m.len() == receipt.length => Ok(Some(receipt)),
            Ok(_) => Ok(None),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Number of parts currently staged for `key`.
    pub fn staged_count(&self, key: &str) -> Result<usize, TransferError> {
        validate_key(key)?;
        let dir = self.upload_dir(key);
        let entries = match fs::read_dir(&dir) {
            Ok(e) => e,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };
        let mut count = 0;
        for entry in entries {
            let name = entry?.file_name();
            if name.to_string_lossy().ends_with(".part") {
                count += 1;
            }
        }
        Ok(count)
    }

    /// Concatenates the staged parts named by `receipts` into the object.
    ///
    /// Fails with [`TransferError::IncompleteUpload`] unless the receipts
    /// form a contiguous `0..n` run whose parts are all staged intact.
    /// Staged indices beyond the receipts (left by an earlier run with a
    /// different layout) are discarded with the staging directory.
    pub fn assemble(
        &self,
        key: &str,
        receipts: &[PartReceipt],
    ) -> Result<FinalizedObject, TransferError> {
        let object_path = self.object_path(key)?;

        if receipts.is_empty() {
            return Err(TransferError::IncompleteUpload("no parts to finalize".into()));
        }

        let mut ordered: Vec<&PartReceipt> = receipts.iter().collect();
        ordered.sort_by_key(|r| r.sequence_index);

        let mut expected_offset = 0u64;
        for (i, receipt) in ordered.iter().enumerate() {
            if receipt.sequence_index as usize != i {
                return Err(TransferError::IncompleteUpload(format!(
                    "missing part {i}"
                )));
            }
            if receipt.offset != expected_offset {
                return Err(TransferError::IncompleteUpload(format!(
                    "part {i} starts at {} but {expected_offset} was expected",
                    receipt.offset
                )));
            }
            expected_offset += receipt.length;

            match self.staged_part(key, receipt.sequence_index)? {
                Some(staged) if staged.checksum.eq_ignore_ascii_case(&receipt.checksum)
                    && staged.length == receipt.length => {}
                Some(_) => {
                    return Err(TransferError::IncompleteUpload(format!(
                        "part {i} does not match its receipt"
                    )));
                }
                None => {
                    return Err(TransferError::IncompleteUpload(format!(
                        "part {i} is not staged"
                    )));
                }
            }
        }

        let staged = self.staged_count(key)?;
        if staged > ordered.len() {
            debug!(key, staged, receipts = ordered.len(), "discarding stale staged parts");
        }

        if let Some(parent) = object_path.parent() {
            fs::create_dir_all(parent)?;
        }

        let dir = self.upload_dir(key);
        let tmp_path = dir.join("assembled.tmp");
        let mut hasher = Sha256::new();
        let mut size = 0u64;
        {
            let mut out = OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(&tmp_path)?;
            let mut buf = vec![0u8; 64 * 1024];
            for receipt in &ordered {
                let mut part = File::open(dir.join(format!("{}.part", receipt.sequence_index)))?;
                loop {
                    let n = part.read(&mut buf)?;
                    if n == 0 {
                        break;
                    }
                    hasher.update(&buf[..n]);
                    out.write_all(&buf[..n])?;
                    size += n as u64;
                }
            }
            out.sync_all()?;
        }
        fs::rename(&tmp_path, &object_path)?;
        fs::remove_dir_all(&dir)?;

        debug!(key, size, parts = ordered.len(), "object assembled");

        Ok(FinalizedObject {
            key: key.to_string(),
            size,
            part_count: ordered.len() as u32,
            checksum: Some(hex::encode(hasher.finalize())),
            etag: None,
        })
    }

    /// Discards every staged part for `key`.
    pub fn abort(&self, key: &str) -> Result<(), TransferError> {
        validate_key(key)?;
        match fs::remove_dir_all(self.upload_dir(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn part_path(&self, key: &str, index: u32) -> PathBuf {
        self.upload_dir(key).join(format!("{index}.part"))
    }

    /// Bytes counted against the quota: assembled objects and staged part
    /// data. Receipts and temporary files are not counted.
    fn used_bytes(&self) -> Result<u64, TransferError> {
        let staging = self.root.join(STAGING_DIR);
        let objects = dir_size(&self.root, &|path, _| path != staging.as_path())?;
        let parts = dir_size(&staging, &|path, is_dir| {
            is_dir || path.extension().is_some_and(|ext| ext == "part")
        })?;
        Ok(objects + parts)
    }

    fn upload_dir(&self, key: &str) -> PathBuf {
        let digest = checksum_bytes(key.as_bytes());
        self.root.join(STAGING_DIR).join(&digest[..32])
    }
}

/// Total size of the regular files below `path` accepted by `include`,
/// which is called with each entry's path and whether it is a directory.
/// Rejected directories are not descended into.
fn dir_size(path: &Path, include: &dyn Fn(&Path, bool) -> bool) -> Result<u64, TransferError> {
    let entries = match fs::read_dir(path) {
        Ok(e) => e,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(e.into()),
    };
    let mut total = 0;
    for entry in entries {
        let entry = entry?;
        let path = entry.path();
        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            if include(&path, true) {
                total += dir_size(&path, include)?;
            }
        } else if file_type.is_file() && include(&path, false) {
            total += entry.metadata()?.len();
        }
    }
    Ok(total)
}
