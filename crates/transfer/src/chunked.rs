use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use chunkferry_protocol::Part;
use sha2::{Digest, Sha256};

use crate::TransferError;

// ---------------------------------------------------------------------------
// Checksum helpers
// ---------------------------------------------------------------------------

/// Computes SHA-256 of `data` and returns the hex-encoded digest.
pub fn checksum_bytes(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Computes SHA-256 of an entire file and returns the hex-encoded digest.
pub fn calculate_file_checksum(path: &Path) -> Result<String, TransferError> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 8192];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

// ---------------------------------------------------------------------------
// Part sources
// ---------------------------------------------------------------------------

/// Something parts can be read from.
///
/// Reads are blocking; async callers run them on the blocking pool.
pub trait PartSource: Send + Sync {
    /// Total size of the source in bytes.
    fn size(&self) -> u64;

    /// Reads exactly `part.length` bytes starting at `part.offset`.
    fn read_part(&self, part: &Part) -> Result<Vec<u8>, TransferError>;

    /// Human-readable description used in plans and logs.
    fn describe(&self) -> String;
}

/// Reads parts from a local file.
///
/// Each read opens its own handle, so concurrent reads never share a
/// cursor.
#[derive(Debug, Clone)]
pub struct FileSource {
    path: PathBuf,
    size: u64,
}

impl FileSource {
    /// Opens `path` and records its current size.
    pub fn open(path: &Path) -> Result<Self, TransferError> {
        let size = std::fs::metadata(path)?.len();
        Ok(Self {
            path: path.to_path_buf(),
            size,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl PartSource for FileSource {
    fn size(&self) -> u64 {
        self.size
    }

    fn read_part(&self, part: &Part) -> Result<Vec<u8>, TransferError> {
        if part.end() > self.size {
            return Err(TransferError::PartOutOfRange {
                index: part.sequence_index,
            });
        }
        let mut file = File::open(&self.path)?;
        file.seek(SeekFrom::Start(part.offset))?;
        let mut buf = vec![0u8; part.length as usize];
        file.read_exact(&mut buf)?;
        Ok(buf)
    }

    fn describe(&self) -> String {
        self.path.to_string_lossy().into_owned()
    }
}

/// Serves parts from an in-memory buffer.
#[derive(Debug, Clone)]
pub struct MemorySource {
    name: String,
    data: Vec<u8>,
}

impl MemorySource {
    pub fn new(name: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            data,
        }
    }
}

impl PartSource for MemorySource {
    fn size(&self) -> u64 {
        self.data.len() as u64
    }

    fn read_part(&self, part: &Part) -> Result<Vec<u8>, TransferError> {
        let start = part.offset as usize;
        let end = part.end() as usize;
        self.data
            .get(start..end)
            .map(<[u8]>::to_vec)
            .ok_or(TransferError::PartOutOfRange {
                index: part.sequence_index,
            })
    }

    fn describe(&self) -> String {
        self.name.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    fn create_test_file(dir: &Path, name: &str, data: &[u8]) -> PathBuf {
        let path = dir.join(name);
        let mut f = File::create(&path).unwrap();
        f.write_all(data).unwrap();
        path
    }

    #[test]
    fn checksum_bytes_deterministic() {
        let c1 = checksum_bytes(b"hello world");
        let c2 = checksum_bytes(b"hello world");
        assert_eq!(c1, c2);
        assert_eq!(c1.len(), 64); // SHA-256 = 64 hex chars.
    }

    #[test]
    fn checksum_bytes_different_data() {
        assert_ne!(checksum_bytes(b"hello"), checksum_bytes(b"world"));
    }

    #[test]
    fn calculate_file_checksum_matches_bytes() {
        let dir = TempDir::new().unwrap();
        let data = b"test content for checksum";
        let path = create_test_file(dir.path(), "test.bin", data);

        let file_cs = calculate_file_checksum(&path).unwrap();
        assert_eq!(file_cs, checksum_bytes(data));
    }

    #[test]
    fn file_source_reads_parts() {
        let dir = TempDir::new().unwrap();
        let path = create_test_file(dir.path(), "test.bin", b"AABBCCDDEE");

        let source = FileSource::open(&path).unwrap();
        assert_eq!(source.size(), 10);
        assert_eq!(source.read_part(&Part::new(0, 0, 4)).unwrap(), b"AABB");
        assert_eq!(source.read_part(&Part::new(1, 4, 4)).unwrap(), b"CCDD");
        assert_eq!(source.read_part(&Part::new(2, 8, 2)).unwrap(), b"EE");
    }

    #[test]
    fn file_source_zero_length_part() {
        let dir = TempDir::new().unwrap();
        let path = create_test_file(dir.path(), "empty.bin", b"");
        let source = FileSource::open(&path).unwrap();
        assert!(source.read_part(&Part::new(0, 0, 0)).unwrap().is_empty());
    }

    #[test]
    fn file_source_rejects_out_of_range() {
        let dir = TempDir::new().unwrap();
        let path = create_test_file(dir.path(), "test.bin", b"0123");
        let source = FileSource::open(&path).unwrap();
        assert!(matches!(
            source.read_part(&Part::new(1, 2, 4)),
            Err(TransferError::PartOutOfRange { index: 1 })
        ));
    }

    #[test]
    fn memory_source_reads_parts() {
        let source = MemorySource::new("mem", b"0123456789".to_vec());
        assert_eq!(source.read_part(&Part::new(1, 4, 4)).unwrap(), b"4567");
        assert!(source.read_part(&Part::new(3, 8, 4)).is_err());
        assert_eq!(source.describe(), "mem");
    }
}
