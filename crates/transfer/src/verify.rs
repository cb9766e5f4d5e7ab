use std::fmt;
use std::path::Path;

use chunkferry_protocol::TransferStatus;

use crate::{TransferError, TransferResult, calculate_file_checksum};

/// Outcome of checking a transfer (or a stored object) against expectations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verification {
    Verified,
    NotSucceeded(TransferStatus),
    SizeMismatch { expected: u64, actual: u64 },
    HashMismatch { expected: String, actual: String },
    InvalidHash(String),
}

impl Verification {
    pub fn is_verified(&self) -> bool {
        matches!(self, Self::Verified)
    }
}

impl fmt::Display for Verification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Verified => f.write_str("verified"),
            Self::NotSucceeded(status) => write!(f, "transfer did not succeed ({status})"),
            Self::SizeMismatch { expected, actual } => {
                write!(f, "size mismatch: expected {expected} bytes, got {actual}")
            }
            Self::HashMismatch { expected, actual } => {
                write!(f, "sha256 mismatch: expected {expected}, got {actual}")
            }
            Self::InvalidHash(value) => write!(f, "not a hex digest: {value}"),
        }
    }
}

/// Checks transfer results against an expected size and optional SHA-256.
pub struct IntegrityVerifier;

impl IntegrityVerifier {
    /// Returns `true` only for a succeeded transfer whose observed size
    /// matches and, when both sides have one, whose digest matches.
    pub fn verify(result: &TransferResult, expected_size: u64, expected_hash: Option<&str>) -> bool {
        Self::check(result, expected_size, expected_hash).is_verified()
    }

    /// Like [`verify`](Self::verify), but reports what did not match.
    pub fn check(
        result: &TransferResult,
        expected_size: u64,
        expected_hash: Option<&str>,
    ) -> Verification {
        if result.status != TransferStatus::Succeeded {
            return Verification::NotSucceeded(result.status);
        }
        let actual = result.observed_size();
        if actual != expected_size {
            return Verification::SizeMismatch {
                expected: expected_size,
                actual,
            };
        }
        match (expected_hash, result.digest.as_deref()) {
            (Some(expected), Some(actual)) => compare_hex(expected, actual),
            _ => Verification::Verified,
        }
    }

    /// Checks a local file against an expected size and optional SHA-256.
    pub fn check_file(
        path: &Path,
        expected_size: u64,
        expected_hash: Option<&str>,
    ) -> Result<Verification, TransferError> {
        let actual = std::fs::metadata(path)?.len();
        if actual != expected_size {
            return Ok(Verification::SizeMismatch {
                expected: expected_size,
                actual,
            });
        }
        match expected_hash {
            Some(expected) => Ok(compare_hex(expected, &Self::file_digest(path)?)),
            None => Ok(Verification::Verified),
        }
    }

    /// Hex SHA-256 of a local file.
    pub fn file_digest(path: &Path) -> Result<String, TransferError> {
        calculate_file_checksum(path)
    }
}

fn compare_hex(expected: &str, actual: &str) -> Verification {
    let Ok(want) = hex::decode(expected.trim()) else {
        return Verification::InvalidHash(expected.to_string());
    };
    let Ok(got) = hex::decode(actual.trim()) else {
        return Verification::InvalidHash(actual.to_string());
    };
    if want == got {
        Verification::Verified
    } else {
        Verification::HashMismatch {
            expected: expected.to_string(),
            actual: actual.to_string(),
        }
    }
}
