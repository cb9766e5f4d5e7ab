use std::path::{Component, Path};

use crate::TransferError;

/// Maximum key length in bytes (matches common object-store limits).
const MAX_KEY_LEN: usize = 1024;

/// Validates a destination key.
///
/// Keys are relative, `/`-separated names. They end up as paths under a
/// receiver's root directory, so anything that could escape that root is
/// rejected:
/// - Empty keys or keys longer than 1024 bytes
/// - Absolute paths (Unix `/` or Windows `C:\`)
/// - Parent directory traversal (`..`)
/// - Windows prefix components (`C:`, `\\server`) and backslashes
/// - NUL bytes
pub fn validate_key(key: &str) -> Result<(), TransferError> {
    if key.is_empty() {
        return Err(TransferError::InvalidKey("empty key".into()));
    }

    if key.len() > MAX_KEY_LEN {
        return Err(TransferError::InvalidKey(format!(
            "key longer than {MAX_KEY_LEN} bytes"
        )));
    }

    if key.contains('\0') {
        return Err(TransferError::InvalidKey("NUL byte in key".into()));
    }

    if key.contains('\\') {
        return Err(TransferError::InvalidKey(format!(
            "backslash not allowed: {key}"
        )));
    }

    if key.len() >= 2 && key.as_bytes()[1] == b':' {
        return Err(TransferError::InvalidKey(format!(
            "drive prefix not allowed: {key}"
        )));
    }

    let path = Path::new(key);

    if path.is_absolute() {
        return Err(TransferError::InvalidKey(format!(
            "absolute key not allowed: {key}"
        )));
    }

    let mut normal = 0usize;
    for component in path.components() {
        match component {
            Component::ParentDir => {
                return Err(TransferError::InvalidKey(format!(
                    "parent directory traversal not allowed: {key}"
                )));
            }
            Component::Prefix(_) | Component::RootDir => {
                return Err(TransferError::InvalidKey(format!(
                    "absolute key not allowed: {key}"
                )));
            }
            Component::Normal(_) => normal += 1,
            Component::CurDir => {}
        }
    }

    if normal == 0 {
        return Err(TransferError::InvalidKey(format!("key names no object: {key}")));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_key() {
        assert!(validate_key("").is_err());
    }

    #[test]
    fn rejects_parent_dir_traversal() {
        assert!(validate_key("../../../etc/passwd").is_err());
        assert!(validate_key("sub/../../../escape").is_err());
        assert!(validate_key("..").is_err());
    }

    #[test]
    fn rejects_absolute_unix_key() {
        assert!(validate_key("/tmp/malicious").is_err());
    }

    #[test]
    fn rejects_windows_forms() {
        assert!(validate_key("C:\\Windows\\evil").is_err());
        assert!(validate_key("C:/Windows/evil").is_err());
        assert!(validate_key("\\\\server\\share").is_err());
    }

    #[test]
    fn rejects_dot_only_keys() {
        assert!(validate_key(".").is_err());
        assert!(validate_key("./").is_err());
    }

    #[test]
    fn rejects_nul_and_overlong() {
        assert!(validate_key("a\0b").is_err());
        assert!(validate_key(&"k".repeat(MAX_KEY_LEN + 1)).is_err());
    }

    #[test]
    fn accepts_object_keys() {
        assert!(validate_key("backup.tar").is_ok());
        assert!(validate_key("2024/05/db-dump.sql.gz").is_ok());
        assert!(validate_key(".config/settings.json").is_ok());
        assert!(validate_key("./report.pdf").is_ok());
    }
}
