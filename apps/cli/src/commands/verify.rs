//! `chunkferry verify`: check a stored object.

use std::path::PathBuf;

use chunkferry_transfer::IntegrityVerifier;
use clap::Args;

#[derive(Debug, Args)]
pub struct VerifyArgs {
    /// File to check
    pub file: PathBuf,

    /// Expected size in bytes
    #[arg(long)]
    pub size: u64,

    /// Expected SHA-256 (hex)
    #[arg(long)]
    pub sha256: Option<String>,
}

/// Prints the verdict; exit code 0 when verified, 2 otherwise.
pub fn run(args: VerifyArgs) -> anyhow::Result<u8> {
    let verification = IntegrityVerifier::check_file(&args.file, args.size, args.sha256.as_deref())?;
    println!("{}: {verification}", args.file.display());
    Ok(if verification.is_verified() { 0 } else { 2 })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(file: PathBuf, size: u64, sha256: Option<&str>) -> VerifyArgs {
        VerifyArgs {
            file,
            size,
            sha256: sha256.map(str::to_string),
        }
    }

    #[test]
    fn verify_exit_codes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f");
        std::fs::write(&path, b"hello").unwrap();
        let digest = IntegrityVerifier::file_digest(&path).unwrap();

        assert_eq!(run(args(path.clone(), 5, Some(&digest))).unwrap(), 0);
        assert_eq!(run(args(path.clone(), 4, None)).unwrap(), 2);
        assert_eq!(run(args(path.clone(), 5, Some("zz"))).unwrap(), 2);
        assert!(run(args(dir.path().join("missing"), 5, None)).is_err());
    }
}
