//! Transfer coordination: plan, upload, finalize, verify.
//!
//! This crate drives planned parts through a
//! [`RetryingExecutor`](chunkferry_retry::RetryingExecutor) against a
//! [`RemoteEndpoint`](chunkferry_endpoint::RemoteEndpoint). It never opens
//! or closes the endpoint; the caller owns it.
//!
//! # Flow
//!
//! 1. **Skip** parts committed by an earlier run (their bytes are still hashed)
//! 2. **Upload** pending parts in sequence order, retried under the policy
//! 3. **Fail fast** on the first exhausted or fatal part
//! 4. **Finalize** once every part is committed
//! 5. **Verify** size and SHA-256 (file transfers)

pub mod coordinator;
pub mod error;
pub mod types;

pub use coordinator::{DEFAULT_CONCURRENCY, TransferCoordinator};
pub use error::CoordinatorError;
pub use types::{ExitStatus, FileOutcome, FileTransfer, TransferEvent, summarize};
