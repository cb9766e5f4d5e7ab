//! Shared data model and host wire messages.
//!
//! Every other chunkferry crate speaks in terms of these types: parts,
//! receipts, finalized objects and the [`ErrorKind`] taxonomy used to
//! decide what is retried.

pub mod constants;
pub mod envelope;
pub mod messages;
pub mod types;

// Re-export primary types for convenience.
pub use constants::MessageType;
pub use envelope::{Message, WireError};
pub use types::{ErrorKind, FinalizedObject, Part, PartReceipt, PartStatus, TransferStatus};
