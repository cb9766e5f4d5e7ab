use serde::{Deserialize, Serialize};

use crate::types::{FinalizedObject, PartReceipt};

// ---------------------------------------------------------------------------
// Request payloads
// ---------------------------------------------------------------------------

/// Asks whether an object already exists at `key`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExistsRequest {
    pub key: String,
}

/// Announces one part; exactly `length` raw bytes follow the header.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PutPartRequest {
    pub key: String,
    pub sequence_index: u32,
    pub offset: u64,
    pub length: u64,
    /// SHA-256 hex digest of the part bytes.
    pub checksum: String,
}

/// Asks whether a part with this sequence index is already staged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProbePartRequest {
    pub key: String,
    pub sequence_index: u32,
}

/// Assembles the staged parts into one object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinalizeRequest {
    pub key: String,
    pub receipts: Vec<PartReceipt>,
}

// ---------------------------------------------------------------------------
// Response payloads
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExistsResponse {
    pub exists: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartReceiptResponse {
    pub receipt: PartReceipt,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbePartResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub receipt: Option<PartReceipt>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinalizeResponse {
    pub object: FinalizedObject,
}
