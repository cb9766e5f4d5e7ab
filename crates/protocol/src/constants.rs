use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Version of the host data-channel protocol.
pub const PROTOCOL_VERSION: u32 = 1;

/// Maximum size of a JSON frame header (1 MiB).
pub const MAX_HEADER_SIZE: usize = 1024 * 1024;

/// Maximum size of a single part accepted over the data channel (512 MiB).
pub const MAX_PART_SIZE: u64 = 512 * 1024 * 1024;

/// Timeout for a single request/response exchange that carries no part data.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Timeout for a part upload exchange.
///
/// Part uploads include disk I/O on the receiver and may be much slower
/// than control requests.
pub const PART_REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// Data-channel message type identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageType {
    // Requests from sender to receiver
    #[serde(rename = "exists")]
    Exists,
    #[serde(rename = "put_part")]
    PutPart,
    #[serde(rename = "probe_part")]
    ProbePart,
    #[serde(rename = "finalize")]
    Finalize,
    #[serde(rename = "bye")]
    Bye,

    // Responses from receiver to sender
    #[serde(rename = "exists_result")]
    ExistsResult,
    #[serde(rename = "part_receipt")]
    PartReceipt,
    #[serde(rename = "probe_result")]
    ProbeResult,
    #[serde(rename = "finalized")]
    Finalized,
    #[serde(rename = "error")]
    Error,

    /// Forward compatibility: unknown message types deserialize here.
    #[serde(other)]
    Unknown,
}

impl MessageType {
    /// Returns the response type expected for a request type.
    pub fn response_type(&self) -> Option<MessageType> {
        match self {
            Self::Exists => Some(Self::ExistsResult),
            Self::PutPart => Some(Self::PartReceipt),
            Self::ProbePart => Some(Self::ProbeResult),
            Self::Finalize => Some(Self::Finalized),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_type_serialization() {
        assert_eq!(
            serde_json::to_string(&MessageType::PutPart).unwrap(),
            "\"put_part\""
        );
        assert_eq!(
            serde_json::to_string(&MessageType::ExistsResult).unwrap(),
            "\"exists_result\""
        );
    }

    #[test]
    fn message_type_deserialization() {
        let mt: MessageType = serde_json::from_str("\"finalize\"").unwrap();
        assert_eq!(mt, MessageType::Finalize);
    }

    #[test]
    fn unknown_message_type() {
        let mt: MessageType = serde_json::from_str("\"teleport\"").unwrap();
        assert_eq!(mt, MessageType::Unknown);
    }

    #[test]
    fn response_types() {
        assert_eq!(
            MessageType::PutPart.response_type(),
            Some(MessageType::PartReceipt)
        );
        assert_eq!(MessageType::Bye.response_type(), None);
    }
}
