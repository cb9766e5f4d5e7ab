fn main() {
    println!("Run `cargo test -p wire-compat` to execute wire compatibility tests.");
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::PathBuf;

    use chunkferry_protocol::messages::{
        FinalizeRequest, FinalizeResponse, ProbePartResponse, PutPartRequest,
    };
    use chunkferry_protocol::{ErrorKind, Message, MessageType, PartStatus};
    use chunkferry_transfer::JournalRecord;

    /// Returns the path to the fixtures directory.
    fn fixtures_dir() -> PathBuf {
        PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("fixtures")
    }

    fn read_fixture(name: &str) -> String {
        let path = fixtures_dir().join(name);
        fs::read_to_string(&path)
            .unwrap_or_else(|e| panic!("failed to read fixture {}: {e}", path.display()))
    }

    /// Deserializes a fixture, re-serializes it, and compares the JSON
    /// values (key order ignored). Returns the parsed value.
    ///
    /// Parsing goes through text rather than `serde_json::Value` so that
    /// raw payloads in the envelope are exercised the same way as on the wire.
    fn roundtrip_test<T>(name: &str) -> T
    where
        T: serde::de::DeserializeOwned + serde::Serialize,
    {
        let data = read_fixture(name);
        let fixture: serde_json::Value = serde_json::from_str(&data)
            .unwrap_or_else(|e| panic!("failed to parse fixture {name}: {e}"));
        let parsed: T = serde_json::from_str(&data)
            .unwrap_or_else(|e| panic!("failed to deserialize {name}: {e}"));
        let text = serde_json::to_string(&parsed)
            .unwrap_or_else(|e| panic!("failed to re-serialize {name}: {e}"));
        let reserialized: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(
            fixture, reserialized,
            "roundtrip mismatch for {name}:\n  fixture: {fixture}\n  rust:    {reserialized}"
        );
        parsed
    }

    // --- Envelope ---

    #[test]
    fn fixture_message_put_part() {
        let msg: Message = roundtrip_test("message_put_part.json");
        assert_eq!(msg.msg_type, MessageType::PutPart);
        let req: PutPartRequest = msg.parse_payload().unwrap().unwrap();
        assert_eq!(req.sequence_index, 2);
        assert_eq!(req.offset, 8 * 1024 * 1024);
        assert!(msg.wire_error().is_none());
    }

    #[test]
    fn fixture_message_error() {
        let msg: Message = roundtrip_test("message_error.json");
        assert_eq!(msg.msg_type, MessageType::Error);
        assert!(msg.payload.is_none());
        let err = msg.wire_error().unwrap();
        assert_eq!(err.kind(), ErrorKind::QuotaExceeded);
    }

    // --- Payloads ---

    #[test]
    fn fixture_put_part_request() {
        let req: PutPartRequest = roundtrip_test("put_part_request.json");
        assert_eq!(req.key, "backups/db.tar");
        assert_eq!(req.checksum.len(), 64);
    }

    #[test]
    fn fixture_finalize_request() {
        let req: FinalizeRequest = roundtrip_test("finalize_request.json");
        assert_eq!(req.receipts.len(), 2);
        assert!(req.receipts[0].etag.is_none());
        assert!(req.receipts[1].etag.is_some());
    }

    #[test]
    fn fixture_finalize_response() {
        let resp: FinalizeResponse = roundtrip_test("finalize_response.json");
        assert_eq!(resp.object.part_count, 2);
        assert!(resp.object.etag.is_none());
    }

    #[test]
    fn fixture_probe_part_response_empty() {
        let resp: ProbePartResponse = roundtrip_test("probe_part_response_empty.json");
        assert!(resp.receipt.is_none());
    }

    // --- Journal ---

    #[test]
    fn fixture_journal_record() {
        let record: JournalRecord = roundtrip_test("journal_record.json");
        let plan = &record.plan;
        assert_eq!(plan.parts.len(), 3);
        assert!(plan.parts[0].is_committed());
        assert_eq!(
            plan.parts[1].status,
            PartStatus::Failed {
                kind: ErrorKind::TransientNetwork
            }
        );
        assert_eq!(plan.committed_bytes(), 4);
        assert!(plan.validate().is_ok());
    }
}
