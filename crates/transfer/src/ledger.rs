use std::collections::{BTreeMap, BTreeSet};
use std::sync::RwLock;
use std::time::{Duration, Instant};

use chunkferry_protocol::{PartReceipt, TransferStatus};

use crate::TransferPlan;

/// Shared record of which parts of a transfer are in flight or committed.
///
/// Several upload workers may complete parts concurrently; every update
/// goes through one lock so the committed set stays keyed by sequence
/// index and a part is never claimed twice.
pub struct PartLedger {
    inner: RwLock<LedgerInner>,
}

struct LedgerInner {
    transfer_id: String,
    key: String,
    total_bytes: u64,
    total_parts: u32,
    committed: BTreeMap<u32, PartReceipt>,
    in_flight: BTreeSet<u32>,
    outcome: Option<TransferStatus>,
    started_at: Option<Instant>,
    updated_at: Instant,
    completed_at: Option<Instant>,
    error: String,
}

/// Point-in-time copy of a ledger.
#[derive(Debug, Clone, PartialEq)]
pub struct LedgerSnapshot {
    pub transfer_id: String,
    pub key: String,
    pub total_bytes: u64,
    pub committed_bytes: u64,
    pub total_parts: u32,
    pub committed_parts: u32,
    pub in_flight: Vec<u32>,
    pub outcome: Option<TransferStatus>,
    pub elapsed: Duration,
    pub error: String,
}

impl LedgerSnapshot {
    /// Returns committed progress as a percentage (0-100).
    pub fn percentage(&self) -> f64 {
        if self.total_bytes == 0 {
            return if self.committed_parts == self.total_parts {
                100.0
            } else {
                0.0
            };
        }
        self.committed_bytes as f64 / self.total_bytes as f64 * 100.0
    }
}

impl PartLedger {
    /// Creates an empty ledger.
    pub fn new(transfer_id: String, key: String, total_bytes: u64, total_parts: u32) -> Self {
        Self {
            inner: RwLock::new(LedgerInner {
                transfer_id,
                key,
                total_bytes,
                total_parts,
                committed: BTreeMap::new(),
                in_flight: BTreeSet::new(),
                outcome: None,
                started_at: None,
                updated_at: Instant::now(),
                completed_at: None,
                error: String::new(),
            }),
        }
    }

    /// Creates a ledger seeded with the plan's committed parts.
    pub fn from_plan(plan: &TransferPlan) -> Self {
        let ledger = Self::new(
            plan.transfer_id.to_string(),
            plan.destination_key.clone(),
            plan.total_size,
            plan.part_count() as u32,
        );
        {
            let mut s = ledger.inner.write().unwrap();
            for receipt in plan.committed_receipts() {
                s.committed.insert(receipt.sequence_index, receipt);
            }
        }
        ledger
    }

    /// Marks the transfer as running.
    pub fn start(&self) {
        let mut s = self.inner.write().unwrap();
        let now = Instant::now();
        s.started_at = Some(now);
        s.updated_at = now;
    }

    /// Claims a part for upload.
    ///
    /// Returns `false` if the part is already committed or claimed by
    /// another worker.
    pub fn begin_part(&self, index: u32) -> bool {
        let mut s = self.inner.write().unwrap();
        if s.committed.contains_key(&index) {
            return false;
        }
        let claimed = s.in_flight.insert(index);
        s.updated_at = Instant::now();
        claimed
    }

    /// Records a committed part. Returns `false` if it was already committed.
    pub fn commit(&self, receipt: PartReceipt) -> bool {
        let mut s = self.inner.write().unwrap();
        let index = receipt.sequence_index;
        s.in_flight.remove(&index);
        s.updated_at = Instant::now();
        if s.committed.contains_key(&index) {
            return false;
        }
        s.committed.insert(index, receipt);
        true
    }

    /// Releases a claimed part without committing it.
    pub fn release(&self, index: u32) {
        let mut s = self.inner.write().unwrap();
        s.in_flight.remove(&index);
        s.updated_at = Instant::now();
    }

    /// Records the final outcome.
    pub fn finish(&self, outcome: TransferStatus, error: &str) {
        let mut s = self.inner.write().unwrap();
        s.outcome = Some(outcome);
        s.error = error.to_string();
        s.in_flight.clear();
        let now = Instant::now();
        s.completed_at = Some(now);
        s.updated_at = now;
    }

    /// Returns the receipt of a committed part.
    pub fn receipt(&self, index: u32) -> Option<PartReceipt> {
        let s = self.inner.read().unwrap();
        s.committed.get(&index).cloned()
    }

    /// Returns all receipts in sequence order.
    pub fn receipts(&self) -> Vec<PartReceipt> {
        let s = self.inner.read().unwrap();
        s.committed.values().cloned().collect()
    }

    pub fn committed_bytes(&self) -> u64 {
        let s = self.inner.read().unwrap();
        s.committed.values().map(|r| r.length).sum()
    }

    pub fn committed_parts(&self) -> u32 {
        let s = self.inner.read().unwrap();
        s.committed.len() as u32
    }

    /// Returns `true` until an outcome is recorded.
    pub fn is_active(&self) -> bool {
        let s = self.inner.read().unwrap();
        s.outcome.is_none()
    }

    pub fn id(&self) -> String {
        let s = self.inner.read().unwrap();
        s.transfer_id.clone()
    }

    /// Returns a snapshot for progress reporting.
    pub fn snapshot(&self) -> LedgerSnapshot {
        let s = self.inner.read().unwrap();
        let elapsed = match (s.started_at, s.completed_at) {
            (Some(start), Some(end)) => end.duration_since(start),
            (Some(start), None) => start.elapsed(),
            _ => Duration::ZERO,
        };
        LedgerSnapshot {
            transfer_id: s.transfer_id.clone(),
            key: s.key.clone(),
            total_bytes: s.total_bytes,
            committed_bytes: s.committed.values().map(|r| r.length).sum(),
            total_parts: s.total_parts,
            committed_parts: s.committed.len() as u32,
            in_flight: s.in_flight.iter().copied().collect(),
            outcome: s.outcome,
            elapsed,
            error: s.error.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn receipt(index: u32, length: u64) -> PartReceipt {
        PartReceipt {
            sequence_index: index,
            offset: u64::from(index) * length,
            length,
            checksum: String::new(),
            etag: None,
        }
    }

    fn ledger() -> PartLedger {
        PartLedger::new("t1".into(), "obj".into(), 3072, 3)
    }

    #[test]
    fn new_ledger_is_active_and_empty() {
        let l = ledger();
        assert!(l.is_active());
        assert_eq!(l.committed_bytes(), 0);
        assert_eq!(l.snapshot().committed_parts, 0);
    }

    #[test]
    fn begin_part_claims_once() {
        let l = ledger();
        assert!(l.begin_part(0));
        assert!(!l.begin_part(0));
        l.release(0);
        assert!(l.begin_part(0));
    }

    #[test]
    fn committed_part_cannot_be_claimed() {
        let l = ledger();
        assert!(l.begin_part(1));
        assert!(l.commit(receipt(1, 1024)));
        assert!(!l.begin_part(1));
        assert!(!l.commit(receipt(1, 1024)));
        assert_eq!(l.committed_bytes(), 1024);
        assert!(l.snapshot().in_flight.is_empty());
    }

    #[test]
    fn receipts_are_ordered() {
        let l = ledger();
        l.commit(receipt(2, 1024));
        l.commit(receipt(0, 1024));
        let indices: Vec<u32> = l.receipts().iter().map(|r| r.sequence_index).collect();
        assert_eq!(indices, vec![0, 2]);
        assert_eq!(l.receipt(2), Some(receipt(2, 1024)));
        assert_eq!(l.receipt(1), None);
    }

    #[test]
    fn finish_records_outcome() {
        let l = ledger();
        l.start();
        l.begin_part(0);
        l.finish(TransferStatus::Failed, "auth rejected");
        assert!(!l.is_active());
        let snap = l.snapshot();
        assert_eq!(snap.outcome, Some(TransferStatus::Failed));
        assert_eq!(snap.error, "auth rejected");
        assert!(snap.in_flight.is_empty());
    }

    #[test]
    fn from_plan_seeds_committed_parts() {
        let mut plan = TransferPlan::new("src", "dst", 10, 4).unwrap();
        let part = plan.parts[0].clone();
        plan.mark_committed(PartReceipt {
            sequence_index: 0,
            offset: part.offset,
            length: part.length,
            checksum: String::new(),
            etag: None,
        })
        .unwrap();
        let l = PartLedger::from_plan(&plan);
        assert_eq!(l.committed_parts(), 1);
        assert!(!l.begin_part(0));
        assert!(l.begin_part(1));
    }

    #[test]
    fn percentage_handles_empty_transfer() {
        let l = PartLedger::new("t".into(), "k".into(), 0, 1);
        assert!((l.snapshot().percentage() - 0.0).abs() < f64::EPSILON);
        l.commit(receipt(0, 0));
        assert!((l.snapshot().percentage() - 100.0).abs() < f64::EPSILON);
    }

    #[test]
    fn concurrent_access() {
        use std::sync::Arc;
        use std::thread;

        let l = Arc::new(PartLedger::new("t".into(), "k".into(), 1000, 1000));
        l.start();

        let mut handles = vec![];

        // 10 workers committing disjoint parts.
        for w in 0..10u32 {
            let l = Arc::clone(&l);
            handles.push(thread::spawn(move || {
                for j in 0..100u32 {
                    let index = w * 100 + j;
                    if l.begin_part(index) {
                        l.commit(receipt(index, 1));
                    }
                }
            }));
        }

        // 10 readers taking snapshots.
        for _ in 0..10 {
            let l = Arc::clone(&l);
            handles.push(thread::spawn(move || {
                for _ in 0..100 {
                    let _ = l.snapshot();
                    let _ = l.is_active();
                    let _ = l.committed_bytes();
                }
            }));
        }

        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(l.committed_bytes(), 1000);
        assert_eq!(l.committed_parts(), 1000);
    }
}
