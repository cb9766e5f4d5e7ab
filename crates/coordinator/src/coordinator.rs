//! Transfer coordinator.
//!
//! Runs one plan against one endpoint: parts go through the retrying
//! executor in sequence order, the first part that cannot be committed
//! stops the transfer, and finalize runs once every part is committed.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chunkferry_endpoint::{EndpointError, RemoteEndpoint};
use chunkferry_protocol::{ErrorKind, FinalizedObject, Part, PartReceipt, PartStatus, TransferStatus};
use chunkferry_retry::{RetryError, RetryEvent, RetryPolicy, RetryState, RetryingExecutor};
use chunkferry_transfer::{
    FileSource, IntegrityVerifier, Journal, PartLedger, PartSource, ProgressTracker,
    SpeedCalculator, TransferError, TransferFailure, TransferPlan, TransferResult, checksum_bytes,
};
use futures_util::StreamExt;
use sha2::{Digest, Sha256};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::CoordinatorError;
use crate::types::{FileOutcome, FileTransfer, TransferEvent};

/// Parts uploaded at once unless configured otherwise.
pub const DEFAULT_CONCURRENCY: usize = 1;

/// Drives a [`TransferPlan`] to a [`TransferResult`].
pub struct TransferCoordinator {
    endpoint: Arc<dyn RemoteEndpoint>,
    policy: RetryPolicy,
    concurrency: usize,
    deadline: Option<Duration>,
    cancel: CancellationToken,
    journal: Option<Journal>,
    progress: Option<Arc<ProgressTracker>>,
    events_tx: mpsc::Sender<TransferEvent>,
    events_rx: Option<mpsc::Receiver<TransferEvent>>,
}

/// Per-call state shared by the part workers.
struct Run<'a> {
    key: &'a str,
    source: Arc<dyn PartSource>,
    executor: RetryingExecutor,
    ledger: Arc<PartLedger>,
    /// Cancelled on deadline, external cancel, or the first failed part.
    halt: CancellationToken,
}

enum PartOutcome {
    /// Committed by an earlier run; read only for the digest.
    Skipped { index: u32, data: Vec<u8> },
    Committed {
        receipt: PartReceipt,
        data: Vec<u8>,
        attempts: u32,
        deduplicated: bool,
    },
    Failed { index: u32, failure: TransferFailure },
}

impl TransferCoordinator {
    pub fn new(endpoint: Arc<dyn RemoteEndpoint>, policy: RetryPolicy) -> Self {
        let (events_tx, events_rx) = mpsc::channel(256);
        Self {
            endpoint,
            policy,
            concurrency: DEFAULT_CONCURRENCY,
            deadline: None,
            cancel: CancellationToken::new(),
            journal: None,
            progress: None,
            events_tx,
            events_rx: Some(events_rx),
        }
    }

    /// Uploads up to `n` parts at once. Results are still observed in
    /// sequence order.
    pub fn with_concurrency(mut self, n: usize) -> Self {
        self.concurrency = n.max(1);
        self
    }

    /// Bounds each `transfer` call; on expiry the result is `Partial`.
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Persists the plan after every committed part.
    pub fn with_journal(mut self, journal: Journal) -> Self {
        self.journal = Some(journal);
        self
    }

    /// Registers each transfer's ledger with `tracker` while it runs.
    pub fn with_progress(mut self, tracker: Arc<ProgressTracker>) -> Self {
        self.progress = Some(tracker);
        self
    }

    /// Takes the event receiver. Can only be called once.
    pub fn take_events(&mut self) -> Option<mpsc::Receiver<TransferEvent>> {
        self.events_rx.take()
    }

    /// Returns the token that cancels running transfers.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn endpoint(&self) -> &Arc<dyn RemoteEndpoint> {
        &self.endpoint
    }

    /// Runs `plan`, reading part bytes from `source`.
    pub async fn transfer(&self, plan: TransferPlan, source: Arc<dyn PartSource>) -> TransferResult {
        self.run(plan, source, self.journal.as_ref()).await
    }

    /// Sends a local file, resuming from its journal when allowed, and
    /// verifies the result.
    pub async fn transfer_file(&self, request: &FileTransfer) -> Result<FileOutcome, CoordinatorError> {
        let path = request.source.clone();
        let source = tokio::task::spawn_blocking(move || FileSource::open(&path))
            .await
            .map_err(|e| CoordinatorError::Task(e.to_string()))??;
        let total_size = source.size();

        let journal = match (&self.journal, request.journal) {
            (Some(journal), _) => Some(journal.clone()),
            (None, true) => Some(Journal::beside(&request.source)),
            (None, false) => None,
        };
        let resumed = journal
            .as_ref()
            .and_then(|j| self.resume(j, &request.source, &request.key, total_size, request.part_size));
        let (plan, was_resumed) = match resumed {
            Some(plan) => (plan, true),
            None => (
                TransferPlan::new(
                    request.source.display().to_string(),
                    request.key.clone(),
                    total_size,
                    request.part_size,
                )?,
                false,
            ),
        };

        let result = self.run(plan, Arc::new(source), journal.as_ref()).await;

        let expected = request
            .expected_sha256
            .clone()
            .or_else(|| result.object.as_ref().and_then(|o| o.checksum.clone()));
        let verification = IntegrityVerifier::check(&result, total_size, expected.as_deref());
        if result.is_success() && !verification.is_verified() {
            error!(key = %request.key, %verification, "transfer finished but did not verify");
        }
        Ok(FileOutcome {
            result,
            verification,
            resumed: was_resumed,
        })
    }

    fn resume(
        &self,
        journal: &Journal,
        source: &Path,
        key: &str,
        total_size: u64,
        part_size: u64,
    ) -> Option<TransferPlan> {
        let record = match journal.load() {
            Ok(Some(record)) => record,
            Ok(None) => return None,
            Err(e) => {
                warn!(journal = %journal.path().display(), error = %e, "ignoring unreadable journal");
                return None;
            }
        };
        match record.resume_plan(self.endpoint.name(), key, total_size, part_size) {
            Ok(plan) => {
                info!(
                    source = %source.display(),
                    committed = plan.committed_receipts().len(),
                    parts = plan.part_count(),
                    "resuming from journal"
                );
                Some(plan)
            }
            Err(e) => {
                warn!(journal = %journal.path().display(), error = %e, "journal does not apply, starting over");
                None
            }
        }
    }

    async fn run(
        &self,
        mut plan: TransferPlan,
        source: Arc<dyn PartSource>,
        journal: Option<&Journal>,
    ) -> TransferResult {
        let key = plan.destination_key.clone();
        if let Some(failure) = check_plan(&plan, source.as_ref()) {
            error!(key = %key, error = %failure.message, "refusing to run plan");
            return self.finish(plan, TransferStatus::Failed, Some(failure), None, None);
        }

        let cancel = self.cancel.child_token();
        let _stop_timer = cancel.clone().drop_guard();
        if let Some(deadline) = self.deadline {
            let token = cancel.clone();
            tokio::spawn(async move {
                tokio::select! {
                    _ = tokio::time::sleep(deadline) => {
                        warn!(?deadline, "transfer deadline reached");
                        token.cancel();
                    }
                    _ = token.cancelled() => {}
                }
            });
        }

        let ledger = Arc::new(PartLedger::from_plan(&plan));
        ledger.start();
        if let Some(tracker) = &self.progress {
            tracker.track(Arc::clone(&ledger));
        }

        let halt = cancel.child_token();
        let run = Run {
            key: &key,
            source,
            executor: RetryingExecutor::new(self.policy.clone(), halt.clone()),
            ledger: Arc::clone(&ledger),
            halt,
        };

        let total_parts = plan.part_count() as u32;
        let already = plan.committed_receipts().len() as u32;
        info!(
            transfer_id = %plan.transfer_id,
            key = %key,
            endpoint = self.endpoint.name(),
            size = plan.total_size,
            parts = total_parts,
            committed = already,
            "transfer started"
        );
        self.emit(TransferEvent::Started {
            transfer_id: plan.transfer_id.to_string(),
            key: key.clone(),
            total_bytes: plan.total_size,
            total_parts,
            committed_parts: already,
        });

        let speed = SpeedCalculator::default();
        speed.add_sample(0);
        let mut hasher = Some(Sha256::new());
        let mut failed: Option<(TransferStatus, TransferFailure)> = None;

        let parts = plan.parts.clone();
        let mut outcomes = std::pin::pin!(
            futures_util::stream::iter(parts)
                .map(|part| self.run_part(&run, part))
                .buffered(self.concurrency)
        );

        while let Some(outcome) = outcomes.next().await {
            if failed.is_some() {
                hasher = None;
            }
            match outcome {
                PartOutcome::Skipped { index, data } => {
                    if let Some(h) = hasher.as_mut() {
                        h.update(&data);
                    }
                    debug!(index, "part already committed, skipped");
                    self.emit(TransferEvent::PartSkipped { index });
                }
                PartOutcome::Committed {
                    receipt,
                    data,
                    attempts,
                    deduplicated,
                } => {
                    let index = receipt.sequence_index;
                    let length = receipt.length;
                    if let Err(e) = plan.mark_committed(receipt) {
                        // A receipt for another range cannot be finalized.
                        if failed.is_none() {
                            failed = Some((
                                TransferStatus::Failed,
                                TransferFailure {
                                    part: Some(index),
                                    kind: e.kind(),
                                    attempts,
                                    message: e.to_string(),
                                },
                            ));
                            run.halt.cancel();
                        }
                        continue;
                    }
                    if let Some(h) = hasher.as_mut() {
                        h.update(&data);
                    }
                    self.save_journal(journal, &plan);

                    speed.add_sample(length);
                    let committed_bytes = plan.committed_bytes();
                    debug!(index, attempts, deduplicated, "part committed");
                    self.emit(TransferEvent::PartCommitted {
                        index,
                        attempts,
                        deduplicated,
                    });
                    self.emit(TransferEvent::Progress {
                        committed_bytes,
                        total_bytes: plan.total_size,
                        committed_parts: plan.committed_receipts().len() as u32,
                        total_parts,
                        bytes_per_second: speed.bytes_per_second(),
                        eta: speed.eta(plan.total_size - committed_bytes),
                    });
                    if let Some(tracker) = &self.progress {
                        tracker.notify_progress(&ledger.id());
                    }
                }
                PartOutcome::Failed { index, failure } => {
                    hasher = None;
                    if failed.is_some() {
                        continue;
                    }
                    let status = if failure.kind == ErrorKind::Cancelled {
                        plan.set_status(index, PartStatus::Pending);
                        TransferStatus::Partial
                    } else {
                        plan.set_status(index, PartStatus::Failed { kind: failure.kind });
                        TransferStatus::Failed
                    };
                    warn!(
                        index,
                        kind = %failure.kind,
                        attempts = failure.attempts,
                        error = %failure.message,
                        "part not committed, stopping"
                    );
                    failed = Some((status, failure));
                    run.halt.cancel();
                }
            }
        }

        if let Some((status, failure)) = failed {
            self.save_journal(journal, &plan);
            return self.finish_run(plan, &ledger, status, Some(failure), None, None);
        }

        let digest = hasher.map(|h| hex::encode(h.finalize()));
        let receipts = plan.committed_receipts();
        let mut attempts = 0;
        let finalized = run
            .executor
            .execute_observed(
                |_| self.endpoint.finalize(run.key, &receipts),
                |event| {
                    if let RetryState::Attempting { attempt } = event.state {
                        attempts = attempt;
                    }
                    self.on_retry_event(None, &event);
                },
            )
            .await;

        match finalized {
            Ok(object) => {
                info!(key = %key, size = object.size, parts = object.part_count, "transfer finalized");
                self.emit(TransferEvent::Finalized {
                    key: key.clone(),
                    size: object.size,
                });
                if let Some(journal) = journal
                    && let Err(e) = journal.remove()
                {
                    warn!(journal = %journal.path().display(), error = %e, "failed to remove journal");
                }
                self.finish_run(plan, &ledger, TransferStatus::Succeeded, None, Some(object), digest)
            }
            Err(e) => {
                let failure = failure_from(None, e);
                // Missing parts and deadlines are resumable: keep what was committed.
                let status = match failure.kind {
                    ErrorKind::IncompleteUpload | ErrorKind::Cancelled => TransferStatus::Partial,
                    _ => TransferStatus::Failed,
                };
                warn!(
                    key = %key,
                    %status,
                    kind = %failure.kind,
                    attempts,
                    error = %failure.message,
                    "finalize failed"
                );
                self.save_journal(journal, &plan);
                self.finish_run(plan, &ledger, status, Some(failure), None, digest)
            }
        }
    }

    /// Reads one part and, unless it is already committed, uploads it.
    async fn run_part(&self, run: &Run<'_>, part: Part) -> PartOutcome {
        let index = part.sequence_index;
        if run.halt.is_cancelled() {
            return PartOutcome::Failed {
                index,
                failure: not_started(index),
            };
        }

        let data = match read_part(&run.source, &part).await {
            Ok(data) => data,
            Err(e) => {
                return PartOutcome::Failed {
                    index,
                    failure: TransferFailure {
                        part: Some(index),
                        kind: e.kind(),
                        attempts: 0,
                        message: format!("read {}: {e}", run.source.describe()),
                    },
                };
            }
        };
        if part.is_committed() {
            return PartOutcome::Skipped { index, data };
        }
        // Each index is yielded once per run, so the claim always succeeds.
        run.ledger.begin_part(index);

        let checksum = checksum_bytes(&data);
        let endpoint = self.endpoint.as_ref();
        let key = run.key;
        let (part_ref, data_ref, checksum_ref) = (&part, data.as_slice(), checksum.as_str());
        let mut attempts = 0;

        let result = run
            .executor
            .execute_observed(
                move |attempt| async move {
                    if attempt > 1 {
                        match endpoint.committed_part(key, part_ref).await {
                            Ok(Some(mut found))
                                if part_ref.matches_receipt(&found)
                                    && (found.checksum.is_empty()
                                        || found.checksum.eq_ignore_ascii_case(checksum_ref)) =>
                            {
                                found.checksum = checksum_ref.to_string();
                                return Ok((found, true));
                            }
                            Ok(_) => {}
                            Err(e) => debug!(index = part_ref.sequence_index, error = %e, "probe failed, re-sending"),
                        }
                    }
                    endpoint
                        .upload_part(key, part_ref, data_ref)
                        .await
                        .map(|receipt| (receipt, false))
                },
                |event| {
                    if let RetryState::Attempting { attempt } = event.state {
                        attempts = attempt;
                    }
                    self.on_retry_event(Some(index), &event);
                },
            )
            .await;

        match result {
            Ok((receipt, deduplicated)) => {
                run.ledger.commit(receipt.clone());
                PartOutcome::Committed {
                    receipt,
                    data,
                    attempts,
                    deduplicated,
                }
            }
            Err(e) => {
                run.ledger.release(index);
                PartOutcome::Failed {
                    index,
                    failure: failure_from(Some(index), e),
                }
            }
        }
    }

    fn on_retry_event(&self, index: Option<u32>, event: &RetryEvent<'_, EndpointError>) {
        if let (RetryState::BackingOff { attempt, delay }, Some(error)) = (event.state, event.error) {
            info!(
                part = ?index,
                attempt,
                ?delay,
                kind = %error.kind,
                error = %error.message,
                "retrying"
            );
            self.emit(TransferEvent::Retrying {
                index,
                attempt,
                delay,
                kind: error.kind,
                error: error.message.clone(),
            });
        }
    }

    fn save_journal(&self, journal: Option<&Journal>, plan: &TransferPlan) {
        if let Some(journal) = journal
            && let Err(e) = journal.save(self.endpoint.name(), plan)
        {
            warn!(journal = %journal.path().display(), error = %e, "failed to save journal");
        }
    }

    fn finish_run(
        &self,
        plan: TransferPlan,
        ledger: &PartLedger,
        status: TransferStatus,
        failure: Option<TransferFailure>,
        object: Option<FinalizedObject>,
        digest: Option<String>,
    ) -> TransferResult {
        let message = failure.as_ref().map(|f| f.message.as_str()).unwrap_or("");
        ledger.finish(status, message);
        if let Some(tracker) = &self.progress {
            let id = ledger.id();
            tracker.notify_progress(&id);
            tracker.untrack(&id);
        }
        self.finish(plan, status, failure, object, digest)
    }

    fn finish(
        &self,
        plan: TransferPlan,
        status: TransferStatus,
        failure: Option<TransferFailure>,
        object: Option<FinalizedObject>,
        digest: Option<String>,
    ) -> TransferResult {
        if let Some(f) = &failure {
            self.emit(TransferEvent::Failed {
                status,
                index: f.part,
                kind: f.kind,
                error: f.message.clone(),
            });
        }
        TransferResult {
            status,
            committed: plan.committed_receipts(),
            object,
            digest,
            failure,
            plan,
        }
    }

    /// Events are best effort; a full or dropped receiver never blocks
    /// the transfer.
    fn emit(&self, event: TransferEvent) {
        if let Err(mpsc::error::TrySendError::Full(event)) = self.events_tx.try_send(event) {
            debug!(?event, "event channel full, dropping event");
        }
    }
}

fn check_plan(plan: &TransferPlan, source: &dyn PartSource) -> Option<TransferFailure> {
    let problem = match plan.validate() {
        Err(e) => Some(e.to_string()),
        Ok(()) if source.size() != plan.total_size => Some(format!(
            "{} is {} bytes, plan expects {}",
            source.describe(),
            source.size(),
            plan.total_size
        )),
        Ok(()) => None,
    };
    problem.map(|message| TransferFailure {
        part: None,
        kind: ErrorKind::InvalidRequest,
        attempts: 0,
        message,
    })
}

async fn read_part(source: &Arc<dyn PartSource>, part: &Part) -> Result<Vec<u8>, TransferError> {
    let source = Arc::clone(source);
    let part = part.clone();
    tokio::task::spawn_blocking(move || source.read_part(&part))
        .await
        .map_err(|e| TransferError::Io(std::io::Error::other(e)))?
}

fn not_started(index: u32) -> TransferFailure {
    TransferFailure {
        part: Some(index),
        kind: ErrorKind::Cancelled,
        attempts: 0,
        message: "not started".into(),
    }
}

fn failure_from(part: Option<u32>, error: RetryError<EndpointError>) -> TransferFailure {
    let kind = error.kind();
    let attempts = error.attempts();
    let message = match error.last_error() {
        Some(e) if !error.is_cancelled() => e.message.clone(),
        _ => error.to_string(),
    };
    TransferFailure {
        part,
        kind,
        attempts,
        message,
    }
}
