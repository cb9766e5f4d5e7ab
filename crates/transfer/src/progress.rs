use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

use tokio::task::JoinHandle;

use crate::{LedgerSnapshot, PartLedger};

/// Default progress notification interval.
const DEFAULT_INTERVAL: Duration = Duration::from_millis(500);

/// Callback invoked with transfer progress.
pub type ProgressCallback = Box<dyn Fn(LedgerSnapshot) + Send + Sync>;

/// Reports the ledgers of running transfers to callbacks, on demand or on
/// a timer.
pub struct ProgressTracker {
    shared: Arc<Shared>,
    interval: Duration,
    ticker: Mutex<Option<JoinHandle<()>>>,
}

#[derive(Default)]
struct Shared {
    callbacks: RwLock<Vec<ProgressCallback>>,
    ledgers: RwLock<HashMap<String, Arc<PartLedger>>>,
}

impl Shared {
    fn report(&self, ledger: &PartLedger) {
        let snapshot = ledger.snapshot();
        for cb in self.callbacks.read().unwrap().iter() {
            cb(snapshot.clone());
        }
    }

    fn report_active(&self) {
        let ledgers: Vec<_> = self.ledgers.read().unwrap().values().cloned().collect();
        for ledger in ledgers.iter().filter(|l| l.is_active()) {
            self.report(ledger);
        }
    }
}

impl ProgressTracker {
    /// `None` selects a 500 ms interval.
    pub fn new(interval: Option<Duration>) -> Self {
        Self {
            shared: Arc::new(Shared::default()),
            interval: interval.unwrap_or(DEFAULT_INTERVAL),
            ticker: Mutex::new(None),
        }
    }

    pub fn on_progress(&self, callback: ProgressCallback) {
        self.shared.callbacks.write().unwrap().push(callback);
    }

    /// Begins reporting a ledger under its transfer id.
    pub fn track(&self, ledger: Arc<PartLedger>) {
        self.shared.ledgers.write().unwrap().insert(ledger.id(), ledger);
    }

    pub fn untrack(&self, transfer_id: &str) {
        self.shared.ledgers.write().unwrap().remove(transfer_id);
    }

    pub fn get(&self, transfer_id: &str) -> Option<Arc<PartLedger>> {
        self.shared.ledgers.read().unwrap().get(transfer_id).cloned()
    }

    /// Reports one transfer immediately, whether or not it is still running.
    pub fn notify_progress(&self, transfer_id: &str) {
        if let Some(ledger) = self.get(transfer_id) {
            self.shared.report(&ledger);
        }
    }

    /// Spawns the periodic reporter, replacing any running one. Finished
    /// transfers are skipped. Requires a tokio runtime.
    pub fn start(&self) {
        let shared = Arc::clone(&self.shared);
        let period = self.interval;
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                ticker.tick().await;
                shared.report_active();
            }
        });
        if let Some(previous) = self.ticker.lock().unwrap().replace(handle) {
            previous.abort();
        }
    }

    pub fn stop(&self) {
        if let Some(handle) = self.ticker.lock().unwrap().take() {
            handle.abort();
        }
    }
}

impl Drop for ProgressTracker {
    fn drop(&mut self) {
        self.stop();
    }
}

// ---------------------------------------------------------------------------
// SpeedCalculator
// ---------------------------------------------------------------------------

/// Default averaging window.
const SPEED_WINDOW: Duration = Duration::from_secs(5);

/// Samples kept regardless of the window.
const MAX_SAMPLES: usize = 100;

/// Sliding-window throughput estimate fed with byte deltas.
pub struct SpeedCalculator {
    window: Duration,
    max_samples: usize,
    samples: Mutex<VecDeque<(Instant, u64)>>,
}

impl Default for SpeedCalculator {
    fn default() -> Self {
        Self::new(None, None)
    }
}

impl SpeedCalculator {
    /// `None` selects a 5 s window and 100 samples.
    pub fn new(window: Option<Duration>, max_samples: Option<usize>) -> Self {
        Self {
            window: window.unwrap_or(SPEED_WINDOW),
            max_samples: max_samples.unwrap_or(MAX_SAMPLES).max(2),
            samples: Mutex::new(VecDeque::new()),
        }
    }

    /// Records `bytes` transferred since the previous sample.
    pub fn add_sample(&self, bytes: u64) {
        let now = Instant::now();
        let mut samples = self.samples.lock().unwrap();
        samples.push_back((now, bytes));
        while let Some(&(at, _)) = samples.front() {
            let stale = now.duration_since(at) > self.window;
            if !stale && samples.len() <= self.max_samples {
                break;
            }
            samples.pop_front();
        }
    }

    /// Average rate over the retained samples; 0.0 until two samples at
    /// distinct instants exist.
    pub fn bytes_per_second(&self) -> f64 {
        let samples = self.samples.lock().unwrap();
        let (Some(&(first, _)), Some(&(last, _))) = (samples.front(), samples.back()) else {
            return 0.0;
        };
        let span = last.duration_since(first).as_secs_f64();
        if span <= 0.0 {
            return 0.0;
        }
        // The first sample only anchors the window start.
        let bytes: u64 = samples.iter().skip(1).map(|&(_, b)| b).sum();
        bytes as f64 / span
    }

    /// Time left for `remaining_bytes` at the current rate.
    pub fn eta(&self, remaining_bytes: u64) -> Option<Duration> {
        let rate = self.bytes_per_second();
        (rate > 0.0).then(|| Duration::from_secs_f64(remaining_bytes as f64 / rate))
    }

    pub fn reset(&self) {
        self.samples.lock().unwrap().clear();
    }
}
