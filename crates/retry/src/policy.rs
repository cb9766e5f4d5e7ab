use std::collections::BTreeSet;
use std::time::Duration;

use chunkferry_protocol::ErrorKind;
use rand::Rng;

/// Fraction of a delay that jitter may add or remove.
const JITTER: f64 = 0.25;

/// How many times to try, how long to wait between tries, and which
/// failures are worth retrying.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first (always at least 1).
    pub max_attempts: u32,
    /// Delay after the first failed attempt.
    pub backoff_base: Duration,
    /// Backoff cap.
    pub max_backoff: Duration,
    /// Apply ±25% jitter to each delay.
    pub jitter: bool,
    pub retryable: BTreeSet<ErrorKind>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            backoff_base: Duration::from_millis(250),
            max_backoff: Duration::from_secs(15),
            jitter: false,
            retryable: default_retryable(),
        }
    }
}

fn default_retryable() -> BTreeSet<ErrorKind> {
    [
        ErrorKind::TransientNetwork,
        ErrorKind::ChecksumMismatch,
        ErrorKind::Auth,
        ErrorKind::QuotaExceeded,
        ErrorKind::IncompleteUpload,
        ErrorKind::InvalidRequest,
        ErrorKind::Cancelled,
    ]
    .into_iter()
    .filter(|k| k.is_retryable_by_default())
    .collect()
}

impl RetryPolicy {
    /// Policy allowing `max_attempts` attempts with default backoff.
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            ..Self::default()
        }
    }

    /// Policy allowing the first attempt plus `max_retries` retries.
    pub fn from_max_retries(max_retries: u32) -> Self {
        Self::new(max_retries.saturating_add(1))
    }

    pub fn with_backoff(mut self, base: Duration, max: Duration) -> Self {
        self.backoff_base = base;
        self.max_backoff = max.max(base);
        self
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Replaces the retryable set.
    pub fn with_retryable(mut self, kinds: impl IntoIterator<Item = ErrorKind>) -> Self {
        self.retryable = kinds.into_iter().collect();
        self
    }

    pub fn is_retryable(&self, kind: ErrorKind) -> bool {
        kind != ErrorKind::Cancelled && self.retryable.contains(&kind)
    }

    /// Delay to wait after failed attempt `attempt` (1-based):
    /// `backoff_base * 2^(attempt-1)`, capped at `max_backoff`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(63) as i32;
        let secs = self.backoff_base.as_secs_f64() * 2f64.powi(exp);
        let capped = secs.min(self.max_backoff.as_secs_f64());
        let delay = if self.jitter {
            capped * (1.0 + JITTER * rand::thread_rng().gen_range(-1.0..1.0))
        } else {
            capped
        };
        // Out-of-range values (near `Duration::MAX`) fall back to the cap.
        Duration::try_from_secs_f64(delay).unwrap_or(self.max_backoff)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let p = RetryPolicy::default();
        assert_eq!(p.max_attempts, 5);
        assert_eq!(p.backoff_base, Duration::from_millis(250));
        assert_eq!(p.max_backoff, Duration::from_secs(15));
        assert!(!p.jitter);
        assert!(p.is_retryable(ErrorKind::TransientNetwork));
        assert!(p.is_retryable(ErrorKind::ChecksumMismatch));
        assert!(!p.is_retryable(ErrorKind::Auth));
        assert!(!p.is_retryable(ErrorKind::QuotaExceeded));
        assert!(!p.is_retryable(ErrorKind::IncompleteUpload));
    }

    #[test]
    fn max_retries_adds_first_attempt() {
        assert_eq!(RetryPolicy::from_max_retries(3).max_attempts, 4);
        assert_eq!(RetryPolicy::from_max_retries(0).max_attempts, 1);
        assert_eq!(RetryPolicy::new(0).max_attempts, 1);
    }

    #[test]
    fn delay_doubles_until_cap() {
        let p = RetryPolicy::default();
        let expected = [0.25, 0.5, 1.0, 2.0, 4.0, 8.0, 15.0, 15.0];
        for (i, &secs) in expected.iter().enumerate() {
            let delay = p.delay_for_attempt((i + 1) as u32);
            assert!(
                (delay.as_secs_f64() - secs).abs() < 1e-9,
                "attempt {}: {delay:?}",
                i + 1
            );
        }
        // Huge attempt numbers stay at the cap.
        assert_eq!(p.delay_for_attempt(u32::MAX), Duration::from_secs(15));
    }

    #[test]
    fn huge_max_backoff_does_not_overflow() {
        let p = RetryPolicy::default().with_backoff(Duration::from_secs(1), Duration::MAX);
        assert!(p.delay_for_attempt(64) >= Duration::from_secs(1));
        let p = p.with_jitter(true);
        for attempt in [1, 10, 64, 200] {
            let _ = p.delay_for_attempt(attempt);
        }
        let p = RetryPolicy::default().with_backoff(Duration::MAX, Duration::MAX);
        assert_eq!(p.delay_for_attempt(3), Duration::MAX);
    }

    #[test]
    fn jitter_stays_within_a_quarter() {
        let p = RetryPolicy::default().with_jitter(true);
        for attempt in 1..8 {
            let base = RetryPolicy::default().delay_for_attempt(attempt).as_secs_f64();
            let secs = p.delay_for_attempt(attempt).as_secs_f64();
            assert!(secs >= base * 0.74 && secs <= base * 1.26);
        }
    }

    #[test]
    fn cancelled_is_never_retryable() {
        let p = RetryPolicy::default().with_retryable([ErrorKind::Cancelled, ErrorKind::Auth]);
        assert!(!p.is_retryable(ErrorKind::Cancelled));
        assert!(p.is_retryable(ErrorKind::Auth));
        assert!(!p.is_retryable(ErrorKind::TransientNetwork));
    }
}
