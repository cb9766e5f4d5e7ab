use std::future::Future;
use std::time::Duration;

use chunkferry_protocol::ErrorKind;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::RetryPolicy;

/// Errors that can be sorted into an [`ErrorKind`].
pub trait Classify {
    fn kind(&self) -> ErrorKind;
}

impl Classify for ErrorKind {
    fn kind(&self) -> ErrorKind {
        *self
    }
}

/// Executor state, reported to observers on every transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryState {
    Attempting { attempt: u32 },
    BackingOff { attempt: u32, delay: Duration },
    Succeeded { attempts: u32 },
    ExhaustedRetries { attempts: u32 },
    FailedFatal { attempts: u32 },
    Cancelled { attempts: u32 },
}

/// A state transition plus the error that caused it, if any.
#[derive(Debug)]
pub struct RetryEvent<'a, E> {
    pub state: RetryState,
    pub error: Option<&'a E>,
}

/// Why a retried operation did not succeed.
#[derive(Debug, thiserror::Error)]
pub enum RetryError<E> {
    #[error("gave up after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: E },

    #[error("failed after {attempts} attempt(s): {error}")]
    Fatal { attempts: u32, error: E },

    #[error("cancelled after {attempts} attempt(s)")]
    Cancelled { attempts: u32, last: Option<E> },
}

impl<E> RetryError<E> {
    /// Number of times the operation was invoked.
    pub fn attempts(&self) -> u32 {
        match self {
            Self::Exhausted { attempts, .. }
            | Self::Fatal { attempts, .. }
            | Self::Cancelled { attempts, .. } => *attempts,
        }
    }

    pub fn last_error(&self) -> Option<&E> {
        match self {
            Self::Exhausted { last, .. } => Some(last),
            Self::Fatal { error, .. } => Some(error),
            Self::Cancelled { last, .. } => last.as_ref(),
        }
    }

    pub fn into_last_error(self) -> Option<E> {
        match self {
            Self::Exhausted { last, .. } => Some(last),
            Self::Fatal { error, .. } => Some(error),
            Self::Cancelled { last, .. } => last,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }
}

impl<E: Classify> RetryError<E> {
    /// Kind of the final error; `Cancelled` for cancellation.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Exhausted { last, .. } => last.kind(),
            Self::Fatal { error, .. } => error.kind(),
            Self::Cancelled { .. } => ErrorKind::Cancelled,
        }
    }
}

/// Runs operations under a [`RetryPolicy`].
///
/// Backoff sleeps and in-flight attempts are raced against the
/// cancellation token; once it fires no further attempt starts.
#[derive(Debug, Clone)]
pub struct RetryingExecutor {
    policy: RetryPolicy,
    cancel: CancellationToken,
}

impl RetryingExecutor {
    pub fn new(policy: RetryPolicy, cancel: CancellationToken) -> Self {
        Self { policy, cancel }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Runs `op` until it succeeds, fails fatally, exhausts the policy or
    /// is cancelled. `op` receives the 1-based attempt number.
    pub async fn execute<T, E, F, Fut>(&self, op: F) -> Result<T, RetryError<E>>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Classify + std::fmt::Display,
    {
        self.execute_observed(op, |_| {}).await
    }

    /// Like [`execute`](Self::execute), reporting every state transition
    /// to `observer`.
    pub async fn execute_observed<T, E, F, Fut, O>(
        &self,
        mut op: F,
        mut observer: O,
    ) -> Result<T, RetryError<E>>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Classify + std::fmt::Display,
        O: FnMut(RetryEvent<'_, E>),
    {
        let mut attempt: u32 = 0;
        let mut last: Option<E> = None;

        loop {
            if self.cancel.is_cancelled() {
                return Err(self.cancelled(attempt, last, &mut observer));
            }

            attempt += 1;
            observer(RetryEvent {
                state: RetryState::Attempting { attempt },
                error: None,
            });

            let outcome = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => None,
                r = op(attempt) => Some(r),
            };
            let Some(outcome) = outcome else {
                return Err(self.cancelled(attempt, last, &mut observer));
            };

            let error = match outcome {
                Ok(value) => {
                    observer(RetryEvent {
                        state: RetryState::Succeeded { attempts: attempt },
                        error: None,
                    });
                    return Ok(value);
                }
                Err(e) => e,
            };

            let kind = error.kind();
            if !self.policy.is_retryable(kind) {
                warn!(attempt, kind = %kind, error = %error, "fatal error, not retrying");
                observer(RetryEvent {
                    state: RetryState::FailedFatal { attempts: attempt },
                    error: Some(&error),
                });
                return Err(RetryError::Fatal {
                    attempts: attempt,
                    error,
                });
            }

            if attempt >= self.policy.max_attempts {
                warn!(attempt, kind = %kind, error = %error, "retries exhausted");
                observer(RetryEvent {
                    state: RetryState::ExhaustedRetries { attempts: attempt },
                    error: Some(&error),
                });
                return Err(RetryError::Exhausted {
                    attempts: attempt,
                    last: error,
                });
            }

            let delay = self.policy.delay_for_attempt(attempt);
            debug!(
                attempt,
                kind = %kind,
                delay_ms = delay.as_millis() as u64,
                "attempt failed, backing off"
            );
            observer(RetryEvent {
                state: RetryState::BackingOff { attempt, delay },
                error: Some(&error),
            });
            last = Some(error);

            tokio::select! {
                _ = self.cancel.cancelled() => {
                    return Err(self.cancelled(attempt, last, &mut observer));
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    fn cancelled<E, O>(&self, attempts: u32, last: Option<E>, observer: &mut O) -> RetryError<E>
    where
        O: FnMut(RetryEvent<'_, E>),
    {
        debug!(attempts, "retry loop cancelled");
        observer(RetryEvent {
            state: RetryState::Cancelled { attempts },
            error: last.as_ref(),
        });
        RetryError::Cancelled { attempts, last }
    }
}
