//! Bounded retry of fallible async operations.
//!
//! A [`RetryingExecutor`] runs an operation up to [`RetryPolicy::max_attempts`]
//! times, sleeping with exponential backoff between retryable failures and
//! stopping immediately on a fatal one or on cancellation.

mod executor;
mod policy;

pub use executor::{Classify, RetryError, RetryEvent, RetryState, RetryingExecutor};
pub use policy::RetryPolicy;
