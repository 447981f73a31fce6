//! Retry-with-backoff execution.
//!
//! This module handles:
//! - Exponential backoff between attempts, capped at a maximum delay
//! - Immediate short-circuit on non-retryable failures
//! - Per-operation tracked state so a UI retry can reuse the last
//!   attempted parameters

mod executor;

pub use executor::{RetryExecutor, RetryOutcome, RetryState};
