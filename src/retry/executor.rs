use std::collections::HashMap;
use std::future::Future;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::config::RetryConfig;
use crate::error::{Result, TypedError};

/// Tracked state for one logical retryable operation.
///
/// Created on the first attempt for an operation id, updated in place on
/// every attempt, deleted on success, and frozen (`can_retry = false`) when a
/// non-retryable error occurs or attempts are exhausted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryState {
    pub operation_id: String,
    /// Last attempted input, serialized opaquely so a retry button can
    /// re-submit exactly what failed.
    pub parameters: Value,
    pub attempt_count: u32,
    pub last_error: Option<TypedError>,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub next_retry_at: Option<DateTime<Utc>>,
    pub can_retry: bool,
}

/// Result of a retried execution: the final outcome plus how much work it
/// took to get there.
#[derive(Debug)]
pub struct RetryOutcome<T> {
    pub result: Result<T>,
    /// Attempts made by this call (not the cumulative count across calls
    /// for the same operation id).
    pub attempt_count: u32,
    pub total_duration: Duration,
}

impl<T> RetryOutcome<T> {
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }
}

/// Runs operations with exponential backoff, tracking one [`RetryState`] per
/// operation id.
///
/// Parameters are fixed at call time and re-sent unchanged on every attempt.
/// Re-invoking an id that is still tracked refreshes the stored parameters
/// and continues the cumulative attempt count.
pub struct RetryExecutor {
    default_config: RetryConfig,
    states: Mutex<HashMap<String, RetryState>>,
}

impl RetryExecutor {
    pub fn new(default_config: RetryConfig) -> Self {
        Self {
            default_config,
            states: Mutex::new(HashMap::new()),
        }
    }

    pub async fn execute<P, T, E, F, Fut>(
        &self,
        operation_id: &str,
        operation: F,
        parameters: P,
    ) -> RetryOutcome<T>
    where
        P: Serialize + Clone,
        E: Into<TypedError>,
        F: FnMut(P) -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
    {
        let config = self.default_config.clone();
        self.execute_with_config(operation_id, operation, parameters, &config)
            .await
    }

    pub async fn execute_with_config<P, T, E, F, Fut>(
        &self,
        operation_id: &str,
        mut operation: F,
        parameters: P,
        config: &RetryConfig,
    ) -> RetryOutcome<T>
    where
        P: Serialize + Clone,
        E: Into<TypedError>,
        F: FnMut(P) -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
    {
        let started = Instant::now();
        let max_attempts = config.max_attempts.max(1);

        self.upsert_state(operation_id, &parameters);

        let mut delay = config.initial_delay();
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            self.record_attempt(operation_id);

            match operation(parameters.clone()).await {
                Ok(value) => {
                    self.states.lock().remove(operation_id);
                    debug!(
                        operation_id = %operation_id,
                        attempt,
                        "Operation succeeded"
                    );
                    return RetryOutcome {
                        result: Ok(value),
                        attempt_count: attempt,
                        total_duration: started.elapsed(),
                    };
                }
                Err(e) => {
                    let error: TypedError = e.into();
                    let exhausted = attempt >= max_attempts;

                    if !error.retryable || exhausted {
                        // Retrying a non-retryable error wastes latency and
                        // can mask a permanent misconfiguration, so the
                        // remaining attempts are forfeited.
                        self.freeze_state(operation_id, &error);
                        warn!(
                            operation_id = %operation_id,
                            attempt,
                            category = %error.category,
                            retryable = error.retryable,
                            "Operation failed, giving up"
                        );
                        return RetryOutcome {
                            result: Err(error),
                            attempt_count: attempt,
                            total_duration: started.elapsed(),
                        };
                    }

                    let next_retry_at = Utc::now()
                        + chrono::Duration::from_std(delay)
                            .unwrap_or_else(|_| chrono::Duration::zero());
                    self.record_failure(operation_id, &error, Some(next_retry_at));
                    warn!(
                        operation_id = %operation_id,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "Operation failed, backing off"
                    );

                    sleep(delay).await;
                    delay = delay
                        .mul_f64(config.backoff_multiplier)
                        .min(config.max_delay());
                }
            }
        }
    }

    /// Tracked state for an operation id, if any attempt has failed and not
    /// yet been cleared by a success.
    pub fn state(&self, operation_id: &str) -> Option<RetryState> {
        self.states.lock().get(operation_id).cloned()
    }

    pub fn clear(&self, operation_id: &str) -> bool {
        self.states.lock().remove(operation_id).is_some()
    }

    pub fn tracked_operations(&self) -> Vec<String> {
        self.states.lock().keys().cloned().collect()
    }

    fn upsert_state<P: Serialize>(&self, operation_id: &str, parameters: &P) {
        let parameters = serde_json::to_value(parameters).unwrap_or(Value::Null);
        let mut states = self.states.lock();
        match states.get_mut(operation_id) {
            Some(state) => {
                // Same logical operation, newest input wins.
                state.parameters = parameters;
                state.can_retry = true;
                state.next_retry_at = None;
            }
            None => {
                states.insert(
                    operation_id.to_string(),
                    RetryState {
                        operation_id: operation_id.to_string(),
                        parameters,
                        attempt_count: 0,
                        last_error: None,
                        last_attempt_at: None,
                        next_retry_at: None,
                        can_retry: true,
                    },
                );
            }
        }
    }

    fn record_attempt(&self, operation_id: &str) {
        let mut states = self.states.lock();
        if let Some(state) = states.get_mut(operation_id) {
            state.attempt_count += 1;
            state.last_attempt_at = Some(Utc::now());
        }
    }

    fn record_failure(
        &self,
        operation_id: &str,
        error: &TypedError,
        next_retry_at: Option<DateTime<Utc>>,
    ) {
        let mut states = self.states.lock();
        if let Some(state) = states.get_mut(operation_id) {
            state.last_error = Some(error.clone());
            state.next_retry_at = next_retry_at;
        }
    }

    fn freeze_state(&self, operation_id: &str, error: &TypedError) {
        let mut states = self.states.lock();
        if let Some(state) = states.get_mut(operation_id) {
            state.last_error = Some(error.clone());
            state.next_retry_at = None;
            state.can_retry = false;
        }
    }
}

impl Default for RetryExecutor {
    fn default() -> Self {
        Self::new(RetryConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    fn fast_config(max_attempts: u32) -> RetryConfig {
        RetryConfig {
            max_attempts,
            initial_delay_ms: 100,
            max_delay_ms: 400,
            backoff_multiplier: 2.0,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_retryable_failure_exhausts_all_attempts() {
        let executor = RetryExecutor::new(fast_config(3));
        let calls = Arc::new(AtomicU32::new(0));
        let calls_in = calls.clone();

        let outcome: RetryOutcome<()> = executor
            .execute("op", move |_p: u32| {
                let calls = calls_in.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err::<(), _>(TypedError::connection("refused"))
                }
            }, 7)
            .await;

        assert!(!outcome.is_success());
        assert_eq!(outcome.attempt_count, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);

        let state = executor.state("op").expect("state kept after failure");
        assert!(!state.can_retry);
        assert_eq!(state.attempt_count, 3);
    }

    #[tokio::test]
    async fn test_non_retryable_short_circuits() {
        let executor = RetryExecutor::new(fast_config(5));
        let calls = Arc::new(AtomicU32::new(0));
        let calls_in = calls.clone();

        let outcome: RetryOutcome<()> = executor
            .execute("op", move |_p: ()| {
                let calls = calls_in.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err::<(), _>(TypedError::validation("bad input"))
                }
            }, ())
            .await;

        assert_eq!(outcome.attempt_count, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(!executor.state("op").unwrap().can_retry);
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_after_failures_reports_attempts() {
        let executor = RetryExecutor::new(fast_config(5));
        let calls = Arc::new(AtomicU32::new(0));
        let calls_in = calls.clone();

        let outcome = executor
            .execute("op", move |p: String| {
                let calls = calls_in.clone();
                async move {
                    let n = calls.fetch_add(1, Ordering::SeqCst);
                    if n < 2 {
                        Err(TypedError::timeout("slow backend"))
                    } else {
                        Ok(p)
                    }
                }
            }, "payload".to_string())
            .await;

        assert_eq!(outcome.attempt_count, 3);
        assert_eq!(outcome.result.unwrap(), "payload");
        // Success deletes the tracked state.
        assert!(executor.state("op").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_delays_grow_and_cap() {
        let executor = RetryExecutor::new(RetryConfig {
            max_attempts: 4,
            initial_delay_ms: 100,
            max_delay_ms: 300,
            backoff_multiplier: 2.0,
        });

        let start = tokio::time::Instant::now();
        let outcome: RetryOutcome<()> = executor
            .execute("op", |_p: ()| async {
                Err::<(), _>(TypedError::connection("down"))
            }, ())
            .await;

        // Sleeps: 100, 200, min(400, 300) = 300 -> 600ms total.
        assert_eq!(outcome.attempt_count, 4);
        assert_eq!(start.elapsed(), Duration::from_millis(600));
    }

    #[tokio::test]
    async fn test_single_attempt_has_no_delay() {
        let executor = RetryExecutor::new(fast_config(1));

        let start = Instant::now();
        let outcome: RetryOutcome<()> = executor
            .execute("op", |_p: ()| async {
                Err::<(), _>(TypedError::connection("down"))
            }, ())
            .await;

        assert_eq!(outcome.attempt_count, 1);
        assert!(start.elapsed() < Duration::from_millis(50));
    }

    #[tokio::test]
    async fn test_reinvocation_refreshes_parameters() {
        let executor = RetryExecutor::new(fast_config(1));

        let _: RetryOutcome<()> = executor
            .execute("op", |_p: u32| async {
                Err::<(), _>(TypedError::connection("down"))
            }, 1)
            .await;
        assert_eq!(executor.state("op").unwrap().parameters, serde_json::json!(1));

        let _: RetryOutcome<()> = executor
            .execute("op", |_p: u32| async {
                Err::<(), _>(TypedError::connection("down"))
            }, 2)
            .await;

        let state = executor.state("op").unwrap();
        assert_eq!(state.parameters, serde_json::json!(2));
        // Cumulative across both calls.
        assert_eq!(state.attempt_count, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_parameters_identical_across_attempts() {
        let executor = RetryExecutor::new(fast_config(3));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_in = seen.clone();

        let outcome = executor
            .execute("op", move |p: Vec<u32>| {
                let seen = seen_in.clone();
                async move {
                    seen.lock().push(p.clone());
                    if seen.lock().len() < 3 {
                        Err(TypedError::connection("down"))
                    } else {
                        Ok(p)
                    }
                }
            }, vec![1, 2, 3])
            .await;

        assert!(outcome.is_success());
        let seen = seen.lock();
        assert_eq!(seen.len(), 3);
        assert!(seen.iter().all(|p| *p == vec![1, 2, 3]));
    }
}
