//! Retry executor.
//!
//! Runs one logical call through its circuit breaker, retrying transient
//! failures with backoff until it succeeds, hits a permanent error, or runs
//! out of attempts. The breaker is consulted once per call, not per attempt.

use chrono::{DateTime, Utc};
use lifeline_core::{backoff, OperationError, RetryConfig};
use std::future::Future;
use std::sync::Arc;
use thiserror::Error;
use tokio::time::Instant;

use super::circuit_breaker::{Admission, CircuitBreakerRegistry};
use super::ledger::{AttemptOutcome, OutcomeLedger, RetryOutcomeRecord};

/// Error returned by [`RetryExecutor::execute_with_retry`].
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RetryError {
    /// The breaker rejected the call before any attempt was made
    #[error("Circuit open for {operation_id}; next probe at {retry_at}")]
    CircuitOpen {
        operation_id: String,
        retry_at: DateTime<Utc>,
    },

    /// Last error of the final attempt, surfaced unchanged
    #[error(transparent)]
    Operation(#[from] OperationError),
}

impl RetryError {
    pub fn is_circuit_open(&self) -> bool {
        matches!(self, Self::CircuitOpen { .. })
    }
}

/// Executes operations with retries behind per-operation circuit breakers.
#[derive(Clone)]
pub struct RetryExecutor {
    breakers: Arc<CircuitBreakerRegistry>,
    ledger: Arc<OutcomeLedger>,
}

impl RetryExecutor {
    pub fn new(breakers: Arc<CircuitBreakerRegistry>, ledger: Arc<OutcomeLedger>) -> Self {
        Self { breakers, ledger }
    }

    pub fn breakers(&self) -> &Arc<CircuitBreakerRegistry> {
        &self.breakers
    }

    pub fn ledger(&self) -> &Arc<OutcomeLedger> {
        &self.ledger
    }

    /// Run `operation` until it succeeds or the retry budget is spent.
    ///
    /// `operation` is called once per attempt and must produce a fresh future
    /// each time.
    pub async fn execute_with_retry<T, F, Fut>(
        &self,
        operation_id: &str,
        config: &RetryConfig,
        mut operation: F,
    ) -> Result<T, RetryError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, OperationError>>,
    {
        if config.enable_circuit_breaker {
            if let Admission::Rejected { retry_at } = self.breakers.try_acquire(operation_id) {
                tracing::debug!(operation_id, %retry_at, "Call rejected by open circuit");
                return Err(RetryError::CircuitOpen {
                    operation_id: operation_id.to_string(),
                    retry_at,
                });
            }
        }

        let max_attempts = config.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            let started = Instant::now();
            let result = operation().await;
            let execution_time = started.elapsed();

            match result {
                Ok(value) => {
                    self.ledger.record(RetryOutcomeRecord {
                        timestamp: Utc::now(),
                        operation_id: operation_id.to_string(),
                        outcome: AttemptOutcome::Success,
                        attempt,
                        execution_time,
                        error_class: None,
                    });
                    if config.enable_circuit_breaker {
                        self.breakers.record_success(operation_id, config);
                    }
                    if attempt > 1 {
                        tracing::info!(operation_id, attempt, "Operation succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(error) => {
                    self.ledger.record(RetryOutcomeRecord {
                        timestamp: Utc::now(),
                        operation_id: operation_id.to_string(),
                        outcome: AttemptOutcome::Failure,
                        attempt,
                        execution_time,
                        error_class: Some(error.class().to_string()),
                    });
                    if config.enable_circuit_breaker {
                        self.breakers.record_failure(operation_id, config);
                    }

                    if !error.is_retryable(config) {
                        tracing::warn!(
                            operation_id,
                            attempt,
                            error_class = error.class(),
                            error = %error,
                            "Operation failed with non-retryable error"
                        );
                        return Err(error.into());
                    }
                    if attempt >= max_attempts {
                        tracing::warn!(
                            operation_id,
                            attempts = attempt,
                            error = %error,
                            "Operation failed after exhausting retries"
                        );
                        return Err(error.into());
                    }

                    let delay = error
                        .suggested_delay()
                        .unwrap_or_else(|| backoff::delay_for(attempt, config));
                    tracing::warn!(
                        operation_id,
                        attempt,
                        max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "Attempt failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

impl Default for RetryExecutor {
    fn default() -> Self {
        Self::new(
            Arc::new(CircuitBreakerRegistry::new()),
            Arc::new(OutcomeLedger::new()),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resilience::CircuitState;
    use lifeline_core::BackoffStrategy;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    fn exponential(max_attempts: u32) -> RetryConfig {
        RetryConfig::default()
            .with_max_attempts(max_attempts)
            .with_strategy(BackoffStrategy::Exponential)
            .with_delays(Duration::from_secs(1), Duration::from_secs(60))
            .with_jitter(false)
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_on_first_attempt() {
        let executor = RetryExecutor::default();
        let result = executor
            .execute_with_retry("op", &exponential(3), || async { Ok::<_, OperationError>(42) })
            .await;
        assert_eq!(result, Ok(42));

        let stats = executor.ledger().stats(Some("op")).unwrap();
        assert_eq!(stats.total_operations, 1);
        assert!(stats.retry_distribution.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_exponential_delays_then_last_error() {
        let executor = RetryExecutor::default();
        let calls = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let start = Instant::now();

        let result: Result<(), _> = executor
            .execute_with_retry("op", &exponential(5), || {
                let calls = Arc::clone(&calls);
                async move {
                    calls.lock().push(start.elapsed());
                    let n = calls.lock().len();
                    Err(OperationError::retryable(format!("failure {n}")))
                }
            })
            .await;

        assert_eq!(
            result,
            Err(RetryError::Operation(OperationError::retryable("failure 5")))
        );
        let secs: Vec<u64> = calls.lock().iter().map(|d| d.as_secs()).collect();
        // Delays of 1, 2, 4 and 8 seconds between the five attempts
        assert_eq!(secs, vec![0, 1, 3, 7, 15]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_retryable_stops_immediately() {
        let executor = RetryExecutor::default();
        let calls = AtomicU32::new(0);

        let result: Result<(), _> = executor
            .execute_with_retry("op", &exponential(5), || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(OperationError::invalid_argument("bad prompt")) }
            })
            .await;

        assert!(matches!(result, Err(RetryError::Operation(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_classified_flags_control_retry() {
        let executor = RetryExecutor::default();
        let calls = AtomicU32::new(0);
        let mut config = exponential(3);
        config.retry_on_parse_error = false;

        let _: Result<(), _> = executor
            .execute_with_retry("op", &config, || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(OperationError::parse("unexpected token")) }
            })
            .await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_after_overrides_backoff() {
        let executor = RetryExecutor::default();
        let calls = AtomicU32::new(0);
        let start = Instant::now();

        let result = executor
            .execute_with_retry("op", &exponential(2), || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n == 0 {
                        Err(OperationError::retry_after("rate limited", Duration::from_secs(7)))
                    } else {
                        Ok("done")
                    }
                }
            })
            .await;

        assert_eq!(result, Ok("done"));
        assert_eq!(start.elapsed().as_secs(), 7);
        let stats = executor.ledger().stats(Some("op")).unwrap();
        assert_eq!(stats.retry_distribution.get(&2), Some(&1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_circuit_rejects_without_invocation() {
        let executor = RetryExecutor::default();
        let config = RetryConfig::single_attempt().with_breaker(3, Duration::from_secs(30), 2);
        let calls = AtomicU32::new(0);

        for _ in 0..3 {
            let _: Result<(), _> = executor
                .execute_with_retry("op", &config, || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { Err(OperationError::connection("refused")) }
                })
                .await;
        }
        assert_eq!(
            executor.breakers().status("op").unwrap().state,
            CircuitState::Open
        );

        let fourth: Result<(), _> = executor
            .execute_with_retry("op", &config, || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok(()) }
            })
            .await;
        assert!(fourth.unwrap_err().is_circuit_open());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_trial_call_after_recovery_window() {
        let executor = RetryExecutor::default();
        let config = RetryConfig::single_attempt().with_breaker(1, Duration::from_secs(30), 1);

        let _: Result<(), _> = executor
            .execute_with_retry("op", &config, || async {
                Err(OperationError::timeout("slow"))
            })
            .await;

        tokio::time::advance(Duration::from_secs(30)).await;
        let trial = executor
            .execute_with_retry("op", &config, || async { Ok::<_, OperationError>(1) })
            .await;
        assert_eq!(trial, Ok(1));
        assert_eq!(
            executor.breakers().status("op").unwrap().state,
            CircuitState::Closed
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_breaker_disabled_is_never_consulted() {
        let executor = RetryExecutor::default();
        let mut config = RetryConfig::single_attempt().with_breaker(1, Duration::from_secs(30), 1);
        config.enable_circuit_breaker = false;

        for _ in 0..3 {
            let result: Result<(), _> = executor
                .execute_with_retry("op", &config, || async {
                    Err(OperationError::timeout("slow"))
                })
                .await;
            assert!(matches!(result, Err(RetryError::Operation(_))));
        }
        assert!(executor.breakers().status("op").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_sleep_does_not_block_other_operations() {
        let executor = RetryExecutor::default();
        let start = Instant::now();
        let slow_config = exponential(2)
            .with_delays(Duration::from_secs(60), Duration::from_secs(60));

        let slow = tokio::spawn({
            let executor = executor.clone();
            async move {
                executor
                    .execute_with_retry("slow", &slow_config, || async {
                        Err::<(), _>(OperationError::timeout("busy"))
                    })
                    .await
            }
        });
        // Let the first attempt fail and enter its backoff sleep
        tokio::task::yield_now().await;
        assert_eq!(executor.ledger().stats(Some("slow")).unwrap().total_operations, 1);

        let fast = executor
            .execute_with_retry("fast", &exponential(1), || async { Ok::<_, OperationError>(7) })
            .await;
        assert_eq!(fast, Ok(7));
        assert_eq!(start.elapsed(), Duration::ZERO);

        assert!(slow.await.unwrap().is_err());
        assert_eq!(start.elapsed(), Duration::from_secs(60));
        assert_eq!(executor.ledger().stats(Some("slow")).unwrap().total_operations, 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_calls_share_one_breaker() {
        let executor = RetryExecutor::default();
        let config = RetryConfig::single_attempt()
            .with_breaker(1_000, Duration::from_secs(30), 1);

        let handles: Vec<_> = (0..100)
            .map(|_| {
                let executor = executor.clone();
                let config = config.clone();
                tokio::spawn(async move {
                    executor
                        .execute_with_retry("shared", &config, || async {
                            Err::<(), _>(OperationError::connection("refused"))
                        })
                        .await
                })
            })
            .collect();
        for handle in handles {
            assert!(handle.await.unwrap().is_err());
        }

        let status = executor.breakers().status("shared").unwrap();
        assert_eq!(status.failure_count, 100);
        assert_eq!(status.state, CircuitState::Closed);
        assert_eq!(executor.ledger().stats(Some("shared")).unwrap().total_operations, 100);
    }
}
