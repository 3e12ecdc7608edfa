//! Generic retry controller with backoff, jitter, pause/resume, and attempt
//! history.
//!
//! Wraps an arbitrary asynchronous operation with attempt counting and
//! delay computation driven by a `RetryPolicy`. Both the step dispatch path
//! and the orchestrator use it. Each `execute` invocation runs its own
//! state machine: idle -> attempting -> (success | scheduling-retry |
//! exhausted). Pausing abandons any in-flight wait and surfaces
//! `RetryError::Paused`; callers re-invoke `execute` after `resume()`.

use std::sync::Mutex;
use std::time::Duration;

use cadence_types::retry::{BackoffStrategy, RetryPolicy};
use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;

// ---------------------------------------------------------------------------
// Error classification
// ---------------------------------------------------------------------------

/// Implemented by operation errors so the controller can match their code
/// against a policy's `retryable_errors` allow-list.
pub trait RetryableError {
    /// Stable error code (catalog codes like "timeout", "server-error").
    fn error_code(&self) -> &str;
}

/// Errors returned by `RetryController::execute`.
#[derive(Debug, thiserror::Error)]
pub enum RetryError<E> {
    /// The controller was paused while an attempt or wait was in flight.
    /// The pending attempt is abandoned; call `execute` again after
    /// `resume()`.
    #[error("retry paused")]
    Paused,

    /// The operation's last error, after the attempt budget was exhausted
    /// or the error's code was excluded by the policy's allow-list.
    #[error("operation failed: {0}")]
    Failed(E),
}

// ---------------------------------------------------------------------------
// Attempt history
// ---------------------------------------------------------------------------

/// Outcome of one recorded attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptOutcome {
    Success,
    Failure { code: String, message: String },
}

impl AttemptOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, AttemptOutcome::Success)
    }
}

/// One entry of the controller's attempt history.
#[derive(Debug, Clone)]
pub struct AttemptRecord {
    /// 1-based attempt number within its `execute` invocation.
    pub attempt: u32,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub outcome: AttemptOutcome,
}

/// Controller state, observable between and during invocations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryState {
    Idle,
    Attempting,
    SchedulingRetry,
    Exhausted,
}

// ---------------------------------------------------------------------------
// Delay computation
// ---------------------------------------------------------------------------

/// Compute the delay before the attempt following `failed_attempt`
/// (1-based).
///
/// - fixed: `initial_delay`
/// - linear: `initial_delay * failed_attempt`
/// - exponential: `initial_delay * multiplier^(failed_attempt - 1)`
///
/// The result is capped at `max_delay`; jitter (when enabled) perturbs the
/// capped value uniformly within +/- `jitter_factor`.
pub fn compute_delay(policy: &RetryPolicy, failed_attempt: u32) -> Duration {
    let attempt = failed_attempt.max(1);
    let base_ms = policy.initial_delay_ms as f64;
    let raw_ms = match policy.strategy {
        BackoffStrategy::Fixed => base_ms,
        BackoffStrategy::Linear => base_ms * attempt as f64,
        BackoffStrategy::Exponential => base_ms * policy.multiplier.powi(attempt as i32 - 1),
    };

    let capped_ms = raw_ms.min(policy.max_delay_ms as f64);

    let final_ms = if policy.jitter && policy.jitter_factor > 0.0 {
        let spread = (fastrand::f64() * 2.0 - 1.0) * policy.jitter_factor;
        (capped_ms * (1.0 + spread)).max(0.0)
    } else {
        capped_ms
    };

    Duration::from_millis(final_ms.round() as u64)
}

// ---------------------------------------------------------------------------
// RetryController
// ---------------------------------------------------------------------------

/// Retry wrapper around arbitrary asynchronous operations.
///
/// The controller is shared state: `pause`/`resume` can be called from
/// another task while `execute` is in flight. Attempt history accumulates
/// across invocations until `reset()`.
pub struct RetryController {
    state: Mutex<RetryState>,
    history: Mutex<Vec<AttemptRecord>>,
    last_error: Mutex<Option<String>>,
    pause_token: Mutex<CancellationToken>,
}

impl RetryController {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(RetryState::Idle),
            history: Mutex::new(Vec::new()),
            last_error: Mutex::new(None),
            pause_token: Mutex::new(CancellationToken::new()),
        }
    }

    /// Suspend retrying. Any scheduled wait is abandoned and the in-flight
    /// `execute` call rejects with `RetryError::Paused`.
    pub fn pause(&self) {
        self.pause_token.lock().expect("pause token lock").cancel();
        tracing::debug!("retry controller paused");
    }

    /// Lift a pause. Does not restart anything by itself; callers invoke
    /// `execute` again, which starts a fresh attempt sequence.
    pub fn resume(&self) {
        let mut token = self.pause_token.lock().expect("pause token lock");
        *token = CancellationToken::new();
        *self.state.lock().expect("state lock") = RetryState::Idle;
        tracing::debug!("retry controller resumed");
    }

    /// Clear attempts, history, and the last error.
    pub fn reset(&self) {
        self.history.lock().expect("history lock").clear();
        *self.last_error.lock().expect("last error lock") = None;
        *self.state.lock().expect("state lock") = RetryState::Idle;
    }

    /// Current controller state.
    pub fn state(&self) -> RetryState {
        *self.state.lock().expect("state lock")
    }

    /// Snapshot of the attempt history.
    pub fn history(&self) -> Vec<AttemptRecord> {
        self.history.lock().expect("history lock").clone()
    }

    /// Message of the most recent failure, if any.
    pub fn last_error(&self) -> Option<String> {
        self.last_error.lock().expect("last error lock").clone()
    }

    fn set_state(&self, state: RetryState) {
        *self.state.lock().expect("state lock") = state;
    }

    fn record_attempt(&self, record: AttemptRecord) {
        self.history.lock().expect("history lock").push(record);
    }

    /// Execute `operation` under `policy`, retrying failures until success,
    /// pause, a non-retryable error, or budget exhaustion.
    ///
    /// The operation receives the 1-based attempt number. After the budget
    /// is exhausted the last error is returned as `RetryError::Failed`.
    pub async fn execute<T, E, F, Fut>(
        &self,
        policy: &RetryPolicy,
        mut operation: F,
    ) -> Result<T, RetryError<E>>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: RetryableError + std::fmt::Display,
    {
        let token = self.pause_token.lock().expect("pause token lock").clone();
        let max_attempts = policy.max_attempts.max(1);

        for attempt in 1..=max_attempts {
            if token.is_cancelled() {
                return Err(RetryError::Paused);
            }

            self.set_state(RetryState::Attempting);
            let started_at = Utc::now();
            let result = operation(attempt).await;
            let finished_at = Utc::now();

            match result {
                Ok(value) => {
                    self.record_attempt(AttemptRecord {
                        attempt,
                        started_at,
                        finished_at,
                        outcome: AttemptOutcome::Success,
                    });
                    self.set_state(RetryState::Idle);
                    return Ok(value);
                }
                Err(err) => {
                    let code = err.error_code().to_string();
                    let message = err.to_string();
                    self.record_attempt(AttemptRecord {
                        attempt,
                        started_at,
                        finished_at,
                        outcome: AttemptOutcome::Failure {
                            code: code.clone(),
                            message: message.clone(),
                        },
                    });
                    *self.last_error.lock().expect("last error lock") = Some(message);

                    if !policy.allows_code(&code) {
                        tracing::debug!(code, attempt, "error code not retryable under policy");
                        self.set_state(RetryState::Exhausted);
                        return Err(RetryError::Failed(err));
                    }

                    if attempt == max_attempts {
                        self.set_state(RetryState::Exhausted);
                        return Err(RetryError::Failed(err));
                    }

                    let delay = compute_delay(policy, attempt);
                    tracing::debug!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        code,
                        "scheduling retry"
                    );
                    self.set_state(RetryState::SchedulingRetry);

                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = token.cancelled() => {
                            return Err(RetryError::Paused);
                        }
                    }
                }
            }
        }

        unreachable!("loop returns on success, exhaustion, or pause")
    }
}

impl Default for RetryController {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Debug)]
    struct FakeError {
        code: &'static str,
    }

    impl std::fmt::Display for FakeError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "fake error ({})", self.code)
        }
    }

    impl RetryableError for FakeError {
        fn error_code(&self) -> &str {
            self.code
        }
    }

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            initial_delay_ms: 5,
            max_delay_ms: 50,
            jitter: false,
            max_attempts,
            ..RetryPolicy::default()
        }
    }

    // -----------------------------------------------------------------------
    // Delay computation
    // -----------------------------------------------------------------------

    #[test]
    fn test_fixed_delay() {
        let policy = RetryPolicy {
            strategy: BackoffStrategy::Fixed,
            initial_delay_ms: 250,
            jitter: false,
            ..RetryPolicy::default()
        };
        assert_eq!(compute_delay(&policy, 1), Duration::from_millis(250));
        assert_eq!(compute_delay(&policy, 5), Duration::from_millis(250));
    }

    #[test]
    fn test_linear_delay() {
        let policy = RetryPolicy {
            strategy: BackoffStrategy::Linear,
            initial_delay_ms: 100,
            max_delay_ms: 10_000,
            jitter: false,
            ..RetryPolicy::default()
        };
        assert_eq!(compute_delay(&policy, 1), Duration::from_millis(100));
        assert_eq!(compute_delay(&policy, 3), Duration::from_millis(300));
    }

    #[test]
    fn test_exponential_delay_sequence() {
        let policy = RetryPolicy {
            strategy: BackoffStrategy::Exponential,
            initial_delay_ms: 100,
            max_delay_ms: 10_000,
            multiplier: 2.0,
            jitter: false,
            max_attempts: 3,
            ..RetryPolicy::default()
        };
        // Delay after attempt 1 is 100ms, after attempt 2 is 200ms; attempt 3
        // is the last and needs no further delay.
        assert_eq!(compute_delay(&policy, 1), Duration::from_millis(100));
        assert_eq!(compute_delay(&policy, 2), Duration::from_millis(200));
    }

    #[test]
    fn test_delay_capped_at_max() {
        let policy = RetryPolicy {
            strategy: BackoffStrategy::Exponential,
            initial_delay_ms: 1_000,
            max_delay_ms: 3_000,
            multiplier: 10.0,
            jitter: false,
            ..RetryPolicy::default()
        };
        assert_eq!(compute_delay(&policy, 3), Duration::from_millis(3_000));
    }

    #[test]
    fn test_jitter_stays_within_bounds() {
        let policy = RetryPolicy {
            strategy: BackoffStrategy::Fixed,
            initial_delay_ms: 1_000,
            max_delay_ms: 10_000,
            jitter: true,
            jitter_factor: 0.2,
            ..RetryPolicy::default()
        };
        for _ in 0..100 {
            let delay = compute_delay(&policy, 1).as_millis() as u64;
            assert!((800..=1_200).contains(&delay), "delay {delay} out of bounds");
        }
    }

    // -----------------------------------------------------------------------
    // execute: success & exhaustion
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn test_fail_twice_then_succeed() {
        let controller = RetryController::new();
        let calls = Arc::new(AtomicU32::new(0));
        let calls_op = Arc::clone(&calls);

        let result: Result<&str, _> = controller
            .execute(&fast_policy(3), move |_attempt| {
                let calls = Arc::clone(&calls_op);
                async move {
                    if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(FakeError { code: "timeout" })
                    } else {
                        Ok("done")
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), "done");
        assert_eq!(calls.load(Ordering::SeqCst), 3);

        let history = controller.history();
        assert_eq!(history.len(), 3);
        assert!(!history[0].outcome.is_success());
        assert!(!history[1].outcome.is_success());
        assert!(history[2].outcome.is_success());
        assert_eq!(history[2].attempt, 3);
        assert_eq!(controller.state(), RetryState::Idle);
    }

    #[tokio::test]
    async fn test_exhaustion_returns_last_error() {
        let controller = RetryController::new();
        let result: Result<(), _> = controller
            .execute(&fast_policy(3), |_attempt| async {
                Err(FakeError { code: "server-error" })
            })
            .await;

        match result {
            Err(RetryError::Failed(err)) => assert_eq!(err.code, "server-error"),
            other => panic!("expected Failed, got {other:?}"),
        }
        assert_eq!(controller.history().len(), 3);
        assert_eq!(controller.state(), RetryState::Exhausted);
        assert!(controller.last_error().unwrap().contains("server-error"));
    }

    #[tokio::test]
    async fn test_non_retryable_code_fails_immediately() {
        let controller = RetryController::new();
        let policy = RetryPolicy {
            retryable_errors: Some(vec!["timeout".to_string()]),
            ..fast_policy(5)
        };

        let result: Result<(), _> = controller
            .execute(&policy, |_attempt| async {
                Err(FakeError { code: "unauthorized" })
            })
            .await;

        assert!(matches!(result, Err(RetryError::Failed(_))));
        // One attempt, no retries.
        assert_eq!(controller.history().len(), 1);
    }

    // -----------------------------------------------------------------------
    // execute: pause / resume
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn test_pause_mid_wait_rejects() {
        let controller = Arc::new(RetryController::new());
        let policy = RetryPolicy {
            strategy: BackoffStrategy::Fixed,
            initial_delay_ms: 5_000,
            jitter: false,
            max_attempts: 3,
            ..RetryPolicy::default()
        };

        let task_controller = Arc::clone(&controller);
        let handle = tokio::spawn(async move {
            task_controller
                .execute::<(), _, _, _>(&policy, |_attempt| async {
                    Err(FakeError { code: "timeout" })
                })
                .await
        });

        // Give the task time to fail once and enter the backoff wait.
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(controller.state(), RetryState::SchedulingRetry);
        controller.pause();

        let result = handle.await.unwrap();
        assert!(matches!(result, Err(RetryError::Paused)));
    }

    #[tokio::test]
    async fn test_fresh_execute_after_resume_starts_at_attempt_one() {
        let controller = RetryController::new();
        controller.pause();

        // While paused, execute rejects without attempting.
        let result: Result<(), _> = controller
            .execute(&fast_policy(3), |_attempt| async {
                Err(FakeError { code: "timeout" })
            })
            .await;
        assert!(matches!(result, Err(RetryError::Paused)));
        assert!(controller.history().is_empty());

        controller.resume();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_op = Arc::clone(&seen);
        let result: Result<&str, RetryError<FakeError>> = controller
            .execute(&fast_policy(3), move |attempt| {
                seen_op.lock().unwrap().push(attempt);
                async move { Ok("ok") }
            })
            .await;

        assert!(result.is_ok());
        assert_eq!(*seen.lock().unwrap(), vec![1]);
    }

    // -----------------------------------------------------------------------
    // reset
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn test_reset_clears_history_and_error() {
        let controller = RetryController::new();
        let _: Result<(), _> = controller
            .execute(&fast_policy(2), |_attempt| async {
                Err(FakeError { code: "timeout" })
            })
            .await;
        assert!(!controller.history().is_empty());
        assert!(controller.last_error().is_some());

        controller.reset();
        assert!(controller.history().is_empty());
        assert!(controller.last_error().is_none());
        assert_eq!(controller.state(), RetryState::Idle);
    }
}
