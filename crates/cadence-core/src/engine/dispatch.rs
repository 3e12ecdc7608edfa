//! Step dispatch: payload submission with a hard deadline.
//!
//! `StepDispatcher` sends a built payload to the execution sandbox through
//! the `SandboxClient` port and races the sandbox's terminal signal against
//! a timer. When the timer wins the outcome is `timeout`, deterministically:
//! the submit future is dropped and a late sandbox signal is discarded.
//! The dispatcher never mutates persisted state; that is the orchestrator's
//! job.

use std::time::Duration;

use cadence_types::error::ErrorDetail;
use cadence_types::execution::StepOutcome;
use cadence_types::job::{JobPayload, SandboxResult};
use serde_json::{Value, json};

use super::retry::RetryableError;

// ---------------------------------------------------------------------------
// SandboxClient port
// ---------------------------------------------------------------------------

/// Transport-level failure talking to the sandbox.
#[derive(Debug, thiserror::Error)]
pub enum SandboxError {
    /// The sandbox could not be reached at all.
    #[error("sandbox unreachable: {0}")]
    Connection(String),

    /// The sandbox rejected the payload outright.
    #[error("sandbox rejected job ({code}): {message}")]
    Rejected { code: String, message: String },
}

impl SandboxError {
    /// Catalog code for this failure.
    pub fn error_code(&self) -> &str {
        match self {
            SandboxError::Connection(_) => "connection-refused",
            SandboxError::Rejected { code, .. } => code,
        }
    }
}

/// Client port for the execution sandbox collaborator.
///
/// Implementations submit the payload and resolve with the job's terminal
/// result. Uses RPITIT (native async fn in traits, Rust 2024 edition).
pub trait SandboxClient: Send + Sync {
    fn submit(
        &self,
        payload: &JobPayload,
    ) -> impl std::future::Future<Output = Result<SandboxResult, SandboxError>> + Send;
}

// ---------------------------------------------------------------------------
// Dispatch failure (retry classification)
// ---------------------------------------------------------------------------

/// Non-success dispatch result, carried through the retry controller so the
/// final outcome survives exhaustion.
#[derive(Debug)]
pub struct DispatchFailure {
    pub outcome: StepOutcome,
}

impl std::fmt::Display for DispatchFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.outcome.error {
            Some(err) => write!(f, "{}: {}", err.code, err.message),
            None => write!(f, "dispatch failed"),
        }
    }
}

impl RetryableError for DispatchFailure {
    fn error_code(&self) -> &str {
        self.outcome
            .error
            .as_ref()
            .map(|e| e.code.as_str())
            .unwrap_or("server-error")
    }
}

// ---------------------------------------------------------------------------
// StepDispatcher
// ---------------------------------------------------------------------------

/// Sends job payloads to the sandbox and reports terminal outcomes.
pub struct StepDispatcher<S> {
    client: S,
}

impl<S: SandboxClient> StepDispatcher<S> {
    pub fn new(client: S) -> Self {
        Self { client }
    }

    /// Dispatch a payload and wait for a terminal signal or the deadline.
    ///
    /// Resolves to a `timeout` outcome when the deadline elapses first; the
    /// in-flight submit future is dropped so a late sandbox signal cannot
    /// change the result.
    pub async fn dispatch(&self, payload: &JobPayload, deadline: Duration) -> StepOutcome {
        tracing::debug!(
            execution_log_id = %payload.execution_log_id,
            work = payload.work.label(),
            deadline_secs = deadline.as_secs(),
            "dispatching job"
        );

        match tokio::time::timeout(deadline, self.client.submit(payload)).await {
            Err(_elapsed) => StepOutcome::timeout(ErrorDetail::from_code(
                "timeout",
                format!(
                    "sandbox did not report a result within {}s",
                    deadline.as_secs()
                ),
            )),
            Ok(Err(err)) => {
                let code = err.error_code().to_string();
                StepOutcome::failure(ErrorDetail::from_code(&code, err.to_string()), None)
            }
            Ok(Ok(result)) => Self::outcome_from_result(result),
        }
    }

    /// Map a sandbox result to a step outcome.
    fn outcome_from_result(result: SandboxResult) -> StepOutcome {
        let output = Self::result_output(&result);

        if result.is_success() {
            return StepOutcome::success(output);
        }

        let error = if let Some(status) = result.http_status {
            ErrorDetail::from_http_status(
                status,
                format!("sandbox reported HTTP status {status}"),
            )
        } else {
            let exit = result.exit_code.unwrap_or(-1);
            let stderr = result.stderr.as_deref().unwrap_or("");
            ErrorDetail::from_code(
                "script-error",
                format!("script exited with code {exit}: {stderr}"),
            )
        };

        StepOutcome::failure(error, output)
    }

    /// Prefer the job's structured output; otherwise wrap the raw streams.
    fn result_output(result: &SandboxResult) -> Option<Value> {
        if let Some(output) = &result.output {
            return Some(output.clone());
        }
        if result.stdout.is_none() && result.stderr.is_none() {
            return None;
        }
        Some(json!({
            "stdout": result.stdout,
            "stderr": result.stderr,
        }))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
