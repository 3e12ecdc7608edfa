//! Execution tracking types.
//!
//! An `Execution` is one run of a workflow (or of a standalone step). Each
//! step dispatched within it produces a `StepExecution` record, exclusively
//! owned by that execution. Both are mutated only by the orchestrator and
//! become immutable once terminal.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::ErrorDetail;

// ---------------------------------------------------------------------------
// Execution
// ---------------------------------------------------------------------------

/// One run of a workflow or standalone step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Execution {
    /// UUIDv7 run id.
    pub id: Uuid,
    /// The workflow being executed, when this is a workflow run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow_id: Option<Uuid>,
    /// The step being executed, when this is a standalone step run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_id: Option<Uuid>,
    /// Owning user (inherited from the workflow or step).
    pub user_id: Uuid,
    /// Current status.
    pub status: ExecutionStatus,
    /// What fired this execution.
    pub trigger: TriggerKind,
    /// Aggregate step counts.
    #[serde(default)]
    pub totals: ExecutionTotals,
    /// Snapshot of the execution-scoped data bag: step outputs keyed by
    /// step execution id. Accumulated append-only during the run.
    #[serde(default)]
    pub data: Value,
    /// Error message when the execution failed as a whole.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

/// Aggregate step counts for an execution.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionTotals {
    pub total_steps: u32,
    pub succeeded: u32,
    pub failed: u32,
}

/// Overall status of an execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Success,
    Failure,
    /// Some steps succeeded and some failed.
    Partial,
    /// A step timed out and nothing downstream recovered.
    Timeout,
    Paused,
}

impl ExecutionStatus {
    /// Whether the execution has finished and is now immutable.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ExecutionStatus::Success
                | ExecutionStatus::Failure
                | ExecutionStatus::Partial
                | ExecutionStatus::Timeout
        )
    }
}

/// What fired an execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerKind {
    Manual,
    Schedule,
    Webhook,
}

// ---------------------------------------------------------------------------
// StepExecution
// ---------------------------------------------------------------------------

/// The record of one step running inside one execution.
///
/// When a step fans out to multiple target servers, one record is created
/// per target; the records share `step_id` but differ in `target_server`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepExecution {
    /// UUIDv7 record id. This is the `execution_log_id` the sandbox sees.
    pub id: Uuid,
    /// Owning execution.
    pub execution_id: Uuid,
    /// The step that ran.
    pub step_id: Uuid,
    /// Dispatch order within the execution (0-based).
    pub sequence: u32,
    /// Current status.
    pub status: StepExecutionStatus,
    /// Attempts made so far (1-based after the first dispatch).
    #[serde(default)]
    pub attempts: u32,
    /// Output payload reported by the sandbox.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    /// Structured error for terminal failures.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorDetail>,
    /// The transition that caused this step to be scheduled, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheduled_by: Option<Uuid>,
    /// The step execution whose output feeds this one's input, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub predecessor: Option<Uuid>,
    /// Target server for fanned-out dispatches.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_server: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

/// Status of an individual step execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepExecutionStatus {
    Pending,
    Running,
    Success,
    Failure,
    Timeout,
    /// Fan-out aggregate: some targets succeeded, some failed.
    Partial,
    /// Not dispatched because the step's execution budget is exhausted.
    Paused,
}

impl StepExecutionStatus {
    /// Whether the record has reached a final state.
    pub fn is_terminal(&self) -> bool {
        !matches!(
            self,
            StepExecutionStatus::Pending | StepExecutionStatus::Running
        )
    }
}

// ---------------------------------------------------------------------------
// StepOutcome
// ---------------------------------------------------------------------------

/// Terminal result of dispatching one job payload, as reported by the
/// dispatcher. Persisting it onto the step execution record is the
/// orchestrator's job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepOutcome {
    pub status: OutcomeStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorDetail>,
}

/// Terminal status of a single dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeStatus {
    Success,
    Failure,
    Timeout,
}

impl StepOutcome {
    pub fn success(output: Option<Value>) -> Self {
        Self {
            status: OutcomeStatus::Success,
            output,
            error: None,
        }
    }

    pub fn failure(error: ErrorDetail, output: Option<Value>) -> Self {
        Self {
            status: OutcomeStatus::Failure,
            output,
            error: Some(error),
        }
    }

    pub fn timeout(error: ErrorDetail) -> Self {
        Self {
            status: OutcomeStatus::Timeout,
            output: None,
            error: Some(error),
        }
    }
}

impl From<OutcomeStatus> for StepExecutionStatus {
    fn from(status: OutcomeStatus) -> Self {
        match status {
            OutcomeStatus::Success => StepExecutionStatus::Success,
            OutcomeStatus::Failure => StepExecutionStatus::Failure,
            OutcomeStatus::Timeout => StepExecutionStatus::Timeout,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
