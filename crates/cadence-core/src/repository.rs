//! Persistence port for the engine.
//!
//! `EngineRepository` is the storage interface the orchestrator drives:
//! step lookups and counters, execution records, and step execution records.
//! The infrastructure layer (cadence-infra) implements it with SQLite; test
//! modules implement it in memory.
//!
//! The engine treats the implementation as a transactional store and never
//! wraps repository calls in its own retry controller.

use cadence_types::error::{ErrorDetail, RepositoryError};
use cadence_types::execution::{
    Execution, ExecutionStatus, ExecutionTotals, StepExecution, StepExecutionStatus,
};
use cadence_types::step::Step;
use uuid::Uuid;

/// Result of an atomic increment-and-check of a step's execution counter.
///
/// The check and the increment must be a single atomic operation so two
/// concurrent dispatches cannot both pass a `max_executions` limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CounterDecision {
    /// The counter was incremented; `count` is the new value.
    Allowed { count: u32 },
    /// The limit is reached; the counter was not incremented.
    LimitReached,
}

/// Repository trait for engine persistence.
///
/// Covers three entity families:
/// - **Steps:** read access plus the atomic execution counter.
/// - **Executions:** create/update/query run records.
/// - **Step executions:** create/update/query per-step records.
///
/// Uses native async fn in traits (RPITIT, Rust 2024 edition).
pub trait EngineRepository: Send + Sync {
    // -----------------------------------------------------------------------
    // Steps
    // -----------------------------------------------------------------------

    /// Get a step by id.
    fn get_step(
        &self,
        id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Option<Step>, RepositoryError>> + Send;

    /// List the member steps of a workflow, in membership order.
    fn list_workflow_steps(
        &self,
        workflow_id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Vec<Step>, RepositoryError>> + Send;

    /// Atomically increment the step's execution counter, refusing when the
    /// step's `max_executions` (non-zero) is already reached.
    fn try_increment_execution_count(
        &self,
        step_id: &Uuid,
    ) -> impl std::future::Future<Output = Result<CounterDecision, RepositoryError>> + Send;

    /// Reset a step's execution counter (used on reactivation when the step
    /// opted in with `reset_count_on_activate`).
    fn reset_execution_count(
        &self,
        step_id: &Uuid,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    // -----------------------------------------------------------------------
    // Executions
    // -----------------------------------------------------------------------

    /// Create a new execution record.
    fn create_execution(
        &self,
        execution: &Execution,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Update an execution's status and optionally error, data snapshot,
    /// and totals.
    fn update_execution_status(
        &self,
        execution_id: &Uuid,
        status: ExecutionStatus,
        error: Option<&str>,
        data: Option<&serde_json::Value>,
        totals: Option<ExecutionTotals>,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Get an execution by id.
    fn get_execution(
        &self,
        execution_id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Option<Execution>, RepositoryError>> + Send;

    // -----------------------------------------------------------------------
    // Step executions
    // -----------------------------------------------------------------------

    /// Append a new step execution record.
    fn create_step_execution(
        &self,
        record: &StepExecution,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Update a step execution's status and optionally output/error.
    fn update_step_execution(
        &self,
        record_id: &Uuid,
        status: StepExecutionStatus,
        attempts: u32,
        output: Option<&serde_json::Value>,
        error: Option<&ErrorDetail>,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// List all step executions for an execution, ordered by sequence.
    fn list_step_executions(
        &self,
        execution_id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Vec<StepExecution>, RepositoryError>> + Send;
}
