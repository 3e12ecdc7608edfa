//! Workflow orchestrator: frontier traversal, transition evaluation, and
//! execution bookkeeping.
//!
//! `Orchestrator::run` turns a persisted workflow graph into an ordered,
//! fault-tolerant sequence of dispatched jobs:
//!
//! 1. Validate the graph (membership + acyclicity) before any dispatch.
//! 2. Seed the work queue with the initial frontier (steps with no
//!    incoming transition).
//! 3. Dispatch queue entries as concurrent tasks bounded by the fan-out
//!    semaphore. Each task checks the step's execution budget atomically,
//!    builds payloads, and drives the dispatcher through a retry
//!    controller.
//! 4. When a step reaches a terminal status, evaluate its outgoing
//!    transitions and enqueue fired targets (never re-enqueueing a step
//!    within one execution).
//! 5. When the queue drains, compute the aggregate execution status.
//!
//! Step-level failures never abort the execution; only graph and storage
//! failures are fatal and propagate to the caller.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use cadence_types::config::EngineConfig;
use cadence_types::error::ErrorDetail;
use cadence_types::execution::{
    Execution, ExecutionStatus, ExecutionTotals, OutcomeStatus, StepExecution,
    StepExecutionStatus, StepOutcome, TriggerKind,
};
use cadence_types::job::JobTarget;
use cadence_types::retry::RetryPolicy;
use cadence_types::step::Step;
use cadence_types::workflow::{Transition, TransitionCondition, Workflow};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde_json::{Value, json};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use uuid::Uuid;

use crate::expression::Evaluator;
use crate::repository::{CounterDecision, EngineRepository};
use crate::store::{DataBag, VariableStore};

use super::dispatch::{DispatchFailure, SandboxClient, StepDispatcher};
use super::graph::{ExecutionGraph, GraphError};
use super::payload::{self, PayloadContext};
use super::retry::{RetryController, RetryError};

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors that abort a whole execution.
#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    /// Cycle or malformed transition. Fatal before any dispatch happens.
    #[error(transparent)]
    Graph(#[from] GraphError),

    /// The persistence collaborator failed. Fatal; the engine does not
    /// retry storage under its own retry controller.
    #[error("storage failure: {0}")]
    Storage(String),

    /// No running execution with this id.
    #[error("execution not found: {0}")]
    ExecutionNotFound(Uuid),

    /// The referenced step does not exist.
    #[error("step not found: {0}")]
    StepNotFound(Uuid),
}

fn storage(err: cadence_types::error::RepositoryError) -> OrchestratorError {
    OrchestratorError::Storage(err.to_string())
}

// ---------------------------------------------------------------------------
// Internal traversal state
// ---------------------------------------------------------------------------

/// One entry of the traversal work queue.
struct QueueItem {
    step_id: Uuid,
    /// Transition that scheduled this step, None for frontier members.
    scheduled_by: Option<Uuid>,
    /// Candidate input sources: (chain record id, completion time). With
    /// multiple incoming edges the most recently completed wins.
    predecessors: Vec<(Uuid, DateTime<Utc>)>,
}

/// Aggregate result of one step within the execution.
struct StepAggregate {
    status: StepExecutionStatus,
    output: Option<Value>,
    /// Whether any outgoing transition fired from this step.
    fired_transition: bool,
}

/// What a step task reports back to the traversal loop.
struct StepTaskOutput {
    step_id: Uuid,
    status: StepExecutionStatus,
    output: Option<Value>,
    /// Record id whose data-bag slot feeds successors.
    chain_id: Option<Uuid>,
    completed_at: DateTime<Utc>,
}

/// Per-execution handle for cancellation and condition access.
struct RunHandle {
    cancel: tokio_util::sync::CancellationToken,
    bag: Arc<DataBag>,
}

/// Shared context cloned into every spawned step task.
struct TaskCtx<R, V, S> {
    repo: Arc<R>,
    variables: Arc<V>,
    dispatcher: Arc<StepDispatcher<S>>,
    bag: Arc<DataBag>,
    cancel: tokio_util::sync::CancellationToken,
    fan_out: Arc<Semaphore>,
    sequence: Arc<AtomicU32>,
    config: Arc<EngineConfig>,
    override_server_ids: Option<Arc<Vec<Uuid>>>,
    execution_id: Uuid,
    initial_input: Option<Value>,
}

impl<R, V, S> Clone for TaskCtx<R, V, S> {
    fn clone(&self) -> Self {
        Self {
            repo: Arc::clone(&self.repo),
            variables: Arc::clone(&self.variables),
            dispatcher: Arc::clone(&self.dispatcher),
            bag: Arc::clone(&self.bag),
            cancel: self.cancel.clone(),
            fan_out: Arc::clone(&self.fan_out),
            sequence: Arc::clone(&self.sequence),
            config: Arc::clone(&self.config),
            override_server_ids: self.override_server_ids.clone(),
            execution_id: self.execution_id,
            initial_input: self.initial_input.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

/// The top-level workflow execution engine.
///
/// Generic over the persistence repository, the variable store, and the
/// sandbox client so infrastructure can be swapped (SQLite in production,
/// in-memory in tests). The condition evaluator is pluggable behind a
/// trait object.
pub struct Orchestrator<R, V, S> {
    repo: Arc<R>,
    variables: Arc<V>,
    dispatcher: Arc<StepDispatcher<S>>,
    evaluator: Arc<dyn Evaluator>,
    config: Arc<EngineConfig>,
    fan_out: Arc<Semaphore>,
    active: DashMap<Uuid, RunHandle>,
}

impl<R, V, S> Orchestrator<R, V, S>
where
    R: EngineRepository + 'static,
    V: VariableStore + 'static,
    S: SandboxClient + 'static,
{
    pub fn new(
        repo: R,
        variables: V,
        sandbox: S,
        evaluator: Arc<dyn Evaluator>,
        config: EngineConfig,
    ) -> Self {
        let fan_out = Arc::new(Semaphore::new(config.max_parallel_steps.max(1)));
        Self {
            repo: Arc::new(repo),
            variables: Arc::new(variables),
            dispatcher: Arc::new(StepDispatcher::new(sandbox)),
            evaluator,
            config: Arc::new(config),
            fan_out,
            active: DashMap::new(),
        }
    }

    // -----------------------------------------------------------------------
    // Public entry points
    // -----------------------------------------------------------------------

    /// Run a workflow to completion and return its terminal execution.
    pub async fn run(
        &self,
        workflow: &Workflow,
        trigger: TriggerKind,
        initial_input: Option<Value>,
    ) -> Result<Execution, OrchestratorError> {
        let steps = self
            .repo
            .list_workflow_steps(&workflow.id)
            .await
            .map_err(storage)?;

        self.run_internal(
            Some(workflow.id),
            None,
            workflow.user_id,
            steps,
            workflow.transitions.clone(),
            workflow.override_server_ids.clone(),
            trigger,
            initial_input,
        )
        .await
    }

    /// Run a single standalone step as its own execution.
    pub async fn run_step(
        &self,
        step_id: &Uuid,
        trigger: TriggerKind,
        initial_input: Option<Value>,
    ) -> Result<Execution, OrchestratorError> {
        let step = self
            .repo
            .get_step(step_id)
            .await
            .map_err(storage)?
            .ok_or(OrchestratorError::StepNotFound(*step_id))?;
        let user_id = step.user_id;

        self.run_internal(
            None,
            Some(*step_id),
            user_id,
            vec![step],
            Vec::new(),
            None,
            trigger,
            initial_input,
        )
        .await
    }

    /// Cancel a running execution.
    ///
    /// Propagates to all in-flight step tasks: their retry controllers are
    /// paused and unfinished step executions are marked failed with a
    /// cancellation error. Already-terminal records are untouched.
    pub async fn cancel(&self, execution_id: &Uuid) -> Result<(), OrchestratorError> {
        let handle = self
            .active
            .get(execution_id)
            .ok_or(OrchestratorError::ExecutionNotFound(*execution_id))?;
        handle.cancel.cancel();
        tracing::info!(%execution_id, "execution cancelled");
        Ok(())
    }

    /// Set a named condition on a running execution, for `on_condition`
    /// transition evaluation. Called on behalf of running steps.
    pub fn set_condition(
        &self,
        execution_id: &Uuid,
        name: &str,
        value: Value,
    ) -> Result<(), OrchestratorError> {
        let handle = self
            .active
            .get(execution_id)
            .ok_or(OrchestratorError::ExecutionNotFound(*execution_id))?;
        handle.bag.set_condition(name, value);
        Ok(())
    }

    /// Get a named condition value from a running execution.
    pub fn get_condition(&self, execution_id: &Uuid, name: &str) -> Option<Value> {
        self.active
            .get(execution_id)
            .and_then(|handle| handle.bag.get_condition(name))
    }

    // -----------------------------------------------------------------------
    // Run internals
    // -----------------------------------------------------------------------

    #[allow(clippy::too_many_arguments)]
    async fn run_internal(
        &self,
        workflow_id: Option<Uuid>,
        step_id: Option<Uuid>,
        user_id: Uuid,
        steps: Vec<Step>,
        transitions: Vec<Transition>,
        override_server_ids: Option<Vec<Uuid>>,
        trigger: TriggerKind,
        initial_input: Option<Value>,
    ) -> Result<Execution, OrchestratorError> {
        let execution_id = Uuid::now_v7();
        let mut execution = Execution {
            id: execution_id,
            workflow_id,
            step_id,
            user_id,
            status: ExecutionStatus::Running,
            trigger,
            totals: ExecutionTotals::default(),
            data: json!({}),
            error: None,
            started_at: Utc::now(),
            finished_at: None,
        };
        self.repo
            .create_execution(&execution)
            .await
            .map_err(storage)?;

        tracing::info!(
            %execution_id,
            workflow_id = ?workflow_id,
            steps = steps.len(),
            "starting execution"
        );

        // Validate the graph before dispatching anything. A cycle or a
        // dangling transition fails the execution immediately.
        let graph = match ExecutionGraph::build(&steps, &transitions) {
            Ok(graph) => graph,
            Err(err) => {
                let message = err.to_string();
                self.repo
                    .update_execution_status(
                        &execution_id,
                        ExecutionStatus::Failure,
                        Some(&message),
                        None,
                        None,
                    )
                    .await
                    .map_err(storage)?;
                return Err(err.into());
            }
        };

        let cancel = tokio_util::sync::CancellationToken::new();
        let bag = Arc::new(DataBag::new());
        self.active.insert(
            execution_id,
            RunHandle {
                cancel: cancel.clone(),
                bag: Arc::clone(&bag),
            },
        );

        let ctx = TaskCtx {
            repo: Arc::clone(&self.repo),
            variables: Arc::clone(&self.variables),
            dispatcher: Arc::clone(&self.dispatcher),
            bag: Arc::clone(&bag),
            cancel: cancel.clone(),
            fan_out: Arc::clone(&self.fan_out),
            sequence: Arc::new(AtomicU32::new(0)),
            config: Arc::clone(&self.config),
            override_server_ids: override_server_ids.map(Arc::new),
            execution_id,
            initial_input,
        };

        let step_map: HashMap<Uuid, Arc<Step>> =
            steps.into_iter().map(|s| (s.id, Arc::new(s))).collect();

        let execution_timeout =
            Duration::from_secs(self.config.default_execution_timeout_secs.max(1));
        let traversal = self.traverse(&graph, &step_map, &ctx);

        let outcome = tokio::time::timeout(execution_timeout, traversal).await;
        self.active.remove(&execution_id);

        let (status, error, totals) = match outcome {
            // The whole execution outran its wall-time budget. In-flight
            // tasks are dropped with the traversal future.
            Err(_elapsed) => {
                cancel.cancel();
                let totals = self.totals_from_records(&execution_id).await;
                (
                    ExecutionStatus::Timeout,
                    Some(format!(
                        "execution exceeded {}s",
                        execution_timeout.as_secs()
                    )),
                    totals,
                )
            }
            Ok(Err(err)) => {
                let message = err.to_string();
                let _ = self
                    .repo
                    .update_execution_status(
                        &execution_id,
                        ExecutionStatus::Failure,
                        Some(&message),
                        Some(&bag.snapshot()),
                        None,
                    )
                    .await;
                return Err(err);
            }
            Ok(Ok(results)) => {
                if cancel.is_cancelled() {
                    let totals = Self::totals_from_results(&results);
                    (
                        ExecutionStatus::Failure,
                        Some("execution cancelled".to_string()),
                        totals,
                    )
                } else {
                    let status = Self::aggregate_execution_status(&graph, &results);
                    (status, None, Self::totals_from_results(&results))
                }
            }
        };

        execution.status = status;
        execution.error = error.clone();
        execution.totals = totals;
        execution.data = bag.snapshot();
        execution.finished_at = Some(Utc::now());

        self.repo
            .update_execution_status(
                &execution_id,
                status,
                error.as_deref(),
                Some(&execution.data),
                Some(totals),
            )
            .await
            .map_err(storage)?;

        tracing::info!(%execution_id, status = ?status, "execution finished");
        Ok(execution)
    }

    /// Drive the work queue until it drains.
    async fn traverse(
        &self,
        graph: &ExecutionGraph,
        step_map: &HashMap<Uuid, Arc<Step>>,
        ctx: &TaskCtx<R, V, S>,
    ) -> Result<HashMap<Uuid, StepAggregate>, OrchestratorError> {
        let mut queue: VecDeque<QueueItem> = graph
            .initial_frontier()
            .into_iter()
            .map(|step_id| QueueItem {
                step_id,
                scheduled_by: None,
                predecessors: Vec::new(),
            })
            .collect();
        let mut scheduled: HashSet<Uuid> = queue.iter().map(|item| item.step_id).collect();
        let mut results: HashMap<Uuid, StepAggregate> = HashMap::new();
        let mut tasks: JoinSet<Result<StepTaskOutput, String>> = JoinSet::new();

        loop {
            while let Some(item) = queue.pop_front() {
                if ctx.cancel.is_cancelled() {
                    // Stop scheduling new work; queued steps simply never run.
                    break;
                }
                let step = step_map
                    .get(&item.step_id)
                    .cloned()
                    .ok_or_else(|| {
                        OrchestratorError::Storage(format!(
                            "step {} missing from workflow",
                            item.step_id
                        ))
                    })?;
                tasks.spawn(run_step_task(ctx.clone(), step, item));
            }

            let Some(joined) = tasks.join_next().await else {
                break;
            };
            let task = joined
                .map_err(|e| OrchestratorError::Storage(format!("step task failed: {e}")))?;
            let output = task.map_err(OrchestratorError::Storage)?;

            let mut fired = false;
            if !ctx.cancel.is_cancelled() {
                for transition in graph.outgoing(&output.step_id) {
                    if !self.should_fire(transition, &output, &ctx.bag) {
                        continue;
                    }
                    fired = true;
                    let target = transition.target_step;

                    // Fan-in onto a not-yet-started step: add an input
                    // candidate instead of re-enqueueing.
                    if let Some(pending) = queue.iter_mut().find(|i| i.step_id == target) {
                        if let Some(chain) = output.chain_id {
                            pending.predecessors.push((chain, output.completed_at));
                        }
                        continue;
                    }
                    if scheduled.contains(&target) {
                        continue;
                    }

                    scheduled.insert(target);
                    queue.push_back(QueueItem {
                        step_id: target,
                        scheduled_by: Some(transition.id),
                        predecessors: output
                            .chain_id
                            .map(|chain| vec![(chain, output.completed_at)])
                            .unwrap_or_default(),
                    });
                }
            }

            results.insert(
                output.step_id,
                StepAggregate {
                    status: output.status,
                    output: output.output,
                    fired_transition: fired,
                },
            );
        }

        Ok(results)
    }

    /// Decide whether a transition fires for a terminal source step.
    ///
    /// - `always` fires on every terminal status, including `paused`.
    /// - `on_success` / `on_failure` require an exact status match; a
    ///   `timeout` or `paused` source fires neither.
    /// - `on_condition` evaluates against the source output, the data bag,
    ///   and named conditions. Evaluation errors count as not fired.
    fn should_fire(
        &self,
        transition: &Transition,
        output: &StepTaskOutput,
        bag: &DataBag,
    ) -> bool {
        match &transition.condition {
            TransitionCondition::Always => true,
            TransitionCondition::OnSuccess => output.status == StepExecutionStatus::Success,
            TransitionCondition::OnFailure => output.status == StepExecutionStatus::Failure,
            TransitionCondition::OnCondition { expression } => {
                let context = json!({
                    "output": output.output.clone().unwrap_or(Value::Null),
                    "status": output.status,
                    "data": bag.snapshot(),
                    "conditions": bag.conditions_json(),
                });
                match self.evaluator.eval_bool(expression, &context) {
                    Ok(result) => result,
                    Err(err) => {
                        tracing::warn!(
                            transition = %transition.id,
                            error = %err,
                            "condition evaluation failed, transition not fired"
                        );
                        false
                    }
                }
            }
        }
    }

    /// Aggregate execution status once the queue has drained.
    ///
    /// - all steps succeeded -> success
    /// - a sink (designated output step) failed -> failure
    /// - a step timed out and fired no transition -> timeout
    /// - anything else mixed -> partial
    fn aggregate_execution_status(
        graph: &ExecutionGraph,
        results: &HashMap<Uuid, StepAggregate>,
    ) -> ExecutionStatus {
        if results
            .values()
            .all(|r| r.status == StepExecutionStatus::Success)
        {
            return ExecutionStatus::Success;
        }

        let sink_failed = graph.sinks().iter().any(|id| {
            results
                .get(id)
                .is_some_and(|r| r.status == StepExecutionStatus::Failure)
        });
        if sink_failed {
            return ExecutionStatus::Failure;
        }

        let unrecovered_timeout = results
            .values()
            .any(|r| r.status == StepExecutionStatus::Timeout && !r.fired_transition);
        if unrecovered_timeout {
            return ExecutionStatus::Timeout;
        }

        ExecutionStatus::Partial
    }

    fn totals_from_results(results: &HashMap<Uuid, StepAggregate>) -> ExecutionTotals {
        let mut totals = ExecutionTotals {
            total_steps: results.len() as u32,
            succeeded: 0,
            failed: 0,
        };
        for aggregate in results.values() {
            match aggregate.status {
                StepExecutionStatus::Success => totals.succeeded += 1,
                StepExecutionStatus::Failure
                | StepExecutionStatus::Timeout
                | StepExecutionStatus::Partial => totals.failed += 1,
                _ => {}
            }
        }
        totals
    }

    /// Fallback totals computed from persisted records, for paths where the
    /// in-memory results are gone (execution-level timeout).
    async fn totals_from_records(&self, execution_id: &Uuid) -> ExecutionTotals {
        let records = self
            .repo
            .list_step_executions(execution_id)
            .await
            .unwrap_or_default();
        let mut totals = ExecutionTotals {
            total_steps: records.len() as u32,
            succeeded: 0,
            failed: 0,
        };
        for record in &records {
            match record.status {
                StepExecutionStatus::Success => totals.succeeded += 1,
                StepExecutionStatus::Failure
                | StepExecutionStatus::Timeout
                | StepExecutionStatus::Partial => totals.failed += 1,
                _ => {}
            }
        }
        totals
    }
}

// ---------------------------------------------------------------------------
// Step task
// ---------------------------------------------------------------------------

/// Run one step: budget check, payload build, dispatch with retry, and
/// record bookkeeping. Fan-out steps produce one record per target under a
/// single fan-out permit.
async fn run_step_task<R, V, S>(
    ctx: TaskCtx<R, V, S>,
    step: Arc<Step>,
    item: QueueItem,
) -> Result<StepTaskOutput, String>
where
    R: EngineRepository + 'static,
    V: VariableStore + 'static,
    S: SandboxClient + 'static,
{
    let _permit = ctx
        .fan_out
        .clone()
        .acquire_owned()
        .await
        .map_err(|e| e.to_string())?;

    if ctx.cancel.is_cancelled() {
        let record = cancelled_record(&ctx, &step, &item);
        ctx.repo
            .create_step_execution(&record)
            .await
            .map_err(|e| e.to_string())?;
        return Ok(StepTaskOutput {
            step_id: step.id,
            status: StepExecutionStatus::Failure,
            output: None,
            chain_id: Some(record.id),
            completed_at: Utc::now(),
        });
    }

    // Atomic increment-and-check of the step's execution budget. Two
    // concurrent dispatches can never both pass a max_executions limit.
    match ctx
        .repo
        .try_increment_execution_count(&step.id)
        .await
        .map_err(|e| e.to_string())?
    {
        CounterDecision::Allowed { count } => {
            tracing::debug!(step_id = %step.id, count, "execution budget ok");
        }
        CounterDecision::LimitReached => {
            tracing::info!(step_id = %step.id, "execution budget exhausted, pausing step");
            let record = paused_record(&ctx, &step, &item);
            ctx.repo
                .create_step_execution(&record)
                .await
                .map_err(|e| e.to_string())?;
            return Ok(StepTaskOutput {
                step_id: step.id,
                status: StepExecutionStatus::Paused,
                output: None,
                chain_id: Some(record.id),
                completed_at: Utc::now(),
            });
        }
    }

    let variables = ctx
        .variables
        .resolve_map(&step.user_id)
        .await
        .map_err(|e| e.to_string())?;

    // Targets resolve before environment; a defective target configuration
    // fails the step without retry.
    let targets = match payload::resolve_targets(
        &step,
        ctx.override_server_ids.as_deref().map(|v| v.as_slice()),
        &ctx.config,
    ) {
        Ok(targets) => targets,
        Err(err) => {
            let detail = ErrorDetail::from_code("invalid-config", err.to_string());
            let mut record = base_record(&ctx, &step, &item, None);
            record.status = StepExecutionStatus::Failure;
            record.error = Some(detail);
            record.finished_at = Some(Utc::now());
            ctx.repo
                .create_step_execution(&record)
                .await
                .map_err(|e| e.to_string())?;
            return Ok(StepTaskOutput {
                step_id: step.id,
                status: StepExecutionStatus::Failure,
                output: None,
                chain_id: Some(record.id),
                completed_at: Utc::now(),
            });
        }
    };

    // One record per target, all created pending before any dispatch.
    let mut records: Vec<(StepExecution, JobTarget)> = Vec::with_capacity(targets.len());
    for target in targets {
        let server = match &target {
            JobTarget::Server { server_id } => Some(*server_id),
            JobTarget::Container { .. } => None,
        };
        let record = base_record(&ctx, &step, &item, server);
        ctx.repo
            .create_step_execution(&record)
            .await
            .map_err(|e| e.to_string())?;
        records.push((record, target));
    }

    let chain_id = records[0].0.id;
    for (source, completed_at) in &item.predecessors {
        ctx.bag.link_predecessor(chain_id, *source, *completed_at);
    }
    let input = merge_input(ctx.initial_input.clone(), ctx.bag.read_input(&chain_id));

    // Dispatch every target concurrently under this task's fan-out permit.
    let mut dispatches: JoinSet<Result<(Uuid, Option<Uuid>, StepOutcome), String>> =
        JoinSet::new();
    for (record, target) in &records {
        let ctx = ctx.clone();
        let step = Arc::clone(&step);
        let record_id = record.id;
        let server = record.target_server;
        let target = target.clone();
        let variables = variables.clone();
        let input = input.clone();
        dispatches.spawn(async move {
            let outcome =
                dispatch_one_target(&ctx, &step, record_id, target, &variables, input).await?;
            Ok((record_id, server, outcome))
        });
    }

    let mut outcomes: Vec<(Uuid, Option<Uuid>, StepOutcome)> = Vec::new();
    while let Some(joined) = dispatches.join_next().await {
        let result = joined.map_err(|e| format!("target dispatch failed: {e}"))?;
        outcomes.push(result?);
    }

    let status = aggregate_step_status(&outcomes);
    let output = aggregate_step_output(&outcomes);
    let completed_at = Utc::now();

    if let Some(output) = &output {
        ctx.bag.write_output(chain_id, output.clone());
    }

    tracing::debug!(
        step_id = %step.id,
        status = ?status,
        targets = records.len(),
        "step finished"
    );

    Ok(StepTaskOutput {
        step_id: step.id,
        status,
        output,
        chain_id: Some(chain_id),
        completed_at,
    })
}

/// Dispatch one target: running transition, payload build, retry loop,
/// terminal record update.
async fn dispatch_one_target<R, V, S>(
    ctx: &TaskCtx<R, V, S>,
    step: &Step,
    record_id: Uuid,
    target: JobTarget,
    variables: &HashMap<String, String>,
    input: Option<Value>,
) -> Result<StepOutcome, String>
where
    R: EngineRepository + 'static,
    V: VariableStore + 'static,
    S: SandboxClient + 'static,
{
    ctx.repo
        .update_step_execution(&record_id, StepExecutionStatus::Running, 0, None, None)
        .await
        .map_err(|e| e.to_string())?;

    let payload_ctx = PayloadContext {
        execution_log_id: record_id,
        input,
        variables,
        config: &ctx.config,
    };

    let payload = match payload::build(step, &payload_ctx, target) {
        Ok(payload) => payload,
        Err(err) => {
            let detail = ErrorDetail::from_code("invalid-config", err.to_string());
            let outcome = StepOutcome::failure(detail.clone(), None);
            ctx.repo
                .update_step_execution(
                    &record_id,
                    StepExecutionStatus::Failure,
                    0,
                    None,
                    Some(&detail),
                )
                .await
                .map_err(|e| e.to_string())?;
            return Ok(outcome);
        }
    };

    let policy = step.retry.clone().unwrap_or_else(RetryPolicy::none);
    let deadline = Duration::from_secs(payload.timeout_secs);
    let controller = RetryController::new();

    let dispatch_result = tokio::select! {
        result = controller.execute(&policy, |_attempt| {
            let payload = payload.clone();
            let dispatcher = Arc::clone(&ctx.dispatcher);
            async move {
                let outcome = dispatcher.dispatch(&payload, deadline).await;
                match outcome.status {
                    OutcomeStatus::Success => Ok(outcome),
                    _ => Err(DispatchFailure { outcome }),
                }
            }
        }) => result,
        _ = ctx.cancel.cancelled() => {
            // Cancellation propagates as a pause; the pending attempt is
            // abandoned and the record fails with a cancellation error.
            controller.pause();
            Err(RetryError::Paused)
        }
    };

    let attempts = (controller.history().len() as u32).max(1);
    let outcome = match dispatch_result {
        Ok(outcome) => outcome,
        Err(RetryError::Failed(failure)) => failure.outcome,
        Err(RetryError::Paused) => StepOutcome::failure(
            ErrorDetail::from_code("cancelled", "execution cancelled while dispatching"),
            None,
        ),
    };

    ctx.repo
        .update_step_execution(
            &record_id,
            outcome.status.into(),
            attempts,
            outcome.output.as_ref(),
            outcome.error.as_ref(),
        )
        .await
        .map_err(|e| e.to_string())?;

    Ok(outcome)
}

// ---------------------------------------------------------------------------
// Record & aggregation helpers
// ---------------------------------------------------------------------------

fn base_record<R, V, S>(
    ctx: &TaskCtx<R, V, S>,
    step: &Step,
    item: &QueueItem,
    target_server: Option<Uuid>,
) -> StepExecution {
    let winning_predecessor = item
        .predecessors
        .iter()
        .max_by_key(|(_, at)| *at)
        .map(|(id, _)| *id);
    StepExecution {
        id: Uuid::now_v7(),
        execution_id: ctx.execution_id,
        step_id: step.id,
        sequence: ctx.sequence.fetch_add(1, Ordering::SeqCst),
        status: StepExecutionStatus::Pending,
        attempts: 0,
        output: None,
        error: None,
        scheduled_by: item.scheduled_by,
        predecessor: winning_predecessor,
        target_server,
        started_at: Some(Utc::now()),
        finished_at: None,
    }
}

fn paused_record<R, V, S>(
    ctx: &TaskCtx<R, V, S>,
    step: &Step,
    item: &QueueItem,
) -> StepExecution {
    let mut record = base_record(ctx, step, item, None);
    record.status = StepExecutionStatus::Paused;
    record.finished_at = Some(Utc::now());
    record
}

fn cancelled_record<R, V, S>(
    ctx: &TaskCtx<R, V, S>,
    step: &Step,
    item: &QueueItem,
) -> StepExecution {
    let mut record = base_record(ctx, step, item, None);
    record.status = StepExecutionStatus::Failure;
    record.error = Some(ErrorDetail::from_code("cancelled", "execution cancelled"));
    record.finished_at = Some(Utc::now());
    record
}

/// Aggregate the per-target outcomes of one step.
fn aggregate_step_status(outcomes: &[(Uuid, Option<Uuid>, StepOutcome)]) -> StepExecutionStatus {
    let statuses: Vec<OutcomeStatus> = outcomes.iter().map(|(_, _, o)| o.status).collect();
    if statuses.iter().all(|s| *s == OutcomeStatus::Success) {
        StepExecutionStatus::Success
    } else if statuses.iter().all(|s| *s == OutcomeStatus::Timeout) {
        StepExecutionStatus::Timeout
    } else if statuses.iter().any(|s| *s == OutcomeStatus::Success) {
        StepExecutionStatus::Partial
    } else {
        StepExecutionStatus::Failure
    }
}

/// Aggregate output: single-target steps chain their output directly;
/// fanned-out steps chain an object keyed by target server (falling back
/// to the record id for container targets).
fn aggregate_step_output(outcomes: &[(Uuid, Option<Uuid>, StepOutcome)]) -> Option<Value> {
    match outcomes {
        [] => None,
        [(_, _, only)] => only.output.clone(),
        many => {
            let mut map = serde_json::Map::new();
            for (record_id, server, outcome) in many {
                let key = server.unwrap_or(*record_id).to_string();
                map.insert(key, outcome.output.clone().unwrap_or(Value::Null));
            }
            Some(Value::Object(map))
        }
    }
}

/// Merge caller-supplied input with chained upstream output. Two JSON
/// objects merge shallowly with upstream keys winning; otherwise upstream
/// replaces the initial input entirely.
fn merge_input(initial: Option<Value>, upstream: Option<Value>) -> Option<Value> {
    match (initial, upstream) {
        (None, None) => None,
        (Some(initial), None) => Some(initial),
        (None, Some(upstream)) => Some(upstream),
        (Some(Value::Object(mut base)), Some(Value::Object(over))) => {
            for (key, value) in over {
                base.insert(key, value);
            }
            Some(Value::Object(base))
        }
        (Some(_), Some(upstream)) => Some(upstream),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
