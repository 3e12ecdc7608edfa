//! SQLite implementation of the engine repository.
//!
//! Steps are stored as their full JSON definition plus mirrored hot columns
//! for the execution counters, so the increment-and-check stays a single
//! guarded UPDATE (atomic under SQLite's writer serialization, and safe
//! across multiple engine instances sharing one database).

use cadence_core::repository::{CounterDecision, EngineRepository};
use cadence_types::error::{ErrorDetail, RepositoryError};
use cadence_types::execution::{
    Execution, ExecutionStatus, ExecutionTotals, StepExecution, StepExecutionStatus, TriggerKind,
};
use cadence_types::step::Step;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde::de::DeserializeOwned;
use sqlx::Row;
use uuid::Uuid;

use super::pool::DatabasePool;

/// SQLite-backed implementation of `EngineRepository`.
pub struct SqliteEngineRepository {
    pool: DatabasePool,
}

impl SqliteEngineRepository {
    /// Create a new repository backed by the given database pool.
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }

    /// Upsert a step definition. Used by the authoring collaborator; the
    /// engine itself only reads steps and mutates counters.
    pub async fn save_step(&self, step: &Step) -> Result<(), RepositoryError> {
        let definition = serde_json::to_string(step)
            .map_err(|e| RepositoryError::Query(format!("failed to serialize step: {e}")))?;

        sqlx::query(
            r#"INSERT INTO steps
               (id, user_id, workflow_id, definition, execution_count, max_executions, created_at, updated_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?)
               ON CONFLICT (id) DO UPDATE SET
                   user_id = excluded.user_id,
                   workflow_id = excluded.workflow_id,
                   definition = excluded.definition,
                   max_executions = excluded.max_executions,
                   updated_at = excluded.updated_at"#,
        )
        .bind(step.id.to_string())
        .bind(step.user_id.to_string())
        .bind(step.workflow_id.map(|id| id.to_string()))
        .bind(&definition)
        .bind(step.execution_count as i64)
        .bind(step.max_executions as i64)
        .bind(format_datetime(&step.created_at))
        .bind(format_datetime(&step.updated_at))
        .execute(&self.pool.writer)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn parse_datetime(s: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| RepositoryError::Query(format!("invalid datetime: {e}")))
}

fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339()
}

/// Serialize a unit enum to its snake_case string form.
fn enum_to_str<T: Serialize>(value: &T) -> Result<String, RepositoryError> {
    match serde_json::to_value(value) {
        Ok(serde_json::Value::String(s)) => Ok(s),
        other => Err(RepositoryError::Query(format!(
            "expected string-serializable enum, got {other:?}"
        ))),
    }
}

/// Parse a unit enum from its snake_case string form.
fn enum_from_str<T: DeserializeOwned>(s: &str) -> Result<T, RepositoryError> {
    serde_json::from_value(serde_json::Value::String(s.to_string()))
        .map_err(|e| RepositoryError::Query(format!("invalid enum value '{s}': {e}")))
}

fn parse_uuid(s: &str) -> Result<Uuid, RepositoryError> {
    Uuid::parse_str(s).map_err(|e| RepositoryError::Query(format!("invalid uuid: {e}")))
}

/// Deserialize a step definition, overwriting counters with the mirrored
/// columns (the JSON copy goes stale as the counter advances).
fn step_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Step, RepositoryError> {
    let definition: String = row
        .try_get("definition")
        .map_err(|e| RepositoryError::Query(e.to_string()))?;
    let execution_count: i64 = row
        .try_get("execution_count")
        .map_err(|e| RepositoryError::Query(e.to_string()))?;
    let max_executions: i64 = row
        .try_get("max_executions")
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

    let mut step: Step = serde_json::from_str(&definition)
        .map_err(|e| RepositoryError::Query(format!("invalid step definition: {e}")))?;
    step.execution_count = execution_count as u32;
    step.max_executions = max_executions as u32;
    Ok(step)
}

fn execution_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Execution, RepositoryError> {
    let q = |e: sqlx::Error| RepositoryError::Query(e.to_string());

    let id: String = row.try_get("id").map_err(q)?;
    let workflow_id: Option<String> = row.try_get("workflow_id").map_err(q)?;
    let step_id: Option<String> = row.try_get("step_id").map_err(q)?;
    let user_id: String = row.try_get("user_id").map_err(q)?;
    let status: String = row.try_get("status").map_err(q)?;
    let trigger: String = row.try_get("trigger_kind").map_err(q)?;
    let total_steps: i64 = row.try_get("total_steps").map_err(q)?;
    let succeeded: i64 = row.try_get("succeeded").map_err(q)?;
    let failed: i64 = row.try_get("failed").map_err(q)?;
    let data: String = row.try_get("data").map_err(q)?;
    let error: Option<String> = row.try_get("error").map_err(q)?;
    let started_at: String = row.try_get("started_at").map_err(q)?;
    let finished_at: Option<String> = row.try_get("finished_at").map_err(q)?;

    Ok(Execution {
        id: parse_uuid(&id)?,
        workflow_id: workflow_id.as_deref().map(parse_uuid).transpose()?,
        step_id: step_id.as_deref().map(parse_uuid).transpose()?,
        user_id: parse_uuid(&user_id)?,
        status: enum_from_str::<ExecutionStatus>(&status)?,
        trigger: enum_from_str::<TriggerKind>(&trigger)?,
        totals: ExecutionTotals {
            total_steps: total_steps as u32,
            succeeded: succeeded as u32,
            failed: failed as u32,
        },
        data: serde_json::from_str(&data)
            .map_err(|e| RepositoryError::Query(format!("invalid data json: {e}")))?,
        error,
        started_at: parse_datetime(&started_at)?,
        finished_at: finished_at.as_deref().map(parse_datetime).transpose()?,
    })
}

fn step_execution_from_row(
    row: &sqlx::sqlite::SqliteRow,
) -> Result<StepExecution, RepositoryError> {
    let q = |e: sqlx::Error| RepositoryError::Query(e.to_string());

    let id: String = row.try_get("id").map_err(q)?;
    let execution_id: String = row.try_get("execution_id").map_err(q)?;
    let step_id: String = row.try_get("step_id").map_err(q)?;
    let sequence: i64 = row.try_get("sequence").map_err(q)?;
    let status: String = row.try_get("status").map_err(q)?;
    let attempts: i64 = row.try_get("attempts").map_err(q)?;
    let output: Option<String> = row.try_get("output").map_err(q)?;
    let error: Option<String> = row.try_get("error").map_err(q)?;
    let scheduled_by: Option<String> = row.try_get("scheduled_by").map_err(q)?;
    let predecessor: Option<String> = row.try_get("predecessor").map_err(q)?;
    let target_server: Option<String> = row.try_get("target_server").map_err(q)?;
    let started_at: Option<String> = row.try_get("started_at").map_err(q)?;
    let finished_at: Option<String> = row.try_get("finished_at").map_err(q)?;

    Ok(StepExecution {
        id: parse_uuid(&id)?,
        execution_id: parse_uuid(&execution_id)?,
        step_id: parse_uuid(&step_id)?,
        sequence: sequence as u32,
        status: enum_from_str::<StepExecutionStatus>(&status)?,
        attempts: attempts as u32,
        output: output
            .as_deref()
            .map(serde_json::from_str)
            .transpose()
            .map_err(|e| RepositoryError::Query(format!("invalid output json: {e}")))?,
        error: error
            .as_deref()
            .map(serde_json::from_str)
            .transpose()
            .map_err(|e| RepositoryError::Query(format!("invalid error json: {e}")))?,
        scheduled_by: scheduled_by.as_deref().map(parse_uuid).transpose()?,
        predecessor: predecessor.as_deref().map(parse_uuid).transpose()?,
        target_server: target_server.as_deref().map(parse_uuid).transpose()?,
        started_at: started_at.as_deref().map(parse_datetime).transpose()?,
        finished_at: finished_at.as_deref().map(parse_datetime).transpose()?,
    })
}

// ---------------------------------------------------------------------------
// EngineRepository implementation
// ---------------------------------------------------------------------------

impl EngineRepository for SqliteEngineRepository {
    async fn get_step(&self, id: &Uuid) -> Result<Option<Step>, RepositoryError> {
        let row = sqlx::query(
            "SELECT definition, execution_count, max_executions FROM steps WHERE id = ?",
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool.reader)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        row.as_ref().map(step_from_row).transpose()
    }

    async fn list_workflow_steps(
        &self,
        workflow_id: &Uuid,
    ) -> Result<Vec<Step>, RepositoryError> {
        let rows = sqlx::query(
            r#"SELECT definition, execution_count, max_executions
               FROM steps WHERE workflow_id = ? ORDER BY created_at, id"#,
        )
        .bind(workflow_id.to_string())
        .fetch_all(&self.pool.reader)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        rows.iter().map(step_from_row).collect()
    }

    async fn try_increment_execution_count(
        &self,
        step_id: &Uuid,
    ) -> Result<CounterDecision, RepositoryError> {
        // Single guarded UPDATE: the check and the increment are one atomic
        // statement, so concurrent dispatches cannot both pass the limit.
        let result = sqlx::query(
            r#"UPDATE steps SET execution_count = execution_count + 1
               WHERE id = ? AND (max_executions = 0 OR execution_count < max_executions)"#,
        )
        .bind(step_id.to_string())
        .execute(&self.pool.writer)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        if result.rows_affected() == 1 {
            let row = sqlx::query("SELECT execution_count FROM steps WHERE id = ?")
                .bind(step_id.to_string())
                .fetch_one(&self.pool.writer)
                .await
                .map_err(|e| RepositoryError::Query(e.to_string()))?;
            let count: i64 = row
                .try_get("execution_count")
                .map_err(|e| RepositoryError::Query(e.to_string()))?;
            return Ok(CounterDecision::Allowed {
                count: count as u32,
            });
        }

        // Distinguish "limit reached" from "no such step".
        let exists = sqlx::query("SELECT 1 FROM steps WHERE id = ?")
            .bind(step_id.to_string())
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;
        match exists {
            Some(_) => Ok(CounterDecision::LimitReached),
            None => Err(RepositoryError::NotFound),
        }
    }

    async fn reset_execution_count(&self, step_id: &Uuid) -> Result<(), RepositoryError> {
        sqlx::query("UPDATE steps SET execution_count = 0 WHERE id = ?")
            .bind(step_id.to_string())
            .execute(&self.pool.writer)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;
        Ok(())
    }

    async fn create_execution(&self, execution: &Execution) -> Result<(), RepositoryError> {
        let data = serde_json::to_string(&execution.data)
            .map_err(|e| RepositoryError::Query(format!("failed to serialize data: {e}")))?;

        sqlx::query(
            r#"INSERT INTO executions
               (id, workflow_id, step_id, user_id, status, trigger_kind,
                total_steps, succeeded, failed, data, error, started_at, finished_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(execution.id.to_string())
        .bind(execution.workflow_id.map(|id| id.to_string()))
        .bind(execution.step_id.map(|id| id.to_string()))
        .bind(execution.user_id.to_string())
        .bind(enum_to_str(&execution.status)?)
        .bind(enum_to_str(&execution.trigger)?)
        .bind(execution.totals.total_steps as i64)
        .bind(execution.totals.succeeded as i64)
        .bind(execution.totals.failed as i64)
        .bind(&data)
        .bind(execution.error.as_deref())
        .bind(format_datetime(&execution.started_at))
        .bind(execution.finished_at.as_ref().map(format_datetime))
        .execute(&self.pool.writer)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        Ok(())
    }

    async fn update_execution_status(
        &self,
        execution_id: &Uuid,
        status: ExecutionStatus,
        error: Option<&str>,
        data: Option<&serde_json::Value>,
        totals: Option<ExecutionTotals>,
    ) -> Result<(), RepositoryError> {
        let data_str = data
            .map(serde_json::to_string)
            .transpose()
            .map_err(|e| RepositoryError::Query(format!("failed to serialize data: {e}")))?;
        let finished_at = status.is_terminal().then(|| format_datetime(&Utc::now()));

        let result = sqlx::query(
            r#"UPDATE executions SET
                   status = ?,
                   error = ?,
                   data = COALESCE(?, data),
                   total_steps = COALESCE(?, total_steps),
                   succeeded = COALESCE(?, succeeded),
                   failed = COALESCE(?, failed),
                   finished_at = COALESCE(?, finished_at)
               WHERE id = ?"#,
        )
        .bind(enum_to_str(&status)?)
        .bind(error)
        .bind(data_str)
        .bind(totals.map(|t| t.total_steps as i64))
        .bind(totals.map(|t| t.succeeded as i64))
        .bind(totals.map(|t| t.failed as i64))
        .bind(finished_at)
        .bind(execution_id.to_string())
        .execute(&self.pool.writer)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }

    async fn get_execution(
        &self,
        execution_id: &Uuid,
    ) -> Result<Option<Execution>, RepositoryError> {
        let row = sqlx::query("SELECT * FROM executions WHERE id = ?")
            .bind(execution_id.to_string())
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        row.as_ref().map(execution_from_row).transpose()
    }

    async fn create_step_execution(
        &self,
        record: &StepExecution,
    ) -> Result<(), RepositoryError> {
        let output = record
            .output
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(|e| RepositoryError::Query(format!("failed to serialize output: {e}")))?;
        let error = record
            .error
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(|e| RepositoryError::Query(format!("failed to serialize error: {e}")))?;

        sqlx::query(
            r#"INSERT INTO step_executions
               (id, execution_id, step_id, sequence, status, attempts, output, error,
                scheduled_by, predecessor, target_server, started_at, finished_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(record.id.to_string())
        .bind(record.execution_id.to_string())
        .bind(record.step_id.to_string())
        .bind(record.sequence as i64)
        .bind(enum_to_str(&record.status)?)
        .bind(record.attempts as i64)
        .bind(output)
        .bind(error)
        .bind(record.scheduled_by.map(|id| id.to_string()))
        .bind(record.predecessor.map(|id| id.to_string()))
        .bind(record.target_server.map(|id| id.to_string()))
        .bind(record.started_at.as_ref().map(format_datetime))
        .bind(record.finished_at.as_ref().map(format_datetime))
        .execute(&self.pool.writer)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        Ok(())
    }

    async fn update_step_execution(
        &self,
        record_id: &Uuid,
        status: StepExecutionStatus,
        attempts: u32,
        output: Option<&serde_json::Value>,
        error: Option<&ErrorDetail>,
    ) -> Result<(), RepositoryError> {
        let output = output
            .map(serde_json::to_string)
            .transpose()
            .map_err(|e| RepositoryError::Query(format!("failed to serialize output: {e}")))?;
        let error = error
            .map(serde_json::to_string)
            .transpose()
            .map_err(|e| RepositoryError::Query(format!("failed to serialize error: {e}")))?;
        let finished_at = status.is_terminal().then(|| format_datetime(&Utc::now()));

        let result = sqlx::query(
            r#"UPDATE step_executions SET
                   status = ?, attempts = ?, output = ?, error = ?,
                   finished_at = COALESCE(?, finished_at)
               WHERE id = ?"#,
        )
        .bind(enum_to_str(&status)?)
        .bind(attempts as i64)
        .bind(output)
        .bind(error)
        .bind(finished_at)
        .bind(record_id.to_string())
        .execute(&self.pool.writer)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }

    async fn list_step_executions(
        &self,
        execution_id: &Uuid,
    ) -> Result<Vec<StepExecution>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT * FROM step_executions WHERE execution_id = ? ORDER BY sequence",
        )
        .bind(execution_id.to_string())
        .fetch_all(&self.pool.reader)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        rows.iter().map(step_execution_from_row).collect()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use cadence_types::step::{ScriptLanguage, StepKind};
    use serde_json::json;

    async fn test_repo() -> (tempfile::TempDir, SqliteEngineRepository) {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}?mode=rwc", dir.path().join("t.db").display());
        let pool = DatabasePool::new(&url).await.unwrap();
        (dir, SqliteEngineRepository::new(pool))
    }

    fn sample_step(workflow_id: Option<Uuid>, max_executions: u32) -> Step {
        Step {
            id: Uuid::now_v7(),
            user_id: Uuid::now_v7(),
            name: "backup".to_string(),
            kind: StepKind::Script {
                language: ScriptLanguage::Bash,
                content: "tar czf /tmp/b.tgz /data".to_string(),
                working_directory: None,
            },
            target: Default::default(),
            timeout: Default::default(),
            env: vec![],
            retry: None,
            trigger: Default::default(),
            schedule: None,
            execution_count: 0,
            max_executions,
            reset_count_on_activate: false,
            status: Default::default(),
            workflow_id,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn sample_execution(user_id: Uuid) -> Execution {
        Execution {
            id: Uuid::now_v7(),
            workflow_id: Some(Uuid::now_v7()),
            step_id: None,
            user_id,
            status: ExecutionStatus::Running,
            trigger: TriggerKind::Manual,
            totals: ExecutionTotals::default(),
            data: json!({}),
            error: None,
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    #[tokio::test]
    async fn test_step_roundtrip() {
        let (_dir, repo) = test_repo().await;
        let step = sample_step(None, 0);
        repo.save_step(&step).await.unwrap();

        let loaded = repo.get_step(&step.id).await.unwrap().unwrap();
        assert_eq!(loaded.name, "backup");
        assert!(matches!(loaded.kind, StepKind::Script { .. }));

        assert!(repo.get_step(&Uuid::now_v7()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_list_workflow_steps() {
        let (_dir, repo) = test_repo().await;
        let workflow_id = Uuid::now_v7();
        let a = sample_step(Some(workflow_id), 0);
        let b = sample_step(Some(workflow_id), 0);
        let other = sample_step(Some(Uuid::now_v7()), 0);
        repo.save_step(&a).await.unwrap();
        repo.save_step(&b).await.unwrap();
        repo.save_step(&other).await.unwrap();

        let steps = repo.list_workflow_steps(&workflow_id).await.unwrap();
        assert_eq!(steps.len(), 2);
    }

    #[tokio::test]
    async fn test_counter_increment_and_limit() {
        let (_dir, repo) = test_repo().await;
        let step = sample_step(None, 2);
        repo.save_step(&step).await.unwrap();

        assert_eq!(
            repo.try_increment_execution_count(&step.id).await.unwrap(),
            CounterDecision::Allowed { count: 1 }
        );
        assert_eq!(
            repo.try_increment_execution_count(&step.id).await.unwrap(),
            CounterDecision::Allowed { count: 2 }
        );
        assert_eq!(
            repo.try_increment_execution_count(&step.id).await.unwrap(),
            CounterDecision::LimitReached
        );

        // The loaded step reflects the mirrored counter, not the stale JSON.
        let loaded = repo.get_step(&step.id).await.unwrap().unwrap();
        assert_eq!(loaded.execution_count, 2);

        repo.reset_execution_count(&step.id).await.unwrap();
        assert_eq!(
            repo.try_increment_execution_count(&step.id).await.unwrap(),
            CounterDecision::Allowed { count: 1 }
        );
    }

    #[tokio::test]
    async fn test_counter_unknown_step() {
        let (_dir, repo) = test_repo().await;
        let err = repo
            .try_increment_execution_count(&Uuid::now_v7())
            .await
            .unwrap_err();
        assert!(matches!(err, RepositoryError::NotFound));
    }

    #[tokio::test]
    async fn test_execution_lifecycle() {
        let (_dir, repo) = test_repo().await;
        let execution = sample_execution(Uuid::now_v7());
        repo.create_execution(&execution).await.unwrap();

        repo.update_execution_status(
            &execution.id,
            ExecutionStatus::Success,
            None,
            Some(&json!({"a": 1})),
            Some(ExecutionTotals {
                total_steps: 3,
                succeeded: 3,
                failed: 0,
            }),
        )
        .await
        .unwrap();

        let loaded = repo.get_execution(&execution.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, ExecutionStatus::Success);
        assert_eq!(loaded.totals.succeeded, 3);
        assert_eq!(loaded.data, json!({"a": 1}));
        assert!(loaded.finished_at.is_some());
    }

    #[tokio::test]
    async fn test_update_missing_execution() {
        let (_dir, repo) = test_repo().await;
        let err = repo
            .update_execution_status(&Uuid::now_v7(), ExecutionStatus::Failure, None, None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, RepositoryError::NotFound));
    }

    #[tokio::test]
    async fn test_step_execution_lifecycle() {
        let (_dir, repo) = test_repo().await;
        let execution = sample_execution(Uuid::now_v7());
        repo.create_execution(&execution).await.unwrap();

        let record = StepExecution {
            id: Uuid::now_v7(),
            execution_id: execution.id,
            step_id: Uuid::now_v7(),
            sequence: 0,
            status: StepExecutionStatus::Pending,
            attempts: 0,
            output: None,
            error: None,
            scheduled_by: None,
            predecessor: None,
            target_server: None,
            started_at: Some(Utc::now()),
            finished_at: None,
        };
        repo.create_step_execution(&record).await.unwrap();

        repo.update_step_execution(
            &record.id,
            StepExecutionStatus::Failure,
            2,
            Some(&json!({"stderr": "boom"})),
            Some(&ErrorDetail::from_code("script-error", "exit 1")),
        )
        .await
        .unwrap();

        let records = repo.list_step_executions(&execution.id).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].status, StepExecutionStatus::Failure);
        assert_eq!(records[0].attempts, 2);
        assert_eq!(records[0].error.as_ref().unwrap().code, "script-error");
        assert!(records[0].finished_at.is_some());
    }

    #[tokio::test]
    async fn test_step_executions_ordered_by_sequence() {
        let (_dir, repo) = test_repo().await;
        let execution = sample_execution(Uuid::now_v7());
        repo.create_execution(&execution).await.unwrap();

        for sequence in [2u32, 0, 1] {
            let record = StepExecution {
                id: Uuid::now_v7(),
                execution_id: execution.id,
                step_id: Uuid::now_v7(),
                sequence,
                status: StepExecutionStatus::Success,
                attempts: 1,
                output: None,
                error: None,
                scheduled_by: None,
                predecessor: None,
                target_server: None,
                started_at: None,
                finished_at: None,
            };
            repo.create_step_execution(&record).await.unwrap();
        }

        let records = repo.list_step_executions(&execution.id).await.unwrap();
        let sequences: Vec<u32> = records.iter().map(|r| r.sequence).collect();
        assert_eq!(sequences, vec![0, 1, 2]);
    }
}
