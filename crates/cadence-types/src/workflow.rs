//! Workflow and transition domain types.
//!
//! A `Workflow` is a named collection of steps plus the directed, condition
//! tagged `Transition` edges between them. The graph is stored as explicit
//! id-keyed node and edge tables rather than object references, which keeps
//! cycle detection a plain topological-sort check at execution start.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::step::Schedule;

// ---------------------------------------------------------------------------
// Workflow
// ---------------------------------------------------------------------------

/// A named DAG of steps connected by transitions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    /// UUIDv7 assigned on creation.
    pub id: Uuid,
    /// Owning user.
    pub user_id: Uuid,
    /// Human-readable workflow name.
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Lifecycle status.
    #[serde(default)]
    pub status: WorkflowStatus,
    /// How the workflow is triggered.
    #[serde(default)]
    pub trigger: WorkflowTrigger,
    /// Ordered member step ids. A step belongs to at most one workflow.
    pub steps: Vec<Uuid>,
    /// Directed edges between member steps.
    #[serde(default)]
    pub transitions: Vec<Transition>,
    /// When set, every remote step in this workflow targets these servers
    /// instead of its own configured target.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub override_server_ids: Option<Vec<Uuid>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Workflow lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    #[default]
    Draft,
    Active,
    Paused,
    Archived,
}

/// How a workflow run is started.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkflowTrigger {
    #[default]
    Manual,
    Schedule { schedule: Schedule },
    Webhook,
}

// ---------------------------------------------------------------------------
// Transition
// ---------------------------------------------------------------------------

/// A directed edge from one step to another, fired conditionally after the
/// source step reaches a terminal status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transition {
    /// UUIDv7 assigned on creation.
    pub id: Uuid,
    /// Source step (must belong to the same workflow).
    pub source_step: Uuid,
    /// Target step (must belong to the same workflow).
    pub target_step: Uuid,
    /// When this transition fires.
    pub condition: TransitionCondition,
}

impl Transition {
    pub fn new(source_step: Uuid, target_step: Uuid, condition: TransitionCondition) -> Self {
        Self {
            id: Uuid::now_v7(),
            source_step,
            target_step,
            condition,
        }
    }
}

/// Condition attached to a transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TransitionCondition {
    /// Fire whenever the source reaches any terminal status.
    Always,
    /// Fire only when the source succeeded.
    OnSuccess,
    /// Fire only when the source failed.
    OnFailure,
    /// Fire when the expression evaluates truthy against the source output
    /// and the execution's accumulated data.
    OnCondition { expression: String },
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transition_condition_serde() {
        let always = serde_json::to_string(&TransitionCondition::Always).unwrap();
        assert!(always.contains("\"type\":\"always\""));

        let cond = TransitionCondition::OnCondition {
            expression: "output.rows > 0".to_string(),
        };
        let json = serde_json::to_string(&cond).unwrap();
        assert!(json.contains("\"type\":\"on_condition\""));
        let parsed: TransitionCondition = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, cond);
    }

    #[test]
    fn test_workflow_trigger_serde() {
        let trigger = WorkflowTrigger::Schedule {
            schedule: Schedule::Cron {
                expression: "0 2 * * *".to_string(),
            },
        };
        let json = serde_json::to_string(&trigger).unwrap();
        assert!(json.contains("\"type\":\"schedule\""));
        let parsed: WorkflowTrigger = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, trigger);

        let webhook: WorkflowTrigger = serde_json::from_str(r#"{"type":"webhook"}"#).unwrap();
        assert_eq!(webhook, WorkflowTrigger::Webhook);
    }

    #[test]
    fn test_workflow_json_roundtrip() {
        let a = Uuid::now_v7();
        let b = Uuid::now_v7();
        let workflow = Workflow {
            id: Uuid::now_v7(),
            user_id: Uuid::now_v7(),
            name: "deploy-pipeline".to_string(),
            description: Some("Build, deploy, notify".to_string()),
            status: WorkflowStatus::Active,
            trigger: WorkflowTrigger::Manual,
            steps: vec![a, b],
            transitions: vec![Transition::new(a, b, TransitionCondition::OnSuccess)],
            override_server_ids: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        let json = serde_json::to_string(&workflow).unwrap();
        let parsed: Workflow = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.name, "deploy-pipeline");
        assert_eq!(parsed.steps.len(), 2);
        assert_eq!(parsed.transitions.len(), 1);
        assert_eq!(parsed.transitions[0].source_step, a);
    }
}
