//! Step domain types.
//!
//! A `Step` is a single unit of executable work: a script, an HTTP call, or
//! a third-party tool action. Steps can run standalone or as nodes of a
//! workflow. The `StepKind` sum type is the discriminant the payload builder
//! and dispatcher match on exhaustively.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use uuid::Uuid;

use crate::retry::RetryPolicy;

// ---------------------------------------------------------------------------
// Step
// ---------------------------------------------------------------------------

/// A single unit of executable work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    /// UUIDv7 assigned on creation.
    pub id: Uuid,
    /// Owning user.
    pub user_id: Uuid,
    /// Human-readable step name.
    pub name: String,
    /// What this step does (script, HTTP call, tool action).
    pub kind: StepKind,
    /// Where the step runs.
    #[serde(default)]
    pub target: StepTarget,
    /// Per-step timeout.
    #[serde(default)]
    pub timeout: TimeoutSpec,
    /// Environment variables declared on the step, in declaration order.
    /// Later entries override earlier ones with the same name.
    #[serde(default)]
    pub env: Vec<EnvVar>,
    /// Retry configuration for dispatch failures (None = no retry).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry: Option<RetryPolicy>,
    /// How the step is triggered when run standalone.
    #[serde(default)]
    pub trigger: TriggerMode,
    /// Schedule for `TriggerMode::Scheduled` steps.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schedule: Option<Schedule>,
    /// Number of times this step has been dispatched.
    #[serde(default)]
    pub execution_count: u32,
    /// Maximum dispatches allowed (0 = unlimited).
    #[serde(default)]
    pub max_executions: u32,
    /// Whether `execution_count` resets when the step is reactivated.
    #[serde(default)]
    pub reset_count_on_activate: bool,
    /// Lifecycle status.
    #[serde(default)]
    pub status: StepStatus,
    /// Workflow this step belongs to as a node, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Step {
    /// Whether the dispatch budget is exhausted.
    ///
    /// A `max_executions` of zero means unlimited.
    pub fn at_execution_limit(&self) -> bool {
        self.max_executions != 0 && self.execution_count >= self.max_executions
    }
}

// ---------------------------------------------------------------------------
// StepKind
// ---------------------------------------------------------------------------

/// The kind of work a step performs.
///
/// Internally tagged so persisted JSON reads as:
/// ```json
/// { "type": "http", "method": "POST", "url": "https://..." }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StepKind {
    /// Run a shell or interpreted script.
    Script {
        language: ScriptLanguage,
        content: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        working_directory: Option<String>,
    },
    /// Make an HTTP request.
    Http {
        method: String,
        url: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        headers: Option<HashMap<String, String>>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        body: Option<String>,
    },
    /// Invoke a third-party tool action through a stored credential.
    ToolAction {
        tool: String,
        action: String,
        credential: String,
        #[serde(default)]
        params: serde_json::Value,
    },
}

impl StepKind {
    /// Short lowercase label for logging and image selection.
    pub fn label(&self) -> &'static str {
        match self {
            StepKind::Script { .. } => "script",
            StepKind::Http { .. } => "http",
            StepKind::ToolAction { .. } => "tool_action",
        }
    }
}

/// Language for script steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScriptLanguage {
    Bash,
    Python,
    Node,
}

// ---------------------------------------------------------------------------
// StepTarget
// ---------------------------------------------------------------------------

/// Where a step executes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StepTarget {
    /// Run locally in a sandbox container.
    #[default]
    Local,
    /// Run on a specific configured server.
    Server { server_id: Uuid },
    /// Run on every configured server (fans out to one step execution per
    /// server).
    AnyServer,
}

// ---------------------------------------------------------------------------
// Timeout
// ---------------------------------------------------------------------------

/// A timeout expressed as a value plus unit, as authored by the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeoutSpec {
    pub value: u64,
    pub unit: TimeUnit,
}

/// Unit for timeouts and interval schedules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeUnit {
    Seconds,
    Minutes,
    Hours,
}

impl TimeUnit {
    /// Number of seconds in one unit.
    pub fn seconds(&self) -> u64 {
        match self {
            TimeUnit::Seconds => 1,
            TimeUnit::Minutes => 60,
            TimeUnit::Hours => 3_600,
        }
    }
}

impl TimeoutSpec {
    pub fn new(value: u64, unit: TimeUnit) -> Self {
        Self { value, unit }
    }

    /// The timeout as a `Duration`.
    pub fn as_duration(&self) -> Duration {
        Duration::from_secs(self.value * self.unit.seconds())
    }
}

impl Default for TimeoutSpec {
    /// 5 minutes, matching the engine's default step timeout.
    fn default() -> Self {
        Self {
            value: 5,
            unit: TimeUnit::Minutes,
        }
    }
}

// ---------------------------------------------------------------------------
// Trigger & schedule
// ---------------------------------------------------------------------------

/// How a standalone step is triggered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TriggerMode {
    #[default]
    Manual,
    Scheduled,
}

/// When a scheduled step runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Schedule {
    /// Every `every` units (e.g. every 15 minutes).
    Interval { every: u64, unit: TimeUnit },
    /// A cron expression (5-field, standard syntax).
    Cron { expression: String },
}

// ---------------------------------------------------------------------------
// Status & environment
// ---------------------------------------------------------------------------

/// Step lifecycle status. Counters only mutate through the dispatch path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    #[default]
    Draft,
    Active,
    Paused,
    Archived,
}

/// One declared environment variable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvVar {
    pub name: String,
    pub value: String,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_step(kind: StepKind) -> Step {
        Step {
            id: Uuid::now_v7(),
            user_id: Uuid::now_v7(),
            name: "Nightly backup".to_string(),
            kind,
            target: StepTarget::Local,
            timeout: TimeoutSpec::new(30, TimeUnit::Seconds),
            env: vec![EnvVar {
                name: "BACKUP_DIR".to_string(),
                value: "/var/backups".to_string(),
            }],
            retry: Some(RetryPolicy::default()),
            trigger: TriggerMode::Scheduled,
            schedule: Some(Schedule::Interval {
                every: 6,
                unit: TimeUnit::Hours,
            }),
            execution_count: 2,
            max_executions: 10,
            reset_count_on_activate: true,
            status: StepStatus::Active,
            workflow_id: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    // -----------------------------------------------------------------------
    // StepKind serde
    // -----------------------------------------------------------------------

    #[test]
    fn test_step_kind_script_serde() {
        let kind = StepKind::Script {
            language: ScriptLanguage::Bash,
            content: "tar czf backup.tgz /data".to_string(),
            working_directory: Some("/tmp".to_string()),
        };
        let json = serde_json::to_string(&kind).unwrap();
        assert!(json.contains("\"type\":\"script\""));
        assert!(json.contains("\"language\":\"bash\""));
        let parsed: StepKind = serde_json::from_str(&json).unwrap();
        assert!(matches!(parsed, StepKind::Script { .. }));
    }

    #[test]
    fn test_step_kind_http_serde() {
        let kind = StepKind::Http {
            method: "POST".to_string(),
            url: "https://api.example.com/deploy".to_string(),
            headers: Some(HashMap::from([(
                "Authorization".to_string(),
                "Bearer xyz".to_string(),
            )])),
            body: Some(r#"{"env":"prod"}"#.to_string()),
        };
        let json = serde_json::to_string(&kind).unwrap();
        assert!(json.contains("\"type\":\"http\""));
        let parsed: StepKind = serde_json::from_str(&json).unwrap();
        assert!(matches!(parsed, StepKind::Http { .. }));
    }

    #[test]
    fn test_step_kind_tool_action_serde() {
        let kind = StepKind::ToolAction {
            tool: "slack".to_string(),
            action: "post_message".to_string(),
            credential: "slack-bot-token".to_string(),
            params: json!({"channel": "#ops", "text": "done"}),
        };
        let json = serde_json::to_string(&kind).unwrap();
        assert!(json.contains("\"type\":\"tool_action\""));
        let parsed: StepKind = serde_json::from_str(&json).unwrap();
        assert!(matches!(parsed, StepKind::ToolAction { .. }));
    }

    #[test]
    fn test_step_kind_labels() {
        let script = StepKind::Script {
            language: ScriptLanguage::Python,
            content: String::new(),
            working_directory: None,
        };
        assert_eq!(script.label(), "script");
    }

    // -----------------------------------------------------------------------
    // Timeout math
    // -----------------------------------------------------------------------

    #[test]
    fn test_timeout_as_duration() {
        assert_eq!(
            TimeoutSpec::new(45, TimeUnit::Seconds).as_duration(),
            Duration::from_secs(45)
        );
        assert_eq!(
            TimeoutSpec::new(3, TimeUnit::Minutes).as_duration(),
            Duration::from_secs(180)
        );
        assert_eq!(
            TimeoutSpec::new(2, TimeUnit::Hours).as_duration(),
            Duration::from_secs(7_200)
        );
    }

    #[test]
    fn test_timeout_default_is_five_minutes() {
        assert_eq!(TimeoutSpec::default().as_duration(), Duration::from_secs(300));
    }

    // -----------------------------------------------------------------------
    // Execution limit
    // -----------------------------------------------------------------------

    #[test]
    fn test_at_execution_limit() {
        let mut step = sample_step(StepKind::Script {
            language: ScriptLanguage::Bash,
            content: "true".to_string(),
            working_directory: None,
        });
        assert!(!step.at_execution_limit());

        step.execution_count = 10;
        assert!(step.at_execution_limit());

        // Zero means unlimited.
        step.max_executions = 0;
        assert!(!step.at_execution_limit());
    }

    // -----------------------------------------------------------------------
    // Full step roundtrip
    // -----------------------------------------------------------------------

    #[test]
    fn test_step_json_roundtrip() {
        let step = sample_step(StepKind::Http {
            method: "GET".to_string(),
            url: "https://example.com/health".to_string(),
            headers: None,
            body: None,
        });
        let json = serde_json::to_string(&step).unwrap();
        let parsed: Step = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.name, "Nightly backup");
        assert_eq!(parsed.max_executions, 10);
        assert_eq!(parsed.status, StepStatus::Active);
        assert!(matches!(
            parsed.schedule,
            Some(Schedule::Interval { every: 6, .. })
        ));
    }

    #[test]
    fn test_target_serde() {
        let target = StepTarget::Server {
            server_id: Uuid::now_v7(),
        };
        let json = serde_json::to_string(&target).unwrap();
        assert!(json.contains("\"type\":\"server\""));
        let parsed: StepTarget = serde_json::from_str(&json).unwrap();
        assert!(matches!(parsed, StepTarget::Server { .. }));

        let any: StepTarget = serde_json::from_str(r#"{"type":"any_server"}"#).unwrap();
        assert_eq!(any, StepTarget::AnyServer);
    }

    #[test]
    fn test_schedule_cron_serde() {
        let schedule = Schedule::Cron {
            expression: "0 9 * * 1-5".to_string(),
        };
        let json = serde_json::to_string(&schedule).unwrap();
        assert!(json.contains("\"type\":\"cron\""));
        let parsed: Schedule = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, schedule);
    }
}
