//! Job payload construction.
//!
//! Pure translation from a step definition (plus execution context) to the
//! normalized `JobPayload` the sandbox understands. No side effects: the
//! caller resolves variables and passes them in, so the same inputs always
//! produce the same payload.
//!
//! Resolution order is fixed and deterministic:
//! 1. Targets: workflow-level `override_server_ids` beat the step's own
//!    target; `any_server` expands to the configured inventory; local steps
//!    select a default container image keyed by step kind.
//! 2. Environment: step-declared env vars in declaration order (later
//!    entries override earlier ones by name), then `{{ vars.NAME }}`
//!    placeholders in the values are resolved against the user's variables.

use std::collections::HashMap;

use cadence_types::config::EngineConfig;
use cadence_types::job::{JobPayload, JobTarget, JobWork};
use cadence_types::step::{EnvVar, ScriptLanguage, Step, StepKind, StepTarget};
use serde_json::Value;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Payload construction failure. Non-retryable: the step configuration is
/// defective and must be fixed by the author.
#[derive(Debug, thiserror::Error)]
#[error("invalid step config: {0}")]
pub struct InvalidStepConfig(pub String);

// ---------------------------------------------------------------------------
// Context
// ---------------------------------------------------------------------------

/// Everything the builder needs besides the step itself.
pub struct PayloadContext<'a> {
    /// The step execution record the sandbox reports against.
    pub execution_log_id: Uuid,
    /// Caller-supplied input merged with chained upstream output.
    pub input: Option<Value>,
    /// The owning user's variables, already decrypted.
    pub variables: &'a HashMap<String, String>,
    /// Engine configuration (server inventory, default images, timeouts).
    pub config: &'a EngineConfig,
}

// ---------------------------------------------------------------------------
// Target resolution
// ---------------------------------------------------------------------------

/// Resolve the job targets for a step.
///
/// Returns one target per dispatch; more than one means the step fans out
/// into one step execution per target.
pub fn resolve_targets(
    step: &Step,
    override_server_ids: Option<&[Uuid]>,
    config: &EngineConfig,
) -> Result<Vec<JobTarget>, InvalidStepConfig> {
    if let Some(servers) = override_server_ids {
        if servers.is_empty() {
            return Err(InvalidStepConfig(
                "workflow server override is empty".to_string(),
            ));
        }
        return Ok(servers
            .iter()
            .map(|id| JobTarget::Server { server_id: *id })
            .collect());
    }

    match &step.target {
        StepTarget::Local => Ok(vec![JobTarget::Container {
            image: default_image(&step.kind, config),
        }]),
        StepTarget::Server { server_id } => Ok(vec![JobTarget::Server {
            server_id: *server_id,
        }]),
        StepTarget::AnyServer => {
            let ids = config.server_ids();
            if ids.is_empty() {
                return Err(InvalidStepConfig(
                    "step targets any server but no servers are configured".to_string(),
                ));
            }
            Ok(ids
                .into_iter()
                .map(|id| JobTarget::Server { server_id: id })
                .collect())
        }
    }
}

/// Default container image for a local step, keyed by kind.
fn default_image(kind: &StepKind, config: &EngineConfig) -> String {
    match kind {
        StepKind::Script { language, .. } => match language {
            ScriptLanguage::Bash => config.images.bash.clone(),
            ScriptLanguage::Python => config.images.python.clone(),
            ScriptLanguage::Node => config.images.node.clone(),
        },
        StepKind::Http { .. } | StepKind::ToolAction { .. } => config.images.http.clone(),
    }
}

// ---------------------------------------------------------------------------
// Environment resolution
// ---------------------------------------------------------------------------

/// Merge declared env vars (later entries override earlier) and resolve
/// `{{ vars.NAME }}` placeholders in the values.
///
/// Unknown placeholders are left as-is rather than erroring, so a missing
/// variable surfaces at run time in the sandbox instead of blocking the
/// whole dispatch.
pub fn resolve_environment(
    env: &[EnvVar],
    variables: &HashMap<String, String>,
) -> HashMap<String, String> {
    let mut resolved = HashMap::new();
    for var in env {
        resolved.insert(var.name.clone(), resolve_placeholders(&var.value, variables));
    }
    resolved
}

/// Replace `{{ vars.NAME }}` markers in a string with variable values.
fn resolve_placeholders(value: &str, variables: &HashMap<String, String>) -> String {
    let mut result = String::with_capacity(value.len());
    let mut rest = value;

    while let Some(start) = rest.find("{{") {
        let Some(end_rel) = rest[start..].find("}}") else {
            break;
        };
        let end = start + end_rel;
        let inner = rest[start + 2..end].trim();

        result.push_str(&rest[..start]);
        match inner
            .strip_prefix("vars.")
            .and_then(|name| variables.get(name))
        {
            Some(replacement) => result.push_str(replacement),
            // Leave unresolvable markers untouched.
            None => result.push_str(&rest[start..end + 2]),
        }
        rest = &rest[end + 2..];
    }

    result.push_str(rest);
    result
}

// ---------------------------------------------------------------------------
// Payload construction
// ---------------------------------------------------------------------------

/// Build the job payload for one resolved target.
///
/// Fails with `InvalidStepConfig` when required fields for the step's kind
/// are absent.
pub fn build(
    step: &Step,
    ctx: &PayloadContext<'_>,
    target: JobTarget,
) -> Result<JobPayload, InvalidStepConfig> {
    let work = build_work(step)?;
    let environment = resolve_environment(&step.env, ctx.variables);

    let timeout_secs = {
        let secs = step.timeout.as_duration().as_secs();
        if secs == 0 {
            ctx.config.default_step_timeout_secs
        } else {
            secs
        }
    };

    Ok(JobPayload {
        execution_log_id: ctx.execution_log_id,
        input: ctx.input.clone(),
        environment,
        target,
        timeout_secs,
        retries: step
            .retry
            .as_ref()
            .map_or(0, |r| r.max_attempts.saturating_sub(1)),
        work,
    })
}

/// Build the kind-discriminated work section, validating required fields.
fn build_work(step: &Step) -> Result<JobWork, InvalidStepConfig> {
    match &step.kind {
        StepKind::Script {
            language,
            content,
            working_directory,
        } => {
            if content.trim().is_empty() {
                return Err(InvalidStepConfig("script step has empty body".to_string()));
            }
            Ok(JobWork::Script {
                language: *language,
                content: content.clone(),
                working_directory: working_directory.clone(),
            })
        }
        StepKind::Http {
            method,
            url,
            headers,
            body,
        } => {
            if url.trim().is_empty() {
                return Err(InvalidStepConfig("http step is missing a url".to_string()));
            }
            if method.trim().is_empty() {
                return Err(InvalidStepConfig(
                    "http step is missing a method".to_string(),
                ));
            }
            Ok(JobWork::HttpRequest {
                method: method.clone(),
                url: url.clone(),
                headers: headers.clone(),
                body: body.clone(),
            })
        }
        StepKind::ToolAction {
            tool,
            action,
            credential,
            params,
        } => {
            if tool.trim().is_empty() || action.trim().is_empty() {
                return Err(InvalidStepConfig(
                    "tool action step needs both tool and action".to_string(),
                ));
            }
            if credential.trim().is_empty() {
                return Err(InvalidStepConfig(
                    "tool action step is missing a credential reference".to_string(),
                ));
            }
            Ok(JobWork::ToolAction {
                tool: tool.clone(),
                action: action.clone(),
                credential: credential.clone(),
                params: params.clone(),
            })
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use cadence_types::config::ServerEntry;
    use cadence_types::step::{TimeUnit, TimeoutSpec};
    use chrono::Utc;
    use serde_json::json;

    fn base_step(kind: StepKind) -> Step {
        Step {
            id: Uuid::now_v7(),
            user_id: Uuid::now_v7(),
            name: "test step".to_string(),
            kind,
            target: StepTarget::Local,
            timeout: TimeoutSpec::new(2, TimeUnit::Minutes),
            env: vec![
                EnvVar {
                    name: "REGION".to_string(),
                    value: "eu-west-1".to_string(),
                },
                EnvVar {
                    name: "TOKEN".to_string(),
                    value: "{{ vars.API_TOKEN }}".to_string(),
                },
            ],
            retry: None,
            trigger: Default::default(),
            schedule: None,
            execution_count: 0,
            max_executions: 0,
            reset_count_on_activate: false,
            status: Default::default(),
            workflow_id: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn script_kind() -> StepKind {
        StepKind::Script {
            language: ScriptLanguage::Python,
            content: "print('hello')".to_string(),
            working_directory: None,
        }
    }

    fn ctx<'a>(
        variables: &'a HashMap<String, String>,
        config: &'a EngineConfig,
    ) -> PayloadContext<'a> {
        PayloadContext {
            execution_log_id: Uuid::now_v7(),
            input: Some(json!({"upstream": "data"})),
            variables,
            config,
        }
    }

    // -----------------------------------------------------------------------
    // build: happy path
    // -----------------------------------------------------------------------

    #[test]
    fn test_build_script_payload() {
        let step = base_step(script_kind());
        let variables = HashMap::from([("API_TOKEN".to_string(), "sekrit".to_string())]);
        let config = EngineConfig::default();
        let ctx = ctx(&variables, &config);

        let targets = resolve_targets(&step, None, &config).unwrap();
        assert_eq!(targets.len(), 1);
        let payload = build(&step, &ctx, targets[0].clone()).unwrap();

        match &payload.work {
            JobWork::Script { content, language, .. } => {
                assert_eq!(content, "print('hello')");
                assert_eq!(*language, ScriptLanguage::Python);
            }
            other => panic!("expected script work, got {other:?}"),
        }
        // Every declared env var is present; placeholders are resolved.
        assert_eq!(payload.environment["REGION"], "eu-west-1");
        assert_eq!(payload.environment["TOKEN"], "sekrit");
        assert_eq!(payload.timeout_secs, 120);
        assert_eq!(payload.input, Some(json!({"upstream": "data"})));
        assert_eq!(
            payload.target,
            JobTarget::Container {
                image: "cadence/runner-python:latest".to_string()
            }
        );
    }

    #[test]
    fn test_build_http_payload() {
        let step = base_step(StepKind::Http {
            method: "POST".to_string(),
            url: "https://api.example.com/deploy".to_string(),
            headers: None,
            body: Some("{}".to_string()),
        });
        let variables = HashMap::new();
        let config = EngineConfig::default();
        let ctx = ctx(&variables, &config);

        let targets = resolve_targets(&step, None, &config).unwrap();
        let payload = build(&step, &ctx, targets[0].clone()).unwrap();
        assert!(matches!(payload.work, JobWork::HttpRequest { .. }));
        assert_eq!(
            payload.target,
            JobTarget::Container {
                image: "cadence/runner-http:latest".to_string()
            }
        );
    }

    // -----------------------------------------------------------------------
    // build: validation failures
    // -----------------------------------------------------------------------

    #[test]
    fn test_http_missing_url_rejected() {
        let step = base_step(StepKind::Http {
            method: "GET".to_string(),
            url: "  ".to_string(),
            headers: None,
            body: None,
        });
        let variables = HashMap::new();
        let config = EngineConfig::default();
        let err = build(&step, &ctx(&variables, &config), JobTarget::Container {
            image: "x".to_string(),
        })
        .unwrap_err();
        assert!(err.to_string().contains("missing a url"));
    }

    #[test]
    fn test_empty_script_rejected() {
        let step = base_step(StepKind::Script {
            language: ScriptLanguage::Bash,
            content: "\n  \n".to_string(),
            working_directory: None,
        });
        let variables = HashMap::new();
        let config = EngineConfig::default();
        let err = build(&step, &ctx(&variables, &config), JobTarget::Container {
            image: "x".to_string(),
        })
        .unwrap_err();
        assert!(err.to_string().contains("empty body"));
    }

    #[test]
    fn test_tool_action_missing_credential_rejected() {
        let step = base_step(StepKind::ToolAction {
            tool: "slack".to_string(),
            action: "post_message".to_string(),
            credential: String::new(),
            params: json!({}),
        });
        let variables = HashMap::new();
        let config = EngineConfig::default();
        let err = build(&step, &ctx(&variables, &config), JobTarget::Container {
            image: "x".to_string(),
        })
        .unwrap_err();
        assert!(err.to_string().contains("credential"));
    }

    // -----------------------------------------------------------------------
    // Target resolution
    // -----------------------------------------------------------------------

    fn config_with_servers(n: usize) -> EngineConfig {
        EngineConfig {
            servers: (0..n)
                .map(|i| ServerEntry {
                    id: Uuid::now_v7(),
                    name: format!("server-{i}"),
                })
                .collect(),
            ..EngineConfig::default()
        }
    }

    #[test]
    fn test_any_server_fans_out() {
        let mut step = base_step(script_kind());
        step.target = StepTarget::AnyServer;
        let config = config_with_servers(3);

        let targets = resolve_targets(&step, None, &config).unwrap();
        assert_eq!(targets.len(), 3);
        assert!(targets.iter().all(|t| matches!(t, JobTarget::Server { .. })));
    }

    #[test]
    fn test_any_server_without_inventory_rejected() {
        let mut step = base_step(script_kind());
        step.target = StepTarget::AnyServer;
        let config = EngineConfig::default();
        let err = resolve_targets(&step, None, &config).unwrap_err();
        assert!(err.to_string().contains("no servers"));
    }

    #[test]
    fn test_override_beats_step_target() {
        let mut step = base_step(script_kind());
        let own_server = Uuid::now_v7();
        step.target = StepTarget::Server {
            server_id: own_server,
        };
        let config = EngineConfig::default();

        let override_ids = vec![Uuid::now_v7(), Uuid::now_v7()];
        let targets = resolve_targets(&step, Some(&override_ids), &config).unwrap();
        assert_eq!(targets.len(), 2);
        for (target, expected) in targets.iter().zip(&override_ids) {
            assert_eq!(
                target,
                &JobTarget::Server {
                    server_id: *expected
                }
            );
        }
    }

    // -----------------------------------------------------------------------
    // Environment resolution
    // -----------------------------------------------------------------------

    #[test]
    fn test_later_env_entries_override_earlier() {
        let env = vec![
            EnvVar {
                name: "MODE".to_string(),
                value: "staging".to_string(),
            },
            EnvVar {
                name: "MODE".to_string(),
                value: "production".to_string(),
            },
        ];
        let resolved = resolve_environment(&env, &HashMap::new());
        assert_eq!(resolved["MODE"], "production");
    }

    #[test]
    fn test_unknown_placeholder_left_as_is() {
        let env = vec![EnvVar {
            name: "TOKEN".to_string(),
            value: "{{ vars.MISSING }}".to_string(),
        }];
        let resolved = resolve_environment(&env, &HashMap::new());
        assert_eq!(resolved["TOKEN"], "{{ vars.MISSING }}");
    }

    #[test]
    fn test_placeholder_embedded_in_text() {
        let env = vec![EnvVar {
            name: "URL".to_string(),
            value: "https://{{ vars.HOST }}/api".to_string(),
        }];
        let variables = HashMap::from([("HOST".to_string(), "example.com".to_string())]);
        let resolved = resolve_environment(&env, &variables);
        assert_eq!(resolved["URL"], "https://example.com/api");
    }

    #[test]
    fn test_retries_from_policy() {
        let mut step = base_step(script_kind());
        step.retry = Some(cadence_types::retry::RetryPolicy {
            max_attempts: 4,
            ..Default::default()
        });
        let variables = HashMap::new();
        let config = EngineConfig::default();
        let payload = build(&step, &ctx(&variables, &config), JobTarget::Container {
            image: "x".to_string(),
        })
        .unwrap();
        assert_eq!(payload.retries, 3);
    }
}
