//! Sandbox-facing job payload types.
//!
//! A `JobPayload` is the normalized description of work the execution
//! sandbox receives for one step execution: a common envelope plus exactly
//! one work section. The work section is a tagged union so the builder and
//! dispatcher can match on the kind exhaustively.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use uuid::Uuid;

use crate::step::ScriptLanguage;

// ---------------------------------------------------------------------------
// JobPayload
// ---------------------------------------------------------------------------

/// The normalized job payload dispatched to the execution sandbox.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobPayload {
    /// Step execution id the sandbox reports results against.
    pub execution_log_id: Uuid,
    /// Merged caller-supplied input and chained upstream output.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<Value>,
    /// Fully resolved environment variables.
    #[serde(default)]
    pub environment: HashMap<String, String>,
    /// Where the sandbox runs the work.
    pub target: JobTarget,
    /// Hard deadline in seconds.
    pub timeout_secs: u64,
    /// Retry budget communicated for sandbox-side bookkeeping.
    pub retries: u32,
    /// Exactly one work section.
    pub work: JobWork,
}

/// The work section of a job payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobWork {
    Script {
        language: ScriptLanguage,
        content: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        working_directory: Option<String>,
    },
    HttpRequest {
        method: String,
        url: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        headers: Option<HashMap<String, String>>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        body: Option<String>,
    },
    ToolAction {
        tool: String,
        action: String,
        /// Reference to a stored credential; resolution happens in the
        /// sandbox, never in the engine.
        credential: String,
        #[serde(default)]
        params: Value,
    },
}

impl JobWork {
    /// Short lowercase label for logging.
    pub fn label(&self) -> &'static str {
        match self {
            JobWork::Script { .. } => "script",
            JobWork::HttpRequest { .. } => "http_request",
            JobWork::ToolAction { .. } => "tool_action",
        }
    }
}

/// Where the sandbox runs a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobTarget {
    /// A configured remote server.
    Server { server_id: Uuid },
    /// A local container; the image is selected per step kind.
    Container { image: String },
}

// ---------------------------------------------------------------------------
// SandboxResult
// ---------------------------------------------------------------------------

/// Terminal result reported by the execution sandbox.
///
/// Script jobs report `exit_code` with stdout/stderr; HTTP jobs report
/// `http_status` with the response body in `stdout`; tool actions report
/// structured `output`. A non-zero exit or an error-class HTTP status maps
/// to a failed step outcome.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SandboxResult {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http_status: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stdout: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stderr: Option<String>,
    /// Structured output written by the job through the runtime helpers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
}

impl SandboxResult {
    /// Whether the sandbox reported success.
    ///
    /// Success means exit code 0 for scripts, a 2xx/3xx status for HTTP
    /// requests, and the absence of both signals for tool actions that only
    /// return structured output.
    pub fn is_success(&self) -> bool {
        if let Some(code) = self.exit_code {
            return code == 0;
        }
        if let Some(status) = self.http_status {
            return (200..400).contains(&status);
        }
        true
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
