//! Engine configuration.
//!
//! `EngineConfig` is the top-level `config.toml` for an engine instance:
//! fan-out bounds, default timeouts, the configured server inventory, the
//! sandbox endpoint, and per-kind default container images. All fields have
//! sensible defaults so an empty file is valid.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Top-level configuration for a Cadence engine instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Upper bound on concurrently dispatched steps per execution.
    #[serde(default = "default_max_parallel_steps")]
    pub max_parallel_steps: usize,

    /// Default per-step timeout when a step does not declare one.
    #[serde(default = "default_step_timeout_secs")]
    pub default_step_timeout_secs: u64,

    /// Hard cap on a whole execution's wall time.
    #[serde(default = "default_execution_timeout_secs")]
    pub default_execution_timeout_secs: u64,

    /// Sandbox runtime endpoint.
    #[serde(default)]
    pub sandbox: SandboxConfig,

    /// Inventory of remote servers available as step targets.
    #[serde(default)]
    pub servers: Vec<ServerEntry>,

    /// Default container images for locally targeted steps, keyed by kind.
    #[serde(default)]
    pub images: ContainerImages,
}

fn default_max_parallel_steps() -> usize {
    8
}

fn default_step_timeout_secs() -> u64 {
    300
}

fn default_execution_timeout_secs() -> u64 {
    1_800
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_parallel_steps: default_max_parallel_steps(),
            default_step_timeout_secs: default_step_timeout_secs(),
            default_execution_timeout_secs: default_execution_timeout_secs(),
            sandbox: SandboxConfig::default(),
            servers: Vec::new(),
            images: ContainerImages::default(),
        }
    }
}

impl EngineConfig {
    /// Ids of every configured server, in inventory order.
    pub fn server_ids(&self) -> Vec<Uuid> {
        self.servers.iter().map(|s| s.id).collect()
    }
}

/// Sandbox runtime connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxConfig {
    /// Base URL of the sandbox runtime API.
    #[serde(default = "default_sandbox_url")]
    pub base_url: String,
}

fn default_sandbox_url() -> String {
    "http://127.0.0.1:9090".to_string()
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            base_url: default_sandbox_url(),
        }
    }
}

/// One configured remote server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerEntry {
    pub id: Uuid,
    pub name: String,
}

/// Default container images per step kind for local targets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerImages {
    #[serde(default = "default_bash_image")]
    pub bash: String,
    #[serde(default = "default_python_image")]
    pub python: String,
    #[serde(default = "default_node_image")]
    pub node: String,
    /// Image used for HTTP and tool-action jobs.
    #[serde(default = "default_http_image")]
    pub http: String,
}

fn default_bash_image() -> String {
    "cadence/runner-bash:latest".to_string()
}

fn default_python_image() -> String {
    "cadence/runner-python:latest".to_string()
}

fn default_node_image() -> String {
    "cadence/runner-node:latest".to_string()
}

fn default_http_image() -> String {
    "cadence/runner-http:latest".to_string()
}

impl Default for ContainerImages {
    fn default() -> Self {
        Self {
            bash: default_bash_image(),
            python: default_python_image(),
            node: default_node_image(),
            http: default_http_image(),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
