//! Retry policy configuration.
//!
//! A `RetryPolicy` describes how a failed dispatch is retried: backoff
//! strategy, delay bounds, jitter, attempt budget, and an optional
//! allow-list of retryable error codes. The delay math itself lives in
//! `cadence-core`; this module is pure configuration.

use serde::{Deserialize, Serialize};

/// Backoff strategy for computing the delay before the next attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// Constant delay equal to `initial_delay_ms`.
    Fixed,
    /// `initial_delay_ms * attempt_number`.
    Linear,
    /// `initial_delay_ms * multiplier^(attempt_number - 1)`.
    Exponential,
}

/// Retry configuration for a step's dispatch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// How the delay grows between attempts.
    #[serde(default = "default_strategy")]
    pub strategy: BackoffStrategy,
    /// Delay before the first retry, in milliseconds.
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    /// Upper bound on any computed delay, in milliseconds.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Multiplier for the exponential strategy.
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
    /// Whether to perturb computed delays.
    #[serde(default)]
    pub jitter: bool,
    /// Relative jitter bound: delays are perturbed uniformly within
    /// +/- `jitter_factor` of the computed value.
    #[serde(default = "default_jitter_factor")]
    pub jitter_factor: f64,
    /// Maximum number of attempts, including the first (1 = no retry).
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// When set, only errors whose code appears here are retried; any other
    /// error fails immediately regardless of remaining budget.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retryable_errors: Option<Vec<String>>,
}

fn default_strategy() -> BackoffStrategy {
    BackoffStrategy::Exponential
}

fn default_initial_delay_ms() -> u64 {
    1_000
}

fn default_max_delay_ms() -> u64 {
    30_000
}

fn default_multiplier() -> f64 {
    2.0
}

fn default_jitter_factor() -> f64 {
    0.1
}

fn default_max_attempts() -> u32 {
    3
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            strategy: default_strategy(),
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            multiplier: default_multiplier(),
            jitter: false,
            jitter_factor: default_jitter_factor(),
            max_attempts: default_max_attempts(),
            retryable_errors: None,
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries (single attempt).
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Whether an error with the given code may be retried under this policy.
    pub fn allows_code(&self, code: &str) -> bool {
        match &self.retryable_errors {
            Some(allowed) => allowed.iter().any(|c| c == code),
            None => true,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
