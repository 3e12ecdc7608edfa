//! Per-execution data bag: step output slots, input resolution, and named
//! conditions.
//!
//! The bag is append-only: each step execution writes its output exactly
//! once under its own id, so concurrent writers never conflict. Input
//! resolution follows predecessor links registered by the orchestrator;
//! with multiple incoming edges the most recently completed predecessor
//! wins.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde_json::{Map, Value};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// DataBag
// ---------------------------------------------------------------------------

/// One incoming edge resolved for a step execution.
#[derive(Debug, Clone)]
struct PredecessorLink {
    /// The upstream step execution whose output feeds this slot.
    source: Uuid,
    /// When the upstream record reached its terminal status.
    completed_at: DateTime<Utc>,
}

/// Execution-scoped store for step outputs and conditions.
///
/// Shared across the concurrent step tasks of a single execution. All maps
/// are concurrent and writes are append-only (outputs) or last-writer-wins
/// (conditions), so no external locking is needed.
#[derive(Debug, Default)]
pub struct DataBag {
    /// Step outputs keyed by step execution id. Insert-once.
    outputs: DashMap<Uuid, Value>,
    /// Incoming-edge links keyed by the downstream step execution id.
    links: DashMap<Uuid, Vec<PredecessorLink>>,
    /// Named condition values set from inside running steps.
    conditions: DashMap<String, Value>,
}

impl DataBag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the output of a completed step execution.
    ///
    /// The slot is write-once: a second write for the same id is ignored,
    /// preserving the first value.
    pub fn write_output(&self, step_execution_id: Uuid, payload: Value) {
        if self.outputs.contains_key(&step_execution_id) {
            tracing::warn!(%step_execution_id, "output slot already written, ignoring");
            return;
        }
        self.outputs.insert(step_execution_id, payload);
    }

    /// Get the output recorded for a step execution.
    pub fn output(&self, step_execution_id: &Uuid) -> Option<Value> {
        self.outputs.get(step_execution_id).map(|v| v.clone())
    }

    /// Register an incoming edge: `source`'s output becomes a candidate
    /// input for `target`.
    pub fn link_predecessor(
        &self,
        target: Uuid,
        source: Uuid,
        completed_at: DateTime<Utc>,
    ) {
        self.links.entry(target).or_default().push(PredecessorLink {
            source,
            completed_at,
        });
    }

    /// Resolve the input for a step execution.
    ///
    /// Returns the output of the predecessor that completed most recently.
    /// Returns None when the slot has no incoming links or no linked
    /// predecessor produced output.
    pub fn read_input(&self, step_execution_id: &Uuid) -> Option<Value> {
        let links = self.links.get(step_execution_id)?;
        links
            .iter()
            .max_by_key(|l| l.completed_at)
            .and_then(|l| self.output(&l.source))
    }

    /// Set a named condition for `on_condition` transition evaluation.
    pub fn set_condition(&self, name: &str, value: Value) {
        self.conditions.insert(name.to_string(), value);
    }

    /// Get a named condition value.
    pub fn get_condition(&self, name: &str) -> Option<Value> {
        self.conditions.get(name).map(|v| v.clone())
    }

    /// All conditions as a JSON object, for expression contexts.
    pub fn conditions_json(&self) -> Value {
        let mut map = Map::new();
        for entry in self.conditions.iter() {
            map.insert(entry.key().clone(), entry.value().clone());
        }
        Value::Object(map)
    }

    /// Snapshot of all outputs keyed by step execution id, for persisting
    /// onto the execution record.
    pub fn snapshot(&self) -> Value {
        let mut map = Map::new();
        for entry in self.outputs.iter() {
            map.insert(entry.key().to_string(), entry.value().clone());
        }
        Value::Object(map)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
