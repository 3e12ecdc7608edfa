//! Workflow graph validation and traversal structure.
//!
//! Builds an id-keyed view over the step and transition tables: initial
//! frontier (steps with no incoming edge), outgoing-transition lookup, and
//! sink detection. Uses `petgraph` to model the edges as a directed graph;
//! a topological sort at build time rejects cycles before any step is
//! dispatched.

use std::collections::HashMap;

use cadence_types::step::Step;
use cadence_types::workflow::Transition;
use petgraph::algo::toposort;
use petgraph::graph::DiGraph;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors from graph validation. Fatal to the execution.
#[derive(Debug, thiserror::Error)]
pub enum GraphError {
    /// A transition references a step that is not a member of the workflow.
    #[error("transition references unknown step {0}")]
    UnknownStep(Uuid),

    /// The transition set contains a cycle.
    #[error("cycle detected involving step {0}")]
    CycleDetected(Uuid),
}

// ---------------------------------------------------------------------------
// ExecutionGraph
// ---------------------------------------------------------------------------

/// Validated, id-keyed traversal view over a workflow's steps and
/// transitions.
#[derive(Debug)]
pub struct ExecutionGraph {
    /// Member step ids in declaration order.
    step_ids: Vec<Uuid>,
    /// Outgoing transitions keyed by source step.
    outgoing: HashMap<Uuid, Vec<Transition>>,
    /// Incoming edge counts keyed by target step.
    incoming: HashMap<Uuid, usize>,
}

impl ExecutionGraph {
    /// Build and validate the graph.
    ///
    /// Fails with `GraphError::UnknownStep` when a transition endpoint is
    /// not a member step, and `GraphError::CycleDetected` when the edges
    /// are not acyclic.
    pub fn build(steps: &[Step], transitions: &[Transition]) -> Result<Self, GraphError> {
        let step_ids: Vec<Uuid> = steps.iter().map(|s| s.id).collect();
        let id_to_idx: HashMap<Uuid, usize> = step_ids
            .iter()
            .enumerate()
            .map(|(i, id)| (*id, i))
            .collect();

        let mut graph = DiGraph::<Uuid, ()>::new();
        let node_indices: Vec<_> = step_ids.iter().map(|id| graph.add_node(*id)).collect();

        let mut outgoing: HashMap<Uuid, Vec<Transition>> = HashMap::new();
        let mut incoming: HashMap<Uuid, usize> = HashMap::new();

        for transition in transitions {
            let from = *id_to_idx
                .get(&transition.source_step)
                .ok_or(GraphError::UnknownStep(transition.source_step))?;
            let to = *id_to_idx
                .get(&transition.target_step)
                .ok_or(GraphError::UnknownStep(transition.target_step))?;

            graph.add_edge(node_indices[from], node_indices[to], ());
            outgoing
                .entry(transition.source_step)
                .or_default()
                .push(transition.clone());
            *incoming.entry(transition.target_step).or_default() += 1;
        }

        toposort(&graph, None).map_err(|cycle| {
            let step_id = graph[cycle.node_id()];
            GraphError::CycleDetected(step_id)
        })?;

        Ok(Self {
            step_ids,
            outgoing,
            incoming,
        })
    }

    /// Steps with no incoming transition, in declaration order. These form
    /// the initial work-queue frontier.
    pub fn initial_frontier(&self) -> Vec<Uuid> {
        self.step_ids
            .iter()
            .filter(|id| !self.incoming.contains_key(id))
            .copied()
            .collect()
    }

    /// Outgoing transitions from a step.
    pub fn outgoing(&self, step_id: &Uuid) -> &[Transition] {
        self.outgoing
            .get(step_id)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    /// Steps with no outgoing transition: the workflow's designated output
    /// steps for aggregate status computation.
    pub fn sinks(&self) -> Vec<Uuid> {
        self.step_ids
            .iter()
            .filter(|id| !self.outgoing.contains_key(id))
            .copied()
            .collect()
    }

    /// Number of member steps.
    pub fn len(&self) -> usize {
        self.step_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.step_ids.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
