//! State-graph construction and routing.
//!
//! The graph has one node per step plus a terminal END. Nodes reference
//! successors by id (never by pointer) so the structure accommodates a future
//! DAG; cycles are detected at build time with a petgraph topological sort.
//! Today's builder chains steps in declared order: each node's conditional
//! edge routes `continue` to the next step by order, `stop` and
//! `wait_approval` to END.

use std::collections::HashMap;

use petgraph::algo::toposort;
use petgraph::graph::DiGraph;
use uuid::Uuid;

use workloom_types::workflow::Step;

use super::state::ExecutionState;

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

/// Outcome of the conditional edge after a node body runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Continue,
    Stop,
    WaitApproval,
}

/// Map post-step state to a route. `should_stop` wins over everything.
pub fn route(state: &ExecutionState) -> Route {
    if state.should_stop {
        Route::Stop
    } else if state.waiting_approval {
        Route::WaitApproval
    } else {
        Route::Continue
    }
}

// ---------------------------------------------------------------------------
// Graph
// ---------------------------------------------------------------------------

/// One node of the state graph. `successor = None` means the `continue`
/// edge leads to END.
#[derive(Debug, Clone)]
pub struct GraphNode {
    pub step_id: Uuid,
    pub successor: Option<Uuid>,
}

/// The compiled state graph for one workflow.
#[derive(Debug, Clone)]
pub struct StepGraph {
    nodes: HashMap<Uuid, GraphNode>,
    entry: Option<Uuid>,
}

impl StepGraph {
    pub fn entry(&self) -> Option<Uuid> {
        self.entry
    }

    pub fn node(&self, step_id: &Uuid) -> Option<&GraphNode> {
        self.nodes.get(step_id)
    }

    pub fn successor(&self, step_id: &Uuid) -> Option<Uuid> {
        self.nodes.get(step_id).and_then(|n| n.successor)
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

/// Errors from graph construction.
#[derive(Debug, thiserror::Error)]
pub enum GraphError {
    #[error("duplicate step id: {0}")]
    DuplicateStep(Uuid),

    #[error("cycle detected involving step {0}")]
    CycleDetected(Uuid),
}

/// Sort steps by declared order, ties broken by id.
pub fn sort_steps(steps: &[Step]) -> Vec<&Step> {
    let mut sorted: Vec<&Step> = steps.iter().collect();
    sorted.sort_by(|a, b| a.order.cmp(&b.order).then(a.id.cmp(&b.id)));
    sorted
}

/// Build the state graph from a workflow's step list.
///
/// Successor edges follow declared order. The resulting edge set is checked
/// for cycles even though the order-chained construction cannot produce one;
/// the check is the build-time guard the id-based node representation needs
/// once richer edge sets appear.
pub fn build_graph(steps: &[Step]) -> Result<StepGraph, GraphError> {
    let sorted = sort_steps(steps);

    let mut nodes = HashMap::with_capacity(sorted.len());
    for (i, step) in sorted.iter().enumerate() {
        let successor = sorted.get(i + 1).map(|next| next.id);
        if nodes
            .insert(
                step.id,
                GraphNode {
                    step_id: step.id,
                    successor,
                },
            )
            .is_some()
        {
            return Err(GraphError::DuplicateStep(step.id));
        }
    }

    validate_acyclic(&nodes)?;

    Ok(StepGraph {
        entry: sorted.first().map(|s| s.id),
        nodes,
    })
}

/// Verify the successor edges form a DAG.
fn validate_acyclic(nodes: &HashMap<Uuid, GraphNode>) -> Result<(), GraphError> {
    let mut graph = DiGraph::<Uuid, ()>::new();
    let indices: HashMap<Uuid, _> = nodes
        .keys()
        .map(|id| (*id, graph.add_node(*id)))
        .collect();

    for node in nodes.values() {
        if let Some(successor) = node.successor {
            if let Some(to) = indices.get(&successor) {
                graph.add_edge(indices[&node.step_id], *to, ());
            }
        }
    }

    toposort(&graph, None)
        .map(|_| ())
        .map_err(|cycle| GraphError::CycleDetected(graph[cycle.node_id()]))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
