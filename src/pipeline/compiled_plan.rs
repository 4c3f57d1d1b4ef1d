use crate::pipeline::graph::FlushPriority;
use crate::pipeline::id::{NodeId, PhaseId};
use std::collections::HashMap;

/// A group of nodes connected by push/pull edges, executed together.
#[derive(Debug, Clone)]
pub struct Phase {
    /// Declaration index (rank of the phase's smallest node id).
    pub id: PhaseId,

    /// Member nodes, ascending by id
    pub members: Vec<NodeId>,

    /// Members with item-flow ancestors before descendants (prepare/propagate order)
    pub flow_order: Vec<NodeId>,

    /// Members with callers before callees; `end` runs in this order, `begin` in reverse
    pub call_order: Vec<NodeId>,

    /// Members that drive the phase through `go`
    pub initiators: Vec<NodeId>,

    /// Highest flush priority among members
    pub flush_priority: FlushPriority,

    /// Phases that must have ended before this one begins
    pub prerequisites: Vec<PhaseId>,
}

/// Statistics about the compiled plan
#[derive(Debug, Clone, Default)]
pub struct PlanStats {
    /// Total number of nodes in the graph
    pub total_nodes: usize,

    /// Number of phases
    pub phases: usize,

    /// Number of initiating nodes across all phases
    pub initiators: usize,

    /// Number of push/pull edges
    pub flow_edges: usize,

    /// Number of dependency edges
    pub dependency_edges: usize,

    /// Compilation time in microseconds
    pub compile_time_us: u64,
}

/// Validated, ordered execution plan for a pipeline graph.
#[derive(Debug, Clone, Default)]
pub struct CompiledPlan {
    /// Phases in execution order
    pub phases: Vec<Phase>,

    /// Node → execution position of its phase
    pub position_of: HashMap<NodeId, usize>,

    /// Compilation statistics
    pub stats: PlanStats,
}

impl CompiledPlan {
    /// Execution position of the phase containing `node`
    pub fn position(&self, node: NodeId) -> Option<usize> {
        self.position_of.get(&node).copied()
    }
}
