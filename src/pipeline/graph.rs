//! Node/edge arena built while a pipeline is being composed.
//!
//! Concrete nodes own their neighbours (a push node owns its destination, a
//! pull node owns its source), so the arena only records what the scheduler
//! needs: per-node declarations and the typed edges between them.

use crate::pipeline::error::{PipelineError, PipelineResult};
use crate::pipeline::id::{EdgeId, NodeId};

/// Scheduling hint: among phases with no forced order, higher runs first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct FlushPriority(pub i32);

impl FlushPriority {
    pub const LOW: FlushPriority = FlushPriority(-10);
    pub const NORMAL: FlushPriority = FlushPriority(0);
    pub const HIGH: FlushPriority = FlushPriority(10);
}

/// The three kinds of edge a node can declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EdgeKind {
    /// `from` pushes items into `to`.
    PushDestination,
    /// `from` pulls items out of `to`.
    PullSource,
    /// `from` must finish its phase before `to`'s phase starts.
    Dependency,
}

/// A directed edge between two nodes.
#[derive(Debug, Clone)]
pub struct Edge {
    pub id: EdgeId,
    pub from: NodeId,
    pub to: NodeId,
    pub kind: EdgeKind,
}

impl Edge {
    /// `(upstream, downstream)` in item-flow terms, `None` for dependencies.
    pub fn flow(&self) -> Option<(NodeId, NodeId)> {
        match self.kind {
            EdgeKind::PushDestination => Some((self.from, self.to)),
            EdgeKind::PullSource => Some((self.to, self.from)),
            EdgeKind::Dependency => None,
        }
    }

    /// `(caller, callee)`: the callee is entered by the caller's push/pull.
    pub fn call(&self) -> Option<(NodeId, NodeId)> {
        match self.kind {
            EdgeKind::PushDestination | EdgeKind::PullSource => Some((self.from, self.to)),
            EdgeKind::Dependency => None,
        }
    }
}

/// Per-node declarations held by the graph.
#[derive(Debug, Clone)]
pub struct NodeInfo {
    pub name: String,
    pub minimum_memory: u64,
    pub maximum_memory: u64,
    pub memory_priority: f64,
    pub flush_priority: FlushPriority,
    /// Declared progress steps for the current run, if any.
    pub total_steps: Option<u64>,
    pub steps_done: u64,
}

impl NodeInfo {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            minimum_memory: 0,
            maximum_memory: u64::MAX,
            memory_priority: 1.0,
            flush_priority: FlushPriority::NORMAL,
            total_steps: None,
            steps_done: 0,
        }
    }
}

/// Arena of nodes and edges. Nodes are never removed; a `NodeId` stays valid
/// for the lifetime of the graph.
#[derive(Debug, Clone, Default)]
pub struct Graph {
    nodes: Vec<NodeInfo>,
    edges: Vec<Edge>,
}

impl Graph {
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn node_ids(&self) -> impl Iterator<Item = NodeId> {
        (0..self.nodes.len() as u32).map(NodeId)
    }

    pub fn node(&self, id: NodeId) -> PipelineResult<&NodeInfo> {
        self.nodes
            .get(id.index())
            .ok_or(PipelineError::UnknownNode(id))
    }

    pub fn node_mut(&mut self, id: NodeId) -> PipelineResult<&mut NodeInfo> {
        self.nodes
            .get_mut(id.index())
            .ok_or(PipelineError::UnknownNode(id))
    }

    /// Node name, or a placeholder for ids outside the arena.
    pub fn name_of(&self, id: NodeId) -> &str {
        self.nodes
            .get(id.index())
            .map(|n| n.name.as_str())
            .unwrap_or("<unknown>")
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    /// Immediate item-flow predecessors of `id`, ascending by id.
    pub fn flow_predecessors(&self, id: NodeId) -> Vec<NodeId> {
        let mut preds: Vec<NodeId> = self
            .edges
            .iter()
            .filter_map(|e| e.flow())
            .filter(|&(_, down)| down == id)
            .map(|(up, _)| up)
            .collect();
        preds.sort_unstable();
        preds.dedup();
        preds
    }

    /// Nodes that declared a dependency on `id`.
    pub fn dependents(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        self.edges
            .iter()
            .filter(move |e| e.kind == EdgeKind::Dependency && e.from == id)
            .map(|e| e.to)
    }

    fn add_node(&mut self, info: NodeInfo) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(info);
        id
    }

    fn add_edge(&mut self, from: NodeId, to: NodeId, kind: EdgeKind) -> EdgeId {
        let id = EdgeId(self.edges.len() as u32);
        self.edges.push(Edge { id, from, to, kind });
        id
    }
}

/// Construction-time handle passed to every factory.
///
/// Factories register their node here and declare edges to the nodes they
/// were handed; the builder performs no validation, that happens when the
/// whole pipeline is compiled.
#[derive(Debug, Default)]
pub struct GraphBuilder {
    graph: Graph,
}

impl GraphBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new node and return its id.
    pub fn add_node(&mut self, name: impl Into<String>) -> NodeId {
        self.graph.add_node(NodeInfo::new(name))
    }

    pub fn add_push_destination(&mut self, node: NodeId, destination: NodeId) -> EdgeId {
        self.graph
            .add_edge(node, destination, EdgeKind::PushDestination)
    }

    pub fn add_pull_source(&mut self, node: NodeId, source: NodeId) -> EdgeId {
        self.graph.add_edge(node, source, EdgeKind::PullSource)
    }

    /// `node`'s phase may only start once `prerequisite`'s phase has ended.
    pub fn add_dependency(&mut self, node: NodeId, prerequisite: NodeId) -> EdgeId {
        self.graph
            .add_edge(prerequisite, node, EdgeKind::Dependency)
    }

    pub fn set_name(&mut self, node: NodeId, name: impl Into<String>) {
        if let Some(info) = self.graph.nodes.get_mut(node.index()) {
            info.name = name.into();
        }
    }

    pub fn set_minimum_memory(&mut self, node: NodeId, bytes: u64) {
        if let Some(info) = self.graph.nodes.get_mut(node.index()) {
            info.minimum_memory = bytes;
        }
    }

    pub fn set_maximum_memory(&mut self, node: NodeId, bytes: u64) {
        if let Some(info) = self.graph.nodes.get_mut(node.index()) {
            info.maximum_memory = bytes;
        }
    }

    pub fn set_memory_fraction(&mut self, node: NodeId, priority: f64) {
        if let Some(info) = self.graph.nodes.get_mut(node.index()) {
            info.memory_priority = priority.max(0.0);
        }
    }

    pub fn set_flush_priority(&mut self, node: NodeId, priority: FlushPriority) {
        if let Some(info) = self.graph.nodes.get_mut(node.index()) {
            info.flush_priority = priority;
        }
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    pub fn finish(self) -> Graph {
        self.graph
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flow_direction_of_pull_edges_is_reversed() {
        let mut b = GraphBuilder::new();
        let consumer = b.add_node("consumer");
        let source = b.add_node("source");
        b.add_pull_source(consumer, source);
        let graph = b.finish();

        let edge = &graph.edges()[0];
        assert_eq!(edge.flow(), Some((source, consumer)));
        assert_eq!(edge.call(), Some((consumer, source)));
        assert_eq!(graph.flow_predecessors(consumer), vec![source]);
    }

    #[test]
    fn test_dependency_edges_carry_no_flow() {
        let mut b = GraphBuilder::new();
        let first = b.add_node("first");
        let second = b.add_node("second");
        b.add_dependency(second, first);
        let graph = b.finish();

        assert_eq!(graph.edges()[0].flow(), None);
        assert_eq!(graph.dependents(first).collect::<Vec<_>>(), vec![second]);
        assert!(graph.flow_predecessors(second).is_empty());
    }

    #[test]
    fn test_node_defaults() {
        let mut b = GraphBuilder::new();
        let id = b.add_node("n");
        b.set_memory_fraction(id, -3.0);
        let graph = b.finish();
        let info = graph.node(id).unwrap();
        assert_eq!(info.minimum_memory, 0);
        assert_eq!(info.maximum_memory, u64::MAX);
        assert_eq!(info.memory_priority, 0.0);
        assert_eq!(info.flush_priority, FlushPriority::NORMAL);
        assert!(graph.node(NodeId(9)).is_err());
    }
}
