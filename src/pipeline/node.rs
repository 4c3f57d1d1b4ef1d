//! Node contract for the pipeline engine.
//!
//! Two layers, mirroring how nodes are used:
//! - **`Push` / `Pull`**: the per-item hot path. Concrete nodes own their
//!   destination (push) or source (pull) as a generic field, so a chain of
//!   nodes is a single monomorphised type and an item hand-off is a direct
//!   call.
//! - **`Node`**: lifecycle hooks driven by the scheduler once per phase,
//!   through `&mut dyn Node`.
//!
//! Hooks receive a [`NodeContext`] giving access to the node's declarations,
//! the phase's metadata store and the memory assignment.

use crate::pipeline::error::{PipelineError, PipelineResult};
use crate::pipeline::graph::Graph;
use crate::pipeline::id::NodeId;
use crate::pipeline::memory::{DatastructureRegistry, MemoryAssignment, MemoryRequest};
use crate::pipeline::metadata::MetadataStore;
use std::any::Any;

/// Context passed to node lifecycle hooks.
pub struct NodeContext<'a> {
    node: NodeId,
    phase: usize,
    graph: &'a mut Graph,
    metadata: &'a mut MetadataStore,
    datastructures: &'a mut DatastructureRegistry,
    /// Present from `begin` onward.
    assignment: Option<&'a MemoryAssignment>,
}

impl<'a> NodeContext<'a> {
    pub(crate) fn new(
        node: NodeId,
        phase: usize,
        graph: &'a mut Graph,
        metadata: &'a mut MetadataStore,
        datastructures: &'a mut DatastructureRegistry,
        assignment: Option<&'a MemoryAssignment>,
    ) -> Self {
        Self {
            node,
            phase,
            graph,
            metadata,
            datastructures,
            assignment,
        }
    }

    pub fn id(&self) -> NodeId {
        self.node
    }

    /// Execution position of the current phase.
    pub fn phase(&self) -> usize {
        self.phase
    }

    pub fn name(&self) -> &str {
        self.graph.name_of(self.node)
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        if let Ok(info) = self.graph.node_mut(self.node) {
            info.name = name.into();
        }
    }

    // ── Memory ──

    pub fn set_minimum_memory(&mut self, bytes: u64) {
        if let Ok(info) = self.graph.node_mut(self.node) {
            info.minimum_memory = bytes;
        }
    }

    pub fn set_maximum_memory(&mut self, bytes: u64) {
        if let Ok(info) = self.graph.node_mut(self.node) {
            info.maximum_memory = bytes;
        }
    }

    pub fn set_memory_fraction(&mut self, priority: f64) {
        if let Ok(info) = self.graph.node_mut(self.node) {
            info.memory_priority = priority.max(0.0);
        }
    }

    /// Bytes assigned to this node for the current phase; 0 before `begin`.
    pub fn available_memory(&self) -> u64 {
        self.assignment.map_or(0, |a| a.node(self.node))
    }

    /// Declare an auxiliary data structure competing for the phase budget.
    pub fn register_datastructure_usage(
        &mut self,
        name: &str,
        minimum: u64,
        maximum: u64,
        priority: f64,
    ) {
        self.datastructures
            .register(name, MemoryRequest::new(minimum, maximum, priority));
    }

    /// Bytes assigned to a registered data structure; `None` before `begin`
    /// or if nobody registered `name` in this phase.
    pub fn get_datastructure_memory(&self, name: &str) -> Option<u64> {
        self.assignment.and_then(|a| a.datastructure(name))
    }

    // ── Metadata ──

    /// Forward `value` to every item-flow descendant in this phase.
    pub fn forward<T: Any + Send + Sync>(&mut self, key: &str, value: T) {
        self.metadata.forward(self.node, key, value, None);
    }

    /// Forward `value` to descendants at most `max_hop` edges away.
    pub fn forward_with_hops<T: Any + Send + Sync>(&mut self, key: &str, value: T, max_hop: usize) {
        self.metadata.forward(self.node, key, value, Some(max_hop));
    }

    pub fn can_fetch(&self, key: &str) -> bool {
        self.metadata.lookup(self.graph, self.node, key).is_some()
    }

    /// Value forwarded under `key` by the nearest ancestor. Fails if
    /// [`can_fetch`](Self::can_fetch) would be false or the type differs.
    pub fn fetch<T: Any + Clone>(&self, key: &str) -> PipelineResult<T> {
        self.metadata
            .lookup(self.graph, self.node, key)
            .ok_or_else(|| PipelineError::MetadataMissing {
                key: key.to_string(),
                node: self.name().to_string(),
            })?
            .get(key)
    }

    // ── Progress ──

    pub fn set_steps(&mut self, steps: u64) {
        if let Ok(info) = self.graph.node_mut(self.node) {
            info.total_steps = Some(steps);
        }
    }

    pub fn step(&mut self, steps: u64) {
        if let Ok(info) = self.graph.node_mut(self.node) {
            info.steps_done = info.steps_done.saturating_add(steps);
        }
    }
}

/// Lifecycle contract every node exposes to the scheduler.
///
/// Per phase the scheduler calls `prepare` → `propagate` → `begin` →
/// (`go` | driven by push | driven by pull) → `end`. While a node sits
/// between its own `begin` and `end`, everything it pushes into or pulls
/// from is guaranteed to be between theirs too.
pub trait Node: Send {
    fn id(&self) -> NodeId;

    /// Declare memory needs that do not depend on graph shape.
    fn prepare(&mut self, _ctx: &mut NodeContext) -> PipelineResult<()> {
        Ok(())
    }

    /// Forward/fetch metadata, declare progress steps, refine memory needs.
    fn propagate(&mut self, _ctx: &mut NodeContext) -> PipelineResult<()> {
        Ok(())
    }

    /// Acquire resources sized by `ctx.available_memory()`.
    fn begin(&mut self, _ctx: &mut NodeContext) -> PipelineResult<()> {
        Ok(())
    }

    /// True for nodes that drive their phase through [`go`](Self::go).
    fn is_initiator(&self) -> bool {
        false
    }

    fn go(&mut self, ctx: &mut NodeContext) -> PipelineResult<()> {
        Err(PipelineError::NotAnInitiator {
            node: ctx.name().to_string(),
        })
    }

    /// Release resources; may still push/pull residual items.
    fn end(&mut self, _ctx: &mut NodeContext) -> PipelineResult<()> {
        Ok(())
    }

    fn can_evacuate(&self) -> bool {
        false
    }

    /// Move buffered state out of memory until a later phase reads it back.
    fn evacuate(&mut self) -> PipelineResult<()> {
        Ok(())
    }

    /// Visit the nodes this node owns (its destination or sources).
    fn for_each_child(
        &mut self,
        _visit: &mut dyn FnMut(&mut dyn Node) -> PipelineResult<()>,
    ) -> PipelineResult<()> {
        Ok(())
    }
}

/// A node driven by pushes from upstream.
pub trait Push: Node {
    type Item;

    fn push(&mut self, item: Self::Item) -> PipelineResult<()>;
}

/// A node driven by pulls from downstream.
pub trait Pull: Node {
    type Item;

    fn can_pull(&mut self) -> bool;

    fn pull(&mut self) -> PipelineResult<Self::Item>;
}

impl Node for Box<dyn Node> {
    fn id(&self) -> NodeId {
        (**self).id()
    }

    fn prepare(&mut self, ctx: &mut NodeContext) -> PipelineResult<()> {
        (**self).prepare(ctx)
    }

    fn propagate(&mut self, ctx: &mut NodeContext) -> PipelineResult<()> {
        (**self).propagate(ctx)
    }

    fn begin(&mut self, ctx: &mut NodeContext) -> PipelineResult<()> {
        (**self).begin(ctx)
    }

    fn is_initiator(&self) -> bool {
        (**self).is_initiator()
    }

    fn go(&mut self, ctx: &mut NodeContext) -> PipelineResult<()> {
        (**self).go(ctx)
    }

    fn end(&mut self, ctx: &mut NodeContext) -> PipelineResult<()> {
        (**self).end(ctx)
    }

    fn can_evacuate(&self) -> bool {
        (**self).can_evacuate()
    }

    fn evacuate(&mut self) -> PipelineResult<()> {
        (**self).evacuate()
    }

    fn for_each_child(
        &mut self,
        visit: &mut dyn FnMut(&mut dyn Node) -> PipelineResult<()>,
    ) -> PipelineResult<()> {
        (**self).for_each_child(visit)
    }
}

// ── Ownership-tree walking ──

/// Apply `op` to the node with `id` somewhere under `root`.
/// Returns `Ok(false)` if no such node is owned by this tree.
pub(crate) fn with_node(
    root: &mut dyn Node,
    id: NodeId,
    op: &mut dyn FnMut(&mut dyn Node) -> PipelineResult<()>,
) -> PipelineResult<bool> {
    if root.id() == id {
        op(root)?;
        return Ok(true);
    }
    let mut found = false;
    root.for_each_child(&mut |child: &mut dyn Node| {
        if !found {
            found = with_node(child, id, &mut *op)?;
        }
        Ok(())
    })?;
    Ok(found)
}

/// Every `(id, is_initiator)` owned by the tree under `root`, pre-order.
pub(crate) fn collect_tree(
    root: &mut dyn Node,
    out: &mut Vec<(NodeId, bool)>,
) -> PipelineResult<()> {
    out.push((root.id(), root.is_initiator()));
    root.for_each_child(&mut |child: &mut dyn Node| collect_tree(child, out))
}
