//! FilterNode - predicate filtering node.
//!
//! Items for which the predicate returns `true` pass through unchanged; the
//! rest are dropped. A filter can be inverted to drop matches instead.

use crate::pipeline::error::PipelineResult;
use crate::pipeline::factory::{Factory, PipeMiddle};
use crate::pipeline::graph::GraphBuilder;
use crate::pipeline::id::NodeId;
use crate::pipeline::node::{Node, NodeContext, Push};

/// Keep items matching `predicate`.
pub fn filter<T, F>(predicate: F) -> PipeMiddle<FilterFactory<F>>
where
    F: FnMut(&T) -> bool + Send,
{
    PipeMiddle(FilterFactory {
        predicate,
        invert_mode: false,
    })
}

/// Drop items matching `predicate`.
pub fn reject<T, F>(predicate: F) -> PipeMiddle<FilterFactory<F>>
where
    F: FnMut(&T) -> bool + Send,
{
    PipeMiddle(FilterFactory {
        predicate,
        invert_mode: true,
    })
}

pub struct FilterFactory<F> {
    predicate: F,
    invert_mode: bool,
}

impl<F, D> Factory<D> for FilterFactory<F>
where
    D: Push,
    F: FnMut(&D::Item) -> bool + Send,
{
    type Node = FilterNode<F, D>;

    fn construct(self, dest: D, graph: &mut GraphBuilder) -> Self::Node {
        let id = graph.add_node("filter");
        graph.add_push_destination(id, dest.id());
        FilterNode {
            id,
            predicate: self.predicate,
            invert_mode: self.invert_mode,
            passed: 0,
            dropped: 0,
            dest,
        }
    }
}

/// Filter node - forwards items by predicate.
pub struct FilterNode<F, D> {
    id: NodeId,
    predicate: F,
    /// Invert mode: if true, drop matching items instead of keeping them.
    invert_mode: bool,
    passed: u64,
    dropped: u64,
    dest: D,
}

impl<F, D> FilterNode<F, D> {
    /// Items forwarded during the current run.
    pub fn passed(&self) -> u64 {
        self.passed
    }

    /// Items dropped during the current run.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    pub fn invert_mode(&self) -> bool {
        self.invert_mode
    }
}

impl<F, D> Node for FilterNode<F, D>
where
    D: Push,
    F: FnMut(&D::Item) -> bool + Send,
{
    fn id(&self) -> NodeId {
        self.id
    }

    fn begin(&mut self, _ctx: &mut NodeContext) -> PipelineResult<()> {
        self.passed = 0;
        self.dropped = 0;
        Ok(())
    }

    fn end(&mut self, ctx: &mut NodeContext) -> PipelineResult<()> {
        tracing::debug!(
            "'{}' passed {} items, dropped {}",
            ctx.name(),
            self.passed,
            self.dropped
        );
        Ok(())
    }

    fn for_each_child(
        &mut self,
        visit: &mut dyn FnMut(&mut dyn Node) -> PipelineResult<()>,
    ) -> PipelineResult<()> {
        visit(&mut self.dest)
    }
}

impl<F, D> Push for FilterNode<F, D>
where
    D: Push,
    F: FnMut(&D::Item) -> bool + Send,
{
    type Item = D::Item;

    #[inline]
    fn push(&mut self, item: D::Item) -> PipelineResult<()> {
        // Pass if: (matches AND !invert) OR (!matches AND invert)
        if (self.predicate)(&item) != self.invert_mode {
            self.passed += 1;
            self.dest.push(item)
        } else {
            self.dropped += 1;
            Ok(())
        }
    }
}
