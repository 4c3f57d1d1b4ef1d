//! Reverser: buffers a whole phase worth of items and replays them
//! back to front from `end`.

use crate::pipeline::error::PipelineResult;
use crate::pipeline::factory::{Factory, PipeMiddle};
use crate::pipeline::graph::GraphBuilder;
use crate::pipeline::id::NodeId;
use crate::pipeline::metadata::ITEMS_KEY;
use crate::pipeline::node::{Node, NodeContext, Push};

pub fn reverse() -> PipeMiddle<ReverseFactory> {
    PipeMiddle(ReverseFactory)
}

pub struct ReverseFactory;

impl<D> Factory<D> for ReverseFactory
where
    D: Push,
    D::Item: Send,
{
    type Node = ReverseNode<D>;

    fn construct(self, dest: D, graph: &mut GraphBuilder) -> Self::Node {
        let id = graph.add_node("reverse");
        graph.add_push_destination(id, dest.id());
        ReverseNode {
            id,
            expected: None,
            items: Vec::new(),
            dest,
        }
    }
}

pub struct ReverseNode<D: Push> {
    id: NodeId,
    expected: Option<u64>,
    items: Vec<D::Item>,
    dest: D,
}

impl<D> Node for ReverseNode<D>
where
    D: Push,
    D::Item: Send,
{
    fn id(&self) -> NodeId {
        self.id
    }

    fn propagate(&mut self, ctx: &mut NodeContext) -> PipelineResult<()> {
        self.expected = None;
        if ctx.can_fetch(ITEMS_KEY) {
            let expected = ctx.fetch::<u64>(ITEMS_KEY)?;
            let item_size = std::mem::size_of::<D::Item>() as u64;
            ctx.set_minimum_memory(expected.saturating_mul(item_size));
            ctx.forward(ITEMS_KEY, expected);
            self.expected = Some(expected);
        }
        Ok(())
    }

    fn begin(&mut self, ctx: &mut NodeContext) -> PipelineResult<()> {
        let fits = ctx.available_memory() / std::mem::size_of::<D::Item>().max(1) as u64;
        let capacity = self.expected.map_or(0, |e| e.min(fits));
        self.items = Vec::with_capacity(capacity as usize);
        Ok(())
    }

    fn end(&mut self, _ctx: &mut NodeContext) -> PipelineResult<()> {
        while let Some(item) = self.items.pop() {
            self.dest.push(item)?;
        }
        self.items = Vec::new();
        Ok(())
    }

    fn for_each_child(
        &mut self,
        visit: &mut dyn FnMut(&mut dyn Node) -> PipelineResult<()>,
    ) -> PipelineResult<()> {
        visit(&mut self.dest)
    }
}

impl<D> Push for ReverseNode<D>
where
    D: Push,
    D::Item: Send,
{
    type Item = D::Item;

    #[inline]
    fn push(&mut self, item: D::Item) -> PipelineResult<()> {
        self.items.push(item);
        Ok(())
    }
}
