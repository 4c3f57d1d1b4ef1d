//! Initiating push sources.

use crate::pipeline::error::PipelineResult;
use crate::pipeline::factory::{Factory, PipeBegin};
use crate::pipeline::graph::GraphBuilder;
use crate::pipeline::id::NodeId;
use crate::pipeline::metadata::ITEMS_KEY;
use crate::pipeline::node::{Node, NodeContext, Push};

/// Push `f(0), f(1), .., f(count - 1)` downstream.
pub fn generate<T, F>(count: u64, f: F) -> PipeBegin<GenerateFactory<F>>
where
    F: FnMut(u64) -> T + Send,
{
    PipeBegin(GenerateFactory { count, f })
}

pub struct GenerateFactory<F> {
    count: u64,
    f: F,
}

impl<F, D> Factory<D> for GenerateFactory<F>
where
    D: Push,
    F: FnMut(u64) -> D::Item + Send,
{
    type Node = GenerateNode<F, D>;

    fn construct(self, dest: D, graph: &mut GraphBuilder) -> Self::Node {
        let id = graph.add_node("generate");
        graph.add_push_destination(id, dest.id());
        GenerateNode {
            id,
            count: self.count,
            f: self.f,
            dest,
        }
    }
}

pub struct GenerateNode<F, D> {
    id: NodeId,
    count: u64,
    f: F,
    dest: D,
}

impl<F, D> Node for GenerateNode<F, D>
where
    D: Push,
    F: FnMut(u64) -> D::Item + Send,
{
    fn id(&self) -> NodeId {
        self.id
    }

    fn propagate(&mut self, ctx: &mut NodeContext) -> PipelineResult<()> {
        ctx.forward(ITEMS_KEY, self.count);
        ctx.set_steps(self.count);
        Ok(())
    }

    fn is_initiator(&self) -> bool {
        true
    }

    fn go(&mut self, ctx: &mut NodeContext) -> PipelineResult<()> {
        for i in 0..self.count {
            self.dest.push((self.f)(i))?;
            ctx.step(1);
        }
        Ok(())
    }

    fn for_each_child(
        &mut self,
        visit: &mut dyn FnMut(&mut dyn Node) -> PipelineResult<()>,
    ) -> PipelineResult<()> {
        visit(&mut self.dest)
    }
}

/// Push every item of `items` downstream. The iterator is cloned on each
/// run, so the pipeline stays re-runnable.
pub fn from_iter<I>(items: I) -> PipeBegin<FromIterFactory<I::IntoIter>>
where
    I: IntoIterator,
    I::IntoIter: Clone + Send,
{
    PipeBegin(FromIterFactory {
        items: items.into_iter(),
    })
}

pub struct FromIterFactory<It> {
    items: It,
}

impl<It, D> Factory<D> for FromIterFactory<It>
where
    D: Push,
    It: Iterator<Item = D::Item> + Clone + Send,
{
    type Node = FromIterNode<It, D>;

    fn construct(self, dest: D, graph: &mut GraphBuilder) -> Self::Node {
        let id = graph.add_node("from_iter");
        graph.add_push_destination(id, dest.id());
        FromIterNode {
            id,
            len: exact_len(&self.items),
            items: self.items,
            dest,
        }
    }
}

/// Item count of `iter` when its size hint is exact.
pub(crate) fn exact_len<It: Iterator>(iter: &It) -> Option<u64> {
    match iter.size_hint() {
        (lower, Some(upper)) if lower == upper => Some(lower as u64),
        _ => None,
    }
}

pub struct FromIterNode<It, D> {
    id: NodeId,
    len: Option<u64>,
    items: It,
    dest: D,
}

impl<It, D> Node for FromIterNode<It, D>
where
    D: Push,
    It: Iterator<Item = D::Item> + Clone + Send,
{
    fn id(&self) -> NodeId {
        self.id
    }

    fn propagate(&mut self, ctx: &mut NodeContext) -> PipelineResult<()> {
        if let Some(len) = self.len {
            ctx.forward(ITEMS_KEY, len);
            ctx.set_steps(len);
        }
        Ok(())
    }

    fn is_initiator(&self) -> bool {
        true
    }

    fn go(&mut self, ctx: &mut NodeContext) -> PipelineResult<()> {
        for item in self.items.clone() {
            self.dest.push(item)?;
            ctx.step(1);
        }
        Ok(())
    }

    fn for_each_child(
        &mut self,
        visit: &mut dyn FnMut(&mut dyn Node) -> PipelineResult<()>,
    ) -> PipelineResult<()> {
        visit(&mut self.dest)
    }
}
