//! Pull adapters: an iterator source, a mapping middle and a collecting
//! consumer that drives the chain.

use crate::pipeline::error::{PipelineError, PipelineResult};
use crate::pipeline::factory::{Factory, PullPipeBegin, PullPipeEnd, PullPipeMiddle, TerminalFactory};
use crate::pipeline::graph::GraphBuilder;
use crate::pipeline::id::NodeId;
use crate::pipeline::metadata::ITEMS_KEY;
use crate::pipeline::node::{Node, NodeContext, Pull};
use crate::pipeline::nodes::sink::Collected;
use crate::pipeline::nodes::source::exact_len;
use std::iter::Peekable;
use std::marker::PhantomData;

/// Source yielding the items of `items` on demand.
pub fn pull_from_iter<I>(items: I) -> PullPipeBegin<PullFromIterFactory<I::IntoIter>>
where
    I: IntoIterator,
    I::IntoIter: Clone + Send,
{
    PullPipeBegin(PullFromIterFactory {
        items: items.into_iter(),
    })
}

pub struct PullFromIterFactory<It> {
    items: It,
}

impl<It> TerminalFactory for PullFromIterFactory<It>
where
    It: Iterator + Clone + Send,
    It::Item: Send,
{
    type Node = PullFromIterNode<It>;

    fn construct(self, graph: &mut GraphBuilder) -> Self::Node {
        PullFromIterNode {
            id: graph.add_node("pull_from_iter"),
            name: String::new(),
            len: exact_len(&self.items),
            items: self.items,
            iter: None,
        }
    }
}

pub struct PullFromIterNode<It: Iterator> {
    id: NodeId,
    name: String,
    len: Option<u64>,
    items: It,
    iter: Option<Peekable<It>>,
}

impl<It> Node for PullFromIterNode<It>
where
    It: Iterator + Clone + Send,
    It::Item: Send,
{
    fn id(&self) -> NodeId {
        self.id
    }

    fn propagate(&mut self, ctx: &mut NodeContext) -> PipelineResult<()> {
        if let Some(len) = self.len {
            ctx.forward(ITEMS_KEY, len);
        }
        Ok(())
    }

    fn begin(&mut self, ctx: &mut NodeContext) -> PipelineResult<()> {
        self.name = ctx.name().to_string();
        self.iter = Some(self.items.clone().peekable());
        Ok(())
    }

    fn end(&mut self, _ctx: &mut NodeContext) -> PipelineResult<()> {
        self.iter = None;
        Ok(())
    }
}

impl<It> Pull for PullFromIterNode<It>
where
    It: Iterator + Clone + Send,
    It::Item: Send,
{
    type Item = It::Item;

    fn can_pull(&mut self) -> bool {
        self.iter.as_mut().is_some_and(|it| it.peek().is_some())
    }

    fn pull(&mut self) -> PipelineResult<It::Item> {
        self.iter
            .as_mut()
            .and_then(Iterator::next)
            .ok_or_else(|| PipelineError::Exhausted(self.name.clone()))
    }
}

/// Pull from the source and yield `f(item)`.
pub fn pull_map<In, Out, F>(f: F) -> PullPipeMiddle<PullMapFactory<Out, F>>
where
    F: FnMut(In) -> Out + Send,
{
    PullPipeMiddle(PullMapFactory {
        f,
        _out: PhantomData,
    })
}

pub struct PullMapFactory<Out, F> {
    f: F,
    _out: PhantomData<fn() -> Out>,
}

impl<Out, F, S> Factory<S> for PullMapFactory<Out, F>
where
    S: Pull,
    F: FnMut(S::Item) -> Out + Send,
{
    type Node = PullMapNode<Out, F, S>;

    fn construct(self, source: S, graph: &mut GraphBuilder) -> Self::Node {
        let id = graph.add_node("pull_map");
        graph.add_pull_source(id, source.id());
        PullMapNode {
            id,
            f: self.f,
            source,
            _out: PhantomData,
        }
    }
}

pub struct PullMapNode<Out, F, S> {
    id: NodeId,
    f: F,
    source: S,
    _out: PhantomData<fn() -> Out>,
}

impl<Out, F, S> Node for PullMapNode<Out, F, S>
where
    S: Pull,
    F: FnMut(S::Item) -> Out + Send,
{
    fn id(&self) -> NodeId {
        self.id
    }

    fn for_each_child(
        &mut self,
        visit: &mut dyn FnMut(&mut dyn Node) -> PipelineResult<()>,
    ) -> PipelineResult<()> {
        visit(&mut self.source)
    }
}

impl<Out, F, S> Pull for PullMapNode<Out, F, S>
where
    S: Pull,
    F: FnMut(S::Item) -> Out + Send,
{
    type Item = Out;

    #[inline]
    fn can_pull(&mut self) -> bool {
        self.source.can_pull()
    }

    #[inline]
    fn pull(&mut self) -> PipelineResult<Out> {
        self.source.pull().map(&mut self.f)
    }
}

/// Consumer that pulls its source dry into `target`.
pub fn pull_collect<T: Send>(target: &Collected<T>) -> PullPipeEnd<PullCollectFactory<T>> {
    PullPipeEnd(PullCollectFactory {
        target: target.clone(),
    })
}

pub struct PullCollectFactory<T> {
    target: Collected<T>,
}

impl<T, S> Factory<S> for PullCollectFactory<T>
where
    T: Send,
    S: Pull<Item = T>,
{
    type Node = PullCollectNode<T, S>;

    fn construct(self, source: S, graph: &mut GraphBuilder) -> Self::Node {
        let id = graph.add_node("pull_collect");
        graph.add_pull_source(id, source.id());
        PullCollectNode {
            id,
            target: self.target,
            source,
        }
    }
}

pub struct PullCollectNode<T, S> {
    id: NodeId,
    target: Collected<T>,
    source: S,
}

impl<T, S> Node for PullCollectNode<T, S>
where
    T: Send,
    S: Pull<Item = T>,
{
    fn id(&self) -> NodeId {
        self.id
    }

    fn propagate(&mut self, ctx: &mut NodeContext) -> PipelineResult<()> {
        if ctx.can_fetch(ITEMS_KEY) {
            let expected = ctx.fetch::<u64>(ITEMS_KEY)?;
            ctx.set_steps(expected);
        }
        Ok(())
    }

    fn is_initiator(&self) -> bool {
        true
    }

    fn go(&mut self, ctx: &mut NodeContext) -> PipelineResult<()> {
        let mut items = Vec::new();
        while self.source.can_pull() {
            items.push(self.source.pull()?);
            ctx.step(1);
        }
        self.target.publish(items);
        Ok(())
    }

    fn for_each_child(
        &mut self,
        visit: &mut dyn FnMut(&mut dyn Node) -> PipelineResult<()>,
    ) -> PipelineResult<()> {
        visit(&mut self.source)
    }
}
