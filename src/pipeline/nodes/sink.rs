//! Terminal push nodes.

use crate::pipeline::error::PipelineResult;
use crate::pipeline::factory::{PipeEnd, TerminalFactory};
use crate::pipeline::graph::GraphBuilder;
use crate::pipeline::id::NodeId;
use crate::pipeline::metadata::ITEMS_KEY;
use crate::pipeline::node::{Node, NodeContext, Push};
use std::marker::PhantomData;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Shared handle to the items gathered by a collecting sink.
///
/// The sink fills a private vector while the phase runs and publishes it
/// here in `end`, replacing whatever the previous run left.
#[derive(Debug)]
pub struct Collected<T> {
    items: Arc<Mutex<Vec<T>>>,
}

impl<T> Clone for Collected<T> {
    fn clone(&self) -> Self {
        Self {
            items: Arc::clone(&self.items),
        }
    }
}

impl<T> Default for Collected<T> {
    fn default() -> Self {
        Self {
            items: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

impl<T> Collected<T> {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<T>> {
        self.items.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Remove and return the published items.
    pub fn take(&self) -> Vec<T> {
        std::mem::take(&mut *self.lock())
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub(crate) fn publish(&self, items: Vec<T>) {
        *self.lock() = items;
    }
}

impl<T: Clone> Collected<T> {
    /// Copy of the published items, leaving them in place.
    pub fn snapshot(&self) -> Vec<T> {
        self.lock().clone()
    }
}

/// Gather every item into `target`.
pub fn collect<T: Send>(target: &Collected<T>) -> PipeEnd<CollectFactory<T>> {
    PipeEnd(CollectFactory {
        target: target.clone(),
    })
}

pub struct CollectFactory<T> {
    target: Collected<T>,
}

impl<T: Send> TerminalFactory for CollectFactory<T> {
    type Node = CollectNode<T>;

    fn construct(self, graph: &mut GraphBuilder) -> Self::Node {
        CollectNode {
            id: graph.add_node("collect"),
            expected: None,
            local: Vec::new(),
            target: self.target,
        }
    }
}

pub struct CollectNode<T> {
    id: NodeId,
    expected: Option<u64>,
    local: Vec<T>,
    target: Collected<T>,
}

impl<T: Send> Node for CollectNode<T> {
    fn id(&self) -> NodeId {
        self.id
    }

    fn propagate(&mut self, ctx: &mut NodeContext) -> PipelineResult<()> {
        self.expected = if ctx.can_fetch(ITEMS_KEY) {
            Some(ctx.fetch::<u64>(ITEMS_KEY)?)
        } else {
            None
        };
        Ok(())
    }

    fn begin(&mut self, ctx: &mut NodeContext) -> PipelineResult<()> {
        self.local = Vec::new();
        if let Some(expected) = self.expected {
            let fits = ctx.available_memory() / std::mem::size_of::<T>().max(1) as u64;
            self.local.reserve(expected.min(fits) as usize);
        }
        Ok(())
    }

    fn end(&mut self, _ctx: &mut NodeContext) -> PipelineResult<()> {
        self.target.publish(std::mem::take(&mut self.local));
        Ok(())
    }
}

impl<T: Send> Push for CollectNode<T> {
    type Item = T;

    #[inline]
    fn push(&mut self, item: T) -> PipelineResult<()> {
        self.local.push(item);
        Ok(())
    }
}

/// Call `f` on every item.
pub fn for_each<In, F>(f: F) -> PipeEnd<ForEachFactory<In, F>>
where
    F: FnMut(In) -> PipelineResult<()> + Send,
{
    PipeEnd(ForEachFactory {
        f,
        _in: PhantomData,
    })
}

pub struct ForEachFactory<In, F> {
    f: F,
    _in: PhantomData<fn(In)>,
}

impl<In, F> TerminalFactory for ForEachFactory<In, F>
where
    F: FnMut(In) -> PipelineResult<()> + Send,
{
    type Node = ForEachNode<In, F>;

    fn construct(self, graph: &mut GraphBuilder) -> Self::Node {
        ForEachNode {
            id: graph.add_node("for_each"),
            f: self.f,
            _in: PhantomData,
        }
    }
}

pub struct ForEachNode<In, F> {
    id: NodeId,
    f: F,
    _in: PhantomData<fn(In)>,
}

impl<In, F> Node for ForEachNode<In, F>
where
    F: FnMut(In) -> PipelineResult<()> + Send,
{
    fn id(&self) -> NodeId {
        self.id
    }
}

impl<In, F> Push for ForEachNode<In, F>
where
    F: FnMut(In) -> PipelineResult<()> + Send,
{
    type Item = In;

    #[inline]
    fn push(&mut self, item: In) -> PipelineResult<()> {
        (self.f)(item)
    }
}

/// Discard every item.
pub fn null_sink<T>() -> PipeEnd<NullSinkFactory<T>> {
    PipeEnd(NullSinkFactory {
        _item: PhantomData,
    })
}

pub struct NullSinkFactory<T> {
    _item: PhantomData<fn(T)>,
}

impl<T> TerminalFactory for NullSinkFactory<T> {
    type Node = NullSinkNode<T>;

    fn construct(self, graph: &mut GraphBuilder) -> Self::Node {
        NullSinkNode {
            id: graph.add_node("null_sink"),
            received: 0,
            _item: PhantomData,
        }
    }
}

pub struct NullSinkNode<T> {
    id: NodeId,
    received: u64,
    _item: PhantomData<fn(T)>,
}

impl<T> Node for NullSinkNode<T> {
    fn id(&self) -> NodeId {
        self.id
    }

    fn begin(&mut self, _ctx: &mut NodeContext) -> PipelineResult<()> {
        self.received = 0;
        Ok(())
    }

    fn end(&mut self, ctx: &mut NodeContext) -> PipelineResult<()> {
        tracing::debug!("'{}' discarded {} items", ctx.name(), self.received);
        Ok(())
    }
}

impl<T> Push for NullSinkNode<T> {
    type Item = T;

    #[inline]
    fn push(&mut self, _item: T) -> PipelineResult<()> {
        self.received += 1;
        Ok(())
    }
}
