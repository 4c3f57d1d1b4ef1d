//! Type-erased pipeline pieces.
//!
//! Statically composed chains are one monomorphised type per chain, which is
//! fast but makes every distinct composition a distinct type. A virtual chunk
//! hides everything but its input and output item types: the boundary between
//! two chunks is a `Box<dyn DynPush<T>>`, costing one dynamic call per item.
//!
//! ```text
//! VirtualChunkBegin<O> | VirtualChunk<O, P> | VirtualChunkEnd<P>  → Segment
//! ```
//!
//! Composing chunks whose item types differ does not compile.

use crate::pipeline::error::PipelineResult;
use crate::pipeline::factory::{Factory, PipeBegin, PipeEnd, PipeMiddle, Segment, TerminalFactory};
use crate::pipeline::graph::GraphBuilder;
use crate::pipeline::id::NodeId;
use crate::pipeline::node::{Node, NodeContext, Push};
use std::ops::BitOr;

/// Object-safe view of a push node accepting `T`.
pub trait DynPush<T>: Node {
    fn push_item(&mut self, item: T) -> PipelineResult<()>;
}

impl<P: Push> DynPush<P::Item> for P {
    #[inline]
    fn push_item(&mut self, item: P::Item) -> PipelineResult<()> {
        self.push(item)
    }
}

/// Erased destination accepting `T`.
pub type VirtualDest<T> = Box<dyn DynPush<T>>;

impl<T> Node for Box<dyn DynPush<T>> {
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

impl<T> Push for Box<dyn DynPush<T>> {
    type Item = T;

    #[inline]
    fn push(&mut self, item: T) -> PipelineResult<()> {
        (**self).push_item(item)
    }
}

type BuildMiddle<I, O> = Box<dyn FnOnce(VirtualDest<O>, &mut GraphBuilder) -> VirtualDest<I> + Send>;
type BuildBegin<O> = Box<dyn FnOnce(VirtualDest<O>, &mut GraphBuilder) -> Box<dyn Node> + Send>;
type BuildEnd<I> = Box<dyn FnOnce(&mut GraphBuilder) -> VirtualDest<I> + Send>;

/// Erased sequence of push middles turning `I` items into `O` items.
pub struct VirtualChunk<I, O> {
    build: BuildMiddle<I, O>,
}

impl<I: 'static, O: 'static> VirtualChunk<I, O> {
    /// Erase a statically composed middle section.
    pub fn new<F>(middle: PipeMiddle<F>) -> Self
    where
        F: Factory<VirtualDest<O>> + Send + 'static,
        F::Node: Push<Item = I> + 'static,
    {
        Self {
            build: Box::new(move |dest, graph| {
                Box::new(middle.0.construct(dest, graph)) as VirtualDest<I>
            }),
        }
    }

    /// This chunk followed by `next`.
    pub fn then<P: 'static>(self, next: VirtualChunk<O, P>) -> VirtualChunk<I, P> {
        VirtualChunk {
            build: Box::new(move |dest, graph| {
                let inner = (next.build)(dest, graph);
                (self.build)(inner, graph)
            }),
        }
    }

    /// Use the chunk inside a statically composed chain.
    pub fn pipe(self) -> PipeMiddle<Self> {
        PipeMiddle(self)
    }

    /// Construct the chunk's nodes around `dest`, returning its entry.
    pub fn construct_into(self, dest: VirtualDest<O>, graph: &mut GraphBuilder) -> VirtualDest<I> {
        (self.build)(dest, graph)
    }
}

impl<T: 'static> VirtualChunk<T, T> {
    /// A chunk that adds no nodes.
    pub fn identity() -> Self {
        Self {
            build: Box::new(|dest, _| dest),
        }
    }
}

impl<I: 'static, O: 'static, D> Factory<D> for VirtualChunk<I, O>
where
    D: Push<Item = O> + 'static,
{
    type Node = VirtualDest<I>;

    fn construct(self, dest: D, graph: &mut GraphBuilder) -> Self::Node {
        self.construct_into(Box::new(dest), graph)
    }
}

/// Erased initiating section producing `O` items.
pub struct VirtualChunkBegin<O> {
    build: BuildBegin<O>,
}

impl<O: 'static> VirtualChunkBegin<O> {
    pub fn new<F>(begin: PipeBegin<F>) -> Self
    where
        F: Factory<VirtualDest<O>> + Send + 'static,
        F::Node: 'static,
    {
        Self {
            build: Box::new(move |dest, graph| {
                Box::new(begin.0.construct(dest, graph)) as Box<dyn Node>
            }),
        }
    }

    pub fn pipe(self) -> PipeBegin<Self> {
        PipeBegin(self)
    }
}

impl<O: 'static, D> Factory<D> for VirtualChunkBegin<O>
where
    D: Push<Item = O> + 'static,
{
    type Node = Box<dyn Node>;

    fn construct(self, dest: D, graph: &mut GraphBuilder) -> Self::Node {
        (self.build)(Box::new(dest), graph)
    }
}

/// Erased terminal section consuming `I` items.
pub struct VirtualChunkEnd<I> {
    build: BuildEnd<I>,
}

impl<I: 'static> VirtualChunkEnd<I> {
    pub fn new<F>(end: PipeEnd<F>) -> Self
    where
        F: TerminalFactory + Send + 'static,
        F::Node: Push<Item = I> + 'static,
    {
        Self {
            build: Box::new(move |graph| Box::new(end.0.construct(graph)) as VirtualDest<I>),
        }
    }

    pub fn pipe(self) -> PipeEnd<Self> {
        PipeEnd(self)
    }
}

impl<I: 'static> TerminalFactory for VirtualChunkEnd<I> {
    type Node = VirtualDest<I>;

    fn construct(self, graph: &mut GraphBuilder) -> Self::Node {
        (self.build)(graph)
    }
}

/// A begin joined to an end through erased boundaries.
pub struct VirtualSegment {
    build: Box<dyn FnOnce(&mut GraphBuilder) -> Box<dyn Node> + Send>,
}

impl TerminalFactory for VirtualSegment {
    type Node = Box<dyn Node>;

    fn construct(self, graph: &mut GraphBuilder) -> Self::Node {
        (self.build)(graph)
    }
}

impl<O: 'static, P: 'static> BitOr<VirtualChunk<O, P>> for VirtualChunkBegin<O> {
    type Output = VirtualChunkBegin<P>;

    fn bitor(self, rhs: VirtualChunk<O, P>) -> Self::Output {
        VirtualChunkBegin {
            build: Box::new(move |dest, graph| {
                let inner = rhs.construct_into(dest, graph);
                (self.build)(inner, graph)
            }),
        }
    }
}

impl<I: 'static, O: 'static, P: 'static> BitOr<VirtualChunk<O, P>> for VirtualChunk<I, O> {
    type Output = VirtualChunk<I, P>;

    fn bitor(self, rhs: VirtualChunk<O, P>) -> Self::Output {
        self.then(rhs)
    }
}

impl<I: 'static, O: 'static> BitOr<VirtualChunkEnd<O>> for VirtualChunk<I, O> {
    type Output = VirtualChunkEnd<I>;

    fn bitor(self, rhs: VirtualChunkEnd<O>) -> Self::Output {
        VirtualChunkEnd {
            build: Box::new(move |graph| {
                let end = (rhs.build)(graph);
                self.construct_into(end, graph)
            }),
        }
    }
}

impl<O: 'static> BitOr<VirtualChunkEnd<O>> for VirtualChunkBegin<O> {
    type Output = Segment<VirtualSegment>;

    fn bitor(self, rhs: VirtualChunkEnd<O>) -> Self::Output {
        Segment(VirtualSegment {
            build: Box::new(move |graph| {
                let end = (rhs.build)(graph);
                (self.build)(end, graph)
            }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::nodes::{collect, generate, map, Collected};

    #[test]
    fn test_identity_adds_no_nodes() {
        let out = Collected::<u32>::new();
        let mut graph = GraphBuilder::new();
        let end = VirtualChunkEnd::new(collect(&out)).construct(&mut graph);
        let before = graph.graph().node_count();
        let entry = VirtualChunk::<u32, u32>::identity().construct_into(end, &mut graph);
        assert_eq!(graph.graph().node_count(), before);
        assert_eq!(entry.id(), NodeId(0));
    }

    #[test]
    fn test_erased_chain_runs() {
        let out = Collected::new();
        let begin = VirtualChunkBegin::<u64>::new(generate(5, |i| i));
        let double = VirtualChunk::new(map(|x: u64| x * 2));
        let show = VirtualChunk::new(map(|x: u64| format!("#{x}")));
        let end = VirtualChunkEnd::new(collect(&out));

        let mut pipeline = (begin | (double | show) | end).build().unwrap();
        pipeline.run(1 << 20).unwrap();
        assert_eq!(out.take(), vec!["#0", "#2", "#4", "#6", "#8"]);
    }
}
