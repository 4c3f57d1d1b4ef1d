//! Composition syntax.
//!
//! A factory describes a node that has not been constructed yet. Push chains
//! are constructed right to left, so each factory receives its already-built
//! destination; pull chains are constructed left to right, so each factory
//! receives its already-built source.
//!
//! ```text
//! generate(..) | map(..) | collect(..)            push: begin | middle* | end
//! pull_from_iter(..) | pull_map(..) | pull_collect(..)   pull: begin | middle* | end
//! ```
//!
//! Composing a begin with an end yields a [`Segment`], which can be added to
//! a [`PipelineBuilder`](crate::pipeline::PipelineBuilder). The `|` impls
//! carry no bounds; mismatched item types surface as unsatisfied bounds when
//! the segment is constructed.

use crate::pipeline::error::PipelineResult;
use crate::pipeline::executor::{Pipeline, PipelineBuilder};
use crate::pipeline::graph::{FlushPriority, GraphBuilder};
use crate::pipeline::node::Node;
use std::ops::BitOr;

/// Builds a node around an already-constructed neighbour.
pub trait Factory<Inner> {
    type Node: Node;

    fn construct(self, inner: Inner, graph: &mut GraphBuilder) -> Self::Node;
}

/// Builds a node (or a whole chain) with no neighbour to wrap.
pub trait TerminalFactory {
    type Node: Node;

    fn construct(self, graph: &mut GraphBuilder) -> Self::Node;
}

/// `Outer` wrapped around `Inner`, both waiting for the innermost neighbour.
#[derive(Debug, Clone)]
pub struct Nested<Outer, Inner> {
    outer: Outer,
    inner: Inner,
}

impl<Outer, Inner, N> Factory<N> for Nested<Outer, Inner>
where
    Inner: Factory<N>,
    Outer: Factory<Inner::Node>,
{
    type Node = Outer::Node;

    fn construct(self, neighbour: N, graph: &mut GraphBuilder) -> Self::Node {
        let inner = self.inner.construct(neighbour, graph);
        self.outer.construct(inner, graph)
    }
}

/// `Outer` wrapped around a terminal `Leaf`.
#[derive(Debug, Clone)]
pub struct Capped<Outer, Leaf> {
    outer: Outer,
    leaf: Leaf,
}

impl<Outer, Leaf> TerminalFactory for Capped<Outer, Leaf>
where
    Leaf: TerminalFactory,
    Outer: Factory<Leaf::Node>,
{
    type Node = Outer::Node;

    fn construct(self, graph: &mut GraphBuilder) -> Self::Node {
        let leaf = self.leaf.construct(graph);
        self.outer.construct(leaf, graph)
    }
}

/// Scheduling and memory declarations applied to the node a factory builds.
#[derive(Debug, Clone, Default)]
pub struct NodeSettings {
    pub name: Option<String>,
    pub flush_priority: Option<FlushPriority>,
    pub memory_fraction: Option<f64>,
    pub minimum_memory: Option<u64>,
    pub maximum_memory: Option<u64>,
}

impl NodeSettings {
    fn apply(self, node: &dyn Node, graph: &mut GraphBuilder) {
        let id = node.id();
        if let Some(name) = self.name {
            graph.set_name(id, name);
        }
        if let Some(priority) = self.flush_priority {
            graph.set_flush_priority(id, priority);
        }
        if let Some(fraction) = self.memory_fraction {
            graph.set_memory_fraction(id, fraction);
        }
        if let Some(bytes) = self.minimum_memory {
            graph.set_minimum_memory(id, bytes);
        }
        if let Some(bytes) = self.maximum_memory {
            graph.set_maximum_memory(id, bytes);
        }
    }
}

/// A factory plus settings for the node it builds.
#[derive(Debug, Clone)]
pub struct Configured<F> {
    inner: F,
    settings: NodeSettings,
}

impl<F, N> Factory<N> for Configured<F>
where
    F: Factory<N>,
{
    type Node = F::Node;

    fn construct(self, neighbour: N, graph: &mut GraphBuilder) -> Self::Node {
        let node = self.inner.construct(neighbour, graph);
        self.settings.apply(&node, graph);
        node
    }
}

impl<F: TerminalFactory> TerminalFactory for Configured<F> {
    type Node = F::Node;

    fn construct(self, graph: &mut GraphBuilder) -> Self::Node {
        let node = self.inner.construct(graph);
        self.settings.apply(&node, graph);
        node
    }
}

/// First node of a push chain; wraps its destination.
#[derive(Debug, Clone)]
pub struct PipeBegin<F>(pub F);

/// Push node between a begin and an end; wraps its destination.
#[derive(Debug, Clone)]
pub struct PipeMiddle<F>(pub F);

/// Last node of a push chain.
#[derive(Debug, Clone)]
pub struct PipeEnd<F>(pub F);

/// First node of a pull chain (the source).
#[derive(Debug, Clone)]
pub struct PullPipeBegin<F>(pub F);

/// Pull node between a begin and an end; wraps its source.
#[derive(Debug, Clone)]
pub struct PullPipeMiddle<F>(pub F);

/// Last node of a pull chain; the consumer that drives it.
#[derive(Debug, Clone)]
pub struct PullPipeEnd<F>(pub F);

/// A complete chain, ready to be added to a pipeline.
#[derive(Debug, Clone)]
pub struct Segment<F>(pub F);

impl<F: TerminalFactory> TerminalFactory for Segment<F> {
    type Node = F::Node;

    fn construct(self, graph: &mut GraphBuilder) -> Self::Node {
        self.0.construct(graph)
    }
}

impl<F> Segment<F>
where
    F: TerminalFactory,
    F::Node: 'static,
{
    /// Build a pipeline consisting of this segment alone.
    pub fn build(self) -> PipelineResult<Pipeline> {
        let mut builder = PipelineBuilder::new();
        builder.add(self);
        builder.build()
    }
}

// ── push composition (right to left) ──

impl<A, B> BitOr<PipeMiddle<B>> for PipeBegin<A> {
    type Output = PipeBegin<Nested<A, B>>;

    fn bitor(self, rhs: PipeMiddle<B>) -> Self::Output {
        PipeBegin(Nested {
            outer: self.0,
            inner: rhs.0,
        })
    }
}

impl<A, B> BitOr<PipeMiddle<B>> for PipeMiddle<A> {
    type Output = PipeMiddle<Nested<A, B>>;

    fn bitor(self, rhs: PipeMiddle<B>) -> Self::Output {
        PipeMiddle(Nested {
            outer: self.0,
            inner: rhs.0,
        })
    }
}

impl<A, B> BitOr<PipeEnd<B>> for PipeMiddle<A> {
    type Output = PipeEnd<Capped<A, B>>;

    fn bitor(self, rhs: PipeEnd<B>) -> Self::Output {
        PipeEnd(Capped {
            outer: self.0,
            leaf: rhs.0,
        })
    }
}

impl<A, B> BitOr<PipeEnd<B>> for PipeBegin<A> {
    type Output = Segment<Capped<A, B>>;

    fn bitor(self, rhs: PipeEnd<B>) -> Self::Output {
        Segment(Capped {
            outer: self.0,
            leaf: rhs.0,
        })
    }
}

// ── pull composition (left to right) ──

impl<A, B> BitOr<PullPipeMiddle<B>> for PullPipeBegin<A> {
    type Output = PullPipeBegin<Capped<B, A>>;

    fn bitor(self, rhs: PullPipeMiddle<B>) -> Self::Output {
        PullPipeBegin(Capped {
            outer: rhs.0,
            leaf: self.0,
        })
    }
}

impl<A, B> BitOr<PullPipeMiddle<B>> for PullPipeMiddle<A> {
    type Output = PullPipeMiddle<Nested<B, A>>;

    fn bitor(self, rhs: PullPipeMiddle<B>) -> Self::Output {
        PullPipeMiddle(Nested {
            outer: rhs.0,
            inner: self.0,
        })
    }
}

impl<A, B> BitOr<PullPipeEnd<B>> for PullPipeMiddle<A> {
    type Output = PullPipeEnd<Nested<B, A>>;

    fn bitor(self, rhs: PullPipeEnd<B>) -> Self::Output {
        PullPipeEnd(Nested {
            outer: rhs.0,
            inner: self.0,
        })
    }
}

impl<A, B> BitOr<PullPipeEnd<B>> for PullPipeBegin<A> {
    type Output = Segment<Capped<B, A>>;

    fn bitor(self, rhs: PullPipeEnd<B>) -> Self::Output {
        Segment(Capped {
            outer: rhs.0,
            leaf: self.0,
        })
    }
}

macro_rules! node_settings {
    ($($wrapper:ident),* $(,)?) => {$(
        impl<F> $wrapper<F> {
            fn configure(self, set: impl FnOnce(&mut NodeSettings)) -> $wrapper<Configured<F>> {
                let mut settings = NodeSettings::default();
                set(&mut settings);
                $wrapper(Configured { inner: self.0, settings })
            }

            /// Display name of the outermost node.
            pub fn name(self, name: impl Into<String>) -> $wrapper<Configured<F>> {
                let name = name.into();
                self.configure(|s| s.name = Some(name))
            }

            pub fn flush_priority(self, priority: FlushPriority) -> $wrapper<Configured<F>> {
                self.configure(|s| s.flush_priority = Some(priority))
            }

            /// Relative share of surplus memory (the node's memory priority).
            pub fn memory_fraction(self, fraction: f64) -> $wrapper<Configured<F>> {
                self.configure(|s| s.memory_fraction = Some(fraction))
            }

            pub fn minimum_memory(self, bytes: u64) -> $wrapper<Configured<F>> {
                self.configure(|s| s.minimum_memory = Some(bytes))
            }

            pub fn maximum_memory(self, bytes: u64) -> $wrapper<Configured<F>> {
                self.configure(|s| s.maximum_memory = Some(bytes))
            }
        }
    )*};
}

node_settings!(
    PipeBegin,
    PipeMiddle,
    PipeEnd,
    PullPipeBegin,
    PullPipeMiddle,
    PullPipeEnd,
);
