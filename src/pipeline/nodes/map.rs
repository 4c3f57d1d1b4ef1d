//! Map node: applies a function to every item.

use crate::pipeline::error::PipelineResult;
use crate::pipeline::factory::{Factory, PipeMiddle};
use crate::pipeline::graph::GraphBuilder;
use crate::pipeline::id::NodeId;
use crate::pipeline::node::{Node, Push};
use std::marker::PhantomData;

/// Push `f(item)` for every incoming item.
pub fn map<In, Out, F>(f: F) -> PipeMiddle<MapFactory<In, F>>
where
    F: FnMut(In) -> Out + Send,
{
    PipeMiddle(MapFactory {
        f,
        _in: PhantomData,
    })
}

pub struct MapFactory<In, F> {
    f: F,
    _in: PhantomData<fn(In)>,
}

impl<In, F, D> Factory<D> for MapFactory<In, F>
where
    D: Push,
    F: FnMut(In) -> D::Item + Send,
{
    type Node = MapNode<In, F, D>;

    fn construct(self, dest: D, graph: &mut GraphBuilder) -> Self::Node {
        let id = graph.add_node("map");
        graph.add_push_destination(id, dest.id());
        MapNode {
            id,
            f: self.f,
            dest,
            _in: PhantomData,
        }
    }
}

pub struct MapNode<In, F, D> {
    id: NodeId,
    f: F,
    dest: D,
    _in: PhantomData<fn(In)>,
}

impl<In, F, D> Node for MapNode<In, F, D>
where
    D: Push,
    F: FnMut(In) -> D::Item + Send,
{
    fn id(&self) -> NodeId {
        self.id
    }

    fn for_each_child(
        &mut self,
        visit: &mut dyn FnMut(&mut dyn Node) -> PipelineResult<()>,
    ) -> PipelineResult<()> {
        visit(&mut self.dest)
    }
}

impl<In, F, D> Push for MapNode<In, F, D>
where
    D: Push,
    F: FnMut(In) -> D::Item + Send,
{
    type Item = In;

    #[inline]
    fn push(&mut self, item: In) -> PipelineResult<()> {
        self.dest.push((self.f)(item))
    }
}

/// Like [`map`], but `f` may fail; the error aborts the run.
pub fn try_map<In, Out, F>(f: F) -> PipeMiddle<TryMapFactory<In, F>>
where
    F: FnMut(In) -> PipelineResult<Out> + Send,
{
    PipeMiddle(TryMapFactory {
        f,
        _in: PhantomData,
    })
}

pub struct TryMapFactory<In, F> {
    f: F,
    _in: PhantomData<fn(In)>,
}

impl<In, F, D> Factory<D> for TryMapFactory<In, F>
where
    D: Push,
    F: FnMut(In) -> PipelineResult<D::Item> + Send,
{
    type Node = TryMapNode<In, F, D>;

    fn construct(self, dest: D, graph: &mut GraphBuilder) -> Self::Node {
        let id = graph.add_node("try_map");
        graph.add_push_destination(id, dest.id());
        TryMapNode {
            id,
            f: self.f,
            dest,
            _in: PhantomData,
        }
    }
}

pub struct TryMapNode<In, F, D> {
    id: NodeId,
    f: F,
    dest: D,
    _in: PhantomData<fn(In)>,
}

impl<In, F, D> Node for TryMapNode<In, F, D>
where
    D: Push,
    F: FnMut(In) -> PipelineResult<D::Item> + Send,
{
    fn id(&self) -> NodeId {
        self.id
    }

    fn for_each_child(
        &mut self,
        visit: &mut dyn FnMut(&mut dyn Node) -> PipelineResult<()>,
    ) -> PipelineResult<()> {
        visit(&mut self.dest)
    }
}

impl<In, F, D> Push for TryMapNode<In, F, D>
where
    D: Push,
    F: FnMut(In) -> PipelineResult<D::Item> + Send,
{
    type Item = In;

    #[inline]
    fn push(&mut self, item: In) -> PipelineResult<()> {
        let mapped = (self.f)(item)?;
        self.dest.push(mapped)
    }
}
