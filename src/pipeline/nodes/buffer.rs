//! Phase-boundary buffer.
//!
//! A buffer is split into an input node that ends one phase and an output
//! node that starts a later one; the output's phase depends on the input's.
//! When phases run in between, the executor evacuates the input, which
//! spills the buffered items to an anonymous temporary file in bincode's
//! binary encoding, which keeps every `f64` bit pattern. The output replays
//! them in their original order.

use crate::pipeline::error::{PipelineError, PipelineResult};
use crate::pipeline::executor::PipelineBuilder;
use crate::pipeline::factory::{Factory, PipeBegin, PipeEnd, TerminalFactory};
use crate::pipeline::graph::GraphBuilder;
use crate::pipeline::id::NodeId;
use crate::pipeline::metadata::ITEMS_KEY;
use crate::pipeline::node::{Node, NodeContext, Push};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs::File;
use std::io::{BufReader, BufWriter, Seek, SeekFrom};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

struct BufferState<T> {
    items: Vec<T>,
    spill: Option<File>,
    len: u64,
}

type Shared<T> = Arc<Mutex<BufferState<T>>>;

fn lock<T>(state: &Shared<T>) -> MutexGuard<'_, BufferState<T>> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Handle to a buffer whose two halves are added as separate segments.
pub struct Buffer<T> {
    input: NodeId,
    output: NodeId,
    state: Shared<T>,
}

impl<T> Buffer<T>
where
    T: Serialize + DeserializeOwned + Send + 'static,
{
    /// Reserve the buffer's nodes in `builder` and make the output's phase
    /// depend on the input's.
    pub fn new(builder: &mut PipelineBuilder) -> Self {
        let graph = builder.graph_mut();
        let input = graph.add_node("buffer input");
        let output = graph.add_node("buffer output");
        builder.add_dependency(output, input);
        Self {
            input,
            output,
            state: Arc::new(Mutex::new(BufferState {
                items: Vec::new(),
                spill: None,
                len: 0,
            })),
        }
    }

    pub fn input_id(&self) -> NodeId {
        self.input
    }

    pub fn output_id(&self) -> NodeId {
        self.output
    }

    /// Terminal half that accepts items.
    pub fn input(&self) -> PipeEnd<BufferInputFactory<T>> {
        PipeEnd(BufferInputFactory {
            id: self.input,
            state: Arc::clone(&self.state),
        })
    }

    /// Initiating half that replays the buffered items.
    pub fn output(&self) -> PipeBegin<BufferOutputFactory<T>> {
        PipeBegin(BufferOutputFactory {
            id: self.output,
            state: Arc::clone(&self.state),
        })
    }

    /// True while the buffered items live on disk.
    pub fn is_evacuated(&self) -> bool {
        lock(&self.state).spill.is_some()
    }
}

pub struct BufferInputFactory<T> {
    id: NodeId,
    state: Shared<T>,
}

impl<T> TerminalFactory for BufferInputFactory<T>
where
    T: Serialize + Send,
{
    type Node = BufferInput<T>;

    fn construct(self, _graph: &mut GraphBuilder) -> Self::Node {
        BufferInput {
            id: self.id,
            items: Vec::new(),
            state: self.state,
        }
    }
}

pub struct BufferInput<T> {
    id: NodeId,
    items: Vec<T>,
    state: Shared<T>,
}

impl<T> Node for BufferInput<T>
where
    T: Serialize + Send,
{
    fn id(&self) -> NodeId {
        self.id
    }

    fn begin(&mut self, _ctx: &mut NodeContext) -> PipelineResult<()> {
        self.items.clear();
        let mut state = lock(&self.state);
        state.items.clear();
        state.spill = None;
        state.len = 0;
        Ok(())
    }

    fn end(&mut self, _ctx: &mut NodeContext) -> PipelineResult<()> {
        let mut state = lock(&self.state);
        state.len = self.items.len() as u64;
        state.items = std::mem::take(&mut self.items);
        Ok(())
    }

    fn can_evacuate(&self) -> bool {
        true
    }

    fn evacuate(&mut self) -> PipelineResult<()> {
        let mut state = lock(&self.state);
        if state.spill.is_some() {
            return Ok(());
        }

        let mut writer = BufWriter::new(tempfile::tempfile()?);
        for item in state.items.drain(..) {
            bincode::serialize_into(&mut writer, &item)?;
        }
        let file = writer
            .into_inner()
            .map_err(|e| PipelineError::Io(e.into_error()))?;
        state.items = Vec::new();
        state.spill = Some(file);
        tracing::debug!("Spilled {} buffered items to disk", state.len);
        Ok(())
    }
}

impl<T> Push for BufferInput<T>
where
    T: Serialize + Send,
{
    type Item = T;

    #[inline]
    fn push(&mut self, item: T) -> PipelineResult<()> {
        self.items.push(item);
        Ok(())
    }
}

pub struct BufferOutputFactory<T> {
    id: NodeId,
    state: Shared<T>,
}

impl<T, D> Factory<D> for BufferOutputFactory<T>
where
    T: DeserializeOwned + Send,
    D: Push<Item = T>,
{
    type Node = BufferOutput<T, D>;

    fn construct(self, dest: D, graph: &mut GraphBuilder) -> Self::Node {
        graph.add_push_destination(self.id, dest.id());
        BufferOutput {
            id: self.id,
            state: self.state,
            dest,
        }
    }
}

pub struct BufferOutput<T, D> {
    id: NodeId,
    state: Shared<T>,
    dest: D,
}

impl<T, D> Node for BufferOutput<T, D>
where
    T: DeserializeOwned + Send,
    D: Push<Item = T>,
{
    fn id(&self) -> NodeId {
        self.id
    }

    fn propagate(&mut self, ctx: &mut NodeContext) -> PipelineResult<()> {
        let len = lock(&self.state).len;
        ctx.forward(ITEMS_KEY, len);
        ctx.set_steps(len);
        Ok(())
    }

    fn is_initiator(&self) -> bool {
        true
    }

    fn go(&mut self, ctx: &mut NodeContext) -> PipelineResult<()> {
        let (spill, items, len) = {
            let mut state = lock(&self.state);
            (state.spill.take(), std::mem::take(&mut state.items), state.len)
        };

        if let Some(mut file) = spill {
            file.seek(SeekFrom::Start(0))?;
            let mut reader = BufReader::new(file);
            for _ in 0..len {
                let item: T = bincode::deserialize_from(&mut reader)?;
                self.dest.push(item)?;
                ctx.step(1);
            }
        }
        for item in items {
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
