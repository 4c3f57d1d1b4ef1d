//! Parallel fan-out / fan-in wrapper.
//!
//! `parallel(chunk, options)` is a push middle that batches its input and
//! hands batches to worker threads. Every worker builds its own copy of the
//! chunk ending in a batch collector, runs it as a single phase, and sends
//! back the output of each batch. The orchestrating node forwards results
//! downstream on the calling thread.
//!
//! ```text
//!            ┌─► worker 0: chunk ─┐
//! push ─► batch ─► worker 1: chunk ─┼─► reorder? ─► dest
//!            └─► worker n: chunk ─┘
//! ```
//!
//! At most `workers * in_flight_per_worker` batches are outstanding; when the
//! limit is reached the orchestrator blocks until a result comes back.
//! Items a worker emits from its own `end` (residuals) are forwarded after
//! all batch results, in worker order.

use crate::config::ParallelSettings;
use crate::pipeline::compiler::PipelineCompiler;
use crate::pipeline::error::{PipelineError, PipelineResult};
use crate::pipeline::executor::PhaseExecutor;
use crate::pipeline::factory::{Factory, PipeMiddle};
use crate::pipeline::graph::GraphBuilder;
use crate::pipeline::id::NodeId;
use crate::pipeline::node::{collect_tree, Node, NodeContext, Push};
use crate::pipeline::virtual_chunk::VirtualChunk;
use crossbeam_channel::{bounded, unbounded, Receiver, Sender};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;

/// Output ordering of the parallel wrapper.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderMode {
    /// Forward batch results as they arrive.
    Arbitrary,
    /// Forward batch results in input order.
    #[default]
    Preserve,
}

/// Tuning for one parallel section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParallelOptions {
    pub workers: usize,
    pub batch_size: usize,
    pub order: OrderMode,
    pub in_flight_per_worker: usize,
}

impl Default for ParallelOptions {
    fn default() -> Self {
        Self::from_settings(&ParallelSettings::default())
    }
}

impl ParallelOptions {
    pub fn from_settings(settings: &ParallelSettings) -> Self {
        Self {
            workers: settings.workers,
            batch_size: settings.batch_size,
            order: settings.order,
            in_flight_per_worker: settings.in_flight_per_worker,
        }
    }

    pub fn workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn order(mut self, order: OrderMode) -> Self {
        self.order = order;
        self
    }

    pub fn in_flight_per_worker(mut self, in_flight: usize) -> Self {
        self.in_flight_per_worker = in_flight;
        self
    }

    /// Zero-valued knobs are raised to 1.
    fn normalized(mut self) -> Self {
        self.workers = self.workers.max(1);
        self.batch_size = self.batch_size.max(1);
        self.in_flight_per_worker = self.in_flight_per_worker.max(1);
        self
    }

    fn in_flight_limit(&self) -> usize {
        self.workers * self.in_flight_per_worker
    }
}

/// Run a fresh `chunk()` on each of `options.workers` threads.
pub fn parallel<I, O, C>(chunk: C, options: ParallelOptions) -> PipeMiddle<ParallelFactory<C>>
where
    C: Fn() -> VirtualChunk<I, O> + Send + Sync + 'static,
{
    PipeMiddle(ParallelFactory {
        chunk: Arc::new(chunk),
        options: options.normalized(),
    })
}

pub struct ParallelFactory<C> {
    chunk: Arc<C>,
    options: ParallelOptions,
}

impl<I, C, D> Factory<D> for ParallelFactory<C>
where
    I: Send + 'static,
    D: Push,
    D::Item: Send + 'static,
    C: Fn() -> VirtualChunk<I, D::Item> + Send + Sync + 'static,
{
    type Node = ParallelNode<I, C, D>;

    fn construct(self, dest: D, graph: &mut GraphBuilder) -> Self::Node {
        let id = graph.add_node("parallel");
        graph.add_push_destination(id, dest.id());
        ParallelNode {
            id,
            name: String::new(),
            chunk: self.chunk,
            options: self.options,
            batch: Vec::new(),
            next_seq: 0,
            next_emit: 0,
            pending: BTreeMap::new(),
            pool: None,
            dest,
        }
    }
}

type Job<I> = (u64, Vec<I>);

enum WorkerMessage<O> {
    Batch { seq: u64, items: Vec<O> },
    Finished { worker: usize, residual: Vec<O> },
    Failed { worker: usize, error: PipelineError },
    Panicked { worker: usize },
}

struct WorkerPool<I, O> {
    jobs: Option<Sender<Job<I>>>,
    results: Receiver<WorkerMessage<O>>,
    handles: Vec<JoinHandle<()>>,
    in_flight: usize,
}

impl<I, O> WorkerPool<I, O> {
    fn close(&mut self) {
        self.jobs = None;
    }
}

impl<I, O> Drop for WorkerPool<I, O> {
    fn drop(&mut self) {
        self.close();
        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }
    }
}

pub struct ParallelNode<I, C, D: Push> {
    id: NodeId,
    name: String,
    chunk: Arc<C>,
    options: ParallelOptions,
    batch: Vec<I>,
    next_seq: u64,
    next_emit: u64,
    /// Out-of-order results waiting for `next_emit` (preserve mode).
    pending: BTreeMap<u64, Vec<D::Item>>,
    pool: Option<WorkerPool<I, D::Item>>,
    dest: D,
}

impl<I, C, D> ParallelNode<I, C, D>
where
    I: Send + 'static,
    D: Push,
    D::Item: Send + 'static,
    C: Fn() -> VirtualChunk<I, D::Item> + Send + Sync + 'static,
{
    fn spawn_pool(&mut self, budget: u64) -> PipelineResult<()> {
        let workers = self.options.workers;
        let (job_tx, job_rx) = bounded::<Job<I>>(self.options.in_flight_limit());
        let (result_tx, result_rx) = unbounded();

        let mut handles = Vec::with_capacity(workers);
        for worker in 0..workers {
            let chunk = Arc::clone(&self.chunk);
            let jobs = job_rx.clone();
            let results = result_tx.clone();
            let handle = std::thread::Builder::new()
                .name(format!("{}-worker-{}", self.name, worker))
                .spawn(move || worker_main(worker, chunk.as_ref(), budget, jobs, results))?;
            handles.push(handle);
        }
        tracing::debug!(
            "'{}' started {} workers ({} bytes each)",
            self.name,
            workers,
            budget
        );

        self.pool = Some(WorkerPool {
            jobs: Some(job_tx),
            results: result_rx,
            handles,
            in_flight: 0,
        });
        Ok(())
    }

    fn pool(&mut self) -> PipelineResult<&mut WorkerPool<I, D::Item>> {
        let name = &self.name;
        self.pool
            .as_mut()
            .ok_or_else(|| PipelineError::Message(format!("'{name}' pushed to before begin")))
    }

    fn worker_error(&self, message: WorkerMessage<D::Item>) -> Option<PipelineError> {
        match message {
            WorkerMessage::Failed { worker, error } => Some(PipelineError::Worker {
                node: self.name.clone(),
                worker,
                source: Box::new(error),
            }),
            WorkerMessage::Panicked { worker } => Some(PipelineError::WorkerPanicked {
                node: self.name.clone(),
                worker,
            }),
            _ => None,
        }
    }

    /// Hand the current batch to the pool, waiting for results while the
    /// in-flight limit is reached.
    fn dispatch(&mut self) -> PipelineResult<()> {
        let batch = std::mem::replace(&mut self.batch, Vec::with_capacity(self.options.batch_size));
        let limit = self.options.in_flight_limit();
        while self.pool()?.in_flight >= limit {
            self.receive_one()?;
        }

        let seq = self.next_seq;
        let pool = self.pool()?;
        let sent = match &pool.jobs {
            Some(jobs) => jobs.send((seq, batch)).is_ok(),
            None => false,
        };
        if !sent {
            // Every worker is gone; report why if one of them said so.
            let pending: Vec<_> = pool.results.try_iter().collect();
            for message in pending {
                if let Some(error) = self.worker_error(message) {
                    return Err(error);
                }
            }
            return Err(PipelineError::ChannelSend);
        }
        pool.in_flight += 1;
        self.next_seq += 1;
        Ok(())
    }

    /// Block for one worker message and act on it.
    fn receive_one(&mut self) -> PipelineResult<Option<(usize, Vec<D::Item>)>> {
        let message = self
            .pool()?
            .results
            .recv()
            .map_err(|_| PipelineError::ChannelRecv)?;
        match message {
            WorkerMessage::Batch { seq, items } => {
                self.pool()?.in_flight -= 1;
                self.emit(seq, items)?;
                Ok(None)
            }
            WorkerMessage::Finished { worker, residual } => Ok(Some((worker, residual))),
            other => Err(self
                .worker_error(other)
                .unwrap_or(PipelineError::ChannelRecv)),
        }
    }

    fn emit(&mut self, seq: u64, items: Vec<D::Item>) -> PipelineResult<()> {
        match self.options.order {
            OrderMode::Arbitrary => self.forward(items),
            OrderMode::Preserve => {
                self.pending.insert(seq, items);
                while let Some(ready) = self.pending.remove(&self.next_emit) {
                    self.next_emit += 1;
                    self.forward(ready)?;
                }
                Ok(())
            }
        }
    }

    fn forward(&mut self, items: Vec<D::Item>) -> PipelineResult<()> {
        for item in items {
            self.dest.push(item)?;
        }
        Ok(())
    }
}

impl<I, C, D> Node for ParallelNode<I, C, D>
where
    I: Send + 'static,
    D: Push,
    D::Item: Send + 'static,
    C: Fn() -> VirtualChunk<I, D::Item> + Send + Sync + 'static,
{
    fn id(&self) -> NodeId {
        self.id
    }

    fn begin(&mut self, ctx: &mut NodeContext) -> PipelineResult<()> {
        self.name = ctx.name().to_string();
        self.batch = Vec::with_capacity(self.options.batch_size);
        self.next_seq = 0;
        self.next_emit = 0;
        self.pending.clear();
        // Dropping a pool left by an aborted run joins its threads.
        self.pool = None;

        let budget = ctx.available_memory() / self.options.workers as u64;
        self.spawn_pool(budget)
    }

    fn end(&mut self, _ctx: &mut NodeContext) -> PipelineResult<()> {
        if !self.batch.is_empty() {
            self.dispatch()?;
        }
        while self.pool()?.in_flight > 0 {
            self.receive_one()?;
        }
        self.pool()?.close();

        let mut residuals: Vec<Option<Vec<D::Item>>> =
            (0..self.options.workers).map(|_| None).collect();
        let mut finished = 0;
        while finished < self.options.workers {
            if let Some((worker, residual)) = self.receive_one()? {
                residuals[worker] = Some(residual);
                finished += 1;
            }
        }
        for residual in residuals.into_iter().flatten() {
            self.forward(residual)?;
        }

        if let Some(mut pool) = self.pool.take() {
            for (worker, handle) in pool.handles.drain(..).enumerate() {
                handle.join().map_err(|_| PipelineError::WorkerPanicked {
                    node: self.name.clone(),
                    worker,
                })?;
            }
        }
        tracing::debug!("'{}' processed {} batches", self.name, self.next_seq);
        Ok(())
    }

    fn for_each_child(
        &mut self,
        visit: &mut dyn FnMut(&mut dyn Node) -> PipelineResult<()>,
    ) -> PipelineResult<()> {
        visit(&mut self.dest)
    }
}

impl<I, C, D> Push for ParallelNode<I, C, D>
where
    I: Send + 'static,
    D: Push,
    D::Item: Send + 'static,
    C: Fn() -> VirtualChunk<I, D::Item> + Send + Sync + 'static,
{
    type Item = I;

    #[inline]
    fn push(&mut self, item: I) -> PipelineResult<()> {
        self.batch.push(item);
        if self.batch.len() >= self.options.batch_size {
            self.dispatch()?;
        }
        Ok(())
    }
}

// ── worker side ──

/// Terminal node of a worker's chunk; gathers one batch of output.
struct BatchSink<O> {
    id: NodeId,
    items: Arc<Mutex<Vec<O>>>,
}

fn take_batch<O>(items: &Arc<Mutex<Vec<O>>>) -> Vec<O> {
    let mut guard: MutexGuard<'_, Vec<O>> = items.lock().unwrap_or_else(PoisonError::into_inner);
    std::mem::take(&mut *guard)
}

impl<O: Send> Node for BatchSink<O> {
    fn id(&self) -> NodeId {
        self.id
    }
}

impl<O: Send> Push for BatchSink<O> {
    type Item = O;

    #[inline]
    fn push(&mut self, item: O) -> PipelineResult<()> {
        self.items
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(item);
        Ok(())
    }
}

fn worker_main<I, O, C>(
    worker: usize,
    chunk: &C,
    budget: u64,
    jobs: Receiver<Job<I>>,
    results: Sender<WorkerMessage<O>>,
) where
    I: Send + 'static,
    O: Send + 'static,
    C: Fn() -> VirtualChunk<I, O>,
{
    let _span = tracing::debug_span!("worker", index = worker).entered();
    let outcome = catch_unwind(AssertUnwindSafe(|| {
        run_worker(chunk, budget, &jobs, &results)
    }));
    let message = match outcome {
        Ok(Ok(residual)) => WorkerMessage::Finished { worker, residual },
        Ok(Err(error)) => {
            tracing::warn!("Worker {} failed: {}", worker, error);
            WorkerMessage::Failed { worker, error }
        }
        Err(_) => WorkerMessage::Panicked { worker },
    };
    let _ = results.send(message);
}

/// Build the worker's private copy of the chunk and run its single phase
/// around the batches received. Returns the items emitted by `end`.
fn run_worker<I, O, C>(
    chunk: &C,
    budget: u64,
    jobs: &Receiver<Job<I>>,
    results: &Sender<WorkerMessage<O>>,
) -> PipelineResult<Vec<O>>
where
    I: Send + 'static,
    O: Send + 'static,
    C: Fn() -> VirtualChunk<I, O>,
{
    let output = Arc::new(Mutex::new(Vec::new()));
    let mut builder = GraphBuilder::new();
    let sink = BatchSink {
        id: builder.add_node("parallel output"),
        items: Arc::clone(&output),
    };
    let mut entry = chunk().construct_into(Box::new(sink), &mut builder);
    let mut graph = builder.finish();

    let mut owned = Vec::new();
    collect_tree(&mut entry, &mut owned)?;
    let plan = PipelineCompiler::compile(&graph, &owned, &[entry.id()])?;
    let [phase] = plan.phases.as_slice() else {
        return Err(PipelineError::Config(format!(
            "parallel chunk must form one phase, found {}",
            plan.phases.len()
        )));
    };

    let mut executor = PhaseExecutor::new();
    executor.prepare(&mut graph, &mut [&mut entry as &mut dyn Node], 0, phase, budget)?;
    executor.begin(&mut graph, &mut [&mut entry as &mut dyn Node], 0, phase)?;

    for (seq, batch) in jobs.iter() {
        for item in batch {
            entry.push(item)?;
        }
        let items = take_batch(&output);
        results
            .send(WorkerMessage::Batch { seq, items })
            .map_err(|_| PipelineError::ChannelSend)?;
    }

    executor.end(&mut graph, &mut [&mut entry as &mut dyn Node], 0, phase)?;
    Ok(take_batch(&output))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::nodes::{collect, from_iter, map, Collected};

    fn squares(order: OrderMode) -> Vec<u64> {
        let out = Collected::new();
        let options = ParallelOptions::default()
            .workers(3)
            .batch_size(7)
            .order(order)
            .in_flight_per_worker(2);
        let chunk = || VirtualChunk::new(map(|x: u64| x * x));
        let mut pipeline = (from_iter(1..=100u64) | parallel(chunk, options) | collect(&out))
            .build()
            .unwrap();
        pipeline.run(1 << 20).unwrap();
        out.take()
    }

    #[test]
    fn test_preserve_keeps_input_order() {
        let expected: Vec<u64> = (1..=100u64).map(|x| x * x).collect();
        assert_eq!(squares(OrderMode::Preserve), expected);
    }

    #[test]
    fn test_arbitrary_delivers_every_item_once() {
        let mut got = squares(OrderMode::Arbitrary);
        got.sort_unstable();
        let expected: Vec<u64> = (1..=100u64).map(|x| x * x).collect();
        assert_eq!(got, expected);
    }

    #[test]
    fn test_zero_options_are_normalized() {
        let options = ParallelOptions::default()
            .workers(0)
            .batch_size(0)
            .in_flight_per_worker(0)
            .normalized();
        assert_eq!(options.workers, 1);
        assert_eq!(options.batch_size, 1);
        assert_eq!(options.in_flight_limit(), 1);
    }
}
