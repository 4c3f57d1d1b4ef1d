//! Phase-based pipeline composition and execution.
//!
//! Items flow through nodes connected by push edges (the producer calls its
//! destination) or pull edges (the consumer calls its source). Nodes joined
//! by such edges form a phase; dependency edges order phases. Each phase
//! runs to completion before the next begins.
//!
//! # Architecture
//!
//! ```text
//! factories ──|──► Segment ──► PipelineBuilder ──► PipelineCompiler ──► Pipeline::run
//!                                  (GraphBuilder)      (phases, order)     (PhaseExecutor)
//! ```
//!
//! # Design
//!
//! - **Owned neighbours**: a push node owns its destination and a pull node
//!   its source, so a chain is one type and an item hand-off is a direct call.
//! - **Graph arena**: names, memory declarations and edges live in a
//!   [`Graph`] indexed by [`NodeId`]; the scheduler reaches nodes by id.
//! - **Type erasure on demand**: [`VirtualChunk`] boxes the boundary between
//!   chunks when the composition must not be part of the type.
//! - **Fan-out**: [`parallel`] runs a chunk on worker threads and reassembles
//!   results, optionally in input order.

pub mod compiled_plan;
pub mod compiler;
pub mod error;
pub mod executor;
pub mod factory;
pub mod graph;
pub mod id;
pub mod memory;
pub mod metadata;
pub mod node;
pub mod nodes;
pub mod parallel;
pub mod virtual_chunk;

pub use compiled_plan::{CompiledPlan, Phase, PlanStats};
pub use compiler::PipelineCompiler;
pub use error::{PipelineError, PipelineResult};
pub use executor::{PhaseExecutor, PhaseSummary, Pipeline, PipelineBuilder, RunSummary};
pub use factory::{
    Factory, PipeBegin, PipeEnd, PipeMiddle, PullPipeBegin, PullPipeEnd, PullPipeMiddle,
    Segment, TerminalFactory,
};
pub use graph::{Edge, EdgeKind, FlushPriority, Graph, GraphBuilder, NodeInfo};
pub use id::{EdgeId, NodeId, PhaseId};
pub use memory::{solve, MemoryAssignment, MemoryRequest, Solution};
pub use metadata::{MetadataStore, ITEMS_KEY};
pub use node::{Node, NodeContext, Pull, Push};
pub use parallel::{parallel, OrderMode, ParallelOptions};
pub use virtual_chunk::{DynPush, VirtualChunk, VirtualChunkBegin, VirtualChunkEnd, VirtualDest};
