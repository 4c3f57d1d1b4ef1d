//! # phaseflow: phase-scheduled item pipelines
//!
//! A pipeline is a graph of nodes that stream items to each other. Nodes
//! connected by push or pull edges run together as a *phase*; phases run one
//! after another in an order derived from dependency edges and flush
//! priorities. Each phase receives a share of a memory budget, and nodes can
//! forward metadata (such as expected item counts) to their descendants.
//!
//! ## Architecture
//!
//! - **Pipeline**: node contract, graph compiler, phase executor, memory solver
//! - **Virtual chunks**: type-erased pieces composable at runtime
//! - **Parallel**: batch fan-out to worker threads with ordered fan-in
//! - **Config / logging**: TOML or JSON engine settings, tracing subscriber
//!
//! ## Example
//!
//! ```ignore
//! use phaseflow::pipeline::nodes::{collect, generate, map, Collected};
//!
//! let out = Collected::new();
//! let mut pipeline = (generate(10, |i| i) | map(|x: u64| x * 3) | collect(&out)).build()?;
//! pipeline.run(64 << 20)?;
//! assert_eq!(out.take().len(), 10);
//! ```

pub mod config;
pub mod error;
pub mod logging;
pub mod pipeline;

// Re-export commonly used types
pub use config::EngineConfig;
pub use error::{PhaseflowError, Result, ResultExt};
pub use pipeline::{Pipeline, PipelineBuilder, PipelineError, PipelineResult};
