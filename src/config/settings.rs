//! Engine settings sections
//!
//! Each section of [`EngineConfig`](super::EngineConfig) lives here:
//!
//! - [`MemorySettings`] - Per-phase memory budget
//! - [`ParallelSettings`] - Defaults for the parallel fan-out wrapper
//! - [`LoggingSettings`] - Tracing filter and optional log file

use crate::pipeline::OrderMode;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Default memory budget per phase (64 MiB)
pub const DEFAULT_BUDGET_BYTES: u64 = 64 * 1024 * 1024;

/// Default number of items per parallel batch
pub const DEFAULT_BATCH_SIZE: usize = 1024;

/// Default number of outstanding batches per worker
pub const DEFAULT_IN_FLIGHT_PER_WORKER: usize = 4;

/// Memory budget settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemorySettings {
    /// Bytes shared by the nodes of one phase
    pub budget_bytes: u64,
}

impl Default for MemorySettings {
    fn default() -> Self {
        Self {
            budget_bytes: DEFAULT_BUDGET_BYTES,
        }
    }
}

/// Parallel wrapper defaults
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParallelSettings {
    /// Worker threads per parallel section
    pub workers: usize,

    /// Items per batch handed to a worker
    pub batch_size: usize,

    /// Outstanding batches allowed per worker before the producer blocks
    pub in_flight_per_worker: usize,

    /// Whether output keeps input order
    pub order: OrderMode,
}

impl Default for ParallelSettings {
    fn default() -> Self {
        Self {
            workers: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4),
            batch_size: DEFAULT_BATCH_SIZE,
            in_flight_per_worker: DEFAULT_IN_FLIGHT_PER_WORKER,
            order: OrderMode::Preserve,
        }
    }
}

/// Logging settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// `EnvFilter` directive, overridden by `RUST_LOG` when set
    pub filter: String,

    /// Also write logs to this file
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<PathBuf>,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
            file: None,
        }
    }
}
