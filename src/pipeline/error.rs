//! Pipeline-specific error types.

use crate::pipeline::id::NodeId;
use thiserror::Error;

/// Errors that can occur while building or running a pipeline.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("cyclic item flow through nodes [{}]", nodes.join(", "))]
    CyclicFlow { nodes: Vec<String> },

    #[error("cyclic phase dependency between phases {phases:?}")]
    CyclicPhaseDependency { phases: Vec<usize> },

    #[error("malformed node '{node}': {reason}")]
    MalformedNode { node: String, reason: &'static str },

    #[error("unknown node {0:?}")]
    UnknownNode(NodeId),

    #[error("no metadata '{key}' reachable from node '{node}'")]
    MetadataMissing { key: String, node: String },

    #[error("metadata '{key}' holds {actual}, not {expected}")]
    MetadataType {
        key: String,
        expected: &'static str,
        actual: &'static str,
    },

    #[error("node '{node}' failed in phase {phase}: {source}")]
    Node {
        node: String,
        phase: usize,
        #[source]
        source: Box<PipelineError>,
    },

    #[error("worker {worker} of '{node}' failed: {source}")]
    Worker {
        node: String,
        worker: usize,
        #[source]
        source: Box<PipelineError>,
    },

    #[error("worker {worker} of '{node}' panicked")]
    WorkerPanicked { node: String, worker: usize },

    #[error("evacuation of '{node}' after phase {phase} failed: {source}")]
    Evacuation {
        node: String,
        phase: usize,
        #[source]
        source: Box<PipelineError>,
    },

    #[error("pull from exhausted source '{0}'")]
    Exhausted(String),

    #[error("node '{node}' is not an initiator")]
    NotAnInitiator { node: String },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("spill encoding error: {0}")]
    Spill(#[from] bincode::Error),

    #[error("{0}")]
    Message(String),

    #[error("channel send error")]
    ChannelSend,

    #[error("channel receive error")]
    ChannelRecv,
}

impl PipelineError {
    /// Attach a node name and phase index to an error raised inside a hook.
    ///
    /// Errors that already carry a location are returned unchanged so the
    /// innermost location wins.
    pub fn at_node(self, node: impl Into<String>, phase: usize) -> Self {
        match self {
            located @ PipelineError::Node { .. } => located,
            other => PipelineError::Node {
                node: node.into(),
                phase,
                source: Box::new(other),
            },
        }
    }

    /// Free-form failure raised by user node code.
    pub fn message(msg: impl Into<String>) -> Self {
        PipelineError::Message(msg.into())
    }

    /// True for errors detected while validating the graph, before any hook ran.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            PipelineError::CyclicFlow { .. }
                | PipelineError::CyclicPhaseDependency { .. }
                | PipelineError::MalformedNode { .. }
                | PipelineError::UnknownNode(_)
                | PipelineError::Config(_)
        )
    }
}

pub type PipelineResult<T> = std::result::Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cyclic_flow_display() {
        let err = PipelineError::CyclicFlow {
            nodes: vec!["a".into(), "b".into()],
        };
        assert_eq!(err.to_string(), "cyclic item flow through nodes [a, b]");
        assert!(err.is_configuration());
    }

    #[test]
    fn test_at_node_keeps_innermost_location() {
        let err = PipelineError::message("boom").at_node("inner", 1);
        let err = err.at_node("outer", 2);
        match err {
            PipelineError::Node { node, phase, .. } => {
                assert_eq!(node, "inner");
                assert_eq!(phase, 1);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_located_error_mentions_node_and_phase() {
        let err = PipelineError::Exhausted("src".into()).at_node("sink", 0);
        let text = err.to_string();
        assert!(text.contains("sink"));
        assert!(text.contains("phase 0"));
        assert!(!err.is_configuration());
    }

    #[test]
    fn test_evacuation_error_names_phase() {
        let err = PipelineError::Evacuation {
            node: "buffer input".into(),
            phase: 3,
            source: Box::new(PipelineError::message("disk full")),
        };
        assert_eq!(
            err.to_string(),
            "evacuation of 'buffer input' after phase 3 failed: disk full"
        );
    }
}
