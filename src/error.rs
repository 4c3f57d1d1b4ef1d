//! Error handling for phaseflow
//!
//! This module defines the crate-level error type and a Result alias for
//! everything outside the engine itself (configuration files, logging
//! setup). Engine failures are [`PipelineError`]s and convert into
//! [`PhaseflowError::Pipeline`].

use crate::pipeline::PipelineError;
use thiserror::Error;

/// Main error type for phaseflow operations
#[derive(Error, Debug)]
pub enum PhaseflowError {
    /// Errors raised while building or running a pipeline
    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    /// Errors related to configuration loading/saving
    #[error("Configuration error: {0}")]
    Config(String),

    /// Errors installing the tracing subscriber
    #[error("Logging error: {0}")]
    Logging(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Generic errors with context
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<PhaseflowError>,
    },
}

impl PhaseflowError {
    /// Add context to an error
    pub fn with_context(self, context: impl Into<String>) -> Self {
        PhaseflowError::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }
}

impl From<serde_json::Error> for PhaseflowError {
    fn from(err: serde_json::Error) -> Self {
        PhaseflowError::Serialization(err.to_string())
    }
}

impl From<toml::de::Error> for PhaseflowError {
    fn from(err: toml::de::Error) -> Self {
        PhaseflowError::Serialization(err.to_string())
    }
}

impl From<toml::ser::Error> for PhaseflowError {
    fn from(err: toml::ser::Error) -> Self {
        PhaseflowError::Serialization(err.to_string())
    }
}

/// Result type alias for phaseflow operations
pub type Result<T> = std::result::Result<T, PhaseflowError>;

/// Extension trait for adding context to Results
pub trait ResultExt<T> {
    /// Add context to an error result
    fn context(self, context: impl Into<String>) -> Result<T>;

    /// Add context lazily to an error result
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T> ResultExt<T> for Result<T> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.with_context(context))
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| e.with_context(f()))
    }
}

impl<T> ResultExt<T> for std::result::Result<T, PipelineError> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| PhaseflowError::from(e).with_context(context))
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| PhaseflowError::from(e).with_context(f()))
    }
}
