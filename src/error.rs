//! Error types for pipeline construction and execution.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while wiring, initializing or running a pipeline.
///
/// Errors never travel through a [`RowSet`](crate::RowSet): a step either
/// routes a failing row to its error hop or returns one of these from
/// `process`, which the engine turns into an error count plus stop-all.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Declared configuration is unusable (detected at init).
    #[error("step '{step}': configuration error: {message}")]
    Config { step: String, message: String },

    /// Schemas could not be resolved or merged.
    #[error("schema error: {0}")]
    Schema(String),

    /// A single row failed business logic and no error hop is wired.
    #[error("step '{step}': row error: {message}")]
    Row { step: String, message: String },

    /// Reading or writing a spill file failed.
    #[error("spill file {}: {source}", path.display())]
    Spill {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Hops reference unknown steps, steps are duplicated, or the graph
    /// contains a cycle.
    #[error("topology error: {0}")]
    Topology(String),

    /// A row violates the arity or schema invariants.
    #[error("invalid row: {0}")]
    InvalidRow(String),
}

impl PipelineError {
    pub fn config(step: impl Into<String>, message: impl Into<String>) -> Self {
        PipelineError::Config {
            step: step.into(),
            message: message.into(),
        }
    }

    pub fn row(step: impl Into<String>, message: impl Into<String>) -> Self {
        PipelineError::Row {
            step: step.into(),
            message: message.into(),
        }
    }

    /// True for errors detected before any row moved.
    pub fn is_config(&self) -> bool {
        matches!(
            self,
            PipelineError::Config { .. } | PipelineError::Schema(_) | PipelineError::Topology(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;
