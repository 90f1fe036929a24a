//! Error taxonomy for the scoring pipeline.
//!
//! Every stage returns a typed error and the orchestrator aborts the run on the
//! first one. Nothing here is retried.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, PipelineError>;

#[derive(Debug, Error)]
pub enum PipelineError {
    /// A column is missing or holds a non-finite value.
    #[error("schema error: {0}")]
    Schema(String),

    #[error("insufficient data: need at least {required} rows, got {found}")]
    InsufficientData { required: usize, found: usize },

    #[error("invalid configuration: {0}")]
    Config(String),

    /// Persisted model is corrupt, from a newer format, or does not match the
    /// configured feature set.
    #[error("model state error: {0}")]
    ModelState(String),

    #[error("division by zero: {0}")]
    DivisionByZero(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl PipelineError {
    pub(crate) fn missing_column(column: &str, row: usize) -> Self {
        Self::Schema(format!("column '{}' missing at row {}", column, row))
    }
}
