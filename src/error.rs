//! Error types shared by the library.

use thiserror::Error;

use crate::model::Task;

/// Errors raised while loading predictors or decoding.
#[derive(Debug, Error)]
pub enum SteerError {
    /// Tensor operation failed.
    #[error(transparent)]
    Candle(#[from] candle_core::Error),

    /// Reading or writing a table/config failed.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// JSON (de)serialisation failed.
    #[error(transparent)]
    Json(#[from] serde_json::Error),

    /// Tokenizer failure (encode/decode or file load).
    #[error("tokenizer error: {0}")]
    Tokenizer(String),

    /// A checkpoint was trained for a different attribute than the caller asked for.
    #[error("checkpoint is a {found} predictor, expected {expected}")]
    TaskMismatch { expected: Task, found: Task },

    /// Internally inconsistent configuration.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Caller-supplied inputs violate a decoding precondition.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Requested decoding path is not implemented.
    #[error("unsupported: {0}")]
    Unsupported(&'static str),
}

/// Result type for library operations.
pub type Result<T> = std::result::Result<T, SteerError>;
