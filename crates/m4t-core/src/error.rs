//! Error types for the finetuning pipeline.

use std::path::PathBuf;

use thiserror::Error;

/// Main error type for data pipeline operations.
#[derive(Error, Debug)]
pub enum M4tError {
    /// Audio loading and feature extraction errors.
    #[error("Audio error: {0}")]
    Audio(String),

    /// Malformed manifest line.
    #[error("Manifest error at {path}:{line}: {message}")]
    Manifest {
        path: PathBuf,
        line: usize,
        message: String,
    },

    /// Configuration errors.
    #[error("Config error: {0}")]
    Config(String),

    /// Tokenizer construction or encoding errors.
    #[error("Tokenizer error: {0}")]
    Tokenizer(String),

    /// Every sample of a batch was rejected by the feature filter.
    #[error("Empty batch: {0}")]
    EmptyBatch(String),

    /// I/O errors.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Candle tensor errors.
    #[error("Tensor error: {0}")]
    Candle(#[from] candle_core::Error),

    /// JSON parsing errors.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for pipeline operations.
pub type M4tResult<T> = Result<T, M4tError>;
