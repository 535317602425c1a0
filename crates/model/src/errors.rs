//! Errors surfaced while building or running the transformer stack.

use std::path::PathBuf;

use attention::AttentionError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ModelError {
    /// The token sequence is longer than the position table.
    #[error("sequence length {len} exceeds the configured maximum {max}")]
    SequenceTooLong { len: usize, max: usize },
    #[error("invalid model configuration: {0}")]
    InvalidConfig(String),
    #[error(transparent)]
    Attention(#[from] AttentionError),
    #[error(transparent)]
    Tensor(#[from] candle_core::Error),
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// The hyperparameter file could not be decoded.
    #[error("malformed configuration: {0}")]
    ConfigFormat(String),
}
