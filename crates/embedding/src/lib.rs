//! Token and position embeddings feeding the decoder stack.

pub mod positional;
pub mod token;

pub use positional::{PositionEmbedding, PositionEmbeddingConfig};
pub use token::{TokenEmbedding, TokenEmbeddingConfig};
