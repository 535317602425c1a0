//! Decoder-only transformer whose attention layers normalise scores either
//! with a softmax or with the coordinate-descent sparse solver.

pub mod block;
pub mod config;
pub mod errors;
pub mod model;
pub mod self_attention;

pub use block::DecoderBlock;
pub use config::{ModelConfig, ModelHyperparameters};
pub use errors::ModelError;
pub use model::Model;
pub use self_attention::{AttentionBlockConfig, CausalSelfAttention};
