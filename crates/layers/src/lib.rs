//! Building blocks for the transformer stack that surrounds the attention
//! kernels.
//!
//! Every layer here consumes hidden states shaped `(batch, seq, hidden)` and
//! propagates `candle_core::Result` so callers can chain them with `?`.
//! Parameters are stored in the dtype requested at construction while matmuls
//! and reductions follow the [`PrecisionPolicy`] attached to each call.

pub mod activations;
pub mod checks;
pub mod dtypes;
pub mod linear;
pub mod mlp;
pub mod norm;
pub mod residual;

pub use activations::gelu;
pub use dtypes::PrecisionPolicy;
pub use linear::{Linear, LinearConfig, LinearInit};
pub use mlp::{FeedForward, FeedForwardConfig};
pub use norm::{LayerNorm, NormConfig};
pub use residual::Residual;
