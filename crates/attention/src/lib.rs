//! Causal attention kernels with interchangeable score normalizers.
//!
//! Tensors use the layout `[batch, n_heads, seq_len, head_dim]`. Queries,
//! keys and values share a dtype (f16, bf16, f32 or f64); keys and values may
//! carry extra leading slots (see [`null_kv`]). Half-precision inputs are
//! scored in `f32` unless the kernel is built with
//! [`core::ScorePrecision::Inherit`], and the output matches the dtype of the
//! queries.
//!
//! Two normalizers are available, selected once through
//! [`core::Config::normalizer`]:
//!
//! * [`reference::ExactAttention`], a masked softmax over keys.
//! * [`sparse::CoorDescentAttention`], an iterative coordinate-descent
//!   projection whose rows concentrate on roughly `k` keys.
//!
//! Masks are integer tensors where non-zero marks an allowed query/key pair;
//! [`masks`] builds causal masks with an offset for prepended slots.

pub mod core;
pub mod masks;
pub mod null_kv;
pub mod reference;
pub mod sparse;

pub use core::{
    build_attention, Attention, AttentionError, Config, CoorDescentConfig, Normalizer,
    ScorePrecision,
};
pub use null_kv::NullKvBank;
