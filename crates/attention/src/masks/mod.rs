//! Mask utilities shared by attention kernels.
//!
//! Masks are `u8` tensors shaped `[q_len, k_len]`. The causal builder returns
//! a *disallow* mask (`1` = the query may not see the key); kernels consume
//! the inverted *allow* mask. Masked scores are filled with
//! [`mask_value`], the most negative finite value of the score dtype, rather
//! than `-inf` so downstream arithmetic never produces `NaN`.

pub mod causal;

use candle_core::{DType, Result, Tensor};

/// Dtype of every mask produced here.
pub const MASK_DTYPE: DType = DType::U8;

pub use causal::{causal_allow_mask, causal_mask};

/// Most negative finite value representable in `dtype`.
pub fn mask_value(dtype: DType) -> f64 {
    match dtype {
        DType::F16 => -65504.0,
        DType::BF16 => -3.389_531_389_251_535_5e38,
        DType::F32 => f64::from(f32::MIN),
        _ => f64::MIN,
    }
}

/// Keeps entries of `tensor` where `allow` is non-zero and replaces the rest with `value`.
///
/// `allow` must broadcast to the shape of `tensor`.
pub fn masked_fill(tensor: &Tensor, allow: &Tensor, value: f64) -> Result<Tensor> {
    let shape = tensor.shape();
    let allow = allow.broadcast_as(shape)?;
    let fill = Tensor::new(value, tensor.device())?
        .to_dtype(tensor.dtype())?
        .broadcast_as(shape)?;
    allow.where_cond(tensor, &fill)
}

/// Turns a disallow mask into an allow mask and vice versa.
pub fn invert_mask(mask: &Tensor) -> Result<Tensor> {
    mask.ones_like()?.sub(mask)
}
