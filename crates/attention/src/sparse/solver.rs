//! Block coordinate-descent solver for sparse, near one-hot attention rows.
//!
//! Given scores `s` (last two axes query × key), the solver alternates two
//! dual updates for a fixed number of passes:
//!
//! ```text
//! b ← -clamp(s)
//! repeat n_iters:
//!     s ← mask_fill(s)                                  (if a mask is given)
//!     a ← eps·log(k) − eps·logsumexp((s + b) / eps)     (over keys, keepdim)
//!     b ← −clamp(s + a)
//! s ← mask_fill(s)
//! weights = exp((s + a + b) / eps)
//! weights ← zero where masked
//! ```
//!
//! `a` is the row log-normaliser and `b` the per-entry penalty. Both are
//! recreated on every call. Masked entries are pushed to the most negative
//! finite value of the dtype before each pass and once more before the final
//! exponent, which makes their weight underflow to zero. A row with no
//! allowed key has an infinite normaliser, so masked weights are also zeroed
//! explicitly after the exponent. Row sums
//! approach `k` as `n_iters` grows, with every entry capped near one.
//!
//! Nothing guards against `eps` being tiny relative to the score magnitude;
//! in that regime the exponent can overflow and non-finite values propagate
//! to the caller.

use candle_core::{bail, Result, Tensor, D};

use crate::masks::{mask_value, masked_fill};

/// Monotone function forcing its input to be non-negative.
pub type ClampFn = fn(&Tensor) -> Result<Tensor>;

/// Default clamp, `max(0, x)`.
pub fn relu_clamp(tensor: &Tensor) -> Result<Tensor> {
    tensor.relu()
}

/// Numerically stable `log(sum(exp(x)))` over the last axis, keeping that axis.
///
/// Rows whose entries are all `-inf` reduce to `-inf` instead of `NaN`.
pub fn logsumexp_keepdim(x: &Tensor) -> Result<Tensor> {
    let max = x
        .max_keepdim(D::Minus1)?
        .maximum(mask_value(x.dtype()))?;
    let summed = x.broadcast_sub(&max)?.exp()?.sum_keepdim(D::Minus1)?;
    summed.log()?.add(&max)
}

/// Runs the coordinate-descent projection on `scores`.
///
/// * `scores`: any float tensor whose last two axes are `[q_len, k_len]`.
/// * `n_iters`: number of dual-update passes, at least one.
/// * `k`: sparsity target, broadcastable to `[..., q_len, 1]` (a scalar or a
///   per-query column); values below `1e-20` are clamped before the log.
/// * `eps`: smoothing temperature.
/// * `clamp`: non-negativity map applied to the penalty, usually [`relu_clamp`].
/// * `mask`: optional allow-mask broadcastable to `scores`, non-zero = allowed.
///
/// The caller's `scores` tensor is never modified.
pub fn coor_descent(
    scores: &Tensor,
    n_iters: usize,
    k: &Tensor,
    eps: f64,
    clamp: ClampFn,
    mask: Option<&Tensor>,
) -> Result<Tensor> {
    if n_iters == 0 {
        bail!("coordinate descent requires at least one iteration");
    }

    let dtype = scores.dtype();
    let fill = mask_value(dtype);
    let inv_eps = 1.0 / eps;
    let constant = k.to_dtype(dtype)?.maximum(1e-20)?.log()?.affine(eps, 0.0)?;

    let mut s = scores.clone();
    let mut b = clamp(&s)?.neg()?;
    // Overwritten on the first pass; n_iters >= 1 is checked above.
    let mut a = Tensor::zeros((), dtype, scores.device())?;

    for _ in 0..n_iters {
        if let Some(mask) = mask {
            s = masked_fill(&s, mask, fill)?;
        }
        let lse = logsumexp_keepdim(&s.add(&b)?.affine(inv_eps, 0.0)?)?;
        a = constant.broadcast_sub(&lse.affine(eps, 0.0)?)?;
        b = clamp(&s.broadcast_add(&a)?)?.neg()?;
    }

    if let Some(mask) = mask {
        s = masked_fill(&s, mask, fill)?;
    }

    log::debug!(
        "coor_descent: scores={:?} n_iters={} eps={}",
        scores.dims(),
        n_iters,
        eps
    );

    let weights = s.broadcast_add(&a)?.add(&b)?.affine(inv_eps, 0.0)?.exp()?;
    match mask {
        Some(mask) => masked_fill(&weights, mask, 0.0),
        None => Ok(weights),
    }
}
