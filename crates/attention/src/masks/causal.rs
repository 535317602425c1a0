//! Causal masks with an offset for keys that precede the query window.
//!
//! When `k_len > q_len` (prepended null slots, or a cached prefix) queries
//! align with the most recent `q_len` keys, so query `i` may see key `j` iff
//! `j <= i + (k_len - q_len)`. The leading `k_len - q_len` keys are therefore
//! visible to every query.

use candle_core::{Device, Result, Tensor};

use super::invert_mask;

/// Disallow mask: entry `(i, j)` is `1` iff `j > i + (k_len - q_len)`.
///
/// The offset is signed, so when `k_len < q_len` the earliest queries see no
/// keys at all.
pub fn causal_mask(device: &Device, q_len: usize, k_len: usize) -> Result<Tensor> {
    let offset = k_len as isize - q_len as isize;
    let data: Vec<u8> = (0..q_len)
        .flat_map(|i| (0..k_len).map(move |j| u8::from(j as isize > i as isize + offset)))
        .collect();
    Tensor::from_vec(data, (q_len, k_len), device)
}

/// Allow mask, the complement of [`causal_mask`].
pub fn causal_allow_mask(device: &Device, q_len: usize, k_len: usize) -> Result<Tensor> {
    invert_mask(&causal_mask(device, q_len, k_len)?)
}
