//! Residual connections around the attention and feed-forward branches.
//!
//! Both operands are shaped `(batch, seq, hidden)`. The addition runs in the
//! compute dtype and is cast back to storage, so reduced-precision stacks do
//! not accumulate rounding error across layers.

use candle_core::{Error, Result, Tensor};

use crate::dtypes::PrecisionPolicy;

/// Adds a transformed branch back onto its input.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Residual;

impl Residual {
    pub fn new() -> Self {
        Self
    }

    /// Combines `branch` with `residual` using the provided precision policy.
    pub fn forward(
        &self,
        branch: &Tensor,
        residual: &Tensor,
        policy: &PrecisionPolicy,
    ) -> Result<Tensor> {
        if branch.dims() != residual.dims() {
            return Err(Error::Msg(format!(
                "residual operands disagree: branch {:?} vs residual {:?}",
                branch.dims(),
                residual.dims()
            )));
        }
        let branch = policy.cast_for_matmul(branch)?;
        let residual = policy.cast_for_matmul(residual)?;
        policy.cast_to_storage(&(branch + residual)?)
    }
}
