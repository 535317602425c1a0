//! Learned null key/value slots prepended to every sequence.
//!
//! Each head owns `null_count` key and value vectors. They are broadcast over
//! the batch and concatenated in front of the projected keys and values, so a
//! query always has somewhere to put its attention mass. Pair with
//! [`NullKvBank::causal_offset`] when building the causal mask: the offset
//! form keeps the null slots visible to every query.

use candle_core::{DType, Device, Result, Tensor, Var};

use crate::core::AttentionError;
use crate::masks::causal_allow_mask;

/// Per-head learned null keys and values shaped `[heads, null_count, head_dim]`.
#[derive(Debug, Clone)]
pub struct NullKvBank {
    heads: usize,
    head_dim: usize,
    null_count: usize,
    slots: Option<(Var, Var)>,
}

impl NullKvBank {
    /// Draws the slots from a standard normal. `null_count == 0` yields an
    /// empty bank whose [`prepend`](Self::prepend) is the identity.
    pub fn new(
        heads: usize,
        null_count: usize,
        head_dim: usize,
        dtype: DType,
        device: &Device,
    ) -> std::result::Result<Self, AttentionError> {
        if heads == 0 || head_dim == 0 {
            return Err(AttentionError::InvalidConfig(format!(
                "null kv bank needs non-zero heads ({heads}) and head_dim ({head_dim})"
            )));
        }
        let slots = if null_count == 0 {
            None
        } else {
            let shape = (heads, null_count, head_dim);
            let keys = Tensor::randn(0f32, 1.0, shape, device)?.to_dtype(dtype)?;
            let values = Tensor::randn(0f32, 1.0, shape, device)?.to_dtype(dtype)?;
            Some((Var::from_tensor(&keys)?, Var::from_tensor(&values)?))
        };
        Ok(Self {
            heads,
            head_dim,
            null_count,
            slots,
        })
    }

    /// Wraps explicit slot tensors, both `[heads, null_count, head_dim]`.
    pub fn from_tensors(
        keys: Tensor,
        values: Tensor,
    ) -> std::result::Result<Self, AttentionError> {
        let (heads, null_count, head_dim) =
            keys.dims3().map_err(|_| AttentionError::InvalidShape {
                context: format!(
                    "null keys must be [heads, null_count, head_dim], got {:?}",
                    keys.dims()
                ),
            })?;
        if values.dims() != keys.dims() {
            return Err(AttentionError::InvalidShape {
                context: format!(
                    "null values {:?} do not match null keys {:?}",
                    values.dims(),
                    keys.dims()
                ),
            });
        }
        let slots = if null_count == 0 {
            None
        } else {
            Some((Var::from_tensor(&keys)?, Var::from_tensor(&values)?))
        };
        Ok(Self {
            heads,
            head_dim,
            null_count,
            slots,
        })
    }

    pub fn null_count(&self) -> usize {
        self.null_count
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_none()
    }

    /// Prepends the null slots to `k` and `v` (`[batch, heads, seq, head_dim]`).
    pub fn prepend(&self, k: &Tensor, v: &Tensor) -> Result<(Tensor, Tensor)> {
        let Some((null_k, null_v)) = &self.slots else {
            return Ok((k.clone(), v.clone()));
        };
        let (batch, heads, _, head_dim) = k.dims4()?;
        if heads != self.heads || head_dim != self.head_dim {
            candle_core::bail!(
                "null kv bank is [{}, {}, {}] but keys are {:?}",
                self.heads,
                self.null_count,
                self.head_dim,
                k.dims()
            );
        }
        let shape = (batch, self.heads, self.null_count, self.head_dim);
        let expand = |slot: &Var, like: &Tensor| -> Result<Tensor> {
            slot.as_tensor()
                .to_dtype(like.dtype())?
                .unsqueeze(0)?
                .broadcast_as(shape)?
                .contiguous()
        };
        let nk = expand(null_k, k)?;
        let nv = expand(null_v, v)?;
        Ok((
            Tensor::cat(&[&nk, &k.contiguous()?], 2)?,
            Tensor::cat(&[&nv, &v.contiguous()?], 2)?,
        ))
    }

    /// Causal allow-mask for `seq_len` queries over the null slots plus `seq_len` keys.
    pub fn causal_offset(&self, device: &Device, seq_len: usize) -> Result<Tensor> {
        causal_allow_mask(device, seq_len, seq_len + self.null_count)
    }

    pub fn named_parameters(&self, scope: &str) -> Vec<(String, Var)> {
        match &self.slots {
            Some((keys, values)) => vec![
                (format!("{scope}.null_k"), keys.clone()),
                (format!("{scope}.null_v"), values.clone()),
            ],
            None => Vec::new(),
        }
    }
}
