//! Core traits and types shared across attention kernels.
//!
//! Kernels operate on tensors with layout `[batch, n_heads, seq_len, head_dim]`.
//! Keys and values may be longer than queries (prepended null slots); the
//! allow-mask then spans `[q_len, k_len]`, with `1` marking a permitted pair.

pub mod config;
pub mod errors;

use candle_core::{DType, Tensor};

use crate::reference::ExactAttention;
use crate::sparse::CoorDescentAttention;

pub use config::{Config, CoorDescentConfig, Normalizer, ScorePrecision};
pub use errors::AttentionError;

/// Unified interface for attention kernels.
///
/// * `q` is `[batch, heads, q_len, head_dim]`; `k` and `v` are
///   `[batch, heads, k_len, head_dim]`.
/// * `allow_mask`, when present, is an integer tensor shaped `[q_len, k_len]`
///   or `[batch|1, heads|1, q_len, k_len]`; non-zero entries are allowed.
/// * The returned tensor mirrors the layout and dtype of `q`.
pub trait Attention: Send + Sync + std::fmt::Debug {
    /// Scoring precision the kernel was built with.
    fn precision(&self) -> ScorePrecision;

    /// Normalises scores `[batch, heads, q_len, k_len]` into attention weights.
    fn weights(&self, scores: &Tensor, allow_mask: Option<&Tensor>)
        -> Result<Tensor, AttentionError>;

    /// Computes attention and also returns the weights, in the scoring dtype.
    fn attend_with_weights(
        &self,
        q: &Tensor,
        k: &Tensor,
        v: &Tensor,
        allow_mask: Option<&Tensor>,
    ) -> Result<(Tensor, Tensor), AttentionError> {
        let dims = validate_qkv(q, k, v)?;
        if let Some(mask) = allow_mask {
            validate_mask(mask, &dims)?;
        }

        let dtype = q.dtype();
        let compute = self.precision().scoring_dtype(dtype, q.device());
        let (q, k, v) = (q.to_dtype(compute)?, k.to_dtype(compute)?, v.to_dtype(compute)?);

        let scores = scaled_scores(&q, &k, dims.head_dim)?;
        let weights = self.weights(&scores, allow_mask)?;
        let output = weights.matmul(&v.contiguous()?)?;
        Ok((output.to_dtype(dtype)?, weights))
    }

    /// Computes attention with an optional allow-mask.
    fn attend(
        &self,
        q: &Tensor,
        k: &Tensor,
        v: &Tensor,
        allow_mask: Option<&Tensor>,
    ) -> Result<Tensor, AttentionError> {
        self.attend_with_weights(q, k, v, allow_mask)
            .map(|(output, _)| output)
    }
}

/// Builds the kernel selected by `config.normalizer`.
pub fn build_attention(config: &Config) -> Result<Box<dyn Attention>, AttentionError> {
    match config.normalizer {
        Normalizer::Softmax => Ok(Box::new(ExactAttention::new(config.precision))),
        Normalizer::CoorDescent(cfg) => {
            cfg.validate()?;
            Ok(Box::new(CoorDescentAttention::new(cfg, config.precision)))
        }
    }
}

/// Dimensions resolved from validated q/k/v tensors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QkvDims {
    pub batch: usize,
    pub heads: usize,
    pub q_len: usize,
    pub k_len: usize,
    pub head_dim: usize,
}

/// Checks device, dtype and shape agreement between `q`, `k` and `v`.
pub fn validate_qkv(q: &Tensor, k: &Tensor, v: &Tensor) -> Result<QkvDims, AttentionError> {
    let device = q.device();
    if !device.same_device(k.device()) || !device.same_device(v.device()) {
        return Err(AttentionError::InvalidShape {
            context: "q, k, v must reside on the same device".to_string(),
        });
    }

    let dtype = q.dtype();
    if dtype != k.dtype() || dtype != v.dtype() {
        return Err(AttentionError::InvalidShape {
            context: "q, k, v must share the same dtype".to_string(),
        });
    }
    if !matches!(dtype, DType::F16 | DType::BF16 | DType::F32 | DType::F64) {
        return Err(AttentionError::UnsupportedDType {
            requested: format!("{dtype:?}"),
        });
    }

    let (batch, heads, q_len, head_dim) = q.dims4().map_err(|_| AttentionError::InvalidShape {
        context: "q must have shape [batch, heads, seq_len, head_dim]".to_string(),
    })?;
    let (kb, kh, k_len, kd) = k.dims4().map_err(|_| AttentionError::InvalidShape {
        context: "k must have shape [batch, heads, seq_len, head_dim]".to_string(),
    })?;
    let (vb, vh, vk, vd) = v.dims4().map_err(|_| AttentionError::InvalidShape {
        context: "v must have shape [batch, heads, seq_len, head_dim]".to_string(),
    })?;

    if kb != batch || kh != heads || kd != head_dim {
        return Err(AttentionError::InvalidShape {
            context: format!(
                "k shape [{kb}, {kh}, {k_len}, {kd}] does not match \
                 [{batch}, {heads}, ?, {head_dim}]"
            ),
        });
    }
    if vb != batch || vh != heads || vk != k_len || vd != head_dim {
        return Err(AttentionError::InvalidShape {
            context: format!(
                "v shape [{vb}, {vh}, {vk}, {vd}] does not match \
                 [{batch}, {heads}, {k_len}, {head_dim}]"
            ),
        });
    }
    if head_dim == 0 || k_len == 0 {
        return Err(AttentionError::InvalidShape {
            context: "head_dim and key length must be non-zero".to_string(),
        });
    }

    Ok(QkvDims {
        batch,
        heads,
        q_len,
        k_len,
        head_dim,
    })
}

fn validate_mask(mask: &Tensor, dims: &QkvDims) -> Result<(), AttentionError> {
    if !matches!(mask.dtype(), DType::U8 | DType::U32 | DType::I64) {
        return Err(AttentionError::UnsupportedDType {
            requested: format!("mask expects an integer dtype, got {:?}", mask.dtype()),
        });
    }
    let ok = match mask.dims() {
        [mq, mk] => *mq == dims.q_len && *mk == dims.k_len,
        [mb, mh, mq, mk] => {
            (*mb == 1 || *mb == dims.batch)
                && (*mh == 1 || *mh == dims.heads)
                && *mq == dims.q_len
                && *mk == dims.k_len
        }
        _ => false,
    };
    if ok {
        Ok(())
    } else {
        Err(AttentionError::InvalidShape {
            context: format!(
                "mask shape mismatch: expected [{q}, {k}] or [{b}|1, {h}|1, {q}, {k}] got {:?}",
                mask.dims(),
                q = dims.q_len,
                k = dims.k_len,
                b = dims.batch,
                h = dims.heads,
            ),
        })
    }
}

/// `(q / sqrt(head_dim)) · kᵀ`, shaped `[batch, heads, q_len, k_len]`.
pub fn scaled_scores(q: &Tensor, k: &Tensor, head_dim: usize) -> candle_core::Result<Tensor> {
    let scale = 1.0 / (head_dim as f64).sqrt();
    let q = q.affine(scale, 0.0)?.contiguous()?;
    q.matmul(&k.contiguous()?.t()?)
}
