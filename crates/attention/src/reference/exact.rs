//! Softmax attention kernel.
//!
//! Disallowed scores are filled with the most negative finite value of the
//! scoring dtype before a row-wise softmax over the key axis.

use std::sync::OnceLock;

use candle_core::Tensor;
use candle_nn::ops::softmax_last_dim;

use crate::core::{Attention, AttentionError, ScorePrecision};
use crate::masks::{mask_value, masked_fill};

/// Numerically stable softmax attention.
#[derive(Debug, Default)]
pub struct ExactAttention {
    precision: ScorePrecision,
    first_call: OnceLock<()>,
}

impl ExactAttention {
    /// Construct a softmax kernel scoring with the given precision.
    pub fn new(precision: ScorePrecision) -> Self {
        Self {
            precision,
            first_call: OnceLock::new(),
        }
    }
}

impl Attention for ExactAttention {
    fn precision(&self) -> ScorePrecision {
        self.precision
    }

    fn weights(
        &self,
        scores: &Tensor,
        allow_mask: Option<&Tensor>,
    ) -> Result<Tensor, AttentionError> {
        if self.first_call.set(()).is_ok() {
            log::info!(
                "attention::reference init normalizer=softmax precision={:?}",
                self.precision
            );
        }

        let masked = match allow_mask {
            Some(mask) => masked_fill(scores, mask, mask_value(scores.dtype()))?,
            None => scores.contiguous()?,
        };
        Ok(softmax_last_dim(&masked)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::masks::causal_allow_mask;
    use candle_core::{DType, Device, Result as CandleResult};

    fn build_inputs(device: &Device) -> CandleResult<(Tensor, Tensor, Tensor)> {
        let data: Vec<f32> = (0..64).map(|i| (i as f32) * 0.01).collect();
        let q = Tensor::from_vec(data.clone(), (1, 2, 4, 8), device)?;
        let k = Tensor::from_vec(data.clone(), (1, 2, 4, 8), device)?;
        let v = Tensor::from_vec(data, (1, 2, 4, 8), device)?;
        Ok((q, k, v))
    }

    fn naive_attention(q: &Tensor, k: &Tensor, v: &Tensor, causal: bool) -> CandleResult<Tensor> {
        let (batch, heads, q_len, head_dim) = q.dims4()?;
        let (_, _, k_len, _) = k.dims4()?;
        let q_vec = q.flatten_all()?.to_vec1::<f32>()?;
        let k_vec = k.flatten_all()?.to_vec1::<f32>()?;
        let v_vec = v.flatten_all()?.to_vec1::<f32>()?;
        let scale = 1.0 / (head_dim as f32).sqrt();
        let offset = k_len as isize - q_len as isize;
        let mut output = vec![0f32; batch * heads * q_len * head_dim];

        for bh in 0..batch * heads {
            for qi in 0..q_len {
                let visible: Vec<usize> = (0..k_len)
                    .filter(|&kj| !causal || kj as isize <= qi as isize + offset)
                    .collect();
                let scores: Vec<f32> = visible
                    .iter()
                    .map(|&kj| {
                        (0..head_dim)
                            .map(|d| {
                                q_vec[(bh * q_len + qi) * head_dim + d]
                                    * k_vec[(bh * k_len + kj) * head_dim + d]
                            })
                            .sum::<f32>()
                            * scale
                    })
                    .collect();
                let max = scores.iter().copied().fold(f32::NEG_INFINITY, f32::max);
                let exps: Vec<f32> = scores.iter().map(|s| (s - max).exp()).collect();
                let denom: f32 = exps.iter().sum();
                for d in 0..head_dim {
                    let acc: f32 = visible
                        .iter()
                        .zip(exps.iter())
                        .map(|(&kj, e)| e / denom * v_vec[(bh * k_len + kj) * head_dim + d])
                        .sum();
                    output[(bh * q_len + qi) * head_dim + d] = acc;
                }
            }
        }

        Tensor::from_vec(output, (batch, heads, q_len, head_dim), q.device())
    }

    #[test]
    fn exact_attention_matches_naive() -> anyhow::Result<()> {
        let device = Device::Cpu;
        let (q, k, v) = build_inputs(&device)?;
        let mask = causal_allow_mask(&device, 4, 4)?;
        let output = ExactAttention::default().attend(&q, &k, &v, Some(&mask))?;
        let expected = naive_attention(&q, &k, &v, true)?;
        let max = output.sub(&expected)?.abs()?.max_all()?.to_vec0::<f32>()?;
        assert!(max < 1e-4);
        Ok(())
    }

    #[test]
    fn weights_equal_softmax_of_masked_row() -> anyhow::Result<()> {
        let device = Device::Cpu;
        let scores = Tensor::new(
            &[[[[0.5f32, -1.0, 2.0], [1.0, 0.25, -0.5], [0.0, 3.0, 1.0]]]],
            &device,
        )?;
        let allow = causal_allow_mask(&device, 3, 3)?;
        let weights = ExactAttention::default().weights(&scores, Some(&allow))?;
        let rows = weights.squeeze(0)?.squeeze(0)?.to_vec2::<f32>()?;

        let softmax = |xs: &[f32]| -> Vec<f32> {
            let max = xs.iter().copied().fold(f32::NEG_INFINITY, f32::max);
            let exps: Vec<f32> = xs.iter().map(|x| (x - max).exp()).collect();
            let sum: f32 = exps.iter().sum();
            exps.iter().map(|e| e / sum).collect()
        };
        let expected = [softmax(&[0.5]), softmax(&[1.0, 0.25]), softmax(&[0.0, 3.0, 1.0])];

        for (row, want) in rows.iter().zip(expected.iter()) {
            let total: f32 = row.iter().sum();
            assert!((total - 1.0).abs() < 1e-6);
            for (idx, w) in want.iter().enumerate() {
                assert!((row[idx] - w).abs() < 1e-6);
            }
            for masked in &row[want.len()..] {
                assert_eq!(*masked, 0.0);
            }
        }
        Ok(())
    }

    #[test]
    fn mismatched_shapes_error() -> CandleResult<()> {
        let device = Device::Cpu;
        let q = Tensor::zeros((1, 2, 4, 8), DType::F32, &device)?;
        let k = Tensor::zeros((1, 2, 5, 8), DType::F32, &device)?;
        let v = Tensor::zeros((1, 2, 4, 8), DType::F32, &device)?;
        let err = ExactAttention::default().attend(&q, &k, &v, None).unwrap_err();
        assert!(matches!(err, AttentionError::InvalidShape { .. }));
        Ok(())
    }

    #[test]
    fn mask_shape_validation() -> CandleResult<()> {
        let device = Device::Cpu;
        let q = Tensor::zeros((1, 2, 4, 8), DType::F32, &device)?;
        let mask = Tensor::ones((1, 3, 4, 4), DType::U8, &device)?;
        let err = ExactAttention::default()
            .attend(&q, &q, &q, Some(&mask))
            .unwrap_err();
        assert!(matches!(err, AttentionError::InvalidShape { .. }));

        let float_mask = Tensor::ones((4, 4), DType::F32, &device)?;
        let err = ExactAttention::default()
            .attend(&q, &q, &q, Some(&float_mask))
            .unwrap_err();
        assert!(matches!(err, AttentionError::UnsupportedDType { .. }));
        Ok(())
    }

    #[test]
    fn dtype_matrix() -> anyhow::Result<()> {
        let device = Device::Cpu;
        let (q, k, v) = build_inputs(&device)?;
        let mask = causal_allow_mask(&device, 4, 4)?;
        let reference = ExactAttention::default().attend(&q, &k, &v, Some(&mask))?;
        for dtype in [DType::F32, DType::BF16, DType::F16] {
            let out = ExactAttention::default()
                .attend(
                    &q.to_dtype(dtype)?,
                    &k.to_dtype(dtype)?,
                    &v.to_dtype(dtype)?,
                    Some(&mask),
                )?
                .to_dtype(DType::F32)?;
            let max = out.sub(&reference)?.abs()?.max_all()?.to_vec0::<f32>()?;
            assert!(max < 5e-2, "dtype {:?} diverged by {max}", dtype);
        }
        Ok(())
    }

    #[test]
    fn numerical_stability() -> anyhow::Result<()> {
        let device = Device::Cpu;
        let q = Tensor::full(10_000.0f32, (1, 1, 4, 4), &device)?;
        let k = Tensor::full(-10_000.0f32, (1, 1, 4, 4), &device)?;
        let v = Tensor::ones((1, 1, 4, 4), DType::F32, &device)?;
        let mask = causal_allow_mask(&device, 4, 4)?;
        let out = ExactAttention::default()
            .attend(&q, &k, &v, Some(&mask))?
            .flatten_all()?
            .to_vec1::<f32>()?;
        assert!(out.iter().all(|value| value.is_finite()));
        Ok(())
    }
}
