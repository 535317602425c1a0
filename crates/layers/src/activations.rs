//! Activation used between the feed-forward projections.
//!
//! GELU uses the exact erf form `0.5 * x * (1 + erf(x / sqrt(2)))`. Inputs are
//! promoted to [`PrecisionPolicy::compute`] before evaluation and the result
//! is cast back to the storage dtype.

use candle_core::{Result, Tensor};

use crate::dtypes::PrecisionPolicy;

/// Erf-based GELU under the precision rules in `policy`.
pub fn gelu(input: &Tensor, policy: &PrecisionPolicy) -> Result<Tensor> {
    let compute = policy.cast_for_matmul(input)?;
    policy.cast_to_storage(&compute.gelu_erf()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};
    use std::f64::consts::SQRT_2;

    #[test]
    fn gelu_matches_reference_formula() -> Result<()> {
        let device = Device::Cpu;
        let input = Tensor::from_slice(&[-2.5f32, -0.5, 0.0, 1.0, 3.0], (5,), &device)?;
        let policy = PrecisionPolicy::from_parameter_dtype(DType::F32);
        let output = gelu(&input, &policy)?;

        let reference = {
            let scaled = input.affine(1.0 / SQRT_2, 0.0)?;
            let inner = scaled.erf()?.affine(1.0, 1.0)?;
            input.affine(0.5, 0.0)?.mul(&inner)?
        };

        let diff = output.sub(&reference)?.abs()?.max_all()?.to_vec0::<f32>()?;
        assert!(diff < 5e-6);
        Ok(())
    }

    #[test]
    fn half_precision_input_keeps_its_dtype() -> Result<()> {
        let device = Device::Cpu;
        let input = Tensor::new(&[-1.0f32, 0.0, 2.0], &device)?.to_dtype(DType::BF16)?;
        let policy = PrecisionPolicy::from_parameter_dtype(DType::BF16);
        let output = gelu(&input, &policy)?;
        assert_eq!(output.dtype(), DType::BF16);
        let values = output.to_dtype(DType::F32)?.to_vec1::<f32>()?;
        assert_eq!(values[1], 0.0);
        assert!((values[2] - 1.9545).abs() < 1e-2);
        Ok(())
    }
}
