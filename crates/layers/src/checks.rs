//! Lightweight validation helpers shared across layer components.
//!
//! Every helper takes a `label` naming the tensor under inspection so error
//! messages point at the offending parameter or activation. They return
//! `candle_core::Result<()>` so call sites can propagate errors without
//! panicking.

use candle_core::{DType, Error, Result, Tensor};

/// Ensures a tensor matches the expected dimensions exactly.
pub fn expect_shape(label: &str, tensor: &Tensor, expected: &[usize]) -> Result<()> {
    let actual = tensor.dims();
    if actual == expected {
        Ok(())
    } else {
        Err(Error::Msg(format!(
            "{label}: expected shape {:?}, got {:?}",
            expected, actual
        )))
    }
}

/// Ensures a tensor has the requested rank.
pub fn expect_rank(label: &str, tensor: &Tensor, rank: usize) -> Result<()> {
    if tensor.rank() == rank {
        Ok(())
    } else {
        Err(Error::Msg(format!(
            "{label}: expected rank {rank}, got {:?}",
            tensor.dims()
        )))
    }
}

/// Validates the `(batch, seq, hidden)` convention with a known hidden size.
pub fn expect_batch_seq_hidden(label: &str, tensor: &Tensor, hidden: usize) -> Result<()> {
    match tensor.dims() {
        [_, _, actual_hidden] if *actual_hidden == hidden => Ok(()),
        dims => Err(Error::Msg(format!(
            "{label}: expected (batch, seq, {hidden}) layout, got {:?}",
            dims
        ))),
    }
}

/// Checks the tensor dtype is one of the allowed values.
pub fn expect_dtype_in(label: &str, tensor: &Tensor, allowed: &[DType]) -> Result<()> {
    let dtype = tensor.dtype();
    if allowed.contains(&dtype) {
        Ok(())
    } else {
        Err(Error::Msg(format!(
            "{label}: expected dtype in {:?}, got {:?}",
            allowed, dtype
        )))
    }
}

/// Floating point dtypes accepted for parameters and activations.
pub const FLOAT_DTYPES: [DType; 4] = [DType::F16, DType::BF16, DType::F32, DType::F64];

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;

    #[test]
    fn shape_errors_carry_label() -> Result<()> {
        let tensor = Tensor::zeros((2, 3), DType::F32, &Device::Cpu)?;
        expect_shape("probe", &tensor, &[2, 3])?;
        let err = expect_shape("probe", &tensor, &[3, 2]).unwrap_err();
        assert!(err.to_string().contains("probe"));
        assert!(expect_rank("probe", &tensor, 3).is_err());
        Ok(())
    }

    #[test]
    fn batch_seq_hidden_requires_rank_three() -> Result<()> {
        let tensor = Tensor::zeros((1, 4, 8), DType::F32, &Device::Cpu)?;
        expect_batch_seq_hidden("hidden", &tensor, 8)?;
        assert!(expect_batch_seq_hidden("hidden", &tensor, 4).is_err());
        let flat = tensor.flatten_all()?;
        assert!(expect_batch_seq_hidden("hidden", &flat, 8).is_err());
        Ok(())
    }

    #[test]
    fn integer_tensors_are_not_float() -> Result<()> {
        let ids = Tensor::zeros(4, DType::U32, &Device::Cpu)?;
        assert!(expect_dtype_in("ids", &ids, &FLOAT_DTYPES).is_err());
        Ok(())
    }
}
