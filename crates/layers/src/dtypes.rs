//! Mixed-precision rules shared by every layer.
//!
//! Parameters keep their storage dtype; `f16`/`bf16` stacks widen to `f32`
//! for matmuls and to at least `f32` for normalisation statistics.

use candle_core::{DType, Result, Tensor};

/// Storage, compute and reduction dtypes of one parameter dtype.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrecisionPolicy {
    storage: DType,
    compute: DType,
    reduction: DType,
}

impl PrecisionPolicy {
    /// Derives the policy for parameters stored as `storage`.
    pub fn from_parameter_dtype(storage: DType) -> Self {
        let (compute, reduction) = match storage {
            DType::F16 | DType::BF16 => (DType::F32, DType::F32),
            DType::F64 => (DType::F64, DType::F64),
            other => (other, DType::F32),
        };
        Self {
            storage,
            compute,
            reduction,
        }
    }

    pub fn storage(&self) -> DType {
        self.storage
    }

    /// Dtype for matmuls and activations.
    pub fn compute(&self) -> DType {
        self.compute
    }

    /// Dtype for mean/variance statistics.
    pub fn reduction(&self) -> DType {
        self.reduction
    }

    pub fn cast_for_matmul(&self, tensor: &Tensor) -> Result<Tensor> {
        cast(tensor, self.compute)
    }

    pub fn cast_for_reduction(&self, tensor: &Tensor) -> Result<Tensor> {
        cast(tensor, self.reduction)
    }

    pub fn cast_to_storage(&self, tensor: &Tensor) -> Result<Tensor> {
        cast(tensor, self.storage)
    }
}

fn cast(tensor: &Tensor, dtype: DType) -> Result<Tensor> {
    if tensor.dtype() == dtype {
        Ok(tensor.clone())
    } else {
        tensor.to_dtype(dtype)
    }
}
