//! Attention kernel that normalises scores with the coordinate-descent solver.

use std::fmt;
use std::sync::OnceLock;

use candle_core::{Tensor, D};

use super::solver::{coor_descent, relu_clamp, ClampFn};
use crate::core::{Attention, AttentionError, CoorDescentConfig, ScorePrecision};

/// Sparse attention: every query gets the same constant sparsity target `k`.
pub struct CoorDescentAttention {
    config: CoorDescentConfig,
    clamp: ClampFn,
    precision: ScorePrecision,
    first_call: OnceLock<()>,
}

impl CoorDescentAttention {
    /// Kernel using the rectifier as penalty clamp.
    pub fn new(config: CoorDescentConfig, precision: ScorePrecision) -> Self {
        Self::with_clamp(config, precision, relu_clamp)
    }

    /// Kernel with a custom non-negativity clamp.
    pub fn with_clamp(
        config: CoorDescentConfig,
        precision: ScorePrecision,
        clamp: ClampFn,
    ) -> Self {
        Self {
            config,
            clamp,
            precision,
            first_call: OnceLock::new(),
        }
    }

    pub fn config(&self) -> &CoorDescentConfig {
        &self.config
    }
}

impl fmt::Debug for CoorDescentAttention {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CoorDescentAttention")
            .field("config", &self.config)
            .field("precision", &self.precision)
            .finish()
    }
}

impl Attention for CoorDescentAttention {
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
                "attention::coor_descent init n_iters={} sparsity_k={} eps={} precision={:?}",
                self.config.n_iters,
                self.config.sparsity_k,
                self.config.eps,
                self.precision
            );
        }

        let q_len = scores.dim(D::Minus2)?;
        let sparsity_k = Tensor::full(self.config.sparsity_k, (q_len, 1), scores.device())?
            .to_dtype(scores.dtype())?;

        Ok(coor_descent(
            scores,
            self.config.n_iters,
            &sparsity_k,
            self.config.eps,
            self.clamp,
            allow_mask,
        )?)
    }
}
