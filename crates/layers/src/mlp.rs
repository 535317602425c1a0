//! Position-wise feed-forward block with its own pre-norm.
//!
//! The block computes `W2 · gelu(W1 · LayerNorm(x) + b1) + b2` on hidden states
//! shaped `(batch, seq, hidden)` and returns the same layout. The residual
//! addition is left to the caller.

use candle_core::{DType, Device, Error, Result, Tensor, Var};

use crate::{
    activations::gelu,
    dtypes::PrecisionPolicy,
    linear::{Linear, LinearConfig, LinearInit},
    norm::LayerNorm,
};

/// Configuration shared by transformer feed-forward networks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedForwardConfig {
    /// Model hidden size.
    pub hidden_size: usize,
    /// Width of the activation space.
    pub intermediate_size: usize,
}

impl FeedForwardConfig {
    /// Creates a configuration with an explicit intermediate width.
    pub fn new(hidden_size: usize, intermediate_size: usize) -> Self {
        Self {
            hidden_size,
            intermediate_size,
        }
    }

    /// Intermediate width is `floor(hidden_size * ratio)`.
    pub fn with_expansion_ratio(hidden_size: usize, ratio: f32) -> Self {
        let intermediate_size = (hidden_size as f32 * ratio) as usize;
        Self::new(hidden_size, intermediate_size)
    }
}

/// Pre-norm two-layer MLP.
#[derive(Debug, Clone)]
pub struct FeedForward {
    config: FeedForwardConfig,
    norm: LayerNorm,
    up: Linear,
    down: Linear,
}

impl FeedForward {
    /// Assembles the block from already constructed sub-layers.
    pub fn new(
        config: FeedForwardConfig,
        norm: LayerNorm,
        up: Linear,
        down: Linear,
    ) -> Result<Self> {
        if config.intermediate_size == 0 {
            return Err(Error::Msg(
                "feed-forward intermediate size must be non-zero".into(),
            ));
        }
        let expected_up = (config.hidden_size, config.intermediate_size);
        let expected_down = (config.intermediate_size, config.hidden_size);
        let actual_up = (up.config().input_dim, up.config().total_output_dim());
        let actual_down = (down.config().input_dim, down.config().total_output_dim());
        if actual_up != expected_up || actual_down != expected_down {
            return Err(Error::Msg(format!(
                "feed-forward projections {actual_up:?}/{actual_down:?} do not match \
                 {expected_up:?}/{expected_down:?}"
            )));
        }
        if norm.config().hidden_size != config.hidden_size {
            return Err(Error::Msg(format!(
                "feed-forward norm width {} does not match hidden size {}",
                norm.config().hidden_size,
                config.hidden_size
            )));
        }
        Ok(Self {
            config,
            norm,
            up,
            down,
        })
    }

    /// Builds the block with freshly initialised parameters.
    pub fn with_init(
        config: FeedForwardConfig,
        init: &LinearInit,
        device: &Device,
        dtype: DType,
    ) -> Result<Self> {
        let norm = LayerNorm::identity(config.hidden_size, dtype, device)?;
        let up = Linear::with_init(
            LinearConfig::new(config.hidden_size, config.intermediate_size),
            init,
            device,
            dtype,
        )?;
        let down = Linear::with_init(
            LinearConfig::new(config.intermediate_size, config.hidden_size),
            init,
            device,
            dtype,
        )?;
        Self::new(config, norm, up, down)
    }

    /// Configuration metadata used during block assembly.
    pub fn config(&self) -> &FeedForwardConfig {
        &self.config
    }

    /// Returns the trainable parameters under `scope`.
    pub fn named_parameters(&self, scope: &str) -> Vec<(String, Var)> {
        let mut params = self.norm.named_parameters(&format!("{scope}.norm"));
        params.extend(self.up.named_parameters(&format!("{scope}.up")));
        params.extend(self.down.named_parameters(&format!("{scope}.down")));
        params
    }

    /// Performs the forward pass through the MLP.
    pub fn forward(&self, hidden: &Tensor, policy: &PrecisionPolicy) -> Result<Tensor> {
        let normed = self.norm.forward(hidden, policy)?;
        let expanded = self.up.forward(&normed, policy)?;
        let activated = gelu(&expanded, policy)?;
        self.down.forward(&activated, policy)
    }
}
