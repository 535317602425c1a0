use candle_core::{DType, Tensor, Var};
use layers::{FeedForward, FeedForwardConfig, LinearInit, PrecisionPolicy, Residual};

use crate::config::ModelConfig;
use crate::errors::ModelError;
use crate::self_attention::{AttentionBlockConfig, CausalSelfAttention};

/// One residual layer: `x' = x + attn(x)`, then `x' + ff(x')`.
///
/// Both branches normalise their own input, so the residual stream itself is
/// never normalised inside the block.
#[derive(Debug)]
pub struct DecoderBlock {
    attention: CausalSelfAttention,
    feed_forward: FeedForward,
    residual: Residual,
    policy: PrecisionPolicy,
}

impl DecoderBlock {
    pub fn new(config: &ModelConfig) -> Result<Self, ModelError> {
        let attention = CausalSelfAttention::new(
            AttentionBlockConfig {
                hidden_dim: config.hidden_dim,
                heads: config.heads,
                head_dim: config.head_dim,
                null_kv: config.null_kv,
                attention: config.attention,
            },
            config.dtype,
            &config.device,
        )?;
        let ff_config = FeedForwardConfig::new(config.hidden_dim, config.ff_hidden_dim());
        let feed_forward = FeedForward::with_init(
            ff_config,
            &LinearInit::fan_in_uniform(),
            &config.device,
            config.dtype,
        )?;
        Ok(Self::from_parts(attention, feed_forward, config.dtype))
    }

    /// Assembles a block from already-built branches.
    pub fn from_parts(
        attention: CausalSelfAttention,
        feed_forward: FeedForward,
        dtype: DType,
    ) -> Self {
        Self {
            attention,
            feed_forward,
            residual: Residual::new(),
            policy: PrecisionPolicy::from_parameter_dtype(dtype),
        }
    }

    pub fn attention(&self) -> &CausalSelfAttention {
        &self.attention
    }

    pub fn forward(&self, hidden: &Tensor) -> Result<Tensor, ModelError> {
        self.forward_with_weights(hidden).map(|(out, _)| out)
    }

    /// Forward pass that also returns this layer's attention weights.
    pub fn forward_with_weights(&self, hidden: &Tensor) -> Result<(Tensor, Tensor), ModelError> {
        let (attn_out, weights) = self.attention.forward_with_weights(hidden)?;
        let hidden = self.residual.forward(&attn_out, hidden, &self.policy)?;
        let ff_out = self.feed_forward.forward(&hidden, &self.policy)?;
        let hidden = self.residual.forward(&ff_out, &hidden, &self.policy)?;
        Ok((hidden, weights))
    }

    pub fn named_parameters(&self, scope: &str) -> Vec<(String, Var)> {
        let mut params = self.attention.named_parameters(&format!("{scope}.attn"));
        params.extend(self.feed_forward.named_parameters(&format!("{scope}.ff")));
        params
    }
}
