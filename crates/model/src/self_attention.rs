//! Causal self-attention block.
//!
//! `x → LayerNorm → fused q/k/v projection → split heads → (null kv prepend)
//! → kernel → merge heads → output projection`. The kernel, softmax or
//! coordinate descent, is chosen once when the block is built.

use attention::{build_attention, Attention, Config as AttentionConfig, NullKvBank};
use candle_core::{DType, Device, Tensor};
use layers::{checks, LayerNorm, Linear, LinearConfig, LinearInit, PrecisionPolicy};

use crate::errors::ModelError;

/// Shape and normalizer settings for one attention block.
#[derive(Debug, Clone)]
pub struct AttentionBlockConfig {
    pub hidden_dim: usize,
    pub heads: usize,
    pub head_dim: usize,
    /// Learned null key/value slots per head; zero disables the bank.
    pub null_kv: usize,
    pub attention: AttentionConfig,
}

impl AttentionBlockConfig {
    pub fn inner_dim(&self) -> usize {
        self.heads * self.head_dim
    }
}

#[derive(Debug)]
pub struct CausalSelfAttention {
    config: AttentionBlockConfig,
    policy: PrecisionPolicy,
    norm: LayerNorm,
    to_qkv: Linear,
    to_out: Linear,
    null_kv: NullKvBank,
    kernel: Box<dyn Attention>,
}

impl CausalSelfAttention {
    pub fn new(
        config: AttentionBlockConfig,
        dtype: DType,
        device: &Device,
    ) -> Result<Self, ModelError> {
        if config.hidden_dim == 0 || config.heads == 0 || config.head_dim == 0 {
            return Err(ModelError::InvalidConfig(format!(
                "attention block needs non-zero sizes (hidden_dim={}, heads={}, head_dim={})",
                config.hidden_dim, config.heads, config.head_dim
            )));
        }
        let inner = config.inner_dim();
        let init = LinearInit::fan_in_uniform();

        let mut qkv_config = LinearConfig::without_bias(config.hidden_dim, inner);
        qkv_config.fused_projections = 3;
        let to_qkv = Linear::with_init(qkv_config, &init, device, dtype)?;
        let to_out = Linear::with_init(
            LinearConfig::without_bias(inner, config.hidden_dim),
            &init,
            device,
            dtype,
        )?;

        let norm = LayerNorm::identity(config.hidden_dim, dtype, device)?;
        let null_kv =
            NullKvBank::new(config.heads, config.null_kv, config.head_dim, dtype, device)?;
        let kernel = build_attention(&config.attention)?;

        Ok(Self {
            policy: PrecisionPolicy::from_parameter_dtype(dtype),
            config,
            norm,
            to_qkv,
            to_out,
            null_kv,
            kernel,
        })
    }

    pub fn config(&self) -> &AttentionBlockConfig {
        &self.config
    }

    pub fn null_kv(&self) -> &NullKvBank {
        &self.null_kv
    }

    /// Maps `[batch, seq, hidden]` to `[batch, seq, hidden]`.
    pub fn forward(&self, hidden: &Tensor) -> Result<Tensor, ModelError> {
        self.forward_with_weights(hidden).map(|(out, _)| out)
    }

    /// Like [`forward`](Self::forward), also returning the attention weights
    /// `[batch, heads, seq, null_kv + seq]` with the null slots first.
    pub fn forward_with_weights(&self, hidden: &Tensor) -> Result<(Tensor, Tensor), ModelError> {
        checks::expect_batch_seq_hidden("attention.input", hidden, self.config.hidden_dim)?;
        let (batch, seq, _) = hidden.dims3()?;
        let inner = self.config.inner_dim();

        let normed = self.norm.forward(hidden, &self.policy)?;
        let qkv = self.to_qkv.forward(&normed, &self.policy)?;
        let q = self.split_heads(&qkv.narrow(2, 0, inner)?)?;
        let k = self.split_heads(&qkv.narrow(2, inner, inner)?)?;
        let v = self.split_heads(&qkv.narrow(2, 2 * inner, inner)?)?;

        let (k, v) = self.null_kv.prepend(&k, &v)?;
        let allow = self.null_kv.causal_offset(hidden.device(), seq)?;

        log::debug!(
            "attention block: batch={batch} seq={seq} heads={} null_kv={}",
            self.config.heads,
            self.null_kv.null_count()
        );

        let (out, weights) = self.kernel.attend_with_weights(&q, &k, &v, Some(&allow))?;
        let merged = out
            .permute((0, 2, 1, 3))?
            .contiguous()?
            .reshape((batch, seq, inner))?;
        let projected = self.to_out.forward(&merged, &self.policy)?;
        Ok((projected, weights))
    }

    fn split_heads(&self, tensor: &Tensor) -> candle_core::Result<Tensor> {
        let (batch, seq, _) = tensor.dims3()?;
        tensor
            .reshape((batch, seq, self.config.heads, self.config.head_dim))?
            .permute((0, 2, 1, 3))?
            .contiguous()
    }

    pub fn named_parameters(&self, scope: &str) -> Vec<(String, candle_core::Var)> {
        let mut params = self.norm.named_parameters(&format!("{scope}.norm"));
        params.extend(self.to_qkv.named_parameters(&format!("{scope}.to_qkv")));
        params.extend(self.to_out.named_parameters(&format!("{scope}.to_out")));
        params.extend(self.null_kv.named_parameters(scope));
        params
    }
}
