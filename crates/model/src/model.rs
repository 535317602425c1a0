use candle_core::{Tensor, Var};
use embedding::{PositionEmbedding, PositionEmbeddingConfig, TokenEmbedding, TokenEmbeddingConfig};
use layers::{LayerNorm, Linear, LinearConfig, LinearInit, PrecisionPolicy};

use crate::block::DecoderBlock;
use crate::config::ModelConfig;
use crate::errors::ModelError;

/// Decoder-only transformer: embeddings, residual layers and a logits head.
#[derive(Debug)]
pub struct Model {
    config: ModelConfig,
    token_embedding: TokenEmbedding,
    position_embedding: PositionEmbedding,
    blocks: Vec<DecoderBlock>,
    final_norm: LayerNorm,
    to_logits: Linear,
    policy: PrecisionPolicy,
}

impl Model {
    /// Builds the model with freshly initialised parameters.
    pub fn new(config: ModelConfig) -> Result<Self, ModelError> {
        config.validate()?;
        let policy = PrecisionPolicy::from_parameter_dtype(config.dtype);

        let token_embedding = TokenEmbedding::new(TokenEmbeddingConfig {
            vocab_size: config.vocab_size,
            hidden_dim: config.hidden_dim,
            dtype: config.dtype,
            device: config.device.clone(),
        })?;
        let position_embedding = PositionEmbedding::new(PositionEmbeddingConfig {
            max_seq_len: config.max_seq_len,
            hidden_dim: config.hidden_dim,
            dtype: config.dtype,
            device: config.device.clone(),
        })?;

        let blocks = (0..config.n_layers)
            .map(|_| DecoderBlock::new(&config))
            .collect::<Result<Vec<_>, _>>()?;

        let final_norm = LayerNorm::identity(config.hidden_dim, config.dtype, &config.device)?;
        let to_logits = Linear::with_init(
            LinearConfig::new(config.hidden_dim, config.vocab_size),
            &LinearInit::fan_in_uniform(),
            &config.device,
            config.dtype,
        )?;

        log::info!(
            "model init layers={} hidden={} heads={}x{} normalizer={} null_kv={} dtype={:?}",
            config.n_layers,
            config.hidden_dim,
            config.heads,
            config.head_dim,
            config.attention.normalizer.label(),
            config.null_kv,
            config.dtype
        );

        Ok(Self {
            config,
            token_embedding,
            position_embedding,
            blocks,
            final_norm,
            to_logits,
            policy,
        })
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    pub fn blocks(&self) -> &[DecoderBlock] {
        &self.blocks
    }

    /// Maps token ids `[batch, seq]` to logits `[batch, seq, vocab_size]`.
    pub fn forward(&self, token_ids: &Tensor) -> Result<Tensor, ModelError> {
        let hidden = self.forward_hidden(token_ids)?;
        self.logits(&hidden)
    }

    /// Logits plus the attention weights of every layer, in layer order.
    pub fn forward_with_weights(
        &self,
        token_ids: &Tensor,
    ) -> Result<(Tensor, Vec<Tensor>), ModelError> {
        let mut hidden = self.embed(token_ids)?;
        let mut weights = Vec::with_capacity(self.blocks.len());
        for block in &self.blocks {
            let (next, layer_weights) = block.forward_with_weights(&hidden)?;
            hidden = next;
            weights.push(layer_weights);
        }
        Ok((self.logits(&hidden)?, weights))
    }

    /// Residual stream after the last layer, before the final norm.
    pub fn forward_hidden(&self, token_ids: &Tensor) -> Result<Tensor, ModelError> {
        let mut hidden = self.embed(token_ids)?;
        for block in &self.blocks {
            hidden = block.forward(&hidden)?;
        }
        Ok(hidden)
    }

    pub fn named_parameters(&self) -> Vec<(String, Var)> {
        let mut params = self.token_embedding.named_parameters("token_emb");
        params.extend(self.position_embedding.named_parameters("pos_emb"));
        for (index, block) in self.blocks.iter().enumerate() {
            params.extend(block.named_parameters(&format!("layers.{index}")));
        }
        params.extend(self.final_norm.named_parameters("to_logits.norm"));
        params.extend(self.to_logits.named_parameters("to_logits.proj"));
        params
    }

    /// Total number of scalar parameters.
    pub fn num_parameters(&self) -> usize {
        self.named_parameters()
            .iter()
            .map(|(_, var)| var.as_tensor().elem_count())
            .sum()
    }

    fn embed(&self, token_ids: &Tensor) -> Result<Tensor, ModelError> {
        let seq = match token_ids.dims() {
            [_, seq] => *seq,
            dims => {
                return Err(ModelError::Tensor(candle_core::Error::Msg(format!(
                    "token ids must be shaped [batch, seq], got {dims:?}"
                ))))
            }
        };
        if seq > self.config.max_seq_len {
            return Err(ModelError::SequenceTooLong {
                len: seq,
                max: self.config.max_seq_len,
            });
        }
        log::debug!("model forward: token ids {:?}", token_ids.dims());

        let hidden = self.token_embedding.forward(token_ids)?;
        Ok(self.position_embedding.add_to(&hidden)?)
    }

    fn logits(&self, hidden: &Tensor) -> Result<Tensor, ModelError> {
        let normed = self.final_norm.forward(hidden, &self.policy)?;
        Ok(self.to_logits.forward(&normed, &self.policy)?)
    }
}
