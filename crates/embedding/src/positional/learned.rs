//! Learned absolute position table indexed by `0..seq_len`.

use candle_core::{bail, DType, Device, Result, Tensor, Var};

#[derive(Debug, Clone)]
pub struct PositionEmbeddingConfig {
    /// Longest sequence the table can index.
    pub max_seq_len: usize,
    pub hidden_dim: usize,
    pub dtype: DType,
    pub device: Device,
}

/// `[max_seq_len, hidden_dim]` table added to token embeddings.
#[derive(Debug, Clone)]
pub struct PositionEmbedding {
    config: PositionEmbeddingConfig,
    weight: Var,
}

impl PositionEmbedding {
    /// Builds the table with entries drawn from `N(0, 1)`.
    pub fn new(config: PositionEmbeddingConfig) -> Result<Self> {
        if config.max_seq_len == 0 || config.hidden_dim == 0 {
            bail!(
                "position embedding requires max_seq_len > 0 and hidden_dim > 0 (got {} x {})",
                config.max_seq_len,
                config.hidden_dim
            );
        }
        let shape = (config.max_seq_len, config.hidden_dim);
        let initial = Tensor::randn(0f32, 1f32, shape, &config.device)?.to_dtype(config.dtype)?;
        Ok(Self {
            weight: Var::from_tensor(&initial)?,
            config,
        })
    }

    pub fn config(&self) -> &PositionEmbeddingConfig {
        &self.config
    }

    pub fn weight(&self) -> &Tensor {
        self.weight.as_tensor()
    }

    /// Rows `0..seq_len`, shaped `[seq_len, hidden_dim]`.
    pub fn forward(&self, seq_len: usize) -> Result<Tensor> {
        if seq_len == 0 || seq_len > self.config.max_seq_len {
            bail!(
                "position embedding covers 1..={} positions, requested {seq_len}",
                self.config.max_seq_len
            );
        }
        self.weight.as_tensor().narrow(0, 0, seq_len)
    }

    /// Adds the positional rows to `hidden` shaped `[batch, seq, hidden_dim]`.
    pub fn add_to(&self, hidden: &Tensor) -> Result<Tensor> {
        let (_, seq, width) = hidden.dims3()?;
        if width != self.config.hidden_dim {
            bail!(
                "position embedding width {} does not match hidden width {width}",
                self.config.hidden_dim
            );
        }
        let positions = self.forward(seq)?.to_dtype(hidden.dtype())?;
        hidden.broadcast_add(&positions.unsqueeze(0)?)
    }

    pub fn named_parameters(&self, scope: &str) -> Vec<(String, Var)> {
        let prefix = if scope.is_empty() { "position_embedding" } else { scope };
        vec![(format!("{prefix}.weight"), self.weight.clone())]
    }
}
