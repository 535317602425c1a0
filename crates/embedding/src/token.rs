//! Token embedding table.

use candle_core::{bail, DType, Device, Error, Result, Tensor, Var};

/// Configuration for building a token embedding table.
#[derive(Debug, Clone)]
pub struct TokenEmbeddingConfig {
    /// Number of distinct tokens.
    pub vocab_size: usize,
    /// Width of each embedding vector.
    pub hidden_dim: usize,
    /// Storage dtype of the table and of the looked-up vectors.
    pub dtype: DType,
    pub device: Device,
}

/// Learnable `[vocab_size, hidden_dim]` lookup table.
#[derive(Debug, Clone)]
pub struct TokenEmbedding {
    config: TokenEmbeddingConfig,
    weight: Var,
}

impl TokenEmbedding {
    /// Builds the table with entries drawn from `N(0, 1)`.
    pub fn new(config: TokenEmbeddingConfig) -> Result<Self> {
        if config.vocab_size == 0 {
            bail!("token embedding requires vocab_size > 0");
        }
        if config.hidden_dim == 0 {
            bail!("token embedding requires hidden_dim > 0");
        }

        let shape = (config.vocab_size, config.hidden_dim);
        let initial = Tensor::randn(0f32, 1f32, shape, &config.device)?.to_dtype(config.dtype)?;
        let weight = Var::from_tensor(&initial)?;
        Ok(Self { config, weight })
    }

    /// Wraps an existing `[vocab_size, hidden_dim]` table.
    pub fn from_weight(weight: Tensor) -> Result<Self> {
        let (vocab_size, hidden_dim) = weight.dims2()?;
        if vocab_size == 0 || hidden_dim == 0 {
            bail!("token embedding weight must be non-empty, got {:?}", weight.dims());
        }
        let config = TokenEmbeddingConfig {
            vocab_size,
            hidden_dim,
            dtype: weight.dtype(),
            device: weight.device().clone(),
        };
        Ok(Self {
            config,
            weight: Var::from_tensor(&weight)?,
        })
    }

    pub fn config(&self) -> &TokenEmbeddingConfig {
        &self.config
    }

    pub fn weight(&self) -> &Tensor {
        self.weight.as_tensor()
    }

    /// Looks up embeddings for `token_ids` shaped `[batch, seq]` with an integer dtype.
    ///
    /// Returns `[batch, seq, hidden_dim]` in the storage dtype.
    pub fn forward(&self, token_ids: &Tensor) -> Result<Tensor> {
        let (batch, seq) = validate_token_ids(token_ids)?;

        let flat = token_ids.to_dtype(DType::I64)?.flatten_all()?;
        self.ensure_id_range(&flat)?;

        self.weight
            .as_tensor()
            .index_select(&flat, 0)?
            .reshape((batch, seq, self.config.hidden_dim))
    }

    pub fn named_parameters(&self, scope: &str) -> Vec<(String, Var)> {
        let prefix = if scope.is_empty() { "token_embedding" } else { scope };
        vec![(format!("{prefix}.weight"), self.weight.clone())]
    }

    fn ensure_id_range(&self, flat_ids: &Tensor) -> Result<()> {
        let min_id = flat_ids.min_all()?.to_scalar::<i64>()?;
        if min_id < 0 {
            bail!("encountered negative token id {min_id}");
        }
        let max_id = flat_ids.max_all()?.to_scalar::<i64>()?;
        let vocab = self.config.vocab_size as i64;
        if max_id >= vocab {
            bail!("token id {max_id} exceeds vocab size {vocab}");
        }
        Ok(())
    }
}

fn validate_token_ids(token_ids: &Tensor) -> Result<(usize, usize)> {
    let (batch, seq) = match token_ids.dims() {
        [batch, seq] => (*batch, *seq),
        _ => return Err(Error::Msg("token_ids must be shaped [batch, seq]".into())),
    };
    if batch == 0 || seq == 0 {
        return Err(Error::Msg(
            "token_ids must have non-zero batch and seq dimensions".into(),
        ));
    }
    if !token_ids.dtype().is_int() {
        bail!(
            "token_ids expected integer dtype but received {:?}",
            token_ids.dtype()
        );
    }
    Ok((batch, seq))
}
