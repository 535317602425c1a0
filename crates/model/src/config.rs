//! Model configuration.
//!
//! [`ModelHyperparameters`] is the serialisable form read from `.json` or
//! `.toml` files; [`ModelConfig`] is the runtime form carrying the dtype,
//! device and resolved attention [`Config`](AttentionConfig). Resolution
//! layers the `ATTN_*` environment overrides over the file values.

use std::path::Path;

use attention::{Config as AttentionConfig, CoorDescentConfig, Normalizer};
use candle_core::{DType, Device};
use serde::{Deserialize, Serialize};

use crate::errors::ModelError;

/// Runtime configuration for [`Model`](crate::Model).
#[derive(Debug, Clone)]
pub struct ModelConfig {
    pub vocab_size: usize,
    pub hidden_dim: usize,
    /// Longest token sequence accepted by `forward`.
    pub max_seq_len: usize,
    pub n_layers: usize,
    pub heads: usize,
    pub head_dim: usize,
    /// Feed-forward expansion ratio.
    pub ff_mult: f32,
    /// Learned null key/value slots per head.
    pub null_kv: usize,
    pub attention: AttentionConfig,
    pub dtype: DType,
    pub device: Device,
}

impl ModelConfig {
    /// Inner attention width, `heads * head_dim`.
    pub fn inner_dim(&self) -> usize {
        self.heads * self.head_dim
    }

    pub fn ff_hidden_dim(&self) -> usize {
        (self.hidden_dim as f32 * self.ff_mult).floor() as usize
    }

    /// Checks every structural constraint and reports all violations at once.
    pub fn validate(&self) -> Result<(), ModelError> {
        let mut problems = Vec::new();
        for (name, value) in [
            ("vocab_size", self.vocab_size),
            ("hidden_dim", self.hidden_dim),
            ("max_seq_len", self.max_seq_len),
            ("n_layers", self.n_layers),
            ("heads", self.heads),
            ("head_dim", self.head_dim),
        ] {
            if value == 0 {
                problems.push(format!("{name} must be greater than zero"));
            }
        }
        if !(self.ff_mult.is_finite() && self.ff_mult > 0.0) {
            problems.push(format!("ff_mult must be positive, got {}", self.ff_mult));
        } else if self.hidden_dim > 0 && self.ff_hidden_dim() == 0 {
            problems.push(format!(
                "ff_mult {} leaves no feed-forward width for hidden_dim {}",
                self.ff_mult, self.hidden_dim
            ));
        }
        if let Normalizer::CoorDescent(cfg) = &self.attention.normalizer {
            if let Err(err) = cfg.validate() {
                problems.push(err.to_string());
            }
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(ModelError::InvalidConfig(problems.join("; ")))
        }
    }
}

/// Serialisable hyperparameters, named after the recognised construction options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelHyperparameters {
    pub num_tokens: usize,
    pub dim: usize,
    pub seq_len: usize,
    pub depth: usize,
    pub dim_head: usize,
    pub heads: usize,
    pub ff_mult: f32,
    pub use_coor_descent: bool,
    pub coor_descent_iters: usize,
    pub coor_descent_sparsity_k: f64,
    pub coor_descent_eps: f64,
    pub attn_null_kv: usize,
}

impl Default for ModelHyperparameters {
    fn default() -> Self {
        Self {
            num_tokens: 256,
            dim: 512,
            seq_len: 1024,
            depth: 6,
            dim_head: 64,
            heads: 8,
            ff_mult: 4.0,
            use_coor_descent: false,
            coor_descent_iters: 50,
            coor_descent_sparsity_k: 1.0,
            coor_descent_eps: 0.1,
            attn_null_kv: 0,
        }
    }
}

impl ModelHyperparameters {
    /// Reads hyperparameters from a `.json` or `.toml` file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ModelError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| ModelError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => Self::from_json_str(&contents),
            Some("toml") => Self::from_toml_str(&contents),
            other => Err(ModelError::ConfigFormat(format!(
                "unsupported config extension {other:?} for {}",
                path.display()
            ))),
        }
    }

    pub fn from_json_str(contents: &str) -> Result<Self, ModelError> {
        serde_json::from_str(contents).map_err(|err| ModelError::ConfigFormat(err.to_string()))
    }

    pub fn from_toml_str(contents: &str) -> Result<Self, ModelError> {
        toml::from_str(contents).map_err(|err| ModelError::ConfigFormat(err.to_string()))
    }

    pub fn normalizer(&self) -> Normalizer {
        if self.use_coor_descent {
            Normalizer::CoorDescent(CoorDescentConfig {
                n_iters: self.coor_descent_iters,
                sparsity_k: self.coor_descent_sparsity_k,
                eps: self.coor_descent_eps,
            })
        } else {
            Normalizer::Softmax
        }
    }

    /// Resolves the runtime configuration with `ATTN_*` environment
    /// overrides applied, then validates it.
    pub fn to_model_config(
        &self,
        dtype: DType,
        device: &Device,
    ) -> Result<ModelConfig, ModelError> {
        self.to_model_config_with(dtype, device, |key| std::env::var(key).ok())
    }

    /// Like [`to_model_config`](Self::to_model_config), resolving overrides
    /// through `lookup` instead of the process environment.
    pub fn to_model_config_with<F>(
        &self,
        dtype: DType,
        device: &Device,
        lookup: F,
    ) -> Result<ModelConfig, ModelError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut attention = AttentionConfig {
            normalizer: self.normalizer(),
            ..AttentionConfig::default()
        };
        attention.apply_overrides(lookup)?;
        let config = ModelConfig {
            vocab_size: self.num_tokens,
            hidden_dim: self.dim,
            max_seq_len: self.seq_len,
            n_layers: self.depth,
            heads: self.heads,
            head_dim: self.dim_head,
            ff_mult: self.ff_mult,
            null_kv: self.attn_null_kv,
            attention,
            dtype,
            device: device.clone(),
        };
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_mirror_construction_options() {
        let hp = ModelHyperparameters::default();
        assert_eq!(hp.dim_head, 64);
        assert_eq!(hp.heads, 8);
        assert_eq!(hp.ff_mult, 4.0);
        assert!(!hp.use_coor_descent);
        assert_eq!(hp.coor_descent_iters, 50);
        assert_eq!(hp.coor_descent_sparsity_k, 1.0);
        assert_eq!(hp.coor_descent_eps, 0.1);
        assert_eq!(hp.attn_null_kv, 0);
        assert_eq!(hp.normalizer(), Normalizer::Softmax);
    }

    #[test]
    fn parses_partial_json_and_toml() {
        let json = r#"{
            "num_tokens": 32,
            "dim": 16,
            "use_coor_descent": true,
            "coor_descent_iters": 10
        }"#;
        let hp = ModelHyperparameters::from_json_str(json).unwrap();
        assert_eq!(hp.num_tokens, 32);
        assert_eq!(hp.heads, 8);
        assert_eq!(
            hp.normalizer(),
            Normalizer::CoorDescent(CoorDescentConfig {
                n_iters: 10,
                sparsity_k: 1.0,
                eps: 0.1,
            })
        );

        let toml = "dim = 24\ndepth = 2\nattn_null_kv = 2\n";
        let hp = ModelHyperparameters::from_toml_str(toml).unwrap();
        assert_eq!(hp.dim, 24);
        assert_eq!(hp.depth, 2);
        assert_eq!(hp.attn_null_kv, 2);
    }

    #[test]
    fn malformed_files_are_config_format_errors() {
        let err = ModelHyperparameters::from_json_str("{ \"dim\": \"wide\" }").unwrap_err();
        assert!(matches!(err, ModelError::ConfigFormat(_)));
        let err = ModelHyperparameters::from_toml_str("dim = [").unwrap_err();
        assert!(matches!(err, ModelError::ConfigFormat(_)));
    }

    #[test]
    fn validate_collects_every_problem() {
        let hp = ModelHyperparameters {
            num_tokens: 0,
            depth: 0,
            ff_mult: -1.0,
            use_coor_descent: true,
            coor_descent_iters: 0,
            coor_descent_eps: 0.0,
            ..ModelHyperparameters::default()
        };
        let message = hp
            .to_model_config(DType::F32, &Device::Cpu)
            .unwrap_err()
            .to_string();
        assert!(message.contains("vocab_size"));
        assert!(message.contains("n_layers"));
        assert!(message.contains("ff_mult"));
        assert!(message.contains("iteration"));
        assert!(message.contains("eps"));
    }

    #[test]
    fn overrides_layer_over_file_values() {
        let hp = ModelHyperparameters {
            num_tokens: 16,
            dim: 8,
            ..ModelHyperparameters::default()
        };
        let config = hp
            .to_model_config_with(DType::F32, &Device::Cpu, |key| match key {
                "ATTN_NORMALIZER" => Some("coor_descent".to_string()),
                "ATTN_COOR_DESCENT_ITERS" => Some("7".to_string()),
                _ => None,
            })
            .unwrap();
        assert_eq!(
            config.attention.normalizer,
            Normalizer::CoorDescent(CoorDescentConfig {
                n_iters: 7,
                sparsity_k: 1.0,
                eps: 0.1,
            })
        );

        let err = hp
            .to_model_config_with(DType::F32, &Device::Cpu, |key| {
                (key == "ATTN_NORMALIZER").then(|| "sparsemax".to_string())
            })
            .unwrap_err();
        assert!(matches!(err, ModelError::Attention(_)));
    }

    #[test]
    fn inner_width_may_differ_from_hidden() {
        let hp = ModelHyperparameters {
            dim: 12,
            heads: 2,
            dim_head: 4,
            ..ModelHyperparameters::default()
        };
        let config = hp.to_model_config(DType::F32, &Device::Cpu).unwrap();
        assert_eq!(config.inner_dim(), 8);
        assert_eq!(config.ff_hidden_dim(), 48);
    }
}
