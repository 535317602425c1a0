//! Configuration for attention kernels.
//!
//! [`Normalizer`] fixes, at construction time, how similarity scores become
//! attention weights. It is never consulted per call: a kernel is built for one
//! normalizer and keeps it for its whole lifetime.
//!
//! Environment overrides are layered by [`Config::apply_overrides`], which
//! resolves each key through a caller-supplied lookup:
//! - `ATTN_NORMALIZER` (`"softmax" | "coor_descent"`) selects the normalizer.
//! - `ATTN_COOR_DESCENT_ITERS` overrides the solver iteration count.
//! - `ATTN_COOR_DESCENT_K` overrides the sparsity target.
//! - `ATTN_COOR_DESCENT_EPS` overrides the smoothing temperature.
//!
//! The solver overrides only apply when the resolved normalizer is
//! coordinate descent.

use std::str::FromStr;

use candle_core::{DType, Device};

use super::AttentionError;

pub const ENV_NORMALIZER: &str = "ATTN_NORMALIZER";
pub const ENV_COOR_DESCENT_ITERS: &str = "ATTN_COOR_DESCENT_ITERS";
pub const ENV_COOR_DESCENT_K: &str = "ATTN_COOR_DESCENT_K";
pub const ENV_COOR_DESCENT_EPS: &str = "ATTN_COOR_DESCENT_EPS";

/// Parameters of the coordinate-descent sparse normalizer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CoorDescentConfig {
    /// Fixed number of dual-update passes; there is no early exit.
    pub n_iters: usize,
    /// Soft cardinality target per query; `1.0` approximates an argmax.
    pub sparsity_k: f64,
    /// Entropic smoothing temperature; smaller is sparser.
    pub eps: f64,
}

impl Default for CoorDescentConfig {
    fn default() -> Self {
        Self {
            n_iters: 50,
            sparsity_k: 1.0,
            eps: 0.1,
        }
    }
}

impl CoorDescentConfig {
    /// Checks the ranges the solver is meaningful for.
    pub fn validate(&self) -> Result<(), AttentionError> {
        let mut problems = Vec::new();
        if self.n_iters == 0 {
            problems.push("coordinate descent needs at least one iteration".to_string());
        }
        if !(self.sparsity_k.is_finite() && self.sparsity_k >= 1.0) {
            problems.push(format!("sparsity k must be >= 1, got {}", self.sparsity_k));
        }
        if !(self.eps.is_finite() && self.eps > 0.0) {
            problems.push(format!("eps must be positive, got {}", self.eps));
        }
        if problems.is_empty() {
            Ok(())
        } else {
            Err(AttentionError::InvalidConfig(problems.join("; ")))
        }
    }
}

/// How similarity scores are normalised into attention weights.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum Normalizer {
    /// Row-wise softmax over the allowed keys.
    #[default]
    Softmax,
    /// Iterative coordinate-descent projection toward sparse rows.
    CoorDescent(CoorDescentConfig),
}

impl Normalizer {
    /// Short label used in logs.
    pub fn label(&self) -> &'static str {
        match self {
            Normalizer::Softmax => "softmax",
            Normalizer::CoorDescent(_) => "coor_descent",
        }
    }
}

/// Dtype used while scoring and normalising.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScorePrecision {
    /// Promote half-precision q, k and v to `f32` and cast the output back.
    /// `f32` and `f64` inputs are scored as they are.
    #[default]
    ForceF32,
    /// Run in whatever dtype the inputs arrive in. The CPU backend has no
    /// `bf16` matmul, so `bf16` inputs on CPU are still scored in `f32`.
    Inherit,
}

impl ScorePrecision {
    /// Dtype that scores are computed in for inputs of `input` dtype on `device`.
    pub fn scoring_dtype(self, input: DType, device: &Device) -> DType {
        match (self, input) {
            (ScorePrecision::ForceF32, DType::F16 | DType::BF16) => DType::F32,
            (ScorePrecision::Inherit, DType::BF16) if device.is_cpu() => DType::F32,
            _ => input,
        }
    }
}

/// Configuration driving attention behaviour.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Config {
    pub normalizer: Normalizer,
    pub precision: ScorePrecision,
}

impl Config {
    /// Softmax attention with `f32` scoring.
    pub fn softmax() -> Self {
        Self::default()
    }

    /// Coordinate-descent attention with `f32` scoring.
    pub fn coor_descent(config: CoorDescentConfig) -> Self {
        Self {
            normalizer: Normalizer::CoorDescent(config),
            precision: ScorePrecision::ForceF32,
        }
    }

    /// Layers overrides resolved through `lookup` over the current values.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), AttentionError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(raw) = lookup(ENV_NORMALIZER) {
            self.normalizer = match raw.trim().to_ascii_lowercase().as_str() {
                "softmax" => Normalizer::Softmax,
                "coor_descent" | "coordinate_descent" => match self.normalizer {
                    Normalizer::CoorDescent(existing) => Normalizer::CoorDescent(existing),
                    Normalizer::Softmax => Normalizer::CoorDescent(CoorDescentConfig::default()),
                },
                other => {
                    return Err(AttentionError::InvalidConfig(format!(
                        "{ENV_NORMALIZER} must be 'softmax' or 'coor_descent', got '{other}'"
                    )))
                }
            };
        }

        let iters = parse_override::<usize, _>(&lookup, ENV_COOR_DESCENT_ITERS)?;
        let k = parse_override::<f64, _>(&lookup, ENV_COOR_DESCENT_K)?;
        let eps = parse_override::<f64, _>(&lookup, ENV_COOR_DESCENT_EPS)?;

        match &mut self.normalizer {
            Normalizer::CoorDescent(cfg) => {
                if let Some(iters) = iters {
                    cfg.n_iters = iters;
                }
                if let Some(k) = k {
                    cfg.sparsity_k = k;
                }
                if let Some(eps) = eps {
                    cfg.eps = eps;
                }
                cfg.validate()
            }
            Normalizer::Softmax => {
                if iters.is_some() || k.is_some() || eps.is_some() {
                    log::warn!("coordinate-descent overrides ignored: normalizer is softmax");
                }
                Ok(())
            }
        }
    }
}

fn parse_override<T, F>(lookup: &F, key: &str) -> Result<Option<T>, AttentionError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw.trim().parse::<T>().map(Some).map_err(|err| {
            AttentionError::InvalidConfig(format!("{key}='{raw}' could not be parsed: {err}"))
        }),
    }
}
