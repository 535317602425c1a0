//! Sparse attention normalizers.
//!
//! The coordinate-descent solver replaces the softmax with an entropic,
//! cardinality-constrained projection whose rows concentrate their mass on
//! roughly `k` keys.

pub mod coor_descent;
pub mod solver;

pub use coor_descent::CoorDescentAttention;
pub use solver::{coor_descent, logsumexp_keepdim, relu_clamp, ClampFn};
