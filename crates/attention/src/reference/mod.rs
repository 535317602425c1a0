//! Portable softmax attention.
//!
//! This path favours clarity over performance and doubles as the baseline the
//! coordinate-descent kernel is compared against.

pub mod exact;

pub use exact::ExactAttention;
