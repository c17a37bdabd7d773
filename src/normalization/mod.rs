//! Per-sample normalization of simulated count matrices

mod size_factors;

pub use size_factors::{
    estimate_size_factors, estimate_size_factors_with_fallback, normalized_counts, SizeFactorMethod,
};
