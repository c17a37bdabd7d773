//! Generalized Linear Model fitting for negative binomial data

mod fitting;
pub(crate) mod linalg;
mod negative_binomial;

pub use fitting::{fit_single_gene, GlmFitParams, GlmFitResult};
pub use negative_binomial::{nb_log_density, nb_mean, nb_weight, MAX_BETA, MAX_ETA, MIN_MU};
