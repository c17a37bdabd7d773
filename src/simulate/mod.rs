//! Synthetic count data with known main and interaction effects
//!
//! `MeanGenerator` turns Gamma-prior coefficient draws into a mean matrix,
//! `CountSimulator` draws counts around it. Both take an explicit generator.

mod counts;
mod labels;
mod means;

pub use counts::{validate_delta, CountSimulator, EmissionModel, SizePolicy};
pub use labels::{Assignment, FeatureEffect, SignalStyle};
pub use means::{AffectedCoefficients, GammaPrior, MeanGenerator, SimulatedMeans, MAX_REDRAWS};
