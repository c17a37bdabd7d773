//! rust_fdrsim: Monte Carlo assessment of false discovery control
//!
//! Simulates count data from a balanced two-level factorial design, tests an
//! interaction coefficient with a negative binomial GLM and records the
//! false discovery proportion of the resulting rejection sets across
//! repetitions, zero-inflation levels and FDR thresholds.
//!
//! # Example
//!
//! ```ignore
//! use rust_fdrsim::prelude::*;
//!
//! let config = StudyConfig::default().with_reps(20);
//! let outcome = run_study(config)?;
//! write_records("results.csv", &outcome.records)?;
//! println!("{}", render_table(&summarize(&outcome.records)));
//! ```

pub mod cli;
pub mod config;
pub mod design;
pub mod dispersion;
pub mod error;
pub mod estimator;
pub mod filter;
pub mod glm;
pub mod io;
pub mod normalization;
pub mod report;
pub mod rng;
pub mod simulate;
pub mod stats;
pub mod study;
pub mod testing;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::config::StudyConfig;
    pub use crate::design::{DesignMatrix, Encoding, SampleLayout};
    pub use crate::dispersion::{estimate_dispersions, DispersionFit, DispersionParams};
    pub use crate::error::{Result, SimError};
    pub use crate::estimator::{EffectEstimator, NbWaldEstimator};
    pub use crate::glm::GlmFitParams;
    pub use crate::io::{read_records, write_records};
    pub use crate::report::{render_table, summarize, write_summary_json, FdpSummary};
    pub use crate::simulate::{
        AffectedCoefficients, Assignment, CountSimulator, EmissionModel, FeatureEffect, GammaPrior,
        MeanGenerator, SizePolicy,
    };
    pub use crate::study::{fdp, rejections, ResultRecord, Study, StudyOutcome};
    pub use crate::testing::benjamini_hochberg;
}

use prelude::*;

/// Run a study with the built-in negative binomial Wald estimator
pub fn run_study(config: StudyConfig) -> Result<StudyOutcome> {
    Study::with_default_estimator(config)?.run()
}
