//! Study configuration
//!
//! Everything a run needs, loadable from JSON. Unset optional coefficient
//! indices default to the first interaction column of the design.

use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::design::{DesignMatrix, Encoding, SampleLayout};
use crate::dispersion::DispersionFit;
use crate::error::{Result, SimError};
use crate::simulate::{validate_delta, AffectedCoefficients, EmissionModel, GammaPrior, SignalStyle};

/// Parameters of one Monte Carlo study
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StudyConfig {
    /// Number of samples (N)
    pub n_samples: usize,
    /// Number of features (J)
    pub n_features: usize,
    /// Features carrying a true effect
    pub n_signal: usize,
    /// Two-level factors in the balanced layout
    pub n_factors: usize,
    pub encoding: Encoding,
    pub gamma_shape: f64,
    pub gamma_rate: f64,
    pub up_scale: f64,
    pub down_scale: f64,
    /// Split signal features into up and down effects
    pub signed_effects: bool,
    /// Coefficients zeroed (null) or rescaled (signal); None = interaction column
    pub affected: Option<AffectedCoefficients>,
    /// Design column under test; None = interaction column
    pub tested_coefficient: Option<usize>,
    pub emission: EmissionModel,
    /// Zero-inflation probabilities
    pub deltas: Vec<f64>,
    pub reps: usize,
    /// FDR thresholds applied to every adjusted p-value vector
    pub q_grid: Vec<f64>,
    pub fit_type: DispersionFit,
    pub independent_filtering: bool,
    pub seed: u64,
    /// Worker threads, 0 = rayon default
    pub threads: usize,
}

impl Default for StudyConfig {
    fn default() -> Self {
        Self {
            n_samples: 12,
            n_features: 1000,
            n_signal: 100,
            n_factors: 2,
            encoding: Encoding::ZeroOne,
            gamma_shape: 2.0,
            gamma_rate: 0.05,
            up_scale: 3.0,
            down_scale: 0.33,
            signed_effects: false,
            affected: None,
            tested_coefficient: None,
            emission: EmissionModel::default(),
            deltas: vec![0.0],
            reps: 100,
            q_grid: vec![0.01, 0.05, 0.1, 0.2],
            fit_type: DispersionFit::Local,
            independent_filtering: true,
            seed: 42,
            threads: 0,
        }
    }
}

impl StudyConfig {
    /// Signed-effect variant: negative binomial emission, up/down scaling of
    /// every interaction coefficient of a three-factor design
    pub fn signed_nb() -> Self {
        Self {
            n_samples: 16,
            n_factors: 3,
            signed_effects: true,
            affected: Some(AffectedCoefficients::Range { start: 4, end: 7 }),
            tested_coefficient: Some(4),
            ..Self::default()
        }
    }

    /// Null/non-null variant: Poisson emission with a zero-inflation sweep
    pub fn zero_inflated_poisson() -> Self {
        Self {
            emission: EmissionModel::Poisson,
            affected: Some(AffectedCoefficients::Single(3)),
            tested_coefficient: Some(3),
            deltas: vec![0.0, 0.01, 0.05, 0.1],
            ..Self::default()
        }
    }

    pub fn with_dimensions(mut self, n_samples: usize, n_features: usize, n_signal: usize) -> Self {
        self.n_samples = n_samples;
        self.n_features = n_features;
        self.n_signal = n_signal;
        self
    }

    pub fn with_reps(mut self, reps: usize) -> Self {
        self.reps = reps;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_deltas(mut self, deltas: Vec<f64>) -> Self {
        self.deltas = deltas;
        self
    }

    pub fn with_q_grid(mut self, q_grid: Vec<f64>) -> Self {
        self.q_grid = q_grid;
        self
    }

    pub fn with_fit_type(mut self, fit_type: DispersionFit) -> Self {
        self.fit_type = fit_type;
        self
    }

    /// Columns of the full design: intercept, factors, pairwise interactions
    pub fn n_coefs(&self) -> usize {
        1 + self.n_factors + self.n_factors * self.n_factors.saturating_sub(1) / 2
    }

    pub fn gamma_prior(&self) -> GammaPrior {
        GammaPrior {
            shape: self.gamma_shape,
            rate: self.gamma_rate,
        }
    }

    pub fn signal_style(&self) -> SignalStyle {
        if self.signed_effects {
            SignalStyle::Signed {
                up_scale: self.up_scale,
                down_scale: self.down_scale,
            }
        } else {
            SignalStyle::Unsigned
        }
    }

    pub fn build_design(&self) -> Result<DesignMatrix> {
        let layout = SampleLayout::balanced(self.n_factors, self.n_samples)?;
        DesignMatrix::build(&layout, self.encoding)
    }

    /// Affected coefficients, resolving the default against the design
    pub fn resolve_affected(&self, design: &DesignMatrix) -> Result<AffectedCoefficients> {
        let affected = match self.affected {
            Some(a) => a,
            None => AffectedCoefficients::Single(interaction_or_err(design)?),
        };
        affected.validate(design.n_coefs())?;
        Ok(affected)
    }

    /// Tested column, resolving the default against the design
    pub fn resolve_tested(&self, design: &DesignMatrix) -> Result<usize> {
        let coef = match self.tested_coefficient {
            Some(c) => c,
            None => interaction_or_err(design)?,
        };
        if coef >= design.n_coefs() {
            return Err(SimError::InvalidConfig {
                reason: format!(
                    "tested_coefficient {} out of range for {} design columns",
                    coef,
                    design.n_coefs()
                ),
            });
        }
        Ok(coef)
    }

    /// Check every parameter before any simulation starts
    pub fn validate(&self) -> Result<()> {
        if self.n_features == 0 {
            return Err(invalid("n_features must be positive"));
        }
        if self.n_signal > self.n_features {
            return Err(invalid(&format!(
                "n_signal ({}) exceeds n_features ({})",
                self.n_signal, self.n_features
            )));
        }
        if self.reps == 0 {
            return Err(invalid("reps must be positive"));
        }
        if self.n_samples <= self.n_coefs() {
            return Err(invalid(&format!(
                "n_samples ({}) must exceed the number of design columns ({})",
                self.n_samples,
                self.n_coefs()
            )));
        }

        self.gamma_prior().validate()?;
        if self.signed_effects {
            for (name, value) in [("up_scale", self.up_scale), ("down_scale", self.down_scale)] {
                if !(value.is_finite() && value > 0.0) {
                    return Err(SimError::InvalidHyperparameter {
                        name: name.to_string(),
                        value,
                        reason: "must be positive and finite".to_string(),
                    });
                }
            }
        }
        self.emission.validate()?;

        if self.deltas.is_empty() {
            return Err(invalid("deltas must not be empty"));
        }
        for &delta in &self.deltas {
            validate_delta(delta)?;
        }
        if self.q_grid.is_empty() {
            return Err(invalid("q_grid must not be empty"));
        }
        for &q in &self.q_grid {
            if !(q > 0.0 && q < 1.0) {
                return Err(SimError::InvalidHyperparameter {
                    name: "q".to_string(),
                    value: q,
                    reason: "FDR thresholds must lie in (0, 1)".to_string(),
                });
            }
        }

        let design = self.build_design()?;
        self.resolve_affected(&design)?;
        self.resolve_tested(&design)?;
        Ok(())
    }

    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let reader = BufReader::new(File::open(path)?);
        Ok(serde_json::from_reader(reader)?)
    }

    pub fn to_json_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer_pretty(writer, self)?;
        Ok(())
    }
}

fn invalid(reason: &str) -> SimError {
    SimError::InvalidConfig {
        reason: reason.to_string(),
    }
}

fn interaction_or_err(design: &DesignMatrix) -> Result<usize> {
    design.interaction_column().ok_or_else(|| SimError::InvalidConfig {
        reason: "design has no interaction column; set affected and tested_coefficient".to_string(),
    })
}
