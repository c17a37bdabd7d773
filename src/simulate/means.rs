//! Gamma-prior coefficient draws and per-sample mean vectors

use ndarray::{Array1, Array2};
use rand::distributions::Distribution;
use rand::Rng;
use serde::{Deserialize, Serialize};
use statrs::distribution::Gamma;

use super::labels::Assignment;
use crate::design::DesignMatrix;
use crate::error::{Result, SimError};

/// Redraws allowed before a feature with non-positive means is reported as degenerate
pub const MAX_REDRAWS: usize = 100;

/// Gamma(shape, rate) prior on every coefficient
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GammaPrior {
    pub shape: f64,
    pub rate: f64,
}

impl GammaPrior {
    pub fn new(shape: f64, rate: f64) -> Result<Self> {
        let prior = Self { shape, rate };
        prior.validate()?;
        Ok(prior)
    }

    pub fn validate(&self) -> Result<()> {
        for (name, value) in [("gamma_shape", self.shape), ("gamma_rate", self.rate)] {
            if !(value.is_finite() && value > 0.0) {
                return Err(SimError::InvalidHyperparameter {
                    name: name.to_string(),
                    value,
                    reason: "must be positive and finite".to_string(),
                });
            }
        }
        Ok(())
    }

    pub fn mean(&self) -> f64 {
        self.shape / self.rate
    }

    fn distribution(&self) -> Result<Gamma> {
        Gamma::new(self.shape, self.rate).map_err(|e| SimError::InvalidHyperparameter {
            name: "gamma_prior".to_string(),
            value: self.shape,
            reason: e.to_string(),
        })
    }
}

/// Coefficients whose value encodes the true effect of a feature
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AffectedCoefficients {
    /// One coefficient (the null-index variant)
    Single(usize),
    /// Half-open block `[start, end)` (the signed variant)
    Range { start: usize, end: usize },
}

impl AffectedCoefficients {
    pub fn indices(&self) -> std::ops::Range<usize> {
        match *self {
            AffectedCoefficients::Single(idx) => idx..idx + 1,
            AffectedCoefficients::Range { start, end } => start..end,
        }
    }

    pub fn contains(&self, idx: usize) -> bool {
        self.indices().contains(&idx)
    }

    pub fn validate(&self, n_coefs: usize) -> Result<()> {
        let range = self.indices();
        if range.is_empty() || range.end > n_coefs {
            return Err(SimError::InvalidConfig {
                reason: format!(
                    "affected coefficients {:?} out of bounds for {} design columns",
                    range, n_coefs
                ),
            });
        }
        Ok(())
    }
}

/// Coefficients and the mean matrix they produce for one repetition
#[derive(Debug, Clone)]
pub struct SimulatedMeans {
    /// J x P coefficient matrix
    pub coefficients: Array2<f64>,
    /// J x N mean matrix, row j = X . beta_j
    pub means: Array2<f64>,
    /// Features that needed at least one redraw
    pub redrawn: usize,
}

/// Draws coefficient vectors and turns them into mean vectors
#[derive(Debug, Clone)]
pub struct MeanGenerator {
    prior: GammaPrior,
    affected: AffectedCoefficients,
}

impl MeanGenerator {
    pub fn new(prior: GammaPrior, affected: AffectedCoefficients) -> Result<Self> {
        prior.validate()?;
        Ok(Self { prior, affected })
    }

    pub fn prior(&self) -> GammaPrior {
        self.prior
    }

    pub fn affected(&self) -> AffectedCoefficients {
        self.affected
    }

    /// Draw fresh coefficients for every feature and compute the means.
    ///
    /// With a signed (-1/+1) encoding the intercept draw is raised by
    /// sum_k max_i |x_ik| |beta_k| over the other columns, so every mean is at
    /// least the raw intercept draw. A feature whose mean vector still has a
    /// non-positive entry is redrawn; after `MAX_REDRAWS` attempts the whole
    /// draw fails with `DegenerateMean`.
    pub fn generate<R: Rng + ?Sized>(
        &self,
        design: &DesignMatrix,
        assignment: &Assignment,
        rng: &mut R,
    ) -> Result<SimulatedMeans> {
        let x = design.matrix();
        let (n_samples, n_coefs) = x.dim();
        self.affected.validate(n_coefs)?;
        let gamma = self.prior.distribution()?;

        // Largest magnitude per column, used to lift the intercept of signed designs
        let lift_weights: Option<Vec<f64>> = (!design.encoding().is_non_negative()).then(|| {
            (0..n_coefs)
                .map(|k| x.column(k).iter().fold(0.0f64, |acc, v| acc.max(v.abs())))
                .collect()
        });

        let n_features = assignment.len();
        let mut coefficients = Array2::zeros((n_features, n_coefs));
        let mut means = Array2::zeros((n_features, n_samples));
        let mut redrawn = 0;

        for (j, effect) in assignment.effects().iter().enumerate() {
            let mut attempt = 0;
            loop {
                let mut beta: Array1<f64> = (0..n_coefs).map(|_| gamma.sample(rng)).collect();
                for idx in self.affected.indices() {
                    beta[idx] *= effect.scale();
                }
                if let Some(weights) = &lift_weights {
                    let lift: f64 = (1..n_coefs).map(|k| weights[k] * beta[k].abs()).sum();
                    beta[0] += lift;
                }
                let mu = x.dot(&beta);

                if mu.iter().all(|&m| m.is_finite() && m > 0.0) {
                    coefficients.row_mut(j).assign(&beta);
                    means.row_mut(j).assign(&mu);
                    break;
                }

                attempt += 1;
                if attempt == 1 {
                    redrawn += 1;
                }
                if attempt >= MAX_REDRAWS {
                    return Err(SimError::DegenerateMean {
                        feature: j,
                        reason: format!(
                            "mean vector not strictly positive after {} draws",
                            MAX_REDRAWS
                        ),
                    });
                }
            }
        }

        if redrawn > 0 {
            log::debug!("{} features redrawn for non-positive means", redrawn);
        }

        Ok(SimulatedMeans {
            coefficients,
            means,
            redrawn,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::design::{Encoding, SampleLayout};
    use crate::rng::cell_rng;
    use crate::simulate::labels::{FeatureEffect, SignalStyle};

    fn design(encoding: Encoding) -> DesignMatrix {
        let layout = SampleLayout::balanced(2, 12).unwrap();
        DesignMatrix::build(&layout, encoding).unwrap()
    }

    #[test]
    fn test_means_strictly_positive() {
        let d = design(Encoding::ZeroOne);
        let mut rng = cell_rng(11, 0, 0);
        let assignment = Assignment::generate(200, 50, SignalStyle::Unsigned, &mut rng).unwrap();
        let generator =
            MeanGenerator::new(GammaPrior::new(2.0, 0.05).unwrap(), AffectedCoefficients::Single(3))
                .unwrap();

        let sim = generator.generate(&d, &assignment, &mut rng).unwrap();
        assert_eq!(sim.means.dim(), (200, 12));
        assert!(sim.means.iter().all(|&m| m > 0.0));
        assert_eq!(sim.redrawn, 0);
    }

    #[test]
    fn test_symmetric_encoding_means_positive() {
        let d = design(Encoding::Symmetric);
        let mut rng = cell_rng(5, 0, 0);
        let assignment = Assignment::generate(100, 20, SignalStyle::Unsigned, &mut rng).unwrap();
        let generator =
            MeanGenerator::new(GammaPrior::new(2.0, 0.05).unwrap(), AffectedCoefficients::Single(3))
                .unwrap();

        let sim = generator.generate(&d, &assignment, &mut rng).unwrap();
        assert!(sim.means.iter().all(|&m| m > 0.0));
        assert_eq!(sim.redrawn, 0);
    }

    #[test]
    fn test_symmetric_three_factor_needs_no_redraw() {
        let layout = SampleLayout::balanced(3, 16).unwrap();
        let d = DesignMatrix::build(&layout, Encoding::Symmetric).unwrap();
        let mut rng = cell_rng(21, 0, 0);
        let style = SignalStyle::Signed {
            up_scale: 3.0,
            down_scale: 0.33,
        };
        let assignment = Assignment::generate(300, 60, style, &mut rng).unwrap();
        let generator = MeanGenerator::new(
            GammaPrior::new(2.0, 0.05).unwrap(),
            AffectedCoefficients::Range { start: 4, end: 7 },
        )
        .unwrap();

        let sim = generator.generate(&d, &assignment, &mut rng).unwrap();
        assert_eq!(sim.redrawn, 0);
        for j in 0..assignment.len() {
            let beta = sim.coefficients.row(j);
            let others: f64 = beta.iter().skip(1).map(|b| b.abs()).sum();
            // Every mean is at least the intercept minus the other magnitudes
            assert!(beta[0] > others);
            assert!(sim.means.row(j).iter().all(|&m| m > 0.0));
            if assignment.is_null(j) {
                assert!((4..7).all(|k| beta[k] == 0.0));
            }
        }
    }

    #[test]
    fn test_null_features_have_no_interaction_contribution() {
        let d = design(Encoding::ZeroOne);
        let interaction = d.interaction_column().unwrap();
        let mut rng = cell_rng(3, 1, 0);
        let assignment = Assignment::generate(60, 20, SignalStyle::Unsigned, &mut rng).unwrap();
        let generator = MeanGenerator::new(
            GammaPrior::new(2.0, 0.05).unwrap(),
            AffectedCoefficients::Single(interaction),
        )
        .unwrap();
        let sim = generator.generate(&d, &assignment, &mut rng).unwrap();

        let reduced = d.without_column(interaction);
        for j in 0..assignment.len() {
            let beta = sim.coefficients.row(j);
            if assignment.is_null(j) {
                assert_eq!(beta[interaction], 0.0);
                let beta_reduced: Array1<f64> = beta
                    .iter()
                    .enumerate()
                    .filter(|&(k, _)| k != interaction)
                    .map(|(_, &b)| b)
                    .collect();
                let mu_reduced = reduced.dot(&beta_reduced);
                for (a, b) in sim.means.row(j).iter().zip(mu_reduced.iter()) {
                    assert!((a - b).abs() < 1e-9, "null feature {} changed by interaction", j);
                }
            } else {
                assert!(beta[interaction] > 0.0);
            }
        }
    }

    #[test]
    fn test_signed_range_scaling() {
        let d = design(Encoding::ZeroOne);
        let assignment = Assignment::new(vec![
            FeatureEffect::PositiveEffect(3.0),
            FeatureEffect::NegativeEffect(0.5),
            FeatureEffect::NoEffect,
        ])
        .unwrap();
        let generator = MeanGenerator::new(
            GammaPrior::new(2.0, 0.05).unwrap(),
            AffectedCoefficients::Range { start: 2, end: 4 },
        )
        .unwrap();

        // Same stream with and without scaling: ratios recover the scale factors
        let scaled = generator
            .generate(&d, &assignment, &mut cell_rng(8, 0, 0))
            .unwrap();
        let base = generator
            .generate(
                &d,
                &Assignment::new(vec![FeatureEffect::PositiveEffect(1.0); 3]).unwrap(),
                &mut cell_rng(8, 0, 0),
            )
            .unwrap();

        for k in 2..4 {
            assert!((scaled.coefficients[[0, k]] / base.coefficients[[0, k]] - 3.0).abs() < 1e-12);
            assert!((scaled.coefficients[[1, k]] / base.coefficients[[1, k]] - 0.5).abs() < 1e-12);
            assert_eq!(scaled.coefficients[[2, k]], 0.0);
        }
        for k in 0..2 {
            assert_eq!(scaled.coefficients[[0, k]], base.coefficients[[0, k]]);
        }
    }

    #[test]
    fn test_invalid_prior() {
        assert!(GammaPrior::new(-1.0, 1.0).is_err());
        assert!(GammaPrior::new(1.0, 0.0).is_err());
        assert!(GammaPrior::new(f64::NAN, 1.0).is_err());
    }

    #[test]
    fn test_affected_out_of_bounds() {
        let d = design(Encoding::ZeroOne);
        let generator =
            MeanGenerator::new(GammaPrior::new(2.0, 0.05).unwrap(), AffectedCoefficients::Single(7))
                .unwrap();
        let assignment = Assignment::all_null(3);
        let result = generator.generate(&d, &assignment, &mut cell_rng(1, 0, 0));
        assert!(matches!(result, Err(SimError::InvalidConfig { .. })));
    }
}
