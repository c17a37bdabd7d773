//! Count emission with optional zero-inflation

use ndarray::Array2;
use rand::distributions::Distribution;
use rand::Rng;
use serde::{Deserialize, Serialize};
use statrs::distribution::{Gamma, Poisson};

use crate::error::{Result, SimError};

/// Size (inverse dispersion) of the negative binomial emission
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SizePolicy {
    /// size = 1 / mu, so Var = mu + mu^3
    InverseMean,
    /// Fixed size r, so Var = mu + mu^2 / r
    Constant(f64),
}

impl SizePolicy {
    pub fn size(&self, mu: f64) -> f64 {
        match *self {
            SizePolicy::InverseMean => 1.0 / mu,
            SizePolicy::Constant(r) => r,
        }
    }
}

/// Distribution of a single count given its mean
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmissionModel {
    NegativeBinomial { size: SizePolicy },
    Poisson,
}

impl Default for EmissionModel {
    fn default() -> Self {
        EmissionModel::NegativeBinomial {
            size: SizePolicy::InverseMean,
        }
    }
}

impl EmissionModel {
    pub fn validate(&self) -> Result<()> {
        if let EmissionModel::NegativeBinomial {
            size: SizePolicy::Constant(r),
        } = *self
        {
            if !(r.is_finite() && r > 0.0) {
                return Err(SimError::InvalidHyperparameter {
                    name: "nb_size".to_string(),
                    value: r,
                    reason: "must be positive and finite".to_string(),
                });
            }
        }
        Ok(())
    }

    /// Theoretical variance of one draw with mean `mu`
    pub fn variance(&self, mu: f64) -> f64 {
        match *self {
            EmissionModel::NegativeBinomial { size } => mu + mu * mu / size.size(mu),
            EmissionModel::Poisson => mu,
        }
    }

    /// Draw one count. The negative binomial is sampled as a Gamma-Poisson mixture.
    pub fn sample<R: Rng + ?Sized>(&self, mu: f64, rng: &mut R) -> Result<f64> {
        if !(mu.is_finite() && mu > 0.0) {
            return Err(SimError::DegenerateMean {
                feature: usize::MAX,
                reason: format!("cannot draw a count with mean {}", mu),
            });
        }

        let rate = match *self {
            EmissionModel::Poisson => mu,
            EmissionModel::NegativeBinomial { size } => {
                let r = size.size(mu);
                let gamma = Gamma::new(r, r / mu).map_err(|e| SimError::InvalidHyperparameter {
                    name: "nb_size".to_string(),
                    value: r,
                    reason: e.to_string(),
                })?;
                gamma.sample(rng)
            }
        };

        // Small Gamma shapes can underflow to an exact zero rate
        if !(rate > 0.0) {
            return Ok(0.0);
        }
        let poisson = Poisson::new(rate).map_err(|e| SimError::DegenerateMean {
            feature: usize::MAX,
            reason: e.to_string(),
        })?;
        Ok(poisson.sample(rng))
    }
}

/// Draws count matrices from a mean matrix
#[derive(Debug, Clone, Copy)]
pub struct CountSimulator {
    model: EmissionModel,
}

impl CountSimulator {
    pub fn new(model: EmissionModel) -> Result<Self> {
        model.validate()?;
        Ok(Self { model })
    }

    pub fn model(&self) -> EmissionModel {
        self.model
    }

    /// Simulate a J x N count matrix.
    ///
    /// Each entry is independently replaced by 0 with probability `delta`,
    /// regardless of the underlying draw.
    pub fn simulate<R: Rng + ?Sized>(
        &self,
        means: &Array2<f64>,
        delta: f64,
        rng: &mut R,
    ) -> Result<Array2<f64>> {
        validate_delta(delta)?;

        let mut counts = Array2::zeros(means.dim());
        for ((j, i), &mu) in means.indexed_iter() {
            let draw = self.model.sample(mu, rng).map_err(|e| match e {
                SimError::DegenerateMean { reason, .. } => SimError::DegenerateMean {
                    feature: j,
                    reason,
                },
                other => other,
            })?;
            let zeroed = delta > 0.0 && rng.gen::<f64>() < delta;
            counts[[j, i]] = if zeroed { 0.0 } else { draw };
        }
        Ok(counts)
    }
}

/// Zero-inflation probabilities must lie in [0, 1)
pub fn validate_delta(delta: f64) -> Result<()> {
    if !(0.0..1.0).contains(&delta) {
        return Err(SimError::InvalidHyperparameter {
            name: "delta".to_string(),
            value: delta,
            reason: "zero-inflation probability must be in [0, 1)".to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rng::cell_rng;

    fn empirical_mean(model: EmissionModel, mu: f64, n: usize, seed: u64) -> f64 {
        let sim = CountSimulator::new(model).unwrap();
        let means = Array2::from_elem((n, 1), mu);
        let counts = sim.simulate(&means, 0.0, &mut cell_rng(seed, 0, 0)).unwrap();
        counts.sum() / n as f64
    }

    #[test]
    fn test_poisson_mean_converges() {
        let mu = 25.0;
        let m = empirical_mean(EmissionModel::Poisson, mu, 20_000, 1);
        // sd of the mean = sqrt(25 / 20000) ~ 0.035
        assert!((m - mu).abs() < 0.25, "empirical mean {} vs {}", m, mu);
    }

    #[test]
    fn test_negative_binomial_constant_size_mean_converges() {
        let mu = 40.0;
        let model = EmissionModel::NegativeBinomial {
            size: SizePolicy::Constant(5.0),
        };
        let m = empirical_mean(model, mu, 20_000, 2);
        // Var = 40 + 1600 / 5 = 360; sd of the mean ~ 0.13
        assert!((m - mu).abs() < 1.0, "empirical mean {} vs {}", m, mu);
    }

    #[test]
    fn test_negative_binomial_inverse_mean_size_mean_converges() {
        let mu = 2.0;
        let m = empirical_mean(EmissionModel::default(), mu, 50_000, 3);
        // Var = mu + mu^3 = 10; sd of the mean ~ 0.014
        assert!((m - mu).abs() < 0.1, "empirical mean {} vs {}", m, mu);
    }

    #[test]
    fn test_counts_are_non_negative_integers() {
        let sim = CountSimulator::new(EmissionModel::default()).unwrap();
        let means = Array2::from_elem((50, 6), 10.0);
        let counts = sim.simulate(&means, 0.05, &mut cell_rng(4, 0, 0)).unwrap();
        assert!(counts.iter().all(|&c| c >= 0.0 && c.fract() == 0.0));
    }

    #[test]
    fn test_zero_inflation_rate() {
        // Poisson(200) essentially never yields 0, so zeros come from inflation alone
        let sim = CountSimulator::new(EmissionModel::Poisson).unwrap();
        let means = Array2::from_elem((1000, 20), 200.0);
        let counts = sim.simulate(&means, 0.1, &mut cell_rng(5, 0, 0)).unwrap();
        let frac = counts.iter().filter(|&&c| c == 0.0).count() as f64 / 20_000.0;
        assert!((frac - 0.1).abs() < 0.015, "zero fraction {}", frac);
    }

    #[test]
    fn test_invalid_delta() {
        let sim = CountSimulator::new(EmissionModel::Poisson).unwrap();
        let means = Array2::from_elem((2, 2), 5.0);
        assert!(sim.simulate(&means, 1.0, &mut cell_rng(6, 0, 0)).is_err());
        assert!(sim.simulate(&means, -0.1, &mut cell_rng(6, 0, 0)).is_err());
    }

    #[test]
    fn test_non_positive_mean_rejected() {
        let sim = CountSimulator::new(EmissionModel::Poisson).unwrap();
        let means = ndarray::array![[1.0, 0.0]];
        let result = sim.simulate(&means, 0.0, &mut cell_rng(7, 0, 0));
        assert!(matches!(result, Err(SimError::DegenerateMean { feature: 0, .. })));
    }

    #[test]
    fn test_variance() {
        let nb = EmissionModel::NegativeBinomial {
            size: SizePolicy::InverseMean,
        };
        assert!((nb.variance(3.0) - (3.0 + 27.0)).abs() < 1e-12);
        assert_eq!(EmissionModel::Poisson.variance(3.0), 3.0);
    }
}
