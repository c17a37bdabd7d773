//! Dispersion estimation for negative binomial models
//!
//! Gene-wise Cox-Reid estimates, a fitted dispersion-mean trend, then MAP
//! shrinkage of each feature toward the trend.

mod gene_wise;
mod likelihood;
mod map;
mod trend;

pub use gene_wise::{estimate_dispersion_gene, estimate_gene_dispersions, GeneWiseEstimates};
pub use map::{estimate_map_dispersions, estimate_prior_variance, fit_map_dispersion, MapEstimates};
pub use trend::{fit_dispersion_trend, DispersionFit, TrendFit};

use ndarray::{Array1, Array2, ArrayView2};
use serde::{Deserialize, Serialize};

use crate::error::{Result, SimError};

/// Configurable parameters for dispersion estimation
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispersionParams {
    /// Lower bound for every dispersion estimate
    pub min_disp: f64,
    /// Log-posterior change treated as converged
    pub disp_tol: f64,
    /// Initial step size of the line search
    pub kappa_0: f64,
    /// Maximum line-search iterations
    pub maxit: usize,
    /// Gene-wise estimates this many SDs above the trend are not shrunk
    pub outlier_sd: f64,
}

impl Default for DispersionParams {
    fn default() -> Self {
        Self {
            min_disp: 1e-8,
            disp_tol: 1e-6,
            kappa_0: 1.0,
            maxit: 100,
            outlier_sd: 2.0,
        }
    }
}

/// Every stage of the dispersion pipeline for one count matrix
#[derive(Debug, Clone)]
pub struct DispersionEstimates {
    pub gene_wise: Array1<f64>,
    pub trended: Array1<f64>,
    /// Final per-feature dispersions used by the GLM
    pub dispersions: Array1<f64>,
    pub prior_var: f64,
    /// Trend method actually used after any fallback
    pub fit_used: DispersionFit,
    pub n_outliers: usize,
}

/// Mean of each row of normalized counts
fn base_means(counts: ArrayView2<f64>, size_factors: &Array1<f64>) -> Vec<f64> {
    counts
        .outer_iter()
        .map(|row| {
            row.iter()
                .zip(size_factors.iter())
                .map(|(c, s)| c / s)
                .sum::<f64>()
                / row.len() as f64
        })
        .collect()
}

/// Estimate all dispersions (gene-wise, trended, and MAP)
pub fn estimate_dispersions(
    counts: ArrayView2<f64>,
    size_factors: &Array1<f64>,
    design: &Array2<f64>,
    fit: DispersionFit,
    params: &DispersionParams,
) -> Result<DispersionEstimates> {
    let (n_features, n_samples) = counts.dim();
    if design.nrows() != n_samples {
        return Err(SimError::DimensionMismatch {
            expected: format!("{} design rows", n_samples),
            got: format!("{}", design.nrows()),
        });
    }
    if n_samples <= design.ncols() {
        return Err(SimError::DispersionEstimationFailed {
            reason: format!(
                "{} samples for {} coefficients leaves no residual degrees of freedom",
                n_samples,
                design.ncols()
            ),
        });
    }

    let gene = estimate_gene_dispersions(counts, size_factors, design, params);
    if gene.dispersions.iter().all(|d| d.is_nan()) {
        return Err(SimError::DispersionEstimationFailed {
            reason: format!("all {} features have zero counts", n_features),
        });
    }

    let means = base_means(counts, size_factors);
    let gene_slice = gene.dispersions.to_vec();
    let trend = fit_dispersion_trend(&means, &gene_slice, fit, params.min_disp)?;
    if trend.method != fit {
        log::debug!("Dispersion trend fell back from {} to {}", fit, trend.method);
    }

    let map = estimate_map_dispersions(
        counts,
        design,
        &gene.mu,
        &gene.dispersions,
        &trend.trended,
        params,
    );

    Ok(DispersionEstimates {
        gene_wise: gene.dispersions,
        trended: trend.trended,
        dispersions: map.dispersions,
        prior_var: map.prior_var,
        fit_used: trend.method,
        n_outliers: map.outliers.iter().filter(|&&o| o).count(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{array, Array2};
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;
    use statrs::distribution::{Gamma, Poisson};
    use rand::distributions::Distribution;

    fn nb_counts(n_features: usize, n_samples: usize, alpha: f64, seed: u64) -> Array2<f64> {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        Array2::from_shape_fn((n_features, n_samples), |(i, _)| {
            let mu = 20.0 + 10.0 * (i % 30) as f64;
            let lambda = Gamma::new(1.0 / alpha, 1.0 / (alpha * mu))
                .map(|g| g.sample(&mut rng))
                .unwrap_or(mu);
            Poisson::new(lambda.max(1e-8))
                .map(|p| p.sample(&mut rng))
                .unwrap_or(0.0)
        })
    }

    fn two_group_design(n: usize) -> Array2<f64> {
        Array2::from_shape_fn((n, 2), |(i, j)| if j == 0 || i >= n / 2 { 1.0 } else { 0.0 })
    }

    #[test]
    fn test_pipeline_recovers_common_dispersion() {
        let counts = nb_counts(300, 12, 0.1, 7);
        let sf = Array1::from(vec![1.0; 12]);
        let est = estimate_dispersions(
            counts.view(),
            &sf,
            &two_group_design(12),
            DispersionFit::Local,
            &DispersionParams::default(),
        )
        .unwrap();

        assert_eq!(est.dispersions.len(), 300);
        assert!(est.dispersions.iter().all(|d| d.is_finite() && *d > 0.0));
        let median = crate::stats::median(&est.dispersions.to_vec());
        assert!(median > 0.04 && median < 0.25, "median dispersion {}", median);
    }

    #[test]
    fn test_no_residual_degrees_of_freedom() {
        let counts = array![[1.0, 2.0], [3.0, 4.0]];
        let design = array![[1.0, 0.0], [1.0, 1.0]];
        let result = estimate_dispersions(
            counts.view(),
            &Array1::from(vec![1.0, 1.0]),
            &design,
            DispersionFit::Parametric,
            &DispersionParams::default(),
        );
        assert!(matches!(result, Err(SimError::DispersionEstimationFailed { .. })));
    }

    #[test]
    fn test_all_zero_matrix_fails() {
        let counts = Array2::zeros((5, 6));
        let result = estimate_dispersions(
            counts.view(),
            &Array1::from(vec![1.0; 6]),
            &two_group_design(6),
            DispersionFit::Mean,
            &DispersionParams::default(),
        );
        assert!(result.unwrap_err().is_recoverable());
    }
}
