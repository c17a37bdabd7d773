//! Wald test of one coefficient of the negative binomial GLM

use ndarray::{Array1, Array2, ArrayView2, Axis};
use rayon::prelude::*;

use super::pvalue::wald_pvalue;
use crate::error::{Result, SimError};
use crate::glm::{fit_single_gene, GlmFitParams};

/// Per-feature Wald test results; coefficients are on the natural log scale
#[derive(Debug, Clone)]
pub struct WaldResults {
    pub base_means: Vec<f64>,
    pub coefficients: Vec<f64>,
    pub standard_errors: Vec<f64>,
    pub statistics: Vec<f64>,
    pub pvalues: Vec<f64>,
    pub converged: Vec<bool>,
}

impl WaldResults {
    pub fn n_not_converged(&self) -> usize {
        self.converged.iter().filter(|&&c| !c).count()
    }
}

/// Fit every feature with its final dispersion and test `coef` against zero.
///
/// Features with a zero base mean get NaN statistics and p-values. Fits that
/// did not converge keep their p-values.
pub fn wald_test(
    counts: ArrayView2<f64>,
    size_factors: &Array1<f64>,
    design: &Array2<f64>,
    dispersions: &Array1<f64>,
    coef: usize,
    params: &GlmFitParams,
) -> Result<WaldResults> {
    let (n_features, n_samples) = counts.dim();
    if coef >= design.ncols() {
        return Err(SimError::InvalidDesignMatrix {
            reason: format!(
                "tested coefficient {} out of range for {} columns",
                coef,
                design.ncols()
            ),
        });
    }
    if dispersions.len() != n_features {
        return Err(SimError::DimensionMismatch {
            expected: format!("{} dispersions", n_features),
            got: format!("{}", dispersions.len()),
        });
    }

    let base_means: Vec<f64> = counts
        .axis_iter(Axis(0))
        .map(|row| {
            row.iter()
                .zip(size_factors.iter())
                .map(|(c, s)| c / s)
                .sum::<f64>()
                / n_samples as f64
        })
        .collect();

    let fits: Vec<(f64, f64, bool)> = (0..n_features)
        .into_par_iter()
        .map(|i| {
            if base_means[i] == 0.0 || !dispersions[i].is_finite() {
                return (f64::NAN, f64::NAN, true);
            }
            let fit = fit_single_gene(
                counts.row(i),
                design,
                size_factors.view(),
                dispersions[i],
                params,
            );
            (fit.coefficients[coef], fit.standard_errors[coef], fit.converged)
        })
        .collect();

    let mut coefficients = Vec::with_capacity(n_features);
    let mut standard_errors = Vec::with_capacity(n_features);
    let mut statistics = Vec::with_capacity(n_features);
    let mut converged = Vec::with_capacity(n_features);
    for (beta, se, conv) in fits {
        let stat = if se > 0.0 && se.is_finite() { beta / se } else { f64::NAN };
        coefficients.push(beta);
        standard_errors.push(se);
        statistics.push(stat);
        converged.push(conv);
    }
    let pvalues = statistics.iter().map(|&z| wald_pvalue(z)).collect();

    let results = WaldResults {
        base_means,
        coefficients,
        standard_errors,
        statistics,
        pvalues,
        converged,
    };
    let not_converged = results.n_not_converged();
    if not_converged > 0 {
        log::debug!("{} features did not converge in the GLM fit", not_converged);
    }
    Ok(results)
}
