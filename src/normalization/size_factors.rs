//! Size factor estimation using the median of ratios method

use ndarray::{Array1, Array2, ArrayView2, Axis};

use crate::error::{Result, SimError};
use crate::stats::median;

/// Method for size factor estimation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SizeFactorMethod {
    /// Median of ratios over features positive in every sample
    Ratio,
    /// Geometric means over positive counts only, for zero-heavy data
    PosCounts,
}

/// Estimate size factors for a features x samples count matrix
pub fn estimate_size_factors(counts: ArrayView2<f64>, method: SizeFactorMethod) -> Result<Array1<f64>> {
    let (n_features, n_samples) = counts.dim();
    if n_features == 0 || n_samples == 0 {
        return Err(SimError::EmptyData {
            reason: "count matrix is empty".to_string(),
        });
    }

    // Log geometric mean per feature; None when the feature is excluded
    let log_geo_means: Vec<Option<f64>> = counts
        .axis_iter(Axis(0))
        .map(|row| match method {
            SizeFactorMethod::Ratio => {
                if row.iter().all(|&x| x > 0.0) {
                    Some(row.iter().map(|&x| x.ln()).sum::<f64>() / n_samples as f64)
                } else {
                    None
                }
            }
            SizeFactorMethod::PosCounts => {
                let log_sum: f64 = row.iter().filter(|&&x| x > 0.0).map(|&x| x.ln()).sum();
                // Divide by all samples, not only the positive ones
                row.iter().any(|&x| x > 0.0).then(|| log_sum / n_samples as f64)
            }
        })
        .collect();

    if log_geo_means.iter().all(Option::is_none) {
        return Err(SimError::SizeFactorFailed {
            reason: match method {
                SizeFactorMethod::Ratio => "no feature has non-zero counts in every sample",
                SizeFactorMethod::PosCounts => "every feature is all zeros",
            }
            .to_string(),
        });
    }

    let mut size_factors = Array1::zeros(n_samples);
    for j in 0..n_samples {
        let log_ratios: Vec<f64> = log_geo_means
            .iter()
            .enumerate()
            .filter_map(|(i, g)| {
                let c = counts[[i, j]];
                match g {
                    Some(g) if c > 0.0 => Some(c.ln() - g),
                    _ => None,
                }
            })
            .collect();

        size_factors[j] = if log_ratios.is_empty() {
            match method {
                SizeFactorMethod::Ratio => {
                    return Err(SimError::SizeFactorFailed {
                        reason: format!("no valid ratios for sample {}", j),
                    })
                }
                SizeFactorMethod::PosCounts => 1.0,
            }
        } else {
            median(&log_ratios).exp()
        };
    }

    if method == SizeFactorMethod::PosCounts {
        // Rescale so the geometric mean of the factors is 1
        let log_mean = size_factors.iter().map(|s: &f64| s.ln()).sum::<f64>() / n_samples as f64;
        size_factors.mapv_inplace(|s| s / log_mean.exp());
    }

    if size_factors.iter().any(|&s| !(s.is_finite() && s > 0.0)) {
        return Err(SimError::SizeFactorFailed {
            reason: "invalid size factors computed".to_string(),
        });
    }

    Ok(size_factors)
}

/// Median of ratios, falling back to positive counts when zero-inflation leaves
/// no feature positive in every sample
pub fn estimate_size_factors_with_fallback(
    counts: ArrayView2<f64>,
) -> Result<(Array1<f64>, SizeFactorMethod)> {
    match estimate_size_factors(counts, SizeFactorMethod::Ratio) {
        Ok(sf) => Ok((sf, SizeFactorMethod::Ratio)),
        Err(SimError::SizeFactorFailed { reason }) => {
            log::debug!("Median of ratios failed ({}), using positive counts", reason);
            let sf = estimate_size_factors(counts, SizeFactorMethod::PosCounts)?;
            Ok((sf, SizeFactorMethod::PosCounts))
        }
        Err(e) => Err(e),
    }
}

/// Divide each sample column by its size factor
pub fn normalized_counts(counts: ArrayView2<f64>, size_factors: &Array1<f64>) -> Array2<f64> {
    let mut normalized = counts.to_owned();
    for (mut col, &s) in normalized.axis_iter_mut(Axis(1)).zip(size_factors.iter()) {
        col.mapv_inplace(|c| c / s);
    }
    normalized
}
