//! Independent filtering on mean normalized counts
//!
//! Features below a mean-count cutoff are removed before the BH adjustment.
//! The cutoff is the quantile of base means that (after smoothing) gives
//! close to the maximum number of rejections at level `alpha`.

use crate::stats::{quantile_type7, sorted_finite};
use crate::testing::benjamini_hochberg;

/// Number of candidate quantiles between the zero fraction and 0.95
const N_THETA: usize = 50;
/// Span of the lowess smoother over the rejection curve
const LOWESS_SPAN: f64 = 0.2;
/// Robustness iterations of the lowess smoother
const LOWESS_ITERATIONS: usize = 3;

/// Adjusted p-values after filtering and the chosen cutoff
#[derive(Debug, Clone)]
pub struct FilterOutcome {
    /// NaN for features filtered out or untested
    pub padj: Vec<f64>,
    pub theta: f64,
    pub cutoff: f64,
    pub n_rejected: usize,
}

/// Choose a base-mean cutoff and adjust the surviving p-values
pub fn independent_filtering(pvalues: &[f64], base_means: &[f64], alpha: f64) -> FilterOutcome {
    let n = pvalues.len();
    let sorted_means = sorted_finite(base_means);
    if n == 0 || sorted_means.is_empty() {
        return FilterOutcome {
            padj: benjamini_hochberg(pvalues),
            theta: 0.0,
            cutoff: 0.0,
            n_rejected: 0,
        };
    }

    let lower = base_means.iter().filter(|&&m| m == 0.0 || !m.is_finite()).count() as f64 / n as f64;
    let upper = if lower < 0.95 { 0.95 } else { 1.0 };
    let thetas: Vec<f64> = (0..N_THETA)
        .map(|i| lower + (upper - lower) * i as f64 / (N_THETA - 1) as f64)
        .collect();
    let cutoffs: Vec<f64> = thetas.iter().map(|&t| quantile_type7(&sorted_means, t)).collect();

    let adjusted: Vec<Vec<f64>> = cutoffs
        .iter()
        .map(|&cutoff| {
            let kept: Vec<f64> = pvalues
                .iter()
                .zip(base_means)
                .map(|(&p, &m)| if m >= cutoff { p } else { f64::NAN })
                .collect();
            benjamini_hochberg(&kept)
        })
        .collect();
    let n_rej: Vec<f64> = adjusted
        .iter()
        .map(|padj| padj.iter().filter(|&&q| q < alpha).count() as f64)
        .collect();

    let best = select_theta(&thetas, &n_rej);
    log::debug!(
        "Independent filtering: theta={:.3}, cutoff={:.3}, rejections={}",
        thetas[best],
        cutoffs[best],
        n_rej[best]
    );

    FilterOutcome {
        n_rejected: n_rej[best] as usize,
        theta: thetas[best],
        cutoff: cutoffs[best],
        padj: adjusted.into_iter().nth(best).unwrap_or_default(),
    }
}

/// First theta whose rejection count comes within one RMSE of the smoothed maximum
fn select_theta(thetas: &[f64], n_rej: &[f64]) -> usize {
    let max_rej = n_rej.iter().cloned().fold(0.0, f64::max);
    if max_rej <= 10.0 {
        return 0;
    }

    let fit = lowess(thetas, n_rej, LOWESS_SPAN, LOWESS_ITERATIONS);
    let max_fit = fit.iter().cloned().fold(f64::MIN, f64::max);
    let residuals: Vec<f64> = n_rej
        .iter()
        .zip(&fit)
        .filter(|(&r, _)| r > 0.0)
        .map(|(&r, &f)| r - f)
        .collect();
    let rmse = if residuals.is_empty() {
        0.0
    } else {
        (residuals.iter().map(|r| r * r).sum::<f64>() / residuals.len() as f64).sqrt()
    };

    [max_fit - rmse, 0.9 * max_fit, 0.8 * max_fit]
        .iter()
        .find_map(|&thresh| n_rej.iter().position(|&r| r > thresh))
        .unwrap_or(0)
}

/// Locally weighted linear regression with tricube weights and bisquare
/// robustness reweighting. `x` must be sorted ascending.
pub(crate) fn lowess(x: &[f64], y: &[f64], span: f64, iterations: usize) -> Vec<f64> {
    let n = x.len();
    if n < 2 {
        return y.to_vec();
    }
    let k = ((span * n as f64 + 1e-7) as usize).clamp(2, n);
    let mut robustness = vec![1.0; n];
    let mut fitted = vec![0.0; n];

    for step in 0..=iterations {
        // Window of the k nearest points, slid right as i advances
        let mut left = 0;
        let mut right = k - 1;
        for i in 0..n {
            while right + 1 < n && x[i] - x[left] > x[right + 1] - x[i] {
                left += 1;
                right += 1;
            }
            let h = (x[i] - x[left]).max(x[right] - x[i]);

            let mut sw = 0.0;
            let mut sx = 0.0;
            let mut sy = 0.0;
            let mut sxx = 0.0;
            let mut sxy = 0.0;
            for j in left..=right {
                let u = if h > 0.0 { (x[j] - x[i]).abs() / h } else { 0.0 };
                let w = if u < 0.999 { (1.0 - u.powi(3)).powi(3) } else { 0.0 } * robustness[j];
                sw += w;
                sx += w * x[j];
                sy += w * y[j];
                sxx += w * x[j] * x[j];
                sxy += w * x[j] * y[j];
            }
            fitted[i] = if sw <= 0.0 {
                y[i]
            } else {
                let xbar = sx / sw;
                let ybar = sy / sw;
                let var = sxx / sw - xbar * xbar;
                if var > 1e-12 {
                    ybar + (sxy / sw - xbar * ybar) / var * (x[i] - xbar)
                } else {
                    ybar
                }
            };
        }

        if step == iterations {
            break;
        }
        let abs_res: Vec<f64> = y.iter().zip(&fitted).map(|(a, b)| (a - b).abs()).collect();
        let scale = abs_res.iter().sum::<f64>() / n as f64;
        let cmad = 6.0 * crate::stats::median(&abs_res);
        if cmad <= 0.0 || cmad < 1e-7 * scale {
            break;
        }
        for (w, r) in robustness.iter_mut().zip(&abs_res) {
            let u = r / cmad;
            *w = if u < 1.0 { (1.0 - u * u).powi(2) } else { 0.0 };
        }
    }
    fitted
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lowess_reproduces_line() {
        let x: Vec<f64> = (0..20).map(|i| i as f64).collect();
        let y: Vec<f64> = x.iter().map(|v| 2.0 * v + 1.0).collect();
        let fit = lowess(&x, &y, 0.3, 3);
        for (f, t) in fit.iter().zip(&y) {
            assert!((f - t).abs() < 1e-8);
        }
    }

    #[test]
    fn test_lowess_resists_outlier() {
        let x: Vec<f64> = (0..30).map(|i| i as f64).collect();
        let mut y: Vec<f64> = x.iter().map(|v| 5.0 + 0.5 * v.sin()).collect();
        y[15] = 500.0;
        let fit = lowess(&x, &y, 0.3, 3);
        assert!((fit[14] - 5.0).abs() < 1.0);
    }

    #[test]
    fn test_filtering_removes_low_count_features() {
        // Low-mean features carry uninformative p-values
        let n = 400;
        let base_means: Vec<f64> = (0..n).map(|i| 1.0 + i as f64).collect();
        let pvalues: Vec<f64> = (0..n)
            .map(|i| {
                if i < 200 {
                    0.2 + 0.8 * (i as f64 / 200.0)
                } else if i % 2 == 0 {
                    4e-4 * ((i - 200) / 2 + 1) as f64
                } else {
                    0.5
                }
            })
            .collect();

        let unfiltered = benjamini_hochberg(&pvalues).iter().filter(|&&q| q < 0.1).count();
        let outcome = independent_filtering(&pvalues, &base_means, 0.1);
        assert_eq!(unfiltered, 0);
        assert!(outcome.cutoff > 1.0);
        assert!(outcome.n_rejected > 50);
        assert!(outcome.padj[0].is_nan());
        assert_eq!(outcome.padj.len(), n);
    }

    #[test]
    fn test_few_rejections_keep_everything() {
        let pvalues = vec![0.5; 30];
        let base_means: Vec<f64> = (0..30).map(|i| i as f64 + 1.0).collect();
        let outcome = independent_filtering(&pvalues, &base_means, 0.1);
        assert_eq!(outcome.theta, 0.0);
        assert!(outcome.padj.iter().all(|q| q.is_finite()));
    }

    #[test]
    fn test_zero_means_are_filtered() {
        let pvalues = vec![0.01, f64::NAN, 0.02];
        let base_means = vec![10.0, 0.0, 20.0];
        let outcome = independent_filtering(&pvalues, &base_means, 0.1);
        assert!(outcome.padj[1].is_nan());
        assert!(outcome.padj[0].is_finite());
    }
}
