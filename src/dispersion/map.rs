//! Maximum a posteriori dispersion shrinkage toward the fitted trend

use ndarray::{Array1, Array2, ArrayView2};
use rayon::prelude::*;

use super::likelihood::{grid_search, line_search, LogNormalPrior};
use super::DispersionParams;
use crate::stats::{mad_squared, trigamma};

/// Floor of the prior variance on log dispersion
const MIN_PRIOR_VAR: f64 = 0.25;

/// Prior variance of log dispersions around the trend.
///
/// Returns (prior variance, observed variance of log residuals). The observed
/// variance is the squared MAD of log(gene-wise / trend) over features away
/// from the lower boundary; the expected sampling variance trigamma((m - p) / 2)
/// is subtracted and the result floored at 0.25.
pub fn estimate_prior_variance(
    gene_wise: &[f64],
    trended: &[f64],
    n_samples: usize,
    n_coefs: usize,
    min_disp: f64,
) -> (f64, f64) {
    let residuals: Vec<f64> = gene_wise
        .iter()
        .zip(trended)
        .filter(|(&g, &t)| g.is_finite() && t.is_finite() && g >= min_disp * 100.0 && t > 0.0)
        .map(|(&g, &t)| g.ln() - t.ln())
        .collect();

    if residuals.len() < 3 {
        return (MIN_PRIOR_VAR, MIN_PRIOR_VAR);
    }

    let var_log_disp = mad_squared(&residuals);
    if n_samples <= n_coefs {
        return (MIN_PRIOR_VAR, var_log_disp);
    }

    let df = (n_samples - n_coefs) as f64;
    let prior_var = (var_log_disp - trigamma(df / 2.0)).max(MIN_PRIOR_VAR);
    log::debug!(
        "Dispersion prior: df={}, varLogDisp={:.4}, priorVar={:.4}",
        df,
        var_log_disp,
        prior_var
    );
    (prior_var, var_log_disp)
}

/// MAP dispersion of one feature.
///
/// The search starts at the gene-wise value when it is within a factor of ten
/// of the trend, otherwise at the trend.
#[allow(clippy::too_many_arguments)]
pub fn fit_map_dispersion(
    counts: &[f64],
    design: &Array2<f64>,
    mu: &[f64],
    gene_wise: f64,
    trend: f64,
    prior_var: f64,
    max_disp: f64,
    params: &DispersionParams,
) -> f64 {
    if !gene_wise.is_finite() || !trend.is_finite() || trend <= 0.0 {
        return f64::NAN;
    }

    let prior = LogNormalPrior {
        log_mean: trend.ln(),
        variance: prior_var,
    };
    let alpha_init = if gene_wise > 0.1 * trend { gene_wise } else { trend };

    let search = line_search(counts, design, mu, alpha_init, max_disp, Some(prior), params);
    let mut alpha = search.log_alpha.exp();
    if search.iterations >= params.maxit {
        alpha = grid_search(counts, design, mu, params.min_disp, max_disp, Some(prior));
    }
    alpha.clamp(params.min_disp, max_disp)
}

/// MAP dispersions and the upper-outlier flags
#[derive(Debug, Clone)]
pub struct MapEstimates {
    pub dispersions: Array1<f64>,
    pub outliers: Vec<bool>,
    pub prior_var: f64,
}

/// Shrink every feature's dispersion toward the trend.
///
/// Features whose gene-wise estimate lies more than `outlier_sd` standard
/// deviations above the trend (on the log scale) keep the gene-wise value.
pub fn estimate_map_dispersions(
    counts: ArrayView2<f64>,
    design: &Array2<f64>,
    mu: &Array2<f64>,
    gene_wise: &Array1<f64>,
    trended: &Array1<f64>,
    params: &DispersionParams,
) -> MapEstimates {
    let (n_features, n_samples) = counts.dim();
    let gene_slice = gene_wise.to_vec();
    let trend_slice = trended.to_vec();
    let (prior_var, var_log_disp) = estimate_prior_variance(
        &gene_slice,
        &trend_slice,
        n_samples,
        design.ncols(),
        params.min_disp,
    );
    let max_disp = (n_samples as f64).max(10.0);

    let map: Vec<f64> = (0..n_features)
        .into_par_iter()
        .map(|i| {
            let row = counts.row(i).to_vec();
            let mu_row = mu.row(i).to_vec();
            fit_map_dispersion(
                &row,
                design,
                &mu_row,
                gene_slice[i],
                trend_slice[i],
                prior_var,
                max_disp,
                params,
            )
        })
        .collect();

    let threshold = params.outlier_sd * var_log_disp.sqrt();
    let outliers: Vec<bool> = gene_slice
        .iter()
        .zip(&trend_slice)
        .map(|(&g, &t)| g > 0.0 && t > 0.0 && g.is_finite() && t.is_finite() && g.ln() - t.ln() > threshold)
        .collect();

    let dispersions: Array1<f64> = map
        .iter()
        .zip(&outliers)
        .zip(&gene_slice)
        .map(|((&m, &out), &g)| if out { g } else { m })
        .collect();

    log::debug!(
        "MAP dispersions: {} upper outliers (threshold {:.4})",
        outliers.iter().filter(|&&o| o).count(),
        threshold
    );

    MapEstimates {
        dispersions,
        outliers,
        prior_var,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_prior_variance_floor() {
        // Identical gene-wise and trend values leave nothing to explain
        let g = vec![0.1; 20];
        let (prior, observed) = estimate_prior_variance(&g, &g, 12, 4, 1e-8);
        assert_eq!(prior, MIN_PRIOR_VAR);
        assert!(observed.abs() < 1e-12);
    }

    #[test]
    fn test_prior_variance_subtracts_sampling_variance() {
        let trend = vec![0.1; 40];
        let gene: Vec<f64> = (0..40)
            .map(|i| 0.1 * ((i as f64 - 20.0) / 4.0).exp())
            .collect();
        let (prior, observed) = estimate_prior_variance(&gene, &trend, 30, 4, 1e-8);
        assert!(observed > 1.0);
        assert!((prior - (observed - trigamma(13.0)).max(MIN_PRIOR_VAR)).abs() < 1e-12);
    }

    #[test]
    fn test_map_moves_toward_trend() {
        let design = array![
            [1.0, 0.0],
            [1.0, 0.0],
            [1.0, 0.0],
            [1.0, 1.0],
            [1.0, 1.0],
            [1.0, 1.0]
        ];
        let counts = [12.0, 30.0, 7.0, 25.0, 60.0, 18.0];
        let mu = [16.33, 16.33, 16.33, 34.33, 34.33, 34.33];
        let params = DispersionParams::default();

        let gene = grid_search(&counts, &design, &mu, params.min_disp, 10.0, None);
        let trend = gene / 4.0;
        let map = fit_map_dispersion(&counts, &design, &mu, gene, trend, 0.25, 10.0, &params);
        assert!(map < gene && map > trend, "trend {} map {} gene {}", trend, map, gene);
    }

    #[test]
    fn test_upper_outlier_keeps_gene_wise() {
        let design = array![[1.0], [1.0], [1.0], [1.0], [1.0], [1.0]];
        let counts = array![
            [10.0, 11.0, 9.0, 10.0, 12.0, 8.0],
            [1.0, 60.0, 2.0, 90.0, 0.0, 40.0],
            [20.0, 22.0, 18.0, 21.0, 19.0, 20.0],
            [30.0, 33.0, 27.0, 29.0, 31.0, 30.0]
        ];
        let mu = Array2::from_shape_fn((4, 6), |(i, _)| counts.row(i).mean().unwrap_or(1.0));
        let gene_wise = array![0.01, 2.5, 0.011, 0.012];
        let trended = array![0.01, 0.01, 0.01, 0.01];

        let est = estimate_map_dispersions(
            counts.view(),
            &design,
            &mu,
            &gene_wise,
            &trended,
            &DispersionParams::default(),
        );
        assert!(est.outliers[1]);
        assert_eq!(est.dispersions[1], 2.5);
        assert!(!est.outliers[0]);
    }

    #[test]
    fn test_all_zero_feature_stays_nan() {
        let design = array![[1.0], [1.0], [1.0]];
        let d = fit_map_dispersion(
            &[0.0, 0.0, 0.0],
            &design,
            &[0.0, 0.0, 0.0],
            f64::NAN,
            0.1,
            0.25,
            10.0,
            &DispersionParams::default(),
        );
        assert!(d.is_nan());
    }
}
