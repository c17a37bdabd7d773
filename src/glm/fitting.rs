//! GLM fitting using Iteratively Reweighted Least Squares (IRLS)

use ndarray::{Array2, ArrayView1};

use super::linalg::{invert_symmetric, solve_symmetric, weighted_gram};
use super::negative_binomial::{nb_log_density, nb_mean, nb_weight, MAX_BETA, MIN_MU};

/// Ridge penalty on every coefficient (1e-6 on the log2 scale)
fn ridge_lambda() -> f64 {
    let ln2 = std::f64::consts::LN_2;
    1e-6 / (ln2 * ln2)
}

/// Configurable parameters for GLM fitting
#[derive(Debug, Clone)]
pub struct GlmFitParams {
    /// Maximum IRLS iterations
    pub maxit: usize,
    /// Relative deviance change treated as converged
    pub beta_tol: f64,
}

impl Default for GlmFitParams {
    fn default() -> Self {
        Self {
            maxit: 100,
            beta_tol: 1e-8,
        }
    }
}

/// Fit of one feature; coefficients are on the natural log scale
#[derive(Debug, Clone)]
pub struct GlmFitResult {
    pub coefficients: Vec<f64>,
    pub standard_errors: Vec<f64>,
    pub mu: Vec<f64>,
    pub converged: bool,
    pub iterations: usize,
    pub log_likelihood: f64,
}

fn linear_predictor(design: &Array2<f64>, beta: &[f64], i: usize) -> f64 {
    design.row(i).iter().zip(beta).map(|(x, b)| x * b).sum()
}

/// Fit a negative binomial GLM with log link and size-factor offset for one feature.
///
/// Starts from least squares on log(normalized + 0.1), then iterates weighted
/// ridge least squares until the deviance settles. Features whose coefficients
/// run past `MAX_BETA` stop early and are reported as not converged; their
/// estimates and standard errors are still returned.
pub fn fit_single_gene(
    counts: ArrayView1<f64>,
    design: &Array2<f64>,
    size_factors: ArrayView1<f64>,
    alpha: f64,
    params: &GlmFitParams,
) -> GlmFitResult {
    let n_samples = counts.len();
    let n_coefs = design.ncols();
    let lambda = ridge_lambda();

    let log_norm: Vec<f64> = counts
        .iter()
        .zip(size_factors.iter())
        .map(|(&c, &s)| (c / s + 0.1).ln())
        .collect();
    let xtx = weighted_gram(design, &vec![1.0; n_samples]);
    let xty: Vec<f64> = (0..n_coefs)
        .map(|j| design.column(j).iter().zip(&log_norm).map(|(x, y)| x * y).sum())
        .collect();
    let mut beta = solve_symmetric(&xtx, &xty, n_coefs);
    if beta.iter().any(|b| !b.is_finite()) {
        let mean_norm = log_norm.iter().map(|l| l.exp()).sum::<f64>() / n_samples as f64;
        beta = vec![0.0; n_coefs];
        beta[0] = mean_norm.max(0.1).ln();
    }

    let mut mu = vec![0.0; n_samples];
    let mut weights = vec![0.0; n_samples];
    let mut z = vec![0.0; n_samples];
    let mut dev_old = 0.0;
    let mut converged = false;
    let mut iterations = 0;

    for iter in 0..params.maxit {
        iterations = iter + 1;
        for i in 0..n_samples {
            let m = nb_mean(linear_predictor(design, &beta, i), size_factors[i]).max(MIN_MU);
            mu[i] = m;
            weights[i] = nb_weight(m, alpha);
            z[i] = (m / size_factors[i]).ln() + (counts[i] - m) / m;
        }

        let mut xtwx = weighted_gram(design, &weights);
        for j in 0..n_coefs {
            xtwx[j * n_coefs + j] += lambda;
        }
        let xtwz: Vec<f64> = (0..n_coefs)
            .map(|j| {
                (0..n_samples)
                    .map(|i| weights[i] * design[[i, j]] * z[i])
                    .sum()
            })
            .collect();
        beta = solve_symmetric(&xtwx, &xtwz, n_coefs);

        if beta.iter().any(|b| !b.is_finite() || b.abs() > MAX_BETA) {
            log::debug!("IRLS coefficients diverged after {} iterations", iterations);
            break;
        }

        let dev: f64 = (0..n_samples)
            .map(|i| {
                let m = nb_mean(linear_predictor(design, &beta, i), size_factors[i]).max(MIN_MU);
                -2.0 * nb_log_density(counts[i], m, alpha)
            })
            .sum();
        let conv_test = (dev - dev_old).abs() / (dev.abs() + 0.1);
        if conv_test.is_nan() {
            break;
        }
        if iter > 0 && conv_test < params.beta_tol {
            converged = true;
            break;
        }
        dev_old = dev;
    }

    if beta.iter().any(|b| !b.is_finite()) {
        beta = vec![f64::NAN; n_coefs];
    }

    let mut log_likelihood = 0.0;
    for i in 0..n_samples {
        let m = nb_mean(linear_predictor(design, &beta, i), size_factors[i]).max(MIN_MU);
        mu[i] = m;
        weights[i] = nb_weight(m, alpha);
        log_likelihood += nb_log_density(counts[i], m, alpha);
    }

    GlmFitResult {
        standard_errors: sandwich_standard_errors(design, &weights, lambda),
        coefficients: beta,
        mu,
        converged,
        iterations,
        log_likelihood,
    }
}

/// Standard errors from the ridge sandwich (X'WX + L)^-1 X'WX (X'WX + L)^-1
fn sandwich_standard_errors(design: &Array2<f64>, weights: &[f64], lambda: f64) -> Vec<f64> {
    let p = design.ncols();
    let xtwx = weighted_gram(design, weights);
    let mut ridge = xtwx.clone();
    for j in 0..p {
        ridge[j * p + j] += lambda;
    }
    let inv = invert_symmetric(&ridge, p);

    (0..p)
        .map(|j| {
            let mut var = 0.0;
            for a in 0..p {
                for b in 0..p {
                    var += inv[j * p + a] * xtwx[a * p + b] * inv[b * p + j];
                }
            }
            if var > 0.0 && var.is_finite() {
                var.sqrt()
            } else {
                f64::NAN
            }
        })
        .collect()
}
