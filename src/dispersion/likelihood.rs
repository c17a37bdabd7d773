//! Cox-Reid adjusted NB likelihood in log(alpha) and its maximization
//!
//! Shared by the gene-wise estimate (no prior) and the MAP estimate
//! (normal prior on log(alpha) centered at the trend).

use ndarray::Array2;
use statrs::function::gamma::{digamma, ln_gamma};

use super::DispersionParams;
use crate::glm::linalg::{invert_symmetric, log_det_symmetric, weighted_gram};

/// Hard lower bound for line-search proposals on the log scale
const MIN_LOG_ALPHA_PROPOSAL: f64 = -30.0;
/// Hard upper bound for line-search proposals on the log scale
const MAX_LOG_ALPHA_PROPOSAL: f64 = 10.0;
/// Armijo sufficient-decrease constant
const ARMIJO_EPSILON: f64 = 1e-4;
/// Points per pass of the grid fallback
const GRID_POINTS: usize = 20;

/// Normal prior on log(alpha)
#[derive(Debug, Clone, Copy)]
pub(super) struct LogNormalPrior {
    pub log_mean: f64,
    pub variance: f64,
}

/// Outcome of the Armijo line search
#[derive(Debug, Clone, Copy)]
pub(super) struct LineSearch {
    pub log_alpha: f64,
    pub initial_lp: f64,
    pub final_lp: f64,
    pub iterations: usize,
}

fn cr_weights(mu: &[f64], alpha: f64) -> Vec<f64> {
    mu.iter().map(|&m| 1.0 / (1.0 / m.max(1e-10) + alpha)).collect()
}

/// Log posterior of log(alpha) given fixed fitted means
pub(super) fn log_posterior(
    counts: &[f64],
    design: &Array2<f64>,
    mu: &[f64],
    log_alpha: f64,
    prior: Option<LogNormalPrior>,
) -> f64 {
    let alpha = log_alpha.exp();
    let alpha_inv = 1.0 / alpha;

    let ll: f64 = counts
        .iter()
        .zip(mu)
        .map(|(&y, &m)| {
            let m = m.max(1e-10);
            ln_gamma(y + alpha_inv) - ln_gamma(alpha_inv) - y * (m + alpha_inv).ln()
                - alpha_inv * (1.0 + m * alpha).ln()
        })
        .sum();

    let p = design.ncols();
    let b = weighted_gram(design, &cr_weights(mu, alpha));
    let cr = log_det_symmetric(&b, p).map(|d| -0.5 * d).unwrap_or(0.0);

    let prior_term = prior
        .map(|pr| -(log_alpha - pr.log_mean).powi(2) / (2.0 * pr.variance))
        .unwrap_or(0.0);

    ll + cr + prior_term
}

/// Derivative of `log_posterior` with respect to log(alpha)
pub(super) fn d_log_posterior(
    counts: &[f64],
    design: &Array2<f64>,
    mu: &[f64],
    log_alpha: f64,
    prior: Option<LogNormalPrior>,
) -> f64 {
    let alpha = log_alpha.exp();
    let alpha_sq = alpha * alpha;
    let alpha_inv = 1.0 / alpha;

    let dll_dalpha: f64 = counts
        .iter()
        .zip(mu)
        .map(|(&y, &m)| {
            let m = m.max(1e-10);
            (digamma(alpha_inv) - digamma(y + alpha_inv)) / alpha_sq
                + y / (alpha_sq * (m + alpha_inv))
                + (1.0 + m * alpha).ln() / alpha_sq
                - m / (alpha * (1.0 + m * alpha))
        })
        .sum();

    // d/dalpha of -0.5 log|X'WX| = -0.5 tr(B^-1 dB), with dw/dalpha = -w^2
    let p = design.ncols();
    let w = cr_weights(mu, alpha);
    let dw: Vec<f64> = w.iter().map(|&wi| -wi * wi).collect();
    let b_inv = invert_symmetric(&weighted_gram(design, &w), p);
    let db = weighted_gram(design, &dw);
    let trace: f64 = (0..p)
        .flat_map(|j| (0..p).map(move |k| (j, k)))
        .map(|(j, k)| b_inv[j * p + k] * db[k * p + j])
        .sum();
    let dcr_dalpha = if trace.is_finite() { -0.5 * trace } else { 0.0 };

    let prior_term = prior
        .map(|pr| -(log_alpha - pr.log_mean) / pr.variance)
        .unwrap_or(0.0);

    (dll_dalpha + dcr_dalpha) * alpha + prior_term
}

/// Maximize the log posterior over log(alpha) by gradient ascent with an
/// Armijo backtracking step.
///
/// `iterations == params.maxit` means the search did not converge.
pub(super) fn line_search(
    counts: &[f64],
    design: &Array2<f64>,
    mu: &[f64],
    alpha_init: f64,
    max_disp: f64,
    prior: Option<LogNormalPrior>,
    params: &DispersionParams,
) -> LineSearch {
    let min_log_alpha = (params.min_disp / 10.0).ln();
    let mut log_alpha = alpha_init
        .max(1e-10)
        .ln()
        .clamp(MIN_LOG_ALPHA_PROPOSAL, max_disp.ln());

    let initial_lp = log_posterior(counts, design, mu, log_alpha, prior);
    let mut lp = initial_lp;
    let mut dlp = d_log_posterior(counts, design, mu, log_alpha, prior);
    let mut kappa = params.kappa_0;
    let mut accepted = 0;
    let mut iterations = params.maxit;

    for iter in 0..params.maxit {
        let raw = log_alpha + kappa * dlp;
        if raw < MIN_LOG_ALPHA_PROPOSAL {
            kappa = (MIN_LOG_ALPHA_PROPOSAL - log_alpha) / dlp;
        }
        if raw > MAX_LOG_ALPHA_PROPOSAL {
            kappa = (MAX_LOG_ALPHA_PROPOSAL - log_alpha) / dlp;
        }
        let proposal = log_alpha + kappa * dlp;
        let lp_proposal = log_posterior(counts, design, mu, proposal, prior);

        if -lp_proposal <= -lp - kappa * ARMIJO_EPSILON * dlp * dlp {
            accepted += 1;
            log_alpha = proposal;
            let change = lp_proposal - lp;
            lp = lp_proposal;

            if change < params.disp_tol || log_alpha < min_log_alpha {
                iterations = iter + 1;
                break;
            }

            dlp = d_log_posterior(counts, design, mu, log_alpha, prior);
            kappa = (kappa * 1.1).min(params.kappa_0);
            if accepted % 5 == 0 {
                kappa /= 2.0;
            }
        } else {
            kappa /= 2.0;
        }

        if !dlp.is_finite() || !kappa.is_finite() {
            break;
        }
    }

    LineSearch {
        log_alpha,
        initial_lp,
        final_lp: lp,
        iterations,
    }
}

/// Coarse-then-fine grid search over log(alpha) in [min_disp, max_disp]
pub(super) fn grid_search(
    counts: &[f64],
    design: &Array2<f64>,
    mu: &[f64],
    min_disp: f64,
    max_disp: f64,
    prior: Option<LogNormalPrior>,
) -> f64 {
    let best_on = |lo: f64, hi: f64| -> (f64, f64) {
        let step = (hi - lo) / (GRID_POINTS - 1) as f64;
        (0..GRID_POINTS)
            .map(|i| lo + i as f64 * step)
            .map(|la| (la, log_posterior(counts, design, mu, la, prior)))
            .filter(|(_, lp)| lp.is_finite())
            .max_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(la, _)| (la, step))
            .unwrap_or((lo, step))
    };

    let (coarse, step) = best_on(min_disp.ln(), max_disp.ln());
    let (fine, _) = best_on(coarse - step, coarse + step);
    fine.exp()
}
