//! Negative binomial helpers for the log-link GLM

use statrs::function::gamma::ln_gamma;

/// Lower bound on fitted means inside IRLS
pub const MIN_MU: f64 = 0.5;

/// IRLS stops when any |beta| exceeds this (about 2^43 fold change on the natural log scale)
pub const MAX_BETA: f64 = 30.0;

/// Linear predictor clamp preventing exp() overflow
pub const MAX_ETA: f64 = 700.0;

/// Expected count for linear predictor `eta` with size factor offset
pub fn nb_mean(eta: f64, size_factor: f64) -> f64 {
    size_factor * eta.clamp(-MAX_ETA, MAX_ETA).exp()
}

/// IRLS working weight mu / (1 + alpha mu)
pub fn nb_weight(mu: f64, alpha: f64) -> f64 {
    mu / (1.0 + alpha * mu)
}

/// log P(Y = y) for NB with mean `mu` and dispersion `alpha` (size 1/alpha)
pub fn nb_log_density(y: f64, mu: f64, alpha: f64) -> f64 {
    if mu <= 0.0 || alpha <= 0.0 {
        return f64::NEG_INFINITY;
    }
    let size = 1.0 / alpha;
    let log_p = (size / (size + mu)).ln();
    let log_1mp = (mu / (size + mu)).ln();
    let y_term = if y > 0.0 { y * log_1mp } else { 0.0 };
    ln_gamma(y + size) - ln_gamma(size) - ln_gamma(y + 1.0) + size * log_p + y_term
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nb_mean_offset() {
        assert!((nb_mean(2.0, 1.5) - 1.5 * 2.0f64.exp()).abs() < 1e-10);
        assert!(nb_mean(1e6, 1.0).is_finite());
    }

    #[test]
    fn test_nb_weight() {
        assert!((nb_weight(10.0, 0.1) - 5.0).abs() < 1e-12);
    }

    #[test]
    fn test_nb_log_density_sums_to_one() {
        let (mu, alpha) = (4.0, 0.3);
        let total: f64 = (0..400).map(|y| nb_log_density(y as f64, mu, alpha).exp()).sum();
        assert!((total - 1.0).abs() < 1e-8);
    }

    #[test]
    fn test_nb_log_density_poisson_limit() {
        let (y, mu): (f64, f64) = (3.0, 5.0);
        let poisson = y * mu.ln() - mu - ln_gamma(y + 1.0);
        assert!((nb_log_density(y, mu, 1e-8) - poisson).abs() < 1e-5);
    }
}
