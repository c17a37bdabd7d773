//! P-value calculation from test statistics

use statrs::distribution::{ContinuousCDF, Normal};

/// Two-sided p-value of a standard normal statistic
pub fn wald_pvalue(z: f64) -> f64 {
    if !z.is_finite() {
        return f64::NAN;
    }
    Normal::new(0.0, 1.0)
        .map(|normal| 2.0 * normal.cdf(-z.abs()))
        .unwrap_or(f64::NAN)
}
