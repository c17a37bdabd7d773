//! Dispersion trend fitting

use ndarray::Array1;
use serde::{Deserialize, Serialize};

use crate::error::{Result, SimError};
use crate::glm::linalg::solve_symmetric;
use crate::stats::{quantile_type7, trimmed_mean};

/// Method for fitting the dispersion-mean trend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispersionFit {
    /// dispersion = a0 + a1 / mean, via a Gamma GLM with identity link
    Parametric,
    /// Local quadratic regression of log dispersion on log mean
    Local,
    /// One trimmed mean for every feature
    Mean,
}

impl DispersionFit {
    /// Parse a fit-type flag; anything unrecognized means the parametric default
    pub fn parse(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "local" => DispersionFit::Local,
            "mean" => DispersionFit::Mean,
            _ => DispersionFit::Parametric,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DispersionFit::Parametric => "parametric",
            DispersionFit::Local => "local",
            DispersionFit::Mean => "mean",
        }
    }
}

impl Default for DispersionFit {
    fn default() -> Self {
        DispersionFit::Parametric
    }
}

impl std::fmt::Display for DispersionFit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fitted trend evaluated at every feature
#[derive(Debug, Clone)]
pub struct TrendFit {
    pub trended: Array1<f64>,
    /// Method that produced the trend after any fallback
    pub method: DispersionFit,
    /// (asymptotic dispersion, extra-Poisson) for the parametric fit
    pub coefficients: Option<(f64, f64)>,
}

/// Neighborhood fraction of the local fit
const LOCAL_SPAN: f64 = 0.7;
/// Evaluation anchors of the local fit; features are interpolated between them
const LOCAL_ANCHORS: usize = 64;

/// Fit the trend of gene-wise dispersions against mean normalized counts.
///
/// Parametric falls back to local, local falls back to mean. Features with a
/// zero mean get a NaN trend (they have no gene-wise estimate either).
pub fn fit_dispersion_trend(
    means: &[f64],
    dispersions: &[f64],
    method: DispersionFit,
    min_disp: f64,
) -> Result<TrendFit> {
    match method {
        DispersionFit::Parametric => match fit_parametric_trend(means, dispersions, min_disp) {
            Ok((trended, coefs)) => Ok(TrendFit {
                trended,
                method,
                coefficients: Some(coefs),
            }),
            Err(e) => {
                log::debug!("Parametric fit failed ({}), using local regression", e);
                fit_dispersion_trend(means, dispersions, DispersionFit::Local, min_disp)
            }
        },
        DispersionFit::Local => match fit_local_trend(means, dispersions, min_disp) {
            Ok(trended) => Ok(TrendFit {
                trended,
                method,
                coefficients: None,
            }),
            Err(e) => {
                log::debug!("Local fit failed ({}), using mean dispersion", e);
                fit_dispersion_trend(means, dispersions, DispersionFit::Mean, min_disp)
            }
        },
        DispersionFit::Mean => {
            let trended = fit_mean_trend(means, dispersions, min_disp)?;
            Ok(TrendFit {
                trended,
                method,
                coefficients: None,
            })
        }
    }
}

fn usable_points(means: &[f64], dispersions: &[f64], threshold: f64) -> Vec<(f64, f64)> {
    means
        .iter()
        .zip(dispersions)
        .filter(|(&m, &d)| m > 0.0 && m.is_finite() && d.is_finite() && d > threshold)
        .map(|(&m, &d)| (m, d))
        .collect()
}

fn fit_parametric_trend(
    means: &[f64],
    dispersions: &[f64],
    min_disp: f64,
) -> Result<(Array1<f64>, (f64, f64))> {
    let data = usable_points(means, dispersions, min_disp * 100.0);
    if data.len() < 3 {
        return Err(SimError::TrendFittingFailed {
            reason: format!("{} usable points for parametric fit", data.len()),
        });
    }

    let mut coefs = (0.1_f64, 1.0_f64);
    let mut converged = false;
    for iter in 0..11 {
        let old = coefs;
        // Drop points whose residual ratio is implausibly small or large
        let good: Vec<(f64, f64)> = data
            .iter()
            .copied()
            .filter(|&(m, d)| {
                let fitted = coefs.0 + coefs.1 / m;
                fitted > 0.0 && (1e-4..15.0).contains(&(d / fitted))
            })
            .collect();
        if good.len() < 3 {
            return Err(SimError::TrendFittingFailed {
                reason: "not enough points with plausible residuals".to_string(),
            });
        }

        let (new_coefs, glm_converged) = gamma_glm_identity(&good, coefs);
        coefs = new_coefs;
        if !(coefs.0 > 0.0 && coefs.1 > 0.0) {
            return Err(SimError::TrendFittingFailed {
                reason: format!(
                    "coefficients not positive (a0={:.4}, a1={:.4})",
                    coefs.0, coefs.1
                ),
            });
        }

        let change = (coefs.0 / old.0).ln().powi(2) + (coefs.1 / old.1).ln().powi(2);
        log::debug!(
            "Parametric trend iter {}: a0={:.5}, a1={:.5}, {} points",
            iter + 1,
            coefs.0,
            coefs.1,
            good.len()
        );
        if change < 1e-6 && glm_converged {
            converged = true;
            break;
        }
    }

    if !converged {
        return Err(SimError::TrendFittingFailed {
            reason: "parametric dispersion fit did not converge".to_string(),
        });
    }

    let trended = means
        .iter()
        .map(|&m| if m > 0.0 { coefs.0 + coefs.1 / m } else { f64::NAN })
        .collect();
    Ok((trended, coefs))
}

/// Gamma GLM with identity link, disp ~ a0 + a1 * (1 / mean), by IRLS
fn gamma_glm_identity(data: &[(f64, f64)], start: (f64, f64)) -> ((f64, f64), bool) {
    let deviance = |a0: f64, a1: f64| -> f64 {
        data.iter()
            .map(|&(m, d)| {
                let mu = (a0 + a1 / m).max(1e-8);
                2.0 * (-(d / mu).ln() + (d - mu) / mu)
            })
            .sum()
    };

    let (mut a0, mut a1) = start;
    let mut dev_old = deviance(a0, a1);
    for _ in 0..25 {
        let mut s = [0.0f64; 5];
        for &(m, d) in data {
            let x = 1.0 / m;
            let mu = (a0 + a1 * x).max(1e-8);
            let w = 1.0 / (mu * mu);
            s[0] += w;
            s[1] += w * x;
            s[2] += w * x * x;
            s[3] += w * d;
            s[4] += w * x * d;
        }
        let det = s[0] * s[2] - s[1] * s[1];
        if det.abs() < 1e-12 {
            return ((a0, a1), false);
        }
        a0 = (s[2] * s[3] - s[1] * s[4]) / det;
        a1 = (s[0] * s[4] - s[1] * s[3]) / det;

        let dev = deviance(a0, a1);
        if (dev_old - dev).abs() / (0.1 + dev.abs()) < 1e-8 {
            return ((a0, a1), true);
        }
        dev_old = dev;
    }
    ((a0, a1), false)
}

/// Weighted local quadratic fit of log dispersion on log mean at `x0`.
///
/// Tricube kernel over the nearest `span` fraction of points, observation
/// weights equal to the means.
fn local_quadratic_at(x0: f64, xs: &[f64], ys: &[f64], ws: &[f64], k: usize) -> Option<f64> {
    let mut dists: Vec<f64> = xs.iter().map(|&x| (x - x0).abs()).collect();
    dists.sort_by(|a, b| a.total_cmp(b));
    let h = dists[(k - 1).min(dists.len() - 1)].max(1e-8) * 1.0001;

    let mut xtwx = [0.0f64; 9];
    let mut xtwy = [0.0f64; 3];
    for ((&x, &y), &w_obs) in xs.iter().zip(ys).zip(ws) {
        let u = (x - x0).abs() / h;
        if u >= 1.0 {
            continue;
        }
        let w = w_obs * (1.0 - u.powi(3)).powi(3);
        let basis = [1.0, x - x0, 0.5 * (x - x0).powi(2)];
        for a in 0..3 {
            xtwy[a] += w * basis[a] * y;
            for b in 0..3 {
                xtwx[a * 3 + b] += w * basis[a] * basis[b];
            }
        }
    }
    if xtwx[0] <= 0.0 {
        return None;
    }
    let beta = solve_symmetric(&xtwx, &xtwy, 3);
    beta[0].is_finite().then_some(beta[0])
}

fn fit_local_trend(means: &[f64], dispersions: &[f64], min_disp: f64) -> Result<Array1<f64>> {
    let mut data: Vec<(f64, f64, f64)> = usable_points(means, dispersions, min_disp * 10.0)
        .into_iter()
        .map(|(m, d)| (m.ln(), d.ln(), m))
        .collect();
    if data.len() < 5 {
        return Err(SimError::TrendFittingFailed {
            reason: format!("{} usable points for local fit", data.len()),
        });
    }
    data.sort_by(|a, b| a.0.total_cmp(&b.0));

    let xs: Vec<f64> = data.iter().map(|d| d.0).collect();
    let ys: Vec<f64> = data.iter().map(|d| d.1).collect();
    let ws: Vec<f64> = data.iter().map(|d| d.2).collect();
    let k = ((xs.len() as f64 * LOCAL_SPAN).ceil() as usize).clamp(3, xs.len());

    // Anchors at quantiles of log mean, deduplicated
    let mut anchors: Vec<f64> = (0..LOCAL_ANCHORS)
        .map(|i| quantile_type7(&xs, i as f64 / (LOCAL_ANCHORS - 1) as f64))
        .collect();
    anchors.dedup_by(|a, b| (*a - *b).abs() < 1e-12);
    let fitted: Vec<(f64, f64)> = anchors
        .iter()
        .filter_map(|&a| local_quadratic_at(a, &xs, &ys, &ws, k).map(|f| (a, f)))
        .collect();
    if fitted.is_empty() {
        return Err(SimError::TrendFittingFailed {
            reason: "local regression produced no finite fits".to_string(),
        });
    }

    let predict = |x: f64| -> f64 {
        let pos = fitted.partition_point(|&(a, _)| a < x);
        if pos == 0 {
            fitted[0].1
        } else if pos >= fitted.len() {
            fitted[fitted.len() - 1].1
        } else {
            let (x0, y0) = fitted[pos - 1];
            let (x1, y1) = fitted[pos];
            y0 + (x - x0) / (x1 - x0) * (y1 - y0)
        }
    };

    Ok(means
        .iter()
        .map(|&m| {
            if m > 0.0 {
                predict(m.ln()).exp().max(min_disp)
            } else {
                f64::NAN
            }
        })
        .collect())
}

fn fit_mean_trend(means: &[f64], dispersions: &[f64], min_disp: f64) -> Result<Array1<f64>> {
    let usable: Vec<f64> = dispersions
        .iter()
        .copied()
        .filter(|d| d.is_finite() && *d > min_disp * 10.0)
        .collect();
    let mean_disp = if usable.is_empty() {
        let finite: Vec<f64> = dispersions.iter().copied().filter(|d| d.is_finite()).collect();
        trimmed_mean(&finite, 0.0)
    } else {
        trimmed_mean(&usable, 0.001)
    };
    if !mean_disp.is_finite() {
        return Err(SimError::TrendFittingFailed {
            reason: "no finite gene-wise dispersions".to_string(),
        });
    }
    Ok(means
        .iter()
        .map(|&m| if m > 0.0 { mean_disp } else { f64::NAN })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parametric_data(n: usize) -> (Vec<f64>, Vec<f64>) {
        // Exact a0 + a1 / mean with mild multiplicative jitter
        let means: Vec<f64> = (0..n).map(|i| 5.0 + 10.0 * i as f64).collect();
        let disps: Vec<f64> = means
            .iter()
            .enumerate()
            .map(|(i, &m)| (0.05 + 2.0 / m) * if i % 2 == 0 { 1.1 } else { 0.9 })
            .collect();
        (means, disps)
    }

    #[test]
    fn test_parametric_recovers_coefficients() {
        let (means, disps) = parametric_data(200);
        let fit = fit_dispersion_trend(&means, &disps, DispersionFit::Parametric, 1e-8).unwrap();
        assert_eq!(fit.method, DispersionFit::Parametric);
        let (a0, a1) = fit.coefficients.unwrap();
        assert!((a0 - 0.05).abs() < 0.01, "a0 = {}", a0);
        assert!((a1 - 2.0).abs() < 0.3, "a1 = {}", a1);
    }

    #[test]
    fn test_local_trend_follows_data() {
        let (means, disps) = parametric_data(200);
        let fit = fit_dispersion_trend(&means, &disps, DispersionFit::Local, 1e-8).unwrap();
        assert_eq!(fit.method, DispersionFit::Local);
        for (i, &m) in means.iter().enumerate().step_by(20) {
            let truth = 0.05 + 2.0 / m;
            let rel = (fit.trended[i] / truth).ln().abs();
            assert!(rel < 0.25, "mean {} trend {} truth {}", m, fit.trended[i], truth);
        }
    }

    #[test]
    fn test_local_falls_back_to_mean() {
        let means = [10.0, 20.0, 30.0];
        let disps = [0.1, 0.2, 0.3];
        let fit = fit_dispersion_trend(&means, &disps, DispersionFit::Local, 1e-8).unwrap();
        assert_eq!(fit.method, DispersionFit::Mean);
        assert!((fit.trended[0] - 0.2).abs() < 1e-12);
    }

    #[test]
    fn test_zero_mean_gets_nan() {
        let (mut means, mut disps) = parametric_data(50);
        means.push(0.0);
        disps.push(f64::NAN);
        let fit = fit_dispersion_trend(&means, &disps, DispersionFit::Mean, 1e-8).unwrap();
        assert!(fit.trended[50].is_nan());
        assert!(fit.trended[0].is_finite());
    }

    #[test]
    fn test_no_usable_dispersions_fails() {
        let means = [0.0, 0.0];
        let disps = [f64::NAN, f64::NAN];
        let result = fit_dispersion_trend(&means, &disps, DispersionFit::Parametric, 1e-8);
        assert!(matches!(result, Err(SimError::TrendFittingFailed { .. })));
    }

    #[test]
    fn test_parse_fit_type() {
        assert_eq!(DispersionFit::parse("local"), DispersionFit::Local);
        assert_eq!(DispersionFit::parse("Mean"), DispersionFit::Mean);
        assert_eq!(DispersionFit::parse("parametric"), DispersionFit::Parametric);
        assert_eq!(DispersionFit::parse("global"), DispersionFit::Parametric);
    }
}
