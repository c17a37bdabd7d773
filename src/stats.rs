//! Statistical utility functions shared across modules
//!
//! Quantiles, robust scale estimates and moments used by dispersion
//! estimation, independent filtering and the FDP reporter.

/// Consistency constant making the MAD an estimator of the normal sd
const MAD_CONSTANT: f64 = 1.4826;

/// Sort a copy of the finite values ascending
pub fn sorted_finite(values: &[f64]) -> Vec<f64> {
    let mut v: Vec<f64> = values.iter().copied().filter(|x| x.is_finite()).collect();
    v.sort_by(|a, b| a.total_cmp(b));
    v
}

/// Median of the finite values; NaN when there are none
pub fn median(values: &[f64]) -> f64 {
    let v = sorted_finite(values);
    let n = v.len();
    if n == 0 {
        return f64::NAN;
    }
    if n % 2 == 0 {
        (v[n / 2 - 1] + v[n / 2]) / 2.0
    } else {
        v[n / 2]
    }
}

/// Squared median absolute deviation (scaled to the normal sd)
pub fn mad_squared(values: &[f64]) -> f64 {
    let center = median(values);
    if !center.is_finite() {
        return 0.0;
    }
    let deviations: Vec<f64> = values
        .iter()
        .filter(|x| x.is_finite())
        .map(|&x| (x - center).abs())
        .collect();
    let mad = median(&deviations) * MAD_CONSTANT;
    mad * mad
}

/// Sample quantile with linear interpolation (the "type 7" definition).
///
/// `sorted_x` must be sorted ascending. Index h = (n - 1) p, interpolating
/// between x[floor(h)] and x[ceil(h)].
pub fn quantile_type7(sorted_x: &[f64], p: f64) -> f64 {
    let n = sorted_x.len();
    match n {
        0 => f64::NAN,
        1 => sorted_x[0],
        _ => {
            let h = (n as f64 - 1.0) * p.clamp(0.0, 1.0);
            let lo = (h.floor() as usize).min(n - 1);
            let hi = (h.ceil() as usize).min(n - 1);
            sorted_x[lo] + (h - lo as f64) * (sorted_x[hi] - sorted_x[lo])
        }
    }
}

/// Arithmetic mean; NaN for an empty slice
pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Sample standard deviation (n - 1 denominator); NaN below two values
pub fn sd(values: &[f64]) -> f64 {
    let n = values.len();
    if n < 2 {
        return f64::NAN;
    }
    let m = mean(values);
    let ss: f64 = values.iter().map(|&x| (x - m).powi(2)).sum();
    (ss / (n as f64 - 1.0)).sqrt()
}

/// Mean after dropping `trim` of the sorted values from each end
pub fn trimmed_mean(values: &[f64], trim: f64) -> f64 {
    let v = sorted_finite(values);
    if v.is_empty() {
        return f64::NAN;
    }
    let cut = ((v.len() as f64) * trim.clamp(0.0, 0.5)).floor() as usize;
    let kept = &v[cut..v.len() - cut];
    if kept.is_empty() {
        mean(&v)
    } else {
        mean(kept)
    }
}

/// Trigamma function psi'(x) for x > 0.
///
/// Recurrence up to x >= 8, then the asymptotic series.
pub fn trigamma(x: f64) -> f64 {
    if x <= 0.0 || !x.is_finite() {
        return f64::NAN;
    }
    let mut acc = 0.0;
    let mut z = x;
    while z < 8.0 {
        acc += 1.0 / (z * z);
        z += 1.0;
    }
    let z2 = z * z;
    acc + 1.0 / z + 0.5 / z2 + 1.0 / (6.0 * z2 * z) - 1.0 / (30.0 * z2 * z2 * z)
        + 1.0 / (42.0 * z2 * z2 * z2 * z)
}
