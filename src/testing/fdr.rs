//! Benjamini-Hochberg adjustment

/// Benjamini-Hochberg adjusted p-values.
///
/// NaN p-values stay NaN and do not count toward the number of tests.
pub fn benjamini_hochberg(pvalues: &[f64]) -> Vec<f64> {
    let n = pvalues.len();
    let mut order: Vec<usize> = (0..n).filter(|&i| pvalues[i].is_finite()).collect();
    let m = order.len();
    let mut padj = vec![f64::NAN; n];
    if m == 0 {
        return padj;
    }

    order.sort_by(|&a, &b| pvalues[a].total_cmp(&pvalues[b]));

    // Step up from the largest p-value, keeping the running minimum
    let mut cummin = f64::INFINITY;
    for (rank, &i) in order.iter().enumerate().rev() {
        let adj = (pvalues[i] * m as f64 / (rank + 1) as f64).min(1.0);
        cummin = cummin.min(adj);
        padj[i] = cummin;
    }
    padj
}
