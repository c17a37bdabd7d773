//! Differential-effect estimators applied to each simulated count matrix
//!
//! The study driver only needs adjusted p-values per feature; anything that
//! produces them from a count matrix and a design can be plugged in.

mod nb_wald;

pub use nb_wald::{NbWaldEstimator, NbWaldFit};

use ndarray::Array2;

use crate::design::DesignMatrix;
use crate::error::Result;

/// Produces one adjusted p-value per feature for a tested design column.
///
/// `None` marks a feature with no p-value (all-zero counts, removed by
/// filtering, or an untestable fit); it is never counted as rejected.
pub trait EffectEstimator: Send + Sync {
    fn name(&self) -> &str;

    /// `counts` is features x samples; `coef` indexes a column of `design`
    fn adjusted_pvalues(
        &self,
        counts: &Array2<f64>,
        design: &DesignMatrix,
        coef: usize,
    ) -> Result<Vec<Option<f64>>>;
}

/// Map NaN-coded adjusted p-values to optional values
pub fn to_optional(padj: &[f64]) -> Vec<Option<f64>> {
    padj.iter()
        .map(|&q| if q.is_finite() { Some(q) } else { None })
        .collect()
}
