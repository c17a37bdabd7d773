//! Negative binomial GLM with Wald tests and BH adjustment

use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};

use super::{to_optional, EffectEstimator};
use crate::design::DesignMatrix;
use crate::dispersion::{estimate_dispersions, DispersionEstimates, DispersionFit, DispersionParams};
use crate::error::{Result, SimError};
use crate::filter::independent_filtering;
use crate::glm::GlmFitParams;
use crate::normalization::{estimate_size_factors_with_fallback, SizeFactorMethod};
use crate::testing::{benjamini_hochberg, wald_test, WaldResults};

/// Size factors, dispersions, GLM fits, Wald tests, then BH (optionally after
/// independent filtering on base means).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NbWaldEstimator {
    pub fit: DispersionFit,
    pub dispersion: DispersionParams,
    #[serde(skip)]
    pub glm: GlmFitParams,
    pub independent_filtering: bool,
    /// Target FDR used to choose the filtering cutoff
    pub alpha: f64,
}

impl Default for NbWaldEstimator {
    fn default() -> Self {
        Self {
            fit: DispersionFit::Parametric,
            dispersion: DispersionParams::default(),
            glm: GlmFitParams::default(),
            independent_filtering: true,
            alpha: 0.1,
        }
    }
}

/// Every intermediate of one estimator run
#[derive(Debug, Clone)]
pub struct NbWaldFit {
    pub size_factors: Array1<f64>,
    pub size_factor_method: SizeFactorMethod,
    pub dispersions: DispersionEstimates,
    pub wald: WaldResults,
    /// NaN where no adjusted p-value exists
    pub padj: Vec<f64>,
}

impl NbWaldEstimator {
    pub fn new(fit: DispersionFit, independent_filtering: bool) -> Self {
        Self {
            fit,
            independent_filtering,
            ..Self::default()
        }
    }

    pub fn with_alpha(mut self, alpha: f64) -> Self {
        self.alpha = alpha;
        self
    }

    /// Run the full pipeline and keep the intermediates
    pub fn fit(&self, counts: &Array2<f64>, design: &DesignMatrix, coef: usize) -> Result<NbWaldFit> {
        let (n_features, n_samples) = counts.dim();
        if n_features == 0 {
            return Err(SimError::EmptyData {
                reason: "count matrix has no features".to_string(),
            });
        }
        if n_samples != design.n_samples() {
            return Err(SimError::DimensionMismatch {
                expected: format!("{} samples in design", design.n_samples()),
                got: format!("{} count columns", n_samples),
            });
        }

        let (size_factors, size_factor_method) = estimate_size_factors_with_fallback(counts.view())?;
        let dispersions = estimate_dispersions(
            counts.view(),
            &size_factors,
            design.matrix(),
            self.fit,
            &self.dispersion,
        )?;
        let wald = wald_test(
            counts.view(),
            &size_factors,
            design.matrix(),
            &dispersions.dispersions,
            coef,
            &self.glm,
        )?;

        let padj = if self.independent_filtering {
            independent_filtering(&wald.pvalues, &wald.base_means, self.alpha).padj
        } else {
            benjamini_hochberg(&wald.pvalues)
        };

        log::trace!(
            "{} features: size factors by {:?}, trend {}, {} dispersion outliers",
            n_features,
            size_factor_method,
            dispersions.fit_used,
            dispersions.n_outliers
        );

        Ok(NbWaldFit {
            size_factors,
            size_factor_method,
            dispersions,
            wald,
            padj,
        })
    }
}

impl EffectEstimator for NbWaldEstimator {
    fn name(&self) -> &str {
        "nb_wald"
    }

    fn adjusted_pvalues(
        &self,
        counts: &Array2<f64>,
        design: &DesignMatrix,
        coef: usize,
    ) -> Result<Vec<Option<f64>>> {
        self.fit(counts, design, coef).map(|fit| to_optional(&fit.padj))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::design::{Encoding, SampleLayout};
    use crate::rng::cell_rng;
    use crate::simulate::{
        AffectedCoefficients, Assignment, CountSimulator, EmissionModel, GammaPrior, MeanGenerator,
        SignalStyle, SizePolicy,
    };

    fn simulated(n_features: usize, n_signal: usize) -> (Array2<f64>, DesignMatrix, Assignment) {
        let layout = SampleLayout::balanced(2, 12).unwrap();
        let design = DesignMatrix::build(&layout, Encoding::ZeroOne).unwrap();
        let mut rng = cell_rng(11, 0, 0);
        let assignment = Assignment::generate(n_features, n_signal, SignalStyle::Unsigned, &mut rng).unwrap();
        let generator = MeanGenerator::new(
            GammaPrior::new(2.0, 0.05).unwrap(),
            AffectedCoefficients::Single(3),
        )
        .unwrap();
        let means = generator.generate(&design, &assignment, &mut rng).unwrap();
        let simulator = CountSimulator::new(EmissionModel::NegativeBinomial {
            size: SizePolicy::Constant(10.0),
        })
        .unwrap();
        let counts = simulator.simulate(&means.means, 0.0, &mut rng).unwrap();
        (counts, design, assignment)
    }

    #[test]
    fn test_one_pvalue_per_feature() {
        let (counts, design, _) = simulated(200, 20);
        let estimator = NbWaldEstimator::new(DispersionFit::Local, true);
        let padj = estimator.adjusted_pvalues(&counts, &design, 3).unwrap();
        assert_eq!(padj.len(), 200);
        assert!(padj.iter().flatten().all(|&q| (0.0..=1.0).contains(&q)));
    }

    #[test]
    fn test_strong_interaction_detected() {
        let (mut counts, design, _) = simulated(300, 30);
        // Samples 9..12 form the (1, 1) cell, eight times the other three cells
        let profile = [100.0, 110.0, 90.0];
        for i in 0..12 {
            let scale = if i >= 9 { 8.0 } else { 1.0 };
            counts[[0, i]] = profile[i % 3] * scale;
        }
        let estimator = NbWaldEstimator::new(DispersionFit::Local, false);
        let fit = estimator.fit(&counts, &design, 3).unwrap();
        assert!(fit.wald.coefficients[0] > 1.0);
        assert!(fit.wald.pvalues[0] < 1e-3, "p = {}", fit.wald.pvalues[0]);
        assert_eq!(fit.padj.len(), 300);
    }

    #[test]
    fn test_all_zero_feature_has_no_pvalue() {
        let (mut counts, design, _) = simulated(100, 10);
        counts.row_mut(5).fill(0.0);
        let padj = NbWaldEstimator::default()
            .adjusted_pvalues(&counts, &design, 3)
            .unwrap();
        assert_eq!(padj[5], None);
    }

    #[test]
    fn test_sample_mismatch() {
        let (counts, _, _) = simulated(50, 5);
        let layout = SampleLayout::balanced(2, 8).unwrap();
        let small = DesignMatrix::build(&layout, Encoding::ZeroOne).unwrap();
        let result = NbWaldEstimator::default().adjusted_pvalues(&counts, &small, 3);
        assert!(matches!(result, Err(SimError::DimensionMismatch { .. })));
    }
}
