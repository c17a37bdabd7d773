//! Per-feature truth labels

use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::{Result, SimError};

/// True effect carried by one feature on the coefficients under test
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeatureEffect {
    /// Affected coefficients are forced to zero
    NoEffect,
    /// Affected coefficients are multiplied by the scale (> 0)
    PositiveEffect(f64),
    /// Affected coefficients are multiplied by the scale (> 0, usually < 1)
    NegativeEffect(f64),
}

impl FeatureEffect {
    pub fn is_null(&self) -> bool {
        matches!(self, FeatureEffect::NoEffect)
    }

    /// Multiplier applied to affected coefficients
    pub fn scale(&self) -> f64 {
        match *self {
            FeatureEffect::NoEffect => 0.0,
            FeatureEffect::PositiveEffect(s) | FeatureEffect::NegativeEffect(s) => s,
        }
    }
}

/// How signal features are labelled when an assignment is generated
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SignalStyle {
    /// Every signal feature keeps its prior draw (`PositiveEffect(1.0)`)
    Unsigned,
    /// Signal features alternate between up and down scaling
    Signed { up_scale: f64, down_scale: f64 },
}

/// Truth labels for all features of one experiment
#[derive(Debug, Clone, PartialEq)]
pub struct Assignment {
    effects: Vec<FeatureEffect>,
}

impl Assignment {
    pub fn new(effects: Vec<FeatureEffect>) -> Result<Self> {
        for (j, effect) in effects.iter().enumerate() {
            let s = effect.scale();
            if !effect.is_null() && !(s.is_finite() && s > 0.0) {
                return Err(SimError::InvalidHyperparameter {
                    name: format!("effect scale of feature {}", j),
                    value: s,
                    reason: "must be positive and finite".to_string(),
                });
            }
        }
        Ok(Self { effects })
    }

    /// Every feature truly null
    pub fn all_null(n_features: usize) -> Self {
        Self {
            effects: vec![FeatureEffect::NoEffect; n_features],
        }
    }

    /// Randomly place `n_signal` signal features among `n_features`.
    ///
    /// Called once per experiment; the labels are reused for every repetition.
    pub fn generate<R: Rng + ?Sized>(
        n_features: usize,
        n_signal: usize,
        style: SignalStyle,
        rng: &mut R,
    ) -> Result<Self> {
        if n_signal > n_features {
            return Err(SimError::InvalidConfig {
                reason: format!(
                    "n_signal ({}) exceeds n_features ({})",
                    n_signal, n_features
                ),
            });
        }

        let mut order: Vec<usize> = (0..n_features).collect();
        order.shuffle(rng);

        let mut effects = vec![FeatureEffect::NoEffect; n_features];
        for (k, &j) in order.iter().take(n_signal).enumerate() {
            effects[j] = match style {
                SignalStyle::Unsigned => FeatureEffect::PositiveEffect(1.0),
                SignalStyle::Signed { up_scale, .. } if k % 2 == 0 => {
                    FeatureEffect::PositiveEffect(up_scale)
                }
                SignalStyle::Signed { down_scale, .. } => FeatureEffect::NegativeEffect(down_scale),
            };
        }

        Self::new(effects)
    }

    pub fn effects(&self) -> &[FeatureEffect] {
        &self.effects
    }

    pub fn len(&self) -> usize {
        self.effects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.effects.is_empty()
    }

    pub fn is_null(&self, feature: usize) -> bool {
        self.effects[feature].is_null()
    }

    /// Mask of truly null features, indexed by feature
    pub fn null_mask(&self) -> Vec<bool> {
        self.effects.iter().map(|e| e.is_null()).collect()
    }

    pub fn n_null(&self) -> usize {
        self.effects.iter().filter(|e| e.is_null()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rng::experiment_rng;

    #[test]
    fn test_generate_counts() {
        let mut rng = experiment_rng(1);
        let a = Assignment::generate(100, 30, SignalStyle::Unsigned, &mut rng).unwrap();
        assert_eq!(a.len(), 100);
        assert_eq!(a.n_null(), 70);
    }

    #[test]
    fn test_generate_signed() {
        let mut rng = experiment_rng(2);
        let style = SignalStyle::Signed {
            up_scale: 3.0,
            down_scale: 0.25,
        };
        let a = Assignment::generate(50, 20, style, &mut rng).unwrap();
        let up = a
            .effects()
            .iter()
            .filter(|e| matches!(e, FeatureEffect::PositiveEffect(s) if *s == 3.0))
            .count();
        let down = a
            .effects()
            .iter()
            .filter(|e| matches!(e, FeatureEffect::NegativeEffect(s) if *s == 0.25))
            .count();
        assert_eq!(up, 10);
        assert_eq!(down, 10);
        assert_eq!(a.n_null(), 30);
    }

    #[test]
    fn test_generate_reproducible() {
        let a = Assignment::generate(40, 10, SignalStyle::Unsigned, &mut experiment_rng(9)).unwrap();
        let b = Assignment::generate(40, 10, SignalStyle::Unsigned, &mut experiment_rng(9)).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_too_many_signal_features() {
        let mut rng = experiment_rng(3);
        assert!(Assignment::generate(5, 6, SignalStyle::Unsigned, &mut rng).is_err());
    }

    #[test]
    fn test_invalid_scale_rejected() {
        let result = Assignment::new(vec![FeatureEffect::PositiveEffect(-2.0)]);
        assert!(result.is_err());
    }
}
