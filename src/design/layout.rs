//! Sample layouts and covariate encodings

use serde::{Deserialize, Serialize};

use crate::error::{Result, SimError};

/// How a two-level factor is written into the design matrix
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Encoding {
    /// Levels encoded as 0 / 1 (treatment coding)
    ZeroOne,
    /// Levels encoded as -1 / +1 (sum coding)
    Symmetric,
}

impl Encoding {
    pub fn encode(self, level: u8) -> f64 {
        match (self, level) {
            (Encoding::ZeroOne, 0) => 0.0,
            (Encoding::ZeroOne, _) => 1.0,
            (Encoding::Symmetric, 0) => -1.0,
            (Encoding::Symmetric, _) => 1.0,
        }
    }

    /// True when every encoded entry is non-negative
    pub fn is_non_negative(self) -> bool {
        matches!(self, Encoding::ZeroOne)
    }
}

impl Default for Encoding {
    fn default() -> Self {
        Encoding::ZeroOne
    }
}

/// Per-sample factor levels for a two-level factorial experiment
#[derive(Debug, Clone, PartialEq)]
pub struct SampleLayout {
    levels: Vec<Vec<u8>>,
    n_factors: usize,
}

impl SampleLayout {
    /// Balanced full factorial: every one of the 2^k level combinations gets
    /// `n_samples / 2^k` consecutive samples. Factor 1 varies slowest.
    pub fn balanced(n_factors: usize, n_samples: usize) -> Result<Self> {
        if n_factors == 0 || n_factors > 8 {
            return Err(SimError::InvalidDesignMatrix {
                reason: format!("n_factors must be in 1..=8, got {}", n_factors),
            });
        }
        let n_cells = 1usize << n_factors;
        if n_samples == 0 || n_samples % n_cells != 0 {
            return Err(SimError::InvalidDesignMatrix {
                reason: format!(
                    "{} samples cannot be split evenly across {} factor combinations",
                    n_samples, n_cells
                ),
            });
        }
        let replicates = n_samples / n_cells;

        let levels = (0..n_samples)
            .map(|i| {
                let cell = i / replicates;
                (0..n_factors)
                    .map(|f| ((cell >> (n_factors - 1 - f)) & 1) as u8)
                    .collect()
            })
            .collect();

        Ok(Self { levels, n_factors })
    }

    /// Explicit per-sample levels (each inner vector holds one 0/1 level per factor)
    pub fn from_levels(levels: Vec<Vec<u8>>) -> Result<Self> {
        let n_factors = levels.first().map(|l| l.len()).unwrap_or(0);
        if levels.is_empty() || n_factors == 0 {
            return Err(SimError::InvalidDesignMatrix {
                reason: "layout has no samples or no factors".to_string(),
            });
        }
        if let Some((i, row)) = levels.iter().enumerate().find(|(_, l)| l.len() != n_factors) {
            return Err(SimError::DimensionMismatch {
                expected: format!("{} levels for sample {}", n_factors, i),
                got: format!("{}", row.len()),
            });
        }
        if levels.iter().flatten().any(|&l| l > 1) {
            return Err(SimError::InvalidDesignMatrix {
                reason: "factor levels must be 0 or 1".to_string(),
            });
        }
        Ok(Self { levels, n_factors })
    }

    pub fn n_samples(&self) -> usize {
        self.levels.len()
    }

    pub fn n_factors(&self) -> usize {
        self.n_factors
    }

    /// Level (0 or 1) of `factor` for `sample`
    pub fn level(&self, sample: usize, factor: usize) -> u8 {
        self.levels[sample][factor]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_balanced_layout_order() {
        let layout = SampleLayout::balanced(2, 8).unwrap();
        let cells: Vec<(u8, u8)> = (0..8)
            .map(|i| (layout.level(i, 0), layout.level(i, 1)))
            .collect();
        assert_eq!(
            cells,
            vec![(0, 0), (0, 0), (0, 1), (0, 1), (1, 0), (1, 0), (1, 1), (1, 1)]
        );
    }

    #[test]
    fn test_balanced_layout_rejects_uneven() {
        assert!(SampleLayout::balanced(2, 10).is_err());
        assert!(SampleLayout::balanced(0, 8).is_err());
    }

    #[test]
    fn test_from_levels_validation() {
        assert!(SampleLayout::from_levels(vec![vec![0, 1], vec![1]]).is_err());
        assert!(SampleLayout::from_levels(vec![vec![2]]).is_err());
        assert!(SampleLayout::from_levels(vec![vec![0], vec![1]]).is_ok());
    }

    #[test]
    fn test_encoding() {
        assert_eq!(Encoding::ZeroOne.encode(0), 0.0);
        assert_eq!(Encoding::Symmetric.encode(0), -1.0);
        assert_eq!(Encoding::Symmetric.encode(1), 1.0);
        assert!(Encoding::ZeroOne.is_non_negative());
    }
}
