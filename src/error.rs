//! Error types for rust_fdrsim

use thiserror::Error;

/// Main error type for simulation and estimation
#[derive(Error, Debug)]
pub enum SimError {
    #[error("Invalid configuration: {reason}")]
    InvalidConfig { reason: String },

    #[error("Invalid hyperparameter {name}={value}: {reason}")]
    InvalidHyperparameter {
        name: String,
        value: f64,
        reason: String,
    },

    #[error("Dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: String, got: String },

    #[error("Invalid design matrix: {reason}")]
    InvalidDesignMatrix { reason: String },

    #[error("Degenerate mean for feature {feature}: {reason}")]
    DegenerateMean { feature: usize, reason: String },

    #[error("Empty data: {reason}")]
    EmptyData { reason: String },

    #[error("Size factor estimation failed: {reason}")]
    SizeFactorFailed { reason: String },

    #[error("Trend fitting failed: {reason}")]
    TrendFittingFailed { reason: String },

    #[error("Dispersion estimation failed: {reason}")]
    DispersionEstimationFailed { reason: String },

    #[error("GLM convergence failed for feature {feature}: {reason}")]
    GLMConvergenceFailed { feature: usize, reason: String },

    #[error("Invalid result table at line {line}: {reason}")]
    InvalidResultTable { line: usize, reason: String },

    #[error("Study cancelled after {completed} of {total} cells")]
    Cancelled { completed: usize, total: usize },

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),


    #[error("JSON parsing error: {0}")]
    JsonError(#[from] serde_json::Error),
}

impl SimError {
    /// Whether the error only invalidates one (repetition, delta) cell.
    ///
    /// The driver logs and skips recoverable cells; anything else aborts the study.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            SimError::DegenerateMean { .. }
                | SimError::EmptyData { .. }
                | SimError::SizeFactorFailed { .. }
                | SimError::TrendFittingFailed { .. }
                | SimError::DispersionEstimationFailed { .. }
                | SimError::GLMConvergenceFailed { .. }
        )
    }
}

/// Result type alias for rust_fdrsim operations
pub type Result<T> = std::result::Result<T, SimError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recoverable_classification() {
        let trend = SimError::TrendFittingFailed {
            reason: "no points".to_string(),
        };
        assert!(trend.is_recoverable());

        let config = SimError::InvalidConfig {
            reason: "reps must be positive".to_string(),
        };
        assert!(!config.is_recoverable());

        let cancelled = SimError::Cancelled {
            completed: 1,
            total: 4,
        };
        assert!(!cancelled.is_recoverable());
    }

    #[test]
    fn test_error_messages() {
        let e = SimError::InvalidHyperparameter {
            name: "gamma_shape".to_string(),
            value: -1.0,
            reason: "must be positive".to_string(),
        };
        assert_eq!(
            e.to_string(),
            "Invalid hyperparameter gamma_shape=-1: must be positive"
        );
    }
}
