//! Fixed-effects design matrices for balanced two-level factorial layouts
//!
//! Columns are ordered intercept, main effects, then every pairwise interaction
//! (elementwise product of the two main-effect columns).

mod layout;

pub use layout::{Encoding, SampleLayout};

use ndarray::{Array2, Axis};

use crate::error::{Result, SimError};

/// N x P design matrix with named columns
#[derive(Debug, Clone)]
pub struct DesignMatrix {
    matrix: Array2<f64>,
    column_names: Vec<String>,
    n_factors: usize,
    encoding: Encoding,
}

impl DesignMatrix {
    /// Build the intercept + main effects + pairwise interaction design.
    ///
    /// Fails with `InvalidDesignMatrix` if the resulting columns are collinear,
    /// which can only happen for explicit (unbalanced) layouts.
    pub fn build(layout: &SampleLayout, encoding: Encoding) -> Result<Self> {
        let n = layout.n_samples();
        let k = layout.n_factors();
        let pairs: Vec<(usize, usize)> = (0..k)
            .flat_map(|a| ((a + 1)..k).map(move |b| (a, b)))
            .collect();
        let p = 1 + k + pairs.len();

        let mut matrix = Array2::zeros((n, p));
        let mut column_names = Vec::with_capacity(p);
        column_names.push("intercept".to_string());
        for f in 0..k {
            column_names.push(factor_name(f));
        }
        for &(a, b) in &pairs {
            column_names.push(format!("{}:{}", factor_name(a), factor_name(b)));
        }

        for i in 0..n {
            matrix[[i, 0]] = 1.0;
            for f in 0..k {
                matrix[[i, 1 + f]] = encoding.encode(layout.level(i, f));
            }
            for (c, &(a, b)) in pairs.iter().enumerate() {
                matrix[[i, 1 + k + c]] = matrix[[i, 1 + a]] * matrix[[i, 1 + b]];
            }
        }

        let design = Self {
            matrix,
            column_names,
            n_factors: k,
            encoding,
        };
        design.check_full_rank()?;

        log::debug!(
            "Design matrix: {} samples x {} columns ({:?} encoding): {}",
            n,
            p,
            encoding,
            design.column_names.join(", ")
        );

        Ok(design)
    }

    /// Wrap an arbitrary matrix, validating names and rank
    pub fn from_matrix(matrix: Array2<f64>, column_names: Vec<String>) -> Result<Self> {
        if column_names.len() != matrix.ncols() {
            return Err(SimError::DimensionMismatch {
                expected: format!("{} column names", matrix.ncols()),
                got: format!("{}", column_names.len()),
            });
        }
        let design = Self {
            matrix,
            column_names,
            n_factors: 0,
            encoding: Encoding::ZeroOne,
        };
        design.check_full_rank()?;
        Ok(design)
    }

    pub fn matrix(&self) -> &Array2<f64> {
        &self.matrix
    }

    pub fn column_names(&self) -> &[String] {
        &self.column_names
    }

    pub fn n_samples(&self) -> usize {
        self.matrix.nrows()
    }

    pub fn n_coefs(&self) -> usize {
        self.matrix.ncols()
    }

    pub fn n_factors(&self) -> usize {
        self.n_factors
    }

    pub fn encoding(&self) -> Encoding {
        self.encoding
    }

    /// Index of the first pairwise interaction column, if the layout has one
    pub fn interaction_column(&self) -> Option<usize> {
        self.column_names.iter().position(|name| name.contains(':'))
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.column_names.iter().position(|c| c == name)
    }

    /// Copy of the matrix with one column removed
    pub fn without_column(&self, idx: usize) -> Array2<f64> {
        if idx >= self.n_coefs() {
            return self.matrix.clone();
        }
        self.matrix.select(
            Axis(1),
            &(0..self.n_coefs()).filter(|&j| j != idx).collect::<Vec<_>>(),
        )
    }

    /// Check that the design matrix has full column rank
    pub fn check_full_rank(&self) -> Result<()> {
        let ncol = self.matrix.ncols();
        if self.matrix.nrows() < ncol {
            return Err(SimError::InvalidDesignMatrix {
                reason: format!(
                    "{} samples cannot identify {} coefficients",
                    self.matrix.nrows(),
                    ncol
                ),
            });
        }

        let rank = qr_rank(&self.matrix);
        if rank < ncol {
            let zero_column = (0..ncol).find(|&j| self.matrix.column(j).iter().all(|&v| v == 0.0));
            let reason = match zero_column {
                Some(j) => format!(
                    "column '{}' is all zeros; some factor combinations have no samples",
                    self.column_names[j]
                ),
                None => format!(
                    "rank {} < {} columns; some terms are linear combinations of the others",
                    rank, ncol
                ),
            };
            return Err(SimError::InvalidDesignMatrix { reason });
        }
        Ok(())
    }
}

fn factor_name(f: usize) -> String {
    format!("factor{}", f + 1)
}

/// Numerical rank via Householder QR with column pivoting.
///
/// Counts diagonal entries of R above `max(nrow, ncol) * eps * max|diag(R)|`.
fn qr_rank(matrix: &Array2<f64>) -> usize {
    let (nrow, ncol) = matrix.dim();
    let k = nrow.min(ncol);
    let mut r = matrix.to_owned();
    let mut norms: Vec<f64> = (0..ncol)
        .map(|j| r.column(j).iter().map(|&v| v * v).sum())
        .collect();

    for step in 0..k {
        let pivot = (step..ncol)
            .max_by(|&a, &b| norms[a].total_cmp(&norms[b]))
            .unwrap_or(step);
        if pivot != step {
            for i in 0..nrow {
                r.swap([i, step], [i, pivot]);
            }
            norms.swap(step, pivot);
        }

        let sigma: f64 = (step..nrow).map(|i| r[[i, step]].powi(2)).sum::<f64>().sqrt();
        if sigma < f64::EPSILON * 1e3 {
            break;
        }
        let alpha = if r[[step, step]] > 0.0 { -sigma } else { sigma };

        // Householder vector v = x - alpha e1, kept in a scratch buffer
        let mut v: Vec<f64> = (step..nrow).map(|i| r[[i, step]]).collect();
        v[0] -= alpha;
        let v_norm_sq: f64 = v.iter().map(|x| x * x).sum();
        if v_norm_sq < f64::MIN_POSITIVE {
            continue;
        }
        let tau = 2.0 / v_norm_sq;

        for j in step..ncol {
            let dot: f64 = v
                .iter()
                .enumerate()
                .map(|(o, &vi)| vi * r[[step + o, j]])
                .sum();
            for (o, &vi) in v.iter().enumerate() {
                r[[step + o, j]] -= tau * dot * vi;
            }
        }

        for j in (step + 1)..ncol {
            norms[j] = (norms[j] - r[[step, j]].powi(2)).max(0.0);
        }
    }

    let max_diag = (0..k).map(|i| r[[i, i]].abs()).fold(0.0f64, f64::max);
    let tol = nrow.max(ncol) as f64 * f64::EPSILON * max_diag;
    (0..k).filter(|&i| r[[i, i]].abs() > tol).count()
}
