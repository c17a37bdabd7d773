//! Small dense symmetric solvers for p x p normal equations
//!
//! Matrices are flat row-major slices; p is the number of design columns,
//! so everything here is O(p^3) on tiny matrices.

/// Cholesky factor L (row-major, lower triangle) of a symmetric matrix.
///
/// Non-positive pivots are replaced by a tiny jitter so near-singular
/// systems still produce a finite (heavily regularized) solution.
fn cholesky(a: &[f64], n: usize) -> Vec<f64> {
    let mut l = vec![0.0; n * n];
    for i in 0..n {
        for j in 0..=i {
            let mut sum = a[i * n + j];
            for k in 0..j {
                sum -= l[i * n + k] * l[j * n + k];
            }
            if i == j {
                l[i * n + i] = if sum > 0.0 { sum.sqrt() } else { 1e-6 };
            } else {
                l[i * n + j] = sum / l[j * n + j];
            }
        }
    }
    l
}

fn cholesky_solve(l: &[f64], b: &[f64], n: usize) -> Vec<f64> {
    let mut y = vec![0.0; n];
    for i in 0..n {
        let mut sum = b[i];
        for j in 0..i {
            sum -= l[i * n + j] * y[j];
        }
        y[i] = sum / l[i * n + i];
    }
    let mut x = vec![0.0; n];
    for i in (0..n).rev() {
        let mut sum = y[i];
        for j in (i + 1)..n {
            sum -= l[j * n + i] * x[j];
        }
        x[i] = sum / l[i * n + i];
    }
    x
}

/// Solve A x = b for symmetric positive (semi)definite A
pub fn solve_symmetric(a: &[f64], b: &[f64], n: usize) -> Vec<f64> {
    let l = cholesky(a, n);
    cholesky_solve(&l, b, n)
}

/// Inverse of a symmetric positive definite matrix
pub fn invert_symmetric(a: &[f64], n: usize) -> Vec<f64> {
    let l = cholesky(a, n);
    let mut inv = vec![0.0; n * n];
    let mut e = vec![0.0; n];
    for col in 0..n {
        e.iter_mut().for_each(|v| *v = 0.0);
        e[col] = 1.0;
        let x = cholesky_solve(&l, &e, n);
        for row in 0..n {
            inv[row * n + col] = x[row];
        }
    }
    inv
}

/// log det(A) for symmetric positive definite A; None if A is not positive definite
pub fn log_det_symmetric(a: &[f64], n: usize) -> Option<f64> {
    let mut l = vec![0.0; n * n];
    let mut log_det = 0.0;
    for i in 0..n {
        for j in 0..=i {
            let mut sum = a[i * n + j];
            for k in 0..j {
                sum -= l[i * n + k] * l[j * n + k];
            }
            if i == j {
                if sum <= 0.0 {
                    return None;
                }
                l[i * n + i] = sum.sqrt();
                log_det += sum.ln();
            } else {
                l[i * n + j] = sum / l[j * n + j];
            }
        }
    }
    Some(log_det)
}

/// X' diag(w) X for an n x p design stored in an ndarray
pub fn weighted_gram(design: &ndarray::Array2<f64>, weights: &[f64]) -> Vec<f64> {
    let p = design.ncols();
    let mut xtwx = vec![0.0; p * p];
    for (i, row) in design.outer_iter().enumerate() {
        let w = weights[i];
        for j in 0..p {
            let wj = w * row[j];
            for k in 0..=j {
                xtwx[j * p + k] += wj * row[k];
            }
        }
    }
    for j in 0..p {
        for k in 0..j {
            xtwx[k * p + j] = xtwx[j * p + k];
        }
    }
    xtwx
}
