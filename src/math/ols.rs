//! Weighted least squares building blocks.
//!
//! Both fit paths end up solving small dense least-squares systems:
//!
//! ```text
//! minimize Σ w_i (y_i - M_i · c)^2
//! ```
//!
//! Implementation choices:
//! - Weights are applied by scaling rows of `M` and `y` by `sqrt(w_i)`, which
//!   turns the weighted problem into an ordinary one.
//! - The ordinary problem is solved with SVD, which handles tall matrices and
//!   nearly collinear columns (overlapping peaks produce those).

use nalgebra::{DMatrix, DVector};

use crate::error::{FitError, Result};

/// Solve a least squares problem using SVD.
///
/// Returns `None` if the system is too ill-conditioned to solve robustly.
pub fn solve_least_squares(x: &DMatrix<f64>, y: &DVector<f64>) -> Option<DVector<f64>> {
    let svd = x.clone().svd(true, true);

    // Progressively looser singular-value cutoffs.
    for &tol in &[1e-10, 1e-8, 1e-6] {
        if let Ok(beta) = svd.solve(y, tol) {
            if beta.iter().all(|v| v.is_finite()) {
                return Some(beta);
            }
        }
    }

    None
}

/// Row-scale `m` and `y` by `sqrt(weights)`.
///
/// `None` weights return plain copies.
pub fn weighted_system(
    m: &DMatrix<f64>,
    y: &[f64],
    weights: Option<&[f64]>,
) -> Result<(DMatrix<f64>, DVector<f64>)> {
    if y.len() != m.nrows() {
        return Err(FitError::ShapeMismatch {
            what: "spectrum",
            got: y.len(),
            expected: m.nrows(),
        });
    }
    let mut mw = m.clone();
    let mut yw = DVector::from_column_slice(y);
    let Some(w) = weights else {
        return Ok((mw, yw));
    };
    if w.len() != y.len() {
        return Err(FitError::ShapeMismatch {
            what: "weights",
            got: w.len(),
            expected: y.len(),
        });
    }
    for (i, &wi) in w.iter().enumerate() {
        if !(wi.is_finite() && wi >= 0.0) {
            return Err(FitError::NonFinite("weights".into()));
        }
        let sw = wi.sqrt();
        for j in 0..mw.ncols() {
            mw[(i, j)] *= sw;
        }
        yw[i] *= sw;
    }
    Ok((mw, yw))
}
