//! Non-negative least squares (Lawson–Hanson active set).
//!
//! Solves `min ||A·x − b||₂` subject to `x ≥ 0`. Columns enter the passive set
//! one at a time (largest positive gradient first); whenever the unconstrained
//! solve on the passive set produces a non-positive entry, the iterate is moved
//! back along the segment until the first coefficient hits zero and that column
//! leaves the set again. A column whose own coefficient comes out non-positive
//! right after entering is set aside until the iterate moves.
//!
//! The inner unconstrained solve is [`solve_least_squares`].

use nalgebra::{DMatrix, DVector};
use tracing::debug;

use crate::error::{FitError, Result};
use crate::math::ols::{solve_least_squares, weighted_system};

/// Coefficients and the Euclidean residual of the solved system.
#[derive(Debug, Clone, PartialEq)]
pub struct NnlsSolution {
    pub coefficients: DVector<f64>,
    /// `||A·x − b||₂` of the system actually solved (weighted if weights were given).
    pub residual: f64,
    pub iterations: usize,
}

/// Solve `min ||a·x − b||` with `x ≥ 0`.
pub fn nnls(a: &DMatrix<f64>, b: &DVector<f64>) -> Result<NnlsSolution> {
    let (m, n) = a.shape();
    if b.len() != m {
        return Err(FitError::ShapeMismatch {
            what: "nnls target",
            got: b.len(),
            expected: m,
        });
    }
    if a.iter().chain(b.iter()).any(|v| !v.is_finite()) {
        return Err(FitError::NonFinite("nnls input".into()));
    }

    // `tol` only gates which columns may enter; coefficients are tested against 0.
    let max_iter = 5 * n.max(1) + 10;
    let tol = 10.0 * f64::EPSILON * a.abs().row_sum().max() * (m.max(n) as f64);

    let mut x = DVector::<f64>::zeros(n);
    let mut passive = vec![false; n];
    // columns whose entry made no progress at the current x
    let mut rejected = vec![false; n];
    let mut iterations = 0;

    loop {
        let w = a.transpose() * (b - a * &x);
        let entering = (0..n)
            .filter(|&j| !passive[j] && !rejected[j] && w[j] > tol)
            .max_by(|&i, &j| w[i].total_cmp(&w[j]));
        let Some(t) = entering else {
            break;
        };
        passive[t] = true;

        let mut s = solve_passive(a, b, &passive)?;
        if s[t] <= 0.0 {
            // rounding: the gradient says t helps, the solve disagrees
            passive[t] = false;
            rejected[t] = true;
            continue;
        }

        loop {
            iterations += 1;
            if iterations > max_iter {
                return Err(FitError::NnlsFailed(format!(
                    "no convergence within {max_iter} iterations"
                )));
            }

            let blocking = (0..n)
                .filter(|&j| passive[j] && s[j] <= 0.0)
                .map(|j| (x[j] / (x[j] - s[j]), j))
                .min_by(|p, q| p.0.total_cmp(&q.0));
            let Some((alpha, k)) = blocking else {
                x = s;
                break;
            };

            let step = (&s - &x) * alpha;
            x += step;
            x[k] = 0.0;
            passive[k] = false;
            for j in 0..n {
                if passive[j] && x[j] <= 0.0 {
                    passive[j] = false;
                    x[j] = 0.0;
                }
            }
            s = solve_passive(a, b, &passive)?;
        }
        rejected.fill(false);
    }

    let residual = (a * &x - b).norm();
    debug!(columns = n, iterations, residual, "nnls solved");
    Ok(NnlsSolution {
        coefficients: x,
        residual,
        iterations,
    })
}

/// NNLS on a basis matrix, optionally weighted by row-scaling with `sqrt(w)`.
pub fn nnls_fit(
    spectrum: &[f64],
    basis: &DMatrix<f64>,
    weights: Option<&[f64]>,
) -> Result<NnlsSolution> {
    let (a, b) = weighted_system(basis, spectrum, weights)?;
    nnls(&a, &b)
}

/// Unconstrained solve restricted to the passive columns; zero elsewhere.
fn solve_passive(a: &DMatrix<f64>, b: &DVector<f64>, passive: &[bool]) -> Result<DVector<f64>> {
    let cols: Vec<usize> = (0..passive.len()).filter(|&j| passive[j]).collect();
    let mut full = DVector::<f64>::zeros(passive.len());
    if cols.is_empty() {
        return Ok(full);
    }
    let sub = a.select_columns(cols.iter());
    let z = solve_least_squares(&sub, b)
        .ok_or_else(|| FitError::NnlsFailed("passive-set solve is ill-conditioned".into()))?;
    for (k, &j) in cols.iter().enumerate() {
        full[j] = z[k];
    }
    Ok(full)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recovers_exact_non_negative_solution() {
        let a = DMatrix::from_row_slice(4, 2, &[1.0, 0.0, 1.0, 1.0, 0.0, 1.0, 2.0, 1.0]);
        let truth = DVector::from_row_slice(&[2.0, 3.0]);
        let b = &a * &truth;
        let sol = nnls(&a, &b).unwrap();
        assert!((sol.coefficients - truth).norm() < 1e-9);
        assert!(sol.residual < 1e-9);
    }

    #[test]
    fn clamps_negative_unconstrained_solution_to_zero() {
        // unconstrained optimum is x = [1, -1]
        let a = DMatrix::from_row_slice(3, 2, &[1.0, 0.0, 0.0, 1.0, 1.0, 1.0]);
        let b = DVector::from_row_slice(&[1.0, -1.0, 0.0]);
        let sol = nnls(&a, &b).unwrap();
        assert!(sol.coefficients.iter().all(|&c| c >= 0.0));
        assert!(sol.coefficients[1].abs() < 1e-12);
        // optimum on the boundary: x0 = 0.5
        assert!((sol.coefficients[0] - 0.5).abs() < 1e-9);
        let expected = (&a * &sol.coefficients - &b).norm();
        assert!((sol.residual - expected).abs() < 1e-12);
    }

    #[test]
    fn tiny_positive_coefficient_on_a_large_column() {
        let a = DMatrix::from_element(50, 1, 1e5);
        let b = DVector::from_element(50, 1e-7);
        let sol = nnls(&a, &b).unwrap();
        assert!((sol.coefficients[0] - 1e-12).abs() < 1e-18, "{}", sol.coefficients[0]);
        assert!(sol.residual < 1e-15);
    }

    #[test]
    fn overlapping_peaks_on_flat_continuum_converge() {
        let centers = [(640.0, 8.0), (705.0, 8.0), (641.0, 8.1), (1172.0, 20.0), (1200.0, 9.0)];
        let a = DMatrix::from_fn(1400, centers.len(), |r, c| {
            let (mu, sigma) = centers[c];
            let z = (r as f64 - mu) / sigma;
            1e3 * (-0.5 * z * z).exp()
        });
        let b = DVector::from_fn(1400, |r, _| 20.0 + if r % 3 == 0 { 1.0 } else { -0.5 });
        let sol = nnls(&a, &b).unwrap();
        assert!(sol.coefficients.iter().all(|&c| c >= 0.0));
        let expected = (&a * &sol.coefficients - &b).norm();
        assert!((sol.residual - expected).abs() < 1e-9 * expected);
    }

    #[test]
    fn unit_weights_match_unweighted() {
        let a = DMatrix::from_row_slice(
            5,
            3,
            &[
                1.0, 0.2, 0.0, 0.8, 0.5, 0.1, 0.3, 1.0, 0.2, 0.0, 0.4, 1.0, 0.1, 0.0, 0.7,
            ],
        );
        let y = [2.0, 1.5, 2.2, 1.4, 0.9];
        let plain = nnls_fit(&y, &a, None).unwrap();
        let weighted = nnls_fit(&y, &a, Some(&[1.0; 5][..])).unwrap();
        assert!((plain.coefficients - weighted.coefficients).norm() < 1e-12);
        assert!((plain.residual - weighted.residual).abs() < 1e-12);
    }

    #[test]
    fn rejects_shape_mismatch_and_nan() {
        let a = DMatrix::from_element(3, 2, 1.0);
        assert!(matches!(
            nnls_fit(&[1.0, 2.0], &a, None),
            Err(FitError::ShapeMismatch { .. })
        ));
        assert!(matches!(
            nnls_fit(&[1.0, f64::NAN, 2.0], &a, None),
            Err(FitError::NonFinite(_))
        ));
    }
}
