//! Bounded Levenberg–Marquardt least squares.
//!
//! The solver minimizes `Σ r_i(p)²` for a residual function `r`. Bounds are
//! handled the MINPACK/lmfit way: each bounded parameter is optimized in an
//! unbounded internal coordinate and mapped back before every evaluation.
//!
//! ```text
//! min and max:  p = min + (sin(q) + 1)·(max − min)/2
//! min only:     p = min − 1 + sqrt(q² + 1)
//! max only:     p = max + 1 − sqrt(q² + 1)
//! ```
//!
//! Each iteration builds a forward-difference Jacobian in internal
//! coordinates, solves the damped normal equations and accepts the step only
//! if chi-square decreases (damping goes down on success, up on failure).

use nalgebra::{DMatrix, DVector};
use tracing::debug;

use crate::error::{FitError, Result};
use crate::math::ols::solve_least_squares;

/// Stopping rules.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LmConfig {
    /// Maximum number of residual evaluations (Jacobian columns included).
    pub max_nfev: usize,
    /// Relative chi-square reduction below which the fit has converged.
    pub ftol: f64,
    /// Relative step size below which the fit has converged.
    pub xtol: f64,
    /// Largest gradient component below which the fit has converged (0 disables).
    pub gtol: f64,
}

impl Default for LmConfig {
    fn default() -> Self {
        Self {
            max_nfev: 4000,
            ftol: 1.5e-8,
            xtol: 1.5e-8,
            gtol: 0.0,
        }
    }
}

/// Box constraint of one parameter; infinite sides are open.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bounds {
    pub min: f64,
    pub max: f64,
}

impl Bounds {
    pub const FREE: Bounds = Bounds {
        min: f64::NEG_INFINITY,
        max: f64::INFINITY,
    };

    pub fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    fn clamp(&self, p: f64) -> f64 {
        p.max(self.min).min(self.max)
    }

    fn to_internal(&self, p: f64) -> f64 {
        let p = self.clamp(p);
        match (self.min.is_finite(), self.max.is_finite()) {
            (true, true) if self.max > self.min => {
                (2.0 * (p - self.min) / (self.max - self.min) - 1.0).asin()
            }
            (true, true) => 0.0,
            (true, false) => ((p - self.min + 1.0).powi(2) - 1.0).sqrt(),
            (false, true) => ((self.max - p + 1.0).powi(2) - 1.0).sqrt(),
            (false, false) => p,
        }
    }

    fn to_external(&self, q: f64) -> f64 {
        match (self.min.is_finite(), self.max.is_finite()) {
            (true, true) => self.min + (q.sin() + 1.0) * (self.max - self.min) / 2.0,
            (true, false) => self.min - 1.0 + (q * q + 1.0).sqrt(),
            (false, true) => self.max + 1.0 - (q * q + 1.0).sqrt(),
            (false, false) => q,
        }
    }
}

/// Outcome of a converged minimization.
#[derive(Debug, Clone, PartialEq)]
pub struct LmReport {
    pub params: Vec<f64>,
    pub chi_square: f64,
    pub iterations: usize,
    pub nfev: usize,
}

/// Minimize `Σ residuals(p)²` starting from `x0` within `bounds`.
///
/// `residuals` must return the same number of entries on every call.
pub fn minimize<F>(
    residuals: F,
    x0: &[f64],
    bounds: &[Bounds],
    config: &LmConfig,
) -> Result<LmReport>
where
    F: Fn(&[f64]) -> Vec<f64>,
{
    if bounds.len() != x0.len() {
        return Err(FitError::ShapeMismatch {
            what: "parameter bounds",
            got: bounds.len(),
            expected: x0.len(),
        });
    }
    let external = |q: &DVector<f64>| -> Vec<f64> {
        q.iter().zip(bounds).map(|(&qi, b)| b.to_external(qi)).collect()
    };
    let eval = |q: &DVector<f64>| -> Result<DVector<f64>> {
        let r = DVector::from_vec(residuals(&external(q)));
        if r.iter().all(|v| v.is_finite()) {
            Ok(r)
        } else {
            Err(FitError::NonFinite("residuals".into()))
        }
    };

    let k = x0.len();
    let mut q = DVector::from_iterator(k, x0.iter().zip(bounds).map(|(&p, b)| b.to_internal(p)));
    let mut r = eval(&q)?;
    let mut chi2 = r.norm_squared();
    let mut nfev = 1;
    let mut iterations = 0;

    if k == 0 {
        return Ok(LmReport {
            params: Vec::new(),
            chi_square: chi2,
            iterations,
            nfev,
        });
    }

    let mut lambda = 1e-3;
    loop {
        iterations += 1;
        if chi2 == 0.0 {
            break;
        }

        let jac = jacobian(&eval, &q, &r)?;
        nfev += k;
        let jtj = jac.transpose() * &jac;
        let grad = jac.transpose() * &r;

        if config.gtol > 0.0 && grad.amax() <= config.gtol {
            debug!(iterations, "gradient below gtol");
            break;
        }

        // Inner loop: raise damping until a step reduces chi-square.
        let accepted = loop {
            if nfev >= config.max_nfev {
                return Err(FitError::FitFailed {
                    iterations,
                    chi_square: chi2,
                });
            }
            let mut a = jtj.clone();
            for j in 0..k {
                a[(j, j)] += lambda * jtj[(j, j)].max(f64::EPSILON);
            }
            let step = match a.clone().cholesky() {
                Some(ch) => ch.solve(&(-&grad)),
                None => solve_least_squares(&a, &(-&grad))
                    .ok_or_else(|| FitError::NonFinite("damped normal equations".into()))?,
            };

            let q_new = &q + &step;
            let r_new = eval(&q_new)?;
            nfev += 1;
            let chi2_new = r_new.norm_squared();

            if chi2_new < chi2 {
                lambda = (lambda * 0.1).max(1e-12);
                let reduction = (chi2 - chi2_new) / chi2;
                let small_step = step.norm() <= config.xtol * (q.norm() + config.xtol);
                q = q_new;
                r = r_new;
                chi2 = chi2_new;
                break reduction <= config.ftol || small_step;
            }

            lambda *= 10.0;
            if lambda > 1e16 {
                // No damping reduces chi-square: already at a minimum.
                break true;
            }
        };

        if accepted {
            break;
        }
        if nfev >= config.max_nfev {
            return Err(FitError::FitFailed {
                iterations,
                chi_square: chi2,
            });
        }
    }

    debug!(iterations, nfev, chi2, "levenberg-marquardt converged");
    Ok(LmReport {
        params: external(&q),
        chi_square: chi2,
        iterations,
        nfev,
    })
}

/// Forward-difference Jacobian of the residuals in internal coordinates.
fn jacobian<E>(eval: &E, q: &DVector<f64>, r: &DVector<f64>) -> Result<DMatrix<f64>>
where
    E: Fn(&DVector<f64>) -> Result<DVector<f64>>,
{
    let h_scale = f64::EPSILON.sqrt();
    let mut jac = DMatrix::<f64>::zeros(r.len(), q.len());
    for j in 0..q.len() {
        let h = h_scale * q[j].abs().max(1.0);
        let mut qh = q.clone();
        qh[j] += h;
        let rh = eval(&qh)?;
        jac.set_column(j, &((rh - r) / h));
    }
    Ok(jac)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bound_transform_round_trips_inside_bounds() {
        let cases = [
            (Bounds::new(-1.0, 3.0), 0.5),
            (Bounds::new(0.0, f64::INFINITY), 7.0),
            (Bounds::new(f64::NEG_INFINITY, 2.0), -4.0),
            (Bounds::FREE, 1.25),
        ];
        for (b, p) in cases {
            let back = b.to_external(b.to_internal(p));
            assert!((back - p).abs() < 1e-12, "{b:?} {p} -> {back}");
        }
        // values outside are clamped
        let b = Bounds::new(0.0, 1.0);
        assert!((b.to_external(b.to_internal(5.0)) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn fits_exponential_decay() {
        let xs: Vec<f64> = (0..40).map(|i| i as f64 * 0.25).collect();
        let ys: Vec<f64> = xs.iter().map(|x| 4.0 * (-0.7 * x).exp() + 0.5).collect();
        let residuals = |p: &[f64]| -> Vec<f64> {
            xs.iter()
                .zip(&ys)
                .map(|(x, y)| p[0] * (-p[1] * x).exp() + p[2] - y)
                .collect()
        };
        let report = minimize(
            residuals,
            &[1.0, 0.2, 0.0],
            &[Bounds::new(0.0, f64::INFINITY), Bounds::new(0.0, 5.0), Bounds::FREE],
            &LmConfig::default(),
        )
        .unwrap();
        assert!((report.params[0] - 4.0).abs() < 1e-5, "{:?}", report.params);
        assert!((report.params[1] - 0.7).abs() < 1e-5);
        assert!((report.params[2] - 0.5).abs() < 1e-5);
        assert!(report.chi_square < 1e-10);
    }

    #[test]
    fn bound_is_respected_when_optimum_lies_outside() {
        // unconstrained optimum is p = 3
        let residuals = |p: &[f64]| vec![p[0] - 3.0];
        let report = minimize(
            residuals,
            &[0.5],
            &[Bounds::new(0.0, 1.0)],
            &LmConfig::default(),
        )
        .unwrap();
        assert!(report.params[0] <= 1.0);
        assert!((report.params[0] - 1.0).abs() < 1e-3);
    }

    #[test]
    fn evaluation_budget_surfaces_as_fit_failure() {
        let xs: Vec<f64> = (0..20u32).map(f64::from).collect();
        let residuals = |p: &[f64]| -> Vec<f64> {
            xs.iter().map(|x| (p[0] * x).sin() - (0.3 * x).sin()).collect()
        };
        let config = LmConfig {
            max_nfev: 3,
            ..LmConfig::default()
        };
        let err = minimize(residuals, &[1.0], &[Bounds::FREE], &config).unwrap_err();
        assert!(matches!(err, FitError::FitFailed { .. }));
    }
}
