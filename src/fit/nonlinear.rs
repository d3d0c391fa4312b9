//! Nonlinear least-squares fit of a [`CompositeModel`].
//!
//! Only parameters whose hint is free are handed to the optimizer; linked
//! parameters are recomputed from the free ones before every evaluation.
//! Residuals are `(model − data)·weight`, so weights scale residuals, not
//! their squares.

use std::collections::BTreeMap;

use tracing::info;

use crate::domain::ParamStore;
use crate::error::{FitError, Result};
use crate::math::lm::{Bounds, LmConfig, minimize};
use crate::models::composite::CompositeModel;
use crate::params::strategy::update_from_fit;

/// Solved parameters and curves of a nonlinear fit.
#[derive(Debug, Clone, PartialEq)]
pub struct NonlinearFit {
    /// Every model parameter, links resolved.
    pub values: BTreeMap<String, f64>,
    pub best_fit: Vec<f64>,
    /// Curve of each model component, in model order.
    pub components: Vec<(String, Vec<f64>)>,
    pub chi_square: f64,
    pub iterations: usize,
    pub nfev: usize,
}

impl NonlinearFit {
    /// Copy solved values into `store`. **Mutates `store`.**
    ///
    /// Returns the store names that had no solved counterpart.
    pub fn update_store(&self, store: &mut ParamStore) -> Vec<String> {
        update_from_fit(store, &self.values)
    }
}

/// Fit `model` to `spectrum` sampled on the channel axis `x`.
///
/// Non-convergence within `config.max_nfev` evaluations is
/// [`FitError::FitFailed`]; nothing is retried.
pub fn fit_composite(
    model: &CompositeModel,
    x: &[f64],
    spectrum: &[f64],
    weights: Option<&[f64]>,
    config: &LmConfig,
) -> Result<NonlinearFit> {
    if spectrum.len() != x.len() {
        return Err(FitError::ShapeMismatch {
            what: "spectrum",
            got: spectrum.len(),
            expected: x.len(),
        });
    }
    if let Some(w) = weights {
        if w.len() != x.len() {
            return Err(FitError::ShapeMismatch {
                what: "weights",
                got: w.len(),
                expected: x.len(),
            });
        }
    }

    let order = model.link_order()?;
    let free = model.free_indices();
    let base: Vec<f64> = model.hints().iter().map(|h| h.value).collect();
    let x0: Vec<f64> = free.iter().map(|&i| base[i]).collect();
    let bounds: Vec<Bounds> = free
        .iter()
        .map(|&i| {
            let hint = &model.hints()[i];
            Bounds::new(hint.min, hint.max)
        })
        .collect();

    let expand = |p: &[f64]| -> Vec<f64> {
        let mut values = base.clone();
        for (&i, &v) in free.iter().zip(p) {
            values[i] = v;
        }
        model.propagate_links(&mut values, &order);
        values
    };
    let residuals = |p: &[f64]| -> Vec<f64> {
        let fit = model.eval_with(&expand(p), x);
        fit.iter()
            .zip(spectrum)
            .enumerate()
            .map(|(j, (f, y))| {
                let r = f - y;
                weights.map_or(r, |w| r * w[j])
            })
            .collect()
    };

    let report = minimize(residuals, &x0, &bounds, config)?;
    let values = expand(&report.params);
    info!(
        free = free.len(),
        iterations = report.iterations,
        nfev = report.nfev,
        chi_square = report.chi_square,
        "nonlinear fit finished"
    );

    Ok(NonlinearFit {
        best_fit: model.eval_with(&values, x),
        components: model.component_curves(&values, x),
        values: model.param_names().iter().cloned().zip(values).collect(),
        chi_square: report.chi_square,
        iterations: report.iterations,
        nfev: report.nfev,
    })
}
