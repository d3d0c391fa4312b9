//! Fitting many spectra against one parameter store.
//!
//! Spectra are independent, so they are fitted in parallel. Each worker
//! builds its model from its own copy of the store; the atomic data and the
//! background estimator are shared read-only.

use rayon::prelude::*;
use tracing::info;

use crate::atomic::AtomicData;
use crate::domain::ParamStore;
use crate::error::Result;
use crate::fit::linear::{LinearFit, linear_spectrum_fitting};
use crate::math::background::BackgroundEstimator;

/// Linear fit of every spectrum; results keep the input order.
pub fn fit_batch<S: AsRef<str> + Sync>(
    x: &[f64],
    spectra: &[Vec<f64>],
    params: &ParamStore,
    elements: &[S],
    atomic: &dyn AtomicData,
    background: &dyn BackgroundEstimator,
) -> Vec<Result<LinearFit>> {
    let results: Vec<Result<LinearFit>> = spectra
        .par_iter()
        .map(|y| {
            let store = params.clone();
            linear_spectrum_fitting(x, y, &store, elements, None, atomic, background)
        })
        .collect();
    let failed = results.iter().filter(|r| r.is_err()).count();
    info!(spectra = spectra.len(), failed, "batch fit finished");
    results
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atomic::ReferenceTable;
    use crate::math::background::Snip;

    #[test]
    fn batch_matches_sequential_fits() {
        let table = ReferenceTable::builtin().unwrap();
        let store = ParamStore::default_xrf();
        let x: Vec<f64> = (0..1300u32).map(f64::from).collect();
        let spectra: Vec<Vec<f64>> = (1..=4)
            .map(|k| {
                x.iter()
                    .map(|&c| 5.0 + k as f64 * 40.0 * (-(c - 640.0).powi(2) / 50.0).exp())
                    .collect()
            })
            .collect();
        let elements = ["Fe_K"];
        let snip = Snip::default();

        let batch = fit_batch(&x, &spectra, &store, &elements, &table, &snip);
        assert_eq!(batch.len(), 4);
        for (y, result) in spectra.iter().zip(&batch) {
            let single =
                linear_spectrum_fitting(&x, y, &store, &elements, None, &table, &snip).unwrap();
            assert_eq!(result.as_ref().unwrap(), &single);
        }
    }
}
