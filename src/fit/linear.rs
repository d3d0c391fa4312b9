//! Linearized spectrum fitting.
//!
//! Peak shapes are frozen at their nominal parameters, so the spectrum is a
//! non-negative combination of fixed curves:
//!
//! ```text
//! y − background ≈ M · c,   c ≥ 0
//! ```
//!
//! One column of `M` per excited element entry, then Compton, then elastic.
//! The area of a component is its coefficient times the nominal area its
//! column was built with. This path is convex: it cannot diverge, at the cost
//! of not refining positions or widths.

use std::collections::BTreeMap;

use nalgebra::DMatrix;
use tracing::{debug, info};

use crate::atomic::{AtomicData, default_element_list};
use crate::domain::ParamStore;
use crate::error::{FitError, Result};
use crate::math::background::BackgroundEstimator;
use crate::math::lineshapes::Calibration;
use crate::math::nnls::nnls_fit;
use crate::models::spectrum::ModelSpectrum;

/// Nominal area of element columns without a stored area.
pub const LINEAR_DEFAULT_AREA: f64 = 100.0;

/// Name of the background pseudo-component.
pub const BACKGROUND: &str = "background";

/// Basis matrix of the linearized model.
#[derive(Debug, Clone, PartialEq)]
pub struct LinearModel {
    /// Column names: element entries as given (`Fe_K`, `Cl_K-Cl_K`), then
    /// `compton` and `elastic`.
    pub names: Vec<String>,
    /// `channels × names.len()`.
    pub matrix: DMatrix<f64>,
    /// Area each column was evaluated with.
    pub nominal_areas: Vec<f64>,
}

/// Evaluate every component once at its nominal parameters.
///
/// Element entries that are not excited at the incident energy get no column.
pub fn construct_linear_model<S: AsRef<str>>(
    x: &[f64],
    params: &ParamStore,
    elements: &[S],
    atomic: &dyn AtomicData,
    default_area: f64,
) -> Result<LinearModel> {
    let spectrum = ModelSpectrum::new(params, elements, atomic)?;

    let mut names = Vec::new();
    let mut columns: Vec<Vec<f64>> = Vec::new();
    let mut nominal_areas = Vec::new();

    for request in spectrum.element_list() {
        let Some(model) = spectrum.setup_element_model(request, default_area)? else {
            continue;
        };
        let values = model.values()?;
        // every area of an entry equals its anchor (or pileup) area
        let area = values
            .iter()
            .find(|(name, _)| name.ends_with("_area"))
            .map(|(_, v)| *v)
            .ok_or_else(|| FitError::MissingParameter(format!("{request}_area")))?;
        columns.push(model.eval(x)?);
        names.push(request.to_string());
        nominal_areas.push(area);
    }

    let compton = spectrum.compton();
    columns.push(compton.eval(x)?);
    names.push("compton".to_string());
    nominal_areas.push(scatter_amplitude(compton.values()?, "compton_amplitude")?);

    let elastic = spectrum.elastic();
    columns.push(elastic.eval(x)?);
    names.push("elastic".to_string());
    nominal_areas.push(scatter_amplitude(elastic.values()?, "elastic_coherent_sct_amplitude")?);

    let matrix = DMatrix::from_fn(x.len(), columns.len(), |r, c| columns[c][r]);
    debug!(channels = x.len(), columns = names.len(), "linear model constructed");
    Ok(LinearModel {
        names,
        matrix,
        nominal_areas,
    })
}

fn scatter_amplitude(values: BTreeMap<String, f64>, name: &str) -> Result<f64> {
    values
        .get(name)
        .copied()
        .ok_or_else(|| FitError::MissingParameter(name.to_string()))
}

/// One fitted component of a [`LinearFit`].
#[derive(Debug, Clone, PartialEq)]
pub struct ComponentFit {
    pub name: String,
    pub area: f64,
    pub curve: Vec<f64>,
}

/// Result of [`linear_spectrum_fitting`].
#[derive(Debug, Clone, PartialEq)]
pub struct LinearFit {
    /// Calibrated energy of every channel.
    pub energy: Vec<f64>,
    /// Non-zero components in column order, then [`BACKGROUND`].
    pub components: Vec<ComponentFit>,
    /// NNLS residual of the (weighted) background-subtracted system.
    pub residual: f64,
}

impl LinearFit {
    pub fn component(&self, name: &str) -> Option<&ComponentFit> {
        self.components.iter().find(|c| c.name == name)
    }

    pub fn area(&self, name: &str) -> Option<f64> {
        self.component(name).map(|c| c.area)
    }

    pub fn areas(&self) -> BTreeMap<String, f64> {
        self.components
            .iter()
            .map(|c| (c.name.clone(), c.area))
            .collect()
    }

    /// Sum of all component curves, background included.
    pub fn total(&self) -> Vec<f64> {
        let mut total = vec![0.0; self.energy.len()];
        for component in &self.components {
            for (t, v) in total.iter_mut().zip(&component.curve) {
                *t += v;
            }
        }
        total
    }
}

/// Background-subtract `y`, then solve the component areas by NNLS.
///
/// `weights` row-scale the system by `sqrt(w)`. `params` is not modified.
pub fn linear_spectrum_fitting<S: AsRef<str>>(
    x: &[f64],
    y: &[f64],
    params: &ParamStore,
    elements: &[S],
    weights: Option<&[f64]>,
    atomic: &dyn AtomicData,
    background: &dyn BackgroundEstimator,
) -> Result<LinearFit> {
    if y.len() != x.len() {
        return Err(FitError::ShapeMismatch {
            what: "spectrum",
            got: y.len(),
            expected: x.len(),
        });
    }
    let (e_offset, e_linear, e_quadratic) = params.calibration()?;
    let model = construct_linear_model(x, params, elements, atomic, LINEAR_DEFAULT_AREA)?;

    let calibration = Calibration {
        e_offset,
        e_linear,
        e_quadratic,
    };
    let bg = background.estimate(y, calibration, params.non_fitting.background_width);
    let target: Vec<f64> = y.iter().zip(&bg).map(|(v, b)| v - b).collect();

    let solution = nnls_fit(&target, &model.matrix, weights)?;

    let mut components = Vec::with_capacity(model.names.len() + 1);
    for (j, name) in model.names.iter().enumerate() {
        let coef = solution.coefficients[j];
        let curve: Vec<f64> = model.matrix.column(j).iter().map(|v| v * coef).collect();
        if curve.iter().sum::<f64>() == 0.0 {
            continue;
        }
        components.push(ComponentFit {
            name: name.clone(),
            area: coef * model.nominal_areas[j],
            curve,
        });
    }
    components.push(ComponentFit {
        name: BACKGROUND.to_string(),
        area: bg.iter().sum(),
        curve: bg,
    });

    info!(
        components = components.len(),
        residual = solution.residual,
        "linear fit finished"
    );
    Ok(LinearFit {
        energy: calibration.energies(x),
        components,
        residual: solution.residual,
    })
}

/// [`linear_spectrum_fitting`] over every supported K, L and M series.
///
/// Used when no element list is given; series that are not excited at the
/// incident energy get no column.
pub fn linear_spectrum_fitting_all(
    x: &[f64],
    y: &[f64],
    params: &ParamStore,
    weights: Option<&[f64]>,
    atomic: &dyn AtomicData,
    background: &dyn BackgroundEstimator,
) -> Result<LinearFit> {
    let elements = default_element_list(atomic);
    debug!(entries = elements.len(), "fitting the default element list");
    linear_spectrum_fitting(x, y, params, &elements, weights, atomic, background)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::pipeline::run_simulate;
    use crate::atomic::ReferenceTable;
    use crate::data::SampleConfig;
    use crate::domain::ParamKey;
    use crate::math::background::Snip;

    /// Zero background, to check areas exactly.
    struct NoBackground;

    impl BackgroundEstimator for NoBackground {
        fn estimate(&self, spectrum: &[f64], _: Calibration, _: f64) -> Vec<f64> {
            vec![0.0; spectrum.len()]
        }
    }

    fn channels() -> Vec<f64> {
        (0..1400u32).map(f64::from).collect()
    }

    #[test]
    fn columns_follow_entry_order_then_scatter() {
        let table = ReferenceTable::builtin().unwrap();
        let store = ParamStore::default_xrf();
        let model =
            construct_linear_model(&channels(), &store, &["Fe_K", "Sr_K", "Cu_K"], &table, 100.0)
                .unwrap();
        // Sr K is not excited at 12 keV
        assert_eq!(model.names, ["Fe_K", "Cu_K", "compton", "elastic"]);
        assert_eq!(model.matrix.shape(), (1400, 4));
        assert_eq!(model.nominal_areas[..2], [100.0, 100.0]);
        assert_eq!(model.nominal_areas[2], 1e5);
    }

    #[test]
    fn recovers_component_areas_from_synthetic_spectrum() {
        let table = ReferenceTable::builtin().unwrap();
        let store = ParamStore::default_xrf();
        let x = channels();
        let model = construct_linear_model(&x, &store, &["Fe_K", "Cu_K"], &table, 100.0).unwrap();
        let coefs = [30.0, 12.0, 0.02, 0.05];
        let y: Vec<f64> = (0..x.len())
            .map(|r| (0..4).map(|c| model.matrix[(r, c)] * coefs[c]).sum())
            .collect();

        let elements = ["Fe_K", "Cu_K"];
        let fit = linear_spectrum_fitting(&x, &y, &store, &elements, None, &table, &NoBackground)
            .unwrap();
        assert!((fit.area("Fe_K").unwrap() - 3000.0).abs() < 1e-3);
        assert!((fit.area("Cu_K").unwrap() - 1200.0).abs() < 1e-3);
        assert!((fit.area("compton").unwrap() - 2000.0).abs() < 1e-2);
        assert!((fit.area("elastic").unwrap() - 5000.0).abs() < 1e-2);
        assert_eq!(fit.area(BACKGROUND), Some(0.0));
        assert!(fit.residual < 1e-3);
        assert!((fit.energy[100] - 1.0).abs() < 1e-12);
    }

    #[test]
    fn zero_components_are_dropped_and_background_reported() {
        let table = ReferenceTable::builtin().unwrap();
        let store = ParamStore::default_xrf();
        let x = channels();
        // flat continuum only: every peak coefficient should clip to zero or
        // near it, and the background carries the counts
        let y = vec![20.0; x.len()];
        let fit =
            linear_spectrum_fitting(&x, &y, &store, &["Fe_K"], None, &table, &Snip::default())
                .unwrap();
        let bg = fit.component(BACKGROUND).unwrap();
        assert_eq!(bg.curve.len(), x.len());
        assert!((bg.area - bg.curve.iter().sum::<f64>()).abs() < 1e-9);
        for c in &fit.components {
            assert!(c.area >= 0.0, "{}", c.name);
            assert!(c.curve.iter().sum::<f64>() != 0.0);
        }
    }

    fn noisy_sample(elements: &[&str], continuum: f64, seed: u64) -> Vec<f64> {
        let table = ReferenceTable::builtin().unwrap();
        let config = SampleConfig {
            channels: 1400,
            continuum,
            seed,
            noise: true,
        };
        run_simulate(&ParamStore::default_xrf(), elements, &table, &config)
            .unwrap()
            .counts
    }

    #[test]
    fn peaks_on_a_continuum_fit_with_snip() {
        let table = ReferenceTable::builtin().unwrap();
        let store = ParamStore::default_xrf();
        let x = channels();
        for seed in [1, 2, 3] {
            let y = noisy_sample(&["Fe_K", "Cu_K"], 40.0, seed);
            let fit = linear_spectrum_fitting(
                &x,
                &y,
                &store,
                &["Fe_K", "Cu_K"],
                None,
                &table,
                &Snip::default(),
            )
            .unwrap();
            for c in &fit.components {
                assert!(c.area >= 0.0 && c.area.is_finite(), "{}: {}", c.name, c.area);
            }
            assert!(fit.area("Fe_K").unwrap() > 0.0);
            assert!(fit.area(BACKGROUND).unwrap() > 0.0);
        }
    }

    #[test]
    fn degenerate_gain_is_rejected_before_fitting() {
        let table = ReferenceTable::builtin().unwrap();
        let mut store = ParamStore::default_xrf();
        store.get_mut(&ParamKey::global("e_linear")).unwrap().value = 0.0;
        store.get_mut(&ParamKey::global("e_offset")).unwrap().value = 0.1;
        let x = channels();
        let y = vec![20.0; x.len()];
        let err =
            linear_spectrum_fitting(&x, &y, &store, &["Fe_K"], None, &table, &Snip::default())
                .unwrap_err();
        assert!(matches!(err, FitError::InvalidRecord { .. }), "{err}");
    }

    #[test]
    fn empty_element_list_fits_every_excited_series() {
        let table = ReferenceTable::builtin().unwrap();
        let store = ParamStore::default_xrf();
        let x = channels();
        let y = noisy_sample(&["Fe_K"], 10.0, 5);
        let fit = linear_spectrum_fitting_all(&x, &y, &store, None, &table, &Snip::default())
            .unwrap();
        let defaults = default_element_list(&table);
        for c in &fit.components {
            assert!(c.area >= 0.0, "{}", c.name);
            let known = defaults.contains(&c.name)
                || ["compton", "elastic", BACKGROUND].contains(&c.name.as_str());
            assert!(known, "{}", c.name);
        }
        assert!(fit.area("Fe_K").unwrap() > 0.0);
    }
}
