//! Shared fit workflow used by the `fit` and `simulate` commands.
//!
//! load store -> add missing element parameters -> apply strategy -> fit
//!
//! The front-end only deals with presentation (tables vs JSON, exports).

use std::path::PathBuf;

use tracing::{info, warn};

use crate::atomic::{AtomicData, default_element_list, parse_request};
use crate::cli::FitMethod;
use crate::data::{SampleConfig, SampleSpectrum, synthesize_spectrum};
use crate::domain::{LineAttr, LineRequest, ParamKey, ParamStore};
use crate::error::Result;
use crate::fit::linear::{LinearFit, linear_spectrum_fitting};
use crate::fit::nonlinear::NonlinearFit;
use crate::math::background::Snip;
use crate::math::lm::LmConfig;
use crate::models::spectrum::ModelSpectrum;
use crate::params::{ParamController, StrategyRegistry};

/// Everything a `fit` run needs, detached from clap.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub params: Option<PathBuf>,
    pub counts: PathBuf,
    pub elements: Vec<String>,
    pub method: FitMethod,
    pub strategy: Option<String>,
    pub lm: LmConfig,
}

/// Result of one run, by fit path.
#[derive(Debug, Clone)]
pub enum FitOutcome {
    Linear(LinearFit),
    Nonlinear {
        fit: NonlinearFit,
        /// Input store with the solved values written back.
        updated: ParamStore,
    },
}

#[derive(Debug, Clone)]
pub struct RunOutput {
    /// Store the model was built from (parameters added, strategy applied).
    pub store: ParamStore,
    pub elements: Vec<LineRequest>,
    pub outcome: FitOutcome,
}

/// Execute the full fitting workflow for `config`.
pub fn run_fit(config: &RunConfig, atomic: &dyn AtomicData) -> Result<RunOutput> {
    let store = crate::io::read_store(config.params.as_deref())?;
    let counts = crate::io::read_counts(&config.counts)?;
    run_fit_with_counts(config, store, &counts, atomic)
}

/// Workflow on an already loaded store and spectrum.
///
/// An empty element list stands for [`default_element_list`].
pub fn run_fit_with_counts(
    config: &RunConfig,
    store: ParamStore,
    counts: &[f64],
    atomic: &dyn AtomicData,
) -> Result<RunOutput> {
    let entries = if config.elements.is_empty() {
        let defaults = default_element_list(atomic);
        info!(entries = defaults.len(), "no element list given, using every supported series");
        defaults
    } else {
        config.elements.clone()
    };
    let elements = entries
        .iter()
        .map(|e| parse_request(atomic, e))
        .collect::<Result<Vec<_>>>()?;
    let store = prepare_store(store, &entries, config.strategy.as_deref(), atomic)?;
    let x: Vec<f64> = (0..counts.len()).map(|i| i as f64).collect();

    let outcome = match config.method {
        FitMethod::Linear => {
            if config.strategy.is_some() {
                warn!("strategy has no effect on the linear fit");
            }
            let fit = linear_spectrum_fitting(
                &x,
                counts,
                &store,
                &entries,
                None,
                atomic,
                &Snip::default(),
            )?;
            FitOutcome::Linear(fit)
        }
        FitMethod::Nonlinear => {
            let spectrum = ModelSpectrum::new(&store, &entries, atomic)?;
            let fit = spectrum.model_fit(&x, counts, None, &config.lm)?;
            let mut updated = store.clone();
            let unmatched = fit.update_store(&mut updated);
            info!(unmatched = unmatched.len(), "parameter store updated from fit");
            FitOutcome::Nonlinear { fit, updated }
        }
    };

    Ok(RunOutput {
        store,
        elements,
        outcome,
    })
}

/// Add default parameters for entries the store does not know yet, then
/// apply `strategy` (if any) to the whole store.
///
/// An entry counts as known when its area parameter exists; known entries
/// keep their stored records.
pub fn prepare_store<S: AsRef<str>>(
    store: ParamStore,
    elements: &[S],
    strategy: Option<&str>,
    atomic: &dyn AtomicData,
) -> Result<ParamStore> {
    let mut missing = Vec::new();
    for entry in elements {
        let request = parse_request(atomic, entry.as_ref())?;
        if !store.contains(&area_key(&request)) {
            missing.push(entry.as_ref().to_string());
        }
    }
    if missing.is_empty() && strategy.is_none() {
        return Ok(store);
    }

    let mut controller =
        ParamController::new(&store, &missing, atomic, StrategyRegistry::with_defaults())?;
    if !missing.is_empty() {
        info!(entries = ?missing, "default parameters added");
    }
    if let Some(name) = strategy {
        controller.set_strategy(name)?;
        info!(strategy = name, "bound strategy applied");
    }
    Ok(controller.into_params())
}

fn area_key(request: &LineRequest) -> ParamKey {
    match request {
        LineRequest::Single(line) => {
            ParamKey::line(line.element.clone(), line.reference_transition(), LineAttr::Area)
        }
        LineRequest::Pileup(a, b) => ParamKey::pileup(a.clone(), b.clone(), LineAttr::Area),
    }
}

/// Generate a synthetic spectrum for `elements`.
pub fn run_simulate<S: AsRef<str>>(
    store: &ParamStore,
    elements: &[S],
    atomic: &dyn AtomicData,
    config: &SampleConfig,
) -> Result<SampleSpectrum> {
    let store = prepare_store(store.clone(), elements, None, atomic)?;
    synthesize_spectrum(&store, elements, atomic, config)
}
