//! Bound strategies: named presets of which parameters the optimizer may move.
//!
//! A fit usually runs in passes (areas only, then calibration, then peak
//! shapes). Each pass is a strategy applied to the store before the model is
//! built. Strategy entries are keyed either by a full parameter name
//! (`e_offset`, `Fe_ka1_area`) or by an attribute class (`area`,
//! `delta_center`, `delta_sigma`, `ratio_adjust`) that matches every line and
//! pileup parameter of that kind.

use std::collections::BTreeMap;

use tracing::{debug, warn};

use crate::domain::{BoundType, LineAttr, ParamKey, ParamStore};
use crate::error::{FitError, Result};

/// Name or attribute-class → bound type.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Strategy {
    entries: BTreeMap<String, BoundType>,
}

impl Strategy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_pairs<'a>(pairs: impl IntoIterator<Item = (&'a str, BoundType)>) -> Self {
        Self {
            entries: pairs
                .into_iter()
                .map(|(name, bound)| (name.to_string(), bound))
                .collect(),
        }
    }

    pub fn with(mut self, name: &str, bound: BoundType) -> Self {
        self.entries.insert(name.to_string(), bound);
        self
    }

    pub fn get(&self, name: &str) -> Option<BoundType> {
        self.entries.get(name).copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Per-parameter bound overrides recorded by the controller.
pub type BoundOverrides = BTreeMap<ParamKey, BoundType>;

/// Explicit registry of named strategies.
#[derive(Debug, Clone, Default)]
pub struct StrategyRegistry {
    strategies: BTreeMap<String, Strategy>,
}

const CALIBRATION: [&str; 3] = ["e_offset", "e_linear", "e_quadratic"];
const BROADENING: [&str; 2] = ["fwhm_offset", "fwhm_fanoprime"];
const AMPLITUDES: [&str; 2] = ["compton_amplitude", "coherent_sct_amplitude"];
const COMPTON_TAIL: [&str; 3] = ["compton_f_tail", "compton_gamma", "compton_hi_f_tail"];
const COMPTON_SHAPE: [&str; 2] = ["compton_angle", "compton_fwhm_corr"];

impl StrategyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the five standard fitting passes:
    ///
    /// - `linear`: only amplitudes and element areas
    /// - `adjust_element`: areas plus per-line position, width and ratio
    /// - `e_calibration`: areas plus the energy calibration
    /// - `fit_with_tail`: areas plus broadening and Compton tails
    /// - `free_more`: calibration, broadening, elastic energy and Compton shape
    pub fn with_defaults() -> Self {
        use BoundType::{Free, LoHi};

        let base = || {
            Strategy::from_pairs(AMPLITUDES.iter().map(|&n| (n, Free)))
                .with(LineAttr::Area.as_str(), Free)
        };
        let lohi = |s: Strategy, names: &[&str]| {
            names.iter().fold(s, |s, n| s.with(n, LoHi))
        };

        let mut registry = Self::new();
        registry.strategies.insert("linear".into(), base());
        registry.strategies.insert(
            "adjust_element".into(),
            lohi(base(), &["delta_center", "delta_sigma", "ratio_adjust"]),
        );
        registry
            .strategies
            .insert("e_calibration".into(), lohi(base(), &CALIBRATION));
        registry.strategies.insert(
            "fit_with_tail".into(),
            lohi(lohi(base(), &BROADENING), &COMPTON_TAIL),
        );
        let free_more = [
            &CALIBRATION[..],
            &BROADENING[..],
            &["coherent_sct_energy"][..],
            &COMPTON_SHAPE[..],
            &COMPTON_TAIL[..],
        ]
        .concat();
        registry
            .strategies
            .insert("free_more".into(), lohi(base(), &free_more));
        registry
    }

    /// Add a strategy under `name`.
    ///
    /// Re-registering an identical strategy is a no-op; replacing a different
    /// one needs `overwrite`.
    pub fn register(&mut self, name: &str, strategy: Strategy, overwrite: bool) -> Result<()> {
        if let Some(existing) = self.strategies.get(name) {
            if *existing == strategy {
                return Ok(());
            }
            if !overwrite {
                return Err(FitError::StrategyConflict(name.to_string()));
            }
        }
        self.strategies.insert(name.to_string(), strategy);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Result<&Strategy> {
        self.strategies
            .get(name)
            .ok_or_else(|| FitError::UnknownStrategy(name.to_string()))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.strategies.keys().map(String::as_str)
    }
}

/// Set every record's bound type from strategy `name`. **Mutates `store`.**
///
/// Resolution per parameter: exact strategy entry, then `overrides`, then the
/// strategy's attribute-class entry, then `fixed`.
pub fn apply_strategy(
    store: &mut ParamStore,
    registry: &StrategyRegistry,
    name: &str,
    overrides: &BoundOverrides,
) -> Result<()> {
    let strategy = registry.get(name)?;
    for (key, record) in store.iter_mut() {
        let bound = strategy
            .get(&key.to_string())
            .or_else(|| overrides.get(key).copied())
            .or_else(|| key.attr().and_then(|a| strategy.get(a.as_str())))
            .unwrap_or(BoundType::Fixed);
        debug!(param = %key, %bound, value = record.value, "bound set");
        record.bound_type = bound;
    }
    Ok(())
}

/// Copy solved values back into the store. **Mutates `store`.**
///
/// `values` is keyed by solver names (see [`ParamKey::solver_name`]). Store
/// entries with no solved counterpart are left untouched, logged and
/// returned.
pub fn update_from_fit(store: &mut ParamStore, values: &BTreeMap<String, f64>) -> Vec<String> {
    let mut unmatched = Vec::new();
    for (key, record) in store.iter_mut() {
        match values.get(&key.solver_name()) {
            Some(&value) => record.value = value,
            None => {
                warn!(param = %key, "value not updated from fit");
                unmatched.push(key.to_string());
            }
        }
    }
    unmatched
}
