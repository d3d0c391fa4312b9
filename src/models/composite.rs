//! Composite spectral models.
//!
//! A [`CompositeModel`] is an ordered list of components (Compton, elastic,
//! one Gaussian per emission line) sharing one flat parameter table. Every
//! parameter carries a [`ParamHint`]:
//!
//! - `value`, `vary`, `min`, `max`: what the optimizer may do with it
//! - `link`: an optional `(source, multiplier)` pair; a linked parameter is
//!   recomputed from its source before every evaluation and never varied
//!
//! Links form a DAG that is resolved in topological order, so chains such as
//! `e_offset → Fe_ka1_e_offset` or `Fe_ka1_area → Fe_kb1_area` always see an
//! up to date source. A link whose source is not part of the model (an element
//! sub-model evaluated on its own) keeps its own value.
//!
//! Parameter names are `<prefix><local name>`, with prefixes `""` (Compton),
//! `elastic_`, `<El>_<t>_` and `pileup_<A>_<B>_`.

use std::collections::BTreeMap;

use tracing::debug;

use crate::domain::{BoundType, ParamRecord};
use crate::error::{FitError, Result};
use crate::math::lineshapes::{
    Broadening, Calibration, ComptonParams, ElasticParams, PeakParams, compton_peak, elastic_peak,
    element_peak,
};

/// `target = multiplier · source`.
#[derive(Debug, Clone, PartialEq)]
pub struct Link {
    pub source: String,
    pub multiplier: f64,
}

/// Optimizer hint of one parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct ParamHint {
    pub value: f64,
    pub vary: bool,
    pub min: f64,
    pub max: f64,
    pub link: Option<Link>,
}

impl ParamHint {
    pub fn fixed(value: f64) -> Self {
        Self {
            value,
            vary: false,
            min: f64::NEG_INFINITY,
            max: f64::INFINITY,
            link: None,
        }
    }

    pub fn free(value: f64) -> Self {
        Self {
            vary: true,
            ..Self::fixed(value)
        }
    }

    pub fn with_min(mut self, min: f64) -> Self {
        self.min = min;
        self
    }

    /// Tied one-to-one to `source`; `value` is only used while the source is
    /// absent.
    pub fn linked(value: f64, source: impl Into<String>) -> Self {
        Self {
            link: Some(Link {
                source: source.into(),
                multiplier: 1.0,
            }),
            ..Self::fixed(value)
        }
    }

    /// Whether the optimizer moves this parameter.
    pub fn is_free(&self) -> bool {
        self.vary && self.link.is_none()
    }

    /// Layer a store record on top of this hint.
    ///
    /// Only the fields the bound type names are touched: `none` and `fixed`
    /// keep existing limits, `lo`/`hi` replace one side. A link survives and
    /// still takes precedence over the record's value.
    pub fn apply_record(&mut self, record: &ParamRecord) {
        self.value = record.value;
        match record.bound_type {
            BoundType::Free => self.vary = true,
            BoundType::Fixed => self.vary = false,
            BoundType::Lo => {
                self.vary = true;
                self.min = record.min;
            }
            BoundType::Hi => {
                self.vary = true;
                self.max = record.max;
            }
            BoundType::LoHi => {
                self.vary = true;
                self.min = record.min;
                self.max = record.max;
            }
        }
    }
}

/// Line shape of one component.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shape {
    Compton,
    Elastic,
    /// One emission line (element transition or pileup).
    Line,
}

const COMPTON_PARAMS: &[&str] = &[
    "coherent_sct_energy",
    "compton_amplitude",
    "compton_angle",
    "compton_fwhm_corr",
    "compton_f_step",
    "compton_f_tail",
    "compton_gamma",
    "compton_hi_f_tail",
    "compton_hi_gamma",
    "fwhm_offset",
    "fwhm_fanoprime",
    "e_offset",
    "e_linear",
    "e_quadratic",
    "epsilon",
];

const ELASTIC_PARAMS: &[&str] = &[
    "coherent_sct_amplitude",
    "coherent_sct_energy",
    "fwhm_offset",
    "fwhm_fanoprime",
    "e_offset",
    "e_linear",
    "e_quadratic",
    "epsilon",
];

const LINE_PARAMS: &[&str] = &[
    "area",
    "center",
    "delta_center",
    "delta_sigma",
    "ratio",
    "ratio_adjust",
    "fwhm_offset",
    "fwhm_fanoprime",
    "e_offset",
    "e_linear",
    "e_quadratic",
    "epsilon",
];

impl Shape {
    /// Local parameter names, in evaluation order.
    pub fn param_names(self) -> &'static [&'static str] {
        match self {
            Shape::Compton => COMPTON_PARAMS,
            Shape::Elastic => ELASTIC_PARAMS,
            Shape::Line => LINE_PARAMS,
        }
    }

    /// Value used when nothing else sets the parameter.
    pub fn default_value(local: &str) -> f64 {
        match local {
            "e_linear" => 0.01,
            "fwhm_offset" => 0.12,
            "fwhm_fanoprime" => 1.1e-4,
            "epsilon" => 2.96,
            "coherent_sct_energy" => 12.0,
            "coherent_sct_amplitude" | "compton_amplitude" | "area" => 1e5,
            "compton_angle" => 90.0,
            "compton_fwhm_corr" => 1.5,
            "compton_f_tail" => 0.1,
            "compton_gamma" => 2.0,
            "compton_hi_f_tail" => 0.01,
            "compton_hi_gamma" | "ratio" | "ratio_adjust" => 1.0,
            _ => 0.0,
        }
    }

    /// Evaluate on channels; `v` follows [`Shape::param_names`].
    fn evaluate(self, x: &[f64], v: &[f64]) -> Vec<f64> {
        match self {
            Shape::Compton => compton_peak(
                x,
                &ComptonParams {
                    energy: v[0],
                    amplitude: v[1],
                    angle: v[2],
                    fwhm_corr: v[3],
                    f_step: v[4],
                    f_tail: v[5],
                    gamma: v[6],
                    hi_f_tail: v[7],
                    hi_gamma: v[8],
                    broadening: Broadening {
                        fwhm_offset: v[9],
                        fwhm_fanoprime: v[10],
                        epsilon: v[14],
                    },
                    calibration: Calibration {
                        e_offset: v[11],
                        e_linear: v[12],
                        e_quadratic: v[13],
                    },
                },
            ),
            Shape::Elastic => elastic_peak(
                x,
                &ElasticParams {
                    amplitude: v[0],
                    energy: v[1],
                    broadening: Broadening {
                        fwhm_offset: v[2],
                        fwhm_fanoprime: v[3],
                        epsilon: v[7],
                    },
                    calibration: Calibration {
                        e_offset: v[4],
                        e_linear: v[5],
                        e_quadratic: v[6],
                    },
                },
            ),
            Shape::Line => element_peak(
                x,
                &PeakParams {
                    area: v[0],
                    center: v[1],
                    delta_center: v[2],
                    delta_sigma: v[3],
                    ratio: v[4],
                    ratio_adjust: v[5],
                    broadening: Broadening {
                        fwhm_offset: v[6],
                        fwhm_fanoprime: v[7],
                        epsilon: v[11],
                    },
                    calibration: Calibration {
                        e_offset: v[8],
                        e_linear: v[9],
                        e_quadratic: v[10],
                    },
                },
            ),
        }
    }
}

/// One additive term of a [`CompositeModel`].
#[derive(Debug, Clone, PartialEq)]
pub struct Component {
    name: String,
    prefix: String,
    shape: Shape,
    /// Indices into the model's parameter table, aligned with
    /// `shape.param_names()`.
    slots: Vec<usize>,
}

impl Component {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn shape(&self) -> Shape {
        self.shape
    }
}

/// Sum of components over one flat parameter table.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CompositeModel {
    names: Vec<String>,
    hints: Vec<ParamHint>,
    index: BTreeMap<String, usize>,
    components: Vec<Component>,
}

impl CompositeModel {
    pub fn new() -> Self {
        Self::default()
    }

    /// A model with a single component whose parameters are named
    /// `prefix + local` and start fixed at [`Shape::default_value`].
    pub fn single(name: impl Into<String>, prefix: &str, shape: Shape) -> Self {
        let mut model = Self::new();
        let mut slots = Vec::with_capacity(shape.param_names().len());
        for local in shape.param_names() {
            let full = format!("{prefix}{local}");
            slots.push(model.names.len());
            model.index.insert(full.clone(), model.names.len());
            model.names.push(full);
            model.hints.push(ParamHint::fixed(Shape::default_value(local)));
        }
        model.components.push(Component {
            name: name.into(),
            prefix: prefix.to_string(),
            shape,
            slots,
        });
        model
    }

    /// Append `other`'s components and parameters.
    ///
    /// Fails with [`FitError::NameCollision`] if both models define a
    /// parameter of the same name.
    pub fn merge(mut self, other: CompositeModel) -> Result<Self> {
        if let Some(dup) = other.names.iter().find(|n| self.index.contains_key(*n)) {
            return Err(FitError::NameCollision(dup.clone()));
        }
        let offset = self.names.len();
        for (name, hint) in other.names.into_iter().zip(other.hints) {
            self.index.insert(name.clone(), self.names.len());
            self.names.push(name);
            self.hints.push(hint);
        }
        for mut component in other.components {
            for slot in &mut component.slots {
                *slot += offset;
            }
            self.components.push(component);
        }
        Ok(self)
    }

    pub fn components(&self) -> &[Component] {
        &self.components
    }

    /// Parameter names in table order.
    pub fn param_names(&self) -> &[String] {
        &self.names
    }

    pub fn hints(&self) -> &[ParamHint] {
        &self.hints
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    pub fn hint(&self, name: &str) -> Option<&ParamHint> {
        self.index_of(name).map(|i| &self.hints[i])
    }

    pub fn hint_mut(&mut self, name: &str) -> Option<&mut ParamHint> {
        let i = self.index_of(name)?;
        Some(&mut self.hints[i])
    }

    /// Replace the hint of an existing parameter.
    pub fn set_hint(&mut self, name: &str, hint: ParamHint) -> Result<()> {
        let slot = self
            .hint_mut(name)
            .ok_or_else(|| FitError::MissingParameter(name.to_string()))?;
        *slot = hint;
        Ok(())
    }

    /// Layer a store record onto `name` (see [`ParamHint::apply_record`]).
    pub fn apply_record(&mut self, name: &str, record: &ParamRecord) -> Result<()> {
        let hint = self
            .hint_mut(name)
            .ok_or_else(|| FitError::MissingParameter(name.to_string()))?;
        hint.apply_record(record);
        debug!(
            param = name,
            bound = %record.bound_type,
            value = record.value,
            min = record.min,
            max = record.max,
            "parameter hint set"
        );
        Ok(())
    }

    /// Indices of the parameters the optimizer moves.
    pub fn free_indices(&self) -> Vec<usize> {
        (0..self.hints.len()).filter(|&i| self.hints[i].is_free()).collect()
    }

    /// Linked parameters whose source is present, sources first.
    pub fn link_order(&self) -> Result<Vec<usize>> {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            New,
            Active,
            Done,
        }

        let mut marks = vec![Mark::New; self.hints.len()];
        let mut order = Vec::new();
        for start in 0..self.hints.len() {
            if marks[start] == Mark::Done {
                continue;
            }
            // Walk the source chain from `start`, then unwind it in reverse.
            let mut chain = Vec::new();
            let mut cur = Some(start);
            while let Some(i) = cur {
                match marks[i] {
                    Mark::Done => break,
                    Mark::Active => return Err(FitError::LinkCycle(self.names[i].clone())),
                    Mark::New => {
                        marks[i] = Mark::Active;
                        chain.push(i);
                        cur = self.source_of(i);
                    }
                }
            }
            for &i in chain.iter().rev() {
                marks[i] = Mark::Done;
                if self.source_of(i).is_some() {
                    order.push(i);
                }
            }
        }
        Ok(order)
    }

    fn source_of(&self, i: usize) -> Option<usize> {
        self.hints[i]
            .link
            .as_ref()
            .and_then(|link| self.index_of(&link.source))
    }

    /// Recompute linked entries of `values` from their sources.
    pub fn propagate_links(&self, values: &mut [f64], order: &[usize]) {
        for &i in order {
            if let (Some(link), Some(src)) = (&self.hints[i].link, self.source_of(i)) {
                values[i] = link.multiplier * values[src];
            }
        }
    }

    /// Current values with links resolved, in table order.
    pub fn resolved_values(&self) -> Result<Vec<f64>> {
        let order = self.link_order()?;
        let mut values: Vec<f64> = self.hints.iter().map(|h| h.value).collect();
        self.propagate_links(&mut values, &order);
        Ok(values)
    }

    /// Resolved values by name.
    pub fn values(&self) -> Result<BTreeMap<String, f64>> {
        let values = self.resolved_values()?;
        Ok(self.names.iter().cloned().zip(values).collect())
    }

    /// Store `values` (table order) as the hints' values.
    pub fn set_values(&mut self, values: &[f64]) -> Result<()> {
        if values.len() != self.hints.len() {
            return Err(FitError::ShapeMismatch {
                what: "parameter values",
                got: values.len(),
                expected: self.hints.len(),
            });
        }
        for (hint, &v) in self.hints.iter_mut().zip(values) {
            hint.value = v;
        }
        Ok(())
    }

    /// Sum of all components at the current hint values.
    pub fn eval(&self, x: &[f64]) -> Result<Vec<f64>> {
        Ok(self.eval_with(&self.resolved_values()?, x))
    }

    /// Per-component curves at the current hint values.
    pub fn eval_components(&self, x: &[f64]) -> Result<Vec<(String, Vec<f64>)>> {
        Ok(self.component_curves(&self.resolved_values()?, x))
    }

    /// Sum of all components for an already resolved value table.
    pub fn eval_with(&self, values: &[f64], x: &[f64]) -> Vec<f64> {
        let mut total = vec![0.0; x.len()];
        for component in &self.components {
            let curve = self.eval_component(component, values, x);
            for (t, c) in total.iter_mut().zip(curve) {
                *t += c;
            }
        }
        total
    }

    pub fn component_curves(&self, values: &[f64], x: &[f64]) -> Vec<(String, Vec<f64>)> {
        self.components
            .iter()
            .map(|c| (c.name.clone(), self.eval_component(c, values, x)))
            .collect()
    }

    fn eval_component(&self, component: &Component, values: &[f64], x: &[f64]) -> Vec<f64> {
        let local: Vec<f64> = component.slots.iter().map(|&s| values[s]).collect();
        component.shape.evaluate(x, &local)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn channels() -> Vec<f64> {
        (0..1500u32).map(f64::from).collect()
    }

    fn line(name: &str, center: f64) -> CompositeModel {
        let prefix = format!("{name}_");
        let mut model = CompositeModel::single(name, &prefix, Shape::Line);
        model
            .set_hint(&format!("{prefix}center"), ParamHint::fixed(center))
            .unwrap();
        model
    }

    #[test]
    fn single_component_prefixes_every_parameter() {
        let model = CompositeModel::single("elastic", "elastic_", Shape::Elastic);
        assert_eq!(model.len(), ELASTIC_PARAMS.len());
        assert!(model.hint("elastic_coherent_sct_amplitude").is_some());
        assert!(model.hint("elastic_epsilon").is_some());
        assert!(model.free_indices().is_empty());
        assert_eq!(model.components()[0].name(), "elastic");
    }

    #[test]
    fn merging_duplicate_names_is_a_collision() {
        let a = line("Fe_ka1", 6.4);
        let b = line("Fe_ka1", 6.4);
        assert!(matches!(a.merge(b), Err(FitError::NameCollision(n)) if n == "Fe_ka1_area"));
    }

    #[test]
    fn links_resolve_through_chains_in_any_table_order() {
        // c -> b -> a, declared in reverse
        let mut model = line("c", 1.0)
            .merge(line("b", 2.0))
            .unwrap()
            .merge(line("a", 3.0))
            .unwrap();
        model.set_hint("a_area", ParamHint::free(10.0)).unwrap();
        model.set_hint("b_area", ParamHint::linked(0.0, "a_area")).unwrap();
        let mut hint = ParamHint::linked(0.0, "b_area");
        if let Some(link) = hint.link.as_mut() {
            link.multiplier = 0.5;
        }
        model.set_hint("c_area", hint).unwrap();

        let values = model.values().unwrap();
        assert_eq!(values["b_area"], 10.0);
        assert_eq!(values["c_area"], 5.0);
        // linked parameters are never free
        let free: Vec<&str> = model
            .free_indices()
            .into_iter()
            .map(|i| model.param_names()[i].as_str())
            .collect();
        assert_eq!(free, ["a_area"]);
    }

    #[test]
    fn cyclic_links_are_rejected() {
        let mut model = line("a", 1.0).merge(line("b", 2.0)).unwrap();
        model.set_hint("a_area", ParamHint::linked(1.0, "b_area")).unwrap();
        model.set_hint("b_area", ParamHint::linked(1.0, "a_area")).unwrap();
        assert!(matches!(model.link_order(), Err(FitError::LinkCycle(_))));
        assert!(model.eval(&channels()).is_err());
    }

    #[test]
    fn link_to_absent_source_keeps_own_value() {
        let mut model = line("Fe_kb1", 7.06);
        model
            .set_hint("Fe_kb1_area", ParamHint::linked(250.0, "Fe_ka1_area"))
            .unwrap();
        assert_eq!(model.values().unwrap()["Fe_kb1_area"], 250.0);
    }

    #[test]
    fn records_only_touch_named_bounds() {
        let mut hint = ParamHint::free(1.0).with_min(0.0);
        hint.apply_record(&ParamRecord::new(5.0, BoundType::Free, -3.0, 3.0));
        assert_eq!((hint.value, hint.vary, hint.min), (5.0, true, 0.0));

        hint.apply_record(&ParamRecord::new(2.0, BoundType::Hi, -3.0, 3.0));
        assert_eq!((hint.min, hint.max), (0.0, 3.0));

        hint.apply_record(&ParamRecord::new(2.0, BoundType::LoHi, -1.0, 4.0));
        assert_eq!((hint.min, hint.max, hint.vary), (-1.0, 4.0, true));

        hint.apply_record(&ParamRecord::new(2.0, BoundType::Fixed, 0.0, 0.0));
        assert!(!hint.vary);
        assert_eq!((hint.min, hint.max), (-1.0, 4.0));
    }

    #[test]
    fn evaluation_is_the_sum_of_component_curves() {
        let x = channels();
        let model = line("Fe_ka1", 6.4).merge(line("Cu_ka1", 8.04)).unwrap();
        let total = model.eval(&x).unwrap();
        let parts = model.eval_components(&x).unwrap();
        assert_eq!(parts.len(), 2);
        for (i, t) in total.iter().enumerate() {
            let sum: f64 = parts.iter().map(|(_, c)| c[i]).sum();
            assert!((t - sum).abs() < 1e-9);
        }
    }
}
