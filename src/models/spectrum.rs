//! Spectrum assembly from a parameter store and an element list.
//!
//! The assembled model is
//!
//! ```text
//! Compton + Elastic + Σ series models + Σ pileup models
//! ```
//!
//! Calibration and detector broadening are owned by the Compton component;
//! every other component links its copies to those parameters. Inside a
//! series, only the anchor line has its own area; secondary lines link to it
//! and get their relative height from the fixed branching ratio.

use tracing::debug;

use crate::atomic::{AtomicData, parse_request};
use crate::domain::{
    EmissionLine, LineAttr, LineKind, LineRequest, ParamKey, ParamStore, Transition,
};
use crate::error::{FitError, Result};
use crate::fit::nonlinear::{NonlinearFit, fit_composite};
use crate::math::lm::LmConfig;
use crate::models::composite::{CompositeModel, ParamHint, Shape};

/// Store globals copied onto the Compton component.
pub const COMPTON_STORE_PARAMS: [&str; 14] = [
    "coherent_sct_energy",
    "compton_amplitude",
    "compton_angle",
    "fwhm_offset",
    "fwhm_fanoprime",
    "e_offset",
    "e_linear",
    "e_quadratic",
    "compton_gamma",
    "compton_f_tail",
    "compton_f_step",
    "compton_fwhm_corr",
    "compton_hi_gamma",
    "compton_hi_f_tail",
];

/// Elastic parameters tied to their Compton counterparts.
const ELASTIC_LINKED: [&str; 6] = [
    "e_offset",
    "e_linear",
    "e_quadratic",
    "fwhm_offset",
    "fwhm_fanoprime",
    "coherent_sct_energy",
];

/// Line parameters tied to their Compton counterparts.
const LINE_LINKED: [&str; 5] = [
    "e_offset",
    "e_linear",
    "e_quadratic",
    "fwhm_offset",
    "fwhm_fanoprime",
];

/// Per-line store overrides layered after the defaults.
const LINE_OVERRIDES: [LineAttr; 3] = [
    LineAttr::DeltaCenter,
    LineAttr::DeltaSigma,
    LineAttr::RatioAdjust,
];

/// Starting area of an anchor or pileup line without a stored value.
pub const DEFAULT_AREA: f64 = 1e5;

/// Builds composite models from a private copy of the store.
pub struct ModelSpectrum<'a> {
    params: ParamStore,
    element_list: Vec<LineRequest>,
    atomic: &'a dyn AtomicData,
    incident_energy: f64,
    epsilon: f64,
    compton: CompositeModel,
    elastic: CompositeModel,
}

impl<'a> ModelSpectrum<'a> {
    /// Copy `params`, parse `elements` and set up the scatter components.
    ///
    /// Malformed or unsupported element entries fail here, before any fit.
    pub fn new<S: AsRef<str>>(
        params: &ParamStore,
        elements: &[S],
        atomic: &'a dyn AtomicData,
    ) -> Result<Self> {
        let element_list = elements
            .iter()
            .map(|e| parse_request(atomic, e.as_ref()))
            .collect::<Result<Vec<_>>>()?;

        let mut spectrum = Self {
            params: params.clone(),
            element_list,
            atomic,
            incident_energy: params.incident_energy()?,
            epsilon: params.non_fitting.epsilon,
            compton: CompositeModel::new(),
            elastic: CompositeModel::new(),
        };
        spectrum.compton = spectrum.setup_compton_model()?;
        spectrum.elastic = spectrum.setup_elastic_model()?;
        Ok(spectrum)
    }

    pub fn params(&self) -> &ParamStore {
        &self.params
    }

    pub fn element_list(&self) -> &[LineRequest] {
        &self.element_list
    }

    pub fn incident_energy(&self) -> f64 {
        self.incident_energy
    }

    pub fn compton(&self) -> &CompositeModel {
        &self.compton
    }

    pub fn elastic(&self) -> &CompositeModel {
        &self.elastic
    }

    fn setup_compton_model(&self) -> Result<CompositeModel> {
        debug!("setting up compton model");
        let mut compton = CompositeModel::single("compton", "", Shape::Compton);
        for name in COMPTON_STORE_PARAMS {
            if let Some(record) = self.params.global(name) {
                compton.apply_record(name, record)?;
            }
        }
        compton.set_hint("epsilon", ParamHint::fixed(self.epsilon))?;
        Ok(compton)
    }

    fn setup_elastic_model(&self) -> Result<CompositeModel> {
        debug!("setting up elastic model");
        let mut elastic = CompositeModel::single("elastic", "elastic_", Shape::Elastic);
        self.link_to_compton(&mut elastic, "elastic_", &ELASTIC_LINKED)?;

        for name in ELASTIC_LINKED.iter().chain(["coherent_sct_amplitude"].iter()) {
            if let Some(record) = self.params.global(name) {
                elastic.apply_record(&format!("elastic_{name}"), record)?;
            }
        }
        elastic.set_hint("elastic_epsilon", ParamHint::fixed(self.epsilon))?;
        Ok(elastic)
    }

    /// Tie `prefix + name` to the Compton parameter `name`, starting from its
    /// current value.
    fn link_to_compton(
        &self,
        model: &mut CompositeModel,
        prefix: &str,
        names: &[&str],
    ) -> Result<()> {
        for name in names {
            let value = self
                .compton
                .hint(name)
                .map(|h| h.value)
                .ok_or_else(|| FitError::MissingParameter(name.to_string()))?;
            model.set_hint(&format!("{prefix}{name}"), ParamHint::linked(value, *name))?;
        }
        Ok(())
    }

    /// One line component with calibration linked and `epsilon` fixed.
    fn line_component(&self, name: &str) -> Result<CompositeModel> {
        let prefix = format!("{name}_");
        let mut model = CompositeModel::single(name, &prefix, Shape::Line);
        self.link_to_compton(&mut model, &prefix, &LINE_LINKED)?;
        model.set_hint(&format!("{prefix}epsilon"), ParamHint::fixed(self.epsilon))?;
        Ok(model)
    }

    /// Sub-model of one element list entry.
    ///
    /// Returns `Ok(None)` for a series that is not excited at the incident
    /// energy. `default_area` seeds anchor and pileup areas missing from the
    /// store.
    pub fn setup_element_model(
        &self,
        request: &LineRequest,
        default_area: f64,
    ) -> Result<Option<CompositeModel>> {
        match request {
            LineRequest::Single(EmissionLine {
                element,
                kind: LineKind::Series(series),
            }) => {
                let cs = self
                    .atomic
                    .cross_sections(element, self.incident_energy)
                    .ok_or_else(|| FitError::AtomicDataMissing(element.clone()))?;
                let energies = self
                    .atomic
                    .emission_lines(element)
                    .ok_or_else(|| FitError::AtomicDataMissing(element.clone()))?;
                let anchor = series.anchor();
                let anchor_cs = cs.get(anchor);
                if anchor_cs == 0.0 {
                    debug!(%request, incident_energy = self.incident_energy, "series not excited");
                    return Ok(None);
                }

                debug!(%request, "building series model");
                let mut series_model: Option<CompositeModel> = None;
                for (transition, line_cs) in cs.series(*series) {
                    if line_cs == 0.0 {
                        continue;
                    }
                    let line = self.transition_model(
                        element,
                        transition,
                        anchor,
                        energies.get(transition),
                        line_cs / anchor_cs,
                        default_area,
                    )?;
                    series_model = Some(match series_model {
                        Some(acc) => acc.merge(line)?,
                        None => line,
                    });
                }
                Ok(series_model)
            }
            LineRequest::Single(_) => Err(FitError::MalformedLine(request.to_string())),
            LineRequest::Pileup(first, second) => {
                self.pileup_model(first, second, &request.model_token(), default_area)
                    .map(Some)
            }
        }
    }

    fn transition_model(
        &self,
        element: &str,
        transition: Transition,
        anchor: Transition,
        center: f64,
        ratio: f64,
        default_area: f64,
    ) -> Result<CompositeModel> {
        let name = format!("{element}_{transition}");
        let param = |local: &str| format!("{name}_{local}");
        let anchor_param = |local: &str| format!("{element}_{anchor}_{local}");
        let mut model = self.line_component(&name)?;

        let area_key = ParamKey::line(element, transition, LineAttr::Area);
        let area = self.params.get(&area_key).map_or(default_area, |r| r.value);
        if transition == anchor {
            model.set_hint(&param("area"), ParamHint::free(area).with_min(0.0))?;
        } else {
            model.set_hint(&param("area"), ParamHint::linked(area, anchor_param("area")))?;
            if transition == Transition::Ka2 {
                for local in ["delta_center", "delta_sigma"] {
                    model.set_hint(&param(local), ParamHint::linked(0.0, anchor_param(local)))?;
                }
            }
        }
        if let Some(record) = self.params.get(&area_key) {
            model.apply_record(&param("area"), record)?;
        }

        model.set_hint(&param("center"), ParamHint::fixed(center))?;
        model.set_hint(&param("ratio"), ParamHint::fixed(ratio))?;
        model.set_hint(&param("ratio_adjust"), ParamHint::fixed(1.0))?;
        debug!(line = %name, center, ratio, "line added");

        for attr in LINE_OVERRIDES {
            if let Some(record) = self.params.get(&ParamKey::line(element, transition, attr)) {
                model.apply_record(&param(attr.as_str()), record)?;
            }
        }
        Ok(model)
    }

    fn pileup_model(
        &self,
        first: &EmissionLine,
        second: &EmissionLine,
        token: &str,
        default_area: f64,
    ) -> Result<CompositeModel> {
        let center = self.line_energy(first)? + self.line_energy(second)?;
        let name = format!("pileup_{token}");
        let param = |local: &str| format!("{name}_{local}");
        let mut model = self.line_component(&name)?;

        let key = |attr| ParamKey::pileup(first.clone(), second.clone(), attr);
        let area = self.params.get(&key(LineAttr::Area)).map_or(default_area, |r| r.value);
        model.set_hint(&param("area"), ParamHint::free(area).with_min(0.0))?;
        if let Some(record) = self.params.get(&key(LineAttr::Area)) {
            model.apply_record(&param("area"), record)?;
        }
        model.set_hint(&param("center"), ParamHint::fixed(center))?;
        for attr in LINE_OVERRIDES {
            if let Some(record) = self.params.get(&key(attr)) {
                model.apply_record(&param(attr.as_str()), record)?;
            }
        }
        debug!(pileup = %name, center, "pileup added");
        Ok(model)
    }

    /// Energy of an explicit transition, or of the anchor line of a series.
    fn line_energy(&self, line: &EmissionLine) -> Result<f64> {
        let energies = self
            .atomic
            .emission_lines(&line.element)
            .ok_or_else(|| FitError::AtomicDataMissing(line.element.clone()))?;
        Ok(energies.get(line.reference_transition()))
    }

    /// Compton + elastic + every excited element entry.
    pub fn assemble_models(&self) -> Result<CompositeModel> {
        let mut model = self.compton.clone().merge(self.elastic.clone())?;
        for request in &self.element_list {
            if let Some(sub) = self.setup_element_model(request, DEFAULT_AREA)? {
                model = model.merge(sub)?;
            }
        }
        model.link_order()?;
        debug!(
            components = model.components().len(),
            params = model.len(),
            free = model.free_indices().len(),
            "spectrum model assembled"
        );
        Ok(model)
    }

    /// Assemble the model and fit it to `spectrum` on the channel axis `x`.
    ///
    /// `weights` multiply the residuals.
    pub fn model_fit(
        &self,
        x: &[f64],
        spectrum: &[f64],
        weights: Option<&[f64]>,
        config: &LmConfig,
    ) -> Result<NonlinearFit> {
        let model = self.assemble_models()?;
        fit_composite(&model, x, spectrum, weights, config)
    }
}
