//! Parameter data model.
//!
//! The parameter store is the whole configuration contract of the engine. On
//! disk it is a flat JSON object:
//!
//! ```text
//! {
//!   "e_offset":    {"value": 0.0, "bound_type": "lohi", "min": -0.1, "max": 0.1},
//!   "Fe_ka1_area": {"value": 1000.0, "bound_type": "none", "min": 0.0, "max": 1e9},
//!   "non_fitting_values": {"epsilon": 2.96, "background_width": 0.5}
//! }
//! ```
//!
//! In memory every name is a structured [`ParamKey`]; the flat string only
//! exists at the serialization boundary and when talking to the composite
//! model, which needs flat names.

use std::collections::BTreeMap;
use std::convert::Infallible;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::domain::lines::{EmissionLine, Transition, is_element_symbol};
use crate::error::{FitError, Result};

/// Optimizer constraint kind for one parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BoundType {
    /// Free, unbounded.
    #[serde(rename = "none")]
    Free,
    #[serde(rename = "fixed")]
    Fixed,
    #[serde(rename = "lo")]
    Lo,
    #[serde(rename = "hi")]
    Hi,
    #[serde(rename = "lohi")]
    LoHi,
}

impl BoundType {
    pub fn as_str(self) -> &'static str {
        match self {
            BoundType::Free => "none",
            BoundType::Fixed => "fixed",
            BoundType::Lo => "lo",
            BoundType::Hi => "hi",
            BoundType::LoHi => "lohi",
        }
    }
}

impl fmt::Display for BoundType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Value plus bounds of one named parameter.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ParamRecord {
    pub value: f64,
    pub bound_type: BoundType,
    #[serde(default)]
    pub min: f64,
    #[serde(default)]
    pub max: f64,
}

impl ParamRecord {
    pub fn new(value: f64, bound_type: BoundType, min: f64, max: f64) -> Self {
        Self {
            value,
            bound_type,
            min,
            max,
        }
    }

    pub fn fixed(value: f64) -> Self {
        Self::new(value, BoundType::Fixed, value, value)
    }

    /// Check that the bounds used by `bound_type` are usable.
    pub fn validate(&self, name: &str) -> Result<()> {
        let invalid = |reason: &str| FitError::InvalidRecord {
            name: name.to_string(),
            reason: reason.to_string(),
        };
        if !self.value.is_finite() {
            return Err(invalid("value must be finite"));
        }
        let needs_min = matches!(self.bound_type, BoundType::Lo | BoundType::LoHi);
        let needs_max = matches!(self.bound_type, BoundType::Hi | BoundType::LoHi);
        if needs_min && !self.min.is_finite() {
            return Err(invalid("lower bound must be finite"));
        }
        if needs_max && !self.max.is_finite() {
            return Err(invalid("upper bound must be finite"));
        }
        if needs_min && needs_max && self.min > self.max {
            return Err(invalid("min > max"));
        }
        Ok(())
    }
}

/// Engine-wide scalars that are never optimized.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NonFittingValues {
    /// Energy to create one electron-hole pair in the detector (eV).
    #[serde(default = "default_epsilon")]
    pub epsilon: f64,
    /// SNIP clipping window, in units of the local peak FWHM.
    #[serde(default = "default_background_width")]
    pub background_width: f64,
}

fn default_epsilon() -> f64 {
    2.96
}

fn default_background_width() -> f64 {
    0.5
}

impl Default for NonFittingValues {
    fn default() -> Self {
        Self {
            epsilon: default_epsilon(),
            background_width: default_background_width(),
        }
    }
}

/// Per-line attribute a [`ParamKey`] can address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LineAttr {
    Area,
    DeltaCenter,
    DeltaSigma,
    RatioAdjust,
}

impl LineAttr {
    pub const ALL: [LineAttr; 4] = [
        LineAttr::Area,
        LineAttr::DeltaCenter,
        LineAttr::DeltaSigma,
        LineAttr::RatioAdjust,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            LineAttr::Area => "area",
            LineAttr::DeltaCenter => "delta_center",
            LineAttr::DeltaSigma => "delta_sigma",
            LineAttr::RatioAdjust => "ratio_adjust",
        }
    }

    pub fn parse(s: &str) -> Option<LineAttr> {
        LineAttr::ALL.iter().copied().find(|a| a.as_str() == s)
    }
}

/// Structured parameter name.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ParamKey {
    /// Calibration, broadening, scatter and other unstructured names.
    Global(String),
    Line {
        element: String,
        transition: Transition,
        attr: LineAttr,
    },
    Pileup {
        first: EmissionLine,
        second: EmissionLine,
        attr: LineAttr,
    },
}

/// Store names that the composite model keeps under the elastic prefix.
const ELASTIC_NAMES: [&str; 2] = ["coherent_sct_amplitude", "coherent_sct_energy"];

impl ParamKey {
    pub fn global(name: impl Into<String>) -> Self {
        ParamKey::Global(name.into())
    }

    pub fn line(element: impl Into<String>, transition: Transition, attr: LineAttr) -> Self {
        ParamKey::Line {
            element: element.into(),
            transition,
            attr,
        }
    }

    pub fn pileup(first: EmissionLine, second: EmissionLine, attr: LineAttr) -> Self {
        ParamKey::Pileup {
            first,
            second,
            attr,
        }
    }

    pub fn attr(&self) -> Option<LineAttr> {
        match self {
            ParamKey::Global(_) => None,
            ParamKey::Line { attr, .. } | ParamKey::Pileup { attr, .. } => Some(*attr),
        }
    }

    /// Name of the matching parameter in a solved composite model.
    pub fn solver_name(&self) -> String {
        match self {
            ParamKey::Global(name) if ELASTIC_NAMES.contains(&name.as_str()) => {
                format!("elastic_{name}")
            }
            other => other.to_string(),
        }
    }

    fn parse_flat(s: &str) -> ParamKey {
        if let Some(rest) = s.strip_prefix("pileup_") {
            if let Some(key) = parse_pileup(rest) {
                return key;
            }
        } else if let Some(key) = parse_line(s) {
            return key;
        }
        ParamKey::Global(s.to_string())
    }
}

fn parse_line(s: &str) -> Option<ParamKey> {
    let (element, rest) = s.split_once('_')?;
    if !is_element_symbol(element) {
        return None;
    }
    let (transition, attr) = rest.split_once('_')?;
    Some(ParamKey::line(
        element,
        Transition::parse(transition)?,
        LineAttr::parse(attr)?,
    ))
}

fn parse_pileup(rest: &str) -> Option<ParamKey> {
    let (pair, attr) = LineAttr::ALL.iter().find_map(|a| {
        rest.strip_suffix(a.as_str())
            .and_then(|p| p.strip_suffix('_'))
            .map(|p| (p, *a))
    })?;

    if let Some((first, second)) = pair.split_once('-') {
        return Some(ParamKey::pileup(
            EmissionLine::parse(first)?,
            EmissionLine::parse(second)?,
            attr,
        ));
    }
    // `Cl_K_Cl_K`: try every `_` as the boundary between the two lines.
    pair.match_indices('_').find_map(|(i, _)| {
        let first = EmissionLine::parse(&pair[..i])?;
        let second = EmissionLine::parse(&pair[i + 1..])?;
        Some(ParamKey::pileup(first, second, attr))
    })
}

impl fmt::Display for ParamKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamKey::Global(name) => f.write_str(name),
            ParamKey::Line {
                element,
                transition,
                attr,
            } => write!(f, "{element}_{transition}_{}", attr.as_str()),
            ParamKey::Pileup {
                first,
                second,
                attr,
            } => write!(f, "pileup_{first}_{second}_{}", attr.as_str()),
        }
    }
}

impl FromStr for ParamKey {
    type Err = Infallible;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(ParamKey::parse_flat(s))
    }
}

impl Serialize for ParamKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ParamKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(ParamKey::parse_flat(&s))
    }
}

/// Ordered mapping from parameter name to record.
///
/// Inserting an existing key overwrites it in place.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParamStore {
    #[serde(rename = "non_fitting_values", default)]
    pub non_fitting: NonFittingValues,
    #[serde(flatten)]
    params: BTreeMap<ParamKey, ParamRecord>,
}

impl ParamStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_json_str(s: &str) -> Result<Self> {
        let store: ParamStore = serde_json::from_str(s)?;
        store.validate()?;
        Ok(store)
    }

    pub fn to_json_string(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<()> {
        for (key, record) in &self.params {
            record.validate(&key.to_string())?;
        }
        Ok(())
    }

    pub fn get(&self, key: &ParamKey) -> Option<&ParamRecord> {
        self.params.get(key)
    }

    pub fn get_mut(&mut self, key: &ParamKey) -> Option<&mut ParamRecord> {
        self.params.get_mut(key)
    }

    /// Lookup by flat name.
    pub fn get_named(&self, name: &str) -> Option<&ParamRecord> {
        self.params.get(&ParamKey::parse_flat(name))
    }

    pub fn global(&self, name: &str) -> Option<&ParamRecord> {
        self.params.get(&ParamKey::global(name))
    }

    pub fn contains(&self, key: &ParamKey) -> bool {
        self.params.contains_key(key)
    }

    pub fn insert(&mut self, key: ParamKey, record: ParamRecord) {
        self.params.insert(key, record);
    }

    pub fn remove(&mut self, key: &ParamKey) -> Option<ParamRecord> {
        self.params.remove(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ParamKey, &ParamRecord)> {
        self.params.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&ParamKey, &mut ParamRecord)> {
        self.params.iter_mut()
    }

    pub fn len(&self) -> usize {
        self.params.len()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    /// Value of a required global parameter.
    pub fn global_value(&self, name: &str) -> Result<f64> {
        self.global(name)
            .map(|r| r.value)
            .ok_or_else(|| FitError::MissingParameter(name.to_string()))
    }

    /// Beam energy, stored as the elastic (coherent scatter) energy.
    pub fn incident_energy(&self) -> Result<f64> {
        self.global_value("coherent_sct_energy")
    }

    /// Quadratic channel-to-energy calibration `(offset, linear, quadratic)`.
    ///
    /// The linear term is the channel width and must be finite and positive.
    pub fn calibration(&self) -> Result<(f64, f64, f64)> {
        let e_linear = self.global_value("e_linear")?;
        if !(e_linear.is_finite() && e_linear > 0.0) {
            return Err(FitError::InvalidRecord {
                name: "e_linear".into(),
                reason: format!("channel width must be finite and > 0, got {e_linear}"),
            });
        }
        Ok((
            self.global_value("e_offset")?,
            e_linear,
            self.global_value("e_quadratic")?,
        ))
    }

    /// A store with every global the model understands, for a 12 keV beam and
    /// a 10 eV/channel silicon drift detector.
    pub fn default_xrf() -> Self {
        use BoundType::{Fixed, Free, LoHi};

        let mut store = ParamStore::new();
        let entries: [(&str, ParamRecord); 15] = [
            ("e_offset", ParamRecord::new(0.0, LoHi, -0.1, 0.1)),
            ("e_linear", ParamRecord::new(0.01, LoHi, 0.009, 0.011)),
            ("e_quadratic", ParamRecord::new(0.0, LoHi, -1e-5, 1e-5)),
            ("fwhm_offset", ParamRecord::new(0.12, LoHi, 0.05, 0.2)),
            ("fwhm_fanoprime", ParamRecord::new(1.1e-4, LoHi, 1e-6, 5e-4)),
            ("coherent_sct_energy", ParamRecord::new(12.0, LoHi, 11.5, 12.5)),
            ("coherent_sct_amplitude", ParamRecord::new(1e5, Free, 0.0, 1e9)),
            ("compton_amplitude", ParamRecord::new(1e5, Free, 0.0, 1e9)),
            ("compton_angle", ParamRecord::new(90.0, LoHi, 75.0, 105.0)),
            ("compton_fwhm_corr", ParamRecord::new(1.5, LoHi, 1.0, 3.0)),
            ("compton_f_step", ParamRecord::new(0.0, Fixed, 0.0, 0.01)),
            ("compton_f_tail", ParamRecord::new(0.1, LoHi, 0.0, 0.3)),
            ("compton_gamma", ParamRecord::new(2.0, LoHi, 0.1, 10.0)),
            ("compton_hi_f_tail", ParamRecord::new(0.01, LoHi, 1e-6, 0.1)),
            ("compton_hi_gamma", ParamRecord::new(1.0, Fixed, 0.1, 3.0)),
        ];
        for (name, record) in entries {
            store.insert(ParamKey::global(name), record);
        }
        store
    }
}
