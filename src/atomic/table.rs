//! Embedded reference table of line energies and relative intensities.
//!
//! The table covers the elements used by the test-suite and the demo spectra.
//! Each line carries its energy, the absorption edge that feeds it and a
//! relative emission weight. The cross section at incident energy `E` is
//!
//! ```text
//! cs(E) = weight · (edge / E)^PHOTO_EXPONENT   if E ≥ edge
//!       = 0                                    otherwise
//! ```
//!
//! which is enough to reproduce the activation thresholds and the branching
//! ratios the model relies on. A full photo-ionization database can replace it
//! through [`AtomicData`].

use std::collections::BTreeMap;

use serde::Deserialize;

use crate::atomic::{AtomicData, CrossSections, EmissionLines, TransitionValues};
use crate::domain::Transition;
use crate::error::{FitError, Result};

const BUILTIN: &str = include_str!("../../data/reference_lines.json");

/// Energy dependence of photo-ionization above an edge.
const PHOTO_EXPONENT: f64 = 2.7;

/// Absorption edge that creates the vacancy each line fills.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Deserialize)]
pub enum Shell {
    K,
    L1,
    L2,
    L3,
    M3,
    M4,
    M5,
}

impl Shell {
    pub fn of(transition: Transition) -> Shell {
        use Transition::*;
        match transition {
            Ka1 | Ka2 | Kb1 | Kb2 => Shell::K,
            La1 | La2 | Lb2 | Lb5 | Ll => Shell::L3,
            Lb1 | Lg1 | Ln => Shell::L2,
            Lb3 | Lb4 | Lg2 | Lg3 | Lg4 => Shell::L1,
            Ma1 | Ma2 => Shell::M5,
            Mb => Shell::M4,
            Mg => Shell::M3,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawElement {
    edges: BTreeMap<Shell, f64>,
    /// transition name -> `[energy_keV, weight]`
    lines: BTreeMap<String, (f64, f64)>,
}

#[derive(Debug, Clone)]
struct ElementEntry {
    energies: [f64; 21],
    weights: [f64; 21],
    edges: [f64; 21],
}

/// [`AtomicData`] backed by a JSON table.
#[derive(Debug, Clone)]
pub struct ReferenceTable {
    elements: BTreeMap<String, ElementEntry>,
}

impl ReferenceTable {
    /// The table compiled into the crate.
    pub fn builtin() -> Result<Self> {
        Self::from_json_str(BUILTIN)
    }

    pub fn from_json_str(s: &str) -> Result<Self> {
        let raw: BTreeMap<String, RawElement> = serde_json::from_str(s)?;
        let mut elements = BTreeMap::new();
        for (symbol, element) in raw {
            elements.insert(symbol.clone(), build_entry(&symbol, element)?);
        }
        Ok(Self { elements })
    }

    pub fn elements(&self) -> impl Iterator<Item = &str> {
        self.elements.keys().map(String::as_str)
    }
}

fn build_entry(symbol: &str, raw: RawElement) -> Result<ElementEntry> {
    let mut entry = ElementEntry {
        energies: [0.0; 21],
        weights: [0.0; 21],
        edges: [0.0; 21],
    };
    for (name, (energy, weight)) in raw.lines {
        let invalid = |reason: String| FitError::InvalidRecord {
            name: format!("{symbol}_{name}"),
            reason,
        };
        let transition =
            Transition::parse(&name).ok_or_else(|| invalid("unknown transition".into()))?;
        let shell = Shell::of(transition);
        let edge = raw
            .edges
            .get(&shell)
            .copied()
            .ok_or_else(|| invalid(format!("no {shell:?} edge listed")))?;
        if !(energy.is_finite() && weight.is_finite() && weight >= 0.0) {
            return Err(invalid("energy and weight must be finite, weight ≥ 0".into()));
        }
        let i = transition.index();
        entry.energies[i] = energy;
        entry.weights[i] = weight;
        entry.edges[i] = edge;
    }
    Ok(entry)
}

impl AtomicData for ReferenceTable {
    fn emission_lines(&self, element: &str) -> Option<EmissionLines> {
        self.elements
            .get(element)
            .map(|e| TransitionValues::new(e.energies))
    }

    fn cross_sections(&self, element: &str, incident_energy: f64) -> Option<CrossSections> {
        let entry = self.elements.get(element)?;
        let mut cs = [0.0; 21];
        for (i, value) in cs.iter_mut().enumerate() {
            let edge = entry.edges[i];
            if entry.energies[i] > 0.0 && edge > 0.0 && incident_energy >= edge {
                *value = entry.weights[i] * (edge / incident_energy).powf(PHOTO_EXPONENT);
            }
        }
        Some(TransitionValues::new(cs))
    }
}
