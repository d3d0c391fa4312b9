//! Atomic data seam and line activation.
//!
//! The engine never hard-codes line energies or cross sections; it asks an
//! [`AtomicData`] implementation. [`ReferenceTable`] is the built-in one.
//!
//! Activation rule for a series request such as `Fe_K`:
//!
//! - look up the cross section of the anchor line (`ka1`/`la1`/`ma1`) at the
//!   incident energy; zero means the series is not excited and yields nothing
//! - otherwise keep every transition of the series with non-zero cross
//!   section, in canonical order, named `<element>_<transition>`

pub mod table;

pub use table::ReferenceTable;

use tracing::debug;

use crate::domain::{EmissionLine, LineKind, LineRequest, Series, Transition};
use crate::error::{FitError, Result};

/// Per-transition values for one element, indexed in [`Transition::ALL`] order.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TransitionValues([f64; 21]);

impl TransitionValues {
    pub fn new(values: [f64; 21]) -> Self {
        Self(values)
    }

    pub fn get(&self, transition: Transition) -> f64 {
        self.0[transition.index()]
    }

    /// `(transition, value)` pairs for one series, in canonical order.
    pub fn series(&self, series: Series) -> impl Iterator<Item = (Transition, f64)> + '_ {
        series.transitions().iter().map(|&t| (t, self.get(t)))
    }

    pub fn iter(&self) -> impl Iterator<Item = (Transition, f64)> + '_ {
        Transition::ALL.iter().map(|&t| (t, self.get(t)))
    }
}

/// Emission energies in keV; lines absent for an element have energy 0.
pub type EmissionLines = TransitionValues;

/// Cross sections at one incident energy; 0 means the line is not excited.
pub type CrossSections = TransitionValues;

/// Line energy and excitation lookup, shared read-only across fits.
pub trait AtomicData: Send + Sync {
    fn emission_lines(&self, element: &str) -> Option<EmissionLines>;

    fn cross_sections(&self, element: &str, incident_energy: f64) -> Option<CrossSections>;

    /// Whether `element` is a valid series request for `series`.
    fn supports(&self, element: &str, series: Series) -> bool {
        series.supported_elements().contains(&element)
    }
}

/// Parse an element list entry the model can build.
///
/// Accepted are series requests the atomic data supports (`Fe_K`) and pileup
/// pairs (`Cl_K-Cl_K`, `Fe_ka1-Fe_ka1`). Anything else, including a lone
/// explicit transition, is [`FitError::MalformedLine`].
pub fn parse_request(atomic: &dyn AtomicData, entry: &str) -> Result<LineRequest> {
    let request: LineRequest = entry.parse()?;
    let ok = match &request {
        LineRequest::Single(EmissionLine {
            element,
            kind: LineKind::Series(series),
        }) => atomic.supports(element, *series),
        LineRequest::Single(_) => false,
        LineRequest::Pileup(..) => true,
    };
    if ok {
        Ok(request)
    } else {
        Err(FitError::MalformedLine(entry.to_string()))
    }
}

/// Every supported series request the atomic data lists lines for, K then L
/// then M, e.g. `Fe_K`.
pub fn default_element_list(atomic: &dyn AtomicData) -> Vec<String> {
    Series::ALL
        .iter()
        .flat_map(|&series| {
            series
                .supported_elements()
                .iter()
                .filter(move |el| {
                    atomic.supports(el, series)
                        && atomic
                            .emission_lines(el)
                            .is_some_and(|lines| lines.series(series).any(|(_, e)| e > 0.0))
                })
                .map(move |el| format!("{el}_{series}"))
        })
        .collect()
}

/// Transitions of one request that are excited at `incident_energy`.
///
/// Explicit transitions and pileup pairs are not expanded and return an empty
/// list, as do series whose anchor line is not excited.
pub fn activated_lines(
    atomic: &dyn AtomicData,
    incident_energy: f64,
    request: &LineRequest,
) -> Result<Vec<String>> {
    let Some((element, series)) = request.as_series() else {
        return Ok(Vec::new());
    };
    let cs = atomic
        .cross_sections(element, incident_energy)
        .ok_or_else(|| FitError::AtomicDataMissing(element.to_string()))?;

    if cs.get(series.anchor()) == 0.0 {
        debug!(%request, incident_energy, "anchor line not excited");
        return Ok(Vec::new());
    }

    Ok(cs
        .series(series)
        .filter(|&(_, value)| value != 0.0)
        .map(|(t, _)| format!("{element}_{t}"))
        .collect())
}

/// Concatenated activated lines of every request, unexcited ones skipped.
pub fn activated_lines_for(
    atomic: &dyn AtomicData,
    incident_energy: f64,
    requests: &[LineRequest],
) -> Result<Vec<String>> {
    let mut out = Vec::new();
    for request in requests {
        out.extend(activated_lines(atomic, incident_energy, request)?);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn req(s: &str) -> LineRequest {
        s.parse().unwrap()
    }

    #[test]
    fn fe_k_at_10_kev_drops_kb2() {
        let table = ReferenceTable::builtin().unwrap();
        let lines = activated_lines(&table, 10.0, &req("Fe_K")).unwrap();
        assert_eq!(lines, ["Fe_ka1", "Fe_ka2", "Fe_kb1"]);
    }

    #[test]
    fn below_edge_series_is_empty() {
        let table = ReferenceTable::builtin().unwrap();
        for e in [1.0, 5.0, 7.0, 7.11] {
            assert!(activated_lines(&table, e, &req("Fe_K")).unwrap().is_empty());
        }
        assert!(activated_lines(&table, 11.0, &req("Pt_L")).unwrap().is_empty());
    }

    #[test]
    fn l_lines_follow_their_subshell_edges() {
        let table = ReferenceTable::builtin().unwrap();
        let lines = activated_lines(&table, 12.0, &req("Pt_L")).unwrap();
        assert_eq!(lines, ["Pt_la1", "Pt_la2", "Pt_lb2", "Pt_lb5", "Pt_ll"]);

        let all = activated_lines(&table, 15.0, &req("Pt_L")).unwrap();
        assert_eq!(all.len(), 12);
        assert!(!all.iter().any(|l| l == "Pt_lg4"));
    }

    #[test]
    fn explicit_and_pileup_requests_are_not_expanded() {
        let table = ReferenceTable::builtin().unwrap();
        assert!(activated_lines(&table, 12.0, &req("Fe_ka1")).unwrap().is_empty());
        assert!(activated_lines(&table, 12.0, &req("Cl_K-Cl_K")).unwrap().is_empty());
    }

    #[test]
    fn aggregate_skips_unexcited_requests() {
        let table = ReferenceTable::builtin().unwrap();
        let requests = [req("Ca_K"), req("Sr_K"), req("Au_M")];
        let lines = activated_lines_for(&table, 12.0, &requests).unwrap();
        assert_eq!(lines[..3], ["Ca_ka1", "Ca_ka2", "Ca_kb1"]);
        assert_eq!(lines[3..], ["Au_ma1", "Au_ma2", "Au_mb", "Au_mg"]);
    }

    #[test]
    fn missing_element_is_an_error() {
        let table = ReferenceTable::builtin().unwrap();
        let err = activated_lines(&table, 12.0, &req("Mo_K")).unwrap_err();
        assert!(matches!(err, FitError::AtomicDataMissing(el) if el == "Mo"));
    }

    #[test]
    fn default_list_follows_series_then_table_order() {
        let table = ReferenceTable::builtin().unwrap();
        let list = default_element_list(&table);
        // Au carries K lines in the table but is not a supported K request
        assert_eq!(
            list,
            [
                "Si_K", "Cl_K", "Ar_K", "Ca_K", "Ti_K", "Fe_K", "Cu_K", "Zn_K", "Sr_K", "Sr_L",
                "Pt_L", "Au_L", "Pb_L", "Pt_M", "Au_M", "Pb_M",
            ]
        );
        for entry in &list {
            parse_request(&table, entry).unwrap();
        }
    }
}
