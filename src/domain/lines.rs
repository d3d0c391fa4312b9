//! Emission-line vocabulary: series, transitions and line requests.
//!
//! A request string is parsed once into a typed value:
//!
//! - `"Fe_K"`      series request, expanded by the activation resolver
//! - `"Fe_ka1"`    explicit transition
//! - `"Cl_K-Cl_K"` pileup pair of two single lines

use std::fmt;
use std::str::FromStr;

use crate::error::FitError;

/// Atomic shell series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Series {
    K,
    L,
    M,
}

impl Series {
    pub const ALL: [Series; 3] = [Series::K, Series::L, Series::M];

    pub fn as_str(self) -> &'static str {
        match self {
            Series::K => "K",
            Series::L => "L",
            Series::M => "M",
        }
    }

    /// Canonical transition order for the series.
    pub fn transitions(self) -> &'static [Transition] {
        match self {
            Series::K => &Transition::ALL[..4],
            Series::L => &Transition::ALL[4..17],
            Series::M => &Transition::ALL[17..],
        }
    }

    /// Principal line whose area is fitted independently.
    pub fn anchor(self) -> Transition {
        match self {
            Series::K => Transition::Ka1,
            Series::L => Transition::La1,
            Series::M => Transition::Ma1,
        }
    }

    /// Elements whose series lines fall between 1 and 30 keV.
    pub fn supported_elements(self) -> &'static [&'static str] {
        match self {
            Series::K => K_ELEMENTS,
            Series::L => L_ELEMENTS,
            Series::M => M_ELEMENTS,
        }
    }

    fn parse(s: &str) -> Option<Series> {
        match s {
            "K" => Some(Series::K),
            "L" => Some(Series::L),
            "M" => Some(Series::M),
            _ => None,
        }
    }
}

impl fmt::Display for Series {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

const K_ELEMENTS: &[&str] = &[
    "Na", "Mg", "Al", "Si", "P", "S", "Cl", "Ar", "K", "Ca", "Sc", "Ti", "V", "Cr", "Mn", "Fe",
    "Co", "Ni", "Cu", "Zn", "Ga", "Ge", "As", "Se", "Br", "Kr", "Rb", "Sr", "Y", "Zr", "Nb", "Mo",
    "Tc", "Ru", "Rh", "Pd", "Ag", "Cd", "In", "Sn", "Sb", "Te", "I",
];

const L_ELEMENTS: &[&str] = &[
    "Ga", "Ge", "As", "Se", "Br", "Kr", "Rb", "Sr", "Y", "Zr", "Nb", "Mo", "Tc", "Ru", "Rh", "Pd",
    "Ag", "Cd", "In", "Sn", "Sb", "Te", "I", "Xe", "Cs", "Ba", "La", "Ce", "Pr", "Nd", "Pm", "Sm",
    "Eu", "Gd", "Tb", "Dy", "Ho", "Er", "Tm", "Yb", "Lu", "Hf", "Ta", "W", "Re", "Os", "Ir", "Pt",
    "Au", "Hg", "Tl", "Pb", "Bi", "Po", "At", "Rn", "Fr", "Ac", "Th", "Pa", "U", "Np", "Pu", "Am",
];

const M_ELEMENTS: &[&str] = &[
    "Hf", "Ta", "W", "Re", "Os", "Ir", "Pt", "Au", "Hg", "Tl", "Pb", "Bi", "Sm", "Eu", "Gd", "Tb",
    "Dy", "Ho", "Er", "Tm", "Yb", "Lu", "Th", "Pa", "U",
];

/// Individual emission transition, in canonical K, L, M order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Transition {
    Ka1,
    Ka2,
    Kb1,
    Kb2,
    La1,
    La2,
    Lb1,
    Lb2,
    Lb3,
    Lb4,
    Lb5,
    Lg1,
    Lg2,
    Lg3,
    Lg4,
    Ll,
    Ln,
    Ma1,
    Ma2,
    Mb,
    Mg,
}

impl Transition {
    pub const ALL: [Transition; 21] = [
        Transition::Ka1,
        Transition::Ka2,
        Transition::Kb1,
        Transition::Kb2,
        Transition::La1,
        Transition::La2,
        Transition::Lb1,
        Transition::Lb2,
        Transition::Lb3,
        Transition::Lb4,
        Transition::Lb5,
        Transition::Lg1,
        Transition::Lg2,
        Transition::Lg3,
        Transition::Lg4,
        Transition::Ll,
        Transition::Ln,
        Transition::Ma1,
        Transition::Ma2,
        Transition::Mb,
        Transition::Mg,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Transition::Ka1 => "ka1",
            Transition::Ka2 => "ka2",
            Transition::Kb1 => "kb1",
            Transition::Kb2 => "kb2",
            Transition::La1 => "la1",
            Transition::La2 => "la2",
            Transition::Lb1 => "lb1",
            Transition::Lb2 => "lb2",
            Transition::Lb3 => "lb3",
            Transition::Lb4 => "lb4",
            Transition::Lb5 => "lb5",
            Transition::Lg1 => "lg1",
            Transition::Lg2 => "lg2",
            Transition::Lg3 => "lg3",
            Transition::Lg4 => "lg4",
            Transition::Ll => "ll",
            Transition::Ln => "ln",
            Transition::Ma1 => "ma1",
            Transition::Ma2 => "ma2",
            Transition::Mb => "mb",
            Transition::Mg => "mg",
        }
    }

    pub fn series(self) -> Series {
        match self as usize {
            0..=3 => Series::K,
            4..=16 => Series::L,
            _ => Series::M,
        }
    }

    pub fn is_anchor(self) -> bool {
        self.series().anchor() == self
    }

    /// Position in [`Transition::ALL`].
    pub fn index(self) -> usize {
        self as usize
    }

    pub fn parse(s: &str) -> Option<Transition> {
        Transition::ALL.iter().copied().find(|t| t.as_str() == s)
    }
}

impl fmt::Display for Transition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether a line names a whole series or one transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LineKind {
    Series(Series),
    Transition(Transition),
}

/// One element line: `Fe_K` or `Fe_ka1`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EmissionLine {
    pub element: String,
    pub kind: LineKind,
}

impl EmissionLine {
    pub fn series(element: impl Into<String>, series: Series) -> Self {
        Self {
            element: element.into(),
            kind: LineKind::Series(series),
        }
    }

    pub fn transition(element: impl Into<String>, transition: Transition) -> Self {
        Self {
            element: element.into(),
            kind: LineKind::Transition(transition),
        }
    }

    /// The transition used as peak position: the explicit transition, or the
    /// anchor of the requested series.
    pub fn reference_transition(&self) -> Transition {
        match self.kind {
            LineKind::Series(s) => s.anchor(),
            LineKind::Transition(t) => t,
        }
    }

    pub fn parse(s: &str) -> Option<EmissionLine> {
        let (element, rest) = s.split_once('_')?;
        if !is_element_symbol(element) {
            return None;
        }
        if let Some(series) = Series::parse(rest) {
            return Some(EmissionLine::series(element, series));
        }
        Transition::parse(rest).map(|t| EmissionLine::transition(element, t))
    }
}

impl fmt::Display for EmissionLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            LineKind::Series(s) => write!(f, "{}_{}", self.element, s),
            LineKind::Transition(t) => write!(f, "{}_{}", self.element, t),
        }
    }
}

/// A parsed element list entry.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LineRequest {
    Single(EmissionLine),
    Pileup(EmissionLine, EmissionLine),
}

impl LineRequest {
    /// The series request inside this entry, if it is one.
    pub fn as_series(&self) -> Option<(&str, Series)> {
        match self {
            LineRequest::Single(EmissionLine {
                element,
                kind: LineKind::Series(s),
            }) => Some((element.as_str(), *s)),
            _ => None,
        }
    }

    /// Name used for sub-model prefixes: the pileup separator is not allowed
    /// in parameter names, so pairs are joined with `_`.
    pub fn model_token(&self) -> String {
        match self {
            LineRequest::Single(line) => line.to_string(),
            LineRequest::Pileup(a, b) => format!("{a}_{b}"),
        }
    }
}

impl FromStr for LineRequest {
    type Err = FitError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let malformed = || FitError::MalformedLine(s.to_string());
        match s.split_once('-') {
            Some((a, b)) => {
                let a = EmissionLine::parse(a).ok_or_else(malformed)?;
                let b = EmissionLine::parse(b).ok_or_else(malformed)?;
                Ok(LineRequest::Pileup(a, b))
            }
            None => EmissionLine::parse(s)
                .map(LineRequest::Single)
                .ok_or_else(malformed),
        }
    }
}

impl fmt::Display for LineRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LineRequest::Single(line) => write!(f, "{line}"),
            LineRequest::Pileup(a, b) => write!(f, "{a}-{b}"),
        }
    }
}

/// `Fe`, `K`, `Tl`: one uppercase ASCII letter, optionally one lowercase.
pub fn is_element_symbol(s: &str) -> bool {
    let mut chars = s.chars();
    match (chars.next(), chars.next(), chars.next()) {
        (Some(a), None, None) => a.is_ascii_uppercase(),
        (Some(a), Some(b), None) => a.is_ascii_uppercase() && b.is_ascii_lowercase(),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn series_slices_have_expected_sizes() {
        assert_eq!(Series::K.transitions().len(), 4);
        assert_eq!(Series::L.transitions().len(), 13);
        assert_eq!(Series::M.transitions().len(), 4);
        for s in Series::ALL {
            assert_eq!(s.transitions()[0], s.anchor());
            assert!(s.transitions().iter().all(|t| t.series() == s));
        }
    }

    #[test]
    fn parses_series_transition_and_pileup() {
        let fe: LineRequest = "Fe_K".parse().unwrap();
        assert_eq!(fe.as_series(), Some(("Fe", Series::K)));

        let ka1: LineRequest = "Fe_ka1".parse().unwrap();
        assert!(ka1.as_series().is_none());
        assert_eq!(ka1.to_string(), "Fe_ka1");

        let pile: LineRequest = "Cl_K-Cl_K".parse().unwrap();
        assert_eq!(pile.to_string(), "Cl_K-Cl_K");
        assert_eq!(pile.model_token(), "Cl_K_Cl_K");
    }

    #[test]
    fn rejects_malformed_strings() {
        for bad in ["Fe", "fe_K", "Fe_X", "Fe_K-", "Fe_K-Cl", "Fe_ka9", "Xyz_K"] {
            assert!(bad.parse::<LineRequest>().is_err(), "{bad} should not parse");
        }
    }
}
