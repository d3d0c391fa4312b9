//! Helpers over fit inputs and results.

use std::collections::BTreeMap;

use crate::domain::{EmissionLine, LineKind, ParamStore};
use crate::error::{FitError, Result};
use crate::math::lineshapes::Calibration;

/// Si Kα1 energy in keV: the escape energy of a silicon detector.
pub const SI_ESCAPE_KEV: f64 = 1.73998;

/// Total area of a series over solved model values.
///
/// For each transition of `line` (`Fe_K`) whose `<El>_<t>_area` is present,
/// adds `area · ratio · ratio_adjust`. Transitions without an area are
/// skipped.
pub fn sum_area(line: &str, values: &BTreeMap<String, f64>) -> Result<f64> {
    let parsed =
        EmissionLine::parse(line).ok_or_else(|| FitError::MalformedLine(line.to_string()))?;
    let LineKind::Series(series) = parsed.kind else {
        return Err(FitError::MalformedLine(line.to_string()));
    };

    let mut total = 0.0;
    for transition in series.transitions() {
        let prefix = format!("{}_{transition}", parsed.element);
        let Some(area) = values.get(&format!("{prefix}_area")) else {
            continue;
        };
        let mut term = *area;
        for suffix in ["ratio", "ratio_adjust"] {
            let name = format!("{prefix}_{suffix}");
            term *= values
                .get(&name)
                .ok_or(FitError::MissingParameter(name))?;
        }
        total += term;
    }
    Ok(total)
}

/// Keep the samples with `low ≤ x ≤ high`.
pub fn trim(x: &[f64], y: &[f64], low: f64, high: f64) -> (Vec<f64>, Vec<f64>) {
    x.iter()
        .zip(y)
        .filter(|&(&xi, _)| xi >= low && xi <= high)
        .map(|(&xi, &yi)| (xi, yi))
        .unzip()
}

/// Escape-peak image of `spectrum`: calibrated energies shifted down by
/// `escape_e`, and counts scaled by `ratio`.
pub fn compute_escape_peak(
    spectrum: &[f64],
    ratio: f64,
    params: &ParamStore,
    escape_e: f64,
) -> Result<(Vec<f64>, Vec<f64>)> {
    let (e_offset, e_linear, e_quadratic) = params.calibration()?;
    let calibration = Calibration {
        e_offset,
        e_linear,
        e_quadratic,
    };
    let energy = (0..spectrum.len())
        .map(|i| calibration.energy(i as f64) - escape_e)
        .collect();
    let counts = spectrum.iter().map(|v| v * ratio).collect();
    Ok((energy, counts))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn values(pairs: &[(&str, f64)]) -> BTreeMap<String, f64> {
        pairs.iter().map(|&(k, v)| (k.to_string(), v)).collect()
    }

    #[test]
    fn sum_area_skips_absent_transitions() {
        let v = values(&[
            ("Fe_ka1_area", 100.0),
            ("Fe_ka1_ratio", 1.0),
            ("Fe_ka1_ratio_adjust", 1.0),
            ("Fe_ka2_area", 100.0),
            ("Fe_ka2_ratio", 0.5),
            ("Fe_ka2_ratio_adjust", 1.2),
            ("Cu_ka1_area", 7.0),
        ]);
        assert!((sum_area("Fe_K", &v).unwrap() - 160.0).abs() < 1e-12);
        assert_eq!(sum_area("Zn_K", &v).unwrap(), 0.0);
    }

    #[test]
    fn sum_area_rejects_non_series_lines() {
        let v = BTreeMap::new();
        assert!(matches!(sum_area("Fe_ka1", &v), Err(FitError::MalformedLine(_))));
        assert!(matches!(sum_area("Fe", &v), Err(FitError::MalformedLine(_))));
    }

    #[test]
    fn trim_is_inclusive() {
        let x = [0.5, 1.0, 1.5, 2.0, 2.5];
        let y = [1.0, 2.0, 3.0, 4.0, 5.0];
        let (tx, ty) = trim(&x, &y, 1.0, 2.0);
        assert_eq!(tx, [1.0, 1.5, 2.0]);
        assert_eq!(ty, [2.0, 3.0, 4.0]);
    }

    #[test]
    fn escape_peak_shifts_energy_and_scales_counts() {
        let store = ParamStore::default_xrf();
        let (e, c) = compute_escape_peak(&[10.0, 20.0, 30.0], 0.1, &store, SI_ESCAPE_KEV).unwrap();
        assert!((e[2] - (0.02 - SI_ESCAPE_KEV)).abs() < 1e-12);
        assert_eq!(c, [1.0, 2.0, 3.0]);
    }
}
