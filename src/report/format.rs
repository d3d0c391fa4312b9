//! Reporting utilities: area tables, rankings, and formatted terminal output.
//!
//! We keep formatting code in one place so:
//! - the math/fitting code stays clean and testable
//! - output changes are localized

use std::collections::BTreeMap;

use crate::domain::{LineRequest, ParamStore};
use crate::error::Result;
use crate::fit::linear::{BACKGROUND, ComponentFit, LinearFit};
use crate::fit::nonlinear::NonlinearFit;
use crate::fit::summary::sum_area;

/// One row of an area table.
#[derive(Debug, Clone, PartialEq)]
pub struct AreaRow {
    pub name: String,
    pub area: f64,
    /// Share of the summed peak areas (background excluded), in percent.
    pub share: f64,
}

/// Peak components by descending area; the background is left out.
pub fn rank_components(components: &[ComponentFit]) -> Vec<AreaRow> {
    let peaks: Vec<&ComponentFit> = components.iter().filter(|c| c.name != BACKGROUND).collect();
    let total: f64 = peaks.iter().map(|c| c.area).sum();
    let mut rows: Vec<AreaRow> = peaks
        .into_iter()
        .map(|c| AreaRow {
            name: c.name.clone(),
            area: c.area,
            share: if total > 0.0 { 100.0 * c.area / total } else { 0.0 },
        })
        .collect();
    rows.sort_by(|a, b| b.area.total_cmp(&a.area));
    rows
}

/// Header, calibration and area table of a linear fit.
pub fn format_linear_summary(
    fit: &LinearFit,
    params: &ParamStore,
    elements: &[LineRequest],
) -> String {
    let mut out = String::new();

    out.push_str("=== xrf - linear (NNLS) fit ===\n");
    out.push_str(&format_setup(params, elements, fit.energy.len()));
    out.push_str(&format!("Residual: {:.6e}\n", fit.residual));
    if let Some(bg) = fit.area(BACKGROUND) {
        out.push_str(&format!("Background area: {bg:.3}\n"));
    }

    out.push_str("\nComponent areas:\n");
    out.push_str(&format_table(&rank_components(&fit.components)));
    out
}

/// Header, solved globals and per-series areas of a nonlinear fit.
pub fn format_nonlinear_summary(
    fit: &NonlinearFit,
    params: &ParamStore,
    elements: &[LineRequest],
) -> Result<String> {
    let mut out = String::new();

    out.push_str("=== xrf - nonlinear (LM) fit ===\n");
    out.push_str(&format_setup(params, elements, fit.best_fit.len()));
    out.push_str(&format!(
        "Chi-square: {:.6e} | iterations={} | evaluations={}\n",
        fit.chi_square, fit.iterations, fit.nfev
    ));

    out.push_str("\nCalibration:\n");
    for name in ["e_offset", "e_linear", "e_quadratic", "fwhm_offset", "fwhm_fanoprime"] {
        if let Some(v) = fit.values.get(name) {
            out.push_str(&format!("- {name:<16} {v:.6e}\n"));
        }
    }

    let mut areas = Vec::new();
    for request in elements {
        let area = match request {
            LineRequest::Single(_) => sum_area(&request.to_string(), &fit.values)?,
            LineRequest::Pileup(..) => {
                let name = format!("pileup_{}_area", request.model_token());
                fit.values.get(&name).copied().unwrap_or(0.0)
            }
        };
        areas.push(ComponentFit {
            name: request.to_string(),
            area,
            curve: Vec::new(),
        });
    }
    let scatter = [
        ("compton", "compton_amplitude"),
        ("elastic", "elastic_coherent_sct_amplitude"),
    ];
    for (name, key) in scatter {
        if let Some(&area) = fit.values.get(key) {
            areas.push(ComponentFit {
                name: name.to_string(),
                area,
                curve: Vec::new(),
            });
        }
    }

    out.push_str("\nComponent areas:\n");
    out.push_str(&format_table(&rank_components(&areas)));
    Ok(out)
}

fn format_setup(params: &ParamStore, elements: &[LineRequest], channels: usize) -> String {
    let names: Vec<String> = elements.iter().map(ToString::to_string).collect();
    let mut out = String::new();
    if let Ok(e) = params.incident_energy() {
        out.push_str(&format!("Incident energy: {e:.3} keV\n"));
    }
    if let Ok((a, b, c)) = params.calibration() {
        out.push_str(&format!("Calibration: {}\n", fmt_vec(&[a, b, c])));
    }
    out.push_str(&format!("Channels: {channels}\n"));
    out.push_str(&format!("Elements: {}\n", truncate(&names.join(", "), 72)));
    out
}

/// Table of `name  area  share`.
pub fn format_table(rows: &[AreaRow]) -> String {
    let mut out = String::new();
    out.push_str(format!("{:<24} {:>14} {:>8}\n", "component", "area", "share").trim_end());
    out.push('\n');
    out.push_str(format!("{:-<24} {:-<14} {:-<8}\n", "", "", "").trim_end());
    out.push('\n');

    for r in rows {
        out.push_str(
            format!(
                "{:<24} {:>14.3} {:>7.2}%\n",
                truncate(&r.name, 24),
                r.area,
                r.share
            )
            .trim_end(),
        );
        out.push('\n');
    }
    out
}

/// Areas as a JSON object, for scripting.
pub fn areas_json(areas: &BTreeMap<String, f64>) -> Result<String> {
    Ok(serde_json::to_string_pretty(areas)?)
}

fn fmt_vec(v: &[f64]) -> String {
    let parts: Vec<String> = v.iter().map(|x| format!("{x:.6}")).collect();
    format!("[{}]", parts.join(", "))
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let mut out = String::new();
    for (i, ch) in s.chars().enumerate() {
        if i + 1 >= max {
            break;
        }
        out.push(ch);
    }
    out.push('.');
    out
}
