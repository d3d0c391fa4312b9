//! Per-element parameter bookkeeping.
//!
//! The controller owns a private copy of the store and grows it as elements
//! are added: every activated transition of a series gets position, width and
//! branching-ratio parameters, and the series as a whole gets exactly one area
//! parameter on its anchor line. Constraints passed along are remembered and
//! used as overrides whenever a strategy is applied.

use tracing::debug;

use crate::atomic::{AtomicData, activated_lines, parse_request};
use crate::domain::{
    BoundType, EmissionLine, LineAttr, LineKind, LineRequest, ParamKey, ParamRecord, ParamStore,
};
use crate::error::Result;
use crate::params::strategy::{BoundOverrides, StrategyRegistry, apply_strategy};

/// Which per-line property a parameter controls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParamKind {
    /// Peak position offset (`delta_center`).
    Pos,
    /// Peak width offset (`delta_sigma`).
    Width,
    /// Branching-ratio adjustment (`ratio_adjust`).
    Ratio,
    Area,
}

impl ParamKind {
    pub const ALL: [ParamKind; 4] = [
        ParamKind::Pos,
        ParamKind::Width,
        ParamKind::Area,
        ParamKind::Ratio,
    ];

    pub fn attr(self) -> LineAttr {
        match self {
            ParamKind::Pos => LineAttr::DeltaCenter,
            ParamKind::Width => LineAttr::DeltaSigma,
            ParamKind::Ratio => LineAttr::RatioAdjust,
            ParamKind::Area => LineAttr::Area,
        }
    }

    /// Record a freshly added parameter starts from.
    pub fn default_record(self) -> ParamRecord {
        match self {
            ParamKind::Area => ParamRecord::new(1000.0, BoundType::Free, 0.0, 1e9),
            ParamKind::Pos => ParamRecord::new(0.0, BoundType::Fixed, -0.005, 0.005),
            ParamKind::Width => ParamRecord::new(0.0, BoundType::Fixed, -0.02, 0.02),
            ParamKind::Ratio => ParamRecord::new(1.0, BoundType::Fixed, 0.1, 5.0),
        }
    }

    pub fn parse(s: &str) -> Option<ParamKind> {
        match s {
            "pos" => Some(ParamKind::Pos),
            "width" => Some(ParamKind::Width),
            "ratio" => Some(ParamKind::Ratio),
            "area" => Some(ParamKind::Area),
            _ => None,
        }
    }
}

/// Grows a parameter store as elements are added.
pub struct ParamController<'a> {
    params: ParamStore,
    original: ParamStore,
    element_list: Vec<LineRequest>,
    line_names: Vec<String>,
    overrides: BoundOverrides,
    registry: StrategyRegistry,
    atomic: &'a dyn AtomicData,
    incident_energy: f64,
}

impl<'a> ParamController<'a> {
    /// Copy `params` and add every parameter kind for each of `elements`.
    pub fn new<S: AsRef<str>>(
        params: &ParamStore,
        elements: &[S],
        atomic: &'a dyn AtomicData,
        registry: StrategyRegistry,
    ) -> Result<Self> {
        let mut controller = Self {
            params: params.clone(),
            original: params.clone(),
            element_list: Vec::new(),
            line_names: Vec::new(),
            overrides: BoundOverrides::new(),
            registry,
            atomic,
            incident_energy: params.incident_energy()?,
        };
        for element in elements {
            for kind in ParamKind::ALL {
                controller.add_param(kind, element.as_ref(), None)?;
            }
        }
        Ok(controller)
    }

    /// Add (or reset to its default) the `kind` parameter of `element`.
    ///
    /// `element` is a series request (`Fe_K`) or a pileup pair (`Cl_K-Cl_K`).
    /// Series parameters are only created for activated transitions, except
    /// the area, which always lives on the anchor line. A `constraint` is
    /// recorded as that parameter's override for later strategy passes.
    pub fn add_param(
        &mut self,
        kind: ParamKind,
        element: &str,
        constraint: Option<BoundType>,
    ) -> Result<()> {
        let request = parse_request(self.atomic, element)?;
        if !self.element_list.contains(&request) {
            let lines = activated_lines(self.atomic, self.incident_energy, &request)?;
            self.line_names.extend(lines);
            self.element_list.push(request.clone());
        }

        let attr = kind.attr();
        let keys: Vec<ParamKey> = match (&request, kind) {
            (LineRequest::Pileup(a, b), _) => vec![ParamKey::pileup(a.clone(), b.clone(), attr)],
            (LineRequest::Single(line), ParamKind::Area) => {
                let anchor = line.reference_transition();
                vec![ParamKey::line(line.element.clone(), anchor, attr)]
            }
            (LineRequest::Single(line), _) => self.activated_keys(line, attr),
        };

        for key in keys {
            if let Some(bound) = constraint {
                self.overrides.insert(key.clone(), bound);
            }
            debug!(param = %key, "parameter added");
            self.params.insert(key, kind.default_record());
        }
        Ok(())
    }

    /// Apply every `(kind, constraint)` pair to every element.
    pub fn update_element_prop<S: AsRef<str>>(
        &mut self,
        elements: &[S],
        props: &[(ParamKind, BoundType)],
    ) -> Result<()> {
        for element in elements {
            for &(kind, constraint) in props {
                self.add_param(kind, element.as_ref(), Some(constraint))?;
            }
        }
        Ok(())
    }

    /// Apply a registered strategy, honouring recorded overrides.
    pub fn set_strategy(&mut self, name: &str) -> Result<()> {
        apply_strategy(&mut self.params, &self.registry, name, &self.overrides)
    }

    pub fn params(&self) -> &ParamStore {
        &self.params
    }

    pub fn into_params(self) -> ParamStore {
        self.params
    }

    /// The store as passed to [`ParamController::new`].
    pub fn original(&self) -> &ParamStore {
        &self.original
    }

    pub fn element_list(&self) -> &[LineRequest] {
        &self.element_list
    }

    /// Activated transitions of all tracked series, e.g. `Fe_ka1`.
    pub fn line_names(&self) -> &[String] {
        &self.line_names
    }

    pub fn overrides(&self) -> &BoundOverrides {
        &self.overrides
    }

    pub fn registry_mut(&mut self) -> &mut StrategyRegistry {
        &mut self.registry
    }

    fn activated_keys(&self, line: &EmissionLine, attr: LineAttr) -> Vec<ParamKey> {
        let LineKind::Series(series) = line.kind else {
            return Vec::new();
        };
        series
            .transitions()
            .iter()
            .copied()
            .filter(|t| {
                let name = format!("{}_{t}", line.element);
                self.line_names.iter().any(|l| *l == name)
            })
            .map(|t| ParamKey::line(line.element.clone(), t, attr))
            .collect()
    }
}
