//! Command-line parsing for the `xrf` spectrum fitter.
//!
//! Argument parsing and command dispatch stay separate from the modeling code;
//! `app` turns these structs into a [`crate::app::pipeline::RunConfig`].

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

/// Top-level CLI.
#[derive(Debug, Parser)]
#[command(name = "xrf", version, about = "XRF spectrum model and fit engine")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

/// CLI subcommands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Print the emission lines excited at the store's incident energy.
    Lines(LinesArgs),
    /// Fit a counts spectrum and print the component areas.
    Fit(FitArgs),
    /// Write a synthetic spectrum generated from a parameter store.
    Simulate(SimulateArgs),
}

/// Which fit path to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum FitMethod {
    /// Frozen peak shapes, non-negative least squares.
    Linear,
    /// Bounded Levenberg-Marquardt over all free parameters.
    Nonlinear,
}

#[derive(Debug, Parser, Clone)]
pub struct LinesArgs {
    /// Parameter store JSON; the built-in defaults are used when omitted.
    #[arg(short = 'p', long)]
    pub params: Option<PathBuf>,

    /// Element entries, e.g. `Fe_K Pt_L Cl_K-Cl_K`.
    #[arg(required = true)]
    pub elements: Vec<String>,
}

#[derive(Debug, Parser, Clone)]
pub struct FitArgs {
    /// Parameter store JSON; the built-in defaults are used when omitted.
    #[arg(short = 'p', long)]
    pub params: Option<PathBuf>,

    /// Counts file: one value per channel, whitespace separated.
    #[arg(short = 'c', long)]
    pub counts: PathBuf,

    /// Element entries, e.g. `Fe_K Pt_L Cl_K-Cl_K`; every supported K, L
    /// and M series when omitted.
    pub elements: Vec<String>,

    #[arg(short = 'm', long, value_enum, default_value_t = FitMethod::Linear)]
    pub method: FitMethod,

    /// Bound strategy applied to the store before a nonlinear fit
    /// (fit_with_tail, free_more, e_calibration, linear, adjust_element).
    #[arg(short = 's', long)]
    pub strategy: Option<String>,

    /// Residual evaluation budget of the nonlinear fit.
    #[arg(long, default_value_t = 4000)]
    pub max_nfev: usize,

    /// Print the areas as JSON instead of a table.
    #[arg(long, default_value_t = false)]
    pub json: bool,

    /// Write the fitted parameter store here (nonlinear fits only).
    #[arg(long)]
    pub export_params: Option<PathBuf>,
}

#[derive(Debug, Parser, Clone)]
pub struct SimulateArgs {
    /// Parameter store JSON; the built-in defaults are used when omitted.
    #[arg(short = 'p', long)]
    pub params: Option<PathBuf>,

    /// Element entries, e.g. `Fe_K Pt_L`.
    #[arg(required = true)]
    pub elements: Vec<String>,

    #[arg(short = 'n', long, default_value_t = 2048)]
    pub channels: usize,

    /// Random seed of the Poisson draws.
    #[arg(long, default_value_t = 7)]
    pub seed: u64,

    /// Flat continuum added to every channel (counts).
    #[arg(long, default_value_t = 5.0)]
    pub continuum: f64,

    /// Write the expected spectrum instead of Poisson counts.
    #[arg(long, default_value_t = false)]
    pub no_noise: bool,

    /// Output counts file.
    #[arg(short = 'o', long)]
    pub output: PathBuf,
}
