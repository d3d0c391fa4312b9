//! Top-level application orchestration.
//!
//! `src/main.rs` stays tiny; this module is the "real main" that:
//! - parses CLI arguments
//! - loads the parameter store and the counts file
//! - runs the linear or nonlinear fit
//! - prints reports and writes optional exports

use clap::Parser;

use crate::atomic::{ReferenceTable, activated_lines_for, parse_request};
use crate::cli::{Command, FitArgs, LinesArgs, SimulateArgs};
use crate::data::SampleConfig;
use crate::error::Result;
use crate::math::lm::LmConfig;

pub mod pipeline;

use pipeline::{FitOutcome, RunConfig};

/// Entry point for the `xrf` binary.
pub fn run() -> Result<()> {
    let cli = crate::cli::Cli::parse();

    match cli.command {
        Command::Lines(args) => handle_lines(args),
        Command::Fit(args) => handle_fit(args),
        Command::Simulate(args) => handle_simulate(args),
    }
}

fn handle_lines(args: LinesArgs) -> Result<()> {
    let table = ReferenceTable::builtin()?;
    let store = crate::io::read_store(args.params.as_deref())?;
    let requests = args
        .elements
        .iter()
        .map(|e| parse_request(&table, e))
        .collect::<Result<Vec<_>>>()?;
    let energy = store.incident_energy()?;

    println!("Incident energy: {energy:.3} keV");
    for line in activated_lines_for(&table, energy, &requests)? {
        println!("{line}");
    }
    Ok(())
}

fn handle_fit(args: FitArgs) -> Result<()> {
    let table = ReferenceTable::builtin()?;
    let config = run_config_from_args(&args);
    let run = pipeline::run_fit(&config, &table)?;

    match &run.outcome {
        FitOutcome::Linear(fit) => {
            if args.export_params.is_some() {
                tracing::warn!("--export-params is ignored for linear fits");
            }
            if args.json {
                println!("{}", crate::report::areas_json(&fit.areas())?);
            } else {
                println!(
                    "{}",
                    crate::report::format_linear_summary(fit, &run.store, &run.elements)
                );
            }
        }
        FitOutcome::Nonlinear { fit, updated } => {
            if args.json {
                println!("{}", crate::report::areas_json(&fit.values)?);
            } else {
                println!(
                    "{}",
                    crate::report::format_nonlinear_summary(fit, &run.store, &run.elements)?
                );
            }
            if let Some(path) = &args.export_params {
                crate::io::write_store(path, updated)?;
            }
        }
    }
    Ok(())
}

fn handle_simulate(args: SimulateArgs) -> Result<()> {
    let table = ReferenceTable::builtin()?;
    let store = crate::io::read_store(args.params.as_deref())?;
    let config = SampleConfig {
        channels: args.channels,
        continuum: args.continuum,
        seed: args.seed,
        noise: !args.no_noise,
    };
    let sample = pipeline::run_simulate(&store, &args.elements, &table, &config)?;
    let values = if config.noise {
        &sample.counts
    } else {
        &sample.expected
    };
    crate::io::write_counts(&args.output, values)?;
    println!(
        "Wrote {} channels ({:.0} counts) to {}",
        values.len(),
        values.iter().sum::<f64>(),
        args.output.display()
    );
    Ok(())
}

pub fn run_config_from_args(args: &FitArgs) -> RunConfig {
    RunConfig {
        params: args.params.clone(),
        counts: args.counts.clone(),
        elements: args.elements.clone(),
        method: args.method,
        strategy: args.strategy.clone(),
        lm: LmConfig {
            max_nfev: args.max_nfev,
            ..LmConfig::default()
        },
    }
}
