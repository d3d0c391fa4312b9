//! `xrf-fit` library crate.
//!
//! An X-ray fluorescence spectrum model and fitting engine. The binary (`xrf`)
//! is a thin wrapper around this library so that:
//!
//! - the model and both fit paths are testable without spawning processes
//! - callers can drive fits from their own front-ends
//!
//! Layout:
//!
//! - `domain`: line requests, parameter keys and the parameter store
//! - `atomic`: atomic data seam and line activation
//! - `params`: bound strategies and the per-element parameter controller
//! - `math`: peak shapes, SNIP background, OLS/NNLS/Levenberg-Marquardt
//! - `models`: composite models and spectral model assembly
//! - `fit`: nonlinear, linear (NNLS) and batch fitting plus area summaries
//! - `data`: synthetic spectra
//! - `io`, `report`, `cli`, `app`: the binary's plumbing

pub mod app;
pub mod atomic;
pub mod cli;
pub mod data;
pub mod domain;
pub mod error;
pub mod fit;
pub mod io;
pub mod math;
pub mod models;
pub mod params;
pub mod report;
