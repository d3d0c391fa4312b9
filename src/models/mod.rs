//! Composite models and spectral model assembly.
//!
//! - `composite`: named parameters, hints, links and evaluation of sums of
//!   peak shapes
//! - `spectrum`: builds Compton, elastic, element and pileup models from a
//!   parameter store

pub mod composite;
pub mod spectrum;

pub use composite::*;
pub use spectrum::*;
