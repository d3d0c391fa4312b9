//! Domain types used throughout the engine.
//!
//! This module defines:
//!
//! - the emission-line vocabulary (`Series`, `Transition`, `LineRequest`)
//! - the parameter data model (`ParamRecord`, `ParamKey`, `ParamStore`)

pub mod lines;
pub mod types;

pub use lines::*;
pub use types::*;
