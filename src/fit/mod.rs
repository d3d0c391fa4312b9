//! Spectrum fitting.
//!
//! Responsibilities:
//!
//! - nonlinear fit of an assembled composite model (bounded LM)
//! - linearized fit: fixed peak shapes, background removal, NNLS areas
//! - helpers over fit results (`sum_area`, `trim`, escape peaks)
//! - many spectra at once (parallel)

pub mod batch;
pub mod linear;
pub mod nonlinear;
pub mod summary;

pub use batch::*;
pub use linear::*;
pub use nonlinear::*;
pub use summary::*;
