//! Input/output helpers.
//!
//! - counts files: one value per channel, whitespace separated (`spectrum`)
//! - parameter store JSON read/write (`spectrum`)

pub mod spectrum;

pub use spectrum::*;
