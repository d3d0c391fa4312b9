//! Reporting utilities: area rankings and formatted terminal output.

pub mod format;

pub use format::*;
