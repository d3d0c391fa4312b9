//! Numerical building blocks: peak shapes, background estimation and the
//! least-squares solvers used by both fit paths.

pub mod background;
pub mod lineshapes;
pub mod lm;
pub mod nnls;
pub mod ols;

pub use background::*;
pub use lineshapes::*;
pub use lm::*;
pub use nnls::*;
pub use ols::*;
