//! Error type shared by model assembly, fitting and the `xrf` binary.
//!
//! Every variant maps to a process exit code so the binary can stay a thin
//! wrapper (`main` only prints the message and exits with `exit_code()`).

use thiserror::Error;

pub type Result<T> = std::result::Result<T, FitError>;

#[derive(Debug, Error)]
pub enum FitError {
    /// An element/line string matches no supported series and no pileup pair.
    #[error("{0} is not a well formed element string")]
    MalformedLine(String),

    #[error("unknown bound strategy: {0}")]
    UnknownStrategy(String),

    #[error("trying to overwrite an existing strategy: {0}")]
    StrategyConflict(String),

    #[error("required parameter '{0}' is missing from the parameter store")]
    MissingParameter(String),

    #[error("no atomic data for element '{0}'")]
    AtomicDataMissing(String),

    #[error("invalid parameter record '{name}': {reason}")]
    InvalidRecord { name: String, reason: String },

    #[error("parameter name collision while composing models: {0}")]
    NameCollision(String),

    #[error("parameter links form a cycle through '{0}'")]
    LinkCycle(String),

    #[error("length mismatch: {what} has {got} entries, expected {expected}")]
    ShapeMismatch {
        what: &'static str,
        got: usize,
        expected: usize,
    },

    #[error("fit did not converge after {iterations} iterations (chi-square {chi_square:.6e})")]
    FitFailed { iterations: usize, chi_square: f64 },

    #[error("nnls solve failed: {0}")]
    NnlsFailed(String),

    #[error("non-finite value encountered in {0}")]
    NonFinite(String),

    #[error("invalid parameter configuration: {0}")]
    Config(#[from] serde_json::Error),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("counts file error: {0}")]
    Csv(#[from] csv::Error),
}

impl FitError {
    pub fn exit_code(&self) -> u8 {
        match self {
            FitError::Io(_) | FitError::Config(_) | FitError::Csv(_) => 2,
            FitError::MalformedLine(_)
            | FitError::UnknownStrategy(_)
            | FitError::StrategyConflict(_)
            | FitError::MissingParameter(_)
            | FitError::InvalidRecord { .. }
            | FitError::ShapeMismatch { .. } => 3,
            FitError::AtomicDataMissing(_)
            | FitError::NameCollision(_)
            | FitError::LinkCycle(_) => 4,
            FitError::FitFailed { .. } | FitError::NnlsFailed(_) | FitError::NonFinite(_) => 5,
        }
    }
}
