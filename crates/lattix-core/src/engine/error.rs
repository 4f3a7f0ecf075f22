use thiserror::Error;

use crate::core::lsq::{FitStatus, LsqError};

/// Errors produced by the refinement engine.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum EngineError {
    /// The minimizer stopped without meeting any convergence criterion.
    /// Recoverable: the caller may reseed or loosen tolerances and retry.
    #[error("UB refinement stopped without converging ({status:?})")]
    NotConverged { status: FitStatus },

    /// A goniometer axis index beyond the configured axis count.
    #[error("Goniometer axis index {index} is out of range for {count} axis/axes")]
    InvalidAxisIndex { index: usize, count: usize },

    #[error(transparent)]
    Fit(#[from] LsqError),
}
