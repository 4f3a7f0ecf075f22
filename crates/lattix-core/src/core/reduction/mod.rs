//! # Reduction Module
//!
//! Lattice reduction and Bravais classification.
//!
//! [`niggli`] implements the Krivy-Gruber algorithm, transforming a lattice
//! metric tensor into its unique Niggli-reduced form while accumulating the
//! unimodular change of basis. [`gruber`] classifies a reduced metric against
//! the 44 Niggli lattice characters, yielding the Bravais type, the linear
//! constraints the metric satisfies, and the transformation to the
//! conventional cell.

pub mod gruber;
pub mod niggli;

use thiserror::Error;

/// Errors produced during lattice reduction and classification.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ReductionError {
    /// The metric tensor is not positive definite, so it describes no
    /// three-dimensional lattice.
    #[error("Metric tensor is not positive definite")]
    SingularMetric,

    /// The reduction loop failed to reach a fixed point within the iteration
    /// cap, which indicates a numerically hostile metric or an inconsistent
    /// tolerance.
    #[error("Niggli reduction did not converge within {iterations} iterations")]
    NonConvergent { iterations: usize },

    /// No lattice character matched the reduced metric. The character table
    /// ends in triclinic catch-all rows, so this indicates a metric that was
    /// never reduced or has non-positive diagonal entries.
    #[error("Reduced metric does not match any lattice character")]
    Unclassified,
}
