//! # Engine Module
//!
//! Orientation refinement on top of the core models.
//!
//! [`ub`] fits a UB orientation matrix together with a wavelength offset and
//! per-axis goniometer offsets to observed scattering vectors, and packages
//! the result with full parameter covariances into an immutable
//! [`ub::UBSolution`]. [`error::EngineError`] is the layer's error type,
//! wrapping the solver errors of the core.

pub mod error;
pub mod ub;
