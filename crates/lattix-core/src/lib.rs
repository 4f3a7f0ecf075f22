//! # lattix
//!
//! A crystallographic lattice, symmetry, and orientation engine.
//!
//! The crate is organized in two layers:
//!
//! - **[`core`]**: pure data models and algorithms. It holds the unit-cell
//!   model with Niggli reduction and Gruber classification, space groups
//!   generated by closure from Hermann-Mauguin symbols, and a small
//!   Levenberg-Marquardt solver.
//! - **[`engine`]**: refinement built on the core. It fits the UB
//!   orientation matrix together with wavelength and goniometer offsets to
//!   indexed peak observations, with full covariance propagation into the
//!   resulting uncertainties.
//!
//! The typical flow mirrors an indexing pipeline: observed scattering
//! vectors with tentative Miller indices go into
//! [`engine::ub::UBMinimizer`], the fitted UB seeds a
//! [`core::models::cell::UnitCell`], the cell is reduced and classified,
//! a [`core::symmetry::space_group::SpaceGroup`] is attached, and
//! symmetry-equivalence queries drive downstream merging.

pub mod core;
pub mod engine;

pub use crate::core::models::cell::{CellCharacter, CellError, CellSnapshot, UnitCell};
pub use crate::core::models::material::Material;
pub use crate::core::models::phases::{PhaseError, PhaseSet};
pub use crate::core::reduction::gruber::{BravaisType, LatticeCentring, NiggliCharacter};
pub use crate::core::reduction::ReductionError;
pub use crate::core::symmetry::space_group::SpaceGroup;
pub use crate::core::symmetry::symop::SymOp;
pub use crate::core::symmetry::SymmetryError;
pub use crate::engine::error::EngineError;
pub use crate::engine::ub::{
    AxisKind, GonioAxis, OffsetState, PeakObservation, QObservation, UBMinimizer, UBSolution,
};
