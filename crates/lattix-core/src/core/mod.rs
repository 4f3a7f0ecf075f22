//! # Core Module
//!
//! Domain-level building blocks of the lattice engine.
//!
//! - **[`models`]**: unit cells, materials and crystal phases.
//! - **[`symmetry`]**: symmetry operations, space groups and the
//!   Hermann-Mauguin symbol table.
//! - **[`reduction`]**: Niggli reduction and Gruber lattice-character
//!   classification.
//! - **[`lsq`]**: the Levenberg-Marquardt least-squares solver shared by
//!   the constrained cell refit and the orientation engine.
//!
//! Everything here is a synchronous, CPU-bound value computation: no I/O,
//! no interior mutability, no shared mutable state.

pub mod lsq;
pub mod models;
pub mod reduction;
pub mod symmetry;
