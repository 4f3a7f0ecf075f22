//! # Models Module
//!
//! Core crystallographic data structures.
//!
//! The central type is [`cell::UnitCell`], which owns a direct basis matrix
//! and its reciprocal, carries an optional 9x9 covariance of the basis
//! components, and ties together reduction results, a space group and an
//! optional [`material::Material`]. [`phases::PhaseSet`] is the ordered
//! collection of crystal phases an experiment works with.
//!
//! The basis convention throughout is column-major: column `j` of the direct
//! basis is the `j`-th real-space lattice vector, and the reciprocal basis is
//! the plain matrix inverse of the direct basis.

pub mod cell;
pub mod material;
pub mod phases;
