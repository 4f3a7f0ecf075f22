//! # Symmetry Module
//!
//! Crystallographic symmetry operations and space groups.
//!
//! A [`symop::SymOp`] is a single affine symmetry operation (rotation part plus
//! fractional translation) parsed from Jones faithful notation such as
//! `"-x,y+1/2,-z"`. A [`space_group::SpaceGroup`] expands a minimal generator
//! string, looked up from the static Hermann-Mauguin symbol table in
//! [`symbols`], into the full finite group by closure, and answers
//! Miller-index equivalence and systematic-absence queries.
//!
//! Space groups are immutable after construction and safe to share across
//! threads without synchronization.

pub mod space_group;
pub mod symbols;
pub mod symop;

use thiserror::Error;

/// Errors produced while parsing generator expressions or building groups.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum SymmetryError {
    /// A generator coordinate could not be decomposed into signed linear
    /// terms in x, y, z plus an optional fractional constant.
    #[error("Malformed generator expression '{expression}': {reason}")]
    MalformedGenerator { expression: String, reason: String },

    /// The requested Hermann-Mauguin symbol is not in the symbol table.
    #[error("Unknown space-group symbol '{symbol}'")]
    UnknownSymbol { symbol: String },

    /// Group closure exceeded the defensive element cap, which indicates a
    /// corrupt generator entry rather than a legitimate crystallographic group.
    #[error("Group closure for '{symbol}' exceeded {cap} elements; generator data is inconsistent")]
    ClosureOverflow { symbol: String, cap: usize },

    /// The rotation part of an operation is not invertible.
    #[error("Symmetry operation has a singular rotation part")]
    SingularRotation,
}
