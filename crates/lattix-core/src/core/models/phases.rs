use std::sync::Arc;

use thiserror::Error;

use super::cell::UnitCell;
use super::material::Material;

/// Errors produced when addressing crystal phases by index.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PhaseError {
    /// The phase index is beyond the stored count. This is a programmer
    /// error on the caller's side, surfaced as a typed condition.
    #[error("Phase index {index} is out of range for {count} phase(s)")]
    InvalidIndex { index: usize, count: usize },
}

/// The ordered set of crystal phases attached to an experiment.
///
/// Cells are shared read-only; peaks and statistics hold the same `Arc`s.
/// Structural mutation of a cell requires exclusive access and is managed
/// by the caller, not serialized here.
#[derive(Debug, Clone, Default)]
pub struct PhaseSet {
    cells: Vec<Arc<UnitCell>>,
}

impl PhaseSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_unit_cell(&mut self, cell: Arc<UnitCell>) {
        self.cells.push(cell);
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<UnitCell>> {
        self.cells.iter()
    }

    /// The unit cell of phase `index`.
    ///
    /// # Errors
    ///
    /// [`PhaseError::InvalidIndex`] when `index` is out of range.
    pub fn unit_cell(&self, index: usize) -> Result<&Arc<UnitCell>, PhaseError> {
        self.cells.get(index).ok_or(PhaseError::InvalidIndex {
            index,
            count: self.cells.len(),
        })
    }

    /// The material of phase `index`, if one is attached to its cell.
    ///
    /// # Errors
    ///
    /// [`PhaseError::InvalidIndex`] when `index` is out of range.
    pub fn material(&self, index: usize) -> Result<Option<&Arc<Material>>, PhaseError> {
        self.unit_cell(index).map(|cell| cell.material())
    }
}
