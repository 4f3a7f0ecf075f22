//! Classification of Niggli-reduced metrics into the 44 lattice characters
//! of Gruber, as tabulated in International Tables for Crystallography,
//! Vol. A, Table 9.2.5.1.
//!
//! Each character pairs a Bravais type with the set of linear conditions the
//! reduced metric satisfies and the transformation from the Niggli basis to
//! the conventional cell. Characters are tested most-specific first, so a
//! metric on a symmetry boundary resolves to the higher-symmetry character.

use super::ReductionError;
use nalgebra::Matrix3;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

/// Crystal family of a lattice character.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BravaisType {
    Triclinic,
    Monoclinic,
    Orthorhombic,
    Tetragonal,
    /// Trigonal cells share the hexagonal family letter; the character table
    /// itself only ever reports `Hexagonal`.
    Trigonal,
    Hexagonal,
    Cubic,
}

impl BravaisType {
    /// One-letter family code used in Bravais symbols such as `cF`.
    pub fn letter(&self) -> char {
        match self {
            Self::Triclinic => 'a',
            Self::Monoclinic => 'm',
            Self::Orthorhombic => 'o',
            Self::Tetragonal => 't',
            Self::Trigonal | Self::Hexagonal => 'h',
            Self::Cubic => 'c',
        }
    }
}

/// Centring mode of the conventional cell.
///
/// Classification only produces `P`, `C`, `I`, `F` and `R`; the `A` and `B`
/// side centrings exist for cells assigned from external space-group data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LatticeCentring {
    Primitive,
    ACentred,
    BCentred,
    BaseCentred,
    BodyCentred,
    FaceCentred,
    Rhombohedral,
}

impl LatticeCentring {
    pub fn letter(&self) -> char {
        match self {
            Self::Primitive => 'P',
            Self::ACentred => 'A',
            Self::BCentred => 'B',
            Self::BaseCentred => 'C',
            Self::BodyCentred => 'I',
            Self::FaceCentred => 'F',
            Self::Rhombohedral => 'R',
        }
    }

    /// Number of lattice points in the conventional cell.
    pub fn multiplicity(&self) -> usize {
        match self {
            Self::Primitive => 1,
            Self::ACentred | Self::BCentred | Self::BaseCentred | Self::BodyCentred => 2,
            Self::Rhombohedral => 3,
            Self::FaceCentred => 4,
        }
    }
}

/// One row of the lattice-character table.
///
/// `conditions` are rows `r` with `r . [A, B, C, D, E, F] = 0`, where
/// `A..C` are the metric diagonal and `D = b.c`, `E = a.c`, `F = a.b`.
/// Rows of `transform` express the conventional basis vectors as integer
/// combinations of the Niggli basis vectors.
#[derive(Debug, Clone, PartialEq)]
pub struct NiggliCharacter {
    pub number: u8,
    pub bravais: BravaisType,
    pub centring: LatticeCentring,
    /// Type I characters have all inter-axial angles acute.
    pub acute_angles: bool,
    conditions: Vec<[f64; 6]>,
    pub transform: Matrix3<f64>,
}

impl NiggliCharacter {
    /// Bravais symbol, e.g. `cF` or `mC`.
    pub fn symbol(&self) -> String {
        format!("{}{}", self.bravais.letter(), self.centring.letter())
    }

    /// The linear conditions the reduced metric satisfies for this
    /// character, over `[A, B, C, D, E, F]`.
    pub fn conditions(&self) -> &[[f64; 6]] {
        &self.conditions
    }
}

/// Classifies a Niggli-reduced metric tensor.
///
/// `tolerance` is relative and scaled by the mean metric diagonal. The
/// character table ends in triclinic catch-alls, so any genuinely reduced
/// positive-definite metric classifies.
///
/// # Errors
///
/// [`ReductionError::Unclassified`] for metrics with a non-positive
/// diagonal or sign patterns no reduced cell can have.
pub fn classify(
    metric: &Matrix3<f64>,
    tolerance: f64,
) -> Result<&'static NiggliCharacter, ReductionError> {
    let x = [
        metric[(0, 0)],
        metric[(1, 1)],
        metric[(2, 2)],
        metric[(1, 2)],
        metric[(0, 2)],
        metric[(0, 1)],
    ];
    let scale = (x[0] + x[1] + x[2]) / 3.0;
    if !(scale > 0.0) {
        return Err(ReductionError::Unclassified);
    }
    let eps = tolerance * scale;
    let acute = x[3] > eps && x[4] > eps && x[5] > eps;

    character_table()
        .iter()
        .find(|character| {
            character.acute_angles == acute
                && character.conditions.iter().all(|row| {
                    let residual: f64 = row.iter().zip(&x).map(|(r, v)| r * v).sum();
                    residual.abs() <= eps
                })
        })
        .ok_or(ReductionError::Unclassified)
}

/// The 44 lattice characters in match order: most specific first within
/// each cell-shape family, triclinic catch-alls last.
pub fn character_table() -> &'static [NiggliCharacter] {
    static TABLE: OnceLock<Vec<NiggliCharacter>> = OnceLock::new();
    TABLE.get_or_init(build_table)
}

// Condition rows over [A, B, C, D, E, F].
const AB: [f64; 6] = [1.0, -1.0, 0.0, 0.0, 0.0, 0.0];
const BC: [f64; 6] = [0.0, 1.0, -1.0, 0.0, 0.0, 0.0];
const D_ZERO: [f64; 6] = [0.0, 0.0, 0.0, 1.0, 0.0, 0.0];
const E_ZERO: [f64; 6] = [0.0, 0.0, 0.0, 0.0, 1.0, 0.0];
const F_ZERO: [f64; 6] = [0.0, 0.0, 0.0, 0.0, 0.0, 1.0];
const D_EQ_E: [f64; 6] = [0.0, 0.0, 0.0, 1.0, -1.0, 0.0];
const E_EQ_F: [f64; 6] = [0.0, 0.0, 0.0, 0.0, 1.0, -1.0];
const D_HALF_A: [f64; 6] = [-0.5, 0.0, 0.0, 1.0, 0.0, 0.0];
const E_HALF_A: [f64; 6] = [-0.5, 0.0, 0.0, 0.0, 1.0, 0.0];
const F_HALF_A: [f64; 6] = [-0.5, 0.0, 0.0, 0.0, 0.0, 1.0];
const D_QUARTER_A: [f64; 6] = [-0.25, 0.0, 0.0, 1.0, 0.0, 0.0];
const D_NEG_HALF_A: [f64; 6] = [0.5, 0.0, 0.0, 1.0, 0.0, 0.0];
const E_NEG_HALF_A: [f64; 6] = [0.5, 0.0, 0.0, 0.0, 1.0, 0.0];
const F_NEG_HALF_A: [f64; 6] = [0.5, 0.0, 0.0, 0.0, 0.0, 1.0];
const D_NEG_THIRD_A: [f64; 6] = [1.0 / 3.0, 0.0, 0.0, 1.0, 0.0, 0.0];
const E_NEG_THIRD_A: [f64; 6] = [1.0 / 3.0, 0.0, 0.0, 0.0, 1.0, 0.0];
const F_NEG_THIRD_A: [f64; 6] = [1.0 / 3.0, 0.0, 0.0, 0.0, 0.0, 1.0];
const D_NEG_HALF_B: [f64; 6] = [0.0, 0.5, 0.0, 1.0, 0.0, 0.0];
const D_HALF_B: [f64; 6] = [0.0, -0.5, 0.0, 1.0, 0.0, 0.0];
const F_EQ_2D: [f64; 6] = [0.0, 0.0, 0.0, -2.0, 0.0, 1.0];
const E_EQ_2D: [f64; 6] = [0.0, 0.0, 0.0, -2.0, 1.0, 0.0];
const F_EQ_2E: [f64; 6] = [0.0, 0.0, 0.0, 0.0, -2.0, 1.0];
/// A + B + 2(D + E + F) = 0, the body-diagonal boundary of the reduction.
const SUM: [f64; 6] = [1.0, 1.0, 0.0, 2.0, 2.0, 2.0];
/// B + 2D + F = 0, the second condition of character 43.
const B_2D_F: [f64; 6] = [0.0, 1.0, 0.0, 2.0, 0.0, 1.0];

fn build_table() -> Vec<NiggliCharacter> {
    use BravaisType::*;
    use LatticeCentring::*;

    let entry = |number: u8,
                 bravais: BravaisType,
                 centring: LatticeCentring,
                 acute_angles: bool,
                 conditions: &[[f64; 6]],
                 m: [f64; 9]| NiggliCharacter {
        number,
        bravais,
        centring,
        acute_angles,
        conditions: conditions.to_vec(),
        transform: Matrix3::new(m[0], m[1], m[2], m[3], m[4], m[5], m[6], m[7], m[8]),
    };

    vec![
        // A = B = C
        entry(1, Cubic, FaceCentred, true,
            &[AB, BC, D_HALF_A, E_HALF_A, F_HALF_A],
            [1.0, -1.0, 1.0, 1.0, 1.0, -1.0, -1.0, 1.0, 1.0]),
        entry(2, Hexagonal, Rhombohedral, true,
            &[AB, BC, D_EQ_E, E_EQ_F],
            [1.0, -1.0, 0.0, -1.0, 0.0, 1.0, -1.0, -1.0, -1.0]),
        entry(3, Cubic, Primitive, false,
            &[AB, BC, D_ZERO, E_ZERO, F_ZERO],
            [1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0]),
        entry(5, Cubic, BodyCentred, false,
            &[AB, BC, D_NEG_THIRD_A, E_NEG_THIRD_A, F_NEG_THIRD_A],
            [1.0, 0.0, 1.0, 1.0, 1.0, 0.0, 0.0, 1.0, 1.0]),
        entry(4, Hexagonal, Rhombohedral, false,
            &[AB, BC, D_EQ_E, E_EQ_F],
            [1.0, -1.0, 0.0, -1.0, 0.0, 1.0, -1.0, -1.0, -1.0]),
        entry(6, Tetragonal, BodyCentred, false,
            &[AB, BC, D_EQ_E, SUM],
            [0.0, 1.0, 1.0, 1.0, 0.0, 1.0, 1.0, 1.0, 0.0]),
        entry(7, Tetragonal, BodyCentred, false,
            &[AB, BC, E_EQ_F, SUM],
            [1.0, 0.0, 1.0, 0.0, 1.0, 1.0, 1.0, 1.0, 0.0]),
        entry(8, Orthorhombic, BodyCentred, false,
            &[AB, BC, SUM],
            [-1.0, -1.0, 0.0, -1.0, 0.0, -1.0, 0.0, -1.0, -1.0]),
        // A = B
        entry(9, Hexagonal, Rhombohedral, true,
            &[AB, D_HALF_A, E_HALF_A, F_HALF_A],
            [1.0, 0.0, 0.0, -1.0, 1.0, 0.0, -1.0, -1.0, 3.0]),
        entry(10, Monoclinic, BaseCentred, true,
            &[AB, D_EQ_E],
            [1.0, 1.0, 0.0, 1.0, -1.0, 0.0, 0.0, 0.0, -1.0]),
        entry(11, Tetragonal, Primitive, false,
            &[AB, D_ZERO, E_ZERO, F_ZERO],
            [1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0]),
        entry(12, Hexagonal, Primitive, false,
            &[AB, D_ZERO, E_ZERO, F_NEG_HALF_A],
            [1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0]),
        entry(15, Tetragonal, BodyCentred, false,
            &[AB, D_NEG_HALF_A, E_NEG_HALF_A, F_ZERO],
            [1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 1.0, 1.0, 2.0]),
        entry(16, Orthorhombic, FaceCentred, false,
            &[AB, D_EQ_E, SUM],
            [-1.0, -1.0, 0.0, 1.0, -1.0, 0.0, 1.0, 1.0, 2.0]),
        entry(13, Orthorhombic, BaseCentred, false,
            &[AB, D_ZERO, E_ZERO],
            [1.0, 1.0, 0.0, -1.0, 1.0, 0.0, 0.0, 0.0, 1.0]),
        entry(14, Monoclinic, BaseCentred, false,
            &[AB, D_EQ_E],
            [1.0, 1.0, 0.0, -1.0, 1.0, 0.0, 0.0, 0.0, 1.0]),
        entry(17, Monoclinic, BaseCentred, false,
            &[AB, SUM],
            [1.0, -1.0, 0.0, 1.0, 1.0, 0.0, -1.0, 0.0, -1.0]),
        // B = C
        entry(18, Tetragonal, BodyCentred, true,
            &[BC, D_QUARTER_A, E_HALF_A, F_HALF_A],
            [0.0, -1.0, 1.0, 1.0, -1.0, -1.0, 1.0, 0.0, 0.0]),
        entry(19, Orthorhombic, BodyCentred, true,
            &[BC, E_HALF_A, F_HALF_A],
            [-1.0, 0.0, 0.0, 0.0, -1.0, 1.0, -1.0, 1.0, 1.0]),
        entry(20, Monoclinic, BaseCentred, true,
            &[BC, E_EQ_F],
            [0.0, 1.0, 1.0, 0.0, 1.0, -1.0, -1.0, 0.0, 0.0]),
        entry(21, Tetragonal, Primitive, false,
            &[BC, D_ZERO, E_ZERO, F_ZERO],
            [0.0, 1.0, 0.0, 0.0, 0.0, 1.0, 1.0, 0.0, 0.0]),
        entry(22, Hexagonal, Primitive, false,
            &[BC, D_NEG_HALF_B, E_ZERO, F_ZERO],
            [0.0, 1.0, 0.0, 0.0, 0.0, 1.0, 1.0, 0.0, 0.0]),
        entry(23, Orthorhombic, BaseCentred, false,
            &[BC, E_ZERO, F_ZERO],
            [0.0, 1.0, 1.0, 0.0, -1.0, 1.0, 1.0, 0.0, 0.0]),
        entry(24, Hexagonal, Rhombohedral, false,
            &[BC, E_NEG_THIRD_A, F_NEG_THIRD_A, SUM],
            [1.0, 2.0, 1.0, 0.0, -1.0, 1.0, 1.0, 0.0, 0.0]),
        entry(25, Monoclinic, BaseCentred, false,
            &[BC, E_EQ_F],
            [1.0, 0.0, 0.0, 0.0, 1.0, 1.0, 0.0, -1.0, 1.0]),
        // No diagonal conditions, type I
        entry(26, Orthorhombic, FaceCentred, true,
            &[D_QUARTER_A, E_HALF_A, F_HALF_A],
            [1.0, 0.0, 0.0, -1.0, 2.0, 0.0, -1.0, 0.0, 2.0]),
        entry(27, Monoclinic, BaseCentred, true,
            &[E_HALF_A, F_HALF_A],
            [-1.0, 2.0, 0.0, -1.0, 0.0, 0.0, 0.0, -1.0, 1.0]),
        entry(28, Monoclinic, BaseCentred, true,
            &[E_HALF_A, F_EQ_2D],
            [-1.0, 0.0, 0.0, -1.0, 0.0, 2.0, 0.0, 1.0, 0.0]),
        entry(29, Monoclinic, BaseCentred, true,
            &[E_EQ_2D, F_HALF_A],
            [1.0, 0.0, 0.0, 1.0, -2.0, 0.0, 0.0, 0.0, -1.0]),
        entry(30, Monoclinic, BaseCentred, true,
            &[D_HALF_B, F_EQ_2E],
            [0.0, 1.0, 0.0, 0.0, 1.0, -2.0, -1.0, 0.0, 0.0]),
        entry(31, Triclinic, Primitive, true,
            &[],
            [1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0]),
        // No diagonal conditions, type II
        entry(32, Orthorhombic, Primitive, false,
            &[D_ZERO, E_ZERO, F_ZERO],
            [1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0]),
        entry(40, Orthorhombic, BaseCentred, false,
            &[D_NEG_HALF_B, E_ZERO, F_ZERO],
            [0.0, -1.0, 0.0, 0.0, 1.0, 2.0, -1.0, 0.0, 0.0]),
        entry(36, Orthorhombic, BaseCentred, false,
            &[D_ZERO, E_NEG_HALF_A, F_ZERO],
            [1.0, 0.0, 0.0, -1.0, 0.0, -2.0, 0.0, 1.0, 0.0]),
        entry(38, Orthorhombic, BaseCentred, false,
            &[D_ZERO, E_ZERO, F_NEG_HALF_A],
            [-1.0, 0.0, 0.0, 1.0, 2.0, 0.0, 0.0, 0.0, -1.0]),
        entry(35, Monoclinic, Primitive, false,
            &[E_ZERO, F_ZERO],
            [0.0, -1.0, 0.0, -1.0, 0.0, 0.0, 0.0, 0.0, -1.0]),
        entry(33, Monoclinic, Primitive, false,
            &[D_ZERO, F_ZERO],
            [1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0]),
        entry(34, Monoclinic, Primitive, false,
            &[D_ZERO, E_ZERO],
            [-1.0, 0.0, 0.0, 0.0, 0.0, -1.0, 0.0, -1.0, 0.0]),
        entry(42, Orthorhombic, BodyCentred, false,
            &[D_NEG_HALF_B, E_NEG_HALF_A, F_ZERO],
            [-1.0, 0.0, 0.0, 0.0, -1.0, 0.0, 1.0, 1.0, 2.0]),
        entry(41, Monoclinic, BaseCentred, false,
            &[D_NEG_HALF_B, F_ZERO],
            [0.0, -1.0, -2.0, 0.0, -1.0, 0.0, -1.0, 0.0, 0.0]),
        entry(37, Monoclinic, BaseCentred, false,
            &[E_NEG_HALF_A, F_ZERO],
            [1.0, 0.0, 2.0, 1.0, 0.0, 0.0, 0.0, 1.0, 0.0]),
        entry(39, Monoclinic, BaseCentred, false,
            &[E_ZERO, F_NEG_HALF_A],
            [-1.0, 0.0, -2.0, -1.0, 0.0, 0.0, 0.0, 1.0, 0.0]),
        entry(43, Monoclinic, BodyCentred, false,
            &[SUM, B_2D_F],
            [-1.0, 0.0, 0.0, -1.0, -1.0, -2.0, 0.0, -1.0, 0.0]),
        entry(44, Triclinic, Primitive, false,
            &[],
            [1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0]),
    ]
}
