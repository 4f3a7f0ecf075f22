//! The unit-cell model: direct and reciprocal bases, metric tensors, Niggli
//! reduction with Bravais assignment, covariance propagation through basis
//! changes, and Miller indexing.

use std::sync::Arc;

use nalgebra::{Matrix3, Rotation3, SMatrix, SVector, Vector3};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::core::lsq::{
    FitConfig, LeastSquaresProblem, LevenbergMarquardt, LsqError,
};
use crate::core::reduction::gruber::{self, BravaisType, LatticeCentring, NiggliCharacter};
use crate::core::reduction::{niggli, ReductionError};
use crate::core::symmetry::space_group::SpaceGroup;
use crate::core::symmetry::SymmetryError;

use super::material::Material;

/// Covariance of the nine basis components, flattened row-major: component
/// `(i, j)` of the basis lives at index `3 i + j`.
pub type BasisCovariance = SMatrix<f64, 9, 9>;

/// Errors produced by unit-cell construction and mutation.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum CellError {
    /// An axis length or angle is outside its physical range.
    #[error("Invalid cell parameter {name} = {value}")]
    InvalidParameter { name: &'static str, value: f64 },

    /// The basis (or a requested change of basis) is not invertible.
    #[error("Basis matrix is singular")]
    SingularBasis,

    #[error("HKL tolerance {value} is outside (0, 1)")]
    InvalidHklTolerance { value: f64 },

    /// A sigma computation was requested but no covariance is attached.
    #[error("Unit cell carries no basis covariance")]
    MissingCovariance,

    /// A constrained refit was requested before the cell was classified.
    #[error("Unit cell has no lattice character; reduce it first")]
    Unclassified,

    #[error(transparent)]
    Reduction(#[from] ReductionError),

    #[error(transparent)]
    Symmetry(#[from] SymmetryError),

    #[error(transparent)]
    Fit(#[from] LsqError),
}

/// The six scalar cell parameters. Angles are in radians.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CellCharacter {
    pub a: f64,
    pub b: f64,
    pub c: f64,
    pub alpha: f64,
    pub beta: f64,
    pub gamma: f64,
}

/// Persistable scalar state of a unit cell. The basis orientation is not
/// part of the snapshot; a restored cell uses the standard Cartesian
/// embedding of its parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CellSnapshot {
    pub a: f64,
    pub b: f64,
    pub c: f64,
    pub alpha: f64,
    pub beta: f64,
    pub gamma: f64,
    pub space_group: String,
    pub centring: LatticeCentring,
    pub bravais: BravaisType,
    pub z: u32,
    pub hkl_tolerance: f64,
}

/// A crystal unit cell.
///
/// Owns the direct basis `A` (columns are the real-space lattice vectors)
/// and keeps the reciprocal basis `B = A⁻¹` in lockstep: every public
/// mutator leaves `A B = I` to floating-point precision before returning.
#[derive(Debug, Clone)]
pub struct UnitCell {
    basis: Matrix3<f64>,
    reciprocal: Matrix3<f64>,
    centring: LatticeCentring,
    bravais: BravaisType,
    z: u32,
    space_group: Arc<SpaceGroup>,
    material: Option<Arc<Material>>,
    hkl_tolerance: f64,
    character: Option<&'static NiggliCharacter>,
    /// Composite transform applied after reduction; the Niggli basis is
    /// recoverable as `A · NP⁻¹`.
    niggli_transform: Matrix3<f64>,
    niggli_transform_inv: Matrix3<f64>,
    cov_basis: Option<BasisCovariance>,
    cov_reciprocal: Option<BasisCovariance>,
}

const DEFAULT_HKL_TOLERANCE: f64 = 0.2;

impl UnitCell {
    /// Builds a cell from the six parameters (lengths in the caller's length
    /// unit, angles in radians) using the standard Cartesian embedding:
    /// `a` along x, `b` in the xy-plane.
    ///
    /// # Errors
    ///
    /// [`CellError::InvalidParameter`] for non-positive lengths, angles
    /// outside `(0, π)`, or an angle triple that closes no parallelepiped.
    pub fn from_parameters(
        a: f64,
        b: f64,
        c: f64,
        alpha: f64,
        beta: f64,
        gamma: f64,
    ) -> Result<Self, CellError> {
        let basis = basis_from_parameters(a, b, c, alpha, beta, gamma)?;
        Self::from_basis(basis)
    }

    /// Builds a cell from an explicit direct basis (columns are lattice
    /// vectors).
    ///
    /// # Errors
    ///
    /// [`CellError::SingularBasis`] when the basis is not invertible.
    pub fn from_basis(basis: Matrix3<f64>) -> Result<Self, CellError> {
        let reciprocal = basis.try_inverse().ok_or(CellError::SingularBasis)?;
        Ok(Self {
            basis,
            reciprocal,
            centring: LatticeCentring::Primitive,
            bravais: BravaisType::Triclinic,
            z: 1,
            space_group: Arc::new(SpaceGroup::p1()),
            material: None,
            hkl_tolerance: DEFAULT_HKL_TOLERANCE,
            character: None,
            niggli_transform: Matrix3::identity(),
            niggli_transform_inv: Matrix3::identity(),
            cov_basis: None,
            cov_reciprocal: None,
        })
    }

    /// Builds a cell from a reciprocal basis.
    pub fn from_reciprocal_basis(reciprocal: Matrix3<f64>) -> Result<Self, CellError> {
        let basis = reciprocal.try_inverse().ok_or(CellError::SingularBasis)?;
        Self::from_basis(basis)
    }

    /// Builds a cell from a fitted UB matrix (`q = UB · hkl`), optionally
    /// with the 9x9 covariance of the UB components.
    ///
    /// The reciprocal basis is the transpose of UB in the column-vector
    /// convention used here, so the covariance is carried over by the
    /// corresponding index permutation and then propagated to the direct
    /// basis.
    pub fn from_ub(
        ub: &Matrix3<f64>,
        cov_ub: Option<&BasisCovariance>,
    ) -> Result<Self, CellError> {
        let mut cell = Self::from_reciprocal_basis(ub.transpose())?;
        if let Some(cov_ub) = cov_ub {
            let mut cov_reciprocal = BasisCovariance::zeros();
            for i in 0..3 {
                for j in 0..3 {
                    for k in 0..3 {
                        for l in 0..3 {
                            cov_reciprocal[(3 * i + j, 3 * k + l)] =
                                cov_ub[(3 * j + i, 3 * l + k)];
                        }
                    }
                }
            }
            // delta A = -A (delta B) A; the sign squares away.
            cell.cov_basis = Some(propagate_bilinear(
                &cell.basis,
                &cell.basis,
                &cov_reciprocal,
            ));
            cell.cov_reciprocal = Some(cov_reciprocal);
        }
        Ok(cell)
    }

    /// Restores a cell from its persisted scalar state.
    pub fn from_snapshot(snapshot: &CellSnapshot) -> Result<Self, CellError> {
        let mut cell = Self::from_parameters(
            snapshot.a,
            snapshot.b,
            snapshot.c,
            snapshot.alpha,
            snapshot.beta,
            snapshot.gamma,
        )?;
        cell.space_group = Arc::new(SpaceGroup::new(&snapshot.space_group)?);
        cell.centring = snapshot.centring;
        cell.bravais = snapshot.bravais;
        cell.z = snapshot.z;
        cell.set_hkl_tolerance(snapshot.hkl_tolerance)?;
        Ok(cell)
    }

    /// Persistable scalar state of this cell.
    pub fn snapshot(&self) -> CellSnapshot {
        let character = self.character();
        CellSnapshot {
            a: character.a,
            b: character.b,
            c: character.c,
            alpha: character.alpha,
            beta: character.beta,
            gamma: character.gamma,
            space_group: self.space_group.symbol().to_string(),
            centring: self.centring,
            bravais: self.bravais,
            z: self.z,
            hkl_tolerance: self.hkl_tolerance,
        }
    }

    pub fn basis(&self) -> &Matrix3<f64> {
        &self.basis
    }

    pub fn reciprocal_basis(&self) -> &Matrix3<f64> {
        &self.reciprocal
    }

    /// Metric tensor `Aᵀ A`.
    pub fn metric(&self) -> Matrix3<f64> {
        self.basis.transpose() * self.basis
    }

    /// Reciprocal metric tensor `B Bᵀ`.
    pub fn reciprocal_metric(&self) -> Matrix3<f64> {
        self.reciprocal * self.reciprocal.transpose()
    }

    pub fn volume(&self) -> f64 {
        self.basis.determinant().abs()
    }

    pub fn centring(&self) -> LatticeCentring {
        self.centring
    }

    pub fn bravais(&self) -> BravaisType {
        self.bravais
    }

    /// Bravais symbol, e.g. `cF`.
    pub fn bravais_symbol(&self) -> String {
        format!("{}{}", self.bravais.letter(), self.centring.letter())
    }

    pub fn z(&self) -> u32 {
        self.z
    }

    pub fn set_z(&mut self, z: u32) {
        self.z = z;
    }

    pub fn space_group(&self) -> &Arc<SpaceGroup> {
        &self.space_group
    }

    pub fn set_space_group(&mut self, space_group: Arc<SpaceGroup>) {
        self.space_group = space_group;
    }

    pub fn material(&self) -> Option<&Arc<Material>> {
        self.material.as_ref()
    }

    pub fn set_material(&mut self, material: Option<Arc<Material>>) {
        self.material = material;
    }

    pub fn hkl_tolerance(&self) -> f64 {
        self.hkl_tolerance
    }

    /// Sets the tolerance used by [`Self::miller_indices`] for accepting a
    /// fractional index as integral.
    ///
    /// # Errors
    ///
    /// [`CellError::InvalidHklTolerance`] when `tolerance` is outside
    /// `(0, 1)`.
    pub fn set_hkl_tolerance(&mut self, tolerance: f64) -> Result<(), CellError> {
        if !(tolerance > 0.0 && tolerance < 1.0) {
            return Err(CellError::InvalidHklTolerance { value: tolerance });
        }
        self.hkl_tolerance = tolerance;
        Ok(())
    }

    /// The lattice character assigned by the last successful reduction.
    pub fn niggli_character(&self) -> Option<&'static NiggliCharacter> {
        self.character
    }

    /// The Niggli-reduced basis, recovered from the current basis and the
    /// composite post-reduction transform.
    pub fn niggli_basis(&self) -> Matrix3<f64> {
        self.basis * self.niggli_transform_inv
    }

    /// Covariance of the direct-basis components, if known.
    pub fn basis_covariance(&self) -> Option<&BasisCovariance> {
        self.cov_basis.as_ref()
    }

    /// Covariance of the reciprocal-basis components, if known.
    pub fn reciprocal_covariance(&self) -> Option<&BasisCovariance> {
        self.cov_reciprocal.as_ref()
    }

    /// The six cell parameters derived from the metric tensor.
    pub fn character(&self) -> CellCharacter {
        let g = self.metric();
        let a = g[(0, 0)].sqrt();
        let b = g[(1, 1)].sqrt();
        let c = g[(2, 2)].sqrt();
        CellCharacter {
            a,
            b,
            c,
            alpha: (g[(1, 2)] / (b * c)).clamp(-1.0, 1.0).acos(),
            beta: (g[(0, 2)] / (a * c)).clamp(-1.0, 1.0).acos(),
            gamma: (g[(0, 1)] / (a * b)).clamp(-1.0, 1.0).acos(),
        }
    }

    /// One-sigma uncertainties of the six cell parameters, from a first-order
    /// expansion of each parameter in the nine basis components.
    ///
    /// # Errors
    ///
    /// [`CellError::MissingCovariance`] when no covariance is attached.
    pub fn character_sigmas(&self) -> Result<CellCharacter, CellError> {
        let cov = self.cov_basis.as_ref().ok_or(CellError::MissingCovariance)?;
        let sigma = |jacobian: &SVector<f64, 9>| -> f64 {
            (jacobian.transpose() * cov * jacobian)[(0, 0)].max(0.0).sqrt()
        };

        let edge_jacobian = |column: usize| -> SVector<f64, 9> {
            let length = self.basis.column(column).norm();
            let mut j = SVector::zeros();
            for i in 0..3 {
                j[3 * i + column] = self.basis[(i, column)] / length;
            }
            j
        };

        // For the angle between columns p and q, expand u = (p.q)/(|p||q|)
        // and chain through alpha = acos(u).
        let angle_jacobian = |p: usize, q: usize| -> SVector<f64, 9> {
            let cp = self.basis.column(p);
            let cq = self.basis.column(q);
            let (np, nq) = (cp.norm(), cq.norm());
            let u = cp.dot(&cq) / (np * nq);
            let scale = -1.0 / (1.0 - u * u).sqrt();
            let mut j = SVector::zeros();
            for i in 0..3 {
                j[3 * i + p] = scale * (cq[i] / (np * nq) - u * cp[i] / (np * np));
                j[3 * i + q] = scale * (cp[i] / (np * nq) - u * cq[i] / (nq * nq));
            }
            j
        };

        Ok(CellCharacter {
            a: sigma(&edge_jacobian(0)),
            b: sigma(&edge_jacobian(1)),
            c: sigma(&edge_jacobian(2)),
            alpha: sigma(&angle_jacobian(1, 2)),
            beta: sigma(&angle_jacobian(0, 2)),
            gamma: sigma(&angle_jacobian(0, 1)),
        })
    }

    /// Rebuilds the cell from six parameters. Covariance is cleared: the
    /// parameters carry no orientation, so the old component covariance no
    /// longer applies.
    pub fn set_params(
        &mut self,
        a: f64,
        b: f64,
        c: f64,
        alpha: f64,
        beta: f64,
        gamma: f64,
    ) -> Result<(), CellError> {
        let basis = basis_from_parameters(a, b, c, alpha, beta, gamma)?;
        self.set_basis(basis, None)
    }

    /// Replaces the direct basis, with an optional covariance of its
    /// components.
    pub fn set_basis(
        &mut self,
        basis: Matrix3<f64>,
        covariance: Option<BasisCovariance>,
    ) -> Result<(), CellError> {
        let reciprocal = basis.try_inverse().ok_or(CellError::SingularBasis)?;
        self.basis = basis;
        self.reciprocal = reciprocal;
        self.cov_basis = covariance;
        self.sync_reciprocal_covariance();
        Ok(())
    }

    /// Replaces the reciprocal basis, with an optional covariance of its
    /// components.
    pub fn set_reciprocal_basis(
        &mut self,
        reciprocal: Matrix3<f64>,
        covariance: Option<BasisCovariance>,
    ) -> Result<(), CellError> {
        let basis = reciprocal.try_inverse().ok_or(CellError::SingularBasis)?;
        self.basis = basis;
        self.reciprocal = reciprocal;
        self.cov_reciprocal = covariance;
        self.cov_basis = self
            .cov_reciprocal
            .as_ref()
            .map(|c| propagate_bilinear(&self.basis, &self.basis, c));
        Ok(())
    }

    /// Applies a change of basis `A' = A · P` and propagates the covariance
    /// through the linear map.
    ///
    /// # Errors
    ///
    /// [`CellError::SingularBasis`] when `p` is not invertible.
    pub fn transform(&mut self, p: &Matrix3<f64>) -> Result<(), CellError> {
        let basis = self.basis * p;
        let reciprocal = basis.try_inverse().ok_or(CellError::SingularBasis)?;
        self.basis = basis;
        self.reciprocal = reciprocal;
        self.cov_basis = self
            .cov_basis
            .as_ref()
            .map(|c| propagate_bilinear(&Matrix3::identity(), p, c));
        self.sync_reciprocal_covariance();
        Ok(())
    }

    /// Niggli-reduces the cell and classifies it against the 44 lattice
    /// characters.
    ///
    /// The reduction transform is applied to the basis. When `niggli_only`
    /// is false, the character's conventional-cell transform is applied as
    /// well, and the composite is remembered so [`Self::niggli_basis`] stays
    /// recoverable. On a classification miss the basis keeps its (valid)
    /// reduced form, the previous character is cleared, and the error is
    /// reported for the caller to log.
    pub fn reduce(
        &mut self,
        niggli_only: bool,
        niggli_tolerance: f64,
        gruber_tolerance: f64,
    ) -> Result<&'static NiggliCharacter, CellError> {
        let (reduced_metric, p) = niggli::niggli_reduce(&self.metric(), niggli_tolerance)?;
        self.transform(&p)?;
        self.niggli_transform = Matrix3::identity();
        self.niggli_transform_inv = Matrix3::identity();

        self.character = None;
        let character = gruber::classify(&reduced_metric, gruber_tolerance)?;
        debug!(
            character = character.number,
            symbol = %character.symbol(),
            "lattice classified"
        );
        self.character = Some(character);
        self.bravais = character.bravais;
        self.centring = character.centring;

        if !niggli_only {
            let conventional = character.transform.transpose();
            let inverse = conventional
                .try_inverse()
                .ok_or(CellError::SingularBasis)?;
            self.transform(&conventional)?;
            self.niggli_transform = conventional;
            self.niggli_transform_inv = inverse;
        }
        Ok(character)
    }

    /// Projects the measured basis onto the symmetry-constrained subspace of
    /// its lattice character by a bounded least-squares refit.
    ///
    /// The trial cell is parametrized by a small rotation plus the six
    /// metric components; the residuals are the nine basis-entry deviations
    /// plus the character's constraint rows scaled by `weight`. Returns
    /// immediately for the two triclinic characters, which carry no
    /// constraints.
    ///
    /// # Errors
    ///
    /// [`CellError::Unclassified`] when the cell has not been reduced, and
    /// fit errors from the underlying solver.
    pub fn apply_niggli_constraints(&mut self, weight: f64) -> Result<(), CellError> {
        let character = self.character.ok_or(CellError::Unclassified)?;
        if character.conditions().is_empty() {
            return Ok(());
        }

        // The constraint rows hold in the Niggli-reduced metric, not the
        // conventional one, so the fit runs on the Niggli basis and the
        // composite transform is re-applied afterwards.
        let measured = self.niggli_basis();
        let g = measured.transpose() * measured;
        let embedded = embed_metric(&g);
        let u0 = polar_rotation(&(measured * embedded.try_inverse().ok_or(CellError::SingularBasis)?));

        let problem = ConstrainedCellProblem {
            measured,
            u0,
            conditions: character.conditions(),
            weight,
        };
        let seed = nalgebra::DVector::from_vec(vec![
            0.0,
            0.0,
            0.0,
            g[(0, 0)],
            g[(1, 1)],
            g[(2, 2)],
            g[(1, 2)],
            g[(0, 2)],
            g[(0, 1)],
        ]);
        let report = LevenbergMarquardt::new(FitConfig::default()).minimize(&problem, seed)?;
        let basis = problem.trial_basis(&report.params) * self.niggli_transform;
        let reciprocal = basis.try_inverse().ok_or(CellError::SingularBasis)?;
        // The projection is a near-identity correction; the covariance of
        // the measured basis is kept as-is.
        self.basis = basis;
        self.reciprocal = reciprocal;
        Ok(())
    }

    /// Fractional Miller indices of a scattering vector: `Aᵀ q`.
    pub fn index(&self, q: &Vector3<f64>) -> Vector3<f64> {
        self.basis.transpose() * q
    }

    /// Scattering vector of a Miller index: `Bᵀ hkl`.
    pub fn from_index(&self, hkl: &Vector3<f64>) -> Vector3<f64> {
        self.reciprocal.transpose() * hkl
    }

    /// Integer Miller indices of `q`, if each fractional index is within the
    /// cell's HKL tolerance of an integer.
    pub fn miller_indices(&self, q: &Vector3<f64>) -> Option<Vector3<i32>> {
        let fractional = self.index(q);
        let rounded = fractional.map(f64::round);
        if (fractional - rounded).amax() <= self.hkl_tolerance {
            Some(Vector3::new(
                rounded[0] as i32,
                rounded[1] as i32,
                rounded[2] as i32,
            ))
        } else {
            None
        }
    }

    /// True if the attached space group maps `hkl1` onto `hkl2`.
    pub fn is_equivalent(&self, hkl1: &Vector3<f64>, hkl2: &Vector3<f64>) -> bool {
        self.space_group.is_equivalent(hkl1, hkl2)
    }

    /// Like [`Self::is_equivalent`], also accepting the Friedel mate.
    pub fn is_friedel_equivalent(&self, hkl1: &Vector3<f64>, hkl2: &Vector3<f64>) -> bool {
        self.space_group.is_friedel_equivalent(hkl1, hkl2)
    }

    /// True if the reflection is systematically absent in the attached
    /// space group.
    pub fn is_extinct(&self, hkl: &Vector3<f64>) -> bool {
        self.space_group.is_extinct(hkl)
    }

    fn sync_reciprocal_covariance(&mut self) {
        self.cov_reciprocal = self
            .cov_basis
            .as_ref()
            .map(|c| propagate_bilinear(&self.reciprocal, &self.reciprocal, c));
    }
}

/// First-order covariance propagation through the bilinear map
/// `A' = M · A · N`: builds the 9x9 linearization `T` with
/// `T[(3i+j),(3a+b)] = M[(i,a)] N[(b,j)]` and returns `T C Tᵀ`.
pub(crate) fn propagate_bilinear(
    m: &Matrix3<f64>,
    n: &Matrix3<f64>,
    c: &BasisCovariance,
) -> BasisCovariance {
    let mut t = BasisCovariance::zeros();
    for i in 0..3 {
        for j in 0..3 {
            for a in 0..3 {
                for b in 0..3 {
                    t[(3 * i + j, 3 * a + b)] = m[(i, a)] * n[(b, j)];
                }
            }
        }
    }
    t * c * t.transpose()
}

/// Standard Cartesian embedding of the six cell parameters.
fn basis_from_parameters(
    a: f64,
    b: f64,
    c: f64,
    alpha: f64,
    beta: f64,
    gamma: f64,
) -> Result<Matrix3<f64>, CellError> {
    for (name, value) in [("a", a), ("b", b), ("c", c)] {
        if !(value > 0.0) {
            return Err(CellError::InvalidParameter { name, value });
        }
    }
    for (name, value) in [("alpha", alpha), ("beta", beta), ("gamma", gamma)] {
        if !(value > 0.0 && value < std::f64::consts::PI) {
            return Err(CellError::InvalidParameter { name, value });
        }
    }

    let cx = c * beta.cos();
    let cy = c * (alpha.cos() - beta.cos() * gamma.cos()) / gamma.sin();
    let cz_sq = c * c - cx * cx - cy * cy;
    if !(cz_sq > 0.0) {
        return Err(CellError::InvalidParameter {
            name: "angle triple",
            value: cz_sq,
        });
    }
    Ok(Matrix3::new(
        a,
        b * gamma.cos(),
        cx,
        0.0,
        b * gamma.sin(),
        cy,
        0.0,
        0.0,
        cz_sq.sqrt(),
    ))
}

/// Total (clamped) embedding of a metric tensor, for use inside the
/// constrained refit where trial metrics may drift off the positive-definite
/// cone by a step.
fn embed_metric(g: &Matrix3<f64>) -> Matrix3<f64> {
    let a = g[(0, 0)].max(f64::MIN_POSITIVE).sqrt();
    let b = g[(1, 1)].max(f64::MIN_POSITIVE).sqrt();
    let c = g[(2, 2)].max(f64::MIN_POSITIVE).sqrt();
    let cos_gamma = (g[(0, 1)] / (a * b)).clamp(-0.999_999, 0.999_999);
    let sin_gamma = (1.0 - cos_gamma * cos_gamma).sqrt();
    let cos_beta = (g[(0, 2)] / (a * c)).clamp(-0.999_999, 0.999_999);
    let cos_alpha = (g[(1, 2)] / (b * c)).clamp(-0.999_999, 0.999_999);
    let cx = c * cos_beta;
    let cy = c * (cos_alpha - cos_beta * cos_gamma) / sin_gamma;
    let cz = (c * c - cx * cx - cy * cy).max(f64::MIN_POSITIVE).sqrt();
    Matrix3::new(a, b * cos_gamma, cx, 0.0, b * sin_gamma, cy, 0.0, 0.0, cz)
}

/// Rotation factor of the polar decomposition of `m`.
fn polar_rotation(m: &Matrix3<f64>) -> Matrix3<f64> {
    let svd = m.svd(true, true);
    match (svd.u, svd.v_t) {
        (Some(u), Some(v_t)) => {
            let r = u * v_t;
            if r.determinant() < 0.0 {
                u * Matrix3::from_diagonal(&Vector3::new(1.0, 1.0, -1.0)) * v_t
            } else {
                r
            }
        }
        _ => Matrix3::identity(),
    }
}

/// Least-squares problem for [`UnitCell::apply_niggli_constraints`]:
/// parameters are a rotation vector (3) followed by the six metric
/// components `[A, B, C, D, E, F]`.
struct ConstrainedCellProblem<'a> {
    measured: Matrix3<f64>,
    u0: Matrix3<f64>,
    conditions: &'a [[f64; 6]],
    weight: f64,
}

impl ConstrainedCellProblem<'_> {
    fn trial_basis(&self, params: &nalgebra::DVector<f64>) -> Matrix3<f64> {
        let rotation =
            Rotation3::new(Vector3::new(params[0], params[1], params[2])).into_inner();
        let g = Matrix3::new(
            params[3], params[8], params[7],
            params[8], params[4], params[6],
            params[7], params[6], params[5],
        );
        rotation * self.u0 * embed_metric(&g)
    }
}

impl LeastSquaresProblem for ConstrainedCellProblem<'_> {
    fn residuals(&self, params: &nalgebra::DVector<f64>) -> nalgebra::DVector<f64> {
        let trial = self.trial_basis(params);
        let delta = trial - self.measured;
        let mut residuals = Vec::with_capacity(9 + self.conditions.len());
        for i in 0..3 {
            for j in 0..3 {
                residuals.push(delta[(i, j)]);
            }
        }
        let x = [params[3], params[4], params[5], params[6], params[7], params[8]];
        for row in self.conditions {
            let value: f64 = row.iter().zip(&x).map(|(r, v)| r * v).sum();
            residuals.push(self.weight * value);
        }
        nalgebra::DVector::from_vec(residuals)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::f64::consts::FRAC_PI_2;

    fn cubic(a: f64) -> UnitCell {
        UnitCell::from_parameters(a, a, a, FRAC_PI_2, FRAC_PI_2, FRAC_PI_2).unwrap()
    }

    fn assert_inverse_pair(cell: &UnitCell) {
        let product = cell.basis() * cell.reciprocal_basis();
        for i in 0..3 {
            for j in 0..3 {
                let expected = if i == j { 1.0 } else { 0.0 };
                assert_relative_eq!(product[(i, j)], expected, epsilon = 1e-12);
            }
        }
    }

    #[test]
    fn cubic_cell_embeds_onto_the_axes() {
        let cell = cubic(5.0);
        assert_relative_eq!(cell.volume(), 125.0, epsilon = 1e-10);
        assert_inverse_pair(&cell);
        let character = cell.character();
        assert_relative_eq!(character.a, 5.0, epsilon = 1e-12);
        assert_relative_eq!(character.alpha, FRAC_PI_2, epsilon = 1e-12);
    }

    #[test]
    fn out_of_range_parameters_are_rejected() {
        assert!(matches!(
            UnitCell::from_parameters(-1.0, 5.0, 5.0, FRAC_PI_2, FRAC_PI_2, FRAC_PI_2),
            Err(CellError::InvalidParameter { name: "a", .. })
        ));
        assert!(matches!(
            UnitCell::from_parameters(5.0, 5.0, 5.0, 0.0, FRAC_PI_2, FRAC_PI_2),
            Err(CellError::InvalidParameter { name: "alpha", .. })
        ));
        // alpha + beta + gamma constraints that close no cell.
        assert!(matches!(
            UnitCell::from_parameters(5.0, 5.0, 5.0, 3.0, 3.0, 0.1),
            Err(CellError::InvalidParameter { .. })
        ));
    }

    #[test]
    fn indexing_round_trips_through_the_reciprocal_basis() {
        let cell = UnitCell::from_parameters(5.2, 7.1, 9.3, 1.3, 1.6, 1.9).unwrap();
        let hkl = Vector3::new(2.0, -3.0, 5.0);
        let q = cell.from_index(&hkl);
        let recovered = cell.index(&q);
        assert_relative_eq!(recovered[0], 2.0, epsilon = 1e-10);
        assert_relative_eq!(recovered[1], -3.0, epsilon = 1e-10);
        assert_relative_eq!(recovered[2], 5.0, epsilon = 1e-10);
    }

    #[test]
    fn miller_indices_respect_the_hkl_tolerance() {
        let mut cell = cubic(4.0);
        cell.set_hkl_tolerance(0.1).unwrap();
        let q = cell.from_index(&Vector3::new(1.03, 2.0, 0.0));
        assert_eq!(cell.miller_indices(&q), Some(Vector3::new(1, 2, 0)));
        let q_far = cell.from_index(&Vector3::new(1.2, 2.0, 0.0));
        assert_eq!(cell.miller_indices(&q_far), None);
    }

    #[test]
    fn hkl_tolerance_outside_unit_interval_is_rejected() {
        let mut cell = cubic(4.0);
        assert_eq!(
            cell.set_hkl_tolerance(1.5),
            Err(CellError::InvalidHklTolerance { value: 1.5 })
        );
        assert_eq!(
            cell.set_hkl_tolerance(0.0),
            Err(CellError::InvalidHklTolerance { value: 0.0 })
        );
    }

    #[test]
    fn transform_keeps_the_reciprocal_in_lockstep() {
        let mut cell = cubic(3.0);
        let p = Matrix3::new(1.0, 1.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0);
        cell.transform(&p).unwrap();
        assert_inverse_pair(&cell);
        assert_relative_eq!(cell.volume(), 27.0, epsilon = 1e-10);
    }

    #[test]
    fn covariance_propagates_through_a_diagonal_transform() {
        let mut cell = cubic(3.0);
        cell.set_basis(*cell.basis(), Some(BasisCovariance::identity()))
            .unwrap();
        let p = Matrix3::from_diagonal(&Vector3::new(2.0, 1.0, 1.0));
        cell.transform(&p).unwrap();
        let cov = cell.basis_covariance().unwrap();
        for i in 0..3 {
            assert_relative_eq!(cov[(3 * i, 3 * i)], 4.0, epsilon = 1e-12);
            assert_relative_eq!(cov[(3 * i + 1, 3 * i + 1)], 1.0, epsilon = 1e-12);
            assert_relative_eq!(cov[(3 * i + 2, 3 * i + 2)], 1.0, epsilon = 1e-12);
        }
    }

    #[test]
    fn character_sigmas_match_the_analytic_orthogonal_case() {
        let mut cell = UnitCell::from_parameters(2.0, 3.0, 4.0, FRAC_PI_2, FRAC_PI_2, FRAC_PI_2)
            .unwrap();
        let sigma = 0.01;
        cell.set_basis(*cell.basis(), Some(BasisCovariance::identity() * sigma * sigma))
            .unwrap();
        let sigmas = cell.character_sigmas().unwrap();
        assert_relative_eq!(sigmas.a, sigma, epsilon = 1e-12);
        assert_relative_eq!(sigmas.b, sigma, epsilon = 1e-12);
        assert_relative_eq!(sigmas.c, sigma, epsilon = 1e-12);
        // For orthogonal axes, var(alpha) = sigma^2 (1/b^2 + 1/c^2).
        let expected_alpha = (sigma * sigma * (1.0 / 9.0 + 1.0 / 16.0)).sqrt();
        assert_relative_eq!(sigmas.alpha, expected_alpha, epsilon = 1e-12);
    }

    #[test]
    fn missing_covariance_is_a_typed_error() {
        let cell = cubic(4.0);
        assert_eq!(cell.character_sigmas(), Err(CellError::MissingCovariance));
    }

    #[test]
    fn scrambled_cubic_cell_reduces_back_to_cubic() {
        let mut cell = cubic(5.0);
        let shear = Matrix3::new(1.0, 2.0, 1.0, 0.0, 1.0, -1.0, 0.0, 0.0, 1.0);
        cell.transform(&shear).unwrap();
        let character = cell.reduce(false, 1e-9, 1e-6).unwrap();
        assert_eq!(character.number, 3);
        assert_eq!(cell.bravais(), BravaisType::Cubic);
        assert_eq!(cell.centring(), LatticeCentring::Primitive);
        let recovered = cell.character();
        assert_relative_eq!(recovered.a, 5.0, epsilon = 1e-9);
        assert_relative_eq!(recovered.b, 5.0, epsilon = 1e-9);
        assert_relative_eq!(recovered.c, 5.0, epsilon = 1e-9);
        assert_relative_eq!(recovered.alpha, FRAC_PI_2, epsilon = 1e-9);
        assert_inverse_pair(&cell);
    }

    #[test]
    fn randomly_scrambled_cubic_cells_always_classify_cubic() {
        use rand::rngs::StdRng;
        use rand::{Rng, SeedableRng};

        let mut rng = StdRng::seed_from_u64(20240817);
        for _ in 0..20 {
            // Random product of elementary unimodular shears.
            let mut t = Matrix3::identity();
            for _ in 0..4 {
                let (from, to) = loop {
                    let from = rng.random_range(0..3);
                    let to = rng.random_range(0..3);
                    if from != to {
                        break (from, to);
                    }
                };
                let mut shear = Matrix3::identity();
                shear[(from, to)] = f64::from(rng.random_range(-2..=2i32));
                t *= shear;
            }

            let mut cell = cubic(5.0);
            cell.transform(&t).unwrap();
            let character = cell.reduce(false, 1e-9, 1e-6).unwrap();
            assert_eq!(character.bravais, BravaisType::Cubic);
            let recovered = cell.character();
            assert_relative_eq!(recovered.a, 5.0, epsilon = 1e-8);
            assert_relative_eq!(recovered.b, 5.0, epsilon = 1e-8);
            assert_relative_eq!(recovered.c, 5.0, epsilon = 1e-8);
            assert_relative_eq!(recovered.alpha, FRAC_PI_2, epsilon = 1e-8);
            assert_relative_eq!(recovered.beta, FRAC_PI_2, epsilon = 1e-8);
            assert_relative_eq!(recovered.gamma, FRAC_PI_2, epsilon = 1e-8);
        }
    }

    #[test]
    fn primitive_fcc_basis_reduces_to_the_conventional_cube() {
        // Columns are the primitive vectors of a face-centred cubic lattice
        // with conventional edge 4.
        let basis = Matrix3::new(0.0, 2.0, 2.0, 2.0, 0.0, 2.0, 2.0, 2.0, 0.0);
        let mut cell = UnitCell::from_basis(basis).unwrap();
        let character = cell.reduce(false, 1e-9, 1e-6).unwrap();
        assert_eq!(character.number, 1);
        assert_eq!(cell.bravais_symbol(), "cF");
        let recovered = cell.character();
        assert_relative_eq!(recovered.a, 4.0, epsilon = 1e-9);
        assert_relative_eq!(recovered.alpha, FRAC_PI_2, epsilon = 1e-9);
        assert_relative_eq!(cell.volume(), 64.0, epsilon = 1e-9);
        // The Niggli basis stays recoverable under the composite transform.
        let niggli = cell.niggli_basis();
        let g = niggli.transpose() * niggli;
        assert_relative_eq!(g[(0, 0)], 8.0, epsilon = 1e-9);
        assert_relative_eq!(g[(0, 1)], 4.0, epsilon = 1e-9);
    }

    #[test]
    fn niggli_only_reduction_keeps_the_primitive_basis() {
        let basis = Matrix3::new(0.0, 2.0, 2.0, 2.0, 0.0, 2.0, 2.0, 2.0, 0.0);
        let mut cell = UnitCell::from_basis(basis).unwrap();
        let character = cell.reduce(true, 1e-9, 1e-6).unwrap();
        assert_eq!(character.number, 1);
        assert_relative_eq!(cell.volume(), 16.0, epsilon = 1e-9);
        assert_metric_entry(&cell, 0, 0, 8.0);
    }

    fn assert_metric_entry(cell: &UnitCell, i: usize, j: usize, expected: f64) {
        assert_relative_eq!(cell.metric()[(i, j)], expected, epsilon = 1e-9);
    }

    #[test]
    fn constrained_refit_symmetrizes_a_perturbed_cubic_cell() {
        let mut basis = Matrix3::from_diagonal(&Vector3::new(5.0, 5.0, 5.0));
        basis[(0, 0)] = 5.003;
        basis[(0, 1)] = 0.002;
        basis[(1, 2)] = -0.001;
        let mut cell = UnitCell::from_basis(basis).unwrap();
        cell.reduce(true, 1e-2, 1e-2).unwrap();
        assert_eq!(cell.niggli_character().unwrap().number, 3);

        cell.apply_niggli_constraints(1e3).unwrap();
        let character = cell.character();
        assert_relative_eq!(character.a, character.b, epsilon = 1e-5);
        assert_relative_eq!(character.b, character.c, epsilon = 1e-5);
        assert_relative_eq!(character.alpha, FRAC_PI_2, epsilon = 1e-5);
        assert_relative_eq!(character.beta, FRAC_PI_2, epsilon = 1e-5);
        assert_relative_eq!(character.gamma, FRAC_PI_2, epsilon = 1e-5);
        assert_inverse_pair(&cell);
    }

    #[test]
    fn constrained_refit_preserves_a_fully_reduced_conventional_cell() {
        // Face-centred cubic: the conventional metric does not satisfy the
        // character-1 rows, only the Niggli metric does. The refit must not
        // distort the conventional cube.
        let basis = Matrix3::new(0.0, 2.0, 2.0, 2.0, 0.0, 2.0, 2.0, 2.0, 0.0);
        let mut cell = UnitCell::from_basis(basis).unwrap();
        let character = cell.reduce(false, 1e-9, 1e-6).unwrap();
        assert_eq!(character.number, 1);

        cell.apply_niggli_constraints(1e3).unwrap();
        let recovered = cell.character();
        assert_relative_eq!(recovered.a, 4.0, epsilon = 1e-6);
        assert_relative_eq!(recovered.b, 4.0, epsilon = 1e-6);
        assert_relative_eq!(recovered.c, 4.0, epsilon = 1e-6);
        assert_relative_eq!(recovered.alpha, FRAC_PI_2, epsilon = 1e-6);
        assert_relative_eq!(recovered.beta, FRAC_PI_2, epsilon = 1e-6);
        assert_relative_eq!(recovered.gamma, FRAC_PI_2, epsilon = 1e-6);
        assert_relative_eq!(cell.volume(), 64.0, epsilon = 1e-5);
        assert_inverse_pair(&cell);
    }

    #[test]
    fn constrained_refit_requires_a_character() {
        let mut cell = cubic(5.0);
        assert_eq!(
            cell.apply_niggli_constraints(1e3),
            Err(CellError::Unclassified)
        );
    }

    #[test]
    fn snapshot_round_trips_the_scalar_state() {
        let mut cell = UnitCell::from_parameters(5.2, 7.1, 9.3, 1.3, 1.6, 1.9).unwrap();
        cell.set_z(4);
        cell.set_hkl_tolerance(0.15).unwrap();
        cell.set_space_group(Arc::new(SpaceGroup::new("P 21/c").unwrap()));
        let snapshot = cell.snapshot();
        let restored = UnitCell::from_snapshot(&snapshot).unwrap();
        assert_eq!(restored.z(), 4);
        assert_relative_eq!(restored.hkl_tolerance(), 0.15);
        assert_eq!(restored.space_group().symbol(), "P 21/c");
        let character = restored.character();
        assert_relative_eq!(character.a, 5.2, epsilon = 1e-10);
        assert_relative_eq!(character.gamma, 1.9, epsilon = 1e-10);
    }

    #[test]
    fn equivalence_queries_delegate_to_the_space_group() {
        let mut cell = cubic(4.0);
        assert!(cell.is_equivalent(
            &Vector3::new(1.0, 2.0, 3.0),
            &Vector3::new(1.0, 2.0, 3.0)
        ));
        assert!(!cell.is_equivalent(
            &Vector3::new(1.0, 2.0, 3.0),
            &Vector3::new(-1.0, -2.0, -3.0)
        ));
        cell.set_space_group(Arc::new(SpaceGroup::new("P -1").unwrap()));
        assert!(cell.is_equivalent(
            &Vector3::new(1.0, 2.0, 3.0),
            &Vector3::new(-1.0, -2.0, -3.0)
        ));
    }

    #[test]
    fn ub_construction_round_trips_q_vectors() {
        let cell = UnitCell::from_parameters(5.2, 7.1, 9.3, 1.3, 1.6, 1.9).unwrap();
        let ub = cell.reciprocal_basis().transpose();
        let from_ub = UnitCell::from_ub(&ub, None).unwrap();
        let hkl = Vector3::new(1.0, -2.0, 3.0);
        let q = ub * hkl;
        let recovered = from_ub.index(&q);
        assert_relative_eq!(recovered[0], 1.0, epsilon = 1e-10);
        assert_relative_eq!(recovered[1], -2.0, epsilon = 1e-10);
        assert_relative_eq!(recovered[2], 3.0, epsilon = 1e-10);
    }
}
