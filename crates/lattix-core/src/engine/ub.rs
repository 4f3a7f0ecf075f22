//! Refinement of the UB orientation matrix and instrument offsets.
//!
//! The free-parameter vector is laid out as the nine UB entries (row-major),
//! the wavelength offset, one offset per sample-goniometer axis, then one
//! per detector-goniometer axis. Any parameter may be pinned at its seed
//! value; pinned parameters are excluded from the search and report a sigma
//! of exactly zero.

use nalgebra::{DMatrix, DVector, Matrix3, SMatrix, Vector3};
use tracing::{debug, instrument};

use crate::core::lsq::{
    FitConfig, FitStatus, LeastSquaresProblem, LevenbergMarquardt,
};

use super::error::EngineError;

/// Physical interpretation of a goniometer-axis offset, for unit-correct
/// reporting (angular vs. length units).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AxisKind {
    Rotation,
    Translation,
}

/// A named goniometer axis whose zero-position offset is refined.
#[derive(Debug, Clone, PartialEq)]
pub struct GonioAxis {
    pub name: String,
    pub kind: AxisKind,
}

impl GonioAxis {
    pub fn new(name: impl Into<String>, kind: AxisKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }
}

/// The trial instrument offsets handed to an observation when it
/// reconstructs its scattering vector.
#[derive(Debug, Clone, Copy)]
pub struct OffsetState<'a> {
    pub wavelength_offset: f64,
    pub sample_offsets: &'a [f64],
    pub detector_offsets: &'a [f64],
}

/// One indexed peak observation.
///
/// The instrument model lives behind this trait: an implementation
/// reconstructs its scattering vector under trial offsets, so offset
/// refinement composes with any detector/goniometer geometry without this
/// module knowing its details.
pub trait PeakObservation {
    /// The (near-integer) Miller index assigned to the peak.
    fn hkl(&self) -> Vector3<f64>;

    /// The scattering vector under the given trial offsets.
    fn q(&self, offsets: &OffsetState<'_>) -> Vector3<f64>;
}

/// An observation with a fixed, offset-independent scattering vector.
#[derive(Debug, Clone, PartialEq)]
pub struct QObservation {
    pub hkl: Vector3<f64>,
    pub q: Vector3<f64>,
}

impl QObservation {
    pub fn new(hkl: Vector3<f64>, q: Vector3<f64>) -> Self {
        Self { hkl, q }
    }
}

impl PeakObservation for QObservation {
    fn hkl(&self) -> Vector3<f64> {
        self.hkl
    }

    fn q(&self, _offsets: &OffsetState<'_>) -> Vector3<f64> {
        self.q
    }
}

const UB_PARAMS: usize = 9;
const WAVELENGTH_INDEX: usize = 9;

/// Least-squares refinement of UB plus instrument offsets.
///
/// Configure the goniometer axes and the fixed-parameter set, then call
/// [`Self::solve`] with the observations and a starting UB.
#[derive(Debug, Clone, Default)]
pub struct UBMinimizer {
    sample_axes: Vec<GonioAxis>,
    detector_axes: Vec<GonioAxis>,
    fixed: Vec<usize>,
    config: FitConfig,
}

impl UBMinimizer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(mut self, config: FitConfig) -> Self {
        self.config = config;
        self
    }

    pub fn add_sample_axis(&mut self, axis: GonioAxis) {
        self.sample_axes.push(axis);
    }

    pub fn add_detector_axis(&mut self, axis: GonioAxis) {
        self.detector_axes.push(axis);
    }

    /// Total parameter count: 9 UB entries, the wavelength offset, and one
    /// offset per configured axis.
    pub fn parameter_count(&self) -> usize {
        UB_PARAMS + 1 + self.sample_axes.len() + self.detector_axes.len()
    }

    /// Pins one UB entry at its seed value.
    pub fn fix_ub_entry(&mut self, row: usize, col: usize) {
        self.mark_fixed(3 * row + col);
    }

    /// Pins the whole UB matrix, refining offsets only.
    pub fn fix_ub(&mut self) {
        for index in 0..UB_PARAMS {
            self.mark_fixed(index);
        }
    }

    pub fn fix_wavelength_offset(&mut self) {
        self.mark_fixed(WAVELENGTH_INDEX);
    }

    /// Pins the offset of sample axis `index`.
    ///
    /// # Errors
    ///
    /// [`EngineError::InvalidAxisIndex`] when no such axis is configured.
    pub fn fix_sample_axis(&mut self, index: usize) -> Result<(), EngineError> {
        if index >= self.sample_axes.len() {
            return Err(EngineError::InvalidAxisIndex {
                index,
                count: self.sample_axes.len(),
            });
        }
        self.mark_fixed(WAVELENGTH_INDEX + 1 + index);
        Ok(())
    }

    /// Pins the offset of detector axis `index`.
    ///
    /// # Errors
    ///
    /// [`EngineError::InvalidAxisIndex`] when no such axis is configured.
    pub fn fix_detector_axis(&mut self, index: usize) -> Result<(), EngineError> {
        if index >= self.detector_axes.len() {
            return Err(EngineError::InvalidAxisIndex {
                index,
                count: self.detector_axes.len(),
            });
        }
        self.mark_fixed(WAVELENGTH_INDEX + 1 + self.sample_axes.len() + index);
        Ok(())
    }

    fn mark_fixed(&mut self, index: usize) {
        if !self.fixed.contains(&index) {
            self.fixed.push(index);
        }
    }

    /// Runs the refinement: seeds the parameter vector from `initial_ub`
    /// and zero offsets, minimizes the per-peak residuals `UB·hkl − q`, and
    /// derives the full parameter covariance.
    ///
    /// # Errors
    ///
    /// [`EngineError::NotConverged`] when the minimizer stalls or exhausts
    /// its iteration bound, and [`EngineError::Fit`] for degenerate or
    /// singular problems.
    #[instrument(skip_all, fields(n_obs = observations.len(), n_params = self.parameter_count()))]
    pub fn solve<O: PeakObservation>(
        &self,
        observations: &[O],
        initial_ub: &Matrix3<f64>,
    ) -> Result<UBSolution, EngineError> {
        let n_params = self.parameter_count();
        let mut seed = DVector::zeros(n_params);
        for i in 0..3 {
            for j in 0..3 {
                seed[3 * i + j] = initial_ub[(i, j)];
            }
        }

        let free: Vec<usize> = (0..n_params)
            .filter(|index| !self.fixed.contains(index))
            .collect();

        if free.is_empty() {
            // Nothing to refine: the seed is the solution and every sigma
            // is pinned to zero.
            return Ok(self.pack_solution(
                &seed,
                &DMatrix::zeros(n_params, n_params),
                FitStatus::ConvergedGradient,
                0.0,
            ));
        }

        let problem = UBFitProblem {
            observations,
            seed: &seed,
            free: &free,
            n_sample: self.sample_axes.len(),
        };
        let initial = DVector::from_iterator(free.len(), free.iter().map(|&index| seed[index]));
        let report = LevenbergMarquardt::new(self.config.clone()).minimize(&problem, initial)?;
        debug!(
            status = ?report.status,
            iterations = report.iterations,
            rms = report.residual_rms(),
            "UB refinement finished"
        );
        if !report.status.converged() {
            return Err(EngineError::NotConverged {
                status: report.status,
            });
        }

        let reduced = report.covariance()?;
        let mut covariance = DMatrix::zeros(n_params, n_params);
        for (si, &i) in free.iter().enumerate() {
            for (sj, &j) in free.iter().enumerate() {
                covariance[(i, j)] = reduced[(si, sj)];
            }
        }

        let mut full = seed;
        for (slot, &index) in free.iter().enumerate() {
            full[index] = report.params[slot];
        }
        Ok(self.pack_solution(&full, &covariance, report.status, report.residual_rms()))
    }

    fn pack_solution(
        &self,
        params: &DVector<f64>,
        covariance: &DMatrix<f64>,
        status: FitStatus,
        residual_rms: f64,
    ) -> UBSolution {
        let sigma = |index: usize| covariance[(index, index)].max(0.0).sqrt();
        let mut ub = Matrix3::zeros();
        let mut cov_ub = SMatrix::<f64, 9, 9>::zeros();
        for i in 0..UB_PARAMS {
            ub[(i / 3, i % 3)] = params[i];
            for j in 0..UB_PARAMS {
                cov_ub[(i, j)] = covariance[(i, j)];
            }
        }

        let n_sample = self.sample_axes.len();
        let sample_base = WAVELENGTH_INDEX + 1;
        let detector_base = sample_base + n_sample;
        UBSolution {
            ub,
            cov_ub,
            wavelength_offset: params[WAVELENGTH_INDEX],
            sigma_wavelength_offset: sigma(WAVELENGTH_INDEX),
            sample_offsets: (0..n_sample).map(|i| params[sample_base + i]).collect(),
            sigma_sample_offsets: (0..n_sample).map(|i| sigma(sample_base + i)).collect(),
            detector_offsets: (0..self.detector_axes.len())
                .map(|i| params[detector_base + i])
                .collect(),
            sigma_detector_offsets: (0..self.detector_axes.len())
                .map(|i| sigma(detector_base + i))
                .collect(),
            sample_axes: self.sample_axes.clone(),
            detector_axes: self.detector_axes.clone(),
            fixed: (0..self.parameter_count())
                .map(|index| self.fixed.contains(&index))
                .collect(),
            status,
            residual_rms,
        }
    }
}

struct UBFitProblem<'a, O: PeakObservation> {
    observations: &'a [O],
    seed: &'a DVector<f64>,
    free: &'a [usize],
    n_sample: usize,
}

impl<O: PeakObservation> LeastSquaresProblem for UBFitProblem<'_, O> {
    fn residuals(&self, params: &DVector<f64>) -> DVector<f64> {
        let mut full = self.seed.clone();
        for (slot, &index) in self.free.iter().enumerate() {
            full[index] = params[slot];
        }
        let ub = Matrix3::new(
            full[0], full[1], full[2], full[3], full[4], full[5], full[6], full[7], full[8],
        );
        let slice = full.as_slice();
        let offsets = OffsetState {
            wavelength_offset: full[WAVELENGTH_INDEX],
            sample_offsets: &slice[WAVELENGTH_INDEX + 1..WAVELENGTH_INDEX + 1 + self.n_sample],
            detector_offsets: &slice[WAVELENGTH_INDEX + 1 + self.n_sample..],
        };

        let mut residuals = DVector::zeros(3 * self.observations.len());
        for (i, observation) in self.observations.iter().enumerate() {
            let delta = ub * observation.hkl() - observation.q(&offsets);
            residuals[3 * i] = delta[0];
            residuals[3 * i + 1] = delta[1];
            residuals[3 * i + 2] = delta[2];
        }
        residuals
    }
}

/// Immutable result of a UB refinement.
///
/// Records which physical axis each offset belongs to so sigmas can be
/// reported in the correct units, and the fixed-parameter mask in the same
/// layout as the parameter vector.
#[derive(Debug, Clone, PartialEq)]
pub struct UBSolution {
    ub: Matrix3<f64>,
    cov_ub: SMatrix<f64, 9, 9>,
    wavelength_offset: f64,
    sigma_wavelength_offset: f64,
    sample_offsets: Vec<f64>,
    sigma_sample_offsets: Vec<f64>,
    detector_offsets: Vec<f64>,
    sigma_detector_offsets: Vec<f64>,
    sample_axes: Vec<GonioAxis>,
    detector_axes: Vec<GonioAxis>,
    fixed: Vec<bool>,
    status: FitStatus,
    residual_rms: f64,
}

impl UBSolution {
    pub fn ub(&self) -> &Matrix3<f64> {
        &self.ub
    }

    /// 9x9 covariance of the UB entries (row-major component order).
    pub fn ub_covariance(&self) -> &SMatrix<f64, 9, 9> {
        &self.cov_ub
    }

    pub fn wavelength_offset(&self) -> f64 {
        self.wavelength_offset
    }

    pub fn sigma_wavelength_offset(&self) -> f64 {
        self.sigma_wavelength_offset
    }

    pub fn sample_offsets(&self) -> &[f64] {
        &self.sample_offsets
    }

    pub fn sigma_sample_offsets(&self) -> &[f64] {
        &self.sigma_sample_offsets
    }

    pub fn detector_offsets(&self) -> &[f64] {
        &self.detector_offsets
    }

    pub fn sigma_detector_offsets(&self) -> &[f64] {
        &self.sigma_detector_offsets
    }

    pub fn sample_axes(&self) -> &[GonioAxis] {
        &self.sample_axes
    }

    pub fn detector_axes(&self) -> &[GonioAxis] {
        &self.detector_axes
    }

    /// Fixed-parameter mask in parameter-vector order.
    pub fn fixed_mask(&self) -> &[bool] {
        &self.fixed
    }

    pub fn status(&self) -> FitStatus {
        self.status
    }

    pub fn residual_rms(&self) -> f64 {
        self.residual_rms
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::Rotation3;

    fn reference_ub() -> Matrix3<f64> {
        // UB of a slightly skewed cell in a general orientation.
        Matrix3::new(0.21, 0.015, -0.007, -0.012, 0.18, 0.021, 0.005, -0.018, 0.16)
    }

    fn test_hkls() -> Vec<Vector3<f64>> {
        vec![
            Vector3::new(1.0, 0.0, 0.0),
            Vector3::new(0.0, 1.0, 0.0),
            Vector3::new(0.0, 0.0, 1.0),
            Vector3::new(1.0, 1.0, 0.0),
            Vector3::new(1.0, -1.0, 2.0),
            Vector3::new(2.0, 1.0, -1.0),
            Vector3::new(0.0, 2.0, 1.0),
            Vector3::new(-1.0, 1.0, 1.0),
        ]
    }

    fn exact_observations(ub: &Matrix3<f64>) -> Vec<QObservation> {
        test_hkls()
            .into_iter()
            .map(|hkl| QObservation::new(hkl, ub * hkl))
            .collect()
    }

    #[test]
    fn noiseless_fit_recovers_the_ub_matrix() {
        let ub_true = reference_ub();
        let observations = exact_observations(&ub_true);
        let mut minimizer = UBMinimizer::new();
        minimizer.fix_wavelength_offset();

        let seed = ub_true + Matrix3::from_element(0.01);
        let solution = minimizer.solve(&observations, &seed).unwrap();
        assert!(solution.status().converged());
        for i in 0..3 {
            for j in 0..3 {
                assert_relative_eq!(solution.ub()[(i, j)], ub_true[(i, j)], epsilon = 1e-8);
            }
        }
        assert!(solution.residual_rms() < 1e-8);
        // The pinned wavelength offset reports a sigma of exactly zero.
        assert_eq!(solution.wavelength_offset(), 0.0);
        assert_eq!(solution.sigma_wavelength_offset(), 0.0);
    }

    /// Observation whose q reconstruction scales with the wavelength offset.
    struct ScaledQ {
        hkl: Vector3<f64>,
        q: Vector3<f64>,
    }

    impl PeakObservation for ScaledQ {
        fn hkl(&self) -> Vector3<f64> {
            self.hkl
        }

        fn q(&self, offsets: &OffsetState<'_>) -> Vector3<f64> {
            self.q * (1.0 + offsets.wavelength_offset)
        }
    }

    #[test]
    fn wavelength_offset_is_recovered_with_ub_pinned() {
        let ub_true = reference_ub();
        let offset_true = 0.02;
        let observations: Vec<ScaledQ> = test_hkls()
            .into_iter()
            .map(|hkl| ScaledQ {
                hkl,
                q: ub_true * hkl / (1.0 + offset_true),
            })
            .collect();

        let mut minimizer = UBMinimizer::new();
        minimizer.fix_ub();
        let solution = minimizer.solve(&observations, &ub_true).unwrap();
        assert_relative_eq!(solution.wavelength_offset(), offset_true, epsilon = 1e-8);
        // Every pinned UB entry keeps its seed and a zero sigma.
        for i in 0..3 {
            for j in 0..3 {
                assert_eq!(solution.ub()[(i, j)], ub_true[(i, j)]);
                assert_eq!(solution.ub_covariance()[(3 * i + j, 3 * i + j)], 0.0);
            }
        }
    }

    /// Observation rotated about z by the first sample-axis offset.
    struct RotatedQ {
        hkl: Vector3<f64>,
        q: Vector3<f64>,
    }

    impl PeakObservation for RotatedQ {
        fn hkl(&self) -> Vector3<f64> {
            self.hkl
        }

        fn q(&self, offsets: &OffsetState<'_>) -> Vector3<f64> {
            Rotation3::from_axis_angle(&Vector3::z_axis(), offsets.sample_offsets[0]) * self.q
        }
    }

    #[test]
    fn sample_axis_offset_is_recovered_and_labelled() {
        let ub_true = reference_ub();
        let delta_true = 0.05;
        let undo = Rotation3::from_axis_angle(&Vector3::z_axis(), -delta_true);
        let observations: Vec<RotatedQ> = test_hkls()
            .into_iter()
            .map(|hkl| RotatedQ {
                hkl,
                q: undo * (ub_true * hkl),
            })
            .collect();

        let mut minimizer = UBMinimizer::new();
        minimizer.add_sample_axis(GonioAxis::new("omega", AxisKind::Rotation));
        minimizer.fix_ub();
        minimizer.fix_wavelength_offset();
        let solution = minimizer.solve(&observations, &ub_true).unwrap();
        assert_relative_eq!(solution.sample_offsets()[0], delta_true, epsilon = 1e-8);
        assert_eq!(solution.sample_axes()[0].name, "omega");
        assert_eq!(solution.sample_axes()[0].kind, AxisKind::Rotation);
        assert!(!solution.fixed_mask()[10]);
    }

    #[test]
    fn fixed_sample_axis_is_never_perturbed() {
        let ub_true = reference_ub();
        let observations: Vec<RotatedQ> = test_hkls()
            .into_iter()
            .map(|hkl| RotatedQ {
                hkl,
                q: ub_true * hkl,
            })
            .collect();

        let mut minimizer = UBMinimizer::new();
        minimizer.add_sample_axis(GonioAxis::new("omega", AxisKind::Rotation));
        minimizer.fix_sample_axis(0).unwrap();
        minimizer.fix_wavelength_offset();
        let seed = ub_true + Matrix3::from_element(0.005);
        let solution = minimizer.solve(&observations, &seed).unwrap();
        assert_eq!(solution.sample_offsets()[0], 0.0);
        assert_eq!(solution.sigma_sample_offsets()[0], 0.0);
        assert!(solution.fixed_mask()[10]);
        for i in 0..3 {
            for j in 0..3 {
                assert_relative_eq!(solution.ub()[(i, j)], ub_true[(i, j)], epsilon = 1e-8);
            }
        }
    }

    /// Observation shifted along z by the first detector-axis offset.
    struct ShiftedQ {
        hkl: Vector3<f64>,
        q: Vector3<f64>,
    }

    impl PeakObservation for ShiftedQ {
        fn hkl(&self) -> Vector3<f64> {
            self.hkl
        }

        fn q(&self, offsets: &OffsetState<'_>) -> Vector3<f64> {
            self.q + Vector3::new(0.0, 0.0, offsets.detector_offsets[0])
        }
    }

    #[test]
    fn detector_offsets_follow_the_sample_block() {
        let ub_true = reference_ub();
        let shift_true = 0.3;
        let observations: Vec<ShiftedQ> = test_hkls()
            .into_iter()
            .map(|hkl| ShiftedQ {
                hkl,
                q: ub_true * hkl - Vector3::new(0.0, 0.0, shift_true),
            })
            .collect();

        let mut minimizer = UBMinimizer::new();
        minimizer.add_sample_axis(GonioAxis::new("omega", AxisKind::Rotation));
        minimizer.add_sample_axis(GonioAxis::new("chi", AxisKind::Rotation));
        minimizer.add_detector_axis(GonioAxis::new("height", AxisKind::Translation));
        minimizer.fix_ub();
        minimizer.fix_wavelength_offset();
        minimizer.fix_sample_axis(0).unwrap();
        minimizer.fix_sample_axis(1).unwrap();
        let solution = minimizer.solve(&observations, &ub_true).unwrap();
        assert_relative_eq!(solution.detector_offsets()[0], shift_true, epsilon = 1e-8);
        assert_eq!(solution.detector_axes()[0].kind, AxisKind::Translation);
        assert_eq!(solution.sigma_sample_offsets(), &[0.0, 0.0]);
    }

    #[test]
    fn fixing_a_missing_axis_is_an_error() {
        let mut minimizer = UBMinimizer::new();
        assert_eq!(
            minimizer.fix_sample_axis(0),
            Err(EngineError::InvalidAxisIndex { index: 0, count: 0 })
        );
        minimizer.add_detector_axis(GonioAxis::new("gamma", AxisKind::Rotation));
        assert!(minimizer.fix_detector_axis(0).is_ok());
        assert_eq!(
            minimizer.fix_detector_axis(1),
            Err(EngineError::InvalidAxisIndex { index: 1, count: 1 })
        );
    }

    #[test]
    fn too_few_observations_are_a_degenerate_problem() {
        let ub_true = reference_ub();
        let observations: Vec<QObservation> = exact_observations(&ub_true)
            .into_iter()
            .take(3)
            .collect();
        let mut minimizer = UBMinimizer::new();
        minimizer.fix_wavelength_offset();
        let result = minimizer.solve(&observations, &ub_true);
        assert!(matches!(
            result,
            Err(EngineError::Fit(
                crate::core::lsq::LsqError::DegenerateProblem { .. }
            ))
        ));
    }

    #[test]
    fn all_parameters_fixed_returns_the_seed_unchanged() {
        let ub_true = reference_ub();
        let observations = exact_observations(&ub_true);
        let mut minimizer = UBMinimizer::new();
        minimizer.fix_ub();
        minimizer.fix_wavelength_offset();
        let solution = minimizer.solve(&observations, &ub_true).unwrap();
        assert_eq!(solution.ub(), &ub_true);
        assert!(solution.fixed_mask().iter().all(|&fixed| fixed));
        assert_eq!(solution.residual_rms(), 0.0);
    }
}
