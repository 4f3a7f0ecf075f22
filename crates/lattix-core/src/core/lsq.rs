//! # Least-Squares Module
//!
//! A dense Levenberg-Marquardt minimizer for small nonlinear least-squares
//! problems.
//!
//! Problems implement [`LeastSquaresProblem`]; a forward-difference Jacobian
//! is provided by default and can be overridden with an analytic one. The
//! damped normal equations are solved by Cholesky factorization, and the
//! returned [`FitReport`] keeps a column-pivoted QR factorization of the
//! final Jacobian so parameter covariances can be recovered without forming
//! the normal matrix from scratch.

use nalgebra::linalg::ColPivQR;
use nalgebra::{Cholesky, DMatrix, DVector, Dyn};
use thiserror::Error;

/// Errors produced while setting up or post-processing a fit.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum LsqError {
    /// Fewer observations than free parameters; the normal matrix is
    /// rank-deficient by construction.
    #[error(
        "Degenerate problem: {observations} observation(s) cannot determine {parameters} parameter(s)"
    )]
    DegenerateProblem {
        observations: usize,
        parameters: usize,
    },

    /// The normal matrix of the final Jacobian is singular, so parameter
    /// covariances are undefined.
    #[error("Normal matrix is singular; covariance is undefined")]
    SingularNormalMatrix,
}

/// A residual vector with an optionally analytic Jacobian.
pub trait LeastSquaresProblem {
    /// Residuals at the given parameter vector.
    fn residuals(&self, params: &DVector<f64>) -> DVector<f64>;

    /// Jacobian of the residuals, `J[(i, j)] = d r_i / d p_j`.
    ///
    /// The default is a forward difference with a step scaled to each
    /// parameter's magnitude.
    fn jacobian(&self, params: &DVector<f64>) -> DMatrix<f64> {
        let base = self.residuals(params);
        let mut jacobian = DMatrix::zeros(base.len(), params.len());
        let mut probe = params.clone();
        for j in 0..params.len() {
            let h = (params[j].abs() * 1e-7).max(1e-9);
            probe[j] = params[j] + h;
            let shifted = self.residuals(&probe);
            probe[j] = params[j];
            jacobian.set_column(j, &((shifted - &base) / h));
        }
        jacobian
    }
}

/// Convergence tolerances and iteration cap for [`LevenbergMarquardt`].
#[derive(Debug, Clone, PartialEq)]
pub struct FitConfig {
    /// Relative step-size threshold on the parameter vector.
    pub xtol: f64,
    /// Relative cost-decrease threshold.
    pub ftol: f64,
    /// Infinity-norm threshold on the cost gradient.
    pub gtol: f64,
    pub max_iterations: usize,
}

impl Default for FitConfig {
    fn default() -> Self {
        Self {
            xtol: 1e-10,
            ftol: 1e-10,
            gtol: 1e-10,
            max_iterations: 100,
        }
    }
}

impl FitConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_xtol(mut self, xtol: f64) -> Self {
        self.xtol = xtol;
        self
    }

    pub fn with_ftol(mut self, ftol: f64) -> Self {
        self.ftol = ftol;
        self
    }

    pub fn with_gtol(mut self, gtol: f64) -> Self {
        self.gtol = gtol;
        self
    }

    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }
}

/// Why the minimizer stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FitStatus {
    /// The accepted step became smaller than `xtol`.
    ConvergedParameters,
    /// The cost decrease became smaller than `ftol`.
    ConvergedResiduals,
    /// The cost gradient vanished below `gtol`.
    ConvergedGradient,
    /// Damping grew without producing an acceptable step.
    Stalled,
    IterationLimit,
}

impl FitStatus {
    /// True for the three proper convergence outcomes.
    pub fn converged(&self) -> bool {
        matches!(
            self,
            Self::ConvergedParameters | Self::ConvergedResiduals | Self::ConvergedGradient
        )
    }
}

/// Outcome of a minimization: final parameters plus enough of the final
/// Jacobian to compute parameter covariances.
pub struct FitReport {
    pub params: DVector<f64>,
    pub status: FitStatus,
    pub iterations: usize,
    cost: f64,
    observations: usize,
    qr: ColPivQR<f64, Dyn, Dyn>,
}

impl FitReport {
    /// Final sum of squared residuals.
    pub fn cost(&self) -> f64 {
        self.cost
    }

    /// Root-mean-square residual per degree of freedom.
    pub fn residual_rms(&self) -> f64 {
        let dof = (self.observations - self.params.len()).max(1);
        (self.cost / dof as f64).sqrt()
    }

    /// Covariance of the fitted parameters, scaled by the reduced chi-square.
    ///
    /// With the column-pivoted factorization `J P = Q R`, the normal matrix
    /// is `JᵀJ = (P Rᵀ)(R Pᵀ)`, which is inverted by Cholesky and scaled by
    /// the mean squared residual.
    ///
    /// # Errors
    ///
    /// [`LsqError::SingularNormalMatrix`] when the final Jacobian is
    /// rank-deficient.
    pub fn covariance(&self) -> Result<DMatrix<f64>, LsqError> {
        let p = self.params.len();
        let mut rt: DMatrix<f64> = self.qr.r().transpose();
        self.qr.p().inv_permute_rows(&mut rt);
        let normal = &rt * rt.transpose();
        let inverse = Cholesky::new(normal)
            .ok_or(LsqError::SingularNormalMatrix)?
            .inverse();
        let dof = (self.observations - p) as f64;
        let mse = if dof > 0.0 { self.cost / dof } else { 0.0 };
        Ok(inverse * mse)
    }
}

/// Levenberg-Marquardt driver over the damped normal equations.
#[derive(Debug, Clone, Default)]
pub struct LevenbergMarquardt {
    config: FitConfig,
}

const LAMBDA_INITIAL: f64 = 1e-3;
const LAMBDA_LIMIT: f64 = 1e12;

impl LevenbergMarquardt {
    pub fn new(config: FitConfig) -> Self {
        Self { config }
    }

    /// Minimizes the problem starting from `initial`.
    ///
    /// # Errors
    ///
    /// [`LsqError::DegenerateProblem`] when the problem has no more
    /// observations than parameters.
    pub fn minimize<P: LeastSquaresProblem>(
        &self,
        problem: &P,
        initial: DVector<f64>,
    ) -> Result<FitReport, LsqError> {
        let mut params = initial;
        let mut residuals = problem.residuals(&params);
        let observations = residuals.len();
        if observations <= params.len() {
            return Err(LsqError::DegenerateProblem {
                observations,
                parameters: params.len(),
            });
        }

        let mut cost = residuals.norm_squared();
        let mut lambda = LAMBDA_INITIAL;
        let mut status = FitStatus::IterationLimit;
        let mut iterations = 0;

        for iteration in 1..=self.config.max_iterations {
            iterations = iteration;
            let jacobian = problem.jacobian(&params);
            let gradient = jacobian.transpose() * &residuals;
            if gradient.amax() < self.config.gtol {
                status = FitStatus::ConvergedGradient;
                break;
            }

            let normal = jacobian.transpose() * &jacobian;
            let mut accepted = false;
            while lambda < LAMBDA_LIMIT {
                let mut damped = normal.clone();
                for d in 0..damped.nrows() {
                    damped[(d, d)] += lambda * normal[(d, d)].max(f64::MIN_POSITIVE);
                }
                let step = match Cholesky::new(damped) {
                    Some(factor) => factor.solve(&(-&gradient)),
                    None => {
                        lambda *= 10.0;
                        continue;
                    }
                };

                let candidate = &params + &step;
                let candidate_residuals = problem.residuals(&candidate);
                let candidate_cost = candidate_residuals.norm_squared();
                if candidate_cost < cost {
                    let decrease = cost - candidate_cost;
                    let small_step = step.norm() < self.config.xtol * (params.norm() + self.config.xtol);
                    let small_decrease = decrease <= self.config.ftol * cost;
                    params = candidate;
                    residuals = candidate_residuals;
                    cost = candidate_cost;
                    lambda = (lambda * 0.5).max(f64::MIN_POSITIVE);
                    accepted = true;
                    if small_step {
                        status = FitStatus::ConvergedParameters;
                    } else if small_decrease {
                        status = FitStatus::ConvergedResiduals;
                    }
                    break;
                }
                lambda *= 10.0;
            }

            if !accepted {
                status = FitStatus::Stalled;
                break;
            }
            if status.converged() {
                break;
            }
        }

        let qr = problem.jacobian(&params).col_piv_qr();
        Ok(FitReport {
            params,
            status,
            iterations,
            cost,
            observations,
            qr,
        })
    }
}
