//! Krivy-Gruber reduction of a lattice metric to its Niggli form.
//!
//! The algorithm operates on the six scalars `A = g11`, `B = g22`, `C = g33`,
//! `xi = 2 g23`, `eta = 2 g13`, `zeta = 2 g12` of the metric tensor and
//! repeatedly applies unimodular basis changes until the main conditions of
//! the Niggli cell hold. The implementation follows Krivy & Gruber (1976)
//! with the epsilon-based comparisons and the sign-normalization parity fix
//! of Grosse-Kunstleve, Sauter & Adams (2004).

use super::ReductionError;
use nalgebra::Matrix3;

/// Hard cap on reduction steps. The algorithm provably terminates for
/// positive-definite metrics; hitting this bound means the tolerance is
/// inconsistent with the data.
const MAX_ITERATIONS: usize = 100;

/// Reduces `metric` to its Niggli form.
///
/// Returns the reduced metric `g'` together with the accumulated unimodular
/// transform `p` such that `g' = pᵀ g p`; column `j` of `p` expresses the
/// `j`-th reduced basis vector in the original basis. `tolerance` is
/// relative; it is scaled by the mean diagonal of the current metric before
/// every comparison.
///
/// # Errors
///
/// [`ReductionError::SingularMetric`] for a metric that is not positive
/// definite, and [`ReductionError::NonConvergent`] if the loop does not
/// reach a fixed point within the iteration cap.
pub fn niggli_reduce(
    metric: &Matrix3<f64>,
    tolerance: f64,
) -> Result<(Matrix3<f64>, Matrix3<f64>), ReductionError> {
    let mut g = (metric + metric.transpose()) * 0.5;
    if nalgebra::Cholesky::new(g).is_none() {
        return Err(ReductionError::SingularMetric);
    }
    let mut p = Matrix3::identity();

    for _ in 0..MAX_ITERATIONS {
        let a = g[(0, 0)];
        let b = g[(1, 1)];
        let c = g[(2, 2)];
        let xi = 2.0 * g[(1, 2)];
        let eta = 2.0 * g[(0, 2)];
        let zeta = 2.0 * g[(0, 1)];
        let eps = tolerance * (a + b + c) / 3.0;

        // Step 1: order the first two diagonal entries.
        if a > b + eps || ((a - b).abs() <= eps && xi.abs() > eta.abs() + eps) {
            apply(&mut g, &mut p, &swap_ab());
            continue;
        }

        // Step 2: order the last two diagonal entries.
        if b > c + eps || ((b - c).abs() <= eps && eta.abs() > zeta.abs() + eps) {
            apply(&mut g, &mut p, &swap_bc());
            continue;
        }

        // Steps 3/4: normalize the signs of the off-diagonal scalars to all
        // positive (type I) or all non-positive (type II).
        if let Some(m) = sign_normalization(xi, eta, zeta, eps) {
            apply(&mut g, &mut p, &m);
            continue;
        }

        // Step 5: reduce xi against b.
        if xi.abs() > b + eps
            || ((xi - b).abs() <= eps && 2.0 * eta < zeta - eps)
            || ((xi + b).abs() <= eps && zeta < -eps)
        {
            let s = if xi > 0.0 { 1.0 } else { -1.0 };
            apply(&mut g, &mut p, &shear(1, 2, -s));
            continue;
        }

        // Step 6: reduce eta against a.
        if eta.abs() > a + eps
            || ((eta - a).abs() <= eps && 2.0 * xi < zeta - eps)
            || ((eta + a).abs() <= eps && zeta < -eps)
        {
            let s = if eta > 0.0 { 1.0 } else { -1.0 };
            apply(&mut g, &mut p, &shear(0, 2, -s));
            continue;
        }

        // Step 7: reduce zeta against a.
        if zeta.abs() > a + eps
            || ((zeta - a).abs() <= eps && 2.0 * xi < eta - eps)
            || ((zeta + a).abs() <= eps && eta < -eps)
        {
            let s = if zeta > 0.0 { 1.0 } else { -1.0 };
            apply(&mut g, &mut p, &shear(0, 1, -s));
            continue;
        }

        // Step 8: final body-diagonal condition.
        let total = a + b + xi + eta + zeta;
        if total < -eps || (total.abs() <= eps && 2.0 * (a + eta) + zeta > eps) {
            apply(&mut g, &mut p, &final_shear());
            continue;
        }

        return Ok((g, p));
    }

    Err(ReductionError::NonConvergent {
        iterations: MAX_ITERATIONS,
    })
}

fn apply(g: &mut Matrix3<f64>, p: &mut Matrix3<f64>, m: &Matrix3<f64>) {
    let updated = m.transpose() * *g * *m;
    // Symmetrize to keep floating-point drift out of the off-diagonal reads.
    *g = (updated + updated.transpose()) * 0.5;
    *p *= m;
}

/// Exchanges the first two basis vectors (with a handedness-preserving sign).
fn swap_ab() -> Matrix3<f64> {
    Matrix3::new(0.0, -1.0, 0.0, -1.0, 0.0, 0.0, 0.0, 0.0, -1.0)
}

/// Exchanges the last two basis vectors (with a handedness-preserving sign).
fn swap_bc() -> Matrix3<f64> {
    Matrix3::new(-1.0, 0.0, 0.0, 0.0, 0.0, -1.0, 0.0, -1.0, 0.0)
}

/// Adds `s` times basis vector `from` to basis vector `to`.
fn shear(from: usize, to: usize, s: f64) -> Matrix3<f64> {
    let mut m = Matrix3::identity();
    m[(from, to)] = s;
    m
}

fn final_shear() -> Matrix3<f64> {
    Matrix3::new(1.0, 0.0, 1.0, 0.0, 1.0, 1.0, 0.0, 0.0, 1.0)
}

/// Steps 3 and 4 of Krivy-Gruber: chooses a diagonal sign matrix with
/// determinant +1 that makes the off-diagonal scalars all positive when
/// their product is positive, and all non-positive otherwise.
///
/// Returns `None` when the signs already conform (the caller must not loop
/// on an identity transform). Entries within `eps` of zero count as zero;
/// when an odd number of flips is needed, the surplus sign lands on a zero
/// entry, following Grosse-Kunstleve, Sauter & Adams (2004).
fn sign_normalization(xi: f64, eta: f64, zeta: f64, eps: f64) -> Option<Matrix3<f64>> {
    let mark = |v: f64| {
        if v > eps {
            1i32
        } else if v < -eps {
            -1
        } else {
            0
        }
    };
    let marks = [mark(xi), mark(eta), mark(zeta)];

    let mut signs = if marks[0] * marks[1] * marks[2] == 1 {
        // Make all three positive; an even number of entries is negative.
        [
            if marks[0] == -1 { -1.0 } else { 1.0 },
            if marks[1] == -1 { -1.0 } else { 1.0 },
            if marks[2] == -1 { -1.0 } else { 1.0 },
        ]
    } else {
        // Make all three non-positive.
        [
            if marks[0] == 1 { -1.0 } else { 1.0 },
            if marks[1] == 1 { -1.0 } else { 1.0 },
            if marks[2] == 1 { -1.0 } else { 1.0 },
        ]
    };

    if signs[0] * signs[1] * signs[2] < 0.0 {
        // Odd flip count; park the compensating sign on a zero entry.
        for (slot, &m) in marks.iter().enumerate() {
            if m == 0 && signs[slot] > 0.0 {
                signs[slot] = -1.0;
                break;
            }
        }
    }

    if signs == [1.0, 1.0, 1.0] {
        return None;
    }
    Some(Matrix3::from_diagonal(&nalgebra::Vector3::new(
        signs[0], signs[1], signs[2],
    )))
}
