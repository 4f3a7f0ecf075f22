use super::SymmetryError;
use nalgebra::{Matrix3, Vector3};
use std::fmt;
use std::ops::Mul;

/// Absolute tolerance used when comparing fractional translations.
pub const TRANSLATION_TOLERANCE: f64 = 1e-9;

/// A single space-group symmetry operation as an affine map.
///
/// The rotation part acts on fractional coordinates (its entries are small
/// integers in the lattice basis); the translation part is always reduced
/// into `[0, 1)`. Operations are immutable once built from a parsed Jones
/// expression or composed from two existing operations.
#[derive(Debug, Clone)]
pub struct SymOp {
    rotation: Matrix3<f64>,
    translation: Vector3<f64>,
}

impl SymOp {
    /// The identity operation `x,y,z`.
    pub fn identity() -> Self {
        Self {
            rotation: Matrix3::identity(),
            translation: Vector3::zeros(),
        }
    }

    /// Builds an operation from an explicit rotation part and translation.
    ///
    /// The translation is reduced into `[0, 1)`.
    pub fn new(rotation: Matrix3<f64>, translation: Vector3<f64>) -> Self {
        Self {
            rotation,
            translation: reduce_translation(translation),
        }
    }

    /// Parses one operation from Jones faithful notation, e.g. `"-x,y+1/2,-z"`.
    ///
    /// Each of the three comma-separated coordinates is a sum of signed linear
    /// terms in `x`, `y`, `z` (integer or fractional coefficients) plus an
    /// optional fractional constant.
    ///
    /// # Errors
    ///
    /// Returns [`SymmetryError::MalformedGenerator`] if a coordinate does not
    /// fit this grammar.
    pub fn parse(jones: &str) -> Result<Self, SymmetryError> {
        let coordinates: Vec<&str> = jones.split(',').collect();
        if coordinates.len() != 3 {
            return Err(SymmetryError::MalformedGenerator {
                expression: jones.to_string(),
                reason: format!("expected 3 coordinates, found {}", coordinates.len()),
            });
        }

        let mut rotation = Matrix3::zeros();
        let mut translation = Vector3::zeros();
        for (row, coordinate) in coordinates.iter().enumerate() {
            let (coeffs, constant) = parse_coordinate(coordinate, jones)?;
            for col in 0..3 {
                rotation[(row, col)] = coeffs[col];
            }
            translation[row] = constant;
        }

        Ok(Self::new(rotation, translation))
    }

    /// The rotation part, expressed in the lattice basis.
    pub fn rotation(&self) -> &Matrix3<f64> {
        &self.rotation
    }

    /// The fractional translation part, reduced into `[0, 1)`.
    pub fn translation(&self) -> &Vector3<f64> {
        &self.translation
    }

    /// Returns the inverse operation.
    ///
    /// # Errors
    ///
    /// Returns [`SymmetryError::SingularRotation`] if the rotation part is not
    /// invertible (cannot happen for well-formed crystallographic operations).
    pub fn inverse(&self) -> Result<Self, SymmetryError> {
        let inv = self
            .rotation
            .try_inverse()
            .ok_or(SymmetryError::SingularRotation)?;
        // The inverse of a unimodular integer matrix is integral; rounding
        // removes the float noise so exact rotation comparison keeps working.
        let inv = inv.map(f64::round);
        Ok(Self::new(inv, -inv * self.translation))
    }

    /// True if this is the identity operation.
    pub fn is_identity(&self) -> bool {
        self == &Self::identity()
    }

    /// Applies the operation to a fractional real-space position.
    pub fn apply(&self, position: &Vector3<f64>) -> Vector3<f64> {
        self.rotation * position + self.translation
    }

    /// Applies the rotation part to a Miller index.
    ///
    /// Reciprocal-lattice points transform by the transposed rotation only;
    /// the translation contributes a phase, not a new index.
    pub fn apply_to_miller(&self, hkl: &Vector3<f64>) -> Vector3<f64> {
        self.rotation.transpose() * hkl
    }

    /// True if a reflection `hkl` is systematically absent under this
    /// operation: the rotation part maps the index onto itself while the
    /// non-primitive translation produces a non-trivial phase.
    pub fn forbids(&self, hkl: &Vector3<f64>) -> bool {
        let mapped = self.apply_to_miller(hkl);
        if (mapped - hkl).amax() > 1e-9 {
            return false;
        }
        let phase = hkl.dot(&self.translation);
        (phase - phase.round()).abs() > 1e-9
    }
}

impl Mul for &SymOp {
    type Output = SymOp;

    /// Composes two operations; the resulting translation is renormalized
    /// into `[0, 1)`.
    fn mul(self, rhs: &SymOp) -> SymOp {
        SymOp::new(
            self.rotation * rhs.rotation,
            self.rotation * rhs.translation + self.translation,
        )
    }
}

impl PartialEq for SymOp {
    /// Rotation parts must match exactly; translations must differ by a
    /// vector of integers within [`TRANSLATION_TOLERANCE`].
    fn eq(&self, other: &Self) -> bool {
        if self.rotation != other.rotation {
            return false;
        }
        let delta = self.translation - other.translation;
        (0..3).all(|i| {
            let d = delta[i];
            (d - d.round()).abs() < TRANSLATION_TOLERANCE
        })
    }
}

impl fmt::Display for SymOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for row in 0..3 {
            if row > 0 {
                write!(f, ",")?;
            }
            let mut wrote = false;
            for (col, var) in ["x", "y", "z"].iter().enumerate() {
                let c = self.rotation[(row, col)];
                if c.abs() < 1e-12 {
                    continue;
                }
                if c < 0.0 {
                    write!(f, "-")?;
                } else if wrote {
                    write!(f, "+")?;
                }
                if (c.abs() - 1.0).abs() > 1e-12 {
                    write!(f, "{}", format_fraction(c.abs()))?;
                }
                write!(f, "{var}")?;
                wrote = true;
            }
            let t = self.translation[row];
            if t.abs() > 1e-12 {
                if wrote {
                    write!(f, "+")?;
                }
                write!(f, "{}", format_fraction(t))?;
            } else if !wrote {
                write!(f, "0")?;
            }
        }
        Ok(())
    }
}

fn reduce_translation(t: Vector3<f64>) -> Vector3<f64> {
    t.map(|v| {
        let r = v.rem_euclid(1.0);
        // rem_euclid can return 1.0 - eps for tiny negative inputs
        if (r - 1.0).abs() < TRANSLATION_TOLERANCE { 0.0 } else { r }
    })
}

fn format_fraction(value: f64) -> String {
    for denominator in 1..=12u32 {
        let numerator = value * f64::from(denominator);
        if (numerator - numerator.round()).abs() < 1e-6 {
            let numerator = numerator.round() as i64;
            return if denominator == 1 {
                format!("{numerator}")
            } else {
                format!("{numerator}/{denominator}")
            };
        }
    }
    format!("{value}")
}

/// Decomposes one coordinate expression into (x, y, z) coefficients and a
/// constant term.
fn parse_coordinate(expr: &str, full: &str) -> Result<([f64; 3], f64), SymmetryError> {
    let malformed = |reason: String| SymmetryError::MalformedGenerator {
        expression: full.to_string(),
        reason,
    };

    let chars: Vec<char> = expr.chars().filter(|c| !c.is_whitespace()).collect();
    if chars.is_empty() {
        return Err(malformed("empty coordinate".to_string()));
    }

    let mut coeffs = [0.0; 3];
    let mut constant = 0.0;
    let mut i = 0;
    while i < chars.len() {
        let mut sign = 1.0;
        while i < chars.len() && (chars[i] == '+' || chars[i] == '-') {
            if chars[i] == '-' {
                sign = -sign;
            }
            i += 1;
        }
        if i == chars.len() {
            return Err(malformed("dangling sign".to_string()));
        }

        // Optional numeric factor, either an integer or a fraction p/q.
        let mut value = None;
        let digits_start = i;
        while i < chars.len() && chars[i].is_ascii_digit() {
            i += 1;
        }
        if i > digits_start {
            let numerator: f64 = chars[digits_start..i]
                .iter()
                .collect::<String>()
                .parse()
                .map_err(|_| malformed("unreadable number".to_string()))?;
            if i < chars.len() && chars[i] == '/' {
                i += 1;
                let den_start = i;
                while i < chars.len() && chars[i].is_ascii_digit() {
                    i += 1;
                }
                if i == den_start {
                    return Err(malformed("fraction is missing a denominator".to_string()));
                }
                let denominator: f64 = chars[den_start..i]
                    .iter()
                    .collect::<String>()
                    .parse()
                    .map_err(|_| malformed("unreadable denominator".to_string()))?;
                if denominator == 0.0 {
                    return Err(malformed("zero denominator".to_string()));
                }
                value = Some(numerator / denominator);
            } else {
                value = Some(numerator);
            }
        }

        // Optional variable; a bare number is a constant term.
        if i < chars.len() && matches!(chars[i].to_ascii_lowercase(), 'x' | 'y' | 'z') {
            let axis = match chars[i].to_ascii_lowercase() {
                'x' => 0,
                'y' => 1,
                _ => 2,
            };
            coeffs[axis] += sign * value.unwrap_or(1.0);
            i += 1;
        } else if let Some(v) = value {
            constant += sign * v;
        } else {
            return Err(malformed(format!("unexpected character '{}'", chars[i])));
        }
    }

    Ok((coeffs, constant))
}
