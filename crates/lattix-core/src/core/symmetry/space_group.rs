use super::symbols;
use super::symop::SymOp;
use super::SymmetryError;
use nalgebra::Vector3;

/// Defensive cap on the number of generated elements.
///
/// The largest groups in the symbol table have 192 general positions
/// (F-centred cubic); anything beyond this bound signals corrupt generator
/// data, not a legitimate group.
const MAX_GROUP_ELEMENTS: usize = 200;

/// Tolerance used when comparing (possibly fractional) Miller indices.
const HKL_EQUALITY_TOLERANCE: f64 = 1e-6;

/// A crystallographic space group: a symbol, its minimal generator string,
/// and the full finite set of symmetry operations expanded by closure.
///
/// A space group is a value-like immutable object; once constructed it is
/// safe for unsynchronized concurrent reads.
#[derive(Debug, Clone, PartialEq)]
pub struct SpaceGroup {
    symbol: String,
    generator_string: String,
    elements: Vec<SymOp>,
}

impl SpaceGroup {
    /// Builds the space group for a Hermann-Mauguin symbol.
    ///
    /// The symbol is resolved against the static table (short symbols with
    /// stripped "1" separators are accepted, see [`symbols::lookup`]), its
    /// generator string parsed, and the group closed over products.
    ///
    /// # Errors
    ///
    /// [`SymmetryError::UnknownSymbol`] for symbols missing from the table,
    /// [`SymmetryError::MalformedGenerator`] for unparsable generator data,
    /// and [`SymmetryError::ClosureOverflow`] if closure exceeds the
    /// defensive element cap.
    pub fn new(symbol: &str) -> Result<Self, SymmetryError> {
        let (canonical, generators) =
            symbols::lookup(symbol).ok_or_else(|| SymmetryError::UnknownSymbol {
                symbol: symbol.to_string(),
            })?;
        Self::from_generator_string(canonical, generators)
    }

    /// The trivial group `P 1`, used as the default for freshly indexed cells.
    pub fn p1() -> Self {
        Self {
            symbol: "P 1".to_string(),
            generator_string: "x,y,z".to_string(),
            elements: vec![SymOp::identity()],
        }
    }

    /// Builds a group directly from a semicolon-separated generator string.
    pub(crate) fn from_generator_string(
        symbol: &str,
        generators: &str,
    ) -> Result<Self, SymmetryError> {
        let mut generator_ops = Vec::new();
        for expression in generators.split(';') {
            let expression = expression.trim();
            if expression.is_empty() {
                continue;
            }
            let op = SymOp::parse(expression)?;
            let inverse = op.inverse()?;
            if !generator_ops.contains(&op) {
                generator_ops.push(op);
            }
            if !generator_ops.contains(&inverse) {
                generator_ops.push(inverse);
            }
        }

        let elements = Self::close(symbol, &generator_ops)?;
        Ok(Self {
            symbol: symbol.to_string(),
            generator_string: generators.to_string(),
            elements,
        })
    }

    /// Expands the generator set into the full group by repeated products.
    ///
    /// Terminates because the true group is finite; the element cap converts
    /// a non-terminating closure (corrupt table entry, bad tolerance) into a
    /// typed error instead of an infinite loop.
    fn close(symbol: &str, generators: &[SymOp]) -> Result<Vec<SymOp>, SymmetryError> {
        let mut elements = vec![SymOp::identity()];
        loop {
            let mut added = false;
            for i in 0..elements.len() {
                for generator in generators {
                    let product = &elements[i] * generator;
                    if !elements.contains(&product) {
                        elements.push(product);
                        added = true;
                        if elements.len() > MAX_GROUP_ELEMENTS {
                            return Err(SymmetryError::ClosureOverflow {
                                symbol: symbol.to_string(),
                                cap: MAX_GROUP_ELEMENTS,
                            });
                        }
                    }
                }
            }
            if !added {
                return Ok(elements);
            }
        }
    }

    /// The canonical Hermann-Mauguin symbol this group was built from.
    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    /// The generator string backing this group, for persistence.
    pub fn generator_string(&self) -> &str {
        &self.generator_string
    }

    /// All symmetry operations of the group, identity included.
    pub fn elements(&self) -> &[SymOp] {
        &self.elements
    }

    /// The group order (number of general-position operations).
    pub fn order(&self) -> usize {
        self.elements.len()
    }

    /// True if some group element maps `hkl1` onto `hkl2`.
    ///
    /// Miller indices transform by the rotation parts only; translations
    /// contribute phases, not new indices.
    pub fn is_equivalent(&self, hkl1: &Vector3<f64>, hkl2: &Vector3<f64>) -> bool {
        self.elements
            .iter()
            .any(|g| (g.apply_to_miller(hkl1) - hkl2).amax() < HKL_EQUALITY_TOLERANCE)
    }

    /// Like [`Self::is_equivalent`], additionally allowing the Friedel mate
    /// `(-h,-k,-l)` of `hkl2`.
    pub fn is_friedel_equivalent(&self, hkl1: &Vector3<f64>, hkl2: &Vector3<f64>) -> bool {
        self.is_equivalent(hkl1, hkl2) || self.is_equivalent(hkl1, &(-hkl2))
    }

    /// True if the reflection is systematically absent: some operation fixes
    /// the index while its non-primitive translation yields a non-trivial
    /// phase.
    pub fn is_extinct(&self, hkl: &Vector3<f64>) -> bool {
        self.elements.iter().any(|g| g.forbids(hkl))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hkl(h: f64, k: f64, l: f64) -> Vector3<f64> {
        Vector3::new(h, k, l)
    }

    #[test]
    fn p1_contains_only_the_identity() {
        let group = SpaceGroup::new("P 1").unwrap();
        assert_eq!(group.order(), 1);
        assert!(group.elements()[0].is_identity());
    }

    #[test]
    fn every_group_relates_an_index_to_itself() {
        for symbol in ["P 1", "P -1", "P 21/c", "P n m a", "P m -3 m"] {
            let group = SpaceGroup::new(symbol).unwrap();
            assert!(
                group.is_equivalent(&hkl(1.0, 2.0, 3.0), &hkl(1.0, 2.0, 3.0)),
                "identity missing from {symbol}"
            );
        }
    }

    #[test]
    fn centrosymmetric_group_relates_friedel_mates() {
        let group = SpaceGroup::new("P -1").unwrap();
        assert_eq!(group.order(), 2);
        assert!(group.is_equivalent(&hkl(1.0, 2.0, 3.0), &hkl(-1.0, -2.0, -3.0)));
    }

    #[test]
    fn friedel_equivalence_holds_even_without_centrosymmetry() {
        let group = SpaceGroup::new("P 1").unwrap();
        assert!(!group.is_equivalent(&hkl(1.0, 2.0, 3.0), &hkl(-1.0, -2.0, -3.0)));
        assert!(group.is_friedel_equivalent(&hkl(1.0, 2.0, 3.0), &hkl(-1.0, -2.0, -3.0)));
    }

    #[test]
    fn pnma_has_eight_general_positions_and_documented_generators() {
        let group = SpaceGroup::new("P n m a").unwrap();
        assert_eq!(group.order(), 8);
        // The generator string is reported back verbatim from the table,
        // whitespace included.
        assert_eq!(
            group.generator_string(),
            " -x+1/2,-y,z+1/2; -x,y+1/2,-z; -x,-y,-z"
        );
    }

    #[test]
    fn known_group_orders_are_reproduced() {
        for (symbol, order) in [
            ("P 2", 2),
            ("P 21/c", 4),
            ("P n a 21", 4),
            ("P b c a", 8),
            ("C 2/m", 8),
            ("C m c 21", 8),
            ("F d d 2", 16),
            ("P 41 21 2", 8),
            ("P 43 21 2", 8),
            ("P 42/n", 8),
            ("I 41/a", 16),
            ("P 4/m m m", 16),
            ("I 4/m m m", 32),
            ("R -3 m", 36),
            ("P 61 2 2", 12),
            ("P 65 2 2", 12),
            ("P 6/m m m", 24),
            ("P 21 3", 12),
            ("P m -3 m", 48),
            ("F d -3", 96),
            ("I a -3 d", 96),
            ("F m -3 m", 192),
            ("F d -3 m", 192),
        ] {
            let group = SpaceGroup::new(symbol).unwrap();
            assert_eq!(group.order(), order, "wrong order for {symbol}");
        }
    }

    #[test]
    fn closure_is_idempotent() {
        let first = SpaceGroup::new("P n m a").unwrap();
        let second = SpaceGroup::new("P n m a").unwrap();
        assert_eq!(first.order(), second.order());
        for element in first.elements() {
            assert!(second.elements().contains(element));
        }
    }

    #[test]
    fn unknown_symbol_is_a_typed_error() {
        assert!(matches!(
            SpaceGroup::new("X 9 9 9"),
            Err(SymmetryError::UnknownSymbol { .. })
        ));
    }

    #[test]
    fn runaway_generator_data_hits_the_element_cap() {
        // A 1/211 pseudo-translation generates 211 distinct elements, which
        // no crystallographic group can have.
        let result = SpaceGroup::from_generator_string("broken", "x+1/211,y,z");
        assert!(matches!(
            result,
            Err(SymmetryError::ClosureOverflow { cap: 200, .. })
        ));
    }

    #[test]
    fn screw_axis_produces_systematic_absences() {
        let group = SpaceGroup::new("P 21").unwrap();
        assert!(group.is_extinct(&hkl(0.0, 1.0, 0.0)));
        assert!(!group.is_extinct(&hkl(0.0, 2.0, 0.0)));
        assert!(!group.is_extinct(&hkl(1.0, 0.0, 0.0)));
    }

    #[test]
    fn tetragonal_group_relates_rotated_indices() {
        let group = SpaceGroup::new("P 4").unwrap();
        assert_eq!(group.order(), 4);
        assert!(group.is_equivalent(&hkl(1.0, 0.0, 0.0), &hkl(0.0, 1.0, 0.0)));
        assert!(!group.is_equivalent(&hkl(1.0, 0.0, 0.0), &hkl(0.0, 0.0, 1.0)));
    }
}
