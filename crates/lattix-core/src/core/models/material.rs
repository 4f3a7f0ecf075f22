use serde::{Deserialize, Serialize};

/// A crystal material attached to a unit cell.
///
/// The lattice engine never consumes these fields numerically; they travel
/// with the cell for reporting and persistence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Material {
    pub name: String,
    /// Chemical formula, e.g. `"CaCO3"`.
    pub formula: Option<String>,
    /// Mass density in g/cm^3.
    pub density: Option<f64>,
}

impl Material {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            formula: None,
            density: None,
        }
    }

    pub fn with_formula(mut self, formula: impl Into<String>) -> Self {
        self.formula = Some(formula.into());
        self
    }

    pub fn with_density(mut self, density: f64) -> Self {
        self.density = Some(density);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_fills_optional_fields() {
        let material = Material::new("calcite").with_formula("CaCO3").with_density(2.71);
        assert_eq!(material.name, "calcite");
        assert_eq!(material.formula.as_deref(), Some("CaCO3"));
        assert_eq!(material.density, Some(2.71));
    }
}
