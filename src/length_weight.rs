//! Length-weight relationships
//!
//! Converts a mean length into a mean weight via the allometric
//! `w = a * L^b` form. Weights are produced in the model's base units;
//! tonnes are the convention for biomass derived quantities.

use crate::error::DiagnosticSink;

#[derive(Debug, Clone)]
pub struct LengthWeight {
    pub label: String,
    pub a: f64,
    pub b: f64,
}

impl LengthWeight {
    pub fn new(label: impl Into<String>, a: f64, b: f64) -> Self {
        Self {
            label: label.into(),
            a,
            b,
        }
    }

    /// An identity curve useful when a model works in numbers only
    pub fn none(label: impl Into<String>) -> Self {
        Self::new(label, 1.0, 0.0)
    }

    /// Mean weight for a mean length
    pub fn weight(&self, length: f64) -> f64 {
        self.a * length.powf(self.b)
    }

    pub fn validate(&self, sink: &mut DiagnosticSink) {
        if self.a <= 0.0 {
            sink.error(
                format!("length_weight[{}]", self.label),
                format!("a ({}) must be greater than 0.0", self.a),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allometric_weight() {
        let lw = LengthWeight::new("Basic", 4.79e-9, 3.2);
        let w = lw.weight(40.0);
        assert!((w - 4.79e-9 * 40.0_f64.powf(3.2)).abs() < 1e-15);
    }

    #[test]
    fn test_none_is_identity_scale() {
        let lw = LengthWeight::none("None");
        assert_eq!(lw.weight(55.0), 1.0);
    }
}
