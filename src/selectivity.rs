//! Age-dependent selectivity curves
//!
//! A selectivity maps an age to a non-negative weighting and is consumed by
//! mortality, transition, tagging and observation code. Each variant is a
//! pure function of its parameters; the model holds them in a registry and
//! hands out handles.

use crate::error::DiagnosticSink;

/// Selectivity function over ages
#[derive(Debug, Clone)]
pub struct Selectivity {
    pub label: String,
    pub kind: SelectivityKind,
}

#[derive(Debug, Clone)]
pub enum SelectivityKind {
    /// Flat value for every age
    Constant { c: f64 },

    /// Standard logistic: 1 / (1 + 19^((a50 - age) / ato95))
    Logistic { a50: f64, ato95: f64, alpha: f64 },

    /// Double normal with separate left and right spreads
    DoubleNormal {
        mu: f64,
        sigma_l: f64,
        sigma_r: f64,
        alpha: f64,
    },

    /// Explicit value per age inside [low, high]; zero outside
    AllValuesBounded {
        low: u32,
        high: u32,
        values: Vec<f64>,
    },

    /// Zero below the edge, alpha at and above it
    KnifeEdge { edge: f64, alpha: f64 },
}

impl Selectivity {
    pub fn new(label: impl Into<String>, kind: SelectivityKind) -> Self {
        Self {
            label: label.into(),
            kind,
        }
    }

    /// Evaluate the selectivity at an age
    pub fn value_at(&self, age: u32) -> f64 {
        let age = age as f64;
        match &self.kind {
            SelectivityKind::Constant { c } => *c,
            SelectivityKind::Logistic { a50, ato95, alpha } => {
                let threshold = (a50 - age) / ato95;
                // guard the pow against overflow at extreme ages
                if threshold > 5.0 {
                    0.0
                } else if threshold < -5.0 {
                    *alpha
                } else {
                    alpha / (1.0 + 19.0_f64.powf(threshold))
                }
            }
            SelectivityKind::DoubleNormal {
                mu,
                sigma_l,
                sigma_r,
                alpha,
            } => {
                if age < *mu {
                    alpha * 2.0_f64.powf(-((age - mu) / sigma_l).powi(2))
                } else {
                    alpha * 2.0_f64.powf(-((age - mu) / sigma_r).powi(2))
                }
            }
            SelectivityKind::AllValuesBounded { low, high, values } => {
                let age = age as u32;
                if age < *low || age > *high {
                    0.0
                } else {
                    values[(age - low) as usize]
                }
            }
            SelectivityKind::KnifeEdge { edge, alpha } => {
                if age >= *edge {
                    *alpha
                } else {
                    0.0
                }
            }
        }
    }

    /// Check parameter legality, reporting problems into the sink
    pub fn validate(&self, sink: &mut DiagnosticSink) {
        let location = format!("selectivity[{}]", self.label);
        match &self.kind {
            SelectivityKind::Constant { c } => {
                if *c < 0.0 {
                    sink.error(location, format!("c ({}) cannot be less than 0.0", c));
                }
            }
            SelectivityKind::Logistic { ato95, alpha, .. } => {
                if *ato95 <= 0.0 {
                    sink.error(&location, format!("ato95 ({}) must be greater than 0.0", ato95));
                }
                if *alpha <= 0.0 {
                    sink.error(&location, format!("alpha ({}) must be greater than 0.0", alpha));
                }
            }
            SelectivityKind::DoubleNormal {
                sigma_l,
                sigma_r,
                alpha,
                ..
            } => {
                if *sigma_l <= 0.0 || *sigma_r <= 0.0 {
                    sink.error(
                        &location,
                        format!("sigma_l ({}) and sigma_r ({}) must be greater than 0.0", sigma_l, sigma_r),
                    );
                }
                if *alpha <= 0.0 {
                    sink.error(&location, format!("alpha ({}) must be greater than 0.0", alpha));
                }
            }
            SelectivityKind::AllValuesBounded { low, high, values } => {
                let expected = (high - low + 1) as usize;
                if values.len() != expected {
                    sink.error(
                        &location,
                        format!(
                            "number of values provided ({}) does not match the age range ({})",
                            values.len(),
                            expected
                        ),
                    );
                }
                for v in values {
                    if *v < 0.0 {
                        sink.error(&location, format!("value ({}) cannot be less than 0.0", v));
                    }
                }
            }
            SelectivityKind::KnifeEdge { alpha, .. } => {
                if *alpha <= 0.0 {
                    sink.error(&location, format!("alpha ({}) must be greater than 0.0", alpha));
                }
            }
        }
    }

    /// Read an addressable parameter by name and optional index
    pub fn addressable(&self, name: &str, index: Option<usize>) -> Option<f64> {
        match (&self.kind, name) {
            (SelectivityKind::Constant { c }, "c") => Some(*c),
            (SelectivityKind::Logistic { a50, .. }, "a50") => Some(*a50),
            (SelectivityKind::Logistic { ato95, .. }, "ato95") => Some(*ato95),
            (SelectivityKind::Logistic { alpha, .. }, "alpha") => Some(*alpha),
            (SelectivityKind::DoubleNormal { mu, .. }, "mu") => Some(*mu),
            (SelectivityKind::DoubleNormal { sigma_l, .. }, "sigma_l") => Some(*sigma_l),
            (SelectivityKind::DoubleNormal { sigma_r, .. }, "sigma_r") => Some(*sigma_r),
            (SelectivityKind::DoubleNormal { alpha, .. }, "alpha") => Some(*alpha),
            (SelectivityKind::AllValuesBounded { values, .. }, "v") => {
                index.and_then(|i| values.get(i)).copied()
            }
            (SelectivityKind::KnifeEdge { edge, .. }, "e") => Some(*edge),
            (SelectivityKind::KnifeEdge { alpha, .. }, "alpha") => Some(*alpha),
            _ => None,
        }
    }

    /// Write an addressable parameter by name and optional index
    pub fn set_addressable(&mut self, name: &str, index: Option<usize>, value: f64) -> bool {
        match (&mut self.kind, name) {
            (SelectivityKind::Constant { c }, "c") => *c = value,
            (SelectivityKind::Logistic { a50, .. }, "a50") => *a50 = value,
            (SelectivityKind::Logistic { ato95, .. }, "ato95") => *ato95 = value,
            (SelectivityKind::Logistic { alpha, .. }, "alpha") => *alpha = value,
            (SelectivityKind::DoubleNormal { mu, .. }, "mu") => *mu = value,
            (SelectivityKind::DoubleNormal { sigma_l, .. }, "sigma_l") => *sigma_l = value,
            (SelectivityKind::DoubleNormal { sigma_r, .. }, "sigma_r") => *sigma_r = value,
            (SelectivityKind::DoubleNormal { alpha, .. }, "alpha") => *alpha = value,
            (SelectivityKind::AllValuesBounded { values, .. }, "v") => match index {
                Some(i) if i < values.len() => values[i] = value,
                _ => return false,
            },
            (SelectivityKind::KnifeEdge { edge, .. }, "e") => *edge = value,
            (SelectivityKind::KnifeEdge { alpha, .. }, "alpha") => *alpha = value,
            _ => return false,
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constant() {
        let s = Selectivity::new("One", SelectivityKind::Constant { c: 1.0 });
        assert_eq!(s.value_at(1), 1.0);
        assert_eq!(s.value_at(30), 1.0);
    }

    #[test]
    fn test_logistic_midpoint_and_limits() {
        let s = Selectivity::new(
            "Maturity",
            SelectivityKind::Logistic {
                a50: 8.0,
                ato95: 3.0,
                alpha: 1.0,
            },
        );
        // At a50 the curve is exactly half the asymptote
        assert!((s.value_at(8) - 0.5).abs() < 1e-12);
        // a50 + ato95 reaches 95%
        assert!((s.value_at(11) - 0.95).abs() < 1e-12);
        // Extremes saturate
        assert!(s.value_at(50) > 0.999);
        assert!(s.value_at(1) < 0.05);
    }

    #[test]
    fn test_double_normal_peak() {
        let s = Selectivity::new(
            "Fishery",
            SelectivityKind::DoubleNormal {
                mu: 6.0,
                sigma_l: 2.0,
                sigma_r: 10.0,
                alpha: 1.0,
            },
        );
        assert!((s.value_at(6) - 1.0).abs() < 1e-12);
        // one sigma_l below the peak halves the value
        assert!((s.value_at(4) - 0.5).abs() < 1e-12);
        assert!(s.value_at(8) > s.value_at(4));
    }

    #[test]
    fn test_knife_edge() {
        let s = Selectivity::new(
            "Edge",
            SelectivityKind::KnifeEdge { edge: 5.0, alpha: 1.0 },
        );
        assert_eq!(s.value_at(4), 0.0);
        assert_eq!(s.value_at(5), 1.0);
        assert_eq!(s.value_at(20), 1.0);
    }

    #[test]
    fn test_all_values_bounded() {
        let s = Selectivity::new(
            "ByAge",
            SelectivityKind::AllValuesBounded {
                low: 3,
                high: 6,
                values: vec![0.1, 0.2, 0.4, 0.8],
            },
        );
        assert_eq!(s.value_at(2), 0.0);
        assert_eq!(s.value_at(4), 0.2);
        assert_eq!(s.value_at(7), 0.0);
    }

    #[test]
    fn test_validate_rejects_bad_logistic() {
        let s = Selectivity::new(
            "Bad",
            SelectivityKind::Logistic {
                a50: 5.0,
                ato95: 0.0,
                alpha: 1.0,
            },
        );
        let mut sink = DiagnosticSink::new();
        s.validate(&mut sink);
        assert!(!sink.is_empty());
    }

    #[test]
    fn test_addressable_roundtrip() {
        let mut s = Selectivity::new(
            "Maturity",
            SelectivityKind::Logistic {
                a50: 8.0,
                ato95: 3.0,
                alpha: 1.0,
            },
        );
        assert_eq!(s.addressable("a50", None), Some(8.0));
        assert!(s.set_addressable("a50", None, 9.5));
        assert_eq!(s.addressable("a50", None), Some(9.5));
        assert!(!s.set_addressable("missing", None, 1.0));
    }
}
