//! Ageing error: misclassification of true ages in observed data
//!
//! A square matrix maps a true-age distribution to the distribution an
//! ageing laboratory would report. Observations multiply their expected
//! age compositions through it before scoring.

use crate::error::DiagnosticSink;

#[derive(Debug, Clone)]
pub struct AgeingError {
    pub label: String,
    pub kind: AgeingErrorKind,
    matrix: Vec<Vec<f64>>,
}

#[derive(Debug, Clone)]
pub enum AgeingErrorKind {
    /// Identity matrix
    None,
    /// Normal misclassification with sd = cv * true age
    Normal { cv: f64 },
    /// Fixed probabilities of ageing one year low or high
    OffByOne { p1: f64, p2: f64 },
}

impl AgeingError {
    pub fn new(label: impl Into<String>, kind: AgeingErrorKind) -> Self {
        Self {
            label: label.into(),
            kind,
            matrix: Vec::new(),
        }
    }

    pub fn validate(&self, sink: &mut DiagnosticSink) {
        let location = format!("ageing_error[{}]", self.label);
        match &self.kind {
            AgeingErrorKind::Normal { cv } => {
                if *cv <= 0.0 {
                    sink.error(location, format!("cv ({}) must be greater than 0.0", cv));
                }
            }
            AgeingErrorKind::OffByOne { p1, p2 } => {
                if *p1 < 0.0 || *p2 < 0.0 || p1 + p2 > 1.0 {
                    sink.error(
                        location,
                        format!("p1 ({}) and p2 ({}) must be non-negative and sum to at most 1.0", p1, p2),
                    );
                }
            }
            AgeingErrorKind::None => {}
        }
    }

    /// Build the misclassification matrix over the model age range.
    /// Rows are true ages, columns observed ages; each row sums to one,
    /// with the tails accumulated into the edge classes.
    pub fn build(&mut self, min_age: u32, max_age: u32) {
        let spread = (max_age - min_age + 1) as usize;
        let mut matrix = vec![vec![0.0; spread]; spread];
        match &self.kind {
            AgeingErrorKind::None => {
                for (i, row) in matrix.iter_mut().enumerate() {
                    row[i] = 1.0;
                }
            }
            AgeingErrorKind::OffByOne { p1, p2 } => {
                for i in 0..spread {
                    let low = if i == 0 { 0 } else { i - 1 };
                    let high = (i + 1).min(spread - 1);
                    matrix[i][low] += p1;
                    matrix[i][high] += p2;
                    matrix[i][i] += 1.0 - p1 - p2;
                }
            }
            AgeingErrorKind::Normal { cv } => {
                for i in 0..spread {
                    let age = (min_age + i as u32) as f64;
                    let sigma = cv * age;
                    for j in 0..spread {
                        let observed = (min_age + j as u32) as f64;
                        // integrate the normal over the one-year class,
                        // open-ended at the range edges
                        let lower = if j == 0 {
                            f64::NEG_INFINITY
                        } else {
                            (observed - 0.5 - age) / sigma
                        };
                        let upper = if j == spread - 1 {
                            f64::INFINITY
                        } else {
                            (observed + 0.5 - age) / sigma
                        };
                        matrix[i][j] = normal_cdf(upper) - normal_cdf(lower);
                    }
                }
            }
        }
        self.matrix = matrix;
    }

    /// Apply the matrix to an expected age distribution
    pub fn apply(&self, expected: &[f64]) -> Vec<f64> {
        if self.matrix.is_empty() || self.matrix.len() != expected.len() {
            return expected.to_vec();
        }
        let mut result = vec![0.0; expected.len()];
        for (i, &value) in expected.iter().enumerate() {
            for (j, &probability) in self.matrix[i].iter().enumerate() {
                result[j] += value * probability;
            }
        }
        result
    }
}

/// Standard normal CDF (Abramowitz & Stegun 26.2.17)
fn normal_cdf(z: f64) -> f64 {
    if z == f64::INFINITY {
        return 1.0;
    }
    if z == f64::NEG_INFINITY {
        return 0.0;
    }
    let absolute = z.abs();
    let tt = 1.0 / (1.0 + 0.2316419 * absolute);
    let norm = 1.0 / (2.0 * std::f64::consts::PI).sqrt() * (-0.5 * absolute * absolute).exp();
    let mut ttt = tt;
    let mut tail = 0.319_381_530 * ttt;
    ttt *= tt;
    tail -= 0.356_563_782 * ttt;
    ttt *= tt;
    tail += 1.781_477_937 * ttt;
    ttt *= tt;
    tail -= 1.821_255_978 * ttt;
    ttt *= tt;
    tail += 1.330_274_429 * ttt;
    tail *= norm;
    if z >= 0.0 {
        1.0 - tail
    } else {
        tail
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_none_is_identity() {
        let mut error = AgeingError::new("None", AgeingErrorKind::None);
        error.build(1, 5);
        let input = vec![1.0, 2.0, 3.0, 4.0, 5.0];
        assert_eq!(error.apply(&input), input);
    }

    #[test]
    fn test_off_by_one_conserves_total() {
        let mut error = AgeingError::new("OffByOne", AgeingErrorKind::OffByOne { p1: 0.1, p2: 0.2 });
        error.build(1, 5);
        let input = vec![10.0, 0.0, 0.0, 0.0, 0.0];
        let output = error.apply(&input);
        let total: f64 = output.iter().sum();
        assert!((total - 10.0).abs() < 1e-12);
        // the edge class keeps its downward leakage
        assert!((output[0] - 8.0).abs() < 1e-12);
        assert!((output[1] - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_normal_rows_sum_to_one() {
        let mut error = AgeingError::new("Normal", AgeingErrorKind::Normal { cv: 0.1 });
        error.build(1, 20);
        let uniform = vec![1.0; 20];
        let output = error.apply(&uniform);
        let total: f64 = output.iter().sum();
        assert!((total - 20.0).abs() < 1e-6);
    }

    #[test]
    fn test_normal_spreads_mass_to_neighbours() {
        let mut error = AgeingError::new("Normal", AgeingErrorKind::Normal { cv: 0.15 });
        error.build(1, 20);
        let mut input = vec![0.0; 20];
        input[9] = 100.0;
        let output = error.apply(&input);
        assert!(output[9] < 100.0);
        assert!(output[8] > 0.0 && output[10] > 0.0);
        assert!(output[9] > output[8]);
    }
}
