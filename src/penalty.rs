//! Process penalties and additional priors
//!
//! A penalty is not an error: when a process cannot honour a request (a
//! catch that exceeds the exploitation cap, a tag release larger than the
//! selected stock) it triggers its configured penalty and the shortfall
//! becomes an objective-function contribution.

use crate::error::DiagnosticSink;

/// Penalty definition referenced by mortality and tagging processes
#[derive(Debug, Clone)]
pub struct Penalty {
    pub label: String,
    pub multiplier: f64,
    /// Score on the log of the requested/achieved values
    pub log_scale: bool,
}

impl Penalty {
    pub fn new(label: impl Into<String>, multiplier: f64, log_scale: bool) -> Self {
        Self {
            label: label.into(),
            multiplier,
            log_scale,
        }
    }

    pub fn validate(&self, sink: &mut DiagnosticSink) {
        if self.multiplier < 0.0 {
            sink.error(
                format!("penalty[{}]", self.label),
                format!("multiplier ({}) cannot be less than 0.0", self.multiplier),
            );
        }
    }

    /// Score the difference between what was requested and what was
    /// achievable, producing an event for the objective log.
    pub fn trigger(&self, source: &str, value_1: f64, value_2: f64) -> PenaltyEvent {
        let score = if self.log_scale {
            let a = value_1.max(1e-10).ln();
            let b = value_2.max(1e-10).ln();
            (a - b) * (a - b) * self.multiplier
        } else {
            (value_1 - value_2) * (value_1 - value_2) * self.multiplier
        };
        PenaltyEvent {
            penalty: self.label.clone(),
            source: source.to_string(),
            score,
        }
    }
}

/// One triggered penalty, accumulated into the objective
#[derive(Debug, Clone)]
pub struct PenaltyEvent {
    pub penalty: String,
    pub source: String,
    pub score: f64,
}

/// Additional priors: objective contributions on addressable quantities
/// that are not tied to a single estimate.
#[derive(Debug, Clone)]
pub struct AdditionalPrior {
    pub label: String,
    /// Addressable path of the target vector/scalar
    pub parameter: String,
    pub kind: AdditionalPriorKind,
    pub multiplier: f64,
}

#[derive(Debug, Clone)]
pub enum AdditionalPriorKind {
    /// Penalise the mean of a vector away from k
    VectorAverage { k: f64 },
    /// Penalise first-order differences between consecutive elements
    ElementDifference,
}

impl AdditionalPrior {
    /// Score the values read from the addressable target
    pub fn score(&self, values: &[f64]) -> f64 {
        match &self.kind {
            AdditionalPriorKind::VectorAverage { k } => {
                if values.is_empty() {
                    return 0.0;
                }
                let mean = values.iter().sum::<f64>() / values.len() as f64;
                (mean - k) * (mean - k) * self.multiplier
            }
            AdditionalPriorKind::ElementDifference => {
                let mut score = 0.0;
                for pair in values.windows(2) {
                    let diff = pair[1] - pair[0];
                    score += diff * diff;
                }
                score * self.multiplier
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trigger_squared_difference() {
        let penalty = Penalty::new("CatchMustBeTaken", 10.0, false);
        let event = penalty.trigger("FishingMort", 1000.0, 900.0);
        assert_eq!(event.score, 100.0 * 100.0 * 10.0);
        assert_eq!(event.source, "FishingMort");
    }

    #[test]
    fn test_trigger_log_scale() {
        let penalty = Penalty::new("CatchMustBeTaken", 1.0, true);
        let event = penalty.trigger("FishingMort", 1000.0, 100.0);
        let expected = (1000.0_f64.ln() - 100.0_f64.ln()).powi(2);
        assert!((event.score - expected).abs() < 1e-12);
    }

    #[test]
    fn test_vector_average_prior() {
        let prior = AdditionalPrior {
            label: "YCSAverage".into(),
            parameter: "process[Recruitment].ycs_values".into(),
            kind: AdditionalPriorKind::VectorAverage { k: 1.0 },
            multiplier: 100.0,
        };
        assert_eq!(prior.score(&[1.0, 1.0, 1.0]), 0.0);
        let off = prior.score(&[1.2, 1.2, 1.2]);
        assert!((off - 100.0 * 0.2 * 0.2).abs() < 1e-9);
    }

    #[test]
    fn test_element_difference_prior() {
        let prior = AdditionalPrior {
            label: "Smooth".into(),
            parameter: "process[Recruitment].ycs_values".into(),
            kind: AdditionalPriorKind::ElementDifference,
            multiplier: 1.0,
        };
        assert_eq!(prior.score(&[2.0, 2.0]), 0.0);
        assert_eq!(prior.score(&[1.0, 2.0, 4.0]), 1.0 + 4.0);
    }
}
