//! Priors on estimable parameters
//!
//! Each prior evaluates to a negative log-density (up to a constant) at the
//! current natural-scale value; the scores are summed into the objective
//! and exposed per estimate.

use crate::error::DiagnosticSink;

#[derive(Debug, Clone, PartialEq)]
pub enum Prior {
    Uniform,
    UniformLog,
    Normal { mu: f64, cv: f64 },
    NormalByStdev { mu: f64, sigma: f64 },
    Lognormal { mu: f64, cv: f64 },
    Beta { mu: f64, sigma: f64, a: f64, b: f64 },
}

impl Prior {
    pub fn validate(&self, location: &str, sink: &mut DiagnosticSink) {
        match self {
            Prior::Normal { cv, .. } | Prior::Lognormal { cv, .. } => {
                if *cv <= 0.0 {
                    sink.error(location, format!("cv ({}) must be greater than 0.0", cv));
                }
            }
            Prior::NormalByStdev { sigma, .. } => {
                if *sigma <= 0.0 {
                    sink.error(location, format!("sigma ({}) must be greater than 0.0", sigma));
                }
            }
            Prior::Beta { mu, sigma, a, b } => {
                if b <= a {
                    sink.error(location, format!("b ({}) must be greater than a ({})", b, a));
                }
                if *sigma <= 0.0 {
                    sink.error(location, format!("sigma ({}) must be greater than 0.0", sigma));
                }
                if mu <= a || mu >= b {
                    sink.error(
                        location,
                        format!("mu ({}) must lie strictly between a ({}) and b ({})", mu, a, b),
                    );
                }
            }
            _ => {}
        }
    }

    /// Negative log-density at the value, dropping constants
    pub fn score(&self, value: f64) -> f64 {
        match self {
            Prior::Uniform => 0.0,
            Prior::UniformLog => value.max(f64::MIN_POSITIVE).ln(),
            Prior::Normal { mu, cv } => {
                let z = (value - mu) / (cv * mu);
                0.5 * z * z
            }
            Prior::NormalByStdev { mu, sigma } => {
                let z = (value - mu) / sigma;
                0.5 * z * z
            }
            Prior::Lognormal { mu, cv } => {
                let sigma = (cv * cv + 1.0).ln().sqrt();
                let z = (value / mu).max(f64::MIN_POSITIVE).ln() / sigma + 0.5 * sigma;
                value.max(f64::MIN_POSITIVE).ln() + 0.5 * z * z
            }
            Prior::Beta { mu, sigma, a, b } => {
                // moment-matched shape parameters on [a, b]
                let m = (mu - a) / (b - a);
                let tau = (mu - a) * (b - mu) / (sigma * sigma) - 1.0;
                let alpha = tau * m;
                let beta = tau * (1.0 - m);
                (1.0 - alpha) * (value - a).max(f64::MIN_POSITIVE).ln()
                    + (1.0 - beta) * (b - value).max(f64::MIN_POSITIVE).ln()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uniform_is_flat() {
        assert_eq!(Prior::Uniform.score(0.1), 0.0);
        assert_eq!(Prior::Uniform.score(1e6), 0.0);
    }

    #[test]
    fn test_normal_minimised_at_mu() {
        let prior = Prior::Normal { mu: 5.0, cv: 0.2 };
        assert_eq!(prior.score(5.0), 0.0);
        assert!(prior.score(4.0) > 0.0);
        assert!(prior.score(6.0) > 0.0);
        // one sd away scores one half
        let sd = 0.2 * 5.0;
        assert!((prior.score(5.0 + sd) - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_lognormal_mode_below_mu() {
        let prior = Prior::Lognormal { mu: 1.0, cv: 0.6 };
        // the mode of a lognormal sits below its mean
        let mode_region = prior.score(0.6);
        assert!(mode_region < prior.score(1.5));
        assert!(mode_region < prior.score(0.05));
    }

    #[test]
    fn test_beta_diverges_at_edges() {
        let prior = Prior::Beta {
            mu: 0.8,
            sigma: 0.05,
            a: 0.2,
            b: 1.0,
        };
        let centre = prior.score(0.8);
        assert!(prior.score(0.21) > centre);
        assert!(prior.score(0.999) > centre);
    }

    #[test]
    fn test_validate_rejects_bad_beta() {
        let prior = Prior::Beta {
            mu: 1.5,
            sigma: 0.05,
            a: 0.2,
            b: 1.0,
        };
        let mut sink = DiagnosticSink::new();
        prior.validate("estimate[steepness].prior", &mut sink);
        assert!(!sink.is_empty());
    }
}
