//! Likelihood families
//!
//! Each likelihood fills per-comparison negative log-likelihood scores and
//! supplies the year-level constant through `initial_score`. In simulation
//! mode the same object samples observed values around the expecteds using
//! the model's seeded generator.

use rand::Rng;

use crate::numeric::{
    cholesky_decompose, cholesky_solve, gamma_sample, ln_determinant, ln_gamma, standard_normal,
};

use super::Comparison;

/// Guard an expected value away from zero before taking logs or dividing
fn zero_fun(value: f64, delta: f64) -> f64 {
    if value < delta {
        delta / (2.0 - value / delta)
    } else {
        value
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Likelihood {
    Lognormal,
    Normal,
    Multinomial,
    Binomial,
    BinomialApprox,
    Dirichlet,
    LogisticNormal { sigma: f64, rho: f64 },
}

impl Likelihood {
    pub fn parse(text: &str) -> Option<Self> {
        match text {
            "lognormal" => Some(Likelihood::Lognormal),
            "normal" => Some(Likelihood::Normal),
            "multinomial" => Some(Likelihood::Multinomial),
            "binomial" => Some(Likelihood::Binomial),
            "binomial_approx" => Some(Likelihood::BinomialApprox),
            "dirichlet" => Some(Likelihood::Dirichlet),
            _ => None,
        }
    }

    /// Combine an error value with a process error:
    /// `adjusted = 1 / (1/error + 1/process_error)` when both are positive.
    pub fn adjust_error_value(&self, process_error: f64, error_value: f64) -> f64 {
        if process_error > 0.0 && error_value > 0.0 {
            1.0 / (1.0 / error_value + 1.0 / process_error)
        } else {
            error_value
        }
    }

    /// Year-level score component independent of individual records
    pub fn initial_score(&self, comparisons: &[Comparison]) -> f64 {
        match self {
            Likelihood::Multinomial => {
                let n = comparisons.first().map(|c| c.adjusted_error).unwrap_or(0.0);
                -ln_gamma(n + 1.0)
            }
            Likelihood::Dirichlet => {
                let alpha_total: f64 = comparisons
                    .iter()
                    .map(|c| zero_fun(c.expected, c.delta) * c.adjusted_error)
                    .sum();
                -ln_gamma(alpha_total)
            }
            Likelihood::LogisticNormal { sigma, rho } => {
                self.logistic_normal_score(comparisons, *sigma, *rho)
            }
            _ => 0.0,
        }
    }

    /// Fill the per-record scores
    pub fn get_scores(&self, comparisons: &mut [Comparison]) {
        match self {
            Likelihood::Lognormal => {
                for comparison in comparisons {
                    let cv = comparison.adjusted_error;
                    let sigma = (cv * cv + 1.0).ln().sqrt();
                    let expected = zero_fun(comparison.expected, comparison.delta);
                    let z = (comparison.observed / expected).max(f64::MIN_POSITIVE).ln() / sigma
                        + 0.5 * sigma;
                    comparison.score = sigma.ln() + 0.5 * z * z;
                }
            }
            Likelihood::Normal => {
                for comparison in comparisons {
                    let sd = zero_fun(
                        comparison.adjusted_error * comparison.expected,
                        comparison.delta,
                    );
                    let z = (comparison.observed - comparison.expected) / sd;
                    comparison.score = sd.ln() + 0.5 * z * z;
                }
            }
            Likelihood::Multinomial => {
                for comparison in comparisons {
                    let n = comparison.adjusted_error;
                    let expected = zero_fun(comparison.expected, comparison.delta);
                    comparison.score = ln_gamma(n * comparison.observed + 1.0)
                        - n * comparison.observed * expected.ln();
                }
            }
            Likelihood::Binomial => {
                for comparison in comparisons {
                    let n = comparison.adjusted_error;
                    let successes = n * comparison.observed;
                    let expected = zero_fun(comparison.expected, comparison.delta);
                    let complement = zero_fun(1.0 - comparison.expected, comparison.delta);
                    comparison.score = -ln_gamma(n + 1.0)
                        + ln_gamma(successes + 1.0)
                        + ln_gamma(n - successes + 1.0)
                        - successes * expected.ln()
                        - (n - successes) * complement.ln();
                }
            }
            Likelihood::BinomialApprox => {
                for comparison in comparisons {
                    let n = comparison.adjusted_error;
                    let std_error = (((comparison.expected + comparison.delta)
                        * (1.0 - comparison.expected + comparison.delta))
                        / n)
                        .sqrt();
                    let z = (comparison.observed - comparison.expected) / std_error;
                    comparison.score = std_error.ln() + 0.5 * z * z;
                }
            }
            Likelihood::Dirichlet => {
                for comparison in comparisons {
                    let alpha = zero_fun(comparison.expected, comparison.delta)
                        * comparison.adjusted_error;
                    let observed = zero_fun(comparison.observed, comparison.delta);
                    comparison.score = ln_gamma(alpha) - (alpha - 1.0) * observed.ln();
                }
            }
            Likelihood::LogisticNormal { .. } => {
                // the whole-composition score lives in initial_score
                for comparison in comparisons {
                    comparison.score = 0.0;
                }
            }
        }
    }

    /// Logistic-normal negative log-likelihood of a full composition using
    /// additive log-ratio contrasts against the final bin, with an AR(1)
    /// correlation structure across bins.
    fn logistic_normal_score(&self, comparisons: &[Comparison], sigma: f64, rho: f64) -> f64 {
        let bins = comparisons.len();
        if bins < 2 {
            return 0.0;
        }
        let contrasts = bins - 1;

        // covariance of the log-ratio contrasts: V = A Sigma A'
        let base = |i: usize, j: usize| -> f64 {
            sigma * sigma * rho.powi((i as i32 - j as i32).abs())
        };
        let mut v = vec![vec![0.0; contrasts]; contrasts];
        for (i, row) in v.iter_mut().enumerate() {
            for (j, value) in row.iter_mut().enumerate() {
                *value = base(i, j) - base(i, bins - 1) - base(j, bins - 1)
                    + base(bins - 1, bins - 1);
            }
        }

        let last = &comparisons[bins - 1];
        let last_observed = zero_fun(last.observed, last.delta);
        let last_expected = zero_fun(last.expected, last.delta);
        let residuals: Vec<f64> = comparisons[..contrasts]
            .iter()
            .map(|c| {
                let observed = zero_fun(c.observed, c.delta);
                let expected = zero_fun(c.expected, c.delta);
                (observed / last_observed).ln() - (expected / last_expected).ln()
            })
            .collect();

        let Some(lower) = cholesky_decompose(&v) else {
            // degenerate covariance: fall back to independent residuals
            let variance = (sigma * sigma).max(f64::MIN_POSITIVE);
            return residuals.iter().map(|r| 0.5 * r * r / variance).sum();
        };
        let solved = cholesky_solve(&lower, &residuals);
        let mahalanobis: f64 = residuals.iter().zip(solved.iter()).map(|(r, s)| r * s).sum();

        let log_observed_sum: f64 = comparisons
            .iter()
            .map(|c| zero_fun(c.observed, c.delta).ln())
            .sum();

        0.5 * contrasts as f64 * (2.0 * std::f64::consts::PI).ln()
            + 0.5 * ln_determinant(&lower)
            + 0.5 * mahalanobis
            + log_observed_sum
    }

    /// Replace observed values with draws around the expecteds
    pub fn simulate<R: Rng>(&self, comparisons: &mut [Comparison], rng: &mut R) {
        match self {
            Likelihood::Lognormal => {
                for comparison in comparisons {
                    let cv = comparison.adjusted_error;
                    let sigma = (cv * cv + 1.0).ln().sqrt();
                    let expected = zero_fun(comparison.expected, comparison.delta);
                    let z = standard_normal(rng);
                    comparison.observed = expected * (sigma * z - 0.5 * sigma * sigma).exp();
                }
            }
            Likelihood::Normal | Likelihood::BinomialApprox => {
                for comparison in comparisons {
                    let sd = match self {
                        Likelihood::Normal => comparison.adjusted_error * comparison.expected,
                        _ => (((comparison.expected + comparison.delta)
                            * (1.0 - comparison.expected + comparison.delta))
                            / comparison.adjusted_error)
                            .sqrt(),
                    };
                    comparison.observed =
                        (comparison.expected + sd * standard_normal(rng)).max(0.0);
                }
            }
            Likelihood::Multinomial => {
                let n = comparisons
                    .first()
                    .map(|c| c.adjusted_error.round() as usize)
                    .unwrap_or(0);
                let total: f64 = comparisons.iter().map(|c| c.expected.max(0.0)).sum();
                if n == 0 || total <= 0.0 {
                    return;
                }
                let mut counts = vec![0usize; comparisons.len()];
                for _ in 0..n {
                    let mut pick: f64 = rng.random::<f64>() * total;
                    for (i, comparison) in comparisons.iter().enumerate() {
                        pick -= comparison.expected.max(0.0);
                        if pick <= 0.0 {
                            counts[i] += 1;
                            break;
                        }
                    }
                }
                for (comparison, count) in comparisons.iter_mut().zip(counts) {
                    comparison.observed = count as f64 / n as f64;
                }
            }
            Likelihood::Binomial => {
                for comparison in comparisons {
                    let n = comparison.adjusted_error.round() as usize;
                    if n == 0 {
                        comparison.observed = 0.0;
                        continue;
                    }
                    let p = comparison.expected.clamp(0.0, 1.0);
                    let mut successes = 0usize;
                    for _ in 0..n {
                        if rng.random::<f64>() < p {
                            successes += 1;
                        }
                    }
                    comparison.observed = successes as f64 / n as f64;
                }
            }
            Likelihood::Dirichlet => {
                let mut draws: Vec<f64> = comparisons
                    .iter()
                    .map(|c| {
                        let alpha = zero_fun(c.expected, c.delta) * c.adjusted_error;
                        gamma_sample(rng, alpha.max(1e-3))
                    })
                    .collect();
                let total: f64 = draws.iter().sum();
                if total > 0.0 {
                    draws.iter_mut().for_each(|d| *d /= total);
                }
                for (comparison, draw) in comparisons.iter_mut().zip(draws) {
                    comparison.observed = draw;
                }
            }
            Likelihood::LogisticNormal { sigma, rho } => {
                let bins = comparisons.len();
                let mut noise: Vec<f64> = (0..bins).map(|_| standard_normal(rng)).collect();
                // correlate the noise with the AR(1) structure
                let mut matrix = vec![vec![0.0; bins]; bins];
                for (i, row) in matrix.iter_mut().enumerate() {
                    for (j, value) in row.iter_mut().enumerate() {
                        *value = sigma * sigma * rho.powi((i as i32 - j as i32).abs());
                    }
                }
                if let Some(lower) = cholesky_decompose(&matrix) {
                    let raw = noise.clone();
                    for (i, value) in noise.iter_mut().enumerate() {
                        *value = (0..=i).map(|j| lower[i][j] * raw[j]).sum();
                    }
                }
                let mut simulated: Vec<f64> = comparisons
                    .iter()
                    .zip(noise.iter())
                    .map(|(c, z)| zero_fun(c.expected, c.delta) * z.exp())
                    .collect();
                let total: f64 = simulated.iter().sum();
                if total > 0.0 {
                    simulated.iter_mut().for_each(|s| *s /= total);
                }
                for (comparison, value) in comparisons.iter_mut().zip(simulated) {
                    comparison.observed = value;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha12Rng;

    fn comparison(observed: f64, expected: f64, error: f64) -> Comparison {
        Comparison {
            category: "stock".to_string(),
            age: 1,
            length: 0.0,
            observed,
            expected,
            error_value: error,
            process_error: 0.0,
            adjusted_error: error,
            delta: 1e-11,
            score: 0.0,
        }
    }

    #[test]
    fn test_error_value_adjustment() {
        let likelihood = Likelihood::Lognormal;
        // 1/(1/0.2 + 1/0.2) = 0.1
        assert!((likelihood.adjust_error_value(0.2, 0.2) - 0.1).abs() < 1e-12);
        // zero process error leaves the value alone
        assert_eq!(likelihood.adjust_error_value(0.0, 0.2), 0.2);
    }

    #[test]
    fn test_lognormal_minimised_near_expected() {
        let likelihood = Likelihood::Lognormal;
        let mut close = [comparison(1.0, 1.0, 0.2)];
        let mut far = [comparison(3.0, 1.0, 0.2)];
        likelihood.get_scores(&mut close);
        likelihood.get_scores(&mut far);
        assert!(close[0].score < far[0].score);
    }

    #[test]
    fn test_normal_score_formula() {
        let likelihood = Likelihood::Normal;
        let mut comparisons = [comparison(12.0, 10.0, 0.25)];
        likelihood.get_scores(&mut comparisons);
        let sd: f64 = 0.25 * 10.0;
        let expected = sd.ln() + 0.5 * (2.0 / sd) * (2.0 / sd);
        assert!((comparisons[0].score - expected).abs() < 1e-12);
    }

    #[test]
    fn test_multinomial_prefers_matching_proportions() {
        let likelihood = Likelihood::Multinomial;
        let mut matched = [
            comparison(0.5, 0.5, 100.0),
            comparison(0.5, 0.5, 100.0),
        ];
        let mut mismatched = [
            comparison(0.5, 0.1, 100.0),
            comparison(0.5, 0.9, 100.0),
        ];
        let matched_total: f64 = {
            likelihood.get_scores(&mut matched);
            likelihood.initial_score(&matched) + matched.iter().map(|c| c.score).sum::<f64>()
        };
        let mismatched_total: f64 = {
            likelihood.get_scores(&mut mismatched);
            likelihood.initial_score(&mismatched) + mismatched.iter().map(|c| c.score).sum::<f64>()
        };
        assert!(matched_total < mismatched_total);
    }

    #[test]
    fn test_binomial_approx_score() {
        let likelihood = Likelihood::BinomialApprox;
        let mut comparisons = [comparison(0.4, 0.5, 50.0)];
        likelihood.get_scores(&mut comparisons);
        let delta = 1e-11;
        let std_error = (((0.5 + delta) * (0.5 + delta)) / 50.0_f64).sqrt();
        let expected = std_error.ln() + 0.5 * (0.1 / std_error) * (0.1 / std_error);
        assert!((comparisons[0].score - expected).abs() < 1e-9);
    }

    #[test]
    fn test_logistic_normal_prefers_matching_composition() {
        let likelihood = Likelihood::LogisticNormal { sigma: 0.4, rho: 0.2 };
        let matched = vec![
            comparison(0.2, 0.2, 0.0),
            comparison(0.3, 0.3, 0.0),
            comparison(0.5, 0.5, 0.0),
        ];
        let mismatched = vec![
            comparison(0.5, 0.2, 0.0),
            comparison(0.3, 0.3, 0.0),
            comparison(0.2, 0.5, 0.0),
        ];
        assert!(likelihood.initial_score(&matched) < likelihood.initial_score(&mismatched));
    }

    #[test]
    fn test_multinomial_simulation_is_a_proportion() {
        let likelihood = Likelihood::Multinomial;
        let mut rng = ChaCha12Rng::seed_from_u64(3);
        let mut comparisons = vec![
            comparison(0.0, 0.2, 500.0),
            comparison(0.0, 0.3, 500.0),
            comparison(0.0, 0.5, 500.0),
        ];
        likelihood.simulate(&mut comparisons, &mut rng);
        let total: f64 = comparisons.iter().map(|c| c.observed).sum();
        assert!((total - 1.0).abs() < 1e-9);
        // big sample keeps the draw near the expecteds
        assert!((comparisons[2].observed - 0.5).abs() < 0.1);
    }

    #[test]
    fn test_lognormal_simulation_deterministic_by_seed() {
        let likelihood = Likelihood::Lognormal;
        let mut first = vec![comparison(0.0, 100.0, 0.2)];
        let mut second = vec![comparison(0.0, 100.0, 0.2)];
        let mut rng_a = ChaCha12Rng::seed_from_u64(9);
        let mut rng_b = ChaCha12Rng::seed_from_u64(9);
        likelihood.simulate(&mut first, &mut rng_a);
        likelihood.simulate(&mut second, &mut rng_b);
        assert_eq!(first[0].observed, second[0].observed);
    }
}
