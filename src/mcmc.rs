//! Markov chain Monte Carlo
//!
//! A Metropolis sampler started from the minimiser's solution and
//! covariance. Proposals are multivariate normal or t draws through the
//! Cholesky factor of the adjusted covariance; the step size adapts at
//! declared iterations towards the target acceptance rate.

use log::{info, warn};
use rand::Rng;

use crate::error::ModelError;
use crate::minimiser::MinimiserResult;
use crate::model::Model;
use crate::numeric::{chi_square, cholesky_decompose, standard_normal};

/// Step-size adaptation multiplies by acceptance_rate / 0.24
const TARGET_ACCEPTANCE_INVERSE: f64 = 4.166_667;
const MAX_CANDIDATE_ATTEMPTS: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProposalDistribution {
    Normal,
    /// Multivariate t with the given degrees of freedom
    T { df: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CovarianceAdjustment {
    /// Rescale the row and column of any tiny variance
    Covariance,
    /// Set the diagonal directly
    Correlation,
    /// Leave the matrix untouched
    None,
}

#[derive(Debug, Clone)]
pub struct McmcConfig {
    /// Total chain length
    pub length: usize,
    /// Spacing between recorded links
    pub keep: usize,
    /// Covariance multiplier for a randomised start; 0 starts at the mode
    pub start: f64,
    pub max_correlation: f64,
    pub adjustment: CovarianceAdjustment,
    pub correlation_diff: f64,
    /// Initial step size; 0 selects 2.4 / sqrt(active estimates)
    pub step_size: f64,
    pub proposal: ProposalDistribution,
    /// Successful-jump counts at which the step size adapts
    pub adapt_step_size_at: Vec<usize>,
}

impl Default for McmcConfig {
    fn default() -> Self {
        Self {
            length: 1000,
            keep: 1,
            start: 0.0,
            max_correlation: 0.8,
            adjustment: CovarianceAdjustment::Covariance,
            correlation_diff: 0.0001,
            step_size: 0.02,
            proposal: ProposalDistribution::T { df: 4 },
            adapt_step_size_at: vec![],
        }
    }
}

/// One recorded state of the sampler
#[derive(Debug, Clone)]
pub struct ChainLink {
    pub iteration: usize,
    pub score: f64,
    pub likelihood: f64,
    pub prior: f64,
    pub penalty: f64,
    pub additional_priors: f64,
    pub acceptance_rate: f64,
    pub acceptance_rate_since_adapt: f64,
    pub step_size: f64,
    /// Natural-scale values of every chained estimate
    pub values: Vec<f64>,
}

#[derive(Debug, Clone)]
pub struct Mcmc {
    pub config: McmcConfig,
}

impl Mcmc {
    pub fn new(config: McmcConfig) -> Self {
        Self { config }
    }

    /// Run the chain from the minimiser's solution, emitting one link per
    /// kept iteration.
    pub fn run(
        &self,
        model: &mut Model,
        solution: &MinimiserResult,
    ) -> Result<Vec<ChainLink>, ModelError> {
        let enabled: Vec<usize> = solution
            .estimate_labels
            .iter()
            .map(|label| {
                model
                    .estimates
                    .iter()
                    .position(|e| &e.label == label)
                    .expect("minimiser labels resolve to estimates")
            })
            .collect();

        // mcmc_fixed estimates stay at the mode but remain in the chain
        let moves: Vec<bool> = enabled
            .iter()
            .map(|&index| {
                let estimate = &model.estimates[index];
                !estimate.mcmc_fixed && !estimate.is_fixed()
            })
            .collect();
        let active = moves.iter().filter(|&&m| m).count();
        if active == 0 {
            return Err(ModelError::Numerical(
                "the MCMC needs at least one non-fixed estimate".to_string(),
            ));
        }

        let mut step_size = self.config.step_size;
        if step_size <= 0.0 {
            step_size = 2.4 * (active as f64).powf(-0.5);
        }

        let covariance = self.adjust_covariance(model, &enabled, &solution.covariance);
        let lower_factor = match cholesky_decompose(&covariance) {
            Some(factor) => factor,
            None => {
                warn!("Cholesky decomposition failed; falling back to a diagonal proposal");
                let mut factor = vec![vec![0.0; enabled.len()]; enabled.len()];
                for i in 0..enabled.len() {
                    factor[i][i] = covariance[i][i].abs().sqrt().max(1e-6);
                }
                factor
            }
        };

        let bounds: Vec<(f64, f64)> = enabled
            .iter()
            .map(|&index| model.estimates[index].transformed_bounds())
            .collect();

        let mut candidates = solution.transformed.clone();
        if self.config.start > 0.0 {
            self.randomise_start(model, &mut candidates, &lower_factor, &moves, &bounds)?;
        }

        let mut current = self.evaluate(model, &enabled, &candidates)?;
        let mut links = Vec::new();
        links.push(self.make_link(0, &current, 0.0, 0.0, step_size, model, &enabled, &candidates));

        let mut jumps = 0usize;
        let mut successful_jumps = 0usize;
        let mut jumps_since_adapt = 0usize;
        let mut successful_jumps_since_adapt = 0usize;

        for iteration in 1..=self.config.length {
            let previous = candidates.clone();
            self.generate_candidates(
                model,
                &mut candidates,
                &lower_factor,
                &moves,
                &bounds,
                step_size,
            )?;

            let proposed = self.evaluate(model, &enabled, &candidates)?;
            jumps += 1;
            jumps_since_adapt += 1;

            // Metropolis criterion on negative log scores
            let ratio = (current.score - proposed.score).exp();
            let accept = ratio >= 1.0 || model.core.rng.random::<f64>() < ratio;
            if accept {
                current = proposed;
                successful_jumps += 1;
                successful_jumps_since_adapt += 1;
            } else {
                candidates = previous;
            }

            // adapt the step size at the declared successful-jump counts
            if jumps_since_adapt > 0
                && successful_jumps_since_adapt > 0
                && self.config.adapt_step_size_at.contains(&successful_jumps)
            {
                let acceptance =
                    successful_jumps_since_adapt as f64 / jumps_since_adapt as f64;
                step_size = (step_size * acceptance * TARGET_ACCEPTANCE_INVERSE).max(1e-10);
                info!(
                    "adapted MCMC step size to {} at {} successful jumps",
                    step_size, successful_jumps
                );
                jumps_since_adapt = 0;
                successful_jumps_since_adapt = 0;
            }

            if iteration % self.config.keep == 0 {
                let acceptance_rate = successful_jumps as f64 / jumps as f64;
                let acceptance_since_adapt = if jumps_since_adapt > 0 {
                    successful_jumps_since_adapt as f64 / jumps_since_adapt as f64
                } else {
                    0.0
                };
                links.push(self.make_link(
                    iteration,
                    &current,
                    acceptance_rate,
                    acceptance_since_adapt,
                    step_size,
                    model,
                    &enabled,
                    &candidates,
                ));
            }
        }

        Ok(links)
    }

    /// Clip correlations at max_correlation and boost variances small
    /// relative to the bound width, per the configured adjustment mode.
    fn adjust_covariance(
        &self,
        model: &Model,
        enabled: &[usize],
        covariance: &[Vec<f64>],
    ) -> Vec<Vec<f64>> {
        let mut adjusted: Vec<Vec<f64>> = covariance.to_vec();
        if self.config.adjustment == CovarianceAdjustment::None {
            return adjusted;
        }

        let n = adjusted.len();
        for i in 0..n {
            for j in i + 1..n {
                let scale = (adjusted[i][i] * adjusted[j][j]).sqrt();
                if scale <= 0.0 {
                    continue;
                }
                let correlation = adjusted[i][j] / scale;
                if correlation > self.config.max_correlation {
                    adjusted[i][j] = self.config.max_correlation * scale;
                    adjusted[j][i] = adjusted[i][j];
                }
                if correlation < -self.config.max_correlation {
                    adjusted[i][j] = -self.config.max_correlation * scale;
                    adjusted[j][i] = adjusted[i][j];
                }
            }
        }

        let bound_widths: Vec<f64> = enabled
            .iter()
            .map(|&index| {
                let (low, high) = model.estimates[index].transformed_bounds();
                high - low
            })
            .collect();

        for i in 0..n {
            let floor = self.config.correlation_diff * bound_widths[i];
            if adjusted[i][i] < floor && adjusted[i][i] != 0.0 {
                match self.config.adjustment {
                    CovarianceAdjustment::Covariance => {
                        let multiplier = (self.config.correlation_diff.sqrt() * bound_widths[i])
                            / adjusted[i][i].sqrt();
                        for j in 0..n {
                            adjusted[i][j] *= multiplier;
                            adjusted[j][i] *= multiplier;
                        }
                    }
                    CovarianceAdjustment::Correlation => {
                        adjusted[i][i] = floor;
                    }
                    CovarianceAdjustment::None => {}
                }
            }
        }
        adjusted
    }

    /// Draw a proposal step into `candidates`, rejecting draws that leave
    /// the transformed bounds.
    fn generate_candidates(
        &self,
        model: &mut Model,
        candidates: &mut [f64],
        lower_factor: &[Vec<f64>],
        moves: &[bool],
        bounds: &[(f64, f64)],
        step_size: f64,
    ) -> Result<(), ModelError> {
        let original: Vec<f64> = candidates.to_vec();
        for attempt in 0.. {
            if attempt >= MAX_CANDIDATE_ATTEMPTS {
                return Err(ModelError::Numerical(
                    "failed to generate MCMC candidates within bounds after 1000 attempts; try a new seed"
                        .to_string(),
                ));
            }
            candidates.copy_from_slice(&original);
            self.fill_proposal(model, candidates, lower_factor, moves, step_size);
            let in_bounds = candidates
                .iter()
                .zip(bounds.iter())
                .all(|(value, (low, high))| value >= low && value <= high);
            if in_bounds {
                return Ok(());
            }
        }
        unreachable!()
    }

    fn fill_proposal(
        &self,
        model: &mut Model,
        candidates: &mut [f64],
        lower_factor: &[Vec<f64>],
        moves: &[bool],
        step_size: f64,
    ) {
        let n = candidates.len();
        let rng = &mut model.core.rng;
        let normals: Vec<f64> = (0..n).map(|_| standard_normal(rng)).collect();
        let scales: Vec<f64> = match self.config.proposal {
            ProposalDistribution::Normal => vec![1.0; n],
            ProposalDistribution::T { df } => (0..n)
                .map(|_| 1.0 / (chi_square(rng, df) / df as f64))
                .collect(),
        };

        for i in 0..n {
            if !moves[i] {
                continue;
            }
            let mut row_sum = 0.0;
            for j in 0..n {
                row_sum += lower_factor[i][j] * normals[j] * scales[j];
            }
            candidates[i] += row_sum * step_size;
        }
    }

    fn randomise_start(
        &self,
        model: &mut Model,
        candidates: &mut [f64],
        lower_factor: &[Vec<f64>],
        moves: &[bool],
        bounds: &[(f64, f64)],
    ) -> Result<(), ModelError> {
        let original: Vec<f64> = candidates.to_vec();
        for attempt in 0.. {
            if attempt >= MAX_CANDIDATE_ATTEMPTS {
                return Err(ModelError::Numerical(
                    "failed to generate a random MCMC start after 1000 attempts".to_string(),
                ));
            }
            candidates.copy_from_slice(&original);
            self.fill_proposal(model, candidates, lower_factor, moves, self.config.start);
            let in_bounds = candidates
                .iter()
                .zip(bounds.iter())
                .all(|(value, (low, high))| value >= low && value <= high);
            if in_bounds {
                return Ok(());
            }
        }
        unreachable!()
    }

    fn evaluate(
        &self,
        model: &mut Model,
        enabled: &[usize],
        candidates: &[f64],
    ) -> Result<EvaluatedState, ModelError> {
        for (&index, &value) in enabled.iter().zip(candidates.iter()) {
            let natural = model.estimates[index].untransform(value);
            model.apply_estimate(index, natural)?;
        }
        model.run_full_iteration()?;
        let objective = model.compute_objective()?;
        Ok(EvaluatedState {
            score: objective.score,
            likelihood: objective.likelihoods,
            prior: objective.priors,
            penalty: objective.penalties,
            additional_priors: objective.additional_priors,
        })
    }

    #[allow(clippy::too_many_arguments)]
    fn make_link(
        &self,
        iteration: usize,
        state: &EvaluatedState,
        acceptance_rate: f64,
        acceptance_rate_since_adapt: f64,
        step_size: f64,
        model: &Model,
        enabled: &[usize],
        candidates: &[f64],
    ) -> ChainLink {
        let values = enabled
            .iter()
            .zip(candidates.iter())
            .map(|(&index, &value)| model.estimates[index].untransform(value))
            .collect();
        ChainLink {
            iteration,
            score: state.score,
            likelihood: state.likelihood,
            prior: state.prior,
            penalty: state.penalty,
            additional_priors: state.additional_priors,
            acceptance_rate,
            acceptance_rate_since_adapt,
            step_size,
            values,
        }
    }
}

#[derive(Debug, Clone)]
struct EvaluatedState {
    score: f64,
    likelihood: f64,
    prior: f64,
    penalty: f64,
    additional_priors: f64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::minimiser::{Minimiser, MinimiserConfig};

    fn solved_model() -> (crate::model::Model, crate::minimiser::MinimiserResult) {
        let mut model = crate::test_support::simple_estimation_model();
        model.build().unwrap();
        model.seed_rng(7);
        let minimiser = Minimiser::new(MinimiserConfig {
            population_size: 6,
            max_generations: 20,
            ..MinimiserConfig::default()
        });
        let result = minimiser.minimise(&mut model).unwrap();
        (model, result)
    }

    #[test]
    fn test_chain_emits_kept_links() {
        let (mut model, result) = solved_model();
        let mcmc = Mcmc::new(McmcConfig {
            length: 40,
            keep: 4,
            ..McmcConfig::default()
        });
        let links = mcmc.run(&mut model, &result).unwrap();

        // the starting link plus one every `keep` iterations
        assert_eq!(links.len(), 1 + 40 / 4);
        assert_eq!(links[0].iteration, 0);
        assert_eq!(links.last().unwrap().iteration, 40);
        for link in &links {
            assert!(link.score.is_finite());
            assert!((0.0..=1.0).contains(&link.acceptance_rate));
            let value = link.values[0];
            assert!(
                (100.0..=10_000.0).contains(&value),
                "chained value {} escaped the bounds",
                value
            );
        }
    }

    #[test]
    fn test_chain_is_deterministic_by_seed() {
        let run = || {
            let (mut model, result) = solved_model();
            model.seed_rng(1234);
            let mcmc = Mcmc::new(McmcConfig {
                length: 20,
                keep: 2,
                ..McmcConfig::default()
            });
            mcmc.run(&mut model, &result).unwrap()
        };
        let first = run();
        let second = run();
        assert_eq!(first.len(), second.len());
        for (a, b) in first.iter().zip(second.iter()) {
            assert_eq!(a.score.to_bits(), b.score.to_bits());
            assert_eq!(a.values[0].to_bits(), b.values[0].to_bits());
        }
    }

    #[test]
    fn test_covariance_adjustment_clips_correlation() {
        let (model, result) = solved_model();
        let mcmc = Mcmc::new(McmcConfig::default());
        // a 2x2 matrix with correlation 0.99
        let covariance = vec![vec![1.0, 0.99], vec![0.99, 1.0]];
        let enabled = vec![0, 0];
        let adjusted = mcmc.adjust_covariance(&model, &enabled, &covariance);
        assert!((adjusted[0][1] - 0.8).abs() < 1e-12);
        assert!((adjusted[1][0] - 0.8).abs() < 1e-12);
        let _ = result;
    }

    #[test]
    fn test_fixed_estimates_do_not_move() {
        let (mut model, result) = solved_model();
        model.estimates[0].mcmc_fixed = true;
        let mcmc = Mcmc::new(McmcConfig::default());
        assert!(mcmc.run(&mut model, &result).is_err());
    }
}
