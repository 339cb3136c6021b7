//! Numerical minimiser
//!
//! A self-contained differential-evolution engine over the transformed
//! estimate space. Candidates evolve with the best/1/exp strategy; bounds
//! are enforced by clamping in the transformed space. At the solution a
//! finite-difference Hessian provides the covariance approximation the
//! MCMC starts from.
//!
//! The minimiser only talks to the model through the evaluator contract:
//! set the enabled estimates, run a full iteration, read the objective.

use log::{debug, info, warn};
use rand::Rng;

use crate::error::ModelError;
use crate::model::Model;
use crate::numeric::invert_spd;

/// Energy assigned to candidates whose evaluation failed
const INFEASIBLE_ENERGY: f64 = 1e20;
/// Consecutive stagnant generations treated as convergence
const STAGNANT_GENERATIONS: usize = 30;

#[derive(Debug, Clone)]
pub struct MinimiserConfig {
    /// Population size; 0 selects 5 candidates per free parameter
    pub population_size: usize,
    pub difference_scale: f64,
    pub crossover_probability: f64,
    pub max_generations: usize,
    pub tolerance: f64,
    /// Skip the covariance pass (profile steps re-minimise constantly)
    pub covariance: bool,
}

impl Default for MinimiserConfig {
    fn default() -> Self {
        Self {
            population_size: 0,
            difference_scale: 0.7,
            crossover_probability: 0.5,
            max_generations: 1000,
            tolerance: 1e-6,
            covariance: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MinimiserStatus {
    Success,
    StepTooSmall,
    TooManyIterations,
    LocalInfeasibility,
    Error,
}

#[derive(Debug, Clone)]
pub struct MinimiserResult {
    /// Labels of the estimates that were searched, in order
    pub estimate_labels: Vec<String>,
    /// Natural-scale solution values
    pub values: Vec<f64>,
    /// Transformed-scale solution values
    pub transformed: Vec<f64>,
    pub score: f64,
    pub status: MinimiserStatus,
    /// Covariance approximation in the transformed space
    pub covariance: Vec<Vec<f64>>,
    pub evaluations: usize,
}

#[derive(Debug, Clone, Default)]
pub struct Minimiser {
    pub config: MinimiserConfig,
}

impl Minimiser {
    pub fn new(config: MinimiserConfig) -> Self {
        Self { config }
    }

    /// Minimise the objective over every enabled estimate, honouring
    /// estimation phases: phase N searches all estimates with
    /// `estimation_phase <= N`, starting from the phase N-1 solution.
    pub fn minimise(&self, model: &mut Model) -> Result<MinimiserResult, ModelError> {
        let max_phase = model
            .estimates
            .iter()
            .filter(|e| !e.is_fixed())
            .map(|e| e.estimation_phase)
            .max()
            .unwrap_or(1);

        let mut result = None;
        for phase in 1..=max_phase {
            let enabled: Vec<usize> = model
                .estimates
                .iter()
                .enumerate()
                .filter(|(_, e)| !e.is_fixed() && e.enabled_in_phase(phase))
                .map(|(i, _)| i)
                .collect();
            if enabled.is_empty() {
                continue;
            }
            info!("estimation phase {} over {} free parameters", phase, enabled.len());
            result = Some(self.run_phase(model, &enabled)?);
        }

        result.ok_or_else(|| {
            ModelError::Numerical("no enabled estimates to minimise".to_string())
        })
    }

    fn run_phase(&self, model: &mut Model, enabled: &[usize]) -> Result<MinimiserResult, ModelError> {
        let dimensions = enabled.len();
        let population_size = if self.config.population_size == 0 {
            (5 * dimensions).max(10)
        } else {
            self.config.population_size.max(4)
        };

        // transformed start point and bounds
        let mut start = Vec::with_capacity(dimensions);
        let mut lower = Vec::with_capacity(dimensions);
        let mut upper = Vec::with_capacity(dimensions);
        for &index in enabled {
            let estimate = &model.estimates[index];
            let value = model.get_addressable(estimate.target())?;
            start.push(estimate.transform(value));
            let (low, high) = estimate.transformed_bounds();
            lower.push(low);
            upper.push(high);
        }

        let mut evaluations = 0usize;
        let mut best_solution = start.clone();
        let mut best_energy =
            self.evaluate(model, enabled, &best_solution, &mut evaluations)?;

        // population seeded uniformly inside the transformed bounds
        let mut population: Vec<Vec<f64>> = (0..population_size)
            .map(|_| {
                (0..dimensions)
                    .map(|j| {
                        let u: f64 = model.core.rng.random();
                        lower[j] + u * (upper[j] - lower[j])
                    })
                    .collect()
            })
            .collect();
        population[0] = start;
        let mut population_energy = vec![INFEASIBLE_ENERGY; population_size];

        let mut status = MinimiserStatus::TooManyIterations;
        let mut stagnant = 0usize;

        for generation in 0..self.config.max_generations {
            let previous_best = best_energy;

            for candidate in 0..population_size {
                let trial = self.best_1_exp(
                    model,
                    &population,
                    candidate,
                    &best_solution,
                    &lower,
                    &upper,
                );
                let energy = self.evaluate(model, enabled, &trial, &mut evaluations)?;
                if energy < population_energy[candidate] {
                    population[candidate] = trial.clone();
                    population_energy[candidate] = energy;
                    if energy < best_energy {
                        best_energy = energy;
                        best_solution = trial;
                    }
                }
            }

            let improvement = previous_best - best_energy;
            if improvement.abs() < self.config.tolerance * (best_energy.abs() + self.config.tolerance)
            {
                stagnant += 1;
            } else {
                stagnant = 0;
            }
            debug!(
                "generation {}: best energy {} (improvement {})",
                generation, best_energy, improvement
            );

            if stagnant >= STAGNANT_GENERATIONS {
                status = MinimiserStatus::Success;
                break;
            }

            // a collapsed population can no longer move
            let spread: f64 = (0..dimensions)
                .map(|j| {
                    let (min, max) = population.iter().fold((f64::MAX, f64::MIN), |acc, p| {
                        (acc.0.min(p[j]), acc.1.max(p[j]))
                    });
                    max - min
                })
                .fold(0.0_f64, f64::max);
            if spread < 1e-12 {
                status = MinimiserStatus::StepTooSmall;
                break;
            }
        }

        if best_energy >= INFEASIBLE_ENERGY {
            status = MinimiserStatus::LocalInfeasibility;
        }

        // leave the model at the solution
        let final_energy = self.evaluate(model, enabled, &best_solution, &mut evaluations)?;
        if (final_energy - best_energy).abs() > 1e-9 {
            warn!(
                "objective is not reproducible at the solution ({} vs {})",
                final_energy, best_energy
            );
            status = MinimiserStatus::Error;
        }

        let covariance = if self.config.covariance {
            self.approximate_covariance(
                model,
                enabled,
                &best_solution,
                best_energy,
                &mut evaluations,
            )?
        } else {
            vec![vec![0.0; dimensions]; dimensions]
        };

        let values: Vec<f64> = enabled
            .iter()
            .zip(best_solution.iter())
            .map(|(&index, &transformed)| model.estimates[index].untransform(transformed))
            .collect();
        let estimate_labels = enabled
            .iter()
            .map(|&index| model.estimates[index].label.clone())
            .collect();

        Ok(MinimiserResult {
            estimate_labels,
            values,
            transformed: best_solution,
            score: best_energy,
            status,
            covariance,
            evaluations,
        })
    }

    /// best/1/exp trial vector generation with bound clamping
    fn best_1_exp(
        &self,
        model: &mut Model,
        population: &[Vec<f64>],
        candidate: usize,
        best_solution: &[f64],
        lower: &[f64],
        upper: &[f64],
    ) -> Vec<f64> {
        let population_size = population.len();
        let rng = &mut model.core.rng;

        let mut r1 = candidate;
        while r1 == candidate {
            r1 = (rng.random::<f64>() * population_size as f64) as usize % population_size;
        }
        let mut r2 = candidate;
        while r2 == candidate || r2 == r1 {
            r2 = (rng.random::<f64>() * population_size as f64) as usize % population_size;
        }

        let mut trial = population[candidate].clone();
        for j in 0..trial.len() {
            if rng.random::<f64>() < self.config.crossover_probability {
                trial[j] = best_solution[j]
                    + self.config.difference_scale * (population[r1][j] - population[r2][j]);
                trial[j] = trial[j].clamp(lower[j], upper[j]);
            }
        }
        trial
    }

    /// Set the estimates from a transformed candidate, run a full
    /// iteration and return the objective. Failed iterations score as
    /// infeasible rather than aborting the search.
    fn evaluate(
        &self,
        model: &mut Model,
        enabled: &[usize],
        transformed: &[f64],
        evaluations: &mut usize,
    ) -> Result<f64, ModelError> {
        *evaluations += 1;
        for (&index, &value) in enabled.iter().zip(transformed.iter()) {
            let natural = model.estimates[index].untransform(value);
            model.apply_estimate(index, natural)?;
        }
        match model.run_full_iteration() {
            Ok(()) => Ok(model.compute_objective()?.score),
            Err(ModelError::Numerical(reason)) => {
                debug!("candidate rejected: {}", reason);
                Ok(INFEASIBLE_ENERGY)
            }
            Err(error) => Err(error),
        }
    }

    /// Covariance from the inverse finite-difference Hessian at the
    /// solution, falling back to a diagonal approximation when the
    /// Hessian is not positive definite.
    fn approximate_covariance(
        &self,
        model: &mut Model,
        enabled: &[usize],
        solution: &[f64],
        solution_energy: f64,
        evaluations: &mut usize,
    ) -> Result<Vec<Vec<f64>>, ModelError> {
        let dimensions = solution.len();
        let steps: Vec<f64> = solution
            .iter()
            .map(|x| (1e-3 * x.abs()).max(1e-4))
            .collect();

        let mut point = solution.to_vec();
        let mut hessian = vec![vec![0.0; dimensions]; dimensions];

        for i in 0..dimensions {
            // diagonal second difference
            point[i] = solution[i] + steps[i];
            let forward = self.evaluate(model, enabled, &point, evaluations)?;
            point[i] = solution[i] - steps[i];
            let backward = self.evaluate(model, enabled, &point, evaluations)?;
            point[i] = solution[i];
            hessian[i][i] = (forward - 2.0 * solution_energy + backward) / (steps[i] * steps[i]);

            for j in 0..i {
                point[i] = solution[i] + steps[i];
                point[j] = solution[j] + steps[j];
                let plus_plus = self.evaluate(model, enabled, &point, evaluations)?;
                point[j] = solution[j] - steps[j];
                let plus_minus = self.evaluate(model, enabled, &point, evaluations)?;
                point[i] = solution[i] - steps[i];
                let minus_minus = self.evaluate(model, enabled, &point, evaluations)?;
                point[j] = solution[j] + steps[j];
                let minus_plus = self.evaluate(model, enabled, &point, evaluations)?;
                point[i] = solution[i];
                point[j] = solution[j];

                let value = (plus_plus - plus_minus - minus_plus + minus_minus)
                    / (4.0 * steps[i] * steps[j]);
                hessian[i][j] = value;
                hessian[j][i] = value;
            }
        }

        if let Some(covariance) = invert_spd(&hessian) {
            return Ok(covariance);
        }
        warn!("Hessian is not positive definite; using a diagonal covariance approximation");
        let mut covariance = vec![vec![0.0; dimensions]; dimensions];
        for i in 0..dimensions {
            covariance[i][i] = if hessian[i][i] > 0.0 {
                1.0 / hessian[i][i]
            } else {
                steps[i] * steps[i]
            };
        }
        Ok(covariance)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Put the model at a perfect-fit optimum by observing its own
    /// expected values, then start the search away from it.
    fn prepared_model(start_r0: f64) -> crate::model::Model {
        let mut model = crate::test_support::simple_estimation_model();
        model.build().unwrap();
        model.run_full_iteration().unwrap();

        let expected: Vec<(u32, f64)> = model.observations[0]
            .comparisons()
            .iter()
            .map(|(year, comparisons)| (*year, comparisons[0].expected))
            .collect();
        for (year, value) in expected {
            model.observations[0].observed.insert(year, vec![value]);
        }
        model.apply_estimate(0, start_r0).unwrap();
        model
    }

    #[test]
    fn test_minimiser_recovers_known_parameter() {
        let mut model = prepared_model(400.0);
        let initial = model.evaluate().unwrap().score;

        let minimiser = Minimiser::new(MinimiserConfig {
            population_size: 8,
            max_generations: 60,
            ..MinimiserConfig::default()
        });
        let result = minimiser.minimise(&mut model).unwrap();

        assert!(result.score <= initial + 1e-9, "{} vs {}", result.score, initial);
        // the optimum sits at the generating r0
        assert!(
            (result.values[0] - 1000.0).abs() < 100.0,
            "recovered r0 {}",
            result.values[0]
        );
        assert_eq!(result.covariance.len(), 1);
        assert!(result.covariance[0][0] > 0.0);
        assert!(matches!(
            result.status,
            MinimiserStatus::Success | MinimiserStatus::TooManyIterations
        ));
    }

    #[test]
    fn test_minimiser_is_deterministic_by_seed() {
        let run = || {
            let mut model = prepared_model(400.0);
            model.seed_rng(99);
            let minimiser = Minimiser::new(MinimiserConfig {
                population_size: 6,
                max_generations: 15,
                covariance: false,
                ..MinimiserConfig::default()
            });
            minimiser.minimise(&mut model).unwrap()
        };
        let first = run();
        let second = run();
        assert_eq!(first.score.to_bits(), second.score.to_bits());
        assert_eq!(first.values[0].to_bits(), second.values[0].to_bits());
    }

    #[test]
    fn test_minimiser_requires_free_estimates() {
        let mut model = crate::test_support::simple_estimation_model();
        model.build().unwrap();
        model.estimates[0].lower_bound = 1000.0;
        model.estimates[0].upper_bound = 1000.0;
        let minimiser = Minimiser::default();
        assert!(minimiser.minimise(&mut model).is_err());
    }
}
