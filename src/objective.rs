//! The objective function
//!
//! Assembles the total score of a completed iteration: observation
//! likelihoods, estimate priors, additional priors, and the process
//! penalties accumulated during execution.

use crate::error::ModelError;
use crate::estimates::addressable::parse_path;
use crate::model::Model;

/// One labelled contribution to the objective
#[derive(Debug, Clone)]
pub struct ObjectiveComponent {
    pub label: String,
    pub score: f64,
}

/// The assembled objective of one full iteration
#[derive(Debug, Clone, Default)]
pub struct ObjectiveFunction {
    pub score: f64,
    pub likelihoods: f64,
    pub priors: f64,
    pub penalties: f64,
    pub additional_priors: f64,
    pub components: Vec<ObjectiveComponent>,
}

impl Model {
    /// Compute the objective for the current iteration's results
    pub fn compute_objective(&self) -> Result<ObjectiveFunction, ModelError> {
        let mut objective = ObjectiveFunction::default();

        for observation in &self.observations {
            let score = observation.total_score();
            objective.likelihoods += score;
            objective.components.push(ObjectiveComponent {
                label: format!("observation->{}", observation.label),
                score,
            });
        }

        for estimate in &self.estimates {
            if estimate.prior.is_none() {
                continue;
            }
            let value = self.get_addressable(estimate.target())?;
            let score = estimate.prior_score(value);
            objective.priors += score;
            objective.components.push(ObjectiveComponent {
                label: format!("prior->{}", estimate.label),
                score,
            });
        }

        for additional_prior in &self.core.additional_priors {
            let target = parse_path(&additional_prior.parameter)?;
            let values = match self.get_addressable_vector(
                target.block,
                &target.label,
                &target.parameter,
            ) {
                Ok(values) => values,
                Err(_) => vec![self.get_addressable(&target)?],
            };
            let score = additional_prior.score(&values);
            objective.additional_priors += score;
            objective.components.push(ObjectiveComponent {
                label: format!("additional_prior->{}", additional_prior.label),
                score,
            });
        }

        for event in &self.core.penalty_log {
            objective.penalties += event.score;
            objective.components.push(ObjectiveComponent {
                label: format!("penalty->{}->{}", event.penalty, event.source),
                score: event.score,
            });
        }

        objective.score = objective.likelihoods
            + objective.priors
            + objective.additional_priors
            + objective.penalties;
        Ok(objective)
    }

    /// Run a full iteration and return its objective score
    pub fn evaluate(&mut self) -> Result<ObjectiveFunction, ModelError> {
        self.run_full_iteration()?;
        self.compute_objective()
    }
}
