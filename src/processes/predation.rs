//! Predation mortality driven by prey suitability
//!
//! Predator abundance consumes prey categories in proportion to their
//! selected availability weighted by electivity preferences. Each prey's
//! exploitation is capped at u_max with the excess penalised.

use crate::error::{DiagnosticSink, ModelError};
use crate::estimates::addressable::AddressKey;
use crate::model::{ModelCore, RunPhase};
use crate::partition::CategoryAccessor;

use super::ProcessBuildContext;

const ZERO_FUN_DELTA: f64 = 1e-10;

#[derive(Debug, Clone)]
pub struct MortalityPreySuitability {
    pub prey_category_labels: Vec<String>,
    pub prey_selectivity_labels: Vec<String>,
    /// Electivity preference per prey category
    pub electivities: Vec<f64>,
    pub predator_category_labels: Vec<String>,
    pub predator_selectivity_labels: Vec<String>,
    /// Proportion of total predator abundance consumed per year
    pub consumption_rate: f64,
    pub u_max: f64,
    pub penalty: Option<String>,
    pub years: Vec<u32>,

    prey: CategoryAccessor,
    predators: CategoryAccessor,
    prey_selectivities: Vec<usize>,
    predator_selectivities: Vec<usize>,
    penalty_index: Option<usize>,
}

impl MortalityPreySuitability {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        prey_category_labels: Vec<String>,
        prey_selectivity_labels: Vec<String>,
        electivities: Vec<f64>,
        predator_category_labels: Vec<String>,
        predator_selectivity_labels: Vec<String>,
        consumption_rate: f64,
        years: Vec<u32>,
    ) -> Self {
        Self {
            prey_category_labels,
            prey_selectivity_labels,
            electivities,
            predator_category_labels,
            predator_selectivity_labels,
            consumption_rate,
            u_max: 0.99,
            penalty: None,
            years,
            prey: CategoryAccessor::default(),
            predators: CategoryAccessor::default(),
            prey_selectivities: Vec::new(),
            predator_selectivities: Vec::new(),
            penalty_index: None,
        }
    }

    pub fn validate(&mut self, location: &str, sink: &mut DiagnosticSink) {
        if self.consumption_rate <= 0.0 || self.consumption_rate > 1.0 {
            sink.error(
                location,
                format!(
                    "consumption_rate ({}) must be greater than 0.0 and less than or equal to 1.0",
                    self.consumption_rate
                ),
            );
        }
        if self.u_max <= 0.0 || self.u_max > 1.0 {
            sink.error(
                location,
                format!("u_max ({}) must be greater than 0.0 and less than or equal to 1.0", self.u_max),
            );
        }
        if self.electivities.len() != self.prey_category_labels.len() {
            sink.error(
                location,
                format!(
                    "one electivity must be supplied per prey category; there are {} categories and {} electivities",
                    self.prey_category_labels.len(),
                    self.electivities.len()
                ),
            );
        }
        if self.prey_selectivity_labels.len() != self.prey_category_labels.len() {
            sink.error(
                location,
                format!(
                    "number of prey selectivities ({}) does not match the number of prey categories ({})",
                    self.prey_selectivity_labels.len(),
                    self.prey_category_labels.len()
                ),
            );
        }
        if self.predator_selectivity_labels.len() != self.predator_category_labels.len() {
            sink.error(
                location,
                format!(
                    "number of predator selectivities ({}) does not match the number of predator categories ({})",
                    self.predator_selectivity_labels.len(),
                    self.predator_category_labels.len()
                ),
            );
        }
        for electivity in &self.electivities {
            if *electivity < 0.0 {
                sink.error(location, format!("electivity ({}) cannot be less than 0.0", electivity));
            }
        }
    }

    pub fn build(&mut self, ctx: &ProcessBuildContext) -> Result<(), ModelError> {
        self.prey = CategoryAccessor::init(&ctx.core.partition, &self.prey_category_labels)?;
        self.predators =
            CategoryAccessor::init(&ctx.core.partition, &self.predator_category_labels)?;

        let resolve = |labels: &[String]| -> Result<Vec<usize>, ModelError> {
            labels
                .iter()
                .map(|label| {
                    ctx.core
                        .selectivity_index(label)
                        .ok_or_else(|| ModelError::UnknownLabel {
                            kind: "selectivity",
                            label: label.clone(),
                        })
                })
                .collect()
        };
        self.prey_selectivities = resolve(&self.prey_selectivity_labels)?;
        self.predator_selectivities = resolve(&self.predator_selectivity_labels)?;

        self.penalty_index = match &self.penalty {
            Some(label) => Some(ctx.core.penalty_index(label).ok_or_else(|| {
                ModelError::UnknownLabel {
                    kind: "penalty",
                    label: label.clone(),
                }
            })?),
            None => None,
        };
        Ok(())
    }

    pub fn execute(&mut self, label: &str, core: &mut ModelCore) -> Result<(), ModelError> {
        if core.state.phase != RunPhase::Execute || !self.years.contains(&core.state.current_year) {
            return Ok(());
        }

        // selected prey availability, overall and per category
        let mut vulnerable_by_prey: Vec<f64> = vec![0.0; self.prey.len()];
        let mut total_availability = 0.0;
        let mut total_prey_vulnerable = 0.0;
        for i in 0..self.prey.len() {
            let selectivity = &core.selectivities[self.prey_selectivities[i]];
            let category = core.partition.get(self.prey.index(i));
            for (offset, &numbers) in category.data.iter().enumerate() {
                let age = category.min_age + offset as u32;
                let vulnerable = (numbers * selectivity.value_at(age)).max(0.0);
                vulnerable_by_prey[i] += vulnerable;
                total_prey_vulnerable += vulnerable * self.electivities[i];
                total_availability += vulnerable;
            }
        }
        total_availability = total_availability.max(ZERO_FUN_DELTA);
        let suitability = (total_prey_vulnerable / total_availability).max(ZERO_FUN_DELTA);

        // selected predator abundance
        let mut predator_vulnerable = 0.0;
        for i in 0..self.predators.len() {
            let selectivity = &core.selectivities[self.predator_selectivities[i]];
            let category = core.partition.get(self.predators.index(i));
            for (offset, &numbers) in category.data.iter().enumerate() {
                let age = category.min_age + offset as u32;
                predator_vulnerable += (numbers * selectivity.value_at(age)).max(0.0);
            }
        }

        // exploitation per prey category from the predator's consumption
        let mut exploitation_by_prey: Vec<f64> = vec![0.0; self.prey.len()];
        for i in 0..self.prey.len() {
            let mut exploitation = predator_vulnerable
                * self.consumption_rate
                * ((vulnerable_by_prey[i] / total_availability) * self.electivities[i])
                / suitability;
            if exploitation > self.u_max {
                exploitation = self.u_max;
                if let Some(penalty_index) = self.penalty_index {
                    let event = core.penalties[penalty_index].trigger(
                        label,
                        exploitation,
                        vulnerable_by_prey[i] * self.u_max,
                    );
                    core.penalty_log.push(event);
                }
            }
            exploitation_by_prey[i] = exploitation.max(0.0);
        }

        // remove the consumed prey
        for i in 0..self.prey.len() {
            let index = self.prey.index(i);
            let selectivity = &core.selectivities[self.prey_selectivities[i]];
            let (min_age, spread) = {
                let category = core.partition.get(index);
                (category.min_age, category.data.len())
            };
            let survival: Vec<f64> = (0..spread)
                .map(|offset| {
                    1.0 - exploitation_by_prey[i] * selectivity.value_at(min_age + offset as u32)
                })
                .collect();
            let category = core.partition.get_mut(index);
            for (value, factor) in category.data.iter_mut().zip(survival.iter()) {
                *value *= factor;
            }
        }
        Ok(())
    }

    pub fn addressable(&self, name: &str, key: &AddressKey) -> Option<f64> {
        match (name, key) {
            ("consumption_rate", _) => Some(self.consumption_rate),
            ("u_max", _) => Some(self.u_max),
            ("electivities", AddressKey::Index(i)) => self.electivities.get(*i).copied(),
            _ => None,
        }
    }

    pub fn set_addressable(&mut self, name: &str, key: &AddressKey, value: f64) -> bool {
        match (name, key) {
            ("consumption_rate", _) => self.consumption_rate = value,
            ("u_max", _) => self.u_max = value,
            ("electivities", AddressKey::Index(i)) if *i < self.electivities.len() => {
                self.electivities[*i] = value
            }
            _ => return false,
        }
        true
    }

}
