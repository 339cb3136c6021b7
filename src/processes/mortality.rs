//! Mortality processes
//!
//! Constant-rate mortality applies a selectivity-shaped exponential decay
//! with per-time-step ratios of M. Instantaneous mortality removes observed
//! catches inside a natural-mortality split, capping exploitation at U_max
//! and penalising the shortfall.

use std::collections::{BTreeMap, HashMap};

use log::debug;

use crate::error::{DiagnosticSink, ModelError};
use crate::estimates::addressable::AddressKey;
use crate::model::{ModelCore, RunPhase};
use crate::partition::CategoryAccessor;

use super::ProcessBuildContext;

/// Guard against division by a zero vulnerable biomass
const ZERO_FUN_DELTA: f64 = 1e-10;

/// `n[a] <- n[a] * exp(-M * ratio * sel(a))` per category per time step
#[derive(Debug, Clone)]
pub struct MortalityConstantRate {
    pub category_labels: Vec<String>,
    /// One M per category, or a single value applied to all
    pub m: Vec<f64>,
    pub selectivity_labels: Vec<String>,
    /// Relative amount of M applied in each time step containing this
    /// process; rescaled to sum to one
    pub ratios: Vec<f64>,

    accessor: CategoryAccessor,
    selectivities: Vec<usize>,
    time_step_ratios: HashMap<usize, f64>,
}

impl MortalityConstantRate {
    pub fn new(category_labels: Vec<String>, m: Vec<f64>, selectivity_labels: Vec<String>) -> Self {
        Self {
            category_labels,
            m,
            selectivity_labels,
            ratios: Vec::new(),
            accessor: CategoryAccessor::default(),
            selectivities: Vec::new(),
            time_step_ratios: HashMap::new(),
        }
    }

    pub fn validate(&mut self, location: &str, sink: &mut DiagnosticSink) {
        if self.m.len() == 1 {
            self.m = vec![self.m[0]; self.category_labels.len()];
        }
        if self.selectivity_labels.len() == 1 {
            self.selectivity_labels =
                vec![self.selectivity_labels[0].clone(); self.category_labels.len()];
        }
        if self.m.len() != self.category_labels.len() {
            sink.error(
                location,
                format!(
                    "number of Ms provided is not the same as the number of categories; expected {} but got {}",
                    self.category_labels.len(),
                    self.m.len()
                ),
            );
        }
        if self.selectivity_labels.len() != self.category_labels.len() {
            sink.error(
                location,
                format!(
                    "number of selectivities provided is not the same as the number of categories; expected {} but got {}",
                    self.category_labels.len(),
                    self.selectivity_labels.len()
                ),
            );
        }
        for m in &self.m {
            if *m < 0.0 {
                sink.error(location, format!("m value ({}) cannot be less than 0.0", m));
            }
        }
    }

    pub fn build(&mut self, label: &str, ctx: &ProcessBuildContext) -> Result<(), ModelError> {
        self.accessor = CategoryAccessor::init(&ctx.core.partition, &self.category_labels)?;

        self.selectivities.clear();
        for selectivity_label in &self.selectivity_labels {
            let index = ctx.core.selectivity_index(selectivity_label).ok_or_else(|| {
                ModelError::UnknownLabel {
                    kind: "selectivity",
                    label: selectivity_label.clone(),
                }
            })?;
            self.selectivities.push(index);
        }

        // one ratio per time step this process appears in, rescaled to 1.0
        let active_steps = ctx.time_steps_with(label);
        self.time_step_ratios.clear();
        if self.ratios.is_empty() {
            for step in &active_steps {
                self.time_step_ratios.insert(*step, 1.0);
            }
        } else {
            if self.ratios.len() != active_steps.len() {
                return Err(ModelError::Numerical(format!(
                    "time_step_ratio length ({}) does not match the number of time steps this process has been assigned to ({})",
                    self.ratios.len(),
                    active_steps.len()
                )));
            }
            for ratio in &self.ratios {
                if *ratio <= 0.0 || *ratio > 1.0 {
                    return Err(ModelError::Numerical(format!(
                        "time_step_ratio value ({}) must be between 0.0 (exclusive) and 1.0 (inclusive)",
                        ratio
                    )));
                }
            }
            let sum: f64 = self.ratios.iter().sum();
            for (i, step) in active_steps.iter().enumerate() {
                self.time_step_ratios.insert(*step, self.ratios[i] / sum);
            }
        }
        Ok(())
    }

    pub fn execute(&mut self, core: &mut ModelCore) -> Result<(), ModelError> {
        let ratio = self
            .time_step_ratios
            .get(&core.state.time_step)
            .copied()
            .unwrap_or(1.0);

        for i in 0..self.accessor.len() {
            let m = self.m[i];
            let selectivity = &core.selectivities[self.selectivities[i]];
            let category = core.partition.get_mut(self.accessor.index(i));
            let min_age = category.min_age;
            for (offset, value) in category.data.iter_mut().enumerate() {
                let age = min_age + offset as u32;
                *value *= (-selectivity.value_at(age) * m * ratio).exp();
            }
        }
        Ok(())
    }

    pub fn addressable(&self, name: &str, key: &AddressKey) -> Option<f64> {
        match (name, key) {
            ("m", AddressKey::Index(i)) => self.m.get(*i).copied(),
            ("m", AddressKey::None) => self.m.first().copied(),
            _ => None,
        }
    }

    pub fn set_addressable(&mut self, name: &str, key: &AddressKey, value: f64) -> bool {
        match (name, key) {
            ("m", AddressKey::Index(i)) if *i < self.m.len() => self.m[*i] = value,
            ("m", AddressKey::None) => self.m.iter_mut().for_each(|m| *m = value),
            _ => return false,
        }
        true
    }

    pub fn addressable_vector(&self, name: &str) -> Option<Vec<f64>> {
        match name {
            "m" => Some(self.m.clone()),
            _ => None,
        }
    }
}

/// One fishery removing catch through this process
#[derive(Debug, Clone)]
pub struct Fishery {
    pub label: String,
    pub time_step: String,
    pub category_labels: Vec<String>,
    pub selectivity_labels: Vec<String>,
    /// Catch by model year; years absent take no catch
    pub catches: BTreeMap<u32, f64>,
    pub u_max: f64,
    pub penalty: Option<String>,

    // built state
    time_step_index: usize,
    selectivities: Vec<usize>,
    penalty_index: Option<usize>,
}

impl Fishery {
    pub fn new(
        label: impl Into<String>,
        time_step: impl Into<String>,
        category_labels: Vec<String>,
        selectivity_labels: Vec<String>,
        catches: BTreeMap<u32, f64>,
    ) -> Self {
        Self {
            label: label.into(),
            time_step: time_step.into(),
            category_labels,
            selectivity_labels,
            catches,
            u_max: 0.99,
            penalty: None,
            time_step_index: 0,
            selectivities: Vec::new(),
            penalty_index: None,
        }
    }

    fn selectivity_for(&self, category_position: usize) -> usize {
        self.selectivities[category_position]
    }
}

/// Catch-driven instantaneous mortality with a natural-mortality split
#[derive(Debug, Clone)]
pub struct MortalityInstantaneous {
    pub category_labels: Vec<String>,
    /// One M per category, or a single value applied to all
    pub m: Vec<f64>,
    pub ratios: Vec<f64>,
    pub fisheries: Vec<Fishery>,

    accessor: CategoryAccessor,
    time_step_ratios: HashMap<usize, f64>,
}

impl MortalityInstantaneous {
    pub fn new(category_labels: Vec<String>, m: Vec<f64>, fisheries: Vec<Fishery>) -> Self {
        Self {
            category_labels,
            m,
            ratios: Vec::new(),
            fisheries,
            accessor: CategoryAccessor::default(),
            time_step_ratios: HashMap::new(),
        }
    }

    pub fn validate(&mut self, location: &str, sink: &mut DiagnosticSink) {
        if self.m.len() == 1 {
            self.m = vec![self.m[0]; self.category_labels.len()];
        }
        if self.m.len() != self.category_labels.len() {
            sink.error(
                location,
                format!(
                    "number of Ms provided is not the same as the number of categories; expected {} but got {}",
                    self.category_labels.len(),
                    self.m.len()
                ),
            );
        }
        for fishery in &self.fisheries {
            if fishery.u_max <= 0.0 || fishery.u_max > 1.0 {
                sink.error(
                    location,
                    format!(
                        "u_max ({}) for fishery '{}' must be greater than 0.0 and less than or equal to 1.0",
                        fishery.u_max, fishery.label
                    ),
                );
            }
            if fishery.category_labels.len() != fishery.selectivity_labels.len() {
                sink.error(
                    location,
                    format!(
                        "fishery '{}' must supply one selectivity per category; got {} categories and {} selectivities",
                        fishery.label,
                        fishery.category_labels.len(),
                        fishery.selectivity_labels.len()
                    ),
                );
            }
            for category in &fishery.category_labels {
                if !self.category_labels.contains(category) {
                    sink.error(
                        location,
                        format!(
                            "fishery '{}' category '{}' is not in the process category list",
                            fishery.label, category
                        ),
                    );
                }
            }
        }
    }

    pub fn build(&mut self, label: &str, ctx: &ProcessBuildContext) -> Result<(), ModelError> {
        self.accessor = CategoryAccessor::init(&ctx.core.partition, &self.category_labels)?;

        for fishery in &mut self.fisheries {
            fishery.time_step_index = ctx
                .core
                .calendar
                .time_step_index(&fishery.time_step)
                .ok_or_else(|| ModelError::UnknownLabel {
                    kind: "time step",
                    label: fishery.time_step.clone(),
                })?;
            fishery.selectivities.clear();
            for selectivity_label in &fishery.selectivity_labels {
                let index = ctx.core.selectivity_index(selectivity_label).ok_or_else(|| {
                    ModelError::UnknownLabel {
                        kind: "selectivity",
                        label: selectivity_label.clone(),
                    }
                })?;
                fishery.selectivities.push(index);
            }
            fishery.penalty_index = match &fishery.penalty {
                Some(penalty_label) => {
                    Some(ctx.core.penalty_index(penalty_label).ok_or_else(|| {
                        ModelError::UnknownLabel {
                            kind: "penalty",
                            label: penalty_label.clone(),
                        }
                    })?)
                }
                None => None,
            };
        }

        let active_steps = ctx.time_steps_with(label);
        self.time_step_ratios.clear();
        if self.ratios.is_empty() {
            let ratio = 1.0 / active_steps.len().max(1) as f64;
            for step in &active_steps {
                self.time_step_ratios.insert(*step, ratio);
            }
        } else {
            if self.ratios.len() != active_steps.len() {
                return Err(ModelError::Numerical(format!(
                    "time_step_ratio length ({}) does not match the number of time steps this process has been assigned to ({})",
                    self.ratios.len(),
                    active_steps.len()
                )));
            }
            let sum: f64 = self.ratios.iter().sum();
            for (i, step) in active_steps.iter().enumerate() {
                self.time_step_ratios.insert(*step, self.ratios[i] / sum);
            }
        }
        Ok(())
    }

    pub fn execute(&mut self, label: &str, core: &mut ModelCore) -> Result<(), ModelError> {
        let time_step = core.state.time_step;
        let year = core.state.current_year;
        let ratio = self.time_step_ratios.get(&time_step).copied().unwrap_or(1.0);

        // exploitation per (category position, age offset)
        let spread = core.age_spread();
        let mut exploitation_by_category: Vec<Vec<f64>> =
            vec![vec![0.0; spread]; self.category_labels.len()];

        let active = core.state.phase == RunPhase::Execute
            && self
                .fisheries
                .iter()
                .any(|f| f.time_step_index == time_step && f.catches.contains_key(&year));

        if active {
            // vulnerable biomass per fishery after the first half of M
            let mut vulnerability: Vec<f64> = vec![0.0; self.fisheries.len()];
            for (fishery_position, fishery) in self.fisheries.iter().enumerate() {
                if fishery.time_step_index != time_step || !fishery.catches.contains_key(&year) {
                    continue;
                }
                for (fishery_category, category_label) in fishery.category_labels.iter().enumerate()
                {
                    let position = self
                        .category_labels
                        .iter()
                        .position(|l| l == category_label)
                        .expect("validated fishery category");
                    let m = self.m[position];
                    let selectivity =
                        &core.selectivities[fishery.selectivity_for(fishery_category)];
                    let category = core.partition.get(self.accessor.index(position));
                    for (offset, &numbers) in category.data.iter().enumerate() {
                        let age = category.min_age + offset as u32;
                        let survived = numbers * (-0.5 * m * ratio).exp();
                        vulnerability[fishery_position] += survived
                            * category.mean_weight(time_step, age)
                            * selectivity.value_at(age);
                    }
                }
            }

            // u[f] = catch / vulnerable, then u[c,a] summed over fisheries
            let mut fishery_exploitation: Vec<f64> = vec![0.0; self.fisheries.len()];
            for (fishery_position, fishery) in self.fisheries.iter().enumerate() {
                let Some(catch) = fishery.catches.get(&year) else {
                    continue;
                };
                if fishery.time_step_index != time_step {
                    continue;
                }
                fishery_exploitation[fishery_position] =
                    catch / vulnerability[fishery_position].max(ZERO_FUN_DELTA);
            }

            // first pass of age-level exploitation
            self.accumulate_age_exploitation(
                core,
                &fishery_exploitation,
                &mut exploitation_by_category,
            );

            // rescale any fishery whose maximum age exploitation exceeds
            // u_max, trigger its penalty with the lost catch, and recompute
            let mut recalculate = false;
            for (fishery_position, fishery) in self.fisheries.iter().enumerate() {
                if fishery_exploitation[fishery_position] == 0.0 {
                    continue;
                }
                let mut u_observed: f64 = 0.0;
                for category_label in &fishery.category_labels {
                    let position = self
                        .category_labels
                        .iter()
                        .position(|l| l == category_label)
                        .expect("validated fishery category");
                    for &u in &exploitation_by_category[position] {
                        u_observed = u_observed.max(u);
                    }
                }
                if u_observed > fishery.u_max {
                    fishery_exploitation[fishery_position] *= fishery.u_max / u_observed;
                    recalculate = true;
                    debug!(
                        "fishery {} exceeded u_max ({} > {}) in year {}",
                        fishery.label, u_observed, fishery.u_max, year
                    );
                    if let Some(penalty_index) = fishery.penalty_index {
                        let catch = fishery.catches.get(&year).copied().unwrap_or(0.0);
                        let event = core.penalties[penalty_index].trigger(
                            label,
                            catch,
                            vulnerability[fishery_position] * fishery.u_max,
                        );
                        core.penalty_log.push(event);
                    }
                }
            }
            if recalculate {
                self.accumulate_age_exploitation(
                    core,
                    &fishery_exploitation,
                    &mut exploitation_by_category,
                );
            }
        }

        // removal: survivors of the exploitation inside the split M; the
        // per-fishery rescale above already bounded u[c,a]
        for position in 0..self.category_labels.len() {
            let m = self.m[position];
            let category = core.partition.get_mut(self.accessor.index(position));
            for (offset, value) in category.data.iter_mut().enumerate() {
                let u = exploitation_by_category[position][offset];
                *value *= (-0.5 * m * ratio).exp() * (1.0 - u) * (-0.5 * m * ratio).exp();
            }
        }
        Ok(())
    }

    /// `u[c,a] = sum over fisheries of u[f] * sel_f(a)`
    fn accumulate_age_exploitation(
        &self,
        core: &ModelCore,
        fishery_exploitation: &[f64],
        exploitation_by_category: &mut [Vec<f64>],
    ) {
        for row in exploitation_by_category.iter_mut() {
            row.iter_mut().for_each(|u| *u = 0.0);
        }
        for (fishery_position, fishery) in self.fisheries.iter().enumerate() {
            if fishery_exploitation[fishery_position] == 0.0 {
                continue;
            }
            for (fishery_category, category_label) in fishery.category_labels.iter().enumerate() {
                let position = self
                    .category_labels
                    .iter()
                    .position(|l| l == category_label)
                    .expect("validated fishery category");
                let selectivity = &core.selectivities[fishery.selectivity_for(fishery_category)];
                let category = core.partition.get(self.accessor.index(position));
                for offset in 0..exploitation_by_category[position].len() {
                    let age = category.min_age + offset as u32;
                    exploitation_by_category[position][offset] +=
                        fishery_exploitation[fishery_position] * selectivity.value_at(age);
                }
            }
        }
    }

    pub fn addressable(&self, name: &str, key: &AddressKey) -> Option<f64> {
        match (name, key) {
            ("m", AddressKey::Index(i)) => self.m.get(*i).copied(),
            ("m", AddressKey::None) => self.m.first().copied(),
            ("u_max", _) => self.fisheries.first().map(|f| f.u_max),
            _ => None,
        }
    }

    pub fn set_addressable(&mut self, name: &str, key: &AddressKey, value: f64) -> bool {
        match (name, key) {
            ("m", AddressKey::Index(i)) if *i < self.m.len() => self.m[*i] = value,
            ("m", AddressKey::None) => self.m.iter_mut().for_each(|m| *m = value),
            ("u_max", _) => self.fisheries.iter_mut().for_each(|f| f.u_max = value),
            _ => return false,
        }
        true
    }
}

/// Removes a specified biomass in given years as a single event
///
/// The event's exploitation is `catch / vulnerable biomass`, capped at
/// u_max with the shortfall penalised, and removed as
/// `n[a] <- n[a] * (1 - u * sel(a))`.
#[derive(Debug, Clone)]
pub struct MortalityEventBiomass {
    pub category_labels: Vec<String>,
    pub selectivity_labels: Vec<String>,
    pub catches: BTreeMap<u32, f64>,
    pub u_max: f64,
    pub penalty: Option<String>,

    accessor: CategoryAccessor,
    selectivities: Vec<usize>,
    penalty_index: Option<usize>,
}

impl MortalityEventBiomass {
    pub fn new(
        category_labels: Vec<String>,
        selectivity_labels: Vec<String>,
        catches: BTreeMap<u32, f64>,
    ) -> Self {
        Self {
            category_labels,
            selectivity_labels,
            catches,
            u_max: 0.99,
            penalty: None,
            accessor: CategoryAccessor::default(),
            selectivities: Vec::new(),
            penalty_index: None,
        }
    }

    pub fn validate(&mut self, location: &str, sink: &mut DiagnosticSink) {
        if self.selectivity_labels.len() == 1 {
            self.selectivity_labels =
                vec![self.selectivity_labels[0].clone(); self.category_labels.len()];
        }
        if self.selectivity_labels.len() != self.category_labels.len() {
            sink.error(
                location,
                format!(
                    "number of selectivities provided is not the same as the number of categories; expected {} but got {}",
                    self.category_labels.len(),
                    self.selectivity_labels.len()
                ),
            );
        }
        if self.u_max <= 0.0 || self.u_max > 1.0 {
            sink.error(
                location,
                format!("u_max ({}) must be greater than 0.0 and less than or equal to 1.0", self.u_max),
            );
        }
        for (year, catch) in &self.catches {
            if *catch < 0.0 {
                sink.error(location, format!("catch ({}) in year {} cannot be negative", catch, year));
            }
        }
    }

    pub fn build(&mut self, ctx: &ProcessBuildContext) -> Result<(), ModelError> {
        self.accessor = CategoryAccessor::init(&ctx.core.partition, &self.category_labels)?;
        self.selectivities.clear();
        for label in &self.selectivity_labels {
            let index =
                ctx.core
                    .selectivity_index(label)
                    .ok_or_else(|| ModelError::UnknownLabel {
                        kind: "selectivity",
                        label: label.clone(),
                    })?;
            self.selectivities.push(index);
        }
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
        if core.state.phase != RunPhase::Execute {
            return Ok(());
        }
        let year = core.state.current_year;
        let Some(&catch) = self.catches.get(&year) else {
            return Ok(());
        };
        let time_step = core.state.time_step;

        let mut vulnerable = 0.0;
        for i in 0..self.accessor.len() {
            let selectivity = &core.selectivities[self.selectivities[i]];
            let category = core.partition.get(self.accessor.index(i));
            for (offset, &numbers) in category.data.iter().enumerate() {
                let age = category.min_age + offset as u32;
                vulnerable +=
                    numbers * category.mean_weight(time_step, age) * selectivity.value_at(age);
            }
        }

        let mut exploitation = catch / vulnerable.max(ZERO_FUN_DELTA);
        if exploitation > self.u_max {
            exploitation = self.u_max;
            if let Some(penalty_index) = self.penalty_index {
                let event =
                    core.penalties[penalty_index].trigger(label, catch, vulnerable * self.u_max);
                core.penalty_log.push(event);
            }
        }

        for i in 0..self.accessor.len() {
            let index = self.accessor.index(i);
            let selectivity = &core.selectivities[self.selectivities[i]];
            let (min_age, spread) = {
                let category = core.partition.get(index);
                (category.min_age, category.data.len())
            };
            let survival: Vec<f64> = (0..spread)
                .map(|offset| {
                    1.0 - exploitation * selectivity.value_at(min_age + offset as u32)
                })
                .collect();
            let category = core.partition.get_mut(index);
            for (value, factor) in category.data.iter_mut().zip(survival.iter()) {
                *value *= factor;
            }
        }
        Ok(())
    }

    pub fn addressable(&self, name: &str, _key: &AddressKey) -> Option<f64> {
        match name {
            "u_max" => Some(self.u_max),
            _ => None,
        }
    }

    pub fn set_addressable(&mut self, name: &str, _key: &AddressKey, value: f64) -> bool {
        match name {
            "u_max" => {
                self.u_max = value;
                true
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DiagnosticSink;
    use crate::partition::{Category, Partition};
    use crate::penalty::Penalty;
    use crate::selectivity::{Selectivity, SelectivityKind};

    fn strings(labels: &[&str]) -> Vec<String> {
        labels.iter().map(|s| s.to_string()).collect()
    }

    fn fishing_core(numbers_per_age: f64) -> crate::model::ModelCore {
        let mut male = Category::new("male", 1, 10, 0);
        let mut female = Category::new("female", 1, 10, 0);
        male.data = vec![numbers_per_age; 10];
        female.data = vec![numbers_per_age; 10];
        // unit mean weights keep catches in numbers
        male.mean_weight_by_time_step = vec![vec![1.0; 10]];
        female.mean_weight_by_time_step = vec![vec![1.0; 10]];
        let partition = Partition::new(vec![male, female]).unwrap();
        let mut core = crate::test_support::core_with_partition(partition);
        core.selectivities = vec![
            Selectivity::new("One", SelectivityKind::Constant { c: 1.0 }),
            Selectivity::new(
                "FishingSel",
                SelectivityKind::Logistic {
                    a50: 5.0,
                    ato95: 2.0,
                    alpha: 1.0,
                },
            ),
        ];
        core.penalties = vec![Penalty::new("CatchMustBeTaken", 10.0, false)];
        core.state.current_year = 2000;
        core
    }

    fn fishing_process(catch: f64, u_max: f64) -> MortalityInstantaneous {
        let mut catches = BTreeMap::new();
        catches.insert(2000, catch);
        let mut fishery = Fishery::new(
            "Trawl",
            "Annual",
            strings(&["male", "female"]),
            strings(&["FishingSel", "FishingSel"]),
            catches,
        );
        fishery.u_max = u_max;
        fishery.penalty = Some("CatchMustBeTaken".to_string());
        let mut process =
            MortalityInstantaneous::new(strings(&["male", "female"]), vec![0.1], vec![fishery]);
        let mut sink = DiagnosticSink::new();
        process.validate("process[FishingMort]", &mut sink);
        assert!(sink.is_empty());
        process
    }

    /// Reconstruct the catch implied by the state change through the
    /// half-M / exploitation / half-M sequence
    fn realised_catch(core: &crate::model::ModelCore, initial: f64, ratio: f64) -> f64 {
        let half = (-0.5 * 0.1 * ratio).exp();
        let mut total = 0.0;
        for category in core.partition.iter() {
            for &n_final in &category.data {
                let n_half = initial * half;
                let before_second_half = n_final / half;
                total += n_half - before_second_half;
            }
        }
        total
    }

    #[test]
    fn test_constant_rate_applies_selectivity_shaped_decay() {
        let mut core = fishing_core(1000.0);
        let mut process = MortalityConstantRate::new(
            strings(&["male", "female"]),
            vec![0.2],
            strings(&["One"]),
        );
        let mut sink = DiagnosticSink::new();
        process.validate("process[M]", &mut sink);
        assert!(sink.is_empty());
        let ctx = crate::test_support::build_context(&core);
        process.build("M", &ctx).unwrap();
        drop(ctx);

        process.execute(&mut core).unwrap();
        let expected = 1000.0 * (-0.2_f64).exp();
        for category in core.partition.iter() {
            for &value in &category.data {
                assert!((value - expected).abs() < 1e-9);
            }
        }
    }

    #[test]
    fn test_catch_is_removed_exactly() {
        let mut core = fishing_core(10_000.0);
        let mut process = fishing_process(1000.0, 0.99);
        let ctx = crate::test_support::build_context(&core);
        process.build("FishingMort", &ctx).unwrap();
        drop(ctx);

        process.execute("FishingMort", &mut core).unwrap();

        let caught = realised_catch(&core, 10_000.0, 1.0);
        assert!((caught - 1000.0).abs() < 1e-6, "realised catch {}", caught);
        // plenty of stock: no penalty fires
        assert!(core.penalty_log.is_empty());
    }

    #[test]
    fn test_exploitation_capped_at_u_max() {
        let mut core = fishing_core(10.0);
        let mut process = fishing_process(1e6, 0.9);
        let ctx = crate::test_support::build_context(&core);
        process.build("FishingMort", &ctx).unwrap();
        drop(ctx);

        process.execute("FishingMort", &mut core).unwrap();

        // reconstruct per-age exploitation and check the cap held
        let half = (-0.5 * 0.1_f64).exp();
        for category in core.partition.iter() {
            for &n_final in &category.data {
                let n_half = 10.0 * half;
                let u = 1.0 - (n_final / half) / n_half;
                assert!(u <= 0.9 + 1e-9, "exploitation {} exceeded the cap", u);
            }
        }
        // the shortfall triggered the penalty
        assert_eq!(core.penalty_log.len(), 1);
        assert!(core.penalty_log[0].score > 0.0);
    }

    #[test]
    fn test_disjoint_fisheries_keep_their_own_u_max() {
        let mut core = fishing_core(10.0);
        let mut trawl_catches = BTreeMap::new();
        trawl_catches.insert(2000, 1e6);
        let mut trawl = Fishery::new(
            "Trawl",
            "Annual",
            strings(&["male"]),
            strings(&["One"]),
            trawl_catches,
        );
        trawl.u_max = 0.9;
        trawl.penalty = Some("CatchMustBeTaken".to_string());
        let mut line_catches = BTreeMap::new();
        line_catches.insert(2000, 1e6);
        let mut line = Fishery::new(
            "Line",
            "Annual",
            strings(&["female"]),
            strings(&["One"]),
            line_catches,
        );
        line.u_max = 0.4;
        line.penalty = Some("CatchMustBeTaken".to_string());

        let mut process = MortalityInstantaneous::new(
            strings(&["male", "female"]),
            vec![0.1],
            vec![trawl, line],
        );
        let mut sink = DiagnosticSink::new();
        process.validate("process[FishingMort]", &mut sink);
        assert!(sink.is_empty());
        let ctx = crate::test_support::build_context(&core);
        process.build("FishingMort", &ctx).unwrap();
        drop(ctx);

        process.execute("FishingMort", &mut core).unwrap();

        // each category's removal honours its own fishery's cap
        let half = (-0.05_f64).exp();
        let n_half = 10.0 * half;
        let u_male = 1.0 - (core.partition.category("male").unwrap().data[0] / half) / n_half;
        let u_female = 1.0 - (core.partition.category("female").unwrap().data[0] / half) / n_half;
        assert!((u_male - 0.9).abs() < 1e-9, "male exploitation {}", u_male);
        assert!((u_female - 0.4).abs() < 1e-9, "female exploitation {}", u_female);
        assert_eq!(core.penalty_log.len(), 2);
    }

    #[test]
    fn test_event_biomass_removes_catch_share() {
        let mut core = fishing_core(1000.0);
        let mut catches = BTreeMap::new();
        catches.insert(2000, 2000.0);
        let mut event = MortalityEventBiomass::new(
            strings(&["male", "female"]),
            strings(&["One"]),
            catches,
        );
        let mut sink = DiagnosticSink::new();
        event.validate("process[EventMort]", &mut sink);
        assert!(sink.is_empty());
        let ctx = crate::test_support::build_context(&core);
        event.build(&ctx).unwrap();
        drop(ctx);

        event.execute("EventMort", &mut core).unwrap();

        // vulnerable biomass 20000 at unit weight: u = 0.1
        for category in core.partition.iter() {
            for &value in &category.data {
                assert!((value - 900.0).abs() < 1e-9);
            }
        }
        assert!(core.penalty_log.is_empty());
    }

    #[test]
    fn test_event_biomass_caps_and_penalises() {
        let mut core = fishing_core(10.0);
        let mut catches = BTreeMap::new();
        catches.insert(2000, 1e6);
        let mut event = MortalityEventBiomass::new(
            strings(&["male", "female"]),
            strings(&["One"]),
            catches,
        );
        event.u_max = 0.7;
        event.penalty = Some("CatchMustBeTaken".to_string());
        let mut sink = DiagnosticSink::new();
        event.validate("process[EventMort]", &mut sink);
        assert!(sink.is_empty());
        let ctx = crate::test_support::build_context(&core);
        event.build(&ctx).unwrap();
        drop(ctx);

        event.execute("EventMort", &mut core).unwrap();

        for category in core.partition.iter() {
            for &value in &category.data {
                assert!((value - 3.0).abs() < 1e-9);
            }
        }
        assert_eq!(core.penalty_log.len(), 1);
    }

    #[test]
    fn test_natural_mortality_only_outside_catch_years() {
        let mut core = fishing_core(10_000.0);
        core.state.current_year = 2005;
        let mut process = fishing_process(1000.0, 0.99);
        let ctx = crate::test_support::build_context(&core);
        process.build("FishingMort", &ctx).unwrap();
        drop(ctx);

        process.execute("FishingMort", &mut core).unwrap();

        let expected = 10_000.0 * (-0.1_f64).exp();
        for category in core.partition.iter() {
            for &value in &category.data {
                assert!((value - expected).abs() < 1e-9);
            }
        }
    }
}
