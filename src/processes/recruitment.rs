//! Recruitment processes
//!
//! Constant recruitment adds a fixed R0 split across categories. The
//! Beverton-Holt variant scales recruitment by the stock-recruit
//! relationship against a spawning-stock-biomass derived quantity, with
//! year-class-strength multipliers standardised over a declared year set.

use std::collections::BTreeMap;

use log::warn;

use crate::error::{DiagnosticSink, ModelError};
use crate::estimates::addressable::AddressKey;
use crate::model::{ModelCore, RunPhase};
use crate::partition::CategoryAccessor;

use super::{ProcessBuildContext, ProcessType};

const IS_ONE_TOLERANCE: f64 = 0.0001;

/// Adds `r0 * proportion[i]` to the recruit age of each target category
#[derive(Debug, Clone)]
pub struct RecruitmentConstant {
    pub category_labels: Vec<String>,
    pub proportions: Vec<f64>,
    pub r0: f64,
    /// Age to recruit at; defaults to the model's minimum age
    pub age: Option<u32>,

    recruit_age: u32,
    accessor: CategoryAccessor,
}

impl RecruitmentConstant {
    pub fn new(category_labels: Vec<String>, proportions: Vec<f64>, r0: f64) -> Self {
        Self {
            category_labels,
            proportions,
            r0,
            age: None,
            recruit_age: 0,
            accessor: CategoryAccessor::default(),
        }
    }

    pub fn validate(&mut self, location: &str, sink: &mut DiagnosticSink) {
        if self.proportions.len() != self.category_labels.len() {
            sink.error(
                location,
                format!(
                    "one proportion must be defined per category; there are {} categories and {} proportions",
                    self.category_labels.len(),
                    self.proportions.len()
                ),
            );
        }
        let total: f64 = self.proportions.iter().sum();
        if (total - 1.0).abs() > IS_ONE_TOLERANCE {
            sink.error(location, format!("proportions sum to {} when they should sum to 1.0", total));
        }
        if self.r0 < 0.0 {
            sink.error(location, format!("r0 ({}) cannot be less than 0.0", self.r0));
        }
    }

    pub fn build(&mut self, ctx: &ProcessBuildContext) -> Result<(), ModelError> {
        self.accessor = CategoryAccessor::init(&ctx.core.partition, &self.category_labels)?;
        self.recruit_age = self.age.unwrap_or(ctx.core.min_age);
        if self.recruit_age < ctx.core.min_age || self.recruit_age > ctx.core.max_age {
            return Err(ModelError::Numerical(format!(
                "recruitment age ({}) is outside the model's age range [{}, {}]",
                self.recruit_age, ctx.core.min_age, ctx.core.max_age
            )));
        }
        Ok(())
    }

    pub fn execute(&mut self, core: &mut ModelCore) -> Result<(), ModelError> {
        for i in 0..self.accessor.len() {
            let category = core.partition.get_mut(self.accessor.index(i));
            let offset = category.age_index(self.recruit_age);
            category.data[offset] += self.r0 * self.proportions[i];
        }
        Ok(())
    }

    pub fn addressable(&self, name: &str, key: &AddressKey) -> Option<f64> {
        match (name, key) {
            ("r0", _) => Some(self.r0),
            ("proportions", AddressKey::Index(i)) => self.proportions.get(*i).copied(),
            _ => None,
        }
    }

    pub fn set_addressable(&mut self, name: &str, key: &AddressKey, value: f64) -> bool {
        match (name, key) {
            ("r0", _) => self.r0 = value,
            ("proportions", AddressKey::Index(i)) if *i < self.proportions.len() => {
                self.proportions[*i] = value
            }
            _ => return false,
        }
        true
    }

    pub fn addressable_vector(&self, name: &str) -> Option<Vec<f64>> {
        match name {
            "proportions" => Some(self.proportions.clone()),
            _ => None,
        }
    }
}

/// Beverton-Holt stock-recruit driven recruitment
#[derive(Debug, Clone)]
pub struct RecruitmentBevertonHolt {
    pub category_labels: Vec<String>,
    pub proportions: Vec<f64>,
    /// Exactly one of r0/b0 must be supplied
    pub r0: Option<f64>,
    pub b0: Option<f64>,
    pub age: Option<u32>,
    pub steepness: f64,
    /// Label of the SSB derived quantity
    pub ssb: String,
    /// Initialisation phase that establishes B0; defaults to the first
    pub b0_phase: Option<String>,
    /// Explicit SSB year offset; derived from the cycle ordering when absent
    pub ssb_offset: Option<u32>,
    /// One YCS multiplier per model year
    pub ycs_values: Vec<f64>,
    /// Subset of ycs years used for standardisation; empty means all
    pub standardise_ycs_years: Vec<u32>,
    /// Authoritative per-year YCS used beyond final_year in projection mode
    pub projection_ycs: BTreeMap<u32, f64>,

    // built state
    recruit_age: u32,
    accessor: CategoryAccessor,
    derived_quantity: usize,
    phase_b0: usize,
    offset: u32,
    start_year: u32,
    final_year: u32,

    // runtime
    r0_value: f64,
    b0_value: f64,
    have_scaled_partition: bool,
    stand_ycs_values: Vec<f64>,
    true_ycs_values: Vec<f64>,
    recruitment_values: Vec<f64>,
    ssb_values: Vec<f64>,
}

impl RecruitmentBevertonHolt {
    pub fn new(
        category_labels: Vec<String>,
        proportions: Vec<f64>,
        steepness: f64,
        ssb: impl Into<String>,
        ycs_values: Vec<f64>,
    ) -> Self {
        Self {
            category_labels,
            proportions,
            r0: None,
            b0: None,
            age: None,
            steepness,
            ssb: ssb.into(),
            b0_phase: None,
            ssb_offset: None,
            ycs_values,
            standardise_ycs_years: Vec::new(),
            projection_ycs: BTreeMap::new(),
            recruit_age: 0,
            accessor: CategoryAccessor::default(),
            derived_quantity: 0,
            phase_b0: 0,
            offset: 0,
            start_year: 0,
            final_year: 0,
            r0_value: 0.0,
            b0_value: 0.0,
            have_scaled_partition: false,
            stand_ycs_values: Vec::new(),
            true_ycs_values: Vec::new(),
            recruitment_values: Vec::new(),
            ssb_values: Vec::new(),
        }
    }

    pub fn b0_initialised(&self) -> bool {
        self.b0.is_some()
    }

    pub fn recruitment_values(&self) -> &[f64] {
        &self.recruitment_values
    }

    pub fn true_ycs_values(&self) -> &[f64] {
        &self.true_ycs_values
    }

    pub fn ssb_values(&self) -> &[f64] {
        &self.ssb_values
    }

    pub fn validate(&mut self, location: &str, sink: &mut DiagnosticSink) {
        match (self.r0, self.b0) {
            (Some(_), Some(_)) => {
                sink.error(location, "cannot specify both r0 and b0 in the model")
            }
            (None, None) => sink.error(
                location,
                "either r0 or b0 must be specified to initialise Beverton-Holt recruitment",
            ),
            _ => {}
        }
        if self.steepness <= 0.0 || self.steepness > 1.0 {
            sink.error(
                location,
                format!("steepness ({}) must be in the range (0.0, 1.0]", self.steepness),
            );
        }
        if self.category_labels.len() != self.proportions.len() {
            sink.error(
                location,
                format!(
                    "one proportion must be defined per category; there are {} categories and {} proportions",
                    self.category_labels.len(),
                    self.proportions.len()
                ),
            );
        }
        let total: f64 = self.proportions.iter().sum();
        if (total - 1.0).abs() > IS_ONE_TOLERANCE {
            sink.error(location, format!("proportions sum to {} when they should sum to 1.0", total));
        }
        for value in &self.ycs_values {
            if *value < 0.0 {
                sink.error(location, format!("ycs value ({}) cannot be less than 0.0", value));
            }
        }
    }

    pub fn build(&mut self, label: &str, ctx: &ProcessBuildContext) -> Result<(), ModelError> {
        let core = ctx.core;
        self.accessor = CategoryAccessor::init(&core.partition, &self.category_labels)?;
        self.recruit_age = self.age.unwrap_or(core.min_age);
        self.start_year = core.calendar.start_year;
        self.final_year = core.calendar.final_year;

        self.derived_quantity =
            core.derived_quantity_index(&self.ssb)
                .ok_or_else(|| ModelError::UnknownLabel {
                    kind: "derived quantity",
                    label: self.ssb.clone(),
                })?;

        self.phase_b0 = match &self.b0_phase {
            Some(phase_label) => core.calendar.phase_index(phase_label).ok_or_else(|| {
                ModelError::UnknownLabel {
                    kind: "initialisation phase",
                    label: phase_label.clone(),
                }
            })?,
            None => 0,
        };

        self.offset = match self.ssb_offset {
            Some(offset) => offset,
            None => self.derive_ssb_offset(label, ctx)?,
        };

        // validate the standardisation year set against the ycs years
        if self.standardise_ycs_years.is_empty() {
            self.standardise_ycs_years = (self.start_year..=self.final_year)
                .map(|year| year - self.offset)
                .collect();
        } else {
            for window in self.standardise_ycs_years.windows(2) {
                if window[0] >= window[1] {
                    return Err(ModelError::Numerical(format!(
                        "standardise_ycs_years must be in ascending order; {} is not less than {}",
                        window[0], window[1]
                    )));
                }
            }
            let first = self.standardise_ycs_years[0];
            let last = *self.standardise_ycs_years.last().unwrap();
            if first < self.start_year - self.offset {
                return Err(ModelError::Numerical(format!(
                    "first standardise year ({}) is less than the earliest year class ({})",
                    first,
                    self.start_year - self.offset
                )));
            }
            if last > self.final_year - self.offset {
                return Err(ModelError::Numerical(format!(
                    "final standardise year ({}) is greater than the latest year class ({})",
                    last,
                    self.final_year - self.offset
                )));
            }
        }

        let year_count = (self.final_year - self.start_year + 1) as usize;
        if self.ycs_values.len() != year_count {
            return Err(ModelError::Numerical(format!(
                "ycs_values must be defined for every year; expected {} but got {}",
                year_count,
                self.ycs_values.len()
            )));
        }

        self.r0_value = self.r0.unwrap_or(0.0);
        self.b0_value = self.b0.unwrap_or(0.0);
        self.reset();
        Ok(())
    }

    /// Infer the SSB year offset from the relative order of this process,
    /// the ageing process and the SSB derived quantity's mortality block.
    fn derive_ssb_offset(&self, label: &str, ctx: &ProcessBuildContext) -> Result<u32, ModelError> {
        let core = ctx.core;
        let dq_time_step = core.derived_quantities[self.derived_quantity].time_step;

        let mut process_index = 0usize;
        let mut ageing_index = usize::MAX;
        let mut ageing_processes = 0usize;
        let mut recruitment_index = usize::MAX;
        let mut derived_quantity_index = usize::MAX;

        for (step_index, labels) in ctx.time_step_process_labels.iter().enumerate() {
            if step_index == dq_time_step {
                let mut mortality_block = false;
                for process_label in labels {
                    match ctx.process_types.get(process_label) {
                        Some(ProcessType::Ageing) => {
                            ageing_index = process_index;
                            ageing_processes += 1;
                        }
                        Some(ProcessType::Mortality) => {
                            mortality_block = true;
                            derived_quantity_index = process_index;
                        }
                        _ => {}
                    }
                    if process_label.as_str() == label {
                        recruitment_index = process_index;
                    }
                    process_index += 1;
                }
                if !mortality_block {
                    process_index += 1;
                    derived_quantity_index = process_index;
                    process_index += 1;
                }
            } else {
                for process_label in labels {
                    if ctx.process_types.get(process_label) == Some(&ProcessType::Ageing) {
                        ageing_index = process_index;
                        ageing_processes += 1;
                    }
                    if process_label.as_str() == label {
                        recruitment_index = process_index;
                    }
                    process_index += 1;
                }
            }
        }

        if ageing_processes > 1 {
            warn!(
                "the ssb offset for recruitment '{}' was derived assuming a single ageing \
                 process but {} were found; set ssb_offset explicitly",
                label, ageing_processes
            );
            return Err(ModelError::Numerical(format!(
                "cannot derive ssb_offset with {} ageing processes; supply ssb_offset",
                ageing_processes
            )));
        }
        if ageing_index == usize::MAX {
            return Err(ModelError::Numerical(
                "cannot derive ssb_offset because there is no ageing process".to_string(),
            ));
        }

        let min_age = ctx.core.min_age;
        let offset = if recruitment_index < ageing_index && ageing_index < derived_quantity_index {
            min_age + 1
        } else if derived_quantity_index < ageing_index && ageing_index < recruitment_index {
            min_age.saturating_sub(1)
        } else {
            min_age
        };
        Ok(offset)
    }

    /// Recompute the standardised YCS series from the raw values
    pub fn reset(&mut self) {
        self.true_ycs_values.clear();
        self.recruitment_values.clear();
        self.ssb_values.clear();
        self.have_scaled_partition = false;
        self.r0_value = self.r0.unwrap_or(self.r0_value);
        self.b0_value = self.b0.unwrap_or(0.0);

        let ycs_years: Vec<u32> = (self.start_year..=self.final_year)
            .map(|year| year - self.offset)
            .collect();

        let mut mean_ycs = 0.0;
        for (i, ycs_year) in ycs_years.iter().enumerate() {
            if self.standardise_ycs_years.contains(ycs_year) {
                mean_ycs += self.ycs_values[i];
            }
        }
        mean_ycs /= self.standardise_ycs_years.len().max(1) as f64;

        self.stand_ycs_values = self.ycs_values.clone();
        if mean_ycs > 0.0 {
            for (i, ycs_year) in ycs_years.iter().enumerate() {
                if self.standardise_ycs_years.contains(ycs_year) {
                    self.stand_ycs_values[i] = self.ycs_values[i] / mean_ycs;
                }
            }
        }
    }

    /// Beverton-Holt stock-recruit multiplier for an SSB ratio
    fn stock_recruit(&self, ssb_ratio: f64) -> f64 {
        let h = self.steepness;
        ssb_ratio / (1.0 - ((5.0 * h - 1.0) / (4.0 * h)) * (1.0 - ssb_ratio))
    }

    pub fn execute(&mut self, core: &mut ModelCore) -> Result<(), ModelError> {
        let amount_per = if core.state.phase == RunPhase::Initialise {
            let phase = core.state.init_phase;
            if phase <= self.phase_b0 && self.r0.is_some() {
                self.r0_value
            } else if phase <= self.phase_b0 && self.b0.is_some() {
                // seed a unit recruitment until the partition is scaled to B0
                if self.have_scaled_partition {
                    self.r0_value
                } else {
                    1.0
                }
            } else {
                let dq = &core.derived_quantities[self.derived_quantity];
                if self.b0.is_none() {
                    self.b0_value = dq.last_value_from_initialisation(self.phase_b0);
                }
                let ssb = dq.last_value_from_initialisation(phase);
                let ssb_ratio = if self.b0_value > 0.0 { ssb / self.b0_value } else { 1.0 };
                let true_ycs = self.stock_recruit(ssb_ratio);
                self.r0_value * true_ycs
            }
        } else {
            let year = core.state.current_year;
            // beyond final_year the projected ycs is authoritative
            let ycs = if year > self.final_year {
                match self.projection_ycs.get(&year) {
                    Some(value) => *value,
                    None => {
                        return Err(ModelError::Numerical(format!(
                            "projection year {} has no projected ycs value",
                            year
                        )))
                    }
                }
            } else {
                self.stand_ycs_values[(year - self.start_year) as usize]
            };

            let dq = &core.derived_quantities[self.derived_quantity];
            if self.b0.is_none() {
                self.b0_value = dq.last_value_from_initialisation(self.phase_b0);
            }
            let ssb_year = year.saturating_sub(self.offset);
            let ssb = if ssb_year < self.start_year {
                dq.last_value_from_initialisation(core.state.init_phase)
            } else {
                dq.value(ssb_year)
            };
            let ssb_ratio = if self.b0_value > 0.0 { ssb / self.b0_value } else { 1.0 };
            let true_ycs = ycs * self.stock_recruit(ssb_ratio);
            let amount = self.r0_value * true_ycs;

            self.true_ycs_values.push(true_ycs);
            self.recruitment_values.push(amount);
            self.ssb_values.push(ssb);
            amount
        };

        for i in 0..self.accessor.len() {
            let category = core.partition.get_mut(self.accessor.index(i));
            let offset = category.age_index(self.recruit_age);
            category.data[offset] += amount_per * self.proportions[i];
        }
        Ok(())
    }

    /// Rescale the partition so that the SSB derived quantity equals B0.
    /// Called by the initialisation phase once equilibrium is reached.
    pub fn scale_partition(&mut self, core: &mut ModelCore) -> Result<(), ModelError> {
        if self.b0.is_none() {
            return Err(ModelError::Numerical(
                "cannot scale the partition when b0 has not been defined".to_string(),
            ));
        }
        self.have_scaled_partition = true;
        let ssb = core.derived_quantities[self.derived_quantity]
            .value(self.start_year.saturating_sub(self.offset));
        if ssb <= 0.0 {
            return Err(ModelError::Numerical(format!(
                "equilibrium SSB is {} so the partition cannot be scaled to B0",
                ssb
            )));
        }
        let scalar = self.b0_value / ssb;
        self.r0_value = scalar;
        for category in core.partition.iter_mut() {
            for value in &mut category.data {
                *value *= scalar;
            }
        }
        Ok(())
    }

    pub fn addressable(&self, name: &str, key: &AddressKey) -> Option<f64> {
        match (name, key) {
            ("r0", _) => Some(self.r0_value),
            ("b0", _) => Some(self.b0_value),
            ("steepness", _) => Some(self.steepness),
            ("proportions", AddressKey::Index(i)) => self.proportions.get(*i).copied(),
            ("ycs_values", AddressKey::Index(i)) => self.ycs_values.get(*i).copied(),
            ("ycs_values", AddressKey::Year(year)) => {
                let index = year.checked_sub(self.start_year)? as usize;
                self.ycs_values.get(index).copied()
            }
            _ => None,
        }
    }

    pub fn set_addressable(&mut self, name: &str, key: &AddressKey, value: f64) -> bool {
        match (name, key) {
            ("r0", _) => {
                self.r0 = Some(value);
                self.r0_value = value;
            }
            ("b0", _) => {
                self.b0 = Some(value);
                self.b0_value = value;
            }
            ("steepness", _) => self.steepness = value,
            ("proportions", AddressKey::Index(i)) if *i < self.proportions.len() => {
                self.proportions[*i] = value
            }
            ("ycs_values", AddressKey::Index(i)) if *i < self.ycs_values.len() => {
                self.ycs_values[*i] = value
            }
            ("ycs_values", AddressKey::Year(year)) => {
                let Some(index) = year.checked_sub(self.start_year).map(|i| i as usize) else {
                    return false;
                };
                if index >= self.ycs_values.len() {
                    return false;
                }
                self.ycs_values[index] = value;
            }
            _ => return false,
        }
        true
    }

    pub fn addressable_vector(&self, name: &str) -> Option<Vec<f64>> {
        match name {
            "ycs_values" => Some(self.ycs_values.clone()),
            "proportions" => Some(self.proportions.clone()),
            _ => None,
        }
    }
}

/// Beverton-Holt recruitment parameterised by lognormal deviations
///
/// Instead of raw YCS multipliers the caller supplies one deviation per
/// year class and a recruitment variability sigma_r; the applied
/// multiplier is `exp(dev - sigma_r^2 / 2)` so the series is mean-one
/// after bias correction. Everything else delegates to the standard
/// Beverton-Holt process.
#[derive(Debug, Clone)]
pub struct RecruitmentBevertonHoltWithDeviations {
    pub deviations: Vec<f64>,
    pub sigma_r: f64,
    pub inner: RecruitmentBevertonHolt,
}

impl RecruitmentBevertonHoltWithDeviations {
    pub fn new(deviations: Vec<f64>, sigma_r: f64, mut inner: RecruitmentBevertonHolt) -> Self {
        // deviations replace any supplied ycs values entirely
        inner.ycs_values = vec![1.0; deviations.len()];
        Self {
            deviations,
            sigma_r,
            inner,
        }
    }

    pub fn b0_initialised(&self) -> bool {
        self.inner.b0_initialised()
    }

    fn push_deviations_into_ycs(&mut self) {
        let bias = 0.5 * self.sigma_r * self.sigma_r;
        let multipliers: Vec<f64> = self.deviations.iter().map(|dev| (dev - bias).exp()).collect();
        self.inner.ycs_values = multipliers;
    }

    pub fn validate(&mut self, location: &str, sink: &mut DiagnosticSink) {
        if self.sigma_r < 0.0 {
            sink.error(location, format!("sigma_r ({}) cannot be less than 0.0", self.sigma_r));
        }
        self.inner.validate(location, sink);
    }

    pub fn build(&mut self, label: &str, ctx: &ProcessBuildContext) -> Result<(), ModelError> {
        let year_count =
            (ctx.core.calendar.final_year - ctx.core.calendar.start_year + 1) as usize;
        if self.deviations.len() != year_count {
            return Err(ModelError::Numerical(format!(
                "deviations must be defined for every year; expected {} but got {}",
                year_count,
                self.deviations.len()
            )));
        }
        self.inner.ycs_values = vec![1.0; year_count];
        self.inner.build(label, ctx)?;
        self.reset();
        Ok(())
    }

    pub fn reset(&mut self) {
        self.push_deviations_into_ycs();
        self.inner.reset();
        // the raw multipliers are authoritative, not their standardised form
        self.inner.stand_ycs_values = self.inner.ycs_values.clone();
    }

    pub fn execute(&mut self, core: &mut ModelCore) -> Result<(), ModelError> {
        self.inner.execute(core)
    }

    pub fn scale_partition(&mut self, core: &mut ModelCore) -> Result<(), ModelError> {
        self.inner.scale_partition(core)
    }

    pub fn addressable(&self, name: &str, key: &AddressKey) -> Option<f64> {
        match (name, key) {
            ("sigma_r", _) => Some(self.sigma_r),
            ("deviations", AddressKey::Index(i)) => self.deviations.get(*i).copied(),
            ("deviations", AddressKey::Year(year)) => {
                let index = year.checked_sub(self.inner.start_year)? as usize;
                self.deviations.get(index).copied()
            }
            _ => self.inner.addressable(name, key),
        }
    }

    pub fn set_addressable(&mut self, name: &str, key: &AddressKey, value: f64) -> bool {
        match (name, key) {
            ("sigma_r", _) => self.sigma_r = value,
            ("deviations", AddressKey::Index(i)) if *i < self.deviations.len() => {
                self.deviations[*i] = value
            }
            ("deviations", AddressKey::Year(year)) => {
                let Some(index) = year.checked_sub(self.inner.start_year).map(|i| i as usize)
                else {
                    return false;
                };
                if index >= self.deviations.len() {
                    return false;
                }
                self.deviations[index] = value;
            }
            _ => return self.inner.set_addressable(name, key, value),
        }
        true
    }

    pub fn addressable_vector(&self, name: &str) -> Option<Vec<f64>> {
        match name {
            "deviations" => Some(self.deviations.clone()),
            _ => self.inner.addressable_vector(name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::partition::{Category, Partition};

    #[test]
    fn test_constant_recruitment_splits_by_proportion() {
        let partition = Partition::new(vec![
            Category::new("immature.male", 1, 10, 0),
            Category::new("immature.female", 1, 10, 0),
        ])
        .unwrap();

        let mut recruitment = RecruitmentConstant::new(
            vec!["immature.male".to_string(), "immature.female".to_string()],
            vec![0.6, 0.4],
            100_000.0,
        );
        recruitment.recruit_age = 1;
        recruitment.accessor =
            CategoryAccessor::init(&partition, &recruitment.category_labels).unwrap();

        let mut core = crate::test_support::core_with_partition(partition);
        recruitment.execute(&mut core).unwrap();

        assert_eq!(core.partition.category("immature.male").unwrap().data[0], 60_000.0);
        assert_eq!(core.partition.category("immature.female").unwrap().data[0], 40_000.0);
    }

    #[test]
    fn test_standardised_ycs_averages_to_one() {
        let mut recruitment = RecruitmentBevertonHolt::new(
            vec!["stock".to_string()],
            vec![1.0],
            0.9,
            "SSB",
            vec![0.5, 1.5, 2.0, 1.0, 0.5],
        );
        recruitment.start_year = 1990;
        recruitment.final_year = 1994;
        recruitment.offset = 1;
        recruitment.standardise_ycs_years = (1989..=1993).collect();
        recruitment.reset();

        let mean: f64 = recruitment.stand_ycs_values.iter().sum::<f64>()
            / recruitment.stand_ycs_values.len() as f64;
        assert!((mean - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_stock_recruit_is_one_at_b0() {
        let recruitment = RecruitmentBevertonHolt::new(
            vec!["stock".to_string()],
            vec![1.0],
            0.75,
            "SSB",
            vec![1.0],
        );
        assert!((recruitment.stock_recruit(1.0) - 1.0).abs() < 1e-12);
        // depleted stock recruits proportionally less, but above the ratio
        let depleted = recruitment.stock_recruit(0.2);
        assert!(depleted < 1.0);
        assert!(depleted > 0.2);
    }

    #[test]
    fn test_deviation_recruitment_applies_bias_correction() {
        let inner = RecruitmentBevertonHolt::new(
            vec!["stock".to_string()],
            vec![1.0],
            0.9,
            "SSB",
            Vec::new(),
        );
        let mut recruitment =
            RecruitmentBevertonHoltWithDeviations::new(vec![0.0, 0.2, -0.2], 0.6, inner);
        recruitment.inner.start_year = 1990;
        recruitment.inner.final_year = 1992;
        recruitment.inner.offset = 1;
        recruitment.inner.standardise_ycs_years = vec![1989, 1990, 1991];
        recruitment.reset();

        // a zero deviation recruits exp(-sigma_r^2 / 2) of R0
        let bias = (-0.5_f64 * 0.36).exp();
        assert!((recruitment.inner.stand_ycs_values[0] - bias).abs() < 1e-12);
        assert!((recruitment.inner.stand_ycs_values[1] - (0.2_f64 - 0.18).exp()).abs() < 1e-12);
        // the applied multipliers are authoritative, not re-standardised
        let mean: f64 = recruitment.inner.stand_ycs_values.iter().sum::<f64>() / 3.0;
        assert!((mean - 1.0).abs() > 1e-6);
    }

    #[test]
    fn test_validate_requires_exactly_one_of_r0_b0() {
        let mut recruitment = RecruitmentBevertonHolt::new(
            vec!["stock".to_string()],
            vec![1.0],
            0.9,
            "SSB",
            vec![1.0],
        );
        let mut sink = DiagnosticSink::new();
        recruitment.validate("process[Rec]", &mut sink);
        assert!(!sink.is_empty());

        recruitment.r0 = Some(1000.0);
        recruitment.b0 = Some(5000.0);
        let mut sink = DiagnosticSink::new();
        recruitment.validate("process[Rec]", &mut sink);
        assert!(!sink.is_empty());

        recruitment.b0 = None;
        let mut sink = DiagnosticSink::new();
        recruitment.validate("process[Rec]", &mut sink);
        assert!(sink.is_empty());
    }
}
