//! Derived quantities
//!
//! A derived quantity samples a weighted biomass or abundance from the
//! partition at a defined point in the annual cycle, once per executed year
//! and once per initialisation cycle. Beverton-Holt recruitment reads these
//! values back as its SSB series.

use std::collections::BTreeMap;

use crate::error::{DiagnosticSink, ModelError};
use crate::partition::{CategoryAccessor, Partition};
use crate::selectivity::Selectivity;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DerivedQuantityKind {
    /// Numbers multiplied by mean weight at age
    Biomass,
    /// Plain numbers
    Abundance,
}

#[derive(Debug, Clone)]
pub struct DerivedQuantity {
    pub label: String,
    pub kind: DerivedQuantityKind,
    pub time_step_label: String,
    pub category_labels: Vec<String>,
    pub selectivity_labels: Vec<String>,
    /// Proportion of the way through the mortality block at which the
    /// quantity is sampled: 0 = before, 1 = after.
    pub time_step_proportion: f64,

    // built state
    pub time_step: usize,
    pub selectivities: Vec<usize>,
    accessor: CategoryAccessor,

    // runtime
    values: BTreeMap<u32, f64>,
    /// One vector of values per initialisation phase, one entry per cycle
    initialisation_values: Vec<Vec<f64>>,
}

impl DerivedQuantity {
    pub fn new(
        label: impl Into<String>,
        kind: DerivedQuantityKind,
        time_step_label: impl Into<String>,
        category_labels: Vec<String>,
        selectivity_labels: Vec<String>,
    ) -> Self {
        Self {
            label: label.into(),
            kind,
            time_step_label: time_step_label.into(),
            category_labels,
            selectivity_labels,
            time_step_proportion: 1.0,
            time_step: 0,
            selectivities: Vec::new(),
            accessor: CategoryAccessor::default(),
            values: BTreeMap::new(),
            initialisation_values: Vec::new(),
        }
    }

    pub fn validate(&self, sink: &mut DiagnosticSink) {
        let location = format!("derived_quantity[{}]", self.label);
        if self.category_labels.is_empty() {
            sink.error(&location, "at least one category must be supplied");
        }
        if self.selectivity_labels.len() != self.category_labels.len() {
            sink.error(
                &location,
                format!(
                    "number of selectivities provided ({}) does not match the number of categories provided ({})",
                    self.selectivity_labels.len(),
                    self.category_labels.len()
                ),
            );
        }
        if self.time_step_proportion < 0.0 || self.time_step_proportion > 1.0 {
            sink.error(
                &location,
                format!(
                    "time_step_proportion ({}) must be in the range 0.0-1.0",
                    self.time_step_proportion
                ),
            );
        }
    }

    pub fn build(
        &mut self,
        partition: &Partition,
        time_step: usize,
        selectivities: Vec<usize>,
        phase_count: usize,
    ) -> Result<(), ModelError> {
        self.accessor = CategoryAccessor::init(partition, &self.category_labels)?;
        self.time_step = time_step;
        self.selectivities = selectivities;
        self.initialisation_values = vec![Vec::new(); phase_count];
        Ok(())
    }

    pub fn reset(&mut self) {
        self.values.clear();
        for phase in &mut self.initialisation_values {
            phase.clear();
        }
    }

    /// Cache the pre-mortality state of this quantity's categories
    pub fn build_cache(&mut self, partition: &Partition) {
        self.accessor.build_cache(partition);
    }

    /// Sample the quantity, interpolating between the cached pre-mortality
    /// state and the current state by `time_step_proportion`.
    fn calculate(
        &self,
        partition: &Partition,
        selectivities: &[Selectivity],
        current_time_step: usize,
    ) -> f64 {
        let proportion = self.time_step_proportion;
        let mut total = 0.0;
        for i in 0..self.accessor.len() {
            let category = partition.get(self.accessor.index(i));
            let selectivity = &selectivities[self.selectivities[i]];
            let cached = if self.accessor.has_cache() {
                Some(self.accessor.cached(i))
            } else {
                None
            };
            for (offset, &current) in category.data.iter().enumerate() {
                let age = category.min_age + offset as u32;
                let start = cached.map(|c| c[offset]).unwrap_or(current);
                let value = start + (current - start) * proportion;
                let weighted = match self.kind {
                    DerivedQuantityKind::Biomass => {
                        value * category.mean_weight(current_time_step, age)
                    }
                    DerivedQuantityKind::Abundance => value,
                };
                total += weighted * selectivity.value_at(age);
            }
        }
        total
    }

    /// Record the value for an executed model year
    pub fn execute_for_year(
        &mut self,
        year: u32,
        partition: &Partition,
        selectivities: &[Selectivity],
    ) {
        let value = self.calculate(partition, selectivities, self.time_step);
        self.values.insert(year, value);
    }

    /// Record the value for one initialisation cycle of a phase
    pub fn execute_for_initialisation(
        &mut self,
        phase: usize,
        partition: &Partition,
        selectivities: &[Selectivity],
    ) {
        let value = self.calculate(partition, selectivities, self.time_step);
        if phase < self.initialisation_values.len() {
            self.initialisation_values[phase].push(value);
        }
    }

    /// Value for a model year; years before the model fall back to the
    /// equilibrium value of the last initialisation phase.
    pub fn value(&self, year: u32) -> f64 {
        if let Some(value) = self.values.get(&year) {
            return *value;
        }
        self.initialisation_values
            .iter()
            .rev()
            .find_map(|phase| phase.last())
            .copied()
            .unwrap_or(0.0)
    }

    /// Last recorded value of an initialisation phase, stepping back through
    /// earlier phases when the requested one recorded nothing.
    pub fn last_value_from_initialisation(&self, phase: usize) -> f64 {
        let phase = phase.min(self.initialisation_values.len().saturating_sub(1));
        for index in (0..=phase).rev() {
            if let Some(value) = self.initialisation_values[index].last() {
                return *value;
            }
        }
        0.0
    }

    pub fn values(&self) -> &BTreeMap<u32, f64> {
        &self.values
    }
}
