//! Observations: mapping partition state to likelihood scores
//!
//! An observation declares the years and time step it watches, the category
//! collections and selectivities that produce its expected values, and a
//! likelihood to compare them against observed data. The engine caches the
//! partition at the start of the observed time step and runs the
//! observation after the step's processes, interpolating between the two
//! states by the observation's time proportion.

pub mod ageing_error;
mod data_weight;
mod likelihood;

pub use data_weight::DataWeight;
pub use likelihood::Likelihood;

use std::collections::BTreeMap;

use log::warn;
use rand::Rng;

use crate::error::{DiagnosticSink, ModelError};
use crate::model::ModelCore;
use crate::partition::CategoryAccessor;

/// Catchability coefficient applied by abundance and biomass observations
#[derive(Debug, Clone)]
pub struct Catchability {
    pub label: String,
    pub q: f64,
}

impl Catchability {
    pub fn new(label: impl Into<String>, q: f64) -> Self {
        Self {
            label: label.into(),
            q,
        }
    }
}

/// One observed-versus-expected record
#[derive(Debug, Clone)]
pub struct Comparison {
    pub category: String,
    pub age: u32,
    pub length: f64,
    pub observed: f64,
    pub expected: f64,
    pub error_value: f64,
    pub process_error: f64,
    pub adjusted_error: f64,
    pub delta: f64,
    pub score: f64,
}

#[derive(Debug, Clone)]
pub enum ObservationKind {
    /// Numbers scaled by catchability
    Abundance,
    /// Weight-at-age scaled by catchability
    Biomass,
    /// Age composition per category collection
    ProportionsAtAge {
        min_age: u32,
        max_age: u32,
        plus_group: bool,
    },
    /// Length composition via the age-length conversion
    ProportionsAtLength,
}

impl ObservationKind {
    fn is_proportion(&self) -> bool {
        matches!(
            self,
            ObservationKind::ProportionsAtAge { .. } | ObservationKind::ProportionsAtLength
        )
    }
}

/// Scale one collection's expected values so they sum to one. Proportion
/// observations compare shapes per collection, not pooled magnitudes.
fn normalise(values: &mut [f64]) {
    let total: f64 = values.iter().sum();
    if total > 0.0 {
        values.iter_mut().for_each(|value| *value /= total);
    }
}

#[derive(Debug, Clone)]
pub struct Observation {
    pub label: String,
    pub kind: ObservationKind,
    pub years: Vec<u32>,
    pub time_step_label: String,
    /// Category collections; each collection combines one or more
    /// categories into a single expected series
    pub category_collections: Vec<Vec<String>>,
    /// One selectivity per collection
    pub selectivity_labels: Vec<String>,
    pub catchability: Option<String>,
    pub likelihood: Likelihood,
    pub delta: f64,
    /// Allowed departure of observed proportions from summing to one
    pub tolerance: f64,
    pub process_error: f64,
    pub ageing_error: Option<String>,
    /// Proportion of the way through the time step at which the
    /// observation samples: 0 = start-of-step state, 1 = end
    pub time_step_proportion: f64,
    pub data_weight: DataWeight,
    /// Observed rows by year; layout depends on the kind
    pub observed: BTreeMap<u32, Vec<f64>>,
    pub error_values: BTreeMap<u32, Vec<f64>>,

    // built state
    time_step: usize,
    accessors: Vec<CategoryAccessor>,
    selectivities: Vec<usize>,
    catchability_index: Option<usize>,
    ageing_error_index: Option<usize>,

    // runtime
    comparisons: BTreeMap<u32, Vec<Comparison>>,
    scores: BTreeMap<u32, f64>,
}

impl Observation {
    pub fn new(
        label: impl Into<String>,
        kind: ObservationKind,
        years: Vec<u32>,
        time_step_label: impl Into<String>,
        category_collections: Vec<Vec<String>>,
        selectivity_labels: Vec<String>,
        likelihood: Likelihood,
    ) -> Self {
        Self {
            label: label.into(),
            kind,
            years,
            time_step_label: time_step_label.into(),
            category_collections,
            selectivity_labels,
            catchability: None,
            likelihood,
            delta: 1e-11,
            tolerance: 0.001,
            process_error: 0.0,
            ageing_error: None,
            time_step_proportion: 1.0,
            data_weight: DataWeight::None,
            observed: BTreeMap::new(),
            error_values: BTreeMap::new(),
            time_step: 0,
            accessors: Vec::new(),
            selectivities: Vec::new(),
            catchability_index: None,
            ageing_error_index: None,
            comparisons: BTreeMap::new(),
            scores: BTreeMap::new(),
        }
    }

    /// Number of values expected per observed row
    fn row_width(&self) -> usize {
        match &self.kind {
            ObservationKind::Abundance | ObservationKind::Biomass => {
                self.category_collections.len()
            }
            ObservationKind::ProportionsAtAge {
                min_age, max_age, ..
            } => self.category_collections.len() * ((max_age - min_age + 1) as usize),
            ObservationKind::ProportionsAtLength => 0, // resolved against model bins at build
        }
    }

    pub fn validate(&mut self, sink: &mut DiagnosticSink) {
        let location = format!("observation[{}]", self.label);
        if self.years.is_empty() {
            sink.error(&location, "at least one year must be supplied");
        }
        if self.delta < 0.0 {
            sink.error(&location, format!("delta ({}) cannot be less than 0.0", self.delta));
        }
        if self.process_error < 0.0 {
            sink.error(
                &location,
                format!("process_error ({}) cannot be less than 0.0", self.process_error),
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
        if self.selectivity_labels.len() == 1 && self.category_collections.len() > 1 {
            self.selectivity_labels =
                vec![self.selectivity_labels[0].clone(); self.category_collections.len()];
        }
        if self.selectivity_labels.len() != self.category_collections.len() {
            sink.error(
                &location,
                format!(
                    "number of selectivities provided ({}) does not match the number of category collections ({})",
                    self.selectivity_labels.len(),
                    self.category_collections.len()
                ),
            );
        }
        self.data_weight.validate(&location, sink);

        let expected_width = self.row_width();
        for year in &self.years {
            let Some(row) = self.observed.get(year) else {
                sink.error(&location, format!("no observed values supplied for year {}", year));
                continue;
            };
            if expected_width != 0 && row.len() != expected_width {
                sink.error(
                    &location,
                    format!(
                        "observed values for year {} supply {} entries but {} were expected",
                        year,
                        row.len(),
                        expected_width
                    ),
                );
            }
            match self.error_values.get(year) {
                None => sink.error(&location, format!("no error values supplied for year {}", year)),
                Some(errors) if errors.len() != row.len() && errors.len() != 1 => sink.error(
                    &location,
                    format!(
                        "error values for year {} supply {} entries but {} were expected",
                        year,
                        errors.len(),
                        row.len()
                    ),
                ),
                _ => {}
            }
        }

        // rescale observed proportions that miss 1.0 by more than tolerance
        if self.kind.is_proportion() {
            for (year, row) in self.observed.iter_mut() {
                let total: f64 = row.iter().sum();
                if total > 0.0 && (total - 1.0).abs() > self.tolerance {
                    warn!(
                        "observation {} year {}: observed total ({}) exceeds tolerance, rescaling to 1.0",
                        self.label, year, total
                    );
                    row.iter_mut().for_each(|v| *v /= total);
                }
            }
        }
    }

    pub fn build(&mut self, core: &ModelCore) -> Result<(), ModelError> {
        self.time_step = core
            .calendar
            .time_step_index(&self.time_step_label)
            .ok_or_else(|| ModelError::UnknownLabel {
                kind: "time step",
                label: self.time_step_label.clone(),
            })?;

        self.accessors = self
            .category_collections
            .iter()
            .map(|labels| CategoryAccessor::init(&core.partition, labels))
            .collect::<Result<Vec<_>, _>>()?;

        self.selectivities = self
            .selectivity_labels
            .iter()
            .map(|label| {
                core.selectivity_index(label)
                    .ok_or_else(|| ModelError::UnknownLabel {
                        kind: "selectivity",
                        label: label.clone(),
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;

        self.catchability_index = match &self.catchability {
            Some(label) => Some(core.catchability_index(label).ok_or_else(|| {
                ModelError::UnknownLabel {
                    kind: "catchability",
                    label: label.clone(),
                }
            })?),
            None => None,
        };

        self.ageing_error_index = match &self.ageing_error {
            Some(label) => Some(core.ageing_error_index(label).ok_or_else(|| {
                ModelError::UnknownLabel {
                    kind: "ageing error",
                    label: label.clone(),
                }
            })?),
            None => None,
        };

        // length observations size their rows from the model's bins
        if matches!(self.kind, ObservationKind::ProportionsAtLength) {
            let bin_count = if core.length_plus {
                core.length_bins.len()
            } else {
                core.length_bins.len().saturating_sub(1)
            };
            let expected_width = self.category_collections.len() * bin_count;
            for (year, row) in &self.observed {
                if row.len() != expected_width {
                    return Err(ModelError::Numerical(format!(
                        "observed values for year {} supply {} entries but {} were expected from the model length bins",
                        year,
                        row.len(),
                        expected_width
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn reset(&mut self) {
        self.comparisons.clear();
        self.scores.clear();
    }

    pub fn is_active(&self, year: u32) -> bool {
        self.years.contains(&year)
    }

    pub fn time_step(&self) -> usize {
        self.time_step
    }

    pub fn comparisons(&self) -> &BTreeMap<u32, Vec<Comparison>> {
        &self.comparisons
    }

    pub fn scores(&self) -> &BTreeMap<u32, f64> {
        &self.scores
    }

    /// Cache the start-of-step state of every collection
    pub fn pre_execute(&mut self, core: &ModelCore) {
        for accessor in &mut self.accessors {
            accessor.build_cache(&core.partition);
        }
    }

    /// Compute comparisons for the current year after the time step's
    /// processes have run
    pub fn execute(&mut self, core: &ModelCore) -> Result<(), ModelError> {
        let year = core.state.current_year;
        let proportion = self.time_step_proportion;
        let q = self
            .catchability_index
            .map(|i| core.catchabilities[i].q)
            .unwrap_or(1.0);

        let observed_row = self.observed.get(&year).cloned().unwrap_or_default();
        let error_row = self.error_values.get(&year).cloned().unwrap_or_default();
        let error_at = |index: usize| -> f64 {
            if error_row.len() == 1 {
                error_row[0]
            } else {
                error_row.get(index).copied().unwrap_or(0.0)
            }
        };

        let mut comparisons: Vec<Comparison> = Vec::new();
        match self.kind.clone() {
            ObservationKind::Abundance | ObservationKind::Biomass => {
                let biomass = matches!(self.kind, ObservationKind::Biomass);
                for (collection, accessor) in self.accessors.iter().enumerate() {
                    let selectivity = &core.selectivities[self.selectivities[collection]];
                    let mut expected = 0.0;
                    for i in 0..accessor.len() {
                        let category = core.partition.get(accessor.index(i));
                        let cached = accessor.cached(i);
                        for (offset, &current) in category.data.iter().enumerate() {
                            let age = category.min_age + offset as u32;
                            let start = cached[offset];
                            let value = start + (current - start) * proportion;
                            let weighted = if biomass {
                                value * category.mean_weight(self.time_step, age)
                            } else {
                                value
                            };
                            expected += weighted * selectivity.value_at(age);
                        }
                    }
                    expected *= q;
                    let error_value = error_at(collection);
                    comparisons.push(self.make_comparison(
                        self.collection_label(collection),
                        0,
                        0.0,
                        observed_row.get(collection).copied().unwrap_or(0.0),
                        expected,
                        error_value,
                    ));
                }
            }
            ObservationKind::ProportionsAtAge {
                min_age,
                max_age,
                plus_group,
            } => {
                let observation_spread = (max_age - min_age + 1) as usize;
                for (collection, accessor) in self.accessors.iter().enumerate() {
                    let selectivity = &core.selectivities[self.selectivities[collection]];

                    // accumulate over the model age range first so ageing
                    // error applies to the full distribution
                    let mut model_expected = vec![0.0; core.age_spread()];
                    for i in 0..accessor.len() {
                        let category = core.partition.get(accessor.index(i));
                        let cached = accessor.cached(i);
                        for (offset, &current) in category.data.iter().enumerate() {
                            let age = category.min_age + offset as u32;
                            let start = cached[offset];
                            let value = start + (current - start) * proportion;
                            let model_offset = (age - core.min_age) as usize;
                            model_expected[model_offset] += value * selectivity.value_at(age);
                        }
                    }

                    if let Some(index) = self.ageing_error_index {
                        model_expected = core.ageing_errors[index].apply(&model_expected);
                    }

                    // collapse the model range onto the observed age range
                    let mut expected_values = vec![0.0; observation_spread];
                    for (model_offset, &value) in model_expected.iter().enumerate() {
                        let age = core.min_age + model_offset as u32;
                        if age < min_age {
                            continue;
                        }
                        let observation_offset = if age > max_age {
                            if !plus_group {
                                continue;
                            }
                            observation_spread - 1
                        } else {
                            (age - min_age) as usize
                        };
                        expected_values[observation_offset] += value;
                    }

                    // each collection is its own composition
                    normalise(&mut expected_values);

                    for (offset, &expected) in expected_values.iter().enumerate() {
                        let index = collection * observation_spread + offset;
                        comparisons.push(self.make_comparison(
                            self.collection_label(collection),
                            min_age + offset as u32,
                            0.0,
                            observed_row.get(index).copied().unwrap_or(0.0),
                            expected,
                            error_at(index),
                        ));
                    }
                }
            }
            ObservationKind::ProportionsAtLength => {
                let bin_count = if core.length_plus {
                    core.length_bins.len()
                } else {
                    core.length_bins.len().saturating_sub(1)
                };
                for (collection, accessor) in self.accessors.iter().enumerate() {
                    let selectivity = &core.selectivities[self.selectivities[collection]];
                    let mut expected_values = vec![0.0; bin_count];
                    for i in 0..accessor.len() {
                        let category = core.partition.get(accessor.index(i));
                        let age_length = &core.age_lengths[category.age_length];

                        let mut current_state = category.clone();
                        current_state.update_age_length_matrix(
                            age_length,
                            selectivity,
                            &core.length_bins,
                            core.length_plus,
                            year,
                            self.time_step,
                        )?;
                        let current = current_state.collapse_age_length_to_length();

                        let mut cached_state = category.clone();
                        cached_state.data = accessor.cached(i).to_vec();
                        cached_state.update_age_length_matrix(
                            age_length,
                            selectivity,
                            &core.length_bins,
                            core.length_plus,
                            year,
                            self.time_step,
                        )?;
                        let cached = cached_state.collapse_age_length_to_length();

                        for (bin, value) in expected_values.iter_mut().enumerate() {
                            let start = cached.get(bin).copied().unwrap_or(0.0);
                            let end = current.get(bin).copied().unwrap_or(0.0);
                            *value += start + (end - start) * proportion;
                        }
                    }

                    // each collection is its own composition
                    normalise(&mut expected_values);

                    for (bin, &expected) in expected_values.iter().enumerate() {
                        let index = collection * bin_count + bin;
                        comparisons.push(self.make_comparison(
                            self.collection_label(collection),
                            0,
                            core.length_bins[bin],
                            observed_row.get(index).copied().unwrap_or(0.0),
                            expected,
                            error_at(index),
                        ));
                    }
                }
            }
        }

        self.comparisons.insert(year, comparisons);
        Ok(())
    }

    fn make_comparison(
        &self,
        category: String,
        age: u32,
        length: f64,
        observed: f64,
        expected: f64,
        error_value: f64,
    ) -> Comparison {
        let weighted_error = self.data_weight.adjust_error_value(error_value);
        let adjusted_error = self
            .likelihood
            .adjust_error_value(self.process_error, weighted_error);
        Comparison {
            category,
            age,
            length,
            observed,
            expected,
            error_value,
            process_error: self.process_error,
            adjusted_error,
            delta: self.delta,
            score: 0.0,
        }
    }

    fn collection_label(&self, collection: usize) -> String {
        self.category_collections[collection].join("+")
    }

    /// Score every executed year against the observed data
    pub fn calculate_scores(&mut self) {
        self.scores.clear();
        for (year, comparisons) in self.comparisons.iter_mut() {
            let mut score = self.likelihood.initial_score(comparisons);
            self.likelihood.get_scores(comparisons);
            for comparison in comparisons.iter() {
                score += self.data_weight.adjust_score(comparison.score);
            }
            self.scores.insert(*year, score);
        }
    }

    /// Replace observed values with simulated draws around the expecteds
    pub fn simulate<R: Rng>(&mut self, rng: &mut R) {
        for comparisons in self.comparisons.values_mut() {
            self.likelihood.simulate(comparisons, rng);
        }
    }

    /// Sum of the per-year scores
    pub fn total_score(&self) -> f64 {
        self.scores.values().sum()
    }
}
