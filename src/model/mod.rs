//! The model: single authoritative owner of all state
//!
//! The `Model` owns the partition, the calendar, every registry of named
//! entities, and the seeded random number generator. Registries are
//! read-only once `build` completes; the partition, derived-quantity values
//! and penalty log are the only state mutated while the annual cycle runs.
//!
//! Entities refer to each other by integer handles into the model-owned
//! registries, resolved once from labels during `build`.

pub mod calendar;
mod cycle;
#[cfg(test)]
mod tests;

pub use calendar::{Calendar, InitialisationKind, InitialisationPhase, ProcessInsertion, TimeStepDef};

use std::collections::HashMap;

use rand::SeedableRng;
use rand_chacha::ChaCha12Rng;

use crate::age_length::AgeLength;
use crate::derived_quantity::DerivedQuantity;
use crate::error::{DiagnosticSink, ModelError};
use crate::estimates::addressable::{AddressBlock, AddressKey, AddressTarget};
use crate::estimates::Estimate;
use crate::length_weight::LengthWeight;
use crate::observations::ageing_error::AgeingError;
use crate::observations::{Catchability, Observation};
use crate::partition::{Partition, PartitionSnapshot};
use crate::penalty::{AdditionalPrior, Penalty, PenaltyEvent};
use crate::processes::{Process, ProcessBuildContext, ProcessType};
use crate::selectivity::Selectivity;

/// What the engine was asked to do
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    Basic,
    Estimation,
    Mcmc,
    Simulation,
    Projection,
    Profile,
}

/// Whether the cycle is currently iterating an initialisation phase or the
/// main calendar
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPhase {
    Initialise,
    Execute,
}

/// Mutable position of the engine within a run
#[derive(Debug, Clone)]
pub struct RunState {
    pub run_mode: RunMode,
    pub phase: RunPhase,
    pub current_year: u32,
    pub time_step: usize,
    /// Index of the initialisation phase currently (or most recently)
    /// executing
    pub init_phase: usize,
}

/// Resolved process ordering for the main cycle and every initialisation
/// phase, plus the recognised mortality block per time step.
#[derive(Debug, Clone, Default)]
pub struct CycleLayout {
    /// Main cycle: process indices per time step
    pub main: Vec<Vec<usize>>,
    /// Initialisation cycles: [phase][time step] -> process indices
    pub init: Vec<Vec<Vec<usize>>>,
    /// Position within each main-cycle time step where the block of
    /// consecutive mortality processes starts and ends (inclusive)
    pub mortality_blocks: Vec<Option<(usize, usize)>>,
}

/// Everything a process may read or mutate while executing.
///
/// Kept separate from the process and observation registries so that the
/// engine can hand a process mutable access to the partition without
/// aliasing the registry it lives in.
#[derive(Debug, Clone)]
pub struct ModelCore {
    pub calendar: Calendar,
    pub min_age: u32,
    pub max_age: u32,
    pub age_plus: bool,
    /// Model-level length bin minimums for length-based observations
    pub length_bins: Vec<f64>,
    pub length_plus: bool,

    pub selectivities: Vec<Selectivity>,
    pub age_lengths: Vec<AgeLength>,
    pub length_weights: Vec<LengthWeight>,
    pub catchabilities: Vec<Catchability>,
    pub ageing_errors: Vec<AgeingError>,
    pub penalties: Vec<Penalty>,
    pub additional_priors: Vec<AdditionalPrior>,
    pub derived_quantities: Vec<DerivedQuantity>,

    pub partition: Partition,
    pub state: RunState,
    pub rng: ChaCha12Rng,
    pub penalty_log: Vec<PenaltyEvent>,
    pub warnings: Vec<String>,
    /// Partition snapshot taken at the end of initialisation, restored by
    /// reset between estimation iterations
    pub equilibrium_snapshot: Option<PartitionSnapshot>,
}

impl ModelCore {
    pub fn age_spread(&self) -> usize {
        (self.max_age - self.min_age + 1) as usize
    }

    pub fn selectivity_index(&self, label: &str) -> Option<usize> {
        self.selectivities.iter().position(|s| s.label == label)
    }

    pub fn age_length_index(&self, label: &str) -> Option<usize> {
        self.age_lengths.iter().position(|a| a.label == label)
    }

    pub fn length_weight_index(&self, label: &str) -> Option<usize> {
        self.length_weights.iter().position(|l| l.label == label)
    }

    pub fn penalty_index(&self, label: &str) -> Option<usize> {
        self.penalties.iter().position(|p| p.label == label)
    }

    pub fn catchability_index(&self, label: &str) -> Option<usize> {
        self.catchabilities.iter().position(|c| c.label == label)
    }

    pub fn ageing_error_index(&self, label: &str) -> Option<usize> {
        self.ageing_errors.iter().position(|a| a.label == label)
    }

    pub fn derived_quantity_index(&self, label: &str) -> Option<usize> {
        self.derived_quantities.iter().position(|d| d.label == label)
    }

    /// Refresh every category's mean length/weight caches for a year
    pub fn update_partition_mean_data(&mut self, year: u32) {
        let time_step_count = self.calendar.time_steps.len();
        let ModelCore {
            partition,
            age_lengths,
            length_weights,
            ..
        } = self;
        for category in partition.iter_mut() {
            let age_length = &age_lengths[category.age_length];
            let length_weight = &length_weights[age_length.length_weight];
            category.update_mean_data(age_length, length_weight, year, time_step_count);
        }
    }
}

/// The complete model
#[derive(Debug, Clone)]
pub struct Model {
    pub core: ModelCore,
    pub processes: Vec<Process>,
    pub observations: Vec<Observation>,
    pub estimates: Vec<Estimate>,
    pub layout: CycleLayout,
}

impl Model {
    /// Assemble a model from registries produced by the configuration
    /// layer. `build` must be called before any execution.
    pub fn new(
        core: ModelCore,
        processes: Vec<Process>,
        observations: Vec<Observation>,
        estimates: Vec<Estimate>,
    ) -> Self {
        Self {
            core,
            processes,
            observations,
            estimates,
            layout: CycleLayout::default(),
        }
    }

    pub fn seed_rng(&mut self, seed: u64) {
        self.core.rng = ChaCha12Rng::seed_from_u64(seed);
    }

    pub fn process_index(&self, label: &str) -> Option<usize> {
        self.processes.iter().position(|p| p.label == label)
    }

    /// Validate every block and resolve every cross-reference, reporting
    /// all configuration problems at once.
    pub fn build(&mut self) -> Result<(), ModelError> {
        let mut sink = DiagnosticSink::new();

        self.core.calendar.validate(&mut sink);
        for selectivity in &self.core.selectivities {
            selectivity.validate(&mut sink);
        }
        for age_length in &self.core.age_lengths {
            age_length.validate(&mut sink);
        }
        for length_weight in &self.core.length_weights {
            length_weight.validate(&mut sink);
        }
        for penalty in &self.core.penalties {
            penalty.validate(&mut sink);
        }
        for derived_quantity in &self.core.derived_quantities {
            derived_quantity.validate(&mut sink);
        }
        for process in &mut self.processes {
            process.validate(&mut sink);
        }
        for observation in &mut self.observations {
            observation.validate(&mut sink);
        }
        for estimate in &self.estimates {
            estimate.validate(&mut sink);
        }
        // stop early: later resolution depends on legal parameters
        sink.finish()?;
        let mut sink = DiagnosticSink::new();

        // age-length curves need the model domain before anything queries them
        let all_years = self.core.calendar.all_years();
        let time_step_count = self.core.calendar.time_steps.len();
        let (min_age, max_age) = (self.core.min_age, self.core.max_age);
        for age_length in &mut self.core.age_lengths {
            match self
                .core
                .length_weights
                .iter()
                .position(|lw| lw.label == age_length.length_weight_label)
            {
                Some(index) => age_length.length_weight = index,
                None => sink.error(
                    format!("age_length[{}]", age_length.label),
                    format!(
                        "length_weight '{}' does not exist",
                        age_length.length_weight_label
                    ),
                ),
            }
            age_length.build(&all_years, time_step_count, min_age, max_age);
        }

        self.build_cycle_layout(&mut sink);

        // derived quantities resolve before processes: Beverton-Holt
        // recruitment derives its ssb_offset from the SSB quantity's
        // resolved time step
        let phase_count = self.core.calendar.initialisation_phases.len().max(1);
        {
            let ModelCore {
                calendar,
                derived_quantities,
                partition,
                selectivities,
                ..
            } = &mut self.core;
            for derived_quantity in derived_quantities.iter_mut() {
                let location = format!("derived_quantity[{}]", derived_quantity.label);
                let Some(time_step) = calendar.time_step_index(&derived_quantity.time_step_label)
                else {
                    sink.error(
                        location,
                        format!("time step '{}' does not exist", derived_quantity.time_step_label),
                    );
                    continue;
                };
                let mut handles = Vec::new();
                let mut missing = false;
                for label in &derived_quantity.selectivity_labels {
                    match selectivities.iter().position(|s| &s.label == label) {
                        Some(index) => handles.push(index),
                        None => {
                            sink.error(&location, format!("selectivity '{}' does not exist", label));
                            missing = true;
                        }
                    }
                }
                if missing {
                    continue;
                }
                if let Err(err) = derived_quantity.build(partition, time_step, handles, phase_count) {
                    sink.error(location, err.to_string());
                }
            }
        }

        // process build: accessors, handles, cycle-derived values
        let process_types: HashMap<String, ProcessType> = self
            .processes
            .iter()
            .map(|p| (p.label.clone(), p.process_type()))
            .collect();
        let time_step_process_labels: Vec<Vec<String>> = self
            .core
            .calendar
            .time_steps
            .iter()
            .map(|step| step.process_labels.clone())
            .collect();

        for process in &mut self.processes {
            let ctx = ProcessBuildContext {
                core: &self.core,
                time_step_process_labels: &time_step_process_labels,
                process_types: &process_types,
            };
            if let Err(err) = process.build(&ctx) {
                sink.error(format!("process[{}]", process.label), err.to_string());
            }
        }

        let core = &self.core;
        for observation in &mut self.observations {
            if let Err(err) = observation.build(core) {
                sink.error(format!("observation[{}]", observation.label), err.to_string());
            }
        }

        self.build_estimates(&mut sink);

        sink.finish()
    }

    /// Resolve process labels into cycle orderings, apply initialisation
    /// insertions/exclusions, and locate mortality blocks.
    fn build_cycle_layout(&mut self, sink: &mut DiagnosticSink) {
        let mut main: Vec<Vec<usize>> = Vec::new();
        for step in &self.core.calendar.time_steps {
            let mut indices = Vec::new();
            for label in &step.process_labels {
                match self.process_index(label) {
                    Some(index) => indices.push(index),
                    None => sink.error(
                        format!("time_step[{}]", step.label),
                        format!("process '{}' does not exist", label),
                    ),
                }
            }
            main.push(indices);
        }

        // per-phase orderings start from the main labels and apply the
        // phase's insertions and exclusions
        let mut init: Vec<Vec<Vec<usize>>> = Vec::new();
        for phase in &self.core.calendar.initialisation_phases {
            let mut labels: Vec<Vec<String>> = self
                .core
                .calendar
                .time_steps
                .iter()
                .map(|step| step.process_labels.clone())
                .collect();

            for insertion in &phase.insert_processes {
                let Some(step_index) = self.core.calendar.time_step_index(&insertion.time_step)
                else {
                    sink.error(
                        format!("initialisation_phase[{}]", phase.label),
                        format!("time step '{}' does not exist", insertion.time_step),
                    );
                    continue;
                };
                match &insertion.before {
                    None => labels[step_index].push(insertion.process.clone()),
                    Some(target) => match labels[step_index].iter().position(|l| l == target) {
                        Some(position) => {
                            labels[step_index].insert(position, insertion.process.clone())
                        }
                        None => sink.error(
                            format!("initialisation_phase[{}]", phase.label),
                            format!(
                                "process '{}' does not exist in time step '{}'",
                                target, insertion.time_step
                            ),
                        ),
                    },
                }
            }

            for excluded in &phase.exclude_processes {
                let mut removed = 0;
                for step_labels in &mut labels {
                    let before = step_labels.len();
                    step_labels.retain(|l| l != excluded);
                    removed += before - step_labels.len();
                }
                if removed == 0 {
                    sink.error(
                        format!("initialisation_phase[{}]", phase.label),
                        format!("process '{}' does not exist in any time step to be excluded", excluded),
                    );
                }
            }

            let mut phase_indices: Vec<Vec<usize>> = Vec::new();
            for (step_position, step_labels) in labels.iter().enumerate() {
                let mut indices = Vec::new();
                for label in step_labels {
                    match self.process_index(label) {
                        Some(index) => indices.push(index),
                        None => sink.error(
                            format!("initialisation_phase[{}]", phase.label),
                            format!(
                                "inserted process '{}' in time step '{}' does not exist",
                                label, self.core.calendar.time_steps[step_position].label
                            ),
                        ),
                    }
                }
                phase_indices.push(indices);
            }
            init.push(phase_indices);
        }

        // mortality blocks: first..last consecutive mortality processes
        let mut mortality_blocks = Vec::with_capacity(main.len());
        for indices in &main {
            let mut block: Option<(usize, usize)> = None;
            for (position, &process_index) in indices.iter().enumerate() {
                if self.processes[process_index].process_type() == ProcessType::Mortality {
                    block = match block {
                        None => Some((position, position)),
                        Some((start, _)) => Some((start, position)),
                    };
                }
            }
            mortality_blocks.push(block);
        }

        // an age-structured cycle with no ageing process cannot advance
        let has_ageing = self
            .processes
            .iter()
            .any(|p| p.process_type() == ProcessType::Ageing);
        if !has_ageing && !self.processes.is_empty() {
            sink.error("model", "no ageing process is defined in the annual cycle");
        }

        self.layout = CycleLayout {
            main,
            init,
            mortality_blocks,
        };
    }

    fn build_estimates(&mut self, sink: &mut DiagnosticSink) {
        for i in 0..self.estimates.len() {
            let location = format!("estimate[{}]", self.estimates[i].label);
            if let Err(err) = self.estimates[i].parse_targets() {
                sink.error(&location, err.to_string());
                continue;
            }
            // a target that cannot be read will never be writable either
            let target = self.estimates[i].target().clone();
            if let Err(err) = self.get_addressable(&target) {
                sink.error(&location, err.to_string());
                continue;
            }
            let estimate = &self.estimates[i];
            let value = self.get_addressable(estimate.target()).unwrap_or(0.0);
            if value < estimate.lower_bound || value > estimate.upper_bound {
                sink.error(
                    &location,
                    format!(
                        "current value ({}) is outside the bounds [{}, {}]",
                        value, estimate.lower_bound, estimate.upper_bound
                    ),
                );
            }
        }
    }

    /// Read an addressable value through the path router
    pub fn get_addressable(&self, target: &AddressTarget) -> Result<f64, ModelError> {
        let missing = || ModelError::UnknownLabel {
            kind: "addressable",
            label: target.to_string(),
        };
        match target.block {
            AddressBlock::Process => {
                let process = self
                    .processes
                    .iter()
                    .find(|p| p.label == target.label)
                    .ok_or_else(missing)?;
                process.addressable(&target.parameter, &target.key).ok_or_else(missing)
            }
            AddressBlock::Selectivity => {
                let selectivity = self
                    .core
                    .selectivities
                    .iter()
                    .find(|s| s.label == target.label)
                    .ok_or_else(missing)?;
                let index = match &target.key {
                    AddressKey::Index(i) => Some(*i),
                    _ => None,
                };
                selectivity.addressable(&target.parameter, index).ok_or_else(missing)
            }
            AddressBlock::Catchability => {
                let catchability = self
                    .core
                    .catchabilities
                    .iter()
                    .find(|c| c.label == target.label)
                    .ok_or_else(missing)?;
                if target.parameter == "q" {
                    Ok(catchability.q)
                } else {
                    Err(missing())
                }
            }
            AddressBlock::AgeLength => {
                let age_length = self
                    .core
                    .age_lengths
                    .iter()
                    .find(|a| a.label == target.label)
                    .ok_or_else(missing)?;
                age_length.addressable(&target.parameter).ok_or_else(missing)
            }
        }
    }

    /// Write an addressable value through the path router. Bounds are the
    /// estimate layer's concern; this enforces only that the slot exists.
    pub fn set_addressable(&mut self, target: &AddressTarget, value: f64) -> Result<(), ModelError> {
        let missing = || ModelError::UnknownLabel {
            kind: "addressable",
            label: target.to_string(),
        };
        let written = match target.block {
            AddressBlock::Process => self
                .processes
                .iter_mut()
                .find(|p| p.label == target.label)
                .ok_or_else(missing)?
                .set_addressable(&target.parameter, &target.key, value),
            AddressBlock::Selectivity => {
                let index = match &target.key {
                    AddressKey::Index(i) => Some(*i),
                    _ => None,
                };
                self.core
                    .selectivities
                    .iter_mut()
                    .find(|s| s.label == target.label)
                    .ok_or_else(missing)?
                    .set_addressable(&target.parameter, index, value)
            }
            AddressBlock::Catchability => {
                let catchability = self
                    .core
                    .catchabilities
                    .iter_mut()
                    .find(|c| c.label == target.label)
                    .ok_or_else(missing)?;
                if target.parameter == "q" {
                    catchability.q = value;
                    true
                } else {
                    false
                }
            }
            AddressBlock::AgeLength => self
                .core
                .age_lengths
                .iter_mut()
                .find(|a| a.label == target.label)
                .ok_or_else(missing)?
                .set_addressable(&target.parameter, value),
        };
        if written {
            Ok(())
        } else {
            Err(missing())
        }
    }

    /// Read a whole addressable vector (for additional priors)
    pub fn get_addressable_vector(
        &self,
        block: AddressBlock,
        label: &str,
        parameter: &str,
    ) -> Result<Vec<f64>, ModelError> {
        match block {
            AddressBlock::Process => self
                .processes
                .iter()
                .find(|p| p.label == label)
                .and_then(|p| p.addressable_vector(parameter))
                .ok_or_else(|| ModelError::UnknownLabel {
                    kind: "addressable vector",
                    label: format!("process[{}].{}", label, parameter),
                }),
            _ => Err(ModelError::UnknownLabel {
                kind: "addressable vector",
                label: format!("{}[{}].{}", block.as_str(), label, parameter),
            }),
        }
    }

    /// Apply an estimate's value: bound-checked write to the master target
    /// and every `same`.
    pub fn apply_estimate(&mut self, index: usize, value: f64) -> Result<(), ModelError> {
        let estimate = &self.estimates[index];
        if value < estimate.lower_bound || value > estimate.upper_bound {
            return Err(ModelError::Bounds {
                parameter: estimate.parameter.clone(),
                value,
                lower: estimate.lower_bound,
                upper: estimate.upper_bound,
            });
        }
        let targets: Vec<AddressTarget> = std::iter::once(estimate.target().clone())
            .chain(estimate.same_targets().iter().cloned())
            .collect();
        for target in &targets {
            self.set_addressable(target, value)?;
        }
        Ok(())
    }
}
