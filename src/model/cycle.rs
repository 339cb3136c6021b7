//! The annual-cycle engine
//!
//! Executes ordered time steps of ordered processes, iterates
//! initialisation phases to equilibrium (with the plus-group shortcut and
//! B0 rescaling), runs the main calendar with observations attached, and
//! assembles the repeatable full iteration used by estimation.

use log::{debug, warn};

use crate::error::ModelError;
use crate::model::{InitialisationKind, Model, ModelCore, RunMode, RunPhase};
use crate::processes::{ProcessKind, ProcessType};

/// Plus-group relative change below which initialisation is converged
const PLUS_GROUP_CONVERGENCE: f64 = 0.005;
/// Upper clamp on the estimated annual plus-group growth rate
const PLUS_GROUP_MAX_RATE: f64 = 0.99;
/// Safety cap on equilibrium cycles for pathological configurations
const MAX_EQUILIBRIUM_CYCLES: usize = 10_000;

impl ModelCore {
    /// Cache the pre-mortality partition state for every derived quantity
    /// placed in this time step
    fn cache_derived_quantities(&mut self, time_step: usize) {
        let ModelCore {
            derived_quantities,
            partition,
            ..
        } = self;
        for derived_quantity in derived_quantities
            .iter_mut()
            .filter(|d| d.time_step == time_step)
        {
            derived_quantity.build_cache(partition);
        }
    }

    /// Sample every derived quantity placed in this time step
    fn execute_derived_quantities(&mut self, time_step: usize, init_phase: Option<usize>) {
        let year = self.state.current_year;
        let ModelCore {
            derived_quantities,
            partition,
            selectivities,
            ..
        } = self;
        for derived_quantity in derived_quantities
            .iter_mut()
            .filter(|d| d.time_step == time_step)
        {
            match init_phase {
                Some(phase) => {
                    derived_quantity.execute_for_initialisation(phase, partition, selectivities)
                }
                None => derived_quantity.execute_for_year(year, partition, selectivities),
            }
        }
    }
}

impl Model {
    /// Execute the processes of one time step, in declared order, caching
    /// derived quantities at the start of the mortality block.
    fn execute_time_step(
        &mut self,
        time_step: usize,
        init_phase: Option<usize>,
    ) -> Result<(), ModelError> {
        self.core.state.time_step = time_step;

        let indices: Vec<usize> = match init_phase {
            Some(phase) => self.layout.init[phase][time_step].clone(),
            None => self.layout.main[time_step].clone(),
        };

        let block_start = indices
            .iter()
            .position(|&i| self.processes[i].process_type() == ProcessType::Mortality);
        if block_start.is_none() {
            self.core.cache_derived_quantities(time_step);
        }

        for (position, &process_index) in indices.iter().enumerate() {
            if Some(position) == block_start {
                self.core.cache_derived_quantities(time_step);
            }
            self.processes[process_index].execute(&mut self.core)?;
            self.core
                .partition
                .check_non_negative(&self.processes[process_index].label)?;
        }

        self.core.execute_derived_quantities(time_step, init_phase);
        Ok(())
    }

    /// Run one full annual cycle with an initialisation phase's process
    /// ordering, `cycles` times.
    pub fn execute_initialisation(
        &mut self,
        phase: usize,
        cycles: usize,
    ) -> Result<(), ModelError> {
        self.core.state.phase = RunPhase::Initialise;
        self.core.state.init_phase = phase;
        for _ in 0..cycles {
            for time_step in 0..self.core.calendar.time_steps.len() {
                self.execute_time_step(time_step, Some(phase))?;
            }
        }
        Ok(())
    }

    /// Iterate every initialisation phase to its starting state, leaving
    /// the equilibrium snapshot behind for reset.
    pub fn run_initialisation(&mut self) -> Result<(), ModelError> {
        self.core.state.phase = RunPhase::Initialise;
        self.core.state.current_year = self.core.calendar.start_year;
        let start_year = self.core.calendar.start_year;
        self.core.update_partition_mean_data(start_year);

        for phase in 0..self.core.calendar.initialisation_phases.len() {
            match self.core.calendar.initialisation_phases[phase].kind.clone() {
                InitialisationKind::Cycles { cycles } => {
                    self.execute_initialisation(phase, cycles as usize)?;
                }
                InitialisationKind::Derived => self.run_derived_initialisation(phase)?,
            }
        }

        self.core.equilibrium_snapshot = Some(self.core.partition.snapshot());
        self.core.state.phase = RunPhase::Execute;
        Ok(())
    }

    /// Equilibrium initialisation: age-spread warmup, plus-group shortcut,
    /// convergence loop, then B0 rescaling when a Beverton-Holt recruitment
    /// was declared with B0.
    fn run_derived_initialisation(&mut self, phase: usize) -> Result<(), ModelError> {
        let mut year_range = self.core.age_spread();
        if self.phase_has_recruitment_before_ageing(phase) {
            year_range -= 1;
        }
        debug!("running initialisation phase {} for {} cycles", phase, year_range);
        self.execute_initialisation(phase, year_range)?;

        // plus-group shortcut: estimate the annual multiplicative change c
        // of the plus group over one cycle and project it to its limit
        if self.core.age_plus {
            let snapshot = self.core.partition.snapshot();
            self.execute_initialisation(phase, 1)?;
            let mut scaled = Vec::with_capacity(self.core.partition.len());
            for (index, category) in self.core.partition.iter().enumerate() {
                let plus_index = category.data.len() - 1;
                let old_plus = snapshot[index][plus_index];
                let new_plus = category.data[plus_index];
                if old_plus > 0.0 {
                    let c = (new_plus / old_plus - 1.0).clamp(0.0, PLUS_GROUP_MAX_RATE);
                    scaled.push(Some(1.0 / (1.0 - c)));
                } else {
                    scaled.push(None);
                }
            }
            self.core.partition.restore(&snapshot);
            for (index, factor) in scaled.iter().enumerate() {
                if let Some(factor) = factor {
                    let category = self.core.partition.get_mut(index);
                    let plus_index = category.data.len() - 1;
                    category.data[plus_index] *= factor;
                }
            }
        }

        // iterate single cycles until the plus group stabilises
        let mut old_plus_group: Vec<f64> = self
            .core
            .partition
            .iter()
            .map(|c| c.data[c.data.len() - 1])
            .collect();
        let mut cycles = 0usize;
        loop {
            self.execute_initialisation(phase, 1)?;
            let mut max_relative_change: f64 = 0.0;
            for (index, category) in self.core.partition.iter().enumerate() {
                let plus = category.data[category.data.len() - 1];
                if old_plus_group[index] != 0.0 {
                    let change = ((plus - old_plus_group[index]) / old_plus_group[index]).abs();
                    max_relative_change = max_relative_change.max(change);
                }
                old_plus_group[index] = plus;
            }
            if max_relative_change <= PLUS_GROUP_CONVERGENCE {
                break;
            }
            cycles += 1;
            if cycles >= MAX_EQUILIBRIUM_CYCLES {
                let message = format!(
                    "initialisation phase {} failed to converge after {} cycles (last change {})",
                    phase, cycles, max_relative_change
                );
                warn!("{}", message);
                self.core.warnings.push(message);
                break;
            }
        }

        // B0-initialised recruitment: rescale to B0 and rerun one cycle so
        // derived quantities live in the scaled space
        let mut b0_initialised = false;
        for index in 0..self.processes.len() {
            match &mut self.processes[index].kind {
                ProcessKind::RecruitmentBevertonHolt(recruitment) => {
                    if recruitment.b0_initialised() {
                        recruitment.scale_partition(&mut self.core)?;
                        b0_initialised = true;
                    }
                }
                ProcessKind::RecruitmentBevertonHoltWithDeviations(recruitment) => {
                    if recruitment.b0_initialised() {
                        recruitment.scale_partition(&mut self.core)?;
                        b0_initialised = true;
                    }
                }
                _ => {}
            }
        }
        if b0_initialised {
            self.execute_initialisation(phase, 1)?;
        }

        // legacy CASAL evaluation: one extra cycle to populate derived
        // quantities, then restore the pre-cycle partition
        if self.core.calendar.initialisation_phases[phase].casal_initialisation {
            let snapshot = self.core.partition.snapshot();
            self.execute_initialisation(phase, 1)?;
            self.core.partition.restore(&snapshot);
        }
        Ok(())
    }

    /// Does this phase's cycle run a recruitment process before ageing?
    fn phase_has_recruitment_before_ageing(&self, phase: usize) -> bool {
        let mut recruitment_index = usize::MAX;
        let mut ageing_index = usize::MAX;
        let mut position = 0usize;
        for step in &self.layout.init[phase] {
            for &process_index in step {
                match self.processes[process_index].process_type() {
                    ProcessType::Recruitment if recruitment_index == usize::MAX => {
                        recruitment_index = position
                    }
                    ProcessType::Ageing if ageing_index == usize::MAX => ageing_index = position,
                    _ => {}
                }
                position += 1;
            }
        }
        recruitment_index < ageing_index
    }

    /// Execute one model year: every time step in order, with observation
    /// caches built at the start of their step and observations executed
    /// after the step's processes.
    pub fn execute_year(&mut self, year: u32) -> Result<(), ModelError> {
        self.core.state.phase = RunPhase::Execute;
        self.core.state.current_year = year;
        self.core.update_partition_mean_data(year);

        for time_step in 0..self.core.calendar.time_steps.len() {
            for observation in &mut self.observations {
                if observation.time_step() == time_step && observation.is_active(year) {
                    observation.pre_execute(&self.core);
                }
            }

            self.execute_time_step(time_step, None)?;

            for observation in &mut self.observations {
                if observation.time_step() == time_step && observation.is_active(year) {
                    observation.execute(&self.core)?;
                }
            }
        }
        Ok(())
    }

    /// Run the main calendar, extended to the projection horizon when the
    /// model is in projection mode.
    pub fn run_years(&mut self) -> Result<(), ModelError> {
        let final_year = if self.core.state.run_mode == RunMode::Projection {
            self.core
                .calendar
                .projection_final_year
                .unwrap_or(self.core.calendar.final_year)
        } else {
            self.core.calendar.final_year
        };
        for year in self.core.calendar.start_year..=final_year {
            self.execute_year(year)?;
        }
        Ok(())
    }

    /// One complete, repeatable model iteration: reset, initialise, run
    /// every year, and score the observations. Identical inputs produce
    /// identical scores.
    pub fn run_full_iteration(&mut self) -> Result<(), ModelError> {
        let years = self.core.calendar.all_years();
        let time_step_count = self.core.calendar.time_steps.len();
        for age_length in &mut self.core.age_lengths {
            age_length.reset(&years, time_step_count);
        }
        self.core.partition.zero();
        for process in &mut self.processes {
            process.reset();
        }
        for derived_quantity in &mut self.core.derived_quantities {
            derived_quantity.reset();
        }
        self.core.penalty_log.clear();
        for observation in &mut self.observations {
            observation.reset();
        }

        self.run_initialisation()?;
        self.run_years()?;

        for observation in &mut self.observations {
            observation.calculate_scores();
        }
        Ok(())
    }

    /// Restore the partition to the post-initialisation snapshot
    pub fn reset_to_equilibrium(&mut self) {
        if let Some(snapshot) = self.core.equilibrium_snapshot.take() {
            self.core.partition.restore(&snapshot);
            self.core.equilibrium_snapshot = Some(snapshot);
        }
    }

    /// Replace every observation's observed values with simulated draws
    /// and rescore. Used by the simulation run mode.
    pub fn simulate_observations(&mut self) {
        let Model {
            observations, core, ..
        } = self;
        for observation in observations.iter_mut() {
            observation.simulate(&mut core.rng);
            observation.calculate_scores();
        }
    }
}
