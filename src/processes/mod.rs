//! The process library
//!
//! Every transformation applied to the partition is a process. All variants
//! share a single contract — validate, build, reset, execute — and differ
//! only in the mutation they apply. The annual-cycle engine invokes them in
//! declared order and checks the partition for negative values afterwards.

mod ageing;
mod mortality;
mod predation;
mod recruitment;
mod tagging;
mod transition;

pub use ageing::Ageing;
pub use mortality::{Fishery, MortalityConstantRate, MortalityEventBiomass, MortalityInstantaneous};
pub use predation::MortalityPreySuitability;
pub use recruitment::{
    RecruitmentBevertonHolt, RecruitmentBevertonHoltWithDeviations, RecruitmentConstant,
};
pub use tagging::{TagByAge, TagByLength};
pub use transition::{MarkovianMovement, TransitionCategory};

use std::collections::HashMap;

use crate::error::{DiagnosticSink, ModelError};
use crate::estimates::addressable::AddressKey;
use crate::model::ModelCore;

/// Broad classification used for cycle ordering rules (ssb_offset
/// derivation, mortality-block recognition)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessType {
    Recruitment,
    Ageing,
    Mortality,
    Transition,
    Null,
}

/// Everything a process needs to resolve its references at build time
pub struct ProcessBuildContext<'a> {
    pub core: &'a ModelCore,
    /// Main-cycle process labels per time step
    pub time_step_process_labels: &'a [Vec<String>],
    /// Process type by label for every registered process
    pub process_types: &'a HashMap<String, ProcessType>,
}

impl ProcessBuildContext<'_> {
    /// Time-step indices whose main cycle contains the given process
    pub fn time_steps_with(&self, label: &str) -> Vec<usize> {
        self.time_step_process_labels
            .iter()
            .enumerate()
            .filter(|(_, labels)| labels.iter().any(|l| l.as_str() == label))
            .map(|(index, _)| index)
            .collect()
    }
}

/// A labelled process over the partition
#[derive(Debug, Clone)]
pub struct Process {
    pub label: String,
    pub kind: ProcessKind,
}

#[derive(Debug, Clone)]
pub enum ProcessKind {
    RecruitmentConstant(RecruitmentConstant),
    RecruitmentBevertonHolt(RecruitmentBevertonHolt),
    RecruitmentBevertonHoltWithDeviations(RecruitmentBevertonHoltWithDeviations),
    Ageing(Ageing),
    MortalityConstantRate(MortalityConstantRate),
    MortalityInstantaneous(MortalityInstantaneous),
    MortalityEventBiomass(MortalityEventBiomass),
    MortalityPreySuitability(MortalityPreySuitability),
    TransitionCategory(TransitionCategory),
    MarkovianMovement(MarkovianMovement),
    TagByAge(TagByAge),
    TagByLength(TagByLength),
    /// Placeholder that leaves the partition untouched
    Null,
}

impl Process {
    pub fn new(label: impl Into<String>, kind: ProcessKind) -> Self {
        Self {
            label: label.into(),
            kind,
        }
    }

    pub fn process_type(&self) -> ProcessType {
        match &self.kind {
            ProcessKind::RecruitmentConstant(_)
            | ProcessKind::RecruitmentBevertonHolt(_)
            | ProcessKind::RecruitmentBevertonHoltWithDeviations(_) => ProcessType::Recruitment,
            ProcessKind::Ageing(_) => ProcessType::Ageing,
            ProcessKind::MortalityConstantRate(_)
            | ProcessKind::MortalityInstantaneous(_)
            | ProcessKind::MortalityEventBiomass(_)
            | ProcessKind::MortalityPreySuitability(_) => ProcessType::Mortality,
            ProcessKind::TransitionCategory(_)
            | ProcessKind::MarkovianMovement(_)
            | ProcessKind::TagByAge(_)
            | ProcessKind::TagByLength(_) => ProcessType::Transition,
            ProcessKind::Null => ProcessType::Null,
        }
    }

    /// Check parameter legality before any cross-references are resolved
    pub fn validate(&mut self, sink: &mut DiagnosticSink) {
        let location = format!("process[{}]", self.label);
        match &mut self.kind {
            ProcessKind::RecruitmentConstant(p) => p.validate(&location, sink),
            ProcessKind::RecruitmentBevertonHolt(p) => p.validate(&location, sink),
            ProcessKind::RecruitmentBevertonHoltWithDeviations(p) => p.validate(&location, sink),
            ProcessKind::Ageing(p) => p.validate(&location, sink),
            ProcessKind::MortalityConstantRate(p) => p.validate(&location, sink),
            ProcessKind::MortalityInstantaneous(p) => p.validate(&location, sink),
            ProcessKind::MortalityEventBiomass(p) => p.validate(&location, sink),
            ProcessKind::MortalityPreySuitability(p) => p.validate(&location, sink),
            ProcessKind::TransitionCategory(p) => p.validate(&location, sink),
            ProcessKind::MarkovianMovement(p) => p.validate(&location, sink),
            ProcessKind::TagByAge(p) => p.validate(&location, sink),
            ProcessKind::TagByLength(p) => p.validate(&location, sink),
            ProcessKind::Null => {}
        }
    }

    /// Resolve references and pre-compute invariants
    pub fn build(&mut self, ctx: &ProcessBuildContext) -> Result<(), ModelError> {
        let label = self.label.clone();
        match &mut self.kind {
            ProcessKind::RecruitmentConstant(p) => p.build(ctx),
            ProcessKind::RecruitmentBevertonHolt(p) => p.build(&label, ctx),
            ProcessKind::RecruitmentBevertonHoltWithDeviations(p) => p.build(&label, ctx),
            ProcessKind::Ageing(p) => p.build(ctx),
            ProcessKind::MortalityConstantRate(p) => p.build(&label, ctx),
            ProcessKind::MortalityInstantaneous(p) => p.build(&label, ctx),
            ProcessKind::MortalityEventBiomass(p) => p.build(ctx),
            ProcessKind::MortalityPreySuitability(p) => p.build(ctx),
            ProcessKind::TransitionCategory(p) => p.build(ctx),
            ProcessKind::MarkovianMovement(p) => p.build(ctx),
            ProcessKind::TagByAge(p) => p.build(ctx),
            ProcessKind::TagByLength(p) => p.build(ctx),
            ProcessKind::Null => Ok(()),
        }
    }

    /// Return internal caches to their post-build state
    pub fn reset(&mut self) {
        match &mut self.kind {
            ProcessKind::RecruitmentBevertonHolt(p) => p.reset(),
            ProcessKind::RecruitmentBevertonHoltWithDeviations(p) => p.reset(),
            ProcessKind::TagByAge(p) => p.reset(),
            ProcessKind::TagByLength(p) => p.reset(),
            _ => {}
        }
    }

    /// Mutate the partition for the current year and time step
    pub fn execute(&mut self, core: &mut ModelCore) -> Result<(), ModelError> {
        let label = &self.label;
        match &mut self.kind {
            ProcessKind::RecruitmentConstant(p) => p.execute(core),
            ProcessKind::RecruitmentBevertonHolt(p) => p.execute(core),
            ProcessKind::RecruitmentBevertonHoltWithDeviations(p) => p.execute(core),
            ProcessKind::Ageing(p) => p.execute(core),
            ProcessKind::MortalityConstantRate(p) => p.execute(core),
            ProcessKind::MortalityInstantaneous(p) => p.execute(label, core),
            ProcessKind::MortalityEventBiomass(p) => p.execute(label, core),
            ProcessKind::MortalityPreySuitability(p) => p.execute(label, core),
            ProcessKind::TransitionCategory(p) => p.execute(label, core),
            ProcessKind::MarkovianMovement(p) => p.execute(label, core),
            ProcessKind::TagByAge(p) => p.execute(label, core),
            ProcessKind::TagByLength(p) => p.execute(label, core),
            ProcessKind::Null => Ok(()),
        }
    }

    /// Read an addressable parameter
    pub fn addressable(&self, name: &str, key: &AddressKey) -> Option<f64> {
        match &self.kind {
            ProcessKind::RecruitmentConstant(p) => p.addressable(name, key),
            ProcessKind::RecruitmentBevertonHolt(p) => p.addressable(name, key),
            ProcessKind::RecruitmentBevertonHoltWithDeviations(p) => p.addressable(name, key),
            ProcessKind::MortalityConstantRate(p) => p.addressable(name, key),
            ProcessKind::MortalityInstantaneous(p) => p.addressable(name, key),
            ProcessKind::MortalityEventBiomass(p) => p.addressable(name, key),
            ProcessKind::MortalityPreySuitability(p) => p.addressable(name, key),
            ProcessKind::TransitionCategory(p) => p.addressable(name, key),
            ProcessKind::MarkovianMovement(p) => p.addressable(name, key),
            ProcessKind::TagByAge(p) => p.addressable(name, key),
            ProcessKind::TagByLength(p) => p.addressable(name, key),
            _ => None,
        }
    }

    /// Write an addressable parameter
    pub fn set_addressable(&mut self, name: &str, key: &AddressKey, value: f64) -> bool {
        match &mut self.kind {
            ProcessKind::RecruitmentConstant(p) => p.set_addressable(name, key, value),
            ProcessKind::RecruitmentBevertonHolt(p) => p.set_addressable(name, key, value),
            ProcessKind::RecruitmentBevertonHoltWithDeviations(p) => {
                p.set_addressable(name, key, value)
            }
            ProcessKind::MortalityConstantRate(p) => p.set_addressable(name, key, value),
            ProcessKind::MortalityInstantaneous(p) => p.set_addressable(name, key, value),
            ProcessKind::MortalityEventBiomass(p) => p.set_addressable(name, key, value),
            ProcessKind::MortalityPreySuitability(p) => p.set_addressable(name, key, value),
            ProcessKind::TransitionCategory(p) => p.set_addressable(name, key, value),
            ProcessKind::MarkovianMovement(p) => p.set_addressable(name, key, value),
            ProcessKind::TagByAge(p) => p.set_addressable(name, key, value),
            ProcessKind::TagByLength(p) => p.set_addressable(name, key, value),
            _ => false,
        }
    }

    /// Read a whole addressable vector, where the parameter is vector-typed
    pub fn addressable_vector(&self, name: &str) -> Option<Vec<f64>> {
        match &self.kind {
            ProcessKind::RecruitmentConstant(p) => p.addressable_vector(name),
            ProcessKind::RecruitmentBevertonHolt(p) => p.addressable_vector(name),
            ProcessKind::RecruitmentBevertonHoltWithDeviations(p) => p.addressable_vector(name),
            ProcessKind::MortalityConstantRate(p) => p.addressable_vector(name),
            _ => None,
        }
    }
}
