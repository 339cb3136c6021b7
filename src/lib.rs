//! Stock Synthesis - age-structured population dynamics engine for fishery
//! stock assessment
//!
//! This library provides:
//! - An age-structured partition advanced through a configurable annual cycle
//! - A demographic process library (recruitment, mortality, ageing, tagging,
//!   movement, maturation)
//! - Equilibrium initialisation with B0/R0 support
//! - Observation likelihoods with age-length conversion and catchability
//! - Estimable parameters with bounds, priors and transformations
//! - A differential-evolution minimiser and a Metropolis MCMC sampler
//! - Deterministic, seedable simulation of observed data

pub mod age_length;
pub mod config;
pub mod derived_quantity;
pub mod error;
pub mod estimates;
pub mod length_weight;
pub mod mcmc;
pub mod minimiser;
pub mod model;
pub mod numeric;
pub mod objective;
pub mod observations;
pub mod partition;
pub mod penalty;
pub mod processes;
pub mod reports;
pub mod selectivity;

// Re-export commonly used types
pub use error::ModelError;
pub use mcmc::{ChainLink, Mcmc, McmcConfig};
pub use minimiser::{Minimiser, MinimiserConfig, MinimiserResult, MinimiserStatus};
pub use model::{Model, RunMode};
pub use objective::ObjectiveFunction;
pub use partition::{Category, Partition};
pub use selectivity::Selectivity;

#[cfg(test)]
pub(crate) mod test_support {
    //! Shared fixtures for unit tests

    use std::collections::HashMap;
    use std::sync::OnceLock;

    use rand::SeedableRng;
    use rand_chacha::ChaCha12Rng;

    use crate::model::{Calendar, ModelCore, RunMode, RunPhase, RunState, TimeStepDef};
    use crate::partition::Partition;
    use crate::processes::{ProcessBuildContext, ProcessType};

    /// A minimal core around a prepared partition: one annual time step,
    /// empty registries, seeded RNG.
    pub fn core_with_partition(partition: Partition) -> ModelCore {
        let max_age = partition.iter().map(|c| c.max_age).max().unwrap_or(10);
        let min_age = partition.iter().map(|c| c.min_age).min().unwrap_or(1);
        ModelCore {
            calendar: Calendar {
                start_year: 1990,
                final_year: 2012,
                projection_final_year: None,
                time_steps: vec![TimeStepDef {
                    label: "Annual".to_string(),
                    process_labels: Vec::new(),
                }],
                initialisation_phases: Vec::new(),
            },
            min_age,
            max_age,
            age_plus: true,
            length_bins: Vec::new(),
            length_plus: false,
            selectivities: Vec::new(),
            age_lengths: Vec::new(),
            length_weights: Vec::new(),
            catchabilities: Vec::new(),
            ageing_errors: Vec::new(),
            penalties: Vec::new(),
            additional_priors: Vec::new(),
            derived_quantities: Vec::new(),
            partition,
            state: RunState {
                run_mode: RunMode::Basic,
                phase: RunPhase::Execute,
                current_year: 2000,
                time_step: 0,
                init_phase: 0,
            },
            rng: ChaCha12Rng::seed_from_u64(1),
            penalty_log: Vec::new(),
            warnings: Vec::new(),
            equilibrium_snapshot: None,
        }
    }

    /// A build context over the core with no cycle information
    pub fn build_context(core: &ModelCore) -> ProcessBuildContext<'_> {
        static EMPTY_TYPES: OnceLock<HashMap<String, ProcessType>> = OnceLock::new();
        ProcessBuildContext {
            core,
            time_step_process_labels: &[],
            process_types: EMPTY_TYPES.get_or_init(HashMap::new),
        }
    }

    /// A small complete model with one estimable parameter and an
    /// abundance observation, for minimiser and MCMC tests: constant
    /// recruitment into a single stock with constant mortality.
    pub fn simple_estimation_model() -> crate::model::Model {
        use crate::estimates::{Estimate, Transformation};
        use crate::length_weight::LengthWeight;
        use crate::model::{Calendar, Model, TimeStepDef};
        use crate::observations::{Catchability, Likelihood, Observation, ObservationKind};
        use crate::partition::Category;
        use crate::processes::{
            Ageing, MortalityConstantRate, Process, ProcessKind, RecruitmentConstant,
        };
        use crate::selectivity::{Selectivity, SelectivityKind};

        let partition =
            Partition::new(vec![Category::new("stock", 1, 5, 0)]).unwrap();
        let mut core = core_with_partition(partition);
        core.calendar = Calendar {
            start_year: 2000,
            final_year: 2002,
            projection_final_year: None,
            time_steps: vec![TimeStepDef {
                label: "Annual".to_string(),
                process_labels: vec![
                    "Ageing".to_string(),
                    "Recruitment".to_string(),
                    "Mortality".to_string(),
                ],
            }],
            initialisation_phases: Vec::new(),
        };
        core.min_age = 1;
        core.max_age = 5;
        core.selectivities =
            vec![Selectivity::new("One", SelectivityKind::Constant { c: 1.0 })];
        core.age_lengths = vec![crate::age_length::AgeLength::new(
            "VB",
            crate::age_length::GrowthCurve::VonBertalanffy {
                linf: 100.0,
                k: 0.2,
                t0: 0.0,
            },
            crate::age_length::Distribution::Normal,
            0.1,
            None,
            "Basic",
        )];
        core.length_weights = vec![LengthWeight::new("Basic", 1e-8, 3.0)];
        core.catchabilities = vec![Catchability::new("Survey", 1.0)];

        let processes = vec![
            Process::new(
                "Ageing",
                ProcessKind::Ageing(Ageing::new(vec!["stock".to_string()])),
            ),
            Process::new(
                "Recruitment",
                ProcessKind::RecruitmentConstant(RecruitmentConstant::new(
                    vec!["stock".to_string()],
                    vec![1.0],
                    1000.0,
                )),
            ),
            Process::new(
                "Mortality",
                ProcessKind::MortalityConstantRate(MortalityConstantRate::new(
                    vec!["stock".to_string()],
                    vec![0.2],
                    vec!["One".to_string()],
                )),
            ),
        ];

        let mut observation = Observation::new(
            "Survey",
            ObservationKind::Abundance,
            vec![2001, 2002],
            "Annual",
            vec![vec!["stock".to_string()]],
            vec!["One".to_string()],
            Likelihood::Lognormal,
        );
        observation.catchability = Some("Survey".to_string());
        observation.observed.insert(2001, vec![1000.0]);
        observation.observed.insert(2002, vec![1500.0]);
        observation.error_values.insert(2001, vec![0.2]);
        observation.error_values.insert(2002, vec![0.2]);

        let estimate = Estimate::new("r0", "process[Recruitment].r0", 100.0, 10_000.0)
            .with_transformation(Transformation::Log);

        Model::new(core, processes, vec![observation], vec![estimate])
    }
}
