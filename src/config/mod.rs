//! Configuration schema
//!
//! The engine consumes a structured configuration document (JSON, with bulk
//! tables optionally in CSV files referenced by path). Every block maps to
//! one registry entry; type-tagged variants select the concrete kind, and
//! building converts the schema into a `Model` ready for `build()`.

pub mod loader;

use std::collections::BTreeMap;
use std::error::Error;
use std::path::{Path, PathBuf};

use rand::SeedableRng;
use rand_chacha::ChaCha12Rng;
use serde::Deserialize;

use crate::age_length::{AgeLength, Distribution, GrowthCurve};
use crate::derived_quantity::{DerivedQuantity, DerivedQuantityKind};
use crate::estimates::{Estimate, Prior, Transformation};
use crate::length_weight::LengthWeight;
use crate::mcmc::{CovarianceAdjustment, McmcConfig, ProposalDistribution};
use crate::minimiser::MinimiserConfig;
use crate::model::{
    Calendar, InitialisationKind, InitialisationPhase, Model, ModelCore, ProcessInsertion,
    RunMode, RunPhase, RunState, TimeStepDef,
};
use crate::observations::ageing_error::{AgeingError, AgeingErrorKind};
use crate::observations::{Catchability, DataWeight, Likelihood, Observation, ObservationKind};
use crate::partition::{Category, Partition};
use crate::penalty::{AdditionalPrior, AdditionalPriorKind, Penalty};
use crate::processes::{
    Ageing, Fishery, MarkovianMovement, MortalityConstantRate, MortalityEventBiomass,
    MortalityInstantaneous, MortalityPreySuitability, Process, ProcessKind,
    RecruitmentBevertonHolt, RecruitmentBevertonHoltWithDeviations, RecruitmentConstant, TagByAge,
    TagByLength, TransitionCategory,
};

/// Default RNG seed when none is supplied on the command line
pub const DEFAULT_SEED: u64 = 123;

/// Parse the string year keys of a configuration table.
///
/// JSON object keys are always strings, and serde's flattened tagged
/// enums buffer their content in a way that defeats integer-keyed maps,
/// so the schema carries strings and converts here.
fn parse_year_keys<V>(
    map: BTreeMap<String, V>,
    location: &str,
) -> Result<BTreeMap<u32, V>, Box<dyn Error>> {
    map.into_iter()
        .map(|(key, value)| {
            key.parse::<u32>()
                .map(|year| (year, value))
                .map_err(|_| format!("{}: year key '{}' is not numeric", location, key).into())
        })
        .collect()
}

#[derive(Debug, Deserialize)]
pub struct ModelConfig {
    pub model: ModelBlock,
    pub categories: Vec<CategoryConfig>,
    #[serde(default)]
    pub initialisation_phases: Vec<InitialisationPhaseConfig>,
    #[serde(default)]
    pub length_weights: Vec<LengthWeightConfig>,
    #[serde(default)]
    pub age_lengths: Vec<AgeLengthConfig>,
    #[serde(default)]
    pub selectivities: Vec<SelectivityConfig>,
    #[serde(default)]
    pub penalties: Vec<PenaltyConfig>,
    #[serde(default)]
    pub catchabilities: Vec<CatchabilityConfig>,
    #[serde(default)]
    pub ageing_errors: Vec<AgeingErrorConfig>,
    #[serde(default)]
    pub derived_quantities: Vec<DerivedQuantityConfig>,
    #[serde(default)]
    pub processes: Vec<ProcessConfig>,
    #[serde(default)]
    pub observations: Vec<ObservationConfig>,
    #[serde(default)]
    pub estimates: Vec<EstimateConfig>,
    #[serde(default)]
    pub additional_priors: Vec<AdditionalPriorConfig>,
    #[serde(default)]
    pub minimiser: MinimiserBlock,
    #[serde(default)]
    pub mcmc: McmcBlock,
    #[serde(default)]
    pub profile: Option<ProfileBlock>,
}

#[derive(Debug, Deserialize)]
pub struct ModelBlock {
    pub start_year: u32,
    pub final_year: u32,
    #[serde(default)]
    pub projection_final_year: Option<u32>,
    pub min_age: u32,
    pub max_age: u32,
    #[serde(default = "default_true")]
    pub age_plus: bool,
    #[serde(default)]
    pub length_bins: Vec<f64>,
    #[serde(default)]
    pub length_plus: bool,
    pub time_steps: Vec<TimeStepConfig>,
}

#[derive(Debug, Deserialize)]
pub struct TimeStepConfig {
    pub label: String,
    pub processes: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct CategoryConfig {
    pub label: String,
    pub age_length: String,
}

#[derive(Debug, Deserialize)]
pub struct InitialisationPhaseConfig {
    pub label: String,
    #[serde(default = "default_phase_kind")]
    pub kind: String,
    #[serde(default)]
    pub cycles: u32,
    #[serde(default)]
    pub insert_processes: Vec<InsertProcessConfig>,
    #[serde(default)]
    pub exclude_processes: Vec<String>,
    #[serde(default)]
    pub casal_initialisation: bool,
}

#[derive(Debug, Deserialize)]
pub struct InsertProcessConfig {
    pub time_step: String,
    #[serde(default)]
    pub before: Option<String>,
    pub process: String,
}

#[derive(Debug, Deserialize)]
pub struct LengthWeightConfig {
    pub label: String,
    pub a: f64,
    pub b: f64,
}

#[derive(Debug, Deserialize)]
pub struct AgeLengthConfig {
    pub label: String,
    #[serde(flatten)]
    pub curve: AgeLengthCurveConfig,
    #[serde(default = "default_distribution")]
    pub distribution: String,
    #[serde(default)]
    pub cv_first: f64,
    #[serde(default)]
    pub cv_last: Option<f64>,
    #[serde(default)]
    pub by_length: bool,
    #[serde(default)]
    pub casal_normal_cdf: bool,
    #[serde(default)]
    pub time_step_proportions: Vec<f64>,
    pub length_weight: String,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgeLengthCurveConfig {
    VonBertalanffy { linf: f64, k: f64, t0: f64 },
    Schnute {
        y1: f64,
        y2: f64,
        tau1: f64,
        tau2: f64,
        a: f64,
        b: f64,
    },
    Data {
        lengths_by_year: BTreeMap<String, Vec<f64>>,
    },
}

#[derive(Debug, Deserialize)]
pub struct SelectivityConfig {
    pub label: String,
    #[serde(flatten)]
    pub kind: SelectivityKindConfig,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SelectivityKindConfig {
    Constant { c: f64 },
    Logistic {
        a50: f64,
        ato95: f64,
        #[serde(default = "default_one")]
        alpha: f64,
    },
    DoubleNormal {
        mu: f64,
        sigma_l: f64,
        sigma_r: f64,
        #[serde(default = "default_one")]
        alpha: f64,
    },
    AllValuesBounded { l: u32, h: u32, v: Vec<f64> },
    KnifeEdge {
        e: f64,
        #[serde(default = "default_one")]
        alpha: f64,
    },
}

#[derive(Debug, Deserialize)]
pub struct PenaltyConfig {
    pub label: String,
    #[serde(default = "default_one")]
    pub multiplier: f64,
    #[serde(default)]
    pub log_scale: bool,
}

#[derive(Debug, Deserialize)]
pub struct CatchabilityConfig {
    pub label: String,
    pub q: f64,
}

#[derive(Debug, Deserialize)]
pub struct AgeingErrorConfig {
    pub label: String,
    #[serde(flatten)]
    pub kind: AgeingErrorKindConfig,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgeingErrorKindConfig {
    None,
    Normal { cv: f64 },
    OffByOne { p1: f64, p2: f64 },
}

#[derive(Debug, Deserialize)]
pub struct DerivedQuantityConfig {
    pub label: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub time_step: String,
    pub categories: Vec<String>,
    pub selectivities: Vec<String>,
    #[serde(default = "default_one")]
    pub time_step_proportion: f64,
}

#[derive(Debug, Deserialize)]
pub struct FisheryConfig {
    pub label: String,
    pub time_step: String,
    pub categories: Vec<String>,
    pub selectivities: Vec<String>,
    #[serde(default = "default_u_max")]
    pub u_max: f64,
    #[serde(default)]
    pub penalty: Option<String>,
    #[serde(default)]
    pub catches: BTreeMap<String, f64>,
    #[serde(default)]
    pub catches_file: Option<PathBuf>,
}

#[derive(Debug, Deserialize)]
pub struct ProcessConfig {
    pub label: String,
    #[serde(flatten)]
    pub kind: ProcessKindConfig,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProcessKindConfig {
    RecruitmentConstant {
        categories: Vec<String>,
        proportions: Vec<f64>,
        r0: f64,
        #[serde(default)]
        age: Option<u32>,
    },
    RecruitmentBevertonHolt {
        categories: Vec<String>,
        proportions: Vec<f64>,
        #[serde(default)]
        r0: Option<f64>,
        #[serde(default)]
        b0: Option<f64>,
        #[serde(default)]
        age: Option<u32>,
        #[serde(default = "default_one")]
        steepness: f64,
        ssb: String,
        #[serde(default)]
        b0_phase: Option<String>,
        #[serde(default)]
        ssb_offset: Option<u32>,
        ycs_values: Vec<f64>,
        #[serde(default)]
        standardise_ycs_years: Vec<u32>,
        #[serde(default)]
        projection_ycs: BTreeMap<String, f64>,
    },
    RecruitmentBevertonHoltWithDeviations {
        categories: Vec<String>,
        proportions: Vec<f64>,
        #[serde(default)]
        r0: Option<f64>,
        #[serde(default)]
        b0: Option<f64>,
        #[serde(default)]
        age: Option<u32>,
        #[serde(default = "default_one")]
        steepness: f64,
        ssb: String,
        #[serde(default)]
        b0_phase: Option<String>,
        #[serde(default)]
        ssb_offset: Option<u32>,
        deviations: Vec<f64>,
        sigma_r: f64,
    },
    Ageing {
        categories: Vec<String>,
    },
    MortalityConstantRate {
        categories: Vec<String>,
        m: Vec<f64>,
        selectivities: Vec<String>,
        #[serde(default)]
        time_step_ratio: Vec<f64>,
    },
    MortalityInstantaneous {
        categories: Vec<String>,
        m: Vec<f64>,
        #[serde(default)]
        time_step_ratio: Vec<f64>,
        fisheries: Vec<FisheryConfig>,
    },
    MortalityEventBiomass {
        categories: Vec<String>,
        selectivities: Vec<String>,
        catches: BTreeMap<String, f64>,
        #[serde(default = "default_u_max")]
        u_max: f64,
        #[serde(default)]
        penalty: Option<String>,
    },
    MortalityPreySuitability {
        prey_categories: Vec<String>,
        prey_selectivities: Vec<String>,
        electivities: Vec<f64>,
        predator_categories: Vec<String>,
        predator_selectivities: Vec<String>,
        consumption_rate: f64,
        years: Vec<u32>,
        #[serde(default = "default_u_max")]
        u_max: f64,
        #[serde(default)]
        penalty: Option<String>,
    },
    TransitionCategory {
        from: Vec<String>,
        to: Vec<String>,
        proportions: Vec<f64>,
        selectivities: Vec<String>,
    },
    MarkovianMovement {
        from: Vec<String>,
        to: Vec<String>,
        proportions: Vec<f64>,
        selectivities: Vec<String>,
    },
    TagByLength {
        from: Vec<String>,
        to: Vec<String>,
        years: Vec<u32>,
        #[serde(default)]
        numbers: BTreeMap<String, Vec<f64>>,
        #[serde(default)]
        numbers_file: Option<PathBuf>,
        #[serde(default = "default_u_max")]
        u_max: f64,
        #[serde(default)]
        penalty: Option<String>,
        selectivities: Vec<String>,
        #[serde(default)]
        initial_mortality: f64,
        #[serde(default)]
        initial_mortality_selectivity: Option<String>,
        #[serde(default = "default_loss_rate")]
        loss_rate: Vec<f64>,
        #[serde(default)]
        loss_rate_selectivities: Vec<String>,
    },
    TagByAge {
        from: Vec<String>,
        to: Vec<String>,
        min_age: u32,
        max_age: u32,
        years: Vec<u32>,
        #[serde(default)]
        numbers: BTreeMap<String, Vec<f64>>,
        #[serde(default)]
        numbers_file: Option<PathBuf>,
        #[serde(default)]
        proportions: BTreeMap<String, Vec<f64>>,
        #[serde(default)]
        n: BTreeMap<String, f64>,
        #[serde(default = "default_u_max")]
        u_max: f64,
        #[serde(default)]
        penalty: Option<String>,
        selectivities: Vec<String>,
        #[serde(default)]
        initial_mortality: f64,
        #[serde(default)]
        initial_mortality_selectivity: Option<String>,
        #[serde(default = "default_loss_rate")]
        loss_rate: Vec<f64>,
        #[serde(default)]
        loss_rate_selectivities: Vec<String>,
    },
    Null,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LikelihoodConfig {
    Lognormal,
    Normal,
    Multinomial,
    Binomial,
    BinomialApprox,
    Dirichlet,
    LogisticNormal { sigma: f64, rho: f64 },
}

impl LikelihoodConfig {
    fn into_likelihood(self) -> Likelihood {
        match self {
            LikelihoodConfig::Lognormal => Likelihood::Lognormal,
            LikelihoodConfig::Normal => Likelihood::Normal,
            LikelihoodConfig::Multinomial => Likelihood::Multinomial,
            LikelihoodConfig::Binomial => Likelihood::Binomial,
            LikelihoodConfig::BinomialApprox => Likelihood::BinomialApprox,
            LikelihoodConfig::Dirichlet => Likelihood::Dirichlet,
            LikelihoodConfig::LogisticNormal { sigma, rho } => {
                Likelihood::LogisticNormal { sigma, rho }
            }
        }
    }
}

#[derive(Debug, Deserialize, Default)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DataWeightConfig {
    #[default]
    None,
    Multiplicative { weight: f64 },
    Francis { weight: f64 },
    Dispersion { weight: f64 },
}

impl DataWeightConfig {
    fn into_data_weight(self) -> DataWeight {
        match self {
            DataWeightConfig::None => DataWeight::None,
            DataWeightConfig::Multiplicative { weight } => DataWeight::Multiplicative { weight },
            DataWeightConfig::Francis { weight } => DataWeight::Francis { weight },
            DataWeightConfig::Dispersion { weight } => DataWeight::Dispersion { weight },
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ObservationConfig {
    pub label: String,
    #[serde(flatten)]
    pub kind: ObservationKindConfig,
    pub years: Vec<u32>,
    pub time_step: String,
    pub categories: Vec<Vec<String>>,
    pub selectivities: Vec<String>,
    #[serde(default)]
    pub catchability: Option<String>,
    pub likelihood: LikelihoodConfig,
    #[serde(default = "default_delta")]
    pub delta: f64,
    #[serde(default = "default_tolerance")]
    pub tolerance: f64,
    #[serde(default)]
    pub process_error: f64,
    #[serde(default)]
    pub ageing_error: Option<String>,
    #[serde(default = "default_one")]
    pub time_step_proportion: f64,
    #[serde(default)]
    pub data_weight: DataWeightConfig,
    #[serde(default)]
    pub obs: BTreeMap<String, Vec<f64>>,
    #[serde(default)]
    pub obs_file: Option<PathBuf>,
    #[serde(default)]
    pub error_values: BTreeMap<String, Vec<f64>>,
    #[serde(default)]
    pub error_values_file: Option<PathBuf>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ObservationKindConfig {
    Abundance,
    Biomass,
    ProportionsAtAge {
        min_age: u32,
        max_age: u32,
        #[serde(default = "default_true")]
        plus_group: bool,
    },
    ProportionsAtLength,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PriorConfig {
    Uniform,
    UniformLog,
    Normal { mu: f64, cv: f64 },
    NormalByStdev { mu: f64, sigma: f64 },
    Lognormal { mu: f64, cv: f64 },
    Beta { mu: f64, sigma: f64, a: f64, b: f64 },
}

impl PriorConfig {
    fn into_prior(self) -> Prior {
        match self {
            PriorConfig::Uniform => Prior::Uniform,
            PriorConfig::UniformLog => Prior::UniformLog,
            PriorConfig::Normal { mu, cv } => Prior::Normal { mu, cv },
            PriorConfig::NormalByStdev { mu, sigma } => Prior::NormalByStdev { mu, sigma },
            PriorConfig::Lognormal { mu, cv } => Prior::Lognormal { mu, cv },
            PriorConfig::Beta { mu, sigma, a, b } => Prior::Beta { mu, sigma, a, b },
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct EstimateConfig {
    #[serde(default)]
    pub label: Option<String>,
    pub parameter: String,
    pub lower_bound: f64,
    pub upper_bound: f64,
    #[serde(default)]
    pub prior: Option<PriorConfig>,
    #[serde(default)]
    pub transformation: Option<String>,
    #[serde(default = "default_one_u32")]
    pub estimation_phase: u32,
    #[serde(default)]
    pub same: Vec<String>,
    #[serde(default)]
    pub mcmc_fixed: bool,
}

#[derive(Debug, Deserialize)]
pub struct AdditionalPriorConfig {
    pub label: String,
    pub parameter: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default = "default_one")]
    pub k: f64,
    #[serde(default = "default_one")]
    pub multiplier: f64,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct MinimiserBlock {
    pub population_size: usize,
    pub difference_scale: f64,
    pub crossover_probability: f64,
    pub max_generations: usize,
    pub tolerance: f64,
    pub covariance: bool,
}

impl Default for MinimiserBlock {
    fn default() -> Self {
        let defaults = MinimiserConfig::default();
        Self {
            population_size: defaults.population_size,
            difference_scale: defaults.difference_scale,
            crossover_probability: defaults.crossover_probability,
            max_generations: defaults.max_generations,
            tolerance: defaults.tolerance,
            covariance: defaults.covariance,
        }
    }
}

impl MinimiserBlock {
    pub fn into_config(self) -> MinimiserConfig {
        MinimiserConfig {
            population_size: self.population_size,
            difference_scale: self.difference_scale,
            crossover_probability: self.crossover_probability,
            max_generations: self.max_generations,
            tolerance: self.tolerance,
            covariance: self.covariance,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct McmcBlock {
    pub length: usize,
    pub keep: usize,
    pub start: f64,
    pub max_correlation: f64,
    pub covariance_adjustment_method: String,
    pub correlation_adjustment_diff: f64,
    pub step_size: f64,
    pub proposal_distribution: String,
    pub df: u32,
    pub adapt_stepsize_at: Vec<usize>,
}

impl Default for McmcBlock {
    fn default() -> Self {
        Self {
            length: 1000,
            keep: 1,
            start: 0.0,
            max_correlation: 0.8,
            covariance_adjustment_method: "covariance".to_string(),
            correlation_adjustment_diff: 0.0001,
            step_size: 0.02,
            proposal_distribution: "t".to_string(),
            df: 4,
            adapt_stepsize_at: Vec::new(),
        }
    }
}

impl McmcBlock {
    pub fn into_config(self) -> Result<McmcConfig, Box<dyn Error>> {
        let adjustment = match self.covariance_adjustment_method.as_str() {
            "covariance" => CovarianceAdjustment::Covariance,
            "correlation" => CovarianceAdjustment::Correlation,
            "none" => CovarianceAdjustment::None,
            other => return Err(format!("unknown covariance adjustment method '{}'", other).into()),
        };
        let proposal = match self.proposal_distribution.as_str() {
            "normal" => ProposalDistribution::Normal,
            "t" => ProposalDistribution::T { df: self.df },
            other => return Err(format!("unknown proposal distribution '{}'", other).into()),
        };
        Ok(McmcConfig {
            length: self.length,
            keep: self.keep.max(1),
            start: self.start,
            max_correlation: self.max_correlation,
            adjustment,
            correlation_diff: self.correlation_adjustment_diff,
            step_size: self.step_size,
            proposal,
            adapt_step_size_at: self.adapt_stepsize_at,
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProfileBlock {
    pub parameter: String,
    #[serde(default = "default_profile_steps")]
    pub steps: usize,
    #[serde(default)]
    pub lower: Option<f64>,
    #[serde(default)]
    pub upper: Option<f64>,
}

/// Driver settings that sit alongside the model
#[derive(Debug)]
pub struct RunSettings {
    pub minimiser: MinimiserConfig,
    pub mcmc: McmcConfig,
    pub profile: Option<ProfileBlock>,
}

fn default_true() -> bool {
    true
}
fn default_one() -> f64 {
    1.0
}
fn default_one_u32() -> u32 {
    1
}
fn default_u_max() -> f64 {
    0.99
}
fn default_delta() -> f64 {
    1e-11
}
fn default_tolerance() -> f64 {
    0.001
}
fn default_loss_rate() -> Vec<f64> {
    vec![0.0]
}
fn default_phase_kind() -> String {
    "derived".to_string()
}
fn default_distribution() -> String {
    "normal".to_string()
}
fn default_profile_steps() -> usize {
    10
}

impl ModelConfig {
    /// Convert the schema into a model and its driver settings. Bulk-table
    /// file references resolve relative to `base_dir`.
    pub fn build(self, base_dir: &Path) -> Result<(Model, RunSettings), Box<dyn Error>> {
        let calendar = Calendar {
            start_year: self.model.start_year,
            final_year: self.model.final_year,
            projection_final_year: self.model.projection_final_year,
            time_steps: self
                .model
                .time_steps
                .iter()
                .map(|step| TimeStepDef {
                    label: step.label.clone(),
                    process_labels: step.processes.clone(),
                })
                .collect(),
            initialisation_phases: self
                .initialisation_phases
                .iter()
                .map(|phase| {
                    Ok(InitialisationPhase {
                        label: phase.label.clone(),
                        kind: match phase.kind.as_str() {
                            "derived" => InitialisationKind::Derived,
                            "cycles" => InitialisationKind::Cycles { cycles: phase.cycles },
                            other => {
                                return Err(format!(
                                    "unknown initialisation phase kind '{}'",
                                    other
                                ))
                            }
                        },
                        insert_processes: phase
                            .insert_processes
                            .iter()
                            .map(|insert| ProcessInsertion {
                                time_step: insert.time_step.clone(),
                                before: insert.before.clone(),
                                process: insert.process.clone(),
                            })
                            .collect(),
                        exclude_processes: phase.exclude_processes.clone(),
                        casal_initialisation: phase.casal_initialisation,
                    })
                })
                .collect::<Result<Vec<_>, String>>()?,
        };

        let length_weights: Vec<LengthWeight> = self
            .length_weights
            .iter()
            .map(|lw| LengthWeight::new(&lw.label, lw.a, lw.b))
            .collect();

        let age_lengths: Vec<AgeLength> = self
            .age_lengths
            .into_iter()
            .map(|config| {
                let curve = match config.curve {
                    AgeLengthCurveConfig::VonBertalanffy { linf, k, t0 } => {
                        GrowthCurve::VonBertalanffy { linf, k, t0 }
                    }
                    AgeLengthCurveConfig::Schnute { y1, y2, tau1, tau2, a, b } => {
                        GrowthCurve::Schnute { y1, y2, tau1, tau2, a, b }
                    }
                    AgeLengthCurveConfig::Data { lengths_by_year } => {
                        let location = format!("age_length[{}]", config.label);
                        let lengths_by_year = parse_year_keys(lengths_by_year, &location)
                            .map_err(|e| e.to_string())?;
                        GrowthCurve::Data { lengths_by_year }
                    }
                };
                let distribution = match config.distribution.as_str() {
                    "normal" => Ok(Distribution::Normal),
                    "lognormal" => Ok(Distribution::LogNormal),
                    other => Err(format!("unknown distribution '{}'", other)),
                }?;
                let mut age_length = AgeLength::new(
                    &config.label,
                    curve,
                    distribution,
                    config.cv_first,
                    config.cv_last,
                    &config.length_weight,
                );
                age_length.by_length = config.by_length;
                age_length.casal_normal_cdf = config.casal_normal_cdf;
                age_length.time_step_proportions = config.time_step_proportions;
                Ok(age_length)
            })
            .collect::<Result<Vec<_>, String>>()?;

        let selectivities: Vec<crate::selectivity::Selectivity> = self
            .selectivities
            .into_iter()
            .map(|config| {
                use crate::selectivity::{Selectivity, SelectivityKind};
                let kind = match config.kind {
                    SelectivityKindConfig::Constant { c } => SelectivityKind::Constant { c },
                    SelectivityKindConfig::Logistic { a50, ato95, alpha } => {
                        SelectivityKind::Logistic { a50, ato95, alpha }
                    }
                    SelectivityKindConfig::DoubleNormal { mu, sigma_l, sigma_r, alpha } => {
                        SelectivityKind::DoubleNormal { mu, sigma_l, sigma_r, alpha }
                    }
                    SelectivityKindConfig::AllValuesBounded { l, h, v } => {
                        SelectivityKind::AllValuesBounded { low: l, high: h, values: v }
                    }
                    SelectivityKindConfig::KnifeEdge { e, alpha } => {
                        SelectivityKind::KnifeEdge { edge: e, alpha }
                    }
                };
                Selectivity::new(config.label, kind)
            })
            .collect();

        let mut categories = Vec::with_capacity(self.categories.len());
        for config in &self.categories {
            let age_length = age_lengths
                .iter()
                .position(|a| a.label == config.age_length)
                .ok_or_else(|| {
                    format!(
                        "category '{}' references unknown age_length '{}'",
                        config.label, config.age_length
                    )
                })?;
            categories.push(Category::new(
                &config.label,
                self.model.min_age,
                self.model.max_age,
                age_length,
            ));
        }
        let partition = Partition::new(categories)?;

        let mut ageing_errors = Vec::with_capacity(self.ageing_errors.len());
        for config in self.ageing_errors {
            let kind = match config.kind {
                AgeingErrorKindConfig::None => AgeingErrorKind::None,
                AgeingErrorKindConfig::Normal { cv } => AgeingErrorKind::Normal { cv },
                AgeingErrorKindConfig::OffByOne { p1, p2 } => AgeingErrorKind::OffByOne { p1, p2 },
            };
            let mut ageing_error = AgeingError::new(config.label, kind);
            ageing_error.build(self.model.min_age, self.model.max_age);
            ageing_errors.push(ageing_error);
        }

        let derived_quantities = self
            .derived_quantities
            .into_iter()
            .map(|config| {
                let kind = match config.kind.as_str() {
                    "biomass" => Ok(DerivedQuantityKind::Biomass),
                    "abundance" => Ok(DerivedQuantityKind::Abundance),
                    other => Err(format!("unknown derived quantity type '{}'", other)),
                }?;
                let mut derived_quantity = DerivedQuantity::new(
                    config.label,
                    kind,
                    config.time_step,
                    config.categories,
                    config.selectivities,
                );
                derived_quantity.time_step_proportion = config.time_step_proportion;
                Ok(derived_quantity)
            })
            .collect::<Result<Vec<_>, String>>()?;

        let processes = self
            .processes
            .into_iter()
            .map(|config| config.into_process(base_dir))
            .collect::<Result<Vec<_>, Box<dyn Error>>>()?;

        let observations = self
            .observations
            .into_iter()
            .map(|config| config.into_observation(base_dir))
            .collect::<Result<Vec<_>, Box<dyn Error>>>()?;

        let estimates = self
            .estimates
            .into_iter()
            .map(|config| {
                let mut estimate = Estimate::new(
                    config.label.unwrap_or_else(|| config.parameter.clone()),
                    config.parameter,
                    config.lower_bound,
                    config.upper_bound,
                );
                estimate.prior = config.prior.map(PriorConfig::into_prior);
                if let Some(name) = config.transformation {
                    estimate.transformation = Transformation::parse(&name)
                        .ok_or_else(|| format!("unknown transformation '{}'", name))?;
                }
                estimate.estimation_phase = config.estimation_phase;
                estimate.sames = config.same;
                estimate.mcmc_fixed = config.mcmc_fixed;
                Ok(estimate)
            })
            .collect::<Result<Vec<_>, String>>()?;

        let additional_priors = self
            .additional_priors
            .into_iter()
            .map(|config| {
                let kind = match config.kind.as_str() {
                    "vector_average" => Ok(AdditionalPriorKind::VectorAverage { k: config.k }),
                    "element_difference" => Ok(AdditionalPriorKind::ElementDifference),
                    other => Err(format!("unknown additional prior type '{}'", other)),
                }?;
                Ok(AdditionalPrior {
                    label: config.label,
                    parameter: config.parameter,
                    kind,
                    multiplier: config.multiplier,
                })
            })
            .collect::<Result<Vec<_>, String>>()?;

        let core = ModelCore {
            calendar,
            min_age: self.model.min_age,
            max_age: self.model.max_age,
            age_plus: self.model.age_plus,
            length_bins: self.model.length_bins,
            length_plus: self.model.length_plus,
            selectivities,
            age_lengths,
            length_weights,
            catchabilities: self
                .catchabilities
                .iter()
                .map(|c| Catchability::new(&c.label, c.q))
                .collect(),
            ageing_errors,
            penalties: self
                .penalties
                .iter()
                .map(|p| Penalty::new(&p.label, p.multiplier, p.log_scale))
                .collect(),
            additional_priors,
            derived_quantities,
            partition,
            state: RunState {
                run_mode: RunMode::Basic,
                phase: RunPhase::Execute,
                current_year: self.model.start_year,
                time_step: 0,
                init_phase: 0,
            },
            rng: ChaCha12Rng::seed_from_u64(DEFAULT_SEED),
            penalty_log: Vec::new(),
            warnings: Vec::new(),
            equilibrium_snapshot: None,
        };

        let settings = RunSettings {
            minimiser: self.minimiser.into_config(),
            mcmc: self.mcmc.into_config()?,
            profile: self.profile,
        };

        Ok((Model::new(core, processes, observations, estimates), settings))
    }
}

impl ProcessConfig {
    fn into_process(self, base_dir: &Path) -> Result<Process, Box<dyn Error>> {
        let kind = match self.kind {
            ProcessKindConfig::RecruitmentConstant {
                categories,
                proportions,
                r0,
                age,
            } => {
                let mut process = RecruitmentConstant::new(categories, proportions, r0);
                process.age = age;
                ProcessKind::RecruitmentConstant(process)
            }
            ProcessKindConfig::RecruitmentBevertonHolt {
                categories,
                proportions,
                r0,
                b0,
                age,
                steepness,
                ssb,
                b0_phase,
                ssb_offset,
                ycs_values,
                standardise_ycs_years,
                projection_ycs,
            } => {
                let location = format!("process[{}]", self.label);
                let mut process =
                    RecruitmentBevertonHolt::new(categories, proportions, steepness, ssb, ycs_values);
                process.r0 = r0;
                process.b0 = b0;
                process.age = age;
                process.b0_phase = b0_phase;
                process.ssb_offset = ssb_offset;
                process.standardise_ycs_years = standardise_ycs_years;
                process.projection_ycs = parse_year_keys(projection_ycs, &location)?;
                ProcessKind::RecruitmentBevertonHolt(process)
            }
            ProcessKindConfig::RecruitmentBevertonHoltWithDeviations {
                categories,
                proportions,
                r0,
                b0,
                age,
                steepness,
                ssb,
                b0_phase,
                ssb_offset,
                deviations,
                sigma_r,
            } => {
                let mut inner =
                    RecruitmentBevertonHolt::new(categories, proportions, steepness, ssb, Vec::new());
                inner.r0 = r0;
                inner.b0 = b0;
                inner.age = age;
                inner.b0_phase = b0_phase;
                inner.ssb_offset = ssb_offset;
                ProcessKind::RecruitmentBevertonHoltWithDeviations(
                    RecruitmentBevertonHoltWithDeviations::new(deviations, sigma_r, inner),
                )
            }
            ProcessKindConfig::Ageing { categories } => ProcessKind::Ageing(Ageing::new(categories)),
            ProcessKindConfig::MortalityConstantRate {
                categories,
                m,
                selectivities,
                time_step_ratio,
            } => {
                let mut process = MortalityConstantRate::new(categories, m, selectivities);
                process.ratios = time_step_ratio;
                ProcessKind::MortalityConstantRate(process)
            }
            ProcessKindConfig::MortalityInstantaneous {
                categories,
                m,
                time_step_ratio,
                fisheries,
            } => {
                let mut built = Vec::with_capacity(fisheries.len());
                for config in fisheries {
                    let location = format!("process[{}].fishery[{}]", self.label, config.label);
                    let mut catches = parse_year_keys(config.catches, &location)?;
                    if let Some(file) = &config.catches_file {
                        let loaded = loader::load_catches(base_dir.join(file))?;
                        if let Some(per_year) = loaded.get(&config.label) {
                            catches.extend(per_year.iter().map(|(y, c)| (*y, *c)));
                        }
                    }
                    let mut fishery = Fishery::new(
                        config.label,
                        config.time_step,
                        config.categories,
                        config.selectivities,
                        catches,
                    );
                    fishery.u_max = config.u_max;
                    fishery.penalty = config.penalty;
                    built.push(fishery);
                }
                let mut process = MortalityInstantaneous::new(categories, m, built);
                process.ratios = time_step_ratio;
                ProcessKind::MortalityInstantaneous(process)
            }
            ProcessKindConfig::MortalityEventBiomass {
                categories,
                selectivities,
                catches,
                u_max,
                penalty,
            } => {
                let location = format!("process[{}]", self.label);
                let catches = parse_year_keys(catches, &location)?;
                let mut process = MortalityEventBiomass::new(categories, selectivities, catches);
                process.u_max = u_max;
                process.penalty = penalty;
                ProcessKind::MortalityEventBiomass(process)
            }
            ProcessKindConfig::MortalityPreySuitability {
                prey_categories,
                prey_selectivities,
                electivities,
                predator_categories,
                predator_selectivities,
                consumption_rate,
                years,
                u_max,
                penalty,
            } => {
                let mut process = MortalityPreySuitability::new(
                    prey_categories,
                    prey_selectivities,
                    electivities,
                    predator_categories,
                    predator_selectivities,
                    consumption_rate,
                    years,
                );
                process.u_max = u_max;
                process.penalty = penalty;
                ProcessKind::MortalityPreySuitability(process)
            }
            ProcessKindConfig::TransitionCategory {
                from,
                to,
                proportions,
                selectivities,
            } => ProcessKind::TransitionCategory(TransitionCategory::new(
                from,
                to,
                proportions,
                selectivities,
            )),
            ProcessKindConfig::MarkovianMovement {
                from,
                to,
                proportions,
                selectivities,
            } => ProcessKind::MarkovianMovement(MarkovianMovement::new(
                from,
                to,
                proportions,
                selectivities,
            )),
            ProcessKindConfig::TagByLength {
                from,
                to,
                years,
                numbers,
                numbers_file,
                u_max,
                penalty,
                selectivities,
                initial_mortality,
                initial_mortality_selectivity,
                loss_rate,
                loss_rate_selectivities,
            } => {
                let location = format!("process[{}]", self.label);
                let mut numbers = parse_year_keys(numbers, &location)?;
                if let Some(file) = &numbers_file {
                    numbers.extend(loader::load_year_rows(base_dir.join(file))?);
                }
                let mut process =
                    TagByLength::new(from, to, years, numbers, selectivities, loss_rate);
                process.u_max = u_max;
                process.penalty = penalty;
                process.initial_mortality = initial_mortality;
                process.initial_mortality_selectivity = initial_mortality_selectivity;
                process.loss_rate_selectivity_labels = loss_rate_selectivities;
                ProcessKind::TagByLength(process)
            }
            ProcessKindConfig::TagByAge {
                from,
                to,
                min_age,
                max_age,
                years,
                numbers,
                numbers_file,
                proportions,
                n,
                u_max,
                penalty,
                selectivities,
                initial_mortality,
                initial_mortality_selectivity,
                loss_rate,
                loss_rate_selectivities,
            } => {
                let location = format!("process[{}]", self.label);
                let mut numbers = parse_year_keys(numbers, &location)?;
                let proportions = parse_year_keys(proportions, &location)?;
                let n = parse_year_keys(n, &location)?;
                if let Some(file) = &numbers_file {
                    numbers.extend(loader::load_year_rows(base_dir.join(file))?);
                }
                if !numbers.is_empty() && !proportions.is_empty() {
                    return Err(format!(
                        "process '{}' cannot have both a numbers and a proportions table",
                        self.label
                    )
                    .into());
                }
                let mut process = TagByAge::new(
                    from, to, min_age, max_age, years, numbers, selectivities, loss_rate,
                );
                if !proportions.is_empty() {
                    process = process.with_proportions(proportions, n);
                }
                process.u_max = u_max;
                process.penalty = penalty;
                process.initial_mortality = initial_mortality;
                process.initial_mortality_selectivity = initial_mortality_selectivity;
                process.loss_rate_selectivity_labels = loss_rate_selectivities;
                ProcessKind::TagByAge(process)
            }
            ProcessKindConfig::Null => ProcessKind::Null,
        };
        Ok(Process::new(self.label, kind))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::estimates::addressable::parse_path;

    const CONFIG: &str = r#"{
        "model": {
            "start_year": 1990,
            "final_year": 1995,
            "min_age": 1,
            "max_age": 10,
            "age_plus": true,
            "time_steps": [
                {"label": "Annual", "processes": ["Ageing", "Recruitment", "Mortality"]}
            ]
        },
        "categories": [
            {"label": "stock", "age_length": "VB"}
        ],
        "initialisation_phases": [
            {"label": "Equilibrium", "kind": "derived"}
        ],
        "length_weights": [
            {"label": "Basic", "a": 1e-8, "b": 3.0}
        ],
        "age_lengths": [
            {"label": "VB", "type": "von_bertalanffy", "linf": 100.0, "k": 0.2, "t0": 0.0,
             "cv_first": 0.1, "length_weight": "Basic"}
        ],
        "selectivities": [
            {"label": "One", "type": "constant", "c": 1.0},
            {"label": "Maturity", "type": "logistic", "a50": 4.0, "ato95": 2.0}
        ],
        "catchabilities": [
            {"label": "Survey", "q": 0.001}
        ],
        "derived_quantities": [
            {"label": "SSB", "type": "biomass", "time_step": "Annual",
             "categories": ["stock"], "selectivities": ["Maturity"],
             "time_step_proportion": 0.5}
        ],
        "processes": [
            {"label": "Ageing", "type": "ageing", "categories": ["stock"]},
            {"label": "Recruitment", "type": "recruitment_constant",
             "categories": ["stock"], "proportions": [1.0], "r0": 100000.0},
            {"label": "Mortality", "type": "mortality_constant_rate",
             "categories": ["stock"], "m": [0.2], "selectivities": ["One"]}
        ],
        "observations": [
            {"label": "Survey", "type": "abundance", "years": [1992, 1994],
             "time_step": "Annual", "categories": [["stock"]],
             "selectivities": ["One"], "catchability": "Survey",
             "likelihood": {"type": "lognormal"},
             "obs": {"1992": [350.0], "1994": [360.0]},
             "error_values": {"1992": [0.2], "1994": [0.2]}}
        ],
        "estimates": [
            {"parameter": "process[Recruitment].r0",
             "lower_bound": 1000.0, "upper_bound": 1e7,
             "prior": {"type": "lognormal", "mu": 120000.0, "cv": 0.8},
             "transformation": "log"}
        ],
        "mcmc": {"length": 100, "keep": 10}
    }"#;

    #[test]
    fn test_schema_parses_and_builds() {
        let config: ModelConfig = serde_json::from_str(CONFIG).unwrap();
        let (mut model, settings) = config.build(Path::new(".")).unwrap();
        model.build().unwrap();

        assert_eq!(model.processes.len(), 3);
        assert_eq!(model.observations.len(), 1);
        assert_eq!(model.core.derived_quantities.len(), 1);
        assert_eq!(settings.mcmc.length, 100);
        assert_eq!(settings.mcmc.keep, 10);

        let r0 = model
            .get_addressable(&parse_path("process[Recruitment].r0").unwrap())
            .unwrap();
        assert_eq!(r0, 100_000.0);
    }

    #[test]
    fn test_configured_model_runs() {
        let config: ModelConfig = serde_json::from_str(CONFIG).unwrap();
        let (mut model, _) = config.build(Path::new(".")).unwrap();
        model.build().unwrap();
        model.run_full_iteration().unwrap();

        let objective = model.compute_objective().unwrap();
        assert!(objective.score.is_finite());
        // observation scored both of its years
        assert_eq!(model.observations[0].scores().len(), 2);
        // equilibrium SSB was recorded per executed year
        assert_eq!(model.core.derived_quantities[0].values().len(), 6);
    }

    #[test]
    fn test_unknown_type_tag_is_rejected() {
        let bad = CONFIG.replace("recruitment_constant", "recruitment_mystery");
        assert!(serde_json::from_str::<ModelConfig>(&bad).is_err());
    }
}

impl ObservationConfig {
    fn into_observation(self, base_dir: &Path) -> Result<Observation, Box<dyn Error>> {
        let kind = match self.kind {
            ObservationKindConfig::Abundance => ObservationKind::Abundance,
            ObservationKindConfig::Biomass => ObservationKind::Biomass,
            ObservationKindConfig::ProportionsAtAge {
                min_age,
                max_age,
                plus_group,
            } => ObservationKind::ProportionsAtAge {
                min_age,
                max_age,
                plus_group,
            },
            ObservationKindConfig::ProportionsAtLength => ObservationKind::ProportionsAtLength,
        };

        let location = format!("observation[{}]", self.label);
        let mut observation = Observation::new(
            self.label,
            kind,
            self.years,
            self.time_step,
            self.categories,
            self.selectivities,
            self.likelihood.into_likelihood(),
        );
        observation.catchability = self.catchability;
        observation.delta = self.delta;
        observation.tolerance = self.tolerance;
        observation.process_error = self.process_error;
        observation.ageing_error = self.ageing_error;
        observation.time_step_proportion = self.time_step_proportion;
        observation.data_weight = self.data_weight.into_data_weight();

        observation.observed = parse_year_keys(self.obs, &location)?;
        if let Some(file) = &self.obs_file {
            observation
                .observed
                .extend(loader::load_year_rows(base_dir.join(file))?);
        }
        observation.error_values = parse_year_keys(self.error_values, &location)?;
        if let Some(file) = &self.error_values_file {
            observation
                .error_values
                .extend(loader::load_year_rows(base_dir.join(file))?);
        }
        Ok(observation)
    }
}
