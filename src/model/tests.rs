//! End-to-end scenarios exercising the annual cycle, initialisation and
//! the process library together.

use std::collections::BTreeMap;

use approx::assert_relative_eq;

use crate::age_length::{AgeLength, Distribution, GrowthCurve};
use crate::derived_quantity::{DerivedQuantity, DerivedQuantityKind};
use crate::length_weight::LengthWeight;
use crate::model::{
    Calendar, InitialisationPhase, Model, ModelCore, RunMode, RunPhase, RunState, TimeStepDef,
};
use crate::partition::{Category, Partition};
use crate::processes::{
    Ageing, MortalityConstantRate, Process, ProcessKind, RecruitmentBevertonHolt,
    RecruitmentConstant, TagByAge, TransitionCategory,
};
use crate::selectivity::{Selectivity, SelectivityKind};

use rand::SeedableRng;
use rand_chacha::ChaCha12Rng;

struct ScenarioConfig {
    start_year: u32,
    final_year: u32,
    min_age: u32,
    max_age: u32,
    categories: Vec<&'static str>,
    process_order: Vec<&'static str>,
    initialisation: bool,
}

/// Assemble a single-time-step model around the given process registry
fn build_model(scenario: ScenarioConfig, processes: Vec<Process>) -> Model {
    let categories: Vec<Category> = scenario
        .categories
        .iter()
        .map(|label| Category::new(*label, scenario.min_age, scenario.max_age, 0))
        .collect();
    let partition = Partition::new(categories).unwrap();

    let initialisation_phases = if scenario.initialisation {
        vec![InitialisationPhase::derived("Equilibrium")]
    } else {
        Vec::new()
    };

    let core = ModelCore {
        calendar: Calendar {
            start_year: scenario.start_year,
            final_year: scenario.final_year,
            projection_final_year: None,
            time_steps: vec![TimeStepDef {
                label: "Annual".to_string(),
                process_labels: scenario.process_order.iter().map(|s| s.to_string()).collect(),
            }],
            initialisation_phases,
        },
        min_age: scenario.min_age,
        max_age: scenario.max_age,
        age_plus: true,
        length_bins: Vec::new(),
        length_plus: false,
        selectivities: vec![
            Selectivity::new("One", SelectivityKind::Constant { c: 1.0 }),
            Selectivity::new(
                "Maturity",
                SelectivityKind::Logistic {
                    a50: 5.0,
                    ato95: 2.0,
                    alpha: 1.0,
                },
            ),
            Selectivity::new("MaleTag", SelectivityKind::Constant { c: 0.25 }),
            Selectivity::new("FemaleTag", SelectivityKind::Constant { c: 0.4 }),
        ],
        age_lengths: vec![AgeLength::new(
            "VB",
            GrowthCurve::VonBertalanffy {
                linf: 100.0,
                k: 0.2,
                t0: 0.0,
            },
            Distribution::Normal,
            0.1,
            None,
            "Basic",
        )],
        length_weights: vec![LengthWeight::new("Basic", 1e-8, 3.0)],
        catchabilities: Vec::new(),
        ageing_errors: Vec::new(),
        penalties: Vec::new(),
        additional_priors: Vec::new(),
        derived_quantities: Vec::new(),
        partition,
        state: RunState {
            run_mode: RunMode::Basic,
            phase: RunPhase::Execute,
            current_year: scenario.start_year,
            time_step: 0,
            init_phase: 0,
        },
        rng: ChaCha12Rng::seed_from_u64(1),
        penalty_log: Vec::new(),
        warnings: Vec::new(),
        equilibrium_snapshot: None,
    };

    Model::new(core, processes, Vec::new(), Vec::new())
}

fn strings(labels: &[&str]) -> Vec<String> {
    labels.iter().map(|s| s.to_string()).collect()
}

#[test]
fn test_constant_recruitment_single_year() {
    // one time step of ageing, recruitment and mortality over an empty
    // partition: recruits appear at age 1 and decay by exp(-M) once
    let all = [
        "immature.male",
        "immature.female",
        "mature.male",
        "mature.female",
    ];
    let processes = vec![
        Process::new("Ageing", ProcessKind::Ageing(Ageing::new(strings(&all)))),
        Process::new(
            "Recruitment",
            ProcessKind::RecruitmentConstant(RecruitmentConstant::new(
                strings(&["immature.male", "immature.female"]),
                vec![0.6, 0.4],
                100_000.0,
            )),
        ),
        Process::new(
            "Mortality",
            ProcessKind::MortalityConstantRate(MortalityConstantRate::new(
                strings(&all),
                vec![0.065],
                strings(&["One"]),
            )),
        ),
    ];

    let mut model = build_model(
        ScenarioConfig {
            start_year: 1994,
            final_year: 1994,
            min_age: 1,
            max_age: 15,
            categories: all.to_vec(),
            process_order: vec!["Ageing", "Recruitment", "Mortality"],
            initialisation: false,
        },
        processes,
    );
    model.build().unwrap();
    model.run_full_iteration().unwrap();

    let decay = (-0.065_f64).exp();
    let immature_male = &model.core.partition.category("immature.male").unwrap().data;
    let immature_female = &model.core.partition.category("immature.female").unwrap().data;
    assert_relative_eq!(immature_male[0], 60_000.0 * decay, epsilon = 1e-6);
    assert_relative_eq!(immature_female[0], 40_000.0 * decay, epsilon = 1e-6);
    assert!(immature_male[1..].iter().all(|&v| v == 0.0));

    for label in ["mature.male", "mature.female"] {
        let mature = &model.core.partition.category(label).unwrap().data;
        assert!(mature.iter().all(|&v| v == 0.0), "{} should be empty", label);
    }
}

#[test]
fn test_maturation_geometric_series() {
    // constant recruitment feeding a fixed-proportion maturation produces
    // a geometric age structure in the source categories
    let all = [
        "immature.male",
        "immature.female",
        "mature.male",
        "mature.female",
    ];
    let processes = vec![
        Process::new("Ageing", ProcessKind::Ageing(Ageing::new(strings(&all)))),
        Process::new(
            "Recruitment",
            ProcessKind::RecruitmentConstant(RecruitmentConstant::new(
                strings(&["immature.male", "immature.female"]),
                vec![0.6, 0.4],
                100_000.0,
            )),
        ),
        Process::new(
            "Maturation",
            ProcessKind::TransitionCategory(TransitionCategory::new(
                strings(&["immature.male", "immature.female"]),
                strings(&["mature.male", "mature.female"]),
                vec![0.6, 0.5],
                strings(&["One"]),
            )),
        ),
    ];

    let mut model = build_model(
        ScenarioConfig {
            start_year: 1990,
            final_year: 2004,
            min_age: 1,
            max_age: 15,
            categories: all.to_vec(),
            process_order: vec!["Ageing", "Recruitment", "Maturation"],
            initialisation: false,
        },
        processes,
    );
    model.build().unwrap();
    model.run_full_iteration().unwrap();

    // source at age k holds seed * (1 - proportion)^k; mature accumulates
    // the complement (the plus group mixes cohorts, so stay below it)
    let immature_male = &model.core.partition.category("immature.male").unwrap().data;
    let mature_male = &model.core.partition.category("mature.male").unwrap().data;
    for age in [1u32, 5, 10, 14] {
        let offset = (age - 1) as usize;
        let expected_immature = 60_000.0 * 0.4_f64.powi(age as i32);
        assert_relative_eq!(immature_male[offset], expected_immature, max_relative = 1e-9);
        let expected_mature = 60_000.0 * (1.0 - 0.4_f64.powi(age as i32));
        assert_relative_eq!(mature_male[offset], expected_mature, max_relative = 1e-9);
    }

    let immature_female = &model.core.partition.category("immature.female").unwrap().data;
    for age in [1u32, 7, 13] {
        let offset = (age - 1) as usize;
        assert_relative_eq!(
            immature_female[offset],
            40_000.0 * 0.5_f64.powi(age as i32),
            max_relative = 1e-9
        );
    }
}

#[test]
fn test_tagging_splits_releases_by_selected_stock() {
    // a symmetric two-sex model tagged in one year: releases split by the
    // sex-specific tagging selectivities
    let all = [
        "immature.male",
        "immature.female",
        "mature.male",
        "mature.female",
    ];
    let mut numbers = BTreeMap::new();
    numbers.insert(2008, vec![1000.0, 2000.0, 3000.0, 4000.0]);

    let processes = vec![
        Process::new("Ageing", ProcessKind::Ageing(Ageing::new(strings(&all)))),
        Process::new(
            "Recruitment",
            ProcessKind::RecruitmentConstant(RecruitmentConstant::new(
                strings(&["immature.male", "immature.female"]),
                vec![0.5, 0.5],
                1_000_000.0,
            )),
        ),
        Process::new(
            "Mortality",
            ProcessKind::MortalityConstantRate(MortalityConstantRate::new(
                strings(&all),
                vec![0.1],
                strings(&["One"]),
            )),
        ),
        Process::new(
            "Tagging",
            ProcessKind::TagByAge(TagByAge::new(
                strings(&["immature.male", "immature.female"]),
                strings(&["mature.male", "mature.female"]),
                3,
                6,
                vec![2008],
                numbers,
                strings(&["MaleTag", "FemaleTag"]),
                vec![0.0],
            )),
        ),
    ];

    let mut model = build_model(
        ScenarioConfig {
            start_year: 2008,
            final_year: 2008,
            min_age: 1,
            max_age: 20,
            categories: all.to_vec(),
            process_order: vec!["Ageing", "Recruitment", "Mortality", "Tagging"],
            initialisation: true,
        },
        processes,
    );
    model.build().unwrap();
    model.run_full_iteration().unwrap();

    // male share of each release is 0.25 / (0.25 + 0.4)
    let male_share = 0.25 / 0.65;
    let female_share = 0.4 / 0.65;
    let releases = [1000.0, 2000.0, 3000.0, 4000.0];
    let mature_male = &model.core.partition.category("mature.male").unwrap().data;
    let mature_female = &model.core.partition.category("mature.female").unwrap().data;
    for (i, release) in releases.iter().enumerate() {
        let offset = 2 + i; // ages 3..6 with min age 1
        assert_relative_eq!(mature_male[offset], release * male_share, epsilon = 1e-6);
        assert_relative_eq!(mature_female[offset], release * female_share, epsilon = 1e-6);
    }
    assert_relative_eq!(mature_male[2], 384.615_384_615, epsilon = 1e-6);
    assert_relative_eq!(mature_male[5], 1_538.461_538_46, epsilon = 1e-6);
}

fn beverton_holt_model(r0: Option<f64>, b0: Option<f64>) -> Model {
    let categories = ["stock"];
    let processes = vec![
        Process::new("Ageing", ProcessKind::Ageing(Ageing::new(strings(&categories)))),
        Process::new("Recruitment", {
            let mut recruitment = RecruitmentBevertonHolt::new(
                strings(&categories),
                vec![1.0],
                0.9,
                "SSB",
                vec![1.0; 11],
            );
            recruitment.r0 = r0;
            recruitment.b0 = b0;
            ProcessKind::RecruitmentBevertonHolt(recruitment)
        }),
        Process::new(
            "Mortality",
            ProcessKind::MortalityConstantRate(MortalityConstantRate::new(
                strings(&categories),
                vec![0.2],
                strings(&["One"]),
            )),
        ),
    ];

    let mut model = build_model(
        ScenarioConfig {
            start_year: 1990,
            final_year: 2000,
            min_age: 1,
            max_age: 20,
            categories: categories.to_vec(),
            process_order: vec!["Ageing", "Recruitment", "Mortality"],
            initialisation: true,
        },
        processes,
    );

    let mut ssb = DerivedQuantity::new(
        "SSB",
        DerivedQuantityKind::Biomass,
        "Annual",
        vec!["stock".to_string()],
        vec!["Maturity".to_string()],
    );
    ssb.time_step_proportion = 0.5;
    model.core.derived_quantities.push(ssb);
    model
}

#[test]
fn test_beverton_holt_r0_equilibrium() {
    // with R0 given and all ycs at one, the first model year continues the
    // equilibrium the initialisation converged to
    let mut model = beverton_holt_model(Some(5e6), None);
    model.build().unwrap();
    model.run_full_iteration().unwrap();

    let ssb = &model.core.derived_quantities[0];
    let b0 = ssb.last_value_from_initialisation(0);
    assert!(b0 > 0.0);
    let first_year = ssb.value(1990);
    assert_relative_eq!(first_year, b0, max_relative = 5e-3);
    // and the equilibrium persists across the run
    let last_year = ssb.value(2000);
    assert_relative_eq!(last_year, b0, max_relative = 1e-2);
}

#[test]
fn test_beverton_holt_b0_rescaling() {
    // with B0 given the partition is rescaled so the SSB derived quantity
    // reproduces B0 in the first model year
    let b0 = 5_000.0;
    let mut model = beverton_holt_model(None, Some(b0));
    model.build().unwrap();
    model.run_full_iteration().unwrap();

    let ssb = &model.core.derived_quantities[0];
    let first_year = ssb.value(1990);
    assert_relative_eq!(first_year, b0, max_relative = 1e-3);
}

#[test]
fn test_full_iteration_is_deterministic() {
    // identical inputs produce identical partition state and scores
    let mut model = beverton_holt_model(Some(5e6), None);
    model.build().unwrap();

    model.run_full_iteration().unwrap();
    let first = model.core.partition.snapshot();
    let first_ssb = model.core.derived_quantities[0].value(2000);

    model.run_full_iteration().unwrap();
    let second = model.core.partition.snapshot();
    let second_ssb = model.core.derived_quantities[0].value(2000);

    assert_eq!(first_ssb.to_bits(), second_ssb.to_bits());
    for (a, b) in first.iter().zip(second.iter()) {
        for (x, y) in a.iter().zip(b.iter()) {
            assert_eq!(x.to_bits(), y.to_bits());
        }
    }
}

#[test]
fn test_reset_restores_equilibrium_snapshot() {
    let mut model = beverton_holt_model(Some(5e6), None);
    model.build().unwrap();
    model.run_full_iteration().unwrap();

    let snapshot = model.core.equilibrium_snapshot.clone().unwrap();

    // damage the partition, then reset twice: both land on the snapshot
    model.core.partition.zero();
    model.reset_to_equilibrium();
    let once = model.core.partition.snapshot();
    model.reset_to_equilibrium();
    let twice = model.core.partition.snapshot();

    assert_eq!(once, snapshot);
    assert_eq!(twice, snapshot);
}

#[test]
fn test_partition_stays_non_negative_through_run() {
    let mut model = beverton_holt_model(Some(5e6), None);
    model.build().unwrap();
    model.run_full_iteration().unwrap();
    assert!(model.core.partition.check_non_negative("run").is_ok());
}

#[test]
fn test_plus_group_converged_after_initialisation() {
    // one more cycle changes the plus group by at most the convergence
    // threshold per category
    let mut model = beverton_holt_model(Some(5e6), None);
    model.build().unwrap();
    model.run_initialisation().unwrap();

    let before: Vec<f64> = model
        .core
        .partition
        .iter()
        .map(|c| c.data[c.data.len() - 1])
        .collect();
    model.execute_initialisation(0, 1).unwrap();
    let after: Vec<f64> = model
        .core
        .partition
        .iter()
        .map(|c| c.data[c.data.len() - 1])
        .collect();

    for (b, a) in before.iter().zip(after.iter()) {
        if *b > 0.0 {
            assert!(((a - b) / b).abs() <= 0.005, "plus group moved from {} to {}", b, a);
        }
    }
}

#[test]
fn test_same_links_replicate_master_value() {
    let categories = ["stock"];
    let processes = vec![
        Process::new("Ageing", ProcessKind::Ageing(Ageing::new(strings(&categories)))),
        Process::new(
            "RecruitmentEarly",
            ProcessKind::RecruitmentConstant(RecruitmentConstant::new(
                strings(&categories),
                vec![1.0],
                1000.0,
            )),
        ),
        Process::new(
            "RecruitmentLate",
            ProcessKind::RecruitmentConstant(RecruitmentConstant::new(
                strings(&categories),
                vec![1.0],
                1000.0,
            )),
        ),
    ];
    let mut model = build_model(
        ScenarioConfig {
            start_year: 1990,
            final_year: 1991,
            min_age: 1,
            max_age: 10,
            categories: categories.to_vec(),
            process_order: vec!["Ageing", "RecruitmentEarly", "RecruitmentLate"],
            initialisation: false,
        },
        processes,
    );
    let mut estimate = crate::estimates::Estimate::new(
        "r0",
        "process[RecruitmentEarly].r0",
        1.0,
        1e7,
    );
    estimate.sames = vec!["process[RecruitmentLate].r0".to_string()];
    model.estimates.push(estimate);
    model.build().unwrap();

    model.apply_estimate(0, 2500.0).unwrap();

    let master = model
        .get_addressable(&crate::estimates::addressable::parse_path("process[RecruitmentEarly].r0").unwrap())
        .unwrap();
    let same = model
        .get_addressable(&crate::estimates::addressable::parse_path("process[RecruitmentLate].r0").unwrap())
        .unwrap();
    assert_eq!(master, 2500.0);
    assert_eq!(same, 2500.0);

    // writes outside the bounds are rejected before touching either
    assert!(model.apply_estimate(0, 1e8).is_err());
}

#[test]
fn test_projection_years_use_supplied_ycs() {
    let mut model = beverton_holt_model(Some(5e6), None);
    model.core.calendar.projection_final_year = Some(2003);
    if let ProcessKind::RecruitmentBevertonHolt(recruitment) = &mut model.processes[1].kind {
        recruitment.projection_ycs.insert(2001, 1.0);
        recruitment.projection_ycs.insert(2002, 0.0);
        recruitment.projection_ycs.insert(2003, 1.0);
    } else {
        panic!("recruitment process moved");
    }
    model.build().unwrap();
    model.core.state.run_mode = RunMode::Projection;
    model.run_full_iteration().unwrap();

    // the projection horizon was executed
    let ssb = &model.core.derived_quantities[0];
    assert!(ssb.value(2003) > 0.0);

    // the zero projected ycs shut recruitment off in 2002
    if let ProcessKind::RecruitmentBevertonHolt(recruitment) = &model.processes[1].kind {
        let recruits = recruitment.recruitment_values();
        // years 1990..=2003 in order; 2002 is the 13th entry
        assert_eq!(recruits.len(), 14);
        assert_eq!(recruits[12], 0.0);
        assert!(recruits[11] > 0.0);
        assert!(recruits[13] > 0.0);
    } else {
        panic!("recruitment process moved");
    }
}

#[test]
fn test_missing_ageing_process_is_fatal() {
    let categories = ["stock"];
    let processes = vec![Process::new(
        "Recruitment",
        ProcessKind::RecruitmentConstant(RecruitmentConstant::new(
            strings(&categories),
            vec![1.0],
            1000.0,
        )),
    )];
    let mut model = build_model(
        ScenarioConfig {
            start_year: 1990,
            final_year: 1991,
            min_age: 1,
            max_age: 10,
            categories: categories.to_vec(),
            process_order: vec!["Recruitment"],
            initialisation: false,
        },
        processes,
    );
    assert!(model.build().is_err());
}

#[test]
fn test_unknown_process_label_in_time_step_is_fatal() {
    let categories = ["stock"];
    let processes = vec![Process::new(
        "Ageing",
        ProcessKind::Ageing(Ageing::new(strings(&categories))),
    )];
    let mut model = build_model(
        ScenarioConfig {
            start_year: 1990,
            final_year: 1991,
            min_age: 1,
            max_age: 10,
            categories: categories.to_vec(),
            process_order: vec!["Ageing", "Ghost"],
            initialisation: false,
        },
        processes,
    );
    assert!(model.build().is_err());
}
