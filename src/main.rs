//! Stock Synthesis CLI
//!
//! Command-line harness for the population dynamics engine. Each run mode
//! flag selects what the core does with the configured model; exit codes
//! follow the estimation contract (0 converged, 1 undetermined, 2 failed,
//! 10+ fatal configuration or runtime error).

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use log::{error, info};
use rayon::prelude::*;

use stock_synthesis::config::{loader, DEFAULT_SEED};
use stock_synthesis::estimates::addressable::parse_path;
use stock_synthesis::mcmc::Mcmc;
use stock_synthesis::minimiser::{Minimiser, MinimiserStatus};
use stock_synthesis::model::RunMode;
use stock_synthesis::reports;

const LICENCE: &str = "Stock Synthesis population dynamics engine\n\
                       Distributed under the MIT licence.";

const EXIT_UNDETERMINED: u8 = 1;
const EXIT_NOT_CONVERGED: u8 = 2;
const EXIT_FATAL: u8 = 10;

#[derive(Parser, Debug)]
#[command(name = "stock_synthesis", version, about = "Age-structured stock assessment engine")]
struct Cli {
    /// Basic run: deterministic forward projection
    #[arg(short = 'r', long = "run")]
    basic: bool,

    /// Estimation run: minimise the objective function
    #[arg(short = 'e', long = "estimate")]
    estimate: bool,

    /// MCMC run: sample the posterior from the estimation solution
    #[arg(short = 'm', long = "mcmc")]
    mcmc: bool,

    /// Simulation run: produce N simulated observation sets
    #[arg(short = 's', long = "simulate", value_name = "N")]
    simulate: Option<u32>,

    /// Projection run: extend the calendar to the projection horizon
    #[arg(short = 'f', long = "projection")]
    projection: bool,

    /// Profile run: step the configured parameter across its bounds
    #[arg(short = 'p', long = "profile")]
    profile: bool,

    /// Primary configuration file
    #[arg(short = 'c', long = "config", default_value = "config.json")]
    config: PathBuf,

    /// Input free-parameter values
    #[arg(short = 'i', long = "input")]
    input: Option<PathBuf>,

    /// Output parameters file
    #[arg(short = 'o', long = "output")]
    output: Option<PathBuf>,

    /// Random number seed
    #[arg(short = 'g', long = "seed")]
    seed: Option<u64>,

    /// Print the licence and exit
    #[arg(short = 'l', long = "licence")]
    licence: bool,
}

fn main() -> ExitCode {
    env_logger::init();
    let cli = Cli::parse();

    if cli.licence {
        println!("{}", LICENCE);
        return ExitCode::SUCCESS;
    }

    match run(&cli) {
        Ok(code) => code,
        Err(err) => {
            error!("fatal: {:#}", err);
            eprintln!("fatal: {:#}", err);
            ExitCode::from(EXIT_FATAL)
        }
    }
}

fn run(cli: &Cli) -> Result<ExitCode> {
    let config = loader::load_config(&cli.config)
        .map_err(|e| anyhow!("{}", e))
        .with_context(|| format!("loading configuration from {}", cli.config.display()))?;
    let base_dir = cli
        .config
        .parent()
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."));

    let (mut model, settings) = config
        .build(&base_dir)
        .map_err(|e| anyhow!("{}", e))
        .context("building model from configuration")?;
    model.build().context("validating model")?;

    let seed = cli.seed.unwrap_or(DEFAULT_SEED);
    model.seed_rng(seed);
    info!("model built; RNG seeded with {}", seed);

    if let Some(path) = &cli.input {
        apply_input_parameters(&mut model, path)?;
    }

    if cli.estimate || cli.mcmc {
        model.core.state.run_mode = if cli.mcmc {
            RunMode::Mcmc
        } else {
            RunMode::Estimation
        };
        let minimiser = Minimiser::new(settings.minimiser.clone());
        let result = minimiser.minimise(&mut model).context("minimisation")?;
        info!(
            "minimiser finished: score {} after {} evaluations ({:?})",
            result.score, result.evaluations, result.status
        );

        if let Some(path) = &cli.output {
            let names: Vec<String> = result
                .estimate_labels
                .iter()
                .map(|label| {
                    model
                        .estimates
                        .iter()
                        .find(|e| &e.label == label)
                        .map(|e| e.parameter.clone())
                        .unwrap_or_else(|| label.clone())
                })
                .collect();
            reports::write_free_parameters(path, &names, &[result.values.clone()])
                .map_err(|e| anyhow!("{}", e))
                .context("writing output parameters")?;
        }

        if cli.mcmc {
            let mcmc = Mcmc::new(settings.mcmc.clone());
            let links = mcmc.run(&mut model, &result).context("running MCMC")?;
            let chain_path = base_dir.join("mcmc_chain.txt");
            reports::write_chain(&chain_path, &result.estimate_labels, &links)
                .map_err(|e| anyhow!("{}", e))
                .context("writing chain file")?;
            println!("chain of {} links written to {}", links.len(), chain_path.display());
        }

        print_reports(&model)?;
        return Ok(match result.status {
            MinimiserStatus::Success => ExitCode::SUCCESS,
            MinimiserStatus::TooManyIterations => ExitCode::from(EXIT_UNDETERMINED),
            _ => ExitCode::from(EXIT_NOT_CONVERGED),
        });
    }

    if let Some(sets) = cli.simulate {
        model.core.state.run_mode = RunMode::Simulation;
        let results: Vec<Result<()>> = (0..sets)
            .into_par_iter()
            .map(|set| {
                // each worker owns a private clone with a derived seed
                let mut worker = model.clone();
                worker.seed_rng(seed.wrapping_add(set as u64));
                worker
                    .run_full_iteration()
                    .with_context(|| format!("simulation set {}", set))?;
                worker.simulate_observations();
                reports::write_simulated_observations(&base_dir, set, &worker)
                    .map_err(|e| anyhow!("{}", e))
                    .with_context(|| format!("writing simulation set {}", set))
            })
            .collect();
        for result in results {
            result?;
        }
        println!("{} simulated observation sets written to {}", sets, base_dir.display());
        return Ok(ExitCode::SUCCESS);
    }

    if cli.profile {
        model.core.state.run_mode = RunMode::Profile;
        return run_profile(&mut model, &settings);
    }

    // basic and projection runs
    model.core.state.run_mode = if cli.projection {
        RunMode::Projection
    } else {
        RunMode::Basic
    };
    model.run_full_iteration().context("running model")?;
    print_reports(&model)?;
    Ok(ExitCode::SUCCESS)
}

/// Apply the first row of a free-parameter file to the model's estimates
fn apply_input_parameters(model: &mut stock_synthesis::Model, path: &PathBuf) -> Result<()> {
    let (names, rows) = reports::read_free_parameters(path)
        .map_err(|e| anyhow!("{}", e))
        .with_context(|| format!("reading input parameters from {}", path.display()))?;
    let row = rows
        .first()
        .ok_or_else(|| anyhow!("input parameter file has no value rows"))?;

    for (name, &value) in names.iter().zip(row.iter()) {
        let index = model
            .estimates
            .iter()
            .position(|e| &e.parameter == name)
            .ok_or_else(|| anyhow!("input parameter '{}' is not an estimate", name))?;
        model
            .apply_estimate(index, value)
            .with_context(|| format!("applying input parameter '{}'", name))?;
    }
    info!("applied {} input parameters", names.len());
    Ok(())
}

/// Step the profiled parameter across its bounds, minimising the remaining
/// estimates at each step.
fn run_profile(
    model: &mut stock_synthesis::Model,
    settings: &stock_synthesis::config::RunSettings,
) -> Result<ExitCode> {
    let profile = settings
        .profile
        .as_ref()
        .ok_or_else(|| anyhow!("profile mode requires a profile block in the configuration"))?;
    let target = parse_path(&profile.parameter).map_err(|e| anyhow!("{}", e))?;
    let index = model
        .estimates
        .iter()
        .position(|e| e.target() == &target)
        .ok_or_else(|| anyhow!("profiled parameter '{}' is not an estimate", profile.parameter))?;

    let (original_lower, original_upper) =
        (model.estimates[index].lower_bound, model.estimates[index].upper_bound);
    let lower = profile.lower.unwrap_or(original_lower);
    let upper = profile.upper.unwrap_or(original_upper);
    let steps = profile.steps.max(2);

    let mut minimiser_config = settings.minimiser.clone();
    minimiser_config.covariance = false;
    let minimiser = Minimiser::new(minimiser_config);

    println!("profile {} over [{}, {}] in {} steps", profile.parameter, lower, upper, steps);
    println!("value score");
    for step in 0..steps {
        let value = lower + (upper - lower) * step as f64 / (steps - 1) as f64;
        model.estimates[index].lower_bound = value;
        model.estimates[index].upper_bound = value;
        model.apply_estimate(index, value).context("fixing profiled parameter")?;

        let result = minimiser
            .minimise(model)
            .with_context(|| format!("minimising at profile step {}", step))?;
        println!("{:.8} {:.8}", value, result.score);
    }

    model.estimates[index].lower_bound = original_lower;
    model.estimates[index].upper_bound = original_upper;
    Ok(ExitCode::SUCCESS)
}

fn print_reports(model: &stock_synthesis::Model) -> Result<()> {
    let objective = model.compute_objective().context("computing objective")?;
    print!("{}", reports::objective_report(&objective));
    print!("{}", reports::partition_report(model));
    print!("{}", reports::derived_quantity_report(model));
    if !model.estimates.is_empty() {
        print!("{}", reports::estimate_summary(model));
    }
    Ok(())
}
