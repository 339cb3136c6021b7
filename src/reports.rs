//! Report writers and persisted-state files
//!
//! Free-parameter files (one header line of addressable names, rows of
//! whitespace-separated values), the MCMC chain file, and the tabular
//! partition/objective reports. Tabular output is stable across runs at
//! identical inputs.

use std::error::Error;
use std::fmt::Write as FmtWrite;
use std::fs::File;
use std::io::{BufRead, BufReader, Write};
use std::path::Path;

use chrono::Local;

use crate::mcmc::ChainLink;
use crate::model::Model;
use crate::objective::ObjectiveFunction;

/// Write a free-parameter file: addressable names then value rows
pub fn write_free_parameters<P: AsRef<Path>>(
    path: P,
    names: &[String],
    rows: &[Vec<f64>],
) -> Result<(), Box<dyn Error>> {
    let mut file = File::create(path)?;
    writeln!(file, "{}", names.join(" "))?;
    for row in rows {
        let line = row
            .iter()
            .map(|value| format!("{:.12e}", value))
            .collect::<Vec<_>>()
            .join(" ");
        writeln!(file, "{}", line)?;
    }
    Ok(())
}

/// Read a free-parameter file into (names, value rows)
pub fn read_free_parameters<P: AsRef<Path>>(
    path: P,
) -> Result<(Vec<String>, Vec<Vec<f64>>), Box<dyn Error>> {
    let file = File::open(path)?;
    let mut lines = BufReader::new(file).lines();

    let header = lines.next().ok_or("free parameter file is empty")??;
    let names: Vec<String> = header.split_whitespace().map(str::to_string).collect();

    let mut rows = Vec::new();
    for line in lines {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let values = line
            .split_whitespace()
            .map(|field| {
                field
                    .parse::<f64>()
                    .map_err(|_| format!("value '{}' is not numeric", field))
            })
            .collect::<Result<Vec<f64>, String>>()?;
        if values.len() != names.len() {
            return Err(format!(
                "row supplies {} values but the header names {} parameters",
                values.len(),
                names.len()
            )
            .into());
        }
        rows.push(values);
    }
    Ok((names, rows))
}

/// Header columns of the MCMC chain file
const CHAIN_COLUMNS: &str =
    "iteration score likelihood prior penalty additional_priors \
     acceptance_rate acceptance_rate_since_adapt step_size";

/// Write the chain file: one row per kept link
pub fn write_chain<P: AsRef<Path>>(
    path: P,
    parameter_names: &[String],
    links: &[ChainLink],
) -> Result<(), Box<dyn Error>> {
    let mut file = File::create(path)?;
    writeln!(file, "{} {}", CHAIN_COLUMNS, parameter_names.join(" "))?;
    for link in links {
        let mut line = format!(
            "{} {:.8} {:.8} {:.8} {:.8} {:.8} {:.6} {:.6} {:.8}",
            link.iteration,
            link.score,
            link.likelihood,
            link.prior,
            link.penalty,
            link.additional_priors,
            link.acceptance_rate,
            link.acceptance_rate_since_adapt,
            link.step_size,
        );
        for value in &link.values {
            write!(line, " {:.12e}", value).expect("writing to string cannot fail");
        }
        writeln!(file, "{}", line)?;
    }
    Ok(())
}

/// Render the partition as a numbers-at-age table
pub fn partition_report(model: &Model) -> String {
    let mut out = String::new();
    writeln!(out, "*partition").unwrap();
    writeln!(out, "# generated {}", Local::now().format("%Y-%m-%d %H:%M:%S")).unwrap();

    let header: Vec<String> = (model.core.min_age..=model.core.max_age)
        .map(|age| age.to_string())
        .collect();
    writeln!(out, "category {}", header.join(" ")).unwrap();

    for category in model.core.partition.iter() {
        let values = category
            .data
            .iter()
            .map(|value| format!("{:.6}", value))
            .collect::<Vec<_>>()
            .join(" ");
        writeln!(out, "{} {}", category.label, values).unwrap();
    }
    writeln!(out, "*end").unwrap();
    out
}

/// Render the objective function and its components
pub fn objective_report(objective: &ObjectiveFunction) -> String {
    let mut out = String::new();
    writeln!(out, "*objective_function").unwrap();
    writeln!(out, "total_score {:.8}", objective.score).unwrap();
    writeln!(out, "likelihoods {:.8}", objective.likelihoods).unwrap();
    writeln!(out, "priors {:.8}", objective.priors).unwrap();
    writeln!(out, "additional_priors {:.8}", objective.additional_priors).unwrap();
    writeln!(out, "penalties {:.8}", objective.penalties).unwrap();
    for component in &objective.components {
        writeln!(out, "{} {:.8}", component.label, component.score).unwrap();
    }
    writeln!(out, "*end").unwrap();
    out
}

/// Render every estimate with its bounds and current value
pub fn estimate_summary(model: &Model) -> String {
    let mut out = String::new();
    writeln!(out, "*estimate_summary").unwrap();
    writeln!(out, "parameter lower_bound upper_bound value").unwrap();
    for estimate in &model.estimates {
        let value = model.get_addressable(estimate.target()).unwrap_or(f64::NAN);
        writeln!(
            out,
            "{} {} {} {:.8}",
            estimate.parameter, estimate.lower_bound, estimate.upper_bound, value
        )
        .unwrap();
    }
    writeln!(out, "*end").unwrap();
    out
}

/// Render derived quantity values by year
pub fn derived_quantity_report(model: &Model) -> String {
    let mut out = String::new();
    writeln!(out, "*derived_quantities").unwrap();
    for derived_quantity in &model.core.derived_quantities {
        writeln!(out, "{}:", derived_quantity.label).unwrap();
        for (year, value) in derived_quantity.values() {
            writeln!(out, "  {} {:.6}", year, value).unwrap();
        }
    }
    writeln!(out, "*end").unwrap();
    out
}

/// Write simulated observation files, one per observation, named
/// deterministically per simulation set
pub fn write_simulated_observations<P: AsRef<Path>>(
    directory: P,
    set: u32,
    model: &Model,
) -> Result<(), Box<dyn Error>> {
    for observation in &model.observations {
        let path = directory
            .as_ref()
            .join(format!("{}.{}.sim.csv", observation.label, set));
        let mut file = File::create(path)?;
        writeln!(file, "year,category,age,length,observed,error_value")?;
        for (year, comparisons) in observation.comparisons() {
            for comparison in comparisons {
                writeln!(
                    file,
                    "{},{},{},{},{:.10},{}",
                    year,
                    comparison.category,
                    comparison.age,
                    comparison.length,
                    comparison.observed,
                    comparison.error_value
                )?;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_free_parameter_roundtrip() {
        let path = std::env::temp_dir().join("stock_synthesis_pars_test.txt");
        let names = vec![
            "process[Recruitment].r0".to_string(),
            "catchability[Survey].q".to_string(),
        ];
        let rows = vec![vec![5.0e6, 1.7e-6], vec![4.9e6, 1.8e-6]];
        write_free_parameters(&path, &names, &rows).unwrap();

        let (read_names, read_rows) = read_free_parameters(&path).unwrap();
        assert_eq!(read_names, names);
        assert_eq!(read_rows.len(), 2);
        assert!((read_rows[0][0] - 5.0e6).abs() < 1.0);
        assert!((read_rows[1][1] - 1.8e-6).abs() < 1e-12);
    }

    #[test]
    fn test_read_rejects_ragged_rows() {
        let path = std::env::temp_dir().join("stock_synthesis_ragged_test.txt");
        std::fs::write(&path, "a b\n1.0 2.0 3.0\n").unwrap();
        assert!(read_free_parameters(&path).is_err());
    }
}
