//! File loaders for configuration and bulk tabular inputs
//!
//! The primary configuration is one JSON document. Bulk tables (catches by
//! fishery and year, tag-release numbers, observed compositions) can live
//! in CSV files next to it and are referenced by path.

use std::collections::BTreeMap;
use std::error::Error;
use std::path::Path;

use csv::ReaderBuilder;
use serde::Deserialize;

use super::ModelConfig;

/// Load the model configuration from a JSON file
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<ModelConfig, Box<dyn Error>> {
    let text = std::fs::read_to_string(&path)?;
    let config: ModelConfig = serde_json::from_str(&text)?;
    Ok(config)
}

/// Raw CSV row of a catches table
#[derive(Debug, Deserialize)]
struct CatchRow {
    year: u32,
    fishery: String,
    catch: f64,
}

/// Load `fishery -> year -> catch` from a catches CSV
pub fn load_catches<P: AsRef<Path>>(
    path: P,
) -> Result<BTreeMap<String, BTreeMap<u32, f64>>, Box<dyn Error>> {
    let mut reader = ReaderBuilder::new().trim(csv::Trim::All).from_path(path)?;
    let mut catches: BTreeMap<String, BTreeMap<u32, f64>> = BTreeMap::new();
    for result in reader.deserialize() {
        let row: CatchRow = result?;
        catches.entry(row.fishery).or_default().insert(row.year, row.catch);
    }
    Ok(catches)
}

/// Load a `year, v1, v2, ...` table into per-year rows. The header row is
/// required; its first column must be `year`.
pub fn load_year_rows<P: AsRef<Path>>(
    path: P,
) -> Result<BTreeMap<u32, Vec<f64>>, Box<dyn Error>> {
    let mut reader = ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_path(path)?;

    let headers = reader.headers()?.clone();
    if headers.get(0).map(str::to_lowercase) != Some("year".to_string()) {
        return Err(format!(
            "first column must be labelled 'year', got '{}'",
            headers.get(0).unwrap_or("")
        )
        .into());
    }

    let mut rows = BTreeMap::new();
    for result in reader.records() {
        let record = result?;
        let year: u32 = record
            .get(0)
            .ok_or("missing year column")?
            .parse()
            .map_err(|_| format!("year value '{}' is not numeric", record.get(0).unwrap_or("")))?;
        let values = record
            .iter()
            .skip(1)
            .filter(|field| !field.is_empty())
            .map(|field| {
                field
                    .parse::<f64>()
                    .map_err(|_| format!("value '{}' in year {} is not numeric", field, year))
            })
            .collect::<Result<Vec<f64>, String>>()?;
        rows.insert(year, values);
    }
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_temp(name: &str, contents: &str) -> std::path::PathBuf {
        let path = std::env::temp_dir().join(name);
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        path
    }

    #[test]
    fn test_load_catches() {
        let path = write_temp(
            "stock_synthesis_catches_test.csv",
            "year,fishery,catch\n1990,Trawl,1200.5\n1991,Trawl,1350\n1990,Line,200\n",
        );
        let catches = load_catches(&path).unwrap();
        assert_eq!(catches["Trawl"][&1990], 1200.5);
        assert_eq!(catches["Trawl"][&1991], 1350.0);
        assert_eq!(catches["Line"][&1990], 200.0);
    }

    #[test]
    fn test_load_year_rows() {
        let path = write_temp(
            "stock_synthesis_rows_test.csv",
            "year,3,4,5,6\n2008,1000,2000,3000,4000\n",
        );
        let rows = load_year_rows(&path).unwrap();
        assert_eq!(rows[&2008], vec![1000.0, 2000.0, 3000.0, 4000.0]);
    }

    #[test]
    fn test_year_rows_require_year_header() {
        let path = write_temp(
            "stock_synthesis_bad_header_test.csv",
            "season,3,4\n2008,1,2\n",
        );
        assert!(load_year_rows(&path).is_err());
    }
}
