use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::Path;

use csv::{ReaderBuilder, Trim, Writer};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::batch::{BatchOutcome, BatchSummary, ScenarioFailure};
use crate::config::BatchConfig;
use crate::scenario::{
    ConcentrationRow, ConcentrationTable, DilutionRow, DilutionTable, ScenarioRecord,
    ScenarioResult,
};
use crate::Result;

pub const OUTPUT_SCHEMA_VERSION: &str = "1.0.0";

fn read_rows<T: DeserializeOwned, R: Read>(reader: R) -> Result<Vec<T>> {
    let mut rdr = ReaderBuilder::new().trim(Trim::All).from_reader(reader);
    let mut rows = Vec::new();
    for row in rdr.deserialize() {
        rows.push(row?);
    }
    Ok(rows)
}

pub fn read_scenarios_from<R: Read>(reader: R) -> Result<Vec<ScenarioRecord>> {
    read_rows(reader)
}

pub fn read_scenarios(path: &Path) -> Result<Vec<ScenarioRecord>> {
    read_scenarios_from(File::open(path)?)
}

pub fn read_dilutions_from<R: Read>(reader: R) -> Result<DilutionTable> {
    DilutionTable::from_rows(read_rows::<DilutionRow, _>(reader)?)
}

pub fn read_dilutions(path: &Path) -> Result<DilutionTable> {
    read_dilutions_from(File::open(path)?)
}

pub fn read_concentrations_from<R: Read>(reader: R) -> Result<ConcentrationTable> {
    ConcentrationTable::from_rows(read_rows::<ConcentrationRow, _>(reader)?)
}

pub fn read_concentrations(path: &Path) -> Result<ConcentrationTable> {
    read_concentrations_from(File::open(path)?)
}

fn write_rows<T: Serialize, W: Write>(writer: W, rows: &[T]) -> Result<()> {
    let mut wtr = Writer::from_writer(writer);
    for row in rows {
        wtr.serialize(row)?;
    }
    wtr.flush()?;
    Ok(())
}

/// The header follows the first row; every row of a batch reports the same
/// percentile set.
pub fn write_results_to<W: Write>(writer: W, results: &[ScenarioResult]) -> Result<()> {
    let mut wtr = Writer::from_writer(writer);
    if let Some(first) = results.first() {
        wtr.write_record(first.csv_header())?;
    }
    for result in results {
        wtr.write_record(result.csv_record())?;
    }
    wtr.flush()?;
    Ok(())
}

pub fn write_results(path: &Path, results: &[ScenarioResult]) -> Result<()> {
    write_results_to(File::create(path)?, results)
}

#[derive(Debug, Clone, Serialize)]
struct FailureRow<'a> {
    index: usize,
    scenario_id: &'a str,
    error: String,
}

pub fn write_failures(path: &Path, failures: &[ScenarioFailure]) -> Result<()> {
    let rows: Vec<FailureRow<'_>> = failures
        .iter()
        .map(|f| FailureRow {
            index: f.index,
            scenario_id: &f.scenario_id,
            error: f.error.to_string(),
        })
        .collect();
    write_rows(File::create(path)?, &rows)
}

#[derive(Debug, Clone, Serialize)]
pub struct RankedEntry {
    pub scenario_id: String,
    pub pathogen: String,
    pub annual_risk_median: f64,
    pub compliance: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    pub schema_version: String,
    pub summary: BatchSummary,
    pub config: BatchConfig,
    pub ranked: Vec<RankedEntry>,
}

impl BatchReport {
    pub fn new(outcome: &BatchOutcome, config: &BatchConfig) -> Self {
        let ranked = outcome
            .ranked_by_annual_risk()
            .into_iter()
            .map(|r| RankedEntry {
                scenario_id: r.scenario_id,
                pathogen: r.pathogen,
                annual_risk_median: r.annual_risk_median,
                compliance: r.compliance.to_string(),
            })
            .collect();
        Self {
            schema_version: OUTPUT_SCHEMA_VERSION.to_string(),
            summary: outcome.summary(),
            config: config.clone(),
            ranked,
        }
    }
}

pub fn write_report(path: &Path, report: &BatchReport) -> Result<()> {
    let mut file = File::create(path)?;
    serde_json::to_writer_pretty(&mut file, report)?;
    file.write_all(b"\n")?;
    Ok(())
}

/// Writes `results.csv`, `failures.csv` and `summary.json` under `outdir`.
pub fn write_outcome(outdir: &Path, outcome: &BatchOutcome, config: &BatchConfig) -> Result<()> {
    fs::create_dir_all(outdir)?;
    write_results(&outdir.join("results.csv"), &outcome.results)?;
    write_failures(&outdir.join("failures.csv"), &outcome.failures)?;
    write_report(&outdir.join("summary.json"), &BatchReport::new(outcome, config))
}
