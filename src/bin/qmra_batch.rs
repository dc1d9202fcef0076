use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::prelude::*;

use qmra_mc::io::{read_concentrations, read_dilutions, read_scenarios, write_outcome};
use qmra_mc::{BatchConfig, BatchScenarioRunner, DilutionTable, PathogenParameterStore};

#[derive(Debug, Parser)]
#[command(name = "qmra-batch")]
#[command(about = "Monte Carlo QMRA over a table of exposure scenarios")]
struct Cli {
    /// TOML batch configuration; defaults to configs/default.toml when present.
    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(long)]
    scenarios: PathBuf,

    #[arg(long)]
    dilutions: Option<PathBuf>,

    #[arg(long)]
    concentrations: PathBuf,

    /// JSON pathogen records merged over the built-in set.
    #[arg(long)]
    pathogens: Option<PathBuf>,

    #[arg(long, default_value = "output-qmra")]
    outdir: PathBuf,

    #[arg(long)]
    seed: Option<u64>,

    #[arg(long)]
    threshold: Option<f64>,

    #[arg(long, default_value_t = false)]
    fail_fast: bool,

    #[arg(short, long, default_value_t = false)]
    verbose: bool,
}

fn resolve_default_config_path() -> Option<PathBuf> {
    let local = PathBuf::from("configs").join("default.toml");
    if local.exists() {
        return Some(local);
    }

    let bundled = PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("configs")
        .join("default.toml");
    bundled.exists().then_some(bundled)
}

fn load_config(cli: &Cli) -> Result<BatchConfig> {
    let mut config = match cli.config.clone().or_else(resolve_default_config_path) {
        Some(path) => BatchConfig::from_toml_file(&path)
            .with_context(|| format!("failed to load config: {}", path.display()))?,
        None => BatchConfig::default(),
    };

    if let Some(seed) = cli.seed {
        config.seed = seed;
    }
    if let Some(threshold) = cli.threshold {
        config.compliance_threshold = threshold;
    }
    if cli.fail_fast {
        config.fail_fast = true;
    }
    config.validate().context("invalid configuration after CLI overrides")?;
    Ok(config)
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().without_time())
        .init();

    let config = load_config(&cli)?;

    let mut pathogens = PathogenParameterStore::builtin();
    if let Some(path) = &cli.pathogens {
        let extra = PathogenParameterStore::from_json_file(path)
            .with_context(|| format!("failed to load pathogens: {}", path.display()))?;
        pathogens.extend(extra);
    }

    let scenarios = read_scenarios(&cli.scenarios)
        .with_context(|| format!("failed to read scenarios: {}", cli.scenarios.display()))?;
    let concentrations = read_concentrations(&cli.concentrations).with_context(|| {
        format!(
            "failed to read concentrations: {}",
            cli.concentrations.display()
        )
    })?;
    let dilutions = match &cli.dilutions {
        Some(path) => read_dilutions(path)
            .with_context(|| format!("failed to read dilutions: {}", path.display()))?,
        None => DilutionTable::default(),
    };

    let runner = BatchScenarioRunner::new(config.clone(), pathogens)
        .with_dilutions(dilutions)
        .with_concentrations(concentrations);
    let outcome = runner.run(&scenarios).context("batch aborted")?;

    write_outcome(&cli.outdir, &outcome, &config)
        .with_context(|| format!("failed to write output to {}", cli.outdir.display()))?;

    let summary = outcome.summary();
    println!(
        "scenarios={} compliant={} non_compliant={} errored={} output={}",
        summary.total,
        summary.compliant,
        summary.non_compliant,
        summary.errored,
        cli.outdir.display()
    );
    info!(outdir = %cli.outdir.display(), "results written");

    Ok(())
}
