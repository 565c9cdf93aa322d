use std::collections::BTreeMap;
use std::fs::File;
use std::io::BufWriter;
use std::path::PathBuf;
use std::process::ExitCode;

use chrono::{Datelike, NaiveDate};
use clap::Parser;
use serde::Serialize;

use ccsim::config::{Scenario, SimulationConfig};
use ccsim::error::{ModelError, ModelResult};
use ccsim::simulation::Simulation;
use ccsim::summary::{self, DistStats};
use ccsim::tables::RateTables;
use ccsim::types::DrawIndex;

/// Cervical cancer screening microsimulation.
#[derive(Parser, Debug)]
#[command(name = "ccsim", about = "Run the cervical cancer screening microsimulation", long_about = None)]
struct Cli {
    /// JSON config file; the built-in canonical config when omitted
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long)]
    seed: Option<u64>,
    /// First parameter draw
    #[arg(long)]
    draw: Option<u32>,
    /// baseline | alternative
    #[arg(long)]
    scenario: Option<Scenario>,
    /// Entry cohort size
    #[arg(long)]
    population: Option<usize>,
    /// Run length in years from the start date
    #[arg(long)]
    years: Option<i32>,
    /// Directory of `{key}.csv` rate tables; synthetic tables when omitted
    #[arg(long)]
    tables: Option<PathBuf>,
    #[arg(long, default_value = "metrics.json")]
    output: PathBuf,
    /// Replicates over draws `draw..draw+N`, run in parallel
    #[arg(long)]
    runs: Option<u32>,
    #[arg(long)]
    quiet: bool,
}

#[derive(Serialize)]
struct ReplicateOutput {
    seed: u64,
    draw: u32,
    scenario: Scenario,
    metrics: BTreeMap<String, f64>,
}

#[derive(Serialize)]
struct ReplicatesOutput {
    replicates: Vec<ReplicateOutput>,
    summary: BTreeMap<String, DistStats>,
}

/// Measures worth a line on the console, summed over their strata.
const HEADLINE_PREFIXES: [&str; 10] = [
    "screening_scheduled_count",
    "screening_attended_count",
    "hpv_vaccinated_count",
    "bcc_treated_count",
    "death_due_to_cervical_cancer",
    "death_due_to_other_causes",
    "total_population_living",
    "total_population_dead",
    "years_of_life_lost",
    "years_lived_with_disability",
];

fn main() -> ExitCode {
    let cli = Cli::parse();
    let level = if cli.quiet { "warn" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{e}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> ModelResult<()> {
    let mut config = match &cli.config {
        Some(path) => SimulationConfig::from_json_path(path)?,
        None => SimulationConfig::canonical(),
    };
    apply_overrides(&mut config, &cli)?;
    config.validate()?;

    match cli.runs {
        None | Some(1) => {
            let output = run_replicate(config, cli.tables.as_ref())?;
            write_json(&cli.output, &output)?;
            if !cli.quiet {
                print_headline(&output.metrics);
            }
        }
        Some(0) => return Err(ModelError::config("--runs must be at least 1")),
        Some(n) => {
            use rayon::prelude::*;

            let first = config.draw.0;
            let replicates = (first..first + n)
                .into_par_iter()
                .map(|d| {
                    let mut c = config.clone();
                    c.draw = DrawIndex(d);
                    run_replicate(c, cli.tables.as_ref())
                })
                .collect::<ModelResult<Vec<_>>>()?;

            let metrics: Vec<_> = replicates.iter().map(|r| r.metrics.clone()).collect();
            let summary = summary::summarize(&metrics);
            if !cli.quiet {
                let headlines: Vec<_> = metrics.iter().map(headline).collect();
                print_distributions(&summary::summarize(&headlines), n);
            }
            write_json(&cli.output, &ReplicatesOutput { replicates, summary })?;
        }
    }
    log::info!("metrics written to {}", cli.output.display());
    Ok(())
}

fn apply_overrides(config: &mut SimulationConfig, cli: &Cli) -> ModelResult<()> {
    if let Some(seed) = cli.seed {
        config.seed = seed;
    }
    if let Some(draw) = cli.draw {
        config.draw = DrawIndex(draw);
    }
    if let Some(scenario) = cli.scenario {
        config.scenario = scenario;
    }
    if let Some(size) = cli.population {
        config.population.size = size;
    }
    if let Some(years) = cli.years {
        let start = config.start_date;
        config.end_date = NaiveDate::from_ymd_opt(start.year() + years, start.month(), start.day())
            .ok_or_else(|| ModelError::config(format!("cannot run {years} years from {start}")))?;
    }
    Ok(())
}

fn run_replicate(config: SimulationConfig, tables_dir: Option<&PathBuf>) -> ModelResult<ReplicateOutput> {
    let tables = match tables_dir {
        Some(dir) => RateTables::from_csv_dir(dir, config.draw)?,
        None => RateTables::synthetic(),
    };
    let (seed, draw, scenario) = (config.seed, config.draw.0, config.scenario);
    let mut sim = Simulation::from_config(config, &tables)?;
    sim.run()?;
    Ok(ReplicateOutput { seed, draw, scenario, metrics: sim.metrics() })
}

fn write_json<T: Serialize>(path: &PathBuf, value: &T) -> ModelResult<()> {
    let writer = BufWriter::new(File::create(path)?);
    serde_json::to_writer_pretty(writer, value)?;
    Ok(())
}

fn headline(metrics: &BTreeMap<String, f64>) -> BTreeMap<String, f64> {
    HEADLINE_PREFIXES
        .iter()
        .map(|prefix| {
            let total = metrics.iter().filter(|(k, _)| k.starts_with(prefix)).map(|(_, v)| v).sum();
            (prefix.to_string(), total)
        })
        .collect()
}

fn print_headline(metrics: &BTreeMap<String, f64>) {
    println!("\n=== Run totals ===");
    for (name, value) in headline(metrics) {
        println!("  {name:<32} {value:>12.1}");
    }
}

fn print_distributions(dists: &BTreeMap<String, DistStats>, n_runs: u32) {
    println!("\n=== Multi-draw distribution (N={n_runs} draws) ===");
    println!(
        "{:<32} | {:>10} | {:>10} | {:>10} | {:>10} | {:>10} | {:>10} | {:>10}",
        "Metric", "min", "p5", "p50", "p95", "max", "mean", "stddev"
    );
    println!("{}", "-".repeat(32 + 7 * 13));
    for (name, ds) in dists {
        println!(
            "{:<32} | {:>10.1} | {:>10.1} | {:>10.1} | {:>10.1} | {:>10.1} | {:>10.1} | {:>10.1}",
            name, ds.min, ds.p5, ds.p50, ds.p95, ds.max, ds.mean, ds.std_dev
        );
    }
}
