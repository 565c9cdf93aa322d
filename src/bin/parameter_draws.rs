use std::process::ExitCode;

use clap::Parser;
use serde::Serialize;

use ccsim::config::SimulationConfig;
use ccsim::disease::DiseaseParameters;
use ccsim::error::ModelResult;
use ccsim::intervention::conditional_attendance;
use ccsim::screening::ScreeningParameters;
use ccsim::types::DrawIndex;

/// Print the parameter values each draw realises, one JSON object per line.
#[derive(Parser, Debug)]
#[command(name = "parameter_draws", long_about = None)]
struct Cli {
    /// Number of draws, starting at 0
    #[arg(default_value_t = 10)]
    draws: u32,
    #[arg(long)]
    config: Option<std::path::PathBuf>,
}

#[derive(Serialize)]
struct DrawRecord {
    draw: u32,
    disease: DiseaseParameters,
    screening: ScreeningParameters,
    attendance_attended_previous: f64,
    attendance_not_attended_previous: f64,
    hpv_vaccine_coverage: f64,
    bcc_treatment_coverage: f64,
    attendance_scale_up_end: f64,
}

fn main() -> ExitCode {
    env_logger::init();
    let cli = Cli::parse();
    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{e}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: &Cli) -> ModelResult<()> {
    let mut config = match &cli.config {
        Some(path) => SimulationConfig::from_json_path(path)?,
        None => SimulationConfig::canonical(),
    };

    let mut records = Vec::with_capacity(cli.draws as usize);
    for d in 0..cli.draws {
        config.draw = DrawIndex(d);
        let draw = config.draw;
        let screening = ScreeningParameters::from_config(&config.screening, draw)?;
        let attendance = conditional_attendance(screening.base_attendance, screening.attended_previous_multiplier)?;
        let iv = &config.intervention;
        records.push(DrawRecord {
            draw: d,
            disease: DiseaseParameters::from_config(&config)?,
            screening,
            attendance_attended_previous: attendance.attended_previous,
            attendance_not_attended_previous: attendance.not_attended_previous,
            hpv_vaccine_coverage: config
                .vaccination
                .exposure
                .baseline_coverage
                .get_random_variable("hpv_vaccine_coverage", draw),
            bcc_treatment_coverage: config.treatment.baseline_coverage.get_random_variable("bcc_treatment_coverage", draw),
            attendance_scale_up_end: iv.attendance_end.get_random_variable("attendance_scale_up_end", draw),
        });
    }

    for r in &records {
        println!("{}", serde_json::to_string(r)?);
    }

    // Spread summary to stderr.
    let spread = |name: &str, values: Vec<f64>| {
        let lo = values.iter().copied().fold(f64::INFINITY, f64::min);
        let hi = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let mean = values.iter().sum::<f64>() / values.len().max(1) as f64;
        eprintln!("  {name:<28} mean={mean:.4}  min={lo:.4}  max={hi:.4}");
    };
    eprintln!("parameter_draws: {} draws", records.len());
    spread("rr_hrhpv", records.iter().map(|r| r.disease.rr_hrhpv).collect());
    spread("hpv_vaccine_efficacy", records.iter().map(|r| r.disease.vaccine_efficacy).collect());
    spread("base_attendance", records.iter().map(|r| r.screening.base_attendance).collect());
    spread("hpv_sensitivity", records.iter().map(|r| r.screening.hpv_sensitivity).collect());
    spread("hpv_vaccine_coverage", records.iter().map(|r| r.hpv_vaccine_coverage).collect());
    Ok(())
}
