use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::distributions::{LogNormalDist, TruncnormDist};
use crate::error::{ModelError, ModelResult};
use crate::types::{DrawIndex, Timestamp};

/// Policy scenario. Only `Alternative` applies the scale-up ramp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scenario {
    Baseline,
    Alternative,
}

impl std::str::FromStr for Scenario {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "baseline" => Ok(Scenario::Baseline),
            "alternative" => Ok(Scenario::Alternative),
            other => Err(ModelError::config(format!(
                "unknown scenario '{other}' (expected baseline or alternative)"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PopulationConfig {
    pub size: usize,
    /// Entry ages are uniform on `[age_start, age_end]`.
    pub age_start: f64,
    pub age_end: f64,
    /// Simulants reaching this age leave the model as untracked.
    #[serde(default)]
    pub exit_age: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiseaseConfig {
    /// Mean years spent in a benign lesion before progression.
    pub bcc_duration_years: f64,
    /// Annual remission rate out of invasive cancer.
    pub remission_rate: f64,
    /// Relative risk of a benign lesion given hrHPV infection.
    pub rr_hrhpv: LogNormalDist,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScreeningConfig {
    pub first_screening_age: f64,
    pub mid_screening_age: f64,
    pub last_screening_age: f64,

    /// Population-level probability of attending a scheduled screening.
    pub base_attendance: TruncnormDist,
    /// Relative odds of attending given attendance at the previous visit.
    pub attended_previous_multiplier: TruncnormDist,

    pub hpv_sensitivity: TruncnormDist,
    pub hpv_specificity: TruncnormDist,
    pub cytology_sensitivity: TruncnormDist,
    pub cotest_cancer_sensitivity: TruncnormDist,
    pub remission_sensitivity: TruncnormDist,

    /// Mean days from invasive onset to symptomatic presentation.
    pub mean_time_to_symptoms_days: f64,

    /// Inter-screening intervals in days.
    pub annual_interval: TruncnormDist,
    pub triennial_interval: TruncnormDist,
    pub quinquennial_interval: TruncnormDist,
}

/// Coverage of a ratchet exposure. `scaled_coverage` is reached under the
/// alternative scenario on the intervention ramp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExposureConfig {
    pub baseline_coverage: TruncnormDist,
    #[serde(default)]
    pub scaled_coverage: Option<TruncnormDist>,
    pub efficacy: TruncnormDist,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VaccinationConfig {
    #[serde(flatten)]
    pub exposure: ExposureConfig,
    /// Only simulants younger than this may become vaccinated.
    pub last_vaccination_age: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterventionConfig {
    pub scale_up_start: NaiveDate,
    pub scale_up_end: NaiveDate,
    /// Population attendance goal at the end of the ramp. The ramp starts
    /// from `screening.base_attendance`.
    pub attendance_end: TruncnormDist,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stratification {
    pub by_age: bool,
    pub by_year: bool,
    pub by_sex: bool,
}

impl Default for Stratification {
    fn default() -> Self {
        Stratification { by_age: true, by_year: true, by_sex: false }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObserverConfig {
    #[serde(default)]
    pub disease: Stratification,
    #[serde(default)]
    pub screening: Stratification,
    #[serde(default)]
    pub vaccination: Stratification,
    #[serde(default)]
    pub treatment: Stratification,
    #[serde(default)]
    pub mortality: Stratification,
    #[serde(default)]
    pub disability: Stratification,
    /// Birth-year span covered by the 5-year cohort labels.
    pub cohort_start_year: i32,
    pub cohort_end_year: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationConfig {
    pub seed: u64,
    pub draw: DrawIndex,
    pub scenario: Scenario,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub step_days: f64,
    pub population: PopulationConfig,
    pub disease: DiseaseConfig,
    pub screening: ScreeningConfig,
    pub vaccination: VaccinationConfig,
    pub treatment: ExposureConfig,
    pub intervention: InterventionConfig,
    pub observers: ObserverConfig,
}

fn ymd(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap_or(NaiveDate::MIN)
}

impl SimulationConfig {
    pub fn canonical() -> Self {
        // ── Screening ─────────────────────────────────────────────────────────
        // Attendance and test accuracy are PLACEHOLDER calibration values.
        let screening = ScreeningConfig {
            first_screening_age: 21.0,
            mid_screening_age: 30.0,
            last_screening_age: 65.0,
            base_attendance: TruncnormDist::probability(0.25, 0.0025), // PLACEHOLDER
            attended_previous_multiplier: TruncnormDist::new(1.89, 0.378, Some(1.0), None), // PLACEHOLDER
            hpv_sensitivity: TruncnormDist::probability(0.767, 0.1),   // PLACEHOLDER
            hpv_specificity: TruncnormDist::probability(0.941, 0.1),   // PLACEHOLDER
            cytology_sensitivity: TruncnormDist::probability(0.340, 0.1), // PLACEHOLDER
            cotest_cancer_sensitivity: TruncnormDist::probability(0.375, 0.1), // PLACEHOLDER
            remission_sensitivity: TruncnormDist::probability(1.0, 0.0),
            mean_time_to_symptoms_days: 4.0 * 365.25, // PLACEHOLDER
            annual_interval: TruncnormDist::new(364.0, 156.0, Some(100.0), Some(700.0)),
            triennial_interval: TruncnormDist::new(1095.75, 156.0, Some(0.0), None),
            quinquennial_interval: TruncnormDist::new(1826.25, 156.0, Some(0.0), None),
        };

        // ── Exposures ─────────────────────────────────────────────────────────
        let vaccination = VaccinationConfig {
            exposure: ExposureConfig {
                baseline_coverage: TruncnormDist::probability(0.5, 0.05), // PLACEHOLDER
                scaled_coverage: Some(TruncnormDist::probability(0.9, 0.02)), // PLACEHOLDER
                efficacy: TruncnormDist::probability(0.9, 0.05), // PLACEHOLDER
            },
            last_vaccination_age: 26.0,
        };
        let treatment = ExposureConfig {
            baseline_coverage: TruncnormDist::probability(0.6, 0.05), // PLACEHOLDER
            scaled_coverage: Some(TruncnormDist::probability(0.9, 0.02)), // PLACEHOLDER
            efficacy: TruncnormDist::probability(0.85, 0.05), // PLACEHOLDER
        };

        SimulationConfig {
            seed: 42,
            draw: DrawIndex(0),
            scenario: Scenario::Baseline,
            start_date: ymd(2020, 1, 1),
            end_date: ymd(2040, 12, 31),
            step_days: 36.5,
            population: PopulationConfig { size: 10_000, age_start: 15.0, age_end: 95.0, exit_age: None },
            disease: DiseaseConfig {
                bcc_duration_years: 14.5,
                remission_rate: 0.1,
                rr_hrhpv: LogNormalDist::new(16.2, 4.425),
            },
            screening,
            vaccination,
            treatment,
            intervention: InterventionConfig {
                scale_up_start: ymd(2021, 1, 1),
                scale_up_end: ymd(2030, 1, 1),
                attendance_end: TruncnormDist::probability(0.75, 0.0075), // PLACEHOLDER
            },
            observers: ObserverConfig {
                disease: Stratification::default(),
                screening: Stratification::default(),
                vaccination: Stratification::default(),
                treatment: Stratification::default(),
                mortality: Stratification::default(),
                disability: Stratification::default(),
                cohort_start_year: 1925,
                cohort_end_year: 2040,
            },
        }
    }

    pub fn from_json_path(path: &Path) -> ModelResult<Self> {
        let reader = BufReader::new(File::open(path)?);
        let config: SimulationConfig = serde_json::from_reader(reader)?;
        config.validate()?;
        Ok(config)
    }

    pub fn start_time(&self) -> ModelResult<Timestamp> {
        midnight(self.start_date)
    }

    pub fn end_time(&self) -> ModelResult<Timestamp> {
        midnight(self.end_date)
    }

    /// Rejects any configuration the model cannot run faithfully.
    pub fn validate(&self) -> ModelResult<()> {
        if self.end_date <= self.start_date {
            return Err(ModelError::config(format!(
                "end_date {} must be after start_date {}",
                self.end_date, self.start_date
            )));
        }
        if !(self.step_days.is_finite() && self.step_days > 0.0) {
            return Err(ModelError::config(format!("step_days must be positive, got {}", self.step_days)));
        }

        let p = &self.population;
        if p.size == 0 {
            return Err(ModelError::config("population size must be at least 1"));
        }
        if !(p.age_start >= 0.0 && p.age_start <= p.age_end) {
            return Err(ModelError::config(format!(
                "population ages [{}, {}] are not an ordered, non-negative range",
                p.age_start, p.age_end
            )));
        }
        if let Some(exit) = p.exit_age
            && exit <= p.age_start
        {
            return Err(ModelError::config(format!("exit_age {exit} must exceed age_start {}", p.age_start)));
        }

        let d = &self.disease;
        if !(d.bcc_duration_years > 0.0) || !(d.remission_rate >= 0.0) {
            return Err(ModelError::config("disease constants must be positive"));
        }
        d.rr_hrhpv.validate("disease.rr_hrhpv")?;

        let s = &self.screening;
        if !(s.first_screening_age < s.mid_screening_age && s.mid_screening_age < s.last_screening_age) {
            return Err(ModelError::config(format!(
                "screening ages must satisfy first < mid < last, got {} / {} / {}",
                s.first_screening_age, s.mid_screening_age, s.last_screening_age
            )));
        }
        if !(s.mean_time_to_symptoms_days > 0.0) {
            return Err(ModelError::config("mean_time_to_symptoms_days must be positive"));
        }
        for (name, dist) in [
            ("screening.base_attendance", &s.base_attendance),
            ("screening.attended_previous_multiplier", &s.attended_previous_multiplier),
            ("screening.hpv_sensitivity", &s.hpv_sensitivity),
            ("screening.hpv_specificity", &s.hpv_specificity),
            ("screening.cytology_sensitivity", &s.cytology_sensitivity),
            ("screening.cotest_cancer_sensitivity", &s.cotest_cancer_sensitivity),
            ("screening.remission_sensitivity", &s.remission_sensitivity),
            ("screening.annual_interval", &s.annual_interval),
            ("screening.triennial_interval", &s.triennial_interval),
            ("screening.quinquennial_interval", &s.quinquennial_interval),
            ("intervention.attendance_end", &self.intervention.attendance_end),
        ] {
            dist.validate(name)?;
        }
        for (name, dist) in [
            ("annual_interval", &s.annual_interval),
            ("triennial_interval", &s.triennial_interval),
            ("quinquennial_interval", &s.quinquennial_interval),
        ] {
            if dist.lower.is_none_or(|lo| lo < 0.0) {
                return Err(ModelError::config(format!(
                    "screening.{name} needs a non-negative lower bound so intervals cannot go backwards"
                )));
            }
        }

        for (name, e) in [("vaccination", &self.vaccination.exposure), ("treatment", &self.treatment)] {
            e.baseline_coverage.validate(&format!("{name}.baseline_coverage"))?;
            e.efficacy.validate(&format!("{name}.efficacy"))?;
            if let Some(scaled) = &e.scaled_coverage {
                scaled.validate(&format!("{name}.scaled_coverage"))?;
            }
        }

        if self.intervention.scale_up_end <= self.intervention.scale_up_start {
            return Err(ModelError::config(format!(
                "scale_up_end {} must be after scale_up_start {}",
                self.intervention.scale_up_end, self.intervention.scale_up_start
            )));
        }
        if self.observers.cohort_end_year <= self.observers.cohort_start_year {
            return Err(ModelError::config("observer cohort year range is empty"));
        }
        Ok(())
    }
}

/// Midnight at the start of `d`.
pub fn midnight(d: NaiveDate) -> ModelResult<Timestamp> {
    d.and_hms_opt(0, 0, 0)
        .ok_or_else(|| ModelError::config(format!("cannot build timestamp for {d}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_config_is_valid() {
        SimulationConfig::canonical().validate().unwrap();
    }

    #[test]
    fn canonical_survives_json_round_trip() {
        let c = SimulationConfig::canonical();
        let json = serde_json::to_string(&c).unwrap();
        let back: SimulationConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(c, back);
        assert!(json.contains("\"scenario\":\"baseline\""));
    }

    #[test]
    fn unbounded_interval_is_rejected() {
        let mut c = SimulationConfig::canonical();
        c.screening.triennial_interval.lower = None;
        let err = c.validate().unwrap_err();
        assert!(err.to_string().contains("triennial_interval"), "{err}");
    }

    #[test]
    fn inverted_dates_are_rejected() {
        let mut c = SimulationConfig::canonical();
        c.end_date = c.start_date;
        assert!(matches!(c.validate(), Err(ModelError::Config { .. })));
    }

    #[test]
    fn screening_age_order_is_checked() {
        let mut c = SimulationConfig::canonical();
        c.screening.mid_screening_age = 70.0;
        assert!(c.validate().is_err());
    }

    #[test]
    fn scenario_parses_lowercase_names() {
        assert_eq!("alternative".parse::<Scenario>().unwrap(), Scenario::Alternative);
        assert!("scale_up".parse::<Scenario>().is_err());
    }
}
