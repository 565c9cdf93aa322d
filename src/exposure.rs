//! HPV vaccination and benign-lesion treatment as one-way exposures.
//!
//! Each simulant has a fixed propensity. The exposure that *would* apply now
//! is `cat2` when propensity is under the current coverage. The cached
//! exposure only ever latches `cat1 -> cat2`, and only while the simulant is
//! eligible (young enough to vaccinate, or screened positive for a benign
//! lesion).

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::config::{ExposureConfig, Scenario, SimulationConfig};
use crate::error::{ModelResult, check_probability};
use crate::intervention::ScaleUpWindow;
use crate::population::{Population, Simulant};
use crate::randomness::RandomnessStream;
use crate::screening::ScreeningResult;
use crate::types::{SimulantId, Timestamp};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub enum ExposureCategory {
    /// Unexposed.
    #[default]
    Cat1,
    /// Exposed.
    Cat2,
}

impl ExposureCategory {
    pub const ALL: [ExposureCategory; 2] = [ExposureCategory::Cat1, ExposureCategory::Cat2];

    pub fn label(self) -> &'static str {
        match self {
            ExposureCategory::Cat1 => "cat1",
            ExposureCategory::Cat2 => "cat2",
        }
    }
}

impl fmt::Display for ExposureCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Per-simulant exposure state.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ExposureRecord {
    pub propensity: f64,
    pub cached: ExposureCategory,
    /// Set the first time `cached` becomes `cat2`; never cleared.
    pub date: Option<Timestamp>,
}

/// Coverage at a point in time: the baseline level, ramping to the scaled
/// level across the scale-up window under the alternative scenario.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CoverageSchedule {
    baseline: f64,
    scaled: Option<(f64, ScaleUpWindow)>,
}

impl CoverageSchedule {
    pub fn constant(coverage: f64) -> Self {
        CoverageSchedule { baseline: coverage, scaled: None }
    }

    pub fn scaled(baseline: f64, target: f64, window: ScaleUpWindow) -> Self {
        CoverageSchedule { baseline, scaled: Some((target, window)) }
    }

    pub fn at(&self, now: Timestamp) -> f64 {
        match self.scaled {
            None => self.baseline,
            Some((target, window)) => self.baseline + window.progress(now) * (target - self.baseline),
        }
    }

    fn from_config(
        name: &str,
        config: &ExposureConfig,
        scenario: Scenario,
        window: ScaleUpWindow,
        draw: crate::types::DrawIndex,
    ) -> ModelResult<Self> {
        let baseline = config.baseline_coverage.get_random_variable(&format!("{name}_coverage"), draw);
        check_probability(name, baseline)?;
        match (&config.scaled_coverage, scenario) {
            (Some(dist), Scenario::Alternative) => {
                let target = dist.get_random_variable(&format!("{name}_scaled_coverage"), draw);
                check_probability(name, target)?;
                Ok(CoverageSchedule::scaled(baseline, target, window))
            }
            _ => Ok(CoverageSchedule::constant(baseline)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ExposureKind {
    /// Eligible while `age < last_vaccination_age`.
    Vaccination { last_vaccination_age: f64 },
    /// Eligible while the last screening found a benign lesion.
    Treatment,
}

#[derive(Debug, Clone)]
pub struct RatchetExposure {
    kind: ExposureKind,
    coverage: CoverageSchedule,
    stream: RandomnessStream,
}

impl RatchetExposure {
    pub fn new(kind: ExposureKind, coverage: CoverageSchedule, stream: RandomnessStream) -> Self {
        RatchetExposure { kind, coverage, stream }
    }

    pub fn vaccination_from_config(config: &SimulationConfig, window: ScaleUpWindow) -> ModelResult<Self> {
        let coverage = CoverageSchedule::from_config(
            "hpv_vaccine",
            &config.vaccination.exposure,
            config.scenario,
            window,
            config.draw,
        )?;
        let kind = ExposureKind::Vaccination { last_vaccination_age: config.vaccination.last_vaccination_age };
        Ok(RatchetExposure::new(kind, coverage, RandomnessStream::new("hpv_vaccine_exposure", config.seed, config.draw)))
    }

    pub fn treatment_from_config(config: &SimulationConfig, window: ScaleUpWindow) -> ModelResult<Self> {
        let coverage =
            CoverageSchedule::from_config("bcc_treatment", &config.treatment, config.scenario, window, config.draw)?;
        Ok(RatchetExposure::new(
            ExposureKind::Treatment,
            coverage,
            RandomnessStream::new("bcc_treatment_exposure", config.seed, config.draw),
        ))
    }

    pub fn kind(&self) -> ExposureKind {
        self.kind
    }

    pub fn record<'a>(&self, s: &'a Simulant) -> &'a ExposureRecord {
        match self.kind {
            ExposureKind::Vaccination { .. } => &s.vaccination,
            ExposureKind::Treatment => &s.treatment,
        }
    }

    fn record_mut<'a>(&self, s: &'a mut Simulant) -> &'a mut ExposureRecord {
        match self.kind {
            ExposureKind::Vaccination { .. } => &mut s.vaccination,
            ExposureKind::Treatment => &mut s.treatment,
        }
    }

    /// Exposure implied by `propensity` at `now`, ignoring the cache.
    pub fn current_exposure(&self, propensity: f64, now: Timestamp) -> ExposureCategory {
        if propensity < self.coverage.at(now) { ExposureCategory::Cat2 } else { ExposureCategory::Cat1 }
    }

    pub fn is_eligible(&self, s: &Simulant) -> bool {
        match self.kind {
            ExposureKind::Vaccination { last_vaccination_age } => s.age < last_vaccination_age,
            ExposureKind::Treatment => matches!(
                s.screening_result,
                ScreeningResult::PositiveBenignCervicalCancer | ScreeningResult::PositiveBenignCervicalCancerWithHpv
            ),
        }
    }

    /// Draw propensities and the initial cache. Vaccination starts from the
    /// computed exposure; treatment always starts unexposed.
    pub fn initialize(&self, population: &mut Population, now: Timestamp) {
        for s in population.simulants_mut() {
            // Keyed to entrance time so the value is stable for the whole run.
            let propensity = self.stream.get_draw(s.id, s.entrance_time, "propensity");
            let cached = match self.kind {
                ExposureKind::Vaccination { .. } => self.current_exposure(propensity, now),
                ExposureKind::Treatment => ExposureCategory::Cat1,
            };
            let date = (cached == ExposureCategory::Cat2).then_some(s.entrance_time);
            *self.record_mut(s) = ExposureRecord { propensity, cached, date };
        }
    }

    /// Latch eligible unexposed simulants whose computed exposure is `cat2`.
    /// Falling coverage never unlatches anyone. Returns the simulants that
    /// became exposed this step.
    pub fn advance(&self, population: &mut Population, now: Timestamp) -> Vec<SimulantId> {
        let mut latched = Vec::new();
        for s in population.living_mut() {
            let eligible = self.is_eligible(s);
            let current = self.current_exposure(self.record(s).propensity, now);
            let record = self.record_mut(s);
            if eligible && current == ExposureCategory::Cat2 && record.cached == ExposureCategory::Cat1 {
                record.cached = ExposureCategory::Cat2;
                record.date.get_or_insert(now);
                latched.push(s.id);
            }
        }
        latched
    }
}
