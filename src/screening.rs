//! Screening attendance, diagnostic testing and renewal scheduling.
//!
//! Every living simulant carries a `next_screening_date`. When it falls due
//! and the simulant is inside the screening age window (or presents with
//! symptoms) the visit is *scheduled*; attendance is then a Bernoulli draw
//! against the attendance pipeline. Attendees are tested against their true
//! disease state. Every scheduled simulant, attending or not, has the next
//! visit drawn from the interval distribution that matches the resulting
//! screening result and age.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::config::{ScreeningConfig, SimulationConfig};
use crate::disease::DiseaseState;
use crate::distributions::TruncnormDist;
use crate::error::{ModelResult, check_probability};
use crate::intervention::{AttendanceIntervention, ConditionalAttendance, conditional_attendance};
use crate::population::{Population, Simulant};
use crate::randomness::RandomnessStream;
use crate::types::{DrawIndex, SimulantId, Timestamp, days, to_days, years};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub enum ScreeningResult {
    #[default]
    Negative,
    PositiveHighRiskHpv,
    PositiveBenignCervicalCancer,
    PositiveBenignCervicalCancerWithHpv,
    PositiveInvasiveCervicalCancer,
    PositiveInvasiveCervicalCancerWithHpv,
}

/// Cancer-stage axis of a screening result, independent of HPV.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CancerCategory {
    Negative,
    Benign,
    Invasive,
}

impl ScreeningResult {
    pub const ALL: [ScreeningResult; 6] = [
        ScreeningResult::Negative,
        ScreeningResult::PositiveHighRiskHpv,
        ScreeningResult::PositiveBenignCervicalCancer,
        ScreeningResult::PositiveBenignCervicalCancerWithHpv,
        ScreeningResult::PositiveInvasiveCervicalCancer,
        ScreeningResult::PositiveInvasiveCervicalCancerWithHpv,
    ];

    pub fn name(self) -> &'static str {
        match self {
            ScreeningResult::Negative => "negative",
            ScreeningResult::PositiveHighRiskHpv => "positive_high_risk_hpv",
            ScreeningResult::PositiveBenignCervicalCancer => "positive_benign_cervical_cancer",
            ScreeningResult::PositiveBenignCervicalCancerWithHpv => "positive_benign_cervical_cancer_with_hpv",
            ScreeningResult::PositiveInvasiveCervicalCancer => "positive_invasive_cervical_cancer",
            ScreeningResult::PositiveInvasiveCervicalCancerWithHpv => {
                "positive_invasive_cervical_cancer_with_hpv"
            }
        }
    }

    /// The single result for an (HPV bit, cancer category) pair.
    pub fn combine(hpv_positive: bool, category: CancerCategory) -> ScreeningResult {
        match (hpv_positive, category) {
            (false, CancerCategory::Negative) => ScreeningResult::Negative,
            (true, CancerCategory::Negative) => ScreeningResult::PositiveHighRiskHpv,
            (false, CancerCategory::Benign) => ScreeningResult::PositiveBenignCervicalCancer,
            (true, CancerCategory::Benign) => ScreeningResult::PositiveBenignCervicalCancerWithHpv,
            (false, CancerCategory::Invasive) => ScreeningResult::PositiveInvasiveCervicalCancer,
            (true, CancerCategory::Invasive) => ScreeningResult::PositiveInvasiveCervicalCancerWithHpv,
        }
    }

    pub fn hpv_positive(self) -> bool {
        matches!(
            self,
            ScreeningResult::PositiveHighRiskHpv
                | ScreeningResult::PositiveBenignCervicalCancerWithHpv
                | ScreeningResult::PositiveInvasiveCervicalCancerWithHpv
        )
    }

    pub fn cancer_category(self) -> CancerCategory {
        match self {
            ScreeningResult::Negative | ScreeningResult::PositiveHighRiskHpv => CancerCategory::Negative,
            ScreeningResult::PositiveBenignCervicalCancer | ScreeningResult::PositiveBenignCervicalCancerWithHpv => {
                CancerCategory::Benign
            }
            ScreeningResult::PositiveInvasiveCervicalCancer
            | ScreeningResult::PositiveInvasiveCervicalCancerWithHpv => CancerCategory::Invasive,
        }
    }
}

impl fmt::Display for ScreeningResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// What a perfect test would report for `state`. Remission reads as
/// negative on both axes.
pub fn true_result(state: DiseaseState) -> (bool, CancerCategory) {
    let category = match state {
        DiseaseState::Susceptible | DiseaseState::HighRiskHpv | DiseaseState::Recovered => CancerCategory::Negative,
        DiseaseState::BenignCervicalCancer | DiseaseState::BenignCervicalCancerWithHpv => CancerCategory::Benign,
        DiseaseState::CervicalCancer | DiseaseState::CervicalCancerWithHpv => CancerCategory::Invasive,
    };
    (state.has_hpv(), category)
}

/// Test accuracy parameters realised for one draw.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ScreeningParameters {
    pub base_attendance: f64,
    pub attended_previous_multiplier: f64,
    pub hpv_sensitivity: f64,
    pub hpv_specificity: f64,
    pub cytology_sensitivity: f64,
    pub cotest_cancer_sensitivity: f64,
    pub remission_sensitivity: f64,
}

impl ScreeningParameters {
    pub fn from_config(config: &ScreeningConfig, draw: DrawIndex) -> ModelResult<Self> {
        let prob = |name: &str, dist: &TruncnormDist| check_probability(name, dist.get_random_variable(name, draw));
        let multiplier = config.attended_previous_multiplier.get_random_variable("attended_previous_multiplier", draw);
        Ok(ScreeningParameters {
            base_attendance: prob("base_attendance", &config.base_attendance)?,
            attended_previous_multiplier: multiplier,
            hpv_sensitivity: prob("hpv_sensitivity", &config.hpv_sensitivity)?,
            hpv_specificity: prob("hpv_specificity", &config.hpv_specificity)?,
            cytology_sensitivity: prob("cytology_sensitivity", &config.cytology_sensitivity)?,
            cotest_cancer_sensitivity: prob("cotest_cancer_sensitivity", &config.cotest_cancer_sensitivity)?,
            remission_sensitivity: prob("remission_sensitivity", &config.remission_sensitivity)?,
        })
    }
}

/// Mutually exclusive diagnostic regimes for an attendee.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TestRegime {
    Symptomatic,
    Remission { cotest_eligible: bool },
    Cytology,
    Cotest,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntervalKind {
    Annual,
    Triennial,
    Quinquennial,
}

/// Who was scheduled and who attended during one step.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScreeningOutcome {
    pub scheduled: Vec<SimulantId>,
    pub attended: Vec<SimulantId>,
    pub symptomatic: usize,
}

#[derive(Debug, Clone)]
pub struct ScreeningAlgorithm {
    first_age: f64,
    mid_age: f64,
    last_age: f64,
    params: ScreeningParameters,
    attendance: ConditionalAttendance,
    intervention: AttendanceIntervention,
    annual: TruncnormDist,
    triennial: TruncnormDist,
    quinquennial: TruncnormDist,
    symptom_probability: f64,
    stream: RandomnessStream,
}

impl ScreeningAlgorithm {
    pub fn new(
        config: &ScreeningConfig,
        params: ScreeningParameters,
        intervention: AttendanceIntervention,
        step_days: f64,
        stream: RandomnessStream,
    ) -> ModelResult<Self> {
        let attendance = conditional_attendance(params.base_attendance, params.attended_previous_multiplier)?;
        let symptom_probability = (step_days / config.mean_time_to_symptoms_days).min(1.0);
        Ok(ScreeningAlgorithm {
            first_age: config.first_screening_age,
            mid_age: config.mid_screening_age,
            last_age: config.last_screening_age,
            params,
            attendance,
            intervention,
            annual: config.annual_interval.clone(),
            triennial: config.triennial_interval.clone(),
            quinquennial: config.quinquennial_interval.clone(),
            symptom_probability,
            stream,
        })
    }

    pub fn from_config(config: &SimulationConfig) -> ModelResult<Self> {
        let params = ScreeningParameters::from_config(&config.screening, config.draw)?;
        let start = conditional_attendance(params.base_attendance, params.attended_previous_multiplier)?;
        let intervention = AttendanceIntervention::from_config(config, start, params.attended_previous_multiplier)?;
        ScreeningAlgorithm::new(
            &config.screening,
            params,
            intervention,
            config.step_days,
            RandomnessStream::new("screening_algorithm", config.seed, config.draw),
        )
    }

    pub fn params(&self) -> &ScreeningParameters {
        &self.params
    }

    pub fn stream(&self) -> &RandomnessStream {
        &self.stream
    }

    pub fn in_window(&self, age: f64) -> bool {
        self.first_age <= age && age <= self.last_age
    }

    pub fn interval_kind(&self, result: ScreeningResult, age: f64) -> IntervalKind {
        if result != ScreeningResult::Negative && self.in_window(age) {
            IntervalKind::Annual
        } else if age < self.mid_age {
            IntervalKind::Triennial
        } else {
            IntervalKind::Quinquennial
        }
    }

    pub fn interval_distribution(&self, kind: IntervalKind) -> &TruncnormDist {
        match kind {
            IntervalKind::Annual => &self.annual,
            IntervalKind::Triennial => &self.triennial,
            IntervalKind::Quinquennial => &self.quinquennial,
        }
    }

    /// Draw the next visit after `anchor`. The uniform comes from the
    /// `schedule_next` channel at `clock`, so it is reproducible per step.
    pub fn schedule_next(
        &self,
        id: SimulantId,
        anchor: Timestamp,
        result: ScreeningResult,
        age: f64,
        clock: Timestamp,
    ) -> Timestamp {
        let u = self.stream.get_draw(id, clock, "schedule_next");
        let interval = self.interval_distribution(self.interval_kind(result, age)).ppf(u);
        anchor + days(interval)
    }

    /// Attendance probability for a non-symptomatic scheduled visit.
    pub fn attendance_probability(&self, attended_previous: bool, now: Timestamp) -> f64 {
        self.intervention.adjust(now, attended_previous, self.attendance.get(attended_previous))
    }

    /// Back-compute a desynchronised schedule for the entry cohort.
    pub fn initialize(&self, population: &mut Population, now: Timestamp) {
        for s in population.simulants_mut() {
            s.screening_result = ScreeningResult::Negative;
            s.attended_last_screening =
                self.stream.filter_for_probability(s.id, now, "attended_previous", self.params.base_attendance);

            let start = if s.age > self.last_age {
                None
            } else if s.age >= self.first_age {
                Some(now)
            } else {
                Some(now + years(self.first_age - s.age))
            };
            let Some(start) = start else {
                s.previous_screening_date = None;
                s.next_screening_date = None;
                continue;
            };

            let age_at_start = s.age.max(self.first_age);
            let first_visit = self.schedule_next(s.id, start, ScreeningResult::Negative, age_at_start, now);
            let interval = first_visit - start;
            let progress = self.stream.get_draw(s.id, now, "progress_to_next_screening");
            let previous = start - days(progress * to_days(interval));
            s.next_screening_date = Some(previous + interval);
            // Under-21s have no real previous visit; it only anchors the first.
            s.previous_screening_date = (s.age >= self.first_age).then_some(previous);
        }
    }

    fn is_symptomatic(&self, s: &Simulant, now: Timestamp) -> bool {
        s.disease_state.is_invasive()
            && s.screening_result.cancer_category() != CancerCategory::Invasive
            && self.stream.filter_for_probability(s.id, now, "symptoms", self.symptom_probability)
    }

    pub fn regime(&self, s: &Simulant, symptomatic: bool) -> TestRegime {
        let cotest_eligible = self.mid_age <= s.age && s.age < self.last_age;
        if symptomatic {
            TestRegime::Symptomatic
        } else if s.disease_state == DiseaseState::Recovered {
            TestRegime::Remission { cotest_eligible }
        } else if s.age < self.mid_age {
            TestRegime::Cytology
        } else {
            TestRegime::Cotest
        }
    }

    /// (cancer-channel sensitivity, HPV channel (sensitivity, specificity)).
    fn accuracy(&self, regime: TestRegime) -> (f64, Option<(f64, f64)>) {
        let p = &self.params;
        let cotest_hpv = Some((p.hpv_sensitivity, p.hpv_specificity));
        match regime {
            TestRegime::Symptomatic => (1.0, Some((1.0, 1.0))),
            TestRegime::Remission { cotest_eligible } => {
                (p.remission_sensitivity, if cotest_eligible { cotest_hpv } else { None })
            }
            TestRegime::Cytology => (p.cytology_sensitivity, None),
            TestRegime::Cotest => (p.cotest_cancer_sensitivity, cotest_hpv),
        }
    }

    /// Run the regime's tests against the true state. A failed cancer test
    /// keeps the previous category; a failed HPV test reports the opposite of
    /// the truth.
    pub fn screen(&self, s: &Simulant, symptomatic: bool, now: Timestamp) -> ScreeningResult {
        let (true_hpv, true_category) = true_result(s.disease_state);
        let (cancer_sensitivity, hpv_channel) = self.accuracy(self.regime(s, symptomatic));

        let category = if self.stream.filter_for_probability(s.id, now, "cancer_test", cancer_sensitivity) {
            true_category
        } else {
            s.screening_result.cancer_category()
        };
        let hpv = match hpv_channel {
            None => false,
            Some((sensitivity, specificity)) => {
                let p = if true_hpv { sensitivity } else { specificity };
                if self.stream.filter_for_probability(s.id, now, "hpv_test", p) { true_hpv } else { !true_hpv }
            }
        };
        ScreeningResult::combine(hpv, category)
    }

    pub fn on_time_step(&self, population: &mut Population, now: Timestamp) -> ScreeningOutcome {
        let mut outcome = ScreeningOutcome::default();
        for s in population.living_mut() {
            let symptomatic = self.is_symptomatic(s, now);
            if symptomatic {
                s.next_screening_date = Some(now);
                outcome.symptomatic += 1;
            }
            let Some(due) = s.next_screening_date else { continue };
            if due > now || !(self.in_window(s.age) || symptomatic) {
                continue;
            }
            outcome.scheduled.push(s.id);

            let p = if symptomatic { 1.0 } else { self.attendance_probability(s.attended_last_screening, now) };
            let attends = self.stream.filter_for_probability(s.id, now, "attendance", p);
            s.attended_last_screening = attends;
            if attends {
                s.screening_result = self.screen(s, symptomatic, now);
                outcome.attended.push(s.id);
            }

            s.previous_screening_date = Some(due);
            s.next_screening_date = Some(self.schedule_next(s.id, due, s.screening_result, s.age, now));
        }
        log::debug!(
            "{} screenings scheduled, {} attended ({} symptomatic) at {now}",
            outcome.scheduled.len(),
            outcome.attended.len(),
            outcome.symptomatic
        );
        outcome
    }
}
