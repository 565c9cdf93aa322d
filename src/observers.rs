//! Stratified accumulators.
//!
//! Metrics are keyed by a typed [`MetricKey`] (measure plus stratum) and only
//! rendered to the flat string grammar at output:
//!
//! `{measure}[_in_{year}][_age_cohort_{lo}_to_{hi}][_among_{sex}]`
//! `[_screening_result_{result}][_vaccination_state_{cat}][_treatment_state_{cat}]`
//!
//! Every key an observer can emit is registered with 0 up front, so empty
//! strata are present in the output rather than missing.

use std::collections::BTreeMap;
use std::fmt;

use chrono::Datelike;

use crate::config::{ObserverConfig, Stratification};
use crate::disease::DiseaseState;
use crate::error::ModelResult;
use crate::exposure::ExposureCategory;
use crate::mortality::{Cause, Death, Mortality};
use crate::population::{Population, Simulant};
use crate::screening::{ScreeningOutcome, ScreeningResult};
use crate::types::{Alive, Sex, SimulantId, Timestamp, decimal_year};

/// Five-year birth cohort `[start, start + 5)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AgeCohort {
    pub start: i32,
}

impl AgeCohort {
    pub const WIDTH: i32 = 5;

    pub fn containing(birth_year: f64) -> AgeCohort {
        let y = birth_year.floor() as i32;
        AgeCohort { start: y - y.rem_euclid(Self::WIDTH) }
    }
}

impl fmt::Display for AgeCohort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_to_{}", self.start, self.start + Self::WIDTH)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Measure {
    StatePersonTime(DiseaseState),
    TransitionCount(DiseaseState, DiseaseState),
    ScreeningScheduled,
    ScreeningAttended,
    HpvVaccinated,
    BccTreated,
    PersonTime,
    Deaths(Cause),
    Ylls(Cause),
    Ylds(Cause),
}

impl fmt::Display for Measure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Measure::StatePersonTime(s) => write!(f, "{s}_person_time"),
            Measure::TransitionCount(from, to) => write!(f, "{from}_to_{to}_event_count"),
            Measure::ScreeningScheduled => f.write_str("screening_scheduled_count"),
            Measure::ScreeningAttended => f.write_str("screening_attended_count"),
            Measure::HpvVaccinated => f.write_str("hpv_vaccinated_count"),
            Measure::BccTreated => f.write_str("bcc_treated_count"),
            Measure::PersonTime => f.write_str("person_time"),
            Measure::Deaths(c) => write!(f, "death_due_to_{c}"),
            Measure::Ylls(c) => write!(f, "ylls_due_to_{c}"),
            Measure::Ylds(c) => write!(f, "ylds_due_to_{c}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Stratum {
    pub year: Option<i32>,
    pub cohort: Option<AgeCohort>,
    pub sex: Option<Sex>,
    pub screening: Option<ScreeningResult>,
    pub vaccination: Option<ExposureCategory>,
    pub treatment: Option<ExposureCategory>,
}

impl fmt::Display for Stratum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(y) = self.year {
            write!(f, "_in_{y}")?;
        }
        if let Some(c) = self.cohort {
            write!(f, "_age_cohort_{c}")?;
        }
        if let Some(s) = self.sex {
            write!(f, "_among_{}", s.label())?;
        }
        if let Some(r) = self.screening {
            write!(f, "_screening_result_{r}")?;
        }
        if let Some(v) = self.vaccination {
            write!(f, "_vaccination_state_{v}")?;
        }
        if let Some(t) = self.treatment {
            write!(f, "_treatment_state_{t}")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MetricKey {
    pub measure: Measure,
    pub stratum: Stratum,
}

impl fmt::Display for MetricKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.measure, self.stratum)
    }
}

/// Maps simulants to strata for one observer.
#[derive(Debug, Clone)]
pub struct Stratifier {
    toggles: Stratification,
    by_screening: bool,
    by_vaccination: bool,
    by_treatment: bool,
    years: Vec<i32>,
    cohorts: Vec<AgeCohort>,
}

impl Stratifier {
    pub fn new(toggles: Stratification, years: Vec<i32>, cohorts: Vec<AgeCohort>) -> Self {
        Stratifier { toggles, by_screening: false, by_vaccination: false, by_treatment: false, years, cohorts }
    }

    pub fn with_intervention_states(mut self, screening: bool, vaccination: bool, treatment: bool) -> Self {
        self.by_screening = screening;
        self.by_vaccination = vaccination;
        self.by_treatment = treatment;
        self
    }

    /// Stratum for `s` in calendar `year`, or `None` when age stratification
    /// is on and the simulant's birth cohort is outside the tracked range.
    pub fn stratum(&self, s: &Simulant, year: i32) -> Option<Stratum> {
        let cohort = if self.toggles.by_age {
            let c = AgeCohort::containing(s.birth_year());
            if self.cohorts.binary_search(&c).is_err() {
                return None;
            }
            Some(c)
        } else {
            None
        };
        Some(Stratum {
            year: self.toggles.by_year.then_some(year),
            cohort,
            sex: self.toggles.by_sex.then_some(s.sex),
            screening: self.by_screening.then_some(s.screening_result),
            vaccination: self.by_vaccination.then_some(s.vaccination.cached),
            treatment: self.by_treatment.then_some(s.treatment.cached),
        })
    }

    /// Cross product of every axis that is switched on.
    pub fn all_strata(&self) -> Vec<Stratum> {
        fn axis<T: Copy>(on: bool, values: &[T]) -> Vec<Option<T>> {
            if on { values.iter().copied().map(Some).collect() } else { vec![None] }
        }
        let years = axis(self.toggles.by_year, &self.years);
        let cohorts = axis(self.toggles.by_age, &self.cohorts);
        let sexes = axis(self.toggles.by_sex, &[Sex::Female, Sex::Male]);
        let screening = axis(self.by_screening, &ScreeningResult::ALL);
        let vaccination = axis(self.by_vaccination, &ExposureCategory::ALL);
        let treatment = axis(self.by_treatment, &ExposureCategory::ALL);

        let mut out = Vec::new();
        for &year in &years {
            for &cohort in &cohorts {
                for &sex in &sexes {
                    for &scr in &screening {
                        for &vac in &vaccination {
                            for &trt in &treatment {
                                out.push(Stratum { year, cohort, sex, screening: scr, vaccination: vac, treatment: trt });
                            }
                        }
                    }
                }
            }
        }
        out
    }
}

/// Accumulated metric values.
#[derive(Debug, Clone, Default)]
pub struct Metrics {
    values: BTreeMap<MetricKey, f64>,
}

impl Metrics {
    pub fn register(&mut self, measure: Measure, strata: &[Stratum]) {
        for &stratum in strata {
            self.values.entry(MetricKey { measure, stratum }).or_insert(0.0);
        }
    }

    pub fn add(&mut self, measure: Measure, stratum: Stratum, value: f64) {
        debug_assert!(
            self.values.contains_key(&MetricKey { measure, stratum }),
            "metric {measure}{stratum} was never registered"
        );
        *self.values.entry(MetricKey { measure, stratum }).or_insert(0.0) += value;
    }

    /// Sum over every stratum of `measure`.
    pub fn total(&self, measure: Measure) -> f64 {
        self.values.iter().filter(|(k, _)| k.measure == measure).map(|(_, v)| v).sum()
    }

    pub fn named(&self) -> BTreeMap<String, f64> {
        self.values.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }
}

/// Per-step events handed to the collect phase.
#[derive(Debug, Default)]
pub struct StepEvents<'a> {
    pub screening: Option<&'a ScreeningOutcome>,
    pub vaccinated: &'a [SimulantId],
    pub treated: &'a [SimulantId],
    pub deaths: &'a [Death],
}

/// Every observer, sharing one metric store.
#[derive(Debug, Clone)]
pub struct Observers {
    disease: Stratifier,
    screening: Stratifier,
    vaccination: Stratifier,
    treatment: Stratifier,
    mortality: Stratifier,
    disability: Stratifier,
    transitions: Vec<(DiseaseState, DiseaseState)>,
    metrics: Metrics,
    years_of_life_lost: f64,
    years_lived_with_disability: f64,
}

impl Observers {
    pub fn new(
        config: &ObserverConfig,
        years: Vec<i32>,
        transitions: Vec<(DiseaseState, DiseaseState)>,
    ) -> Self {
        let cohorts: Vec<AgeCohort> = (config.cohort_start_year..config.cohort_end_year)
            .step_by(AgeCohort::WIDTH as usize)
            .map(|start| AgeCohort::containing(start as f64))
            .collect::<std::collections::BTreeSet<_>>()
            .into_iter()
            .collect();
        let make = |t: Stratification| Stratifier::new(t, years.clone(), cohorts.clone());

        let mut observers = Observers {
            disease: make(config.disease).with_intervention_states(true, true, true),
            screening: make(config.screening),
            vaccination: make(config.vaccination),
            treatment: make(config.treatment),
            mortality: make(config.mortality),
            disability: make(config.disability),
            transitions,
            metrics: Metrics::default(),
            years_of_life_lost: 0.0,
            years_lived_with_disability: 0.0,
        };
        observers.register_all();
        observers
    }

    fn register_all(&mut self) {
        let strata = self.disease.all_strata();
        for state in DiseaseState::ALL {
            self.metrics.register(Measure::StatePersonTime(state), &strata);
        }
        for &(from, to) in &self.transitions {
            self.metrics.register(Measure::TransitionCount(from, to), &strata);
        }

        let strata = self.screening.all_strata();
        self.metrics.register(Measure::ScreeningScheduled, &strata);
        self.metrics.register(Measure::ScreeningAttended, &strata);
        self.metrics.register(Measure::HpvVaccinated, &self.vaccination.all_strata());
        self.metrics.register(Measure::BccTreated, &self.treatment.all_strata());

        let strata = self.mortality.all_strata();
        self.metrics.register(Measure::PersonTime, &strata);
        for cause in Cause::ALL {
            self.metrics.register(Measure::Deaths(cause), &strata);
            self.metrics.register(Measure::Ylls(cause), &strata);
        }
        let strata = self.disability.all_strata();
        for cause in Cause::ALL.into_iter().filter(|c| *c != Cause::OtherCauses) {
            self.metrics.register(Measure::Ylds(cause), &strata);
        }
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Person-time and disability accrual for the step about to run, from the
    /// state each living simulant holds at its start.
    pub fn on_time_step_prepare(
        &mut self,
        population: &Population,
        mortality: &Mortality,
        now: Timestamp,
        dt_years: f64,
    ) -> ModelResult<()> {
        let year = now.year();
        let fractional_year = decimal_year(now);
        for s in population.living() {
            if let Some(stratum) = self.disease.stratum(s, year) {
                self.metrics.add(Measure::StatePersonTime(s.disease_state), stratum, dt_years);
            }
            if let Some(stratum) = self.mortality.stratum(s, year) {
                self.metrics.add(Measure::PersonTime, stratum, dt_years);
            }
            let yld = mortality.yld(s, fractional_year, dt_years)?;
            if yld > 0.0 {
                self.years_lived_with_disability += yld;
                if let Some(stratum) = self.disability.stratum(s, year) {
                    self.metrics.add(Measure::Ylds(Cause::Disease(s.disease_state)), stratum, yld);
                }
            }
        }
        Ok(())
    }

    /// Count this step's events against the post-step population.
    pub fn on_collect_metrics(&mut self, population: &Population, events: &StepEvents<'_>, now: Timestamp) -> ModelResult<()> {
        let year = now.year();

        for s in population.simulants() {
            let moved = s.previous_disease_state != s.disease_state;
            let active = s.is_alive() || s.exit_time == Some(now);
            if moved
                && active
                && let Some(stratum) = self.disease.stratum(s, year)
            {
                self.metrics.add(Measure::TransitionCount(s.previous_disease_state, s.disease_state), stratum, 1.0);
            }
        }

        if let Some(outcome) = events.screening {
            for id in &outcome.scheduled {
                let s = population.get(*id)?;
                if let Some(stratum) = self.screening.stratum(s, year) {
                    self.metrics.add(Measure::ScreeningScheduled, stratum, 1.0);
                }
            }
            for id in &outcome.attended {
                let s = population.get(*id)?;
                if let Some(stratum) = self.screening.stratum(s, year) {
                    self.metrics.add(Measure::ScreeningAttended, stratum, 1.0);
                }
            }
        }
        for id in events.vaccinated {
            if let Some(stratum) = self.vaccination.stratum(population.get(*id)?, year) {
                self.metrics.add(Measure::HpvVaccinated, stratum, 1.0);
            }
        }
        for id in events.treated {
            if let Some(stratum) = self.treatment.stratum(population.get(*id)?, year) {
                self.metrics.add(Measure::BccTreated, stratum, 1.0);
            }
        }
        for death in events.deaths {
            self.years_of_life_lost += death.years_of_life_lost;
            if let Some(stratum) = self.mortality.stratum(population.get(death.id)?, year) {
                self.metrics.add(Measure::Deaths(death.cause), stratum, 1.0);
                self.metrics.add(Measure::Ylls(death.cause), stratum, death.years_of_life_lost);
            }
        }
        Ok(())
    }

    /// Flat output: every stratified metric plus the run totals.
    pub fn report(&self, population: &Population) -> BTreeMap<String, f64> {
        let mut out = self.metrics.named();
        out.insert("total_population_living".to_string(), population.count(Alive::Alive) as f64);
        out.insert("total_population_dead".to_string(), population.count(Alive::Dead) as f64);
        out.insert("total_population_untracked".to_string(), population.count(Alive::Untracked) as f64);
        out.insert("total_population".to_string(), population.len() as f64);
        out.insert("years_of_life_lost".to_string(), self.years_of_life_lost);
        out.insert("years_lived_with_disability".to_string(), self.years_lived_with_disability);
        out
    }
}
