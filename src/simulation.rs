use std::collections::BTreeMap;

use chrono::Datelike;

use crate::config::{SimulationConfig, midnight};
use crate::disease::DiseaseModel;
use crate::error::ModelResult;
use crate::exposure::RatchetExposure;
use crate::intervention::ScaleUpWindow;
use crate::mortality::Mortality;
use crate::observers::{Observers, StepEvents};
use crate::population::Population;
use crate::screening::ScreeningAlgorithm;
use crate::tables::RateTables;
use crate::types::{DAYS_PER_YEAR, Timestamp, days};

/// One replicate: an owned population plus every component that acts on it,
/// advanced in fixed steps from `start_date` to `end_date`.
pub struct Simulation {
    config: SimulationConfig,
    clock: Timestamp,
    end: Timestamp,
    steps_taken: usize,
    population: Population,
    disease: DiseaseModel,
    screening: ScreeningAlgorithm,
    vaccination: RatchetExposure,
    treatment: RatchetExposure,
    mortality: Mortality,
    observers: Observers,
}

impl Simulation {
    /// Validate, build every component from its slice of the config, and
    /// initialize the entry cohort. Any setup problem is returned here rather
    /// than surfacing on the first step.
    pub fn from_config(config: SimulationConfig, tables: &RateTables) -> ModelResult<Self> {
        config.validate()?;
        let start = config.start_time()?;
        let end = config.end_time()?;

        let disease = DiseaseModel::from_config(&config, tables)?;
        let mut population = Population::initialize(&config.population, start, config.seed, config.draw, &disease)?;

        let window =
            ScaleUpWindow::new(midnight(config.intervention.scale_up_start)?, midnight(config.intervention.scale_up_end)?)?;
        let vaccination = RatchetExposure::vaccination_from_config(&config, window)?;
        let treatment = RatchetExposure::treatment_from_config(&config, window)?;
        vaccination.initialize(&mut population, start);
        treatment.initialize(&mut population, start);

        let screening = ScreeningAlgorithm::from_config(&config)?;
        screening.initialize(&mut population, start);

        let mortality = Mortality::new(tables, config.seed, config.draw)?;
        let years = (start.year()..=end.year()).collect();
        let observers = Observers::new(&config.observers, years, disease.edges());

        log::info!(
            "seed {} draw {} ({:?}): {} simulants, {} .. {}, step {} days",
            config.seed,
            config.draw.0,
            config.scenario,
            population.len(),
            start,
            end,
            config.step_days
        );

        Ok(Simulation {
            config,
            clock: start,
            end,
            steps_taken: 0,
            population,
            disease,
            screening,
            vaccination,
            treatment,
            mortality,
            observers,
        })
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    pub fn clock(&self) -> Timestamp {
        self.clock
    }

    pub fn steps_taken(&self) -> usize {
        self.steps_taken
    }

    pub fn population(&self) -> &Population {
        &self.population
    }

    pub fn observers(&self) -> &Observers {
        &self.observers
    }

    pub fn is_finished(&self) -> bool {
        self.clock >= self.end
    }

    /// Advance one step. Components run in a fixed order against the clock
    /// value at the start of the step; the clock moves last.
    pub fn step(&mut self) -> ModelResult<()> {
        let now = self.clock;
        let dt_days = self.config.step_days;
        let dt_years = dt_days / DAYS_PER_YEAR;

        // Prepare: exposures, accrual from start-of-step state, snapshot.
        let vaccinated = self.vaccination.advance(&mut self.population, now);
        let treated = self.treatment.advance(&mut self.population, now);
        self.observers.on_time_step_prepare(&self.population, &self.mortality, now, dt_years)?;
        self.population.snapshot_disease_state();

        let screening = self.screening.on_time_step(&mut self.population, now);
        let transitioned = self.disease.on_time_step(&mut self.population, now, dt_years)?;
        let deaths = self.mortality.on_time_step(&mut self.population, now, dt_years)?;

        let events = StepEvents {
            screening: Some(&screening),
            vaccinated: &vaccinated,
            treated: &treated,
            deaths: &deaths,
        };
        self.observers.on_collect_metrics(&self.population, &events, now)?;

        let exited = self.population.age_simulants(dt_years, self.config.population.exit_age, now);
        log::debug!(
            "step {} at {now}: {transitioned} transitions, {} deaths, {exited} exits",
            self.steps_taken,
            deaths.len()
        );

        self.clock = now + days(dt_days);
        self.steps_taken += 1;
        if self.clock.year() != now.year() {
            log::info!("year {} complete: {} alive", now.year(), self.population.living().count());
        }
        Ok(())
    }

    /// Step until the clock reaches the end date.
    pub fn run(&mut self) -> ModelResult<()> {
        while !self.is_finished() {
            self.step()?;
        }
        log::info!("run finished after {} steps", self.steps_taken);
        Ok(())
    }

    /// Flat metric map: every stratified counter plus the population totals.
    pub fn metrics(&self) -> BTreeMap<String, f64> {
        self.observers.report(&self.population)
    }
}
