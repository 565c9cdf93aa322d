//! Population table: one row per simulant, created once at cohort entry and
//! never physically removed. Dead and untracked rows stay in place and are
//! filtered on `alive`.

use crate::config::PopulationConfig;
use crate::disease::{DiseaseModel, DiseaseState};
use crate::error::{ModelError, ModelResult};
use crate::exposure::ExposureRecord;
use crate::mortality::Cause;
use crate::randomness::RandomnessStream;
use crate::screening::ScreeningResult;
use crate::types::{Alive, DrawIndex, Sex, SimulantId, Timestamp, decimal_year};

#[derive(Debug, Clone, PartialEq)]
pub struct Simulant {
    pub id: SimulantId,
    pub age: f64,
    pub entry_age: f64,
    pub sex: Sex,
    pub alive: Alive,
    pub entrance_time: Timestamp,
    pub exit_time: Option<Timestamp>,
    pub cause_of_death: Option<Cause>,
    pub years_of_life_lost: f64,

    pub disease_state: DiseaseState,
    /// State at the start of the current step; diffed against
    /// `disease_state` to detect transitions.
    pub previous_disease_state: DiseaseState,

    pub screening_result: ScreeningResult,
    pub attended_last_screening: bool,
    pub previous_screening_date: Option<Timestamp>,
    pub next_screening_date: Option<Timestamp>,

    pub vaccination: ExposureRecord,
    pub treatment: ExposureRecord,
}

impl Simulant {
    pub fn new(id: SimulantId, age: f64, sex: Sex, entrance_time: Timestamp, state: DiseaseState) -> Self {
        Simulant {
            id,
            age,
            entry_age: age,
            sex,
            alive: Alive::Alive,
            entrance_time,
            exit_time: None,
            cause_of_death: None,
            years_of_life_lost: 0.0,
            disease_state: state,
            previous_disease_state: state,
            screening_result: ScreeningResult::Negative,
            attended_last_screening: false,
            previous_screening_date: None,
            next_screening_date: None,
            vaccination: ExposureRecord::default(),
            treatment: ExposureRecord::default(),
        }
    }

    pub fn is_alive(&self) -> bool {
        self.alive == Alive::Alive
    }

    /// Calendar year of birth, fractional.
    pub fn birth_year(&self) -> f64 {
        decimal_year(self.entrance_time) - self.entry_age
    }
}

#[derive(Debug, Clone, Default)]
pub struct Population {
    simulants: Vec<Simulant>,
}

impl Population {
    pub fn from_simulants(simulants: Vec<Simulant>) -> Self {
        debug_assert!(
            simulants.iter().enumerate().all(|(i, s)| s.id.0 == i as u64),
            "simulant ids must match their row index"
        );
        Population { simulants }
    }

    /// Build the entry cohort: ages uniform on the configured range, initial
    /// disease state drawn from prevalence.
    pub fn initialize(
        config: &PopulationConfig,
        start: Timestamp,
        seed: u64,
        draw: DrawIndex,
        disease: &DiseaseModel,
    ) -> ModelResult<Population> {
        let stream = RandomnessStream::new("population", seed, draw);
        let ids: Vec<SimulantId> = (0..config.size as u64).map(SimulantId).collect();
        let age_draws = stream.get_draws(&ids, start, "age");
        let state_draws = stream.get_draws(&ids, start, "initial_disease_state");
        let year = decimal_year(start);

        let mut simulants = Vec::with_capacity(ids.len());
        for ((id, u_age), u_state) in ids.into_iter().zip(age_draws).zip(state_draws) {
            let age = config.age_start + u_age * (config.age_end - config.age_start);
            let weights = disease.initial_state_weights(age, Sex::Female, year)?;
            let idx = crate::randomness::choose_index(u_state, &weights);
            let state = DiseaseState::ALL[idx];
            simulants.push(Simulant::new(id, age, Sex::Female, start, state));
        }
        log::info!("initialized {} simulants aged {}-{}", simulants.len(), config.age_start, config.age_end);
        Ok(Population { simulants })
    }

    pub fn len(&self) -> usize {
        self.simulants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.simulants.is_empty()
    }

    pub fn simulants(&self) -> &[Simulant] {
        &self.simulants
    }

    pub fn simulants_mut(&mut self) -> &mut [Simulant] {
        &mut self.simulants
    }

    pub fn get(&self, id: SimulantId) -> ModelResult<&Simulant> {
        self.simulants
            .get(id.0 as usize)
            .ok_or_else(|| ModelError::config(format!("no simulant with id {}", id.0)))
    }

    pub fn living(&self) -> impl Iterator<Item = &Simulant> {
        self.simulants.iter().filter(|s| s.is_alive())
    }

    pub fn living_mut(&mut self) -> impl Iterator<Item = &mut Simulant> {
        self.simulants.iter_mut().filter(|s| s.is_alive())
    }

    pub fn count(&self, alive: Alive) -> usize {
        self.simulants.iter().filter(|s| s.alive == alive).count()
    }

    /// Snapshot each living simulant's state before this step's transitions.
    pub fn snapshot_disease_state(&mut self) {
        for s in self.living_mut() {
            s.previous_disease_state = s.disease_state;
        }
    }

    /// Age the living by one step. Anyone reaching `exit_age` leaves as
    /// untracked at `now`.
    pub fn age_simulants(&mut self, step_years: f64, exit_age: Option<f64>, now: Timestamp) -> usize {
        let mut exited = 0;
        for s in self.living_mut() {
            s.age += step_years;
            if let Some(exit) = exit_age
                && s.age >= exit
            {
                s.alive = Alive::Untracked;
                s.exit_time = Some(now);
                exited += 1;
            }
        }
        exited
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SimulationConfig;
    use crate::tables::RateTables;
    use crate::types::date;

    fn t0() -> Timestamp {
        date(2020, 1, 1).unwrap()
    }

    fn model() -> DiseaseModel {
        let config = SimulationConfig::canonical();
        DiseaseModel::from_config(&config, &RateTables::synthetic()).unwrap()
    }

    #[test]
    fn ages_fall_in_configured_range() {
        let config = PopulationConfig { size: 500, age_start: 21.0, age_end: 40.0, exit_age: None };
        let pop = Population::initialize(&config, t0(), 1, DrawIndex(0), &model()).unwrap();
        assert_eq!(pop.len(), 500);
        for s in pop.simulants() {
            assert!((21.0..=40.0).contains(&s.age), "age {} out of range", s.age);
            assert_eq!(s.sex, Sex::Female);
            assert_eq!(s.previous_disease_state, s.disease_state);
        }
    }

    #[test]
    fn initialization_is_reproducible() {
        let config = PopulationConfig { size: 200, age_start: 15.0, age_end: 80.0, exit_age: None };
        let a = Population::initialize(&config, t0(), 9, DrawIndex(2), &model()).unwrap();
        let b = Population::initialize(&config, t0(), 9, DrawIndex(2), &model()).unwrap();
        assert_eq!(a.simulants(), b.simulants());
    }

    #[test]
    fn prevalent_states_appear_in_large_cohort() {
        let config = PopulationConfig { size: 20_000, age_start: 20.0, age_end: 60.0, exit_age: None };
        let pop = Population::initialize(&config, t0(), 3, DrawIndex(0), &model()).unwrap();
        let hpv = pop.simulants().iter().filter(|s| s.disease_state == DiseaseState::HighRiskHpv).count();
        let frac = hpv as f64 / pop.len() as f64;
        assert!(frac > 0.05 && frac < 0.2, "hrHPV prevalence {frac:.3} implausible");
        assert!(pop.simulants().iter().all(|s| s.disease_state != DiseaseState::Recovered));
    }

    #[test]
    fn aging_moves_simulants_past_exit_to_untracked() {
        let now = t0();
        let mut pop = Population::from_simulants(vec![
            Simulant::new(SimulantId(0), 79.5, Sex::Female, now, DiseaseState::Susceptible),
            Simulant::new(SimulantId(1), 50.0, Sex::Female, now, DiseaseState::Susceptible),
        ]);
        let exited = pop.age_simulants(1.0, Some(80.0), now);
        assert_eq!(exited, 1);
        assert_eq!(pop.simulants()[0].alive, Alive::Untracked);
        assert_eq!(pop.simulants()[0].exit_time, Some(now));
        assert_eq!(pop.simulants()[1].age, 51.0);
        assert_eq!(pop.count(Alive::Alive), 1);
    }

    #[test]
    fn dead_simulants_do_not_age() {
        let mut s = Simulant::new(SimulantId(0), 40.0, Sex::Female, t0(), DiseaseState::Susceptible);
        s.alive = Alive::Dead;
        let mut pop = Population::from_simulants(vec![s]);
        pop.age_simulants(1.0, None, t0());
        assert_eq!(pop.simulants()[0].age, 40.0);
    }

    #[test]
    fn birth_year_uses_entry_age() {
        let s = Simulant::new(SimulantId(0), 30.0, Sex::Female, t0(), DiseaseState::Susceptible);
        assert!((s.birth_year() - 1990.0).abs() < 1e-9);
    }
}
