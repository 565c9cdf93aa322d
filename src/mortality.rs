//! Background and excess mortality, plus the disability accrual the
//! observers read.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::disease::{DiseaseState, rate_to_probability};
use crate::error::{ModelResult, check_probability, check_rate};
use crate::population::{Population, Simulant};
use crate::randomness::{RandomnessStream, choose_index};
use crate::tables::{RateKey, RateTables};
use crate::types::{Alive, DrawIndex, SimulantId, Timestamp, decimal_year};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Cause {
    OtherCauses,
    Disease(DiseaseState),
}

impl Cause {
    /// Causes that can appear in output: other causes and the two invasive
    /// states.
    pub const ALL: [Cause; 3] = [
        Cause::OtherCauses,
        Cause::Disease(DiseaseState::CervicalCancer),
        Cause::Disease(DiseaseState::CervicalCancerWithHpv),
    ];

    pub fn label(self) -> &'static str {
        match self {
            Cause::OtherCauses => "other_causes",
            Cause::Disease(state) => state.name(),
        }
    }
}

impl fmt::Display for Cause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Death {
    pub id: SimulantId,
    pub cause: Cause,
    pub years_of_life_lost: f64,
}

#[derive(Debug, Clone)]
pub struct Mortality {
    tables: RateTables,
    stream: RandomnessStream,
}

impl Mortality {
    pub fn new(tables: &RateTables, seed: u64, draw: DrawIndex) -> ModelResult<Self> {
        for key in [
            RateKey::AllCauseMortality,
            RateKey::CervicalCancerEmr,
            RateKey::LifeExpectancy,
            RateKey::CervicalCancerDisabilityWeight,
        ] {
            tables.get(key)?;
        }
        Ok(Mortality { tables: tables.clone(), stream: RandomnessStream::new("mortality", seed, draw) })
    }

    /// (other-cause rate, excess rate from the current disease state).
    pub fn rates(&self, s: &Simulant, year: f64) -> ModelResult<(f64, f64)> {
        let acmr = self.tables.lookup(RateKey::AllCauseMortality, s.age, s.sex, year)?;
        let emr = if s.disease_state.is_invasive() {
            self.tables.lookup(RateKey::CervicalCancerEmr, s.age, s.sex, year)?
        } else {
            0.0
        };
        Ok((check_rate("all_cause_mortality", acmr)?, check_rate("excess_mortality", emr)?))
    }

    /// Kill simulants for this step. Cause is split proportionally to the
    /// competing rates.
    pub fn on_time_step(&self, population: &mut Population, now: Timestamp, dt_years: f64) -> ModelResult<Vec<Death>> {
        let year = decimal_year(now);
        let mut deaths = Vec::new();
        for s in population.living_mut() {
            let (acmr, emr) = self.rates(s, year)?;
            let total = acmr + emr;
            let p = rate_to_probability(total, dt_years);
            if self.stream.get_draw(s.id, now, "death") >= p {
                continue;
            }
            let cause = if emr > 0.0 {
                let u = self.stream.get_draw(s.id, now, "cause_of_death");
                match choose_index(u, &[acmr / total, emr / total]) {
                    0 => Cause::OtherCauses,
                    _ => Cause::Disease(s.disease_state),
                }
            } else {
                Cause::OtherCauses
            };
            let yll = self.tables.lookup(RateKey::LifeExpectancy, s.age, s.sex, year)?;
            s.alive = Alive::Dead;
            s.exit_time = Some(now);
            s.cause_of_death = Some(cause);
            s.years_of_life_lost = yll;
            deaths.push(Death { id: s.id, cause, years_of_life_lost: yll });
        }
        if !deaths.is_empty() {
            log::debug!("{} deaths at {now}", deaths.len());
        }
        Ok(deaths)
    }

    /// Years lived with disability accrued by `s` over one step.
    pub fn yld(&self, s: &Simulant, year: f64, dt_years: f64) -> ModelResult<f64> {
        if !s.disease_state.is_invasive() {
            return Ok(0.0);
        }
        let weight = self.tables.lookup(RateKey::CervicalCancerDisabilityWeight, s.age, s.sex, year)?;
        Ok(check_probability("disability_weight", weight)? * dt_years)
    }
}
