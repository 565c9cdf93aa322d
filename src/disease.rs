//! Cervical cancer natural history as a competing-risks state machine.
//!
//! Each state owns a fixed list of outgoing edges. An edge's annual rate
//! comes from a [`RateSource`]: a constant, a table lookup, or a lookup run
//! through multiplicative modifiers (PAF complement, vaccination,
//! treatment). Once per step every living simulant draws one categorical
//! outcome over "stay" plus the edge probabilities.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::config::SimulationConfig;
use crate::error::{ModelError, ModelResult, check_probability, check_rate};
use crate::exposure::ExposureCategory;
use crate::population::{Population, Simulant};
use crate::randomness::RandomnessStream;
use crate::tables::{RateKey, RateTables};
use crate::types::{Sex, Timestamp, decimal_year};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum DiseaseState {
    Susceptible,
    HighRiskHpv,
    BenignCervicalCancer,
    BenignCervicalCancerWithHpv,
    CervicalCancer,
    CervicalCancerWithHpv,
    Recovered,
}

impl DiseaseState {
    pub const ALL: [DiseaseState; 7] = [
        DiseaseState::Susceptible,
        DiseaseState::HighRiskHpv,
        DiseaseState::BenignCervicalCancer,
        DiseaseState::BenignCervicalCancerWithHpv,
        DiseaseState::CervicalCancer,
        DiseaseState::CervicalCancerWithHpv,
        DiseaseState::Recovered,
    ];

    pub fn name(self) -> &'static str {
        match self {
            DiseaseState::Susceptible => "susceptible_to_cervical_cancer",
            DiseaseState::HighRiskHpv => "high_risk_hpv",
            DiseaseState::BenignCervicalCancer => "benign_cervical_cancer",
            DiseaseState::BenignCervicalCancerWithHpv => "benign_cervical_cancer_with_hpv",
            DiseaseState::CervicalCancer => "cervical_cancer",
            DiseaseState::CervicalCancerWithHpv => "cervical_cancer_with_hpv",
            DiseaseState::Recovered => "recovered_from_cervical_cancer",
        }
    }

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn is_invasive(self) -> bool {
        matches!(self, DiseaseState::CervicalCancer | DiseaseState::CervicalCancerWithHpv)
    }

    pub fn has_hpv(self) -> bool {
        matches!(
            self,
            DiseaseState::HighRiskHpv
                | DiseaseState::BenignCervicalCancerWithHpv
                | DiseaseState::CervicalCancerWithHpv
        )
    }
}

impl fmt::Display for DiseaseState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Multiplicative adjustment applied on top of a base rate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RateModifier {
    /// `× (1 − PAF)`: the share of incidence not attributable to hrHPV.
    PafComplement,
    /// `× (1 − vaccine efficacy)` for vaccinated simulants.
    Vaccination,
    /// `× (1 − treatment efficacy)` for treated simulants.
    Treatment,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RateSource {
    Constant(f64),
    Lookup(RateKey),
    Pipeline { base: RateKey, modifiers: Vec<RateModifier> },
    /// A constant run through modifiers (e.g. treated progression).
    ModifiedConstant { rate: f64, modifiers: Vec<RateModifier> },
}

impl RateSource {
    fn lookup_key(&self) -> Option<RateKey> {
        match self {
            RateSource::Lookup(k) | RateSource::Pipeline { base: k, .. } => Some(*k),
            RateSource::Constant(_) | RateSource::ModifiedConstant { .. } => None,
        }
    }

    fn modifiers(&self) -> &[RateModifier] {
        match self {
            RateSource::Pipeline { modifiers, .. } | RateSource::ModifiedConstant { modifiers, .. } => modifiers,
            RateSource::Constant(_) | RateSource::Lookup(_) => &[],
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub from: DiseaseState,
    pub to: DiseaseState,
    pub source: RateSource,
}

impl Transition {
    pub fn new(from: DiseaseState, to: DiseaseState, source: RateSource) -> Self {
        Transition { from, to, source }
    }
}

/// Per-draw scalars the rate modifiers need.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct DiseaseParameters {
    pub rr_hrhpv: f64,
    pub vaccine_efficacy: f64,
    pub treatment_efficacy: f64,
}

impl DiseaseParameters {
    pub fn from_config(config: &SimulationConfig) -> ModelResult<Self> {
        let draw = config.draw;
        Ok(DiseaseParameters {
            rr_hrhpv: config.disease.rr_hrhpv.get_random_variable("rr_hrhpv", draw)?,
            vaccine_efficacy: config.vaccination.exposure.efficacy.get_random_variable("hpv_vaccine_efficacy", draw),
            treatment_efficacy: config.treatment.efficacy.get_random_variable("bcc_treatment_efficacy", draw),
        })
    }
}

/// Fraction of incidence attributable to a risk factor with prevalence
/// `prevalence` and relative risk `rr`.
pub fn population_attributable_fraction(prevalence: f64, rr: f64) -> f64 {
    let excess = prevalence * (rr - 1.0);
    excess / (excess + 1.0)
}

/// Exponential rate over `dt_years` to a within-step probability.
pub fn rate_to_probability(rate: f64, dt_years: f64) -> f64 {
    1.0 - (-rate * dt_years).exp()
}

/// The model's edges, in a fixed order.
pub fn cervical_cancer_transitions(bcc_duration_years: f64, remission_rate: f64) -> Vec<Transition> {
    use DiseaseState::*;
    use RateModifier::*;

    let progression = 1.0 / bcc_duration_years;
    vec![
        Transition::new(
            Susceptible,
            HighRiskHpv,
            RateSource::Pipeline { base: RateKey::HrhpvIncidence, modifiers: vec![Vaccination] },
        ),
        Transition::new(
            Susceptible,
            BenignCervicalCancer,
            RateSource::Pipeline { base: RateKey::BccIncidence, modifiers: vec![PafComplement] },
        ),
        Transition::new(HighRiskHpv, BenignCervicalCancerWithHpv, RateSource::Lookup(RateKey::BccHpvPositiveIncidence)),
        Transition::new(HighRiskHpv, Susceptible, RateSource::Lookup(RateKey::HrhpvRemission)),
        Transition::new(
            BenignCervicalCancer,
            CervicalCancer,
            RateSource::ModifiedConstant { rate: progression, modifiers: vec![Treatment] },
        ),
        Transition::new(BenignCervicalCancer, BenignCervicalCancerWithHpv, RateSource::Lookup(RateKey::HrhpvIncidence)),
        Transition::new(
            BenignCervicalCancerWithHpv,
            CervicalCancerWithHpv,
            RateSource::ModifiedConstant { rate: progression, modifiers: vec![Treatment] },
        ),
        Transition::new(BenignCervicalCancerWithHpv, BenignCervicalCancer, RateSource::Lookup(RateKey::HrhpvRemission)),
        Transition::new(CervicalCancer, Recovered, RateSource::Constant(remission_rate)),
        Transition::new(CervicalCancer, CervicalCancerWithHpv, RateSource::Lookup(RateKey::HrhpvIncidence)),
        Transition::new(CervicalCancerWithHpv, Recovered, RateSource::Constant(remission_rate)),
        Transition::new(CervicalCancerWithHpv, CervicalCancer, RateSource::Lookup(RateKey::HrhpvRemission)),
    ]
}

#[derive(Debug, Clone)]
pub struct DiseaseModel {
    // Outgoing edges per state, indexed by `DiseaseState::index`.
    edges: [Vec<(DiseaseState, RateSource)>; 7],
    tables: RateTables,
    params: DiseaseParameters,
    stream: Option<RandomnessStream>,
}

impl DiseaseModel {
    /// Validate every edge against the loaded tables. A bad edge is a setup
    /// error; nothing is deferred to the first step.
    pub fn new(transitions: Vec<Transition>, tables: RateTables, params: DiseaseParameters) -> ModelResult<Self> {
        check_probability("vaccine_efficacy", params.vaccine_efficacy)?;
        check_probability("treatment_efficacy", params.treatment_efficacy)?;
        if !(params.rr_hrhpv.is_finite() && params.rr_hrhpv > 0.0) {
            return Err(ModelError::config(format!("relative risk must be positive, got {}", params.rr_hrhpv)));
        }

        let mut edges: [Vec<(DiseaseState, RateSource)>; 7] = Default::default();
        for t in transitions {
            if t.from == t.to {
                return Err(ModelError::config(format!("self transition declared on {}", t.from)));
            }
            if edges[t.from.index()].iter().any(|(to, _)| *to == t.to) {
                return Err(ModelError::config(format!("duplicate transition {} -> {}", t.from, t.to)));
            }
            if let Some(key) = t.source.lookup_key()
                && !tables.contains(key)
            {
                return Err(ModelError::MissingTable(key));
            }
            if let RateSource::Constant(rate) | RateSource::ModifiedConstant { rate, .. } = &t.source
                && check_rate(t.from.name(), *rate).is_err()
            {
                return Err(ModelError::config(format!("{} -> {} has invalid constant rate {rate}", t.from, t.to)));
            }
            if t.source.modifiers().contains(&RateModifier::PafComplement) && !tables.contains(RateKey::HrhpvPrevalence) {
                return Err(ModelError::MissingTable(RateKey::HrhpvPrevalence));
            }
            edges[t.from.index()].push((t.to, t.source));
        }
        Ok(DiseaseModel { edges, tables, params, stream: None })
    }

    /// The standard cervical cancer model with this draw's parameters.
    pub fn from_config(config: &SimulationConfig, tables: &RateTables) -> ModelResult<Self> {
        let params = DiseaseParameters::from_config(config)?;
        for key in [RateKey::HrhpvPrevalence, RateKey::BccPrevalence, RateKey::CervicalCancerPrevalence] {
            tables.get(key)?;
        }
        let transitions = cervical_cancer_transitions(config.disease.bcc_duration_years, config.disease.remission_rate);
        let model = DiseaseModel::new(transitions, tables.clone(), params)?;
        Ok(model.with_stream(RandomnessStream::new("cervical_cancer", config.seed, config.draw)))
    }

    pub fn with_stream(mut self, stream: RandomnessStream) -> Self {
        self.stream = Some(stream);
        self
    }

    pub fn params(&self) -> DiseaseParameters {
        self.params
    }

    pub fn tables(&self) -> &RateTables {
        &self.tables
    }

    pub fn outgoing(&self, state: DiseaseState) -> &[(DiseaseState, RateSource)] {
        &self.edges[state.index()]
    }

    /// Every declared `(from, to)` pair, in state order.
    pub fn edges(&self) -> Vec<(DiseaseState, DiseaseState)> {
        DiseaseState::ALL
            .into_iter()
            .flat_map(|from| self.outgoing(from).iter().map(move |(to, _)| (from, *to)))
            .collect()
    }

    /// PAF of benign lesions with respect to hrHPV at this age and year.
    pub fn paf(&self, age: f64, sex: Sex, year: f64) -> ModelResult<f64> {
        let prevalence = self.tables.lookup(RateKey::HrhpvPrevalence, age, sex, year)?;
        let paf = population_attributable_fraction(prevalence, self.params.rr_hrhpv);
        check_probability("hrhpv_paf", paf)
    }

    /// Annual rate of one edge for one simulant.
    pub fn rate(&self, source: &RateSource, simulant: &Simulant, year: f64) -> ModelResult<f64> {
        let base = match source {
            RateSource::Constant(rate) | RateSource::ModifiedConstant { rate, .. } => *rate,
            RateSource::Lookup(key) | RateSource::Pipeline { base: key, .. } => {
                self.tables.lookup(*key, simulant.age, simulant.sex, year)?
            }
        };
        let mut rate = base;
        for m in source.modifiers() {
            rate *= match m {
                RateModifier::PafComplement => 1.0 - self.paf(simulant.age, simulant.sex, year)?,
                RateModifier::Vaccination if simulant.vaccination.cached == ExposureCategory::Cat2 => {
                    1.0 - self.params.vaccine_efficacy
                }
                RateModifier::Treatment if simulant.treatment.cached == ExposureCategory::Cat2 => {
                    1.0 - self.params.treatment_efficacy
                }
                RateModifier::Vaccination | RateModifier::Treatment => 1.0,
            };
        }
        check_rate(simulant.disease_state.name(), rate)
    }

    /// Outcome distribution for one step: every edge target with its
    /// probability, then `(current state, stay probability)` last. Sums to 1.
    pub fn transition_probabilities(
        &self,
        simulant: &Simulant,
        year: f64,
        dt_years: f64,
    ) -> ModelResult<Vec<(DiseaseState, f64)>> {
        let edges = self.outgoing(simulant.disease_state);
        let mut outcomes = Vec::with_capacity(edges.len() + 1);
        for (to, source) in edges {
            let rate = self.rate(source, simulant, year)?;
            outcomes.push((*to, rate_to_probability(rate, dt_years)));
        }
        let total: f64 = outcomes.iter().map(|(_, p)| p).sum();
        let stay = if total > 1.0 {
            for (_, p) in outcomes.iter_mut() {
                *p /= total;
            }
            0.0
        } else {
            1.0 - total
        };
        outcomes.push((simulant.disease_state, stay));
        Ok(outcomes)
    }

    /// Resolve this step's transition for every living simulant.
    pub fn on_time_step(&self, population: &mut Population, clock: Timestamp, dt_years: f64) -> ModelResult<usize> {
        let stream = self
            .stream
            .as_ref()
            .ok_or_else(|| ModelError::config("disease model has no randomness stream"))?;
        let year = decimal_year(clock);
        let mut moved = 0;
        for s in population.living_mut() {
            if self.outgoing(s.disease_state).is_empty() {
                continue;
            }
            let outcomes = self.transition_probabilities(s, year, dt_years)?;
            let weights: Vec<f64> = outcomes.iter().map(|(_, p)| *p).collect();
            let (next, _) = outcomes[stream.choice(s.id, clock, "disease_transition", &weights)];
            if next != s.disease_state {
                s.disease_state = next;
                moved += 1;
            }
        }
        log::debug!("{moved} disease transitions at {clock}");
        Ok(moved)
    }

    /// Prevalence weights over [`DiseaseState::ALL`] for cohort entry.
    /// Lesion and cancer prevalence are split into HPV+/HPV- by PAF.
    pub fn initial_state_weights(&self, age: f64, sex: Sex, year: f64) -> ModelResult<[f64; 7]> {
        let hpv = self.tables.lookup(RateKey::HrhpvPrevalence, age, sex, year)?;
        let bcc = self.tables.lookup(RateKey::BccPrevalence, age, sex, year)?;
        let icc = self.tables.lookup(RateKey::CervicalCancerPrevalence, age, sex, year)?;
        let paf = self.paf(age, sex, year)?;

        let mut w = [0.0; 7];
        w[DiseaseState::HighRiskHpv.index()] = hpv;
        w[DiseaseState::BenignCervicalCancer.index()] = bcc * (1.0 - paf);
        w[DiseaseState::BenignCervicalCancerWithHpv.index()] = bcc * paf;
        w[DiseaseState::CervicalCancer.index()] = icc * (1.0 - paf);
        w[DiseaseState::CervicalCancerWithHpv.index()] = icc * paf;
        let prevalent: f64 = w.iter().sum();
        w[DiseaseState::Susceptible.index()] = 1.0 - check_probability("total_prevalence", prevalent)?;
        Ok(w)
    }
}
