use approx::assert_relative_eq;
use chrono::NaiveDate;
use statrs::distribution::{ChiSquared, ContinuousCDF};

use ccsim::config::{Scenario, SimulationConfig};
use ccsim::disease::{DiseaseModel, DiseaseParameters, DiseaseState, cervical_cancer_transitions};
use ccsim::observers::Measure;
use ccsim::population::{Population, Simulant};
use ccsim::randomness::RandomnessStream;
use ccsim::simulation::Simulation;
use ccsim::tables::{RateKey, RateTable, RateTables};
use ccsim::types::{DrawIndex, Sex, SimulantId, date};

// ── Single-step incidence ────────────────────────────────────────────────────

fn incidence_only_tables(hrhpv_incidence: f64) -> RateTables {
    let mut tables = RateTables::new();
    for key in RateKey::ALL {
        tables.insert(RateTable::constant(key, 0.0));
    }
    tables
        .with(RateTable::constant(RateKey::HrhpvIncidence, hrhpv_incidence))
        .with(RateTable::constant(RateKey::HrhpvPrevalence, 0.1))
}

#[test]
fn one_year_hrhpv_incidence_matches_exponential_probability() {
    const N: u64 = 100_000;
    let params = DiseaseParameters { rr_hrhpv: 16.2, vaccine_efficacy: 0.9, treatment_efficacy: 0.5 };
    let model = DiseaseModel::new(cervical_cancer_transitions(14.5, 0.1), incidence_only_tables(0.05), params)
        .unwrap()
        .with_stream(RandomnessStream::new("cervical_cancer", 20_240_601, DrawIndex(0)));

    let t0 = date(2020, 1, 1).unwrap();
    let mut pop = Population::from_simulants(
        (0..N).map(|i| Simulant::new(SimulantId(i), 25.0, Sex::Female, t0, DiseaseState::Susceptible)).collect(),
    );
    model.on_time_step(&mut pop, t0, 1.0).unwrap();

    let infected = pop.simulants().iter().filter(|s| s.disease_state == DiseaseState::HighRiskHpv).count() as f64;
    let other = pop
        .simulants()
        .iter()
        .filter(|s| !matches!(s.disease_state, DiseaseState::Susceptible | DiseaseState::HighRiskHpv))
        .count();
    assert_eq!(other, 0, "only the hrHPV edge has a non-zero rate");

    let p = 1.0 - (-0.05f64).exp();
    assert_relative_eq!(p, 0.04877, epsilon = 1e-5);
    let expected = N as f64 * p;
    let stayed = N as f64 - infected;
    let chi2 = (infected - expected).powi(2) / expected + (stayed - (N as f64 - expected)).powi(2) / (N as f64 - expected);
    let critical = ChiSquared::new(1.0).unwrap().inverse_cdf(0.999);
    assert!(chi2 < critical, "chi-square {chi2:.2} exceeds {critical:.2} ({infected} infected, expected {expected:.0})");
}

// ── Person-time accounting ───────────────────────────────────────────────────

fn cohort_config(size: usize, age: f64) -> SimulationConfig {
    let mut config = SimulationConfig::canonical();
    config.population.size = size;
    config.population.age_start = age;
    config.population.age_end = age;
    config.step_days = 365.25;
    config.start_date = NaiveDate::from_ymd_opt(2020, 1, 1).unwrap();
    config.end_date = NaiveDate::from_ymd_opt(2029, 12, 31).unwrap();
    config.scenario = Scenario::Baseline;
    config
}

#[test]
fn susceptible_person_time_is_the_remainder_of_cohort_person_time() {
    let mut sim = Simulation::from_config(cohort_config(10_000, 21.0), &RateTables::synthetic()).unwrap();
    sim.run().unwrap();
    assert_eq!(sim.steps_taken(), 10);

    let m = sim.observers().metrics();
    let total = m.total(Measure::PersonTime);
    let susceptible = m.total(Measure::StatePersonTime(DiseaseState::Susceptible));
    let others: f64 = DiseaseState::ALL
        .iter()
        .filter(|s| **s != DiseaseState::Susceptible)
        .map(|s| m.total(Measure::StatePersonTime(*s)))
        .sum();

    assert_relative_eq!(susceptible, total - others, epsilon = 1e-6);
    // Deaths in a 21-31 cohort are rare, so nearly every simulant contributes
    // the full ten years.
    assert!(total <= 100_000.0 + 1e-6);
    assert!(total > 97_000.0, "cohort person-time {total:.0} too low");
    assert!(susceptible > 0.5 * total, "susceptible share {:.3} implausible", susceptible / total);
}

#[test]
fn single_birth_cohort_lands_in_one_age_stratum() {
    let mut sim = Simulation::from_config(cohort_config(500, 21.0), &RateTables::synthetic()).unwrap();
    sim.run().unwrap();
    let metrics = sim.metrics();

    let cohort_total: f64 = metrics
        .iter()
        .filter(|(k, _)| k.starts_with("person_time_in_") && k.ends_with("_age_cohort_1995_to_2000"))
        .map(|(_, v)| v)
        .sum();
    let all: f64 = metrics.iter().filter(|(k, _)| k.starts_with("person_time_in_")).map(|(_, v)| v).sum();
    assert!(cohort_total > 0.0);
    assert_relative_eq!(cohort_total, all, epsilon = 1e-6);
    assert!(metrics.contains_key(
        "susceptible_to_cervical_cancer_person_time_in_2020_age_cohort_1995_to_2000\
         _screening_result_negative_vaccination_state_cat1_treatment_state_cat1"
    ));
}

// ── Scenario comparison ──────────────────────────────────────────────────────

fn attended_after(metrics: &std::collections::BTreeMap<String, f64>, year: i32) -> f64 {
    metrics
        .iter()
        .filter_map(|(k, v)| {
            let rest = k.strip_prefix("screening_attended_count_in_")?;
            let y: i32 = rest.get(..4)?.parse().ok()?;
            (y >= year).then_some(*v)
        })
        .sum()
}

#[test]
fn alternative_scenario_raises_late_attendance() {
    let mut base = cohort_config(4_000, 30.0);
    base.step_days = 36.5;
    base.end_date = NaiveDate::from_ymd_opt(2034, 1, 1).unwrap();
    let mut alt = base.clone();
    alt.scenario = Scenario::Alternative;

    let run = |c: SimulationConfig| {
        let mut sim = Simulation::from_config(c, &RateTables::synthetic()).unwrap();
        sim.run().unwrap();
        sim.metrics()
    };
    let baseline = attended_after(&run(base), 2030);
    let alternative = attended_after(&run(alt), 2030);
    assert!(
        alternative > 1.5 * baseline,
        "alternative attendance {alternative} not clearly above baseline {baseline}"
    );
}

#[test]
fn scheduled_visits_start_only_in_the_screening_window() {
    let mut config = cohort_config(1_000, 10.0);
    config.end_date = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
    let mut sim = Simulation::from_config(config, &RateTables::synthetic()).unwrap();
    sim.run().unwrap();
    let scheduled: f64 =
        sim.metrics().iter().filter(|(k, _)| k.starts_with("screening_scheduled_count")).map(|(_, v)| v).sum();
    // 10-year-olds stay below 21 for the whole run and carry no disease, so
    // there are no symptomatic visits either.
    assert_eq!(scheduled, 0.0);
}
