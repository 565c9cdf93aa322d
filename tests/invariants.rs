use proptest::prelude::*;

use ccsim::config::{Scenario, SimulationConfig};
use ccsim::disease::{DiseaseModel, DiseaseParameters, DiseaseState, cervical_cancer_transitions};
use ccsim::distributions::TruncnormDist;
use ccsim::exposure::ExposureCategory;
use ccsim::intervention::{AttendanceIntervention, ScaleUpWindow, conditional_attendance};
use ccsim::population::Simulant;
use ccsim::screening::{CancerCategory, ScreeningResult};
use ccsim::simulation::Simulation;
use ccsim::tables::{RateKey, RateTable, RateTables};
use ccsim::types::{Sex, SimulantId, date, days};

fn state() -> impl Strategy<Value = DiseaseState> {
    prop::sample::select(DiseaseState::ALL.to_vec())
}

fn category() -> impl Strategy<Value = CancerCategory> {
    prop::sample::select(vec![CancerCategory::Negative, CancerCategory::Benign, CancerCategory::Invasive])
}

fn model(rate: f64) -> DiseaseModel {
    let mut tables = RateTables::new();
    for key in RateKey::ALL {
        tables.insert(RateTable::constant(key, rate));
    }
    tables.insert(RateTable::constant(RateKey::HrhpvPrevalence, 0.1));
    let params = DiseaseParameters { rr_hrhpv: 16.2, vaccine_efficacy: 0.9, treatment_efficacy: 0.5 };
    DiseaseModel::new(cervical_cancer_transitions(14.5, 0.1), tables, params).unwrap()
}

proptest! {
    /// Outgoing probabilities plus "stay" always sum to one.
    #[test]
    fn prop_transition_probabilities_conserve_mass(
        s in state(),
        rate in 0.0f64..50.0,
        dt in 0.001f64..2.0,
        vaccinated in any::<bool>(),
        treated in any::<bool>(),
    ) {
        let m = model(rate);
        let mut sim = Simulant::new(SimulantId(0), 40.0, Sex::Female, date(2020, 1, 1).unwrap(), s);
        if vaccinated {
            sim.vaccination.cached = ExposureCategory::Cat2;
        }
        if treated {
            sim.treatment.cached = ExposureCategory::Cat2;
        }
        let outcomes = m.transition_probabilities(&sim, 2025.0, dt).unwrap();
        let total: f64 = outcomes.iter().map(|(_, p)| p).sum();
        prop_assert!((total - 1.0).abs() < 1e-9, "sum {} for {}", total, s);
        prop_assert!(outcomes.iter().all(|(_, p)| (0.0..=1.0).contains(p)));
        prop_assert_eq!(outcomes.last().map(|(st, _)| *st), Some(s));
    }

    /// Every (HPV bit, cancer category) pair maps to exactly one result and
    /// that result decomposes back into the same pair.
    #[test]
    fn prop_screening_combination_is_total(hpv in any::<bool>(), c in category()) {
        let r = ScreeningResult::combine(hpv, c);
        prop_assert_eq!(r.hpv_positive(), hpv);
        prop_assert_eq!(r.cancer_category(), c);
    }

    /// The conditional split always reproduces the population attendance and
    /// the requested odds ratio when no clamping is needed.
    #[test]
    fn prop_conditional_attendance_recovers_inputs(p in 0.01f64..0.5, m in 1.0f64..1.9) {
        let c = conditional_attendance(p, m).unwrap();
        prop_assert!((c.attended_previous - m * c.not_attended_previous).abs() < 1e-12);
        prop_assert!(c.not_attended_previous <= p + 1e-12);
        prop_assert!(c.attended_previous <= 1.0);
    }

    /// Baseline passes the pipeline value through for every clock date.
    #[test]
    fn prop_baseline_adjustment_is_zero(offset_days in -3_000.0f64..8_000.0, base in 0.0f64..1.0, attended in any::<bool>()) {
        let start = date(2021, 1, 1).unwrap();
        let window = ScaleUpWindow::new(start, date(2030, 1, 1).unwrap()).unwrap();
        let split = conditional_attendance(0.25, 1.5).unwrap();
        let high = conditional_attendance(0.75, 1.5).unwrap();
        let iv = AttendanceIntervention::new(Scenario::Baseline, window, split, high);
        let now = start + days(offset_days);
        prop_assert_eq!(iv.adjustment(now, attended), 0.0);
        prop_assert_eq!(iv.adjust(now, attended, base), base);
    }

    /// The alternative ramp is monotone and stays within [0, full].
    #[test]
    fn prop_alternative_ramp_is_monotone(a in -2_000.0f64..6_000.0, b in -2_000.0f64..6_000.0) {
        let start = date(2021, 1, 1).unwrap();
        let window = ScaleUpWindow::new(start, date(2030, 1, 1).unwrap()).unwrap();
        let (early, late) = if a <= b { (a, b) } else { (b, a) };
        let pa = window.progress(start + days(early));
        let pb = window.progress(start + days(late));
        prop_assert!((0.0..=1.0).contains(&pa) && (0.0..=1.0).contains(&pb));
        prop_assert!(pa <= pb);
    }

    /// Truncated-normal quantiles respect the bounds for any probability.
    #[test]
    fn prop_truncnorm_ppf_within_bounds(
        mean in -100.0f64..100.0,
        sd in 0.0f64..50.0,
        width in 0.1f64..100.0,
        q in 0.0f64..=1.0,
    ) {
        let lo = mean - width / 2.0;
        let hi = mean + width;
        let d = TruncnormDist::new(mean, sd, Some(lo), Some(hi));
        let x = d.ppf(q);
        prop_assert!(x >= lo && x <= hi, "{} outside [{}, {}]", x, lo, hi);
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(8))]

    /// Whole-run invariants for arbitrary seeds: screening dates stay ordered,
    /// exposures never revert, and every death has a recorded exit.
    #[test]
    fn prop_run_invariants_hold_for_any_seed(seed in any::<u64>(), alternative in any::<bool>()) {
        let mut config = SimulationConfig::canonical();
        config.seed = seed;
        config.population.size = 150;
        config.end_date = chrono::NaiveDate::from_ymd_opt(2023, 1, 1).unwrap();
        if alternative {
            config.scenario = Scenario::Alternative;
        }
        let mut sim = Simulation::from_config(config, &RateTables::synthetic()).unwrap();
        let initial: Vec<(ExposureCategory, ExposureCategory)> =
            sim.population().simulants().iter().map(|s| (s.vaccination.cached, s.treatment.cached)).collect();
        sim.run().unwrap();

        for (s, (vac, trt)) in sim.population().simulants().iter().zip(initial) {
            if let (Some(prev), Some(next)) = (s.previous_screening_date, s.next_screening_date) {
                prop_assert!(next >= prev);
            }
            if vac == ExposureCategory::Cat2 {
                prop_assert_eq!(s.vaccination.cached, ExposureCategory::Cat2);
            }
            if trt == ExposureCategory::Cat2 {
                prop_assert_eq!(s.treatment.cached, ExposureCategory::Cat2);
            }
            prop_assert_eq!(s.vaccination.date.is_some(), s.vaccination.cached == ExposureCategory::Cat2);
            if !s.is_alive() {
                prop_assert!(s.exit_time.is_some());
            }
        }
    }
}
