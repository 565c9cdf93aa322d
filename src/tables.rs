//! Age/sex/year lookup tables.
//!
//! Tables arrive already transformed by the external data pipeline: one CSV
//! per [`RateKey`] with bin edges and one value column per draw. The core only
//! ever asks `lookup(age, sex, year)`.

use std::collections::HashMap;
use std::fmt;
use std::fs::File;
use std::io::Read;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{ModelError, ModelResult};
use crate::types::{DrawIndex, Sex};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum RateKey {
    HrhpvIncidence,
    HrhpvRemission,
    HrhpvPrevalence,
    /// Benign lesion incidence among susceptibles, before the HPV PAF split.
    BccIncidence,
    /// Benign lesion incidence among hrHPV-infected simulants.
    BccHpvPositiveIncidence,
    BccPrevalence,
    CervicalCancerPrevalence,
    CervicalCancerEmr,
    CervicalCancerDisabilityWeight,
    AllCauseMortality,
    LifeExpectancy,
}

impl RateKey {
    pub const ALL: [RateKey; 11] = [
        RateKey::HrhpvIncidence,
        RateKey::HrhpvRemission,
        RateKey::HrhpvPrevalence,
        RateKey::BccIncidence,
        RateKey::BccHpvPositiveIncidence,
        RateKey::BccPrevalence,
        RateKey::CervicalCancerPrevalence,
        RateKey::CervicalCancerEmr,
        RateKey::CervicalCancerDisabilityWeight,
        RateKey::AllCauseMortality,
        RateKey::LifeExpectancy,
    ];

    /// Artifact-style key; also the CSV file stem.
    pub fn as_str(self) -> &'static str {
        match self {
            RateKey::HrhpvIncidence => "sequela.high_risk_hpv.incidence_rate",
            RateKey::HrhpvRemission => "sequela.high_risk_hpv.remission_rate",
            RateKey::HrhpvPrevalence => "sequela.high_risk_hpv.prevalence",
            RateKey::BccIncidence => "sequela.benign_cervical_cancer.incidence_rate",
            RateKey::BccHpvPositiveIncidence => {
                "sequela.benign_cervical_cancer_with_hpv.incidence_rate"
            }
            RateKey::BccPrevalence => "sequela.benign_cervical_cancer.prevalence",
            RateKey::CervicalCancerPrevalence => "cause.cervical_cancer.prevalence",
            RateKey::CervicalCancerEmr => "cause.cervical_cancer.excess_mortality_rate",
            RateKey::CervicalCancerDisabilityWeight => "cause.cervical_cancer.disability_weight",
            RateKey::AllCauseMortality => "cause.all_causes.cause_specific_mortality_rate",
            RateKey::LifeExpectancy => "population.theoretical_minimum_risk_life_expectancy",
        }
    }

    pub fn parse(s: &str) -> ModelResult<RateKey> {
        RateKey::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| ModelError::config(format!("unrecognized data key '{s}'")))
    }
}

impl fmt::Display for RateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One row: value on `[age_start, age_end) × [year_start, year_end)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bin {
    pub sex: Sex,
    pub age_start: f64,
    pub age_end: f64,
    pub year_start: f64,
    pub year_end: f64,
    pub value: f64,
}

/// Piecewise-constant table. Queries outside the covered range take the
/// value of the nearest edge bin.
#[derive(Debug, Clone)]
pub struct RateTable {
    key: RateKey,
    // Per sex: sorted unique edges plus a dense year-major grid.
    by_sex: HashMap<Sex, Grid>,
}

#[derive(Debug, Clone)]
struct Grid {
    age_starts: Vec<f64>,
    year_starts: Vec<f64>,
    values: Vec<f64>,
}

impl Grid {
    fn value(&self, age: f64, year: f64) -> f64 {
        let a = bin_index(&self.age_starts, age);
        let y = bin_index(&self.year_starts, year);
        self.values[y * self.age_starts.len() + a]
    }
}

/// Index of the last start `<= x`, clamped to the first bin.
fn bin_index(starts: &[f64], x: f64) -> usize {
    starts.partition_point(|s| *s <= x).saturating_sub(1)
}

impl RateTable {
    /// Build from bins. Every (age, year) cell of each sex's grid must be
    /// covered exactly once, and each bin must end where the next begins.
    pub fn from_bins(key: RateKey, bins: Vec<Bin>) -> ModelResult<RateTable> {
        if bins.is_empty() {
            return Err(ModelError::config(format!("{key}: table has no rows")));
        }
        let mut grouped: HashMap<Sex, Vec<Bin>> = HashMap::new();
        for bin in bins {
            if !bin.value.is_finite() {
                return Err(ModelError::numeric(key.as_str(), bin.value));
            }
            grouped.entry(bin.sex).or_default().push(bin);
        }

        let mut by_sex = HashMap::new();
        for (sex, bins) in grouped {
            let age_starts = unique_sorted(bins.iter().map(|b| b.age_start));
            let year_starts = unique_sorted(bins.iter().map(|b| b.year_start));
            let cells = age_starts.len() * year_starts.len();
            if cells != bins.len() {
                return Err(ModelError::config(format!(
                    "{key}: {} rows for {:?} do not form a full {}x{} age/year grid",
                    bins.len(),
                    sex,
                    age_starts.len(),
                    year_starts.len()
                )));
            }
            let mut values = vec![f64::NAN; cells];
            for b in &bins {
                let a = bin_index(&age_starts, b.age_start);
                let y = bin_index(&year_starts, b.year_start);
                values[y * age_starts.len() + a] = b.value;
            }
            if values.iter().any(|v| v.is_nan()) {
                return Err(ModelError::config(format!("{key}: duplicate bins for {sex:?}")));
            }
            check_contiguous(key, sex, "age", &age_starts, bins.iter().map(|b| (b.age_start, b.age_end)))?;
            check_contiguous(key, sex, "year", &year_starts, bins.iter().map(|b| (b.year_start, b.year_end)))?;
            by_sex.insert(sex, Grid { age_starts, year_starts, values });
        }
        Ok(RateTable { key, by_sex })
    }

    /// A table that returns `value` everywhere for both sexes.
    pub fn constant(key: RateKey, value: f64) -> RateTable {
        let grid = || Grid { age_starts: vec![0.0], year_starts: vec![0.0], values: vec![value] };
        RateTable { key, by_sex: HashMap::from([(Sex::Female, grid()), (Sex::Male, grid())]) }
    }

    pub fn key(&self) -> RateKey {
        self.key
    }

    pub fn lookup(&self, age: f64, sex: Sex, year: f64) -> ModelResult<f64> {
        self.by_sex
            .get(&sex)
            .map(|g| g.value(age, year))
            .ok_or_else(|| ModelError::config(format!("{}: no rows for sex {sex:?}", self.key)))
    }

    /// Parse a CSV with columns `sex,age_start,age_end,year_start,year_end`
    /// followed by `draw_{n}` columns or a single `value` column.
    pub fn from_csv_reader<R: Read>(key: RateKey, reader: R, draw: DrawIndex) -> ModelResult<RateTable> {
        let mut rdr = csv::Reader::from_reader(reader);
        let headers = rdr.headers()?.clone();
        let column = |name: &str| headers.iter().position(|h| h == name);

        let draw_column = format!("draw_{}", draw.0);
        let value_idx = column(&draw_column).or_else(|| column("value")).ok_or_else(|| {
            ModelError::config(format!("{key}: neither '{draw_column}' nor 'value' column present"))
        })?;
        let required = ["sex", "age_start", "age_end", "year_start", "year_end"];
        let mut idx = [0usize; 5];
        for (slot, name) in idx.iter_mut().zip(required) {
            *slot = column(name)
                .ok_or_else(|| ModelError::config(format!("{key}: missing column '{name}'")))?;
        }

        let parse = |record: &csv::StringRecord, i: usize| -> ModelResult<f64> {
            record[i].trim().parse::<f64>().map_err(|e| {
                ModelError::config(format!("{key}: bad number '{}': {e}", &record[i]))
            })
        };

        let mut bins = Vec::new();
        for result in rdr.records() {
            let record = result?;
            let sex = match record[idx[0]].trim() {
                "Female" | "female" => Sex::Female,
                "Male" | "male" => Sex::Male,
                other => return Err(ModelError::config(format!("{key}: unknown sex '{other}'"))),
            };
            bins.push(Bin {
                sex,
                age_start: parse(&record, idx[1])?,
                age_end: parse(&record, idx[2])?,
                year_start: parse(&record, idx[3])?,
                year_end: parse(&record, idx[4])?,
                value: parse(&record, value_idx)?,
            });
        }
        RateTable::from_bins(key, bins)
    }
}

/// Every bin on an axis must end at the next start. The last edge must be
/// shared by all bins in the last column.
fn check_contiguous(
    key: RateKey,
    sex: Sex,
    axis: &str,
    starts: &[f64],
    spans: impl Iterator<Item = (f64, f64)>,
) -> ModelResult<()> {
    let mut ends: Vec<Option<f64>> = vec![None; starts.len()];
    for (start, end) in spans {
        let i = bin_index(starts, start);
        let expected = starts.get(i + 1).copied();
        let ok = end > start && expected.is_none_or(|next| end == next) && ends[i].is_none_or(|seen| end == seen);
        if !ok {
            return Err(ModelError::config(format!(
                "{key}: {sex:?} {axis} bin [{start}, {end}) is not contiguous with its neighbours"
            )));
        }
        ends[i] = Some(end);
    }
    Ok(())
}

fn unique_sorted(xs: impl Iterator<Item = f64>) -> Vec<f64> {
    let mut v: Vec<f64> = xs.collect();
    v.sort_by(f64::total_cmp);
    v.dedup();
    v
}

/// All tables for one draw.
#[derive(Debug, Clone, Default)]
pub struct RateTables {
    tables: HashMap<RateKey, RateTable>,
}

impl RateTables {
    pub fn new() -> Self {
        RateTables::default()
    }

    pub fn insert(&mut self, table: RateTable) {
        self.tables.insert(table.key(), table);
    }

    pub fn with(mut self, table: RateTable) -> Self {
        self.insert(table);
        self
    }

    pub fn contains(&self, key: RateKey) -> bool {
        self.tables.contains_key(&key)
    }

    pub fn get(&self, key: RateKey) -> ModelResult<&RateTable> {
        self.tables.get(&key).ok_or(ModelError::MissingTable(key))
    }

    pub fn lookup(&self, key: RateKey, age: f64, sex: Sex, year: f64) -> ModelResult<f64> {
        self.get(key)?.lookup(age, sex, year)
    }

    /// Load every `{key}.csv` present in `dir` for `draw`. Files whose stem
    /// is not a known key are rejected.
    pub fn from_csv_dir(dir: &Path, draw: DrawIndex) -> ModelResult<RateTables> {
        let mut tables = RateTables::new();
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("csv") {
                continue;
            }
            let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or_default();
            let key = RateKey::parse(stem)?;
            let table = RateTable::from_csv_reader(key, File::open(&path)?, draw)?;
            tables.insert(table);
        }
        log::info!("loaded {} rate tables from {} (draw {})", tables.tables.len(), dir.display(), draw.0);
        Ok(tables)
    }

    /// Deterministic placeholder inputs with plausible age shapes. Annual
    /// rates unless noted.
    pub fn synthetic() -> RateTables {
        let ages: Vec<(f64, f64)> = (0..20).map(|i| (i as f64 * 5.0, i as f64 * 5.0 + 5.0)).collect();
        let by_age = |key: RateKey, f: &dyn Fn(f64) -> f64| {
            let bins = ages
                .iter()
                .map(|&(lo, hi)| Bin {
                    sex: Sex::Female,
                    age_start: lo,
                    age_end: hi,
                    year_start: 2019.0,
                    year_end: 2041.0,
                    value: f((lo + hi) / 2.0),
                })
                .collect();
            // Bins are generated as a full grid, so this cannot fail.
            RateTable::from_bins(key, bins).unwrap_or_else(|_| RateTable::constant(key, 0.0))
        };

        // PLACEHOLDER shapes; real inputs come from the data pipeline.
        let adult = |age: f64| if age < 15.0 { 0.0 } else { 1.0 };
        RateTables::new()
            .with(by_age(RateKey::HrhpvIncidence, &|a| {
                adult(a) * if a < 30.0 { 0.08 } else if a < 50.0 { 0.04 } else { 0.02 }
            }))
            .with(by_age(RateKey::HrhpvRemission, &|a| adult(a) * 0.3 + (1.0 - adult(a)) * 0.3))
            .with(by_age(RateKey::HrhpvPrevalence, &|a| {
                adult(a) * if a < 25.0 { 0.19 } else if a < 45.0 { 0.11 } else { 0.07 }
            }))
            .with(by_age(RateKey::BccIncidence, &|a| adult(a) * 0.0004))
            .with(by_age(RateKey::BccHpvPositiveIncidence, &|a| adult(a) * 0.012))
            .with(by_age(RateKey::BccPrevalence, &|a| adult(a) * 0.004))
            .with(by_age(RateKey::CervicalCancerPrevalence, &|a| {
                adult(a) * (0.0002 * (a / 40.0)).min(0.0006)
            }))
            .with(by_age(RateKey::CervicalCancerEmr, &|a| adult(a) * (0.05 + a * 0.001)))
            .with(by_age(RateKey::CervicalCancerDisabilityWeight, &|_| 0.288))
            .with(by_age(RateKey::AllCauseMortality, &|a| 0.0005 * (0.085 * (a - 20.0).max(0.0)).exp()))
            .with(by_age(RateKey::LifeExpectancy, &|a| (88.0 - a).max(2.0)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid_bins() -> Vec<Bin> {
        let mut bins = Vec::new();
        for (i, (lo, hi)) in [(0.0, 20.0), (20.0, 40.0), (40.0, 125.0)].into_iter().enumerate() {
            for (j, (ys, ye)) in [(2020.0, 2021.0), (2021.0, 2022.0)].into_iter().enumerate() {
                bins.push(Bin {
                    sex: Sex::Female,
                    age_start: lo,
                    age_end: hi,
                    year_start: ys,
                    year_end: ye,
                    value: (i * 10 + j) as f64,
                });
            }
        }
        bins
    }

    #[test]
    fn lookup_selects_age_and_year_bin() {
        let t = RateTable::from_bins(RateKey::HrhpvIncidence, grid_bins()).unwrap();
        assert_eq!(t.lookup(25.0, Sex::Female, 2020.5).unwrap(), 10.0);
        assert_eq!(t.lookup(45.0, Sex::Female, 2021.2).unwrap(), 21.0);
        // Lower edges are inclusive.
        assert_eq!(t.lookup(20.0, Sex::Female, 2021.0).unwrap(), 11.0);
    }

    #[test]
    fn lookup_clamps_outside_range() {
        let t = RateTable::from_bins(RateKey::HrhpvIncidence, grid_bins()).unwrap();
        assert_eq!(t.lookup(130.0, Sex::Female, 2035.0).unwrap(), 21.0);
        assert_eq!(t.lookup(-1.0, Sex::Female, 2000.0).unwrap(), 0.0);
    }

    #[test]
    fn lookup_for_missing_sex_is_an_error() {
        let t = RateTable::from_bins(RateKey::HrhpvIncidence, grid_bins()).unwrap();
        assert!(t.lookup(30.0, Sex::Male, 2020.0).is_err());
    }

    #[test]
    fn ragged_grid_is_rejected() {
        let mut bins = grid_bins();
        bins.pop();
        assert!(RateTable::from_bins(RateKey::HrhpvIncidence, bins).is_err());
    }

    #[test]
    fn age_gap_is_rejected() {
        let mut bins = grid_bins();
        for b in bins.iter_mut().filter(|b| b.age_start == 0.0) {
            b.age_end = 15.0;
        }
        let err = RateTable::from_bins(RateKey::HrhpvIncidence, bins).unwrap_err();
        assert!(matches!(err, ModelError::Config { .. }), "{err}");
    }

    #[test]
    fn year_overlap_is_rejected() {
        let mut bins = grid_bins();
        for b in bins.iter_mut().filter(|b| b.year_start == 2020.0) {
            b.year_end = 2021.5;
        }
        assert!(RateTable::from_bins(RateKey::HrhpvIncidence, bins).is_err());
    }

    #[test]
    fn inconsistent_last_edge_is_rejected() {
        let data = "sex,age_start,age_end,year_start,year_end,value\n\
                    Female,0,125,2020,2021,0.1\n\
                    Female,0,120,2021,2022,0.2\n";
        assert!(RateTable::from_csv_reader(RateKey::BccIncidence, data.as_bytes(), DrawIndex(0)).is_err());
    }

    #[test]
    fn csv_reader_picks_draw_column() {
        let data = "sex,age_start,age_end,year_start,year_end,draw_0,draw_1\n\
                    Female,0,50,2020,2021,0.1,0.2\n\
                    Female,50,125,2020,2021,0.3,0.4\n";
        let t = RateTable::from_csv_reader(RateKey::BccIncidence, data.as_bytes(), DrawIndex(1)).unwrap();
        assert_eq!(t.lookup(10.0, Sex::Female, 2020.0).unwrap(), 0.2);
        assert_eq!(t.lookup(60.0, Sex::Female, 2020.0).unwrap(), 0.4);
    }

    #[test]
    fn csv_reader_falls_back_to_value_column() {
        let data = "sex,age_start,age_end,year_start,year_end,value\nFemale,0,125,2020,2021,0.7\n";
        let t = RateTable::from_csv_reader(RateKey::BccIncidence, data.as_bytes(), DrawIndex(9)).unwrap();
        assert_eq!(t.lookup(40.0, Sex::Female, 2030.0).unwrap(), 0.7);
    }

    #[test]
    fn csv_reader_without_value_column_is_config_error() {
        let data = "sex,age_start,age_end,year_start,year_end,draw_0\nFemale,0,125,2020,2021,0.7\n";
        let err = RateTable::from_csv_reader(RateKey::BccIncidence, data.as_bytes(), DrawIndex(3))
            .unwrap_err();
        assert!(matches!(err, ModelError::Config { .. }));
    }

    #[test]
    fn unknown_key_is_rejected() {
        assert!(RateKey::parse("cause.breast_cancer.prevalence").is_err());
        assert_eq!(
            RateKey::parse("sequela.high_risk_hpv.prevalence").unwrap(),
            RateKey::HrhpvPrevalence
        );
    }

    #[test]
    fn missing_table_is_reported_by_key() {
        let tables = RateTables::new();
        assert!(matches!(
            tables.lookup(RateKey::LifeExpectancy, 30.0, Sex::Female, 2020.0),
            Err(ModelError::MissingTable(RateKey::LifeExpectancy))
        ));
    }

    #[test]
    fn synthetic_tables_cover_every_key() {
        let tables = RateTables::synthetic();
        for key in RateKey::ALL {
            let v = tables.lookup(key, 35.0, Sex::Female, 2025.0).unwrap();
            assert!(v.is_finite() && v >= 0.0, "{key} gave {v}");
        }
    }
}
