use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

/// Row index into the population table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SimulantId(pub u64);

/// Parameter-uncertainty replicate index. Selects table draw columns and
/// seeds every random stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DrawIndex(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Sex {
    Female,
    Male,
}

impl Sex {
    pub fn label(self) -> &'static str {
        match self {
            Sex::Female => "female",
            Sex::Male => "male",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Alive {
    Alive,
    Dead,
    Untracked,
}

/// Simulation clock value. Day-resolution dates with sub-day steps allowed.
pub type Timestamp = NaiveDateTime;

pub const DAYS_PER_YEAR: f64 = 365.25;
const MILLIS_PER_DAY: f64 = 86_400_000.0;

/// Duration of `days` (fractional days allowed, millisecond resolution).
pub fn days(days: f64) -> Duration {
    Duration::milliseconds((days * MILLIS_PER_DAY).round() as i64)
}

pub fn years(years: f64) -> Duration {
    days(years * DAYS_PER_YEAR)
}

pub fn to_days(d: Duration) -> f64 {
    d.num_milliseconds() as f64 / MILLIS_PER_DAY
}

/// Midnight on the given calendar date, or `None` for an invalid date.
pub fn date(year: i32, month: u32, day: u32) -> Option<Timestamp> {
    NaiveDate::from_ymd_opt(year, month, day)?.and_hms_opt(0, 0, 0)
}

/// Calendar year as a fractional value, used for table lookups.
pub fn decimal_year(t: Timestamp) -> f64 {
    let year = t.year();
    let start = date(year, 1, 1).unwrap_or(t);
    let days_into_year = to_days(t - start);
    year as f64 + days_into_year / DAYS_PER_YEAR
}
