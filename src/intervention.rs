//! Scenario scale-up of screening attendance.
//!
//! Under the alternative scenario attendance ramps linearly from the start
//! goal to the end goal across the scale-up window. The ramp is applied as an
//! additive adjustment on top of the baseline conditional attendance, so the
//! baseline scenario passes the pipeline value through untouched.

use crate::config::{Scenario, SimulationConfig, midnight};
use crate::error::{ModelError, ModelResult, check_probability};
use crate::types::{Timestamp, to_days};

/// Attendance probability split by whether the previous visit was attended.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConditionalAttendance {
    pub attended_previous: f64,
    pub not_attended_previous: f64,
}

impl ConditionalAttendance {
    pub fn get(&self, attended_previous: bool) -> f64 {
        if attended_previous { self.attended_previous } else { self.not_attended_previous }
    }
}

/// Split population attendance `p` into the two cohorts given the relative
/// odds `m` of attending after attending last time:
/// `p2 = p / (1 + p(m − 1))`, `p1 = m·p2`.
pub fn conditional_attendance(p: f64, m: f64) -> ModelResult<ConditionalAttendance> {
    check_probability("population attendance", p)?;
    if !(m.is_finite() && m > 0.0) {
        return Err(ModelError::numeric("attendance multiplier", m));
    }
    let not_attended = p / (1.0 + p * (m - 1.0));
    let mut attended = m * not_attended;
    if attended > 1.0 {
        log::warn!("conditional attendance {attended:.4} clamped to 1 (p = {p}, m = {m})");
        attended = 1.0;
    }
    Ok(ConditionalAttendance { attended_previous: attended, not_attended_previous: not_attended })
}

/// Linear ramp between two dates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScaleUpWindow {
    start: Timestamp,
    end: Timestamp,
}

impl ScaleUpWindow {
    pub fn new(start: Timestamp, end: Timestamp) -> ModelResult<Self> {
        if end <= start {
            return Err(ModelError::config(format!("scale-up window {start} .. {end} is empty")));
        }
        Ok(ScaleUpWindow { start, end })
    }

    /// Elapsed share of the window: 0 before start, 1 from end on.
    pub fn progress(&self, now: Timestamp) -> f64 {
        if now <= self.start {
            0.0
        } else if now >= self.end {
            1.0
        } else {
            to_days(now - self.start) / to_days(self.end - self.start)
        }
    }
}

#[derive(Debug, Clone)]
pub struct AttendanceIntervention {
    scenario: Scenario,
    window: ScaleUpWindow,
    differential: ConditionalAttendance,
}

impl AttendanceIntervention {
    pub fn new(
        scenario: Scenario,
        window: ScaleUpWindow,
        start: ConditionalAttendance,
        end: ConditionalAttendance,
    ) -> Self {
        let differential = ConditionalAttendance {
            attended_previous: end.attended_previous - start.attended_previous,
            not_attended_previous: end.not_attended_previous - start.not_attended_previous,
        };
        AttendanceIntervention { scenario, window, differential }
    }

    /// The ramp starts from `start`, the split the attendance pipeline
    /// already uses, so the alternative reaches exactly the end goal.
    pub fn from_config(config: &SimulationConfig, start: ConditionalAttendance, multiplier: f64) -> ModelResult<Self> {
        let iv = &config.intervention;
        let end_p = iv.attendance_end.get_random_variable("attendance_scale_up_end", config.draw);
        let window = ScaleUpWindow::new(midnight(iv.scale_up_start)?, midnight(iv.scale_up_end)?)?;
        Ok(AttendanceIntervention::new(config.scenario, window, start, conditional_attendance(end_p, multiplier)?))
    }

    pub fn scenario(&self) -> Scenario {
        self.scenario
    }

    pub fn window(&self) -> ScaleUpWindow {
        self.window
    }

    pub fn full_differential(&self) -> ConditionalAttendance {
        self.differential
    }

    /// Additive change to the attendance probability at `now`.
    pub fn adjustment(&self, now: Timestamp, attended_previous: bool) -> f64 {
        match self.scenario {
            Scenario::Baseline => 0.0,
            Scenario::Alternative => self.window.progress(now) * self.differential.get(attended_previous),
        }
    }

    /// Pipeline value with the adjustment applied, kept in `[0, 1]`.
    pub fn adjust(&self, now: Timestamp, attended_previous: bool, base: f64) -> f64 {
        (base + self.adjustment(now, attended_previous)).clamp(0.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;
    use crate::types::{date, days};

    fn window() -> ScaleUpWindow {
        ScaleUpWindow::new(date(2021, 1, 1).unwrap(), date(2031, 1, 1).unwrap()).unwrap()
    }

    fn intervention(scenario: Scenario) -> AttendanceIntervention {
        let start = conditional_attendance(0.25, 1.89).unwrap();
        let end = conditional_attendance(0.75, 1.89).unwrap();
        AttendanceIntervention::new(scenario, window(), start, end)
    }

    #[test]
    fn conditional_split_recovers_population_ratio() {
        let c = conditional_attendance(0.25, 1.89).unwrap();
        assert_relative_eq!(c.attended_previous / c.not_attended_previous, 1.89, epsilon = 1e-12);
        assert_relative_eq!(c.not_attended_previous, 0.25 / (1.0 + 0.25 * 0.89), epsilon = 1e-12);
    }

    #[test]
    fn multiplier_of_one_leaves_p_unchanged() {
        let c = conditional_attendance(0.4, 1.0).unwrap();
        assert_relative_eq!(c.attended_previous, 0.4);
        assert_relative_eq!(c.not_attended_previous, 0.4);
    }

    #[test]
    fn invalid_attendance_inputs_are_errors() {
        assert!(conditional_attendance(1.2, 1.5).is_err());
        assert!(conditional_attendance(0.5, -1.0).is_err());
    }

    #[test]
    fn baseline_adjustment_is_always_zero() {
        let iv = intervention(Scenario::Baseline);
        for year in [2000, 2021, 2026, 2031, 2060] {
            let t = date(year, 6, 1).unwrap();
            assert_eq!(iv.adjustment(t, true), 0.0);
            assert_eq!(iv.adjust(t, false, 0.3), 0.3);
        }
    }

    #[test]
    fn alternative_ramp_is_linear() {
        let iv = intervention(Scenario::Alternative);
        let full = iv.full_differential();
        let w = iv.window();

        assert_eq!(iv.adjustment(date(2020, 6, 1).unwrap(), true), 0.0);
        assert_eq!(iv.adjustment(date(2021, 1, 1).unwrap(), true), 0.0);

        let start = date(2021, 1, 1).unwrap();
        let end = date(2031, 1, 1).unwrap();
        let midpoint = start + days(to_days(end - start) / 2.0);
        assert_relative_eq!(w.progress(midpoint), 0.5, epsilon = 1e-9);
        assert_relative_eq!(iv.adjustment(midpoint, true), full.attended_previous / 2.0, epsilon = 1e-9);
        assert_relative_eq!(iv.adjustment(midpoint, false), full.not_attended_previous / 2.0, epsilon = 1e-9);

        assert_eq!(iv.adjustment(end, false), full.not_attended_previous);
        assert_eq!(iv.adjustment(date(2040, 1, 1).unwrap(), true), full.attended_previous);
    }

    #[test]
    fn differential_is_positive_when_goal_rises() {
        let d = intervention(Scenario::Alternative).full_differential();
        assert!(d.attended_previous > 0.0 && d.not_attended_previous > 0.0);
    }

    #[test]
    fn empty_window_is_rejected() {
        let t = date(2021, 1, 1).unwrap();
        assert!(ScaleUpWindow::new(t, t).is_err());
    }
}
