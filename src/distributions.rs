use rand_distr::{Distribution, LogNormal};
use serde::{Deserialize, Serialize};
use statrs::distribution::{ContinuousCDF, Normal};

use crate::error::{ModelError, ModelResult};
use crate::randomness::parameter_rng;
use crate::types::DrawIndex;

/// Keep inverse-CDF inputs off the singular endpoints.
const QUANTILE_EPS: f64 = 1e-12;

/// Normal distribution truncated to `[lower, upper]`. A missing bound is
/// unbounded on that side. `sd == 0` is a point mass at `mean`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TruncnormDist {
    pub mean: f64,
    pub sd: f64,
    #[serde(default)]
    pub lower: Option<f64>,
    #[serde(default)]
    pub upper: Option<f64>,
}

impl TruncnormDist {
    pub fn new(mean: f64, sd: f64, lower: Option<f64>, upper: Option<f64>) -> Self {
        TruncnormDist { mean, sd, lower, upper }
    }

    /// Point mass, for parameters without uncertainty.
    pub fn fixed(value: f64) -> Self {
        TruncnormDist { mean: value, sd: 0.0, lower: None, upper: None }
    }

    /// Bounded to `[0, 1]`, the usual shape for a probability parameter.
    pub fn probability(mean: f64, sd: f64) -> Self {
        TruncnormDist { mean, sd, lower: Some(0.0), upper: Some(1.0) }
    }

    pub fn validate(&self, name: &str) -> ModelResult<()> {
        if !self.mean.is_finite() || !self.sd.is_finite() || self.sd < 0.0 {
            return Err(ModelError::config(format!(
                "{name}: mean {} / sd {} must be finite with sd >= 0",
                self.mean, self.sd
            )));
        }
        if let (Some(lo), Some(hi)) = (self.lower, self.upper)
            && lo >= hi
        {
            return Err(ModelError::config(format!(
                "{name}: lower bound {lo} must be below upper bound {hi}"
            )));
        }
        Ok(())
    }

    fn bounds(&self) -> (f64, f64) {
        (self.lower.unwrap_or(f64::NEG_INFINITY), self.upper.unwrap_or(f64::INFINITY))
    }

    /// Inverse CDF. `q` outside `[0, 1]` is clamped.
    pub fn ppf(&self, q: f64) -> f64 {
        let (lo, hi) = self.bounds();
        if self.sd == 0.0 {
            return self.mean.clamp(lo, hi);
        }
        let std = Normal::standard();
        let a = std.cdf((lo - self.mean) / self.sd);
        let b = std.cdf((hi - self.mean) / self.sd);
        let p = (a + q.clamp(0.0, 1.0) * (b - a)).clamp(QUANTILE_EPS, 1.0 - QUANTILE_EPS);
        (self.mean + self.sd * std.inverse_cdf(p)).clamp(lo, hi)
    }

    /// The single value this parameter takes in replicate `draw`.
    pub fn get_random_variable(&self, key: &str, draw: DrawIndex) -> f64 {
        if self.sd == 0.0 {
            return self.mean;
        }
        let mut rng = parameter_rng(key, draw);
        let q: f64 = rand::Rng::random(&mut rng);
        self.ppf(q)
    }
}

/// Log-normal parametrised by its natural-scale mean and standard deviation,
/// used for relative risks with asymmetric confidence intervals.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogNormalDist {
    pub mean: f64,
    pub sd: f64,
}

impl LogNormalDist {
    pub fn new(mean: f64, sd: f64) -> Self {
        LogNormalDist { mean, sd }
    }

    /// (mu, sigma) of the underlying normal.
    pub fn log_params(&self) -> (f64, f64) {
        let sigma2 = (1.0 + (self.sd * self.sd) / (self.mean * self.mean)).ln();
        (self.mean.ln() - sigma2 / 2.0, sigma2.sqrt())
    }

    pub fn validate(&self, name: &str) -> ModelResult<()> {
        if !(self.mean > 0.0 && self.mean.is_finite()) || !(self.sd >= 0.0 && self.sd.is_finite()) {
            return Err(ModelError::config(format!(
                "{name}: log-normal needs mean > 0 and sd >= 0, got mean {} sd {}",
                self.mean, self.sd
            )));
        }
        Ok(())
    }

    pub fn get_random_variable(&self, key: &str, draw: DrawIndex) -> ModelResult<f64> {
        if self.sd == 0.0 {
            return Ok(self.mean);
        }
        let (mu, sigma) = self.log_params();
        let dist = LogNormal::new(mu, sigma).map_err(|_| ModelError::numeric(key, sigma))?;
        Ok(dist.sample(&mut parameter_rng(key, draw)))
    }
}
