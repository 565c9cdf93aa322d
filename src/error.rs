use thiserror::Error;

use crate::tables::RateKey;

pub type ModelResult<T> = Result<T, ModelError>;

/// Fatal model errors. Nothing here is retried: a misconfigured or
/// numerically corrupted run is aborted.
#[derive(Debug, Error)]
pub enum ModelError {
    /// Setup-time configuration problem.
    #[error("configuration error: {message}")]
    Config { message: String },

    /// A transition or component needs a table that was not supplied.
    #[error("no rate table loaded for {0}")]
    MissingTable(RateKey),

    /// A rate, probability or distribution parameter left its domain.
    #[error("numeric error in {context}: {value}")]
    Numeric { context: String, value: f64 },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ModelError {
    pub fn config(message: impl Into<String>) -> Self {
        ModelError::Config { message: message.into() }
    }

    pub fn numeric(context: impl Into<String>, value: f64) -> Self {
        ModelError::Numeric { context: context.into(), value }
    }
}

/// Reject NaN, infinities and negative values for a rate.
pub fn check_rate(context: &str, value: f64) -> ModelResult<f64> {
    if value.is_finite() && value >= 0.0 {
        Ok(value)
    } else {
        Err(ModelError::numeric(context, value))
    }
}

/// Reject anything outside `[0, 1]`.
pub fn check_probability(context: &str, value: f64) -> ModelResult<f64> {
    if value.is_finite() && (0.0..=1.0).contains(&value) {
        Ok(value)
    } else {
        Err(ModelError::numeric(context, value))
    }
}
