//! Error types for the simulation library.
//!
//! Rejected trades are not errors: they come back as a failed
//! [`TradeOutcome`](crate::engine::TradeOutcome). Only degenerate
//! configuration and host-level failures end up here.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SimulationError {
    #[error("price series is empty")]
    EmptyPriceSeries,

    #[error("invalid oracle price {price} on day {day}")]
    InvalidPrice { day: usize, price: f64 },

    #[error("invalid parameter {name}: {value}")]
    InvalidParameter { name: &'static str, value: f64 },

    #[error("batch run cancelled after {completed} trials")]
    Cancelled { completed: usize },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("config error: {0}")]
    Config(#[from] toml::de::Error),
}

pub type Result<T> = std::result::Result<T, SimulationError>;

/// Rejects values that are NaN, infinite or not strictly positive.
pub(crate) fn require_positive(name: &'static str, value: f64) -> Result<f64> {
    if value.is_finite() && value > 0.0 {
        Ok(value)
    } else {
        Err(SimulationError::InvalidParameter { name, value })
    }
}
