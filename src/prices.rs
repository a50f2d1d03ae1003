//! Oracle price histories
//!
//! A history is an ordered list of `(date, price)` observations consumed by
//! index; there is no calendar gap-filling. Histories come from a local JSON
//! file or from a synthetic geometric Brownian motion path.
//!
//! ## JSON Layout
//! Either a bare array or an object wrapping it:
//!
//! ```json
//! [{ "date": "2020-01-02", "price": 360.5 }, ...]
//! { "data": [{ "date": "2020-01-02", "price": 360.5 }, ...] }
//! ```

use std::fs;
use std::path::Path;

use log::warn;
use rand::prelude::*;
use rand_distr::{Distribution, StandardNormal};
use serde::{Deserialize, Serialize};

use crate::error::{Result, SimulationError};

const PRICE_FLOOR: f64 = 1e-9;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PriceRecord {
    pub date: String,
    pub price: f64,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum HistoryFile {
    Bare(Vec<PriceRecord>),
    Wrapped { data: Vec<PriceRecord> },
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct PriceHistory {
    records: Vec<PriceRecord>,
}

impl PriceHistory {
    pub fn new(records: Vec<PriceRecord>) -> Self {
        Self { records }
    }

    /// Undated series, labelled `Day N`.
    pub fn from_prices(prices: &[f64]) -> Self {
        let records = prices
            .iter()
            .enumerate()
            .map(|(day, &price)| PriceRecord { date: format!("Day {}", day), price })
            .collect();
        Self { records }
    }

    pub fn from_json_str(text: &str) -> Result<Self> {
        let records = match serde_json::from_str::<HistoryFile>(text)? {
            HistoryFile::Bare(records) => records,
            HistoryFile::Wrapped { data } => data,
        };
        Ok(Self { records })
    }

    pub fn load_json(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    pub fn records(&self) -> &[PriceRecord] {
        &self.records
    }

    pub fn prices(&self) -> Vec<f64> {
        self.records.iter().map(|r| r.price).collect()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn date_of(&self, day: usize) -> Option<&str> {
        self.records.get(day).map(|r| r.date.as_str())
    }

    /// `num_days` records starting at the first one dated on or after
    /// `start_date` (ISO dates compare lexically). Falls back to the start of
    /// the history when no record qualifies, and returns whatever remains when
    /// fewer than `num_days` are left.
    pub fn window(&self, start_date: &str, num_days: usize) -> Self {
        let start = self
            .records
            .iter()
            .position(|r| r.date.as_str() >= start_date)
            .unwrap_or(0);
        let end = (start + num_days).min(self.records.len());

        if end - start < num_days {
            warn!(
                "price window from {} holds {} of {} requested days",
                start_date,
                end - start,
                num_days
            );
        }

        Self { records: self.records[start..end].to_vec() }
    }

    /// Fails on an empty series or on any price that is not finite and positive.
    pub fn validate(&self) -> Result<()> {
        validate_prices(&self.prices())
    }
}

/// The prefix of `prices` a run of `num_days` replays (at least one day).
pub fn run_window(prices: &[f64], num_days: usize) -> &[f64] {
    &prices[..num_days.max(1).min(prices.len())]
}

/// Validates only the days a run of `num_days` will read.
pub fn validate_run_window(prices: &[f64], num_days: usize) -> Result<()> {
    validate_prices(run_window(prices, num_days))
}

pub fn validate_prices(prices: &[f64]) -> Result<()> {
    if prices.is_empty() {
        return Err(SimulationError::EmptyPriceSeries);
    }
    for (day, &price) in prices.iter().enumerate() {
        if !price.is_finite() || price <= 0.0 {
            return Err(SimulationError::InvalidPrice { day, price });
        }
    }
    Ok(())
}

#[derive(Clone, Debug)]
pub struct SyntheticPathConfig {
    pub start_price: f64,
    pub days: usize,
    /// Annual drift (mu)
    pub drift: f64,
    /// Annual volatility (sigma)
    pub volatility: f64,
}

impl Default for SyntheticPathConfig {
    fn default() -> Self {
        Self {
            start_price: 150.0,
            days: 365,
            drift: 0.25,       // Steady depreciation of the pegged currency
            volatility: 0.30,
        }
    }
}

/// Daily GBM path with `days` observations, the first at `start_price`.
pub fn generate_price_path(config: &SyntheticPathConfig, rng: &mut impl Rng) -> Vec<f64> {
    let dt = 1.0 / 365.0;

    let mut prices = Vec::with_capacity(config.days);
    let mut price = config.start_price;

    for day in 0..config.days {
        if day > 0 {
            let z: f64 = StandardNormal.sample(rng);
            let ret = (config.drift - 0.5 * config.volatility.powi(2)) * dt
                + config.volatility * dt.sqrt() * z;
            price = (price * ret.exp()).max(PRICE_FLOOR);
        }
        prices.push(price);
    }

    prices
}
