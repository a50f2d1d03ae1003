//! Run configuration.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{require_positive, Result, SimulationError};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SimulationParams {
    #[serde(rename = "initialLiquidityUSD")]
    pub initial_liquidity_usd: f64,
    pub initial_premium: f64,
    /// Probability that a trade slot is an expansion
    pub trade_prob_forward: f64,
    pub trades_per_day: usize,
    pub fee_rate: f64,
    pub num_days: usize,
    pub seed: Option<u64>,
}

impl Default for SimulationParams {
    fn default() -> Self {
        Self {
            initial_liquidity_usd: 1_000_000.0,
            initial_premium: 0.15,
            trade_prob_forward: 0.5,
            trades_per_day: 1,
            fee_rate: 0.001,
            num_days: 365,
            seed: None,
        }
    }
}

impl SimulationParams {
    /// Reads params from a TOML file; missing keys keep their defaults.
    pub fn from_toml_file(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        let params: Self = toml::from_str(&text)?;
        params.validate()?;
        Ok(params)
    }

    pub fn validate(&self) -> Result<()> {
        require_positive("initial_liquidity_usd", self.initial_liquidity_usd)?;
        require_positive("initial_premium", self.initial_premium)?;
        if self.initial_premium > 1.0 {
            return Err(SimulationError::InvalidParameter {
                name: "initial_premium",
                value: self.initial_premium,
            });
        }
        if !(0.0..=1.0).contains(&self.trade_prob_forward) {
            return Err(SimulationError::InvalidParameter {
                name: "trade_prob_forward",
                value: self.trade_prob_forward,
            });
        }
        if !(0.0..1.0).contains(&self.fee_rate) {
            return Err(SimulationError::InvalidParameter {
                name: "fee_rate",
                value: self.fee_rate,
            });
        }
        Ok(())
    }

    /// Copy with the batch-swept fields replaced.
    pub fn with_cell(&self, bias: f64, trades_per_day: usize, fee_rate: f64, seed: u64) -> Self {
        Self {
            trade_prob_forward: bias,
            trades_per_day,
            fee_rate,
            seed: Some(seed),
            ..self.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        assert!(SimulationParams::default().validate().is_ok());
    }

    #[test]
    fn test_out_of_range_rejected() {
        let bad_bias = SimulationParams { trade_prob_forward: 1.2, ..Default::default() };
        let bad_fee = SimulationParams { fee_rate: -0.01, ..Default::default() };
        let bad_capital = SimulationParams { initial_liquidity_usd: 0.0, ..Default::default() };

        assert!(bad_bias.validate().is_err());
        assert!(bad_fee.validate().is_err());
        assert!(bad_capital.validate().is_err());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let params: SimulationParams = toml::from_str("tradesPerDay = 30\nseed = 9\n").unwrap();
        assert_eq!(params.trades_per_day, 30);
        assert_eq!(params.seed, Some(9));
        assert_eq!(params.initial_premium, 0.15);
    }

    #[test]
    fn test_with_cell_overrides_swept_fields_only() {
        let base = SimulationParams { num_days: 90, ..Default::default() };
        let cell = base.with_cell(0.8, 60, 0.0005, 17);

        assert_eq!(cell.trade_prob_forward, 0.8);
        assert_eq!(cell.trades_per_day, 60);
        assert_eq!(cell.fee_rate, 0.0005);
        assert_eq!(cell.seed, Some(17));
        assert_eq!(cell.num_days, 90);
    }
}
