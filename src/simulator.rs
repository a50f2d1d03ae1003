//! Path simulator
//!
//! Replays an oracle price series through the engine. Each day runs
//! `trades_per_day` slots; each slot draws a direction from the forward bias
//! and a size from Beta(0.25, 1), sampled by inverse transform as `u^4`.
//!
//! - Expansion: `max(1, x * 100_000)` USD
//! - Contraction: `x * 0.5 * Wf` fiat, clipped to `[0.01, Wf]`
//!
//! One snapshot is recorded per executed trade, or exactly one per day when
//! the day has no trade slots.

use log::debug;
use serde::Serialize;

use crate::engine::{SimulationStep, TradeOutcome, TradeRecord, VarqAmm};
use crate::error::Result;
use crate::params::SimulationParams;
use crate::prices::validate_run_window;
use crate::rng::{RandomSource, RngSource};

pub const EXPANSION_NOTIONAL_USD: f64 = 100_000.0;
pub const MIN_EXPANSION_USD: f64 = 1.0;
pub const MIN_CONTRACTION_FIAT: f64 = 0.01;
/// Share of the public float a single contraction may target.
pub const CONTRACTION_WALLET_SHARE: f64 = 0.5;

/// Inverse CDF of Beta(0.25, 1).
pub fn beta_quarter_sample(u: f64) -> f64 {
    u.powi(4)
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum TradeIntent {
    Expansion { amount_usd: f64 },
    Contraction { amount_fiat: f64, cap: f64 },
}

/// Draws one trade slot. `None` when there is nothing to sell.
pub fn sample_trade(
    rng: &mut impl RandomSource,
    trade_prob_forward: f64,
    wallet_fiat: f64,
) -> Option<TradeIntent> {
    let is_expansion = rng.next_uniform() < trade_prob_forward;
    let x = beta_quarter_sample(rng.next_uniform());

    if is_expansion {
        let amount_usd = (x * EXPANSION_NOTIONAL_USD).max(MIN_EXPANSION_USD);
        return Some(TradeIntent::Expansion { amount_usd });
    }

    let cap = CONTRACTION_WALLET_SHARE * wallet_fiat;
    let amount_fiat = (x * cap).max(MIN_CONTRACTION_FIAT).min(wallet_fiat);
    if amount_fiat <= 0.0 {
        return None;
    }
    Some(TradeIntent::Contraction { amount_fiat, cap })
}

#[derive(Clone, Debug, Serialize)]
pub struct SimulationRun {
    /// Day-0 state before any trade
    pub initial: SimulationStep,
    pub steps: Vec<SimulationStep>,
}

impl SimulationRun {
    /// Last recorded step, or the initial state for an empty run.
    pub fn final_step(&self) -> &SimulationStep {
        self.steps.last().unwrap_or(&self.initial)
    }

    pub fn trades(&self) -> impl Iterator<Item = &TradeRecord> {
        self.steps.iter().filter_map(|s| s.trade.as_ref())
    }
}

/// Runs with a generator seeded from `params.seed`, or from entropy.
pub fn run_simulation(params: &SimulationParams, prices: &[f64]) -> Result<SimulationRun> {
    let mut rng = RngSource::for_seed(params.seed);
    run_simulation_with(params, prices, &mut rng)
}

pub fn run_simulation_with(
    params: &SimulationParams,
    prices: &[f64],
    rng: &mut impl RandomSource,
) -> Result<SimulationRun> {
    params.validate()?;
    let days_to_run = params.num_days.min(prices.len());
    validate_run_window(prices, params.num_days)?;

    let initial_price = prices[0];
    let mut amm = VarqAmm::new(
        params.initial_liquidity_usd,
        initial_price,
        params.initial_premium,
        params.fee_rate,
    )?;
    let initial = amm.state(0, initial_price, None);

    let mut steps = Vec::with_capacity(days_to_run * params.trades_per_day.max(1));
    let mut failed = 0usize;

    for (day, &oracle_price) in prices.iter().enumerate().take(days_to_run) {
        if params.trades_per_day == 0 {
            steps.push(amm.state(day, oracle_price, None));
            continue;
        }

        for _ in 0..params.trades_per_day {
            let wallet_fiat = amm.ledger().wallet_fiat;
            let outcome: TradeOutcome = match sample_trade(rng, params.trade_prob_forward, wallet_fiat) {
                Some(TradeIntent::Expansion { amount_usd }) => amm.expansion(amount_usd, oracle_price),
                Some(TradeIntent::Contraction { amount_fiat, cap }) => {
                    amm.contraction_with_cap(amount_fiat, oracle_price, Some(cap))
                }
                None => continue,
            };

            if !outcome.success {
                failed += 1;
            }
            steps.push(amm.state(day, oracle_price, Some(&outcome.record)));
        }
    }

    debug!(
        "run finished: {} days, {} steps, {} rejected trades",
        days_to_run,
        steps.len(),
        failed
    );

    Ok(SimulationRun { initial, steps })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::TradeKind;
    use crate::error::SimulationError;
    use crate::rng::ScriptedSource;

    fn flat_prices(days: usize) -> Vec<f64> {
        vec![150.0; days]
    }

    #[test]
    fn test_beta_quarter_sample() {
        assert_eq!(beta_quarter_sample(0.5), 0.0625);
        assert_eq!(beta_quarter_sample(1.0), 1.0);
        assert_eq!(beta_quarter_sample(0.0), 0.0);
    }

    #[test]
    fn test_sample_trade_sizes() {
        // direction 0.1 < 0.5 => expansion, size 0.5^4 * 100k
        let mut rng = ScriptedSource::new(vec![0.1, 0.5]).unwrap();
        assert_eq!(
            sample_trade(&mut rng, 0.5, 1_000.0),
            Some(TradeIntent::Expansion { amount_usd: 6_250.0 })
        );

        // tiny draw clamps to the 1 USD floor
        let mut rng = ScriptedSource::new(vec![0.1, 0.001]).unwrap();
        assert_eq!(
            sample_trade(&mut rng, 0.5, 1_000.0),
            Some(TradeIntent::Expansion { amount_usd: 1.0 })
        );

        // direction 0.9 => contraction of 0.0625 * 0.5 * 1000
        let mut rng = ScriptedSource::new(vec![0.9, 0.5]).unwrap();
        assert_eq!(
            sample_trade(&mut rng, 0.5, 1_000.0),
            Some(TradeIntent::Contraction { amount_fiat: 31.25, cap: 500.0 })
        );
    }

    #[test]
    fn test_contraction_clipped_to_wallet() {
        let mut rng = ScriptedSource::new(vec![0.9, 0.0]).unwrap();
        assert_eq!(
            sample_trade(&mut rng, 0.5, 0.004),
            Some(TradeIntent::Contraction { amount_fiat: 0.004, cap: 0.002 })
        );

        let mut rng = ScriptedSource::new(vec![0.9, 0.3]).unwrap();
        assert_eq!(sample_trade(&mut rng, 0.5, 0.0), None);
    }

    #[test]
    fn test_one_step_per_trade() {
        let params = SimulationParams { trades_per_day: 3, num_days: 5, seed: Some(1), ..Default::default() };
        let run = run_simulation(&params, &flat_prices(10)).unwrap();

        assert_eq!(run.steps.len(), 15);
        assert!(run.steps.iter().all(|s| s.trade.is_some()));
        assert_eq!(run.steps.last().unwrap().day, 4);
    }

    #[test]
    fn test_zero_trades_records_one_step_per_day() {
        let params = SimulationParams { trades_per_day: 0, num_days: 4, seed: Some(1), ..Default::default() };
        let run = run_simulation(&params, &flat_prices(10)).unwrap();

        assert_eq!(run.steps.len(), 4);
        assert!(run.steps.iter().all(|s| s.trade.is_none()));
        assert_eq!(run.steps.iter().map(|s| s.day).collect::<Vec<_>>(), vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_days_bounded_by_series_length() {
        let params = SimulationParams { trades_per_day: 0, num_days: 365, ..Default::default() };
        let run = run_simulation(&params, &flat_prices(7)).unwrap();
        assert_eq!(run.steps.len(), 7);
    }

    #[test]
    fn test_seeded_runs_identical() {
        let params = SimulationParams { trades_per_day: 10, num_days: 30, seed: Some(42), ..Default::default() };
        let prices: Vec<f64> = (0..30).map(|d| 150.0 + d as f64).collect();

        let a = run_simulation(&params, &prices).unwrap();
        let b = run_simulation(&params, &prices).unwrap();
        assert_eq!(a.steps, b.steps);
    }

    #[test]
    fn test_bias_one_only_expands() {
        let params = SimulationParams { trade_prob_forward: 1.0, trades_per_day: 5, num_days: 10, seed: Some(5), ..Default::default() };
        let run = run_simulation(&params, &flat_prices(10)).unwrap();
        assert!(run.trades().all(|t| t.kind == TradeKind::Expansion));
    }

    #[test]
    fn test_empty_series_is_an_error() {
        let params = SimulationParams::default();
        assert!(matches!(run_simulation(&params, &[]), Err(SimulationError::EmptyPriceSeries)));
    }

    #[test]
    fn test_invalid_price_is_an_error() {
        let params = SimulationParams { num_days: 3, ..Default::default() };
        assert!(matches!(
            run_simulation(&params, &[150.0, f64::NAN, 150.0]),
            Err(SimulationError::InvalidPrice { day: 1, .. })
        ));
    }

    #[test]
    fn test_fiat_identity_holds_along_run() {
        let params = SimulationParams { trades_per_day: 20, num_days: 60, seed: Some(8), ..Default::default() };
        let prices: Vec<f64> = (0..60).map(|d| 150.0 * (1.0 + 0.01 * d as f64)).collect();
        let run = run_simulation(&params, &prices).unwrap();

        for step in &run.steps {
            let trade = step.trade.as_ref().unwrap();
            if trade.is_success() {
                let post = &trade.post;
                let sf = step.reserve_fiat + step.wallet_fiat + step.lp_excess_fiat + step.treasury_fiat;
                assert!((post.total_fiat - sf).abs() / sf < 1e-12);
            }
            assert!(step.reserve_usd > 0.0 && step.reserve_fiat > 0.0);
        }
    }
}
