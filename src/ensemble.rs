//! Single-scenario Monte Carlo ensemble
//!
//! Runs one parameter set many times with scattered seeds and aggregates the
//! paths step by step (median / min / max bands), plus an end-of-run summary.

use serde::Serialize;

use crate::batch::{mean, std_dev};
use crate::engine::SimulationStep;
use crate::error::Result;
use crate::params::SimulationParams;
use crate::prices::validate_run_window;
use crate::simulator::{run_simulation, SimulationRun};

pub const DEFAULT_BASE_SEED: u64 = 123_456;
/// Prime stride between trial seeds.
pub const SEED_STRIDE: u64 = 7_919;

#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct Band {
    pub median: f64,
    pub min: f64,
    pub max: f64,
}

impl Band {
    /// Band over unsorted values; `None` when empty.
    pub fn of(values: &mut [f64]) -> Option<Self> {
        if values.is_empty() {
            return None;
        }
        values.sort_by(|a, b| a.total_cmp(b));
        let n = values.len();
        let median = if n % 2 == 1 {
            values[n / 2]
        } else {
            (values[n / 2 - 1] + values[n / 2]) / 2.0
        };
        Some(Self { median, min: values[0], max: values[n - 1] })
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct EnsembleStep {
    pub day: usize,
    pub oracle_price: f64,
    pub lp_valuation: Band,
    pub reserve_usd: Band,
    pub wallet_fiat: Band,
    /// Omega = Su / Xr
    pub system_health: Band,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct EnsembleSummary {
    /// Fraction of trials ending above their initial valuation
    pub win_rate: f64,
    pub avg_return: f64,
    pub worst_return: f64,
    /// Population stddev of final valuations
    pub volatility: f64,
}

#[derive(Clone, Debug, Serialize)]
pub struct EnsembleResult {
    pub aggregated_steps: Vec<EnsembleStep>,
    pub summary: EnsembleSummary,
    pub trials: Vec<SimulationRun>,
}

pub fn trial_seed(base: Option<u64>, trial: usize) -> u64 {
    base.unwrap_or(DEFAULT_BASE_SEED)
        .wrapping_add(trial as u64 * SEED_STRIDE)
}

pub fn run_ensemble(params: &SimulationParams, prices: &[f64], num_trials: usize) -> Result<EnsembleResult> {
    validate_run_window(prices, params.num_days)?;

    let trials = (0..num_trials)
        .map(|i| {
            let trial_params = SimulationParams { seed: Some(trial_seed(params.seed, i)), ..params.clone() };
            run_simulation(&trial_params, prices)
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(EnsembleResult {
        aggregated_steps: aggregate_steps(&trials),
        summary: summarize(&trials),
        trials,
    })
}

/// Aggregates by step index over the steps every trial reached.
fn aggregate_steps(trials: &[SimulationRun]) -> Vec<EnsembleStep> {
    let Some(first) = trials.first() else {
        return Vec::new();
    };
    let shortest = trials.iter().map(|t| t.steps.len()).min().unwrap_or(0);

    (0..shortest)
        .filter_map(|i| {
            let column = |f: fn(&SimulationStep) -> f64| {
                trials.iter().map(|t| f(&t.steps[i])).collect::<Vec<f64>>()
            };
            Some(EnsembleStep {
                day: first.steps[i].day,
                oracle_price: first.steps[i].oracle_price,
                lp_valuation: Band::of(&mut column(|s| s.valuation.total))?,
                reserve_usd: Band::of(&mut column(|s| s.reserve_usd))?,
                wallet_fiat: Band::of(&mut column(|s| s.wallet_fiat))?,
                system_health: Band::of(&mut column(|s| s.health.omega))?,
            })
        })
        .collect()
}

fn summarize(trials: &[SimulationRun]) -> EnsembleSummary {
    if trials.is_empty() {
        return EnsembleSummary { win_rate: 0.0, avg_return: 0.0, worst_return: 0.0, volatility: 0.0 };
    }

    let finals: Vec<f64> = trials.iter().map(|t| t.final_step().lp_valuation()).collect();
    let returns: Vec<f64> = trials
        .iter()
        .zip(&finals)
        .map(|(t, v)| (v - t.initial.lp_valuation()) / t.initial.lp_valuation())
        .collect();

    let wins = returns.iter().filter(|r| **r > 0.0).count();
    let final_mean = mean(&finals);

    EnsembleSummary {
        win_rate: wins as f64 / trials.len() as f64,
        avg_return: mean(&returns),
        worst_return: returns.iter().cloned().fold(f64::INFINITY, f64::min),
        volatility: std_dev(&finals, final_mean),
    }
}
