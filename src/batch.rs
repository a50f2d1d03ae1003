//! Batch Monte Carlo sweep
//!
//! Sweeps the Cartesian grid of market bias × daily volume × fee rate and
//! runs a fixed number of independent trials per cell.
//!
//! ## Seeding
//! Trial `t` of cell `c` uses seed `t + c * trials_per_cell`, so no two
//! trials anywhere in the sweep share a random stream.
//!
//! ## Per-Cell Statistics
//! - Mean, median, min, max and stddev of the annualized percent return
//! - Mean buffer-excluded return
//! - Win rate (share of trials with positive profit)
//! - Mean valuation components and flow / activity counters

use std::ops::ControlFlow;

use log::info;
use serde::{Deserialize, Serialize};

use crate::error::{Result, SimulationError};
use crate::metrics::compute_metrics;
use crate::params::SimulationParams;
use crate::prices::validate_run_window;
use crate::simulator::{run_simulation, SimulationRun};

pub const DEFAULT_BIAS_OPTIONS: [f64; 4] = [0.2, 0.4, 0.6, 0.8];
pub const VOLUME_OPTIONS: [usize; 2] = [30, 60];
pub const FEE_OPTIONS: [f64; 2] = [0.0005, 0.0010];
pub const TRIALS_PER_CELL: usize = 30;
const PROGRESS_EVERY: usize = 5;
const DAYS_PER_YEAR: f64 = 365.0;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    pub bias_options: Vec<f64>,
    pub volume_options: Vec<usize>,
    pub fee_options: Vec<f64>,
    pub trials_per_cell: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            bias_options: DEFAULT_BIAS_OPTIONS.to_vec(),
            volume_options: VOLUME_OPTIONS.to_vec(),
            fee_options: FEE_OPTIONS.to_vec(),
            trials_per_cell: TRIALS_PER_CELL,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct GridCell {
    pub index: usize,
    pub trade_prob_forward: f64,
    pub trades_per_day: usize,
    pub fee_rate: f64,
}

impl GridCell {
    pub fn id(&self) -> String {
        format!(
            "Bias:{:.0}% Vol:{} Fee:{:.2}%",
            self.trade_prob_forward * 100.0,
            self.trades_per_day,
            self.fee_rate * 100.0
        )
    }
}

impl BatchConfig {
    /// Cells in bias-major, then volume, then fee order.
    pub fn cells(&self) -> Vec<GridCell> {
        let mut cells = Vec::new();
        for &bias in &self.bias_options {
            for &volume in &self.volume_options {
                for &fee in &self.fee_options {
                    cells.push(GridCell {
                        index: cells.len(),
                        trade_prob_forward: bias,
                        trades_per_day: volume,
                        fee_rate: fee,
                    });
                }
            }
        }
        cells
    }

    pub fn total_trials(&self) -> usize {
        self.bias_options.len() * self.volume_options.len() * self.fee_options.len() * self.trials_per_cell
    }

    pub fn trial_seed(&self, cell_index: usize, trial_index: usize) -> u64 {
        (trial_index + cell_index * self.trials_per_cell) as u64
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TrialResult {
    pub id: usize,
    pub seed: u64,
    /// Net change over initial valuation, fraction
    pub simple_return: f64,
    /// `simple_return` scaled to a year of simulated days
    pub annualized_return: f64,
    pub profit: f64,
    pub initial_valuation: f64,
    pub final_valuation: f64,

    pub final_buffer: f64,
    pub final_pool_value: f64,
    pub final_pool_value_fiat: f64,
    pub final_pool_value_reserve: f64,
    pub final_holdings_value: f64,
    pub total_fees: f64,

    pub profit_excl_buffer: f64,
    pub final_valuation_excl_buffer: f64,
    pub annualized_return_excl_buffer: f64,

    pub days_run: usize,
    pub net_flow: f64,
    pub total_flow: f64,
    pub tx_count: usize,
    pub expansion_count: usize,
    pub contraction_count: usize,
    pub start_price: f64,
    pub end_price: f64,
}

impl TrialResult {
    pub fn from_run(id: usize, seed: u64, run: &SimulationRun) -> Self {
        let metrics = compute_metrics(run);
        let last = run.final_step();

        let days_run = last.day.max(1);
        let years = days_run as f64 / DAYS_PER_YEAR;

        let initial_valuation = metrics.initial_valuation;
        let profit = metrics.net_change_valuation;
        let buffer = last.backing_buffer_usd;
        let profit_excl_buffer = profit - buffer;

        Self {
            id,
            seed,
            simple_return: metrics.simple_return,
            annualized_return: metrics.simple_return / years,
            profit,
            initial_valuation,
            final_valuation: metrics.final_valuation,
            final_buffer: buffer,
            final_pool_value: last.valuation.pool,
            final_pool_value_fiat: last.valuation.pool_fiat,
            final_pool_value_reserve: last.valuation.pool_reserve,
            final_holdings_value: last.valuation.lp_holdings,
            total_fees: last.fees_collected,
            profit_excl_buffer,
            final_valuation_excl_buffer: metrics.final_valuation - buffer,
            annualized_return_excl_buffer: (profit_excl_buffer / initial_valuation) / years,
            days_run,
            net_flow: metrics.net_flow,
            total_flow: metrics.total_flow,
            tx_count: metrics.tx_count,
            expansion_count: metrics.expansion_count,
            contraction_count: metrics.contraction_count,
            start_price: run.steps.first().unwrap_or(&run.initial).oracle_price,
            end_price: last.oracle_price,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct ScenarioStats {
    pub avg_return_pct: f64,
    pub median_return_pct: f64,
    pub min_return_pct: f64,
    pub max_return_pct: f64,
    pub std_dev_return_pct: f64,
    pub avg_return_excl_buffer_pct: f64,
    pub avg_profit: f64,
    /// Percent of trials with positive profit
    pub win_rate: f64,
    pub avg_days_run: f64,
    pub avg_initial_valuation: f64,

    pub avg_final_buffer: f64,
    pub avg_final_pool_value: f64,
    pub avg_final_pool_value_fiat: f64,
    pub avg_final_pool_value_reserve: f64,
    pub avg_final_holdings_value: f64,
    pub avg_total_fees: f64,
    pub avg_net_flow: f64,
    pub avg_total_flow: f64,
    pub avg_tx_count: f64,
    pub avg_expansion_count: f64,
    pub avg_contraction_count: f64,
}

impl ScenarioStats {
    pub fn from_trials(trials: &[TrialResult]) -> Self {
        if trials.is_empty() {
            return Self::default();
        }

        let mut returns: Vec<f64> = trials.iter().map(|t| t.annualized_return * 100.0).collect();
        returns.sort_by(|a, b| a.total_cmp(b));
        let avg_return_pct = mean(&returns);

        let avg = |f: fn(&TrialResult) -> f64| trials.iter().map(f).sum::<f64>() / trials.len() as f64;

        Self {
            avg_return_pct,
            median_return_pct: returns[returns.len() / 2],
            min_return_pct: returns[0],
            max_return_pct: returns[returns.len() - 1],
            std_dev_return_pct: std_dev(&returns, avg_return_pct),
            avg_return_excl_buffer_pct: avg(|t| t.annualized_return_excl_buffer) * 100.0,
            avg_profit: avg(|t| t.profit),
            win_rate: trials.iter().filter(|t| t.profit > 0.0).count() as f64 / trials.len() as f64 * 100.0,
            avg_days_run: avg(|t| t.days_run as f64),
            avg_initial_valuation: avg(|t| t.initial_valuation),
            avg_final_buffer: avg(|t| t.final_buffer),
            avg_final_pool_value: avg(|t| t.final_pool_value),
            avg_final_pool_value_fiat: avg(|t| t.final_pool_value_fiat),
            avg_final_pool_value_reserve: avg(|t| t.final_pool_value_reserve),
            avg_final_holdings_value: avg(|t| t.final_holdings_value),
            avg_total_fees: avg(|t| t.total_fees),
            avg_net_flow: avg(|t| t.net_flow),
            avg_total_flow: avg(|t| t.total_flow),
            avg_tx_count: avg(|t| t.tx_count as f64),
            avg_expansion_count: avg(|t| t.expansion_count as f64),
            avg_contraction_count: avg(|t| t.contraction_count as f64),
        }
    }

    pub fn print(&self) {
        println!("  Avg return (ann.):       {:.2}%", self.avg_return_pct);
        println!("  Median / min / max:      {:.2}% / {:.2}% / {:.2}%", self.median_return_pct, self.min_return_pct, self.max_return_pct);
        println!("  Return stddev:           {:.2}%", self.std_dev_return_pct);
        println!("  Avg return excl buffer:  {:.2}%", self.avg_return_excl_buffer_pct);
        println!("  Win rate:                {:.1}%", self.win_rate);
        println!("  Avg profit:              ${:.0}", self.avg_profit);
        println!("  Avg buffer:              ${:.0}", self.avg_final_buffer);
        println!("  Avg fees:                ${:.0}", self.avg_total_fees);
        println!("  Avg net / total flow:    ${:.0} / ${:.0}", self.avg_net_flow, self.avg_total_flow);
        println!("  Avg trades (exp/con):    {:.1} ({:.1}/{:.1})", self.avg_tx_count, self.avg_expansion_count, self.avg_contraction_count);
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct ScenarioResult {
    pub id: String,
    pub cell: GridCell,
    pub trials: usize,
    pub stats: ScenarioStats,
    pub trials_data: Vec<TrialResult>,
    /// Sorted annualized percent returns
    pub raw_returns: Vec<f64>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct BatchProgress {
    pub percent: u32,
    pub completed: usize,
    pub total: usize,
    pub scenario: String,
}

pub(crate) fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Population standard deviation around `mean`.
pub(crate) fn std_dev(values: &[f64], mean: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / values.len() as f64;
    variance.sqrt()
}

/// Runs the whole grid. `on_progress` fires every five trials and once at
/// the end; returning `ControlFlow::Break` stops the sweep before the next
/// trial.
pub fn run_batch<F>(
    base: &SimulationParams,
    prices: &[f64],
    config: &BatchConfig,
    mut on_progress: F,
) -> Result<Vec<ScenarioResult>>
where
    F: FnMut(&BatchProgress) -> ControlFlow<()>,
{
    base.validate()?;
    validate_run_window(prices, base.num_days)?;
    if config.trials_per_cell == 0 {
        return Err(SimulationError::InvalidParameter { name: "trials_per_cell", value: 0.0 });
    }

    let total = config.total_trials();
    let mut completed = 0;
    let mut results = Vec::new();

    for cell in config.cells() {
        let scenario = cell.id();
        let mut trials_data = Vec::with_capacity(config.trials_per_cell);

        for trial in 0..config.trials_per_cell {
            let seed = config.trial_seed(cell.index, trial);
            let params = base.with_cell(cell.trade_prob_forward, cell.trades_per_day, cell.fee_rate, seed);
            let run = run_simulation(&params, prices)?;
            trials_data.push(TrialResult::from_run(trial + 1, seed, &run));

            completed += 1;
            if completed % PROGRESS_EVERY == 0 {
                let progress = BatchProgress {
                    percent: ((completed as f64 / total as f64) * 100.0).round() as u32,
                    completed,
                    total,
                    scenario: scenario.clone(),
                };
                info!("batch progress {}% ({}/{}) {}", progress.percent, completed, total, scenario);
                if on_progress(&progress).is_break() {
                    return Err(SimulationError::Cancelled { completed });
                }
            }
        }

        let stats = ScenarioStats::from_trials(&trials_data);
        info!("{}: avg return {:.2}%, win rate {:.1}%", scenario, stats.avg_return_pct, stats.win_rate);

        let mut raw_returns: Vec<f64> = trials_data.iter().map(|t| t.annualized_return * 100.0).collect();
        raw_returns.sort_by(|a, b| a.total_cmp(b));

        results.push(ScenarioResult {
            id: scenario,
            cell,
            trials: config.trials_per_cell,
            stats,
            trials_data,
            raw_returns,
        });
    }

    // Final notification; cancellation no longer applies.
    let _ = on_progress(&BatchProgress {
        percent: 100,
        completed,
        total,
        scenario: "Complete".to_string(),
    });

    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn small_config() -> BatchConfig {
        BatchConfig {
            bias_options: vec![0.3, 0.7],
            volume_options: vec![2, 4],
            fee_options: vec![0.0005, 0.001],
            trials_per_cell: 3,
        }
    }

    fn small_params() -> SimulationParams {
        SimulationParams { num_days: 20, ..Default::default() }
    }

    #[test]
    fn test_default_grid_shape() {
        let config = BatchConfig::default();
        assert_eq!(config.cells().len(), 16);
        assert_eq!(config.total_trials(), 480);
        assert_eq!(config.cells()[0].id(), "Bias:20% Vol:30 Fee:0.05%");
        assert_eq!(config.cells()[15].id(), "Bias:80% Vol:60 Fee:0.10%");
    }

    #[test]
    fn test_seeds_unique_across_sweep() {
        let config = BatchConfig::default();
        let mut seeds = HashSet::new();
        for cell in config.cells() {
            for trial in 0..config.trials_per_cell {
                assert!(seeds.insert(config.trial_seed(cell.index, trial)));
            }
        }
        assert_eq!(seeds.len(), config.total_trials());
    }

    #[test]
    fn test_batch_runs_every_cell() {
        let config = small_config();
        let prices: Vec<f64> = (0..20).map(|d| 150.0 + d as f64 * 0.5).collect();
        let mut updates = Vec::new();

        let results = run_batch(&small_params(), &prices, &config, |p| {
            updates.push(p.clone());
            ControlFlow::Continue(())
        })
        .unwrap();

        assert_eq!(results.len(), 8);
        for scenario in &results {
            assert_eq!(scenario.trials_data.len(), 3);
            assert_eq!(scenario.raw_returns.len(), 3);
            assert!(scenario.stats.min_return_pct <= scenario.stats.median_return_pct);
            assert!(scenario.stats.median_return_pct <= scenario.stats.max_return_pct);
            assert!((0.0..=100.0).contains(&scenario.stats.win_rate));
        }

        // 24 trials => updates at 5, 10, 15, 20 plus the final one
        assert_eq!(updates.len(), 5);
        assert_eq!(updates.last().map(|p| p.percent), Some(100));
        assert_eq!(updates.last().map(|p| p.scenario.as_str()), Some("Complete"));

        let seeds: HashSet<u64> = results.iter().flat_map(|r| r.trials_data.iter().map(|t| t.seed)).collect();
        assert_eq!(seeds.len(), 24);
    }

    #[test]
    fn test_batch_is_reproducible() {
        let config = small_config();
        let prices = vec![150.0; 20];
        let a = run_batch(&small_params(), &prices, &config, |_| ControlFlow::Continue(())).unwrap();
        let b = run_batch(&small_params(), &prices, &config, |_| ControlFlow::Continue(())).unwrap();

        for (x, y) in a.iter().zip(&b) {
            assert_eq!(x.trials_data, y.trials_data);
        }
    }

    #[test]
    fn test_cancel_between_trials() {
        let config = small_config();
        let err = run_batch(&small_params(), &[150.0; 20], &config, |_| ControlFlow::Break(())).unwrap_err();
        assert!(matches!(err, SimulationError::Cancelled { completed: 5 }));
    }

    #[test]
    fn test_bad_price_past_the_run_is_ignored() {
        let config = BatchConfig { trials_per_cell: 1, ..small_config() };
        let mut prices = vec![150.0; 20];
        prices.push(f64::NAN);

        let results = run_batch(&small_params(), &prices, &config, |_| ControlFlow::Continue(())).unwrap();
        assert_eq!(results.len(), 8);

        prices[5] = -1.0;
        let err = run_batch(&small_params(), &prices, &config, |_| ControlFlow::Continue(())).unwrap_err();
        assert!(matches!(err, SimulationError::InvalidPrice { day: 5, .. }));
    }

    #[test]
    fn test_trial_annualization_uses_elapsed_days() {
        let params = SimulationParams { num_days: 73, trades_per_day: 5, seed: Some(4), ..Default::default() };
        let run = run_simulation(&params, &vec![150.0; 73]).unwrap();
        let trial = TrialResult::from_run(1, 4, &run);

        assert_eq!(trial.days_run, 72);
        let years = 72.0 / 365.0;
        assert!((trial.annualized_return - trial.simple_return / years).abs() < 1e-12);
        assert!((trial.profit_excl_buffer - (trial.profit - trial.final_buffer)).abs() < 1e-9);
        assert!((trial.final_pool_value - (trial.final_pool_value_fiat + trial.final_pool_value_reserve)).abs() < 1e-6);
    }

    #[test]
    fn test_stats_on_known_returns() {
        let trial = |id: usize, ret: f64, profit: f64| TrialResult {
            id,
            seed: id as u64,
            simple_return: ret,
            annualized_return: ret,
            profit,
            initial_valuation: 100.0,
            final_valuation: 100.0 + profit,
            final_buffer: 0.0,
            final_pool_value: 0.0,
            final_pool_value_fiat: 0.0,
            final_pool_value_reserve: 0.0,
            final_holdings_value: 0.0,
            total_fees: 0.0,
            profit_excl_buffer: profit,
            final_valuation_excl_buffer: 100.0 + profit,
            annualized_return_excl_buffer: ret,
            days_run: 365,
            net_flow: 0.0,
            total_flow: 0.0,
            tx_count: 2,
            expansion_count: 1,
            contraction_count: 1,
            start_price: 1.0,
            end_price: 1.0,
        };
        let trials = vec![trial(1, 0.10, 10.0), trial(2, -0.05, -5.0), trial(3, 0.01, 1.0), trial(4, 0.02, 2.0)];
        let stats = ScenarioStats::from_trials(&trials);

        assert!((stats.avg_return_pct - 2.0).abs() < 1e-9);
        // upper middle of [-5, 1, 2, 10]
        assert!((stats.median_return_pct - 2.0).abs() < 1e-9);
        assert!((stats.min_return_pct + 5.0).abs() < 1e-9);
        assert!((stats.max_return_pct - 10.0).abs() < 1e-9);
        assert!((stats.win_rate - 75.0).abs() < 1e-9);
        assert!((stats.std_dev_return_pct - 28.5_f64.sqrt()).abs() < 1e-9);
    }
}
