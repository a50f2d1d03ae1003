//! Valuation and flow summaries for a finished run.

use serde::Serialize;

use crate::engine::TradeKind;
use crate::simulator::SimulationRun;

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SimulationMetrics {
    pub initial_valuation: f64,
    pub final_valuation: f64,
    pub net_change_valuation: f64,
    /// Net change over initial valuation, not annualized
    pub simple_return: f64,
    /// Net change with the final over-collateralization (Su - Xr) removed
    pub net_change_excl_extra: f64,
    pub simple_return_excl_extra: f64,
    /// Su end minus Su start
    pub net_flow: f64,
    /// Sum of |ΔSu| over every step
    pub total_flow: f64,
    pub tx_count: usize,
    pub expansion_count: usize,
    pub contraction_count: usize,
    pub failed_count: usize,
}

pub fn compute_metrics(run: &SimulationRun) -> SimulationMetrics {
    let initial = &run.initial;
    let last = run.final_step();

    let initial_valuation = initial.lp_valuation();
    let final_valuation = last.lp_valuation();
    let net_change_valuation = final_valuation - initial_valuation;

    let final_extra = last.total_collateral_usd - last.reserve_usd;
    let net_change_excl_extra = final_valuation - final_extra - initial_valuation;

    let mut total_flow = 0.0;
    let mut prev_su = initial.total_collateral_usd;
    for step in &run.steps {
        total_flow += (step.total_collateral_usd - prev_su).abs();
        prev_su = step.total_collateral_usd;
    }

    let mut expansion_count = 0;
    let mut contraction_count = 0;
    let mut failed_count = 0;
    for trade in run.trades() {
        match trade.kind {
            TradeKind::Expansion => expansion_count += 1,
            TradeKind::Contraction => contraction_count += 1,
        }
        if !trade.is_success() {
            failed_count += 1;
        }
    }

    SimulationMetrics {
        initial_valuation,
        final_valuation,
        net_change_valuation,
        simple_return: net_change_valuation / initial_valuation,
        net_change_excl_extra,
        simple_return_excl_extra: net_change_excl_extra / initial_valuation,
        net_flow: last.total_collateral_usd - initial.total_collateral_usd,
        total_flow,
        tx_count: expansion_count + contraction_count,
        expansion_count,
        contraction_count,
        failed_count,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::SimulationParams;
    use crate::simulator::run_simulation;

    #[test]
    fn test_idle_run_has_no_change() {
        let params = SimulationParams { trades_per_day: 0, num_days: 10, ..Default::default() };
        let run = run_simulation(&params, &[150.0; 10]).unwrap();
        let metrics = compute_metrics(&run);

        assert_eq!(metrics.net_change_valuation, 0.0);
        assert_eq!(metrics.net_flow, 0.0);
        assert_eq!(metrics.total_flow, 0.0);
        assert_eq!(metrics.tx_count, 0);
    }

    #[test]
    fn test_flows_bound_each_other() {
        let params = SimulationParams { trades_per_day: 10, num_days: 30, seed: Some(3), ..Default::default() };
        let run = run_simulation(&params, &[150.0; 30]).unwrap();
        let metrics = compute_metrics(&run);

        assert!(metrics.total_flow >= metrics.net_flow.abs());
        assert_eq!(metrics.tx_count, 300);
        assert_eq!(metrics.expansion_count + metrics.contraction_count, 300);
        assert!((metrics.simple_return - metrics.net_change_valuation / metrics.initial_valuation).abs() < 1e-15);
    }

    #[test]
    fn test_expansion_only_flow_is_net_deposits() {
        let params = SimulationParams {
            trade_prob_forward: 1.0,
            trades_per_day: 4,
            num_days: 5,
            seed: Some(21),
            ..Default::default()
        };
        let run = run_simulation(&params, &[150.0; 5]).unwrap();
        let metrics = compute_metrics(&run);

        let deposited: f64 = run
            .trades()
            .filter(|t| t.is_success())
            .map(|t| t.amount_in - t.fee)
            .sum();
        assert!((metrics.net_flow - deposited).abs() < 1e-6);
        assert!((metrics.total_flow - deposited).abs() < 1e-6);
    }
}
