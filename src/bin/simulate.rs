//! Single-Run Simulation Binary
//!
//! Replays one price window through the AMM and prints the valuation and
//! flow summary. With `--ensemble N` it also runs N seeded trials and
//! reports the spread.
//!
//! ## Usage
//! ```bash
//! cargo run --bin simulate --release -- --history data/NGN.json --start 2019-01-01 --bias 0.6
//! RUST_LOG=debug cargo run --bin simulate -- --trades-per-day 30 --output run.json
//! ```

mod common;

use std::fs::File;
use std::io::BufWriter;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use serde::Serialize;
use varq_simulation::{
    compute_metrics, run_ensemble, run_simulation, SimulationMetrics, SimulationParams,
    SimulationStep, VarqState,
};

#[derive(Parser, Debug)]
#[command(name = "simulate")]
#[command(about = "Replay an oracle price series through the Variable-Peg AMM", long_about = None)]
struct Cli {
    #[command(flatten)]
    input: common::InputArgs,

    /// Probability that a trade is an expansion
    #[arg(long)]
    bias: Option<f64>,

    /// Trades per day
    #[arg(long)]
    trades_per_day: Option<usize>,

    /// Fee rate (0.001 = 0.1%)
    #[arg(long)]
    fee: Option<f64>,

    /// Also run an ensemble of N trials
    #[arg(long)]
    ensemble: Option<usize>,

    /// Write the full run as JSON
    #[arg(short, long)]
    output: Option<PathBuf>,
}

#[derive(Serialize)]
struct DatedStep<'a> {
    date: &'a str,
    #[serde(flatten)]
    step: &'a SimulationStep,
}

#[derive(Serialize)]
struct Report<'a> {
    params: &'a SimulationParams,
    metrics: &'a SimulationMetrics,
    steps: Vec<DatedStep<'a>>,
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    let mut params = cli.input.params()?;
    if let Some(bias) = cli.bias {
        params.trade_prob_forward = bias;
    }
    if let Some(trades) = cli.trades_per_day {
        params.trades_per_day = trades;
    }
    if let Some(fee) = cli.fee {
        params.fee_rate = fee;
    }

    let history = cli.input.history(params.num_days, params.seed)?;
    let prices = history.prices();

    println!("=======================================================");
    println!("  Variable-Peg AMM Simulation");
    println!("=======================================================");
    println!();
    println!("Parameters:");
    println!("  Initial liquidity:  ${:.0}", params.initial_liquidity_usd);
    println!("  Premium:            {:.2}%", params.initial_premium * 100.0);
    println!("  Forward bias:       {:.0}%", params.trade_prob_forward * 100.0);
    println!("  Trades per day:     {}", params.trades_per_day);
    println!("  Fee rate:           {:.2}%", params.fee_rate * 100.0);
    println!(
        "  Window:             {} .. {} ({} days)",
        history.date_of(0).unwrap_or("-"),
        history.date_of(history.len().saturating_sub(1)).unwrap_or("-"),
        history.len()
    );
    println!();

    let run = run_simulation(&params, &prices).context("simulation failed")?;
    let metrics = compute_metrics(&run);
    let last = run.final_step();

    println!("Results");
    println!("{}", "-".repeat(50));
    println!("  Initial valuation:       ${:.0}", metrics.initial_valuation);
    println!("  Final valuation:         ${:.0}", metrics.final_valuation);
    println!("  Net change:              ${:.0}", metrics.net_change_valuation);
    println!("  Return:                  {:.2}%", metrics.simple_return * 100.0);
    println!("  Return excl extra:       {:.2}%", metrics.simple_return_excl_extra * 100.0);
    println!("  Net / total flow:        ${:.0} / ${:.0}", metrics.net_flow, metrics.total_flow);
    println!(
        "  Trades:                  {} ({} exp / {} con, {} rejected)",
        metrics.tx_count, metrics.expansion_count, metrics.contraction_count, metrics.failed_count
    );
    println!("  Fees collected:          ${:.0}", last.fees_collected);
    println!("  Backing buffer:          ${:.0}", last.backing_buffer_usd);
    println!(
        "  Final health:            {:?} ({}), Lambda {:.4}, Omega {:.4}",
        last.health.regime,
        last.health.regime.name(),
        last.health.lambda,
        last.health.omega
    );
    println!();

    print_regime_table(&run.steps);

    if let Some(trials) = cli.ensemble {
        let ensemble = run_ensemble(&params, &prices, trials).context("ensemble failed")?;
        println!("Ensemble ({} trials)", trials);
        println!("{}", "-".repeat(50));
        println!("  Win rate:                {:.1}%", ensemble.summary.win_rate * 100.0);
        println!("  Avg return:              {:.2}%", ensemble.summary.avg_return * 100.0);
        println!("  Worst return:            {:.2}%", ensemble.summary.worst_return * 100.0);
        println!("  Valuation stddev:        ${:.0}", ensemble.summary.volatility);
        println!();
    }

    if let Some(path) = cli.output {
        let report = Report {
            params: &params,
            metrics: &metrics,
            steps: run
                .steps
                .iter()
                .map(|step| DatedStep { date: history.date_of(step.day).unwrap_or(""), step })
                .collect(),
        };
        let file = File::create(&path).with_context(|| format!("cannot create {}", path.display()))?;
        serde_json::to_writer_pretty(BufWriter::new(file), &report)?;
        println!("Wrote {} steps to {}", report.steps.len(), path.display());
    }

    Ok(())
}

fn print_regime_table(steps: &[SimulationStep]) {
    println!("| Regime | Description                | Steps  |");
    println!("|--------|----------------------------|--------|");
    for regime in VarqState::all() {
        let count = steps.iter().filter(|s| s.health.regime == regime).count();
        println!("| {:6} | {:26} | {:6} |", format!("{:?}", regime), regime.name(), count);
    }
    println!();
}
