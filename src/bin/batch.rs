//! Batch Monte Carlo Binary
//!
//! Sweeps market bias × daily volume × fee rate with 30 seeded trials per
//! cell and prints per-scenario statistics.
//!
//! ## Usage
//! ```bash
//! cargo run --bin batch --release -- --history data/NGN.json --start 2020-01-01
//! cargo run --bin batch --release -- --bias 0.3,0.5,0.7 --output batch.json
//! ```

mod common;

use std::fs::File;
use std::io::BufWriter;
use std::ops::ControlFlow;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use varq_simulation::{run_batch, BatchConfig};

#[derive(Parser, Debug)]
#[command(name = "batch")]
#[command(about = "Monte Carlo parameter sweep for the Variable-Peg AMM", long_about = None)]
struct Cli {
    #[command(flatten)]
    input: common::InputArgs,

    /// Forward-bias options to sweep
    #[arg(long, value_delimiter = ',')]
    bias: Option<Vec<f64>>,

    /// Trials per grid cell
    #[arg(long)]
    trials: Option<usize>,

    /// Print per-scenario detail
    #[arg(short, long)]
    verbose: bool,

    /// Write all scenario results as JSON
    #[arg(short, long)]
    output: Option<PathBuf>,
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    let params = cli.input.params()?;
    let mut config = BatchConfig::default();
    if let Some(bias) = cli.bias {
        config.bias_options = bias;
    }
    if let Some(trials) = cli.trials {
        config.trials_per_cell = trials;
    }

    let history = cli.input.history(params.num_days, params.seed)?;
    let prices = history.prices();

    println!("=======================================================");
    println!("  Batch Monte Carlo Sweep");
    println!("=======================================================");
    println!();
    println!("Parameters:");
    println!("  Scenarios: {}, Trials per scenario: {}", config.cells().len(), config.trials_per_cell);
    println!("  Days: {}, Initial liquidity: ${:.0}", prices.len(), params.initial_liquidity_usd);
    println!();

    let results = run_batch(&params, &prices, &config, |progress| {
        eprint!("\r  {:3}% {}", progress.percent, progress.scenario);
        ControlFlow::Continue(())
    })
    .context("batch sweep failed")?;
    eprintln!();
    println!();

    if cli.verbose {
        for scenario in &results {
            println!("Scenario: {}", scenario.id);
            println!("{}", "-".repeat(50));
            scenario.stats.print();
            println!();
        }
    }

    println!("| Scenario                       | Avg Ret  | Median   | StdDev  | Win %  | Buffer     |");
    println!("|--------------------------------|----------|----------|---------|--------|------------|");
    for scenario in &results {
        let s = &scenario.stats;
        println!(
            "| {:30} | {:7.2}% | {:7.2}% | {:6.2}% | {:5.1}% | ${:9.0} |",
            scenario.id, s.avg_return_pct, s.median_return_pct, s.std_dev_return_pct, s.win_rate, s.avg_final_buffer
        );
    }

    if let Some(path) = cli.output {
        let file = File::create(&path).with_context(|| format!("cannot create {}", path.display()))?;
        serde_json::to_writer_pretty(BufWriter::new(file), &results)?;
        println!();
        println!("Wrote {} scenarios to {}", results.len(), path.display());
    }

    Ok(())
}
