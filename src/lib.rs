//! VARQ Variable-Peg AMM Simulation Library
//!
//! This library replays oracle price histories through a collateralized,
//! oracle-pegged synthetic-currency AMM and reports solvency, LP valuation
//! and funding-rate dynamics over time.
//!
//! ## Modules
//!
//! - `engine`: pool ledger with expansion / contraction trades
//! - `varq`: five-regime classifier and funding multiplier
//! - `simulator`: drives one run over a price series
//! - `metrics`: valuation and flow summaries for a run
//! - `batch`: Monte Carlo sweep over bias × volume × fee
//! - `ensemble`: many trials of one scenario, aggregated per step
//! - `prices`: price histories (JSON files, windows, synthetic GBM paths)
//! - `rng`: injectable random source
//!
//! ## Usage
//!
//! ```bash
//! # Single run over a price history
//! cargo run --bin simulate --release -- --history data/NGN.json --start 2019-01-01
//!
//! # Parameter sweep
//! cargo run --bin batch --release -- --history data/NGN.json
//! ```

pub mod batch;
pub mod engine;
pub mod ensemble;
pub mod error;
pub mod metrics;
pub mod params;
pub mod prices;
pub mod rng;
pub mod simulator;
pub mod varq;

pub use batch::{run_batch, BatchConfig, BatchProgress, ScenarioResult, ScenarioStats, TrialResult};
pub use engine::{
    SimulationStep, TradeKind, TradeOutcome, TradeRecord, TradeStatus, VarqAmm,
};
pub use ensemble::{run_ensemble, EnsembleResult};
pub use error::{Result, SimulationError};
pub use metrics::{compute_metrics, SimulationMetrics};
pub use params::SimulationParams;
pub use prices::{PriceHistory, PriceRecord};
pub use rng::{RandomSource, RngSource};
pub use simulator::{run_simulation, run_simulation_with, SimulationRun};
pub use varq::VarqState;
