//! Shared input handling for the binaries.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use rand::rngs::StdRng;
use rand::SeedableRng;
use varq_simulation::prices::{generate_price_path, SyntheticPathConfig};
use varq_simulation::{PriceHistory, SimulationParams};

const SYNTHETIC_SEED: u64 = 2019;

#[derive(clap::Args, Debug)]
pub struct InputArgs {
    /// Price history JSON ([{date, price}] or {data: [...]}); synthetic GBM path when omitted
    #[arg(long)]
    pub history: Option<PathBuf>,

    /// First date of the replay window (ISO, e.g. 2019-01-01)
    #[arg(long, default_value = "2019-01-01")]
    pub start: String,

    /// TOML file with simulation params; flags override it
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Initial LP capital (USD)
    #[arg(long)]
    pub liquidity: Option<f64>,

    /// Initial AMM premium
    #[arg(long)]
    pub premium: Option<f64>,

    /// Number of days to replay
    #[arg(long)]
    pub days: Option<usize>,

    /// Random seed
    #[arg(long)]
    pub seed: Option<u64>,

    /// Annual drift of the synthetic path
    #[arg(long, default_value = "0.25")]
    pub drift: f64,

    /// Annual volatility of the synthetic path
    #[arg(long, default_value = "0.30")]
    pub volatility: f64,

    /// Start price of the synthetic path
    #[arg(long, default_value = "150.0")]
    pub start_price: f64,
}

impl InputArgs {
    pub fn params(&self) -> Result<SimulationParams> {
        let mut params = match &self.config {
            Some(path) => SimulationParams::from_toml_file(path)
                .with_context(|| format!("failed to load config {}", path.display()))?,
            None => SimulationParams::default(),
        };
        if let Some(liquidity) = self.liquidity {
            params.initial_liquidity_usd = liquidity;
        }
        if let Some(premium) = self.premium {
            params.initial_premium = premium;
        }
        if let Some(days) = self.days {
            params.num_days = days;
        }
        if self.seed.is_some() {
            params.seed = self.seed;
        }
        Ok(params)
    }

    pub fn history(&self, num_days: usize, seed: Option<u64>) -> Result<PriceHistory> {
        match &self.history {
            Some(path) => load_window(path, &self.start, num_days),
            None => {
                let config = SyntheticPathConfig {
                    start_price: self.start_price,
                    days: num_days,
                    drift: self.drift,
                    volatility: self.volatility,
                };
                let mut rng = StdRng::seed_from_u64(seed.unwrap_or(SYNTHETIC_SEED));
                Ok(PriceHistory::from_prices(&generate_price_path(&config, &mut rng)))
            }
        }
    }
}

fn load_window(path: &Path, start: &str, num_days: usize) -> Result<PriceHistory> {
    let history = PriceHistory::load_json(path)
        .with_context(|| format!("failed to load price history {}", path.display()))?;
    let window = history.window(start, num_days);
    window.validate().context("price window is unusable")?;
    Ok(window)
}
