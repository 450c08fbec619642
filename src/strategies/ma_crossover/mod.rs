//! Moving-Average Crossover Strategy
//!
//! Fast/slow SMA crossings on the primary timeframe, gated by a pip
//! threshold and optional trend, DMI, and stochastic filters. A dormant
//! mode falls back to a lower timeframe after long quiet stretches.

mod config;
mod dormant;
mod strategy;

pub use config::{MaCrossoverConfig, StrategyConfigError};
pub use dormant::DormantMode;
pub use strategy::MaCrossoverStrategy;

use crate::strategies::Strategy;
use crate::Config;
use anyhow::{Context, Result};

/// Strategy name for registration
pub const NAME: &str = "ma_crossover";

/// Factory function for the strategy registry
pub fn create(config: &Config) -> Result<Box<dyn Strategy>> {
    let strategy_config = parse_config(config)?;
    let instrument = config.backtest.instrument()?;
    Ok(Box::new(MaCrossoverStrategy::new(strategy_config, instrument)?))
}

/// Deserialize and validate the strategy section of a config
pub fn parse_config(config: &Config) -> Result<MaCrossoverConfig> {
    let strategy_config: MaCrossoverConfig = serde_json::from_value(config.strategy.clone())
        .context("Failed to parse ma_crossover config")?;
    strategy_config.validate()?;
    Ok(strategy_config)
}
