//! Subcommand implementations

pub mod backtest;
pub mod catalog;
pub mod check_env;
pub mod optimize;

use anyhow::Result;
use fx_crossover::Config;

/// Config from a JSON file when given, otherwise from `.env` and the
/// process environment
pub fn load_config(path: Option<&str>) -> Result<Config> {
    match path {
        Some(path) => {
            let config = Config::from_file(path)?;
            tracing::info!("Loaded configuration from: {}", path);
            Ok(config)
        }
        None => {
            let config = Config::from_env()?;
            tracing::info!("Loaded configuration from environment");
            Ok(config)
        }
    }
}
