//! Configuration management
//!
//! Settings come from environment variables (optionally via a `.env` file)
//! or from a JSON file with the same shape as [`Config`]. The strategy
//! section stays untyped JSON so optimizer studies can overlay parameters
//! by name before the strategy factory deserializes it.

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

use crate::ibkr::{IbkrSettings, IbkrSettingsError};
use crate::instrument::{Instrument, InstrumentError};
use crate::strategies::ma_crossover::{self, MaCrossoverConfig};

/// Strategy parameters as read from the environment
pub type StrategySettings = MaCrossoverConfig;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {var}: '{value}' ({reason})")]
    InvalidValue {
        var: &'static str,
        value: String,
        reason: String,
    },

    #[error("{0} is required")]
    Missing(&'static str),

    #[error("BACKTEST_START_DATE ({start}) must be before BACKTEST_END_DATE ({end})")]
    DateOrder { start: NaiveDate, end: NaiveDate },

    #[error("{name} must be > 0 (got {value})")]
    NonPositive { name: &'static str, value: f64 },

    #[error("strategy section must be a JSON object")]
    StrategyNotObject,

    #[error(transparent)]
    Instrument(#[from] InstrumentError),

    #[error(transparent)]
    Ibkr(#[from] IbkrSettingsError),

    #[error("strategy settings: {0}")]
    Strategy(#[from] ma_crossover::StrategyConfigError),

    #[error("failed to encode strategy settings: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub backtest: BacktestSettings,
    #[serde(default = "default_strategy_name")]
    pub strategy_name: String,
    #[serde(default = "default_strategy")]
    pub strategy: serde_json::Value,
    #[serde(default)]
    pub ibkr: IbkrSettings,
}

fn default_strategy_name() -> String {
    ma_crossover::NAME.to_string()
}

fn default_strategy() -> serde_json::Value {
    serde_json::json!({})
}

impl Default for Config {
    fn default() -> Self {
        Config {
            backtest: BacktestSettings::default(),
            strategy_name: default_strategy_name(),
            strategy: default_strategy(),
            ibkr: IbkrSettings::default(),
        }
    }
}

impl Config {
    /// Load configuration from JSON file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let contents = fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file {}", path.as_ref().display()))?;
        let config: Config =
            serde_json::from_str(&contents).context("Failed to parse config JSON")?;
        config.validate()?;
        Ok(config)
    }

    /// Load `.env` if present, then read the process environment
    pub fn from_env() -> Result<Self, ConfigError> {
        if let Ok(path) = dotenv::dotenv() {
            tracing::debug!(path = %path.display(), "Loaded .env");
        }
        Self::from_lookup(&|key| std::env::var(key).ok())
    }

    /// Build a config from any key/value source. Empty values count as unset.
    pub fn from_lookup(lookup: &dyn Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let env = Env(lookup);

        let backtest = BacktestSettings::from_env(&env)?;
        let strategy = strategy_from_env(&env)?;
        let ibkr = ibkr_from_env(&env)?;

        let config = Config {
            backtest,
            strategy_name: env.parse("STRATEGY_NAME", default_strategy_name())?,
            strategy: serde_json::to_value(&strategy)?,
            ibkr,
        };
        config.validate()?;
        Ok(config)
    }

    /// Check settings that do not depend on the strategy implementation
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.backtest.validate()?;
        self.ibkr.validate()?;
        if !self.strategy.is_object() {
            return Err(ConfigError::StrategyNotObject);
        }
        Ok(())
    }

    /// Copy of this config with the given strategy parameters overlaid
    pub fn with_strategy_overrides(
        &self,
        params: &serde_json::Map<String, serde_json::Value>,
    ) -> Result<Self, ConfigError> {
        let mut config = self.clone();
        let section = config
            .strategy
            .as_object_mut()
            .ok_or(ConfigError::StrategyNotObject)?;
        for (key, value) in params {
            section.insert(key.clone(), value.clone());
        }
        Ok(config)
    }
}

/// Instrument, data range, and account settings for a backtest
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestSettings {
    #[serde(default = "default_symbol")]
    pub symbol: String,
    #[serde(default = "default_venue")]
    pub venue: String,
    #[serde(default)]
    pub start_date: Option<NaiveDate>,
    /// Inclusive
    #[serde(default)]
    pub end_date: Option<NaiveDate>,
    #[serde(default = "default_starting_capital")]
    pub starting_capital: f64,
    /// Commission per side per one million notional
    #[serde(default = "default_commission_per_million")]
    pub commission_per_million: f64,
    #[serde(default = "default_catalog_path")]
    pub catalog_path: PathBuf,
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
}

fn default_symbol() -> String {
    "EUR/USD".to_string()
}
fn default_venue() -> String {
    "IDEALPRO".to_string()
}
fn default_starting_capital() -> f64 {
    100_000.0
}
fn default_commission_per_million() -> f64 {
    20.0
}
fn default_catalog_path() -> PathBuf {
    PathBuf::from("data/catalog")
}
fn default_output_dir() -> PathBuf {
    PathBuf::from("logs/backtest_results")
}

impl Default for BacktestSettings {
    fn default() -> Self {
        Self {
            symbol: default_symbol(),
            venue: default_venue(),
            start_date: None,
            end_date: None,
            starting_capital: default_starting_capital(),
            commission_per_million: default_commission_per_million(),
            catalog_path: default_catalog_path(),
            output_dir: default_output_dir(),
        }
    }
}

impl BacktestSettings {
    fn from_env(env: &Env<'_>) -> Result<Self, ConfigError> {
        let d = Self::default();
        Ok(Self {
            symbol: env.parse("SYMBOL", d.symbol)?,
            venue: env.parse("VENUE", d.venue)?,
            start_date: env.parse_opt("BACKTEST_START_DATE")?,
            end_date: env.parse_opt("BACKTEST_END_DATE")?,
            starting_capital: env.parse("STARTING_CAPITAL", d.starting_capital)?,
            commission_per_million: env.parse("COMMISSION_PER_MILLION", d.commission_per_million)?,
            catalog_path: env.parse("CATALOG_PATH", d.catalog_path)?,
            output_dir: env.parse("OUTPUT_DIR", d.output_dir)?,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        Instrument::parse(&self.symbol, &self.venue)?;
        if self.starting_capital <= 0.0 || !self.starting_capital.is_finite() {
            return Err(ConfigError::NonPositive {
                name: "STARTING_CAPITAL",
                value: self.starting_capital,
            });
        }
        if self.commission_per_million < 0.0 {
            return Err(ConfigError::InvalidValue {
                var: "COMMISSION_PER_MILLION",
                value: self.commission_per_million.to_string(),
                reason: "must be >= 0".to_string(),
            });
        }
        if let (Some(start), Some(end)) = (self.start_date, self.end_date) {
            if start >= end {
                return Err(ConfigError::DateOrder { start, end });
            }
        }
        Ok(())
    }

    pub fn instrument(&self) -> Result<Instrument, InstrumentError> {
        Instrument::parse(&self.symbol, &self.venue)
    }

    /// `[start 00:00, end + 1 day 00:00)` in UTC. Both dates are required.
    pub fn date_range(&self) -> Result<(DateTime<Utc>, DateTime<Utc>), ConfigError> {
        let start = self
            .start_date
            .ok_or(ConfigError::Missing("BACKTEST_START_DATE"))?;
        let end = self.end_date.ok_or(ConfigError::Missing("BACKTEST_END_DATE"))?;
        if start >= end {
            return Err(ConfigError::DateOrder { start, end });
        }
        let start = start.and_time(chrono::NaiveTime::MIN).and_utc();
        let end = (end + Duration::days(1)).and_time(chrono::NaiveTime::MIN).and_utc();
        Ok((start, end))
    }
}

fn strategy_from_env(env: &Env<'_>) -> Result<StrategySettings, ConfigError> {
    let d = StrategySettings::default();
    let settings = StrategySettings {
        bar_spec: env.parse("BAR_SPEC", d.bar_spec)?,
        fast_period: env.parse("FAST_PERIOD", d.fast_period)?,
        slow_period: env.parse("SLOW_PERIOD", d.slow_period)?,
        trade_size: env.parse("TRADE_SIZE", d.trade_size)?,
        crossover_threshold_pips: env
            .parse("CROSSOVER_THRESHOLD_PIPS", d.crossover_threshold_pips)?,
        stop_loss_pips: env.parse("STOP_LOSS_PIPS", d.stop_loss_pips)?,
        take_profit_pips: env.parse("TAKE_PROFIT_PIPS", d.take_profit_pips)?,
        trailing_stop_activation_pips: env
            .parse("TRAILING_STOP_ACTIVATION_PIPS", d.trailing_stop_activation_pips)?,
        trailing_stop_distance_pips: env
            .parse("TRAILING_STOP_DISTANCE_PIPS", d.trailing_stop_distance_pips)?,
        trend_filter_enabled: env.flag("TREND_FILTER_ENABLED", d.trend_filter_enabled)?,
        trend_bar_spec: env.parse("TREND_BAR_SPEC", d.trend_bar_spec)?,
        trend_fast_period: env.parse("TREND_FAST_PERIOD", d.trend_fast_period)?,
        trend_slow_period: env.parse("TREND_SLOW_PERIOD", d.trend_slow_period)?,
        dmi_enabled: env.flag("DMI_ENABLED", d.dmi_enabled)?,
        dmi_period: env.parse("DMI_PERIOD", d.dmi_period)?,
        dmi_min_adx: env.parse("DMI_MIN_ADX", d.dmi_min_adx)?,
        stoch_enabled: env.flag("STOCH_ENABLED", d.stoch_enabled)?,
        stoch_period_k: env.parse("STOCH_PERIOD_K", d.stoch_period_k)?,
        stoch_period_d: env.parse("STOCH_PERIOD_D", d.stoch_period_d)?,
        stoch_bullish_threshold: env
            .parse("STOCH_BULLISH_THRESHOLD", d.stoch_bullish_threshold)?,
        stoch_bearish_threshold: env
            .parse("STOCH_BEARISH_THRESHOLD", d.stoch_bearish_threshold)?,
        dormant_mode_enabled: env.flag("DORMANT_MODE_ENABLED", d.dormant_mode_enabled)?,
        dormant_threshold_hours: env
            .parse("DORMANT_THRESHOLD_HOURS", d.dormant_threshold_hours)?,
        dormant_bar_spec: env.parse("DORMANT_BAR_SPEC", d.dormant_bar_spec)?,
        dormant_fast_period: env.parse("DORMANT_FAST_PERIOD", d.dormant_fast_period)?,
        dormant_slow_period: env.parse("DORMANT_SLOW_PERIOD", d.dormant_slow_period)?,
    };
    settings.validate()?;
    Ok(settings)
}

fn ibkr_from_env(env: &Env<'_>) -> Result<IbkrSettings, ConfigError> {
    let d = IbkrSettings::default();
    Ok(IbkrSettings {
        host: env.parse("IB_HOST", d.host)?,
        port: env.parse("IB_PORT", d.port)?,
        client_id: env.parse("IB_CLIENT_ID", d.client_id)?,
        account_id: env.parse_opt("IB_ACCOUNT_ID")?,
        market_data_type: env.parse("IB_MARKET_DATA_TYPE", d.market_data_type)?,
    })
}

/// Typed access over a key/value lookup
struct Env<'a>(&'a dyn Fn(&str) -> Option<String>);

impl Env<'_> {
    fn raw(&self, var: &str) -> Option<String> {
        (self.0)(var)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn parse_opt<T>(&self, var: &'static str) -> Result<Option<T>, ConfigError>
    where
        T: FromStr,
        T::Err: Display,
    {
        match self.raw(var) {
            None => Ok(None),
            Some(value) => value
                .parse::<T>()
                .map(Some)
                .map_err(|e| ConfigError::InvalidValue {
                    var,
                    reason: e.to_string(),
                    value,
                }),
        }
    }

    fn parse<T>(&self, var: &'static str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: Display,
    {
        Ok(self.parse_opt(var)?.unwrap_or(default))
    }

    fn flag(&self, var: &'static str, default: bool) -> Result<bool, ConfigError> {
        match self.raw(var) {
            None => Ok(default),
            Some(value) => match value.to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => Ok(true),
                "0" | "false" | "no" | "off" => Ok(false),
                _ => Err(ConfigError::InvalidValue {
                    var,
                    value,
                    reason: "expected true/false".to_string(),
                }),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(&move |k| map.get(k).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config_from(&[]).unwrap();
        assert_eq!(config.backtest.symbol, "EUR/USD");
        assert_eq!(config.backtest.venue, "IDEALPRO");
        assert_eq!(config.backtest.commission_per_million, 20.0);
        assert_eq!(config.strategy_name, "ma_crossover");
        assert_eq!(config.strategy["fast_period"], 10);
        assert_eq!(config.strategy["bar_spec"], "15-MINUTE-MID-EXTERNAL");
        assert_eq!(config.ibkr.port, 7497);
    }

    #[test]
    fn test_env_overrides() {
        let config = config_from(&[
            ("SYMBOL", "USD/JPY"),
            ("FAST_PERIOD", "5"),
            ("DORMANT_MODE_ENABLED", "true"),
            ("BACKTEST_START_DATE", "2024-01-01"),
            ("BACKTEST_END_DATE", "2024-03-31"),
            ("IB_PORT", "4002"),
        ])
        .unwrap();
        assert_eq!(config.backtest.instrument().unwrap().pip_size(), 0.01);
        assert_eq!(config.strategy["fast_period"], 5);
        assert_eq!(config.strategy["dormant_mode_enabled"], true);
        let (start, end) = config.backtest.date_range().unwrap();
        assert_eq!(start.to_rfc3339(), "2024-01-01T00:00:00+00:00");
        assert_eq!(end.to_rfc3339(), "2024-04-01T00:00:00+00:00");
        assert!(config.ibkr.is_paper());
    }

    #[test]
    fn test_blank_values_fall_back_to_defaults() {
        let config = config_from(&[("SLOW_PERIOD", "  "), ("IB_ACCOUNT_ID", "")]).unwrap();
        assert_eq!(config.strategy["slow_period"], 20);
        assert_eq!(config.ibkr.account_id, None);
    }

    #[test]
    fn test_invalid_values_are_reported() {
        let err = config_from(&[("FAST_PERIOD", "ten")]).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { var: "FAST_PERIOD", .. }));

        let err = config_from(&[("STOCH_ENABLED", "maybe")]).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { var: "STOCH_ENABLED", .. }));

        let err = config_from(&[("FAST_PERIOD", "30")]).unwrap_err();
        assert!(matches!(err, ConfigError::Strategy(_)));
    }

    #[test]
    fn test_date_order() {
        let err = config_from(&[
            ("BACKTEST_START_DATE", "2024-03-01"),
            ("BACKTEST_END_DATE", "2024-01-01"),
        ])
        .unwrap_err();
        assert!(matches!(err, ConfigError::DateOrder { .. }));

        let config = config_from(&[]).unwrap();
        assert!(matches!(
            config.backtest.date_range(),
            Err(ConfigError::Missing("BACKTEST_START_DATE"))
        ));
    }

    #[test]
    fn test_strategy_overrides() {
        let config = Config::default();
        let mut params = serde_json::Map::new();
        params.insert("fast_period".to_string(), serde_json::json!(7));
        let updated = config.with_strategy_overrides(&params).unwrap();
        assert_eq!(updated.strategy["fast_period"], 7);
        assert!(config.strategy.get("fast_period").is_none());
    }

    #[test]
    fn test_from_file() {
        let dir = std::env::temp_dir().join(format!("fxc_config_{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.json");
        std::fs::write(
            &path,
            r#"{"backtest": {"symbol": "GBP/USD", "starting_capital": 50000},
                "strategy": {"fast_period": 8, "slow_period": 21}}"#,
        )
        .unwrap();
        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.backtest.symbol, "GBP/USD");
        assert_eq!(config.backtest.venue, "IDEALPRO");
        assert_eq!(config.strategy["slow_period"], 21);
        std::fs::remove_dir_all(&dir).ok();
    }
}
