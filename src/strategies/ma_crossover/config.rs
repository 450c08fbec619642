//! MA Crossover Strategy Configuration

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::bar_spec::{Aggregation, AggregationSource, BarSpec, PriceType};
use crate::strategies::BarRole;

/// Parameter combinations the strategy refuses to run with
#[derive(Debug, Error, PartialEq)]
pub enum StrategyConfigError {
    #[error("{name} must be >= 1 (got {value})")]
    ZeroPeriod { name: &'static str, value: usize },

    #[error("{fast_name} ({fast}) must be less than {slow_name} ({slow})")]
    FastNotBelowSlow {
        fast_name: &'static str,
        fast: usize,
        slow_name: &'static str,
        slow: usize,
    },

    #[error("{name} must be > 0 (got {value})")]
    NonPositive { name: &'static str, value: f64 },

    #[error("{name} must be within 0..=100 (got {value})")]
    OutOfPercentRange { name: &'static str, value: f64 },

    #[error("trailing_stop_distance_pips ({distance}) must not exceed trailing_stop_activation_pips ({activation})")]
    TrailingDistanceAboveActivation { distance: f64, activation: f64 },

    #[error("stoch_bullish_threshold ({bullish}) must be below stoch_bearish_threshold ({bearish})")]
    StochThresholdsInverted { bullish: f64, bearish: f64 },

    #[error("{name} ({spec}) must be {relation} than bar_spec ({primary})")]
    BarSpecOrdering {
        name: &'static str,
        spec: String,
        relation: &'static str,
        primary: String,
    },
}

/// Configuration for the moving-average crossover strategy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaCrossoverConfig {
    /// Primary signal timeframe
    #[serde(default = "default_bar_spec")]
    pub bar_spec: BarSpec,

    #[serde(default = "default_fast_period")]
    pub fast_period: usize,

    #[serde(default = "default_slow_period")]
    pub slow_period: usize,

    /// Units per order
    #[serde(default = "default_trade_size")]
    pub trade_size: f64,

    /// Minimum fast/slow separation at the crossing bar, in pips
    #[serde(default = "default_crossover_threshold_pips")]
    pub crossover_threshold_pips: f64,

    #[serde(default = "default_stop_loss_pips")]
    pub stop_loss_pips: f64,

    #[serde(default = "default_take_profit_pips")]
    pub take_profit_pips: f64,

    /// Profit in pips before the trailing stop arms
    #[serde(default = "default_trailing_activation_pips")]
    pub trailing_stop_activation_pips: f64,

    /// Distance in pips kept between price and the trailing stop
    #[serde(default = "default_trailing_distance_pips")]
    pub trailing_stop_distance_pips: f64,

    // Higher-timeframe trend filter
    #[serde(default)]
    pub trend_filter_enabled: bool,

    #[serde(default = "default_trend_bar_spec")]
    pub trend_bar_spec: BarSpec,

    #[serde(default = "default_trend_fast_period")]
    pub trend_fast_period: usize,

    #[serde(default = "default_trend_slow_period")]
    pub trend_slow_period: usize,

    // Directional movement filter
    #[serde(default = "default_true")]
    pub dmi_enabled: bool,

    #[serde(default = "default_dmi_period")]
    pub dmi_period: usize,

    /// ADX floor; 0 disables the strength check
    #[serde(default)]
    pub dmi_min_adx: f64,

    // Stochastic filter
    #[serde(default = "default_true")]
    pub stoch_enabled: bool,

    #[serde(default = "default_stoch_period_k")]
    pub stoch_period_k: usize,

    #[serde(default = "default_stoch_period_d")]
    pub stoch_period_d: usize,

    /// Longs need %K at or above this level
    #[serde(default = "default_stoch_bullish_threshold")]
    pub stoch_bullish_threshold: f64,

    /// Shorts need %K at or below this level
    #[serde(default = "default_stoch_bearish_threshold")]
    pub stoch_bearish_threshold: f64,

    // Dormant mode
    #[serde(default)]
    pub dormant_mode_enabled: bool,

    #[serde(default = "default_dormant_threshold_hours")]
    pub dormant_threshold_hours: f64,

    #[serde(default = "default_dormant_bar_spec")]
    pub dormant_bar_spec: BarSpec,

    #[serde(default = "default_dormant_fast_period")]
    pub dormant_fast_period: usize,

    #[serde(default = "default_dormant_slow_period")]
    pub dormant_slow_period: usize,
}

fn mid_external(step: u32, aggregation: Aggregation) -> BarSpec {
    BarSpec::new(step, aggregation, PriceType::Mid, AggregationSource::External)
}

fn default_bar_spec() -> BarSpec {
    mid_external(15, Aggregation::Minute)
}
fn default_fast_period() -> usize {
    10
}
fn default_slow_period() -> usize {
    20
}
fn default_trade_size() -> f64 {
    100_000.0
}
fn default_crossover_threshold_pips() -> f64 {
    0.7
}
fn default_stop_loss_pips() -> f64 {
    25.0
}
fn default_take_profit_pips() -> f64 {
    50.0
}
fn default_trailing_activation_pips() -> f64 {
    20.0
}
fn default_trailing_distance_pips() -> f64 {
    15.0
}
fn default_trend_bar_spec() -> BarSpec {
    mid_external(1, Aggregation::Hour)
}
fn default_trend_fast_period() -> usize {
    20
}
fn default_trend_slow_period() -> usize {
    50
}
fn default_true() -> bool {
    true
}
fn default_dmi_period() -> usize {
    14
}
fn default_stoch_period_k() -> usize {
    14
}
fn default_stoch_period_d() -> usize {
    3
}
fn default_stoch_bullish_threshold() -> f64 {
    30.0
}
fn default_stoch_bearish_threshold() -> f64 {
    70.0
}
fn default_dormant_threshold_hours() -> f64 {
    14.0
}
fn default_dormant_bar_spec() -> BarSpec {
    mid_external(5, Aggregation::Minute)
}
fn default_dormant_fast_period() -> usize {
    10
}
fn default_dormant_slow_period() -> usize {
    20
}

impl Default for MaCrossoverConfig {
    fn default() -> Self {
        Self {
            bar_spec: default_bar_spec(),
            fast_period: default_fast_period(),
            slow_period: default_slow_period(),
            trade_size: default_trade_size(),
            crossover_threshold_pips: default_crossover_threshold_pips(),
            stop_loss_pips: default_stop_loss_pips(),
            take_profit_pips: default_take_profit_pips(),
            trailing_stop_activation_pips: default_trailing_activation_pips(),
            trailing_stop_distance_pips: default_trailing_distance_pips(),
            trend_filter_enabled: false,
            trend_bar_spec: default_trend_bar_spec(),
            trend_fast_period: default_trend_fast_period(),
            trend_slow_period: default_trend_slow_period(),
            dmi_enabled: true,
            dmi_period: default_dmi_period(),
            dmi_min_adx: 0.0,
            stoch_enabled: true,
            stoch_period_k: default_stoch_period_k(),
            stoch_period_d: default_stoch_period_d(),
            stoch_bullish_threshold: default_stoch_bullish_threshold(),
            stoch_bearish_threshold: default_stoch_bearish_threshold(),
            dormant_mode_enabled: false,
            dormant_threshold_hours: default_dormant_threshold_hours(),
            dormant_bar_spec: default_dormant_bar_spec(),
            dormant_fast_period: default_dormant_fast_period(),
            dormant_slow_period: default_dormant_slow_period(),
        }
    }
}

impl MaCrossoverConfig {
    /// Check every cross-parameter invariant. Settings for disabled filters
    /// are not checked.
    pub fn validate(&self) -> Result<(), StrategyConfigError> {
        check_periods("fast_period", self.fast_period, "slow_period", self.slow_period)?;

        check_positive("trade_size", self.trade_size)?;
        check_positive("stop_loss_pips", self.stop_loss_pips)?;
        check_positive("take_profit_pips", self.take_profit_pips)?;
        check_positive("trailing_stop_activation_pips", self.trailing_stop_activation_pips)?;
        check_positive("trailing_stop_distance_pips", self.trailing_stop_distance_pips)?;

        if self.crossover_threshold_pips < 0.0 || !self.crossover_threshold_pips.is_finite() {
            return Err(StrategyConfigError::NonPositive {
                name: "crossover_threshold_pips",
                value: self.crossover_threshold_pips,
            });
        }

        if self.trailing_stop_distance_pips > self.trailing_stop_activation_pips {
            return Err(StrategyConfigError::TrailingDistanceAboveActivation {
                distance: self.trailing_stop_distance_pips,
                activation: self.trailing_stop_activation_pips,
            });
        }

        if self.trend_filter_enabled {
            check_periods(
                "trend_fast_period",
                self.trend_fast_period,
                "trend_slow_period",
                self.trend_slow_period,
            )?;
            if !self.bar_spec.is_lower_than(&self.trend_bar_spec) {
                return Err(StrategyConfigError::BarSpecOrdering {
                    name: "trend_bar_spec",
                    spec: self.trend_bar_spec.to_string(),
                    relation: "longer",
                    primary: self.bar_spec.to_string(),
                });
            }
        }

        if self.dmi_enabled {
            if self.dmi_period == 0 {
                return Err(StrategyConfigError::ZeroPeriod {
                    name: "dmi_period",
                    value: 0,
                });
            }
            check_percent("dmi_min_adx", self.dmi_min_adx)?;
        }

        if self.stoch_enabled {
            if self.stoch_period_k == 0 {
                return Err(StrategyConfigError::ZeroPeriod {
                    name: "stoch_period_k",
                    value: 0,
                });
            }
            if self.stoch_period_d == 0 {
                return Err(StrategyConfigError::ZeroPeriod {
                    name: "stoch_period_d",
                    value: 0,
                });
            }
            check_percent("stoch_bullish_threshold", self.stoch_bullish_threshold)?;
            check_percent("stoch_bearish_threshold", self.stoch_bearish_threshold)?;
            if self.stoch_bullish_threshold >= self.stoch_bearish_threshold {
                return Err(StrategyConfigError::StochThresholdsInverted {
                    bullish: self.stoch_bullish_threshold,
                    bearish: self.stoch_bearish_threshold,
                });
            }
        }

        if self.dormant_mode_enabled {
            check_positive("dormant_threshold_hours", self.dormant_threshold_hours)?;
            check_periods(
                "dormant_fast_period",
                self.dormant_fast_period,
                "dormant_slow_period",
                self.dormant_slow_period,
            )?;
            if !self.dormant_bar_spec.is_lower_than(&self.bar_spec) {
                return Err(StrategyConfigError::BarSpecOrdering {
                    name: "dormant_bar_spec",
                    spec: self.dormant_bar_spec.to_string(),
                    relation: "shorter",
                    primary: self.bar_spec.to_string(),
                });
            }
        }

        Ok(())
    }

    /// Bar series the strategy consumes, primary first
    pub fn bar_requirements(&self) -> Vec<(BarRole, BarSpec)> {
        let mut specs = vec![(BarRole::Primary, self.bar_spec)];
        if self.trend_filter_enabled {
            specs.push((BarRole::Trend, self.trend_bar_spec));
        }
        if self.dormant_mode_enabled {
            specs.push((BarRole::Dormant, self.dormant_bar_spec));
        }
        specs
    }
}

fn check_periods(
    fast_name: &'static str,
    fast: usize,
    slow_name: &'static str,
    slow: usize,
) -> Result<(), StrategyConfigError> {
    if fast == 0 {
        return Err(StrategyConfigError::ZeroPeriod {
            name: fast_name,
            value: fast,
        });
    }
    if fast >= slow {
        return Err(StrategyConfigError::FastNotBelowSlow {
            fast_name,
            fast,
            slow_name,
            slow,
        });
    }
    Ok(())
}

fn check_positive(name: &'static str, value: f64) -> Result<(), StrategyConfigError> {
    if value > 0.0 && value.is_finite() {
        Ok(())
    } else {
        Err(StrategyConfigError::NonPositive { name, value })
    }
}

fn check_percent(name: &'static str, value: f64) -> Result<(), StrategyConfigError> {
    if (0.0..=100.0).contains(&value) {
        Ok(())
    } else {
        Err(StrategyConfigError::OutOfPercentRange { name, value })
    }
}
