//! Trading Strategies Module
//!
//! Strategy framework with:
//! - Clean trait interface that all strategies must implement
//! - Dynamic strategy registry (no hardcoded names)
//! - Bar events tagged with the role their series plays

pub mod ma_crossover;

use crate::bar_spec::BarSpec;
use crate::{Candle, Config, Position, Side, Signal, Trade};
use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{OnceLock, RwLock};

// =============================================================================
// Bar events
// =============================================================================

/// What a bar series is used for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum BarRole {
    /// Higher timeframe used only for trend direction
    Trend,
    /// Signal timeframe
    Primary,
    /// Lower timeframe scanned while dormant mode is active
    Dormant,
}

/// A closed bar delivered to a strategy
#[derive(Debug, Clone, Copy)]
pub struct BarEvent<'a> {
    pub role: BarRole,
    pub candle: &'a Candle,
    /// Bar open time + bar duration
    pub closed_at: DateTime<Utc>,
}

/// Counters a strategy keeps about its own decisions
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StrategyStats {
    pub crossovers: usize,
    pub signals: usize,
    pub rejected_threshold: usize,
    pub rejected_trend: usize,
    pub rejected_dmi: usize,
    pub rejected_stoch: usize,
    pub dormant_activations: usize,
    pub dormant_signals: usize,
}

impl StrategyStats {
    pub fn rejected_total(&self) -> usize {
        self.rejected_threshold + self.rejected_trend + self.rejected_dmi + self.rejected_stoch
    }
}

// =============================================================================
// Strategy Trait - The contract all strategies must implement
// =============================================================================

/// Trading strategy trait
pub trait Strategy: Send {
    /// Strategy identifier (must match config's strategy_name)
    fn name(&self) -> &'static str;

    /// Bar series this strategy consumes, primary first
    fn required_bar_specs(&self) -> Vec<(BarRole, BarSpec)>;

    /// Process a closed bar and return the desired exposure change
    fn on_bar(&mut self, event: &BarEvent<'_>, position: Option<&Position>) -> Signal;

    /// Calculate stop loss price for entry
    fn calculate_stop_loss(&self, side: Side, entry_price: f64) -> f64;

    /// Calculate take profit price for entry
    fn calculate_take_profit(&self, side: Side, entry_price: f64) -> f64;

    /// New trailing stop level, or None to leave the current stop in place
    fn update_trailing_stop(&self, position: &Position, current_price: f64) -> Option<f64>;

    /// Units per order
    fn trade_size(&self) -> f64;

    /// Quantize a price to the traded instrument's precision
    fn round_price(&self, price: f64) -> f64 {
        price
    }

    /// Whether the most recent signal came from dormant mode
    fn last_signal_dormant(&self) -> bool {
        false
    }

    fn stats(&self) -> StrategyStats {
        StrategyStats::default()
    }

    /// Notification when a trade is closed
    fn notify_trade(&mut self, trade: &Trade) {
        tracing::debug!(
            symbol = %trade.symbol,
            pnl = trade.net_pnl,
            reason = %trade.exit_reason,
            return_pct = format!("{:.3}%", trade.return_pct()),
            "Trade closed"
        );
    }
}

// =============================================================================
// Strategy Factory
// =============================================================================

/// Factory function type for creating strategies from config
pub type StrategyFactory = fn(&Config) -> Result<Box<dyn Strategy>>;

/// Global strategy registry
static REGISTRY: OnceLock<RwLock<HashMap<&'static str, StrategyFactory>>> = OnceLock::new();

fn get_registry() -> &'static RwLock<HashMap<&'static str, StrategyFactory>> {
    REGISTRY.get_or_init(|| {
        let mut map = HashMap::new();
        map.insert(ma_crossover::NAME, ma_crossover::create as StrategyFactory);
        RwLock::new(map)
    })
}

/// Create a strategy from configuration
pub fn create_strategy(config: &Config) -> Result<Box<dyn Strategy>> {
    let registry = get_registry()
        .read()
        .map_err(|_| anyhow::anyhow!("strategy registry lock poisoned"))?;

    let factory = registry.get(config.strategy_name.as_str()).ok_or_else(|| {
        let mut available: Vec<_> = registry.keys().copied().collect();
        available.sort_unstable();
        anyhow::anyhow!(
            "Unknown strategy: '{}'. Available: {}",
            config.strategy_name,
            available.join(", ")
        )
    })?;

    factory(config)
}

/// Get list of available strategy names
pub fn available_strategies() -> Vec<&'static str> {
    get_registry()
        .read()
        .map(|r| r.keys().copied().collect())
        .unwrap_or_default()
}

/// Register a new strategy (for plugins or testing)
pub fn register_strategy(name: &'static str, factory: StrategyFactory) -> Result<()> {
    get_registry()
        .write()
        .map_err(|_| anyhow::anyhow!("strategy registry lock poisoned"))?
        .insert(name, factory);
    Ok(())
}
