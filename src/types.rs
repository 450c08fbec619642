//! Core data types used across the trading system

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Validation errors for candle data
#[derive(Debug, Error)]
pub enum CandleValidationError {
    #[error("high ({high}) must be >= low ({low})")]
    HighLessThanLow { high: f64, low: f64 },

    #[error("volume ({0}) must be >= 0")]
    NegativeVolume(f64),

    #[error("open ({open}) must be between low ({low}) and high ({high})")]
    OpenOutOfRange { open: f64, low: f64, high: f64 },

    #[error("close ({close}) must be between low ({low}) and high ({high})")]
    CloseOutOfRange { close: f64, low: f64, high: f64 },

    #[error("prices must be positive: open={open}, high={high}, low={low}, close={close}")]
    NonPositivePrice {
        open: f64,
        high: f64,
        low: f64,
        close: f64,
    },
}

/// OHLCV bar. `datetime` is the bar open time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub datetime: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Candle {
    /// Create a new candle with validation
    pub fn new(
        datetime: DateTime<Utc>,
        open: f64,
        high: f64,
        low: f64,
        close: f64,
        volume: f64,
    ) -> Result<Self, CandleValidationError> {
        let candle = Self {
            datetime,
            open,
            high,
            low,
            close,
            volume,
        };
        candle.validate()?;
        Ok(candle)
    }

    /// Validate the candle data
    pub fn validate(&self) -> Result<(), CandleValidationError> {
        if self.open <= 0.0 || self.high <= 0.0 || self.low <= 0.0 || self.close <= 0.0 {
            return Err(CandleValidationError::NonPositivePrice {
                open: self.open,
                high: self.high,
                low: self.low,
                close: self.close,
            });
        }

        if self.high < self.low {
            return Err(CandleValidationError::HighLessThanLow {
                high: self.high,
                low: self.low,
            });
        }

        if self.volume < 0.0 {
            return Err(CandleValidationError::NegativeVolume(self.volume));
        }

        if self.open < self.low || self.open > self.high {
            return Err(CandleValidationError::OpenOutOfRange {
                open: self.open,
                low: self.low,
                high: self.high,
            });
        }

        if self.close < self.low || self.close > self.high {
            return Err(CandleValidationError::CloseOutOfRange {
                close: self.close,
                low: self.low,
                high: self.high,
            });
        }

        Ok(())
    }
}

// The `ta` streaming indicators consume anything exposing OHLC accessors.
impl ta::Open for Candle {
    fn open(&self) -> f64 {
        self.open
    }
}

impl ta::High for Candle {
    fn high(&self) -> f64 {
        self.high
    }
}

impl ta::Low for Candle {
    fn low(&self) -> f64 {
        self.low
    }
}

impl ta::Close for Candle {
    fn close(&self) -> f64 {
        self.close
    }
}

/// Instrument symbol, e.g. `EUR/USD`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Symbol(pub String);

impl Symbol {
    pub fn new(s: impl Into<String>) -> Self {
        Symbol(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Symbol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Trade direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    /// +1 for longs, -1 for shorts
    pub fn sign(self) -> f64 {
        match self {
            Side::Buy => 1.0,
            Side::Sell => -1.0,
        }
    }
}

/// Trading signal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Signal {
    Long,
    Short,
    Flat,
}

impl Signal {
    /// Side to enter for this signal, if any
    pub fn side(self) -> Option<Side> {
        match self {
            Signal::Long => Some(Side::Buy),
            Signal::Short => Some(Side::Sell),
            Signal::Flat => None,
        }
    }
}

/// Open position state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub symbol: Symbol,
    pub side: Side,
    pub entry_price: f64,
    pub quantity: f64,
    pub stop_price: f64,
    pub target_price: f64,
    pub trailing_stop: Option<f64>,
    pub entry_time: DateTime<Utc>,
    /// Opened from a lower-timeframe signal while dormant mode was active
    #[serde(default)]
    pub dormant_entry: bool,
}

impl Position {
    pub fn current_value(&self) -> f64 {
        self.quantity * self.entry_price
    }

    pub fn unrealized_pnl(&self, current_price: f64) -> f64 {
        (current_price - self.entry_price) * self.quantity * self.side.sign()
    }

    /// Price distance moved in the position's favour (negative when losing)
    pub fn favorable_move(&self, current_price: f64) -> f64 {
        (current_price - self.entry_price) * self.side.sign()
    }

    /// Stop currently protecting the position: trailing stop once armed
    pub fn effective_stop(&self) -> f64 {
        self.trailing_stop.unwrap_or(self.stop_price)
    }
}

/// Why a position was closed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExitReason {
    StopLoss,
    TrailingStop,
    TakeProfit,
    Reversal,
    EndOfData,
}

impl std::fmt::Display for ExitReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ExitReason::StopLoss => "stop_loss",
            ExitReason::TrailingStop => "trailing_stop",
            ExitReason::TakeProfit => "take_profit",
            ExitReason::Reversal => "reversal",
            ExitReason::EndOfData => "end_of_data",
        };
        f.write_str(s)
    }
}

/// Completed trade record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trade {
    pub symbol: Symbol,
    pub side: Side,
    pub entry_price: f64,
    pub exit_price: f64,
    pub quantity: f64,
    pub entry_time: DateTime<Utc>,
    pub exit_time: DateTime<Utc>,
    pub pnl: f64,
    pub commission: f64,
    pub net_pnl: f64,
    pub exit_reason: ExitReason,
    #[serde(default)]
    pub dormant_entry: bool,
}

impl Trade {
    pub fn return_pct(&self) -> f64 {
        if self.entry_price == 0.0 {
            return 0.0;
        }
        (self.exit_price - self.entry_price) / self.entry_price * self.side.sign() * 100.0
    }

    /// Price move captured, in pips of the given size
    pub fn pips(&self, pip_size: f64) -> f64 {
        if pip_size <= 0.0 {
            return 0.0;
        }
        (self.exit_price - self.entry_price) * self.side.sign() / pip_size
    }

    pub fn is_win(&self) -> bool {
        self.net_pnl > 0.0
    }
}

/// Backtest statistics. Percentages are expressed as 0-100.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    pub total_pnl: f64,
    pub total_return: f64,
    pub sharpe_ratio: f64,
    pub max_drawdown: f64,
    pub max_drawdown_abs: f64,
    pub win_rate: f64,
    pub profit_factor: f64,
    /// (Win Rate × Avg Win) - (Loss Rate × Avg Loss), in account currency
    pub expectancy: f64,
    pub total_trades: usize,
    pub winning_trades: usize,
    pub losing_trades: usize,
    pub long_trades: usize,
    pub short_trades: usize,
    pub avg_win: f64,
    pub avg_loss: f64,
    pub largest_win: f64,
    pub largest_loss: f64,
    pub total_commission: f64,
    pub rejected_signals: usize,
    pub dormant_activations: usize,
    pub dormant_trades: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 2, 10, 0, 0).unwrap()
    }

    #[test]
    fn test_candle_validation() {
        assert!(Candle::new(ts(), 1.1, 1.2, 1.0, 1.15, 10.0).is_ok());
        assert!(matches!(
            Candle::new(ts(), 1.1, 1.0, 1.2, 1.1, 10.0),
            Err(CandleValidationError::HighLessThanLow { .. })
        ));
        assert!(matches!(
            Candle::new(ts(), 1.3, 1.2, 1.0, 1.1, 10.0),
            Err(CandleValidationError::OpenOutOfRange { .. })
        ));
        assert!(matches!(
            Candle::new(ts(), 1.1, 1.2, 1.0, 1.1, -1.0),
            Err(CandleValidationError::NegativeVolume(_))
        ));
    }

    #[test]
    fn test_short_position_pnl() {
        let pos = Position {
            symbol: Symbol::new("EUR/USD"),
            side: Side::Sell,
            entry_price: 1.1000,
            quantity: 100_000.0,
            stop_price: 1.1025,
            target_price: 1.0950,
            trailing_stop: None,
            entry_time: ts(),
            dormant_entry: false,
        };
        assert!((pos.unrealized_pnl(1.0990) - 100.0).abs() < 1e-6);
        assert!(pos.favorable_move(1.1010) < 0.0);
        assert_eq!(pos.effective_stop(), 1.1025);
    }

    #[test]
    fn test_trade_return_pct_short() {
        let trade = Trade {
            symbol: Symbol::new("EUR/USD"),
            side: Side::Sell,
            entry_price: 1.0,
            exit_price: 0.99,
            quantity: 1.0,
            entry_time: ts(),
            exit_time: ts(),
            pnl: 0.01,
            commission: 0.0,
            net_pnl: 0.01,
            exit_reason: ExitReason::TakeProfit,
            dormant_entry: false,
        };
        assert!((trade.return_pct() - 1.0).abs() < 1e-9);
        assert!((trade.pips(0.0001) - 100.0).abs() < 1e-6);
        assert!(trade.is_win());
    }
}
