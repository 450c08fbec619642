//! Backtesting engine
//!
//! Event-driven backtest over one or more bar series of the same
//! instrument. Bars are merged by close time; exits are checked against the
//! bar range before the strategy sees the bar; orders fill at the bar close.

use anyhow::{bail, Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use statrs::statistics::Statistics;
use std::collections::{BTreeMap, HashMap};

use crate::bar_spec::BarSpec;
use crate::catalog::Catalog;
use crate::config::BacktestSettings;
use crate::instrument::Instrument;
use crate::strategies::{BarEvent, BarRole, Strategy, StrategyStats};
use crate::{Candle, Config, ExitReason, PerformanceMetrics, Position, Side, Signal, Trade};

const TRADING_DAYS_PER_YEAR: f64 = 252.0;

/// Reported instead of infinity when there are no losing trades
const MAX_PROFIT_FACTOR: f64 = 999.0;

/// A bar series and the role it plays for the strategy
#[derive(Debug, Clone, Copy)]
pub struct BarSeries<'a> {
    pub role: BarRole,
    pub spec: BarSpec,
    pub candles: &'a [Candle],
}

/// Candles for one instrument keyed by bar spec, loaded once and shared
#[derive(Debug, Clone, Default)]
pub struct MarketData {
    series: HashMap<BarSpec, Vec<Candle>>,
}

impl MarketData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, spec: BarSpec, candles: Vec<Candle>) {
        self.series.insert(spec, candles);
    }

    pub fn get(&self, spec: &BarSpec) -> Option<&[Candle]> {
        self.series.get(spec).map(|c| c.as_slice())
    }

    pub fn bar_count(&self) -> usize {
        self.series.values().map(|c| c.len()).sum()
    }

    /// Load every requested spec from the catalog, clipped to the range
    pub fn load_from_catalog(
        catalog: &Catalog,
        instrument: &Instrument,
        specs: &[BarSpec],
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Result<Self> {
        let mut data = Self::new();
        for spec in specs {
            if data.series.contains_key(spec) {
                continue;
            }
            let candles = catalog
                .load(instrument, spec, start, end)
                .with_context(|| format!("Failed to load {} {}", instrument.symbol, spec))?;
            if candles.is_empty() {
                bail!(
                    "No {} bars for {} in the catalog for the requested range",
                    spec,
                    instrument.symbol
                );
            }
            tracing::info!(spec = %spec, bars = candles.len(), "Loaded bars");
            data.insert(*spec, candles);
        }
        Ok(data)
    }

    /// Borrow the series a strategy asks for
    pub fn series_for(&self, requirements: &[(BarRole, BarSpec)]) -> Result<Vec<BarSeries<'_>>> {
        requirements
            .iter()
            .map(|(role, spec)| {
                let candles = self
                    .get(spec)
                    .with_context(|| format!("No {} data loaded for {:?} series", spec, role))?;
                Ok(BarSeries {
                    role: *role,
                    spec: *spec,
                    candles,
                })
            })
            .collect()
    }
}

/// Merge series into one stream ordered by close time. On ties the higher
/// timeframe role goes first (trend, then primary, then dormant).
pub fn merge_events<'a>(series: &[BarSeries<'a>]) -> Vec<BarEvent<'a>> {
    let mut events: Vec<BarEvent<'a>> = series
        .iter()
        .flat_map(|s| {
            let (role, duration, candles) = (s.role, s.spec.duration(), s.candles);
            candles.iter().map(move |candle| BarEvent {
                role,
                candle,
                closed_at: candle.datetime + duration,
            })
        })
        .collect();
    events.sort_by(|a, b| a.closed_at.cmp(&b.closed_at).then(a.role.cmp(&b.role)));
    events
}

/// Backtest engine
pub struct Backtester {
    settings: BacktestSettings,
    instrument: Instrument,
    strategy: Box<dyn Strategy>,
}

impl Backtester {
    pub fn new(config: &Config, strategy: Box<dyn Strategy>) -> Result<Self> {
        let instrument = config.backtest.instrument()?;
        Ok(Backtester {
            settings: config.backtest.clone(),
            instrument,
            strategy,
        })
    }

    pub fn strategy(&self) -> &dyn Strategy {
        self.strategy.as_ref()
    }

    fn commission(&self, notional: f64) -> f64 {
        notional.abs() * self.settings.commission_per_million / 1_000_000.0
    }

    /// Run the strategy over the given series
    pub fn run(&mut self, series: &[BarSeries<'_>]) -> Result<BacktestResult> {
        if !series.iter().any(|s| s.role == BarRole::Primary) {
            bail!("Backtest needs a primary bar series");
        }

        let events = merge_events(series);
        let mut cash = self.settings.starting_capital;
        let mut position: Option<Position> = None;
        let mut trades = Vec::new();
        let mut equity_curve: Vec<(DateTime<Utc>, f64)> = Vec::new();
        let mut last_mark: Option<(DateTime<Utc>, f64)> = None;

        for event in &events {
            if event.role == BarRole::Trend {
                self.strategy.on_bar(event, position.as_ref());
                continue;
            }
            let candle = event.candle;

            // Exits against the bar range; bars that opened before the entry
            // fill are not part of the position's life
            if let Some(pos) = position.as_ref() {
                if candle.datetime >= pos.entry_time {
                    if let Some((price, reason)) = exit_hit(pos, candle) {
                        let trade = self.close_position(pos, price, event.closed_at, reason);
                        cash += trade.pnl - self.commission(trade.quantity * price);
                        self.strategy.notify_trade(&trade);
                        trades.push(trade);
                        position = None;
                    }
                }
            }

            if let Some(pos) = position.as_mut() {
                if let Some(new_stop) = self.strategy.update_trailing_stop(pos, candle.close) {
                    tracing::debug!(
                        from = pos.effective_stop(),
                        to = new_stop,
                        "Trailing stop moved"
                    );
                    pos.trailing_stop = Some(new_stop);
                }
            }

            let signal = self.strategy.on_bar(event, position.as_ref());

            if let Some(side) = signal.side() {
                let reverse = matches!(position.as_ref(), Some(pos) if pos.side != side);
                if reverse {
                    if let Some(pos) = position.take() {
                        let price = self.strategy.round_price(candle.close);
                        let trade =
                            self.close_position(&pos, price, event.closed_at, ExitReason::Reversal);
                        cash += trade.pnl - self.commission(trade.quantity * price);
                        self.strategy.notify_trade(&trade);
                        trades.push(trade);
                    }
                }
                if position.is_none() {
                    let pos = self.open_position(side, candle.close, event.closed_at);
                    cash -= self.commission(pos.current_value());
                    position = Some(pos);
                }
            }

            let equity = cash
                + position
                    .as_ref()
                    .map_or(0.0, |p| p.unrealized_pnl(candle.close));
            equity_curve.push((event.closed_at, equity));
            last_mark = Some((event.closed_at, candle.close));
        }

        if let (Some(pos), Some((at, close))) = (position.take(), last_mark) {
            let price = self.strategy.round_price(close);
            let trade = self.close_position(&pos, price, at, ExitReason::EndOfData);
            cash += trade.pnl - self.commission(trade.quantity * price);
            self.strategy.notify_trade(&trade);
            trades.push(trade);
            if let Some(last) = equity_curve.last_mut() {
                last.1 = cash;
            }
        }

        let stats = self.strategy.stats();
        let metrics = self.calculate_metrics(&trades, &equity_curve, &stats);

        tracing::debug!(
            trades = metrics.total_trades,
            pnl = format!("{:.2}", metrics.total_pnl),
            sharpe = format!("{:.3}", metrics.sharpe_ratio),
            "Backtest finished"
        );

        Ok(BacktestResult {
            trades,
            equity_curve,
            metrics,
            stats,
        })
    }

    fn open_position(&self, side: Side, close: f64, at: DateTime<Utc>) -> Position {
        let entry_price = self.strategy.round_price(close);
        let dormant_entry = self.strategy.last_signal_dormant();
        tracing::debug!(?side, entry_price, dormant = dormant_entry, at = %at, "Position opened");
        Position {
            symbol: self.instrument.symbol.clone(),
            side,
            entry_price,
            quantity: self.strategy.trade_size(),
            stop_price: self.strategy.calculate_stop_loss(side, entry_price),
            target_price: self.strategy.calculate_take_profit(side, entry_price),
            trailing_stop: None,
            entry_time: at,
            dormant_entry,
        }
    }

    fn close_position(
        &self,
        pos: &Position,
        exit_price: f64,
        exit_time: DateTime<Utc>,
        exit_reason: ExitReason,
    ) -> Trade {
        let pnl = pos.unrealized_pnl(exit_price);
        let commission =
            self.commission(pos.quantity * pos.entry_price) + self.commission(pos.quantity * exit_price);

        Trade {
            symbol: pos.symbol.clone(),
            side: pos.side,
            entry_price: pos.entry_price,
            exit_price,
            quantity: pos.quantity,
            entry_time: pos.entry_time,
            exit_time,
            pnl,
            commission,
            net_pnl: pnl - commission,
            exit_reason,
            dormant_entry: pos.dormant_entry,
        }
    }

    fn calculate_metrics(
        &self,
        trades: &[Trade],
        equity_curve: &[(DateTime<Utc>, f64)],
        stats: &StrategyStats,
    ) -> PerformanceMetrics {
        let base = PerformanceMetrics {
            rejected_signals: stats.rejected_total(),
            dormant_activations: stats.dormant_activations,
            ..Default::default()
        };
        if trades.is_empty() || equity_curve.is_empty() {
            return base;
        }

        let initial_capital = self.settings.starting_capital;
        let total_pnl: f64 = trades.iter().map(|t| t.net_pnl).sum();
        let total_return = total_pnl / initial_capital * 100.0;
        let total_commission: f64 = trades.iter().map(|t| t.commission).sum();

        let winning_trades: Vec<&Trade> = trades.iter().filter(|t| t.is_win()).collect();
        let losing_trades: Vec<&Trade> = trades.iter().filter(|t| !t.is_win()).collect();

        let win_fraction = winning_trades.len() as f64 / trades.len() as f64;
        let gross_profits: f64 = winning_trades.iter().map(|t| t.net_pnl).sum();
        let gross_losses: f64 = losing_trades.iter().map(|t| t.net_pnl.abs()).sum();

        let profit_factor = if gross_losses > 0.0 {
            (gross_profits / gross_losses).min(MAX_PROFIT_FACTOR)
        } else if gross_profits > 0.0 {
            MAX_PROFIT_FACTOR
        } else {
            0.0
        };

        let avg_win = if !winning_trades.is_empty() {
            gross_profits / winning_trades.len() as f64
        } else {
            0.0
        };
        let avg_loss = if !losing_trades.is_empty() {
            gross_losses / losing_trades.len() as f64
        } else {
            0.0
        };
        let expectancy = win_fraction * avg_win - (1.0 - win_fraction) * avg_loss;

        let largest_win = winning_trades.iter().map(|t| t.net_pnl).fold(0.0, f64::max);
        let largest_loss = losing_trades.iter().map(|t| t.net_pnl).fold(0.0, f64::min);

        let (max_drawdown_abs, max_drawdown) = max_drawdown(initial_capital, equity_curve);

        PerformanceMetrics {
            total_pnl,
            total_return,
            sharpe_ratio: sharpe_ratio(initial_capital, equity_curve),
            max_drawdown,
            max_drawdown_abs,
            win_rate: win_fraction * 100.0,
            profit_factor,
            expectancy,
            total_trades: trades.len(),
            winning_trades: winning_trades.len(),
            losing_trades: losing_trades.len(),
            long_trades: trades.iter().filter(|t| t.side == Side::Buy).count(),
            short_trades: trades.iter().filter(|t| t.side == Side::Sell).count(),
            avg_win,
            avg_loss,
            largest_win,
            largest_loss,
            total_commission,
            dormant_trades: trades.iter().filter(|t| t.dormant_entry).count(),
            ..base
        }
    }
}

/// Stop or target touched inside the bar. When both are, the stop wins.
/// A bar opening through a level fills at the open.
fn exit_hit(pos: &Position, candle: &Candle) -> Option<(f64, ExitReason)> {
    let stop = pos.effective_stop();
    let stop_reason = if pos.trailing_stop.is_some() {
        ExitReason::TrailingStop
    } else {
        ExitReason::StopLoss
    };

    match pos.side {
        Side::Buy => {
            if candle.low <= stop {
                Some((candle.open.min(stop), stop_reason))
            } else if candle.high >= pos.target_price {
                Some((candle.open.max(pos.target_price), ExitReason::TakeProfit))
            } else {
                None
            }
        }
        Side::Sell => {
            if candle.high >= stop {
                Some((candle.open.max(stop), stop_reason))
            } else if candle.low <= pos.target_price {
                Some((candle.open.min(pos.target_price), ExitReason::TakeProfit))
            } else {
                None
            }
        }
    }
}

/// (absolute, percent) peak-to-trough drawdown
pub fn max_drawdown(initial_capital: f64, equity_curve: &[(DateTime<Utc>, f64)]) -> (f64, f64) {
    let mut peak = initial_capital;
    let mut max_abs = 0.0_f64;
    let mut max_pct = 0.0_f64;
    for (_, equity) in equity_curve {
        if *equity > peak {
            peak = *equity;
        }
        let dd = peak - equity;
        max_abs = max_abs.max(dd);
        if peak > 0.0 {
            max_pct = max_pct.max(dd / peak * 100.0);
        }
    }
    (max_abs, max_pct)
}

/// Annualised Sharpe from end-of-day equity (risk-free rate 0)
pub fn sharpe_ratio(initial_capital: f64, equity_curve: &[(DateTime<Utc>, f64)]) -> f64 {
    let mut daily: BTreeMap<NaiveDate, f64> = BTreeMap::new();
    for (at, equity) in equity_curve {
        daily.insert(at.date_naive(), *equity);
    }

    let mut prev = initial_capital;
    let mut returns = Vec::with_capacity(daily.len());
    for equity in daily.values() {
        if prev > 0.0 {
            returns.push((equity - prev) / prev);
        }
        prev = *equity;
    }
    if returns.len() < 2 {
        return 0.0;
    }

    let mean = returns.iter().mean();
    let std_dev = returns.iter().std_dev();
    if std_dev.is_finite() && std_dev > 0.0 {
        mean / std_dev * TRADING_DAYS_PER_YEAR.sqrt()
    } else {
        0.0
    }
}

#[derive(Debug, Default)]
pub struct BacktestResult {
    pub trades: Vec<Trade>,
    pub equity_curve: Vec<(DateTime<Utc>, f64)>,
    pub metrics: PerformanceMetrics,
    pub stats: StrategyStats,
}
