//! MA Crossover Strategy Implementation
//!
//! Signal flow on each primary bar:
//! 1. Update DMI and stochastic with the bar
//! 2. Update the fast/slow SMA pair and look for a crossing
//! 3. Reject crossings narrower than the pip threshold
//! 4. Run the enabled filters (trend, DMI, stochastic) in that order
//!
//! Dormant-mode bars only ever open positions in the primary trend's
//! direction, and only while the book is flat.

use anyhow::Result;
use tracing::debug;

use super::config::MaCrossoverConfig;
use super::dormant::DormantMode;
use crate::bar_spec::BarSpec;
use crate::indicators::{
    CrossDirection, Crossover, DmiValue, SmaCrossTracker, StochValue, StreamingDmi,
    StreamingStochastic,
};
use crate::instrument::Instrument;
use crate::strategies::{BarEvent, BarRole, Strategy, StrategyStats};
use crate::{Position, Side, Signal};

fn ta_err(e: ta::errors::TaError) -> anyhow::Error {
    anyhow::anyhow!("indicator setup failed: {:?}", e)
}

fn to_signal(direction: CrossDirection) -> Signal {
    match direction {
        CrossDirection::Bullish => Signal::Long,
        CrossDirection::Bearish => Signal::Short,
    }
}

/// Moving-average crossover with optional confirmation filters
pub struct MaCrossoverStrategy {
    config: MaCrossoverConfig,
    instrument: Instrument,
    primary: SmaCrossTracker,
    trend: Option<SmaCrossTracker>,
    dmi: Option<StreamingDmi>,
    last_dmi: Option<DmiValue>,
    stoch: Option<StreamingStochastic>,
    last_stoch: Option<StochValue>,
    dormant: DormantMode,
    stats: StrategyStats,
    last_signal_dormant: bool,
}

impl MaCrossoverStrategy {
    pub fn new(config: MaCrossoverConfig, instrument: Instrument) -> Result<Self> {
        config.validate()?;

        let primary = SmaCrossTracker::new(config.fast_period, config.slow_period).map_err(ta_err)?;
        let trend = if config.trend_filter_enabled {
            Some(
                SmaCrossTracker::new(config.trend_fast_period, config.trend_slow_period)
                    .map_err(ta_err)?,
            )
        } else {
            None
        };
        let dmi = config.dmi_enabled.then(|| StreamingDmi::new(config.dmi_period));
        let stoch = if config.stoch_enabled {
            Some(
                StreamingStochastic::new(config.stoch_period_k, config.stoch_period_d)
                    .map_err(ta_err)?,
            )
        } else {
            None
        };
        let dormant = DormantMode::new(
            config.dormant_mode_enabled,
            config.dormant_threshold_hours,
            config.dormant_fast_period,
            config.dormant_slow_period,
        )
        .map_err(ta_err)?;

        debug!(
            instrument = %instrument.instrument_id(),
            fast = config.fast_period,
            slow = config.slow_period,
            threshold_pips = config.crossover_threshold_pips,
            trend_filter = config.trend_filter_enabled,
            dmi = config.dmi_enabled,
            stoch = config.stoch_enabled,
            dormant = config.dormant_mode_enabled,
            "MA crossover strategy initialized"
        );

        Ok(Self {
            config,
            instrument,
            primary,
            trend,
            dmi,
            last_dmi: None,
            stoch,
            last_stoch: None,
            dormant,
            stats: StrategyStats::default(),
            last_signal_dormant: false,
        })
    }

    pub fn is_dormant(&self) -> bool {
        self.dormant.is_active()
    }

    fn on_primary_bar(&mut self, event: &BarEvent<'_>, position: Option<&Position>) -> Signal {
        self.dormant.observe(event.closed_at);

        if let Some(dmi) = self.dmi.as_mut() {
            if let Some(v) = dmi.update(event.candle) {
                self.last_dmi = Some(v);
            }
        }
        if let Some(stoch) = self.stoch.as_mut() {
            if let Some(v) = stoch.update(event.candle) {
                self.last_stoch = Some(v);
            }
        }

        match self.primary.update(event.candle.close) {
            Some(cross) => {
                self.stats.crossovers += 1;
                if self.dormant.record_primary_crossover(event.closed_at) {
                    debug!(at = %event.closed_at, "Dormant mode deactivated by primary crossover");
                }
                self.evaluate_primary(&cross)
            }
            None => {
                if self.dormant.check_activation(event.closed_at, position.is_some()) {
                    self.stats.dormant_activations += 1;
                }
                Signal::Flat
            }
        }
    }

    fn evaluate_primary(&mut self, cross: &Crossover) -> Signal {
        if !self.passes_threshold(cross) {
            return Signal::Flat;
        }
        let direction = cross.direction;

        if !self.trend_allows(direction) {
            self.stats.rejected_trend += 1;
            debug!(?direction, "Crossover rejected by trend filter");
            return Signal::Flat;
        }
        if !self.dmi_allows(direction) {
            self.stats.rejected_dmi += 1;
            debug!(?direction, dmi = ?self.last_dmi, "Crossover rejected by DMI filter");
            return Signal::Flat;
        }
        if !self.stoch_allows(direction) {
            self.stats.rejected_stoch += 1;
            debug!(?direction, stoch = ?self.last_stoch, "Crossover rejected by stochastic filter");
            return Signal::Flat;
        }

        self.stats.signals += 1;
        to_signal(direction)
    }

    fn on_dormant_bar(&mut self, event: &BarEvent<'_>, position: Option<&Position>) -> Signal {
        if self.dormant.check_activation(event.closed_at, position.is_some()) {
            self.stats.dormant_activations += 1;
        }

        let Some(cross) = self.dormant.update_lower(event.candle.close) else {
            return Signal::Flat;
        };
        if position.is_some() {
            return Signal::Flat;
        }
        if !self.passes_threshold(&cross) {
            return Signal::Flat;
        }
        if self.primary.trend() != Some(cross.direction) {
            self.stats.rejected_trend += 1;
            debug!(direction = ?cross.direction, "Dormant crossover against primary trend");
            return Signal::Flat;
        }

        self.stats.signals += 1;
        self.stats.dormant_signals += 1;
        self.last_signal_dormant = true;
        to_signal(cross.direction)
    }

    fn passes_threshold(&mut self, cross: &Crossover) -> bool {
        let gap_pips = self.instrument.price_to_pips(cross.gap());
        if gap_pips < self.config.crossover_threshold_pips {
            self.stats.rejected_threshold += 1;
            debug!(
                gap_pips = format!("{:.2}", gap_pips),
                threshold = self.config.crossover_threshold_pips,
                "Crossover below pip threshold"
            );
            return false;
        }
        true
    }

    fn trend_allows(&self, direction: CrossDirection) -> bool {
        match &self.trend {
            None => true,
            Some(tracker) => tracker.trend() == Some(direction),
        }
    }

    fn dmi_allows(&self, direction: CrossDirection) -> bool {
        if self.dmi.is_none() {
            return true;
        }
        let Some(v) = self.last_dmi else {
            return false;
        };
        let aligned = match direction {
            CrossDirection::Bullish => v.plus_di > v.minus_di,
            CrossDirection::Bearish => v.minus_di > v.plus_di,
        };
        if !aligned {
            return false;
        }
        if self.config.dmi_min_adx > 0.0 {
            return v.adx.is_some_and(|adx| adx >= self.config.dmi_min_adx);
        }
        true
    }

    fn stoch_allows(&self, direction: CrossDirection) -> bool {
        if self.stoch.is_none() {
            return true;
        }
        let Some(v) = self.last_stoch else {
            return false;
        };
        match direction {
            CrossDirection::Bullish => v.k > v.d && v.k >= self.config.stoch_bullish_threshold,
            CrossDirection::Bearish => v.k < v.d && v.k <= self.config.stoch_bearish_threshold,
        }
    }
}

impl Strategy for MaCrossoverStrategy {
    fn name(&self) -> &'static str {
        super::NAME
    }

    fn required_bar_specs(&self) -> Vec<(BarRole, BarSpec)> {
        self.config.bar_requirements()
    }

    fn on_bar(&mut self, event: &BarEvent<'_>, position: Option<&Position>) -> Signal {
        match event.role {
            BarRole::Trend => {
                if let Some(tracker) = self.trend.as_mut() {
                    tracker.update(event.candle.close);
                }
                Signal::Flat
            }
            BarRole::Primary => {
                self.last_signal_dormant = false;
                self.on_primary_bar(event, position)
            }
            BarRole::Dormant => {
                self.last_signal_dormant = false;
                self.on_dormant_bar(event, position)
            }
        }
    }

    fn calculate_stop_loss(&self, side: Side, entry_price: f64) -> f64 {
        let distance = self.instrument.pips_to_price(self.config.stop_loss_pips);
        self.round_price(entry_price - side.sign() * distance)
    }

    fn calculate_take_profit(&self, side: Side, entry_price: f64) -> f64 {
        let distance = self.instrument.pips_to_price(self.config.take_profit_pips);
        self.round_price(entry_price + side.sign() * distance)
    }

    fn update_trailing_stop(&self, position: &Position, current_price: f64) -> Option<f64> {
        let moved_pips = self.instrument.price_to_pips(position.favorable_move(current_price));
        if moved_pips < self.config.trailing_stop_activation_pips {
            return None;
        }

        let distance = self.instrument.pips_to_price(self.config.trailing_stop_distance_pips);
        let candidate = self.round_price(current_price - position.side.sign() * distance);
        let current = position.effective_stop();

        let improves = match position.side {
            Side::Buy => candidate > current,
            Side::Sell => candidate < current,
        };
        improves.then_some(candidate)
    }

    fn trade_size(&self) -> f64 {
        self.config.trade_size
    }

    fn round_price(&self, price: f64) -> f64 {
        self.instrument.round_price(price)
    }

    fn last_signal_dormant(&self) -> bool {
        self.last_signal_dormant
    }

    fn stats(&self) -> StrategyStats {
        self.stats.clone()
    }
}
