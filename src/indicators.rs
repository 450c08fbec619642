//! Technical indicators
//!
//! Streaming versions are fed one bar at a time by the strategy state
//! machine. The batch DMI/ADX and stochastic functions compute the same
//! values over whole slices and return `None` during warm-up; they are used
//! for offline analysis and to cross-check the streaming state.

use ta::indicators::{FastStochastic, SimpleMovingAverage};
use ta::Next;

use crate::Candle;

/// Wilder smoothing (RMA), seeded with the SMA of the first `period` values
fn wilder(values: &[f64], period: usize) -> Vec<Option<f64>> {
    let mut result = Vec::with_capacity(values.len());
    if period == 0 {
        return vec![None; values.len()];
    }

    let mut acc: Option<f64> = None;
    for (i, &value) in values.iter().enumerate() {
        if i + 1 < period {
            result.push(None);
        } else if i + 1 == period {
            let seed = values[..period].iter().sum::<f64>() / period as f64;
            acc = Some(seed);
            result.push(acc);
        } else if let Some(prev) = acc {
            let next = prev + (value - prev) / period as f64;
            acc = Some(next);
            result.push(acc);
        }
    }
    result
}

/// Directional Movement Index components (+DI, -DI), scaled 0-100.
/// The first bar has no previous close, so smoothing starts at the second.
pub fn dmi(candles: &[Candle], period: usize) -> (Vec<Option<f64>>, Vec<Option<f64>>) {
    let n = candles.len();
    let mut plus_di = vec![None; n];
    let mut minus_di = vec![None; n];
    if n < 2 {
        return (plus_di, minus_di);
    }

    let mut tr = Vec::with_capacity(n - 1);
    let mut plus_dm = Vec::with_capacity(n - 1);
    let mut minus_dm = Vec::with_capacity(n - 1);

    for pair in candles.windows(2) {
        let (prev, cur) = (&pair[0], &pair[1]);
        let up_move = cur.high - prev.high;
        let down_move = prev.low - cur.low;

        plus_dm.push(if up_move > down_move && up_move > 0.0 { up_move } else { 0.0 });
        minus_dm.push(if down_move > up_move && down_move > 0.0 { down_move } else { 0.0 });
        tr.push(
            (cur.high - cur.low)
                .max((cur.high - prev.close).abs())
                .max((cur.low - prev.close).abs()),
        );
    }

    let smoothed_tr = wilder(&tr, period);
    let smoothed_plus = wilder(&plus_dm, period);
    let smoothed_minus = wilder(&minus_dm, period);

    for i in 0..n - 1 {
        let values = match (smoothed_tr[i], smoothed_plus[i], smoothed_minus[i]) {
            (Some(tr), Some(p), Some(m)) if tr > 0.0 => (p / tr * 100.0, m / tr * 100.0),
            (Some(_), Some(_), Some(_)) => (0.0, 0.0),
            _ => continue,
        };
        plus_di[i + 1] = Some(values.0);
        minus_di[i + 1] = Some(values.1);
    }

    (plus_di, minus_di)
}

/// Calculate Average Directional Index (ADX)
pub fn adx(candles: &[Candle], period: usize) -> Vec<Option<f64>> {
    let (plus_di, minus_di) = dmi(candles, period);

    // DX only exists once the DI lines are warm; smooth that tail
    let mut result = vec![None; candles.len()];
    let Some(first) = plus_di.iter().position(|v| v.is_some()) else {
        return result;
    };

    let dx: Vec<f64> = plus_di[first..]
        .iter()
        .zip(&minus_di[first..])
        .map(|(p, m)| {
            let (p, m) = (p.unwrap_or(0.0), m.unwrap_or(0.0));
            let sum = p + m;
            if sum > 0.0 {
                (p - m).abs() / sum * 100.0
            } else {
                0.0
            }
        })
        .collect();

    for (offset, value) in wilder(&dx, period).into_iter().enumerate() {
        result[first + offset] = value;
    }
    result
}

/// Stochastic oscillator: (%K, %D) where %D is the SMA of %K
pub fn stochastic(
    candles: &[Candle],
    k_period: usize,
    d_period: usize,
) -> (Vec<Option<f64>>, Vec<Option<f64>>) {
    let n = candles.len();
    let mut k = vec![None; n];
    if k_period == 0 {
        return (k, vec![None; n]);
    }

    for i in (k_period - 1)..n {
        let window = &candles[i + 1 - k_period..=i];
        let hh = window.iter().map(|c| c.high).fold(f64::MIN, f64::max);
        let ll = window.iter().map(|c| c.low).fold(f64::MAX, f64::min);
        k[i] = Some(if hh > ll {
            (candles[i].close - ll) / (hh - ll) * 100.0
        } else {
            50.0
        });
    }

    let mut d = vec![None; n];
    if d_period > 0 {
        for i in 0..n {
            if i + 1 < k_period + d_period - 1 {
                continue;
            }
            let window = &k[i + 1 - d_period..=i];
            let sum: f64 = window.iter().map(|v| v.unwrap_or(0.0)).sum();
            d[i] = Some(sum / d_period as f64);
        }
    }

    (k, d)
}

// =============================================================================
// Streaming indicators
// =============================================================================

/// Direction of a moving-average crossing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrossDirection {
    Bullish,
    Bearish,
}

/// A detected crossing with the fast/slow separation at the crossing bar
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Crossover {
    pub direction: CrossDirection,
    pub fast: f64,
    pub slow: f64,
}

impl Crossover {
    /// |fast - slow| in price units
    pub fn gap(&self) -> f64 {
        (self.fast - self.slow).abs()
    }
}

/// Fast/slow SMA pair that reports crossings bar by bar
#[derive(Debug, Clone)]
pub struct SmaCrossTracker {
    fast: SimpleMovingAverage,
    slow: SimpleMovingAverage,
    slow_period: usize,
    count: usize,
    current: Option<(f64, f64)>,
}

impl SmaCrossTracker {
    pub fn new(fast_period: usize, slow_period: usize) -> Result<Self, ta::errors::TaError> {
        Ok(Self {
            fast: SimpleMovingAverage::new(fast_period)?,
            slow: SimpleMovingAverage::new(slow_period)?,
            slow_period,
            count: 0,
            current: None,
        })
    }

    /// Feed a close. Returns a crossover when fast moved through slow on
    /// this bar (prev_fast <= prev_slow && fast > slow, or the mirror).
    pub fn update(&mut self, close: f64) -> Option<Crossover> {
        let fast = self.fast.next(close);
        let slow = self.slow.next(close);
        self.count += 1;

        if self.count < self.slow_period {
            return None;
        }

        let previous = self.current.replace((fast, slow));
        let (prev_fast, prev_slow) = previous?;

        if prev_fast <= prev_slow && fast > slow {
            Some(Crossover {
                direction: CrossDirection::Bullish,
                fast,
                slow,
            })
        } else if prev_fast >= prev_slow && fast < slow {
            Some(Crossover {
                direction: CrossDirection::Bearish,
                fast,
                slow,
            })
        } else {
            None
        }
    }

    /// Latest (fast, slow) once both averages are warm
    pub fn values(&self) -> Option<(f64, f64)> {
        self.current
    }

    /// Direction the averages currently point to
    pub fn trend(&self) -> Option<CrossDirection> {
        match self.current {
            Some((fast, slow)) if fast > slow => Some(CrossDirection::Bullish),
            Some((fast, slow)) if fast < slow => Some(CrossDirection::Bearish),
            _ => None,
        }
    }

    pub fn is_ready(&self) -> bool {
        self.current.is_some()
    }
}

/// Snapshot of the directional movement system
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DmiValue {
    pub plus_di: f64,
    pub minus_di: f64,
    /// None until DX itself has warmed up
    pub adx: Option<f64>,
}

/// Incremental +DI/-DI/ADX with Wilder smoothing
#[derive(Debug, Clone)]
pub struct StreamingDmi {
    period: usize,
    prev: Option<(f64, f64, f64)>,
    seed: Vec<(f64, f64, f64)>,
    smoothed: Option<(f64, f64, f64)>,
    dx_seed: Vec<f64>,
    adx: Option<f64>,
}

impl StreamingDmi {
    pub fn new(period: usize) -> Self {
        Self {
            period: period.max(1),
            prev: None,
            seed: Vec::new(),
            smoothed: None,
            dx_seed: Vec::new(),
            adx: None,
        }
    }

    pub fn update(&mut self, candle: &Candle) -> Option<DmiValue> {
        let (high, low, close) = (candle.high, candle.low, candle.close);
        let Some((prev_high, prev_low, prev_close)) = self.prev.replace((high, low, close)) else {
            return None;
        };

        let up_move = high - prev_high;
        let down_move = prev_low - low;
        let plus_dm = if up_move > down_move && up_move > 0.0 { up_move } else { 0.0 };
        let minus_dm = if down_move > up_move && down_move > 0.0 { down_move } else { 0.0 };
        let tr = (high - low)
            .max((high - prev_close).abs())
            .max((low - prev_close).abs());

        let period = self.period as f64;
        let (tr_s, plus_s, minus_s) = match self.smoothed {
            Some((tr_s, plus_s, minus_s)) => (
                tr_s + (tr - tr_s) / period,
                plus_s + (plus_dm - plus_s) / period,
                minus_s + (minus_dm - minus_s) / period,
            ),
            None => {
                self.seed.push((tr, plus_dm, minus_dm));
                if self.seed.len() < self.period {
                    return None;
                }
                let (t, p, m) = self
                    .seed
                    .drain(..)
                    .fold((0.0, 0.0, 0.0), |acc, v| (acc.0 + v.0, acc.1 + v.1, acc.2 + v.2));
                (t / period, p / period, m / period)
            }
        };
        self.smoothed = Some((tr_s, plus_s, minus_s));

        let (plus_di, minus_di) = if tr_s > 0.0 {
            (plus_s / tr_s * 100.0, minus_s / tr_s * 100.0)
        } else {
            (0.0, 0.0)
        };

        let di_sum = plus_di + minus_di;
        let dx = if di_sum > 0.0 {
            (plus_di - minus_di).abs() / di_sum * 100.0
        } else {
            0.0
        };

        self.adx = match self.adx {
            Some(prev) => Some(prev + (dx - prev) / period),
            None => {
                self.dx_seed.push(dx);
                if self.dx_seed.len() >= self.period {
                    let seed = self.dx_seed.iter().sum::<f64>() / period;
                    self.dx_seed.clear();
                    Some(seed)
                } else {
                    None
                }
            }
        };

        Some(DmiValue {
            plus_di,
            minus_di,
            adx: self.adx,
        })
    }
}

/// Snapshot of the stochastic oscillator
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StochValue {
    pub k: f64,
    pub d: f64,
}

/// Incremental %K/%D on top of `ta`'s fast stochastic
#[derive(Debug, Clone)]
pub struct StreamingStochastic {
    k: FastStochastic,
    d: SimpleMovingAverage,
    k_period: usize,
    warmup: usize,
    count: usize,
}

impl StreamingStochastic {
    pub fn new(k_period: usize, d_period: usize) -> Result<Self, ta::errors::TaError> {
        Ok(Self {
            k: FastStochastic::new(k_period)?,
            d: SimpleMovingAverage::new(d_period)?,
            k_period,
            warmup: k_period + d_period - 1,
            count: 0,
        })
    }

    /// Returns a value once both %K and %D cover full windows
    pub fn update(&mut self, candle: &Candle) -> Option<StochValue> {
        let k = self.k.next(candle);
        self.count += 1;
        if self.count < self.k_period {
            return None;
        }

        let d = self.d.next(k);
        if self.count < self.warmup {
            return None;
        }

        Some(StochValue { k, d })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use chrono::{Duration, TimeZone, Utc};

    fn candles_from_closes(closes: &[f64]) -> Vec<Candle> {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        closes
            .iter()
            .enumerate()
            .map(|(i, &c)| Candle {
                datetime: start + Duration::minutes(15 * i as i64),
                open: c,
                high: c + 0.0005,
                low: c - 0.0005,
                close: c,
                volume: 1.0,
            })
            .collect()
    }

    /// Closes on a slow sine with uneven ranges so both DM sides fire
    fn wave(n: usize) -> Vec<Candle> {
        let closes: Vec<f64> = (0..n)
            .map(|i| 1.1 + 0.004 * (i as f64 / 6.0).sin() + 0.0003 * ((i % 5) as f64))
            .collect();
        let mut candles = candles_from_closes(&closes);
        for (i, c) in candles.iter_mut().enumerate() {
            c.high += 0.0002 * ((i % 3) as f64);
            c.low -= 0.0001 * ((i % 4) as f64);
        }
        candles
    }

    #[test]
    fn test_dmi_uptrend_favours_plus_di() {
        let closes: Vec<f64> = (0..40).map(|i| 1.1 + i as f64 * 0.001).collect();
        let c = candles_from_closes(&closes);

        let (plus, minus) = dmi(&c, 14);
        assert!(plus[13].is_none());
        assert!(plus[14].is_some());
        assert!(plus.last().unwrap().unwrap() > minus.last().unwrap().unwrap());

        let adx_values = adx(&c, 14);
        assert!(adx_values[26].is_none());
        assert!(adx_values.last().unwrap().unwrap() > 50.0);
    }

    #[test]
    fn test_stochastic_bounds() {
        let closes: Vec<f64> = (0..30).map(|i| 1.1 + ((i % 7) as f64) * 0.001).collect();
        let c = candles_from_closes(&closes);
        let (k, d) = stochastic(&c, 14, 3);
        assert!(k[12].is_none());
        assert!(k[13].is_some());
        assert!(d[14].is_none());
        assert!(d[15].is_some());
        for v in k.iter().chain(d.iter()).flatten() {
            assert!((0.0..=100.0).contains(v));
        }
    }

    #[test]
    fn test_streaming_dmi_matches_batch() {
        let candles = wave(120);
        let (plus, minus) = dmi(&candles, 14);
        let adx_values = adx(&candles, 14);

        let mut streaming = StreamingDmi::new(14);
        for (i, candle) in candles.iter().enumerate() {
            match streaming.update(candle) {
                Some(v) => {
                    assert_relative_eq!(v.plus_di, plus[i].unwrap(), epsilon = 1e-9);
                    assert_relative_eq!(v.minus_di, minus[i].unwrap(), epsilon = 1e-9);
                    match (v.adx, adx_values[i]) {
                        (Some(a), Some(b)) => assert_relative_eq!(a, b, epsilon = 1e-9),
                        (None, None) => {}
                        other => panic!("ADX warm-up differs at bar {}: {:?}", i, other),
                    }
                }
                None => assert!(plus[i].is_none(), "streaming DMI late at bar {}", i),
            }
        }
        assert!(adx_values.last().unwrap().is_some());
    }

    #[test]
    fn test_streaming_stochastic_matches_batch() {
        let candles = wave(80);
        let (k, d) = stochastic(&candles, 14, 3);

        let mut streaming = StreamingStochastic::new(14, 3).unwrap();
        let mut compared = 0;
        for (i, candle) in candles.iter().enumerate() {
            match streaming.update(candle) {
                Some(v) => {
                    assert_relative_eq!(v.k, k[i].unwrap(), epsilon = 1e-9);
                    assert_relative_eq!(v.d, d[i].unwrap(), epsilon = 1e-9);
                    compared += 1;
                }
                None => assert!(d[i].is_none(), "streaming stochastic late at bar {}", i),
            }
        }
        assert_eq!(compared, 80 - 15);
    }

    #[test]
    fn test_cross_tracker_detects_bullish_then_bearish() {
        let mut tracker = SmaCrossTracker::new(2, 4).unwrap();
        let mut crosses = Vec::new();
        let series = [1.0, 0.99, 0.98, 0.97, 0.96, 1.10, 1.12, 0.80, 0.78];
        for close in series {
            if let Some(c) = tracker.update(close) {
                crosses.push(c.direction);
            }
        }
        assert_eq!(crosses, vec![CrossDirection::Bullish, CrossDirection::Bearish]);
    }

    #[test]
    fn test_cross_tracker_silent_during_warmup() {
        let mut tracker = SmaCrossTracker::new(3, 5).unwrap();
        for close in [1.0, 2.0, 3.0, 4.0] {
            assert!(tracker.update(close).is_none());
        }
        assert!(!tracker.is_ready());
        tracker.update(5.0);
        assert!(tracker.is_ready());
        assert_eq!(tracker.trend(), Some(CrossDirection::Bullish));
    }

    #[test]
    fn test_streaming_dmi_matches_direction() {
        let closes: Vec<f64> = (0..50).map(|i| 1.2 - i as f64 * 0.001).collect();
        let mut dmi = StreamingDmi::new(14);
        let mut last = None;
        for c in candles_from_closes(&closes) {
            if let Some(v) = dmi.update(&c) {
                last = Some(v);
            }
        }
        let last = last.unwrap();
        assert!(last.minus_di > last.plus_di);
        assert!(last.adx.is_some());
    }

    #[test]
    fn test_streaming_stochastic_warmup() {
        let mut stoch = StreamingStochastic::new(5, 3).unwrap();
        let closes: Vec<f64> = (0..10).map(|i| 1.1 + i as f64 * 0.001).collect();
        let values: Vec<Option<StochValue>> = candles_from_closes(&closes)
            .iter()
            .map(|c| stoch.update(c))
            .collect();
        assert!(values[5].is_none());
        assert!(values[6].is_some());
        let v = values[9].unwrap();
        assert!(v.k > 50.0);
    }
}
