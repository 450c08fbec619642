//! Dormant mode
//!
//! When the primary timeframe has gone quiet (no crossover for longer than a
//! threshold) and the book is flat, signal detection drops to a lower
//! timeframe. The next primary crossover switches it back off.

use chrono::{DateTime, Duration, Utc};

use crate::indicators::{Crossover, SmaCrossTracker};

#[derive(Debug, Clone)]
pub struct DormantMode {
    enabled: bool,
    threshold: Duration,
    last_crossover: Option<DateTime<Utc>>,
    active_since: Option<DateTime<Utc>>,
    lower: SmaCrossTracker,
}

impl DormantMode {
    pub fn new(
        enabled: bool,
        threshold_hours: f64,
        fast_period: usize,
        slow_period: usize,
    ) -> Result<Self, ta::errors::TaError> {
        Ok(Self {
            enabled,
            threshold: Duration::milliseconds((threshold_hours * 3_600_000.0).round() as i64),
            last_crossover: None,
            active_since: None,
            lower: SmaCrossTracker::new(fast_period, slow_period)?,
        })
    }

    pub fn is_active(&self) -> bool {
        self.active_since.is_some()
    }

    /// Start the quiet-period clock at the first bar seen
    pub fn observe(&mut self, at: DateTime<Utc>) {
        if self.last_crossover.is_none() {
            self.last_crossover = Some(at);
        }
    }

    /// Time since the last primary crossover (or since the first bar)
    pub fn elapsed(&self, now: DateTime<Utc>) -> Option<Duration> {
        self.last_crossover.map(|t| now - t)
    }

    /// Record a primary-timeframe crossover. Returns true if this ended an
    /// active dormant period.
    pub fn record_primary_crossover(&mut self, at: DateTime<Utc>) -> bool {
        self.last_crossover = Some(at);
        self.active_since.take().is_some()
    }

    /// Switch on when enabled, flat, and quiet for at least the threshold.
    /// Returns true only on the transition.
    pub fn check_activation(&mut self, now: DateTime<Utc>, has_position: bool) -> bool {
        if !self.enabled || self.is_active() || has_position {
            return false;
        }
        match self.elapsed(now) {
            Some(elapsed) if elapsed >= self.threshold => {
                self.active_since = Some(now);
                tracing::debug!(
                    quiet_hours = elapsed.num_minutes() as f64 / 60.0,
                    "Dormant mode activated"
                );
                true
            }
            _ => false,
        }
    }

    /// Feed a lower-timeframe close. The tracker is kept warm at all times;
    /// a crossing is only surfaced while dormant mode is active.
    pub fn update_lower(&mut self, close: f64) -> Option<Crossover> {
        let crossing = self.lower.update(close);
        if self.is_active() {
            crossing
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t(hour: u32, minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 4, hour, minute, 0).unwrap()
    }

    #[test]
    fn test_activates_after_threshold_when_flat() {
        let mut dm = DormantMode::new(true, 2.0, 2, 4).unwrap();
        dm.observe(t(0, 0));
        assert!(!dm.check_activation(t(1, 59), false));
        assert!(dm.check_activation(t(2, 0), false));
        assert!(dm.is_active());
        // Already active: no second transition
        assert!(!dm.check_activation(t(3, 0), false));
        assert!(dm.is_active());
    }

    #[test]
    fn test_open_position_blocks_activation() {
        let mut dm = DormantMode::new(true, 1.0, 2, 4).unwrap();
        dm.observe(t(0, 0));
        assert!(!dm.check_activation(t(5, 0), true));
        assert!(!dm.is_active());
    }

    #[test]
    fn test_disabled_never_activates() {
        let mut dm = DormantMode::new(false, 1.0, 2, 4).unwrap();
        dm.observe(t(0, 0));
        assert!(!dm.check_activation(t(10, 0), false));
    }

    #[test]
    fn test_primary_crossover_deactivates_and_resets_clock() {
        let mut dm = DormantMode::new(true, 1.0, 2, 4).unwrap();
        dm.observe(t(0, 0));
        assert!(dm.check_activation(t(1, 0), false));
        assert!(dm.record_primary_crossover(t(1, 15)));
        assert!(!dm.is_active());
        assert!(!dm.check_activation(t(2, 0), false));
        assert!(dm.check_activation(t(2, 15), false));
    }

    #[test]
    fn test_lower_crossings_hidden_while_inactive() {
        let mut dm = DormantMode::new(true, 1.0, 2, 4).unwrap();
        let closes = [1.0, 0.99, 0.98, 0.97, 0.96, 1.10];
        let mut seen = 0;
        for c in closes {
            if dm.update_lower(c).is_some() {
                seen += 1;
            }
        }
        assert_eq!(seen, 0);
    }
}
