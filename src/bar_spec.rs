//! Bar specifications
//!
//! A bar spec encodes aggregation interval, price field and data source as
//! `{step}-{aggregation}-{price_type}-{source}`, e.g. `15-MINUTE-MID-EXTERNAL`.

use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BarSpecError {
    #[error("bar spec '{0}' must have 4 parts: STEP-AGGREGATION-PRICE-SOURCE")]
    WrongPartCount(String),

    #[error("invalid step '{0}': must be a positive integer")]
    InvalidStep(String),

    #[error("unknown aggregation '{0}'")]
    UnknownAggregation(String),

    #[error("unknown price type '{0}'")]
    UnknownPriceType(String),

    #[error("unknown aggregation source '{0}'")]
    UnknownSource(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Aggregation {
    Second,
    Minute,
    Hour,
    Day,
    Week,
}

impl Aggregation {
    fn seconds(self) -> i64 {
        match self {
            Aggregation::Second => 1,
            Aggregation::Minute => 60,
            Aggregation::Hour => 3_600,
            Aggregation::Day => 86_400,
            Aggregation::Week => 604_800,
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            Aggregation::Second => "SECOND",
            Aggregation::Minute => "MINUTE",
            Aggregation::Hour => "HOUR",
            Aggregation::Day => "DAY",
            Aggregation::Week => "WEEK",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PriceType {
    Bid,
    Ask,
    Mid,
    Last,
}

impl PriceType {
    fn as_str(self) -> &'static str {
        match self {
            PriceType::Bid => "BID",
            PriceType::Ask => "ASK",
            PriceType::Mid => "MID",
            PriceType::Last => "LAST",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum AggregationSource {
    External,
    Internal,
}

impl AggregationSource {
    fn as_str(self) -> &'static str {
        match self {
            AggregationSource::External => "EXTERNAL",
            AggregationSource::Internal => "INTERNAL",
        }
    }
}

/// Parsed bar specification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct BarSpec {
    pub step: u32,
    pub aggregation: Aggregation,
    pub price_type: PriceType,
    pub source: AggregationSource,
}

impl BarSpec {
    pub fn new(
        step: u32,
        aggregation: Aggregation,
        price_type: PriceType,
        source: AggregationSource,
    ) -> Self {
        Self {
            step,
            aggregation,
            price_type,
            source,
        }
    }

    /// Wall-clock length of one bar
    pub fn duration(&self) -> Duration {
        Duration::seconds(self.aggregation.seconds() * self.step as i64)
    }

    /// True when bars of `self` are strictly shorter than bars of `other`
    pub fn is_lower_than(&self, other: &BarSpec) -> bool {
        self.duration() < other.duration()
    }

    /// Directory/file name component used by the bar catalog
    pub fn file_stem(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for BarSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}-{}-{}-{}",
            self.step,
            self.aggregation.as_str(),
            self.price_type.as_str(),
            self.source.as_str()
        )
    }
}

impl FromStr for BarSpec {
    type Err = BarSpecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.trim().split('-').collect();
        if parts.len() != 4 {
            return Err(BarSpecError::WrongPartCount(s.to_string()));
        }

        let step: u32 = parts[0]
            .parse()
            .map_err(|_| BarSpecError::InvalidStep(parts[0].to_string()))?;
        if step == 0 {
            return Err(BarSpecError::InvalidStep(parts[0].to_string()));
        }

        let aggregation = match parts[1].to_ascii_uppercase().as_str() {
            "SECOND" => Aggregation::Second,
            "MINUTE" => Aggregation::Minute,
            "HOUR" => Aggregation::Hour,
            "DAY" => Aggregation::Day,
            "WEEK" => Aggregation::Week,
            other => return Err(BarSpecError::UnknownAggregation(other.to_string())),
        };

        let price_type = match parts[2].to_ascii_uppercase().as_str() {
            "BID" => PriceType::Bid,
            "ASK" => PriceType::Ask,
            "MID" => PriceType::Mid,
            "LAST" => PriceType::Last,
            other => return Err(BarSpecError::UnknownPriceType(other.to_string())),
        };

        let source = match parts[3].to_ascii_uppercase().as_str() {
            "EXTERNAL" => AggregationSource::External,
            "INTERNAL" => AggregationSource::Internal,
            other => return Err(BarSpecError::UnknownSource(other.to_string())),
        };

        Ok(BarSpec::new(step, aggregation, price_type, source))
    }
}

impl TryFrom<String> for BarSpec {
    type Error = BarSpecError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<BarSpec> for String {
    fn from(spec: BarSpec) -> Self {
        spec.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_fifteen_minute_mid() {
        let spec: BarSpec = "15-MINUTE-MID-EXTERNAL".parse().unwrap();
        assert_eq!(spec.step, 15);
        assert_eq!(spec.aggregation, Aggregation::Minute);
        assert_eq!(spec.price_type, PriceType::Mid);
        assert_eq!(spec.source, AggregationSource::External);
        assert_eq!(spec.duration(), Duration::minutes(15));
        assert_eq!(spec.to_string(), "15-MINUTE-MID-EXTERNAL");
    }

    #[test]
    fn test_lowercase_tokens_accepted() {
        let spec: BarSpec = "1-hour-bid-internal".parse().unwrap();
        assert_eq!(spec.to_string(), "1-HOUR-BID-INTERNAL");
    }

    #[test]
    fn test_ordering_by_duration() {
        let m5: BarSpec = "5-MINUTE-MID-EXTERNAL".parse().unwrap();
        let m15: BarSpec = "15-MINUTE-MID-EXTERNAL".parse().unwrap();
        let h1: BarSpec = "1-HOUR-MID-EXTERNAL".parse().unwrap();
        assert!(m5.is_lower_than(&m15));
        assert!(m15.is_lower_than(&h1));
        assert!(!h1.is_lower_than(&h1));
    }

    #[test]
    fn test_invalid_specs() {
        assert!(matches!(
            "15-MINUTE-MID".parse::<BarSpec>(),
            Err(BarSpecError::WrongPartCount(_))
        ));
        assert!(matches!(
            "0-MINUTE-MID-EXTERNAL".parse::<BarSpec>(),
            Err(BarSpecError::InvalidStep(_))
        ));
        assert!(matches!(
            "15-TICK-MID-EXTERNAL".parse::<BarSpec>(),
            Err(BarSpecError::UnknownAggregation(_))
        ));
        assert!(matches!(
            "15-MINUTE-CLOSE-EXTERNAL".parse::<BarSpec>(),
            Err(BarSpecError::UnknownPriceType(_))
        ));
    }

    #[test]
    fn test_serde_as_string() {
        let spec: BarSpec = "4-HOUR-MID-EXTERNAL".parse().unwrap();
        let json = serde_json::to_string(&spec).unwrap();
        assert_eq!(json, "\"4-HOUR-MID-EXTERNAL\"");
        let back: BarSpec = serde_json::from_str(&json).unwrap();
        assert_eq!(back, spec);
    }
}
