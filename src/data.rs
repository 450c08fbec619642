//! Data loading and validation
//!
//! Reads and writes OHLCV CSV files (`datetime,open,high,low,close,volume`).
//! Datetimes are bar open times in UTC.

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDateTime, Utc};
use std::path::Path;
use tracing::warn;

use crate::Candle;

const CSV_HEADER: [&str; 6] = ["datetime", "open", "high", "low", "close", "volume"];

const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%Y%m%d %H:%M:%S",
];

// =============================================================================
// CSV Data Loading
// =============================================================================

/// Parse a bar timestamp: RFC 3339, common naive formats (taken as UTC),
/// or Unix epoch seconds / milliseconds
pub fn parse_datetime(raw: &str) -> Option<DateTime<Utc>> {
    let s = raw.trim();
    if let Ok(dt) = s.parse::<DateTime<Utc>>() {
        return Some(dt);
    }
    for fmt in NAIVE_FORMATS {
        if let Ok(ndt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(ndt.and_utc());
        }
    }
    let epoch: i64 = s.parse().ok()?;
    if epoch > 100_000_000_000 {
        DateTime::from_timestamp_millis(epoch)
    } else {
        DateTime::from_timestamp(epoch, 0)
    }
}

/// Load OHLCV data from CSV file
pub fn load_csv(path: impl AsRef<Path>) -> Result<Vec<Candle>> {
    let path = path.as_ref();
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(path)
        .with_context(|| format!("Failed to open CSV file {}", path.display()))?;

    let mut candles = Vec::new();

    for (row_idx, result) in reader.records().enumerate() {
        let line = row_idx + 2;
        let record = result.with_context(|| format!("Failed to read row {}", line))?;

        let dt_str = record.get(0).context("Missing datetime column")?;
        let datetime = parse_datetime(dt_str)
            .with_context(|| format!("Row {}: failed to parse datetime '{}'", line, dt_str))?;

        let field = |idx: usize, name: &str| -> Result<f64> {
            record
                .get(idx)
                .with_context(|| format!("Row {}: missing {} column", line, name))?
                .parse::<f64>()
                .with_context(|| format!("Row {}: failed to parse {}", line, name))
        };

        // Volume is optional for quote-derived FX bars
        let volume = match record.get(5) {
            Some(v) if !v.is_empty() => field(5, "volume")?,
            _ => 0.0,
        };

        candles.push(Candle {
            datetime,
            open: field(1, "open")?,
            high: field(2, "high")?,
            low: field(3, "low")?,
            close: field(4, "close")?,
            volume,
        });
    }

    Ok(candles)
}

/// Write candles as CSV with an RFC 3339 datetime column
pub fn write_csv(path: impl AsRef<Path>, candles: &[Candle]) -> Result<()> {
    let path = path.as_ref();
    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("Failed to create {}", path.display()))?;
    writer.write_record(CSV_HEADER)?;
    for c in candles {
        writer.write_record(&[
            c.datetime.to_rfc3339(),
            c.open.to_string(),
            c.high.to_string(),
            c.low.to_string(),
            c.close.to_string(),
            c.volume.to_string(),
        ])?;
    }
    writer.flush()?;
    Ok(())
}

/// Sort by time and drop duplicate timestamps (last row wins)
pub fn sort_and_dedupe(mut candles: Vec<Candle>) -> (Vec<Candle>, usize) {
    candles.sort_by_key(|c| c.datetime);
    let before = candles.len();
    let mut out: Vec<Candle> = Vec::with_capacity(before);
    for candle in candles {
        match out.last_mut() {
            Some(last) if last.datetime == candle.datetime => *last = candle,
            _ => out.push(candle),
        }
    }
    let dropped = before - out.len();
    if dropped > 0 {
        warn!(dropped, "Dropped duplicate timestamps");
    }
    (out, dropped)
}

// =============================================================================
// Data Validation
// =============================================================================

/// Validate candle data for consistency
pub fn validate_candles(candles: &[Candle]) -> ValidationResult {
    let mut errors = Vec::new();
    let mut warnings = Vec::new();

    if candles.is_empty() {
        errors.push("No candles provided".to_string());
        return ValidationResult { errors, warnings };
    }

    for (i, candle) in candles.iter().enumerate() {
        if let Err(e) = candle.validate() {
            errors.push(format!("Candle {} ({}): {}", i, candle.datetime, e));
        }
        if i > 0 {
            let prev = candles[i - 1].datetime;
            if candle.datetime == prev {
                errors.push(format!("Candle {}: duplicate timestamp {}", i, candle.datetime));
            } else if candle.datetime < prev {
                errors.push(format!("Candle {}: not chronological", i));
            }
        }
        if candle.volume == 0.0 && i == 0 {
            warnings.push("Volume column is zero; bars are quote-derived".to_string());
        }
    }

    ValidationResult { errors, warnings }
}

/// Result of data validation
#[derive(Debug)]
pub struct ValidationResult {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationResult {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }
}

// =============================================================================
// Tests
// =============================================================================
