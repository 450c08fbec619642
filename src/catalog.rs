//! On-disk bar catalog
//!
//! Layout: `{root}/{SYMBOL}/{BAR_SPEC}/{start}_{end}.csv`, one file per
//! ingested chunk. `start`/`end` are the first and last bar open times of
//! the chunk; chunks of one series must never overlap.

use chrono::{DateTime, Datelike, Duration, NaiveDateTime, Utc, Weekday};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{info, warn};

use crate::bar_spec::BarSpec;
use crate::data::{load_csv, sort_and_dedupe, write_csv};
use crate::instrument::Instrument;
use crate::Candle;

const CHUNK_TS_FORMAT: &str = "%Y%m%dT%H%M%SZ";

/// Gaps longer than this many bars are reported
const GAP_FACTOR: i32 = 3;

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("Intervals are not disjoint: [{start}, {end}] overlaps {existing}")]
    Overlap {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        existing: PathBuf,
    },

    #[error("no bars to ingest")]
    Empty,

    #[error("invalid bar at {at}: {reason}")]
    InvalidBar { at: DateTime<Utc>, reason: String },

    #[error("unrecognised chunk file name {0}")]
    BadChunkName(PathBuf),

    #[error("failed to read {path}: {message}")]
    Read { path: PathBuf, message: String },

    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl CatalogError {
    /// Process exit code for this failure
    pub fn exit_code(&self) -> u8 {
        match self {
            CatalogError::Overlap { .. } => 3,
            _ => 1,
        }
    }

    fn io(path: &Path, source: std::io::Error) -> Self {
        CatalogError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// One stored file of a series
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Chunk {
    pub path: PathBuf,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl Chunk {
    fn overlaps(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> bool {
        self.start <= end && start <= self.end
    }

    fn file_name(start: DateTime<Utc>, end: DateTime<Utc>) -> String {
        format!(
            "{}_{}.csv",
            start.format(CHUNK_TS_FORMAT),
            end.format(CHUNK_TS_FORMAT)
        )
    }

    fn from_path(path: &Path) -> Result<Self, CatalogError> {
        let bad = || CatalogError::BadChunkName(path.to_path_buf());
        let stem = path.file_stem().and_then(|s| s.to_str()).ok_or_else(bad)?;
        let (start, end) = stem.split_once('_').ok_or_else(bad)?;
        let parse = |s: &str| {
            NaiveDateTime::parse_from_str(s, CHUNK_TS_FORMAT)
                .map(|ndt| ndt.and_utc())
                .map_err(|_| bad())
        };
        Ok(Chunk {
            path: path.to_path_buf(),
            start: parse(start)?,
            end: parse(end)?,
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct IngestReport {
    pub path: PathBuf,
    pub bars: usize,
    pub duplicates_dropped: usize,
    pub replaced_chunks: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Gap {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
}

/// Result of checking one series
#[derive(Debug, Clone, Serialize)]
pub struct VerifyReport {
    pub symbol: String,
    pub bar_spec: BarSpec,
    pub chunks: usize,
    pub bars: usize,
    pub first: Option<DateTime<Utc>>,
    pub last: Option<DateTime<Utc>>,
    pub gaps: Vec<Gap>,
    pub overlaps: Vec<(Chunk, Chunk)>,
    pub issues: Vec<String>,
}

impl VerifyReport {
    /// Gaps are informational; overlaps and broken chunks are not
    pub fn is_ok(&self) -> bool {
        self.overlaps.is_empty() && self.issues.is_empty()
    }

    /// First overlapping pair as an error
    pub fn overlap_error(&self) -> Option<CatalogError> {
        self.overlaps.first().map(|(earlier, later)| CatalogError::Overlap {
            start: later.start,
            end: later.end,
            existing: earlier.path.clone(),
        })
    }
}

pub struct Catalog {
    root: PathBuf,
}

impl Catalog {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn series_dir(&self, symbol_key: &str, spec: &BarSpec) -> PathBuf {
        self.root.join(symbol_key).join(spec.file_stem())
    }

    /// Every (symbol, bar spec) series present under the root
    pub fn list_series(&self) -> Result<Vec<(String, BarSpec)>, CatalogError> {
        let mut out = Vec::new();
        if !self.root.exists() {
            return Ok(out);
        }
        for symbol_dir in read_dir_sorted(&self.root)? {
            if !symbol_dir.is_dir() {
                continue;
            }
            let Some(symbol) = symbol_dir.file_name().and_then(|s| s.to_str()) else {
                continue;
            };
            for spec_dir in read_dir_sorted(&symbol_dir)? {
                let spec = spec_dir
                    .file_name()
                    .and_then(|s| s.to_str())
                    .and_then(|s| s.parse::<BarSpec>().ok());
                match spec {
                    Some(spec) if spec_dir.is_dir() => out.push((symbol.to_string(), spec)),
                    _ => warn!(path = %spec_dir.display(), "Skipping unrecognised catalog entry"),
                }
            }
        }
        Ok(out)
    }

    fn chunks_in(&self, symbol_key: &str, spec: &BarSpec) -> Result<Vec<Chunk>, CatalogError> {
        let dir = self.series_dir(symbol_key, spec);
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut chunks = read_dir_sorted(&dir)?
            .into_iter()
            .filter(|p| p.extension().is_some_and(|e| e == "csv"))
            .map(|p| Chunk::from_path(&p))
            .collect::<Result<Vec<_>, _>>()?;
        chunks.sort_by_key(|c| (c.start, c.end));
        Ok(chunks)
    }

    /// Stored chunks of a series ordered by start time
    pub fn chunks(&self, instrument: &Instrument, spec: &BarSpec) -> Result<Vec<Chunk>, CatalogError> {
        self.chunks_in(&instrument.file_key(), spec)
    }

    /// Store a batch of bars as a new chunk. Bars are sorted and
    /// de-duplicated first. An overlap with stored data is refused unless
    /// `replace` is set. Replacing supersedes only the stored bars inside the
    /// new interval; the rest of each overlapping chunk is merged into the
    /// new chunk, which is written before the old files are removed.
    pub fn ingest(
        &self,
        instrument: &Instrument,
        spec: &BarSpec,
        candles: Vec<Candle>,
        replace: bool,
    ) -> Result<IngestReport, CatalogError> {
        let (mut candles, duplicates_dropped) = sort_and_dedupe(candles);
        let (Some(first), Some(last)) = (candles.first(), candles.last()) else {
            return Err(CatalogError::Empty);
        };
        let (start, end) = (first.datetime, last.datetime);

        for candle in &candles {
            candle.validate().map_err(|e| CatalogError::InvalidBar {
                at: candle.datetime,
                reason: e.to_string(),
            })?;
        }

        let overlapping: Vec<Chunk> = self
            .chunks(instrument, spec)?
            .into_iter()
            .filter(|c| c.overlaps(start, end))
            .collect();

        if let Some(existing) = overlapping.first() {
            if !replace {
                return Err(CatalogError::Overlap {
                    start,
                    end,
                    existing: existing.path.clone(),
                });
            }
        }

        let mut kept = 0;
        for chunk in &overlapping {
            let outside: Vec<Candle> = read_chunk(&chunk.path)?
                .into_iter()
                .filter(|c| c.datetime < start || c.datetime > end)
                .collect();
            kept += outside.len();
            candles.extend(outside);
        }
        candles.sort_by_key(|c| c.datetime);
        let (Some(first), Some(last)) = (candles.first(), candles.last()) else {
            return Err(CatalogError::Empty);
        };
        let (chunk_start, chunk_end) = (first.datetime, last.datetime);

        let dir = self.series_dir(&instrument.file_key(), spec);
        fs::create_dir_all(&dir).map_err(|e| CatalogError::io(&dir, e))?;
        let path = dir.join(Chunk::file_name(chunk_start, chunk_end));
        let staging = path.with_extension("csv.tmp");
        write_csv(&staging, &candles).map_err(|e| CatalogError::Read {
            path: staging.clone(),
            message: format!("{:#}", e),
        })?;

        fs::rename(&staging, &path).map_err(|e| CatalogError::io(&path, e))?;
        for chunk in overlapping.iter().filter(|c| c.path != path) {
            fs::remove_file(&chunk.path).map_err(|e| CatalogError::io(&chunk.path, e))?;
            info!(path = %chunk.path.display(), "Removed replaced chunk");
        }

        info!(
            instrument = %instrument.instrument_id(),
            bar_spec = %spec,
            bars = candles.len(),
            kept_from_replaced = kept,
            start = %chunk_start,
            end = %chunk_end,
            "Ingested chunk"
        );

        Ok(IngestReport {
            path,
            bars: candles.len(),
            duplicates_dropped,
            replaced_chunks: overlapping.len(),
        })
    }

    /// Bars with open time in `[start, end)`, merged across chunks
    pub fn load(
        &self,
        instrument: &Instrument,
        spec: &BarSpec,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Result<Vec<Candle>, CatalogError> {
        let in_range = |t: DateTime<Utc>| start.map_or(true, |s| t >= s) && end.map_or(true, |e| t < e);

        let mut candles = Vec::new();
        for chunk in self.chunks(instrument, spec)? {
            if start.is_some_and(|s| chunk.end < s) || end.is_some_and(|e| chunk.start >= e) {
                continue;
            }
            let bars = read_chunk(&chunk.path)?;
            candles.extend(bars.into_iter().filter(|c| in_range(c.datetime)));
        }
        candles.sort_by_key(|c| c.datetime);
        Ok(candles)
    }

    pub fn verify(&self, instrument: &Instrument, spec: &BarSpec) -> Result<VerifyReport, CatalogError> {
        self.verify_series(&instrument.file_key(), spec)
    }

    pub fn verify_all(&self) -> Result<Vec<VerifyReport>, CatalogError> {
        self.list_series()?
            .iter()
            .map(|(symbol, spec)| self.verify_series(symbol, spec))
            .collect()
    }

    fn verify_series(&self, symbol_key: &str, spec: &BarSpec) -> Result<VerifyReport, CatalogError> {
        let chunks = self.chunks_in(symbol_key, spec)?;
        let mut report = VerifyReport {
            symbol: symbol_key.to_string(),
            bar_spec: *spec,
            chunks: chunks.len(),
            bars: 0,
            first: None,
            last: None,
            gaps: Vec::new(),
            overlaps: Vec::new(),
            issues: Vec::new(),
        };

        for pair in chunks.windows(2) {
            if pair[1].start <= pair[0].end {
                report.overlaps.push((pair[0].clone(), pair[1].clone()));
            }
        }

        let max_gap = spec.duration() * GAP_FACTOR;
        let mut prev: Option<DateTime<Utc>> = None;

        for chunk in &chunks {
            let bars = match read_chunk(&chunk.path) {
                Ok(bars) => bars,
                Err(e) => {
                    report.issues.push(e.to_string());
                    continue;
                }
            };

            match (bars.first(), bars.last()) {
                (Some(first), Some(last)) => {
                    if first.datetime != chunk.start || last.datetime != chunk.end {
                        report.issues.push(format!(
                            "{}: contents span {}..{} but file name says {}..{}",
                            chunk.path.display(),
                            first.datetime,
                            last.datetime,
                            chunk.start,
                            chunk.end
                        ));
                    }
                }
                _ => report
                    .issues
                    .push(format!("{}: no bars", chunk.path.display())),
            }

            for bar in &bars {
                if let Err(e) = bar.validate() {
                    report
                        .issues
                        .push(format!("{} at {}: {}", chunk.path.display(), bar.datetime, e));
                }
                if let Some(p) = prev {
                    if bar.datetime <= p {
                        report.issues.push(format!(
                            "{}: bar {} is not after {}",
                            chunk.path.display(),
                            bar.datetime,
                            p
                        ));
                    } else if bar.datetime - p > max_gap && !spans_weekend(p, bar.datetime) {
                        report.gaps.push(Gap {
                            from: p,
                            to: bar.datetime,
                        });
                    }
                }
                prev = Some(bar.datetime);
            }

            report.bars += bars.len();
            report.first = report.first.or(bars.first().map(|b| b.datetime));
            if let Some(last) = bars.last() {
                report.last = Some(last.datetime);
            }
        }

        Ok(report)
    }
}

/// FX is closed from Friday evening to Sunday evening (UTC). A gap of up to
/// three days that covers a Saturday is the weekend close.
fn spans_weekend(from: DateTime<Utc>, to: DateTime<Utc>) -> bool {
    if to - from > Duration::days(3) {
        return false;
    }
    let mut day = from.date_naive();
    while day <= to.date_naive() {
        if day.weekday() == Weekday::Sat {
            return true;
        }
        day = match day.succ_opt() {
            Some(d) => d,
            None => return false,
        };
    }
    false
}

fn read_chunk(path: &Path) -> Result<Vec<Candle>, CatalogError> {
    load_csv(path).map_err(|e| CatalogError::Read {
        path: path.to_path_buf(),
        message: format!("{:#}", e),
    })
}

fn read_dir_sorted(dir: &Path) -> Result<Vec<PathBuf>, CatalogError> {
    let mut paths = fs::read_dir(dir)
        .map_err(|e| CatalogError::io(dir, e))?
        .map(|entry| entry.map(|e| e.path()))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| CatalogError::io(dir, e))?;
    paths.sort();
    Ok(paths)
}
