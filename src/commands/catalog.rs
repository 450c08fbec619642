//! Ingest and verify commands for the bar catalog

use anyhow::{Context, Result};
use fx_crossover::bar_spec::BarSpec;
use fx_crossover::catalog::{Catalog, VerifyReport};
use fx_crossover::data;
use std::path::PathBuf;
use tracing::{info, warn};

use super::load_config;

pub fn ingest(
    config_path: Option<String>,
    input: PathBuf,
    bar_spec: Option<String>,
    replace: bool,
) -> Result<()> {
    let config = load_config(config_path.as_deref())?;
    let instrument = config.backtest.instrument()?;
    let spec: BarSpec = match bar_spec {
        Some(s) => s.parse()?,
        None => fx_crossover::strategies::ma_crossover::parse_config(&config)?.bar_spec,
    };

    info!("Reading bars from: {}", input.display());
    let candles = data::load_csv(&input)?;
    let validation = data::validate_candles(&candles);
    for w in &validation.warnings {
        warn!("{}", w);
    }

    let catalog = Catalog::new(&config.backtest.catalog_path);
    let report = catalog
        .ingest(&instrument, &spec, candles, replace)
        .with_context(|| format!("Failed to ingest {}", input.display()))?;

    println!(
        "Ingested {} bars of {} {} into {} ({} duplicates dropped, {} chunks replaced)",
        report.bars,
        instrument.instrument_id(),
        spec,
        report.path.display(),
        report.duplicates_dropped,
        report.replaced_chunks
    );
    Ok(())
}

pub fn verify(config_path: Option<String>, bar_spec: Option<String>) -> Result<()> {
    let config = load_config(config_path.as_deref())?;
    let catalog = Catalog::new(&config.backtest.catalog_path);

    let reports = match bar_spec {
        Some(s) => {
            let spec: BarSpec = s.parse()?;
            vec![catalog.verify(&config.backtest.instrument()?, &spec)?]
        }
        None => catalog.verify_all()?,
    };

    if reports.is_empty() {
        println!("Catalog at {} is empty", catalog.root().display());
        return Ok(());
    }

    for report in &reports {
        print_report(report);
    }

    if let Some(err) = reports.iter().find_map(|r| r.overlap_error()) {
        return Err(err.into());
    }
    let broken: usize = reports.iter().map(|r| r.issues.len()).sum();
    if broken > 0 {
        anyhow::bail!("Catalog verification found {} issue(s)", broken);
    }
    println!("Catalog OK");
    Ok(())
}

fn print_report(report: &VerifyReport) {
    let fmt = |t: Option<chrono::DateTime<chrono::Utc>>| {
        t.map(|t| t.to_rfc3339()).unwrap_or_else(|| "-".to_string())
    };
    println!(
        "{} {}: {} chunks, {} bars, {} .. {}",
        report.symbol,
        report.bar_spec,
        report.chunks,
        report.bars,
        fmt(report.first),
        fmt(report.last)
    );
    for gap in &report.gaps {
        println!("  gap      {} -> {}", gap.from, gap.to);
    }
    for (a, b) in &report.overlaps {
        println!("  overlap  {} / {}", a.path.display(), b.path.display());
    }
    for issue in &report.issues {
        println!("  issue    {}", issue);
    }
}
