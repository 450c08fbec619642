//! Integration tests for the fx-crossover toolkit
//!
//! These tests drive the catalog, backtester, grid search, checkpoint and
//! reports together on synthetic FX bars.

use approx::assert_relative_eq;
use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use serde_json::{json, Map, Value};
use std::path::PathBuf;

use fx_crossover::backtest::{Backtester, MarketData};
use fx_crossover::bar_spec::BarSpec;
use fx_crossover::catalog::{Catalog, CatalogError};
use fx_crossover::checkpoint::CheckpointStore;
use fx_crossover::grid::{self, StudyConfig};
use fx_crossover::instrument::Instrument;
use fx_crossover::optimizer::{Objective, Optimizer};
use fx_crossover::report::{self, GridCounts, StudyReport};
use fx_crossover::strategies::{self, BarEvent, BarRole, Strategy};
use fx_crossover::{Candle, Config, Position, Side, Signal};

// =============================================================================
// Test Utilities
// =============================================================================

fn start_time() -> DateTime<Utc> {
    // Monday
    Utc.with_ymd_and_hms(2024, 3, 4, 0, 0, 0).unwrap()
}

fn spec15() -> BarSpec {
    "15-MINUTE-MID-EXTERNAL".parse().unwrap()
}

fn eurusd() -> Instrument {
    Instrument::parse("EUR/USD", "IDEALPRO").unwrap()
}

/// Generate oscillating 15-minute bars: a sine wave of `amplitude` around
/// `base` with a period of `period` bars
fn generate_wave_candles(count: usize, base: f64, amplitude: f64, period: f64) -> Vec<Candle> {
    let mut candles = Vec::with_capacity(count);
    let mut prev_close = base;

    for i in 0..count {
        let phase = 2.0 * std::f64::consts::PI * i as f64 / period;
        let close = base + amplitude * phase.sin();
        let open = prev_close;
        candles.push(
            Candle::new(
                start_time() + Duration::minutes(15 * i as i64),
                open,
                open.max(close) + 0.0002,
                open.min(close) - 0.0002,
                close,
                0.0,
            )
            .unwrap(),
        );
        prev_close = close;
    }

    candles
}

fn scratch(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("fxc_it_{}_{}", name, std::process::id()));
    let _ = std::fs::remove_dir_all(&dir);
    dir
}

/// Config over a catalog at `catalog` with the DMI and stochastic filters
/// off so the wave produces trades
fn base_config(catalog: &PathBuf) -> Config {
    let mut config = Config::default();
    config.backtest.catalog_path = catalog.clone();
    config.backtest.start_date = NaiveDate::from_ymd_opt(2024, 3, 4);
    config.backtest.end_date = NaiveDate::from_ymd_opt(2024, 3, 31);
    config.strategy = json!({
        "dmi_enabled": false,
        "stoch_enabled": false,
        "crossover_threshold_pips": 0.0,
        "fast_period": 10,
        "slow_period": 20
    });
    config
}

fn seeded_catalog(name: &str) -> (PathBuf, Catalog) {
    let root = scratch(name);
    let catalog = Catalog::new(&root);
    let candles = generate_wave_candles(800, 1.1000, 0.0050, 80.0);
    let (first, second) = candles.split_at(400);
    catalog.ingest(&eurusd(), &spec15(), first.to_vec(), false).unwrap();
    catalog.ingest(&eurusd(), &spec15(), second.to_vec(), false).unwrap();
    (root, catalog)
}

fn load_primary(config: &Config, catalog: &Catalog) -> MarketData {
    let (start, end) = config.backtest.date_range().unwrap();
    MarketData::load_from_catalog(catalog, &eurusd(), &[spec15()], Some(start), Some(end)).unwrap()
}

// =============================================================================
// Catalog
// =============================================================================

#[test]
fn test_catalog_rejects_overlap_and_verifies() {
    let (root, catalog) = seeded_catalog("catalog");

    let overlapping = generate_wave_candles(500, 1.1, 0.005, 80.0)[350..450].to_vec();
    let err = catalog
        .ingest(&eurusd(), &spec15(), overlapping.clone(), false)
        .unwrap_err();
    assert!(matches!(err, CatalogError::Overlap { .. }));
    assert_eq!(err.exit_code(), 3);
    assert!(err.to_string().contains("Intervals are not disjoint"));

    let report = catalog.verify(&eurusd(), &spec15()).unwrap();
    assert!(report.is_ok());
    assert_eq!(report.chunks, 2);
    assert_eq!(report.bars, 800);

    // Replacing merges both touched chunks around the new bars
    let replaced = catalog
        .ingest(&eurusd(), &spec15(), overlapping.clone(), true)
        .unwrap();
    assert_eq!(replaced.replaced_chunks, 2);
    assert_eq!(replaced.bars, 800);
    let report = catalog.verify(&eurusd(), &spec15()).unwrap();
    assert!(report.is_ok());
    assert_eq!(report.chunks, 1);
    assert_eq!(report.bars, 800);
    assert_eq!(report.first, Some(start_time()));

    let middle = catalog
        .load(&eurusd(), &spec15(), Some(overlapping[0].datetime), None)
        .unwrap();
    assert_eq!(middle.len(), 450);

    std::fs::remove_dir_all(&root).ok();
}

#[test]
fn test_catalog_load_respects_range() {
    let (root, catalog) = seeded_catalog("range");
    let from = start_time() + Duration::hours(10);
    let to = start_time() + Duration::hours(20);
    let candles = catalog.load(&eurusd(), &spec15(), Some(from), Some(to)).unwrap();
    assert_eq!(candles.len(), 40);
    assert_eq!(candles[0].datetime, from);
    assert!(candles.iter().all(|c| c.datetime < to));
    std::fs::remove_dir_all(&root).ok();
}

// =============================================================================
// Backtest
// =============================================================================

#[test]
fn test_backtest_from_catalog() {
    let (root, catalog) = seeded_catalog("backtest");
    let config = base_config(&root);
    let data = load_primary(&config, &catalog);

    let strategy = strategies::create_strategy(&config).unwrap();
    let requirements = strategy.required_bar_specs();
    assert_eq!(requirements, vec![(BarRole::Primary, spec15())]);
    let series = data.series_for(&requirements).unwrap();

    let mut backtester = Backtester::new(&config, strategy).unwrap();
    let result = backtester.run(&series).unwrap();

    assert!(result.metrics.total_trades > 0);
    assert_eq!(result.metrics.total_trades, result.trades.len());
    assert_eq!(
        result.metrics.long_trades + result.metrics.short_trades,
        result.trades.len()
    );
    assert!(result.stats.crossovers >= result.stats.signals);
    assert!(!result.equity_curve.is_empty());

    let net: f64 = result.trades.iter().map(|t| t.net_pnl).sum();
    assert_relative_eq!(result.metrics.total_pnl, net, epsilon = 1e-6);
    assert!(result.metrics.max_drawdown >= 0.0);
    // Trades never overlap: each entry comes at or after the previous exit
    for pair in result.trades.windows(2) {
        assert!(pair[1].entry_time >= pair[0].exit_time);
    }

    std::fs::remove_dir_all(&root).ok();
}

#[test]
fn test_missing_trend_series_is_an_error() {
    let (root, catalog) = seeded_catalog("trend_missing");
    let mut config = base_config(&root);
    config.strategy["trend_filter_enabled"] = json!(true);

    let strategy = strategies::create_strategy(&config).unwrap();
    let specs: Vec<BarSpec> = strategy.required_bar_specs().iter().map(|(_, s)| *s).collect();
    assert_eq!(specs.len(), 2);

    let (start, end) = config.backtest.date_range().unwrap();
    let err = MarketData::load_from_catalog(&catalog, &eurusd(), &specs, Some(start), Some(end))
        .unwrap_err();
    assert!(format!("{:#}", err).contains("1-HOUR-MID-EXTERNAL"));

    std::fs::remove_dir_all(&root).ok();
}

// =============================================================================
// Grid search
// =============================================================================

fn study(json: Value) -> StudyConfig {
    serde_json::from_value(json).unwrap()
}

#[test]
fn test_grid_search_resumes_from_checkpoint() {
    let (root, catalog) = seeded_catalog("grid");
    let config = base_config(&root);
    let data = load_primary(&config, &catalog);

    let study = study(json!({
        "name": "phase1",
        "parameters": {
            "fast_period": [5, 10],
            "slow_period": {"min": 20, "max": 30, "step": 10}
        },
        "fixed": {"stop_loss_pips": 30},
        "objective": "sharpe",
        "workers": 2
    }));
    let expansion = grid::generate(&study, &config).unwrap();
    assert_eq!(expansion.valid.len(), 4);

    let checkpoint = CheckpointStore::in_memory().unwrap();
    checkpoint.bind_study(&study.fingerprint(&config).unwrap()).unwrap();
    let optimizer = Optimizer::new(config.clone(), study.workers);
    assert_eq!(optimizer.required_specs(&expansion.valid).unwrap(), vec![spec15()]);

    let first = optimizer.optimize(&expansion.valid, &data, &checkpoint).unwrap();
    assert_eq!(first.executed, 4);
    assert_eq!(first.skipped, 0);
    assert!(first.failures.is_empty());
    assert_eq!(first.results.len(), 4);

    // Second pass finds everything in the checkpoint
    let second = optimizer.optimize(&expansion.valid, &data, &checkpoint).unwrap();
    assert_eq!(second.executed, 0);
    assert_eq!(second.skipped, 4);
    assert_eq!(second.results.len(), 4);

    let direct = optimizer.run_single(&expansion.valid[0], &data).unwrap();
    let stored = second
        .results
        .iter()
        .find(|r| r.hash == expansion.valid[0].hash)
        .unwrap();
    assert_eq!(stored.metrics.total_trades, direct.metrics.total_trades);
    assert_relative_eq!(
        stored.metrics.total_pnl,
        direct.metrics.total_pnl,
        epsilon = 1e-6
    );

    std::fs::remove_dir_all(&root).ok();
}

#[test]
fn test_failed_runs_do_not_abort_study() {
    let (root, catalog) = seeded_catalog("failures");
    let config = base_config(&root);
    // Only the primary series is loaded, so trend-filtered runs fail
    let data = load_primary(&config, &catalog);

    let study = study(json!({
        "name": "trend",
        "parameters": {"trend_filter_enabled": [false, true]}
    }));
    let expansion = grid::generate(&study, &config).unwrap();
    assert_eq!(expansion.valid.len(), 2);

    let checkpoint = CheckpointStore::in_memory().unwrap();
    let outcome = Optimizer::new(config, 1)
        .optimize(&expansion.valid, &data, &checkpoint)
        .unwrap();
    assert_eq!(outcome.results.len(), 1);
    assert_eq!(outcome.failures.len(), 1);
    assert_eq!(outcome.failures[0].params["trend_filter_enabled"], true);
    assert_eq!(checkpoint.counts().unwrap().failed, 1);

    std::fs::remove_dir_all(&root).ok();
}

#[test]
fn test_reports_and_seeding_next_phase() {
    let (root, catalog) = seeded_catalog("reports");
    let config = base_config(&root);
    let data = load_primary(&config, &catalog);

    let phase1 = study(json!({
        "name": "phase1",
        "parameters": {"fast_period": [5, 8, 10]},
        "objective": "pnl",
        "top_n": 2
    }));
    let expansion = grid::generate(&phase1, &config).unwrap();
    let checkpoint = CheckpointStore::in_memory().unwrap();
    let outcome = Optimizer::new(config.clone(), 2)
        .optimize(&expansion.valid, &data, &checkpoint)
        .unwrap();

    let counts = GridCounts {
        total_combinations: expansion.total,
        valid_combinations: expansion.valid.len(),
        invalid_combinations: expansion.invalid.len(),
    };
    let report = StudyReport::build(&phase1, counts, outcome.results, outcome.failures);
    assert_eq!(report.summary.objective, Objective::Pnl);
    assert_eq!(report.top.len(), 2);
    assert!(!report.pareto.is_empty());
    assert!(report.top[0].metrics.total_pnl >= report.top[1].metrics.total_pnl);

    let out = root.join("phase1_out");
    report.write_all(&out).unwrap();
    for name in [
        report::RESULTS_CSV,
        report::TOP_RESULTS_JSON,
        report::PARETO_JSON,
        report::SUMMARY_JSON,
        report::REPORT_MD,
    ] {
        assert!(out.join(name).exists(), "{} missing", name);
    }

    // Phase 2 sweeps the slow period with phase 1's best fast period fixed
    let best = report::load_best_params(&out).unwrap();
    let mut phase2 = study(json!({
        "name": "phase2",
        "parameters": {"slow_period": [20, 40]}
    }));
    let seeded = phase2.apply_seed(&best);
    assert!(seeded.contains(&"fast_period".to_string()));
    assert_eq!(phase2.fixed["fast_period"], report.top[0].params["fast_period"]);

    let expansion = grid::generate(&phase2, &config).unwrap();
    assert_eq!(expansion.valid.len(), 2);
    assert!(expansion
        .valid
        .iter()
        .all(|p| p.params["fast_period"] == best["fast_period"]));

    std::fs::remove_dir_all(&root).ok();
}

// =============================================================================
// Strategy registry
// =============================================================================

/// Never trades
struct Idle;

impl Strategy for Idle {
    fn name(&self) -> &'static str {
        "idle"
    }

    fn required_bar_specs(&self) -> Vec<(BarRole, BarSpec)> {
        vec![(BarRole::Primary, spec15())]
    }

    fn on_bar(&mut self, _event: &BarEvent<'_>, _position: Option<&Position>) -> Signal {
        Signal::Flat
    }

    fn calculate_stop_loss(&self, side: Side, entry_price: f64) -> f64 {
        entry_price - side.sign() * 0.001
    }

    fn calculate_take_profit(&self, side: Side, entry_price: f64) -> f64 {
        entry_price + side.sign() * 0.001
    }

    fn update_trailing_stop(&self, _position: &Position, _current_price: f64) -> Option<f64> {
        None
    }

    fn trade_size(&self) -> f64 {
        1.0
    }
}

fn create_idle(_config: &Config) -> anyhow::Result<Box<dyn Strategy>> {
    Ok(Box::new(Idle))
}

#[test]
fn test_registered_strategy_runs_through_backtester() {
    strategies::register_strategy("idle", create_idle).unwrap();
    let available = strategies::available_strategies();
    assert!(available.contains(&"idle"));
    assert!(available.contains(&"ma_crossover"));

    let mut config = Config::default();
    config.strategy_name = "idle".to_string();
    let strategy = strategies::create_strategy(&config).unwrap();
    assert_eq!(strategy.name(), "idle");

    let candles = generate_wave_candles(100, 1.1, 0.005, 40.0);
    let mut data = MarketData::new();
    data.insert(spec15(), candles);
    let series = data.series_for(&strategy.required_bar_specs()).unwrap();
    let result = Backtester::new(&config, strategy).unwrap().run(&series).unwrap();
    assert_eq!(result.metrics.total_trades, 0);
    assert_relative_eq!(result.metrics.total_pnl, 0.0);

    config.strategy_name = "missing".to_string();
    let err = strategies::create_strategy(&config).err().unwrap();
    assert!(err.to_string().contains("Unknown strategy"));
}

#[test]
fn test_study_overrides_from_cli() {
    let mut s = study(json!({
        "name": "cli",
        "parameters": {"fast_period": [5]},
        "fixed": {"slow_period": 30}
    }));
    grid::apply_overrides(&mut s, &["slow_period=25,35".to_string()]).unwrap();
    assert!(!s.fixed.contains_key("slow_period"));
    assert_eq!(s.total_combinations().unwrap(), 2);

    let mut best = Map::new();
    best.insert("slow_period".into(), json!(40));
    assert!(s.apply_seed(&best).is_empty());
}
