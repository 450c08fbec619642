//! Backtest command implementation

use anyhow::{Context, Result};
use fx_crossover::backtest::{BacktestResult, Backtester, MarketData};
use fx_crossover::catalog::Catalog;
use fx_crossover::strategies;
use fx_crossover::Config;
use std::fs;
use std::path::PathBuf;
use tracing::{debug, info};

use super::load_config;

pub fn run(
    config_path: Option<String>,
    start_override: Option<String>,
    end_override: Option<String>,
) -> Result<()> {
    info!("Starting backtest");

    let mut config = load_config(config_path.as_deref())?;

    if let Some(start) = start_override {
        info!("Overriding start date to: {}", start);
        config.backtest.start_date = Some(start.parse().context("Invalid --start date")?);
    }
    if let Some(end) = end_override {
        info!("Overriding end date to: {}", end);
        config.backtest.end_date = Some(end.parse().context("Invalid --end date")?);
    }
    config.validate()?;

    let (start, end) = config.backtest.date_range()?;
    let instrument = config.backtest.instrument()?;

    info!("Creating strategy: {}", config.strategy_name);
    let strategy = strategies::create_strategy(&config)?;
    let requirements = strategy.required_bar_specs();
    debug!("Bar series: {:?}", requirements);

    info!("Loading data from: {}", config.backtest.catalog_path.display());
    let catalog = Catalog::new(&config.backtest.catalog_path);
    let specs: Vec<_> = requirements.iter().map(|(_, spec)| *spec).collect();
    let data = MarketData::load_from_catalog(&catalog, &instrument, &specs, Some(start), Some(end))?;
    let series = data.series_for(&requirements)?;

    let mut backtester = Backtester::new(&config, strategy)?;
    info!("Running backtest...");
    let result = backtester.run(&series)?;

    print_results(&config, &result);
    let out = write_outputs(&config, &result)?;
    info!("Results written to: {}", out.display());

    info!("Backtest completed successfully");
    Ok(())
}

fn print_results(config: &Config, result: &BacktestResult) {
    let m = &result.metrics;
    let s = &result.stats;
    println!("\n{}", "=".repeat(60));
    println!("BACKTEST RESULTS  {} {}", config.backtest.symbol, config.strategy_name);
    println!("{}", "=".repeat(60));
    println!("Initial Capital:    {:.2}", config.backtest.starting_capital);
    println!("Total PnL:          {:.2}", m.total_pnl);
    println!("Total Return:       {:.2}%", m.total_return);
    println!("Sharpe Ratio:       {:.2}", m.sharpe_ratio);
    println!("Max Drawdown:       {:.2}% ({:.2})", m.max_drawdown, m.max_drawdown_abs);
    println!("Win Rate:           {:.2}%", m.win_rate);
    println!("Profit Factor:      {:.2}", m.profit_factor);
    println!("Expectancy:         {:.2}", m.expectancy);
    println!("Total Trades:       {} ({} long / {} short)", m.total_trades, m.long_trades, m.short_trades);
    println!("Winning Trades:     {}", m.winning_trades);
    println!("Losing Trades:      {}", m.losing_trades);
    println!("Average Win:        {:.2}", m.avg_win);
    println!("Average Loss:       {:.2}", m.avg_loss);
    println!("Largest Win:        {:.2}", m.largest_win);
    println!("Largest Loss:       {:.2}", m.largest_loss);
    println!("Commission:         {:.2}", m.total_commission);
    println!("{}", "-".repeat(60));
    println!("Crossovers:         {}", s.crossovers);
    println!("Signals:            {}", s.signals);
    println!(
        "Rejected:           {} (threshold {}, trend {}, dmi {}, stoch {})",
        s.rejected_total(),
        s.rejected_threshold,
        s.rejected_trend,
        s.rejected_dmi,
        s.rejected_stoch
    );
    println!(
        "Dormant:            {} activations, {} signals, {} trades",
        s.dormant_activations, s.dormant_signals, m.dormant_trades
    );
    println!("{}", "=".repeat(60));
}

/// `{output_dir}/{SYMBOL}_{timestamp}/` with trades.csv, metrics.json and
/// the config used
fn write_outputs(config: &Config, result: &BacktestResult) -> Result<PathBuf> {
    let instrument = config.backtest.instrument()?;
    let dir = config.backtest.output_dir.join(format!(
        "{}_{}",
        instrument.file_key(),
        chrono::Local::now().format("%Y-%m-%d_%H-%M-%S")
    ));
    fs::create_dir_all(&dir).with_context(|| format!("Failed to create {}", dir.display()))?;

    let trades_path = dir.join("trades.csv");
    let mut writer = csv::Writer::from_path(&trades_path)
        .with_context(|| format!("Failed to create {}", trades_path.display()))?;
    for trade in &result.trades {
        writer.serialize(trade)?;
    }
    writer.flush()?;

    let summary = serde_json::json!({
        "metrics": result.metrics,
        "stats": result.stats,
        "config": config,
    });
    fs::write(dir.join("metrics.json"), serde_json::to_string_pretty(&summary)?)?;
    Ok(dir)
}
