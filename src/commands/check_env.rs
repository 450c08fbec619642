//! check-env: validate the environment configuration without connecting

use anyhow::Result;
use fx_crossover::ibkr::GatewayError;
use fx_crossover::strategies::{self, ma_crossover};
use tracing::info;

use super::load_config;

pub fn run(config_path: Option<String>, explain: Option<String>) -> Result<()> {
    let config = load_config(config_path.as_deref())?;
    let instrument = config.backtest.instrument()?;
    let ib = &config.ibkr;

    println!("\n{}", "=".repeat(60));
    println!("ENVIRONMENT CHECK");
    println!("{}", "=".repeat(60));
    println!("Instrument:         {}", instrument.instrument_id());
    println!("Pip size:           {}", instrument.pip_size());
    match config.backtest.date_range() {
        Ok((start, end)) => println!("Backtest range:     {} .. {}", start, end),
        Err(e) => println!("Backtest range:     not set ({})", e),
    }
    println!("Catalog:            {}", config.backtest.catalog_path.display());
    println!("Output dir:         {}", config.backtest.output_dir.display());
    println!("Strategy:           {}", config.strategy_name);

    if config.strategy_name == ma_crossover::NAME {
        let settings = ma_crossover::parse_config(&config)?;
        println!("Bar spec:           {}", settings.bar_spec);
        println!(
            "SMA:                {}/{} (threshold {} pips)",
            settings.fast_period, settings.slow_period, settings.crossover_threshold_pips
        );
        println!(
            "SL / TP:            {} / {} pips, trail {} after {}",
            settings.stop_loss_pips,
            settings.take_profit_pips,
            settings.trailing_stop_distance_pips,
            settings.trailing_stop_activation_pips
        );
    }
    // Builds the strategy so every strategy-level check runs
    let strategy = strategies::create_strategy(&config)?;
    for (role, spec) in strategy.required_bar_specs() {
        println!("  {:<18}{}", format!("{:?}:", role), spec);
    }

    println!("{}", "-".repeat(60));
    println!(
        "IBKR gateway:       {} ({})",
        ib.endpoint(),
        if ib.is_paper() { "paper" } else { "LIVE" }
    );
    println!("Client id:          {}", ib.client_id);
    println!(
        "Account:            {}",
        ib.account_id.as_deref().unwrap_or("(not set)")
    );
    println!(
        "Market data type:   {} ({})",
        ib.market_data_type,
        ib.market_data_type.code()
    );

    if let Some(message) = explain {
        let err = GatewayError::classify(&message);
        println!("{}", "-".repeat(60));
        println!("{}", err);
        println!("Fix: {}", err.remediation(ib));
    }
    println!("{}", "=".repeat(60));

    info!("Environment check passed");
    Ok(())
}
