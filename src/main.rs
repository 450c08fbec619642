//! fx-crossover - main entry point
//!
//! Subcommands:
//! - backtest: Run the strategy over catalog data
//! - optimize: Checkpointed grid search over a study file
//! - ingest: Add a CSV of bars to the catalog
//! - verify: Check catalog integrity
//! - check-env: Validate environment settings without connecting

use anyhow::Result;
use clap::{Parser, Subcommand};
use fx_crossover::catalog::CatalogError;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod commands;

#[derive(Parser, Debug)]
#[command(name = "fx-crossover")]
#[command(about = "Forex MA crossover backtesting, bar catalog and grid-search optimization", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// JSON configuration file (default: .env and environment variables)
    #[arg(short, long, global = true)]
    config: Option<String>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run strategy backtest
    Backtest {
        /// Start date (YYYY-MM-DD), overrides BACKTEST_START_DATE
        #[arg(long)]
        start: Option<String>,

        /// End date (YYYY-MM-DD, inclusive), overrides BACKTEST_END_DATE
        #[arg(long)]
        end: Option<String>,
    },

    /// Optimize strategy parameters over a study file
    Optimize {
        /// Study definition (JSON)
        #[arg(short, long)]
        study: String,

        /// Parallel workers (overrides the study file)
        #[arg(short, long)]
        workers: Option<usize>,

        /// Discard the checkpoint and start over
        #[arg(long)]
        no_resume: bool,

        /// Fix parameters to the best result of a previous study
        /// (top_results.json, summary.json, or its output directory)
        #[arg(long)]
        seed_from: Option<PathBuf>,

        /// Sweep a parameter over listed values, e.g. --set fast_period=5,8,10
        #[arg(long = "set")]
        overrides: Vec<String>,

        /// Output directory (overrides the study file)
        #[arg(short, long)]
        output_dir: Option<PathBuf>,
    },

    /// Ingest a CSV of bars into the catalog
    Ingest {
        /// CSV file with datetime,open,high,low,close[,volume]
        #[arg(short, long)]
        input: PathBuf,

        /// Bar spec of the file (default: BAR_SPEC)
        #[arg(short, long)]
        bar_spec: Option<String>,

        /// Replace stored chunks that overlap the input
        #[arg(long)]
        replace: bool,
    },

    /// Verify catalog integrity
    Verify {
        /// Only check this bar spec of the configured symbol
        #[arg(short, long)]
        bar_spec: Option<String>,
    },

    /// Validate environment configuration (no broker connection is made)
    CheckEnv {
        /// Classify a gateway error message and print the fix
        #[arg(long)]
        explain: Option<String>,
    },
}

fn setup_logging(verbose: bool, command_name: &str, file_only: bool) -> Result<()> {
    // Create logs directory
    std::fs::create_dir_all("logs")?;

    // Create log file with naming pattern: {command}_{date}.log
    let log_filename = format!(
        "{}_{}.log",
        command_name,
        chrono::Local::now().format("%Y-%m-%d_%H-%M-%S")
    );
    let log_path = PathBuf::from("logs").join(&log_filename);

    let level = if verbose { "debug" } else { "info" };
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let file_appender = tracing_appender::rolling::never("logs", &log_filename);
    // Built per branch: the layer type depends on the subscriber stack beneath it
    macro_rules! file_layer {
        () => {
            tracing_subscriber::fmt::layer()
                .with_writer(file_appender)
                .with_target(true)
                .with_line_number(true)
                .with_file(true)
                .with_ansi(false)
        };
    }

    if file_only {
        // Console belongs to the progress bar
        tracing_subscriber::registry()
            .with(env_filter)
            .with(file_layer!())
            .init();
    } else {
        let console_layer = tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_line_number(true)
            .with_file(true)
            .with_ansi(true);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(console_layer)
            .with(file_layer!())
            .init();

        info!("Log file: {}", log_path.display());
    }

    Ok(())
}

/// 3 when the failure is a catalog overlap, 1 otherwise
fn exit_code(err: &anyhow::Error) -> u8 {
    err.chain()
        .find_map(|cause| cause.downcast_ref::<CatalogError>())
        .map_or(1, CatalogError::exit_code)
}

fn dispatch(cli: Cli) -> Result<()> {
    let config = cli.config;
    match cli.command {
        Commands::Backtest { start, end } => commands::backtest::run(config, start, end),

        Commands::Optimize {
            study,
            workers,
            no_resume,
            seed_from,
            overrides,
            output_dir,
        } => commands::optimize::run(commands::optimize::OptimizeArgs {
            config,
            study,
            workers,
            no_resume,
            seed_from,
            overrides,
            output_dir,
        }),

        Commands::Ingest {
            input,
            bar_spec,
            replace,
        } => commands::catalog::ingest(config, input, bar_spec, replace),

        Commands::Verify { bar_spec } => commands::catalog::verify(config, bar_spec),

        Commands::CheckEnv { explain } => commands::check_env::run(config, explain),
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let (command_name, file_only) = match &cli.command {
        Commands::Backtest { .. } => ("backtest", false),
        Commands::Optimize { .. } => ("optimize", true),
        Commands::Ingest { .. } => ("ingest", false),
        Commands::Verify { .. } => ("verify", false),
        Commands::CheckEnv { .. } => ("check-env", false),
    };

    if let Err(e) = setup_logging(cli.verbose, command_name, file_only) {
        eprintln!("Failed to initialise logging: {:#}", e);
        return ExitCode::from(1);
    }

    match dispatch(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            eprintln!("Error: {:#}", e);
            ExitCode::from(exit_code(&e))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn test_exit_code_for_overlap() {
        let overlap: anyhow::Error = CatalogError::Overlap {
            start: chrono::Utc::now(),
            end: chrono::Utc::now(),
            existing: PathBuf::from("a.csv"),
        }
        .into();
        let wrapped = Err::<(), _>(overlap).context("Failed to ingest x.csv").unwrap_err();
        assert_eq!(exit_code(&wrapped), 3);
        assert_eq!(exit_code(&anyhow::anyhow!("boom")), 1);
        assert_eq!(exit_code(&CatalogError::Empty.into()), 1);
    }

    #[test]
    fn test_cli_parses() {
        let cli = Cli::try_parse_from([
            "fx-crossover",
            "optimize",
            "--study",
            "configs/phase1_study.json",
            "--workers",
            "8",
            "--set",
            "fast_period=5,8",
        ])
        .unwrap();
        match cli.command {
            Commands::Optimize {
                workers, overrides, ..
            } => {
                assert_eq!(workers, Some(8));
                assert_eq!(overrides, vec!["fast_period=5,8".to_string()]);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }
}
