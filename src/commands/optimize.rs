//! Optimize command: checkpointed grid search over a study file

use anyhow::{bail, Result};
use fx_crossover::backtest::MarketData;
use fx_crossover::catalog::Catalog;
use fx_crossover::checkpoint::CheckpointStore;
use fx_crossover::grid::{self, StudyConfig};
use fx_crossover::optimizer::Optimizer;
use fx_crossover::report::{self, GridCounts, StudyReport};
use std::path::PathBuf;
use tracing::{info, warn};

use super::load_config;

pub struct OptimizeArgs {
    pub config: Option<String>,
    pub study: String,
    pub workers: Option<usize>,
    pub no_resume: bool,
    pub seed_from: Option<PathBuf>,
    pub overrides: Vec<String>,
    pub output_dir: Option<PathBuf>,
}

pub fn run(args: OptimizeArgs) -> Result<()> {
    info!("Starting optimization");

    let base = load_config(args.config.as_deref())?;
    let mut study = StudyConfig::from_file(&args.study)?;
    info!("Loaded study '{}' from: {}", study.name, args.study);

    grid::apply_overrides(&mut study, &args.overrides)?;
    if let Some(dir) = args.output_dir {
        study.output_dir = dir;
    }
    if let Some(workers) = args.workers {
        study.workers = workers;
    }
    if let Some(seed) = &args.seed_from {
        let best = report::load_best_params(seed)?;
        let seeded = study.apply_seed(&best);
        info!(from = %seed.display(), ?seeded, "Seeded fixed parameters");
        println!("Seeded from {}: {}", seed.display(), seeded.join(", "));
    }

    let expansion = grid::generate(&study, &base)?;
    for (set, reason) in &expansion.invalid {
        warn!(params = %grid::format_params(&set.params, None), %reason, "Invalid combination");
    }
    println!(
        "Study '{}': {} combinations, {} valid, {} invalid",
        study.name,
        expansion.total,
        expansion.valid.len(),
        expansion.invalid.len()
    );
    if expansion.valid.is_empty() {
        bail!("No valid parameter combinations in study '{}'", study.name);
    }

    let checkpoint = CheckpointStore::open(study.output_dir.join("checkpoint.db"))?;
    if args.no_resume {
        checkpoint.clear()?;
    }
    checkpoint.bind_study(&study.fingerprint(&base)?)?;

    let optimizer = Optimizer::new(base.clone(), study.workers).with_progress(true);

    let (start, end) = base.backtest.date_range()?;
    let instrument = base.backtest.instrument()?;
    let specs = optimizer.required_specs(&expansion.valid)?;
    let catalog = Catalog::new(&base.backtest.catalog_path);
    let data = MarketData::load_from_catalog(&catalog, &instrument, &specs, Some(start), Some(end))?;
    info!(series = specs.len(), bars = data.bar_count(), "Market data loaded");

    let outcome = optimizer.optimize(&expansion.valid, &data, &checkpoint)?;
    println!(
        "\nRan {} combinations ({} resumed from checkpoint, {} failed)",
        outcome.executed,
        outcome.skipped,
        outcome.failures.len()
    );

    if outcome.results.is_empty() {
        info!("No valid results found.");
        println!("No completed runs; see the log for failures.");
        return Ok(());
    }

    let counts = GridCounts {
        total_combinations: expansion.total,
        valid_combinations: expansion.valid.len(),
        invalid_combinations: expansion.invalid.len(),
    };
    let report = StudyReport::build(&study, counts, outcome.results, outcome.failures);
    report.print_top();
    report.write_all(&study.output_dir)?;
    println!("Reports written to {}", study.output_dir.display());

    info!("Optimization completed successfully");
    Ok(())
}
