//! Parallel grid search runner
//!
//! Runs every pending parameter set of a study on a rayon pool against one
//! shared copy of the market data. Each result is written to the checkpoint
//! as soon as it finishes, so an interrupted study resumes without
//! repeating completed runs.

use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use rayon::prelude::*;
use rayon::ThreadPoolBuilder;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeSet, HashSet};
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::{info, warn};

use crate::backtest::{Backtester, MarketData};
use crate::bar_spec::BarSpec;
use crate::checkpoint::{CheckpointStore, FailedRun};
use crate::grid::ParameterSet;
use crate::strategies;
use crate::{Config, PerformanceMetrics};

/// Metric a study ranks by
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Objective {
    #[default]
    Sharpe,
    Pnl,
    Return,
    WinRate,
    ProfitFactor,
    /// Smallest max drawdown ranks first
    Drawdown,
}

impl Objective {
    pub fn as_str(self) -> &'static str {
        match self {
            Objective::Sharpe => "sharpe",
            Objective::Pnl => "pnl",
            Objective::Return => "return",
            Objective::WinRate => "win_rate",
            Objective::ProfitFactor => "profit_factor",
            Objective::Drawdown => "drawdown",
        }
    }

    /// Raw metric value
    pub fn value(self, metrics: &PerformanceMetrics) -> f64 {
        match self {
            Objective::Sharpe => metrics.sharpe_ratio,
            Objective::Pnl => metrics.total_pnl,
            Objective::Return => metrics.total_return,
            Objective::WinRate => metrics.win_rate,
            Objective::ProfitFactor => metrics.profit_factor,
            Objective::Drawdown => metrics.max_drawdown,
        }
    }

    /// Higher is better
    fn score(self, metrics: &PerformanceMetrics) -> f64 {
        let v = self.value(metrics);
        match self {
            Objective::Drawdown => -v,
            _ => v,
        }
    }
}

impl fmt::Display for Objective {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Objective {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "sharpe" | "sharpe_ratio" => Ok(Objective::Sharpe),
            "pnl" | "total_pnl" => Ok(Objective::Pnl),
            "return" | "total_return" => Ok(Objective::Return),
            "win_rate" => Ok(Objective::WinRate),
            "profit_factor" => Ok(Objective::ProfitFactor),
            "drawdown" | "max_drawdown" => Ok(Objective::Drawdown),
            other => anyhow::bail!(
                "Unknown objective '{}'. Use sharpe, pnl, return, win_rate, profit_factor or drawdown",
                other
            ),
        }
    }
}

/// Optimization result for a single parameter combination
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizationResult {
    pub params: Map<String, Value>,
    pub hash: String,
    pub metrics: PerformanceMetrics,
}

/// Sort optimization results best first by the objective. Non-finite values
/// sort last.
pub fn sort_results(results: &mut [OptimizationResult], objective: Objective) {
    results.sort_by(|a, b| {
        let va = objective.score(&a.metrics);
        let vb = objective.score(&b.metrics);
        match (va.is_finite(), vb.is_finite()) {
            (true, true) => vb.partial_cmp(&va).unwrap_or(std::cmp::Ordering::Equal),
            (true, false) => std::cmp::Ordering::Less,
            (false, true) => std::cmp::Ordering::Greater,
            (false, false) => std::cmp::Ordering::Equal,
        }
        .then_with(|| a.hash.cmp(&b.hash))
    });
}

/// What a study run produced
#[derive(Debug, Default)]
pub struct StudyOutcome {
    /// All completed results for the study, resumed ones included
    pub results: Vec<OptimizationResult>,
    /// Runs that failed in this session
    pub failures: Vec<FailedRun>,
    /// Completed before this session started
    pub skipped: usize,
    /// Run in this session
    pub executed: usize,
}

/// Grid search runner
pub struct Optimizer {
    base_config: Config,
    workers: usize,
    show_progress: bool,
}

impl Optimizer {
    pub fn new(base_config: Config, workers: usize) -> Self {
        Optimizer {
            base_config,
            workers: workers.max(1),
            show_progress: false,
        }
    }

    pub fn with_progress(mut self, show: bool) -> Self {
        self.show_progress = show;
        self
    }

    /// Union of bar specs any of the sets needs, so data is loaded once
    pub fn required_specs(&self, sets: &[ParameterSet]) -> Result<Vec<BarSpec>> {
        let mut specs = BTreeSet::new();
        for set in sets {
            let config = set.apply(&self.base_config)?;
            let strategy = strategies::create_strategy(&config)?;
            specs.extend(strategy.required_bar_specs().into_iter().map(|(_, spec)| spec));
        }
        Ok(specs.into_iter().collect())
    }

    /// Backtest one parameter set
    pub fn run_single(&self, set: &ParameterSet, data: &MarketData) -> Result<OptimizationResult> {
        let config = set.apply(&self.base_config)?;
        let strategy = strategies::create_strategy(&config)?;
        let requirements = strategy.required_bar_specs();
        let series = data.series_for(&requirements)?;
        let mut backtester = Backtester::new(&config, strategy)?;
        let result = backtester.run(&series)?;

        Ok(OptimizationResult {
            params: set.params.clone(),
            hash: set.hash.clone(),
            metrics: result.metrics,
        })
    }

    /// Run every set not already completed in the checkpoint. Failures are
    /// recorded and do not stop the study; a checkpoint write error does.
    pub fn optimize(
        &self,
        sets: &[ParameterSet],
        data: &MarketData,
        checkpoint: &CheckpointStore,
    ) -> Result<StudyOutcome> {
        let completed = checkpoint.completed_hashes()?;
        let pending: Vec<&ParameterSet> =
            sets.iter().filter(|s| !completed.contains(&s.hash)).collect();
        let skipped = sets.len() - pending.len();

        info!(
            total = sets.len(),
            pending = pending.len(),
            skipped,
            workers = self.workers,
            "Testing parameter combinations"
        );

        let pb = if self.show_progress {
            let pb = ProgressBar::new(pending.len() as u64);
            pb.set_style(
                ProgressStyle::default_bar()
                    .template(
                        "⚡ {percent:>3}%|{bar:40}| {pos}/{len} [{elapsed}<{eta}, {per_sec:.2}] ✓ {msg}",
                    )
                    .context("Invalid progress bar template")?
                    .progress_chars("█░ "),
            );
            pb
        } else {
            ProgressBar::hidden()
        };

        let pool = ThreadPoolBuilder::new()
            .num_threads(self.workers)
            .build()
            .context("Failed to build Rayon thread pool")?;

        let valid_count = AtomicUsize::new(0);
        let outcomes: Vec<Result<Option<FailedRun>>> = pool.install(|| {
            pending
                .par_iter()
                .map(|set| -> Result<Option<FailedRun>> {
                    let outcome = match self.run_single(set, data) {
                        Ok(result) => {
                            checkpoint.record_success(set, &result.metrics)?;
                            let n = valid_count.fetch_add(1, Ordering::Relaxed) + 1;
                            pb.set_message(format!("{} valid", n));
                            None
                        }
                        Err(e) => {
                            let error = format!("{:#}", e);
                            warn!(hash = %set.hash, error = %error, "Run failed");
                            checkpoint.record_failure(set, &error)?;
                            Some(FailedRun {
                                hash: set.hash.clone(),
                                params: set.params.clone(),
                                error,
                            })
                        }
                    };
                    pb.inc(1);
                    Ok(outcome)
                })
                .collect()
        });
        pb.finish_with_message(format!("{} valid", valid_count.load(Ordering::Relaxed)));

        let mut failures = Vec::new();
        for outcome in outcomes {
            if let Some(failed) = outcome? {
                failures.push(failed);
            }
        }

        let wanted: HashSet<&str> = sets.iter().map(|s| s.hash.as_str()).collect();
        let results: Vec<OptimizationResult> = checkpoint
            .load_completed()?
            .into_iter()
            .filter(|r| wanted.contains(r.hash.as_str()))
            .collect();

        info!(
            completed = results.len(),
            failed = failures.len(),
            "Optimization finished"
        );

        Ok(StudyOutcome {
            results,
            failures,
            skipped,
            executed: pending.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(hash: &str, sharpe: f64, drawdown: f64) -> OptimizationResult {
        OptimizationResult {
            params: Map::new(),
            hash: hash.to_string(),
            metrics: PerformanceMetrics {
                sharpe_ratio: sharpe,
                max_drawdown: drawdown,
                ..Default::default()
            },
        }
    }

    #[test]
    fn test_objective_parsing() {
        assert_eq!("sharpe".parse::<Objective>().unwrap(), Objective::Sharpe);
        assert_eq!("MAX_DRAWDOWN".parse::<Objective>().unwrap(), Objective::Drawdown);
        assert!("calmar".parse::<Objective>().is_err());
        assert_eq!(Objective::WinRate.to_string(), "win_rate");

        let parsed: Objective = serde_json::from_str("\"profit_factor\"").unwrap();
        assert_eq!(parsed, Objective::ProfitFactor);
    }

    #[test]
    fn test_sort_results() {
        let mut results = vec![
            result("a", 0.5, 10.0),
            result("b", f64::NAN, 1.0),
            result("c", 1.5, 20.0),
        ];
        sort_results(&mut results, Objective::Sharpe);
        let order: Vec<&str> = results.iter().map(|r| r.hash.as_str()).collect();
        assert_eq!(order, vec!["c", "a", "b"]);

        sort_results(&mut results, Objective::Drawdown);
        let order: Vec<&str> = results.iter().map(|r| r.hash.as_str()).collect();
        assert_eq!(order, vec!["b", "a", "c"]);
    }
}
