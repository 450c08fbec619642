//! Optimization reports
//!
//! Writes `results.csv`, `top_results.json`, `pareto_frontier.json`,
//! `summary.json` and `report.md` into the study output directory.

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::checkpoint::FailedRun;
use crate::grid::{format_params, StudyConfig};
use crate::optimizer::{sort_results, Objective, OptimizationResult};
use crate::pareto::pareto_frontier;
use crate::PerformanceMetrics;

pub const RESULTS_CSV: &str = "results.csv";
pub const TOP_RESULTS_JSON: &str = "top_results.json";
pub const PARETO_JSON: &str = "pareto_frontier.json";
pub const SUMMARY_JSON: &str = "summary.json";
pub const REPORT_MD: &str = "report.md";

const METRIC_COLUMNS: [&str; 12] = [
    "total_pnl",
    "total_return",
    "sharpe_ratio",
    "max_drawdown",
    "win_rate",
    "profit_factor",
    "expectancy",
    "total_trades",
    "long_trades",
    "short_trades",
    "rejected_signals",
    "dormant_trades",
];

fn metric_cells(m: &PerformanceMetrics) -> [String; 12] {
    [
        format!("{:.2}", m.total_pnl),
        format!("{:.4}", m.total_return),
        format!("{:.4}", m.sharpe_ratio),
        format!("{:.4}", m.max_drawdown),
        format!("{:.2}", m.win_rate),
        format!("{:.4}", m.profit_factor),
        format!("{:.2}", m.expectancy),
        m.total_trades.to_string(),
        m.long_trades.to_string(),
        m.short_trades.to_string(),
        m.rejected_signals.to_string(),
        m.dormant_trades.to_string(),
    ]
}

/// Grid counts that the report needs besides the results
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GridCounts {
    pub total_combinations: usize,
    pub valid_combinations: usize,
    pub invalid_combinations: usize,
}

/// Contents of `summary.json`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Summary {
    pub study: String,
    #[serde(default)]
    pub description: Option<String>,
    pub objective: Objective,
    pub generated_at: DateTime<Utc>,
    pub total_combinations: usize,
    pub valid_combinations: usize,
    pub invalid_combinations: usize,
    pub completed_runs: usize,
    pub failed_runs: usize,
    /// Completed runs meeting `min_trades`
    pub ranked_runs: usize,
    pub min_trades: usize,
    pub pareto_size: usize,
    pub best_params: Option<Map<String, Value>>,
    pub best_metrics: Option<PerformanceMetrics>,
}

/// Ranked view of a finished study
#[derive(Debug, Clone)]
pub struct StudyReport {
    pub summary: Summary,
    /// All completed results, best first
    pub results: Vec<OptimizationResult>,
    pub top: Vec<OptimizationResult>,
    pub pareto: Vec<OptimizationResult>,
    pub failures: Vec<FailedRun>,
    /// Parameters the study sweeps, for display
    pub swept: BTreeSet<String>,
}

impl StudyReport {
    pub fn build(
        study: &StudyConfig,
        counts: GridCounts,
        mut results: Vec<OptimizationResult>,
        failures: Vec<FailedRun>,
    ) -> Self {
        let objective = study.objective;
        let min_trades = study.constraints.min_trades;
        sort_results(&mut results, objective);

        let ranked: Vec<OptimizationResult> = results
            .iter()
            .filter(|r| r.metrics.total_trades >= min_trades)
            .cloned()
            .collect();
        let top: Vec<OptimizationResult> = ranked.iter().take(study.top_n).cloned().collect();
        let pareto = pareto_frontier(&ranked);
        let best = ranked.first();

        let summary = Summary {
            study: study.name.clone(),
            description: study.description.clone(),
            objective,
            generated_at: Utc::now(),
            total_combinations: counts.total_combinations,
            valid_combinations: counts.valid_combinations,
            invalid_combinations: counts.invalid_combinations,
            completed_runs: results.len(),
            failed_runs: failures.len(),
            ranked_runs: ranked.len(),
            min_trades,
            pareto_size: pareto.len(),
            best_params: best.map(|r| r.params.clone()),
            best_metrics: best.map(|r| r.metrics.clone()),
        };

        Self {
            summary,
            results,
            top,
            pareto,
            failures,
            swept: study.parameters.keys().cloned().collect(),
        }
    }

    /// Write every report file into `dir`
    pub fn write_all(&self, dir: impl AsRef<Path>) -> Result<Vec<PathBuf>> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create report directory {}", dir.display()))?;

        let paths = vec![
            dir.join(RESULTS_CSV),
            dir.join(TOP_RESULTS_JSON),
            dir.join(PARETO_JSON),
            dir.join(SUMMARY_JSON),
            dir.join(REPORT_MD),
        ];
        write_results_csv(&paths[0], &self.results)?;
        write_json(&paths[1], &self.top)?;
        write_json(&paths[2], &self.pareto)?;
        write_json(&paths[3], &self.summary)?;
        fs::write(&paths[4], self.to_markdown())
            .with_context(|| format!("Failed to write {}", paths[4].display()))?;

        info!(dir = %dir.display(), results = self.results.len(), "Reports written");
        Ok(paths)
    }

    pub fn to_markdown(&self) -> String {
        let s = &self.summary;
        let mut md = String::new();
        let _ = writeln!(md, "# Optimization Report: {}\n", s.study);
        if let Some(desc) = &s.description {
            let _ = writeln!(md, "{}\n", desc);
        }
        let _ = writeln!(md, "Generated: {}\n", s.generated_at.format("%Y-%m-%d %H:%M:%S UTC"));

        let _ = writeln!(md, "## Summary\n");
        let _ = writeln!(md, "| Item | Value |");
        let _ = writeln!(md, "|---|---|");
        let _ = writeln!(md, "| Objective | {} |", s.objective);
        let _ = writeln!(md, "| Combinations | {} |", s.total_combinations);
        let _ = writeln!(md, "| Valid / invalid | {} / {} |", s.valid_combinations, s.invalid_combinations);
        let _ = writeln!(md, "| Completed runs | {} |", s.completed_runs);
        let _ = writeln!(md, "| Failed runs | {} |", s.failed_runs);
        let _ = writeln!(md, "| Ranked (trades >= {}) | {} |", s.min_trades, s.ranked_runs);
        let _ = writeln!(md, "| Pareto frontier | {} |", s.pareto_size);
        if let Some(m) = &s.best_metrics {
            let _ = writeln!(md, "| Best {} | {:.4} |", s.objective, s.objective.value(m));
        }
        let _ = writeln!(md);

        if let Some(best) = &s.best_params {
            let _ = writeln!(md, "## Best Parameters\n");
            let _ = writeln!(md, "```json\n{}\n```\n", Value::Object(best.clone()));
        }

        let _ = writeln!(md, "## Top {} Results\n", self.top.len());
        md.push_str(&results_table(&self.top, &self.swept));

        let _ = writeln!(md, "\n## Pareto Frontier (Sharpe, PnL, Drawdown)\n");
        md.push_str(&results_table(&self.pareto, &self.swept));

        if !self.failures.is_empty() {
            let _ = writeln!(md, "\n## Failed Runs\n");
            for f in &self.failures {
                let _ = writeln!(md, "- `{}`: {}", format_params(&f.params, Some(&self.swept)), f.error);
            }
        }
        md
    }

    /// Console table in the same layout as the Markdown one
    pub fn print_top(&self) {
        let s = &self.summary;
        println!("\n{}", "=".repeat(110));
        println!("TOP {} OPTIMIZATION RESULTS (sorted by {})", self.top.len(), s.objective);
        println!("{}", "=".repeat(110));
        println!(
            "{:<4} {:>7} {:>11} {:>9} {:>8} {:>6} {:>6} | Parameters",
            "Rank", "Sharpe", "PnL", "Return%", "MaxDD%", "WinR%", "Trades"
        );
        println!("{}", "-".repeat(110));
        for (i, r) in self.top.iter().enumerate() {
            let m = &r.metrics;
            println!(
                "{:<4} {:>7.2} {:>11.2} {:>9.2} {:>8.2} {:>6.1} {:>6} | {}",
                i + 1,
                m.sharpe_ratio,
                m.total_pnl,
                m.total_return,
                m.max_drawdown,
                m.win_rate,
                m.total_trades,
                format_params(&r.params, Some(&self.swept))
            );
        }
        println!("{}", "=".repeat(110));
        println!(
            "Completed: {} | Failed: {} | Pareto: {}",
            s.completed_runs, s.failed_runs, s.pareto_size
        );
    }
}

fn results_table(results: &[OptimizationResult], swept: &BTreeSet<String>) -> String {
    if results.is_empty() {
        return "_No results._\n".to_string();
    }
    let mut md = String::new();
    let _ = writeln!(md, "| Rank | Sharpe | PnL | Return % | Max DD % | Win % | PF | Trades | Parameters |");
    let _ = writeln!(md, "|---:|---:|---:|---:|---:|---:|---:|---:|---|");
    for (i, r) in results.iter().enumerate() {
        let m = &r.metrics;
        let _ = writeln!(
            md,
            "| {} | {:.2} | {:.2} | {:.2} | {:.2} | {:.1} | {:.2} | {} | {} |",
            i + 1,
            m.sharpe_ratio,
            m.total_pnl,
            m.total_return,
            m.max_drawdown,
            m.win_rate,
            m.profit_factor,
            m.total_trades,
            format_params(&r.params, Some(swept))
        );
    }
    md
}

fn param_cell(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

/// All results, one row each: sorted parameter columns then metrics
pub fn write_results_csv(path: impl AsRef<Path>, results: &[OptimizationResult]) -> Result<()> {
    let path = path.as_ref();
    let param_columns: BTreeSet<&String> = results.iter().flat_map(|r| r.params.keys()).collect();

    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("Failed to create {}", path.display()))?;

    let header: Vec<&str> = std::iter::once("hash")
        .chain(param_columns.iter().map(|s| s.as_str()))
        .chain(METRIC_COLUMNS)
        .collect();
    writer.write_record(&header)?;

    for r in results {
        let row: Vec<String> = std::iter::once(r.hash.clone())
            .chain(param_columns.iter().map(|k| param_cell(r.params.get(*k))))
            .chain(metric_cells(&r.metrics))
            .collect();
        writer.write_record(&row)?;
    }
    writer.flush()?;
    Ok(())
}

fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    fs::write(path, serde_json::to_string_pretty(value)?)
        .with_context(|| format!("Failed to write {}", path.display()))
}

/// Best parameters of a previous study: a `top_results.json` file, a
/// `summary.json` file, or a directory containing either
pub fn load_best_params(path: impl AsRef<Path>) -> Result<Map<String, Value>> {
    let path = path.as_ref();
    let file = if path.is_dir() {
        let top = path.join(TOP_RESULTS_JSON);
        if top.exists() {
            top
        } else {
            path.join(SUMMARY_JSON)
        }
    } else {
        path.to_path_buf()
    };

    let contents = fs::read_to_string(&file)
        .with_context(|| format!("Failed to read seed file {}", file.display()))?;
    let value: Value = serde_json::from_str(&contents)
        .with_context(|| format!("Failed to parse seed file {}", file.display()))?;

    let params = match value {
        Value::Array(items) => items
            .into_iter()
            .next()
            .and_then(|first| first.get("params").cloned()),
        Value::Object(ref obj) if obj.contains_key("best_params") => obj.get("best_params").cloned(),
        _ => None,
    };

    match params {
        Some(Value::Object(map)) => Ok(map),
        _ => bail!("Seed file {} has no best parameters", file.display()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::StudyConfig;

    fn result(fast: i64, sharpe: f64, pnl: f64, drawdown: f64, trades: usize) -> OptimizationResult {
        let mut params = Map::new();
        params.insert("fast_period".into(), Value::from(fast));
        params.insert("stop_loss_pips".into(), Value::from(25));
        OptimizationResult {
            hash: format!("h{}", fast),
            params,
            metrics: PerformanceMetrics {
                sharpe_ratio: sharpe,
                total_pnl: pnl,
                max_drawdown: drawdown,
                total_trades: trades,
                ..Default::default()
            },
        }
    }

    fn study() -> StudyConfig {
        serde_json::from_value(serde_json::json!({
            "name": "phase1",
            "parameters": {"fast_period": [5, 8, 10]},
            "constraints": {"min_trades": 5},
            "top_n": 2
        }))
        .unwrap()
    }

    #[test]
    fn test_build_ranks_and_filters() {
        let results = vec![
            result(5, 0.5, 100.0, 3.0, 10),
            result(8, 3.0, 900.0, 1.0, 2),
            result(10, 1.0, 50.0, 2.0, 12),
        ];
        let report = StudyReport::build(&study(), GridCounts::default(), results, vec![]);

        assert_eq!(report.results.len(), 3);
        assert_eq!(report.summary.ranked_runs, 2);
        // fast=8 has too few trades to rank
        assert_eq!(report.top[0].hash, "h10");
        assert_eq!(report.top.len(), 2);
        assert_eq!(report.summary.best_params.as_ref().unwrap()["fast_period"], 10);
        assert!(report.pareto.iter().all(|r| r.hash != "h8"));
    }

    #[test]
    fn test_write_all_and_seed() {
        let dir = std::env::temp_dir().join(format!("fxc_report_{}", std::process::id()));
        let results = vec![result(5, 0.5, 100.0, 3.0, 10), result(10, 1.0, 50.0, 2.0, 12)];
        let report = StudyReport::build(&study(), GridCounts::default(), results, vec![]);
        let paths = report.write_all(&dir).unwrap();
        assert!(paths.iter().all(|p| p.exists()));

        let mut reader = csv::Reader::from_path(dir.join(RESULTS_CSV)).unwrap();
        let headers = reader.headers().unwrap().clone();
        assert_eq!(&headers[0], "hash");
        assert_eq!(&headers[1], "fast_period");
        assert_eq!(&headers[2], "stop_loss_pips");
        assert_eq!(&headers[3], "total_pnl");
        assert_eq!(reader.records().count(), 2);

        let md = fs::read_to_string(dir.join(REPORT_MD)).unwrap();
        assert!(md.contains("# Optimization Report: phase1"));
        assert!(md.contains("## Pareto Frontier"));

        let best = load_best_params(&dir).unwrap();
        assert_eq!(best["fast_period"], 10);
        let best = load_best_params(dir.join(SUMMARY_JSON)).unwrap();
        assert_eq!(best["fast_period"], 10);

        fs::remove_dir_all(&dir).ok();
    }
}
