//! Pareto frontier over optimization results
//!
//! Objectives: maximize Sharpe, maximize total PnL, minimize max drawdown.

use ordered_float::OrderedFloat;

use crate::optimizer::OptimizationResult;
use crate::PerformanceMetrics;

/// Objective vector with every component oriented so larger is better.
/// NaN counts as the worst possible value.
fn objectives(metrics: &PerformanceMetrics) -> [f64; 3] {
    let clean = |v: f64| if v.is_nan() { f64::NEG_INFINITY } else { v };
    [
        clean(metrics.sharpe_ratio),
        clean(metrics.total_pnl),
        clean(-metrics.max_drawdown),
    ]
}

/// Check if `a` dominates `b` (no worse in every objective and strictly
/// better in at least one)
pub fn dominates(a: &PerformanceMetrics, b: &PerformanceMetrics) -> bool {
    let (oa, ob) = (objectives(a), objectives(b));
    let no_worse = oa.iter().zip(ob.iter()).all(|(x, y)| x >= y);
    let strictly_better = oa.iter().zip(ob.iter()).any(|(x, y)| x > y);
    no_worse && strictly_better
}

/// Non-dominated results, Sharpe descending. Results with identical
/// objectives are all kept.
pub fn pareto_frontier(results: &[OptimizationResult]) -> Vec<OptimizationResult> {
    let mut frontier: Vec<OptimizationResult> = results
        .iter()
        .filter(|candidate| {
            !results
                .iter()
                .any(|other| dominates(&other.metrics, &candidate.metrics))
        })
        .cloned()
        .collect();

    frontier.sort_by_key(|r| {
        (
            std::cmp::Reverse(OrderedFloat(r.metrics.sharpe_ratio)),
            r.hash.clone(),
        )
    });
    frontier
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Map;

    fn result(hash: &str, sharpe: f64, pnl: f64, drawdown: f64) -> OptimizationResult {
        OptimizationResult {
            params: Map::new(),
            hash: hash.to_string(),
            metrics: PerformanceMetrics {
                sharpe_ratio: sharpe,
                total_pnl: pnl,
                max_drawdown: drawdown,
                ..Default::default()
            },
        }
    }

    #[test]
    fn test_dominates() {
        let a = result("a", 1.0, 500.0, 5.0).metrics;
        let b = result("b", 0.8, 500.0, 5.0).metrics;
        assert!(dominates(&a, &b));
        assert!(!dominates(&b, &a));
        // Equal is not domination
        assert!(!dominates(&a, &a));
        // Lower drawdown is better
        let c = result("c", 1.0, 500.0, 4.0).metrics;
        assert!(dominates(&c, &a));
    }

    #[test]
    fn test_frontier() {
        let results = vec![
            result("best_sharpe", 2.0, 100.0, 10.0),
            result("best_pnl", 1.0, 900.0, 12.0),
            result("safest", 0.5, 50.0, 1.0),
            result("dominated", 0.9, 80.0, 11.0),
            result("nan", f64::NAN, 10.0, 20.0),
        ];
        let frontier = pareto_frontier(&results);
        let hashes: Vec<&str> = frontier.iter().map(|r| r.hash.as_str()).collect();
        assert_eq!(hashes, vec!["best_sharpe", "best_pnl", "safest"]);
    }

    #[test]
    fn test_frontier_keeps_ties() {
        let results = vec![result("a", 1.0, 1.0, 1.0), result("b", 1.0, 1.0, 1.0)];
        assert_eq!(pareto_frontier(&results).len(), 2);
        assert!(pareto_frontier(&[]).is_empty());
    }
}
