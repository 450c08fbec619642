//! FX Crossover
//!
//! Forex moving-average crossover research toolkit: the strategy state
//! machine with its filters and dormant mode, an event-driven backtester,
//! an on-disk bar catalog, and a checkpointed parallel grid search with
//! Pareto and Markdown/JSON/CSV reporting.

pub mod types;
pub mod bar_spec;
pub mod instrument;
pub mod ibkr;
pub mod config;
pub mod data;
pub mod catalog;
pub mod indicators;
pub mod strategies;
pub mod backtest;
pub mod grid;
pub mod checkpoint;
pub mod optimizer;
pub mod pareto;
pub mod report;

pub use config::Config;
pub use strategies::Strategy;
pub use types::*;
