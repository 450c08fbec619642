//! Grid search parameter space
//!
//! A study file names the strategy parameters to sweep, either as explicit
//! value lists or as `{min, max, step}` ranges, plus fixed overrides. The
//! space is the cartesian product of the swept values in sorted key order.

use anyhow::{Context, Result};
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::optimizer::Objective;
use crate::strategies::{self, ma_crossover};
use crate::Config;

/// Ranges may not expand past this many values per parameter
const MAX_RANGE_VALUES: usize = 10_000;

#[derive(Debug, Error, PartialEq)]
pub enum ParamSpaceError {
    #[error("parameter '{0}' has no values")]
    EmptyValues(String),

    #[error("parameter '{name}': invalid range (min={min}, max={max}, step={step})")]
    InvalidRange {
        name: String,
        min: f64,
        max: f64,
        step: f64,
    },

    #[error("parameter '{0}' is not a setting of the strategy")]
    UnknownParameter(String),

    #[error("strategy section is not a JSON object")]
    NotAnObject,
}

/// Values to sweep for one parameter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValues {
    List(Vec<Value>),
    Range { min: f64, max: f64, step: f64 },
}

impl ParamValues {
    pub fn expand(&self, name: &str) -> Result<Vec<Value>, ParamSpaceError> {
        match self {
            ParamValues::List(values) if values.is_empty() => {
                Err(ParamSpaceError::EmptyValues(name.to_string()))
            }
            ParamValues::List(values) => Ok(values.clone()),
            ParamValues::Range { min, max, step } => expand_range(name, *min, *max, *step),
        }
    }
}

fn expand_range(name: &str, min: f64, max: f64, step: f64) -> Result<Vec<Value>, ParamSpaceError> {
    let invalid = || ParamSpaceError::InvalidRange {
        name: name.to_string(),
        min,
        max,
        step,
    };
    if !(min.is_finite() && max.is_finite() && step.is_finite()) || step <= 0.0 || max < min {
        return Err(invalid());
    }
    let count = ((max - min) / step + 1e-9).floor() as usize + 1;
    if count > MAX_RANGE_VALUES {
        return Err(invalid());
    }

    let integral = min.fract() == 0.0 && step.fract() == 0.0;
    Ok((0..count)
        .map(|i| {
            let v = min + step * i as f64;
            if integral {
                Value::from(v as i64)
            } else {
                // Trim accumulated float noise (0.30000000000000004)
                Value::from((v * 1e10).round() / 1e10)
            }
        })
        .collect())
}

/// Hard limits applied to every combination and result
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Constraints {
    /// Results with fewer trades are kept but not ranked
    #[serde(default)]
    pub min_trades: usize,

    /// Stop after this many combinations (after validation)
    #[serde(default)]
    pub max_combinations: Option<usize>,
}

/// Optimization study definition (JSON)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StudyConfig {
    pub name: String,

    #[serde(default)]
    pub description: Option<String>,

    /// Swept parameters, by strategy setting name
    #[serde(default)]
    pub parameters: BTreeMap<String, ParamValues>,

    /// Overrides applied to every combination
    #[serde(default)]
    pub fixed: Map<String, Value>,

    #[serde(default)]
    pub constraints: Constraints,

    #[serde(default)]
    pub objective: Objective,

    #[serde(default = "default_workers")]
    pub workers: usize,

    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    #[serde(default = "default_top_n")]
    pub top_n: usize,
}

fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("logs/grid_search")
}

fn default_top_n() -> usize {
    10
}

impl StudyConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read study file {}", path.display()))?;
        let study: StudyConfig =
            serde_json::from_str(&contents).context("Failed to parse study JSON")?;
        Ok(study)
    }

    /// Total combinations before validation
    pub fn total_combinations(&self) -> Result<usize, ParamSpaceError> {
        self.parameters
            .iter()
            .map(|(name, values)| values.expand(name).map(|v| v.len()))
            .product()
    }

    /// Identity of the study and base settings. A checkpoint written under a
    /// different fingerprint must not be resumed.
    pub fn fingerprint(&self, base: &Config) -> Result<String> {
        let identity = serde_json::json!({
            "name": self.name,
            "parameters": self.parameters,
            "fixed": self.fixed,
            "constraints": self.constraints,
            "backtest": base.backtest,
            "strategy_name": base.strategy_name,
            "strategy": base.strategy,
        });
        Ok(sha256_hex(&serde_json::to_string(&identity)?))
    }

    /// Copy best parameters of a previous study into `fixed`. Parameters that
    /// this study sweeps or already fixes are left alone. Returns the names
    /// seeded.
    pub fn apply_seed(&mut self, best: &Map<String, Value>) -> Vec<String> {
        let mut seeded = Vec::new();
        for (key, value) in best {
            if self.parameters.contains_key(key) || self.fixed.contains_key(key) {
                continue;
            }
            self.fixed.insert(key.clone(), value.clone());
            seeded.push(key.clone());
        }
        seeded
    }
}

/// One concrete combination: fixed values overlaid with swept values
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterSet {
    pub params: Map<String, Value>,
    pub hash: String,
}

impl ParameterSet {
    pub fn new(params: Map<String, Value>) -> Self {
        let hash = parameter_hash(&params);
        Self { params, hash }
    }

    /// Base config with this combination applied to the strategy section
    pub fn apply(&self, base: &Config) -> Result<Config, ParamSpaceError> {
        base.with_strategy_overrides(&self.params)
            .map_err(|_| ParamSpaceError::NotAnObject)
    }
}

/// Stable key for a parameter map (sha256 of its canonical JSON)
pub fn parameter_hash(params: &Map<String, Value>) -> String {
    // serde_json maps are ordered by key, so the encoding is canonical
    let encoded = Value::Object(params.clone()).to_string();
    sha256_hex(&encoded)
}

fn sha256_hex(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    hex::encode(hasher.finalize())
}

/// Generated combinations split by validity
#[derive(Debug, Clone, Default)]
pub struct GridExpansion {
    pub valid: Vec<ParameterSet>,
    pub invalid: Vec<(ParameterSet, String)>,
    pub total: usize,
}

/// Setting names the strategy accepts
fn known_parameters(base: &Config) -> Result<BTreeSet<String>, ParamSpaceError> {
    let mut known: BTreeSet<String> = base
        .strategy
        .as_object()
        .ok_or(ParamSpaceError::NotAnObject)?
        .keys()
        .cloned()
        .collect();
    if base.strategy_name == ma_crossover::NAME {
        if let Ok(Value::Object(defaults)) =
            serde_json::to_value(ma_crossover::MaCrossoverConfig::default())
        {
            known.extend(defaults.keys().cloned());
        }
    }
    Ok(known)
}

/// Expand the study into concrete combinations. Each one is validated by
/// building the strategy from the merged config; failures are kept with
/// their reason.
pub fn generate(study: &StudyConfig, base: &Config) -> Result<GridExpansion, ParamSpaceError> {
    let known = known_parameters(base)?;
    for name in study.parameters.keys().chain(study.fixed.keys()) {
        if !known.contains(name) {
            return Err(ParamSpaceError::UnknownParameter(name.clone()));
        }
    }

    let names: Vec<&String> = study.parameters.keys().collect();
    let value_lists: Vec<Vec<Value>> = study
        .parameters
        .iter()
        .map(|(name, values)| values.expand(name))
        .collect::<Result<_, _>>()?;

    let combos: Vec<Vec<Value>> = if value_lists.is_empty() {
        vec![Vec::new()]
    } else {
        value_lists.into_iter().multi_cartesian_product().collect()
    };

    let mut expansion = GridExpansion {
        total: combos.len(),
        ..Default::default()
    };

    for combo in combos {
        let mut params = study.fixed.clone();
        for (name, value) in names.iter().zip(combo) {
            params.insert((*name).clone(), value);
        }
        let set = ParameterSet::new(params);

        let check = set
            .apply(base)
            .map_err(|e| e.to_string())
            .and_then(|config| {
                strategies::create_strategy(&config)
                    .map(|_| ())
                    .map_err(|e| format!("{:#}", e))
            });
        match check {
            Ok(()) => expansion.valid.push(set),
            Err(reason) => expansion.invalid.push((set, reason)),
        }
    }

    if let Some(limit) = study.constraints.max_combinations {
        if expansion.valid.len() > limit {
            tracing::warn!(
                limit,
                valid = expansion.valid.len(),
                "Truncating combinations to max_combinations"
            );
            expansion.valid.truncate(limit);
        }
    }

    tracing::info!(
        total = expansion.total,
        valid = expansion.valid.len(),
        invalid = expansion.invalid.len(),
        "Parameter space generated"
    );
    Ok(expansion)
}

/// Parse CLI override into grid format
/// Format: "param=val1,val2,val3"
pub fn parse_grid_override(s: &str) -> Option<(String, ParamValues)> {
    let (key, raw) = s.split_once('=')?;
    let key = key.trim().to_string();
    if key.is_empty() {
        return None;
    }

    let values: Vec<Value> = raw
        .split(',')
        .filter_map(|v| {
            let v = v.trim();
            // Try parsing as number first, then as string
            if let Ok(n) = v.parse::<i64>() {
                Some(Value::from(n))
            } else if let Ok(n) = v.parse::<f64>() {
                Some(Value::from(n))
            } else if v == "true" {
                Some(Value::Bool(true))
            } else if v == "false" {
                Some(Value::Bool(false))
            } else if !v.is_empty() {
                Some(Value::from(v))
            } else {
                None
            }
        })
        .collect();

    if values.is_empty() {
        None
    } else {
        Some((key, ParamValues::List(values)))
    }
}

/// Apply CLI overrides to the study's swept parameters
pub fn apply_overrides(study: &mut StudyConfig, overrides: &[String]) -> Result<()> {
    for override_str in overrides {
        let (key, values) = parse_grid_override(override_str)
            .with_context(|| format!("Invalid override '{}': expected name=v1,v2", override_str))?;
        study.fixed.remove(&key);
        study.parameters.insert(key, values);
    }
    Ok(())
}

/// Format params for display
pub fn format_params(params: &Map<String, Value>, only: Option<&BTreeSet<String>>) -> String {
    params
        .iter()
        .filter(|(k, _)| only.map_or(true, |keys| keys.contains(*k)))
        .map(|(k, v)| match v {
            Value::Number(n) if n.as_f64().is_some_and(|f| f.fract() != 0.0) => {
                format!("{}={:.2}", k, n.as_f64().unwrap_or_default())
            }
            Value::String(s) => format!("{}={}", k, s),
            other => format!("{}={}", k, other),
        })
        .join(", ")
}
