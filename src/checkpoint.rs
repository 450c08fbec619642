// Checkpoint store for optimization studies
// SQLite-backed so an interrupted grid search resumes where it stopped
//
// One row per parameter set, keyed by its hash. Completed runs are skipped
// on resume; failed runs are retried.

use anyhow::{anyhow, bail, Context, Result};
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info};

use crate::grid::ParameterSet;
use crate::optimizer::OptimizationResult;
use crate::PerformanceMetrics;

const STATUS_COMPLETED: &str = "completed";
const STATUS_FAILED: &str = "failed";

/// Run counts stored in the checkpoint
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CheckpointCounts {
    pub completed: usize,
    pub failed: usize,
}

/// A failed run as stored
#[derive(Debug, Clone, PartialEq)]
pub struct FailedRun {
    pub hash: String,
    pub params: Map<String, Value>,
    pub error: String,
}

#[derive(Clone)]
pub struct CheckpointStore {
    conn: Arc<Mutex<Connection>>,
}

impl CheckpointStore {
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self> {
        let db_path = db_path.as_ref();

        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(db_path)
            .with_context(|| format!("Failed to open checkpoint: {}", db_path.display()))?;

        // Enable WAL mode so readers never block the writer
        conn.pragma_update(None, "journal_mode", "WAL")?;

        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.create_tables()?;
        info!(path = %db_path.display(), "Checkpoint store opened");
        Ok(store)
    }

    pub fn in_memory() -> Result<Self> {
        let store = Self {
            conn: Arc::new(Mutex::new(Connection::open_in_memory()?)),
        };
        store.create_tables()?;
        Ok(store)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("checkpoint connection lock poisoned"))
    }

    fn create_tables(&self) -> Result<()> {
        let conn = self.lock()?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS study (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                fingerprint TEXT NOT NULL,
                created_at TEXT DEFAULT CURRENT_TIMESTAMP
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS runs (
                hash TEXT PRIMARY KEY,
                params TEXT NOT NULL,
                status TEXT NOT NULL,
                metrics TEXT,
                error TEXT,
                updated_at TEXT DEFAULT CURRENT_TIMESTAMP
            )",
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_runs_status ON runs(status)",
            [],
        )?;

        debug!("Checkpoint schema created/verified");
        Ok(())
    }

    /// Attach this store to a study. A store written for another study is
    /// refused; call `clear` first to start over.
    pub fn bind_study(&self, fingerprint: &str) -> Result<()> {
        let conn = self.lock()?;
        let existing: Option<String> = conn
            .query_row("SELECT fingerprint FROM study WHERE id = 1", [], |row| {
                row.get(0)
            })
            .optional()?;

        match existing {
            Some(stored) if stored == fingerprint => Ok(()),
            Some(stored) => bail!(
                "Checkpoint belongs to a different study (stored {}, current {}); \
                 rerun with --no-resume to start fresh",
                &stored[..stored.len().min(12)],
                &fingerprint[..fingerprint.len().min(12)]
            ),
            None => {
                conn.execute(
                    "INSERT INTO study (id, fingerprint) VALUES (1, ?1)",
                    params![fingerprint],
                )?;
                Ok(())
            }
        }
    }

    pub fn completed_hashes(&self) -> Result<HashSet<String>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT hash FROM runs WHERE status = ?1")?;
        let hashes = stmt
            .query_map(params![STATUS_COMPLETED], |row| row.get::<_, String>(0))?
            .collect::<Result<HashSet<_>, _>>()?;
        Ok(hashes)
    }

    pub fn record_success(&self, set: &ParameterSet, metrics: &PerformanceMetrics) -> Result<()> {
        let params_json = serde_json::to_string(&set.params)?;
        let metrics_json = serde_json::to_string(metrics)?;
        let conn = self.lock()?;
        conn.execute(
            "INSERT OR REPLACE INTO runs (hash, params, status, metrics, error, updated_at)
             VALUES (?1, ?2, ?3, ?4, NULL, CURRENT_TIMESTAMP)",
            params![set.hash, params_json, STATUS_COMPLETED, metrics_json],
        )?;
        Ok(())
    }

    pub fn record_failure(&self, set: &ParameterSet, error: &str) -> Result<()> {
        let params_json = serde_json::to_string(&set.params)?;
        let conn = self.lock()?;
        conn.execute(
            "INSERT OR REPLACE INTO runs (hash, params, status, metrics, error, updated_at)
             VALUES (?1, ?2, ?3, NULL, ?4, CURRENT_TIMESTAMP)",
            params![set.hash, params_json, STATUS_FAILED, error],
        )?;
        Ok(())
    }

    pub fn load_completed(&self) -> Result<Vec<OptimizationResult>> {
        let conn = self.lock()?;
        let mut stmt =
            conn.prepare("SELECT hash, params, metrics FROM runs WHERE status = ?1 ORDER BY hash")?;
        let rows = stmt
            .query_map(params![STATUS_COMPLETED], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, Option<String>>(2)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(hash, params, metrics)| {
                let params: Map<String, Value> = serde_json::from_str(&params)
                    .with_context(|| format!("Corrupt params for run {}", hash))?;
                let metrics: PerformanceMetrics =
                    serde_json::from_str(metrics.as_deref().unwrap_or("{}"))
                        .with_context(|| format!("Corrupt metrics for run {}", hash))?;
                Ok(OptimizationResult {
                    params,
                    hash,
                    metrics,
                })
            })
            .collect()
    }

    pub fn load_failed(&self) -> Result<Vec<FailedRun>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare("SELECT hash, params, error FROM runs WHERE status = ?1 ORDER BY hash")?;
        let rows = stmt
            .query_map(params![STATUS_FAILED], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, Option<String>>(2)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(hash, params, error)| {
                Ok(FailedRun {
                    params: serde_json::from_str(&params)
                        .with_context(|| format!("Corrupt params for run {}", hash))?,
                    hash,
                    error: error.unwrap_or_default(),
                })
            })
            .collect()
    }

    pub fn counts(&self) -> Result<CheckpointCounts> {
        let conn = self.lock()?;
        let count = |status: &str| -> Result<usize> {
            let n: i64 = conn.query_row(
                "SELECT COUNT(*) FROM runs WHERE status = ?1",
                params![status],
                |row| row.get(0),
            )?;
            Ok(n as usize)
        };
        Ok(CheckpointCounts {
            completed: count(STATUS_COMPLETED)?,
            failed: count(STATUS_FAILED)?,
        })
    }

    /// Drop all runs and the study binding
    pub fn clear(&self) -> Result<()> {
        let conn = self.lock()?;
        conn.execute("DELETE FROM runs", [])?;
        conn.execute("DELETE FROM study", [])?;
        info!("Checkpoint cleared");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(fast: i64) -> ParameterSet {
        let mut params = Map::new();
        params.insert("fast_period".into(), Value::from(fast));
        ParameterSet::new(params)
    }

    #[test]
    fn test_record_and_resume() {
        let store = CheckpointStore::in_memory().unwrap();
        store.bind_study("abc").unwrap();

        let metrics = PerformanceMetrics {
            sharpe_ratio: 1.5,
            total_trades: 12,
            ..Default::default()
        };
        store.record_success(&set(5), &metrics).unwrap();
        store.record_failure(&set(8), "boom").unwrap();

        let done = store.completed_hashes().unwrap();
        assert!(done.contains(&set(5).hash));
        assert!(!done.contains(&set(8).hash));

        let loaded = store.load_completed().unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].metrics, metrics);
        assert_eq!(loaded[0].params["fast_period"], 5);

        let failed = store.load_failed().unwrap();
        assert_eq!(failed[0].error, "boom");
        assert_eq!(
            store.counts().unwrap(),
            CheckpointCounts {
                completed: 1,
                failed: 1
            }
        );

        // A retried failure that succeeds replaces the failed row
        store.record_success(&set(8), &metrics).unwrap();
        assert_eq!(store.counts().unwrap().failed, 0);
    }

    #[test]
    fn test_study_mismatch_is_refused() {
        let store = CheckpointStore::in_memory().unwrap();
        store.bind_study("first").unwrap();
        store.bind_study("first").unwrap();
        assert!(store.bind_study("second").is_err());

        store.clear().unwrap();
        store.bind_study("second").unwrap();
    }

    #[test]
    fn test_reopen_from_disk() {
        let dir = std::env::temp_dir().join(format!("fxc_ckpt_{}", std::process::id()));
        let path = dir.join("checkpoint.db");
        {
            let store = CheckpointStore::open(&path).unwrap();
            store.bind_study("s").unwrap();
            store
                .record_success(&set(5), &PerformanceMetrics::default())
                .unwrap();
        }
        let store = CheckpointStore::open(&path).unwrap();
        store.bind_study("s").unwrap();
        assert_eq!(store.completed_hashes().unwrap().len(), 1);
        std::fs::remove_dir_all(&dir).ok();
    }
}
