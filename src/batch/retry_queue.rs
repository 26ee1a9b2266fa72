//! Durable cross-run retry list: `<outputDir>/pipeline-retries.json`,
//! an array of `RetryRecord`, rewritten atomically on every mutation.
//!
//! Same write-temp-then-rename durability idiom as `ProgressTracker::save`.

use crate::error::{OrchestratorError, Result};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryReason {
    EmptyData,
    ExecutionFailed,
    Timeout,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryRecord {
    pub config_name: String,
    pub symbol_code: String,
    pub report_type: String,
    pub region: String,
    pub created_at: DateTime<Utc>,
    pub last_retry_at: DateTime<Utc>,
    pub reason: RetryReason,
    pub attempts: u32,
    pub max_attempts: u32,
}

#[derive(Debug, Clone, Default)]
pub struct RetryStatistics {
    pub total: usize,
    pub by_region: std::collections::HashMap<String, usize>,
    pub by_report_type: std::collections::HashMap<String, usize>,
    pub by_reason: std::collections::HashMap<String, usize>,
    pub oldest_pending: Option<DateTime<Utc>>,
}

pub struct RetryQueue {
    path: PathBuf,
    max_attempts: u32,
    cleanup_days: i64,
    records: Mutex<Vec<RetryRecord>>,
}

impl RetryQueue {
    /// Load an existing queue file, or start empty if absent.
    pub fn load(path: impl Into<PathBuf>, max_attempts: u32, cleanup_days: i64) -> Result<Self> {
        let path = path.into();
        let records = if path.exists() {
            let bytes = std::fs::read(&path).map_err(|e| OrchestratorError::Persist {
                path: path.clone(),
                source: e,
            })?;
            serde_json::from_slice(&bytes).map_err(|e| OrchestratorError::Parse {
                path: path.clone(),
                source: e,
            })?
        } else {
            Vec::new()
        };
        Ok(Self {
            path,
            max_attempts,
            cleanup_days,
            records: Mutex::new(records),
        })
    }

    fn key(config_name: &str, symbol_code: &str, report_type: &str) -> (String, String, String) {
        (config_name.to_string(), symbol_code.to_string(), report_type.to_string())
    }

    /// `add`: bump an existing pending record, graduate (remove) one
    /// that hit `maxAttempts`, or create a new record at `attempts = 1`.
    pub fn add(&self, config_name: &str, symbol_code: &str, report_type: &str, region: &str, reason: RetryReason) -> Result<()> {
        let target = Self::key(config_name, symbol_code, report_type);
        {
            let mut records = self.records.lock();
            if let Some(pos) = records.iter().position(|r| Self::key(&r.config_name, &r.symbol_code, &r.report_type) == target) {
                if records[pos].attempts < records[pos].max_attempts {
                    records[pos].attempts += 1;
                    records[pos].last_retry_at = Utc::now();
                    records[pos].reason = reason;
                } else {
                    records.remove(pos);
                }
            } else {
                let now = Utc::now();
                records.push(RetryRecord {
                    config_name: config_name.to_string(),
                    symbol_code: symbol_code.to_string(),
                    report_type: report_type.to_string(),
                    region: region.to_string(),
                    created_at: now,
                    last_retry_at: now,
                    reason,
                    attempts: 1,
                    max_attempts: self.max_attempts,
                });
            }
        }
        self.persist()
    }

    /// Called on a subsequent successful run.
    pub fn remove(&self, config_name: &str, symbol_code: &str, report_type: &str) -> Result<()> {
        let target = Self::key(config_name, symbol_code, report_type);
        self.records
            .lock()
            .retain(|r| Self::key(&r.config_name, &r.symbol_code, &r.report_type) != target);
        self.persist()
    }

    #[must_use]
    pub fn pending(&self) -> Vec<RetryRecord> {
        self.records
            .lock()
            .iter()
            .filter(|r| r.attempts <= r.max_attempts)
            .cloned()
            .collect()
    }

    pub fn clear_all(&self) -> Result<usize> {
        let count = {
            let mut records = self.records.lock();
            let count = records.len();
            records.clear();
            count
        };
        self.persist()?;
        Ok(count)
    }

    /// Remove records older than `cleanup_days` by `createdAt`.
    pub fn cleanup_expired(&self) -> Result<usize> {
        let cutoff = Utc::now() - chrono::Duration::days(self.cleanup_days);
        let removed = {
            let mut records = self.records.lock();
            let before = records.len();
            records.retain(|r| r.created_at >= cutoff);
            before - records.len()
        };
        if removed > 0 {
            self.persist()?;
        }
        Ok(removed)
    }

    #[must_use]
    pub fn statistics(&self) -> RetryStatistics {
        let records = self.records.lock();
        let mut stats = RetryStatistics {
            total: records.len(),
            ..Default::default()
        };
        for record in records.iter() {
            *stats.by_region.entry(record.region.clone()).or_insert(0) += 1;
            *stats.by_report_type.entry(record.report_type.clone()).or_insert(0) += 1;
            *stats.by_reason.entry(format!("{:?}", record.reason)).or_insert(0) += 1;
            stats.oldest_pending = Some(match stats.oldest_pending {
                Some(existing) if existing <= record.created_at => existing,
                _ => record.created_at,
            });
        }
        stats
    }

    fn persist(&self) -> Result<()> {
        let records = self.records.lock().clone();
        write_atomic(&self.path, &records)
    }
}

fn write_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| OrchestratorError::Persist {
            path: path.to_path_buf(),
            source: e,
        })?;
    }
    let tmp = path.with_extension("json.tmp");
    let bytes = serde_json::to_vec_pretty(value).map_err(|e| OrchestratorError::Parse {
        path: path.to_path_buf(),
        source: e,
    })?;
    std::fs::write(&tmp, &bytes).map_err(|e| OrchestratorError::Persist {
        path: tmp.clone(),
        source: e,
    })?;
    std::fs::rename(&tmp, path).map_err(|e| OrchestratorError::Persist {
        path: path.to_path_buf(),
        source: e,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_twice_increases_attempts_by_two() {
        let dir = tempfile::tempdir().expect("tempdir");
        let queue = RetryQueue::load(dir.path().join("pipeline-retries.json"), 3, 7).expect("load");
        queue.add("cfg", "AAPL", "income-statement", "us", RetryReason::EmptyData).expect("add");
        queue.add("cfg", "AAPL", "income-statement", "us", RetryReason::EmptyData).expect("add");
        let pending = queue.pending();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].attempts, 2);
    }

    #[test]
    fn add_graduates_after_max_attempts() {
        let dir = tempfile::tempdir().expect("tempdir");
        let queue = RetryQueue::load(dir.path().join("pipeline-retries.json"), 2, 7).expect("load");
        queue.add("cfg", "AAPL", "income-statement", "us", RetryReason::EmptyData).expect("add");
        queue.add("cfg", "AAPL", "income-statement", "us", RetryReason::EmptyData).expect("add");
        // attempts == max_attempts now; next add graduates (removes) it.
        queue.add("cfg", "AAPL", "income-statement", "us", RetryReason::EmptyData).expect("add");
        assert!(queue.pending().is_empty());
    }

    #[test]
    fn persists_and_reloads_from_disk() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("pipeline-retries.json");
        {
            let queue = RetryQueue::load(&path, 3, 7).expect("load");
            queue.add("cfg", "AAPL", "income-statement", "us", RetryReason::Timeout).expect("add");
        }
        let reloaded = RetryQueue::load(&path, 3, 7).expect("reload");
        assert_eq!(reloaded.pending().len(), 1);
    }

    #[test]
    fn remove_filters_matching_record() {
        let dir = tempfile::tempdir().expect("tempdir");
        let queue = RetryQueue::load(dir.path().join("r.json"), 3, 7).expect("load");
        queue.add("cfg", "AAPL", "income-statement", "us", RetryReason::EmptyData).expect("add");
        queue.remove("cfg", "AAPL", "income-statement").expect("remove");
        assert!(queue.pending().is_empty());
    }
}
