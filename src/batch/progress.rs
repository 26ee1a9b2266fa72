//! Durable per-batch task state machine: counters, ETA, periodic auto-save.
//!
//! Callback delivery follows the `ProgressReporter` idiom in the crawl
//! engine (a trait with a no-op default) rather than channels, since every
//! callback here is synchronous with the mutation that triggers it.

use crate::batch::task::{Task, TaskStatus};
use crate::error::{OrchestratorError, Result};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::task::JoinHandle;

/// Delivered synchronously, in mutation order, for a given task.
pub trait ProgressObserver: Send + Sync {
    fn on_progress(&self, _summary: &ProgressSummary) {}
    fn on_error(&self, _config_name: &str, _message: &str) {}
    fn on_complete(&self, _summary: &ProgressSummary) {}
}

#[derive(Debug, Clone, Copy)]
pub struct NoOpObserver;
impl ProgressObserver for NoOpObserver {}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressSummary {
    pub id: String,
    pub category: Option<String>,
    pub market: Option<String>,
    pub r#type: Option<String>,
    pub total: usize,
    pub pending: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub percentage: f64,
    pub average_time_per_task_ms: f64,
    pub estimated_time_remaining_ms: f64,
    pub started_at: DateTime<Utc>,
    pub last_update_at: DateTime<Utc>,
    pub current_item: Option<String>,
    pub errors: Vec<String>,
    pub tasks: BTreeMap<String, Task>,
}

impl ProgressSummary {
    fn new(id: String, category: Option<String>, market: Option<String>, r#type: Option<String>, tasks: BTreeMap<String, Task>) -> Self {
        let total = tasks.len();
        let now = Utc::now();
        Self {
            id,
            category,
            market,
            r#type,
            total,
            pending: total,
            running: 0,
            completed: 0,
            failed: 0,
            skipped: 0,
            percentage: 0.0,
            average_time_per_task_ms: 0.0,
            estimated_time_remaining_ms: 0.0,
            started_at: now,
            last_update_at: now,
            current_item: None,
            errors: Vec::new(),
            tasks,
        }
    }

    fn recompute_counters(&mut self) {
        let mut pending = 0;
        let mut running = 0;
        let mut completed = 0;
        let mut failed = 0;
        let mut skipped = 0;
        let mut durations_ms = Vec::new();

        for task in self.tasks.values() {
            match task.status {
                TaskStatus::Pending => pending += 1,
                TaskStatus::Running => running += 1,
                TaskStatus::Completed => {
                    completed += 1;
                    if let (Some(start), Some(end)) = (task.started_at, task.ended_at) {
                        durations_ms.push((end - start).num_milliseconds().max(0) as f64);
                    }
                }
                TaskStatus::Failed => failed += 1,
                TaskStatus::Skipped => skipped += 1,
            }
        }

        self.pending = pending;
        self.running = running;
        self.completed = completed;
        self.failed = failed;
        self.skipped = skipped;
        self.percentage = if self.total == 0 {
            100.0
        } else {
            (completed + failed + skipped) as f64 / self.total as f64 * 100.0
        };
        self.average_time_per_task_ms = if durations_ms.is_empty() {
            0.0
        } else {
            durations_ms.iter().sum::<f64>() / durations_ms.len() as f64
        };
        self.estimated_time_remaining_ms = (pending + running) as f64 * self.average_time_per_task_ms;
        self.last_update_at = Utc::now();
    }
}

struct Inner {
    summary: ProgressSummary,
    auto_save_handle: Option<JoinHandle<()>>,
}

/// Owns one batch's `ProgressSummary`, its durable persistence, and its
/// auto-save timer.
pub struct ProgressTracker {
    progress_dir: PathBuf,
    inner: Mutex<Inner>,
    observer: Arc<dyn ProgressObserver>,
}

impl ProgressTracker {
    #[must_use]
    pub fn new(
        progress_dir: impl Into<PathBuf>,
        id: String,
        category: Option<String>,
        market: Option<String>,
        r#type: Option<String>,
        config_names: &[String],
        tasks: BTreeMap<String, Task>,
        observer: Arc<dyn ProgressObserver>,
    ) -> Arc<Self> {
        let _ = config_names;
        let summary = ProgressSummary::new(id, category, market, r#type, tasks);
        Arc::new(Self {
            progress_dir: progress_dir.into(),
            inner: Mutex::new(Inner {
                summary,
                auto_save_handle: None,
            }),
            observer,
        })
    }

    /// Start the periodic auto-save timer (default 30s).
    pub fn start_auto_save(self: &Arc<Self>, interval: std::time::Duration) {
        let tracker = Arc::clone(self);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                if let Err(e) = tracker.save(None) {
                    log::warn!("auto-save of progress summary failed: {e}");
                }
            }
        });
        self.inner.lock().auto_save_handle = Some(handle);
    }

    /// `updateProgress`: records the transition, updates counters,
    /// and fires callbacks. Fires `onComplete` once pending and running
    /// both reach zero.
    pub fn update_progress(&self, config_name: &str, new_status: TaskStatus, error_message: Option<&str>) {
        let (summary_snapshot, completed_now, error_fired) = {
            let mut inner = self.inner.lock();
            let Some(task) = inner.summary.tasks.get_mut(config_name) else {
                return;
            };

            let now = Utc::now();
            if new_status == TaskStatus::Running {
                task.attempts += 1;
                if task.started_at.is_none() {
                    task.started_at = Some(now);
                }
            }
            if new_status.is_terminal() || new_status == TaskStatus::Failed {
                task.ended_at = Some(now);
            }
            if let Some(msg) = error_message {
                task.last_error = Some(msg.to_string());
            }
            task.status = new_status;

            if new_status == TaskStatus::Running {
                inner.summary.current_item = Some(config_name.to_string());
            } else if inner.summary.current_item.as_deref() == Some(config_name) {
                inner.summary.current_item = None;
            }

            let error_fired = if let Some(msg) = error_message {
                inner.summary.errors.push(format!("{config_name}: {msg}"));
                true
            } else {
                false
            };

            inner.summary.recompute_counters();
            let completed_now = inner.summary.running == 0 && inner.summary.pending == 0;
            (inner.summary.clone(), completed_now, error_fired)
        };

        if error_fired {
            self.observer.on_error(config_name, error_message.unwrap_or_default());
        }
        self.observer.on_progress(&summary_snapshot);
        if completed_now {
            self.observer.on_complete(&summary_snapshot);
        }
    }

    /// Force a task back to `Pending`, clearing `lastError`/`endedAt`.
    pub fn reset_config(&self, config_name: &str) {
        let mut inner = self.inner.lock();
        if let Some(task) = inner.summary.tasks.get_mut(config_name) {
            task.reset();
        }
        inner.summary.recompute_counters();
    }

    /// Tasks `Failed` with `attempts < 3`.
    #[must_use]
    pub fn retryable_configs(&self) -> Vec<String> {
        const MAX_ATTEMPTS: u32 = 3;
        self.inner
            .lock()
            .summary
            .tasks
            .values()
            .filter(|t| t.is_retryable(MAX_ATTEMPTS))
            .map(|t| t.config_name.clone())
            .collect()
    }

    #[must_use]
    pub fn summary(&self) -> ProgressSummary {
        self.inner.lock().summary.clone()
    }

    fn default_path(&self) -> PathBuf {
        self.progress_dir.join(format!("{}.json", self.inner.lock().summary.id))
    }

    /// Serialize the summary to `path` (default `<progressDir>/<id>.json`),
    /// writing to a temp file and renaming for atomicity.
    pub fn save(&self, path: Option<&Path>) -> Result<()> {
        let target = path.map(Path::to_path_buf).unwrap_or_else(|| self.default_path());
        let summary = self.inner.lock().summary.clone();
        write_atomic(&target, &summary)
    }

    /// Reconstruct a tracker's summary from a persisted file.
    pub fn load(path: &Path) -> Result<ProgressSummary> {
        let bytes = std::fs::read(path).map_err(|e| OrchestratorError::Persist {
            path: path.to_path_buf(),
            source: e,
        })?;
        serde_json::from_slice(&bytes).map_err(|e| OrchestratorError::Parse {
            path: path.to_path_buf(),
            source: e,
        })
    }

    /// Enumerate durable summaries under `progress_dir`.
    pub fn list_progress_files(progress_dir: &Path) -> Result<Vec<PathBuf>> {
        if !progress_dir.exists() {
            return Ok(Vec::new());
        }
        let mut files: Vec<PathBuf> = std::fs::read_dir(progress_dir)
            .map_err(|e| OrchestratorError::Persist {
                path: progress_dir.to_path_buf(),
                source: e,
            })?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|p| p.extension().is_some_and(|ext| ext == "json"))
            .collect();
        files.sort();
        Ok(files)
    }

    /// Stop the auto-save timer and persist one last time (cleanup).
    pub fn cleanup(&self) -> Result<()> {
        if let Some(handle) = self.inner.lock().auto_save_handle.take() {
            handle.abort();
        }
        self.save(None)
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

    fn tasks(names: &[&str]) -> BTreeMap<String, Task> {
        names
            .iter()
            .map(|n| (n.to_string(), Task::new(*n, format!("https://example.com/{n}"), "example.com")))
            .collect()
    }

    #[test]
    fn update_progress_tracks_counters_and_completion() {
        let tracker = ProgressTracker::new(
            "/tmp",
            "batch-test".into(),
            None,
            None,
            None,
            &[],
            tasks(&["a", "b"]),
            Arc::new(NoOpObserver),
        );

        tracker.update_progress("a", TaskStatus::Running, None);
        let summary = tracker.summary();
        assert_eq!(summary.running, 1);
        assert_eq!(summary.pending, 1);

        tracker.update_progress("a", TaskStatus::Completed, None);
        tracker.update_progress("b", TaskStatus::Running, None);
        tracker.update_progress("b", TaskStatus::Completed, None);

        let summary = tracker.summary();
        assert_eq!(summary.completed, 2);
        assert_eq!(summary.pending, 0);
        assert_eq!(summary.running, 0);
        assert!((summary.percentage - 100.0).abs() < f64::EPSILON);
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = tempfile::tempdir().expect("tempdir");
        let tracker = ProgressTracker::new(
            dir.path(),
            "batch-roundtrip".into(),
            Some("income".into()),
            Some("us".into()),
            None,
            &[],
            tasks(&["a"]),
            Arc::new(NoOpObserver),
        );
        tracker.update_progress("a", TaskStatus::Running, None);
        tracker.save(None).expect("save");

        let path = dir.path().join("batch-roundtrip.json");
        let loaded = ProgressTracker::load(&path).expect("load");
        assert_eq!(loaded.id, "batch-roundtrip");
        assert_eq!(loaded.running, 1);
    }

    #[test]
    fn retryable_configs_respects_attempt_cap() {
        let tracker = ProgressTracker::new(
            "/tmp",
            "batch-retry".into(),
            None,
            None,
            None,
            &[],
            tasks(&["x"]),
            Arc::new(NoOpObserver),
        );
        for _ in 0..3 {
            tracker.update_progress("x", TaskStatus::Running, None);
            tracker.update_progress("x", TaskStatus::Failed, Some("boom"));
        }
        assert!(tracker.retryable_configs().is_empty());
    }
}
