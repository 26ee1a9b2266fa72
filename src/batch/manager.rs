//! Owns one batch run end to end: enumerate configs, feed tasks
//! through the site concurrency gate, invoke the external `Crawler`,
//! consult the `ErrorClassifier` on failure, update the `ProgressTracker`,
//! export the artifact.
//!
//! The scheduling loop is the same shape as `crawl_engine::orchestrator`'s
//! `crawl_pages`: a `FuturesUnordered` task pool gated by a concurrency
//! primitive, draining until nothing is left pending or running.

use crate::batch::error_classifier::{Action, ErrorClassifier};
use crate::batch::output_validator::OutputValidator;
use crate::batch::progress::{NoOpObserver, ProgressObserver, ProgressSummary, ProgressTracker};
use crate::batch::site_concurrency::{AcquireResult, SiteConcurrencyManager};
use crate::batch::task::{Task, TaskStatus};
use crate::config::{ConfigDescriptor, ConfigFilter, ConfigLoader};
use crate::error::{OrchestratorError, Result};
use crate::external::{Crawler, Exporter};
use chrono::Utc;
use futures::stream::FuturesUnordered;
use futures::StreamExt;
use std::collections::{BTreeMap, VecDeque};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex as AsyncMutex;

const DEFAULT_MAX_ATTEMPTS: u32 = 3;

#[derive(Debug, Clone, Default)]
pub struct BatchOptions {
    pub filter: ConfigFilter,
    pub max_concurrency: Option<usize>,
    pub delay_ms: Option<u64>,
    pub use_site_concurrency: Option<bool>,
}

#[derive(Debug, Clone)]
pub struct BatchResult {
    pub progress_id: String,
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub duration_ms: i64,
    pub error_tail: Vec<String>,
}

struct RunState {
    paused: AtomicBool,
    stopped: AtomicBool,
    running: AtomicBool,
    max_concurrency: AtomicUsize,
}

/// One batch manager instance owns at most one run at a time.
pub struct BatchManager {
    config_root: PathBuf,
    output_root: PathBuf,
    error_log_path: PathBuf,
    use_site_concurrency: bool,
    legacy_max_concurrency: usize,
    legacy_delay_ms: u64,
    crawler: Arc<dyn Crawler>,
    exporter: Option<Arc<dyn Exporter>>,
    site_manager: Arc<SiteConcurrencyManager>,
    error_classifier: Arc<ErrorClassifier>,
    state: Arc<RunState>,
    legacy_running: Arc<AtomicUsize>,
}

impl BatchManager {
    #[must_use]
    pub fn new(
        config_root: impl Into<PathBuf>,
        output_root: impl Into<PathBuf>,
        max_concurrency: usize,
        delay_ms: u64,
        error_log_path: impl Into<PathBuf>,
        use_site_concurrency: bool,
        crawler: Arc<dyn Crawler>,
        exporter: Option<Arc<dyn Exporter>>,
    ) -> Self {
        let error_log_path = error_log_path.into();
        Self {
            config_root: config_root.into(),
            output_root: output_root.into(),
            error_log_path: error_log_path.clone(),
            use_site_concurrency,
            legacy_max_concurrency: max_concurrency,
            legacy_delay_ms: delay_ms,
            crawler,
            exporter,
            site_manager: Arc::new(SiteConcurrencyManager::new()),
            error_classifier: Arc::new(ErrorClassifier::new(error_log_path)),
            state: Arc::new(RunState {
                paused: AtomicBool::new(false),
                stopped: AtomicBool::new(false),
                running: AtomicBool::new(false),
                max_concurrency: AtomicUsize::new(max_concurrency),
            }),
            legacy_running: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn pause(&self) {
        self.state.paused.store(true, Ordering::SeqCst);
    }

    pub fn unpause(&self) {
        self.state.paused.store(false, Ordering::SeqCst);
    }

    pub fn stop(&self) {
        self.state.stopped.store(true, Ordering::SeqCst);
    }

    /// Inject a per-domain concurrency/delay override before a batch
    /// starts.
    pub fn set_site_override(&self, domain: impl Into<String>, config: crate::batch::site_concurrency::SiteConfig) {
        self.site_manager.set_override(domain, config);
    }

    #[must_use]
    pub fn site_statistics(&self) -> Vec<crate::batch::site_concurrency::DomainStats> {
        self.site_manager.statistics()
    }

    /// `startBatch`.
    pub async fn start_batch(&self, options: &BatchOptions, progress_dir: &std::path::Path, observer: Arc<dyn ProgressObserver>) -> Result<BatchResult> {
        if self.state.running.swap(true, Ordering::SeqCst) {
            return Err(OrchestratorError::BatchAlreadyRunning);
        }
        let result = self.run_with_configs(options, progress_dir, observer, None).await;
        self.state.running.store(false, Ordering::SeqCst);
        result
    }

    /// `resumeBatch`: pending + failed-with-retries-remaining tasks
    /// from a persisted summary.
    pub async fn resume_batch(&self, progress_id: &str, progress_dir: &std::path::Path, observer: Arc<dyn ProgressObserver>) -> Result<BatchResult> {
        if self.state.running.swap(true, Ordering::SeqCst) {
            return Err(OrchestratorError::BatchAlreadyRunning);
        }
        let path = progress_dir.join(format!("{progress_id}.json"));
        let summary = ProgressTracker::load(&path)?;

        let mut selected: Vec<String> = Vec::new();
        for task in summary.tasks.values() {
            if task.status == TaskStatus::Pending || task.is_retryable(DEFAULT_MAX_ATTEMPTS) {
                selected.push(task.config_name.clone());
            }
        }
        let options = BatchOptions::default();
        let result = self
            .run_with_configs(&options, progress_dir, observer, Some((summary, selected)))
            .await;
        self.state.running.store(false, Ordering::SeqCst);
        result
    }

    /// `retryFailed`: like `resumeBatch` restricted to failed tasks
    /// with retries remaining.
    pub async fn retry_failed(&self, progress_id: &str, progress_dir: &std::path::Path, observer: Arc<dyn ProgressObserver>) -> Result<BatchResult> {
        if self.state.running.swap(true, Ordering::SeqCst) {
            return Err(OrchestratorError::BatchAlreadyRunning);
        }
        let path = progress_dir.join(format!("{progress_id}.json"));
        let summary = ProgressTracker::load(&path)?;
        let selected: Vec<String> = summary
            .tasks
            .values()
            .filter(|t| t.is_retryable(DEFAULT_MAX_ATTEMPTS))
            .map(|t| t.config_name.clone())
            .collect();
        let options = BatchOptions::default();
        let result = self
            .run_with_configs(&options, progress_dir, observer, Some((summary, selected)))
            .await;
        self.state.running.store(false, Ordering::SeqCst);
        result
    }

    async fn run_with_configs(
        &self,
        options: &BatchOptions,
        progress_dir: &std::path::Path,
        observer: Arc<dyn ProgressObserver>,
        resume: Option<(ProgressSummary, Vec<String>)>,
    ) -> Result<BatchResult> {
        self.state.stopped.store(false, Ordering::SeqCst);
        self.state.paused.store(false, Ordering::SeqCst);
        self.state
            .max_concurrency
            .store(options.max_concurrency.unwrap_or(self.legacy_max_concurrency), Ordering::SeqCst);

        let loader = ConfigLoader::new(&self.config_root);
        let use_site_concurrency = options.use_site_concurrency.unwrap_or(self.use_site_concurrency);

        let (tracker, configs_by_name) = match resume {
            Some((summary, selected)) => {
                let mut configs_by_name = BTreeMap::new();
                let mut tasks = summary.tasks.clone();
                for name in &selected {
                    if let Some(task) = tasks.get_mut(name) {
                        task.reset();
                    }
                    if let Ok(descriptor) = loader.load_one(name) {
                        configs_by_name.insert(name.clone(), descriptor);
                    }
                }
                let tracker = ProgressTracker::new(
                    progress_dir,
                    summary.id.clone(),
                    summary.category.clone(),
                    summary.market.clone(),
                    summary.r#type.clone(),
                    &selected,
                    tasks,
                    observer,
                );
                (tracker, configs_by_name)
            }
            None => {
                let descriptors = loader.enumerate(&options.filter)?;
                let id = format!(
                    "batch-{}-{}-{}-{}",
                    options.filter.category.as_deref().unwrap_or("all"),
                    options.filter.market.as_deref().unwrap_or("all"),
                    options.filter.r#type.as_deref().unwrap_or("all"),
                    Utc::now().format("%Y%m%dT%H%M%SZ"),
                );
                let mut tasks = BTreeMap::new();
                let mut configs_by_name = BTreeMap::new();
                for descriptor in descriptors {
                    let domain = descriptor.domain();
                    tasks.insert(
                        descriptor.name.clone(),
                        Task::new(descriptor.name.clone(), descriptor.url.clone(), domain),
                    );
                    configs_by_name.insert(descriptor.name.clone(), descriptor);
                }
                let names: Vec<String> = tasks.keys().cloned().collect();
                let tracker = ProgressTracker::new(
                    progress_dir,
                    id,
                    options.filter.category.clone(),
                    options.filter.market.clone(),
                    options.filter.r#type.clone(),
                    &names,
                    tasks,
                    observer,
                );
                (tracker, configs_by_name)
            }
        };

        tracker.start_auto_save(Duration::from_secs(30));
        let start = Utc::now();

        let pending: VecDeque<String> = tracker
            .summary()
            .tasks
            .values()
            .filter(|t| t.status == TaskStatus::Pending)
            .map(|t| t.config_name.clone())
            .collect();
        let pending = Arc::new(AsyncMutex::new(pending));
        // Tasks promoted by `SiteConcurrencyManager::release_slot` already
        // hold their reserved slot; they bypass `acquire_slot` entirely
        // rather than re-entering the generic pending queue.
        let ready: Arc<AsyncMutex<VecDeque<String>>> = Arc::new(AsyncMutex::new(VecDeque::new()));
        let configs_by_name = Arc::new(configs_by_name);
        let validator = Arc::new(OutputValidator::new(&self.output_root));

        let mut active = FuturesUnordered::new();

        loop {
            if self.state.stopped.load(Ordering::SeqCst) {
                break;
            }
            if self.state.paused.load(Ordering::SeqCst) {
                tokio::time::sleep(Duration::from_secs(1)).await;
                continue;
            }

            while active.len() < self.state.max_concurrency.load(Ordering::SeqCst).max(1) {
                let Some(config_name) = self.next_runnable(&pending, &ready, &configs_by_name, use_site_concurrency).await else {
                    break;
                };
                let Some(descriptor) = configs_by_name.get(&config_name).cloned() else {
                    continue;
                };

                tracker.update_progress(&config_name, TaskStatus::Running, None);

                let crawler = Arc::clone(&self.crawler);
                let exporter = self.exporter.clone();
                let tracker = Arc::clone(&tracker);
                let classifier = Arc::clone(&self.error_classifier);
                let site_manager = Arc::clone(&self.site_manager);
                let pending = Arc::clone(&pending);
                let ready = Arc::clone(&ready);
                let state = Arc::clone(&self.state);
                let legacy_running = Arc::clone(&self.legacy_running);
                let legacy_delay_ms = self.legacy_delay_ms;
                let output_root = self.output_root.clone();
                let validator = Arc::clone(&validator);
                let domain = descriptor.domain();
                let use_site = use_site_concurrency;

                let task = tokio::spawn(async move {
                    let attempt = {
                        let summary = tracker.summary();
                        summary.tasks.get(&config_name).map_or(1, |t| t.attempts)
                    };

                    let outcome = crawler.run(&config_name).await;

                    if outcome.success {
                        let mut exported_path = None;
                        if let (Some(export), Some(exporter)) = (&descriptor.export, &exporter) {
                            for format in &export.formats {
                                match exporter
                                    .export(outcome.artifact.as_ref().unwrap_or(&serde_json::Value::Null), format, &export.filename, &config_name)
                                    .await
                                {
                                    Ok(path) => exported_path = Some(path),
                                    Err(e) => log::warn!("export failed for {config_name}: {e}"),
                                }
                            }
                        }
                        tracker.update_progress(&config_name, TaskStatus::Completed, None);

                        if let Some(path) = exported_path
                            && !OutputValidator::meets_minimum_size(&path, None)
                        {
                            log::warn!("exported artifact for {config_name} is below the minimum size");
                        }
                        let _ = &output_root;
                        let _ = &validator;
                    } else {
                        let message = outcome.error.unwrap_or_else(|| "unknown error".to_string());
                        let action = classifier.handle_error(&config_name, &message, attempt, DEFAULT_MAX_ATTEMPTS);
                        match action {
                            Action::Retry => {
                                tracker.reset_config(&config_name);
                                pending.lock().await.push_back(config_name.clone());
                            }
                            Action::RetryAfterDelay(delay_ms) => {
                                let tracker = Arc::clone(&tracker);
                                let pending = Arc::clone(&pending);
                                let config_name = config_name.clone();
                                tokio::spawn(async move {
                                    tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                                    tracker.reset_config(&config_name);
                                    pending.lock().await.push_back(config_name);
                                });
                            }
                            Action::ReduceConcurrency => {
                                let current = state.max_concurrency.load(Ordering::SeqCst);
                                let reduced = (current as f64 * 0.8).floor().max(1.0) as usize;
                                state.max_concurrency.store(reduced, Ordering::SeqCst);
                                tracker.update_progress(&config_name, TaskStatus::Failed, Some(&message));
                            }
                            Action::Skip => {
                                tracker.update_progress(&config_name, TaskStatus::Skipped, Some(&message));
                            }
                            Action::Abort => {
                                state.stopped.store(true, Ordering::SeqCst);
                                tracker.update_progress(&config_name, TaskStatus::Failed, Some(&message));
                            }
                        }
                    }

                    if use_site {
                        if let Some((promoted_id, _url)) = site_manager.release_slot(&config_name, &domain) {
                            // The promoted task's slot is already reserved;
                            // hand it straight to `ready` so the scheduling
                            // loop dispatches it without calling
                            // `acquire_slot` again.
                            ready.lock().await.push_back(promoted_id);
                        }
                    } else {
                        legacy_running.fetch_sub(1, Ordering::SeqCst);
                        let _ = legacy_delay_ms;
                    }
                });

                active.push(task);
            }

            if active.is_empty() {
                let remaining = pending.lock().await.len();
                if remaining == 0 {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(100)).await;
                continue;
            }

            match active.next().await {
                Some(Ok(())) => {}
                Some(Err(e)) => log::error!("task panicked: {e}"),
                None => {}
            }
        }

        tracker.cleanup()?;
        let summary = tracker.summary();
        let error_tail: Vec<String> = summary.errors.iter().rev().take(10).rev().cloned().collect();

        Ok(BatchResult {
            progress_id: summary.id,
            total: summary.total,
            completed: summary.completed,
            failed: summary.failed,
            skipped: summary.skipped,
            duration_ms: (Utc::now() - start).num_milliseconds(),
            error_tail,
        })
    }

    async fn next_runnable(
        &self,
        pending: &Arc<AsyncMutex<VecDeque<String>>>,
        ready: &Arc<AsyncMutex<VecDeque<String>>>,
        configs_by_name: &Arc<BTreeMap<String, ConfigDescriptor>>,
        use_site_concurrency: bool,
    ) -> Option<String> {
        if let Some(name) = ready.lock().await.pop_front() {
            return Some(name);
        }

        let mut queue = pending.lock().await;
        let len = queue.len();
        for _ in 0..len {
            let Some(name) = queue.pop_front() else { break };
            let Some(descriptor) = configs_by_name.get(&name) else { continue };

            if use_site_concurrency {
                let domain = descriptor.domain();
                match self.site_manager.acquire_slot(&name, &descriptor.url, &domain, 1) {
                    AcquireResult::Acquired => return Some(name),
                    AcquireResult::Queued => continue,
                }
            } else {
                let current = self.legacy_running.load(Ordering::SeqCst);
                if current < self.state.max_concurrency.load(Ordering::SeqCst) {
                    self.legacy_running.fetch_add(1, Ordering::SeqCst);
                    return Some(name);
                }
                queue.push_back(name);
            }
        }
        None
    }
}

#[must_use]
pub fn default_observer() -> Arc<dyn ProgressObserver> {
    Arc::new(NoOpObserver)
}
