//! `PipelineOrchestrator`: the top-level sequencer invoked by the
//! CLI. Owns the `RetryQueue`; delegates each crawl pass to a
//! `BatchManager`.

use crate::batch::{
    default_observer, BatchManager, BatchOptions, OutputValidator, RetryQueue, RetryReason, ValidationOutcome,
};
use crate::config::{ConfigFilter, ConfigLoader};
use crate::error::Result;
use crate::external::{BackendImporter, ConfigGenerator, Crawler, Exporter};
use crate::output_files::{OutputFileManager, OutputStatistics};
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;

const SYMBOL_BATCH_SIZE: usize = 30;
const FUNDAMENTAL_BATCH_SIZE: usize = 50;
const LABEL_BATCH_SIZE: usize = 100;

#[derive(Debug, Clone, Default)]
pub struct PipelineOptions {
    pub skip_config_generation: bool,
    pub skip_crawling: bool,
    pub skip_aggregation: bool,
    pub skip_symbol_import: bool,
    pub skip_fundamental_import: bool,
    pub skip_label_sync: bool,
    pub retry_only: bool,
    pub clear_retries: bool,
    pub max_retries: u32,
    pub regions: Vec<String>,
    pub filter: ConfigFilter,
}

#[derive(Debug, Clone, Default)]
pub struct PipelineResult {
    pub configs_generated: usize,
    pub crawled_completed: usize,
    pub crawled_failed: usize,
    pub crawled_skipped: usize,
    pub retried: usize,
    pub aggregated_records: usize,
    pub symbols_imported: usize,
    pub fundamentals_imported: usize,
    pub labels_synced: usize,
    pub error_tail: Vec<String>,
}

pub struct PipelineOrchestrator {
    config_root: PathBuf,
    output_root: PathBuf,
    progress_dir: PathBuf,
    retry_queue: Arc<RetryQueue>,
    crawler: Arc<dyn Crawler>,
    exporter: Option<Arc<dyn Exporter>>,
    backend_importer: Option<Arc<dyn BackendImporter>>,
    config_generator: Option<Arc<dyn ConfigGenerator>>,
}

impl PipelineOrchestrator {
    #[must_use]
    pub fn new(
        config_root: impl Into<PathBuf>,
        output_root: impl Into<PathBuf>,
        progress_dir: impl Into<PathBuf>,
        retry_queue: Arc<RetryQueue>,
        crawler: Arc<dyn Crawler>,
        exporter: Option<Arc<dyn Exporter>>,
        backend_importer: Option<Arc<dyn BackendImporter>>,
        config_generator: Option<Arc<dyn ConfigGenerator>>,
    ) -> Self {
        Self {
            config_root: config_root.into(),
            output_root: output_root.into(),
            progress_dir: progress_dir.into(),
            retry_queue,
            crawler,
            exporter,
            backend_importer,
            config_generator,
        }
    }

    /// Runs the full sequence, or (in `retryOnly` mode) only stage 5.
    pub async fn run(&self, options: &PipelineOptions) -> Result<PipelineResult> {
        let mut result = PipelineResult::default();

        if options.retry_only {
            let retried = self.retry_pass(&mut result).await?;
            result.retried = retried;
            return Ok(result);
        }

        if options.clear_retries {
            self.retry_queue.clear_all()?;
        }

        if !options.skip_config_generation {
            result.configs_generated = self.generate_configs(&options.regions).await;
        }

        if !options.skip_crawling {
            let batch_result = self.crawl_once(&options.filter).await?;
            result.crawled_completed = batch_result.completed;
            result.crawled_failed = batch_result.failed;
            result.crawled_skipped = batch_result.skipped;
            result.error_tail = batch_result.error_tail.clone();

            self.validation_sweep(&options.filter);
        }

        result.retried = self.retry_pass(&mut result).await?;

        if !options.skip_aggregation {
            result.aggregated_records = self.aggregate().len();
        }

        if let Some(importer) = &self.backend_importer {
            let records = self.aggregate();
            if !options.skip_symbol_import {
                result.symbols_imported = self.import_in_batches(importer.as_ref(), &records, SYMBOL_BATCH_SIZE, ImportKind::Symbol).await;
            }
            if !options.skip_fundamental_import {
                result.fundamentals_imported =
                    self.import_in_batches(importer.as_ref(), &records, FUNDAMENTAL_BATCH_SIZE, ImportKind::Fundamental).await;
            }
            if !options.skip_label_sync {
                result.labels_synced = self.import_in_batches(importer.as_ref(), &records, LABEL_BATCH_SIZE, ImportKind::Label).await;
            }
        }

        Ok(result)
    }

    async fn generate_configs(&self, regions: &[String]) -> usize {
        let Some(generator) = &self.config_generator else {
            return 0;
        };
        let mut total = 0;
        for region in regions {
            match generator.generate(region).await {
                Ok(count) => total += count,
                Err(e) => log::warn!("config generation failed for region {region}: {e}"),
            }
        }
        total
    }

    async fn crawl_once(&self, filter: &ConfigFilter) -> Result<crate::batch::BatchResult> {
        let error_log_path = self.output_root.join("errors.log");
        let manager = BatchManager::new(
            &self.config_root,
            &self.output_root,
            4,
            2000,
            error_log_path,
            true,
            Arc::clone(&self.crawler),
            self.exporter.clone(),
        );
        let options = BatchOptions {
            filter: filter.clone(),
            ..Default::default()
        };
        manager.start_batch(&options, &self.progress_dir, default_observer()).await
    }

    /// Stage 4: validate every produced artifact and route failures into
    /// the retry queue.
    fn validation_sweep(&self, filter: &ConfigFilter) {
        let loader = ConfigLoader::new(&self.config_root);
        let validator = OutputValidator::new(&self.output_root);
        let Ok(descriptors) = loader.enumerate(filter) else {
            return;
        };

        for descriptor in descriptors {
            let Some(export) = &descriptor.export else { continue };
            let region = descriptor.market.clone().unwrap_or_else(|| "unknown".to_string());
            let report_type = export.report_type.clone().unwrap_or_else(|| "generic".to_string());

            match validator.validate_config_output(&export.filename) {
                ValidationOutcome::Invalid(reason) => {
                    let retry_reason = match reason {
                        crate::batch::InvalidReason::EmptyData => RetryReason::EmptyData,
                        crate::batch::InvalidReason::FileNotFound => RetryReason::ExecutionFailed,
                        _ => RetryReason::ExecutionFailed,
                    };
                    if let Err(e) = self.retry_queue.add(&descriptor.name, &descriptor.name, &report_type, &region, retry_reason) {
                        log::warn!("failed to enqueue retry for {}: {e}", descriptor.name);
                    }
                }
                ValidationOutcome::Valid => {
                    if let Err(e) = self.retry_queue.remove(&descriptor.name, &descriptor.name, &report_type) {
                        log::warn!("failed to clear retry entry for {}: {e}", descriptor.name);
                    }
                }
            }
        }
    }

    /// Stage 5: re-invoke the crawl restricted to exactly the configs
    /// currently pending retry.
    async fn retry_pass(&self, result: &mut PipelineResult) -> Result<usize> {
        let pending = self.retry_queue.pending();
        if pending.is_empty() {
            return Ok(0);
        }

        let names = pending.iter().map(|r| r.config_name.clone()).collect();
        let filter = ConfigFilter {
            names: Some(names),
            ..Default::default()
        };
        let batch_result = self.crawl_once(&filter).await?;
        result.error_tail.extend(batch_result.error_tail);
        Ok(pending.len())
    }

    /// Stage 6: walk the output tree and read every artifact.
    fn aggregate(&self) -> Vec<Value> {
        let manager = OutputFileManager::new(&self.output_root);
        manager
            .list(None, None)
            .into_iter()
            .filter_map(|artifact| std::fs::read(&artifact.path).ok())
            .filter_map(|bytes| serde_json::from_slice::<Value>(&bytes).ok())
            .collect()
    }

    async fn import_in_batches(&self, importer: &dyn BackendImporter, records: &[Value], batch_size: usize, kind: ImportKind) -> usize {
        let mut imported = 0;
        for chunk in records.chunks(batch_size.max(1)) {
            let outcome = match kind {
                ImportKind::Symbol => importer.import_symbols(chunk).await,
                ImportKind::Fundamental => importer.import_fundamentals(chunk).await,
                ImportKind::Label => importer.sync_labels(chunk).await,
            };
            match outcome {
                Ok(outcome) if outcome.success => imported += chunk.len(),
                Ok(outcome) => log::warn!("{kind:?} import batch reported errors: {:?}", outcome.errors),
                Err(e) => log::warn!("{kind:?} import batch failed: {e}"),
            }
        }
        imported
    }

    /// `OutputFileManager.statistics()` composed with `RetryQueue.statistics()`
    /// and (best-effort) a remote backend statistics call.
    pub async fn statistics(&self) -> (OutputStatistics, crate::batch::RetryStatistics, Value) {
        let file_stats = OutputFileManager::new(&self.output_root).statistics();
        let retry_stats = self.retry_queue.statistics();
        let backend_stats = match &self.backend_importer {
            Some(importer) => importer.statistics().await.unwrap_or(Value::Null),
            None => Value::Null,
        };
        (file_stats, retry_stats, backend_stats)
    }
}

#[derive(Debug, Clone, Copy)]
enum ImportKind {
    Symbol,
    Fundamental,
    Label,
}
