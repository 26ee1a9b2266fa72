//! No-op default implementations of the external capability traits.
//!
//! The actual browser automation, artifact export, and backend API client
//! are out of scope for this crate and must be supplied by the embedding
//! application. These defaults let the binary run end to end
//! — `stats`, `clean`, `retry-status`, `clear-retries` work fully without
//! any of them; `run`/`retry` will simply report every task as failed with
//! a descriptive error until a real `Crawler` is wired in.

use crate::external::{BackendImporter, ConfigGenerator, CrawlOutcome, Crawler, Exporter, ImportOutcome};
use async_trait::async_trait;
use serde_json::Value;
use std::path::PathBuf;

pub struct NoopCrawler;

#[async_trait]
impl Crawler for NoopCrawler {
    async fn run(&self, config_name: &str) -> CrawlOutcome {
        CrawlOutcome::failed(format!("no crawler configured for '{config_name}'"))
    }
}

pub struct NoopExporter;

#[async_trait]
impl Exporter for NoopExporter {
    async fn export(&self, _artifact: &Value, _format: &str, filename: &str, _config_name: &str) -> anyhow::Result<PathBuf> {
        Err(anyhow::anyhow!("no exporter configured for '{filename}'"))
    }
}

pub struct NoopBackendImporter;

#[async_trait]
impl BackendImporter for NoopBackendImporter {
    async fn import_symbols(&self, _records: &[Value]) -> anyhow::Result<ImportOutcome> {
        Ok(ImportOutcome::default())
    }

    async fn import_fundamentals(&self, _records: &[Value]) -> anyhow::Result<ImportOutcome> {
        Ok(ImportOutcome::default())
    }

    async fn sync_labels(&self, _records: &[Value]) -> anyhow::Result<ImportOutcome> {
        Ok(ImportOutcome::default())
    }

    async fn statistics(&self) -> anyhow::Result<Value> {
        Ok(Value::Null)
    }
}

pub struct NoopConfigGenerator;

#[async_trait]
impl ConfigGenerator for NoopConfigGenerator {
    async fn generate(&self, _region: &str) -> anyhow::Result<usize> {
        Ok(0)
    }
}
