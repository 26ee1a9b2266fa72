//! Capability interfaces for collaborators this crate only borrows.
//!
//! The core owns no implementation of any of these — just trait objects —
//! so dry-run test doubles can stand in during tests without touching a
//! real browser, filesystem exporter, or backend HTTP API.

use async_trait::async_trait;
use serde_json::Value;

/// Result of one crawl attempt, as reported by the external `Crawler`.
#[derive(Debug, Clone)]
pub struct CrawlOutcome {
    pub success: bool,
    pub error: Option<String>,
    pub artifact: Option<Value>,
}

impl CrawlOutcome {
    #[must_use]
    pub fn ok(artifact: Option<Value>) -> Self {
        Self {
            success: true,
            error: None,
            artifact,
        }
    }

    #[must_use]
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            artifact: None,
        }
    }
}

/// Scrapes a single configuration. Out of scope for this crate: the actual
/// headless-browser automation lives behind this trait.
#[async_trait]
pub trait Crawler: Send + Sync {
    async fn run(&self, config_name: &str) -> CrawlOutcome;
}

/// Writes a crawl result to disk in one of the configured export formats.
#[async_trait]
pub trait Exporter: Send + Sync {
    async fn export(
        &self,
        artifact: &Value,
        format: &str,
        filename: &str,
        config_name: &str,
    ) -> anyhow::Result<std::path::PathBuf>;
}

/// Bulk-import client for the downstream backend.
#[async_trait]
pub trait BackendImporter: Send + Sync {
    async fn import_symbols(&self, records: &[Value]) -> anyhow::Result<ImportOutcome>;
    async fn import_fundamentals(&self, records: &[Value]) -> anyhow::Result<ImportOutcome>;
    async fn sync_labels(&self, records: &[Value]) -> anyhow::Result<ImportOutcome>;
    async fn statistics(&self) -> anyhow::Result<Value>;
}

#[derive(Debug, Clone, Default)]
pub struct ImportOutcome {
    pub success: bool,
    pub errors: Vec<String>,
}

/// Runs the per-region configuration generator scripts (pipeline stage 2).
/// Out of scope: the generator implementation itself, only its invocation
/// and stdout-derived counts are the core's concern.
#[async_trait]
pub trait ConfigGenerator: Send + Sync {
    async fn generate(&self, region: &str) -> anyhow::Result<usize>;
}
