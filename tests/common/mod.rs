//! Shared test doubles for the batch execution engine's integration tests.

use async_trait::async_trait;
use serde_json::{json, Value};
use statement_crawler::external::{CrawlOutcome, Crawler, Exporter};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;

/// A `Crawler` whose outcome per config name is scripted in advance: each
/// call to `run` pops the next queued outcome (or repeats the last one once
/// the queue is drained).
pub struct ScriptedCrawler {
    scripts: Mutex<HashMap<String, Vec<CrawlOutcome>>>,
}

impl ScriptedCrawler {
    #[must_use]
    pub fn new() -> Self {
        Self { scripts: Mutex::new(HashMap::new()) }
    }

    #[must_use]
    pub fn with_script(self, config_name: impl Into<String>, outcomes: Vec<CrawlOutcome>) -> Self {
        self.scripts.lock().unwrap().insert(config_name.into(), outcomes);
        self
    }
}

#[async_trait]
impl Crawler for ScriptedCrawler {
    async fn run(&self, config_name: &str) -> CrawlOutcome {
        let mut scripts = self.scripts.lock().unwrap();
        match scripts.get_mut(config_name) {
            Some(outcomes) if outcomes.len() > 1 => outcomes.remove(0),
            Some(outcomes) => outcomes.first().cloned().unwrap_or_else(|| CrawlOutcome::ok(Some(json!({})))),
            None => CrawlOutcome::ok(Some(json!({ "results": [{ "data": { "simpleEPSData": [1] } }] }))),
        }
    }
}

/// An `Exporter` that writes nothing and just echoes back a synthetic path.
pub struct NoopTestExporter;

#[async_trait]
impl Exporter for NoopTestExporter {
    async fn export(&self, _artifact: &Value, _format: &str, filename: &str, _config_name: &str) -> anyhow::Result<PathBuf> {
        Ok(PathBuf::from(filename))
    }
}

pub fn write_config(dir: &std::path::Path, name: &str, url: &str) {
    let path = dir.join(format!("{name}.json"));
    std::fs::write(path, json!({ "url": url }).to_string()).expect("write config");
}
