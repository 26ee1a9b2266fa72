//! `OutputFileManager`: locates, groups, reads, and prunes
//! artifacts under a structured output directory tree.
//!
//! Directory traversal mirrors `search/indexer/discovery.rs`'s jwalk
//! idiom: filter at the read-dir level, then map surviving entries.

use chrono::{DateTime, Utc};
use jwalk::WalkDir;
use regex::Regex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

/// `yahoo-finance-<region>-<reportType>-<symbol>_<YYYYMMDD>.json`
fn filename_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^yahoo-finance-(tw|us|jp)-([a-z0-9-]+)-(.+)_(\d{8})\.json$").expect("static pattern")
    })
}

#[derive(Debug, Clone)]
pub struct ArtifactInfo {
    pub path: PathBuf,
    pub region: String,
    pub report_type: String,
    pub symbol: String,
    pub date: String,
    pub size_bytes: u64,
    pub modified: Option<DateTime<Utc>>,
}

impl ArtifactInfo {
    fn from_path(path: &Path) -> Option<Self> {
        let name = path.file_name()?.to_str()?;
        let caps = filename_pattern().captures(name)?;
        let metadata = std::fs::metadata(path).ok()?;
        Some(Self {
            path: path.to_path_buf(),
            region: caps[1].to_string(),
            report_type: caps[2].to_string(),
            symbol: caps[3].replace('_', "."),
            date: caps[4].to_string(),
            size_bytes: metadata.len(),
            modified: metadata.modified().ok().map(DateTime::<Utc>::from),
        })
    }
}

#[derive(Debug, Clone, Default)]
pub struct OutputStatistics {
    pub total_files: usize,
    pub total_size: u64,
    pub by_region: HashMap<String, usize>,
    pub by_report_type: HashMap<String, usize>,
    pub unique_symbols: usize,
}

pub struct OutputFileManager {
    output_root: PathBuf,
}

impl OutputFileManager {
    #[must_use]
    pub fn new(output_root: impl Into<PathBuf>) -> Self {
        Self {
            output_root: output_root.into(),
        }
    }

    fn walk_all(&self) -> Vec<ArtifactInfo> {
        if !self.output_root.exists() {
            return Vec::new();
        }
        WalkDir::new(&self.output_root)
            .skip_hidden(true)
            .process_read_dir(|_depth, _path, _state, entries| {
                entries.retain(|entry| match entry {
                    Ok(entry) => {
                        entry.file_type().is_dir()
                            || entry.file_name().to_str().is_some_and(|n| n.ends_with(".json"))
                    }
                    Err(_) => true,
                });
            })
            .into_iter()
            .filter_map(Result::ok)
            .filter(|e| e.file_type().is_file())
            .filter_map(|e| ArtifactInfo::from_path(&e.path()))
            .collect()
    }

    /// List artifacts, optionally filtered by symbol and/or region.
    #[must_use]
    pub fn list(&self, filter_symbol: Option<&str>, filter_region: Option<&str>) -> Vec<ArtifactInfo> {
        self.walk_all()
            .into_iter()
            .filter(|a| filter_symbol.is_none_or(|s| a.symbol.eq_ignore_ascii_case(s)))
            .filter(|a| filter_region.is_none_or(|r| a.region.eq_ignore_ascii_case(r)))
            .collect()
    }

    #[must_use]
    pub fn group_by_symbol(&self) -> HashMap<String, Vec<ArtifactInfo>> {
        let mut groups: HashMap<String, Vec<ArtifactInfo>> = HashMap::new();
        for artifact in self.walk_all() {
            groups.entry(artifact.symbol.clone()).or_default().push(artifact);
        }
        groups
    }

    /// The newest artifact per `(symbol, report_type)` pair.
    #[must_use]
    pub fn latest_per_symbol_and_type(&self) -> HashMap<(String, String), ArtifactInfo> {
        let mut latest: HashMap<(String, String), ArtifactInfo> = HashMap::new();
        for artifact in self.walk_all() {
            let key = (artifact.symbol.clone(), artifact.report_type.clone());
            match latest.get(&key) {
                Some(existing) if existing.modified >= artifact.modified => {}
                _ => {
                    latest.insert(key, artifact);
                }
            }
        }
        latest
    }

    /// Delete artifacts older than `days_to_keep`; returns the count removed.
    pub fn clean_old_files(&self, days_to_keep: i64) -> usize {
        let cutoff = Utc::now() - chrono::Duration::days(days_to_keep);
        let mut removed = 0;
        for artifact in self.walk_all() {
            if artifact.modified.is_some_and(|m| m < cutoff) && std::fs::remove_file(&artifact.path).is_ok() {
                removed += 1;
            }
        }
        removed
    }

    #[must_use]
    pub fn statistics(&self) -> OutputStatistics {
        let artifacts = self.walk_all();
        let mut stats = OutputStatistics {
            total_files: artifacts.len(),
            ..Default::default()
        };
        let mut symbols = std::collections::HashSet::new();
        for artifact in &artifacts {
            stats.total_size += artifact.size_bytes;
            *stats.by_region.entry(artifact.region.clone()).or_insert(0) += 1;
            *stats.by_report_type.entry(artifact.report_type.clone()).or_insert(0) += 1;
            symbols.insert(artifact.symbol.clone());
        }
        stats.unique_symbols = symbols.len();
        stats
    }

    #[must_use]
    pub fn has_data_for_symbol(&self, symbol: &str, region: &str) -> bool {
        !self.list(Some(symbol), Some(region)).is_empty()
    }
}
