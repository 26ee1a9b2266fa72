//! Enumerates configuration descriptors from a config root directory tree.
//!
//! Traversal follows the same bulk file-discovery idiom as
//! `search/indexer/discovery.rs`: `jwalk` for a parallel walk, with
//! directories filtered out at the read-dir level rather than post-hoc.

use crate::config::types::ConfigDescriptor;
use crate::error::{OrchestratorError, Result};
use jwalk::WalkDir;
use std::path::Path;

/// Filters applied when enumerating configs from the root (step 2).
#[derive(Debug, Clone, Default)]
pub struct ConfigFilter {
    pub category: Option<String>,
    pub market: Option<String>,
    pub r#type: Option<String>,
    pub start_from: Option<usize>,
    pub limit: Option<usize>,
    /// Restrict enumeration to exactly these config names, e.g. a targeted
    /// retry pass over the configs currently pending in the retry queue.
    pub names: Option<std::collections::HashSet<String>>,
}

/// Loads and enumerates `ConfigDescriptor`s from a config root.
pub struct ConfigLoader {
    root: std::path::PathBuf,
}

impl ConfigLoader {
    #[must_use]
    pub fn new(root: impl Into<std::path::PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Load a single descriptor by name (file stem relative to the root).
    pub fn load_one(&self, name: &str) -> Result<ConfigDescriptor> {
        let path = self.root.join(format!("{name}.json"));
        self.load_path(&path, name)
    }

    fn load_path(&self, path: &Path, name: &str) -> Result<ConfigDescriptor> {
        let bytes = std::fs::read(path).map_err(|e| OrchestratorError::ConfigLoad {
            name: name.to_string(),
            source: e,
        })?;
        let mut descriptor: ConfigDescriptor =
            serde_json::from_slice(&bytes).map_err(|e| OrchestratorError::ConfigMalformed {
                name: name.to_string(),
                reason: e.to_string(),
            })?;
        descriptor.name = name.to_string();
        Ok(descriptor)
    }

    /// Enumerate every config under the root, excluding `templates/` and
    /// `active/*`, applying `filter`, and slicing deterministically over
    /// the sorted result (step 2).
    pub fn enumerate(&self, filter: &ConfigFilter) -> Result<Vec<ConfigDescriptor>> {
        if !self.root.exists() {
            return Ok(Vec::new());
        }

        let root = self.root.clone();
        let mut names: Vec<String> = WalkDir::new(&root)
            .skip_hidden(true)
            .process_read_dir(|_depth, _path, _state, entries| {
                entries.retain(|entry| match entry {
                    Ok(entry) => {
                        if entry.file_type().is_dir() {
                            !matches!(entry.file_name().to_str(), Some("templates") | Some("active"))
                        } else {
                            entry.file_name().to_str().is_some_and(|n| n.ends_with(".json"))
                        }
                    }
                    Err(_) => true,
                });
            })
            .into_iter()
            .filter_map(|entry| {
                let entry = entry.ok()?;
                if !entry.file_type().is_file() {
                    return None;
                }
                let relative = entry.path().strip_prefix(&root).ok()?.to_path_buf();
                let relative = relative.with_extension("");
                relative.to_str().map(str::to_string)
            })
            .collect();
        names.sort();
        names.dedup();

        let mut descriptors = Vec::with_capacity(names.len());
        for name in &names {
            let descriptor = self.load_path(&self.root.join(format!("{name}.json")), name)?;
            if !matches_filter(&descriptor, filter) {
                continue;
            }
            descriptors.push(descriptor);
        }
        descriptors.sort_by(|a, b| a.name.cmp(&b.name));

        let start = filter.start_from.unwrap_or(0).min(descriptors.len());
        let mut sliced = descriptors.split_off(start);
        if let Some(limit) = filter.limit {
            sliced.truncate(limit);
        }
        Ok(sliced)
    }
}

fn matches_filter(descriptor: &ConfigDescriptor, filter: &ConfigFilter) -> bool {
    if let Some(names) = &filter.names
        && !names.contains(&descriptor.name)
    {
        return false;
    }
    if let Some(category) = &filter.category
        && descriptor.category.as_deref() != Some(category.as_str())
    {
        return false;
    }
    if let Some(market) = &filter.market
        && descriptor.market.as_deref() != Some(market.as_str())
    {
        return false;
    }
    if let Some(r#type) = &filter.r#type
        && descriptor.r#type.as_deref() != Some(r#type.as_str())
    {
        return false;
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_config(dir: &Path, relative: &str, json: &str) {
        let path = dir.join(relative);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("create dirs");
        }
        std::fs::write(path, json).expect("write config");
    }

    #[test]
    fn enumerate_excludes_templates_and_active() {
        let dir = tempfile::tempdir().expect("tempdir");
        write_config(dir.path(), "income-a.json", r#"{"url": "https://example.com/a"}"#);
        write_config(dir.path(), "templates/skeleton.json", r#"{"url": "https://example.com/template"}"#);
        write_config(dir.path(), "active/in-flight.json", r#"{"url": "https://example.com/active"}"#);

        let loader = ConfigLoader::new(dir.path());
        let configs = loader.enumerate(&ConfigFilter::default()).expect("enumerate");
        assert_eq!(configs.len(), 1);
        assert_eq!(configs[0].name, "income-a");
    }

    #[test]
    fn enumerate_applies_filter_and_slicing() {
        let dir = tempfile::tempdir().expect("tempdir");
        for (i, market) in ["tw", "us", "tw", "us"].iter().enumerate() {
            write_config(
                dir.path(),
                &format!("cfg-{i}.json"),
                &format!(r#"{{"url": "https://example.com/{i}", "market": "{market}"}}"#),
            );
        }

        let loader = ConfigLoader::new(dir.path());
        let filter = ConfigFilter {
            market: Some("tw".to_string()),
            ..Default::default()
        };
        let configs = loader.enumerate(&filter).expect("enumerate");
        assert_eq!(configs.len(), 2);
        assert_eq!(configs[0].name, "cfg-0");
        assert_eq!(configs[1].name, "cfg-2");
    }

    #[test]
    fn missing_root_enumerates_empty() {
        let loader = ConfigLoader::new("/nonexistent/path/for/statement-crawler-tests");
        let configs = loader.enumerate(&ConfigFilter::default()).expect("enumerate");
        assert!(configs.is_empty());
    }
}
