//! Configuration descriptor types.
//!
//! A `ConfigDescriptor` is the user-declared recipe for one crawl target:
//! a URL, optional variable bindings, and an export spec. The core reads
//! only `url` and `export` — selectors and transforms are the
//! `Crawler`'s concern, out of scope here.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Export configuration declared by a config descriptor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportSpec {
    pub filename: String,
    #[serde(default)]
    pub formats: Vec<String>,
    #[serde(default, rename = "reportType")]
    pub report_type: Option<String>,
}

/// A named crawl configuration as loaded from the config root.
///
/// `selectors` is carried opaquely (`serde_json::Value`) since defining the
/// selector/transform language is explicitly out of scope; the core never
/// inspects it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigDescriptor {
    #[serde(skip)]
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub variables: HashMap<String, String>,
    #[serde(default)]
    pub selectors: serde_json::Value,
    pub export: Option<ExportSpec>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub market: Option<String>,
    #[serde(default)]
    pub r#type: Option<String>,
}

impl ConfigDescriptor {
    /// Lowercased host of `url`, or `"unknown"` if it does not parse.
    #[must_use]
    pub fn domain(&self) -> String {
        url::Url::parse(&self.url)
            .ok()
            .and_then(|u| u.host_str().map(str::to_lowercase))
            .unwrap_or_else(|| "unknown".to_string())
    }
}
