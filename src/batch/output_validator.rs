//! Post-run quality gate: decides whether an artifact is truly
//! "done" or must re-enter the retry queue.
//!
//! The glob-to-regex conversion mirrors the crawl engine config builder's
//! `compile_glob_pattern` (`*` -> `.*`, fully anchored); directory
//! candidates are walked with `jwalk`, the same crate `search/indexer`
//! uses for bulk file discovery.

use jwalk::WalkDir;
use regex::Regex;
use serde_json::Value;
use std::path::{Path, PathBuf};

const KNOWN_REPORT_TYPES: &[&str] = &[
    "income-statement",
    "balance-sheet",
    "cash-flow-statement",
    "cashflow",
    "eps",
    "dividend",
    "performance",
    "history",
    "revenue",
    "financials",
];

const ALTERNATIVE_DATA_FIELDS: &[&str] = &[
    "simpleEPSData",
    "independentCashFlowData",
    "dividendData",
    "performanceData",
    "historyData",
    "revenueData",
    "financialsData",
    "cashFlowData",
    "balanceSheetData",
    "incomeStatementData",
];

const BASE_SUBDIRS: &[&str] = &["quarterly", "daily", "metadata"];
const MIN_SIZE_BYTES: u64 = 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvalidReason {
    FileNotFound,
    ParseError,
    ResultsNotArray,
    EmptyResults,
    NoDataField,
    EmptyData,
}

impl InvalidReason {
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::FileNotFound => "file_not_found",
            Self::ParseError => "parse_error",
            Self::ResultsNotArray => "results_not_array",
            Self::EmptyResults => "empty_results",
            Self::NoDataField => "no_data_field",
            Self::EmptyData => "empty_data",
        }
    }
}

#[derive(Debug, Clone)]
pub enum ValidationOutcome {
    Valid,
    Invalid(InvalidReason),
}

impl ValidationOutcome {
    #[must_use]
    pub const fn is_valid(&self) -> bool {
        matches!(self, Self::Valid)
    }
}

/// Compile a glob pattern (`*` wildcard only) into a fully anchored regex.
fn compile_glob_pattern(glob: &str) -> Regex {
    let mut pattern = String::from("^");
    for part in glob.split('*') {
        pattern.push_str(&regex::escape(part));
        pattern.push_str(".*");
    }
    // trailing ".*" added one time too many; trim it back off.
    pattern.truncate(pattern.len() - 2);
    pattern.push('$');
    Regex::new(&pattern).unwrap_or_else(|_| Regex::new("^$").expect("empty pattern always compiles"))
}

/// Extract report type from a filename by substring match.
#[must_use]
pub fn extract_report_type(filename: &str) -> &'static str {
    let lower = filename.to_lowercase();
    KNOWN_REPORT_TYPES
    .iter()
    .find(|ty| lower.contains(*ty))
    .copied()
    .unwrap_or("generic")
}

/// Turn a config's `export.filename` template into a glob: date suffixes
/// and `${...}` placeholders become `*`.
#[must_use]
pub fn template_to_glob(filename_template: &str) -> String {
    let date_re = Regex::new(r"\d{8}").expect("static pattern");
    let placeholder_re = Regex::new(r"\$\{[^}]*\}").expect("static pattern");
    let step1 = date_re.replace_all(filename_template, "*");
    placeholder_re.replace_all(&step1, "*").into_owned()
}

pub struct OutputValidator {
    output_root: PathBuf,
}

impl OutputValidator {
    #[must_use]
    pub fn new(output_root: impl Into<PathBuf>) -> Self {
        Self {
            output_root: output_root.into(),
        }
    }

    /// Validate the JSON artifact at `path` (structural + non-emptiness
    /// rules).
    pub fn validate(&self, path: &Path) -> ValidationOutcome {
        let Ok(bytes) = std::fs::read(path) else {
            return ValidationOutcome::Invalid(InvalidReason::FileNotFound);
        };
        let Ok(value) = serde_json::from_slice::<Value>(&bytes) else {
            return ValidationOutcome::Invalid(InvalidReason::ParseError);
        };

        let Some(results) = value.get("results").and_then(Value::as_array) else {
            return ValidationOutcome::Invalid(InvalidReason::ResultsNotArray);
        };
        if results.is_empty() {
            return ValidationOutcome::Invalid(InvalidReason::EmptyResults);
        }

        for result in results {
            let Some(data) = result.get("data").and_then(Value::as_object) else {
                continue;
            };

            if non_empty_array(data.get("data")) {
                return ValidationOutcome::Valid;
            }
            for field in ALTERNATIVE_DATA_FIELDS {
                if non_empty_array(data.get(*field)) {
                    return ValidationOutcome::Valid;
                }
            }
        }

        if results.iter().all(|r| r.get("data").and_then(Value::as_object).is_none()) {
            return ValidationOutcome::Invalid(InvalidReason::NoDataField);
        }
        ValidationOutcome::Invalid(InvalidReason::EmptyData)
    }

    /// Locate the newest matching artifact for `filename_template` across
    /// the known base directories plus the flat root.
    #[must_use]
    pub fn locate_artifact(&self, filename_template: &str) -> Option<PathBuf> {
        let glob = template_to_glob(filename_template);
        let pattern = compile_glob_pattern(&glob);

        let mut candidates: Vec<(PathBuf, std::time::SystemTime)> = Vec::new();
        let mut roots: Vec<PathBuf> = BASE_SUBDIRS.iter().map(|d| self.output_root.join(d)).collect();
        roots.push(self.output_root.clone());

        for root in roots {
            if !root.exists() {
                continue;
            }
            for entry in WalkDir::new(&root).skip_hidden(false).into_iter().filter_map(Result::ok) {
                if !entry.file_type().is_file() {
                    continue;
                }
                let Some(name) = entry.file_name().to_str() else {
                    continue;
                };
                if !pattern.is_match(name) {
                    continue;
                }
                if let Ok(metadata) = entry.metadata()
                && let Ok(modified) = metadata.modified()
                {
                    candidates.push((entry.path(), modified));
                }
            }
        }

        candidates.into_iter().max_by_key(|(_, modified)| *modified).map(|(path, _)| path)
    }

    /// `validateConfigOutput`: locate the artifact, then validate it.
    pub fn validate_config_output(&self, filename_template: &str) -> ValidationOutcome {
        match self.locate_artifact(filename_template) {
            Some(path) => self.validate(&path),
            None => ValidationOutcome::Invalid(InvalidReason::FileNotFound),
        }
    }

    /// Reject artifacts smaller than `min_size` (default 1 KiB).
    #[must_use]
    pub fn meets_minimum_size(path: &Path, min_size: Option<u64>) -> bool {
        std::fs::metadata(path).map(|m| m.len() >= min_size.unwrap_or(MIN_SIZE_BYTES)).unwrap_or(false)
    }

    #[must_use]
    pub fn validate_batch(&self, paths: &[PathBuf]) -> Vec<(PathBuf, ValidationOutcome)> {
        paths.iter().map(|p| (p.clone(), self.validate(p))).collect()
    }
}

fn non_empty_array(value: Option<&Value>) -> bool {
    value.and_then(Value::as_array).is_some_and(|arr| !arr.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn extract_report_type_matches_known_substring() {
        assert_eq!(extract_report_type("yahoo-finance-us-income-statement-AAPL_20260101.json"), "income-statement");
        assert_eq!(extract_report_type("whatever.json"), "generic");
    }

    #[test]
    fn template_to_glob_replaces_date_and_placeholder() {
        let glob = template_to_glob("aapl_${region}_20260101.json");
        assert_eq!(glob, "aapl_*_*.json");
    }

    #[test]
    fn validate_rejects_missing_file() {
        let validator = OutputValidator::new("/tmp/does-not-exist-statement-crawler");
        let outcome = validator.validate(Path::new("/tmp/does-not-exist-statement-crawler/nope.json"));
        assert_eq!(outcome_reason(&outcome), Some(InvalidReason::FileNotFound));
    }

    #[test]
    fn validate_rejects_empty_data() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("artifact.json");
        fs::write(&path, r#"{"results": [{"data": {"simpleEPSData": []}}]}"#).expect("write");

        let validator = OutputValidator::new(dir.path());
        let outcome = validator.validate(&path);
        assert_eq!(outcome_reason(&outcome), Some(InvalidReason::EmptyData));
    }

    #[test]
    fn validate_accepts_non_empty_primary_field() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("artifact.json");
        fs::write(&path, r#"{"results": [{"data": {"data": [1, 2, 3]}}]}"#).expect("write");

        let validator = OutputValidator::new(dir.path());
        assert!(validator.validate(&path).is_valid());
    }

    #[test]
    fn validate_accepts_non_empty_alternative_field() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("artifact.json");
        fs::write(&path, r#"{"results": [{"data": {"dividendData": [{"amount": 1}]}}]}"#).expect("write");

        let validator = OutputValidator::new(dir.path());
        assert!(validator.validate(&path).is_valid());
    }

    #[test]
    fn locate_artifact_picks_newest_match() {
        let dir = tempfile::tempdir().expect("tempdir");
        let quarterly = dir.path().join("quarterly");
        fs::create_dir_all(&quarterly).expect("mkdir");

        let older = quarterly.join("aapl_20250101.json");
        fs::write(&older, "{}").expect("write");
        std::thread::sleep(std::time::Duration::from_millis(20));
        let newer = quarterly.join("aapl_20260101.json");
        fs::write(&newer, "{}").expect("write");

        let validator = OutputValidator::new(dir.path());
        let found = validator.locate_artifact("aapl_20260101.json").expect("found a match");
        assert_eq!(found, newer);
    }

    fn outcome_reason(outcome: &ValidationOutcome) -> Option<InvalidReason> {
        match outcome {
            ValidationOutcome::Invalid(reason) => Some(reason.clone()),
            ValidationOutcome::Valid => None,
        }
    }
}
