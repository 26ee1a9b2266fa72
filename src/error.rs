//! Crate-wide structured error type.
//!
//! Matchable errors live here (`thiserror`); the pipeline/CLI boundary
//! widens them into `anyhow::Result` once there is nothing left to match on.

use std::path::PathBuf;

/// Errors surfaced by the batch execution engine's components.
#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    /// A configuration descriptor could not be read or parsed.
    #[error("failed to load config '{name}': {source}")]
    ConfigLoad {
        name: String,
        #[source]
        source: std::io::Error,
    },

    /// A configuration descriptor's JSON did not match the expected shape.
    #[error("malformed config '{name}': {reason}")]
    ConfigMalformed { name: String, reason: String },

    /// A durable JSON document (progress summary, retry queue) failed to parse.
    #[error("failed to parse {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// Persisting a durable document failed.
    #[error("failed to persist {}: {source}", path.display())]
    Persist {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A batch was already running on this manager.
    #[error("a batch is already running")]
    BatchAlreadyRunning,

    /// No progress summary exists under the given id.
    #[error("no progress file found for id '{0}'")]
    ProgressNotFound(String),

    /// An abort was manually raised; the pipeline must exit non-zero.
    #[error("aborted: {0}")]
    Aborted(String),
}

pub type Result<T> = std::result::Result<T, OrchestratorError>;
