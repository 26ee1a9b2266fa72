//! Resumable, fault-tolerant batch crawler orchestrator for financial
//! statement data: schedules crawl configs across sites, classifies and
//! retries failures, persists progress, validates artifacts, and feeds a
//! downstream importer. The actual browser automation, export encoding,
//! and backend API client are borrowed capabilities (see [`external`]).

pub mod batch;
pub mod cli;
pub mod config;
pub mod defaults;
pub mod error;
pub mod external;
pub mod output_files;
pub mod pipeline;

pub use batch::{
    Action, BatchManager, BatchOptions, BatchResult, ErrorClassifier, ErrorInfo, ErrorKind,
    InvalidReason, OutputValidator, ProgressObserver, ProgressSummary, ProgressTracker, RetryQueue,
    RetryReason, RetryRecord, RetryStatistics, SiteConcurrencyManager, SiteConfig, Task,
    TaskStatus, ValidationOutcome,
};
pub use config::{ConfigDescriptor, ConfigFilter, ConfigLoader, ExportSpec};
pub use error::{OrchestratorError, Result};
pub use external::{BackendImporter, ConfigGenerator, CrawlOutcome, Crawler, Exporter, ImportOutcome};
pub use output_files::{ArtifactInfo, OutputFileManager, OutputStatistics};
pub use pipeline::{PipelineOptions, PipelineOrchestrator, PipelineResult};
