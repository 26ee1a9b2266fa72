//! `Task`: one execution of one configuration within a batch.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
}

impl TaskStatus {
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Skipped)
    }
}

/// One task, one-to-one with a configuration selected into a batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub config_name: String,
    pub status: TaskStatus,
    #[serde(default)]
    pub attempts: u32,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub url: String,
    pub domain: String,
}

impl Task {
    #[must_use]
    pub fn new(config_name: impl Into<String>, url: impl Into<String>, domain: impl Into<String>) -> Self {
        Self {
            config_name: config_name.into(),
            status: TaskStatus::Pending,
            attempts: 0,
            started_at: None,
            ended_at: None,
            last_error: None,
            url: url.into(),
            domain: domain.into(),
        }
    }

    /// Reset to `Pending`, clearing `lastError`/`endedAt` (`resetConfig`).
    pub fn reset(&mut self) {
        self.status = TaskStatus::Pending;
        self.last_error = None;
        self.ended_at = None;
    }

    #[must_use]
    pub fn is_retryable(&self, max_attempts: u32) -> bool {
        self.status == TaskStatus::Failed && self.attempts < max_attempts
    }
}
