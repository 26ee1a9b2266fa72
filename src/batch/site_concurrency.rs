//! Per-domain slot accounting, minimum inter-request delay, and a
//! priority/FIFO wait queue.
//!
//! Domain state lives behind a `DashMap` keyed by canonical domain, the
//! same lock-free-per-key shape as `DomainLimiter` and `CircuitBreaker` in
//! the crawl engine, generalized from a bare semaphore to the queue and
//! delay-gate semantics this system needs.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

#[derive(Debug, Clone, Copy)]
pub struct SiteConfig {
    pub max_concurrent: usize,
    pub min_delay_ms: i64,
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 2,
            min_delay_ms: 2000,
        }
    }
}

#[derive(Debug, Clone)]
struct QueueEntry {
    task_id: String,
    url: String,
    priority: i32,
    created_at: DateTime<Utc>,
}

impl PartialEq for QueueEntry {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.created_at == other.created_at
    }
}
impl Eq for QueueEntry {}

impl PartialOrd for QueueEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueueEntry {
    /// Higher priority first; ties broken by earlier arrival.
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.created_at.cmp(&self.created_at))
    }
}

struct SiteState {
    running: usize,
    last_request_at: Option<DateTime<Utc>>,
    wait_queue: BinaryHeap<QueueEntry>,
    config: SiteConfig,
}

impl SiteState {
    fn new(config: SiteConfig) -> Self {
        Self {
            running: 0,
            last_request_at: None,
            wait_queue: BinaryHeap::new(),
            config,
        }
    }

    fn can_execute(&self, shutting_down: bool) -> bool {
        if shutting_down || self.running >= self.config.max_concurrent {
            return false;
        }
        match self.last_request_at {
            None => true,
            Some(last) => (Utc::now() - last).num_milliseconds() >= self.config.min_delay_ms,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireResult {
    Acquired,
    Queued,
}

#[derive(Debug, Clone)]
pub struct DomainStats {
    pub domain: String,
    pub running: usize,
    pub max_concurrent: usize,
    pub queued: usize,
    pub utilization_pct: f64,
    pub last_request_at: Option<DateTime<Utc>>,
}

/// Per-domain rate limiter with a priority/FIFO wait queue.
pub struct SiteConcurrencyManager {
    sites: DashMap<String, SiteState>,
    overrides: DashMap<String, SiteConfig>,
    shutting_down: AtomicBool,
}

impl Default for SiteConcurrencyManager {
    fn default() -> Self {
        Self::new()
    }
}

impl SiteConcurrencyManager {
    #[must_use]
    pub fn new() -> Self {
        Self {
            sites: DashMap::new(),
            overrides: DashMap::new(),
            shutting_down: AtomicBool::new(false),
        }
    }

    /// Inject a per-site override before a batch starts.
    pub fn set_override(&self, domain: impl Into<String>, config: SiteConfig) {
        self.overrides.insert(domain.into(), config);
    }

    fn config_for(&self, domain: &str) -> SiteConfig {
        self.overrides.get(domain).map_or_else(SiteConfig::default, |c| *c)
    }

    #[must_use]
    pub fn can_execute(&self, domain: &str) -> bool {
        let shutting_down = self.shutting_down.load(Ordering::SeqCst);
        self.sites
            .get(domain)
            .is_none_or(|state| state.can_execute(shutting_down))
    }

    /// Reserve a slot if possible, else enqueue. Returns whether the slot
    /// was acquired immediately or the task was queued.
    pub fn acquire_slot(&self, task_id: &str, url: &str, domain: &str, priority: i32) -> AcquireResult {
        let shutting_down = self.shutting_down.load(Ordering::SeqCst);
        let config = self.config_for(domain);
        let mut state = self.sites.entry(domain.to_string()).or_insert_with(|| SiteState::new(config));

        if state.can_execute(shutting_down) {
            state.running += 1;
            state.last_request_at = Some(Utc::now());
            AcquireResult::Acquired
        } else {
            state.wait_queue.push(QueueEntry {
                task_id: task_id.to_string(),
                url: url.to_string(),
                priority,
                created_at: Utc::now(),
            });
            AcquireResult::Queued
        }
    }

    /// Release a slot, remove the task from the wait queue if present, and
    /// promote the next eligible queued task if one can now run. Returns
    /// the promoted `(task_id, url)` if promotion occurred; the caller is
    /// responsible for actually starting that task.
    pub fn release_slot(&self, task_id: &str, domain: &str) -> Option<(String, String)> {
        let shutting_down = self.shutting_down.load(Ordering::SeqCst);
        let mut state = self.sites.get_mut(domain)?;
        state.running = state.running.saturating_sub(1);

        let mut retained: Vec<QueueEntry> = state
            .wait_queue
            .drain()
            .filter(|entry| entry.task_id != task_id)
            .collect();
        retained.sort();
        state.wait_queue = retained.into_iter().collect();

        if state.can_execute(shutting_down)
            && let Some(entry) = state.wait_queue.pop()
        {
            state.running += 1;
            state.last_request_at = Some(Utc::now());
            return Some((entry.task_id, entry.url));
        }
        None
    }

    /// Poll `can_execute` at a 1s interval until a slot opens, then acquire.
    pub async fn wait_for_slot(&self, task_id: &str, url: &str, domain: &str, priority: i32) {
        loop {
            if self.acquire_slot(task_id, url, domain, priority) == AcquireResult::Acquired {
                return;
            }
            tokio::time::sleep(Duration::from_secs(1)).await;
            // re-check: promotion by another release may have already claimed
            // this task; acquire_slot above is what actually grants the slot.
        }
    }

    /// Set `shuttingDown` and wait until all domains' running counters hit
    /// zero or `timeout` elapses.
    pub async fn shutdown(&self, timeout: Duration) {
        self.shutting_down.store(true, Ordering::SeqCst);
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let total_running: usize = self.sites.iter().map(|s| s.running).sum();
            if total_running == 0 {
                return;
            }
            if tokio::time::Instant::now() >= deadline {
                log::warn!("SiteConcurrencyManager shutdown timed out with {total_running} tasks still running");
                return;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }

    #[must_use]
    pub fn statistics(&self) -> Vec<DomainStats> {
        self.sites
            .iter()
            .map(|entry| {
                let domain = entry.key().clone();
                let state = entry.value();
                DomainStats {
                    domain,
                    running: state.running,
                    max_concurrent: state.config.max_concurrent,
                    queued: state.wait_queue.len(),
                    utilization_pct: if state.config.max_concurrent == 0 {
                        0.0
                    } else {
                        state.running as f64 / state.config.max_concurrent as f64 * 100.0
                    },
                    last_request_at: state.last_request_at,
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquire_respects_max_concurrent() {
        let mgr = SiteConcurrencyManager::new();
        mgr.set_override("example.com", SiteConfig { max_concurrent: 1, min_delay_ms: 0 });

        assert_eq!(mgr.acquire_slot("t1", "https://example.com/a", "example.com", 1), AcquireResult::Acquired);
        assert_eq!(mgr.acquire_slot("t2", "https://example.com/b", "example.com", 1), AcquireResult::Queued);
    }

    #[test]
    fn release_promotes_highest_priority_first() {
        let mgr = SiteConcurrencyManager::new();
        mgr.set_override("example.com", SiteConfig { max_concurrent: 1, min_delay_ms: 0 });

        mgr.acquire_slot("t1", "https://example.com/a", "example.com", 1);
        mgr.acquire_slot("t2", "https://example.com/low", "example.com", 1);
        mgr.acquire_slot("t3", "https://example.com/high", "example.com", 5);

        let promoted = mgr.release_slot("t1", "example.com");
        assert_eq!(promoted.map(|(id, _)| id), Some("t3".to_string()));
    }

    #[test]
    fn release_unknown_domain_is_noop() {
        let mgr = SiteConcurrencyManager::new();
        assert!(mgr.release_slot("ghost", "nowhere.example").is_none());
    }
}
