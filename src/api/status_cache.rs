//! Short-lived cache of task status replies
//!
//! Repeated status lookups for the same task inside the freshness window are
//! answered locally instead of hitting the service again.

use super::types::TaskSnapshot;
use moka::future::Cache;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// TTL-bounded cache of [`TaskSnapshot`]s keyed by task id.
#[derive(Clone)]
pub struct StatusCache {
    cache: Cache<String, TaskSnapshot>,
    ttl: Duration,
    hits: Arc<AtomicU64>,
    misses: Arc<AtomicU64>,
}

impl StatusCache {
    /// Creates a cache holding at most `max_capacity` entries for `ttl` each.
    ///
    /// # Examples
    ///
    /// ```
    /// use download_tracker::api::StatusCache;
    /// use std::time::Duration;
    ///
    /// let cache = StatusCache::new(Duration::from_secs(300), 100);
    /// assert_eq!(cache.entry_count(), 0);
    /// ```
    #[must_use]
    pub fn new(ttl: Duration, max_capacity: u64) -> Self {
        let cache = Cache::builder()
            .max_capacity(max_capacity)
            .time_to_live(ttl)
            .build();

        Self {
            cache,
            ttl,
            hits: Arc::new(AtomicU64::new(0)),
            misses: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Fresh snapshot for `task_id`, if cached.
    pub async fn get(&self, task_id: &str) -> Option<TaskSnapshot> {
        let cached = self.cache.get(task_id).await;
        if cached.is_some() {
            self.hits.fetch_add(1, Ordering::Relaxed);
            debug!(task_id = %task_id, "Task status served from cache");
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
        }
        cached
    }

    /// Store a fresh snapshot.
    pub async fn insert(&self, task_id: &str, snapshot: TaskSnapshot) {
        self.cache.insert(task_id.to_string(), snapshot).await;
    }

    /// Drop the entry for `task_id`.
    pub async fn invalidate(&self, task_id: &str) {
        self.cache.invalidate(task_id).await;
    }

    /// Drop every entry.
    pub fn clear(&self) {
        self.cache.invalidate_all();
    }

    /// Returns the current number of entries in the cache
    ///
    /// The count is updated lazily by moka's maintenance tasks.
    #[must_use]
    pub fn entry_count(&self) -> u64 {
        self.cache.entry_count()
    }

    /// Lookups answered from the cache
    #[must_use]
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    /// Lookups that had to go to the service
    #[must_use]
    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    /// Configured freshness window
    #[must_use]
    pub const fn ttl(&self) -> Duration {
        self.ttl
    }

    #[cfg(test)]
    pub(crate) async fn run_pending_tasks(&self) {
        self.cache.run_pending_tasks().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(task_id: &str, progress: f64) -> TaskSnapshot {
        TaskSnapshot {
            task_id: task_id.to_string(),
            progress,
            ..TaskSnapshot::default()
        }
    }

    #[tokio::test]
    async fn test_miss_then_hit() {
        let cache = StatusCache::new(Duration::from_secs(60), 10);

        assert!(cache.get("t-1").await.is_none());
        cache.insert("t-1", snapshot("t-1", 40.0)).await;

        let cached = cache.get("t-1").await;
        assert_eq!(cached.map(|s| s.task_id), Some("t-1".to_string()));
        assert_eq!(cache.hits(), 1);
        assert_eq!(cache.misses(), 1);
    }

    #[tokio::test]
    async fn test_invalidate_single_entry() {
        let cache = StatusCache::new(Duration::from_secs(60), 10);
        cache.insert("t-1", snapshot("t-1", 10.0)).await;
        cache.insert("t-2", snapshot("t-2", 20.0)).await;

        cache.invalidate("t-1").await;
        assert!(cache.get("t-1").await.is_none());
        assert!(cache.get("t-2").await.is_some());
    }

    #[tokio::test]
    async fn test_clear() {
        let cache = StatusCache::new(Duration::from_secs(60), 10);
        cache.insert("t-1", snapshot("t-1", 10.0)).await;
        cache.insert("t-2", snapshot("t-2", 20.0)).await;

        cache.clear();
        cache.run_pending_tasks().await;

        assert_eq!(cache.entry_count(), 0);
        assert!(cache.get("t-1").await.is_none());
    }

    #[tokio::test]
    async fn test_entry_count() {
        let cache = StatusCache::new(Duration::from_secs(60), 10);
        cache.insert("t-1", snapshot("t-1", 10.0)).await;
        cache.insert("t-2", snapshot("t-2", 20.0)).await;

        // Manually run pending tasks to update the entry count
        cache.run_pending_tasks().await;

        assert_eq!(cache.entry_count(), 2);
    }

    #[tokio::test]
    async fn test_entries_expire() {
        let cache = StatusCache::new(Duration::from_millis(50), 10);
        cache.insert("t-1", snapshot("t-1", 10.0)).await;

        tokio::time::sleep(Duration::from_millis(120)).await;
        assert!(cache.get("t-1").await.is_none());
    }
}
