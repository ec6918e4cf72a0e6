//! Per-application element cache.
//!
//! One [`CacheEntry`] per application key, replaced wholesale on refresh.
//! Entries are shared as `Arc` snapshots: a reader keeps working on the entry
//! it fetched even if a refresh swaps in a new one meanwhile.
//!
//! Locking: the key→entry map sits behind an `RwLock` that is only held for
//! pointer swaps. Index construction happens outside it, under a per-app
//! writer mutex, so two refreshes of the same app serialise while other apps
//! and all readers proceed.

pub mod index;
pub mod record;

pub use index::ElementIndex;
pub use record::ElementRecord;

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, RwLock,
    },
    time::{Duration, Instant},
};

use crate::provider::AppIdentity;

const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_info};

#[derive(Debug)]
pub struct CacheEntry {
    pub app: AppIdentity,
    pub elements: Vec<ElementRecord>,
    pub index: ElementIndex,
    pub created_at: Instant,
    pub created_wall: DateTime<Utc>,
    pub ttl: Duration,
}

impl CacheEntry {
    fn new(app: AppIdentity, elements: Vec<ElementRecord>, ttl: Duration) -> Self {
        let index = ElementIndex::build(&elements);
        Self {
            app,
            elements,
            index,
            created_at: Instant::now(),
            created_wall: Utc::now(),
            ttl,
        }
    }

    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    pub fn is_expired(&self) -> bool {
        self.age() >= self.ttl
    }

    /// See [`ElementIndex::lookup`].
    pub fn search(
        &self,
        role: &str,
        title: &str,
        clickable_roles: &[String],
    ) -> Vec<&ElementRecord> {
        self.index
            .lookup(role, title, clickable_roles)
            .into_iter()
            .filter_map(|pos| self.elements.get(pos))
            .collect()
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntrySummary {
    pub app_key: String,
    pub app_name: String,
    pub elements: usize,
    pub age_ms: u64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    pub entries: usize,
    pub max_entries: usize,
    pub ttl_secs: u64,
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
    pub puts: u64,
    pub expirations: u64,
    pub evictions: u64,
    pub invalidations: u64,
    pub apps: Vec<CacheEntrySummary>,
}

#[derive(Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    puts: AtomicU64,
    expirations: AtomicU64,
    evictions: AtomicU64,
    invalidations: AtomicU64,
}

pub struct ElementCache {
    entries: RwLock<HashMap<String, Arc<CacheEntry>>>,
    writers: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    ttl: Duration,
    max_entries: usize,
    clickable_roles: Vec<String>,
    counters: Counters,
}

impl ElementCache {
    pub fn new(ttl: Duration, max_entries: usize, clickable_roles: Vec<String>) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            writers: Mutex::new(HashMap::new()),
            ttl,
            max_entries: max_entries.max(1),
            clickable_roles,
            counters: Counters::default(),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn clickable_roles(&self) -> &[String] {
        &self.clickable_roles
    }

    fn writer_lock(&self, key: &str) -> Arc<Mutex<()>> {
        let mut writers = self.writers.lock().unwrap_or_else(|e| e.into_inner());
        Arc::clone(writers.entry(key.to_string()).or_default())
    }

    /// Drops the writer lock for `key` once no put is holding it.
    fn prune_writer(&self, key: &str) {
        let mut writers = self.writers.lock().unwrap_or_else(|e| e.into_inner());
        if writers
            .get(key)
            .is_some_and(|writer| Arc::strong_count(writer) == 1)
        {
            writers.remove(key);
        }
    }

    fn prune_writers(&self) {
        let mut writers = self.writers.lock().unwrap_or_else(|e| e.into_inner());
        writers.retain(|_, writer| Arc::strong_count(writer) > 1);
    }

    /// Replaces the entry for `app`, rebuilding its index. O(n) in elements.
    pub fn put(&self, app: &AppIdentity, elements: Vec<ElementRecord>) -> Arc<CacheEntry> {
        let key = app.cache_key();
        let writer = self.writer_lock(&key);
        let _write_guard = writer.lock().unwrap_or_else(|e| e.into_inner());

        let entry = Arc::new(CacheEntry::new(app.clone(), elements, self.ttl));
        let count = entry.elements.len();

        let evicted = {
            let mut map = self.entries.write().unwrap_or_else(|e| e.into_inner());
            let mut evicted = None;
            if !map.contains_key(&key) && map.len() >= self.max_entries {
                if let Some(oldest) = map
                    .iter()
                    .min_by_key(|(_, entry)| entry.created_at)
                    .map(|(k, _)| k.clone())
                {
                    map.remove(&oldest);
                    self.counters.evictions.fetch_add(1, Ordering::Relaxed);
                    log_debug!("evicted oldest cache entry {}", oldest);
                    evicted = Some(oldest);
                }
            }
            map.insert(key.clone(), Arc::clone(&entry));
            evicted
        };
        if let Some(oldest) = evicted {
            self.prune_writer(&oldest);
        }

        self.counters.puts.fetch_add(1, Ordering::Relaxed);
        log_debug!("cached {} elements for {}", count, key);
        entry
    }

    /// Fresh entry for `app_key`, or `None`. A stale entry is removed and
    /// counted as both an expiration and a miss.
    pub fn get(&self, app_key: &str) -> Option<Arc<CacheEntry>> {
        let found = {
            let map = self.entries.read().unwrap_or_else(|e| e.into_inner());
            map.get(app_key).cloned()
        };

        match found {
            Some(entry) if !entry.is_expired() => {
                self.counters.hits.fetch_add(1, Ordering::Relaxed);
                Some(entry)
            }
            Some(stale) => {
                let expired = {
                    let mut map = self.entries.write().unwrap_or_else(|e| e.into_inner());
                    let still_current = map
                        .get(app_key)
                        .map(|current| Arc::ptr_eq(current, &stale))
                        .unwrap_or(false);
                    if still_current {
                        map.remove(app_key);
                    }
                    still_current
                };
                if expired {
                    self.prune_writer(app_key);
                    self.counters.expirations.fetch_add(1, Ordering::Relaxed);
                    log_debug!("cache entry for {} expired after {:?}", app_key, stale.age());
                }
                self.counters.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
            None => {
                self.counters.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Current entry without touching hit/miss counters or expiring it.
    /// Used by background work so it does not skew the hit rate.
    pub fn peek(&self, app_key: &str) -> Option<Arc<CacheEntry>> {
        self.entries
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(app_key)
            .filter(|entry| !entry.is_expired())
            .cloned()
    }

    /// Role/title candidates from the cached entry, in traversal order.
    pub fn search_by_role_and_title(
        &self,
        app_key: &str,
        role: &str,
        title: &str,
    ) -> Vec<ElementRecord> {
        match self.get(app_key) {
            Some(entry) => entry
                .search(role, title, &self.clickable_roles)
                .into_iter()
                .cloned()
                .collect(),
            None => Vec::new(),
        }
    }

    pub fn invalidate(&self, app_key: &str) -> bool {
        let removed = self
            .entries
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(app_key)
            .is_some();
        if removed {
            self.prune_writer(app_key);
            self.counters.invalidations.fetch_add(1, Ordering::Relaxed);
            log_info!("invalidated cache entry for {}", app_key);
        }
        removed
    }

    pub fn clear(&self) {
        let removed = {
            let mut map = self.entries.write().unwrap_or_else(|e| e.into_inner());
            let n = map.len();
            map.clear();
            n
        };
        self.prune_writers();
        self.counters
            .invalidations
            .fetch_add(removed as u64, Ordering::Relaxed);
    }

    /// Drops every expired entry. Returns how many were removed.
    pub fn cleanup_expired(&self) -> usize {
        let removed = {
            let mut map = self.entries.write().unwrap_or_else(|e| e.into_inner());
            let before = map.len();
            map.retain(|_, entry| !entry.is_expired());
            before - map.len()
        };
        if removed > 0 {
            self.prune_writers();
            self.counters
                .expirations
                .fetch_add(removed as u64, Ordering::Relaxed);
            log_debug!("cleanup removed {} expired cache entries", removed);
        }
        removed
    }

    #[cfg(test)]
    fn writer_count(&self) -> usize {
        self.writers.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        let map = self.entries.read().unwrap_or_else(|e| e.into_inner());
        let hits = self.counters.hits.load(Ordering::Relaxed);
        let misses = self.counters.misses.load(Ordering::Relaxed);
        let lookups = hits + misses;

        let mut apps: Vec<CacheEntrySummary> = map
            .iter()
            .map(|(key, entry)| CacheEntrySummary {
                app_key: key.clone(),
                app_name: entry.app.name.clone(),
                elements: entry.elements.len(),
                age_ms: entry.age().as_millis() as u64,
                created_at: entry.created_wall,
            })
            .collect();
        apps.sort_by(|a, b| a.app_key.cmp(&b.app_key));

        CacheStats {
            entries: map.len(),
            max_entries: self.max_entries,
            ttl_secs: self.ttl.as_secs(),
            hits,
            misses,
            hit_rate: if lookups == 0 {
                0.0
            } else {
                hits as f64 / lookups as f64 * 100.0
            },
            puts: self.counters.puts.load(Ordering::Relaxed),
            expirations: self.counters.expirations.load(Ordering::Relaxed),
            evictions: self.counters.evictions.load(Ordering::Relaxed),
            invalidations: self.counters.invalidations.load(Ordering::Relaxed),
            apps,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::BoundingBox;
    use crate::roles;
    use std::thread;

    fn app(name: &str) -> AppIdentity {
        AppIdentity::new(1, name)
    }

    fn records(app_key: &str, n: usize) -> Vec<ElementRecord> {
        (0..n)
            .map(|i| {
                ElementRecord::new(
                    "AXButton",
                    format!("Button {i}"),
                    BoundingBox::new(10.0 * i as f64, 0.0, 10.0, 10.0),
                    app_key,
                )
            })
            .collect()
    }

    fn cache(ttl: Duration, max: usize) -> ElementCache {
        ElementCache::new(ttl, max, roles::default_clickable_roles())
    }

    #[test]
    fn put_then_get_returns_same_elements() {
        let cache = cache(Duration::from_secs(30), 10);
        let elements = records("x", 5);
        cache.put(&app("X"), elements.clone());

        let entry = cache.get("x").expect("fresh entry");
        assert_eq!(entry.elements, elements);
        assert_eq!(cache.stats().hits, 1);

        assert!(cache.peek("x").is_some());
        assert_eq!(cache.stats().hits, 1);
    }

    #[test]
    fn expired_entry_is_a_miss_and_removed() {
        let cache = cache(Duration::from_secs(1), 10);
        cache.put(&app("X"), records("x", 5));
        thread::sleep(Duration::from_millis(1100));

        assert!(cache.get("x").is_none());
        let stats = cache.stats();
        assert_eq!(stats.expirations, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.entries, 0);

        assert!(cache.get("x").is_none());
        let stats = cache.stats();
        assert_eq!(stats.expirations, 1);
        assert_eq!(stats.misses, 2);
    }

    #[test]
    fn capacity_overflow_evicts_oldest_only() {
        let cache = cache(Duration::from_secs(30), 2);
        cache.put(&app("A"), records("a", 1));
        thread::sleep(Duration::from_millis(5));
        cache.put(&app("B"), records("b", 1));
        thread::sleep(Duration::from_millis(5));
        cache.put(&app("C"), records("c", 1));

        assert!(cache.get("a").is_none());
        assert!(cache.get("b").is_some());
        assert!(cache.get("c").is_some());
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn refresh_replaces_without_eviction() {
        let cache = cache(Duration::from_secs(30), 1);
        cache.put(&app("A"), records("a", 3));
        cache.put(&app("A"), records("a", 1));
        assert_eq!(cache.get("a").unwrap().elements.len(), 1);
        assert_eq!(cache.stats().evictions, 0);
    }

    #[test]
    fn search_is_derived_from_last_put() {
        let cache = cache(Duration::from_secs(30), 10);
        let key = "mail";
        cache.put(
            &app("Mail"),
            vec![
                ElementRecord::new("AXButton", "Send", BoundingBox::new(0.0, 0.0, 5.0, 5.0), key),
                ElementRecord::new(
                    "AXStaticText",
                    "Inbox",
                    BoundingBox::new(0.0, 0.0, 5.0, 5.0),
                    key,
                ),
            ],
        );
        let first: Vec<_> = cache
            .search_by_role_and_title(key, "", "Inbox")
            .into_iter()
            .map(|r| r.title)
            .collect();
        assert_eq!(first, vec!["Send", "Inbox"]);

        cache.put(
            &app("Mail"),
            vec![ElementRecord::new("AXLink", "Help", BoundingBox::new(0.0, 0.0, 5.0, 5.0), key)],
        );
        let second: Vec<_> = cache
            .search_by_role_and_title(key, "", "Inbox")
            .into_iter()
            .map(|r| r.title)
            .collect();
        assert_eq!(second, vec!["Help"]);
    }

    #[test]
    fn invalidate_and_cleanup() {
        let cache = cache(Duration::from_millis(50), 10);
        cache.put(&app("A"), records("a", 1));
        cache.put(&app("B"), records("b", 1));
        assert!(cache.invalidate("a"));
        assert!(!cache.invalidate("a"));

        thread::sleep(Duration::from_millis(80));
        assert_eq!(cache.cleanup_expired(), 1);
        assert!(cache.is_empty());
        assert_eq!(cache.stats().invalidations, 1);
    }

    #[test]
    fn writer_locks_follow_their_entries() {
        let cache = cache(Duration::from_millis(50), 2);
        cache.put(&app("A"), records("a", 1));
        cache.put(&app("B"), records("b", 1));
        assert_eq!(cache.writer_count(), 2);

        assert!(cache.invalidate("a"));
        assert_eq!(cache.writer_count(), 1);

        thread::sleep(Duration::from_millis(5));
        cache.put(&app("C"), records("c", 1));
        thread::sleep(Duration::from_millis(5));
        cache.put(&app("D"), records("d", 1));
        assert_eq!(cache.stats().evictions, 1);
        assert_eq!(cache.writer_count(), 2);

        thread::sleep(Duration::from_millis(80));
        assert!(cache.get("c").is_none());
        assert_eq!(cache.writer_count(), 1);
        assert_eq!(cache.cleanup_expired(), 1);
        assert_eq!(cache.writer_count(), 0);

        cache.put(&app("E"), records("e", 1));
        let held = cache.writer_lock("e");
        cache.clear();
        assert_eq!(cache.writer_count(), 1);
        drop(held);
        cache.clear();
        assert_eq!(cache.writer_count(), 0);
    }

    #[test]
    fn concurrent_puts_for_different_apps() {
        let cache = Arc::new(cache(Duration::from_secs(30), 16));
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let cache = Arc::clone(&cache);
                thread::spawn(move || {
                    let name = format!("App{i}");
                    for _ in 0..20 {
                        cache.put(&app(&name), records(&name.to_lowercase(), 10));
                        assert!(cache.get(&name.to_lowercase()).is_some());
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(cache.len(), 8);
        assert_eq!(cache.stats().puts, 160);
    }
}
