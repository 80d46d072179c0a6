//! Key/value cache with sliding TTL expiration and an eviction queue.
//!
//! Every entry remembers when it was last touched. `add` and `get` refresh
//! that timestamp; a sweep task wakes every `sweep_interval` and evicts each
//! entry idle for longer than the TTL, pushing its value onto the queue
//! returned by [`EvictionCache::new`].
//!
//! Removal and notification happen under the same lock as `get`/`remove`,
//! so an entry is either returned to a caller or evicted, never both, and
//! is evicted at most once.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::trace;

use super::CacheStats;

/// Receiving end of the eviction queue.
pub type Evictions<V> = mpsc::UnboundedReceiver<V>;

struct Entry<V> {
    value: V,
    last_touched: Instant,
}

struct State<V> {
    items: HashMap<String, Entry<V>>,
    /// `None` once the cache is closed.
    evicted: Option<mpsc::UnboundedSender<V>>,
}

struct Inner<V> {
    ttl: Duration,
    state: Mutex<State<V>>,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    peak_entries: AtomicUsize,
}

impl<V> Inner<V> {
    fn sweep(&self, now: Instant) -> usize {
        let mut state = self.state.lock();
        let Some(evicted) = state.evicted.clone() else {
            return 0;
        };

        let expired: Vec<String> = state
            .items
            .iter()
            .filter(|(_, entry)| now.saturating_duration_since(entry.last_touched) > self.ttl)
            .map(|(key, _)| key.clone())
            .collect();

        for key in &expired {
            if let Some(entry) = state.items.remove(key) {
                trace!(key = %key, "evicting idle entry");
                // The receiver may be gone; the entry is dropped either way.
                let _ = evicted.send(entry.value);
            }
        }

        self.evictions
            .fetch_add(expired.len() as u64, Ordering::Relaxed);
        expired.len()
    }
}

/// Cache whose entries expire after `ttl` without being touched.
///
/// Must be created inside a Tokio runtime: the sweep runs as a spawned task
/// that stops on [`close`](Self::close) or when the cache is dropped.
pub struct EvictionCache<V> {
    inner: Arc<Inner<V>>,
    cancel: CancellationToken,
}

impl<V: Send + 'static> EvictionCache<V> {
    /// Create a cache and its eviction queue.
    pub fn new(ttl: Duration, sweep_interval: Duration) -> (Self, Evictions<V>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let inner = Arc::new(Inner {
            ttl,
            state: Mutex::new(State {
                items: HashMap::new(),
                evicted: Some(tx),
            }),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            peak_entries: AtomicUsize::new(0),
        });
        let cancel = CancellationToken::new();

        tokio::spawn(sweep_loop(
            Arc::downgrade(&inner),
            sweep_interval,
            cancel.clone(),
        ));

        (Self { inner, cancel }, rx)
    }
}

impl<V> EvictionCache<V> {
    /// Insert `value` under `key` if absent.
    ///
    /// An existing entry keeps its value; only its touch time is refreshed.
    pub fn add(&self, key: impl Into<String>, value: V) {
        let mut state = self.inner.state.lock();
        let now = Instant::now();
        state
            .items
            .entry(key.into())
            .and_modify(|entry| entry.last_touched = now)
            .or_insert(Entry {
                value,
                last_touched: now,
            });
        self.inner
            .peak_entries
            .fetch_max(state.items.len(), Ordering::Relaxed);
    }

    /// Look up `key`, refreshing its touch time.
    pub fn get(&self, key: &str) -> Option<V>
    where
        V: Clone,
    {
        let mut state = self.inner.state.lock();
        match state.items.get_mut(key) {
            Some(entry) => {
                entry.last_touched = Instant::now();
                self.inner.hits.fetch_add(1, Ordering::Relaxed);
                Some(entry.value.clone())
            }
            None => {
                self.inner.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Remove `key` unconditionally, returning its value if it was present.
    ///
    /// Only [`get`](Self::get) counts towards hits and misses.
    pub fn remove(&self, key: &str) -> Option<V> {
        self.inner.state.lock().items.remove(key).map(|e| e.value)
    }

    pub fn len(&self) -> usize {
        self.inner.state.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn ttl(&self) -> Duration {
        self.inner.ttl
    }

    /// Stop sweeping. Outstanding entries are abandoned, not flushed, and the
    /// eviction queue yields `None` once drained.
    pub fn close(&self) {
        self.cancel.cancel();
        let mut state = self.inner.state.lock();
        state.evicted = None;
        state.items.clear();
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.inner.hits.load(Ordering::Relaxed),
            misses: self.inner.misses.load(Ordering::Relaxed),
            evictions: self.inner.evictions.load(Ordering::Relaxed),
            entries: self.len(),
            peak_entries: self.inner.peak_entries.load(Ordering::Relaxed),
        }
    }
}

impl<V> Drop for EvictionCache<V> {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn sweep_loop<V>(inner: Weak<Inner<V>>, every: Duration, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                let Some(inner) = inner.upgrade() else { break };
                inner.sweep(Instant::now());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::{sleep, timeout};

    const TTL: Duration = Duration::from_millis(100);
    const SWEEP: Duration = Duration::from_millis(10);

    // Test 1: Second add keeps the first value
    #[tokio::test(start_paused = true)]
    async fn test_add_does_not_overwrite() {
        let (cache, _evictions) = EvictionCache::new(TTL, SWEEP);
        cache.add("k", 1);
        cache.add("k", 2);

        assert_eq!(cache.get("k"), Some(1));
        assert_eq!(cache.len(), 1);
    }

    // Test 2: Idle entry is evicted exactly once
    #[tokio::test(start_paused = true)]
    async fn test_idle_entry_evicted_once() {
        let (cache, mut evictions) = EvictionCache::new(TTL, SWEEP);
        cache.add("k", "request");

        sleep(Duration::from_millis(150)).await;
        assert_eq!(evictions.recv().await, Some("request"));
        assert!(cache.is_empty());
        assert_eq!(cache.get("k"), None);

        let again = timeout(Duration::from_secs(1), evictions.recv()).await;
        assert!(again.is_err(), "entry evicted twice");
        assert_eq!(cache.stats().evictions, 1);
    }

    // Test 3: get refreshes the touch time (sliding expiration)
    #[tokio::test(start_paused = true)]
    async fn test_get_refreshes_ttl() {
        let (cache, mut evictions) = EvictionCache::new(TTL, SWEEP);
        cache.add("k", 7);

        sleep(Duration::from_millis(60)).await;
        assert_eq!(cache.get("k"), Some(7));

        sleep(Duration::from_millis(60)).await;
        // 120ms since add, 60ms since get
        assert_eq!(cache.len(), 1);
        assert!(evictions.try_recv().is_err());

        sleep(Duration::from_millis(100)).await;
        assert_eq!(evictions.recv().await, Some(7));
    }

    // Test 4: Repeated add refreshes the touch time
    #[tokio::test(start_paused = true)]
    async fn test_add_refreshes_ttl() {
        let (cache, mut evictions) = EvictionCache::new(TTL, SWEEP);
        cache.add("k", 1);
        sleep(Duration::from_millis(80)).await;
        cache.add("k", 2);
        sleep(Duration::from_millis(80)).await;

        assert_eq!(cache.len(), 1);
        assert!(evictions.try_recv().is_err());

        sleep(Duration::from_millis(100)).await;
        assert_eq!(evictions.recv().await, Some(1));
    }

    // Test 5: Removed entries are never evicted
    #[tokio::test(start_paused = true)]
    async fn test_remove_prevents_eviction() {
        let (cache, mut evictions) = EvictionCache::new(TTL, SWEEP);
        cache.add("a", 1);
        cache.add("b", 2);
        assert_eq!(cache.remove("a"), Some(1));
        assert_eq!(cache.remove("a"), None);

        sleep(Duration::from_millis(200)).await;
        assert_eq!(evictions.recv().await, Some(2));
        assert!(evictions.try_recv().is_err());
    }

    // Test 6: close stops evictions and ends the queue
    #[tokio::test(start_paused = true)]
    async fn test_close_abandons_entries() {
        let (cache, mut evictions) = EvictionCache::new(TTL, SWEEP);
        cache.add("k", 1);
        cache.close();

        sleep(Duration::from_millis(500)).await;
        assert_eq!(evictions.recv().await, None);
    }

    // Test 7: Sweep only takes expired entries
    #[test]
    fn test_sweep_expired_only() {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .start_paused(true)
            .build()
            .unwrap();
        rt.block_on(async {
            let (cache, mut evictions) = EvictionCache::new(TTL, Duration::from_secs(3600));
            cache.add("old", 1);
            tokio::time::advance(Duration::from_millis(70)).await;
            cache.add("new", 2);
            tokio::time::advance(Duration::from_millis(50)).await;

            assert_eq!(cache.inner.sweep(Instant::now()), 1);
            assert_eq!(evictions.try_recv().ok(), Some(1));
            assert_eq!(cache.len(), 1);
            assert_eq!(cache.get("new"), Some(2));
        });
    }

    // Test 8: Stats track lookups and peak size
    #[tokio::test(start_paused = true)]
    async fn test_stats() {
        let (cache, _evictions) = EvictionCache::new(TTL, SWEEP);
        cache.add("a", 1);
        cache.add("b", 2);
        cache.get("a");
        cache.get("zzz");
        assert_eq!(cache.remove("b"), Some(2));
        assert_eq!(cache.remove("b"), None);

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.entries, 1);
        assert_eq!(stats.peak_entries, 2);
    }
}
