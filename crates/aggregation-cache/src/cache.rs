//! Single-flight cache with ready, failed and stale lifetimes.
//!
//! Each key moves through `absent -> pending -> ready | failed`. Ready
//! entries expire after the ready TTL and are then kept for stale reads;
//! failed entries replay their error until the failed TTL runs out.
//!
//! The entry map sits behind one `std::sync::Mutex` that is never held
//! across an await. Computations run in their own task and publish through
//! a `watch` channel, so callers for other keys never wait on them.

use lru::LruCache;
use metrics::counter;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::CacheConfig;
use crate::error::CacheError;

/// How a lookup was answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheStatus {
    /// This caller started the computation.
    Miss,
    /// Served from a fresh entry.
    Hit,
    /// Attached to a computation another caller started.
    Coalesced,
    /// Served from an expired entry.
    Stale,
}

/// Observable state of one key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryState {
    Pending,
    Ready,
    Failed,
    Expired,
}

/// A value and how it was obtained.
#[derive(Debug, Clone, PartialEq)]
pub struct Lookup<V> {
    pub value: V,
    pub status: CacheStatus,
}

impl<V> Lookup<V> {
    pub fn is_stale(&self) -> bool {
        self.status == CacheStatus::Stale
    }
}

/// Cache counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub coalesced: u64,
    pub stale_hits: u64,
    pub cached_failures: u64,
    pub evictions: u64,
    pub entries: usize,
}

impl CacheStats {
    /// Share of lookups answered without starting a computation, in percent.
    pub fn hit_rate(&self) -> f64 {
        let served = self.hits + self.coalesced + self.stale_hits;
        let total = served + self.misses + self.cached_failures;
        if total == 0 {
            0.0
        } else {
            (served as f64 / total as f64) * 100.0
        }
    }
}

#[derive(Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    coalesced: AtomicU64,
    stale_hits: AtomicU64,
    cached_failures: AtomicU64,
    evictions: AtomicU64,
}

impl Counters {
    fn bump(counter: &AtomicU64, metric: &'static str) {
        counter.fetch_add(1, Ordering::Relaxed);
        counter!(metric).increment(1);
    }
}

type Outcome<V, E> = Option<Result<V, E>>;

struct Flight<V, E> {
    id: u64,
    rx: watch::Receiver<Outcome<V, E>>,
    cancel: CancellationToken,
    waiters: usize,
}

enum Phase<V, E> {
    Idle,
    Pending(Flight<V, E>),
    Ready { value: V, expires_at: Instant },
    Failed { error: E, expires_at: Instant },
}

struct StaleValue<V> {
    value: V,
    retain_until: Instant,
}

struct Entry<V, E> {
    phase: Phase<V, E>,
    /// Last good value after it expired.
    stale: Option<StaleValue<V>>,
}

impl<V, E> Entry<V, E> {
    /// Apply expirations that are due at `now`.
    fn settle(&mut self, now: Instant, retention: Duration) {
        match self.phase {
            Phase::Ready { expires_at, .. } if now >= expires_at => {
                if let Phase::Ready { value, expires_at } =
                    std::mem::replace(&mut self.phase, Phase::Idle)
                {
                    self.stale = Some(StaleValue {
                        value,
                        retain_until: expires_at + retention,
                    });
                }
            }
            Phase::Failed { expires_at, .. } if now >= expires_at => {
                self.phase = Phase::Idle;
            }
            _ => {}
        }
        if self
            .stale
            .as_ref()
            .is_some_and(|stale| now >= stale.retain_until)
        {
            self.stale = None;
        }
    }

    fn is_pending(&self) -> bool {
        matches!(self.phase, Phase::Pending(_))
    }

    fn is_dead(&self) -> bool {
        matches!(self.phase, Phase::Idle) && self.stale.is_none()
    }

    fn state_at(&self, now: Instant, retention: Duration) -> Option<EntryState> {
        let stale_live = self
            .stale
            .as_ref()
            .is_some_and(|stale| now < stale.retain_until);
        match &self.phase {
            Phase::Pending(_) => Some(EntryState::Pending),
            Phase::Ready { expires_at, .. } if now < *expires_at => Some(EntryState::Ready),
            Phase::Ready { expires_at, .. } if now < *expires_at + retention => {
                Some(EntryState::Expired)
            }
            Phase::Failed { expires_at, .. } if now < *expires_at => Some(EntryState::Failed),
            _ if stale_live => Some(EntryState::Expired),
            _ => None,
        }
    }
}

enum Begin<V, E> {
    Done(Lookup<V>),
    Replay(E),
    Attach {
        id: u64,
        rx: watch::Receiver<Outcome<V, E>>,
    },
    Start {
        id: u64,
        tx: watch::Sender<Outcome<V, E>>,
        rx: watch::Receiver<Outcome<V, E>>,
        token: CancellationToken,
    },
}

struct Inner<K: Hash + Eq, V, E> {
    config: CacheConfig,
    entries: Mutex<LruCache<K, Entry<V, E>>>,
    next_flight: AtomicU64,
    counters: Counters,
}

impl<K, V, E> Inner<K, V, E>
where
    K: Hash + Eq + Clone + fmt::Debug,
    V: Clone,
    E: Clone,
{
    fn lock(&self) -> MutexGuard<'_, LruCache<K, Entry<V, E>>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn begin(&self, key: &K, stale_allowed: bool) -> Begin<V, E> {
        let now = Instant::now();
        let retention = self.config.stale_retention();
        let mut entries = self.lock();

        if let Some(entry) = entries.get_mut(key) {
            entry.settle(now, retention);
            match &mut entry.phase {
                Phase::Ready { value, .. } => {
                    Counters::bump(&self.counters.hits, "aq_cache_hits_total");
                    return Begin::Done(Lookup {
                        value: value.clone(),
                        status: CacheStatus::Hit,
                    });
                }
                Phase::Pending(flight) => {
                    flight.waiters += 1;
                    Counters::bump(&self.counters.coalesced, "aq_cache_coalesced_total");
                    return Begin::Attach {
                        id: flight.id,
                        rx: flight.rx.clone(),
                    };
                }
                Phase::Failed { error, .. } => {
                    if stale_allowed {
                        if let Some(stale) = &entry.stale {
                            Counters::bump(&self.counters.stale_hits, "aq_cache_stale_hits_total");
                            return Begin::Done(Lookup {
                                value: stale.value.clone(),
                                status: CacheStatus::Stale,
                            });
                        }
                    }
                    Counters::bump(
                        &self.counters.cached_failures,
                        "aq_cache_cached_failures_total",
                    );
                    return Begin::Replay(error.clone());
                }
                Phase::Idle => {
                    if stale_allowed {
                        if let Some(stale) = &entry.stale {
                            Counters::bump(&self.counters.stale_hits, "aq_cache_stale_hits_total");
                            return Begin::Done(Lookup {
                                value: stale.value.clone(),
                                status: CacheStatus::Stale,
                            });
                        }
                    }
                }
            }
        }

        Counters::bump(&self.counters.misses, "aq_cache_misses_total");
        let id = self.next_flight.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = watch::channel(None);
        let token = CancellationToken::new();
        let flight = Flight {
            id,
            rx: rx.clone(),
            cancel: token.clone(),
            waiters: 1,
        };
        match entries.get_mut(key) {
            Some(entry) => entry.phase = Phase::Pending(flight),
            None => {
                entries.put(
                    key.clone(),
                    Entry {
                        phase: Phase::Pending(flight),
                        stale: None,
                    },
                );
                self.evict_over_capacity(&mut entries);
            }
        }
        Begin::Start { id, tx, rx, token }
    }

    /// Record a finished computation, if `id` still owns the entry.
    fn complete(&self, key: &K, id: u64, result: &Result<V, E>) {
        let now = Instant::now();
        let mut entries = self.lock();
        let Some(entry) = entries.peek_mut(key) else {
            return;
        };
        if !matches!(&entry.phase, Phase::Pending(flight) if flight.id == id) {
            return;
        }
        entry.phase = match result {
            Ok(value) => {
                entry.stale = None;
                Phase::Ready {
                    value: value.clone(),
                    expires_at: now + self.config.ready_ttl(),
                }
            }
            Err(error) => Phase::Failed {
                error: error.clone(),
                expires_at: now + self.config.failed_ttl(),
            },
        };
    }

    /// Release one waiter. The last one out cancels the computation.
    fn detach(&self, key: &K, id: u64) {
        let mut entries = self.lock();
        let Some(entry) = entries.peek_mut(key) else {
            return;
        };
        if let Phase::Pending(flight) = &mut entry.phase {
            if flight.id != id {
                return;
            }
            flight.waiters = flight.waiters.saturating_sub(1);
            if flight.waiters == 0 {
                debug!(key = ?key, flight = id, "All waiters left, cancelling computation");
                flight.cancel.cancel();
                entry.phase = Phase::Idle;
            }
        }
    }

    fn stale_fallback(&self, key: &K) -> Option<V> {
        let now = Instant::now();
        let mut entries = self.lock();
        let entry = entries.peek_mut(key)?;
        entry.settle(now, self.config.stale_retention());
        let value = entry.stale.as_ref().map(|stale| stale.value.clone())?;
        Counters::bump(&self.counters.stale_hits, "aq_cache_stale_hits_total");
        Some(value)
    }

    fn evict_over_capacity(&self, entries: &mut LruCache<K, Entry<V, E>>) {
        while entries.len() > self.config.max_entries {
            let victim = entries
                .iter()
                .rev()
                .find(|(_, entry)| !entry.is_pending())
                .map(|(key, _)| key.clone());
            match victim {
                Some(key) => {
                    entries.pop(&key);
                    Counters::bump(&self.counters.evictions, "aq_cache_evictions_total");
                }
                None => break,
            }
        }
    }
}

/// Drops its claim on a pending computation when the waiting caller goes away.
struct Attachment<K, V, E>
where
    K: Hash + Eq + Clone + fmt::Debug,
    V: Clone,
    E: Clone,
{
    inner: Arc<Inner<K, V, E>>,
    key: K,
    id: u64,
}

impl<K, V, E> Drop for Attachment<K, V, E>
where
    K: Hash + Eq + Clone + fmt::Debug,
    V: Clone,
    E: Clone,
{
    fn drop(&mut self) {
        self.inner.detach(&self.key, self.id);
    }
}

/// Coalescing cache of computed values keyed by `K`.
///
/// At most one computation per key is in flight. Concurrent callers for
/// that key wait on it; a caller that gives up only detaches itself.
pub struct AggregationCache<K: Hash + Eq, V, E> {
    inner: Arc<Inner<K, V, E>>,
}

impl<K: Hash + Eq, V, E> Clone for AggregationCache<K, V, E> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K, V, E> AggregationCache<K, V, E>
where
    K: Hash + Eq + Clone + fmt::Debug + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    pub fn new(config: CacheConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                entries: Mutex::new(LruCache::unbounded()),
                next_flight: AtomicU64::new(1),
                counters: Counters::default(),
            }),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.inner.config
    }

    /// Return the cached value for `key`, or compute it once for everyone
    /// asking concurrently.
    ///
    /// `compute` receives a token that fires when every waiting caller has
    /// given up. `cancel` only withdraws this caller. With `stale_allowed`
    /// an expired value is returned instead of recomputing, and is also the
    /// fallback when the computation fails.
    pub async fn get_or_compute<F, Fut>(
        &self,
        key: K,
        stale_allowed: bool,
        cancel: &CancellationToken,
        compute: F,
    ) -> Result<Lookup<V>, CacheError<E>>
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = Result<V, E>> + Send + 'static,
    {
        if cancel.is_cancelled() {
            return Err(CacheError::Cancelled);
        }

        let (id, mut rx, status) = match self.inner.begin(&key, stale_allowed) {
            Begin::Done(lookup) => return Ok(lookup),
            Begin::Replay(error) => return Err(CacheError::Compute(error)),
            Begin::Attach { id, rx } => {
                debug!(key = ?key, flight = id, "Attached to in-flight computation");
                (id, rx, CacheStatus::Coalesced)
            }
            Begin::Start { id, tx, rx, token } => {
                debug!(key = ?key, flight = id, "Starting computation");
                self.launch(key.clone(), id, tx, token.clone(), compute(token));
                (id, rx, CacheStatus::Miss)
            }
        };
        let _attachment = Attachment {
            inner: Arc::clone(&self.inner),
            key: key.clone(),
            id,
        };

        let outcome = tokio::select! {
            _ = cancel.cancelled() => return Err(CacheError::Cancelled),
            changed = rx.wait_for(Option::is_some) => changed.map(|outcome| (*outcome).clone()),
        };

        let error = match outcome {
            Ok(Some(Ok(value))) => return Ok(Lookup { value, status }),
            Ok(Some(Err(error))) => CacheError::Compute(error),
            Ok(None) | Err(_) => CacheError::Abandoned,
        };
        if stale_allowed {
            if let Some(value) = self.inner.stale_fallback(&key) {
                warn!(key = ?key, "Computation failed, serving stale value");
                return Ok(Lookup {
                    value,
                    status: CacheStatus::Stale,
                });
            }
        }
        Err(error)
    }

    fn launch<Fut>(
        &self,
        key: K,
        id: u64,
        tx: watch::Sender<Outcome<V, E>>,
        token: CancellationToken,
        computation: Fut,
    ) where
        Fut: Future<Output = Result<V, E>> + Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            let result = tokio::select! {
                result = computation => result,
                _ = token.cancelled() => {
                    debug!(key = ?key, flight = id, "Computation cancelled");
                    return;
                }
            };
            inner.complete(&key, id, &result);
            // Nobody may be listening any more.
            let _ = tx.send(Some(result));
        });
    }

    /// State of `key`, or `None` when absent.
    pub fn state(&self, key: &K) -> Option<EntryState> {
        let entries = self.inner.lock();
        entries
            .peek(key)
            .and_then(|entry| entry.state_at(Instant::now(), self.inner.config.stale_retention()))
    }

    /// Drop entries with nothing left to serve. Returns how many went.
    pub fn purge(&self) -> usize {
        let now = Instant::now();
        let retention = self.inner.config.stale_retention();
        let mut entries = self.inner.lock();
        let dead: Vec<K> = entries
            .iter_mut()
            .filter_map(|(key, entry)| {
                entry.settle(now, retention);
                entry.is_dead().then(|| key.clone())
            })
            .collect();
        for key in &dead {
            entries.pop(key);
        }
        if !dead.is_empty() {
            debug!(purged = dead.len(), remaining = entries.len(), "Purged cache entries");
        }
        dead.len()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        let counters = &self.inner.counters;
        CacheStats {
            hits: counters.hits.load(Ordering::Relaxed),
            misses: counters.misses.load(Ordering::Relaxed),
            coalesced: counters.coalesced.load(Ordering::Relaxed),
            stale_hits: counters.stale_hits.load(Ordering::Relaxed),
            cached_failures: counters.cached_failures.load(Ordering::Relaxed),
            evictions: counters.evictions.load(Ordering::Relaxed),
            entries: self.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::future::join_all;
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::Notify;

    type TestCache = AggregationCache<String, u32, String>;

    fn cache() -> TestCache {
        AggregationCache::new(CacheConfig {
            ready_ttl_secs: 60,
            failed_ttl_secs: 10,
            stale_retention_secs: 300,
            max_entries: 16,
        })
    }

    async fn fetch(cache: &TestCache, key: &str, stale: bool, value: u32) -> Lookup<u32> {
        cache
            .get_or_compute(key.to_string(), stale, &CancellationToken::new(), move |_| async move {
                Ok(value)
            })
            .await
            .unwrap()
    }

    // ============================================================================
    // Single flight
    // ============================================================================

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_callers_share_one_computation() {
        let cache = cache();
        let runs = Arc::new(AtomicUsize::new(0));

        let calls = (0..10).map(|_| {
            let cache = cache.clone();
            let runs = Arc::clone(&runs);
            async move {
                cache
                    .get_or_compute("k".to_string(), false, &CancellationToken::new(), move |_| async move {
                        runs.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(100)).await;
                        Ok(7)
                    })
                    .await
                    .unwrap()
            }
        });
        let lookups = join_all(calls).await;

        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert!(lookups.iter().all(|l| l.value == 7));
        let misses = lookups.iter().filter(|l| l.status == CacheStatus::Miss).count();
        assert_eq!(misses, 1);
        let stats = cache.stats();
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.coalesced, 9);
        assert_eq!(cache.state(&"k".to_string()), Some(EntryState::Ready));
    }

    #[tokio::test(start_paused = true)]
    async fn test_other_keys_do_not_wait() {
        let cache = cache();
        let gate = Arc::new(Notify::new());

        let blocked = {
            let cache = cache.clone();
            let gate = Arc::clone(&gate);
            tokio::spawn(async move {
                cache
                    .get_or_compute("slow".to_string(), false, &CancellationToken::new(), move |_| async move {
                        gate.notified().await;
                        Ok(1)
                    })
                    .await
            })
        };
        tokio::task::yield_now().await;

        let other = fetch(&cache, "fast", false, 2).await;
        assert_eq!(other.value, 2);
        assert_eq!(cache.state(&"slow".to_string()), Some(EntryState::Pending));

        gate.notify_one();
        assert_eq!(blocked.await.unwrap().unwrap().value, 1);
    }

    // ============================================================================
    // Lifetimes
    // ============================================================================

    #[tokio::test(start_paused = true)]
    async fn test_fresh_entry_is_a_hit() {
        let cache = cache();
        assert_eq!(fetch(&cache, "k", false, 1).await.status, CacheStatus::Miss);
        let again = fetch(&cache, "k", false, 2).await;
        assert_eq!(again.status, CacheStatus::Hit);
        assert_eq!(again.value, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_entry_recomputed_without_stale() {
        let cache = cache();
        fetch(&cache, "k", false, 1).await;
        tokio::time::advance(Duration::from_secs(61)).await;
        assert_eq!(cache.state(&"k".to_string()), Some(EntryState::Expired));

        let lookup = fetch(&cache, "k", false, 2).await;
        assert_eq!(lookup.status, CacheStatus::Miss);
        assert_eq!(lookup.value, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_entry_served_when_stale_allowed() {
        let cache = cache();
        fetch(&cache, "k", false, 1).await;
        tokio::time::advance(Duration::from_secs(61)).await;

        let lookup = fetch(&cache, "k", true, 2).await;
        assert!(lookup.is_stale());
        assert_eq!(lookup.value, 1);
        assert_eq!(cache.stats().stale_hits, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_value_dropped_after_retention() {
        let cache = cache();
        fetch(&cache, "k", false, 1).await;
        tokio::time::advance(Duration::from_secs(61 + 300)).await;

        assert_eq!(cache.state(&"k".to_string()), None);
        let lookup = fetch(&cache, "k", true, 2).await;
        assert_eq!(lookup.status, CacheStatus::Miss);
        assert_eq!(lookup.value, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_replayed_until_failed_ttl() {
        let cache = cache();
        let runs = Arc::new(AtomicUsize::new(0));
        let failing = |runs: Arc<AtomicUsize>| {
            move |_: CancellationToken| async move {
                runs.fetch_add(1, Ordering::SeqCst);
                Err::<u32, _>("provider down".to_string())
            }
        };
        let token = CancellationToken::new();

        let first = cache
            .get_or_compute("k".to_string(), false, &token, failing(Arc::clone(&runs)))
            .await;
        assert_eq!(first, Err(CacheError::Compute("provider down".to_string())));
        let replay = cache
            .get_or_compute("k".to_string(), false, &token, failing(Arc::clone(&runs)))
            .await;
        assert_eq!(replay, Err(CacheError::Compute("provider down".to_string())));
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(cache.state(&"k".to_string()), Some(EntryState::Failed));
        assert_eq!(cache.stats().cached_failures, 1);

        tokio::time::advance(Duration::from_secs(11)).await;
        let retried = fetch(&cache, "k", false, 5).await;
        assert_eq!(retried.value, 5);
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_fallback_when_recompute_fails() {
        let cache = cache();
        let token = CancellationToken::new();
        fetch(&cache, "k", false, 1).await;
        tokio::time::advance(Duration::from_secs(61)).await;

        let failed = cache
            .get_or_compute("k".to_string(), false, &token, |_| async {
                Err::<u32, _>("boom".to_string())
            })
            .await;
        assert!(failed.is_err());

        let lookup = cache
            .get_or_compute("k".to_string(), true, &token, |_| async {
                Err::<u32, _>("still down".to_string())
            })
            .await
            .unwrap();
        assert!(lookup.is_stale());
        assert_eq!(lookup.value, 1);
    }

    // ============================================================================
    // Cancellation
    // ============================================================================

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_waiter_does_not_abort_others() {
        let cache = cache();
        let runs = Arc::new(AtomicUsize::new(0));
        let leaving = CancellationToken::new();

        let compute = |runs: Arc<AtomicUsize>| {
            move |token: CancellationToken| async move {
                runs.fetch_add(1, Ordering::SeqCst);
                tokio::select! {
                    _ = tokio::time::sleep(Duration::from_secs(1)) => Ok(3),
                    _ = token.cancelled() => Err("cancelled".to_string()),
                }
            }
        };

        let staying = {
            let cache = cache.clone();
            let runs = Arc::clone(&runs);
            tokio::spawn(async move {
                cache
                    .get_or_compute("k".to_string(), false, &CancellationToken::new(), compute(runs))
                    .await
            })
        };
        let quitter = {
            let cache = cache.clone();
            let runs = Arc::clone(&runs);
            let leaving = leaving.clone();
            tokio::spawn(async move {
                cache
                    .get_or_compute("k".to_string(), false, &leaving, compute(runs))
                    .await
            })
        };

        tokio::time::sleep(Duration::from_millis(100)).await;
        leaving.cancel();
        assert_eq!(quitter.await.unwrap(), Err(CacheError::Cancelled));

        let lookup = staying.await.unwrap().unwrap();
        assert_eq!(lookup.value, 3);
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_last_waiter_leaving_cancels_computation() {
        let cache = cache();
        let token = CancellationToken::new();
        let flight_token = Arc::new(Mutex::new(None));

        let waiter = {
            let cache = cache.clone();
            let token = token.clone();
            let slot = Arc::clone(&flight_token);
            tokio::spawn(async move {
                cache
                    .get_or_compute("k".to_string(), false, &token, move |flight: CancellationToken| {
                        *slot.lock().unwrap() = Some(flight.clone());
                        async move {
                            flight.cancelled().await;
                            Ok(0)
                        }
                    })
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(cache.state(&"k".to_string()), Some(EntryState::Pending));

        token.cancel();
        assert_eq!(waiter.await.unwrap(), Err(CacheError::Cancelled));
        let flight = flight_token.lock().unwrap().clone().unwrap();
        assert!(flight.is_cancelled());
        assert_eq!(cache.state(&"k".to_string()), None);

        // The next caller starts over.
        assert_eq!(fetch(&cache, "k", false, 9).await.status, CacheStatus::Miss);
    }

    #[tokio::test]
    async fn test_already_cancelled_caller_returns_immediately() {
        let cache = cache();
        let token = CancellationToken::new();
        token.cancel();
        let result = cache
            .get_or_compute("k".to_string(), false, &token, |_| async { Ok(1) })
            .await;
        tokio_test::assert_err!(result);
        assert!(cache.is_empty());
    }

    // ============================================================================
    // Housekeeping
    // ============================================================================

    #[tokio::test(start_paused = true)]
    async fn test_eviction_skips_pending_entries() {
        let cache: TestCache = AggregationCache::new(CacheConfig {
            max_entries: 2,
            ..CacheConfig::default()
        });
        let gate = Arc::new(Notify::new());
        let pending = {
            let cache = cache.clone();
            let gate = Arc::clone(&gate);
            tokio::spawn(async move {
                cache
                    .get_or_compute("pending".to_string(), false, &CancellationToken::new(), move |_| async move {
                        gate.notified().await;
                        Ok(0)
                    })
                    .await
            })
        };
        tokio::task::yield_now().await;

        fetch(&cache, "a", false, 1).await;
        fetch(&cache, "b", false, 2).await;

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.state(&"pending".to_string()), Some(EntryState::Pending));
        assert_eq!(cache.state(&"a".to_string()), None);
        assert_eq!(cache.stats().evictions, 1);

        gate.notify_one();
        tokio_test::assert_ok!(pending.await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_purge_drops_only_dead_entries() {
        let cache = cache();
        fetch(&cache, "old", false, 1).await;
        tokio::time::advance(Duration::from_secs(400)).await;
        fetch(&cache, "new", false, 2).await;

        assert_eq!(cache.purge(), 1);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.state(&"new".to_string()), Some(EntryState::Ready));
    }

    #[test]
    fn test_hit_rate() {
        let stats = CacheStats {
            hits: 3,
            misses: 1,
            ..Default::default()
        };
        assert_eq!(stats.hit_rate(), 75.0);
        assert_eq!(CacheStats::default().hit_rate(), 0.0);
    }
}
