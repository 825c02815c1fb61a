// Cache-aside layer with single-flight deduplication.
//
// The storage engine is deliberately generic: anything that can get/set a
// string with a TTL works. Values cross the cache as JSON so the layer stays
// agnostic of what each endpoint produces. Producer failures are never
// cached; every waiter gets the error and the key stays absent so the next
// caller retries.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{Datelike, Local, Weekday};
use dashmap::DashMap;
use serde::{de::DeserializeOwned, Serialize};
use tokio::sync::broadcast;

use crate::error::GatewayError;

/// TTL for volatile per-episode source lookups.
pub const TTL_SOURCES: Duration = Duration::from_secs(600);
/// TTL for catalog listings and search pages.
pub const TTL_CATALOG: Duration = Duration::from_secs(3600);

/// TTL for per-title episode metadata. Upstreams update less often off-peak,
/// so weekend entries live twice as long.
pub fn episode_meta_ttl() -> Duration {
    episode_meta_ttl_for(Local::now().weekday())
}

fn episode_meta_ttl_for(weekday: Weekday) -> Duration {
    match weekday {
        Weekday::Sat | Weekday::Sun => Duration::from_secs(7200),
        _ => Duration::from_secs(1800),
    }
}

/// Build a cache key from a namespace and an ordered parameter tuple.
/// Parameter order is fixed by the caller, never sorted, so identical logical
/// requests always serialize to the same key across versions.
pub fn key_of(namespace: &str, parts: &[&str]) -> String {
    let mut key = String::from(namespace);
    for part in parts {
        key.push(':');
        key.push_str(part);
    }
    key
}

/// Generic key/value store with TTL. Keys are plain strings.
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, key: &str) -> anyhow::Result<Option<String>>;
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> anyhow::Result<()>;
}

struct MemoryEntry {
    value: String,
    inserted_at: Instant,
    ttl: Duration,
}

/// In-process store with lazy expiry on read. Entries are installed once and
/// never mutated in place.
#[derive(Default)]
pub struct MemoryStore {
    entries: DashMap<String, MemoryEntry>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CacheStore for MemoryStore {
    async fn get(&self, key: &str) -> anyhow::Result<Option<String>> {
        if let Some(entry) = self.entries.get(key) {
            if entry.inserted_at.elapsed() < entry.ttl {
                return Ok(Some(entry.value.clone()));
            }
        } else {
            return Ok(None);
        }
        // Expired: drop the read guard before removing.
        self.entries.remove(key);
        Ok(None)
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> anyhow::Result<()> {
        self.entries.insert(
            key.to_string(),
            MemoryEntry {
                value: value.to_string(),
                inserted_at: Instant::now(),
                ttl,
            },
        );
        Ok(())
    }
}

type FlightResult = Result<String, GatewayError>;
type FlightMap = HashMap<String, broadcast::Sender<FlightResult>>;

// The registry lock is synchronous and never held across an await, so a
// poisoned lock only means a panic elsewhere; the map itself is still valid.
fn lock_registry(registry: &Mutex<FlightMap>) -> MutexGuard<'_, FlightMap> {
    registry.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Registry entry for the one in-flight producer of a key. The leader either
/// calls [`Flight::complete`] with the outcome, or gets dropped (request
/// cancelled mid-produce), in which case `Drop` removes the key and closes
/// the channel so waiters stop waiting and elect a new leader.
struct Flight<'a> {
    registry: &'a Mutex<FlightMap>,
    key: Option<String>,
}

impl Flight<'_> {
    fn complete(mut self, payload: FlightResult) {
        if let Some(key) = self.key.take() {
            let tx = lock_registry(self.registry).remove(&key);
            if let Some(tx) = tx {
                let _ = tx.send(payload);
            }
        }
    }
}

impl Drop for Flight<'_> {
    fn drop(&mut self) {
        if let Some(key) = self.key.take() {
            lock_registry(self.registry).remove(&key);
        }
    }
}

/// Get-or-compute wrapper around a [`CacheStore`].
///
/// With no store configured, `fetch` degrades transparently to calling the
/// producer on every call: no memoization and no single-flight.
pub struct CacheAside {
    store: Option<Arc<dyn CacheStore>>,
    in_flight: Mutex<FlightMap>,
}

impl CacheAside {
    pub fn new(store: Arc<dyn CacheStore>) -> Self {
        Self {
            store: Some(store),
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    pub fn disabled() -> Self {
        Self {
            store: None,
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.store.is_some()
    }

    /// Look up `key`; on a hit return the stored value without invoking
    /// `producer`. On a miss, at most one concurrent producer runs per key
    /// process-wide; concurrent callers await that computation.
    pub async fn fetch<T, F, Fut>(
        &self,
        key: &str,
        ttl: Duration,
        producer: F,
    ) -> Result<T, GatewayError>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T, GatewayError>>,
    {
        let Some(store) = self.store.as_ref() else {
            return producer().await;
        };

        loop {
            match store.get(key).await {
                Ok(Some(raw)) => match serde_json::from_str::<T>(&raw) {
                    Ok(value) => {
                        tracing::debug!(key, "cache hit");
                        return Ok(value);
                    }
                    Err(e) => {
                        // A stale schema is treated as a miss, not a failure.
                        tracing::warn!(key, "discarding undecodable cache entry: {}", e);
                    }
                },
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(key, "cache store read failed: {}", e);
                }
            }

            // The registry guard must be released before any await below, or
            // the handler futures stop being `Send`.
            let rx = {
                let mut flights = lock_registry(&self.in_flight);
                if let Some(tx) = flights.get(key) {
                    Some(tx.subscribe())
                } else {
                    let (tx, _) = broadcast::channel(1);
                    flights.insert(key.to_string(), tx);
                    None
                }
            };

            let mut rx = match rx {
                Some(rx) => rx,
                None => {
                    let flight = Flight {
                        registry: &self.in_flight,
                        key: Some(key.to_string()),
                    };
                    return self.run_producer(store, key, ttl, flight, producer).await;
                }
            };

            tracing::debug!(key, "awaiting in-flight computation");
            match rx.recv().await {
                Ok(Ok(raw)) => {
                    return serde_json::from_str(&raw).map_err(|e| {
                        GatewayError::Cache(format!("in-flight value undecodable: {e}"))
                    })
                }
                Ok(Err(err)) => return Err(err),
                Err(_) => {
                    // The leader was dropped before finishing. Its flight is
                    // gone from the registry, so go around again and either
                    // become the new leader or read what it managed to cache.
                    tracing::debug!(key, "in-flight leader dropped, retrying");
                    continue;
                }
            }
        }
    }

    async fn run_producer<T, F, Fut>(
        &self,
        store: &Arc<dyn CacheStore>,
        key: &str,
        ttl: Duration,
        flight: Flight<'_>,
        producer: F,
    ) -> Result<T, GatewayError>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T, GatewayError>>,
    {
        let outcome = producer().await;

        let broadcast_payload: FlightResult = match &outcome {
            Ok(value) => match serde_json::to_string(value) {
                Ok(raw) => {
                    if let Err(e) = store.set(key, &raw, ttl).await {
                        tracing::warn!(key, "cache store write failed: {}", e);
                    }
                    Ok(raw)
                }
                Err(e) => Err(GatewayError::Cache(format!("unserializable value: {e}"))),
            },
            Err(err) => Err(err.clone()),
        };

        // Remove the flight before waking waiters: on success later arrivals
        // hit the freshly written entry, on failure they retry the producer.
        flight.complete(broadcast_payload);

        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn enabled_cache() -> Arc<CacheAside> {
        Arc::new(CacheAside::new(Arc::new(MemoryStore::new())))
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn single_flight_invokes_producer_once() {
        let cache = enabled_cache();
        let calls = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..16 {
            let cache = cache.clone();
            let calls = calls.clone();
            handles.push(tokio::spawn(async move {
                cache
                    .fetch("trending:1", Duration::from_secs(60), move || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        Ok::<_, GatewayError>("payload".to_string())
                    })
                    .await
            }));
        }

        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap(), "payload");
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn hit_within_ttl_then_reinvoke_after_expiry() {
        let cache = enabled_cache();
        let calls = Arc::new(AtomicUsize::new(0));

        for _ in 0..3 {
            let calls = calls.clone();
            let value: u32 = cache
                .fetch("counter", Duration::from_millis(200), move || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(7)
                })
                .await
                .unwrap();
            assert_eq!(value, 7);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_millis(250)).await;

        let calls2 = calls.clone();
        let _: u32 = cache
            .fetch("counter", Duration::from_millis(200), move || async move {
                calls2.fetch_add(1, Ordering::SeqCst);
                Ok(7)
            })
            .await
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn disabled_cache_invokes_producer_every_call() {
        let cache = CacheAside::disabled();
        let calls = Arc::new(AtomicUsize::new(0));

        for _ in 0..5 {
            let calls = calls.clone();
            let _: String = cache
                .fetch("anything", Duration::from_secs(60), move || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok("x".to_string())
                })
                .await
                .unwrap();
        }
        assert_eq!(calls.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn cancelled_leader_releases_its_flight() {
        let cache = enabled_cache();

        let leader = {
            let cache = cache.clone();
            tokio::spawn(async move {
                let _: Result<String, GatewayError> = cache
                    .fetch("stuck", Duration::from_secs(60), || async {
                        tokio::time::sleep(Duration::from_secs(30)).await;
                        Ok("never".to_string())
                    })
                    .await;
            })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        leader.abort();
        let _ = leader.await;

        let calls = Arc::new(AtomicUsize::new(0));
        let producer_calls = calls.clone();
        let value: String = tokio::time::timeout(
            Duration::from_secs(2),
            cache.fetch("stuck", Duration::from_secs(60), move || async move {
                producer_calls.fetch_add(1, Ordering::SeqCst);
                Ok("fresh".to_string())
            }),
        )
        .await
        .expect("abandoned flight must not block later callers")
        .unwrap();

        assert_eq!(value, "fresh");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn waiter_becomes_leader_when_the_first_is_dropped() {
        let cache = enabled_cache();

        let leader = {
            let cache = cache.clone();
            tokio::spawn(async move {
                let _: Result<String, GatewayError> = cache
                    .fetch("handover", Duration::from_secs(60), || async {
                        tokio::time::sleep(Duration::from_secs(30)).await;
                        Ok("never".to_string())
                    })
                    .await;
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        let waiter = {
            let cache = cache.clone();
            tokio::spawn(async move {
                cache
                    .fetch("handover", Duration::from_secs(60), || async {
                        Ok::<_, GatewayError>("takeover".to_string())
                    })
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        leader.abort();
        let _ = leader.await;

        let value = tokio::time::timeout(Duration::from_secs(2), waiter)
            .await
            .expect("waiter must be woken when the leader disappears")
            .unwrap()
            .unwrap();
        assert_eq!(value, "takeover");
    }

    #[tokio::test]
    async fn failures_are_not_cached() {
        let cache = enabled_cache();
        let calls = Arc::new(AtomicUsize::new(0));

        let calls1 = calls.clone();
        let first: Result<String, _> = cache
            .fetch("flaky", Duration::from_secs(60), move || async move {
                calls1.fetch_add(1, Ordering::SeqCst);
                Err(GatewayError::EmptyResult)
            })
            .await;
        assert!(first.is_err());

        let calls2 = calls.clone();
        let second: String = cache
            .fetch("flaky", Duration::from_secs(60), move || async move {
                calls2.fetch_add(1, Ordering::SeqCst);
                Ok("recovered".to_string())
            })
            .await
            .unwrap();
        assert_eq!(second, "recovered");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn key_order_is_fixed() {
        assert_eq!(
            key_of("hianime:search", &["naruto", "2"]),
            "hianime:search:naruto:2"
        );
        assert_ne!(
            key_of("hianime:search", &["2", "naruto"]),
            key_of("hianime:search", &["naruto", "2"])
        );
    }

    #[test]
    fn weekend_ttl_doubles() {
        assert_eq!(
            episode_meta_ttl_for(Weekday::Wed),
            Duration::from_secs(1800)
        );
        assert_eq!(
            episode_meta_ttl_for(Weekday::Sat),
            Duration::from_secs(7200)
        );
        assert_eq!(
            episode_meta_ttl_for(Weekday::Sun),
            Duration::from_secs(7200)
        );
    }
}
