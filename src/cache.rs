//! The bounded pool of live producer connections.
//!
//! Maps a [`DestinationKey`] to its [`Connection`], with recency-based
//! capacity eviction and a periodic TTL sweep. One instance is shared by a
//! dispatcher for its whole lifetime; it is constructed explicitly and
//! injected, never a process-wide singleton.

use crate::config::CacheConfig;
use crate::connection::Connection;
use crate::route::DestinationKey;
use crate::transport::Transport;
use crate::{Error, Result};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

pub struct ConnectionCache {
    capacity: usize,
    ttl: Duration,
    inner: Arc<Mutex<CacheInner>>,
    sweeper: std::sync::Mutex<Option<Sweeper>>,
}

struct Sweeper {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

struct CacheInner {
    closed: bool,
    entries: HashMap<DestinationKey, CacheEntry>,
    // Front is most recently touched.
    recency: VecDeque<DestinationKey>,
}

struct CacheEntry {
    conn: Arc<Connection>,
    expires_at: Instant,
}

impl ConnectionCache {
    /// Creates the cache and starts its TTL sweep task. Must be called from
    /// within a tokio runtime.
    pub fn new(config: &CacheConfig) -> Self {
        let inner = Arc::new(Mutex::new(CacheInner {
            closed: false,
            entries: HashMap::new(),
            recency: VecDeque::new(),
        }));

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(sweep_task(
            inner.clone(),
            Duration::from_secs(config.sweep_interval_secs),
            shutdown_rx,
        ));

        Self {
            capacity: config.capacity,
            ttl: Duration::from_secs(config.ttl_secs),
            inner,
            sweeper: std::sync::Mutex::new(Some(Sweeper {
                shutdown: shutdown_tx,
                handle,
            })),
        }
    }

    /// Returns the live connection for `key`, creating and connecting one
    /// if absent.
    ///
    /// A hit refreshes the entry's recency and TTL. A miss builds the
    /// connection via `make`, inserts it, evicts the least-recently-touched
    /// entry if that pushed the cache over capacity, then performs the
    /// connect handshake. A connect failure removes the fresh entry again
    /// so a half-initialized connection is never left cached.
    pub async fn get_or_create<F>(
        &self,
        key: &DestinationKey,
        transport: &dyn Transport,
        make: F,
    ) -> Result<Arc<Connection>>
    where
        F: FnOnce() -> Result<Connection>,
    {
        let mut inner = self.inner.lock().await;
        if inner.closed {
            return Err(Error::CacheClosed);
        }

        if let Some(entry) = inner.entries.get_mut(key) {
            entry.expires_at = Instant::now() + self.ttl;
            let conn = entry.conn.clone();
            inner.touch(key);
            return Ok(conn);
        }

        let conn = Arc::new(make()?);
        inner.entries.insert(
            key.clone(),
            CacheEntry {
                conn: conn.clone(),
                expires_at: Instant::now() + self.ttl,
            },
        );
        inner.recency.push_front(key.clone());

        if self.capacity != 0 && inner.entries.len() > self.capacity {
            if let Some(oldest) = inner.recency.pop_back() {
                debug!(destination = %oldest, "evicting least recently used connection");
                inner.remove_and_close(&oldest).await;
            }
        }

        if let Err(e) = conn.connect(transport) {
            inner.entries.remove(key);
            inner.recency.retain(|k| k != key);
            // A transport that already reports Connect is passed through
            // verbatim rather than wrapped a second time.
            return Err(match e {
                e @ Error::Connect { .. } => e,
                e => Error::Connect {
                    destination: key.to_string(),
                    message: e.to_string(),
                },
            });
        }

        Ok(conn)
    }

    pub async fn contains(&self, key: &DestinationKey) -> bool {
        self.inner.lock().await.entries.contains_key(key)
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.lock().await.entries.is_empty()
    }

    /// Closes and removes the connection for `key`, if cached.
    pub async fn evict(&self, key: &DestinationKey) {
        let mut inner = self.inner.lock().await;
        inner.recency.retain(|k| k != key);
        inner.remove_and_close(key).await;
    }

    /// Snapshot of the live destinations and their connections.
    pub async fn connections(&self) -> Vec<(DestinationKey, Arc<Connection>)> {
        self.inner
            .lock()
            .await
            .entries
            .iter()
            .map(|(key, entry)| (key.clone(), entry.conn.clone()))
            .collect()
    }

    /// Stops the sweep task and closes every cached connection. The cache
    /// rejects lookups afterwards.
    pub async fn close(&self) {
        let sweeper = self
            .sweeper
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .take();
        if let Some(sweeper) = sweeper {
            let _ = sweeper.shutdown.send(true);
            if let Err(e) = sweeper.handle.await {
                warn!(error = %e, "sweep task failed");
            }
        }

        let mut inner = self.inner.lock().await;
        inner.closed = true;
        inner.recency.clear();
        let entries = std::mem::take(&mut inner.entries);
        for (key, entry) in entries {
            debug!(destination = %key, "closing cached connection");
            entry.conn.close().await;
        }
    }
}

impl CacheInner {
    fn touch(&mut self, key: &DestinationKey) {
        if let Some(pos) = self.recency.iter().position(|k| k == key) {
            if pos != 0 {
                let key = self.recency.remove(pos).unwrap_or_else(|| key.clone());
                self.recency.push_front(key);
            }
        }
    }

    async fn remove_and_close(&mut self, key: &DestinationKey) {
        if let Some(entry) = self.entries.remove(key) {
            entry.conn.close().await;
        }
    }
}

async fn sweep_task(
    inner: Arc<Mutex<CacheInner>>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = ticker.tick() => sweep_expired(&inner).await,
            _ = shutdown.changed() => break,
        }
    }
    debug!("stopped cache sweep task");
}

async fn sweep_expired(inner: &Mutex<CacheInner>) {
    let mut inner = inner.lock().await;
    let now = Instant::now();
    let expired: Vec<DestinationKey> = inner
        .entries
        .iter()
        .filter(|(_, entry)| entry.expires_at <= now)
        .map(|(key, _)| key.clone())
        .collect();

    for key in expired {
        info!(destination = %key, "evicting expired connection");
        inner.recency.retain(|k| k != &key);
        inner.remove_and_close(&key).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MockTransport;

    fn cache_config(capacity: usize, ttl_secs: u64, sweep_secs: u64) -> CacheConfig {
        CacheConfig {
            capacity,
            ttl_secs,
            sweep_interval_secs: sweep_secs,
        }
    }

    fn make_conn(key: &DestinationKey) -> Result<Connection> {
        Ok(Connection::new(
            key.cluster.clone(),
            "broker:9092",
            key.topic.clone(),
        ))
    }

    #[tokio::test]
    async fn test_hit_returns_same_connection() {
        let transport = MockTransport::acking();
        let cache = ConnectionCache::new(&cache_config(10, 600, 600));
        let key = DestinationKey::new("eu-1", "events");

        let a = cache
            .get_or_create(&key, &transport, || make_conn(&key))
            .await
            .unwrap();
        let b = cache
            .get_or_create(&key, &transport, || make_conn(&key))
            .await
            .unwrap();

        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(transport.connect_count(), 1);
        cache.close().await;
    }

    #[tokio::test]
    async fn test_different_topic_gets_distinct_connection() {
        let transport = MockTransport::acking();
        let cache = ConnectionCache::new(&cache_config(10, 600, 600));
        let a_key = DestinationKey::new("eu-1", "auth-events");
        let b_key = DestinationKey::new("eu-1", "billing-events");

        let a = cache
            .get_or_create(&a_key, &transport, || make_conn(&a_key))
            .await
            .unwrap();
        let b = cache
            .get_or_create(&b_key, &transport, || make_conn(&b_key))
            .await
            .unwrap();

        assert!(!Arc::ptr_eq(&a, &b));
        assert_eq!(cache.len().await, 2);
        cache.close().await;
    }

    #[tokio::test]
    async fn test_capacity_evicts_least_recently_used() {
        let transport = MockTransport::acking();
        let cache = ConnectionCache::new(&cache_config(1, 600, 600));
        let a_key = DestinationKey::new("eu-1", "a");
        let b_key = DestinationKey::new("eu-1", "b");

        let a = cache
            .get_or_create(&a_key, &transport, || make_conn(&a_key))
            .await
            .unwrap();
        cache
            .get_or_create(&b_key, &transport, || make_conn(&b_key))
            .await
            .unwrap();

        // A was evicted and its producer shut down.
        assert!(!cache.contains(&a_key).await);
        assert!(cache.contains(&b_key).await);
        assert_eq!(cache.len().await, 1);
        assert_eq!(transport.close_count(), 1);

        // Requesting A again builds a brand-new connection.
        let a2 = cache
            .get_or_create(&a_key, &transport, || make_conn(&a_key))
            .await
            .unwrap();
        assert!(!Arc::ptr_eq(&a, &a2));
        cache.close().await;
    }

    #[tokio::test]
    async fn test_recency_refresh_protects_entry_from_eviction() {
        let transport = MockTransport::acking();
        let cache = ConnectionCache::new(&cache_config(2, 600, 600));
        let a_key = DestinationKey::new("eu-1", "a");
        let b_key = DestinationKey::new("eu-1", "b");
        let c_key = DestinationKey::new("eu-1", "c");

        cache
            .get_or_create(&a_key, &transport, || make_conn(&a_key))
            .await
            .unwrap();
        cache
            .get_or_create(&b_key, &transport, || make_conn(&b_key))
            .await
            .unwrap();
        // Touch A so B becomes the eviction candidate.
        cache
            .get_or_create(&a_key, &transport, || make_conn(&a_key))
            .await
            .unwrap();
        cache
            .get_or_create(&c_key, &transport, || make_conn(&c_key))
            .await
            .unwrap();

        assert!(cache.contains(&a_key).await);
        assert!(!cache.contains(&b_key).await);
        assert!(cache.contains(&c_key).await);
        cache.close().await;
    }

    #[tokio::test]
    async fn test_connect_failure_rolls_back_entry() {
        let transport = MockTransport::acking();
        transport.set_fail_connect(true);
        let cache = ConnectionCache::new(&cache_config(10, 600, 600));
        let key = DestinationKey::new("eu-1", "events");

        let result = cache
            .get_or_create(&key, &transport, || make_conn(&key))
            .await;

        let Err(err) = result else {
            panic!("connect should have failed");
        };
        assert!(matches!(err, Error::Connect { .. }));
        // Not wrapped twice when the transport itself reported Connect.
        assert_eq!(err.to_string().matches("Connect error").count(), 1);
        assert!(!cache.contains(&key).await);
        assert!(cache.is_empty().await);

        // The destination is usable again once connects succeed.
        transport.set_fail_connect(false);
        cache
            .get_or_create(&key, &transport, || make_conn(&key))
            .await
            .unwrap();
        assert!(cache.contains(&key).await);
        cache.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_ttl_sweep_evicts_idle_entry() {
        let transport = MockTransport::acking();
        let cache = ConnectionCache::new(&cache_config(10, 1, 1));
        let key = DestinationKey::new("eu-1", "events");

        cache
            .get_or_create(&key, &transport, || make_conn(&key))
            .await
            .unwrap();
        assert!(cache.contains(&key).await);

        // Well past the TTL with zero capacity pressure.
        tokio::time::sleep(Duration::from_secs(5)).await;

        assert!(!cache.contains(&key).await);
        assert_eq!(transport.close_count(), 1);
        cache.close().await;
    }

    #[tokio::test]
    async fn test_closed_cache_rejects_lookups() {
        let transport = MockTransport::acking();
        let cache = ConnectionCache::new(&cache_config(10, 600, 600));
        let key = DestinationKey::new("eu-1", "events");

        cache
            .get_or_create(&key, &transport, || make_conn(&key))
            .await
            .unwrap();
        cache.close().await;

        let result = cache
            .get_or_create(&key, &transport, || make_conn(&key))
            .await;
        assert!(matches!(result, Err(Error::CacheClosed)));
        assert_eq!(transport.close_count(), 1);
    }

    #[tokio::test]
    async fn test_explicit_evict_closes_connection() {
        let transport = MockTransport::acking();
        let cache = ConnectionCache::new(&cache_config(10, 600, 600));
        let key = DestinationKey::new("eu-1", "events");

        cache
            .get_or_create(&key, &transport, || make_conn(&key))
            .await
            .unwrap();
        cache.evict(&key).await;

        assert!(!cache.contains(&key).await);
        assert_eq!(transport.close_count(), 1);
        cache.close().await;
    }
}
