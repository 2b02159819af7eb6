//! Single-flight coordination per request key.
//!
//! Each key moves through `Absent → InFlight → (Cached | Absent)`:
//!
//! * [`Coordinator::acquire`] returns the cached value, makes the caller the
//!   leader (it must compute, then hand its [`Flight`] back to
//!   [`Coordinator::release`]), or makes it a follower that waits for the
//!   current leader.
//! * [`Coordinator::release`] publishes a successful value to the cache
//!   before removing the in-flight entry, so "cached" always implies
//!   "no longer in flight".
//! * The [`Flight`] owns the in-flight entry. Dropping it (normally inside
//!   `release`, otherwise on cancellation) removes the entry.
//! * Removing the entry drops its watch sender, which wakes every follower at
//!   once. Followers then call `acquire` again: after a cached success they
//!   get the value, after a failure (never cached) or with caching disabled
//!   they contend to lead the next attempt.
use std::{
    fmt,
    sync::{
        Arc,
        atomic::{AtomicU64, AtomicUsize, Ordering},
    },
    time::Duration,
};

use scc::HashMap;
use tokio::sync::watch;

use super::{cache::ResultCache, error::GatewayError, resolver::RequestKey};
use crate::metrics;

/// Outcome of [`Coordinator::acquire`].
#[derive(Debug)]
pub enum Acquire {
    /// A previous leader stored this value
    Cached(Arc<str>),
    /// Caller is the leader and must compute, then release
    Leader(Flight),
    /// Another leader is computing; wait, then acquire again
    Follower(Waiter),
}

/// In-flight keys with a live count for the gauge.
#[derive(Default)]
struct InFlight {
    entries: HashMap<RequestKey, watch::Sender<()>>,
    count: AtomicUsize,
}

impl InFlight {
    async fn insert(&self, key: RequestKey, leader_done: watch::Sender<()>) -> bool {
        let inserted = self.entries.insert_async(key, leader_done).await.is_ok();
        if inserted {
            let count = self.count.fetch_add(1, Ordering::AcqRel) + 1;
            metrics::set_in_flight(count);
        }
        inserted
    }

    fn remove(&self, key: &RequestKey) -> bool {
        // Dropping the removed sender is the broadcast wake.
        let removed = self.entries.remove_sync(key).is_some();
        if removed {
            let count = self.count.fetch_sub(1, Ordering::AcqRel) - 1;
            metrics::set_in_flight(count);
        }
        removed
    }

    fn len(&self) -> usize {
        self.count.load(Ordering::Acquire)
    }
}

/// Leadership token for one in-flight key.
///
/// The token owns the in-flight entry: dropping it (after
/// [`Coordinator::release`], or when the leading future is cancelled) removes
/// the entry and wakes every follower, exactly once.
#[must_use = "dropping a flight abandons the computation and wakes followers"]
pub struct Flight {
    key: RequestKey,
    in_flight: Arc<InFlight>,
}

impl Flight {
    pub fn key(&self) -> &RequestKey {
        &self.key
    }
}

impl Drop for Flight {
    fn drop(&mut self) {
        if !self.in_flight.remove(&self.key) {
            tracing::warn!(key = %self.key, "Released a flight that was not in flight");
        }
    }
}

impl fmt::Debug for Flight {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Flight").field("key", &self.key).finish()
    }
}

/// Handle a follower uses to wait for the current leader.
#[derive(Debug)]
pub struct Waiter {
    leader_done: watch::Receiver<()>,
}

impl Waiter {
    /// Wait until the leader releases its flight.
    ///
    /// # Errors
    /// [`GatewayError::Timeout`] if `timeout` elapses first. The leader keeps
    /// running and releases on its own.
    pub async fn wait(mut self, timeout: Option<Duration>) -> Result<(), GatewayError> {
        // The sender never publishes; it is dropped when the flight is released.
        let closed = self.leader_done.changed();
        match timeout {
            Some(limit) => tokio::time::timeout(limit, closed)
                .await
                .map(|_| ())
                .map_err(|_| GatewayError::Timeout(limit)),
            None => {
                let _ = closed.await;
                Ok(())
            }
        }
    }
}

/// Counters describing coordinator activity.
#[derive(Debug, Default)]
pub struct CoordinatorStats {
    leaders: AtomicU64,
    followers: AtomicU64,
    cache_hits: AtomicU64,
}

impl CoordinatorStats {
    pub fn leaders(&self) -> u64 {
        self.leaders.load(Ordering::Relaxed)
    }

    pub fn followers(&self) -> u64 {
        self.followers.load(Ordering::Relaxed)
    }

    pub fn cache_hits(&self) -> u64 {
        self.cache_hits.load(Ordering::Relaxed)
    }
}

/// Tracks in-flight keys and (optionally) memoized results.
pub struct Coordinator {
    in_flight: Arc<InFlight>,
    cache: Option<ResultCache>,
    stats: CoordinatorStats,
}

impl Coordinator {
    /// Create a coordinator; `cache_enabled` decides whether successful
    /// results are memoized.
    pub fn new(cache_enabled: bool) -> Self {
        Self {
            in_flight: Arc::new(InFlight::default()),
            cache: cache_enabled.then(ResultCache::new),
            stats: CoordinatorStats::default(),
        }
    }

    /// Return the cached value, or become leader or follower for `key`.
    ///
    /// Cancel safe: once the key is inserted, the entry is owned by a
    /// [`Flight`] before the next await point.
    pub async fn acquire(&self, key: &RequestKey) -> Acquire {
        loop {
            if let Some(value) = self.cached(key).await {
                self.record_cache_hit(key);
                return Acquire::Cached(value);
            }

            let (leader_done, _) = watch::channel(());
            if self.in_flight.insert(key.clone(), leader_done).await {
                let flight = Flight {
                    key: key.clone(),
                    in_flight: Arc::clone(&self.in_flight),
                };

                // A leader may have published between the cache miss and the insert.
                if let Some(value) = self.cached(key).await {
                    drop(flight);
                    self.record_cache_hit(key);
                    return Acquire::Cached(value);
                }

                self.stats.leaders.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(key = %key, "Leading computation");
                return Acquire::Leader(flight);
            }

            let subscribed = self
                .in_flight
                .entries
                .read_async(key, |_, leader_done| leader_done.subscribe())
                .await;
            if let Some(leader_done) = subscribed {
                self.stats.followers.fetch_add(1, Ordering::Relaxed);
                metrics::increment_coalesced();
                tracing::debug!(key = %key, "Following in-flight computation");
                return Acquire::Follower(Waiter { leader_done });
            }
            // The leader finished between our insert attempt and the read; start over.
        }
    }

    /// End a leadership. A successful `value` is cached (if enabled) before
    /// the key leaves the in-flight set; all followers are woken.
    pub async fn release(&self, flight: Flight, value: Option<&Arc<str>>) {
        if let (Some(cache), Some(value)) = (&self.cache, value) {
            cache.put_if_absent(flight.key.clone(), value.clone()).await;
        }
        drop(flight);
    }

    /// Cached value for `key`, if caching is enabled and a value exists.
    pub async fn cached(&self, key: &RequestKey) -> Option<Arc<str>> {
        match &self.cache {
            Some(cache) => cache.get(key).await,
            None => None,
        }
    }

    pub async fn is_in_flight(&self, key: &RequestKey) -> bool {
        self.in_flight.entries.contains_async(key).await
    }

    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }

    pub fn cache_enabled(&self) -> bool {
        self.cache.is_some()
    }

    pub fn cache_len(&self) -> usize {
        self.cache.as_ref().map_or(0, ResultCache::len)
    }

    pub fn stats(&self) -> &CoordinatorStats {
        &self.stats
    }

    fn record_cache_hit(&self, key: &RequestKey) {
        self.stats.cache_hits.fetch_add(1, Ordering::Relaxed);
        metrics::increment_cache_hits();
        tracing::debug!(key = %key, "Serving cached result");
    }
}
