//! Resolution cache
//!
//! Values produced by resolvers are cached under their resolved path with one
//! of two lifetimes:
//!
//! - **time-to-live**: shared by every request until the entry expires.
//!   Expiry is checked lazily when the entry is read.
//! - **per-request**: visible only to the request that produced it and
//!   dropped when that request finishes resolving.
//!
//! The cache also hands out per-key async locks so that concurrent
//! references to the same path invoke the resolver at most once.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::OwnedMutexGuard;
use tokio::time::Instant;

use crate::context::RequestId;
use crate::value::Value;

/// How long a resolver's output may be reused
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum CachePolicy {
    /// Reuse for a fixed number of seconds
    #[serde(rename = "TIME")]
    TimeToLive {
        #[serde(rename = "timeToLive")]
        seconds: u64,
    },
    /// Reuse only within the current request
    #[serde(rename = "REQUEST")]
    PerRequest,
}

impl CachePolicy {
    /// Time-to-live policy of `seconds`
    pub fn ttl_secs(seconds: u64) -> Self {
        CachePolicy::TimeToLive { seconds }
    }

    /// The time-to-live, if this is a time based policy
    pub fn ttl(&self) -> Option<Duration> {
        match self {
            CachePolicy::TimeToLive { seconds } => Some(Duration::from_secs(*seconds)),
            CachePolicy::PerRequest => None,
        }
    }
}

/// Cache key: the fully resolved path.
///
/// Segments are kept apart, so `["a", "b"]` and `["a/b"]` are different keys
/// even though they display the same way.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(Vec<String>);

impl CacheKey {
    pub fn new(path: Vec<String>) -> Self {
        CacheKey(path)
    }

    pub fn segments(&self) -> &[String] {
        &self.0
    }
}

impl From<&[&str]> for CacheKey {
    fn from(path: &[&str]) -> Self {
        CacheKey(path.iter().map(|s| s.to_string()).collect())
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.join("/"))
    }
}

/// Expiry used when `now + ttl` does not fit in an `Instant`
const FAR_FUTURE: Duration = Duration::from_secs(86400 * 365 * 30);

/// Single-flight lock key. Per-request keys carry their request so that
/// unrelated requests never wait on each other.
type LockKey = (Option<RequestId>, CacheKey);

#[derive(Debug, Clone)]
struct TimedEntry {
    value: Value,
    expires_at: Instant,
}

#[derive(Debug, Default)]
struct Tiers {
    timed: HashMap<CacheKey, TimedEntry>,
    per_request: HashMap<RequestId, HashMap<CacheKey, Value>>,
}

/// Process-wide store of resolver outputs
#[derive(Debug, Default)]
pub struct ResolutionCache {
    tiers: RwLock<Tiers>,
    locks: Mutex<HashMap<LockKey, Arc<tokio::sync::Mutex<()>>>>,
}

impl ResolutionCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, Tiers> {
        self.tiers.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Tiers> {
        self.tiers.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Look up a cached value for `request`.
    ///
    /// The request's own per-request entries are consulted first, then the
    /// time-to-live tier. A time-to-live entry is a hit only strictly before
    /// its expiry; an expired entry is evicted and reported as a miss.
    pub fn get(&self, key: &CacheKey, request: RequestId) -> Option<Value> {
        let now = Instant::now();
        {
            let tiers = self.read();
            if let Some(value) = tiers.per_request.get(&request).and_then(|e| e.get(key)) {
                log::trace!("cache hit (request {}): {}", request, key);
                return Some(value.clone());
            }
            match tiers.timed.get(key) {
                Some(entry) if now < entry.expires_at => {
                    log::trace!("cache hit: {}", key);
                    return Some(entry.value.clone());
                }
                Some(_) => {}
                None => return None,
            }
        }

        // Expired; re-check under the write lock since a writer may have
        // refreshed it in between.
        let mut tiers = self.write();
        match tiers.timed.get(key) {
            Some(entry) if now < entry.expires_at => Some(entry.value.clone()),
            Some(_) => {
                log::debug!("cache entry expired: {}", key);
                tiers.timed.remove(key);
                None
            }
            None => None,
        }
    }

    /// Store a value, replacing any previous entry for the key
    pub fn put(&self, key: CacheKey, value: Value, policy: CachePolicy, request: RequestId) {
        let mut tiers = self.write();
        match policy.ttl() {
            Some(ttl) => {
                log::trace!("cache store ({}s): {}", ttl.as_secs(), key);
                let now = Instant::now();
                let expires_at = now
                    .checked_add(ttl)
                    .unwrap_or_else(|| now + FAR_FUTURE);
                tiers.timed.insert(key, TimedEntry { value, expires_at });
            }
            None => {
                log::trace!("cache store (request {}): {}", request, key);
                tiers.per_request.entry(request).or_default().insert(key, value);
            }
        }
    }

    /// Drop every entry
    pub fn clear_all(&self) {
        let mut tiers = self.write();
        tiers.timed.clear();
        tiers.per_request.clear();
        drop(tiers);
        self.prune_locks();
        log::debug!("cache cleared");
    }

    /// Drop the per-request entries of one request
    pub fn clear_per_request(&self, request: RequestId) {
        let removed = self.write().per_request.remove(&request);
        if let Some(entries) = removed {
            log::trace!("dropped {} per-request entries of {}", entries.len(), request);
        }
        self.prune_locks();
    }

    /// Evict every expired time-to-live entry
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut tiers = self.write();
        let before = tiers.timed.len();
        tiers.timed.retain(|_, entry| now < entry.expires_at);
        before - tiers.timed.len()
    }

    /// Number of stored entries, expired ones included
    pub fn len(&self) -> usize {
        let tiers = self.read();
        tiers.timed.len() + tiers.per_request.values().map(HashMap::len).sum::<usize>()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Acquire the single-flight lock for `key`.
    ///
    /// Holders check the cache, invoke the resolver and store the result
    /// before releasing, so a second caller for the same key observes the
    /// stored value instead of invoking again. Pass the request for
    /// per-request bindings; `None` locks across all requests.
    pub async fn lock(&self, key: &CacheKey, request: Option<RequestId>) -> OwnedMutexGuard<()> {
        let mutex = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            locks.entry((request, key.clone())).or_default().clone()
        };
        mutex.lock_owned().await
    }

    fn prune_locks(&self) {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        locks.retain(|_, mutex| Arc::strong_count(mutex) > 1);
    }
}
