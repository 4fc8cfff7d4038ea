//! Fingerprinted result cache with TTL, bounded capacity and single-flight.
//!
//! The first caller for a fingerprint computes the value; concurrent callers
//! with the same fingerprint wait on the same cell and share the result.
//! Only successful values are stored.

use crate::context::Request;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tokio::sync::OnceCell;

/// BLAKE3 digest of the canonical query, context and requirements.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn of(request: &Request) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(request.canonical_query().as_bytes());
        hasher.update(&[0]);
        hasher.update(request.context.canonical_json().as_bytes());
        hasher.update(&[0]);
        if let Some(req) = &request.requirements {
            hasher.update(serde_json::to_string(req).unwrap_or_default().as_bytes());
        }
        Self(hasher.finalize().to_hex().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First 12 hex characters, for logs.
    pub fn short(&self) -> &str {
        &self.0[..12.min(self.0.len())]
    }
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// How a cached lookup was satisfied.
#[derive(Debug, Clone, PartialEq)]
pub enum CacheOutcome<V> {
    /// Stored value within its TTL.
    Hit(V),
    /// Joined an in-flight computation started by another caller.
    Joined(V),
    /// This caller ran the computation.
    Computed(V),
}

#[derive(Debug)]
struct CachedEntry<V> {
    value: V,
    inserted_at: Instant,
}

#[derive(Debug)]
pub struct ResultCache<V> {
    ttl: Duration,
    max_entries: usize,
    entries: Mutex<HashMap<Fingerprint, CachedEntry<V>>>,
    inflight: Mutex<HashMap<Fingerprint, Arc<OnceCell<V>>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl<V: Clone> ResultCache<V> {
    pub fn new(ttl: Duration, max_entries: usize) -> Self {
        Self {
            ttl,
            max_entries: max_entries.max(1),
            entries: Mutex::new(HashMap::new()),
            inflight: Mutex::new(HashMap::new()),
        }
    }

    /// Live value for `key`; expired entries are dropped on access.
    pub fn get(&self, key: &Fingerprint) -> Option<V> {
        let mut entries = lock(&self.entries);
        match entries.get(key) {
            Some(entry) if entry.inserted_at.elapsed() < self.ttl => Some(entry.value.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    /// Store a value, evicting expired entries and then the oldest when full.
    pub fn insert(&self, key: Fingerprint, value: V) {
        let mut entries = lock(&self.entries);
        if !entries.contains_key(&key) && entries.len() >= self.max_entries {
            let ttl = self.ttl;
            entries.retain(|_, e| e.inserted_at.elapsed() < ttl);
            if entries.len() >= self.max_entries {
                let oldest = entries
                    .iter()
                    .min_by_key(|(_, e)| e.inserted_at)
                    .map(|(k, _)| k.clone());
                if let Some(oldest) = oldest {
                    entries.remove(&oldest);
                }
            }
        }
        entries.insert(
            key,
            CachedEntry {
                value,
                inserted_at: Instant::now(),
            },
        );
    }

    /// Return the cached value or compute it once for all concurrent callers.
    ///
    /// An error is returned only to the caller whose computation failed;
    /// waiters then retry the computation themselves.
    pub async fn get_or_compute<F, Fut, E>(
        &self,
        key: &Fingerprint,
        compute: F,
    ) -> Result<CacheOutcome<V>, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        if let Some(value) = self.get(key) {
            return Ok(CacheOutcome::Hit(value));
        }

        let cell = lock(&self.inflight)
            .entry(key.clone())
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .clone();

        let leader = AtomicBool::new(false);
        let result = cell
            .get_or_try_init(|| {
                leader.store(true, Ordering::Relaxed);
                compute()
            })
            .await
            .cloned();

        let computed_here = leader.load(Ordering::Relaxed);
        if computed_here {
            if let Ok(value) = &result {
                self.insert(key.clone(), value.clone());
            }
            let mut inflight = lock(&self.inflight);
            if inflight.get(key).is_some_and(|c| Arc::ptr_eq(c, &cell)) {
                inflight.remove(key);
            }
        }

        result.map(|value| {
            if computed_here {
                CacheOutcome::Computed(value)
            } else {
                CacheOutcome::Joined(value)
            }
        })
    }

    pub fn len(&self) -> usize {
        lock(&self.entries).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        lock(&self.entries).clear();
    }
}
