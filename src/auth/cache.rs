// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! LRU cache of verified principals.
//!
//! Keyed by a SHA-256 fingerprint of the raw credential so the credential
//! itself is never stored or logged. Entries expire `ttl` after insertion;
//! when full, the entry with the oldest access is evicted.

use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use lru::LruCache;
use serde::Serialize;
use sha2::{Digest, Sha256};
use utoipa::ToSchema;

use super::principal::Principal;

/// Length of the hex fingerprint prefix used as cache key.
const FINGERPRINT_LEN: usize = 32;

/// Default entry TTL (5 minutes).
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(300);

/// Default capacity.
pub const DEFAULT_CACHE_MAX_SIZE: usize = 1000;

/// Derive the cache key for a raw credential.
pub fn credential_fingerprint(token: &str) -> String {
    let digest = format!("{:x}", Sha256::digest(token.as_bytes()));
    digest[..FINGERPRINT_LEN].to_string()
}

/// Cached entry.
struct CacheEntry {
    principal: Principal,
    created_at: DateTime<Utc>,
    last_accessed: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}

impl CacheEntry {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at || self.principal.credential_expired_at(now.timestamp())
    }
}

/// Point-in-time cache statistics.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    pub size: usize,
    pub max_size: usize,
    pub ttl_secs: u64,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    /// Hits over total lookups, 0 when there were none
    pub hit_rate: f64,
}

/// Shared verification cache.
pub struct VerificationCache {
    entries: Mutex<LruCache<String, CacheEntry>>,
    ttl: Duration,
    max_size: usize,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl std::fmt::Debug for VerificationCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VerificationCache")
            .field("ttl", &self.ttl)
            .field("max_size", &self.max_size)
            .finish_non_exhaustive()
    }
}

impl VerificationCache {
    /// Create a new cache with the given capacity and TTL.
    ///
    /// A capacity of zero is treated as one.
    pub fn new(max_size: usize, ttl: Duration) -> Self {
        let capacity = NonZeroUsize::new(max_size).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
            ttl,
            max_size: capacity.get(),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    fn lock(&self) -> MutexGuard<'_, LruCache<String, CacheEntry>> {
        // A panic while holding the lock cannot leave an entry half-written.
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn ttl_delta(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.ttl).unwrap_or(chrono::Duration::MAX)
    }

    /// Look up a principal by fingerprint.
    pub fn get(&self, key: &str) -> Option<Principal> {
        self.get_at(key, Utc::now())
    }

    /// Look up a principal at `now`. Expired entries are removed and count
    /// as misses; hits refresh the entry's last access.
    pub fn get_at(&self, key: &str, now: DateTime<Utc>) -> Option<Principal> {
        let mut entries = self.lock();

        let found = match entries.get_mut(key) {
            Some(entry) if !entry.is_expired(now) => {
                entry.last_accessed = now;
                Some(entry.principal.clone())
            }
            Some(_) => {
                entries.pop(key);
                None
            }
            None => None,
        };

        match found {
            Some(principal) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(principal)
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Store a verified principal.
    pub fn set(&self, key: impl Into<String>, principal: Principal) {
        self.set_at(key, principal, Utc::now());
    }

    /// Store a verified principal at `now`, evicting the least recently
    /// accessed entry when the cache is full.
    pub fn set_at(&self, key: impl Into<String>, principal: Principal, now: DateTime<Utc>) {
        let key = key.into();
        let entry = CacheEntry {
            principal,
            created_at: now,
            last_accessed: now,
            expires_at: now
                .checked_add_signed(self.ttl_delta())
                .unwrap_or(DateTime::<Utc>::MAX_UTC),
        };

        let mut entries = self.lock();
        if let Some((evicted_key, _)) = entries.push(key.clone(), entry) {
            // `push` also returns the previous value when the key was already present
            if evicted_key != key {
                self.evictions.fetch_add(1, Ordering::Relaxed);
                let prefix = evicted_key.get(..8).unwrap_or(evicted_key.as_str());
                tracing::debug!(fingerprint = %prefix, "Evicted verification cache entry");
            }
        }
    }

    /// Remove a single entry. Returns whether it was present.
    pub fn invalidate(&self, key: &str) -> bool {
        self.lock().pop(key).is_some()
    }

    /// Remove every entry. Returns the number removed.
    pub fn clear(&self) -> usize {
        let mut entries = self.lock();
        let removed = entries.len();
        entries.clear();
        removed
    }

    /// Remove every expired entry regardless of access pattern.
    pub fn purge_expired(&self) -> usize {
        self.purge_expired_at(Utc::now())
    }

    pub fn purge_expired_at(&self, now: DateTime<Utc>) -> usize {
        let mut entries = self.lock();
        let expired: Vec<String> = entries
            .iter()
            .filter(|(_, entry)| entry.is_expired(now))
            .map(|(key, _)| key.clone())
            .collect();

        for key in &expired {
            entries.pop(key);
        }
        expired.len()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Age of an entry at `now`, if present. Does not count as an access.
    pub fn entry_age_at(&self, key: &str, now: DateTime<Utc>) -> Option<chrono::Duration> {
        self.lock().peek(key).map(|entry| now - entry.created_at)
    }

    /// Last access time of an entry, if present. Does not count as an access.
    pub fn last_accessed(&self, key: &str) -> Option<DateTime<Utc>> {
        self.lock().peek(key).map(|entry| entry.last_accessed)
    }

    pub fn stats(&self) -> CacheStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        CacheStats {
            size: self.len(),
            max_size: self.max_size,
            ttl_secs: self.ttl.as_secs(),
            hits,
            misses,
            evictions: self.evictions.load(Ordering::Relaxed),
            hit_rate: if total == 0 {
                0.0
            } else {
                hits as f64 / total as f64
            },
        }
    }
}

impl Default for VerificationCache {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_MAX_SIZE, DEFAULT_CACHE_TTL)
    }
}
