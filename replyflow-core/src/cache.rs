//! Response cache for generated answers.
//!
//! [`ResponseCache`] is the seam the resolver talks to; [`InMemoryCache`] is
//! the process-local implementation backed by a `DashMap`, so concurrent
//! `resolve` calls can read and write without external locking. Competing
//! writes to one key resolve as last-write-wins.
//!
//! Eviction policy: after an insert pushes the table past `max_entries`, a
//! sweep removes every expired entry and then, if the table is still too
//! large, the `sweep_batch` entries with the oldest `created_at`. The entry
//! that triggered the sweep is never among them. Expired entries met by `get`
//! are removed on the spot.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;

use crate::clock::Clock;
use crate::config::CacheConfig;
use crate::utterance::{truncate_chars, Parameters};

pub trait ResponseCache: Send + Sync {
    /// Live value for `key`. Expired entries are treated as absent.
    fn get(&self, key: &str) -> Option<String>;

    fn set(&self, key: &str, value: &str);

    /// Remove expired entries, returning how many were dropped.
    fn evict_expired(&self) -> usize;

    fn clear(&self);

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn stats(&self) -> CacheStats;
}

#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub key: String,
    pub value: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    /// Rough payload size: key plus value bytes.
    pub approx_bytes: usize,
    pub ttl_seconds: u64,
    pub max_entries: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

/// Build the cache key for a normalized utterance.
///
/// Parameters and context are part of the key so the same question asked
/// about different slots never shares an answer. Both are truncated to
/// `max_extra_chars` so a huge payload cannot blow up key size. The three
/// parts are encoded as a JSON array, so no field can forge a separator.
pub fn cache_key(
    normalized_utterance: &str,
    parameters: &Parameters,
    context: Option<&str>,
    max_extra_chars: usize,
) -> String {
    let params = if parameters.is_empty() {
        String::new()
    } else {
        serde_json::to_string(parameters).unwrap_or_default()
    };
    let context = context.map(str::trim).unwrap_or_default();

    let parts = [
        normalized_utterance,
        truncate_chars(&params, max_extra_chars),
        truncate_chars(context, max_extra_chars),
    ];
    serde_json::to_string(&parts).unwrap_or_else(|_| parts.join("\u{1f}"))
}

pub struct InMemoryCache {
    entries: DashMap<String, CacheEntry>,
    clock: Arc<dyn Clock>,
    ttl: Duration,
    max_entries: usize,
    sweep_batch: usize,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl InMemoryCache {
    pub fn new(config: &CacheConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: DashMap::new(),
            clock,
            ttl: config.ttl(),
            max_entries: config.max_entries.max(1),
            sweep_batch: config.sweep_batch.max(1),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    fn is_expired(&self, entry: &CacheEntry, now: DateTime<Utc>) -> bool {
        match chrono::Duration::from_std(self.ttl) {
            Ok(ttl) => now.signed_duration_since(entry.created_at) >= ttl,
            // A TTL too large for chrono never expires.
            Err(_) => false,
        }
    }

    /// Bring the table back under `max_entries`, sparing `keep`.
    fn sweep(&self, keep: &str) {
        let expired = self.evict_expired();

        let over = self.entries.len().saturating_sub(self.max_entries);
        let mut oldest = 0usize;
        if over > 0 {
            let mut by_age: Vec<(DateTime<Utc>, String)> = self
                .entries
                .iter()
                .filter(|e| e.key() != keep)
                .map(|e| (e.created_at, e.key().clone()))
                .collect();
            by_age.sort();

            for (_, key) in by_age.into_iter().take(self.sweep_batch.max(over)) {
                if self.entries.remove(&key).is_some() {
                    oldest += 1;
                }
            }
            self.evictions.fetch_add(oldest as u64, Ordering::Relaxed);
        }

        if expired + oldest > 0 {
            tracing::debug!(
                expired,
                oldest,
                remaining = self.entries.len(),
                "Cache sweep evicted entries"
            );
        }
    }
}

impl ResponseCache for InMemoryCache {
    fn get(&self, key: &str) -> Option<String> {
        let now = self.clock.now();

        if let Some(entry) = self.entries.get(key) {
            if !self.is_expired(&entry, now) {
                self.hits.fetch_add(1, Ordering::Relaxed);
                return Some(entry.value.clone());
            }
            drop(entry);
            // Re-check under the shard lock so a fresh concurrent write survives.
            if self
                .entries
                .remove_if(key, |_, e| self.is_expired(e, now))
                .is_some()
            {
                self.evictions.fetch_add(1, Ordering::Relaxed);
            }
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    fn set(&self, key: &str, value: &str) {
        self.entries.insert(
            key.to_string(),
            CacheEntry {
                key: key.to_string(),
                value: value.to_string(),
                created_at: self.clock.now(),
            },
        );

        if self.entries.len() > self.max_entries {
            self.sweep(key);
        }
    }

    fn evict_expired(&self) -> usize {
        let now = self.clock.now();
        let before = self.entries.len();
        self.entries.retain(|_, e| !self.is_expired(e, now));
        let removed = before.saturating_sub(self.entries.len());
        self.evictions.fetch_add(removed as u64, Ordering::Relaxed);
        removed
    }

    fn clear(&self) {
        self.entries.clear();
        tracing::info!("Response cache cleared");
    }

    fn len(&self) -> usize {
        self.entries.len()
    }

    fn stats(&self) -> CacheStats {
        let approx_bytes = self
            .entries
            .iter()
            .map(|e| e.key().len() + e.value.len())
            .sum();

        CacheStats {
            entries: self.entries.len(),
            approx_bytes,
            ttl_seconds: self.ttl.as_secs(),
            max_entries: self.max_entries,
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }
}
