//! Content-addressed cache mapping normalized sources to artifact URLs.
//!
//! Bounded by entry count. A new key inserted at capacity first purges expired
//! entries and then, if still full, evicts the single oldest entry. Reads do not
//! refresh an entry's timestamp.

use std::collections::HashMap;
use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use metrics::counter;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::domain::entities::CompilationRequest;

const METRIC_CACHE_HIT: &str = "texpress_cache_hit_total";
const METRIC_CACHE_MISS: &str = "texpress_cache_miss_total";
const METRIC_CACHE_EVICT: &str = "texpress_cache_evict_total";

/// Hash of a normalized request; identical documents share a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SourceKey(u64);

impl SourceKey {
    pub fn of(request: &CompilationRequest) -> Self {
        let mut hasher = DefaultHasher::new();
        normalize(&request.source).hash(&mut hasher);
        request.engine.hash(&mut hasher);
        request
            .bibliography
            .as_deref()
            .map(normalize)
            .hash(&mut hasher);
        request.use_biber.hash(&mut hasher);
        request.options.passes.hash(&mut hasher);
        Self(hasher.finish())
    }

    pub fn from_raw(value: u64) -> Self {
        Self(value)
    }

    pub fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// CRLF becomes LF and trailing whitespace is dropped from every line and the end.
fn normalize(text: &str) -> String {
    let unified = text.replace("\r\n", "\n");
    let mut out = String::with_capacity(unified.len());
    for line in unified.lines() {
        out.push_str(line.trim_end());
        out.push('\n');
    }
    out.truncate(out.trim_end().len());
    out
}

#[derive(Debug, Clone)]
struct CacheEntry {
    artifact_url: String,
    inserted_at: Instant,
}

#[derive(Debug)]
pub struct ResultCache {
    max_entries: usize,
    ttl: Duration,
    entries: Mutex<HashMap<SourceKey, CacheEntry>>,
}

impl ResultCache {
    pub fn new(max_entries: usize, ttl: Duration) -> Self {
        Self {
            max_entries: max_entries.max(1),
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the cached URL; an expired entry is removed and reported as a miss.
    pub fn get(&self, key: SourceKey) -> Option<String> {
        let mut entries = self.lock("get");
        let now = Instant::now();
        let found = entries
            .get(&key)
            .map(|entry| (now.duration_since(entry.inserted_at) < self.ttl, entry.artifact_url.clone()));
        let outcome = match found {
            Some((true, url)) => Some(url),
            Some((false, _)) => {
                entries.remove(&key);
                debug!(
                    target = "application::cache",
                    key = %key,
                    "Dropped expired cache entry"
                );
                None
            }
            None => None,
        };

        if outcome.is_some() {
            counter!(METRIC_CACHE_HIT).increment(1);
        } else {
            counter!(METRIC_CACHE_MISS).increment(1);
        }
        outcome
    }

    pub fn set(&self, key: SourceKey, artifact_url: impl Into<String>) {
        let mut entries = self.lock("set");
        let now = Instant::now();

        if !entries.contains_key(&key) && entries.len() >= self.max_entries {
            let ttl = self.ttl;
            let before = entries.len();
            entries.retain(|_, entry| now.duration_since(entry.inserted_at) < ttl);
            let mut evicted = before - entries.len();

            if entries.len() >= self.max_entries {
                let oldest = entries
                    .iter()
                    .min_by_key(|(_, entry)| entry.inserted_at)
                    .map(|(key, _)| *key);
                if let Some(oldest) = oldest {
                    entries.remove(&oldest);
                    evicted += 1;
                }
            }

            if evicted > 0 {
                counter!(METRIC_CACHE_EVICT).increment(evicted as u64);
            }
        }

        entries.insert(
            key,
            CacheEntry {
                artifact_url: artifact_url.into(),
                inserted_at: now,
            },
        );
    }

    pub fn remove(&self, key: SourceKey) {
        self.lock("remove").remove(&key);
    }

    pub fn len(&self) -> usize {
        self.lock("len").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self, op: &'static str) -> MutexGuard<'_, HashMap<SourceKey, CacheEntry>> {
        match self.entries.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                warn!(
                    op,
                    target_module = "application::cache",
                    lock_kind = "mutex.lock",
                    result = "poisoned_recovered",
                    "Recovered from poisoned result cache lock"
                );
                poisoned.into_inner()
            }
        }
    }
}
