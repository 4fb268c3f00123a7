//! Named-value cache (spec.md §4.C): a generic, expiry-aware, singleflight
//! keyed cache. Grounded on the singleflight/stampede-protection pattern in
//! `other_examples/.../spineldb-spineldb__..cache_fetch.rs` (lock, check
//! sentinel, drop lock, compute, relock, install-and-broadcast), adapted
//! from spineldb's cache-fetch helper to the UTF-8-string-key/opaque-bytes
//! model spec.md §3 describes.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use wildmatch::WildMatch;

use crate::error::{AdpError, Result};

#[derive(Clone)]
enum Slot {
    Loading,
    Value { bytes: Vec<u8>, expires_at: Option<Instant> },
}

struct Inner {
    entries: HashMap<String, Slot>,
}

pub struct NamedCache {
    name: String,
    size_limit: usize,
    ttl: Option<Duration>,
    wait_timeout: Duration,
    inner: Mutex<Inner>,
    cv: Condvar,
}

impl NamedCache {
    pub fn new(name: impl Into<String>, size_limit: usize, ttl: Option<Duration>, wait_timeout: Duration) -> Self {
        Self {
            name: name.into(),
            size_limit,
            ttl,
            wait_timeout,
            inner: Mutex::new(Inner { entries: HashMap::new() }),
            cv: Condvar::new(),
        }
    }

    pub fn set(&self, key: &str, value: Vec<u8>) {
        let mut g = self.inner.lock();
        let expires_at = self.ttl.map(|ttl| Instant::now() + ttl);
        g.entries.insert(key.to_string(), Slot::Value { bytes: value, expires_at });
        self.cv.notify_all();
    }

    /// Fetched entry whose `expires_at <= now` is flushed and treated as
    /// absent (spec.md §4.C expiry policy).
    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        let mut g = self.inner.lock();
        match g.entries.get(key) {
            Some(Slot::Value { bytes, expires_at }) => {
                if expires_at.map(|e| e <= Instant::now()).unwrap_or(false) {
                    g.entries.remove(key);
                    None
                } else {
                    Some(bytes.clone())
                }
            }
            _ => None,
        }
    }

    /// Parses the stored bytes as a decimal integer, adds `delta`, and
    /// re-serializes the result (spec.md §4.C "type discipline": values stay
    /// opaque byte strings between calls, no type is remembered). A missing
    /// key starts from zero, matching `ns_cache incr`.
    pub fn incr(&self, key: &str, delta: i64) -> Result<i64> {
        let mut g = self.inner.lock();
        let current = match g.entries.get(key) {
            Some(Slot::Value { bytes, .. }) => std::str::from_utf8(bytes)
                .ok()
                .and_then(|s| s.parse::<i64>().ok())
                .ok_or_else(|| AdpError::CacheTypeMismatch(key.to_string()))?,
            _ => 0,
        };
        let next = current + delta;
        let expires_at = self.ttl.map(|ttl| Instant::now() + ttl);
        g.entries.insert(
            key.to_string(),
            Slot::Value { bytes: next.to_string().into_bytes(), expires_at },
        );
        self.cv.notify_all();
        Ok(next)
    }

    /// Appends `suffix` to the stored bytes verbatim (Tcl `append`
    /// semantics: raw concatenation, no parsing). Absent keys start empty.
    pub fn append(&self, key: &str, suffix: &[u8]) -> Vec<u8> {
        let mut g = self.inner.lock();
        let mut bytes = match g.entries.get(key) {
            Some(Slot::Value { bytes, .. }) => bytes.clone(),
            _ => Vec::new(),
        };
        bytes.extend_from_slice(suffix);
        let expires_at = self.ttl.map(|ttl| Instant::now() + ttl);
        g.entries.insert(key.to_string(), Slot::Value { bytes: bytes.clone(), expires_at });
        self.cv.notify_all();
        bytes
    }

    /// Parses the stored bytes as a space-separated Tcl-style list, appends
    /// `element` as a new member, and re-serializes the whole list
    /// (spec.md §4.C "type discipline"). Absent keys start as an empty list.
    pub fn lappend(&self, key: &str, element: &str) -> Result<Vec<u8>> {
        let mut g = self.inner.lock();
        let mut items: Vec<String> = match g.entries.get(key) {
            Some(Slot::Value { bytes, .. }) => std::str::from_utf8(bytes)
                .map_err(|_| AdpError::CacheTypeMismatch(key.to_string()))?
                .split_whitespace()
                .map(str::to_string)
                .collect(),
            _ => Vec::new(),
        };
        items.push(element.to_string());
        let joined = items.join(" ").into_bytes();
        let expires_at = self.ttl.map(|ttl| Instant::now() + ttl);
        g.entries.insert(key.to_string(), Slot::Value { bytes: joined.clone(), expires_at });
        self.cv.notify_all();
        Ok(joined)
    }

    pub fn flush(&self, keys: &[&str]) {
        let mut g = self.inner.lock();
        for key in keys {
            g.entries.remove(*key);
        }
    }

    /// Lazily purges expired entries as it walks the table.
    pub fn names(&self, pattern: &str) -> Vec<String> {
        let matcher = WildMatch::new(pattern);
        let mut g = self.inner.lock();
        let now = Instant::now();
        g.entries.retain(|_, slot| match slot {
            Slot::Value { expires_at, .. } => expires_at.map(|e| e > now).unwrap_or(true),
            Slot::Loading => true,
        });
        g.entries
            .keys()
            .filter(|k| matcher.matches(k))
            .cloned()
            .collect()
    }

    /// Singleflight rule from spec.md §4.C: at most one live thunk per key.
    pub fn eval<F>(&self, key: &str, thunk: F) -> Result<Vec<u8>>
    where
        F: FnOnce() -> Result<Vec<u8>>,
    {
        let mut g = self.inner.lock();
        loop {
            match g.entries.get(key) {
                Some(Slot::Value { bytes, expires_at }) => {
                    if expires_at.map(|e| e <= Instant::now()).unwrap_or(false) {
                        g.entries.remove(key);
                        continue;
                    }
                    return Ok(bytes.clone());
                }
                Some(Slot::Loading) => {
                    let deadline = Instant::now() + self.wait_timeout;
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    if remaining.is_zero() {
                        return Err(AdpError::CacheTimeout(key.to_string()));
                    }
                    let result = self.cv.wait_for(&mut g, remaining);
                    if result.timed_out() {
                        return Err(AdpError::CacheTimeout(key.to_string()));
                    }
                    if !g.entries.contains_key(key) {
                        return Err(AdpError::CacheUpdateFailed(key.to_string()));
                    }
                    continue;
                }
                None => break,
            }
        }

        g.entries.insert(key.to_string(), Slot::Loading);
        drop(g);

        let result = thunk();

        let mut g = self.inner.lock();
        match &result {
            Ok(bytes) => {
                let expires_at = self.ttl.map(|ttl| Instant::now() + ttl);
                g.entries.insert(
                    key.to_string(),
                    Slot::Value { bytes: bytes.clone(), expires_at },
                );
                self.evict_if_over_capacity(&mut g);
            }
            Err(_) => {
                g.entries.remove(key);
            }
        }
        self.cv.notify_all();
        drop(g);
        result
    }

    fn evict_if_over_capacity(&self, inner: &mut Inner) {
        let total: usize = inner
            .entries
            .values()
            .map(|s| match s {
                Slot::Value { bytes, .. } => bytes.len(),
                Slot::Loading => 0,
            })
            .sum();
        if total <= self.size_limit {
            return;
        }
        // Simple FIFO-ish eviction: drop arbitrary value entries until under
        // budget. Real LRU ordering would need a separate access list; the
        // cache's contract (spec.md §4.C) only requires bounded size.
        let keys: Vec<String> = inner
            .entries
            .iter()
            .filter(|(_, s)| matches!(s, Slot::Value { .. }))
            .map(|(k, _)| k.clone())
            .collect();
        let mut freed = 0usize;
        for key in keys {
            if total - freed <= self.size_limit {
                break;
            }
            if let Some(Slot::Value { bytes, .. }) = inner.entries.remove(&key) {
                freed += bytes.len();
            }
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}
