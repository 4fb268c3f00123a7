//! Content cache for the fast-path file responder (spec.md §4.G). Keyed by
//! `(device, inode)`; entries are refcounted so eviction can free the table
//! slot immediately while deferring the byte buffer's deallocation until
//! the last reader releases it. Singleflight loading follows the same
//! lock/sentinel/broadcast shape as [`crate::cache::named`].

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::error::{AdpError, Result};

pub type InodeKey = (u64, u64);

enum Slot {
    Loading,
    Ready(Arc<ContentEntry>),
}

pub struct ContentEntry {
    pub mtime: i64,
    pub size: u64,
    pub bytes: Vec<u8>,
}

struct Inner {
    entries: HashMap<InodeKey, Slot>,
    total_bytes: usize,
}

pub struct ContentCache {
    size_limit: usize,
    per_entry_limit: usize,
    wait_timeout: Duration,
    inner: Mutex<Inner>,
    cv: Condvar,
}

impl ContentCache {
    pub fn new(size_limit: usize, per_entry_limit: usize) -> Self {
        Self {
            size_limit,
            per_entry_limit,
            wait_timeout: Duration::from_secs(5),
            inner: Mutex::new(Inner { entries: HashMap::new(), total_bytes: 0 }),
            cv: Condvar::new(),
        }
    }

    pub fn per_entry_limit(&self) -> usize {
        self.per_entry_limit
    }

    /// Returns the cached bytes for `key`, loading them with `load` on a
    /// miss or a `(mtime, size)` mismatch (spec.md §4.G "Content cache
    /// singleflight"). Readers get an `Arc` clone so the refcount lives for
    /// as long as any caller holds it; dropping all clones frees the bytes.
    pub fn get_or_load<F>(&self, key: InodeKey, mtime: i64, size: u64, load: F) -> Result<Arc<ContentEntry>>
    where
        F: FnOnce() -> Result<Vec<u8>>,
    {
        let mut g = self.inner.lock();
        loop {
            match g.entries.get(&key) {
                Some(Slot::Ready(entry)) => {
                    if entry.mtime == mtime && entry.size == size {
                        return Ok(Arc::clone(entry));
                    }
                    // stale: invalidate and fall through to reload.
                    if let Some(Slot::Ready(stale)) = g.entries.remove(&key) {
                        g.total_bytes = g.total_bytes.saturating_sub(stale.bytes.len());
                    }
                }
                Some(Slot::Loading) => {
                    let deadline = Instant::now() + self.wait_timeout;
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    if remaining.is_zero() {
                        return Err(AdpError::CacheTimeout(format!("{key:?}")));
                    }
                    let result = self.cv.wait_for(&mut g, remaining);
                    if result.timed_out() {
                        return Err(AdpError::CacheTimeout(format!("{key:?}")));
                    }
                    continue;
                }
                None => {}
            }
            break;
        }

        g.entries.insert(key, Slot::Loading);
        drop(g);

        let result = load();

        let mut g = self.inner.lock();
        let outcome = match result {
            Ok(bytes) => {
                let entry = Arc::new(ContentEntry { mtime, size, bytes });
                g.total_bytes += entry.bytes.len();
                g.entries.insert(key, Slot::Ready(Arc::clone(&entry)));
                self.evict_if_over_capacity(&mut g, key);
                Ok(entry)
            }
            Err(e) => {
                g.entries.remove(&key);
                Err(e)
            }
        };
        self.cv.notify_all();
        outcome
    }

    pub fn invalidate(&self, key: InodeKey) {
        let mut g = self.inner.lock();
        if let Some(Slot::Ready(entry)) = g.entries.remove(&key) {
            g.total_bytes = g.total_bytes.saturating_sub(entry.bytes.len());
        }
    }

    /// Evicts arbitrary ready entries (other than `keep`) until under
    /// budget. The evicted `Arc<ContentEntry>` may still be held by
    /// in-flight readers; it is only actually freed once its refcount
    /// reaches zero, which is ordinary `Arc` drop semantics here.
    fn evict_if_over_capacity(&self, inner: &mut Inner, keep: InodeKey) {
        if inner.total_bytes <= self.size_limit {
            return;
        }
        let candidates: Vec<InodeKey> = inner
            .entries
            .iter()
            .filter(|(k, s)| **k != keep && matches!(s, Slot::Ready(_)))
            .map(|(k, _)| *k)
            .collect();
        for key in candidates {
            if inner.total_bytes <= self.size_limit {
                break;
            }
            if let Some(Slot::Ready(entry)) = inner.entries.remove(&key) {
                inner.total_bytes = inner.total_bytes.saturating_sub(entry.bytes.len());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    #[test]
    fn loads_once_then_serves_from_cache() {
        let cache = ContentCache::new(1024, 1024);
        let loads = Arc::new(AtomicUsize::new(0));
        let loads2 = Arc::clone(&loads);
        let entry = cache
            .get_or_load((1, 1), 100, 5, || {
                loads2.fetch_add(1, Ordering::SeqCst);
                Ok(b"hello".to_vec())
            })
            .unwrap();
        assert_eq!(entry.bytes, b"hello");
        let entry2 = cache.get_or_load((1, 1), 100, 5, || unreachable!()).unwrap();
        assert_eq!(entry2.bytes, b"hello");
        assert_eq!(loads.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn mtime_mismatch_triggers_reload() {
        let cache = ContentCache::new(1024, 1024);
        cache.get_or_load((1, 1), 100, 5, || Ok(b"hello".to_vec())).unwrap();
        let entry = cache.get_or_load((1, 1), 200, 5, || Ok(b"world".to_vec())).unwrap();
        assert_eq!(entry.bytes, b"world");
    }

    #[test]
    fn concurrent_loads_on_same_key_run_once() {
        let cache = Arc::new(ContentCache::new(1024, 1024));
        let loads = Arc::new(AtomicUsize::new(0));
        let mut handles = Vec::new();
        for _ in 0..4 {
            let cache = Arc::clone(&cache);
            let loads = Arc::clone(&loads);
            handles.push(thread::spawn(move || {
                cache.get_or_load((2, 2), 1, 1, || {
                    loads.fetch_add(1, Ordering::SeqCst);
                    thread::sleep(Duration::from_millis(30));
                    Ok(b"x".to_vec())
                })
            }));
        }
        for h in handles {
            h.join().unwrap().unwrap();
        }
        assert_eq!(loads.load(Ordering::SeqCst), 1);
    }
}
