//! Limits registry (spec.md §4.D). A process-wide `name -> Limits` map plus
//! a URL-space registry mapping `(server, method, pattern) -> name` with
//! most-specific-match lookup. Grounded on the admission shape of this
//! crate's predecessor's route resolution (`ServerConfig::find_route`) generalized from
//! routing to admission control, using `wildmatch` for the pattern match the
//! way `other_examples/.../spineldb...cache_fetch.rs` uses it for key
//! globbing.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use wildmatch::WildMatch;

use crate::config::types::LimitsDef;
use crate::error::{AdpError, Result};

#[derive(Debug, Default)]
pub struct LimitsCounters {
    pub nrunning: u32,
    pub nwaiting: u32,
    pub ntimeout: u64,
    pub ndropped: u64,
    pub noverflow: u64,
}

pub struct Limits {
    pub name: String,
    pub maxrun: u32,
    pub maxwait: u32,
    pub maxupload: usize,
    pub timeout: Duration,
    state: Mutex<LimitsCounters>,
    cv: Condvar,
}

impl Limits {
    pub fn new(name: impl Into<String>, def: &LimitsDef) -> Self {
        Self {
            name: name.into(),
            maxrun: def.maxrun,
            maxwait: def.maxwait,
            maxupload: def.maxupload,
            timeout: Duration::from_secs(def.timeout),
            state: Mutex::new(LimitsCounters::default()),
            cv: Condvar::new(),
        }
    }

    pub fn counters(&self) -> LimitsCounters {
        let g = self.state.lock();
        LimitsCounters {
            nrunning: g.nrunning,
            nwaiting: g.nwaiting,
            ntimeout: g.ntimeout,
            ndropped: g.ndropped,
            noverflow: g.noverflow,
        }
    }

    /// Admission algorithm from spec.md §4.D. Blocks the calling worker
    /// thread (by design: workers are plain OS threads, not tasks on a
    /// shared reactor) until the request may run, or returns an error that
    /// the caller turns into a 503.
    pub fn admit(&self) -> Result<LimitsGuard<'_>> {
        let mut g = self.state.lock();
        if g.nrunning >= self.maxrun {
            if g.nwaiting >= self.maxwait {
                g.noverflow += 1;
                return Err(AdpError::Admission(format!(
                    "'{}' at capacity: {} running, {} waiting",
                    self.name, g.nrunning, g.nwaiting
                )));
            }
            g.nwaiting += 1;
            let deadline = Instant::now() + self.timeout;
            loop {
                if g.nrunning < self.maxrun {
                    break;
                }
                let remaining = deadline.saturating_duration_since(Instant::now());
                if remaining.is_zero() {
                    g.nwaiting -= 1;
                    g.ntimeout += 1;
                    return Err(AdpError::Admission(format!(
                        "timed out waiting for capacity on '{}'",
                        self.name
                    )));
                }
                let result = self.cv.wait_for(&mut g, remaining);
                if result.timed_out() && g.nrunning >= self.maxrun {
                    g.nwaiting -= 1;
                    g.ntimeout += 1;
                    return Err(AdpError::Admission(format!(
                        "timed out waiting for capacity on '{}'",
                        self.name
                    )));
                }
            }
            g.nwaiting -= 1;
        }
        g.nrunning += 1;
        drop(g);
        Ok(LimitsGuard { limits: self })
    }

    pub fn reject_upload(&self, content_length: usize) -> bool {
        if content_length > self.maxupload {
            self.state.lock().ndropped += 1;
            true
        } else {
            false
        }
    }
}

/// RAII admission token: decrements `nrunning` and wakes one waiter when
/// dropped, regardless of how the request finished.
pub struct LimitsGuard<'a> {
    limits: &'a Limits,
}

impl Drop for LimitsGuard<'_> {
    fn drop(&mut self) {
        let mut g = self.limits.state.lock();
        g.nrunning -= 1;
        self.limits.cv.notify_one();
    }
}

struct UrlRule {
    server: String,
    method: String,
    pattern: WildMatch,
    name: String,
}

/// Named registry plus URL-space lookup. One instance per process.
pub struct LimitsRegistry {
    named: HashMap<String, Arc<Limits>>,
    rules: Vec<UrlRule>,
}

impl LimitsRegistry {
    pub fn new(defs: &HashMap<String, LimitsDef>) -> Self {
        let mut named = HashMap::new();
        for (name, def) in defs {
            named.insert(name.clone(), Arc::new(Limits::new(name.clone(), def)));
        }
        named
            .entry("default".to_string())
            .or_insert_with(|| Arc::new(Limits::new("default", &LimitsDef::default())));
        Self { named, rules: Vec::new() }
    }

    pub fn bind(&mut self, server: impl Into<String>, method: impl Into<String>, url_pattern: impl Into<String>, name: impl Into<String>) {
        self.rules.push(UrlRule {
            server: server.into(),
            method: method.into(),
            pattern: WildMatch::new(&url_pattern.into()),
            name: name.into(),
        });
    }

    /// Most-specific match wins; ties go to the rule registered last (so
    /// more specific overrides can be added after a broad default).
    pub fn resolve(&self, server: &str, method: &str, url: &str) -> Arc<Limits> {
        let mut best: Option<(&UrlRule, usize)> = None;
        for rule in &self.rules {
            if rule.server != server || rule.method != method {
                continue;
            }
            if rule.pattern.matches(url) {
                let specificity = rule.pattern.to_string().len();
                if best.map(|(_, s)| specificity >= s).unwrap_or(true) {
                    best = Some((rule, specificity));
                }
            }
        }
        let name = best.map(|(r, _)| r.name.as_str()).unwrap_or("default");
        self.named
            .get(name)
            .cloned()
            .unwrap_or_else(|| self.named.get("default").expect("default limits always present").clone())
    }

    pub fn get(&self, name: &str) -> Option<Arc<Limits>> {
        self.named.get(name).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn limits(maxrun: u32, maxwait: u32, timeout_ms: u64) -> Limits {
        Limits::new(
            "test",
            &LimitsDef {
                maxrun,
                maxwait,
                maxupload: 1024,
                timeout: 0,
            },
        )
        .with_timeout(Duration::from_millis(timeout_ms))
    }

    impl Limits {
        fn with_timeout(mut self, d: Duration) -> Self {
            self.timeout = d;
            self
        }
    }

    #[test]
    fn admits_up_to_maxrun_then_overflows() {
        let l = limits(1, 0, 50);
        let _g1 = l.admit().unwrap();
        let err = l.admit();
        assert!(err.is_err());
        assert_eq!(l.counters().noverflow, 1);
    }

    #[test]
    fn second_waiter_runs_after_first_releases() {
        let l = Arc::new(limits(1, 1, 500));
        let g1 = l.admit().unwrap();
        let l2 = Arc::clone(&l);
        let handle = thread::spawn(move || l2.admit().is_ok());
        thread::sleep(Duration::from_millis(20));
        drop(g1);
        assert!(handle.join().unwrap());
    }

    #[test]
    fn waiter_times_out_when_nobody_releases() {
        let l = limits(1, 1, 30);
        let _g1 = l.admit().unwrap();
        let err = l.admit();
        assert!(err.is_err());
        assert_eq!(l.counters().ntimeout, 1);
    }

    #[test]
    fn upload_over_cap_is_rejected_and_counted() {
        let l = limits(10, 10, 1000);
        assert!(l.reject_upload(2048));
        assert!(!l.reject_upload(512));
        assert_eq!(l.counters().ndropped, 1);
    }

    #[test]
    fn url_registry_prefers_most_specific_match() {
        let mut defs = HashMap::new();
        defs.insert("default".to_string(), LimitsDef::default());
        defs.insert("uploads".to_string(), LimitsDef { maxrun: 2, ..LimitsDef::default() });
        let mut reg = LimitsRegistry::new(&defs);
        reg.bind("s1", "POST", "/*", "default");
        reg.bind("s1", "POST", "/uploads/*", "uploads");
        let resolved = reg.resolve("s1", "POST", "/uploads/file.bin");
        assert_eq!(resolved.name, "uploads");
        let resolved = reg.resolve("s1", "POST", "/other");
        assert_eq!(resolved.name, "default");
    }
}
