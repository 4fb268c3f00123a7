//! Filter/trace/cleanup pipeline (spec.md §4.E). Two process-wide ordered
//! collections (filters, traces+cleanups) scanned in registration order;
//! glob matching via `wildmatch`, same crate used for the limits URL-space
//! registry ([`crate::limits`]) and grounded the same way on
//! `other_examples/.../spineldb...cache_fetch.rs`.

use bitflags::bitflags;
use wildmatch::WildMatch;

use crate::connection::RequestContext;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct When: u8 {
        const PRE_AUTH  = 0b001;
        const POST_AUTH = 0b010;
        const TRACE      = 0b100;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterStatus {
    Ok,
    Break,
    Error,
}

pub type FilterFn = Arc<dyn Fn(&mut RequestContext, When) -> FilterStatus + Send + Sync>;
pub type TraceFn = Arc<dyn Fn(&RequestContext) + Send + Sync>;
pub type CleanupFn = Arc<dyn Fn(&RequestContext) + Send + Sync>;

use std::sync::Arc;

struct Filter {
    when: When,
    method: WildMatch,
    url: WildMatch,
    proc: FilterFn,
}

struct Trace {
    proc: TraceFn,
}

struct Cleanup {
    proc: CleanupFn,
}

/// Registration-ordered filter chain plus FIFO traces and LIFO cleanups.
/// Grounded on the registration-order contract in spec.md §4.E /
/// §5 "Ordering guarantees".
#[derive(Default)]
pub struct Pipeline {
    filters: Vec<Filter>,
    traces: Vec<Trace>,
    cleanups: Vec<Cleanup>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_filter(
        &mut self,
        when: When,
        method_pattern: &str,
        url_pattern: &str,
        proc: FilterFn,
    ) {
        self.filters.push(Filter {
            when,
            method: WildMatch::new(method_pattern),
            url: WildMatch::new(url_pattern),
            proc,
        });
    }

    pub fn register_trace(&mut self, proc: TraceFn) {
        self.traces.push(Trace { proc });
    }

    pub fn register_cleanup(&mut self, proc: CleanupFn) {
        self.cleanups.push(Cleanup { proc });
    }

    /// Runs filters matching `why` in registration order. Stops on the
    /// first `Break` (short-circuits, reported to the caller as `Ok`) or
    /// error. For `why == TRACE`, a bare `Break` from a filter is coerced to
    /// `Ok` per spec.md §4.E ("a `RETURN` is coerced to `OK`").
    pub fn run_filters(&self, ctx: &mut RequestContext, why: When) -> FilterStatus {
        for filter in &self.filters {
            if !filter.when.contains(why) {
                continue;
            }
            if !filter.method.matches(ctx.method()) || !filter.url.matches(ctx.url()) {
                continue;
            }
            match (filter.proc)(ctx, why) {
                FilterStatus::Ok => continue,
                FilterStatus::Break => {
                    return if why == When::TRACE { FilterStatus::Ok } else { FilterStatus::Break };
                }
                FilterStatus::Error => return FilterStatus::Error,
            }
        }
        FilterStatus::Ok
    }

    /// Runs only on successful handler completion, FIFO, never aborting.
    pub fn run_traces(&self, ctx: &RequestContext) {
        for trace in &self.traces {
            (trace.proc)(ctx);
        }
    }

    /// Runs for every request regardless of outcome, LIFO, never aborting.
    pub fn run_cleanups(&self, ctx: &RequestContext) {
        for cleanup in self.cleanups.iter().rev() {
            (cleanup.proc)(ctx);
        }
    }
}
