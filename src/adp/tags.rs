//! Registered-tag table (spec.md §4.H "Registered tags" and §9 "Global
//! mutable state": tag registry is one of the process-wide tables, read-
//! mostly once bootstrap finishes). A tag is either a "proc-tag" (a plain
//! callback, no access to the inner body) or an "adp-tag" (re-enters the
//! ADP evaluator with the body as a nested template).

use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagKind {
    ProcTag,
    AdpTag,
}

pub struct TagDef {
    pub kind: TagKind,
    has_end_tag: bool,
}

impl TagDef {
    pub fn has_end_tag(&self) -> bool {
        self.has_end_tag
    }
}

/// Read-mostly process-wide table; callers share it behind an `Arc` and a
/// reader/writer lock (spec.md §9), built once during bootstrap.
#[derive(Default)]
pub struct TagRegistry {
    tags: HashMap<String, TagDef>,
}

impl TagRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: &str, kind: TagKind, has_end_tag: bool) {
        self.tags.insert(name.to_ascii_lowercase(), TagDef { kind, has_end_tag });
    }

    pub fn get(&self, name: &str) -> Option<&TagDef> {
        self.tags.get(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_is_case_insensitive() {
        let mut registry = TagRegistry::new();
        registry.register("MyTag", TagKind::ProcTag, false);
        assert!(registry.get("mytag").is_some());
    }

    #[test]
    fn unregistered_tag_is_absent() {
        let registry = TagRegistry::new();
        assert!(registry.get("nope").is_none());
    }
}
