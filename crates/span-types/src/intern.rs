//! Process-wide string interning.
//!
//! Span names, services and tags repeat constantly across a span stream. The
//! decoder routes every one of them through an [`Interner`] so that equal
//! strings share a single `Arc<str>` allocation.

use dashmap::DashMap;
use once_cell::sync::Lazy;
use std::sync::Arc;

static GLOBAL: Lazy<Arc<Interner>> = Lazy::new(|| Arc::new(Interner::new()));

/// Concurrent table of canonical strings.
///
/// Lookups take a shard read lock; inserts go through the entry API, so two
/// callers racing on the same new string both end up with the same `Arc`.
#[derive(Debug, Default)]
pub struct Interner {
    strings: DashMap<Arc<str>, ()>,
}

impl Interner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the canonical instance of `value`, inserting it on first use.
    pub fn intern(&self, value: &str) -> Arc<str> {
        if let Some(existing) = self.strings.get(value) {
            return Arc::clone(existing.key());
        }

        let entry = self.strings.entry(Arc::from(value)).or_insert(());
        Arc::clone(entry.key())
    }

    /// Same as [`Interner::intern`] but reuses the allocation of an owned string
    /// when it is not yet in the table.
    pub fn intern_owned(&self, value: String) -> Arc<str> {
        if let Some(existing) = self.strings.get(value.as_str()) {
            return Arc::clone(existing.key());
        }

        let entry = self.strings.entry(Arc::from(value)).or_insert(());
        Arc::clone(entry.key())
    }

    /// Number of distinct strings in the table.
    pub fn len(&self) -> usize {
        self.strings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strings.is_empty()
    }
}

/// The table shared by the whole process.
pub fn global_interner() -> Arc<Interner> {
    Arc::clone(&GLOBAL)
}

/// Intern `value` in the process-wide table.
pub fn intern(value: &str) -> Arc<str> {
    GLOBAL.intern(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_intern_returns_same_allocation() {
        let interner = Interner::new();
        let first = interner.intern("http.status_code");
        let second = interner.intern("http.status_code");

        assert_eq!(first, second);
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_intern_twice_does_not_grow_table() {
        let interner = Interner::new();
        interner.intern("service-a");
        assert_eq!(interner.len(), 1);

        interner.intern("service-a");
        assert_eq!(interner.len(), 1);

        interner.intern("service-b");
        assert_eq!(interner.len(), 2);
    }

    #[test]
    fn test_intern_owned_matches_borrowed() {
        let interner = Interner::new();
        let owned = interner.intern_owned("db.query".to_string());
        let borrowed = interner.intern("db.query");

        assert!(Arc::ptr_eq(&owned, &borrowed));
        assert_eq!(interner.len(), 1);
    }

    #[test]
    fn test_empty_string_is_interned() {
        let interner = Interner::new();
        assert!(interner.is_empty());
        let empty = interner.intern("");
        assert_eq!(&*empty, "");
        assert_eq!(interner.len(), 1);
    }

    #[test]
    fn test_concurrent_intern_agrees_on_canonical_instance() {
        let interner = Arc::new(Interner::new());

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let interner = Arc::clone(&interner);
                thread::spawn(move || {
                    (0..200)
                        .map(|i| interner.intern(&format!("tag-{}", i % 50)))
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let results: Vec<Vec<Arc<str>>> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        assert_eq!(interner.len(), 50);
        for i in 0..50 {
            let canonical = interner.intern(&format!("tag-{i}"));
            for result in &results {
                assert!(Arc::ptr_eq(&result[i], &canonical));
            }
        }
    }

    #[test]
    fn test_global_intern() {
        let a = intern("global-interning-test");
        let b = global_interner().intern("global-interning-test");
        assert!(Arc::ptr_eq(&a, &b));
    }
}
