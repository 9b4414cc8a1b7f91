//! Deduplicating pool for large repeated strings such as commit hashes.

use std::{collections::HashSet, sync::Arc};

use parking_lot::Mutex;

/// Interns strings as shared `Arc<str>`. Owned by the model; readers only
/// ever see the immutable `Arc<str>` handles it hands out.
#[derive(Default)]
pub struct StringPool {
    strings: Mutex<HashSet<Arc<str>>>,
}

impl StringPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, s: &str) -> Arc<str> {
        let mut strings = self.strings.lock();
        if let Some(existing) = strings.get(s) {
            return existing.clone();
        }
        let interned: Arc<str> = Arc::from(s);
        strings.insert(interned.clone());
        interned
    }

    pub fn len(&self) -> usize {
        self.strings.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop strings nobody outside the pool references any more.
    pub fn prune(&self) -> usize {
        let mut strings = self.strings.lock();
        let before = strings.len();
        strings.retain(|s| Arc::strong_count(s) > 1);
        before - strings.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_string_shares_storage() {
        let pool = StringPool::new();
        let a = pool.add("4f2c0d9e1b7a");
        let b = pool.add("4f2c0d9e1b7a");
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn prune_drops_unreferenced_entries() {
        let pool = StringPool::new();
        let kept = pool.add("kept");
        drop(pool.add("dropped"));
        assert_eq!(pool.prune(), 1);
        assert_eq!(pool.len(), 1);
        assert_eq!(&*kept, "kept");
    }
}
