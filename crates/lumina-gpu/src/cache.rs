//! Path-keyed caches of loaded GPU resources.
//!
//! Entries hold weak references: a cached resource lives as long as some
//! owner holds its `Arc`, and the next load after that re-uploads it.
//! Loaders follow a check-then-set pattern; two threads racing on the same
//! path may both upload, in which case the last `set_cached` wins.

use hashbrown::HashMap;
use parking_lot::Mutex;
use std::sync::{Arc, Weak};

/// Cache of one resource kind keyed by asset path.
pub struct ResourceCache<T> {
    entries: Mutex<HashMap<String, Weak<T>>>,
}

impl<T> ResourceCache<T> {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Whether a live resource is cached for `path`.
    pub fn has_cached(&self, path: &str) -> bool {
        self.entries
            .lock()
            .get(path)
            .is_some_and(|weak| weak.strong_count() > 0)
    }

    /// Shared reference to the cached resource for `path`.
    pub fn get_cached(&self, path: &str) -> Option<Arc<T>> {
        self.entries.lock().get(path).and_then(Weak::upgrade)
    }

    /// Cache `resource` under `path`, replacing any previous entry.
    pub fn set_cached(&self, path: impl Into<String>, resource: &Arc<T>) {
        self.entries
            .lock()
            .insert(path.into(), Arc::downgrade(resource));
    }

    /// Look `path` up, creating and caching the resource on a miss.
    pub fn get_or_try_insert<E>(
        &self,
        path: &str,
        create: impl FnOnce() -> Result<T, E>,
    ) -> Result<Arc<T>, E> {
        if let Some(cached) = self.get_cached(path) {
            return Ok(cached);
        }
        let resource = Arc::new(create()?);
        self.set_cached(path, &resource);
        Ok(resource)
    }

    /// Drop the entry for `path`.
    pub fn evict(&self, path: &str) {
        self.entries.lock().remove(path);
    }

    /// Drop entries whose resource was released.
    pub fn purge(&self) {
        self.entries.lock().retain(|_, weak| weak.strong_count() > 0);
    }

    /// Number of entries, live or not.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl<T> Default for ResourceCache<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn second_load_shares_the_first_upload() {
        let cache = ResourceCache::<String>::new();
        let uploads = Cell::new(0);
        let load = || {
            cache.get_or_try_insert("shaders/pbr", || {
                uploads.set(uploads.get() + 1);
                Ok::<_, ()>("pbr".to_string())
            })
        };
        let first = load().unwrap();
        let second = load().unwrap();
        assert_eq!(uploads.get(), 1);
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn released_resources_are_reloaded() {
        let cache = ResourceCache::<u32>::new();
        let resource = Arc::new(5);
        cache.set_cached("textures/albedo.png", &resource);
        assert!(cache.has_cached("textures/albedo.png"));
        drop(resource);
        assert!(!cache.has_cached("textures/albedo.png"));
        assert!(cache.get_cached("textures/albedo.png").is_none());
        cache.purge();
        assert!(cache.is_empty());
    }

    #[test]
    fn evict_forgets_live_entry() {
        let cache = ResourceCache::<u32>::new();
        let resource = Arc::new(1);
        cache.set_cached("models/box", &resource);
        cache.evict("models/box");
        assert!(!cache.has_cached("models/box"));
        assert_eq!(*resource, 1);
    }

    #[test]
    fn failed_creation_caches_nothing() {
        let cache = ResourceCache::<u32>::new();
        let result = cache.get_or_try_insert("missing", || Err::<u32, _>("not found"));
        assert!(result.is_err());
        assert!(cache.is_empty());
    }
}
