//! Per-process LRU cache for folder hashes.
//!
//! Keyed by absolute path. The inbox watcher invalidates every entry under a
//! path whenever a filesystem event arrives, so stale hashes never outlive a
//! content change.

use std::collections::HashMap;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use super::classify::FolderClassifier;
use super::hasher::folder_hash;
use crate::importer::error::ImportError;

pub struct HashCache {
    capacity: usize,
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    entries: HashMap<PathBuf, String>,
    order: VecDeque<PathBuf>,
}

impl HashCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            inner: Mutex::new(Inner::default()),
        }
    }

    pub fn get(&self, path: &Path) -> Option<String> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(hash) = inner.entries.get(path).cloned() {
            // Move to the back, most-recently-used.
            inner.order.retain(|p| p != path);
            inner.order.push_back(path.to_path_buf());
            Some(hash)
        } else {
            None
        }
    }

    pub fn put(&self, path: &Path, hash: String) {
        let mut inner = self.inner.lock().unwrap();
        if inner.entries.insert(path.to_path_buf(), hash).is_none() {
            inner.order.push_back(path.to_path_buf());
        } else {
            inner.order.retain(|p| p != path);
            inner.order.push_back(path.to_path_buf());
        }
        while inner.entries.len() > self.capacity {
            if let Some(evicted) = inner.order.pop_front() {
                inner.entries.remove(&evicted);
            } else {
                break;
            }
        }
    }

    /// Drop every cached hash at or under `path`, and for every ancestor
    /// whose cached hash covered it.
    pub fn invalidate_under(&self, path: &Path) {
        let mut inner = self.inner.lock().unwrap();
        let stale: Vec<PathBuf> = inner
            .entries
            .keys()
            .filter(|key| key.starts_with(path) || path.starts_with(key))
            .cloned()
            .collect();
        for key in &stale {
            inner.entries.remove(key);
        }
        inner.order.retain(|p| !stale.contains(p));
    }

    pub fn get_or_compute(
        &self,
        path: &Path,
        classifier: &FolderClassifier,
    ) -> Result<String, ImportError> {
        if let Some(hash) = self.get(path) {
            return Ok(hash);
        }
        let hash = folder_hash(path, classifier)?;
        self.put(path, hash.clone());
        Ok(hash)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_put_get() {
        let cache = HashCache::new(4);
        cache.put(Path::new("/music/a"), "h1".into());
        assert_eq!(cache.get(Path::new("/music/a")), Some("h1".into()));
        assert_eq!(cache.get(Path::new("/music/b")), None);
    }

    #[test]
    fn test_capacity_evicts_least_recently_used() {
        let cache = HashCache::new(2);
        cache.put(Path::new("/a"), "1".into());
        cache.put(Path::new("/b"), "2".into());
        // Touch /a so /b becomes the eviction victim.
        let _ = cache.get(Path::new("/a"));
        cache.put(Path::new("/c"), "3".into());

        assert_eq!(cache.get(Path::new("/a")), Some("1".into()));
        assert_eq!(cache.get(Path::new("/b")), None);
        assert_eq!(cache.get(Path::new("/c")), Some("3".into()));
    }

    #[test]
    fn test_invalidate_under_removes_subtree_and_ancestors() {
        let cache = HashCache::new(8);
        cache.put(Path::new("/inbox/album"), "h1".into());
        cache.put(Path::new("/inbox/album/CD1"), "h2".into());
        cache.put(Path::new("/inbox/other"), "h3".into());

        cache.invalidate_under(Path::new("/inbox/album/CD1/track.mp3"));

        assert_eq!(cache.get(Path::new("/inbox/album")), None);
        assert_eq!(cache.get(Path::new("/inbox/album/CD1")), None);
        assert_eq!(cache.get(Path::new("/inbox/other")), Some("h3".into()));
    }

    #[test]
    fn test_get_or_compute_caches() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("t.mp3"), b"aaaa").unwrap();

        let cache = HashCache::new(4);
        let classifier = FolderClassifier::default();
        let first = cache.get_or_compute(dir.path(), &classifier).unwrap();
        assert_eq!(cache.len(), 1);
        let second = cache.get_or_compute(dir.path(), &classifier).unwrap();
        assert_eq!(first, second);
    }
}
