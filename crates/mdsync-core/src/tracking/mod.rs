//! Change tracking: local baselines per deployed file.
//!
//! The cache is read lazily, at most once per invocation, and written at most
//! once, after a successful operation.

pub mod store;
pub mod types;

use std::cell::OnceCell;
use std::path::Path;

pub use store::ChangeTrackingStore;
pub use types::{ChangeTrackingCache, ChangeTrackingEntry, mtime_millis};

use crate::hash::HashAlgorithm;
use crate::remote::RemoteSnapshot;

/// Lazy view over one project's change-tracking cache.
#[derive(Debug)]
pub struct ChangeTracker {
    store: ChangeTrackingStore,
    algorithm: HashAlgorithm,
    cache: OnceCell<ChangeTrackingCache>,
    dirty: bool,
}

impl ChangeTracker {
    pub fn new(store: ChangeTrackingStore, algorithm: HashAlgorithm) -> Self {
        Self {
            store,
            algorithm,
            cache: OnceCell::new(),
            dirty: false,
        }
    }

    pub fn algorithm(&self) -> HashAlgorithm {
        self.algorithm
    }

    pub fn cache(&self) -> anyhow::Result<&ChangeTrackingCache> {
        if let Some(cache) = self.cache.get() {
            return Ok(cache);
        }
        let loaded = self.store.load()?;
        Ok(self.cache.get_or_init(|| loaded))
    }

    fn cache_mut(&mut self) -> anyhow::Result<&mut ChangeTrackingCache> {
        self.cache()?;
        self.dirty = true;
        self.cache
            .get_mut()
            .ok_or_else(|| anyhow::anyhow!("change-tracking cache is not loaded"))
    }

    pub fn entry(&self, key: &str) -> anyhow::Result<Option<&ChangeTrackingEntry>> {
        Ok(self.cache()?.get(key))
    }

    /// Whether the file at `path` differs from its recorded baseline.
    ///
    /// An untouched mtime short-circuits to "unchanged"; otherwise the content
    /// hash decides. Baselines recorded with another algorithm are stale.
    pub fn is_modified(&self, key: &str, path: &Path) -> anyhow::Result<bool> {
        let Some(entry) = self.entry(key)? else {
            return Ok(true);
        };
        if entry.hash_algorithm != self.algorithm {
            return Ok(true);
        }
        if entry.local_mtime == mtime_millis(path)? {
            return Ok(false);
        }
        Ok(self.algorithm.hash_file(path)? != entry.hash)
    }

    /// Refresh the baseline of `key` from the file on disk.
    pub fn record(&mut self, key: &str, path: &Path, remote: RemoteSnapshot) -> anyhow::Result<()> {
        let entry = ChangeTrackingEntry::capture(path, self.algorithm, remote)?;
        self.cache_mut()?.insert(key.to_string(), entry);
        Ok(())
    }

    /// Store a baseline computed elsewhere (e.g. while extracting an archive).
    pub fn insert(&mut self, key: &str, entry: ChangeTrackingEntry) -> anyhow::Result<()> {
        self.cache_mut()?.insert(key.to_string(), entry);
        Ok(())
    }

    pub fn remove(&mut self, key: &str) -> anyhow::Result<bool> {
        Ok(self.cache_mut()?.remove(key).is_some())
    }

    /// Write the cache if anything changed since it was loaded.
    pub fn save(&mut self) -> anyhow::Result<()> {
        if !self.dirty {
            return Ok(());
        }
        if let Some(cache) = self.cache.get() {
            self.store.save(cache)?;
        }
        self.dirty = false;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn tracker(tmp: &TempDir, algorithm: HashAlgorithm) -> ChangeTracker {
        let store = ChangeTrackingStore::new(tmp.path().join("state"), tmp.path().join("project"));
        ChangeTracker::new(store, algorithm)
    }

    #[test]
    fn untracked_file_is_modified() {
        let tmp = TempDir::new().unwrap();
        let file = tmp.path().join("Foo.cls");
        std::fs::write(&file, "a").unwrap();
        let tracker = tracker(&tmp, HashAlgorithm::Blake3);
        assert!(tracker.is_modified("classes/Foo.cls", &file).unwrap());
    }

    #[test]
    fn touched_but_identical_file_is_not_modified() {
        let tmp = TempDir::new().unwrap();
        let file = tmp.path().join("Foo.cls");
        std::fs::write(&file, "a").unwrap();
        let mut tracker = tracker(&tmp, HashAlgorithm::Blake3);
        tracker
            .record("classes/Foo.cls", &file, RemoteSnapshot::default())
            .unwrap();

        filetime::set_file_mtime(&file, filetime::FileTime::from_unix_time(2_000_000_000, 0))
            .unwrap();
        assert!(!tracker.is_modified("classes/Foo.cls", &file).unwrap());

        std::fs::write(&file, "b").unwrap();
        filetime::set_file_mtime(&file, filetime::FileTime::from_unix_time(2_000_000_100, 0))
            .unwrap();
        assert!(tracker.is_modified("classes/Foo.cls", &file).unwrap());
    }

    #[test]
    fn other_algorithm_baseline_is_stale() {
        let tmp = TempDir::new().unwrap();
        let file = tmp.path().join("Foo.cls");
        std::fs::write(&file, "a").unwrap();

        let mut sha = tracker(&tmp, HashAlgorithm::Sha256);
        sha.record("classes/Foo.cls", &file, RemoteSnapshot::default())
            .unwrap();
        sha.save().unwrap();

        let blake = tracker(&tmp, HashAlgorithm::Blake3);
        assert!(blake.is_modified("classes/Foo.cls", &file).unwrap());
    }

    #[test]
    fn save_without_changes_writes_nothing() {
        let tmp = TempDir::new().unwrap();
        let mut tracker = tracker(&tmp, HashAlgorithm::Blake3);
        tracker.entry("classes/Foo.cls").unwrap();
        tracker.save().unwrap();
        assert!(!tmp.path().join("state").exists());
    }

    #[test]
    fn remove_drops_entry_and_persists() {
        let tmp = TempDir::new().unwrap();
        let file = tmp.path().join("Foo.cls");
        std::fs::write(&file, "a").unwrap();
        let mut first = tracker(&tmp, HashAlgorithm::Blake3);
        first
            .record("classes/Foo.cls", &file, RemoteSnapshot::default())
            .unwrap();
        first.save().unwrap();

        let mut second = tracker(&tmp, HashAlgorithm::Blake3);
        assert!(second.remove("classes/Foo.cls").unwrap());
        second.save().unwrap();

        let third = tracker(&tmp, HashAlgorithm::Blake3);
        assert!(third.entry("classes/Foo.cls").unwrap().is_none());
    }
}
