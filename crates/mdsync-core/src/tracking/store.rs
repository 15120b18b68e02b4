//! Change-tracking persistence in the state directory
//!
//! Caches live outside the project so deploying never dirties the source tree.
//! Per-project file: `<store_dir>/<project_key>.json`

use anyhow::Context;
use std::fs;
use std::path::{Path, PathBuf};

use super::types::ChangeTrackingCache;

/// Loads and saves the cache file of one project.
#[derive(Debug, Clone)]
pub struct ChangeTrackingStore {
    store_dir: PathBuf,
    project_root: PathBuf,
}

impl ChangeTrackingStore {
    pub fn new(store_dir: PathBuf, project_root: PathBuf) -> Self {
        Self {
            store_dir,
            project_root,
        }
    }

    pub fn store_dir(&self) -> &Path {
        &self.store_dir
    }

    /// Generate stable project key from path
    ///
    /// Uses canonical path if possible; falls back to the path as given.
    ///
    /// # Note
    /// Moving a project directory will generate a new key (new cache).
    pub fn project_key(project_root: &Path) -> String {
        let path = fs::canonicalize(project_root).unwrap_or_else(|_| project_root.to_path_buf());
        let hash = blake3::hash(path.to_string_lossy().as_bytes());
        hash.to_hex().to_string()
    }

    pub fn cache_path(&self) -> PathBuf {
        self.store_dir
            .join(format!("{}.json", Self::project_key(&self.project_root)))
    }

    /// Load the cache from disk
    ///
    /// Returns a new empty cache if the file doesn't exist.
    pub fn load(&self) -> anyhow::Result<ChangeTrackingCache> {
        let cache_path = self.cache_path();
        if !cache_path.exists() {
            return Ok(ChangeTrackingCache::new());
        }

        let bytes = fs::read(&cache_path)
            .with_context(|| format!("Failed to read cache: {}", cache_path.display()))?;
        let cache: ChangeTrackingCache = serde_json::from_slice(&bytes)
            .with_context(|| format!("Failed to parse cache: {}", cache_path.display()))?;
        cache.validate()?;
        tracing::debug!(path = %cache_path.display(), entries = cache.entries.len(), "loaded change-tracking cache");
        Ok(cache)
    }

    /// Save the cache atomically (tmp + rename)
    pub fn save(&self, cache: &ChangeTrackingCache) -> anyhow::Result<()> {
        fs::create_dir_all(&self.store_dir).with_context(|| {
            format!("Failed to create store directory: {}", self.store_dir.display())
        })?;

        let cache_path = self.cache_path();
        let tmp_path = self
            .store_dir
            .join(format!("{}.json.tmp", std::process::id()));

        let mut cache = cache.clone();
        cache.generated_at = chrono::Utc::now();
        let bytes = serde_json::to_vec_pretty(&cache).context("Failed to serialize cache")?;

        fs::write(&tmp_path, bytes)
            .with_context(|| format!("Failed to write tmp cache: {}", tmp_path.display()))?;

        // Remove target first on Windows for replace semantics
        if cfg!(windows) && cache_path.exists() {
            fs::remove_file(&cache_path).with_context(|| {
                format!("Failed to remove existing cache: {}", cache_path.display())
            })?;
        }
        fs::rename(&tmp_path, &cache_path)
            .with_context(|| format!("Failed to rename tmp cache: {}", tmp_path.display()))?;

        tracing::debug!(path = %cache_path.display(), entries = cache.entries.len(), "saved change-tracking cache");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::HashAlgorithm;
    use crate::remote::RemoteSnapshot;
    use crate::tracking::ChangeTrackingEntry;
    use tempfile::TempDir;

    fn entry(hash: &str) -> ChangeTrackingEntry {
        ChangeTrackingEntry {
            local_mtime: 1_000,
            hash_algorithm: HashAlgorithm::Blake3,
            hash: hash.to_string(),
            remote: RemoteSnapshot::default(),
        }
    }

    #[test]
    fn missing_file_loads_empty_cache() {
        let tmp = TempDir::new().unwrap();
        let store = ChangeTrackingStore::new(tmp.path().join("state"), tmp.path().join("project"));
        let cache = store.load().unwrap();
        assert!(cache.entries.is_empty());
    }

    #[test]
    fn save_then_load_keeps_entries() {
        let tmp = TempDir::new().unwrap();
        let project = tmp.path().join("project");
        std::fs::create_dir_all(&project).unwrap();
        let store = ChangeTrackingStore::new(tmp.path().join("state"), project);

        let mut cache = ChangeTrackingCache::new();
        cache.insert("classes/Foo.cls".to_string(), entry("abc"));
        store.save(&cache).unwrap();

        let loaded = store.load().unwrap();
        assert_eq!(loaded.get("classes/Foo.cls"), Some(&entry("abc")));

        let leftovers: Vec<_> = std::fs::read_dir(store.store_dir())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty(), "tmp file should be renamed away");
    }

    #[test]
    fn projects_get_separate_files() {
        let tmp = TempDir::new().unwrap();
        let a = ChangeTrackingStore::new(tmp.path().to_path_buf(), tmp.path().join("a"));
        let b = ChangeTrackingStore::new(tmp.path().to_path_buf(), tmp.path().join("b"));
        assert_ne!(a.cache_path(), b.cache_path());
    }

    #[test]
    fn corrupt_cache_is_an_error() {
        let tmp = TempDir::new().unwrap();
        let store = ChangeTrackingStore::new(tmp.path().to_path_buf(), tmp.path().join("p"));
        std::fs::write(store.cache_path(), "{not json").unwrap();
        assert!(store.load().is_err());
    }
}
