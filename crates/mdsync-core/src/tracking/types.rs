//! Change-tracking cache types.
//!
//! Records, per deployed file, what the local copy looked like and what the
//! remote reported at the last successful deploy or refresh.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::UNIX_EPOCH;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::hash::HashAlgorithm;
use crate::remote::RemoteSnapshot;

const CACHE_VERSION: u32 = 1;

/// Baseline for one tracked file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeTrackingEntry {
    /// Local modification time in milliseconds since the epoch.
    pub local_mtime: i64,
    pub hash_algorithm: HashAlgorithm,
    pub hash: String,
    #[serde(default)]
    pub remote: RemoteSnapshot,
}

impl ChangeTrackingEntry {
    /// Baseline of a file as it is on disk right now.
    pub fn capture(path: &Path, algorithm: HashAlgorithm, remote: RemoteSnapshot) -> anyhow::Result<Self> {
        Ok(Self {
            local_mtime: mtime_millis(path)?,
            hash_algorithm: algorithm,
            hash: algorithm.hash_file(path)?,
            remote,
        })
    }
}

/// All baselines of one project.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeTrackingCache {
    pub version: u32,

    /// Timestamp of the last write
    pub generated_at: chrono::DateTime<chrono::Utc>,

    #[serde(default)]
    pub entries: BTreeMap<String, ChangeTrackingEntry>,
}

impl ChangeTrackingCache {
    pub fn new() -> Self {
        Self {
            version: CACHE_VERSION,
            generated_at: chrono::Utc::now(),
            entries: BTreeMap::new(),
        }
    }

    pub fn get(&self, key: &str) -> Option<&ChangeTrackingEntry> {
        self.entries.get(key)
    }

    pub fn insert(&mut self, key: String, entry: ChangeTrackingEntry) {
        self.entries.insert(key, entry);
    }

    pub fn remove(&mut self, key: &str) -> Option<ChangeTrackingEntry> {
        self.entries.remove(key)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.version != CACHE_VERSION {
            anyhow::bail!("Unsupported change-tracking cache version: {}", self.version);
        }
        Ok(())
    }
}

impl Default for ChangeTrackingCache {
    fn default() -> Self {
        Self::new()
    }
}

/// Modification time of a file in milliseconds since the epoch.
pub fn mtime_millis(path: &Path) -> anyhow::Result<i64> {
    let modified = std::fs::metadata(path)
        .and_then(|m| m.modified())
        .with_context(|| format!("Failed to read modification time: {}", path.display()))?;
    let millis = match modified.duration_since(UNIX_EPOCH) {
        Ok(after) => after.as_millis() as i64,
        Err(before) => -(before.duration().as_millis() as i64),
    };
    Ok(millis)
}
