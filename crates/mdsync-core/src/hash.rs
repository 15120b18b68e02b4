//! Content hashing for change detection.
//!
//! Two interchangeable algorithms are supported. A project uses exactly one,
//! chosen by configuration; baselines recorded with the other one are treated
//! as stale rather than compared.

use std::fmt;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::str::FromStr;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::MdsyncError;

const BUFFER_SIZE: usize = 64 * 1024;

/// Hash algorithm used for change-tracking baselines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashAlgorithm {
    #[default]
    Blake3,
    Sha256,
}

impl HashAlgorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Blake3 => "blake3",
            Self::Sha256 => "sha256",
        }
    }

    pub fn hasher(&self) -> ContentHasher {
        match self {
            Self::Blake3 => ContentHasher::Blake3(Box::new(blake3::Hasher::new())),
            Self::Sha256 => ContentHasher::Sha256(Sha256::new()),
        }
    }

    pub fn hash_bytes(&self, bytes: &[u8]) -> String {
        let mut hasher = self.hasher();
        hasher.update(bytes);
        hasher.finalize()
    }

    /// Hash a file by streaming it through a fixed-size buffer.
    pub fn hash_file(&self, path: &Path) -> anyhow::Result<String> {
        let mut file =
            File::open(path).with_context(|| format!("Failed to open file: {}", path.display()))?;
        let mut hasher = self.hasher();
        let mut buffer = vec![0u8; BUFFER_SIZE];
        loop {
            let read = file
                .read(&mut buffer)
                .with_context(|| format!("Failed to read file: {}", path.display()))?;
            if read == 0 {
                break;
            }
            hasher.update(&buffer[..read]);
        }
        Ok(hasher.finalize())
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HashAlgorithm {
    type Err = MdsyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "blake3" => Ok(Self::Blake3),
            "sha256" | "sha-256" => Ok(Self::Sha256),
            other => Err(MdsyncError::config(format!(
                "unsupported hash algorithm '{}', expected blake3 or sha256",
                other
            ))),
        }
    }
}

/// Incremental hasher for either algorithm.
pub enum ContentHasher {
    Blake3(Box<blake3::Hasher>),
    Sha256(Sha256),
}

impl ContentHasher {
    pub fn update(&mut self, bytes: &[u8]) {
        match self {
            Self::Blake3(hasher) => {
                hasher.update(bytes);
            }
            Self::Sha256(hasher) => hasher.update(bytes),
        }
    }

    /// Lowercase hex digest.
    pub fn finalize(self) -> String {
        match self {
            Self::Blake3(hasher) => hasher.finalize().to_hex().to_string(),
            Self::Sha256(hasher) => format!("{:x}", hasher.finalize()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn algorithms_produce_different_digests() {
        let blake = HashAlgorithm::Blake3.hash_bytes(b"public class Foo {}");
        let sha = HashAlgorithm::Sha256.hash_bytes(b"public class Foo {}");
        assert_eq!(blake.len(), 64);
        assert_eq!(sha.len(), 64);
        assert_ne!(blake, sha);
    }

    #[test]
    fn sha256_matches_known_vector() {
        assert_eq!(
            HashAlgorithm::Sha256.hash_bytes(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn file_hash_equals_bytes_hash() {
        let tmp = TempDir::new().expect("tempdir should succeed");
        let path = tmp.path().join("Foo.cls");
        let content = "x".repeat(BUFFER_SIZE * 2 + 17);
        std::fs::write(&path, &content).expect("write should succeed");

        for algorithm in [HashAlgorithm::Blake3, HashAlgorithm::Sha256] {
            let from_file = algorithm.hash_file(&path).expect("hash_file should succeed");
            assert_eq!(from_file, algorithm.hash_bytes(content.as_bytes()));
        }
    }

    #[test]
    fn parses_algorithm_names() {
        assert_eq!("BLAKE3".parse::<HashAlgorithm>().unwrap(), HashAlgorithm::Blake3);
        assert_eq!("sha256".parse::<HashAlgorithm>().unwrap(), HashAlgorithm::Sha256);
        assert!("md5".parse::<HashAlgorithm>().is_err());
    }
}
