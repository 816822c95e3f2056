//! # File Sync Engine (C8)
//!
//! ## Why This Module Exists
//! The controller and the backend need to agree on a handful of named
//! config/credential files without either side having filesystem access to
//! the other. This module is the authority on what those files are, what
//! they currently contain on disk, and whether they've drifted since the
//! last reconciliation (spec §4.7).
//!
//! ## Design Rationale
//! Three mappings are kept deliberately separate rather than merged into
//! one struct: the definition set (what should exist), the remote hash
//! mirror (what the backend last saw), and the local hash cache (what
//! `did_file_change` compares against). Keeping them separate lets the
//! router (C9) reconcile them independently, matching the three-way
//! convergence spec.md's testable properties describe.

pub mod definition;
pub mod encoding;

use definition::FileDefinition;
use md5::{Digest, Md5};
use std::collections::BTreeMap;
use std::sync::Mutex;

/// Sentinel hash for a file that does not exist on disk (spec §4.7,
/// grounded in `file_writer.py::calc_file_hash`).
pub const NO_FILE_SENTINEL: &str = "E_NOFILE";

#[derive(Debug, Clone, Default)]
pub struct RemoteHashEntry {
    pub hash: String,
    pub write_version: Option<String>,
}

pub struct FileEngine {
    definitions: Mutex<BTreeMap<String, FileDefinition>>,
    remote_hashes: Mutex<BTreeMap<String, RemoteHashEntry>>,
    local_hash_cache: Mutex<BTreeMap<String, String>>,
}

impl Default for FileEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl FileEngine {
    pub fn new() -> Self {
        Self {
            definitions: Mutex::new(BTreeMap::new()),
            remote_hashes: Mutex::new(BTreeMap::new()),
            local_hash_cache: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn set_definitions(&self, definitions: BTreeMap<String, FileDefinition>) {
        *self.definitions.lock().unwrap() = definitions;
    }

    pub fn definitions(&self) -> BTreeMap<String, FileDefinition> {
        self.definitions.lock().unwrap().clone()
    }

    pub fn definition(&self, key: &str) -> Option<FileDefinition> {
        self.definitions.lock().unwrap().get(key).cloned()
    }

    pub fn set_remote_hash(&self, key: &str, entry: RemoteHashEntry) {
        self.remote_hashes.lock().unwrap().insert(key.to_string(), entry);
    }

    pub fn remote_hash(&self, key: &str) -> Option<RemoteHashEntry> {
        self.remote_hashes.lock().unwrap().get(key).cloned()
    }

    pub fn remote_hash_keys(&self) -> Vec<String> {
        self.remote_hashes.lock().unwrap().keys().cloned().collect()
    }

    pub fn forget_remote_hash(&self, key: &str) {
        self.remote_hashes.lock().unwrap().remove(key);
    }

    /// The only disk-read primitive (spec §4.7).
    pub fn read_raw(path: &str) -> Option<Vec<u8>> {
        std::fs::read(path).ok()
    }

    /// Applies the definition's encoding to the file's bytes. Unknown
    /// encodings never reach here — [`definition::parse_definitions`]
    /// rejects them at ingestion, so this only ever sees the three valid
    /// variants.
    pub fn read(path: &str, encoding: definition::Encoding) -> Option<String> {
        let bytes = Self::read_raw(path)?;
        encoding::encode_for_wire(&bytes, encoding)
    }

    /// MD5-hex over the file bytes, or [`NO_FILE_SENTINEL`] for a missing
    /// file (spec §4.7).
    pub fn hash(path: &str) -> String {
        match Self::read_raw(path) {
            Some(bytes) => {
                let mut hasher = Md5::new();
                hasher.update(&bytes);
                format!("{:x}", hasher.finalize())
            }
            None => NO_FILE_SENTINEL.to_string(),
        }
    }

    /// Recomputes the hash and compares it to the cached value for `path`.
    /// On first observation, primes the cache and reports no change (spec
    /// §4.7).
    pub fn did_file_change(&self, path: &str) -> bool {
        let current = Self::hash(path);
        let mut cache = self.local_hash_cache.lock().unwrap();
        match cache.insert(path.to_string(), current.clone()) {
            None => false,
            Some(previous) => previous != current,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use definition::Encoding;

    #[test]
    fn missing_file_hashes_to_sentinel() {
        assert_eq!(FileEngine::hash("/nonexistent/path/for/teg-gateway-tests"), NO_FILE_SENTINEL);
    }

    #[test]
    fn existing_file_hashes_to_md5_hex() {
        let dir = std::env::temp_dir().join(format!("teg-gateway-test-{:?}", std::thread::current().id()));
        std::fs::write(&dir, b"hello").unwrap();
        let expected = format!("{:x}", Md5::digest(b"hello"));
        assert_eq!(FileEngine::hash(dir.to_str().unwrap()), expected);
        std::fs::remove_file(&dir).unwrap();
    }

    #[test]
    fn first_observation_primes_cache_without_reporting_change() {
        let engine = FileEngine::new();
        assert!(!engine.did_file_change("/nonexistent/teg-gateway-test-path"));
        assert!(!engine.did_file_change("/nonexistent/teg-gateway-test-path"));
    }

    #[test]
    fn change_is_detected_after_priming() {
        let dir = std::env::temp_dir()
            .join(format!("teg-gateway-test-change-{:?}", std::thread::current().id()));
        std::fs::write(&dir, b"v1").unwrap();
        let engine = FileEngine::new();
        let path = dir.to_str().unwrap();
        assert!(!engine.did_file_change(path));
        std::fs::write(&dir, b"v2").unwrap();
        assert!(engine.did_file_change(path));
        assert!(!engine.did_file_change(path));
        std::fs::remove_file(&dir).unwrap();
    }

    #[test]
    fn read_applies_encoding() {
        let dir =
            std::env::temp_dir().join(format!("teg-gateway-test-read-{:?}", std::thread::current().id()));
        std::fs::write(&dir, b"hi").unwrap();
        let path = dir.to_str().unwrap();
        assert_eq!(FileEngine::read(path, Encoding::Text), Some("hi".to_string()));
        assert_eq!(FileEngine::read(path, Encoding::Base64), Some("aGk=".to_string()));
        std::fs::remove_file(&dir).unwrap();
    }
}
