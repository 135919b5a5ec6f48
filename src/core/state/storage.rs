// Copyright (c) 2026 Ember
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//     http://www.apache.org/licenses/LICENSE-2.0
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! Sled-backed persistence, organized into a small per-subsystem keyspace
//! convention (`ident/`, `dht/`, `peer/`, `image/`, `topic/`) rather than a
//! single flat Merkle-proved state tree — Ember has no global state root.
//!
//! This is also the concrete [`PersistenceHooks`] implementation backing the
//! node's own ambient storage needs; other collaborators may supply their
//! own implementation of the trait.

use thiserror::Error;

/// Persistence errors.
#[derive(Debug, Error)]
pub enum StateError {
    /// The database failed to open.
    #[error("db open")]
    DbOpen,
    /// A read or write failed.
    #[error("db io")]
    DbIo,
}

/// Narrow save/load collaborator seam. The real storage backend for this
/// node is [`SledPersistence`]; a `stateless` deployment uses [`NullPersistence`].
pub trait PersistenceHooks: Send + Sync {
    /// Persist `blob` under `key`.
    fn save(&self, key: &str, blob: &[u8]);
    /// Load the blob stored under `key`, if any.
    fn load(&self, key: &str) -> Option<Vec<u8>>;
    /// Remove the blob stored under `key`.
    fn delete(&self, key: &str);
    /// List keys under `prefix` (non-recursive keyspace scan).
    fn scan_prefix(&self, prefix: &str) -> Vec<String>;
    /// Flush any buffered writes to durable storage. A no-op for backends
    /// with nothing to flush.
    fn flush(&self) -> Result<(), StateError> {
        Ok(())
    }
}

/// No-op persistence used by `--stateless` relay-only mixer nodes.
#[derive(Default, Clone)]
pub struct NullPersistence;

impl PersistenceHooks for NullPersistence {
    fn save(&self, _key: &str, _blob: &[u8]) {}
    fn load(&self, _key: &str) -> Option<Vec<u8>> {
        None
    }
    fn delete(&self, _key: &str) {}
    fn scan_prefix(&self, _prefix: &str) -> Vec<String> {
        Vec::new()
    }
}

/// Sled-backed implementation of [`PersistenceHooks`], and the low-level
/// store DHT/image/identity code opens directly for typed access.
#[derive(Clone)]
pub struct SledPersistence {
    db: sled::Db,
}

impl SledPersistence {
    /// Open (or create) a sled database at `path`.
    pub fn open(path: &str) -> Result<Self, StateError> {
        let db = sled::open(path).map_err(|_| StateError::DbOpen)?;
        Ok(Self { db })
    }

    /// Raw get, for callers that want typed errors instead of `Option`.
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StateError> {
        let v = self.db.get(key).map_err(|_| StateError::DbIo)?;
        Ok(v.map(|iv| iv.to_vec()))
    }

    /// Raw put.
    pub fn put(&self, key: &[u8], value: &[u8]) -> Result<(), StateError> {
        self.db.insert(key, value).map_err(|_| StateError::DbIo)?;
        Ok(())
    }

    /// Raw remove.
    pub fn remove(&self, key: &[u8]) -> Result<(), StateError> {
        self.db.remove(key).map_err(|_| StateError::DbIo)?;
        Ok(())
    }

    /// Flush to disk; called periodically and on graceful shutdown.
    pub fn flush(&self) -> Result<(), StateError> {
        self.db.flush().map_err(|_| StateError::DbIo)?;
        Ok(())
    }
}

impl PersistenceHooks for SledPersistence {
    fn save(&self, key: &str, blob: &[u8]) {
        if let Err(e) = self.put(key.as_bytes(), blob) {
            tracing::warn!(?e, key, "persistence write failed");
        }
    }

    fn load(&self, key: &str) -> Option<Vec<u8>> {
        self.get(key.as_bytes()).ok().flatten()
    }

    fn delete(&self, key: &str) {
        if let Err(e) = self.remove(key.as_bytes()) {
            tracing::warn!(?e, key, "persistence delete failed");
        }
    }

    fn scan_prefix(&self, prefix: &str) -> Vec<String> {
        self.db
            .scan_prefix(prefix.as_bytes())
            .keys()
            .filter_map(|k| k.ok().and_then(|k| String::from_utf8(k.to_vec()).ok()))
            .collect()
    }

    fn flush(&self) -> Result<(), StateError> {
        SledPersistence::flush(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn save_load_delete_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = SledPersistence::open(dir.path().to_str().unwrap()).unwrap();
        store.save("ident/local", b"secret-bytes");
        assert_eq!(store.load("ident/local"), Some(b"secret-bytes".to_vec()));
        store.delete("ident/local");
        assert_eq!(store.load("ident/local"), None);
    }

    #[test]
    fn scan_prefix_finds_keyspace_members() {
        let dir = tempfile::tempdir().unwrap();
        let store = SledPersistence::open(dir.path().to_str().unwrap()).unwrap();
        store.save("dht/aa", b"1");
        store.save("dht/bb", b"2");
        store.save("peer/cc", b"3");
        let mut keys = store.scan_prefix("dht/");
        keys.sort();
        assert_eq!(keys, vec!["dht/aa".to_string(), "dht/bb".to_string()]);
    }
}
