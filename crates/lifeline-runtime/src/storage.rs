//! Keyed record storage shared by the response cache and the handoff queue.
//!
//! Records live in memory and, when a path is configured, are persisted as
//! a single JSON document. Every write replaces the file through a temp file
//! and rename so a crash never leaves a half-written document behind.

use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::sync::Mutex;

/// Errors from the record store.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Storage I/O failed for {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to encode records: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("Corrupt store file {path}: {reason}")]
    Corrupt { path: PathBuf, reason: String },
}

/// Durable map from string keys to records.
pub struct RecordStore<V> {
    records: RwLock<BTreeMap<String, V>>,
    path: Option<PathBuf>,
    /// Serializes persistence so snapshots hit the disk in write order
    write_lock: Mutex<()>,
}

impl<V> RecordStore<V>
where
    V: Clone + Serialize + DeserializeOwned + Send + Sync,
{
    /// A store that lives only in memory.
    pub fn in_memory() -> Self {
        Self {
            records: RwLock::new(BTreeMap::new()),
            path: None,
            write_lock: Mutex::new(()),
        }
    }

    /// Open (or create) a store backed by `path`.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();

        let records = match tokio::fs::read_to_string(&path).await {
            Ok(content) if content.trim().is_empty() => BTreeMap::new(),
            Ok(content) => {
                serde_json::from_str(&content).map_err(|e| StoreError::Corrupt {
                    path: path.clone(),
                    reason: e.to_string(),
                })?
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                    tokio::fs::create_dir_all(parent)
                        .await
                        .map_err(|source| StoreError::Io {
                            path: parent.to_path_buf(),
                            source,
                        })?;
                }
                BTreeMap::new()
            }
            Err(source) => return Err(StoreError::Io { path, source }),
        };

        tracing::debug!(path = %path.display(), records = records.len(), "Opened record store");

        Ok(Self {
            records: RwLock::new(records),
            path: Some(path),
            write_lock: Mutex::new(()),
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn get(&self, key: &str) -> Option<V> {
        self.records.read().get(key).cloned()
    }

    /// Snapshot of every record, in key order.
    pub fn values(&self) -> Vec<V> {
        self.records.read().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    /// Insert or replace a record.
    ///
    /// If persistence fails the in-memory map is restored to its previous state.
    pub async fn upsert(&self, key: String, value: V) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;

        let previous = self.records.write().insert(key.clone(), value);

        if let Err(e) = self.persist().await {
            let mut records = self.records.write();
            match previous {
                Some(old) => records.insert(key, old),
                None => records.remove(&key),
            };
            return Err(e);
        }
        Ok(())
    }

    /// Insert a record only if `key` is free. Returns false when taken.
    pub async fn insert_new(&self, key: String, value: V) -> Result<bool, StoreError> {
        let _guard = self.write_lock.lock().await;

        {
            let mut records = self.records.write();
            if records.contains_key(&key) {
                return Ok(false);
            }
            records.insert(key.clone(), value);
        }

        if let Err(e) = self.persist().await {
            self.records.write().remove(&key);
            return Err(e);
        }
        Ok(true)
    }

    /// Apply `f` to the record under `key`. Returns false when absent.
    pub async fn update<F>(&self, key: &str, f: F) -> Result<bool, StoreError>
    where
        F: FnOnce(&mut V) + Send,
    {
        let _guard = self.write_lock.lock().await;

        let previous = {
            let mut records = self.records.write();
            match records.get_mut(key) {
                Some(record) => {
                    let previous = record.clone();
                    f(record);
                    previous
                }
                None => return Ok(false),
            }
        };

        if let Err(e) = self.persist().await {
            self.records.write().insert(key.to_string(), previous);
            return Err(e);
        }
        Ok(true)
    }

    async fn persist(&self) -> Result<(), StoreError> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        let body = {
            let records = self.records.read();
            serde_json::to_vec_pretty(&*records)?
        };

        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, body)
            .await
            .map_err(|source| StoreError::Io {
                path: tmp.clone(),
                source,
            })?;
        tokio::fs::rename(&tmp, path)
            .await
            .map_err(|source| StoreError::Io {
                path: path.clone(),
                source,
            })
    }
}
