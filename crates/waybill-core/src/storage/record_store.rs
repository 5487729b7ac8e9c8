use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use thiserror::Error;

/// Errors produced by record store implementations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum StoreError {
    /// Backing storage could not be opened or its schema created.
    #[error("storage init failed: {reason}")]
    Init { reason: String },
    /// Upsert statement could not be prepared or executed.
    #[error("storage write failed: {reason}")]
    Write { reason: String },
    /// Lookup statement could not be prepared or executed.
    #[error("storage read failed: {reason}")]
    Read { reason: String },
    /// Requested key does not exist.
    #[error("entry not found for key: {key}")]
    NotFound { key: String },
    /// The store has been closed.
    #[error("store is closed")]
    Closed,
}

impl StoreError {
    /// Lookup misses are expected; everything else is a real failure.
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }
}

/// Durable key -> bytes mapping with upsert semantics.
///
/// Implementations must be safe to share between threads: every operation is
/// serialized internally so callers never coordinate access themselves.
pub trait RecordStore: Send + Sync {
    /// Persist a value under a key, replacing any existing entry.
    fn put(&self, key: &str, value: &[u8]) -> Result<(), StoreError>;

    /// Retrieve the value for a key.
    fn get(&self, key: &str) -> Result<Vec<u8>, StoreError>;

    /// Release underlying resources. Calling it again is a no-op.
    fn close(&self) -> Result<(), StoreError>;
}

impl<S: RecordStore + ?Sized> RecordStore for Arc<S> {
    fn put(&self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        (**self).put(key, value)
    }

    fn get(&self, key: &str) -> Result<Vec<u8>, StoreError> {
        (**self).get(key)
    }

    fn close(&self) -> Result<(), StoreError> {
        (**self).close()
    }
}

/// In-memory record store for tests and smoke runs.
#[derive(Debug, Clone)]
pub struct InMemoryRecordStore {
    inner: Arc<Mutex<Option<HashMap<String, Vec<u8>>>>>,
}

impl InMemoryRecordStore {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Some(HashMap::new()))),
        }
    }

    fn with_map<T>(
        &self,
        f: impl FnOnce(&mut HashMap<String, Vec<u8>>) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let mut guard = self.inner.lock().map_err(|err| StoreError::Read {
            reason: format!("lock poisoned: {err}"),
        })?;
        match guard.as_mut() {
            Some(map) => f(map),
            None => Err(StoreError::Closed),
        }
    }
}

impl Default for InMemoryRecordStore {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordStore for InMemoryRecordStore {
    fn put(&self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        self.with_map(|map| {
            map.insert(key.to_string(), value.to_vec());
            Ok(())
        })
    }

    fn get(&self, key: &str) -> Result<Vec<u8>, StoreError> {
        self.with_map(|map| {
            map.get(key).cloned().ok_or_else(|| StoreError::NotFound {
                key: key.to_string(),
            })
        })
    }

    fn close(&self) -> Result<(), StoreError> {
        let mut guard = self.inner.lock().map_err(|err| StoreError::Write {
            reason: format!("lock poisoned: {err}"),
        })?;
        guard.take();
        Ok(())
    }
}
