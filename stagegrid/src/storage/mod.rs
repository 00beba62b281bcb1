//! Persistence collaborator for serialized cell content.
//!
//! The scheduler calls [`CellStorage::load`] only for the base stage and
//! [`CellStorage::save`] when a cell unloads or on shutdown. Payloads are in
//! the format produced by [`crate::content::encode`].

use crate::coord::CellPos;
use bytes::Bytes;
use dashmap::DashMap;
use futures::future::BoxFuture;
use std::sync::atomic::{AtomicUsize, Ordering};
use thiserror::Error;

/// Errors from the storage backend.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("I/O error for cell {pos}: {source}")]
    Io {
        pos: CellPos,
        #[source]
        source: std::io::Error,
    },

    #[error("storage backend unavailable: {0}")]
    Unavailable(String),
}

/// Asynchronous load/save of serialized cells.
pub trait CellStorage: Send + Sync + 'static {
    /// Serialized content of `pos`, or `None` if nothing was saved.
    fn load(&self, pos: CellPos) -> BoxFuture<'_, Result<Option<Bytes>, StorageError>>;

    fn save(&self, pos: CellPos, data: Bytes) -> BoxFuture<'_, Result<(), StorageError>>;

    /// Backend name for logging.
    fn name(&self) -> &str;
}

// =============================================================================
// In-memory storage
// =============================================================================

/// Storage backed by a concurrent map.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    cells: DashMap<CellPos, Bytes>,
    loads: AtomicUsize,
    saves: AtomicUsize,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `data` directly, bypassing the async interface.
    pub fn insert(&self, pos: CellPos, data: Bytes) {
        self.cells.insert(pos, data);
    }

    pub fn get(&self, pos: CellPos) -> Option<Bytes> {
        self.cells.get(&pos).map(|e| e.value().clone())
    }

    pub fn contains(&self, pos: CellPos) -> bool {
        self.cells.contains_key(&pos)
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    pub fn load_count(&self) -> usize {
        self.loads.load(Ordering::Relaxed)
    }

    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::Relaxed)
    }
}

impl CellStorage for MemoryStorage {
    fn load(&self, pos: CellPos) -> BoxFuture<'_, Result<Option<Bytes>, StorageError>> {
        Box::pin(async move {
            self.loads.fetch_add(1, Ordering::Relaxed);
            Ok(self.get(pos))
        })
    }

    fn save(&self, pos: CellPos, data: Bytes) -> BoxFuture<'_, Result<(), StorageError>> {
        Box::pin(async move {
            self.saves.fetch_add(1, Ordering::Relaxed);
            self.cells.insert(pos, data);
            Ok(())
        })
    }

    fn name(&self) -> &str {
        "memory"
    }
}

// =============================================================================
// Null storage
// =============================================================================

/// Storage that never finds anything and discards saves.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullStorage;

impl CellStorage for NullStorage {
    fn load(&self, _pos: CellPos) -> BoxFuture<'_, Result<Option<Bytes>, StorageError>> {
        Box::pin(async { Ok(None) })
    }

    fn save(&self, _pos: CellPos, _data: Bytes) -> BoxFuture<'_, Result<(), StorageError>> {
        Box::pin(async { Ok(()) })
    }

    fn name(&self) -> &str {
        "null"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_storage_round_trip() {
        let storage = MemoryStorage::new();
        let pos = CellPos::new(3, -4);

        assert!(storage.load(pos).await.unwrap().is_none());
        storage.save(pos, Bytes::from_static(b"abc")).await.unwrap();

        assert_eq!(storage.load(pos).await.unwrap().as_deref(), Some(&b"abc"[..]));
        assert_eq!(storage.load_count(), 2);
        assert_eq!(storage.save_count(), 1);
    }

    #[tokio::test]
    async fn test_null_storage_forgets() {
        let storage = NullStorage;
        storage.save(CellPos::ORIGIN, Bytes::from_static(b"x")).await.unwrap();
        assert!(storage.load(CellPos::ORIGIN).await.unwrap().is_none());
    }

    #[test]
    fn test_error_display() {
        let err = StorageError::Io {
            pos: CellPos::new(1, 2),
            source: std::io::Error::other("disk gone"),
        };
        assert_eq!(err.to_string(), "I/O error for cell [1, 2]: disk gone");
    }
}
