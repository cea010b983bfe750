//! Ordered key/value storage abstraction.
//!
//! Systems built on this crate read through [`StorageRead`] and write
//! through [`Storage`]. Scans are exposed as a pull-based
//! [`StorageIterator`] that yields records in ascending key order.

pub mod config;
pub mod factory;
pub mod in_memory;
pub mod slate;

use async_trait::async_trait;
use bytes::Bytes;

use crate::BytesRange;

/// A key/value pair as stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub key: Bytes,
    pub value: Bytes,
}

impl Record {
    pub fn new(key: Bytes, value: Bytes) -> Self {
        Self { key, value }
    }
}

/// A single mutation within an atomic batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordOp {
    Put(Record),
    Delete(Bytes),
}

/// Options for write operations.
#[derive(Debug, Clone, Default)]
pub struct WriteOptions {
    /// Whether to wait for the batch to be durable before returning.
    pub await_durable: bool,
}

/// Errors raised by storage backends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    /// The backend failed (I/O, object store, corruption).
    Storage(String),
    /// An invariant inside the storage layer was violated.
    Internal(String),
}

impl std::error::Error for StorageError {}

impl std::fmt::Display for StorageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StorageError::Storage(msg) => write!(f, "Storage error: {}", msg),
            StorageError::Internal(msg) => write!(f, "Internal error: {}", msg),
        }
    }
}

impl StorageError {
    /// Wraps a backend error, prefixing it with what was being attempted.
    pub fn from_storage(err: impl std::fmt::Display, context: &str) -> Self {
        StorageError::Storage(format!("{}: {}", context, err))
    }
}

pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// Pull-based iterator over a scan's records in key order.
#[async_trait]
pub trait StorageIterator {
    /// Returns the next record, or `None` once the scan is exhausted.
    async fn next(&mut self) -> StorageResult<Option<Record>>;
}

/// Read operations on storage.
#[async_trait]
pub trait StorageRead: Send + Sync {
    /// Point lookup of a single key.
    async fn get(&self, key: Bytes) -> StorageResult<Option<Record>>;

    /// Opens a streaming scan over `range`.
    async fn scan_iter(
        &self,
        range: BytesRange,
    ) -> StorageResult<Box<dyn StorageIterator + Send + 'static>>;

    /// Collects every record in `range`.
    async fn scan(&self, range: BytesRange) -> StorageResult<Vec<Record>> {
        let mut iter = self.scan_iter(range).await?;
        let mut records = Vec::new();
        while let Some(record) = iter.next().await? {
            records.push(record);
        }
        Ok(records)
    }
}

/// Read and write operations on storage.
#[async_trait]
pub trait Storage: StorageRead {
    /// Applies a batch of mutations atomically.
    async fn apply(&self, ops: Vec<RecordOp>, options: WriteOptions) -> StorageResult<()>;

    /// Writes records with default options.
    async fn put(&self, records: Vec<Record>) -> StorageResult<()> {
        self.apply(
            records.into_iter().map(RecordOp::Put).collect(),
            WriteOptions::default(),
        )
        .await
    }

    /// Makes all applied writes durable.
    async fn flush(&self) -> StorageResult<()>;

    /// Flushes and releases the backend.
    async fn close(&self) -> StorageResult<()>;
}
