//! In-memory storage backend, used for tests and ephemeral stores.

use std::collections::BTreeMap;
use std::sync::RwLock;

use async_trait::async_trait;
use bytes::Bytes;

use super::{
    Record, RecordOp, Storage, StorageError, StorageIterator, StorageRead, StorageResult,
    WriteOptions,
};
use crate::BytesRange;

/// Storage backed by a sorted in-process map.
///
/// Scans take a snapshot of the matching range when opened, so an iterator
/// never observes writes applied after it was created.
#[derive(Debug, Default)]
pub struct InMemoryStorage {
    data: RwLock<BTreeMap<Bytes, Bytes>>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn poisoned() -> StorageError {
        StorageError::Internal("in-memory storage lock poisoned".to_string())
    }
}

/// Iterator over a snapshot of records.
struct SnapshotIterator {
    records: std::vec::IntoIter<Record>,
}

#[async_trait]
impl StorageIterator for SnapshotIterator {
    async fn next(&mut self) -> StorageResult<Option<Record>> {
        Ok(self.records.next())
    }
}

#[async_trait]
impl StorageRead for InMemoryStorage {
    async fn get(&self, key: Bytes) -> StorageResult<Option<Record>> {
        let data = self.data.read().map_err(|_| Self::poisoned())?;
        Ok(data
            .get(&key)
            .map(|value| Record::new(key.clone(), value.clone())))
    }

    async fn scan_iter(
        &self,
        range: BytesRange,
    ) -> StorageResult<Box<dyn StorageIterator + Send + 'static>> {
        let data = self.data.read().map_err(|_| Self::poisoned())?;
        let records: Vec<Record> = data
            .range(range)
            .map(|(key, value)| Record::new(key.clone(), value.clone()))
            .collect();
        Ok(Box::new(SnapshotIterator {
            records: records.into_iter(),
        }))
    }
}

#[async_trait]
impl Storage for InMemoryStorage {
    async fn apply(&self, ops: Vec<RecordOp>, _options: WriteOptions) -> StorageResult<()> {
        let mut data = self.data.write().map_err(|_| Self::poisoned())?;
        for op in ops {
            match op {
                RecordOp::Put(record) => {
                    data.insert(record.key, record.value);
                }
                RecordOp::Delete(key) => {
                    data.remove(&key);
                }
            }
        }
        Ok(())
    }

    async fn flush(&self) -> StorageResult<()> {
        Ok(())
    }

    async fn close(&self) -> StorageResult<()> {
        Ok(())
    }
}
