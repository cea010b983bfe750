//! SlateDB storage backend.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use slatedb::{Db, DbIterator, WriteBatch};

use super::{
    Record, RecordOp, Storage, StorageError, StorageIterator, StorageRead, StorageResult,
    WriteOptions,
};
use crate::BytesRange;

/// Storage backed by a SlateDB database on an object store.
pub struct SlateDbStorage {
    db: Arc<Db>,
}

impl SlateDbStorage {
    pub fn new(db: Arc<Db>) -> Self {
        Self { db }
    }
}

/// Streaming iterator over a SlateDB scan.
struct SlateDbIterator {
    inner: DbIterator,
}

#[async_trait]
impl StorageIterator for SlateDbIterator {
    async fn next(&mut self) -> StorageResult<Option<Record>> {
        let next = self
            .inner
            .next()
            .await
            .map_err(|e| StorageError::from_storage(e, "SlateDB iterator next failed"))?;
        Ok(next.map(|kv| Record::new(kv.key, kv.value)))
    }
}

#[async_trait]
impl StorageRead for SlateDbStorage {
    #[tracing::instrument(level = "trace", skip_all)]
    async fn get(&self, key: Bytes) -> StorageResult<Option<Record>> {
        let value = self
            .db
            .get(&key)
            .await
            .map_err(|e| StorageError::from_storage(e, "SlateDB get failed"))?;
        Ok(value.map(|value| Record::new(key, value)))
    }

    #[tracing::instrument(level = "trace", skip_all)]
    async fn scan_iter(
        &self,
        range: BytesRange,
    ) -> StorageResult<Box<dyn StorageIterator + Send + 'static>> {
        let inner = self
            .db
            .scan(range)
            .await
            .map_err(|e| StorageError::from_storage(e, "SlateDB scan failed"))?;
        Ok(Box::new(SlateDbIterator { inner }))
    }
}

#[async_trait]
impl Storage for SlateDbStorage {
    #[tracing::instrument(level = "trace", skip_all)]
    async fn apply(&self, ops: Vec<RecordOp>, options: WriteOptions) -> StorageResult<()> {
        let mut batch = WriteBatch::new();
        for op in ops {
            match op {
                RecordOp::Put(record) => batch.put(record.key, record.value),
                RecordOp::Delete(key) => batch.delete(key),
            }
        }
        let write_options = slatedb::config::WriteOptions {
            await_durable: options.await_durable,
        };
        self.db
            .write_with_options(batch, &write_options)
            .await
            .map_err(|e| StorageError::from_storage(e, "SlateDB write failed"))
    }

    async fn flush(&self) -> StorageResult<()> {
        self.db
            .flush()
            .await
            .map_err(|e| StorageError::from_storage(e, "SlateDB flush failed"))
    }

    async fn close(&self) -> StorageResult<()> {
        self.db
            .close()
            .await
            .map_err(|e| StorageError::from_storage(e, "SlateDB close failed"))
    }
}
