//! Reference state store backed by [`common::Storage`].
//!
//! [`StateStore`] keeps three kinds of records (see [`crate::serde`]):
//! the current value of each entity, one history record per write, and a
//! singleton holding the next history sequence number. Every write updates
//! all three in one atomic batch, so an entity's history is always
//! consistent with its current state.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use common::{Record, RecordOp, Storage, StorageIterator, WriteOptions, create_storage};
use serde_json::Value;
use tokio::sync::Mutex;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::iterator::ResultIterator;
use crate::model::{HistoryEntry, StateEntry, TxContext};
use crate::query::LedgerQuery;
use crate::selector::RichQuery;
use crate::serde::{
    CompositeKey, HistoryKey, HistoryValue, deserialize_sequence, sequence_key,
    serialize_sequence,
};
use crate::stub::LedgerStub;

/// A ledger state store with per-key history.
///
/// Reads go through the [`LedgerStub`] implementation; writes through
/// [`put_state`](Self::put_state) and [`delete_state`](Self::delete_state).
///
/// # Thread Safety
///
/// `StateStore` is `Send + Sync` and can be shared behind an `Arc`. Writes
/// are serialized by an internal lock; reads never take it. Each write
/// reads the sequence record from storage under that lock, so stores
/// opened over the same storage may take turns writing. Concurrent writers
/// must share one `StateStore`.
///
/// # Example
///
/// ```
/// # #[tokio::main]
/// # async fn main() {
/// use bytes::Bytes;
/// use query::{CompositeKey, Config, EntityKey, StateStore, TxContext};
///
/// let store = StateStore::open(&Config::default()).await.unwrap();
/// let key = CompositeKey::new(
///     store.namespace(),
///     EntityKey::parse("MagnetoCorp:00001").unwrap(),
/// )
/// .unwrap();
/// store
///     .put_state(&TxContext::now("tx1"), &key, Bytes::from(r#"{"owner":"MagnetoCorp"}"#))
///     .await
///     .unwrap();
///
/// let records = store.query().query_by_prefix(&["MagnetoCorp"]).await.unwrap();
/// assert_eq!(records.len(), 1);
/// # }
/// ```
pub struct StateStore {
    storage: Arc<dyn Storage>,
    namespace: String,
    /// Held for the duration of a write.
    write_lock: Mutex<()>,
    open_cursors: Arc<AtomicUsize>,
}

impl StateStore {
    /// Opens a store with the configured storage backend.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage backend cannot be initialized or the
    /// stored sequence record is malformed.
    pub async fn open(config: &Config) -> Result<Self> {
        let storage = create_storage(&config.storage).await?;
        Self::new(storage, config.namespace.clone()).await
    }

    /// Creates a store over existing storage.
    ///
    /// `namespace` is the default namespace used by [`query`](Self::query).
    pub async fn new(storage: Arc<dyn Storage>, namespace: impl Into<String>) -> Result<Self> {
        let namespace = namespace.into();
        if namespace.is_empty() {
            return Err(Error::InvalidArgument(
                "namespace must not be empty".to_string(),
            ));
        }

        let store = Self {
            storage,
            namespace,
            write_lock: Mutex::new(()),
            open_cursors: Arc::new(AtomicUsize::new(0)),
        };
        let next_sequence = store.load_sequence().await?;
        tracing::debug!(namespace = %store.namespace, next_sequence, "opened state store");
        Ok(store)
    }

    async fn load_sequence(&self) -> Result<u64> {
        match self.storage.get(sequence_key()).await? {
            Some(record) => Ok(deserialize_sequence(&record.value)?),
            None => Ok(0),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Returns a query façade over this store's namespace.
    pub fn query(&self) -> LedgerQuery<'_, Self> {
        LedgerQuery::new(self, self.namespace.clone())
    }

    /// Number of iterators handed out and not yet closed or dropped.
    pub fn open_cursors(&self) -> usize {
        self.open_cursors.load(Ordering::SeqCst)
    }

    /// Sets the value of `key` and appends a history version.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if `value` or the transaction id
    /// is empty. An empty value is reserved for deletions.
    #[tracing::instrument(level = "trace", skip_all)]
    pub async fn put_state(&self, tx: &TxContext, key: &CompositeKey, value: Bytes) -> Result<()> {
        if value.is_empty() {
            return Err(Error::InvalidArgument(format!(
                "value for {} must not be empty",
                key
            )));
        }
        self.write(tx, key, Some(value)).await
    }

    /// Removes `key` and appends a history version marked as a deletion.
    ///
    /// The deletion version carries no value.
    #[tracing::instrument(level = "trace", skip_all)]
    pub async fn delete_state(&self, tx: &TxContext, key: &CompositeKey) -> Result<()> {
        self.write(tx, key, None).await
    }

    async fn write(&self, tx: &TxContext, key: &CompositeKey, value: Option<Bytes>) -> Result<()> {
        if tx.tx_id.is_empty() {
            return Err(Error::InvalidArgument(
                "transaction id must not be empty".to_string(),
            ));
        }

        let _guard = self.write_lock.lock().await;
        let sequence = self.load_sequence().await?;

        let history = HistoryValue {
            tx_id: tx.tx_id.clone(),
            timestamp: tx.timestamp,
            is_delete: value.is_none(),
            value: value.clone().unwrap_or_default(),
        };
        let state_op = match value {
            Some(value) => RecordOp::Put(Record::new(key.serialize(), value)),
            None => RecordOp::Delete(key.serialize()),
        };
        let ops = vec![
            state_op,
            RecordOp::Put(Record::new(
                HistoryKey::new(key.clone(), sequence).serialize(),
                history.serialize()?,
            )),
            RecordOp::Put(Record::new(sequence_key(), serialize_sequence(sequence + 1))),
        ];
        self.storage.apply(ops, WriteOptions::default()).await?;

        tracing::debug!(
            key = %key,
            tx_id = %tx.tx_id,
            sequence,
            is_delete = history.is_delete,
            "wrote state"
        );
        Ok(())
    }

    /// Flushes pending writes to durable storage.
    pub async fn flush(&self) -> Result<()> {
        self.storage.flush().await?;
        Ok(())
    }

    /// Closes the underlying storage.
    pub async fn close(&self) -> Result<()> {
        self.storage.close().await?;
        Ok(())
    }

    fn lease(&self) -> CursorLease {
        CursorLease::acquire(&self.open_cursors)
    }
}

#[async_trait]
impl LedgerStub for StateStore {
    type StateIterator = StateQueryIterator;
    type HistoryIterator = HistoryQueryIterator;

    #[tracing::instrument(level = "trace", skip_all)]
    async fn get_state(&self, key: &CompositeKey) -> Result<Option<Bytes>> {
        let record = self.storage.get(key.serialize()).await?;
        Ok(record.map(|r| r.value))
    }

    #[tracing::instrument(level = "trace", skip_all)]
    async fn get_state_by_partial_composite_key(
        &self,
        namespace: &str,
        segments: &[String],
    ) -> Result<StateQueryIterator> {
        if namespace.is_empty() {
            return Err(Error::InvalidArgument(
                "namespace must not be empty".to_string(),
            ));
        }
        if segments.iter().any(|s| s.is_empty()) {
            return Err(Error::InvalidArgument(
                "partial key segments must not be empty".to_string(),
            ));
        }

        let range = CompositeKey::prefix_range(namespace, segments);
        let inner = self.storage.scan_iter(range).await?;
        Ok(StateQueryIterator::new(inner, None, self.lease()))
    }

    #[tracing::instrument(level = "trace", skip_all)]
    async fn get_query_result(&self, query: &str) -> Result<StateQueryIterator> {
        let query = RichQuery::parse(query)?;
        let inner = self.storage.scan_iter(CompositeKey::state_range()).await?;
        Ok(StateQueryIterator::new(inner, Some(query), self.lease()))
    }

    #[tracing::instrument(level = "trace", skip_all)]
    async fn get_history_for_key(&self, key: &CompositeKey) -> Result<HistoryQueryIterator> {
        let inner = self.storage.scan_iter(HistoryKey::entity_range(key)).await?;
        Ok(HistoryQueryIterator {
            inner: Some(inner),
            lease: self.lease(),
        })
    }
}

/// Counts one open cursor until released or dropped.
struct CursorLease {
    open: Arc<AtomicUsize>,
    released: bool,
}

impl CursorLease {
    fn acquire(open: &Arc<AtomicUsize>) -> Self {
        open.fetch_add(1, Ordering::SeqCst);
        Self {
            open: Arc::clone(open),
            released: false,
        }
    }

    fn release(&mut self) {
        if !self.released {
            self.released = true;
            self.open.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

impl Drop for CursorLease {
    fn drop(&mut self) {
        if !self.released {
            tracing::debug!("releasing cursor dropped without close");
            self.release();
        }
    }
}

/// Iterator over current state, optionally filtered by a rich query.
pub struct StateQueryIterator {
    inner: Option<Box<dyn StorageIterator + Send>>,
    filter: Option<RichQuery>,
    remaining: Option<usize>,
    lease: CursorLease,
}

impl StateQueryIterator {
    fn new(
        inner: Box<dyn StorageIterator + Send>,
        filter: Option<RichQuery>,
        lease: CursorLease,
    ) -> Self {
        let remaining = filter.as_ref().and_then(RichQuery::limit);
        Self {
            inner: Some(inner),
            filter,
            remaining,
            lease,
        }
    }
}

#[async_trait]
impl ResultIterator for StateQueryIterator {
    type Entry = StateEntry;

    async fn next(&mut self) -> Result<Option<StateEntry>> {
        let Some(inner) = self.inner.as_mut() else {
            return Err(Error::Internal("state iterator is closed".to_string()));
        };
        if self.remaining == Some(0) {
            return Ok(None);
        }

        while let Some(record) = inner.next().await? {
            let key = CompositeKey::deserialize(&record.key)?;
            if let Some(query) = &self.filter {
                let Ok(document) = serde_json::from_slice::<Value>(&record.value) else {
                    continue;
                };
                if !query.matches(&document) {
                    continue;
                }
            }
            if let Some(remaining) = self.remaining.as_mut() {
                *remaining -= 1;
            }
            return Ok(Some(StateEntry {
                key,
                value: record.value,
            }));
        }
        Ok(None)
    }

    async fn close(&mut self) -> Result<()> {
        self.inner = None;
        self.lease.release();
        Ok(())
    }
}

/// Iterator over the versions of one entity, oldest first.
pub struct HistoryQueryIterator {
    inner: Option<Box<dyn StorageIterator + Send>>,
    lease: CursorLease,
}

#[async_trait]
impl ResultIterator for HistoryQueryIterator {
    type Entry = HistoryEntry;

    async fn next(&mut self) -> Result<Option<HistoryEntry>> {
        let Some(inner) = self.inner.as_mut() else {
            return Err(Error::Internal("history iterator is closed".to_string()));
        };
        let Some(record) = inner.next().await? else {
            return Ok(None);
        };
        let version = HistoryValue::deserialize(&record.value)?;
        Ok(Some(HistoryEntry {
            tx_id: version.tx_id,
            timestamp: version.timestamp,
            is_delete: version.is_delete,
            value: version.value,
        }))
    }

    async fn close(&mut self) -> Result<()> {
        self.inner = None;
        self.lease.release();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use common::storage::in_memory::InMemoryStorage;
    use common::StorageRead;

    use super::*;
    use crate::iterator::drain;
    use crate::model::{EntityKey, Payload, TxTimestamp};
    use crate::serde::history_range;

    const NS: &str = "org.papernet.commercialpaperlist";

    async fn store() -> StateStore {
        StateStore::new(Arc::new(InMemoryStorage::new()), NS)
            .await
            .unwrap()
    }

    fn key(text: &str) -> CompositeKey {
        CompositeKey::new(NS, EntityKey::parse(text).unwrap()).unwrap()
    }

    fn tx(tx_id: &str, seconds: i64) -> TxContext {
        TxContext::new(tx_id, TxTimestamp::new(seconds, 0))
    }

    fn segments(prefix: &[&str]) -> Vec<String> {
        prefix.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn should_put_and_get_state() {
        // given
        let store = store().await;
        let paper = key("MagnetoCorp:00001");

        // when
        store
            .put_state(&tx("tx1", 1), &paper, Bytes::from(r#"{"owner":"MagnetoCorp"}"#))
            .await
            .unwrap();

        // then
        let value = store.get_state(&paper).await.unwrap();
        assert_eq!(value, Some(Bytes::from(r#"{"owner":"MagnetoCorp"}"#)));
        assert_eq!(store.get_state(&key("MagnetoCorp:00002")).await.unwrap(), None);
    }

    #[tokio::test]
    async fn should_reject_empty_value_and_tx_id() {
        let store = store().await;
        let paper = key("MagnetoCorp:00001");

        let empty_value = store.put_state(&tx("tx1", 1), &paper, Bytes::new()).await;
        let empty_tx = store
            .put_state(&tx("", 1), &paper, Bytes::from("{}"))
            .await;

        assert!(matches!(empty_value, Err(Error::InvalidArgument(_))));
        assert!(matches!(empty_tx, Err(Error::InvalidArgument(_))));
    }

    #[tokio::test]
    async fn should_only_return_keys_under_prefix() {
        // given
        let store = store().await;
        for (i, text) in [
            "MagnetoCorp:00001",
            "MagnetoCorp:00002",
            "MagnetoCorpX:00001",
            "DigiBank:00001",
        ]
        .iter()
        .enumerate()
        {
            store
                .put_state(&tx(&format!("tx{}", i), i as i64), &key(text), Bytes::from("{}"))
                .await
                .unwrap();
        }
        let other = CompositeKey::new("org.other", EntityKey::parse("MagnetoCorp:00003").unwrap())
            .unwrap();
        store
            .put_state(&tx("tx9", 9), &other, Bytes::from("{}"))
            .await
            .unwrap();

        // when
        let iter = store
            .get_state_by_partial_composite_key(NS, &segments(&["MagnetoCorp"]))
            .await
            .unwrap();
        let records = drain(iter).await.unwrap();

        // then
        let keys: Vec<String> = records.iter().map(|r| r.key.key.to_string()).collect();
        assert_eq!(keys, vec!["MagnetoCorp:00001", "MagnetoCorp:00002"]);
        assert!(records.iter().all(|r| r.key.namespace == NS));
    }

    #[tokio::test]
    async fn should_filter_by_rich_query_in_key_order() {
        // given
        let store = store().await;
        let papers = [
            ("MagnetoCorp:00002", r#"{"owner":"DigiBank"}"#),
            ("MagnetoCorp:00001", r#"{"owner":"DigiBank"}"#),
            ("MagnetoCorp:00003", r#"{"owner":"MagnetoCorp"}"#),
            ("MagnetoCorp:00004", "not json"),
        ];
        for (i, (text, value)) in papers.iter().enumerate() {
            store
                .put_state(&tx(&format!("tx{}", i), 1), &key(text), Bytes::from(*value))
                .await
                .unwrap();
        }

        // when
        let iter = store
            .get_query_result(r#"{"selector":{"owner":"DigiBank"}}"#)
            .await
            .unwrap();
        let records = drain(iter).await.unwrap();

        // then
        let keys: Vec<String> = records.iter().map(|r| r.key.key.to_string()).collect();
        assert_eq!(keys, vec!["MagnetoCorp:00001", "MagnetoCorp:00002"]);
    }

    #[tokio::test]
    async fn should_stop_rich_query_at_limit() {
        // given
        let store = store().await;
        for i in 0..5 {
            store
                .put_state(&tx("tx", i), &key(&format!("DigiBank:{:05}", i)), Bytes::from("{}"))
                .await
                .unwrap();
        }

        // when
        let iter = store
            .get_query_result(r#"{"selector":{},"limit":2}"#)
            .await
            .unwrap();
        let records = drain(iter).await.unwrap();

        // then
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].key.key.to_string(), "DigiBank:00000");
    }

    #[tokio::test]
    async fn should_reject_malformed_query_without_opening_cursor() {
        // given
        let store = store().await;

        // when
        let result = store.get_query_result("{selector").await;

        // then
        assert!(matches!(result, Err(Error::Query(_))));
        assert_eq!(store.open_cursors(), 0);
    }

    #[tokio::test]
    async fn should_return_history_oldest_first_including_deletes() {
        // given
        let store = store().await;
        let paper = key("MagnetoCorp:00001");
        let longer = key("MagnetoCorp:00001:coupon");
        store
            .put_state(&tx("tx1", 10), &paper, Bytes::from(r#"{"state":"ISSUED"}"#))
            .await
            .unwrap();
        store
            .put_state(&tx("tx2", 20), &longer, Bytes::from(r#"{"rate":1}"#))
            .await
            .unwrap();
        store
            .put_state(&tx("tx3", 30), &paper, Bytes::from(r#"{"state":"TRADING"}"#))
            .await
            .unwrap();
        store.delete_state(&tx("tx4", 40), &paper).await.unwrap();

        // when
        let mut iter = store.get_history_for_key(&paper).await.unwrap();
        let mut entries = Vec::new();
        while let Some(entry) = iter.next().await.unwrap() {
            entries.push(entry);
        }
        iter.close().await.unwrap();

        // then
        let tx_ids: Vec<&str> = entries.iter().map(|e| e.tx_id.as_str()).collect();
        assert_eq!(tx_ids, vec!["tx1", "tx3", "tx4"]);
        assert!(entries[2].is_delete);
        assert!(entries[2].value.is_empty());
        assert_eq!(entries[1].timestamp, TxTimestamp::new(30, 0));
        assert_eq!(store.get_state(&paper).await.unwrap(), None);
    }

    #[tokio::test]
    async fn should_skip_delete_version_when_draining_history() {
        // given
        let store = store().await;
        let paper = key("MagnetoCorp:00001");
        store
            .put_state(&tx("tx1", 10), &paper, Bytes::from(r#"{"state":"ISSUED"}"#))
            .await
            .unwrap();
        store.delete_state(&tx("tx2", 20), &paper).await.unwrap();

        // when
        let versions = drain(store.get_history_for_key(&paper).await.unwrap())
            .await
            .unwrap();

        // then
        assert_eq!(versions.len(), 1);
        assert_eq!(
            versions[0].payload,
            Payload::Decoded(serde_json::json!({"state": "ISSUED"}))
        );
    }

    #[tokio::test]
    async fn should_release_cursor_on_close_and_drop() {
        // given
        let store = store().await;
        let paper = key("MagnetoCorp:00001");

        // when
        let closed = store.get_history_for_key(&paper).await.unwrap();
        let dropped = store
            .get_state_by_partial_composite_key(NS, &segments(&["MagnetoCorp"]))
            .await
            .unwrap();
        assert_eq!(store.open_cursors(), 2);
        drain(closed).await.unwrap();
        drop(dropped);

        // then
        assert_eq!(store.open_cursors(), 0);
    }

    #[tokio::test]
    async fn should_fail_next_after_close() {
        let store = store().await;
        let mut iter = store.get_query_result(r#"{"selector":{}}"#).await.unwrap();

        iter.close().await.unwrap();
        iter.close().await.unwrap();

        assert!(matches!(iter.next().await, Err(Error::Internal(_))));
        assert_eq!(store.open_cursors(), 0);
    }

    #[tokio::test]
    async fn should_persist_sequence_across_reopen() {
        // given
        let storage: Arc<dyn Storage> = Arc::new(InMemoryStorage::new());
        let paper = key("MagnetoCorp:00001");
        let first = StateStore::new(storage.clone(), NS).await.unwrap();
        first
            .put_state(&tx("tx1", 1), &paper, Bytes::from("{}"))
            .await
            .unwrap();

        // when
        let second = StateStore::new(storage.clone(), NS).await.unwrap();
        second
            .put_state(&tx("tx2", 2), &paper, Bytes::from(r#"{"x":1}"#))
            .await
            .unwrap();

        // then
        let records = storage.scan(history_range()).await.unwrap();
        let sequences: Vec<u64> = records
            .iter()
            .map(|r| HistoryKey::deserialize(&r.key).unwrap().sequence)
            .collect();
        assert_eq!(sequences, vec![0, 1]);
    }

    #[tokio::test]
    async fn should_not_reuse_sequence_when_stores_share_storage() {
        // given
        let storage: Arc<dyn Storage> = Arc::new(InMemoryStorage::new());
        let paper = key("MagnetoCorp:00001");
        let first = StateStore::new(storage.clone(), NS).await.unwrap();
        let second = StateStore::new(storage.clone(), NS).await.unwrap();

        // when
        first
            .put_state(&tx("tx1", 1), &paper, Bytes::from(r#"{"x":1}"#))
            .await
            .unwrap();
        second
            .put_state(&tx("tx2", 2), &paper, Bytes::from(r#"{"x":2}"#))
            .await
            .unwrap();
        first
            .put_state(&tx("tx3", 3), &paper, Bytes::from(r#"{"x":3}"#))
            .await
            .unwrap();

        // then
        let records = storage.scan(history_range()).await.unwrap();
        let sequences: Vec<u64> = records
            .iter()
            .map(|r| HistoryKey::deserialize(&r.key).unwrap().sequence)
            .collect();
        assert_eq!(sequences, vec![0, 1, 2]);
        let versions = second
            .query()
            .get_history(&["MagnetoCorp", "00001"])
            .await
            .unwrap();
        let tx_ids: Vec<&str> = versions.iter().map(|v| v.tx_id.as_str()).collect();
        assert_eq!(tx_ids, vec!["tx1", "tx2", "tx3"]);
    }

    #[tokio::test]
    async fn should_reject_empty_partial_key_segment() {
        let store = store().await;

        let result = store
            .get_state_by_partial_composite_key(NS, &segments(&["MagnetoCorp", ""]))
            .await;

        assert!(matches!(result, Err(Error::InvalidArgument(_))));
        assert_eq!(store.open_cursors(), 0);
    }
}
