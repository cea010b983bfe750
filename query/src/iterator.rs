//! Draining store iterators into normalized records.
//!
//! A store hands out single-pass [`ResultIterator`]s. [`drain`] pulls one to
//! exhaustion, normalizes each entry into a [`CurrentRecord`] or a
//! [`HistoricalVersion`] depending on the entry type, and closes the
//! iterator exactly once, including when an entry fails to normalize or the
//! iterator itself errors.
//!
//! If the future returned by [`drain`] is dropped before completion, the
//! iterator is dropped with it. Implementations must release their
//! server-side cursor in `Drop` for that path.

use async_trait::async_trait;

use crate::error::Result;
use crate::model::{CurrentRecord, HistoricalVersion, HistoryEntry, Payload, StateEntry};

/// A single-pass, closeable iterator over a store query's results.
#[async_trait]
pub trait ResultIterator: Send {
    /// The raw entry type yielded by the store.
    type Entry: Send;

    /// Returns the next entry, or `None` once the results are exhausted.
    async fn next(&mut self) -> Result<Option<Self::Entry>>;

    /// Releases the iterator's underlying cursor.
    async fn close(&mut self) -> Result<()>;
}

/// Shape a drained entry is normalized into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainMode {
    /// Key plus payload.
    Current,
    /// Transaction id, timestamp, deletion flag plus payload.
    History,
}

/// Conversion from a raw store entry to a returned record.
pub trait Normalize {
    type Output;

    const MODE: DrainMode;

    /// Returns `None` for entries that carry no value.
    fn normalize(self) -> Result<Option<Self::Output>>;
}

impl Normalize for StateEntry {
    type Output = CurrentRecord;

    const MODE: DrainMode = DrainMode::Current;

    fn normalize(self) -> Result<Option<CurrentRecord>> {
        if self.value.is_empty() {
            return Ok(None);
        }
        Ok(Some(CurrentRecord {
            key: self.key,
            payload: Payload::decode(&self.value),
        }))
    }
}

impl Normalize for HistoryEntry {
    type Output = HistoricalVersion;

    const MODE: DrainMode = DrainMode::History;

    fn normalize(self) -> Result<Option<HistoricalVersion>> {
        if self.value.is_empty() {
            return Ok(None);
        }
        Ok(Some(HistoricalVersion {
            timestamp: self.timestamp.to_datetime()?,
            tx_id: self.tx_id,
            is_delete: self.is_delete,
            payload: Payload::decode(&self.value),
        }))
    }
}

/// Pulls `iter` to exhaustion and returns its normalized records in order.
///
/// The iterator is consumed and closed exactly once. When pulling or
/// normalizing fails, the iterator is still closed and the original error is
/// returned; a failure to close on that path is logged, not returned.
pub async fn drain<I>(mut iter: I) -> Result<Vec<<I::Entry as Normalize>::Output>>
where
    I: ResultIterator,
    I::Entry: Normalize,
{
    let mut records = Vec::new();
    let pulled = pull_all(&mut iter, &mut records).await;

    match pulled {
        Ok(()) => {
            iter.close().await?;
            tracing::debug!(
                mode = ?<I::Entry as Normalize>::MODE,
                count = records.len(),
                "drained query results"
            );
            Ok(records)
        }
        Err(err) => {
            if let Err(close_err) = iter.close().await {
                tracing::warn!(error = %close_err, "failed to close iterator after error");
            }
            Err(err)
        }
    }
}

async fn pull_all<I>(iter: &mut I, records: &mut Vec<<I::Entry as Normalize>::Output>) -> Result<()>
where
    I: ResultIterator,
    I::Entry: Normalize,
{
    while let Some(entry) = iter.next().await? {
        if let Some(record) = entry.normalize()? {
            records.push(record);
        }
    }
    Ok(())
}

#[cfg(test)]
pub(crate) mod tests {
    use std::collections::VecDeque;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use bytes::Bytes;
    use serde_json::json;

    use super::*;
    use crate::error::Error;
    use crate::model::{EntityKey, TxTimestamp};
    use crate::serde::CompositeKey;

    /// Scripted iterator that counts `close` calls and drops.
    pub(crate) struct ScriptedIterator<E> {
        pub steps: VecDeque<Result<Option<E>>>,
        pub closes: Arc<AtomicUsize>,
        pub drops: Arc<AtomicUsize>,
        pub pend_when_empty: bool,
    }

    impl<E> ScriptedIterator<E> {
        pub(crate) fn new(entries: Vec<E>) -> Self {
            Self {
                steps: entries.into_iter().map(|e| Ok(Some(e))).collect(),
                closes: Arc::new(AtomicUsize::new(0)),
                drops: Arc::new(AtomicUsize::new(0)),
                pend_when_empty: false,
            }
        }
    }

    impl<E> Drop for ScriptedIterator<E> {
        fn drop(&mut self) {
            self.drops.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl<E: Send> ResultIterator for ScriptedIterator<E> {
        type Entry = E;

        async fn next(&mut self) -> Result<Option<E>> {
            match self.steps.pop_front() {
                Some(step) => step,
                None if self.pend_when_empty => std::future::pending().await,
                None => Ok(None),
            }
        }

        async fn close(&mut self) -> Result<()> {
            self.closes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn state(key: &str, value: &'static str) -> StateEntry {
        StateEntry {
            key: CompositeKey::new("ns", EntityKey::parse(key).unwrap()).unwrap(),
            value: Bytes::from(value),
        }
    }

    fn history(tx_id: &str, seconds: i64, nanos: i32, value: &'static str) -> HistoryEntry {
        HistoryEntry {
            tx_id: tx_id.to_string(),
            timestamp: TxTimestamp::new(seconds, nanos),
            is_delete: false,
            value: Bytes::from(value),
        }
    }

    #[tokio::test]
    async fn should_return_empty_and_close_once_for_empty_iterator() {
        // given
        let iter = ScriptedIterator::<StateEntry>::new(vec![]);
        let closes = iter.closes.clone();

        // when
        let records = drain(iter).await.unwrap();

        // then
        assert!(records.is_empty());
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn should_normalize_current_records_in_order() {
        // given
        let iter = ScriptedIterator::new(vec![
            state("MagnetoCorp:00001", r#"{"owner":"DigiBank"}"#),
            state("MagnetoCorp:00002", "not json"),
        ]);

        // when
        let records = drain(iter).await.unwrap();

        // then
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].key.key.to_string(), "MagnetoCorp:00001");
        assert_eq!(records[0].payload, Payload::Decoded(json!({"owner": "DigiBank"})));
        assert_eq!(records[1].payload, Payload::Raw("not json".to_string()));
    }

    #[tokio::test]
    async fn should_skip_entries_without_value() {
        // given
        let iter = ScriptedIterator::new(vec![
            history("tx1", 10, 0, r#"{"x":1}"#),
            history("tx2", 11, 0, ""),
            history("tx3", 12, 0, r#"{"x":2}"#),
        ]);

        // when
        let versions = drain(iter).await.unwrap();

        // then
        let tx_ids: Vec<&str> = versions.iter().map(|v| v.tx_id.as_str()).collect();
        assert_eq!(tx_ids, vec!["tx1", "tx3"]);
    }

    #[tokio::test]
    async fn should_build_history_timestamp_from_seconds_and_nanos() {
        // given
        let iter = ScriptedIterator::new(vec![history("tx1", 1_590_000_000, 987_654_321, "{}")]);

        // when
        let versions = drain(iter).await.unwrap();

        // then
        assert_eq!(versions[0].timestamp.timestamp_millis(), 1_590_000_000_987);
        assert!(!versions[0].is_delete);
    }

    #[tokio::test]
    async fn should_close_iterator_when_next_fails() {
        // given
        let mut iter = ScriptedIterator::new(vec![state("a", "{}")]);
        iter.steps
            .push_back(Err(Error::Storage("cursor lost".to_string())));
        let closes = iter.closes.clone();

        // when
        let result = drain(iter).await;

        // then
        assert_eq!(result, Err(Error::Storage("cursor lost".to_string())));
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn should_close_iterator_when_entry_cannot_be_normalized() {
        // given
        let iter = ScriptedIterator::new(vec![history("tx1", i64::MAX, 0, "{}")]);
        let closes = iter.closes.clone();

        // when
        let result = drain(iter).await;

        // then
        assert!(matches!(result, Err(Error::Encoding(_))));
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn should_drop_iterator_when_drain_is_cancelled() {
        // given
        let mut iter = ScriptedIterator::new(vec![state("a", "{}")]);
        iter.pend_when_empty = true;
        let closes = iter.closes.clone();
        let drops = iter.drops.clone();

        // when
        let result = tokio::time::timeout(Duration::from_millis(20), drain(iter)).await;

        // then
        assert!(result.is_err());
        assert_eq!(closes.load(Ordering::SeqCst), 0);
        assert_eq!(drops.load(Ordering::SeqCst), 1);
    }
}
