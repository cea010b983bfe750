//! The store boundary consumed by the query façade.

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::Result;
use crate::iterator::ResultIterator;
use crate::model::{EntityKey, HistoryEntry, StateEntry};
use crate::serde::CompositeKey;

/// Read primitives a ledger state store exposes to one transaction context.
///
/// The query façade is generic over this trait; [`StateStore`] is the
/// reference implementation. Every method is a single store round trip and
/// failures propagate to the caller unchanged.
///
/// [`StateStore`]: crate::StateStore
#[async_trait]
pub trait LedgerStub: Send + Sync {
    /// Iterator returned by prefix scans and rich queries.
    type StateIterator: ResultIterator<Entry = StateEntry>;

    /// Iterator returned by history scans.
    type HistoryIterator: ResultIterator<Entry = HistoryEntry>;

    /// Builds the composite key for `segments` within `namespace`.
    fn create_composite_key(&self, namespace: &str, segments: &[String]) -> Result<CompositeKey> {
        CompositeKey::new(namespace, EntityKey::new(segments.iter().cloned())?)
    }

    /// Reads the current value of one key.
    async fn get_state(&self, key: &CompositeKey) -> Result<Option<Bytes>>;

    /// Scans every key in `namespace` whose leading segments equal `segments`.
    async fn get_state_by_partial_composite_key(
        &self,
        namespace: &str,
        segments: &[String],
    ) -> Result<Self::StateIterator>;

    /// Runs a rich query descriptor against current state.
    async fn get_query_result(&self, query: &str) -> Result<Self::StateIterator>;

    /// Scans every version of `key`, oldest first.
    async fn get_history_for_key(&self, key: &CompositeKey) -> Result<Self::HistoryIterator>;
}
