//! The query façade over a [`LedgerStub`].
//!
//! [`LedgerQuery`] validates caller arguments, issues exactly one store
//! request per operation, and drains the resulting iterator into normalized
//! records. Argument errors are raised before the store is touched.

use serde_json::json;

use crate::delta::{DeltaField, compute_deltas};
use crate::error::{Error, Result};
use crate::iterator::{Normalize, drain};
use crate::model::{CurrentRecord, HistoricalVersion, StateEntry, validate_segments};
use crate::serde::CompositeKey;
use crate::stub::LedgerStub;
use crate::table::tabulate;

/// Read-only queries bound to one store context and a default namespace.
///
/// # Example
///
/// ```ignore
/// let query = LedgerQuery::new(&stub, "org.papernet.commercialpaperlist");
///
/// let papers = query.query_by_prefix(&["MagnetoCorp"]).await?;
/// let owned = query.query_by_owner("DigiBank").await?;
/// let table = query.history_table(&["MagnetoCorp", "00001"]).await?;
/// ```
pub struct LedgerQuery<'a, S: LedgerStub> {
    stub: &'a S,
    namespace: String,
}

impl<'a, S: LedgerStub> LedgerQuery<'a, S> {
    pub fn new(stub: &'a S, namespace: impl Into<String>) -> Self {
        Self {
            stub,
            namespace: namespace.into(),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Reads the current record of one entity, if it exists.
    pub async fn get_state<T: AsRef<str>>(&self, key: &[T]) -> Result<Option<CurrentRecord>> {
        let key = self.composite_key(key)?;
        let Some(value) = self.stub.get_state(&key).await? else {
            return Ok(None);
        };
        StateEntry { key, value }.normalize()
    }

    /// Returns every entity in the default namespace whose key starts with
    /// `prefix`, in key order.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if `prefix` is empty or contains
    /// an empty segment.
    pub async fn query_by_prefix<T: AsRef<str>>(&self, prefix: &[T]) -> Result<Vec<CurrentRecord>> {
        self.query_by_prefix_in(&self.namespace, prefix).await
    }

    /// Like [`query_by_prefix`](Self::query_by_prefix), in an explicit
    /// namespace.
    pub async fn query_by_prefix_in<T: AsRef<str>>(
        &self,
        namespace: &str,
        prefix: &[T],
    ) -> Result<Vec<CurrentRecord>> {
        if namespace.is_empty() {
            return Err(Error::InvalidArgument(
                "namespace must not be empty".to_string(),
            ));
        }
        validate_segments(prefix)?;

        let segments = to_segments(prefix);
        let iter = self
            .stub
            .get_state_by_partial_composite_key(namespace, &segments)
            .await?;
        drain(iter).await
    }

    /// Returns every entity whose payload's `owner` field equals `owner`.
    pub async fn query_by_owner(&self, owner: &str) -> Result<Vec<CurrentRecord>> {
        if owner.is_empty() {
            return Err("owner must not be empty".into());
        }
        self.run_query(&owner_selector(owner)).await
    }

    /// Runs a caller-supplied rich-query descriptor verbatim.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if the descriptor is blank, and
    /// whatever the store reports for a descriptor it cannot evaluate
    /// (typically [`Error::Query`]).
    pub async fn query_adhoc(&self, descriptor: &str) -> Result<Vec<CurrentRecord>> {
        if descriptor.trim().is_empty() {
            return Err("query descriptor must not be empty".into());
        }
        self.run_query(descriptor).await
    }

    /// Returns every version of one entity, oldest first.
    pub async fn get_history<T: AsRef<str>>(&self, key: &[T]) -> Result<Vec<HistoricalVersion>> {
        let key = self.composite_key(key)?;
        let iter = self.stub.get_history_for_key(&key).await?;
        drain(iter).await
    }

    /// Field-level deltas across the history of one entity.
    pub async fn history_deltas<T: AsRef<str>>(&self, key: &[T]) -> Result<Vec<DeltaField>> {
        let versions = self.get_history(key).await?;
        Ok(compute_deltas(&versions))
    }

    /// The history of one entity rendered as a delta table.
    pub async fn history_table<T: AsRef<str>>(&self, key: &[T]) -> Result<String> {
        let deltas = self.history_deltas(key).await?;
        Ok(tabulate(&deltas))
    }

    async fn run_query(&self, descriptor: &str) -> Result<Vec<CurrentRecord>> {
        let iter = self.stub.get_query_result(descriptor).await?;
        drain(iter).await
    }

    fn composite_key<T: AsRef<str>>(&self, key: &[T]) -> Result<CompositeKey> {
        self.stub
            .create_composite_key(&self.namespace, &to_segments(key))
    }
}

fn to_segments<T: AsRef<str>>(segments: &[T]) -> Vec<String> {
    segments.iter().map(|s| s.as_ref().to_string()).collect()
}

/// Builds the rich-query descriptor selecting entities owned by `owner`.
///
/// ```
/// assert_eq!(
///     query::owner_selector("DigiBank"),
///     r#"{"selector":{"owner":"DigiBank"}}"#
/// );
/// ```
pub fn owner_selector(owner: &str) -> String {
    json!({"selector": {"owner": owner}}).to_string()
}
