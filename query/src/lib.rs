//! History, delta and query engine for ledger state stores.
//!
//! This crate answers three kinds of questions about entities kept in a
//! key/value ledger state store:
//!
//! - **Prefix queries**: every entity whose composite key starts with a
//!   partial key, e.g. all papers issued by one company.
//! - **Rich queries**: every entity whose JSON value matches a selector,
//!   e.g. all papers owned by one company.
//! - **History**: every version of one entity, and the field-level deltas
//!   between consecutive versions rendered as a table.
//!
//! # Architecture
//!
//! [`LedgerQuery`] is a thin façade generic over the [`LedgerStub`] trait,
//! the store boundary. Results arrive as single-pass [`ResultIterator`]s
//! that [`drain`] turns into [`CurrentRecord`]s or [`HistoricalVersion`]s.
//! [`compute_deltas`] and [`tabulate`] are pure functions over those
//! records. [`StateStore`] is a reference store built on the `common`
//! storage layer (in-memory or SlateDB).
//!
//! # Example
//!
//! ```
//! # #[tokio::main]
//! # async fn main() -> query::Result<()> {
//! use bytes::Bytes;
//! use query::{CompositeKey, Config, EntityKey, StateStore, TxContext, TxTimestamp};
//!
//! let store = StateStore::open(&Config::default()).await?;
//! let paper = CompositeKey::new(store.namespace(), EntityKey::parse("MagnetoCorp:00001")?)?;
//!
//! let issue = TxContext::new("tx1", TxTimestamp::new(1_600_000_000, 0));
//! store.put_state(&issue, &paper, Bytes::from(r#"{"owner":"MagnetoCorp"}"#)).await?;
//! let buy = TxContext::new("tx2", TxTimestamp::new(1_600_000_060, 0));
//! store.put_state(&buy, &paper, Bytes::from(r#"{"owner":"DigiBank"}"#)).await?;
//!
//! let query = store.query();
//! assert_eq!(query.query_by_owner("DigiBank").await?.len(), 1);
//! assert_eq!(
//!     query.history_table(&["MagnetoCorp", "00001"]).await?,
//!     r#"[{"TxId":"tx1","Timestamp":"2020-09-13T12:26:40.000Z","IsDelete":"false","owner":"DigiBank"}]"#
//! );
//! # Ok(())
//! # }
//! ```

mod config;
mod delta;
mod error;
mod iterator;
mod model;
mod query;
mod selector;
mod serde;
mod store;
mod stub;
mod table;

pub use config::{Config, DEFAULT_NAMESPACE};
pub use delta::{
    DeltaField, DeltaKind, IS_DELETE_FIELD, TIMESTAMP_FIELD, TX_ID_FIELD, compute_deltas,
    flatten_deltas, is_chronological,
};
pub use error::{Error, Result};
pub use iterator::{DrainMode, Normalize, ResultIterator, drain};
pub use model::{
    CurrentRecord, EntityKey, HistoricalVersion, HistoryEntry, Payload, StateEntry, TxContext,
    TxTimestamp, format_timestamp,
};
pub use query::{LedgerQuery, owner_selector};
pub use selector::RichQuery;
pub use self::serde::CompositeKey;
pub use store::{HistoryQueryIterator, StateQueryIterator, StateStore};
pub use stub::LedgerStub;
pub use table::{tabulate, tabulate_flat};
