//! Storage primitives shared by the ledger query crates.
//!
//! This crate provides an ordered key/value storage abstraction
//! ([`Storage`], [`StorageRead`], [`StorageIterator`]) with an in-memory and
//! a SlateDB backend, plus the order-preserving byte encodings used to build
//! keys on top of it.

pub mod bytes;
pub mod serde;
pub mod storage;

pub use self::bytes::BytesRange;
pub use storage::config::StorageConfig;
pub use storage::factory::create_storage;
pub use storage::{
    Record, RecordOp, Storage, StorageError, StorageIterator, StorageRead, StorageResult,
    WriteOptions,
};
