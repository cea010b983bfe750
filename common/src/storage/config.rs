//! Serializable storage configuration.

use serde::{Deserialize, Serialize};

/// Which storage backend to open and how.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum StorageConfig {
    /// Ephemeral in-process storage.
    #[default]
    InMemory,
    /// SlateDB on an object store.
    SlateDb(SlateDbStorageConfig),
}

/// SlateDB backend settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlateDbStorageConfig {
    /// Database path within the object store.
    pub path: String,
    /// Object store holding the database.
    pub object_store: ObjectStoreConfig,
    /// Optional SlateDB settings file; defaults are used when absent.
    #[serde(default)]
    pub settings_path: Option<String>,
}

/// Object store backing a SlateDB database.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ObjectStoreConfig {
    InMemory,
    Local(LocalObjectStoreConfig),
}

/// Local filesystem object store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalObjectStoreConfig {
    /// Root directory; created if missing.
    pub path: String,
}
