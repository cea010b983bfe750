//! Configuration for opening a state store.

use common::StorageConfig;
use serde::{Deserialize, Serialize};

/// Namespace used for commercial paper records when none is configured.
pub const DEFAULT_NAMESPACE: &str = "org.papernet.commercialpaperlist";

/// Configuration for [`StateStore::open`](crate::StateStore::open).
///
/// # Example
///
/// ```
/// use query::Config;
///
/// let config: Config = serde_json::from_str(r#"{"namespace": "org.example.bonds"}"#).unwrap();
/// assert_eq!(config.namespace, "org.example.bonds");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Storage backend holding state and history records.
    pub storage: StorageConfig,

    /// Collection ("list") name prefixing every composite key queried
    /// through [`LedgerQuery::new`](crate::LedgerQuery::new).
    pub namespace: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            storage: StorageConfig::InMemory,
            namespace: DEFAULT_NAMESPACE.to_string(),
        }
    }
}
