//! Core data types for ledger queries.
//!
//! This module defines the entity keys callers pass in, the raw entries a
//! store yields ([`StateEntry`], [`HistoryEntry`]), and the normalized
//! records the query façade returns ([`CurrentRecord`],
//! [`HistoricalVersion`]).

use bytes::Bytes;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Serialize, Serializer};
use serde_json::{Map, Value};

use crate::error::{Error, Result};
use crate::serde::CompositeKey;

/// Ordered, non-empty tuple of non-empty segments identifying one entity
/// within a namespace, e.g. `("MagnetoCorp", "00001")`.
///
/// The textual form joins segments with `:`.
///
/// # Example
///
/// ```
/// use query::EntityKey;
///
/// let key = EntityKey::parse("MagnetoCorp:00001").unwrap();
/// assert_eq!(key.segments(), ["MagnetoCorp", "00001"]);
/// assert_eq!(key.to_string(), "MagnetoCorp:00001");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EntityKey {
    segments: Vec<String>,
}

impl EntityKey {
    /// Separator used by [`parse`](Self::parse) and `Display`.
    pub const SEPARATOR: char = ':';

    /// Builds a key from its segments.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if there are no segments or any
    /// segment is empty.
    pub fn new<I, S>(segments: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let segments: Vec<String> = segments.into_iter().map(Into::into).collect();
        validate_segments(&segments)?;
        Ok(Self { segments })
    }

    /// Splits a `:`-separated key into segments.
    pub fn parse(key: &str) -> Result<Self> {
        Self::new(key.split(Self::SEPARATOR))
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// Returns true if this key's leading segments equal `prefix`.
    pub fn starts_with<T: AsRef<str>>(&self, prefix: &[T]) -> bool {
        prefix.len() <= self.segments.len()
            && prefix
                .iter()
                .zip(&self.segments)
                .all(|(p, s)| p.as_ref() == s)
    }
}

impl std::fmt::Display for EntityKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (i, segment) in self.segments.iter().enumerate() {
            if i > 0 {
                write!(f, "{}", Self::SEPARATOR)?;
            }
            write!(f, "{}", segment)?;
        }
        Ok(())
    }
}

/// Rejects empty segment lists and empty segments.
pub(crate) fn validate_segments<T: AsRef<str>>(segments: &[T]) -> Result<()> {
    if segments.is_empty() {
        return Err(Error::InvalidArgument(
            "key must have at least one segment".to_string(),
        ));
    }
    if let Some(pos) = segments.iter().position(|s| s.as_ref().is_empty()) {
        return Err(Error::InvalidArgument(format!(
            "key segment {} must not be empty",
            pos
        )));
    }
    Ok(())
}

/// A stored value: JSON when it parses, otherwise the raw text.
///
/// Non-JSON values are legal and are kept verbatim.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Payload {
    Decoded(Value),
    Raw(String),
}

impl Payload {
    /// Decodes stored bytes as UTF-8 text, then attempts JSON.
    pub fn decode(bytes: &[u8]) -> Self {
        let text = String::from_utf8_lossy(bytes);
        match serde_json::from_str(&text) {
            Ok(value) => Payload::Decoded(value),
            Err(err) => {
                tracing::debug!(error = %err, "payload is not JSON, keeping raw text");
                Payload::Raw(text.into_owned())
            }
        }
    }

    /// Returns the payload's fields if it is a JSON object.
    ///
    /// Raw text and non-object JSON values have no enumerable fields.
    pub fn fields(&self) -> Option<&Map<String, Value>> {
        match self {
            Payload::Decoded(Value::Object(map)) => Some(map),
            _ => None,
        }
    }

    pub fn is_raw(&self) -> bool {
        matches!(self, Payload::Raw(_))
    }

    pub fn as_json(&self) -> Option<&Value> {
        match self {
            Payload::Decoded(value) => Some(value),
            Payload::Raw(_) => None,
        }
    }
}

/// The live state of one entity, as returned by prefix and rich queries.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct CurrentRecord {
    pub key: CompositeKey,
    #[serde(rename = "Record")]
    pub payload: Payload,
}

/// One immutable past state of an entity.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct HistoricalVersion {
    pub tx_id: String,
    #[serde(serialize_with = "serialize_timestamp")]
    pub timestamp: DateTime<Utc>,
    pub is_delete: bool,
    #[serde(rename = "Value")]
    pub payload: Payload,
}

/// Renders an instant as RFC 3339 UTC with millisecond precision.
pub fn format_timestamp(timestamp: &DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn serialize_timestamp<S: Serializer>(
    timestamp: &DateTime<Utc>,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    serializer.serialize_str(&format_timestamp(timestamp))
}

/// Transaction timestamp as recorded by the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct TxTimestamp {
    pub seconds: i64,
    pub nanos: i32,
}

impl TxTimestamp {
    pub fn new(seconds: i64, nanos: i32) -> Self {
        Self { seconds, nanos }
    }

    /// Combines seconds and the millisecond part of nanos into one instant.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Encoding`] if the instant is out of range.
    pub fn to_datetime(&self) -> Result<DateTime<Utc>> {
        let millis = self
            .seconds
            .checked_mul(1000)
            .and_then(|ms| ms.checked_add(i64::from(self.nanos / 1_000_000)))
            .ok_or_else(|| Error::Encoding(format!("timestamp out of range: {:?}", self)))?;
        DateTime::from_timestamp_millis(millis)
            .ok_or_else(|| Error::Encoding(format!("timestamp out of range: {:?}", self)))
    }
}

impl From<DateTime<Utc>> for TxTimestamp {
    fn from(instant: DateTime<Utc>) -> Self {
        Self {
            seconds: instant.timestamp(),
            nanos: instant.timestamp_subsec_nanos() as i32,
        }
    }
}

/// An entry yielded by a state scan or rich query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateEntry {
    pub key: CompositeKey,
    pub value: Bytes,
}

/// An entry yielded by a history scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryEntry {
    pub tx_id: String,
    pub timestamp: TxTimestamp,
    pub is_delete: bool,
    pub value: Bytes,
}

/// Identity and time of the transaction performing a write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxContext {
    pub tx_id: String,
    pub timestamp: TxTimestamp,
}

impl TxContext {
    pub fn new(tx_id: impl Into<String>, timestamp: TxTimestamp) -> Self {
        Self {
            tx_id: tx_id.into(),
            timestamp,
        }
    }

    /// Creates a context stamped with the current wall-clock time.
    pub fn now(tx_id: impl Into<String>) -> Self {
        Self::new(tx_id, Utc::now().into())
    }
}
