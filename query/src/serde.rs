//! Serde for state store records
//!
//! This module provides encoding and decoding for the records the reference
//! [`StateStore`](crate::StateStore) keeps in storage. Keys preserve
//! lexicographic ordering so that prefix scans and per-key history scans map
//! onto contiguous storage ranges.
//!
//! # Key Format
//!
//! All keys start with a version byte and record type discriminator:
//!
//! ```text
//! | version (u8) | type (u8) | ... record-specific fields ... |
//! ```
//!
//! # Record Types
//!
//! - `State` (0x01): current value of one entity
//! - `History` (0x02): one version of one entity, ordered by write sequence
//! - `Sequence` (0x03): the next history sequence number
//!
//! Namespaces and key segments use `terminated_bytes` encoding, so the
//! encoding is injective and the encoded form of a partial key is a byte
//! prefix of every full key that extends it.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use common::BytesRange;
use common::serde::terminated_bytes;
use serde::{Serialize, Serializer};

use crate::error::{Error, Result};
use crate::model::{EntityKey, TxTimestamp};

/// Key format version (currently 0x01)
pub const KEY_VERSION: u8 = 0x01;

/// Marks the end of the segment list in history keys.
///
/// Segments are never empty, so an encoded segment never begins with the
/// terminator byte.
const END_OF_SEGMENTS: u8 = 0x00;

/// Record type discriminators for state store records
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordType {
    /// Current state of an entity
    State = 0x01,
    /// Historical version of an entity
    History = 0x02,
    /// Next history sequence number
    Sequence = 0x03,
}

impl RecordType {
    /// Returns the ID of this record type
    pub fn id(&self) -> u8 {
        *self as u8
    }

    /// Converts a u8 id back to a RecordType
    pub fn from_id(id: u8) -> Result<Self> {
        match id {
            0x01 => Ok(RecordType::State),
            0x02 => Ok(RecordType::History),
            0x03 => Ok(RecordType::Sequence),
            _ => Err(Error::Encoding(format!(
                "invalid record type: 0x{:02x}",
                id
            ))),
        }
    }
}

fn check_header(data: &[u8], expected: RecordType) -> Result<()> {
    if data.len() < 2 {
        return Err(Error::Encoding(format!(
            "buffer too short for {:?} key",
            expected
        )));
    }
    if data[0] != KEY_VERSION {
        return Err(Error::Encoding(format!(
            "invalid key version: expected 0x{:02x}, got 0x{:02x}",
            KEY_VERSION, data[0]
        )));
    }
    let record_type = RecordType::from_id(data[1])?;
    if record_type != expected {
        return Err(Error::Encoding(format!(
            "invalid record type: expected {:?}, got {:?}",
            expected, record_type
        )));
    }
    Ok(())
}

fn put_header(buf: &mut BytesMut, record_type: RecordType) {
    buf.put_u8(KEY_VERSION);
    buf.put_u8(record_type.id());
}

fn put_segments<T: AsRef<str>>(buf: &mut BytesMut, namespace: &str, segments: &[T]) {
    terminated_bytes::serialize(namespace.as_bytes(), buf);
    for segment in segments {
        terminated_bytes::serialize(segment.as_ref().as_bytes(), buf);
    }
}

fn read_string(buf: &mut &[u8]) -> Result<String> {
    let raw = terminated_bytes::deserialize(buf)?;
    String::from_utf8(raw.to_vec())
        .map_err(|e| Error::Encoding(format!("key segment is not UTF-8: {}", e)))
}

/// A namespace plus an entity key: the address of one state record.
///
/// ```text
/// | version (u8) | type (u8=0x01) | terminated(namespace) | terminated(segment)... |
/// ```
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CompositeKey {
    pub namespace: String,
    pub key: EntityKey,
}

impl CompositeKey {
    /// Creates a composite key.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if the namespace is empty.
    pub fn new(namespace: impl Into<String>, key: EntityKey) -> Result<Self> {
        let namespace = namespace.into();
        if namespace.is_empty() {
            return Err(Error::InvalidArgument(
                "namespace must not be empty".to_string(),
            ));
        }
        Ok(Self { namespace, key })
    }

    /// Serializes the state key to bytes for storage.
    pub fn serialize(&self) -> Bytes {
        let mut buf = BytesMut::new();
        put_header(&mut buf, RecordType::State);
        put_segments(&mut buf, &self.namespace, self.key.segments());
        buf.freeze()
    }

    /// Deserializes a state key from bytes.
    pub fn deserialize(data: &[u8]) -> Result<Self> {
        check_header(data, RecordType::State)?;
        let mut buf = &data[2..];
        let namespace = read_string(&mut buf)?;
        let mut segments = Vec::new();
        while buf.has_remaining() {
            segments.push(read_string(&mut buf)?);
        }
        Self::new(namespace, EntityKey::new(segments)?)
    }

    /// Storage range holding every state key in `namespace` whose leading
    /// segments equal `prefix`. An empty prefix covers the whole namespace.
    pub fn prefix_range<T: AsRef<str>>(namespace: &str, prefix: &[T]) -> BytesRange {
        let mut buf = BytesMut::new();
        put_header(&mut buf, RecordType::State);
        put_segments(&mut buf, namespace, prefix);
        BytesRange::prefix(buf.freeze())
    }

    /// Storage range holding every state key in every namespace.
    pub fn state_range() -> BytesRange {
        BytesRange::prefix(Bytes::from_static(&[KEY_VERSION, RecordType::State as u8]))
    }
}

impl std::fmt::Display for CompositeKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}{}{}", self.namespace, EntityKey::SEPARATOR, self.key)
    }
}

impl Serialize for CompositeKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Key for one historical version of an entity.
///
/// ```text
/// | version (u8) | type (u8=0x02) | terminated(namespace) | terminated(segment)... | 0x00 | sequence (u64 BE) |
/// ```
///
/// Versions of one entity are contiguous and ordered oldest-first by the
/// store-wide write sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryKey {
    pub key: CompositeKey,
    pub sequence: u64,
}

impl HistoryKey {
    pub fn new(key: CompositeKey, sequence: u64) -> Self {
        Self { key, sequence }
    }

    fn entity_prefix(key: &CompositeKey) -> BytesMut {
        let mut buf = BytesMut::new();
        put_header(&mut buf, RecordType::History);
        put_segments(&mut buf, &key.namespace, key.key.segments());
        buf.put_u8(END_OF_SEGMENTS);
        buf
    }

    /// Serializes the history key to bytes for storage.
    pub fn serialize(&self) -> Bytes {
        let mut buf = Self::entity_prefix(&self.key);
        buf.put_u64(self.sequence);
        buf.freeze()
    }

    /// Deserializes a history key from bytes.
    pub fn deserialize(data: &[u8]) -> Result<Self> {
        check_header(data, RecordType::History)?;
        let mut buf = &data[2..];
        let namespace = read_string(&mut buf)?;
        let mut segments = Vec::new();
        loop {
            match buf.first() {
                Some(&END_OF_SEGMENTS) => {
                    buf.advance(1);
                    break;
                }
                Some(_) => segments.push(read_string(&mut buf)?),
                None => {
                    return Err(Error::Encoding(
                        "history key missing end of segments".to_string(),
                    ));
                }
            }
        }
        if buf.remaining() != 8 {
            return Err(Error::Encoding(format!(
                "history key sequence must be 8 bytes, got {}",
                buf.remaining()
            )));
        }
        let sequence = buf.get_u64();
        Ok(Self {
            key: CompositeKey::new(namespace, EntityKey::new(segments)?)?,
            sequence,
        })
    }

    /// Storage range holding every version of exactly `key`.
    pub fn entity_range(key: &CompositeKey) -> BytesRange {
        BytesRange::prefix(Self::entity_prefix(key).freeze())
    }
}

/// Value for a history record.
///
/// ```text
/// | tx_id_len (u16 BE) | tx_id (utf8) | seconds (i64 BE) | nanos (i32 BE) | is_delete (u8) | value |
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryValue {
    pub tx_id: String,
    pub timestamp: TxTimestamp,
    pub is_delete: bool,
    pub value: Bytes,
}

impl HistoryValue {
    const FIXED_LEN: usize = 2 + 8 + 4 + 1;

    /// Encodes the value to bytes.
    pub fn serialize(&self) -> Result<Bytes> {
        let tx_len = u16::try_from(self.tx_id.len()).map_err(|_| {
            Error::InvalidArgument(format!(
                "transaction id too long: {} bytes",
                self.tx_id.len()
            ))
        })?;
        let mut buf = BytesMut::with_capacity(Self::FIXED_LEN + self.tx_id.len() + self.value.len());
        buf.put_u16(tx_len);
        buf.put_slice(self.tx_id.as_bytes());
        buf.put_i64(self.timestamp.seconds);
        buf.put_i32(self.timestamp.nanos);
        buf.put_u8(u8::from(self.is_delete));
        buf.put_slice(&self.value);
        Ok(buf.freeze())
    }

    /// Decodes a history value from bytes.
    pub fn deserialize(data: &Bytes) -> Result<Self> {
        if data.len() < Self::FIXED_LEN {
            return Err(Error::Encoding(format!(
                "buffer too short for history value: need {} bytes, got {}",
                Self::FIXED_LEN,
                data.len()
            )));
        }
        let mut buf = data.as_ref();
        let tx_len = buf.get_u16() as usize;
        if buf.remaining() < tx_len + Self::FIXED_LEN - 2 {
            return Err(Error::Encoding(format!(
                "buffer too short for history value with {}-byte transaction id",
                tx_len
            )));
        }
        let tx_id = String::from_utf8(buf[..tx_len].to_vec())
            .map_err(|e| Error::Encoding(format!("transaction id is not UTF-8: {}", e)))?;
        buf.advance(tx_len);
        let seconds = buf.get_i64();
        let nanos = buf.get_i32();
        let is_delete = match buf.get_u8() {
            0 => false,
            1 => true,
            other => {
                return Err(Error::Encoding(format!(
                    "invalid is_delete flag: 0x{:02x}",
                    other
                )));
            }
        };
        let value = data.slice(data.len() - buf.remaining()..);
        Ok(Self {
            tx_id,
            timestamp: TxTimestamp::new(seconds, nanos),
            is_delete,
            value,
        })
    }
}

/// Key of the singleton record holding the next history sequence number.
pub fn sequence_key() -> Bytes {
    Bytes::from_static(&[KEY_VERSION, RecordType::Sequence as u8])
}

/// Encodes a sequence number value.
pub fn serialize_sequence(next: u64) -> Bytes {
    Bytes::copy_from_slice(&next.to_be_bytes())
}

/// Decodes a sequence number value.
pub fn deserialize_sequence(data: &[u8]) -> Result<u64> {
    let bytes: [u8; 8] = data.try_into().map_err(|_| {
        Error::Encoding(format!(
            "sequence value must be 8 bytes, got {}",
            data.len()
        ))
    })?;
    Ok(u64::from_be_bytes(bytes))
}

/// Range covering every history record, used to check ordering in tests.
#[cfg(test)]
pub(crate) fn history_range() -> BytesRange {
    use std::ops::Bound;

    BytesRange::new(
        Bound::Included(Bytes::from_static(&[KEY_VERSION, RecordType::History as u8])),
        Bound::Excluded(Bytes::from_static(&[KEY_VERSION, RecordType::Sequence as u8])),
    )
}
