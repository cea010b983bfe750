//! Field-level deltas between consecutive versions of one entity.
//!
//! [`compute_deltas`] walks an entity's history pairwise. For each version
//! that has a successor it emits one group: the version's metadata
//! (`TxId`, `Timestamp`, `IsDelete`) followed by the payload fields that
//! changed, were removed, or were added in the successor. Groups are not a
//! separate type; a new group starts at every `TxId` field.
//!
//! The input must be ordered oldest first. Stores yield history in that
//! order; [`is_chronological`] checks it.

use std::collections::HashSet;

use serde_json::{Map, Value};

use crate::model::{HistoricalVersion, format_timestamp};

/// Field name opening every delta group.
pub const TX_ID_FIELD: &str = "TxId";
pub const TIMESTAMP_FIELD: &str = "Timestamp";
pub const IS_DELETE_FIELD: &str = "IsDelete";

/// What a [`DeltaField`] records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeltaKind {
    /// Version metadata: transaction id, timestamp or deletion flag.
    Meta,
    /// Field present in both versions with a different value; carries the
    /// new value.
    Change,
    /// Field only present in the newer version; carries its value.
    Add,
    /// Field removed in the newer version; carries the last known value.
    Delete,
}

/// One `name, value` pair of a delta sequence.
#[derive(Debug, Clone, PartialEq)]
pub struct DeltaField {
    pub name: String,
    pub value: Value,
    pub kind: DeltaKind,
}

impl DeltaField {
    fn new(name: impl Into<String>, value: Value, kind: DeltaKind) -> Self {
        Self {
            name: name.into(),
            value,
            kind,
        }
    }

    /// The value as table text: strings unquoted, everything else as
    /// compact JSON.
    pub fn rendered_value(&self) -> String {
        match &self.value {
            Value::String(text) => text.clone(),
            other => other.to_string(),
        }
    }
}

/// Returns true if timestamps never decrease along `versions`.
pub fn is_chronological(versions: &[HistoricalVersion]) -> bool {
    versions
        .windows(2)
        .all(|pair| pair[0].timestamp <= pair[1].timestamp)
}

/// Computes the delta sequence for one entity's ordered history.
///
/// A history of fewer than two versions yields no deltas. A pair where
/// either payload is raw text contributes metadata only; a JSON payload that
/// is not an object counts as an empty field set.
pub fn compute_deltas(versions: &[HistoricalVersion]) -> Vec<DeltaField> {
    if !is_chronological(versions) {
        tracing::warn!(
            versions = versions.len(),
            "history is not oldest-first; deltas follow the given order"
        );
    }

    let empty = Map::new();
    let mut deltas = Vec::new();
    for pair in versions.windows(2) {
        let (base, next) = (&pair[0], &pair[1]);
        push_metadata(&mut deltas, base);

        if base.payload.is_raw() || next.payload.is_raw() {
            continue;
        }
        let base_fields = base.payload.fields().unwrap_or(&empty);
        let next_fields = next.payload.fields().unwrap_or(&empty);

        for (name, base_value) in base_fields {
            match next_fields.get(name) {
                Some(next_value) if next_value != base_value => {
                    deltas.push(DeltaField::new(name, next_value.clone(), DeltaKind::Change));
                }
                Some(_) => {}
                None => {
                    deltas.push(DeltaField::new(name, base_value.clone(), DeltaKind::Delete));
                }
            }
        }

        let mut added = HashSet::new();
        for (name, next_value) in next_fields {
            if !base_fields.contains_key(name) && added.insert(name.as_str()) {
                deltas.push(DeltaField::new(name, next_value.clone(), DeltaKind::Add));
            }
        }
    }
    deltas
}

fn push_metadata(deltas: &mut Vec<DeltaField>, version: &HistoricalVersion) {
    deltas.push(DeltaField::new(
        TX_ID_FIELD,
        Value::String(version.tx_id.clone()),
        DeltaKind::Meta,
    ));
    deltas.push(DeltaField::new(
        TIMESTAMP_FIELD,
        Value::String(format_timestamp(&version.timestamp)),
        DeltaKind::Meta,
    ));
    deltas.push(DeltaField::new(
        IS_DELETE_FIELD,
        Value::String(version.is_delete.to_string()),
        DeltaKind::Meta,
    ));
}

/// Flattens deltas into the alternating `name, value` text sequence.
pub fn flatten_deltas(deltas: &[DeltaField]) -> Vec<String> {
    deltas
        .iter()
        .flat_map(|field| [field.name.clone(), field.rendered_value()])
        .collect()
}
