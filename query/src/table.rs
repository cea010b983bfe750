//! Renders delta sequences as a JSON-compatible table.
//!
//! The output is an array of objects, one per delta group, with every value
//! rendered as a string:
//!
//! ```text
//! [{"TxId":"tx1","Timestamp":"...","IsDelete":"false","color":"red"},{"TxId":"tx2",...}]
//! ```
//!
//! A `TxId` key after the first pair closes the current object and opens a
//! new one. [`tabulate`] only splits on the `TxId` metadata field, and
//! renders payload fields named like a metadata field under a `Value.`
//! prefix so they never overwrite the group's metadata.

use std::borrow::Cow;

use serde_json::Value;

use crate::delta::{DeltaField, DeltaKind, IS_DELETE_FIELD, TIMESTAMP_FIELD, TX_ID_FIELD};

/// Key prefix for payload fields whose name collides with a metadata field.
const PAYLOAD_PREFIX: &str = "Value.";

/// Formats a delta sequence into one object per group.
///
/// # Example
///
/// ```
/// use query::tabulate_flat;
///
/// let table = tabulate_flat(&["TxId", "tx1", "owner", "DigiBank"]);
/// assert_eq!(table, r#"[{"TxId":"tx1","owner":"DigiBank"}]"#);
/// ```
pub fn tabulate(deltas: &[DeltaField]) -> String {
    let mut writer = TableWriter::default();
    for field in deltas {
        let starts_record = field.kind == DeltaKind::Meta && field.name == TX_ID_FIELD;
        writer.push(&column_name(field), &field.rendered_value(), starts_record);
    }
    writer.finish()
}

fn column_name(field: &DeltaField) -> Cow<'_, str> {
    let reserved = matches!(
        field.name.as_str(),
        TX_ID_FIELD | TIMESTAMP_FIELD | IS_DELETE_FIELD
    );
    if field.kind != DeltaKind::Meta && reserved {
        Cow::Owned(format!("{PAYLOAD_PREFIX}{}", field.name))
    } else {
        Cow::Borrowed(&field.name)
    }
}

/// Formats an alternating `name, value` token sequence.
///
/// A trailing unpaired token is dropped with a warning.
pub fn tabulate_flat<T: AsRef<str>>(tokens: &[T]) -> String {
    if tokens.len() % 2 != 0 {
        tracing::warn!(
            tokens = tokens.len(),
            "odd number of delta tokens, dropping the trailing one"
        );
    }

    let mut writer = TableWriter::default();
    for pair in tokens.chunks_exact(2) {
        let name = pair[0].as_ref();
        writer.push(name, pair[1].as_ref(), name == TX_ID_FIELD);
    }
    writer.finish()
}

#[derive(Default)]
struct TableWriter {
    out: String,
    open: bool,
}

impl TableWriter {
    fn push(&mut self, name: &str, value: &str, starts_record: bool) {
        if !self.open {
            self.out.push_str("[{");
            self.open = true;
        } else if starts_record {
            self.out.push_str("},{");
        } else {
            self.out.push(',');
        }
        self.out.push_str(&quote(name));
        self.out.push(':');
        self.out.push_str(&quote(value));
    }

    fn finish(mut self) -> String {
        if self.open {
            self.out.push_str("}]");
            self.out
        } else {
            "[]".to_string()
        }
    }
}

fn quote(text: &str) -> String {
    Value::from(text).to_string()
}
