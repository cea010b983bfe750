//! Order-preserving encoding for variable-length byte strings.
//!
//! Each value is escaped and followed by a `0x00` terminator:
//!
//! - `0x00` → `0x01 0x01`
//! - `0x01` → `0x01 0x02`
//! - `0xFF` → `0x01 0x03`
//! - all other bytes unchanged
//!
//! Because the terminator sorts below every escaped byte, a shorter value
//! sorts before any longer value sharing its prefix, and a sequence of
//! encoded values compares the same way as the tuple of raw values as long
//! as the values contain no `0xFF` byte (always true for UTF-8 text). Encoded
//! output never contains `0xFF`, so `prefix ++ 0xFF` is a strict upper bound
//! for every key starting with `prefix`.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use super::DeserializeError;

const TERMINATOR: u8 = 0x00;
const ESCAPE: u8 = 0x01;

/// Appends the escaped, terminated form of `value` to `buf`.
pub fn serialize(value: &[u8], buf: &mut BytesMut) {
    buf.reserve(value.len() + 1);
    for &byte in value {
        match byte {
            0x00 => buf.put_slice(&[ESCAPE, 0x01]),
            0x01 => buf.put_slice(&[ESCAPE, 0x02]),
            0xFF => buf.put_slice(&[ESCAPE, 0x03]),
            other => buf.put_u8(other),
        }
    }
    buf.put_u8(TERMINATOR);
}

/// Reads one terminated value from `buf`, advancing past its terminator.
///
/// # Errors
///
/// Returns an error if the terminator is missing or an escape sequence is
/// truncated or unknown.
pub fn deserialize(buf: &mut &[u8]) -> Result<Bytes, DeserializeError> {
    let mut out = BytesMut::new();
    loop {
        if !buf.has_remaining() {
            return Err(DeserializeError::new("missing terminator in terminated bytes"));
        }
        match buf.get_u8() {
            TERMINATOR => return Ok(out.freeze()),
            ESCAPE => {
                if !buf.has_remaining() {
                    return Err(DeserializeError::new("truncated escape sequence"));
                }
                let unescaped = match buf.get_u8() {
                    0x01 => 0x00,
                    0x02 => 0x01,
                    0x03 => 0xFF,
                    other => {
                        return Err(DeserializeError::new(format!(
                            "invalid escape byte: 0x{:02x}",
                            other
                        )));
                    }
                };
                out.put_u8(unescaped);
            }
            byte => out.put_u8(byte),
        }
    }
}
