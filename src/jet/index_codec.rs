//! Index entry key encoding for non-text column types.
//!
//! Index entries compare as raw byte strings, so every column type needs an
//! encoding whose lexicographic order matches the type's value order (and
//! its reverse, for descending index columns). Each encoded column key
//! starts with a one-byte flag separating nulls from values and ascending
//! from descending; the type-specific body follows.
//!
//! Integer bodies are big-endian with the sign bit flipped; float bodies
//! flip the sign bit when non-negative and bit-complement when the value's
//! negativity matches the column direction; fixed-point bodies overwrite
//! their sign byte (two conventions, selected by the format's
//! `legacy_numeric_indexes` flag; the legacy one reproduces the original
//! engine's descending behavior bit for bit). Text bodies are produced by
//! [`crate::jet::index_codes`].

use byteorder::{BigEndian, ByteOrder};

use crate::jet::column::Column;
use crate::jet::format::JetFormat;
use crate::jet::index_codes;
use crate::jet::value::{datetime_to_days, DataType, Value};
use crate::JetError;

/// Flag byte of a null key in an ascending column.
pub const ENTRY_FLAG_ASC_NULL: u8 = 0x00;
/// Flag byte of a null key in a descending column.
pub const ENTRY_FLAG_DESC_NULL: u8 = 0xFF;
/// Flag byte preceding a non-null key in an ascending column.
pub const ENTRY_FLAG_ASC_START: u8 = 0x7F;
/// Flag byte preceding a non-null key in a descending column.
pub const ENTRY_FLAG_DESC_START: u8 = 0x80;

/// Marker between the two GUID halves.
const GUID_MID_MARKER: u8 = 0x09;
/// Trailing marker of an ascending GUID key.
const GUID_ASC_END: u8 = 0x08;
/// Trailing marker of a descending GUID key.
const GUID_DESC_END: u8 = 0x09;

/// Boolean keys, one byte total, by (value, direction).
const BOOL_ASC_TRUE: u8 = 0xFF;
const BOOL_ASC_FALSE: u8 = 0x00;
const BOOL_DESC_TRUE: u8 = 0x00;
const BOOL_DESC_FALSE: u8 = 0xFF;

/// A value position in index key space.
#[derive(Debug, Clone)]
pub enum IndexKey<'a> {
    /// Sorts before every storable key of the column.
    Min,
    /// Sorts after every storable key of the column.
    Max,
    /// A concrete column value (possibly null).
    Value(&'a Value),
}

fn complement(bytes: &mut [u8]) {
    for b in bytes {
        *b = !*b;
    }
}

/// Append the encoded key of one index column to `out`.
pub fn write_key(
    out: &mut Vec<u8>,
    col: &Column,
    key: &IndexKey<'_>,
    ascending: bool,
    format: &JetFormat,
) -> Result<(), JetError> {
    let value = match key {
        // MIN and MAX sit outside the storable range: the ascending null
        // flag is below every key, the descending one above
        IndexKey::Min => {
            out.push(ENTRY_FLAG_ASC_NULL);
            return Ok(());
        }
        IndexKey::Max => {
            out.push(ENTRY_FLAG_DESC_NULL);
            return Ok(());
        }
        IndexKey::Value(v) => *v,
    };

    // booleans treat null as false and skip the flag byte scheme entirely
    if col.data_type == DataType::Boolean {
        let truth = matches!(value, Value::Bool(true));
        out.push(match (truth, ascending) {
            (true, true) => BOOL_ASC_TRUE,
            (false, true) => BOOL_ASC_FALSE,
            (true, false) => BOOL_DESC_TRUE,
            (false, false) => BOOL_DESC_FALSE,
        });
        return Ok(());
    }

    if value.is_null() {
        out.push(if ascending {
            ENTRY_FLAG_ASC_NULL
        } else {
            ENTRY_FLAG_DESC_NULL
        });
        return Ok(());
    }

    out.push(if ascending {
        ENTRY_FLAG_ASC_START
    } else {
        ENTRY_FLAG_DESC_START
    });

    let mismatch = || {
        JetError::Argument(format!(
            "value {:?} cannot key column '{}' of type {:?}",
            value, col.name, col.data_type
        ))
    };

    match (col.data_type, value) {
        (DataType::Byte, Value::Byte(v)) => {
            let mut body = [*v];
            if !ascending {
                complement(&mut body);
            }
            out.extend_from_slice(&body);
        }
        (DataType::Int, Value::Int(v)) => {
            let mut body = [0u8; 2];
            BigEndian::write_i16(&mut body, *v);
            write_int_body(out, &mut body, ascending);
        }
        (DataType::Long, Value::Long(v)) | (DataType::Complex, Value::Complex(v)) => {
            let mut body = [0u8; 4];
            BigEndian::write_i32(&mut body, *v);
            write_int_body(out, &mut body, ascending);
        }
        (DataType::Money, Value::Money(v)) => {
            let mut body = [0u8; 8];
            BigEndian::write_i64(&mut body, *v);
            write_int_body(out, &mut body, ascending);
        }
        (DataType::Float, Value::Float(v)) => {
            let mut body = [0u8; 4];
            BigEndian::write_u32(&mut body, v.to_bits());
            write_float_body(out, &mut body, *v < 0.0, ascending);
        }
        (DataType::Double, Value::Double(v)) => {
            let mut body = [0u8; 8];
            BigEndian::write_u64(&mut body, v.to_bits());
            write_float_body(out, &mut body, *v < 0.0, ascending);
        }
        (DataType::ShortDateTime, Value::DateTime(dt)) => {
            let days = datetime_to_days(*dt);
            let mut body = [0u8; 8];
            BigEndian::write_u64(&mut body, days.to_bits());
            write_float_body(out, &mut body, days < 0.0, ascending);
        }
        (DataType::Numeric, Value::Numeric(n)) => {
            let mut body = [0u8; 17];
            body[0] = if n.negative { 0x01 } else { 0x00 };
            BigEndian::write_u128(&mut body[1..], n.mantissa);
            if format.legacy_numeric_indexes {
                if n.negative == ascending {
                    complement(&mut body);
                }
                body[0] = if n.negative { 0x00 } else { 0xFF };
            } else {
                body[0] = 0xFF;
                if n.negative == ascending {
                    complement(&mut body);
                }
            }
            out.extend_from_slice(&body);
        }
        (DataType::Guid, Value::Guid(bytes)) => {
            let mut body = *bytes;
            if !ascending {
                complement(&mut body);
            }
            out.extend_from_slice(&body[..8]);
            out.push(GUID_MID_MARKER);
            out.extend_from_slice(&body[8..]);
            out.push(if ascending { GUID_ASC_END } else { GUID_DESC_END });
        }
        (DataType::Text | DataType::Memo, Value::Text(s)) => {
            index_codes::encode_text_key(out, s, col.sort_order, ascending)?;
        }
        (DataType::Binary | DataType::Ole, Value::Binary(bytes)) => {
            let mut body = bytes.clone();
            if !ascending {
                complement(&mut body);
            }
            out.extend_from_slice(&body);
        }
        _ => return Err(mismatch()),
    }
    Ok(())
}

/// Signed big-endian body: flip the sign bit, complement when descending.
fn write_int_body(out: &mut Vec<u8>, body: &mut [u8], ascending: bool) {
    body[0] ^= 0x80;
    if !ascending {
        complement(body);
    }
    out.extend_from_slice(body);
}

/// IEEE float body: non-negative values flip the sign bit; the whole body
/// is complemented when the value's negativity matches the direction.
fn write_float_body(out: &mut Vec<u8>, body: &mut [u8], is_negative: bool, ascending: bool) {
    if !is_negative {
        body[0] ^= 0x80;
    }
    if is_negative == ascending {
        complement(body);
    }
    out.extend_from_slice(body);
}
