//! Column descriptors and per-type value codecs.
//!
//! A [`Column`] carries the descriptor fields stored in the table
//! definition: type tag, flags, precision/scale for decimals, the fixed
//! area placement offset, and the variable-column ordinal. The codec half
//! of this module turns [`Value`]s into column bytes and back, including
//! the two text charsets (cp1252 for v3, UTF-16LE for v4+) and the
//! compressed-unicode representation Jet 4 uses for pure-ASCII strings.
//!
//! Long value columns (memo/OLE) encode and decode only their resolved
//! bytes here; the 12-byte pointer indirection lives in
//! [`crate::jet::long_value`].

use byteorder::{BigEndian, ByteOrder, LittleEndian};
use serde::Serialize;

use crate::jet::constants::*;
use crate::jet::format::{Charset, JetFormat, SortOrder};
use crate::jet::value::{datetime_to_days, days_to_datetime, DataType, JetNumeric, Value};
use crate::JetError;

/// Marker prefix of a compressed unicode text value.
pub const TEXT_COMPRESSION_MARKER: [u8; 2] = [0xFF, 0xFE];

/// One column of a table.
#[derive(Debug, Clone, Serialize)]
pub struct Column {
    /// Column name.
    pub name: String,
    /// Column number as stored (not necessarily the list position).
    pub number: u16,
    /// Data type.
    pub data_type: DataType,
    /// Flag bits (`COLUMN_FLAG_*`).
    pub flags: u8,
    /// Total digits for [`DataType::Numeric`].
    pub precision: u8,
    /// Fractional digits for [`DataType::Numeric`].
    pub scale: u8,
    /// Placement offset in the row's fixed area (fixed columns).
    pub fixed_offset: u16,
    /// Ordinal among the table's variable columns (variable columns).
    pub var_index: u16,
    /// Declared byte length; 0 for unlimited.
    pub length: u16,
    /// Sort order for text index entries over this column.
    pub sort_order: SortOrder,
}

impl Column {
    /// A new column with flags derived from the data type.
    pub fn new(name: &str, data_type: DataType) -> Self {
        let mut flags = match data_type.fixed_size() {
            Some(_) => COLUMN_FLAG_FIXED,
            None => COLUMN_FLAG_VARIABLE,
        };
        if data_type == DataType::Text {
            flags |= COLUMN_FLAG_COMPRESSED_UNICODE;
        }
        Column {
            name: name.to_string(),
            number: 0,
            data_type,
            flags,
            precision: if data_type == DataType::Numeric { 18 } else { 0 },
            scale: if data_type == DataType::Numeric { 4 } else { 0 },
            fixed_offset: 0,
            var_index: 0,
            length: 0,
            sort_order: SortOrder::GeneralLegacy,
        }
    }

    /// Mark this column auto-numbered.
    pub fn with_auto_number(mut self) -> Self {
        self.flags |= COLUMN_FLAG_AUTO_NUMBER;
        self
    }

    /// True when the value lives in the fixed area.
    pub fn is_fixed(&self) -> bool {
        self.flags & COLUMN_FLAG_FIXED != 0
    }

    /// True when the value lives in the variable area.
    pub fn is_variable(&self) -> bool {
        !self.is_fixed()
    }

    /// True when inserts assign this column from the auto-number counter.
    pub fn is_auto_number(&self) -> bool {
        self.flags & COLUMN_FLAG_AUTO_NUMBER != 0
    }

    /// True when text values may use the compressed representation.
    pub fn is_compressed_unicode(&self) -> bool {
        self.flags & COLUMN_FLAG_COMPRESSED_UNICODE != 0
    }

    /// Width of this column in the fixed area.
    pub fn fixed_size(&self) -> usize {
        match self.data_type.fixed_size() {
            Some(n) => n,
            // fixed-length text reserves its declared length
            None => self.length as usize,
        }
    }

    /// Encode a non-null value to its column bytes.
    ///
    /// Boolean columns have no bytes (the row mask carries the value) and
    /// return an empty vector. Memo/OLE values produced here are the
    /// resolved value bytes; the caller wraps them in a long value pointer.
    pub fn encode_value(&self, value: &Value, format: &JetFormat) -> Result<Vec<u8>, JetError> {
        let mismatch = || {
            JetError::Argument(format!(
                "value {:?} does not fit column '{}' of type {:?}",
                value, self.name, self.data_type
            ))
        };

        Ok(match (self.data_type, value) {
            (DataType::Boolean, Value::Bool(_)) => Vec::new(),
            (DataType::Byte, Value::Byte(v)) => vec![*v],
            (DataType::Int, Value::Int(v)) => {
                let mut b = [0u8; 2];
                LittleEndian::write_i16(&mut b, *v);
                b.to_vec()
            }
            (DataType::Long, Value::Long(v)) | (DataType::Complex, Value::Complex(v)) => {
                let mut b = [0u8; 4];
                LittleEndian::write_i32(&mut b, *v);
                b.to_vec()
            }
            (DataType::Money, Value::Money(v)) => {
                let mut b = [0u8; 8];
                LittleEndian::write_i64(&mut b, *v);
                b.to_vec()
            }
            (DataType::Float, Value::Float(v)) => {
                let mut b = [0u8; 4];
                LittleEndian::write_f32(&mut b, *v);
                b.to_vec()
            }
            (DataType::Double, Value::Double(v)) => {
                let mut b = [0u8; 8];
                LittleEndian::write_f64(&mut b, *v);
                b.to_vec()
            }
            (DataType::ShortDateTime, Value::DateTime(dt)) => {
                let mut b = [0u8; 8];
                LittleEndian::write_f64(&mut b, datetime_to_days(*dt));
                b.to_vec()
            }
            (DataType::Guid, Value::Guid(bytes)) => bytes.to_vec(),
            (DataType::Numeric, Value::Numeric(n)) => {
                if n.scale != self.scale {
                    return Err(JetError::Argument(format!(
                        "numeric scale {} does not match column '{}' scale {}",
                        n.scale, self.name, self.scale
                    )));
                }
                let mut b = [0u8; 17];
                b[0] = if n.negative { 0x01 } else { 0x00 };
                BigEndian::write_u128(&mut b[1..], n.mantissa);
                b.to_vec()
            }
            (DataType::Binary | DataType::Ole, Value::Binary(bytes)) => {
                if self.length != 0 && bytes.len() > self.length as usize {
                    return Err(mismatch());
                }
                bytes.clone()
            }
            (DataType::Text | DataType::Memo, Value::Text(s)) => {
                let mut bytes = encode_text(s, format.charset, self.is_compressed_unicode())?;
                if self.is_fixed() {
                    // fixed text pads to the declared length
                    if bytes.len() > self.length as usize {
                        return Err(mismatch());
                    }
                    bytes.resize(self.length as usize, 0);
                }
                bytes
            }
            _ => return Err(mismatch()),
        })
    }

    /// Decode column bytes (non-null) back to a value.
    pub fn decode_value(&self, bytes: &[u8], format: &JetFormat) -> Result<Value, JetError> {
        let short = || {
            JetError::Corrupt(format!(
                "column '{}' has {} bytes, fewer than its type {:?} needs",
                self.name,
                bytes.len(),
                self.data_type
            ))
        };
        let need = |n: usize| if bytes.len() < n { Err(short()) } else { Ok(()) };

        Ok(match self.data_type {
            // the row mask decodes booleans; seeing bytes here is a bug
            DataType::Boolean => {
                return Err(JetError::Corrupt(
                    "boolean column carries value bytes".to_string(),
                ))
            }
            DataType::Byte => {
                need(1)?;
                Value::Byte(bytes[0])
            }
            DataType::Int => {
                need(2)?;
                Value::Int(LittleEndian::read_i16(bytes))
            }
            DataType::Long => {
                need(4)?;
                Value::Long(LittleEndian::read_i32(bytes))
            }
            DataType::Complex => {
                need(4)?;
                Value::Complex(LittleEndian::read_i32(bytes))
            }
            DataType::Money => {
                need(8)?;
                Value::Money(LittleEndian::read_i64(bytes))
            }
            DataType::Float => {
                need(4)?;
                Value::Float(LittleEndian::read_f32(bytes))
            }
            DataType::Double => {
                need(8)?;
                Value::Double(LittleEndian::read_f64(bytes))
            }
            DataType::ShortDateTime => {
                need(8)?;
                Value::DateTime(days_to_datetime(LittleEndian::read_f64(bytes)))
            }
            DataType::Guid => {
                need(16)?;
                let mut g = [0u8; 16];
                g.copy_from_slice(&bytes[..16]);
                Value::Guid(g)
            }
            DataType::Numeric => {
                need(17)?;
                Value::Numeric(JetNumeric {
                    negative: bytes[0] != 0,
                    mantissa: BigEndian::read_u128(&bytes[1..17]),
                    scale: self.scale,
                })
            }
            DataType::Binary | DataType::Ole => Value::Binary(bytes.to_vec()),
            DataType::Text | DataType::Memo => {
                let mut text = decode_text(bytes, format.charset)?;
                if self.is_fixed() {
                    // strip fixed-length padding
                    while text.ends_with('\0') {
                        text.pop();
                    }
                }
                Value::Text(text)
            }
        })
    }
}

/// Encode a string for storage.
///
/// Under UTF-16LE charsets, `compressed` permits the two-byte-marker
/// single-byte form when every char is below U+0080.
pub fn encode_text(s: &str, charset: Charset, compressed: bool) -> Result<Vec<u8>, JetError> {
    match charset {
        Charset::Cp1252 => encode_cp1252(s),
        Charset::Utf16Le => {
            if compressed && s.chars().all(|c| (c as u32) < 0x80) {
                let mut out = Vec::with_capacity(2 + s.len());
                out.extend_from_slice(&TEXT_COMPRESSION_MARKER);
                out.extend(s.chars().map(|c| c as u8));
                Ok(out)
            } else {
                let mut out = Vec::with_capacity(s.len() * 2);
                for unit in s.encode_utf16() {
                    let mut b = [0u8; 2];
                    LittleEndian::write_u16(&mut b, unit);
                    out.extend_from_slice(&b);
                }
                Ok(out)
            }
        }
    }
}

/// Decode stored text.
///
/// A column flagged compressed may still hold uncompressed values, so both
/// forms are accepted regardless of the flag.
pub fn decode_text(bytes: &[u8], charset: Charset) -> Result<String, JetError> {
    match charset {
        Charset::Cp1252 => Ok(decode_cp1252(bytes)),
        Charset::Utf16Le => {
            if bytes.len() >= 2 && bytes[..2] == TEXT_COMPRESSION_MARKER {
                Ok(bytes[2..].iter().map(|&b| b as char).collect())
            } else {
                if bytes.len() % 2 != 0 {
                    return Err(JetError::Corrupt(format!(
                        "odd UTF-16 text length {}",
                        bytes.len()
                    )));
                }
                let units: Vec<u16> = bytes
                    .chunks_exact(2)
                    .map(LittleEndian::read_u16)
                    .collect();
                String::from_utf16(&units)
                    .map_err(|_| JetError::Corrupt("invalid UTF-16 text".to_string()))
            }
        }
    }
}

/// cp1252 code points 0x80-0x9F (the block that differs from Latin-1).
/// NUL marks the five undefined positions.
const CP1252_80_9F: [char; 32] = [
    '\u{20AC}', '\0', '\u{201A}', '\u{0192}', '\u{201E}', '\u{2026}', '\u{2020}', '\u{2021}',
    '\u{02C6}', '\u{2030}', '\u{0160}', '\u{2039}', '\u{0152}', '\0', '\u{017D}', '\0', '\0',
    '\u{2018}', '\u{2019}', '\u{201C}', '\u{201D}', '\u{2022}', '\u{2013}', '\u{2014}',
    '\u{02DC}', '\u{2122}', '\u{0161}', '\u{203A}', '\u{0153}', '\0', '\u{017E}', '\u{0178}',
];

fn encode_cp1252(s: &str) -> Result<Vec<u8>, JetError> {
    let mut out = Vec::with_capacity(s.len());
    'chars: for c in s.chars() {
        let cp = c as u32;
        if cp < 0x80 || (0xA0..=0xFF).contains(&cp) {
            out.push(cp as u8);
            continue;
        }
        for (i, mapped) in CP1252_80_9F.iter().enumerate() {
            if *mapped == c {
                out.push(0x80 + i as u8);
                continue 'chars;
            }
        }
        return Err(JetError::Argument(format!(
            "char U+{:04X} is not representable in cp1252",
            cp
        )));
    }
    Ok(out)
}

fn decode_cp1252(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|&b| match b {
            0x80..=0x9F => {
                let c = CP1252_80_9F[(b - 0x80) as usize];
                if c == '\0' {
                    char::REPLACEMENT_CHARACTER
                } else {
                    c
                }
            }
            _ => b as char,
        })
        .collect()
}
