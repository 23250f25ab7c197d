//! Column data types and values.
//!
//! [`DataType`] maps the one-byte Jet column type tags to their storage
//! classes (fixed width, variable, long value). [`Value`] is the typed
//! in-memory form of a single column value, including the fixed-point
//! [`JetNumeric`] and 16-byte GUIDs.
//!
//! Jet stores date-times as an 8-byte double counting days since
//! 1899-12-30; [`datetime_to_days`] and [`days_to_datetime`] convert.

use chrono::{Duration, NaiveDate, NaiveDateTime};
use serde::Serialize;

use crate::JetError;

/// Column data types with their on-disk type tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum DataType {
    /// 1-bit boolean, stored in the row's null mask (tag 0x01).
    Boolean,
    /// Unsigned byte (tag 0x02).
    Byte,
    /// 16-bit signed integer (tag 0x03).
    Int,
    /// 32-bit signed integer (tag 0x04).
    Long,
    /// Currency: 64-bit integer scaled by 10^4 (tag 0x05).
    Money,
    /// 32-bit IEEE float (tag 0x06).
    Float,
    /// 64-bit IEEE float (tag 0x07).
    Double,
    /// Date-time as days since 1899-12-30 (tag 0x08).
    ShortDateTime,
    /// Variable-length bytes, inline (tag 0x09).
    Binary,
    /// Variable-length text (tag 0x0A).
    Text,
    /// OLE object: long value bytes (tag 0x0B).
    Ole,
    /// Memo: long value text (tag 0x0C).
    Memo,
    /// 16-byte GUID (tag 0x0F).
    Guid,
    /// Fixed-point decimal, 17 bytes (tag 0x10).
    Numeric,
    /// Complex column reference: 32-bit record id (tag 0x12).
    Complex,
}

impl DataType {
    /// Resolve an on-disk type tag.
    pub fn from_u8(tag: u8) -> Result<Self, JetError> {
        Ok(match tag {
            0x01 => DataType::Boolean,
            0x02 => DataType::Byte,
            0x03 => DataType::Int,
            0x04 => DataType::Long,
            0x05 => DataType::Money,
            0x06 => DataType::Float,
            0x07 => DataType::Double,
            0x08 => DataType::ShortDateTime,
            0x09 => DataType::Binary,
            0x0A => DataType::Text,
            0x0B => DataType::Ole,
            0x0C => DataType::Memo,
            0x0F => DataType::Guid,
            0x10 => DataType::Numeric,
            0x12 => DataType::Complex,
            other => {
                return Err(JetError::Corrupt(format!(
                    "unknown column type tag 0x{:02X}",
                    other
                )))
            }
        })
    }

    /// The on-disk type tag.
    pub fn to_u8(self) -> u8 {
        match self {
            DataType::Boolean => 0x01,
            DataType::Byte => 0x02,
            DataType::Int => 0x03,
            DataType::Long => 0x04,
            DataType::Money => 0x05,
            DataType::Float => 0x06,
            DataType::Double => 0x07,
            DataType::ShortDateTime => 0x08,
            DataType::Binary => 0x09,
            DataType::Text => 0x0A,
            DataType::Ole => 0x0B,
            DataType::Memo => 0x0C,
            DataType::Guid => 0x0F,
            DataType::Numeric => 0x10,
            DataType::Complex => 0x12,
        }
    }

    /// Storage width in the fixed area, if this type is fixed-width.
    ///
    /// Booleans return 0: they live entirely in the null mask. Text is
    /// variable by default but may be declared fixed with an explicit
    /// length; that case is handled by the column descriptor.
    pub fn fixed_size(self) -> Option<usize> {
        match self {
            DataType::Boolean => Some(0),
            DataType::Byte => Some(1),
            DataType::Int => Some(2),
            DataType::Long | DataType::Complex => Some(4),
            DataType::Money => Some(8),
            DataType::Float => Some(4),
            DataType::Double => Some(8),
            DataType::ShortDateTime => Some(8),
            DataType::Guid => Some(16),
            DataType::Numeric => Some(17),
            DataType::Binary | DataType::Text | DataType::Ole | DataType::Memo => None,
        }
    }

    /// True for types stored behind a long value pointer.
    pub fn is_long_value(self) -> bool {
        matches!(self, DataType::Ole | DataType::Memo)
    }

    /// True for the textual types.
    pub fn is_textual(self) -> bool {
        matches!(self, DataType::Text | DataType::Memo)
    }

    /// True for types an auto-number counter may feed.
    pub fn is_numeric(self) -> bool {
        matches!(
            self,
            DataType::Byte
                | DataType::Int
                | DataType::Long
                | DataType::Money
                | DataType::Float
                | DataType::Double
                | DataType::Numeric
                | DataType::Complex
        )
    }
}

/// Fixed-point decimal value: sign, unscaled 128-bit mantissa, scale.
///
/// The numeric value is `mantissa / 10^scale`, negated when `negative`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JetNumeric {
    /// True when the value is below zero.
    pub negative: bool,
    /// Unscaled magnitude.
    pub mantissa: u128,
    /// Decimal digits to the right of the point.
    pub scale: u8,
}

impl std::fmt::Display for JetNumeric {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let sign = if self.negative { "-" } else { "" };
        if self.scale == 0 {
            return write!(f, "{}{}", sign, self.mantissa);
        }
        let div = 10u128.pow(self.scale as u32);
        write!(
            f,
            "{}{}.{:0width$}",
            sign,
            self.mantissa / div,
            self.mantissa % div,
            width = self.scale as usize
        )
    }
}

/// A single typed column value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// SQL NULL (also boolean false in the row mask).
    Null,
    /// Boolean.
    Bool(bool),
    /// Unsigned byte.
    Byte(u8),
    /// 16-bit integer.
    Int(i16),
    /// 32-bit integer.
    Long(i32),
    /// Currency, scaled by 10^4.
    Money(i64),
    /// Single float.
    Float(f32),
    /// Double float.
    Double(f64),
    /// Date-time.
    DateTime(NaiveDateTime),
    /// Raw bytes.
    Binary(Vec<u8>),
    /// Text.
    Text(String),
    /// Fixed-point decimal.
    Numeric(JetNumeric),
    /// GUID bytes.
    Guid([u8; 16]),
    /// Complex column record id.
    Complex(i32),
}

impl Value {
    /// True for [`Value::Null`].
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// The text contents, if this is a text value.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    /// The value as an i32, for the integer family.
    pub fn as_i32(&self) -> Option<i32> {
        match self {
            Value::Byte(v) => Some(*v as i32),
            Value::Int(v) => Some(*v as i32),
            Value::Long(v) => Some(*v),
            Value::Complex(v) => Some(*v),
            _ => None,
        }
    }
}

/// The day-zero epoch of Jet date storage.
fn date_base() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(1899, 12, 30)
        .unwrap()
        .and_hms_opt(0, 0, 0)
        .unwrap()
}

/// Convert a date-time to the stored day count.
pub fn datetime_to_days(dt: NaiveDateTime) -> f64 {
    let delta = dt - date_base();
    delta.num_milliseconds() as f64 / 86_400_000.0
}

/// Convert a stored day count back to a date-time.
///
/// Sub-millisecond precision is not representable in the double and is
/// rounded to the nearest millisecond.
pub fn days_to_datetime(days: f64) -> NaiveDateTime {
    let millis = (days * 86_400_000.0).round() as i64;
    date_base() + Duration::milliseconds(millis)
}
