use std::fmt;
use std::net::IpAddr;

use chrono::{DateTime, Timelike, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Typed value carried on a tree leaf and bound into a database column.
///
/// `Array` holds a single level of scalars only; it is produced when the
/// same column name repeats within one row.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Null,
    Boolean(bool),
    UInt8(u8),
    UInt16(u16),
    UInt32(u32),
    UInt64(u64),
    Int8(i8),
    Int16(i16),
    Int32(i32),
    Int64(i64),
    Float32(f32),
    Float64(f64),
    Timestamp(DateTime<Utc>),
    /// Relative duration in seconds.
    Duration(f64),
    Text(String),
    Bytes(Vec<u8>),
    Ip(IpAddr),
    Guid(Uuid),
    Array(Vec<Value>),
}

impl Value {
    /// Stores `value` in the smallest unsigned variant that fits.
    pub fn smallest_unsigned(value: u64) -> Value {
        if let Ok(v) = u8::try_from(value) {
            Value::UInt8(v)
        } else if let Ok(v) = u16::try_from(value) {
            Value::UInt16(v)
        } else if let Ok(v) = u32::try_from(value) {
            Value::UInt32(v)
        } else {
            Value::UInt64(value)
        }
    }

    /// Stores `value` in the smallest signed variant that fits.
    pub fn smallest_signed(value: i64) -> Value {
        if let Ok(v) = i8::try_from(value) {
            Value::Int8(v)
        } else if let Ok(v) = i16::try_from(value) {
            Value::Int16(v)
        } else if let Ok(v) = i32::try_from(value) {
            Value::Int32(v)
        } else {
            Value::Int64(value)
        }
    }

    /// Integer view used for value-string lookups. `UInt64` values above
    /// `i64::MAX` do not participate.
    pub fn as_i64(&self) -> Option<i64> {
        match *self {
            Value::Boolean(v) => Some(v as i64),
            Value::UInt8(v) => Some(v as i64),
            Value::UInt16(v) => Some(v as i64),
            Value::UInt32(v) => Some(v as i64),
            Value::UInt64(v) => i64::try_from(v).ok(),
            Value::Int8(v) => Some(v as i64),
            Value::Int16(v) => Some(v as i64),
            Value::Int32(v) => Some(v as i64),
            Value::Int64(v) => Some(v),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn is_bytes(&self) -> bool {
        matches!(self, Value::Bytes(_))
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Boolean(_) => "boolean",
            Value::UInt8(_) => "uint8",
            Value::UInt16(_) => "uint16",
            Value::UInt32(_) => "uint32",
            Value::UInt64(_) => "uint64",
            Value::Int8(_) => "int8",
            Value::Int16(_) => "int16",
            Value::Int32(_) => "int32",
            Value::Int64(_) => "int64",
            Value::Float32(_) => "float32",
            Value::Float64(_) => "float64",
            Value::Timestamp(_) => "timestamp",
            Value::Duration(_) => "duration",
            Value::Text(_) => "text",
            Value::Bytes(_) => "bytes",
            Value::Ip(_) => "ip",
            Value::Guid(_) => "guid",
            Value::Array(_) => "array",
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => Ok(()),
            Value::Boolean(v) => write!(f, "{}", *v as u8),
            Value::UInt8(v) => write!(f, "{v}"),
            Value::UInt16(v) => write!(f, "{v}"),
            Value::UInt32(v) => write!(f, "{v}"),
            Value::UInt64(v) => write!(f, "{v}"),
            Value::Int8(v) => write!(f, "{v}"),
            Value::Int16(v) => write!(f, "{v}"),
            Value::Int32(v) => write!(f, "{v}"),
            Value::Int64(v) => write!(f, "{v}"),
            Value::Float32(v) => write!(f, "{v}"),
            Value::Float64(v) => write!(f, "{v}"),
            // Seven fractional digits (100 ns resolution).
            Value::Timestamp(v) => write!(
                f,
                "{}.{:07}",
                v.format("%Y-%m-%d %H:%M:%S"),
                v.nanosecond() / 100
            ),
            Value::Duration(v) => write!(f, "{v}"),
            Value::Text(v) => write!(f, "{v}"),
            Value::Bytes(v) => write!(f, "{}", hex::encode(v)),
            Value::Ip(v) => write!(f, "{v}"),
            Value::Guid(v) => write!(f, "{v}"),
            Value::Array(values) => {
                write!(f, "{{ ")?;
                for (i, value) in values.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{value}")?;
                }
                write!(f, " }}")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn smallest_fit_unsigned() {
        assert_eq!(Value::smallest_unsigned(0), Value::UInt8(0));
        assert_eq!(Value::smallest_unsigned(255), Value::UInt8(255));
        assert_eq!(Value::smallest_unsigned(256), Value::UInt16(256));
        assert_eq!(Value::smallest_unsigned(65_536), Value::UInt32(65_536));
        assert_eq!(
            Value::smallest_unsigned(4_294_967_296),
            Value::UInt64(4_294_967_296)
        );
    }

    #[test]
    fn smallest_fit_signed() {
        assert_eq!(Value::smallest_signed(-1), Value::Int8(-1));
        assert_eq!(Value::smallest_signed(127), Value::Int8(127));
        assert_eq!(Value::smallest_signed(128), Value::Int16(128));
        assert_eq!(Value::smallest_signed(-40_000), Value::Int32(-40_000));
        assert_eq!(
            Value::smallest_signed(-5_000_000_000),
            Value::Int64(-5_000_000_000)
        );
    }

    #[test]
    fn array_renders_braced() {
        let value = Value::Array(vec![Value::UInt8(1), Value::Text("b".into())]);
        assert_eq!(value.to_string(), "{ 1, b }");
    }

    #[test]
    fn bytes_render_lowercase_hex() {
        assert_eq!(Value::Bytes(vec![0xde, 0xad, 0x0f]).to_string(), "dead0f");
    }

    #[test]
    fn timestamps_render_seven_fraction_digits() {
        use chrono::TimeZone;
        let ts = Utc.with_ymd_and_hms(2011, 3, 1, 15, 45, 26).unwrap()
            + chrono::Duration::nanoseconds(123_456_700);
        assert_eq!(
            Value::Timestamp(ts).to_string(),
            "2011-03-01 15:45:26.1234567"
        );
    }
}
