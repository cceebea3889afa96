use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use capsql_types::chrono::{Local, LocalResult, NaiveDateTime, TimeZone, Timelike, Utc};
use capsql_types::errors::types::TypeError;
use capsql_types::hex;
use capsql_types::log::debug;
use capsql_types::types::{DisplayBase, FieldType, Value};
use capsql_types::uuid::Uuid;

use crate::registry::{Field, SchemaRegistry, ValueString};

/// Result of typing one leaf: the converted value plus the value-string
/// label, when one matched.
#[derive(Clone, Debug, PartialEq)]
pub struct TypedOutcome {
    pub value: Value,
    pub label: Option<String>,
}

/// Converts the raw `show`/`value` attribute pair of a node into a typed
/// value, consulting the schema registry for the field's semantic type and
/// value strings.
///
/// Conversion failures never escape: the node degrades to text and the
/// packet keeps flowing.
pub fn type_value(
    registry: &SchemaRegistry,
    name: &str,
    show: &str,
    raw_value: Option<&str>,
) -> TypedOutcome {
    let Some(field) = registry.field(name) else {
        return TypedOutcome {
            value: Value::Text(show.to_string()),
            label: None,
        };
    };

    match convert(field, show, raw_value) {
        Ok(value) => {
            let label = lookup_label(field, &value);
            TypedOutcome { value, label }
        }
        Err(e) => {
            debug!("Degrading {name} to text: {e}");
            TypedOutcome {
                value: degraded(name, show, raw_value),
                label: None,
            }
        }
    }
}

fn convert(field: &Field, show: &str, raw_value: Option<&str>) -> Result<Value, TypeError> {
    let value = match field.typ {
        FieldType::Boolean => match show {
            "1" => Value::Boolean(true),
            "0" => Value::Boolean(false),
            _ => Value::Text(show.to_string()),
        },
        FieldType::UInt8 | FieldType::UInt16 | FieldType::UInt32 | FieldType::UInt64 => {
            match field.display_base {
                DisplayBase::Hex => Value::smallest_unsigned(parse_hex_little_endian(show)?),
                DisplayBase::None => Value::Text(show.to_string()),
                _ => Value::smallest_unsigned(
                    show.trim()
                        .parse::<u64>()
                        .map_err(|_| TypeError::InvalidInteger(show.to_string()))?,
                ),
            }
        }
        FieldType::Int8 | FieldType::Int16 | FieldType::Int32 | FieldType::Int64 => {
            match field.display_base {
                DisplayBase::Hex => {
                    Value::smallest_signed(parse_hex_little_endian(show)? as i64)
                }
                DisplayBase::None => Value::Text(show.to_string()),
                _ => Value::smallest_signed(
                    show.trim()
                        .parse::<i64>()
                        .map_err(|_| TypeError::InvalidInteger(show.to_string()))?,
                ),
            }
        }
        FieldType::Float32 => Value::Float32(
            show.trim()
                .parse::<f32>()
                .map_err(|_| TypeError::InvalidFloat(show.to_string()))?,
        ),
        FieldType::Float64 => Value::Float64(
            show.trim()
                .parse::<f64>()
                .map_err(|_| TypeError::InvalidFloat(show.to_string()))?,
        ),
        FieldType::Timestamp => Value::Timestamp(parse_local_timestamp(show)?),
        FieldType::Duration => Value::Duration(
            show.trim()
                .parse::<f64>()
                .map_err(|_| TypeError::InvalidDuration(show.to_string()))?,
        ),
        FieldType::Text | FieldType::Opaque => Value::Text(show.to_string()),
        FieldType::Bytes => match raw_value {
            Some(raw) => Value::Bytes(
                hex::decode(raw).map_err(|_| TypeError::InvalidHex(raw.to_string()))?,
            ),
            None => Value::Bytes(Vec::new()),
        },
        FieldType::IpAddr => parse_ip(show, raw_value)?,
        FieldType::Guid => Value::Guid(
            Uuid::parse_str(show.trim()).map_err(|_| TypeError::InvalidGuid(show.to_string()))?,
        ),
    };
    Ok(value)
}

/// Decodes a hex-rendered integer: the digit string becomes a byte
/// sequence, padded to 8 bytes and read as little-endian.
fn parse_hex_little_endian(show: &str) -> Result<u64, TypeError> {
    let digits = show.trim();
    let digits = digits
        .strip_prefix("0x")
        .or_else(|| digits.strip_prefix("0X"))
        .or_else(|| digits.strip_prefix("&h"))
        .or_else(|| digits.strip_prefix("&H"))
        .unwrap_or(digits);
    let padded;
    let digits = if digits.len() % 2 == 1 {
        padded = format!("0{digits}");
        &padded
    } else {
        digits
    };
    let mut bytes =
        hex::decode(digits).map_err(|_| TypeError::InvalidHex(show.to_string()))?;
    bytes.resize(8, 0);
    let mut le = [0u8; 8];
    le.copy_from_slice(&bytes[..8]);
    Ok(u64::from_le_bytes(le))
}

/// Parses the dissector's `"MMM d, yyyy HH:mm:ss.fffffff"` rendering.
/// The value carries no zone and is assumed local; fractional digits
/// beyond seven are truncated.
fn parse_local_timestamp(
    show: &str,
) -> Result<capsql_types::chrono::DateTime<Utc>, TypeError> {
    let naive = NaiveDateTime::parse_from_str(show.trim(), "%b %e, %Y %H:%M:%S%.f")
        .map_err(|_| TypeError::InvalidTimestamp(show.to_string()))?;
    let naive = naive
        .with_nanosecond(naive.nanosecond() / 100 * 100)
        .ok_or_else(|| TypeError::InvalidTimestamp(show.to_string()))?;
    let utc = match Local.from_local_datetime(&naive) {
        LocalResult::Single(local) => local.with_timezone(&Utc),
        LocalResult::Ambiguous(earliest, _) => earliest.with_timezone(&Utc),
        LocalResult::None => Utc.from_utc_datetime(&naive),
    };
    Ok(utc)
}

fn parse_ip(show: &str, raw_value: Option<&str>) -> Result<Value, TypeError> {
    if let Ok(addr) = show.trim().parse::<IpAddr>() {
        return Ok(Value::Ip(addr));
    }
    let raw = raw_value.ok_or_else(|| TypeError::InvalidIpAddress(show.to_string()))?;
    let bytes = hex::decode(raw).map_err(|_| TypeError::InvalidIpAddress(raw.to_string()))?;
    match bytes.len() {
        4 => {
            let mut octets = [0u8; 4];
            octets.copy_from_slice(&bytes);
            Ok(Value::Ip(IpAddr::V4(Ipv4Addr::from(octets))))
        }
        16 => {
            let mut octets = [0u8; 16];
            octets.copy_from_slice(&bytes);
            Ok(Value::Ip(IpAddr::V6(Ipv6Addr::from(octets))))
        }
        _ => Err(TypeError::InvalidIpAddress(raw.to_string())),
    }
}

/// Degraded text value after a conversion failure: the raw `value` when
/// `show` is a case-insensitive suffix of the node name, else `show`.
fn degraded(name: &str, show: &str, raw_value: Option<&str>) -> Value {
    let show_is_name_suffix =
        !show.is_empty() && name.to_lowercase().ends_with(&show.to_lowercase());
    if show_is_name_suffix {
        Value::Text(raw_value.unwrap_or_default().to_string())
    } else {
        Value::Text(show.to_string())
    }
}

fn lookup_label(field: &Field, value: &Value) -> Option<String> {
    if let Value::Boolean(b) = value {
        return field.value_strings().iter().find_map(|vs| match vs {
            ValueString::Boolean {
                true_label,
                false_label,
            } => Some(if *b {
                true_label.clone()
            } else {
                false_label.clone()
            }),
            _ => None,
        });
    }

    let numeric = value.as_i64()?;
    let singles = field.value_strings().iter().find_map(|vs| match vs {
        ValueString::Single { value, label } if *value == numeric => Some(label.clone()),
        _ => None,
    });
    singles.or_else(|| {
        field.value_strings().iter().find_map(|vs| match vs {
            ValueString::Range { lo, hi, label } if (*lo..=*hi).contains(&numeric) => {
                Some(label.clone())
            }
            _ => None,
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use capsql_types::types::FieldType;

    fn registry_with(typ: FieldType, base: DisplayBase) -> SchemaRegistry {
        let mut registry = SchemaRegistry::new();
        registry.register_protocol("X", "x", "x").unwrap();
        registry
            .register_field("Field", "x.f", typ, "x", "", base, "0x0")
            .unwrap();
        registry
    }

    #[test]
    fn unknown_field_is_text() {
        let registry = SchemaRegistry::new();
        let outcome = type_value(&registry, "nope", "hello", None);
        assert_eq!(outcome.value, Value::Text("hello".to_string()));
        assert_eq!(outcome.label, None);
    }

    #[test]
    fn boolean_value_string_selection() {
        let mut registry = registry_with(FieldType::Boolean, DisplayBase::Decimal);
        registry
            .register_value_string(
                "x.f",
                ValueString::Boolean {
                    true_label: "set".to_string(),
                    false_label: "clear".to_string(),
                },
            )
            .unwrap();

        let outcome = type_value(&registry, "x.f", "1", None);
        assert_eq!(outcome.value, Value::Boolean(true));
        assert_eq!(outcome.label.as_deref(), Some("set"));

        let outcome = type_value(&registry, "x.f", "0", None);
        assert_eq!(outcome.value, Value::Boolean(false));
        assert_eq!(outcome.label.as_deref(), Some("clear"));

        let outcome = type_value(&registry, "x.f", "?", None);
        assert_eq!(outcome.value, Value::Text("?".to_string()));
        assert_eq!(outcome.label, None);
    }

    #[test]
    fn range_and_single_value_strings() {
        let mut registry = registry_with(FieldType::UInt8, DisplayBase::Decimal);
        registry
            .register_value_string(
                "x.f",
                ValueString::Range {
                    lo: 10,
                    hi: 20,
                    label: "mid".to_string(),
                },
            )
            .unwrap();
        registry
            .register_value_string(
                "x.f",
                ValueString::Single {
                    value: 5,
                    label: "low".to_string(),
                },
            )
            .unwrap();

        let outcome = type_value(&registry, "x.f", "12", None);
        assert_eq!(outcome.value, Value::UInt8(12));
        assert_eq!(outcome.label.as_deref(), Some("mid"));

        let outcome = type_value(&registry, "x.f", "5", None);
        assert_eq!(outcome.label.as_deref(), Some("low"));

        let outcome = type_value(&registry, "x.f", "99", None);
        assert_eq!(outcome.label, None);
    }

    #[test]
    fn hex_display_base_reads_little_endian() {
        let registry = registry_with(FieldType::UInt32, DisplayBase::Hex);
        let outcome = type_value(&registry, "x.f", "0x1f", None);
        assert_eq!(outcome.value, Value::UInt8(31));

        // Two bytes decode positionally, not numerically.
        let outcome = type_value(&registry, "x.f", "001f", None);
        assert_eq!(outcome.value, Value::UInt16(0x1f00));
    }

    #[test]
    fn base_none_degrades_to_text() {
        let registry = registry_with(FieldType::UInt32, DisplayBase::None);
        let outcome = type_value(&registry, "x.f", "whatever", None);
        assert_eq!(outcome.value, Value::Text("whatever".to_string()));
    }

    #[test]
    fn smallest_variant_wins_regardless_of_declared_width() {
        let registry = registry_with(FieldType::UInt64, DisplayBase::Decimal);
        let outcome = type_value(&registry, "x.f", "7", None);
        assert_eq!(outcome.value, Value::UInt8(7));
    }

    #[test]
    fn signed_decimal_parse() {
        let registry = registry_with(FieldType::Int32, DisplayBase::Decimal);
        let outcome = type_value(&registry, "x.f", "-300", None);
        assert_eq!(outcome.value, Value::Int16(-300));
    }

    #[test]
    fn timestamp_truncates_to_hundred_nanoseconds() {
        let registry = registry_with(FieldType::Timestamp, DisplayBase::None);
        let outcome = type_value(&registry, "x.f", "Mar  1, 2011 15:45:26.123456789", None);
        let Value::Timestamp(ts) = outcome.value else {
            panic!("expected timestamp, got {:?}", outcome.value);
        };
        assert_eq!(ts.nanosecond(), 123_456_700);
    }

    #[test]
    fn bad_timestamp_degrades() {
        let registry = registry_with(FieldType::Timestamp, DisplayBase::None);
        let outcome = type_value(&registry, "x.f", "not a time", None);
        assert_eq!(outcome.value, Value::Text("not a time".to_string()));
    }

    #[test]
    fn duration_is_seconds() {
        let registry = registry_with(FieldType::Duration, DisplayBase::None);
        let outcome = type_value(&registry, "x.f", "0.004219", None);
        assert_eq!(outcome.value, Value::Duration(0.004219));
    }

    #[test]
    fn bytes_decode_from_value_attribute() {
        let registry = registry_with(FieldType::Bytes, DisplayBase::None);
        let outcome = type_value(&registry, "x.f", "de:ad", Some("dead"));
        assert_eq!(outcome.value, Value::Bytes(vec![0xde, 0xad]));

        let outcome = type_value(&registry, "x.f", "", None);
        assert_eq!(outcome.value, Value::Bytes(Vec::new()));
    }

    #[test]
    fn ip_textual_then_hex_fallback() {
        let registry = registry_with(FieldType::IpAddr, DisplayBase::None);
        let outcome = type_value(&registry, "x.f", "10.0.0.1", None);
        assert_eq!(outcome.value, Value::Ip("10.0.0.1".parse().unwrap()));

        let outcome = type_value(&registry, "x.f", "garbage", Some("c0a80001"));
        assert_eq!(outcome.value, Value::Ip("192.168.0.1".parse().unwrap()));
    }

    #[test]
    fn degrade_uses_value_when_show_suffixes_name() {
        let registry = registry_with(FieldType::Guid, DisplayBase::None);
        // show "f" is a suffix of the name "x.f", so the raw value wins.
        let outcome = type_value(&registry, "x.f", "F", Some("rawbytes"));
        assert_eq!(outcome.value, Value::Text("rawbytes".to_string()));

        let outcome = type_value(&registry, "x.f", "not-a-guid", Some("rawbytes"));
        assert_eq!(outcome.value, Value::Text("not-a-guid".to_string()));
    }
}
