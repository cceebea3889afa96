use std::io::BufRead;

use capsql_types::log::warn;
use capsql_types::types::{DisplayBase, FieldType};

use crate::errors::SchemaError;
use crate::registry::{SchemaRegistry, ValueString};

/// The four tab-separated catalog streams emitted by the dissector.
pub struct CatalogStreams<P, F, V, D> {
    pub protocols: P,
    pub fields: F,
    pub values: V,
    pub decodes: D,
}

/// Loads all four catalogs into a fresh registry. Per-line failures are
/// logged and skipped; the returned registry may be partial but is always
/// usable.
pub fn load_all<P: BufRead, F: BufRead, V: BufRead, D: BufRead>(
    streams: CatalogStreams<P, F, V, D>,
) -> Result<SchemaRegistry, SchemaError> {
    let mut registry = SchemaRegistry::new();
    load_protocols(&mut registry, streams.protocols)?;
    load_fields(&mut registry, streams.fields)?;
    load_values(&mut registry, streams.values)?;
    load_decodes(streams.decodes)?;
    Ok(registry)
}

/// Splits on `\t` into at most `limit` parts, so the last part may itself
/// contain tabs.
pub fn split_limited(line: &str, limit: usize) -> Vec<&str> {
    line.splitn(limit, '\t').collect()
}

/// Parses an integer token in decimal, `0x…`, or `&h…` notation.
pub fn parse_int_token(token: &str) -> Result<i64, SchemaError> {
    let token = token.trim();
    let parsed = if let Some(hex) = token
        .strip_prefix("0x")
        .or_else(|| token.strip_prefix("0X"))
        .or_else(|| token.strip_prefix("&h"))
        .or_else(|| token.strip_prefix("&H"))
    {
        i64::from_str_radix(hex, 16)
    } else {
        token.parse::<i64>()
    };
    parsed.map_err(|_| SchemaError::InvalidIntegerToken(token.to_string()))
}

/// Protocol catalog: `longName \t shortName \t filterName`.
pub fn load_protocols<R: BufRead>(
    registry: &mut SchemaRegistry,
    reader: R,
) -> Result<(), SchemaError> {
    for (number, line) in reader.lines().enumerate() {
        let line = line?;
        if line.is_empty() {
            continue;
        }
        if let Err(e) = load_protocol_line(registry, &line) {
            warn!("Skipping protocol catalog line {}: {e}", number + 1);
        }
    }
    Ok(())
}

fn load_protocol_line(registry: &mut SchemaRegistry, line: &str) -> Result<(), SchemaError> {
    let columns = split_limited(line, 3);
    if columns.len() < 3 {
        return Err(SchemaError::ColumnCount {
            expected: 3,
            got: columns.len(),
        });
    }
    registry.register_protocol(columns[0], columns[1], columns[2])
}

/// Field catalog. `F` records carry the full field descriptor; `P` records
/// declare a protocol, auto-registered with a lowercased filter name.
pub fn load_fields<R: BufRead>(
    registry: &mut SchemaRegistry,
    reader: R,
) -> Result<(), SchemaError> {
    for (number, line) in reader.lines().enumerate() {
        let line = line?;
        if line.is_empty() {
            continue;
        }
        if let Err(e) = load_field_line(registry, &line) {
            warn!("Skipping field catalog line {}: {e}", number + 1);
        }
    }
    Ok(())
}

fn load_field_line(registry: &mut SchemaRegistry, line: &str) -> Result<(), SchemaError> {
    match line.split('\t').next() {
        Some("F") => {
            let columns = split_limited(line, 8);
            if columns.len() < 8 {
                return Err(SchemaError::ColumnCount {
                    expected: 8,
                    got: columns.len(),
                });
            }
            let typ = FieldType::from_type_token(columns[3])?;
            registry.register_field(
                columns[1],
                columns[2],
                typ,
                columns[4],
                columns[5],
                DisplayBase::from_token(columns[6]),
                columns[7],
            )
        }
        Some("P") => {
            let columns = split_limited(line, 3);
            if columns.len() < 3 {
                return Err(SchemaError::ColumnCount {
                    expected: 3,
                    got: columns.len(),
                });
            }
            let filter_name = columns[2].to_lowercase();
            registry.register_protocol(columns[1], columns[2], &filter_name)
        }
        Some(tag) => Err(SchemaError::UnknownRecordTag(tag.to_string())),
        None => Err(SchemaError::ColumnCount { expected: 3, got: 0 }),
    }
}

/// Value-string catalog. `V` single values, `R` inclusive ranges, `T`
/// boolean labels. Integers accept decimal and hexadecimal notation.
pub fn load_values<R: BufRead>(
    registry: &mut SchemaRegistry,
    reader: R,
) -> Result<(), SchemaError> {
    for (number, line) in reader.lines().enumerate() {
        let line = line?;
        if line.is_empty() {
            continue;
        }
        if let Err(e) = load_value_line(registry, &line) {
            warn!("Skipping value catalog line {}: {e}", number + 1);
        }
    }
    Ok(())
}

fn load_value_line(registry: &mut SchemaRegistry, line: &str) -> Result<(), SchemaError> {
    match line.split('\t').next() {
        Some("V") => {
            let columns = split_limited(line, 4);
            if columns.len() < 4 {
                return Err(SchemaError::ColumnCount {
                    expected: 4,
                    got: columns.len(),
                });
            }
            registry.register_value_string(
                columns[1],
                ValueString::Single {
                    value: parse_int_token(columns[2])?,
                    label: columns[3].to_string(),
                },
            )
        }
        Some("R") => {
            let columns = split_limited(line, 5);
            if columns.len() < 5 {
                return Err(SchemaError::ColumnCount {
                    expected: 5,
                    got: columns.len(),
                });
            }
            registry.register_value_string(
                columns[1],
                ValueString::Range {
                    lo: parse_int_token(columns[2])?,
                    hi: parse_int_token(columns[3])?,
                    label: columns[4].to_string(),
                },
            )
        }
        Some("T") => {
            let columns = split_limited(line, 4);
            if columns.len() < 4 {
                return Err(SchemaError::ColumnCount {
                    expected: 4,
                    got: columns.len(),
                });
            }
            registry.register_value_string(
                columns[1],
                ValueString::Boolean {
                    true_label: columns[2].to_string(),
                    false_label: columns[3].to_string(),
                },
            )
        }
        Some(tag) => Err(SchemaError::UnknownRecordTag(tag.to_string())),
        None => Err(SchemaError::ColumnCount { expected: 4, got: 0 }),
    }
}

/// The decode catalog is accepted but carries no semantics here; the
/// stream is drained so the dissector never blocks on a full pipe.
pub fn load_decodes<R: BufRead>(reader: R) -> Result<(), SchemaError> {
    for line in reader.lines() {
        line?;
    }
    Ok(())
}
