use capsql_types::indexmap::IndexMap;
use capsql_types::types::Value;

/// String precision grows through these buckets only.
pub const STRING_BUCKETS: [u16; 5] = [250, 500, 1000, 2000, 4000];

/// Terminal string width; a `String(4000)` column never changes again.
pub const STRING_MAX: u16 = 4000;

/// Backend-neutral column type. Dialects map these onto their own type
/// names; the writer only ever moves a column up the widening lattice.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SqlType {
    Bool,
    Int32,
    Int64,
    /// NUMERIC(20,0); wide enough for the full unsigned 64-bit range.
    BigNumeric,
    Float,
    Timestamp,
    Guid,
    String(u16),
}

/// Outcome of reconciling a column's current type with the type a new
/// value needs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Widening {
    /// The current type already accommodates the value.
    Keep,
    /// Widen along the lattice.
    Widen(SqlType),
    /// Incompatible transition; the column degrades to the terminal
    /// string type.
    Degrade(SqlType),
}

/// Reconciles `current` with `needed`. Types only ever widen: precision
/// grows through the buckets, integers grow `Int32 → Int64 → BigNumeric`,
/// and any incompatible transition degrades the column to
/// `String(4000)`, which is a fixed point.
pub fn reconcile(current: SqlType, needed: SqlType) -> Widening {
    use SqlType::*;
    match (current, needed) {
        (a, b) if a == b => Widening::Keep,
        (String(p), String(q)) => {
            if q > p {
                Widening::Widen(String(bucket_for(q)))
            } else {
                Widening::Keep
            }
        }
        // Anything can be rendered into an already-degraded terminal
        // string; smaller strings widen to the terminal width first.
        (String(p), _) => {
            if p >= STRING_MAX {
                Widening::Keep
            } else {
                Widening::Degrade(String(STRING_MAX))
            }
        }
        (Int32, Int64) | (Int32, BigNumeric) | (Int64, BigNumeric) => Widening::Widen(needed),
        (Int64, Int32) | (BigNumeric, Int32) | (BigNumeric, Int64) => Widening::Keep,
        _ => Widening::Degrade(String(STRING_MAX)),
    }
}

/// Smallest bucket that holds `len` characters; values beyond the last
/// bucket truncate to it.
pub fn bucket_for(len: u16) -> u16 {
    for bucket in STRING_BUCKETS {
        if len <= bucket {
            return bucket;
        }
    }
    STRING_MAX
}

/// Maps a row value onto the column type it needs.
pub fn sql_type_for(value: &Value) -> SqlType {
    match value {
        Value::Null => SqlType::String(STRING_BUCKETS[0]),
        Value::Boolean(_) => SqlType::Bool,
        Value::UInt8(_) | Value::UInt16(_) => SqlType::Int32,
        Value::Int8(_) | Value::Int16(_) | Value::Int32(_) => SqlType::Int32,
        Value::UInt32(_) | Value::Int64(_) => SqlType::Int64,
        Value::UInt64(_) => SqlType::BigNumeric,
        Value::Float32(_) | Value::Float64(_) | Value::Duration(_) => SqlType::Float,
        Value::Timestamp(_) => SqlType::Timestamp,
        Value::Guid(_) => SqlType::Guid,
        Value::Text(text) => SqlType::String(bucket_for(clamped_len(text.chars().count()))),
        Value::Bytes(bytes) => SqlType::String(bucket_for(clamped_len(bytes.len() * 2))),
        Value::Ip(_) => SqlType::String(STRING_BUCKETS[0]),
        Value::Array(_) => SqlType::String(bucket_for(clamped_len(value.to_string().len()))),
    }
}

fn clamped_len(len: usize) -> u16 {
    len.min(STRING_MAX as usize) as u16
}

#[derive(Clone, Debug, PartialEq)]
pub struct ColumnDefinition {
    pub name: String,
    pub sql_type: SqlType,
    /// Whether the column exists in the database.
    pub committed: bool,
}

/// Writer-owned view of one discovered table. Lazily materialized on
/// first reference, mutated monotonically afterwards.
#[derive(Clone, Debug, PartialEq)]
pub struct TableDefinition {
    pub name: String,
    pub columns: IndexMap<String, ColumnDefinition>,
    /// Whether the table exists in the database.
    pub committed: bool,
}

impl TableDefinition {
    pub fn new(name: String) -> TableDefinition {
        TableDefinition {
            name,
            columns: IndexMap::new(),
            committed: false,
        }
    }
}
