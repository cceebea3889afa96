use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use super::Value;

/// One relational row produced by flattening a packet tree node.
///
/// Rows are produced by the transformer and consumed exclusively by the
/// database writer; `child_rows` keep depth-first order so parents are
/// always inserted before their children.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DataRow {
    pub table_name: String,
    pub columns: IndexMap<String, Value>,
    pub child_rows: Vec<DataRow>,
}

impl DataRow {
    pub fn new(table_name: String) -> DataRow {
        DataRow {
            table_name,
            columns: IndexMap::new(),
            child_rows: Vec::new(),
        }
    }

    /// Adds a column value. A repeated column name promotes the existing
    /// value to a multi-value array and appends to it.
    pub fn push_column(&mut self, name: String, value: Value) {
        match self.columns.get_mut(&name) {
            None => {
                self.columns.insert(name, value);
            }
            Some(Value::Array(values)) => values.push(value),
            Some(existing) => {
                let first = std::mem::replace(existing, Value::Null);
                *existing = Value::Array(vec![first, value]);
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty() && self.child_rows.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeated_column_becomes_array() {
        let mut row = DataRow::new("t".into());
        row.push_column("c".into(), Value::UInt8(1));
        row.push_column("c".into(), Value::UInt8(2));
        row.push_column("c".into(), Value::UInt8(3));
        assert_eq!(
            row.columns.get("c"),
            Some(&Value::Array(vec![
                Value::UInt8(1),
                Value::UInt8(2),
                Value::UInt8(3)
            ]))
        );
    }

    #[test]
    fn distinct_columns_stay_scalar() {
        let mut row = DataRow::new("t".into());
        row.push_column("a".into(), Value::UInt8(1));
        row.push_column("b".into(), Value::UInt8(2));
        assert_eq!(row.columns.get("a"), Some(&Value::UInt8(1)));
        assert_eq!(row.columns.get("b"), Some(&Value::UInt8(2)));
    }
}
