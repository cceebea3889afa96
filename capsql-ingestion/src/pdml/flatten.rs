use capsql_types::types::{DataRow, Value};

use super::names::{combine_names, filter_name};
use super::tree::TreeNode;

/// Converts a tree node into zero or one relational row.
///
/// Leaves (children without grandchildren) become columns or, when
/// nameless, an ordered `._value` child-row sequence; branches recurse
/// into child rows. A row is only returned when it carries at least one
/// column or child row.
pub fn flatten(node: &TreeNode, name_prefix: &str) -> Option<DataRow> {
    let row_name = if node.attrs.name.is_empty() {
        "_group".to_string()
    } else {
        filter_name(&node.attrs.name)
    };
    let table_name = combine_names(name_prefix, &row_name);
    let mut row = DataRow::new(table_name.clone());

    let mut nameless_leaves = 0u32;
    let mut nameless_branches = 0u32;
    for child in &node.children {
        if child.is_leaf() {
            let value = leaf_value(child);
            if child.attrs.name.is_empty() {
                let mut value_row = DataRow::new(format!("{table_name}._value"));
                value_row.push_column("_index".to_string(), Value::UInt32(nameless_leaves));
                value_row.push_column("_value".to_string(), value);
                row.child_rows.push(value_row);
                nameless_leaves += 1;
            } else {
                let column = filter_name(&child.attrs.name);
                row.push_column(column.clone(), value);
                if let Some(label) = child.typed.as_ref().and_then(|t| t.label.clone()) {
                    row.push_column(format!("{column}_string"), Value::Text(label));
                }
            }
        } else if let Some(mut child_row) = flatten(child, &table_name) {
            if child.attrs.name.is_empty() {
                child_row.push_column("_index".to_string(), Value::UInt32(nameless_branches));
                nameless_branches += 1;
            }
            row.child_rows.push(child_row);
        }
    }

    if let Some(typed) = &node.typed {
        row.push_column("_value".to_string(), typed.value.clone());
        if let Some(label) = &typed.label {
            row.push_column("_string".to_string(), Value::Text(label.clone()));
        }
    }

    if row.is_empty() {
        None
    } else {
        Some(row)
    }
}

fn leaf_value(leaf: &TreeNode) -> Value {
    match &leaf.typed {
        Some(typed) => typed.value.clone(),
        None => Value::Text(leaf.attrs.show.clone()),
    }
}
