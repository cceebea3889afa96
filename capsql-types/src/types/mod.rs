mod field_type;
mod row;
mod value;

pub use field_type::{DisplayBase, FieldType};
pub use row::DataRow;
pub use value::Value;
