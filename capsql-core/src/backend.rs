use capsql_types::chrono::{DateTime, Utc};
use capsql_types::errors::internal::BoxedError;

use crate::table::{ColumnDefinition, TableDefinition};

/// A value ready for parameter binding, already converted to the column's
/// SQL type by the writer.
#[derive(Clone, Debug, PartialEq)]
pub enum SqlParam {
    Null,
    Bool(bool),
    Int32(i32),
    Int64(i64),
    /// Decimal digits for a NUMERIC(20,0) column.
    Numeric(String),
    Float(f64),
    Timestamp(DateTime<Utc>),
    Text(String),
}

/// Narrow dialect seam of the database writer. One implementation per
/// backend; the connection is exclusive to the writer thread, so the
/// trait is object-safe and synchronous.
pub trait SqlBackend: Send {
    /// Loads an existing table's definition from the database catalog, or
    /// `None` when the table does not exist.
    fn introspect_table(&mut self, name: &str) -> Result<Option<TableDefinition>, BoxedError>;

    /// Creates the table with a `_id` auto-increment primary key plus the
    /// given columns.
    fn create_table(&mut self, table: &TableDefinition) -> Result<(), BoxedError>;

    fn add_column(&mut self, table: &str, column: &ColumnDefinition) -> Result<(), BoxedError>;

    fn alter_column(&mut self, table: &str, column: &ColumnDefinition) -> Result<(), BoxedError>;

    fn add_foreign_key(
        &mut self,
        table: &str,
        column: &str,
        referenced_table: &str,
        constraint_name: &str,
    ) -> Result<(), BoxedError>;

    /// Inserts one row and returns the generated `_id`.
    fn insert_returning_id(
        &mut self,
        table: &str,
        columns: &[String],
        params: &[SqlParam],
    ) -> Result<u64, BoxedError>;

    fn close(&mut self) -> Result<(), BoxedError>;
}
