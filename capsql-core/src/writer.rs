use std::collections::{HashMap, HashSet};
use std::thread::JoinHandle;

use capsql_types::errors::internal::BoxedError;
use capsql_types::log::{debug, error, info, warn};
use capsql_types::types::{DataRow, Value};

use crate::backend::{SqlBackend, SqlParam};
use crate::errors::WriterError;
use crate::escape::escape_identifier;
use crate::filter::TableColumnFilter;
use crate::queue::{row_queue, QueueReceiver, QueueSender};
use crate::table::{
    reconcile, sql_type_for, ColumnDefinition, SqlType, TableDefinition, Widening, STRING_MAX,
};

/// Consecutive row failures after which the writer goes fatal.
const FAILURE_LIMIT: u32 = 3;

const GENINFO_TABLE: &str = "geninfo";
const SOURCEFILE_TABLE: &str = "sourcefile";
const FILE_COLUMN: &str = "file";
const NUMBER_COLUMN: &str = "num";
const TIMESTAMP_COLUMN: &str = "timestamp";
const PATH_COLUMN: &str = "path";
const SOURCEFILE_ID_COLUMN: &str = "_sourcefileid";
const ROW_NUMBER_COLUMN: &str = "_number";
const ROW_TIMESTAMP_COLUMN: &str = "_timestamp";
const PARENT_COLUMN_PREFIX: &str = "parent_";

#[derive(Clone, Debug)]
pub struct WriterOptions {
    pub queue_capacity: usize,
    pub foreign_keys: bool,
    pub drop_byte_columns: bool,
}

impl Default for WriterOptions {
    fn default() -> Self {
        WriterOptions {
            queue_capacity: 1000,
            foreign_keys: true,
            drop_byte_columns: false,
        }
    }
}

/// Background writer: rows pushed by the pipeline are persisted by a
/// single consumer thread that discovers and evolves the database schema
/// as it goes.
pub struct DatabaseWriter {
    sender: QueueSender,
    handle: Option<JoinHandle<()>>,
}

impl DatabaseWriter {
    pub fn start(
        backend: Box<dyn SqlBackend>,
        filter: TableColumnFilter,
        options: WriterOptions,
    ) -> Result<DatabaseWriter, WriterError> {
        let (sender, receiver) = row_queue(options.queue_capacity);
        let handle = std::thread::Builder::new()
            .name("db-writer".to_string())
            .spawn(move || {
                let mut consumer = Consumer::new(backend, filter, options);
                consumer.run(receiver);
            })?;
        Ok(DatabaseWriter {
            sender,
            handle: Some(handle),
        })
    }

    /// Enqueues one top-level row (with its subtree). Blocks while the
    /// backlog is above the high-water mark; fails once the writer has
    /// gone fatal.
    pub fn write(&self, row: DataRow) -> Result<(), WriterError> {
        self.sender.push(row)
    }

    /// Signals shutdown, waits for the backlog to drain and the
    /// connection to close.
    pub fn flush(mut self) -> Result<(), WriterError> {
        self.sender.push_sentinel()?;
        match self.handle.take().expect("flush called twice").join() {
            Ok(()) => Ok(()),
            Err(_) => Err(WriterError::WriterPanic),
        }
    }
}

impl Drop for DatabaseWriter {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = self.sender.push_sentinel();
            let _ = handle.join();
        }
    }
}

/// Per-packet metadata injected into every row written while it is
/// current.
#[derive(Clone, Debug)]
struct RowInfo {
    sourcefile_id: u64,
    number: Option<Value>,
    timestamp: Option<Value>,
}

struct Consumer {
    backend: Box<dyn SqlBackend>,
    filter: TableColumnFilter,
    options: WriterOptions,
    tables: HashMap<String, TableDefinition>,
    source_files: HashMap<String, u64>,
    row_info: Option<RowInfo>,
    logical_names: HashMap<String, String>,
    collisions_warned: HashSet<String>,
    truncated_values: u64,
}

impl Consumer {
    fn new(
        backend: Box<dyn SqlBackend>,
        filter: TableColumnFilter,
        options: WriterOptions,
    ) -> Consumer {
        Consumer {
            backend,
            filter,
            options,
            tables: HashMap::new(),
            source_files: HashMap::new(),
            row_info: None,
            logical_names: HashMap::new(),
            collisions_warned: HashSet::new(),
            truncated_values: 0,
        }
    }

    fn run(&mut self, receiver: QueueReceiver) {
        receiver.set_active(true);
        let mut consecutive_failures = 0u32;
        loop {
            match receiver.pop() {
                // Wait timed out; go around so shutdown stays responsive.
                None => continue,
                Some(None) => break,
                Some(Some(row)) => match self.process_row(&row, None) {
                    Ok(()) => consecutive_failures = 0,
                    Err(e) => {
                        consecutive_failures += 1;
                        error!("Failed to write row for {}: {e}", row.table_name);
                        if consecutive_failures >= FAILURE_LIMIT {
                            error!("Writer giving up after {FAILURE_LIMIT} consecutive failures");
                            receiver.mark_dead();
                            break;
                        }
                    }
                },
            }
        }
        receiver.set_active(false);
        if self.truncated_values > 0 {
            info!("Truncated {} oversized values", self.truncated_values);
        }
        if let Err(e) = self.backend.close() {
            warn!("Failed to close database connection: {e}");
        }
    }

    fn process_row(
        &mut self,
        row: &DataRow,
        parent: Option<(&str, u64)>,
    ) -> Result<(), BoxedError> {
        let table = self.escaped_table_name(&row.table_name);

        if !self.filter.allows_table(&table) {
            debug!("Table {table} is filtered out");
            // Children may still be allowed; they just lose their parent
            // link.
            for child in &row.child_rows {
                self.process_row(child, None)?;
            }
            return Ok(());
        }

        // A geninfo row opens a new packet: refresh the row-info context
        // that gets injected into every row written under it.
        if table == GENINFO_TABLE && parent.is_none() {
            self.row_info = self.extract_row_info(row)?;
        }

        let (names, values) = self.collect_columns(&table, row, parent);
        self.ensure_table(&table, &names, &values)?;
        let id = self.insert(&table, &names, &values)?;

        for child in &row.child_rows {
            self.process_row(child, Some((&table, id)))?;
        }
        Ok(())
    }

    fn extract_row_info(&mut self, row: &DataRow) -> Result<Option<RowInfo>, BoxedError> {
        let Some(Value::Text(path)) = row.columns.get(FILE_COLUMN) else {
            return Ok(None);
        };
        let path = path.clone();
        let sourcefile_id = self.acquire_source_file_id(&path)?;
        Ok(Some(RowInfo {
            sourcefile_id,
            number: row.columns.get(NUMBER_COLUMN).cloned(),
            timestamp: row.columns.get(TIMESTAMP_COLUMN).cloned(),
        }))
    }

    /// Assembles the full column list for one insert: injected row-info,
    /// the parent link, then the row's own columns after escaping and
    /// filtering.
    fn collect_columns(
        &mut self,
        table: &str,
        row: &DataRow,
        parent: Option<(&str, u64)>,
    ) -> (Vec<String>, Vec<Value>) {
        let mut names = Vec::with_capacity(row.columns.len() + 4);
        let mut values = Vec::with_capacity(row.columns.len() + 4);

        if let Some(info) = &self.row_info {
            names.push(SOURCEFILE_ID_COLUMN.to_string());
            values.push(Value::Int64(info.sourcefile_id as i64));
            if let Some(number) = &info.number {
                names.push(ROW_NUMBER_COLUMN.to_string());
                values.push(number.clone());
            }
            if let Some(timestamp) = &info.timestamp {
                names.push(ROW_TIMESTAMP_COLUMN.to_string());
                values.push(timestamp.clone());
            }
        }

        if let Some((parent_table, parent_id)) = parent {
            names.push(escape_identifier(&format!(
                "{PARENT_COLUMN_PREFIX}{parent_table}"
            )));
            values.push(Value::Int64(parent_id as i64));
        }

        for (name, value) in &row.columns {
            if self.options.drop_byte_columns && value.is_bytes() {
                continue;
            }
            let column = escape_identifier(name);
            if !self.filter.allows_column(table, &column) {
                continue;
            }
            if names.contains(&column) {
                if self.collisions_warned.insert(format!("{table}.{column}")) {
                    warn!("Column name collision in {table}: {name} also maps to {column}");
                }
                continue;
            }
            names.push(column);
            values.push(value.clone());
        }
        (names, values)
    }

    /// Lazily materializes the table definition, creating or evolving the
    /// database schema so every named column exists with a type wide
    /// enough for its value.
    fn ensure_table(
        &mut self,
        table: &str,
        names: &[String],
        values: &[Value],
    ) -> Result<(), BoxedError> {
        let mut definition = match self.tables.remove(table) {
            Some(definition) => definition,
            None => match self.backend.introspect_table(table)? {
                Some(mut existing) => {
                    existing.committed = true;
                    existing
                }
                None => TableDefinition::new(table.to_string()),
            },
        };

        let result = self.evolve_table(&mut definition, table, names, values);
        self.tables.insert(table.to_string(), definition);
        result
    }

    fn evolve_table(
        &mut self,
        definition: &mut TableDefinition,
        table: &str,
        names: &[String],
        values: &[Value],
    ) -> Result<(), BoxedError> {
        if !definition.committed {
            for (name, value) in names.iter().zip(values) {
                definition.columns.insert(
                    name.clone(),
                    ColumnDefinition {
                        name: name.clone(),
                        sql_type: sql_type_for(value),
                        committed: true,
                    },
                );
            }
            definition.committed = true;
            info!("Creating table {table}");
            self.backend.create_table(definition)?;
            for name in names {
                self.maybe_add_foreign_key(table, name)?;
            }
            return Ok(());
        }

        for (name, value) in names.iter().zip(values) {
            let needed = sql_type_for(value);
            match definition.columns.get_mut(name) {
                None => {
                    let column = ColumnDefinition {
                        name: name.clone(),
                        sql_type: needed,
                        committed: true,
                    };
                    definition.columns.insert(name.clone(), column.clone());
                    self.backend.add_column(table, &column)?;
                    self.maybe_add_foreign_key(table, name)?;
                }
                Some(column) => match reconcile(column.sql_type, needed) {
                    Widening::Keep => {}
                    Widening::Widen(wider) => {
                        column.sql_type = wider;
                        let column = column.clone();
                        self.backend.alter_column(table, &column)?;
                    }
                    Widening::Degrade(terminal) => {
                        warn!(
                            "Column {table}.{name} degrades to string({STRING_MAX}): \
                             incompatible with {needed:?}"
                        );
                        column.sql_type = terminal;
                        let column = column.clone();
                        self.backend.alter_column(table, &column)?;
                    }
                },
            }
        }
        Ok(())
    }

    fn maybe_add_foreign_key(&mut self, table: &str, column: &str) -> Result<(), BoxedError> {
        if !self.options.foreign_keys {
            return Ok(());
        }
        let referenced = if column == SOURCEFILE_ID_COLUMN {
            SOURCEFILE_TABLE.to_string()
        } else if let Some(parent_table) = column.strip_prefix(PARENT_COLUMN_PREFIX) {
            parent_table.to_string()
        } else {
            return Ok(());
        };
        // Constraint names get a random suffix so re-runs cannot collide.
        let constraint = format!("fk_{:016x}", rand::random::<u64>());
        self.backend
            .add_foreign_key(table, column, &referenced, &constraint)
    }

    fn insert(
        &mut self,
        table: &str,
        names: &[String],
        values: &[Value],
    ) -> Result<u64, BoxedError> {
        let definition = self.tables.get(table).expect("table ensured");
        let mut params = Vec::with_capacity(values.len());
        let mut truncations = Vec::new();
        for (name, value) in names.iter().zip(values) {
            let column = definition.columns.get(name).expect("column ensured");
            let (param, cut) = bind_value(value, column.sql_type);
            if cut > 0 {
                truncations.push((name.clone(), cut));
            }
            params.push(param);
        }

        let id = self.backend.insert_returning_id(table, names, &params)?;
        for (column, cut) in truncations {
            self.truncated_values += 1;
            warn!("Truncated {cut} characters writing {table}.{column} (row {id})");
        }
        Ok(id)
    }

    /// Returns the `sourcefile` row id for a capture path, inserting the
    /// row the first time the path is seen.
    fn acquire_source_file_id(&mut self, path: &str) -> Result<u64, BoxedError> {
        if let Some(id) = self.source_files.get(path) {
            return Ok(*id);
        }

        if !self.tables.contains_key(SOURCEFILE_TABLE) {
            let mut definition = match self.backend.introspect_table(SOURCEFILE_TABLE)? {
                Some(mut existing) => {
                    existing.committed = true;
                    existing
                }
                None => TableDefinition::new(SOURCEFILE_TABLE.to_string()),
            };
            if !definition.committed {
                definition.columns.insert(
                    PATH_COLUMN.to_string(),
                    ColumnDefinition {
                        name: PATH_COLUMN.to_string(),
                        sql_type: SqlType::String(STRING_MAX),
                        committed: true,
                    },
                );
                definition.committed = true;
                self.backend.create_table(&definition)?;
            }
            self.tables
                .insert(SOURCEFILE_TABLE.to_string(), definition);
        }

        let names = vec![PATH_COLUMN.to_string()];
        let (param, _) = bind_value(
            &Value::Text(path.to_string()),
            SqlType::String(STRING_MAX),
        );
        let id = self
            .backend
            .insert_returning_id(SOURCEFILE_TABLE, &names, &[param])?;
        self.source_files.insert(path.to_string(), id);
        Ok(id)
    }

    /// Escapes a logical table name, warning once per escaped name when
    /// two distinct logical names collide.
    fn escaped_table_name(&mut self, logical: &str) -> String {
        let escaped = escape_identifier(logical);
        match self.logical_names.get(&escaped) {
            None => {
                self.logical_names
                    .insert(escaped.clone(), logical.to_string());
            }
            Some(first) if first != logical => {
                if self.collisions_warned.insert(escaped.clone()) {
                    warn!(
                        "Table name collision: {logical:?} and {first:?} both escape to {escaped}"
                    );
                }
            }
            Some(_) => {}
        }
        escaped
    }
}

/// Converts a value to the parameter form of the column's SQL type. The
/// returned count is the number of characters truncated from an oversized
/// string.
fn bind_value(value: &Value, sql_type: SqlType) -> (SqlParam, usize) {
    match sql_type {
        SqlType::Bool => match value {
            Value::Boolean(b) => (SqlParam::Bool(*b), 0),
            other => match other.as_i64() {
                Some(v) => (SqlParam::Bool(v != 0), 0),
                None => (SqlParam::Null, 0),
            },
        },
        SqlType::Int32 => match value.as_i64() {
            Some(v) => (SqlParam::Int32(v as i32), 0),
            None => (SqlParam::Null, 0),
        },
        SqlType::Int64 => match value.as_i64() {
            Some(v) => (SqlParam::Int64(v), 0),
            None => (SqlParam::Null, 0),
        },
        SqlType::BigNumeric => match value {
            Value::UInt64(v) => (SqlParam::Numeric(v.to_string()), 0),
            other => match other.as_i64() {
                Some(v) => (SqlParam::Numeric(v.to_string()), 0),
                None => (SqlParam::Null, 0),
            },
        },
        SqlType::Float => match value {
            Value::Float32(v) => (SqlParam::Float(*v as f64), 0),
            Value::Float64(v) => (SqlParam::Float(*v), 0),
            Value::Duration(v) => (SqlParam::Float(*v), 0),
            other => match other.as_i64() {
                Some(v) => (SqlParam::Float(v as f64), 0),
                None => (SqlParam::Null, 0),
            },
        },
        SqlType::Timestamp => match value {
            Value::Timestamp(ts) => (SqlParam::Timestamp(*ts), 0),
            _ => (SqlParam::Null, 0),
        },
        SqlType::Guid => match value {
            Value::Guid(guid) => (SqlParam::Text(guid.to_string()), 0),
            other => (SqlParam::Text(other.to_string()), 0),
        },
        SqlType::String(precision) => {
            let rendered = value.to_string();
            let precision = precision as usize;
            let length = rendered.chars().count();
            if length > precision {
                let kept: String = rendered.chars().take(precision).collect();
                (SqlParam::Text(kept), length - precision)
            } else {
                (SqlParam::Text(rendered), 0)
            }
        }
    }
}
