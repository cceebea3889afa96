use capsql_core::backend::{SqlBackend, SqlParam};
use capsql_core::table::{ColumnDefinition, SqlType, TableDefinition};
use capsql_types::errors::internal::BoxedError;
use capsql_types::indexmap::IndexMap;
use capsql_types::log::debug;
use capsql_types::thiserror::{self, Error};
use mysql_async::prelude::*;
use mysql_async::{Conn, Opts, Params, Value};
use tokio::runtime::Runtime;

#[derive(Error, Debug)]
pub enum MySqlSinkError {
    #[error("Invalid MySQL connection URL: {0}")]
    InvalidUrl(#[source] mysql_async::UrlError),
    #[error("Failed to connect to MySQL: {0}")]
    Connect(#[source] mysql_async::Error),
    #[error("Failed to create runtime: {0}")]
    Runtime(#[source] std::io::Error),
    #[error("Insert did not produce an id")]
    MissingInsertId,
}

/// MySQL implementation of the writer's backend seam. The connection is
/// owned by the writer thread, so a private current-thread runtime drives
/// the async driver.
pub struct MySqlBackend {
    runtime: Runtime,
    conn: Option<Conn>,
}

impl MySqlBackend {
    pub fn connect(url: &str) -> Result<MySqlBackend, MySqlSinkError> {
        let opts = Opts::from_url(url).map_err(MySqlSinkError::InvalidUrl)?;
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(MySqlSinkError::Runtime)?;
        let conn = runtime
            .block_on(Conn::new(opts))
            .map_err(MySqlSinkError::Connect)?;
        Ok(MySqlBackend {
            runtime,
            conn: Some(conn),
        })
    }

    fn conn(&mut self) -> &mut Conn {
        self.conn.as_mut().expect("backend used after close")
    }

    fn execute(&mut self, sql: String, params: Params) -> Result<(), BoxedError> {
        debug!("mysql: {sql}");
        let MySqlBackend { runtime, conn } = self;
        let conn = conn.as_mut().expect("backend used after close");
        runtime.block_on(conn.exec_drop(sql, params))?;
        Ok(())
    }
}

impl SqlBackend for MySqlBackend {
    fn introspect_table(&mut self, name: &str) -> Result<Option<TableDefinition>, BoxedError> {
        let MySqlBackend { runtime, conn } = self;
        let conn = conn.as_mut().expect("backend used after close");
        let rows: Vec<(String, String, Option<u64>)> = runtime.block_on(conn.exec(
            "SELECT column_name, data_type, character_maximum_length \
             FROM information_schema.columns \
             WHERE table_schema = DATABASE() AND table_name = ? \
             ORDER BY ordinal_position",
            (name,),
        ))?;
        if rows.is_empty() {
            return Ok(None);
        }

        let mut columns = IndexMap::new();
        for (column_name, data_type, max_length) in rows {
            if column_name == "_id" {
                continue;
            }
            let sql_type = sql_type_from_catalog(&data_type, max_length);
            columns.insert(
                column_name.clone(),
                ColumnDefinition {
                    name: column_name,
                    sql_type,
                    committed: true,
                },
            );
        }
        Ok(Some(TableDefinition {
            name: name.to_string(),
            columns,
            committed: true,
        }))
    }

    fn create_table(&mut self, table: &TableDefinition) -> Result<(), BoxedError> {
        let mut definitions =
            vec!["`_id` BIGINT NOT NULL AUTO_INCREMENT PRIMARY KEY".to_string()];
        for column in table.columns.values() {
            definitions.push(format!(
                "{} {} NULL",
                quote(&column.name),
                type_name(column.sql_type)
            ));
        }
        let sql = format!(
            "CREATE TABLE {} ({})",
            quote(&table.name),
            definitions.join(", ")
        );
        self.execute(sql, Params::Empty)
    }

    fn add_column(&mut self, table: &str, column: &ColumnDefinition) -> Result<(), BoxedError> {
        let sql = format!(
            "ALTER TABLE {} ADD COLUMN {} {} NULL",
            quote(table),
            quote(&column.name),
            type_name(column.sql_type)
        );
        self.execute(sql, Params::Empty)
    }

    fn alter_column(&mut self, table: &str, column: &ColumnDefinition) -> Result<(), BoxedError> {
        let sql = format!(
            "ALTER TABLE {} MODIFY COLUMN {} {} NULL",
            quote(table),
            quote(&column.name),
            type_name(column.sql_type)
        );
        self.execute(sql, Params::Empty)
    }

    fn add_foreign_key(
        &mut self,
        table: &str,
        column: &str,
        referenced_table: &str,
        constraint_name: &str,
    ) -> Result<(), BoxedError> {
        let sql = format!(
            "ALTER TABLE {} ADD CONSTRAINT {} FOREIGN KEY ({}) REFERENCES {} (`_id`)",
            quote(table),
            quote(constraint_name),
            quote(column),
            quote(referenced_table)
        );
        self.execute(sql, Params::Empty)
    }

    fn insert_returning_id(
        &mut self,
        table: &str,
        columns: &[String],
        params: &[SqlParam],
    ) -> Result<u64, BoxedError> {
        let sql = insert_sql(table, columns);
        let values = Params::Positional(params.iter().map(bind_param).collect());
        self.execute(sql, values)?;
        let id = self
            .conn()
            .last_insert_id()
            .ok_or(MySqlSinkError::MissingInsertId)?;
        Ok(id)
    }

    fn close(&mut self) -> Result<(), BoxedError> {
        if let Some(conn) = self.conn.take() {
            self.runtime.block_on(conn.disconnect())?;
        }
        Ok(())
    }
}

fn quote(identifier: &str) -> String {
    format!("`{}`", identifier.replace('`', ""))
}

fn type_name(sql_type: SqlType) -> String {
    match sql_type {
        SqlType::Bool => "TINYINT(1)".to_string(),
        SqlType::Int32 => "INT".to_string(),
        SqlType::Int64 => "BIGINT".to_string(),
        SqlType::BigNumeric => "DECIMAL(20,0)".to_string(),
        SqlType::Float => "DOUBLE".to_string(),
        SqlType::Timestamp => "DATETIME(6)".to_string(),
        SqlType::Guid => "VARCHAR(36)".to_string(),
        SqlType::String(precision) => format!("VARCHAR({precision})"),
    }
}

fn insert_sql(table: &str, columns: &[String]) -> String {
    let names: Vec<String> = columns.iter().map(|c| quote(c)).collect();
    let placeholders = vec!["?"; columns.len()].join(", ");
    format!(
        "INSERT INTO {} ({}) VALUES ({})",
        quote(table),
        names.join(", "),
        placeholders
    )
}

fn bind_param(param: &SqlParam) -> Value {
    match param {
        SqlParam::Null => Value::NULL,
        SqlParam::Bool(b) => Value::from(*b),
        SqlParam::Int32(v) => Value::from(*v),
        SqlParam::Int64(v) => Value::from(*v),
        SqlParam::Numeric(digits) => Value::from(digits.clone()),
        SqlParam::Float(v) => Value::from(*v),
        SqlParam::Timestamp(ts) => Value::from(ts.format("%Y-%m-%d %H:%M:%S%.6f").to_string()),
        SqlParam::Text(text) => Value::from(text.clone()),
    }
}

fn sql_type_from_catalog(data_type: &str, max_length: Option<u64>) -> SqlType {
    match data_type {
        "tinyint" => SqlType::Bool,
        "int" => SqlType::Int32,
        "bigint" => SqlType::Int64,
        "decimal" => SqlType::BigNumeric,
        "float" | "double" => SqlType::Float,
        "datetime" | "timestamp" => SqlType::Timestamp,
        "varchar" | "char" => match max_length {
            Some(36) => SqlType::Guid,
            Some(len) => SqlType::String(len.min(4000) as u16),
            None => SqlType::String(4000),
        },
        // Anything else is treated as an already-degraded string.
        _ => SqlType::String(4000),
    }
}
