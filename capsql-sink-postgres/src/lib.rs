use std::str::FromStr;

use capsql_core::backend::{SqlBackend, SqlParam};
use capsql_core::table::{ColumnDefinition, SqlType, TableDefinition};
use capsql_types::chrono::NaiveDateTime;
use capsql_types::errors::internal::BoxedError;
use capsql_types::indexmap::IndexMap;
use capsql_types::log::debug;
use capsql_types::thiserror::{self, Error};
use rust_decimal::Decimal;
use tokio::runtime::Runtime;
use tokio_postgres::types::ToSql;
use tokio_postgres::{Client, NoTls};

#[derive(Error, Debug)]
pub enum PostgresSinkError {
    #[error("Failed to connect to PostgreSQL: {0}")]
    Connect(#[source] tokio_postgres::Error),
    #[error("Failed to create runtime: {0}")]
    Runtime(#[source] std::io::Error),
}

/// PostgreSQL implementation of the writer's backend seam, driven by a
/// private current-thread runtime so the writer thread stays synchronous.
pub struct PostgresBackend {
    runtime: Runtime,
    client: Option<Client>,
}

impl PostgresBackend {
    pub fn connect(url: &str) -> Result<PostgresBackend, PostgresSinkError> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(PostgresSinkError::Runtime)?;
        let client = runtime.block_on(async {
            let (client, connection) = tokio_postgres::connect(url, NoTls).await?;
            // The connection task only makes progress while block_on is
            // driving the runtime, which is exactly when queries run.
            tokio::spawn(connection);
            Ok::<_, tokio_postgres::Error>(client)
        });
        let client = client.map_err(PostgresSinkError::Connect)?;
        Ok(PostgresBackend {
            runtime,
            client: Some(client),
        })
    }

    fn execute(&mut self, sql: String) -> Result<(), BoxedError> {
        debug!("postgres: {sql}");
        let PostgresBackend { runtime, client } = self;
        let client = client.as_mut().expect("backend used after close");
        runtime.block_on(client.execute(sql.as_str(), &[]))?;
        Ok(())
    }
}

impl SqlBackend for PostgresBackend {
    fn introspect_table(&mut self, name: &str) -> Result<Option<TableDefinition>, BoxedError> {
        let PostgresBackend { runtime, client } = self;
        let client = client.as_mut().expect("backend used after close");
        let rows = runtime.block_on(client.query(
            "SELECT column_name, data_type, character_maximum_length \
             FROM information_schema.columns \
             WHERE table_schema = current_schema() AND table_name = $1 \
             ORDER BY ordinal_position",
            &[&name],
        ))?;
        if rows.is_empty() {
            return Ok(None);
        }

        let mut columns = IndexMap::new();
        for row in rows {
            let column_name: String = row.get(0);
            if column_name == "_id" {
                continue;
            }
            let data_type: String = row.get(1);
            let max_length: Option<i32> = row.get(2);
            columns.insert(
                column_name.clone(),
                ColumnDefinition {
                    name: column_name,
                    sql_type: sql_type_from_catalog(&data_type, max_length),
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
        let mut definitions = vec!["\"_id\" BIGSERIAL PRIMARY KEY".to_string()];
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
        self.execute(sql)
    }

    fn add_column(&mut self, table: &str, column: &ColumnDefinition) -> Result<(), BoxedError> {
        let sql = format!(
            "ALTER TABLE {} ADD COLUMN {} {} NULL",
            quote(table),
            quote(&column.name),
            type_name(column.sql_type)
        );
        self.execute(sql)
    }

    fn alter_column(&mut self, table: &str, column: &ColumnDefinition) -> Result<(), BoxedError> {
        let type_name = type_name(column.sql_type);
        let sql = format!(
            "ALTER TABLE {} ALTER COLUMN {} TYPE {} USING {}::{}",
            quote(table),
            quote(&column.name),
            type_name,
            quote(&column.name),
            type_name
        );
        self.execute(sql)
    }

    fn add_foreign_key(
        &mut self,
        table: &str,
        column: &str,
        referenced_table: &str,
        constraint_name: &str,
    ) -> Result<(), BoxedError> {
        let sql = format!(
            "ALTER TABLE {} ADD CONSTRAINT {} FOREIGN KEY ({}) REFERENCES {} (\"_id\")",
            quote(table),
            quote(constraint_name),
            quote(column),
            quote(referenced_table)
        );
        self.execute(sql)
    }

    fn insert_returning_id(
        &mut self,
        table: &str,
        columns: &[String],
        params: &[SqlParam],
    ) -> Result<u64, BoxedError> {
        let sql = insert_sql(table, columns);
        debug!("postgres: {sql}");
        let values: Vec<PgValue> = params.iter().map(PgValue::from_param).collect();
        let refs: Vec<&(dyn ToSql + Sync)> = values.iter().map(PgValue::as_sql).collect();

        let PostgresBackend { runtime, client } = self;
        let client = client.as_mut().expect("backend used after close");
        let row = runtime.block_on(client.query_one(sql.as_str(), &refs))?;
        let id: i64 = row.get(0);
        Ok(id as u64)
    }

    fn close(&mut self) -> Result<(), BoxedError> {
        // Dropping the client closes the connection once the task drains.
        self.client.take();
        Ok(())
    }
}

/// Owned parameter storage whose references satisfy the driver's `ToSql`
/// borrow requirements for the duration of one insert.
enum PgValue {
    Null,
    Bool(bool),
    Int32(i32),
    Int64(i64),
    Numeric(Decimal),
    Float(f64),
    Timestamp(NaiveDateTime),
    Text(String),
}

static NULL_PARAM: Option<String> = None;

impl PgValue {
    fn from_param(param: &SqlParam) -> PgValue {
        match param {
            SqlParam::Null => PgValue::Null,
            SqlParam::Bool(b) => PgValue::Bool(*b),
            SqlParam::Int32(v) => PgValue::Int32(*v),
            SqlParam::Int64(v) => PgValue::Int64(*v),
            SqlParam::Numeric(digits) => match Decimal::from_str(digits) {
                Ok(decimal) => PgValue::Numeric(decimal),
                Err(_) => PgValue::Null,
            },
            SqlParam::Float(v) => PgValue::Float(*v),
            SqlParam::Timestamp(ts) => PgValue::Timestamp(ts.naive_utc()),
            SqlParam::Text(text) => PgValue::Text(text.clone()),
        }
    }

    fn as_sql(&self) -> &(dyn ToSql + Sync) {
        match self {
            PgValue::Null => &NULL_PARAM,
            PgValue::Bool(v) => v,
            PgValue::Int32(v) => v,
            PgValue::Int64(v) => v,
            PgValue::Numeric(v) => v,
            PgValue::Float(v) => v,
            PgValue::Timestamp(v) => v,
            PgValue::Text(v) => v,
        }
    }
}

fn quote(identifier: &str) -> String {
    format!("\"{}\"", identifier.replace('"', ""))
}

fn type_name(sql_type: SqlType) -> String {
    match sql_type {
        SqlType::Bool => "BOOLEAN".to_string(),
        SqlType::Int32 => "INTEGER".to_string(),
        SqlType::Int64 => "BIGINT".to_string(),
        SqlType::BigNumeric => "NUMERIC(20,0)".to_string(),
        SqlType::Float => "DOUBLE PRECISION".to_string(),
        SqlType::Timestamp => "TIMESTAMP(6)".to_string(),
        SqlType::Guid => "VARCHAR(36)".to_string(),
        SqlType::String(precision) => format!("VARCHAR({precision})"),
    }
}

fn insert_sql(table: &str, columns: &[String]) -> String {
    let names: Vec<String> = columns.iter().map(|c| quote(c)).collect();
    let placeholders: Vec<String> = (1..=columns.len()).map(|i| format!("${i}")).collect();
    format!(
        "INSERT INTO {} ({}) VALUES ({}) RETURNING \"_id\"",
        quote(table),
        names.join(", "),
        placeholders.join(", ")
    )
}

fn sql_type_from_catalog(data_type: &str, max_length: Option<i32>) -> SqlType {
    match data_type {
        "boolean" => SqlType::Bool,
        "integer" => SqlType::Int32,
        "bigint" => SqlType::Int64,
        "numeric" => SqlType::BigNumeric,
        "real" | "double precision" => SqlType::Float,
        "timestamp without time zone" | "timestamp with time zone" => SqlType::Timestamp,
        "character varying" | "character" => match max_length {
            Some(36) => SqlType::Guid,
            Some(len) => SqlType::String(len.clamp(0, 4000) as u16),
            None => SqlType::String(4000),
        },
        _ => SqlType::String(4000),
    }
}
