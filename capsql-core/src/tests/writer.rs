use std::sync::{Arc, Mutex};
use std::time::Duration;

use capsql_types::errors::internal::BoxedError;
use capsql_types::types::{DataRow, Value};

use crate::backend::{SqlBackend, SqlParam};
use crate::errors::WriterError;
use crate::filter::TableColumnFilter;
use crate::table::{ColumnDefinition, SqlType, TableDefinition};
use crate::writer::{DatabaseWriter, WriterOptions};

#[derive(Debug, Default)]
struct Recording {
    created: Vec<TableDefinition>,
    added_columns: Vec<(String, ColumnDefinition)>,
    altered_columns: Vec<(String, ColumnDefinition)>,
    foreign_keys: Vec<(String, String, String)>,
    inserts: Vec<(String, Vec<String>, Vec<SqlParam>)>,
    next_id: u64,
    failing_inserts: u32,
}

#[derive(Clone)]
struct MockBackend {
    recording: Arc<Mutex<Recording>>,
}

impl MockBackend {
    fn new() -> (MockBackend, Arc<Mutex<Recording>>) {
        let recording = Arc::new(Mutex::new(Recording::default()));
        (
            MockBackend {
                recording: recording.clone(),
            },
            recording,
        )
    }
}

impl SqlBackend for MockBackend {
    fn introspect_table(&mut self, _name: &str) -> Result<Option<TableDefinition>, BoxedError> {
        Ok(None)
    }

    fn create_table(&mut self, table: &TableDefinition) -> Result<(), BoxedError> {
        self.recording.lock().unwrap().created.push(table.clone());
        Ok(())
    }

    fn add_column(&mut self, table: &str, column: &ColumnDefinition) -> Result<(), BoxedError> {
        self.recording
            .lock()
            .unwrap()
            .added_columns
            .push((table.to_string(), column.clone()));
        Ok(())
    }

    fn alter_column(&mut self, table: &str, column: &ColumnDefinition) -> Result<(), BoxedError> {
        self.recording
            .lock()
            .unwrap()
            .altered_columns
            .push((table.to_string(), column.clone()));
        Ok(())
    }

    fn add_foreign_key(
        &mut self,
        table: &str,
        column: &str,
        referenced_table: &str,
        _constraint_name: &str,
    ) -> Result<(), BoxedError> {
        self.recording.lock().unwrap().foreign_keys.push((
            table.to_string(),
            column.to_string(),
            referenced_table.to_string(),
        ));
        Ok(())
    }

    fn insert_returning_id(
        &mut self,
        table: &str,
        columns: &[String],
        params: &[SqlParam],
    ) -> Result<u64, BoxedError> {
        let mut recording = self.recording.lock().unwrap();
        if recording.failing_inserts > 0 {
            recording.failing_inserts -= 1;
            return Err("induced insert failure".into());
        }
        recording.next_id += 1;
        let id = recording.next_id;
        recording
            .inserts
            .push((table.to_string(), columns.to_vec(), params.to_vec()));
        Ok(id)
    }

    fn close(&mut self) -> Result<(), BoxedError> {
        Ok(())
    }
}

fn start_writer(filter: TableColumnFilter) -> (DatabaseWriter, Arc<Mutex<Recording>>) {
    let (backend, recording) = MockBackend::new();
    let writer = DatabaseWriter::start(
        Box::new(backend),
        filter,
        WriterOptions {
            queue_capacity: 16,
            ..Default::default()
        },
    )
    .unwrap();
    (writer, recording)
}

fn text_row(table: &str, column: &str, text: &str) -> DataRow {
    let mut row = DataRow::new(table.to_string());
    row.push_column(column.to_string(), Value::Text(text.to_string()));
    row
}

fn geninfo_row(path: &str, number: u32) -> DataRow {
    let mut row = DataRow::new("geninfo".to_string());
    row.push_column("num".to_string(), Value::UInt32(number));
    row.push_column(
        "timestamp".to_string(),
        Value::Timestamp(Default::default()),
    );
    row.push_column("file".to_string(), Value::Text(path.to_string()));
    row
}

#[test]
fn first_insert_creates_the_table() {
    let (writer, recording) = start_writer(TableColumnFilter::empty());
    writer.write(text_row("tcp.flags", "tcp.flags.syn", "1")).unwrap();
    writer.flush().unwrap();

    let recording = recording.lock().unwrap();
    assert_eq!(recording.created.len(), 1);
    let table = &recording.created[0];
    assert_eq!(table.name, "tcp_flags");
    assert_eq!(
        table.columns.get("tcp_flags_syn").map(|c| c.sql_type),
        Some(SqlType::String(250))
    );
    assert_eq!(recording.inserts.len(), 1);
}

#[test]
fn column_widening_issues_a_single_alter() {
    let (writer, recording) = start_writer(TableColumnFilter::empty());
    writer.write(text_row("t", "c", "short")).unwrap();
    writer.write(text_row("t", "c", &"x".repeat(1500))).unwrap();
    writer.write(text_row("t", "c", &"y".repeat(300))).unwrap();
    writer.flush().unwrap();

    let recording = recording.lock().unwrap();
    assert_eq!(
        recording.created[0].columns.get("c").map(|c| c.sql_type),
        Some(SqlType::String(250))
    );
    assert_eq!(recording.altered_columns.len(), 1);
    let (table, column) = &recording.altered_columns[0];
    assert_eq!(table, "t");
    assert_eq!(column.sql_type, SqlType::String(2000));
    assert_eq!(recording.inserts.len(), 3);
}

#[test]
fn incompatible_value_degrades_to_terminal_string() {
    let (writer, recording) = start_writer(TableColumnFilter::empty());
    let mut first = DataRow::new("t".to_string());
    first.push_column("c".to_string(), Value::Float64(1.5));
    let mut second = DataRow::new("t".to_string());
    second.push_column("c".to_string(), Value::UInt8(3));
    writer.write(first).unwrap();
    writer.write(second).unwrap();
    writer.flush().unwrap();

    let recording = recording.lock().unwrap();
    assert_eq!(recording.altered_columns.len(), 1);
    assert_eq!(recording.altered_columns[0].1.sql_type, SqlType::String(4000));
    // The integer is bound as text against the degraded column.
    assert_eq!(recording.inserts[1].2, vec![SqlParam::Text("3".to_string())]);
}

#[test]
fn child_rows_link_to_their_parent() {
    let (writer, recording) = start_writer(TableColumnFilter::empty());
    let mut parent = text_row("ip", "ip.ttl", "64");
    parent
        .child_rows
        .push(text_row("ip.flags", "ip.flags.mf", "0"));
    writer.write(parent).unwrap();
    writer.flush().unwrap();

    let recording = recording.lock().unwrap();
    assert_eq!(recording.inserts.len(), 2);
    // Parent is inserted first; its id exists before the child insert.
    assert_eq!(recording.inserts[0].0, "ip");
    let (child_table, child_columns, child_params) = &recording.inserts[1];
    assert_eq!(child_table, "ip_flags");
    let position = child_columns.iter().position(|c| c == "parent_ip").unwrap();
    assert_eq!(child_params[position], SqlParam::Int64(1));
    assert!(recording
        .foreign_keys
        .contains(&("ip_flags".to_string(), "parent_ip".to_string(), "ip".to_string())));
}

#[test]
fn geninfo_establishes_row_info_and_source_file() {
    let (writer, recording) = start_writer(TableColumnFilter::empty());
    writer.write(geninfo_row("/captures/a.pcap", 1)).unwrap();
    writer.write(text_row("ip", "ip.ttl", "64")).unwrap();
    writer.write(geninfo_row("/captures/a.pcap", 2)).unwrap();
    writer.write(text_row("ip", "ip.ttl", "63")).unwrap();
    writer.flush().unwrap();

    let recording = recording.lock().unwrap();
    // sourcefile is inserted once, before any data row.
    assert_eq!(recording.inserts[0].0, "sourcefile");
    assert_eq!(
        recording.inserts[0].2,
        vec![SqlParam::Text("/captures/a.pcap".to_string())]
    );
    let sourcefile_inserts = recording
        .inserts
        .iter()
        .filter(|(table, _, _)| table == "sourcefile")
        .count();
    assert_eq!(sourcefile_inserts, 1);

    // Every later row carries the injected columns.
    for (table, columns, params) in &recording.inserts[1..] {
        assert!(columns.contains(&"_sourcefileid".to_string()), "{table}");
        assert_eq!(params[0], SqlParam::Int64(1));
        assert!(columns.contains(&"_number".to_string()));
        assert!(columns.contains(&"_timestamp".to_string()));
    }

    // The second packet's row carries the refreshed packet number.
    let (_, columns, params) = recording.inserts.last().unwrap();
    let position = columns.iter().position(|c| c == "_number").unwrap();
    assert_eq!(params[position], SqlParam::Int64(2));

    assert!(recording
        .foreign_keys
        .iter()
        .any(|(table, column, referenced)| {
            table == "geninfo" && column == "_sourcefileid" && referenced == "sourcefile"
        }));
}

#[test]
fn denied_table_skips_the_row_but_keeps_children() {
    let filter = TableColumnFilter::from_xml(
        r#"<filter><tables><deny tableName="^ip$"/></tables></filter>"#,
    )
    .unwrap();
    let (writer, recording) = start_writer(filter);
    let mut parent = text_row("ip", "ip.ttl", "64");
    parent
        .child_rows
        .push(text_row("ip.flags", "ip.flags.mf", "0"));
    writer.write(parent).unwrap();
    writer.flush().unwrap();

    let recording = recording.lock().unwrap();
    assert_eq!(recording.inserts.len(), 1);
    let (table, columns, _) = &recording.inserts[0];
    assert_eq!(table, "ip_flags");
    // The parent row was never written, so there is nothing to link to.
    assert!(!columns.iter().any(|c| c.starts_with("parent_")));
}

#[test]
fn denied_columns_are_dropped() {
    let filter = TableColumnFilter::from_xml(
        r#"<filter><columns><deny columnName="^secret$"/></columns></filter>"#,
    )
    .unwrap();
    let (writer, recording) = start_writer(filter);
    let mut row = text_row("t", "keep", "v");
    row.push_column("secret".to_string(), Value::Text("hidden".to_string()));
    writer.write(row).unwrap();
    writer.flush().unwrap();

    let recording = recording.lock().unwrap();
    let (_, columns, _) = &recording.inserts[0];
    assert_eq!(columns, &vec!["keep".to_string()]);
}

#[test]
fn three_consecutive_failures_kill_the_writer() {
    let (backend, recording) = MockBackend::new();
    recording.lock().unwrap().failing_inserts = 3;
    let writer = DatabaseWriter::start(
        Box::new(backend),
        TableColumnFilter::empty(),
        WriterOptions {
            queue_capacity: 16,
            ..Default::default()
        },
    )
    .unwrap();

    for i in 0..3 {
        writer.write(text_row("t", "c", &format!("v{i}"))).unwrap();
    }

    // The consumer marks itself dead after the third failure; the
    // producer observes it on a subsequent write.
    let mut died = false;
    for _ in 0..100 {
        match writer.write(text_row("t", "c", "after")) {
            Err(WriterError::WriterDead) => {
                died = true;
                break;
            }
            Ok(()) => std::thread::sleep(Duration::from_millis(10)),
            Err(other) => panic!("unexpected error: {other}"),
        }
    }
    assert!(died);
}

#[test]
fn isolated_failures_do_not_kill_the_writer() {
    let (backend, recording) = MockBackend::new();
    recording.lock().unwrap().failing_inserts = 1;
    let writer = DatabaseWriter::start(
        Box::new(backend),
        TableColumnFilter::empty(),
        WriterOptions {
            queue_capacity: 16,
            ..Default::default()
        },
    )
    .unwrap();

    writer.write(text_row("t", "c", "fails")).unwrap();
    writer.write(text_row("t", "c", "lands")).unwrap();
    writer.flush().unwrap();

    let recording = recording.lock().unwrap();
    assert_eq!(recording.inserts.len(), 1);
}

#[test]
fn oversized_strings_truncate_at_the_terminal_width() {
    let (writer, recording) = start_writer(TableColumnFilter::empty());
    writer.write(text_row("t", "c", &"z".repeat(5000))).unwrap();
    writer.flush().unwrap();

    let recording = recording.lock().unwrap();
    let SqlParam::Text(stored) = &recording.inserts[0].2[0] else {
        panic!("expected text param");
    };
    assert_eq!(stored.len(), 4000);
}

#[test]
fn foreign_keys_can_be_disabled() {
    let (backend, recording) = MockBackend::new();
    let writer = DatabaseWriter::start(
        Box::new(backend),
        TableColumnFilter::empty(),
        WriterOptions {
            queue_capacity: 16,
            foreign_keys: false,
            ..Default::default()
        },
    )
    .unwrap();
    let mut parent = text_row("ip", "ip.ttl", "64");
    parent
        .child_rows
        .push(text_row("ip.flags", "ip.flags.mf", "0"));
    writer.write(parent).unwrap();
    writer.flush().unwrap();

    let recording = recording.lock().unwrap();
    assert!(recording.foreign_keys.is_empty());
    // The parent link column itself is still written.
    assert!(recording.inserts[1].1.contains(&"parent_ip".to_string()));
}

#[test]
fn byte_columns_can_be_dropped() {
    let (backend, recording) = MockBackend::new();
    let writer = DatabaseWriter::start(
        Box::new(backend),
        TableColumnFilter::empty(),
        WriterOptions {
            queue_capacity: 16,
            drop_byte_columns: true,
            ..Default::default()
        },
    )
    .unwrap();
    let mut row = text_row("t", "keep", "v");
    row.push_column("payload".to_string(), Value::Bytes(vec![1, 2, 3]));
    writer.write(row).unwrap();
    writer.flush().unwrap();

    let recording = recording.lock().unwrap();
    assert_eq!(recording.inserts[0].1, vec!["keep".to_string()]);
}
