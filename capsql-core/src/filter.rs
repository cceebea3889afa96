use capsql_types::log::warn;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use regex::Regex;

use crate::errors::FilterError;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Action {
    Allow,
    Deny,
}

#[derive(Debug)]
struct TableRule {
    action: Action,
    table: Regex,
}

#[derive(Debug)]
struct ColumnRule {
    action: Action,
    table: Option<Regex>,
    column: Regex,
}

/// Table and column allow/deny lists. All matching rules apply in
/// declaration order and the last match wins; a name no rule matches is
/// allowed.
#[derive(Debug, Default)]
pub struct TableColumnFilter {
    tables: Vec<TableRule>,
    columns: Vec<ColumnRule>,
}

impl TableColumnFilter {
    /// A filter without rules; everything is allowed.
    pub fn empty() -> TableColumnFilter {
        TableColumnFilter::default()
    }

    pub fn allows_table(&self, table: &str) -> bool {
        let mut action = Action::Allow;
        for rule in &self.tables {
            if rule.table.is_match(table) {
                action = rule.action;
            }
        }
        action == Action::Allow
    }

    pub fn allows_column(&self, table: &str, column: &str) -> bool {
        let mut action = Action::Allow;
        for rule in &self.columns {
            let table_matches = rule
                .table
                .as_ref()
                .map(|t| t.is_match(table))
                .unwrap_or(true);
            if table_matches && rule.column.is_match(column) {
                action = rule.action;
            }
        }
        action == Action::Allow
    }

    /// Parses a `<filter>` document with `<tables>` and `<columns>`
    /// sections. Rules whose regex does not compile are skipped.
    pub fn from_xml(xml: &str) -> Result<TableColumnFilter, FilterError> {
        let mut reader = Reader::from_str(xml);
        reader.config_mut().trim_text(true);

        let mut filter = TableColumnFilter::default();
        let mut saw_root = false;
        let mut in_tables = false;
        let mut in_columns = false;
        loop {
            match reader.read_event()? {
                Event::Start(e) | Event::Empty(e) => match e.name().as_ref() {
                    b"filter" => saw_root = true,
                    b"tables" => in_tables = true,
                    b"columns" => in_columns = true,
                    tag @ (b"allow" | b"deny") if in_tables || in_columns => {
                        let action = if tag == b"allow" {
                            Action::Allow
                        } else {
                            Action::Deny
                        };
                        if let Err(e) = add_rule(&mut filter, action, in_columns, &e) {
                            warn!("Skipping filter rule: {e}");
                        }
                    }
                    other => warn!(
                        "Ignoring unknown filter element: {}",
                        String::from_utf8_lossy(other)
                    ),
                },
                Event::End(e) => match e.name().as_ref() {
                    b"tables" => in_tables = false,
                    b"columns" => in_columns = false,
                    _ => {}
                },
                Event::Eof => break,
                _ => {}
            }
        }
        if !saw_root {
            return Err(FilterError::NotAFilterDocument);
        }
        Ok(filter)
    }
}

fn add_rule(
    filter: &mut TableColumnFilter,
    action: Action,
    is_column_rule: bool,
    e: &BytesStart,
) -> Result<(), String> {
    let table_pattern = attribute(e, "tableName").map_err(|e| e.to_string())?;
    if is_column_rule {
        let column_pattern = attribute(e, "columnName")
            .map_err(|e| e.to_string())?
            .ok_or_else(|| "column rule without columnName".to_string())?;
        filter.columns.push(ColumnRule {
            action,
            table: table_pattern
                .map(|p| Regex::new(&p))
                .transpose()
                .map_err(|e| e.to_string())?,
            column: Regex::new(&column_pattern).map_err(|e| e.to_string())?,
        });
    } else {
        let table_pattern =
            table_pattern.ok_or_else(|| "table rule without tableName".to_string())?;
        filter.tables.push(TableRule {
            action,
            table: Regex::new(&table_pattern).map_err(|e| e.to_string())?,
        });
    }
    Ok(())
}

fn attribute(e: &BytesStart, name: &str) -> Result<Option<String>, FilterError> {
    for attr in e.attributes() {
        let attr = attr?;
        if attr.key.as_ref() == name.as_bytes() {
            return Ok(Some(attr.unescape_value()?.into_owned()));
        }
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_allow() {
        let filter = TableColumnFilter::empty();
        assert!(filter.allows_table("anything"));
        assert!(filter.allows_column("anything", "any"));
    }

    #[test]
    fn last_match_wins() {
        let filter = TableColumnFilter::from_xml(
            r#"<filter>
                 <tables>
                   <deny tableName="^tcp"/>
                   <allow tableName="^tcp_flags$"/>
                 </tables>
               </filter>"#,
        )
        .unwrap();
        assert!(!filter.allows_table("tcp_options"));
        assert!(filter.allows_table("tcp_flags"));
        assert!(filter.allows_table("udp"));
    }

    #[test]
    fn column_rules_scope_by_table() {
        let filter = TableColumnFilter::from_xml(
            r#"<filter>
                 <columns>
                   <deny tableName="^http" columnName="cookie"/>
                   <deny columnName="^_raw$"/>
                 </columns>
               </filter>"#,
        )
        .unwrap();
        assert!(!filter.allows_column("http_request", "cookie"));
        assert!(filter.allows_column("dns", "cookie"));
        assert!(!filter.allows_column("dns", "_raw"));
    }

    #[test]
    fn uncompilable_rule_is_skipped() {
        let filter = TableColumnFilter::from_xml(
            r#"<filter>
                 <tables>
                   <deny tableName="(broken"/>
                   <deny tableName="^drop$"/>
                 </tables>
               </filter>"#,
        )
        .unwrap();
        assert!(filter.allows_table("anything"));
        assert!(!filter.allows_table("drop"));
    }

    #[test]
    fn missing_root_is_an_error() {
        assert!(matches!(
            TableColumnFilter::from_xml("<nope/>"),
            Err(FilterError::NotAFilterDocument)
        ));
    }
}
