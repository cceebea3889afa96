use serde::{Deserialize, Serialize};

/// Top-level run configuration, loaded from YAML and overridable by CLI
/// flags.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    pub dissector: DissectorConfig,
    pub input: InputConfig,
    pub database: DatabaseConfig,
    #[serde(default)]
    pub writer: WriterConfig,
    #[serde(default)]
    pub rules: RulesConfig,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DissectorConfig {
    /// Path to the dissector binary.
    pub path: String,
    /// Extra arguments appended to every dissector invocation.
    #[serde(default)]
    pub args: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InputConfig {
    /// Directory scanned for capture files.
    pub directory: String,
    /// Glob patterns matched against file names inside `directory`.
    #[serde(default = "default_patterns")]
    pub patterns: Vec<String>,
}

fn default_patterns() -> Vec<String> {
    vec!["*.pcap".to_string(), "*.pcapng".to_string(), "*.cap".to_string()]
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum DatabaseConfig {
    MySql { url: String },
    Postgres { url: String },
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WriterConfig {
    /// Backlog cap of the row queue.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// Maintain foreign keys from child rows to parent rows and to the
    /// source file table.
    #[serde(default = "default_true")]
    pub foreign_keys: bool,
    /// Drop byte-sequence columns instead of storing them as hex.
    #[serde(default)]
    pub drop_byte_columns: bool,
}

fn default_queue_capacity() -> usize {
    1000
}

fn default_true() -> bool {
    true
}

impl Default for WriterConfig {
    fn default() -> Self {
        WriterConfig {
            queue_capacity: default_queue_capacity(),
            foreign_keys: true,
            drop_byte_columns: false,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RulesConfig {
    /// Optional fixups XML augmenting the built-in rules.
    #[serde(default)]
    pub fixups_path: Option<String>,
    /// Optional table/column filter XML.
    #[serde(default)]
    pub filter_path: Option<String>,
}
