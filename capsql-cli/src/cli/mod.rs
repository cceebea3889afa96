use std::path::PathBuf;

use clap::{Parser, ValueEnum};

use capsql_types::models::config::{
    Config, DatabaseConfig, DissectorConfig, InputConfig, RulesConfig, WriterConfig,
};
use capsql_types::serde_yaml;

use crate::errors::CliError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum BackendKind {
    Mysql,
    Postgres,
}

/// Loads packet captures into a relational database by driving an
/// external protocol dissector.
#[derive(Debug, Parser)]
#[command(name = "capsql", version)]
pub struct Cli {
    /// YAML configuration file; flags override its values.
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Path to the dissector binary.
    #[arg(long)]
    pub dissector: Option<String>,

    /// Directory scanned for capture files.
    #[arg(long)]
    pub input_dir: Option<String>,

    /// Database backend.
    #[arg(long)]
    pub backend: Option<BackendKind>,

    /// Database connection URL.
    #[arg(long)]
    pub database_url: Option<String>,

    /// Skip foreign key maintenance.
    #[arg(long)]
    pub no_foreign_keys: bool,

    /// Drop byte-sequence columns instead of storing them as hex.
    #[arg(long)]
    pub drop_byte_columns: bool,

    /// External fixups XML augmenting the built-in rules.
    #[arg(long)]
    pub fixups: Option<String>,

    /// Table/column filter XML.
    #[arg(long)]
    pub filter: Option<String>,
}

impl Cli {
    /// Resolves the effective configuration: the YAML file when given,
    /// with every provided flag overriding it.
    pub fn load_config(&self) -> Result<Config, CliError> {
        let mut config = match &self.config {
            Some(path) => {
                let text = std::fs::read_to_string(path)
                    .map_err(|e| CliError::CannotReadConfig(path.clone(), e))?;
                serde_yaml::from_str::<Config>(&text).map_err(CliError::FailedToParseYaml)?
            }
            None => self.minimal_config()?,
        };

        if let Some(dissector) = &self.dissector {
            config.dissector.path = dissector.clone();
        }
        if let Some(input_dir) = &self.input_dir {
            config.input.directory = input_dir.clone();
        }
        if let (Some(backend), Some(url)) = (self.backend, &self.database_url) {
            config.database = database_config(backend, url.clone());
        } else if let Some(url) = &self.database_url {
            config.database = match config.database {
                DatabaseConfig::MySql { .. } => DatabaseConfig::MySql { url: url.clone() },
                DatabaseConfig::Postgres { .. } => DatabaseConfig::Postgres { url: url.clone() },
            };
        }
        if self.no_foreign_keys {
            config.writer.foreign_keys = false;
        }
        if self.drop_byte_columns {
            config.writer.drop_byte_columns = true;
        }
        if self.fixups.is_some() {
            config.rules.fixups_path = self.fixups.clone();
        }
        if self.filter.is_some() {
            config.rules.filter_path = self.filter.clone();
        }
        Ok(config)
    }

    /// A configuration built purely from flags, for runs without a YAML
    /// file.
    fn minimal_config(&self) -> Result<Config, CliError> {
        let dissector = self
            .dissector
            .clone()
            .ok_or(CliError::MissingOption("--dissector"))?;
        let input_dir = self
            .input_dir
            .clone()
            .ok_or(CliError::MissingOption("--input-dir"))?;
        let backend = self.backend.ok_or(CliError::MissingOption("--backend"))?;
        let url = self
            .database_url
            .clone()
            .ok_or(CliError::MissingOption("--database-url"))?;
        Ok(Config {
            dissector: DissectorConfig {
                path: dissector,
                args: Vec::new(),
            },
            input: InputConfig {
                directory: input_dir,
                patterns: default_patterns(),
            },
            database: database_config(backend, url),
            writer: WriterConfig::default(),
            rules: RulesConfig::default(),
        })
    }
}

fn database_config(backend: BackendKind, url: String) -> DatabaseConfig {
    match backend {
        BackendKind::Mysql => DatabaseConfig::MySql { url },
        BackendKind::Postgres => DatabaseConfig::Postgres { url },
    }
}

fn default_patterns() -> Vec<String> {
    vec![
        "*.pcap".to_string(),
        "*.pcapng".to_string(),
        "*.cap".to_string(),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_build_a_full_config() {
        let cli = Cli::parse_from([
            "capsql",
            "--dissector",
            "/usr/bin/tshark",
            "--input-dir",
            "./captures",
            "--backend",
            "mysql",
            "--database-url",
            "mysql://u@localhost/db",
            "--no-foreign-keys",
        ]);
        let config = cli.load_config().unwrap();
        assert_eq!(config.dissector.path, "/usr/bin/tshark");
        assert!(!config.writer.foreign_keys);
        assert_eq!(
            config.database,
            DatabaseConfig::MySql {
                url: "mysql://u@localhost/db".to_string()
            }
        );
    }

    #[test]
    fn missing_required_flag_is_reported() {
        let cli = Cli::parse_from(["capsql", "--dissector", "tshark"]);
        assert!(matches!(
            cli.load_config(),
            Err(CliError::MissingOption("--input-dir"))
        ));
    }
}
