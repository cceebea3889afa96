use std::path::PathBuf;

use capsql_core::errors::WriterError;
use capsql_ingestion::errors::IngestionError;
use capsql_schema::errors::SchemaError;
use capsql_types::thiserror::{self, Error};

#[derive(Error, Debug)]
pub enum OrchestrationError {
    #[error(transparent)]
    Cli(#[from] CliError),
    #[error("Input directory is not readable: {0:?}")]
    UnreadableInputDirectory(PathBuf),
    #[error("No capture files matched in {0:?}")]
    NoCaptureFiles(PathBuf),
    #[error("Failed to read rule file {0:?}: {1}")]
    RuleFileRead(PathBuf, #[source] std::io::Error),
    #[error(transparent)]
    Ingestion(#[from] IngestionError),
    #[error(transparent)]
    Schema(#[from] SchemaError),
    #[error("Filter file rejected: {0}")]
    Filter(#[from] capsql_core::errors::FilterError),
    #[error("Database connection failed: {0}")]
    Connect(#[source] capsql_types::errors::internal::BoxedError),
    #[error(transparent)]
    Writer(#[from] WriterError),
}

#[derive(Error, Debug)]
pub enum CliError {
    #[error("Cannot read configuration file {0:?}: {1}")]
    CannotReadConfig(PathBuf, #[source] std::io::Error),
    #[error("Failed to parse configuration: {0}")]
    FailedToParseYaml(#[source] capsql_types::serde_yaml::Error),
    #[error("Missing required option: {0} (set it in the config file or pass the flag)")]
    MissingOption(&'static str),
}
