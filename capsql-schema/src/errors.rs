use capsql_types::errors::types::TypeError;
use capsql_types::thiserror::{self, Error};

#[derive(Error, Debug)]
pub enum SchemaError {
    #[error("Expected at least {expected} columns, got {got}")]
    ColumnCount { expected: usize, got: usize },
    #[error("Unknown record tag: {0:?}")]
    UnknownRecordTag(String),
    #[error("Unknown parent protocol: {0}")]
    UnknownParentProtocol(String),
    #[error("Filter name conflict for protocol {protocol}: {existing} vs {new}")]
    FilterNameConflict {
        protocol: String,
        existing: String,
        new: String,
    },
    #[error("Field {field} registered under protocol {existing}, got {new}")]
    ParentProtocolConflict {
        field: String,
        existing: String,
        new: String,
    },
    #[error("Field {field} registered as {existing:?}, got {new:?}")]
    FieldTypeConflict {
        field: String,
        existing: capsql_types::types::FieldType,
        new: capsql_types::types::FieldType,
    },
    #[error("Unknown field: {0}")]
    UnknownField(String),
    #[error("Invalid integer token: {0:?}")]
    InvalidIntegerToken(String),
    #[error(transparent)]
    Type(#[from] TypeError),
    #[error("Failed to read catalog stream: {0}")]
    Io(#[from] std::io::Error),
}
