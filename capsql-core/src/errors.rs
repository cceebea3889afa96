use capsql_types::errors::internal::BoxedError;
use capsql_types::thiserror::{self, Error};

#[derive(Error, Debug)]
pub enum WriterError {
    #[error("Writer is no longer accepting rows after repeated failures")]
    WriterDead,
    #[error("Writer thread panicked")]
    WriterPanic,
    #[error("Cannot spawn writer thread: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("Database error: {0}")]
    Backend(#[source] BoxedError),
}

#[derive(Error, Debug)]
pub enum FilterError {
    #[error("Filter file is not a filter document")]
    NotAFilterDocument,
    #[error("Malformed filter XML: {0}")]
    Xml(#[from] quick_xml::Error),
    #[error("Malformed filter attribute: {0}")]
    XmlAttribute(#[from] quick_xml::events::attributes::AttrError),
}
