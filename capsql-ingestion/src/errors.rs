use std::path::PathBuf;

use capsql_types::thiserror::{self, Error};

#[derive(Error, Debug)]
pub enum IngestionError {
    #[error("Dissector binary not found: {0:?}")]
    DissectorNotFound(PathBuf),
    #[error("Failed to launch dissector: {0}")]
    DissectorLaunch(#[source] std::io::Error),
    #[error("Dissector catalog read failed: {0}")]
    CatalogRead(#[source] std::io::Error),
    #[error("Failed to create side-car file {0:?}: {1}")]
    SidecarCreate(PathBuf, #[source] std::io::Error),
    #[error("Failed to open packet stream {0:?}: {1}")]
    StreamOpen(PathBuf, #[source] std::io::Error),
    #[error("Malformed packet stream: {0}")]
    Xml(#[from] quick_xml::Error),
    #[error("Malformed attribute: {0}")]
    XmlAttribute(#[from] quick_xml::events::attributes::AttrError),
    #[error("Packet stream ended inside a packet element")]
    TruncatedPacket,
    #[error("Rule file is not a fixups document")]
    NotAFixupsDocument,
    #[error("Built-in rule blob has a bad magic header")]
    BadRuleMagic,
    #[error("Failed to decompress built-in rules: {0}")]
    RuleInflate(#[source] std::io::Error),
    #[error("Invalid rule regex {attribute}: {source}")]
    RuleRegex {
        attribute: &'static str,
        #[source]
        source: regex::Error,
    },
    #[error("Row sink rejected a row: {0}")]
    Sink(#[source] capsql_types::errors::internal::BoxedError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
