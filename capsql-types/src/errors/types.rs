use thiserror::Error;

#[derive(Error, Debug)]
pub enum TypeError {
    #[error("Unknown dissector type token: {0}")]
    UnknownTypeToken(String),
    #[error("Invalid boolean value: {0:?}")]
    InvalidBoolean(String),
    #[error("Invalid integer value: {0:?}")]
    InvalidInteger(String),
    #[error("Integer out of range for {typ}: {value}")]
    IntegerOutOfRange { typ: &'static str, value: String },
    #[error("Invalid float value: {0:?}")]
    InvalidFloat(String),
    #[error("Invalid timestamp: {0:?}")]
    InvalidTimestamp(String),
    #[error("Invalid duration: {0:?}")]
    InvalidDuration(String),
    #[error("Invalid hex string: {0:?}")]
    InvalidHex(String),
    #[error("Invalid IP address: {0:?}")]
    InvalidIpAddress(String),
    #[error("Invalid GUID: {0:?}")]
    InvalidGuid(String),
}
