use crate::errors::types::TypeError;
use serde::{Deserialize, Serialize};

/// Semantic type of a dissector field. Closed set; every dissector type
/// token maps onto exactly one of these or fails field registration.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FieldType {
    Boolean,
    UInt8,
    UInt16,
    UInt32,
    UInt64,
    Int8,
    Int16,
    Int32,
    Int64,
    Float32,
    Float64,
    /// Absolute point in time, stored in UTC.
    Timestamp,
    /// Relative duration in seconds.
    Duration,
    Text,
    Bytes,
    /// IPv4 or IPv6 address.
    IpAddr,
    Guid,
    /// Rendered-string types the dissector cannot decompose further
    /// (hardware addresses, OIDs, IPX networks, compiled patterns).
    Opaque,
}

impl FieldType {
    /// Maps a dissector `FT_*` type token onto a semantic type.
    ///
    /// `FT_NUM_TYPES` and unrecognized tokens are registration errors; the
    /// caller skips the field and keeps loading.
    pub fn from_type_token(token: &str) -> Result<FieldType, TypeError> {
        let typ = match token {
            "FT_BOOLEAN" => FieldType::Boolean,
            "FT_UINT8" => FieldType::UInt8,
            "FT_UINT16" => FieldType::UInt16,
            "FT_UINT24" | "FT_UINT32" => FieldType::UInt32,
            "FT_UINT64" => FieldType::UInt64,
            "FT_INT8" => FieldType::Int8,
            "FT_INT16" => FieldType::Int16,
            "FT_INT24" | "FT_INT32" => FieldType::Int32,
            "FT_INT64" => FieldType::Int64,
            "FT_FLOAT" => FieldType::Float32,
            "FT_DOUBLE" => FieldType::Float64,
            "FT_ABSOLUTE_TIME" => FieldType::Timestamp,
            "FT_RELATIVE_TIME" => FieldType::Duration,
            "FT_STRING" | "FT_STRINGZ" | "FT_EBCDIC" | "FT_UINT_STRING" => FieldType::Text,
            "FT_BYTES" | "FT_UINT_BYTES" => FieldType::Bytes,
            "FT_IPv4" | "FT_IPv6" => FieldType::IpAddr,
            "FT_GUID" => FieldType::Guid,
            "FT_ETHER" | "FT_IPXNET" | "FT_OID" | "FT_PCRE" => FieldType::Opaque,
            "FT_NONE" | "FT_PROTOCOL" => FieldType::Text,
            "FT_EUI64" => FieldType::UInt64,
            "FT_FRAMENUM" => FieldType::UInt32,
            _ => return Err(TypeError::UnknownTypeToken(token.to_string())),
        };
        Ok(typ)
    }

    pub fn is_unsigned(&self) -> bool {
        matches!(
            self,
            FieldType::UInt8 | FieldType::UInt16 | FieldType::UInt32 | FieldType::UInt64
        )
    }

    pub fn is_signed(&self) -> bool {
        matches!(
            self,
            FieldType::Int8 | FieldType::Int16 | FieldType::Int32 | FieldType::Int64
        )
    }
}

/// Rendering hint attached to a numeric field by the dissector. Only the
/// hex and none families change parsing behavior; everything else decodes
/// as decimal.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum DisplayBase {
    None,
    #[default]
    Decimal,
    Hex,
    Other,
}

impl DisplayBase {
    pub fn from_token(token: &str) -> DisplayBase {
        if token.starts_with("BASE_HEX") {
            DisplayBase::Hex
        } else if token == "BASE_NONE" {
            DisplayBase::None
        } else if token.starts_with("BASE_") {
            DisplayBase::Decimal
        } else {
            DisplayBase::Other
        }
    }
}
