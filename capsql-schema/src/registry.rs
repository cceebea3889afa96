use capsql_types::indexmap::IndexMap;
use capsql_types::types::{DisplayBase, FieldType};

use crate::errors::SchemaError;

/// A protocol descriptor from the dissector's protocol catalog.
///
/// `short_name` is the stable key; lookups are case-insensitive. Fields are
/// attached by short name only, the registry owns the `Field` values.
#[derive(Clone, Debug, PartialEq)]
pub struct Protocol {
    pub short_name: String,
    pub long_name: String,
    pub filter_name: String,
    field_names: Vec<String>,
}

impl Protocol {
    pub fn field_names(&self) -> &[String] {
        &self.field_names
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Field {
    pub short_name: String,
    pub long_name: String,
    pub description: String,
    pub display_base: DisplayBase,
    /// Opaque bitmask string as emitted by the dissector.
    pub bitmask: String,
    pub typ: FieldType,
    /// Short name of the owning protocol; resolved through the registry,
    /// never an owning pointer.
    pub protocol: String,
    value_strings: Vec<ValueString>,
}

impl Field {
    pub fn value_strings(&self) -> &[ValueString] {
        &self.value_strings
    }
}

/// A value-to-label mapping attached to a field.
#[derive(Clone, Debug, PartialEq)]
pub enum ValueString {
    Single {
        value: i64,
        label: String,
    },
    /// Inclusive bounds.
    Range {
        lo: i64,
        hi: i64,
        label: String,
    },
    Boolean {
        true_label: String,
        false_label: String,
    },
}

impl ValueString {
    fn same_key(&self, other: &ValueString) -> bool {
        match (self, other) {
            (ValueString::Single { value: a, .. }, ValueString::Single { value: b, .. }) => a == b,
            (
                ValueString::Range { lo: a, hi: b, .. },
                ValueString::Range { lo: c, hi: d, .. },
            ) => a == c && b == d,
            (ValueString::Boolean { .. }, ValueString::Boolean { .. }) => true,
            _ => false,
        }
    }

    fn merge_label(&mut self, other: ValueString) {
        fn merge(existing: &mut String, new: String) {
            if *existing != new {
                existing.push_str(" / ");
                existing.push_str(&new);
            }
        }
        match (self, other) {
            (ValueString::Single { label, .. }, ValueString::Single { label: new, .. }) => {
                merge(label, new)
            }
            (ValueString::Range { label, .. }, ValueString::Range { label: new, .. }) => {
                merge(label, new)
            }
            (
                ValueString::Boolean {
                    true_label,
                    false_label,
                },
                ValueString::Boolean {
                    true_label: new_true,
                    false_label: new_false,
                },
            ) => {
                merge(true_label, new_true);
                merge(false_label, new_false);
            }
            _ => unreachable!("merge_label called with mismatched kinds"),
        }
    }
}

/// In-memory model of the dissector schema. Populated once during schema
/// load, read-only afterwards.
#[derive(Debug, Default)]
pub struct SchemaRegistry {
    // Keyed by lowercased protocol short name.
    protocols: IndexMap<String, Protocol>,
    fields: IndexMap<String, Field>,
}

impl SchemaRegistry {
    pub fn new() -> SchemaRegistry {
        SchemaRegistry::default()
    }

    pub fn protocol(&self, short_name: &str) -> Option<&Protocol> {
        self.protocols.get(&short_name.to_lowercase())
    }

    pub fn field(&self, short_name: &str) -> Option<&Field> {
        self.fields.get(short_name)
    }

    pub fn protocols(&self) -> impl Iterator<Item = &Protocol> {
        self.protocols.values()
    }

    pub fn fields(&self) -> impl Iterator<Item = &Field> {
        self.fields.values()
    }

    /// Registers a protocol, merging with an existing registration of the
    /// same short name. Differing long names concatenate with " / ";
    /// differing filter names are a conflict and fail the record.
    pub fn register_protocol(
        &mut self,
        long_name: &str,
        short_name: &str,
        filter_name: &str,
    ) -> Result<(), SchemaError> {
        let key = short_name.to_lowercase();
        match self.protocols.get_mut(&key) {
            None => {
                self.protocols.insert(
                    key,
                    Protocol {
                        short_name: short_name.to_string(),
                        long_name: long_name.to_string(),
                        filter_name: filter_name.to_string(),
                        field_names: Vec::new(),
                    },
                );
                Ok(())
            }
            Some(existing) => {
                if existing.filter_name != filter_name {
                    return Err(SchemaError::FilterNameConflict {
                        protocol: short_name.to_string(),
                        existing: existing.filter_name.clone(),
                        new: filter_name.to_string(),
                    });
                }
                if existing.long_name != long_name {
                    existing.long_name.push_str(" / ");
                    existing.long_name.push_str(long_name);
                }
                Ok(())
            }
        }
    }

    /// Registers a field under an already known protocol. The parent
    /// protocol and the semantic type are fixed across merges; a conflict
    /// fails the record and leaves the original intact.
    #[allow(clippy::too_many_arguments)]
    pub fn register_field(
        &mut self,
        long_name: &str,
        short_name: &str,
        typ: FieldType,
        parent_short_name: &str,
        description: &str,
        display_base: DisplayBase,
        bitmask: &str,
    ) -> Result<(), SchemaError> {
        let parent_key = parent_short_name.to_lowercase();
        let parent = self
            .protocols
            .get_mut(&parent_key)
            .ok_or_else(|| SchemaError::UnknownParentProtocol(parent_short_name.to_string()))?;

        match self.fields.get_mut(short_name) {
            None => {
                parent.field_names.push(short_name.to_string());
                self.fields.insert(
                    short_name.to_string(),
                    Field {
                        short_name: short_name.to_string(),
                        long_name: long_name.to_string(),
                        description: description.to_string(),
                        display_base,
                        bitmask: bitmask.to_string(),
                        typ,
                        protocol: parent.short_name.clone(),
                        value_strings: Vec::new(),
                    },
                );
                Ok(())
            }
            Some(existing) => {
                if !existing.protocol.eq_ignore_ascii_case(parent_short_name) {
                    return Err(SchemaError::ParentProtocolConflict {
                        field: short_name.to_string(),
                        existing: existing.protocol.clone(),
                        new: parent_short_name.to_string(),
                    });
                }
                if existing.typ != typ {
                    return Err(SchemaError::FieldTypeConflict {
                        field: short_name.to_string(),
                        existing: existing.typ,
                        new: typ,
                    });
                }
                if existing.long_name != long_name {
                    existing.long_name.push_str(" / ");
                    existing.long_name.push_str(long_name);
                }
                if !description.is_empty() && existing.description != description {
                    if existing.description.is_empty() {
                        existing.description = description.to_string();
                    } else {
                        existing.description.push_str(" / ");
                        existing.description.push_str(description);
                    }
                }
                Ok(())
            }
        }
    }

    /// Attaches a value string to a field, merging labels of an entry with
    /// the same key.
    pub fn register_value_string(
        &mut self,
        field_short_name: &str,
        value_string: ValueString,
    ) -> Result<(), SchemaError> {
        let field = self
            .fields
            .get_mut(field_short_name)
            .ok_or_else(|| SchemaError::UnknownField(field_short_name.to_string()))?;
        match field
            .value_strings
            .iter_mut()
            .find(|existing| existing.same_key(&value_string))
        {
            Some(existing) => existing.merge_label(value_string),
            None => field.value_strings.push(value_string),
        }
        Ok(())
    }
}
