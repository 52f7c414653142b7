//! Descriptor records: the remote authority's schema for polymorphic
//! order and message subtypes.
//!
//! Descriptors arrive during sync like any other entity and are
//! registered into the cache's descriptor registry keyed by schema id,
//! forming the codec table for subtype payloads.

use crate::{ModifyTime, SchemaId};
use serde::{Deserialize, Serialize};

/// Schema of one order or message subtype.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DescriptorRecord {
    /// The subtype tag this descriptor defines.
    pub schema: SchemaId,
    /// Human-readable subtype name.
    pub name: String,
    /// Human-readable description.
    #[serde(default)]
    pub description: String,
    /// Argument fields, in wire order.
    pub fields: Vec<DescriptorField>,
    pub modify_time: ModifyTime,
}

impl DescriptorRecord {
    /// Looks up a field by name.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&DescriptorField> {
        self.fields.iter().find(|f| f.name == name)
    }
}

/// One argument field of a subtype.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DescriptorField {
    pub name: String,
    pub kind: FieldKind,
}

impl DescriptorField {
    /// Creates a field from its parts.
    pub fn new(name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }
}

/// The data type of a descriptor field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    /// Free-form text.
    Text,
    /// Signed integer quantity.
    Number,
    /// Boolean flag.
    Bool,
    /// Reference to another entity by id.
    EntityRef,
    /// Absolute position triple.
    Coordinates,
    /// Uninterpreted JSON payload.
    Json,
}

impl FieldKind {
    /// Returns true when `value` is a plausible JSON encoding for this
    /// field kind.
    #[must_use]
    pub fn accepts(&self, value: &serde_json::Value) -> bool {
        match self {
            FieldKind::Text => value.is_string(),
            FieldKind::Number => value.is_i64() || value.is_u64(),
            FieldKind::Bool => value.is_boolean(),
            FieldKind::EntityRef => value.is_u64(),
            FieldKind::Coordinates => {
                value.as_array().is_some_and(|a| a.len() == 3 && a.iter().all(|v| v.is_i64()))
            }
            FieldKind::Json => true,
        }
    }
}
