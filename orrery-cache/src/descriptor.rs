//! Registry of order/message subtype descriptors.
//!
//! The remote authority defines order and message subtypes at runtime;
//! their schemas arrive during sync as [`DescriptorRecord`]s and are
//! registered here. The registry is the codec table for subtype
//! payloads: field lists validate decoded JSON and gate encoding.

use crate::error::{CacheError, CacheResult};
use orrery_types::{DescriptorRecord, SchemaId};
use std::collections::HashMap;

/// Versioned map from schema id to descriptor, populated at sync time.
#[derive(Debug, Clone, Default)]
pub struct DescriptorRegistry {
    entries: HashMap<SchemaId, DescriptorRecord>,
}

impl DescriptorRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a descriptor, replacing an older one for the same
    /// schema. A strictly older modify time is rejected, mirroring the
    /// versioned stores.
    pub fn register(&mut self, descriptor: DescriptorRecord) -> CacheResult<()> {
        if !descriptor.modify_time.is_unchecked() {
            if let Some(existing) = self.entries.get(&descriptor.schema) {
                if existing.modify_time > descriptor.modify_time {
                    return Err(CacheError::StaleDescriptor {
                        schema: descriptor.schema,
                        stored: existing.modify_time,
                        attempted: descriptor.modify_time,
                    });
                }
            }
        }
        self.entries.insert(descriptor.schema, descriptor);
        Ok(())
    }

    /// Removes a descriptor, returning it if present.
    pub fn remove(&mut self, schema: SchemaId) -> Option<DescriptorRecord> {
        self.entries.remove(&schema)
    }

    /// Looks up the descriptor for a schema id.
    pub fn get(&self, schema: SchemaId) -> Option<&DescriptorRecord> {
        self.entries.get(&schema)
    }

    /// Whether a schema id is registered.
    pub fn contains(&self, schema: SchemaId) -> bool {
        self.entries.contains_key(&schema)
    }

    /// All registered schema ids, sorted.
    #[must_use]
    pub fn ids(&self) -> Vec<SchemaId> {
        let mut ids: Vec<SchemaId> = self.entries.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Number of registered descriptors.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the registry is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterates descriptors in arbitrary order.
    pub fn iter(&self) -> impl Iterator<Item = &DescriptorRecord> {
        self.entries.values()
    }

    /// Decodes a subtype payload, validating it against the registered
    /// field list.
    pub fn decode_fields(&self, schema: SchemaId, bytes: &[u8]) -> CacheResult<serde_json::Value> {
        let value: serde_json::Value = serde_json::from_slice(bytes)?;
        self.check_fields(schema, &value)?;
        Ok(value)
    }

    /// Encodes a subtype payload after validating it.
    pub fn encode_fields(&self, schema: SchemaId, value: &serde_json::Value) -> CacheResult<Vec<u8>> {
        self.check_fields(schema, value)?;
        Ok(serde_json::to_vec(value)?)
    }

    /// Validates that `value` carries every field the descriptor
    /// declares, with plausible types.
    pub fn check_fields(&self, schema: SchemaId, value: &serde_json::Value) -> CacheResult<()> {
        let descriptor = self
            .entries
            .get(&schema)
            .ok_or(CacheError::UnknownSchema(schema))?;

        let object = value.as_object().ok_or_else(|| CacheError::FieldMismatch {
            schema,
            reason: "payload is not an object".into(),
        })?;

        for field in &descriptor.fields {
            match object.get(&field.name) {
                None => {
                    return Err(CacheError::FieldMismatch {
                        schema,
                        reason: format!("missing field `{}`", field.name),
                    })
                }
                Some(v) if !field.kind.accepts(v) => {
                    return Err(CacheError::FieldMismatch {
                        schema,
                        reason: format!("field `{}` is not a valid {:?}", field.name, field.kind),
                    })
                }
                Some(_) => {}
            }
        }
        Ok(())
    }
}
