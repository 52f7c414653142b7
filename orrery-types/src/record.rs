//! Record payloads fetched from the remote authority.
//!
//! Every record is a tagged variant: the variant is fixed at
//! construction (it is never reassigned afterwards) and the
//! kind-specific subtype is carried as a [`SchemaId`] resolved through
//! the descriptor registry. Fields the core does not interpret ride
//! along as a JSON tail.

use crate::{DescriptorRecord, EntityId, ModifyTime, SchemaId};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A physical object in the simulated universe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectRecord {
    pub id: EntityId,
    /// Object subtype (planet, fleet, ...).
    pub schema: SchemaId,
    pub name: String,
    pub modify_time: ModifyTime,
    /// Owning object in the containment tree. Rebuilt locally after
    /// every sync; the root is its own parent.
    #[serde(default = "root_id")]
    pub parent: EntityId,
    /// Ids of directly contained objects.
    #[serde(default)]
    pub contains: Vec<EntityId>,
    /// Number of orders queued against this object on the server.
    #[serde(default)]
    pub order_count: u32,
    /// Subtype-specific fields, uninterpreted by the core.
    #[serde(default)]
    pub fields: serde_json::Value,
}

/// A message board.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoardRecord {
    pub id: EntityId,
    pub schema: SchemaId,
    pub name: String,
    pub modify_time: ModifyTime,
    /// Number of messages posted to this board on the server.
    #[serde(default)]
    pub message_count: u32,
    #[serde(default)]
    pub fields: serde_json::Value,
}

/// A queued order against an object. Orders have no global id; they
/// are addressed by their slot inside the owning object's list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRecord {
    /// Order type, resolved through the order-type registry.
    pub schema: SchemaId,
    /// Type-specific arguments, shaped per the descriptor.
    #[serde(default)]
    pub fields: serde_json::Value,
}

/// A message posted to a board, addressed by slot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageRecord {
    pub schema: SchemaId,
    pub subject: String,
    pub body: String,
    #[serde(default)]
    pub fields: serde_json::Value,
}

/// Any other simple entity: features, resources, components,
/// properties, players, categories, designs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenericRecord {
    pub id: EntityId,
    pub schema: SchemaId,
    pub name: String,
    pub modify_time: ModifyTime,
    #[serde(default)]
    pub fields: serde_json::Value,
}

fn root_id() -> EntityId {
    EntityId::ROOT
}

/// The uniform fetch payload: one of the concrete record kinds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "record", rename_all = "snake_case")]
pub enum Record {
    Object(ObjectRecord),
    Board(BoardRecord),
    Order(OrderRecord),
    Message(MessageRecord),
    Generic(GenericRecord),
    Descriptor(DescriptorRecord),
}

impl Record {
    /// The variant name, for diagnostics.
    #[must_use]
    pub const fn kind_name(&self) -> &'static str {
        match self {
            Record::Object(_) => "object",
            Record::Board(_) => "board",
            Record::Order(_) => "order",
            Record::Message(_) => "message",
            Record::Generic(_) => "generic",
            Record::Descriptor(_) => "descriptor",
        }
    }

    /// The entity id, for kinds that carry one.
    #[must_use]
    pub fn id(&self) -> Option<EntityId> {
        match self {
            Record::Object(r) => Some(r.id),
            Record::Board(r) => Some(r.id),
            Record::Generic(r) => Some(r.id),
            Record::Order(_) | Record::Message(_) | Record::Descriptor(_) => None,
        }
    }

    /// The remote modify time, for kinds that carry one.
    #[must_use]
    pub fn modify_time(&self) -> Option<ModifyTime> {
        match self {
            Record::Object(r) => Some(r.modify_time),
            Record::Board(r) => Some(r.modify_time),
            Record::Generic(r) => Some(r.modify_time),
            Record::Descriptor(r) => Some(r.modify_time),
            Record::Order(_) | Record::Message(_) => None,
        }
    }

    /// The subtype tag.
    #[must_use]
    pub fn schema(&self) -> SchemaId {
        match self {
            Record::Object(r) => r.schema,
            Record::Board(r) => r.schema,
            Record::Order(r) => r.schema,
            Record::Message(r) => r.schema,
            Record::Generic(r) => r.schema,
            Record::Descriptor(r) => r.schema,
        }
    }
}

/// A record arrived as a different variant than the context requires.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("unexpected record variant: expected {expected}, got {got}")]
pub struct WrongRecord {
    pub expected: &'static str,
    pub got: &'static str,
}

macro_rules! record_try_from {
    ($ty:ty, $variant:ident, $name:literal) => {
        impl TryFrom<Record> for $ty {
            type Error = WrongRecord;

            fn try_from(record: Record) -> Result<Self, Self::Error> {
                match record {
                    Record::$variant(r) => Ok(r),
                    other => Err(WrongRecord {
                        expected: $name,
                        got: other.kind_name(),
                    }),
                }
            }
        }

        impl From<$ty> for Record {
            fn from(record: $ty) -> Self {
                Record::$variant(record)
            }
        }
    };
}

record_try_from!(ObjectRecord, Object, "object");
record_try_from!(BoardRecord, Board, "board");
record_try_from!(OrderRecord, Order, "order");
record_try_from!(MessageRecord, Message, "message");
record_try_from!(GenericRecord, Generic, "generic");
record_try_from!(DescriptorRecord, Descriptor, "descriptor");
