//! Core type definitions for the orrery client cache.
//!
//! Shared vocabulary for the cache and sync crates: remote-assigned
//! identifiers, modify-time stamps with the unchecked-write sentinel,
//! polymorphic record payloads, subtype descriptors, collection names,
//! and the dirty/update mutation events.

mod collection;
mod descriptor;
mod event;
mod ids;
mod record;
mod time;

pub use collection::Collection;
pub use descriptor::{DescriptorField, DescriptorRecord, FieldKind};
pub use event::{CacheEvent, EventChange, EventPhase, MutationAction};
pub use ids::{EntityId, NodeHandle, SchemaId};
pub use record::{
    BoardRecord, GenericRecord, MessageRecord, ObjectRecord, OrderRecord, Record, WrongRecord,
};
pub use time::ModifyTime;
