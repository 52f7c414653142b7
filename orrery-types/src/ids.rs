//! Identifier types used throughout the orrery core.
//!
//! Entity and schema ids are assigned by the remote authority and are
//! dense small integers, so they are plain `u32` newtypes rather than
//! locally minted identifiers.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::num::ParseIntError;
use std::str::FromStr;

/// Unique identifier for an entity held in the cache (object, board,
/// design, ...). Assigned by the remote authority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(u32);

impl EntityId {
    /// The universe root object. Every object is reachable from here
    /// through its containment relation.
    pub const ROOT: EntityId = EntityId(0);

    /// Creates an entity id from its raw value.
    #[must_use]
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    /// Returns the raw id value.
    #[must_use]
    pub const fn as_u32(&self) -> u32 {
        self.0
    }

    /// Returns true if this is the universe root.
    #[must_use]
    pub const fn is_root(&self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for EntityId {
    type Err = ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.parse()?))
    }
}

impl From<u32> for EntityId {
    fn from(raw: u32) -> Self {
        Self(raw)
    }
}

/// The remote authority's subtype tag for a polymorphic record.
///
/// Order and message payloads are variants keyed by this id; the
/// matching [`DescriptorRecord`](crate::DescriptorRecord) describes
/// their field layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SchemaId(u32);

impl SchemaId {
    /// Creates a schema id from its raw value.
    #[must_use]
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    /// Returns the raw tag value.
    #[must_use]
    pub const fn as_u32(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for SchemaId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for SchemaId {
    fn from(raw: u32) -> Self {
        Self(raw)
    }
}

/// Stable handle to a node inside one `PendingList` arena.
///
/// The generation counter is bumped every time an arena slot is freed,
/// so a handle to an unlinked node can never resolve to whatever node
/// later reuses the slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeHandle {
    /// Slot index inside the arena.
    pub index: u32,
    /// Generation the slot had when this handle was issued.
    pub generation: u32,
}

impl NodeHandle {
    /// Creates a handle from its parts.
    #[must_use]
    pub const fn new(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }
}

impl fmt::Display for NodeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}v{}", self.index, self.generation)
    }
}
