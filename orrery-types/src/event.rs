//! Cache mutation events.
//!
//! A locally proposed edit travels as a *dirty* event: the application
//! thread creates it, the network thread pushes it to the remote
//! authority, and on acknowledgement the same record is committed and
//! reclassified as an *update* event for observers. The phase is a
//! field, never a change of type.

use crate::{Collection, EntityId, NodeHandle, Record};
use serde::{Deserialize, Serialize};
use std::fmt;

/// How a collection is being changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MutationAction {
    /// Append to a simple collection, or append to the end of a
    /// compound list.
    Create,
    /// Splice before an existing node. Compound collections only.
    CreateBefore,
    /// Splice after an existing node. Compound collections only.
    CreateAfter,
    /// Replace an existing value in place.
    Change,
    /// Remove one value, or a batch of nodes for compound collections.
    Remove,
}

impl MutationAction {
    /// True for actions only compound collections support.
    #[must_use]
    pub const fn is_compound_only(&self) -> bool {
        matches!(self, MutationAction::CreateBefore | MutationAction::CreateAfter)
    }

    /// Stable lowercase name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            MutationAction::Create => "create",
            MutationAction::CreateBefore => "create_before",
            MutationAction::CreateAfter => "create_after",
            MutationAction::Change => "change",
            MutationAction::Remove => "remove",
        }
    }
}

impl fmt::Display for MutationAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether the event is still a local proposal or a confirmed change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventPhase {
    /// Proposed locally, not yet acknowledged by the remote authority.
    Dirty,
    /// Committed; observers may rely on it.
    Update,
}

/// The payload of a mutation event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventChange {
    /// New or replacement value for a simple collection.
    Value(Record),
    /// Single-node compound change; `node` is the affected arena
    /// handle, rewritten by the pipeline to the spliced node.
    Node { node: NodeHandle, value: Record },
    /// Batched multi-node removal from one compound list.
    Nodes(Vec<NodeHandle>),
}

impl EventChange {
    /// The single affected node, if this change names one.
    #[must_use]
    pub fn node(&self) -> Option<NodeHandle> {
        match self {
            EventChange::Node { node, .. } => Some(*node),
            EventChange::Value(_) | EventChange::Nodes(_) => None,
        }
    }

    /// The carried value, if this change has one.
    #[must_use]
    pub fn value(&self) -> Option<&Record> {
        match self {
            EventChange::Value(value) | EventChange::Node { value, .. } => Some(value),
            EventChange::Nodes(_) => None,
        }
    }
}

/// A single cache mutation, dirty or confirmed.
///
/// `id` is the entity id for simple collections and the parent id for
/// compound ones.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEvent {
    pub collection: Collection,
    pub action: MutationAction,
    pub phase: EventPhase,
    pub id: EntityId,
    pub change: EventChange,
}

impl CacheEvent {
    /// Creates a dirty (proposed) event.
    #[must_use]
    pub fn dirty(
        collection: Collection,
        action: MutationAction,
        id: EntityId,
        change: EventChange,
    ) -> Self {
        Self {
            collection,
            action,
            phase: EventPhase::Dirty,
            id,
            change,
        }
    }

    /// Reclassifies the event as confirmed.
    #[must_use]
    pub fn confirm(mut self) -> Self {
        self.phase = EventPhase::Update;
        self
    }

    /// True while the event is an unacknowledged proposal.
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.phase == EventPhase::Dirty
    }
}

impl fmt::Display for CacheEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let phase = match self.phase {
            EventPhase::Dirty => "dirty",
            EventPhase::Update => "update",
        };
        write!(f, "<{} {} {} id={}>", phase, self.collection, self.action, self.id)
    }
}
