//! Error types for the cache layer.

use crate::pending::PendingState;
use orrery_types::{EntityId, ModifyTime, NodeHandle, SchemaId};
use thiserror::Error;

/// Result type for cache operations.
pub type CacheResult<T> = Result<T, CacheError>;

/// Errors that can occur in cache operations.
#[derive(Debug, Error)]
pub enum CacheError {
    /// Write carried an older modify time than the stored entry.
    #[error("stale write for id {id}: stored {stored}, attempted {attempted}")]
    StaleWrite {
        id: EntityId,
        stored: ModifyTime,
        attempted: ModifyTime,
    },

    /// Descriptor registration carried an older modify time.
    #[error("stale descriptor for schema {schema}: stored {stored}, attempted {attempted}")]
    StaleDescriptor {
        schema: SchemaId,
        stored: ModifyTime,
        attempted: ModifyTime,
    },

    /// Snapshot version mismatch, truncation, or garbage.
    #[error("corrupt snapshot: {0}")]
    CorruptSnapshot(String),

    /// I/O error reading or writing the snapshot file.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// Payload (de)serialization error.
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    /// Handle does not resolve to a live node in this list.
    #[error("unknown node {0}")]
    UnknownNode(NodeHandle),

    /// No further state may be queued on a node pending removal.
    #[error("node {0} is pending removal")]
    NodeRemoving(NodeHandle),

    /// The node has no pending state to pop.
    #[error("node {0} has no pending state")]
    EmptyQueue(NodeHandle),

    /// The requested state transition is not legal.
    #[error("illegal transition {from} -> {to} on node {node}")]
    IllegalTransition {
        node: NodeHandle,
        from: PendingState,
        to: PendingState,
    },

    /// A queued update must carry the proposed value.
    #[error("node {0}: queued {1} state requires a value")]
    MissingValue(NodeHandle, PendingState),

    /// No descriptor registered under this schema id.
    #[error("unknown schema {0}")]
    UnknownSchema(SchemaId),

    /// Payload does not match the registered descriptor.
    #[error("descriptor mismatch for schema {schema}: {reason}")]
    FieldMismatch { schema: SchemaId, reason: String },
}
