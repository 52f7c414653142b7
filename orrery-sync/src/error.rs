//! Error types for the sync layer.

use crate::source::RemoteFailure;
use orrery_cache::CacheError;
use orrery_types::{EntityId, WrongRecord};
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur in sync operations.
#[derive(Debug, Error)]
pub enum SyncError {
    /// An object's containment list names an id the refresh never
    /// produced. Fatal: the tree cannot be rebuilt.
    #[error("missing reference: object {parent} contains unknown id {child}")]
    MissingReference { parent: EntityId, child: EntityId },

    /// The remote authority rejected or failed a call.
    #[error("remote call failed: {0}")]
    Remote(#[from] RemoteFailure),

    /// The transport misbehaved structurally (misaligned batch,
    /// response stream ended early).
    #[error("transport error: {0}")]
    Transport(String),

    /// Caller error in mutation arguments.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// A fetched record arrived as the wrong variant for its kind.
    #[error(transparent)]
    WrongRecord(#[from] WrongRecord),

    /// Error from the underlying cache.
    #[error(transparent)]
    Cache(#[from] CacheError),

    /// The owning run loop has gone away.
    #[error("channel closed")]
    ChannelClosed,
}
