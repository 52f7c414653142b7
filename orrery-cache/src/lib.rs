//! Versioned local mirror of server-authoritative world state.
//!
//! The cache keeps one player's view of the simulated universe between
//! network round trips and across application runs:
//!
//! - [`VersionedStore`]: id-keyed values stamped with the remote
//!   authority's modify time; stale writes are rejected.
//! - [`PendingList`] / [`PendingNode`]: per-parent ordered
//!   sub-collections whose elements carry optimistic, unconfirmed
//!   local transitions alongside the confirmed value.
//! - [`DescriptorRegistry`]: runtime schemas for polymorphic order and
//!   message subtypes.
//! - [`Cache`]: the aggregate, restored from and persisted to a
//!   bit-exact snapshot file.
//!
//! The sync engine and mutation pipeline that feed the cache live in
//! the `orrery-sync` crate; this crate has no network knowledge.

mod cache;
mod descriptor;
mod error;
mod pending;
pub mod snapshot;
mod versioned;

pub use cache::{Cache, CacheKey};
pub use descriptor::DescriptorRegistry;
pub use error::{CacheError, CacheResult};
pub use pending::{ChainIter, PendingList, PendingNode, PendingState};
pub use snapshot::{read_snapshot, write_snapshot, SNAPSHOT_VERSION};
pub use versioned::VersionedStore;
