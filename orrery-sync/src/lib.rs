//! Reconciliation engine and optimistic mutation pipeline for the
//! orrery cache.
//!
//! # Components
//!
//! - **Source**: the [`RemoteSource`] capability, everything the sync
//!   layer consumes from the wire client.
//! - **Engine**: [`SyncEngine`], the bulk diff-and-fetch
//!   reconciliation of the whole cache.
//! - **Pipeline**: [`MutationPipeline`], local-propose /
//!   remote-confirm for user-originated edits.
//! - **Worker**: [`SyncWorker`], the run loop that exclusively owns
//!   the cache and connection, fed by a command FIFO.
//! - **Progress**: the [`ProgressSink`] callback contract.
//!
//! # Refresh flow
//!
//! 1. Enumerate `(id, modify time)` per entity kind.
//! 2. Fetch only what is new or newer, one batched call per kind.
//! 3. Absorb per-item failures; sweep ids the server stopped
//!    reporting, with their dependent sub-collections.
//! 4. Rebuild the object containment tree (a dangling reference
//!    aborts the refresh).
//! 5. Fan out pipelined sub-collection fetches, drained strictly in
//!    submission order.

mod engine;
mod error;
mod mutation;
mod progress;
mod source;
mod worker;

pub use engine::{SyncConfig, SyncEngine, SyncFailure, SyncReport};
pub use error::{SyncError, SyncResult};
pub use mutation::{MutationPipeline, MutationRequest};
pub use progress::{NullProgress, ProgressEvent, ProgressSink, ProgressState};
pub use source::{mock, ChildBatch, FetchResult, OnItem, RemoteFailure, RemoteSource};
pub use worker::{SyncCommand, SyncNotification, SyncWorker, WorkerHandle};
