//! The remote data-source capability.
//!
//! Everything the sync layer needs from the wire client, expressed as
//! one trait so the engine and pipeline never see sockets: enumerate
//! ids with modify times, batch-fetch records, switch into pipelined
//! mode for sub-collection fan-out, and issue per-kind mutations.

use crate::error::SyncResult;
use async_trait::async_trait;
use orrery_types::{Collection, EntityId, ModifyTime, Record};
use std::ops::Range;
use thiserror::Error;

/// A per-item failure reported by the remote authority.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{reason}")]
pub struct RemoteFailure {
    pub reason: String,
}

impl RemoteFailure {
    /// Creates a failure with the given reason.
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// One element of a batched fetch, aligned positionally with the
/// requested ids.
pub type FetchResult = Result<Record, RemoteFailure>;

/// Per-item progress callback invoked as each element of a batched
/// fetch arrives.
pub type OnItem<'a> = dyn FnMut(&FetchResult) + Send + 'a;

/// One completed pipelined sub-collection response.
pub type ChildBatch = Result<Vec<Record>, RemoteFailure>;

/// Abstract capability of the remote authority's wire client.
///
/// `poll` returns `Ok(None)` while no response has completed yet; the
/// caller loops. Pipelined responses complete strictly in submission
/// order.
#[async_trait]
pub trait RemoteSource: Send + Sync {
    /// Lists `(id, modify time)` for every entity of a kind.
    async fn enumerate(&self, kind: Collection) -> SyncResult<Vec<(EntityId, ModifyTime)>>;

    /// Fetches a batch of entities, invoking `on_item` as each item
    /// arrives. The result vector aligns positionally with `ids`;
    /// individual failures are tagged, not raised.
    async fn fetch(
        &self,
        kind: Collection,
        ids: &[EntityId],
        on_item: &mut OnItem<'_>,
    ) -> SyncResult<Vec<FetchResult>>;

    /// Switches the connection into or out of pipelined mode.
    async fn set_pipelined(&self, enabled: bool) -> SyncResult<()>;

    /// Requests one parent's sub-items without waiting. Pipelined mode
    /// only.
    async fn request_children(
        &self,
        kind: Collection,
        parent: EntityId,
        range: Range<u32>,
    ) -> SyncResult<()>;

    /// Returns the next completed pipelined response, or `None` when
    /// no response has completed yet.
    async fn poll(&self) -> SyncResult<Option<ChildBatch>>;

    /// Inserts a sub-item at a wire slot (`None` appends).
    async fn insert_child(
        &self,
        kind: Collection,
        parent: EntityId,
        slot: Option<u32>,
        record: &Record,
    ) -> SyncResult<()>;

    /// Removes sub-items by wire slot.
    async fn remove_children(
        &self,
        kind: Collection,
        parent: EntityId,
        slots: &[u32],
    ) -> SyncResult<()>;

    /// Fetches the canonical representation of one sub-item.
    async fn fetch_child(&self, kind: Collection, parent: EntityId, slot: u32)
        -> SyncResult<Record>;

    /// Creates a simple entity; the server assigns and returns its id.
    async fn insert_entity(&self, kind: Collection, record: &Record) -> SyncResult<EntityId>;

    /// Replaces a simple entity in place.
    async fn change_entity(&self, kind: Collection, record: &Record) -> SyncResult<()>;

    /// Removes a simple entity.
    async fn remove_entity(&self, kind: Collection, id: EntityId) -> SyncResult<()>;
}

/// A scriptable in-memory source for testing.
pub mod mock {
    use super::*;
    use crate::error::SyncError;
    use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
    use std::sync::Mutex;

    #[derive(Default)]
    struct Inner {
        entities: HashMap<Collection, BTreeMap<EntityId, Record>>,
        children: HashMap<(Collection, EntityId), Vec<Record>>,
        fail_fetch: HashSet<(Collection, EntityId)>,
        fail_children: HashSet<(Collection, EntityId)>,
        fail_mutations: bool,
        pipelined: bool,
        outstanding: VecDeque<(Collection, EntityId)>,
        fetch_calls: usize,
        fetched_ids: Vec<(Collection, EntityId)>,
        next_id: u32,
    }

    /// In-memory [`RemoteSource`] backed by scriptable tables.
    #[derive(Default)]
    pub struct MockSource {
        inner: Mutex<Inner>,
    }

    impl MockSource {
        /// Creates an empty mock server.
        #[must_use]
        pub fn new() -> Self {
            Self {
                inner: Mutex::new(Inner {
                    next_id: 1000,
                    ..Inner::default()
                }),
            }
        }

        fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
            self.inner.lock().unwrap_or_else(|e| e.into_inner())
        }

        // ── Scripting ────────────────────────────────────────────

        /// Installs an entity; id and modify time come from the
        /// record. Descriptors are keyed by their schema tag.
        pub fn put_entity(&self, kind: Collection, record: Record) {
            let id = match record.id() {
                Some(id) => id,
                None => EntityId::new(record.schema().as_u32()),
            };
            self.lock().entities.entry(kind).or_default().insert(id, record);
        }

        /// Removes an entity from the scripted server state.
        pub fn drop_entity(&self, kind: Collection, id: EntityId) {
            if let Some(table) = self.lock().entities.get_mut(&kind) {
                table.remove(&id);
            }
        }

        /// Installs one parent's sub-items.
        pub fn set_children(&self, kind: Collection, parent: EntityId, records: Vec<Record>) {
            self.lock().children.insert((kind, parent), records);
        }

        /// Scripts a per-item failure for a fetch of `id`.
        pub fn fail_fetch_of(&self, kind: Collection, id: EntityId) {
            self.lock().fail_fetch.insert((kind, id));
        }

        /// Scripts a failure for one parent's sub-item request.
        pub fn fail_children_of(&self, kind: Collection, parent: EntityId) {
            self.lock().fail_children.insert((kind, parent));
        }

        /// Makes every mutation call fail until switched off again.
        pub fn fail_mutations(&self, enabled: bool) {
            self.lock().fail_mutations = enabled;
        }

        // ── Inspection ───────────────────────────────────────────

        /// Number of batched fetch calls issued so far.
        #[must_use]
        pub fn fetch_calls(&self) -> usize {
            self.lock().fetch_calls
        }

        /// Every id fetched so far, in request order.
        #[must_use]
        pub fn fetched_ids(&self) -> Vec<(Collection, EntityId)> {
            self.lock().fetched_ids.clone()
        }

        /// Whether the connection is currently pipelined.
        #[must_use]
        pub fn is_pipelined(&self) -> bool {
            self.lock().pipelined
        }

        /// One parent's current sub-items.
        #[must_use]
        pub fn children_of(&self, kind: Collection, parent: EntityId) -> Vec<Record> {
            self.lock()
                .children
                .get(&(kind, parent))
                .cloned()
                .unwrap_or_default()
        }

        /// A stored entity, if present.
        #[must_use]
        pub fn entity(&self, kind: Collection, id: EntityId) -> Option<Record> {
            self.lock().entities.get(&kind).and_then(|t| t.get(&id)).cloned()
        }
    }

    #[async_trait]
    impl RemoteSource for MockSource {
        async fn enumerate(&self, kind: Collection) -> SyncResult<Vec<(EntityId, ModifyTime)>> {
            let inner = self.lock();
            Ok(inner
                .entities
                .get(&kind)
                .map(|table| {
                    table
                        .iter()
                        .map(|(id, record)| {
                            (*id, record.modify_time().unwrap_or(ModifyTime::UNCHECKED))
                        })
                        .collect()
                })
                .unwrap_or_default())
        }

        async fn fetch(
            &self,
            kind: Collection,
            ids: &[EntityId],
            on_item: &mut OnItem<'_>,
        ) -> SyncResult<Vec<FetchResult>> {
            let mut inner = self.lock();
            inner.fetch_calls += 1;
            let mut results = Vec::with_capacity(ids.len());
            for id in ids {
                inner.fetched_ids.push((kind, *id));
                let result = if inner.fail_fetch.contains(&(kind, *id)) {
                    Err(RemoteFailure::new(format!("fetch of {id} failed")))
                } else {
                    match inner.entities.get(&kind).and_then(|t| t.get(id)) {
                        Some(record) => Ok(record.clone()),
                        None => Err(RemoteFailure::new(format!("no such id {id}"))),
                    }
                };
                on_item(&result);
                results.push(result);
            }
            Ok(results)
        }

        async fn set_pipelined(&self, enabled: bool) -> SyncResult<()> {
            self.lock().pipelined = enabled;
            Ok(())
        }

        async fn request_children(
            &self,
            kind: Collection,
            parent: EntityId,
            _range: Range<u32>,
        ) -> SyncResult<()> {
            let mut inner = self.lock();
            if !inner.pipelined {
                return Err(SyncError::Transport(
                    "request_children outside pipelined mode".into(),
                ));
            }
            inner.outstanding.push_back((kind, parent));
            Ok(())
        }

        async fn poll(&self) -> SyncResult<Option<ChildBatch>> {
            let mut inner = self.lock();
            let Some((kind, parent)) = inner.outstanding.pop_front() else {
                return Ok(None);
            };
            if inner.fail_children.contains(&(kind, parent)) {
                return Ok(Some(Err(RemoteFailure::new(format!(
                    "children of {parent} unavailable"
                )))));
            }
            Ok(Some(Ok(inner
                .children
                .get(&(kind, parent))
                .cloned()
                .unwrap_or_default())))
        }

        async fn insert_child(
            &self,
            kind: Collection,
            parent: EntityId,
            slot: Option<u32>,
            record: &Record,
        ) -> SyncResult<()> {
            let mut inner = self.lock();
            if inner.fail_mutations {
                return Err(RemoteFailure::new("mutation rejected").into());
            }
            let children = inner.children.entry((kind, parent)).or_default();
            match slot {
                Some(slot) if (slot as usize) <= children.len() => {
                    children.insert(slot as usize, record.clone());
                }
                Some(slot) => {
                    return Err(RemoteFailure::new(format!("slot {slot} out of range")).into());
                }
                None => children.push(record.clone()),
            }
            Ok(())
        }

        async fn remove_children(
            &self,
            kind: Collection,
            parent: EntityId,
            slots: &[u32],
        ) -> SyncResult<()> {
            let mut inner = self.lock();
            if inner.fail_mutations {
                return Err(RemoteFailure::new("mutation rejected").into());
            }
            let children = inner
                .children
                .get_mut(&(kind, parent))
                .ok_or_else(|| RemoteFailure::new(format!("no children under {parent}")))?;
            let mut sorted: Vec<u32> = slots.to_vec();
            sorted.sort_unstable();
            for slot in sorted.into_iter().rev() {
                if (slot as usize) >= children.len() {
                    return Err(RemoteFailure::new(format!("slot {slot} out of range")).into());
                }
                children.remove(slot as usize);
            }
            Ok(())
        }

        async fn fetch_child(
            &self,
            kind: Collection,
            parent: EntityId,
            slot: u32,
        ) -> SyncResult<Record> {
            let inner = self.lock();
            inner
                .children
                .get(&(kind, parent))
                .and_then(|c| c.get(slot as usize))
                .cloned()
                .ok_or_else(|| RemoteFailure::new(format!("no child at slot {slot}")).into())
        }

        async fn insert_entity(&self, kind: Collection, record: &Record) -> SyncResult<EntityId> {
            let mut inner = self.lock();
            if inner.fail_mutations {
                return Err(RemoteFailure::new("mutation rejected").into());
            }
            let id = match record.id() {
                Some(id) if !id.is_root() => id,
                _ => {
                    inner.next_id += 1;
                    EntityId::new(inner.next_id)
                }
            };
            let mut stored = record.clone();
            if let Record::Generic(g) = &mut stored {
                g.id = id;
            }
            inner.entities.entry(kind).or_default().insert(id, stored);
            Ok(id)
        }

        async fn change_entity(&self, kind: Collection, record: &Record) -> SyncResult<()> {
            let mut inner = self.lock();
            if inner.fail_mutations {
                return Err(RemoteFailure::new("mutation rejected").into());
            }
            let id = record
                .id()
                .ok_or_else(|| RemoteFailure::new("record has no id"))?;
            let table = inner.entities.entry(kind).or_default();
            if !table.contains_key(&id) {
                return Err(RemoteFailure::new(format!("no such id {id}")).into());
            }
            table.insert(id, record.clone());
            Ok(())
        }

        async fn remove_entity(&self, kind: Collection, id: EntityId) -> SyncResult<()> {
            let mut inner = self.lock();
            if inner.fail_mutations {
                return Err(RemoteFailure::new("mutation rejected").into());
            }
            let removed = inner
                .entities
                .get_mut(&kind)
                .and_then(|table| table.remove(&id));
            if removed.is_none() {
                return Err(RemoteFailure::new(format!("no such id {id}")).into());
            }
            Ok(())
        }
    }
}
