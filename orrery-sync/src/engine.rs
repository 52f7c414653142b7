//! Bulk reconciliation against the remote authority.
//!
//! A refresh walks every entity kind: enumerate `(id, modify time)`
//! pairs, fetch only what is new or newer, absorb per-item failures,
//! sweep out ids the server no longer reports, rebuild the object
//! containment tree, and fan out pipelined sub-collection fetches.
//! Transport and structural failures abort the whole refresh;
//! individual item failures are logged, reported through the progress
//! sink, and skip only that item.

use crate::error::{SyncError, SyncResult};
use crate::progress::{ProgressEvent, ProgressSink, ProgressState};
use crate::source::{FetchResult, RemoteSource};
use orrery_cache::{Cache, DescriptorRegistry, PendingList, VersionedStore};
use orrery_types::{
    BoardRecord, Collection, DescriptorRecord, EntityId, GenericRecord, ModifyTime, ObjectRecord,
    Record, SchemaId, WrongRecord,
};
use std::collections::{HashMap, HashSet};
use tracing::{debug, info, warn};

/// Configuration for the sync engine.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Client name reported in logs.
    pub client_name: String,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            client_name: "orrery".to_string(),
        }
    }
}

/// One absorbed per-item failure.
#[derive(Debug, Clone)]
pub struct SyncFailure {
    pub group: Collection,
    pub id: EntityId,
    pub reason: String,
}

/// Summary of one refresh.
#[derive(Debug, Clone, Default)]
pub struct SyncReport {
    /// Entities fetched and stored.
    pub fetched: usize,
    /// Entities removed (failed fetches and server-side deletions).
    pub removed: usize,
    /// Per-item failures that were absorbed.
    pub failures: Vec<SyncFailure>,
}

/// The bulk diff-and-fetch reconciliation algorithm.
#[derive(Debug, Default)]
pub struct SyncEngine {
    config: SyncConfig,
}

/// Simple kinds refreshed with the generic path, in refresh order.
const SIMPLE_KINDS: [Collection; 7] = [
    Collection::Categories,
    Collection::Designs,
    Collection::Components,
    Collection::Properties,
    Collection::Resources,
    Collection::Players,
    Collection::Features,
];

impl SyncEngine {
    /// Creates an engine with the given configuration.
    #[must_use]
    pub fn new(config: SyncConfig) -> Self {
        Self { config }
    }

    /// The engine configuration.
    #[must_use]
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Reconciles the whole cache against the remote authority.
    ///
    /// Not cancellable mid-batch; callers may only refrain from
    /// starting another refresh.
    pub async fn refresh(
        &self,
        cache: &mut Cache,
        source: &dyn RemoteSource,
        progress: &mut dyn ProgressSink,
    ) -> SyncResult<SyncReport> {
        info!(client = %self.config.client_name, "starting full refresh");
        let mut report = SyncReport::default();

        let fetched_objects = self
            .refresh_objects(cache, source, progress, &mut report)
            .await?;
        self.refresh_children(
            Collection::Orders,
            source,
            progress,
            &mut report,
            &fetched_objects,
            &mut cache.orders,
        )
        .await?;

        let fetched_boards = self
            .refresh_boards(cache, source, progress, &mut report)
            .await?;
        self.refresh_children(
            Collection::Messages,
            source,
            progress,
            &mut report,
            &fetched_boards,
            &mut cache.messages,
        )
        .await?;

        self.refresh_descriptors(
            Collection::OrderTypes,
            &mut cache.order_types,
            source,
            progress,
            &mut report,
        )
        .await?;
        self.refresh_descriptors(
            Collection::MessageTypes,
            &mut cache.message_types,
            source,
            progress,
            &mut report,
        )
        .await?;

        for kind in SIMPLE_KINDS {
            self.refresh_simple(kind, cache, source, progress, &mut report)
                .await?;
        }

        info!(
            fetched = report.fetched,
            removed = report.removed,
            failures = report.failures.len(),
            "refresh finished"
        );
        Ok(report)
    }

    // ── Objects ──────────────────────────────────────────────────

    /// Refreshes the object store. Returns the `(id, order count)` of
    /// every object fetched this round, whose order lists must be
    /// re-fetched in turn.
    async fn refresh_objects(
        &self,
        cache: &mut Cache,
        source: &dyn RemoteSource,
        progress: &mut dyn ProgressSink,
        report: &mut SyncReport,
    ) -> SyncResult<Vec<(EntityId, u32)>> {
        let group = Collection::Objects;
        progress.emit(ProgressEvent::new(group, ProgressState::Start, "Getting objects..."));

        let listing = source.enumerate(group).await?;
        let times: HashMap<EntityId, ModifyTime> = listing.iter().copied().collect();
        let to_fetch: Vec<EntityId> = listing
            .iter()
            .filter(|(id, time)| {
                cache
                    .objects
                    .timestamp_of(*id)
                    .map_or(true, |stored| *time > stored)
            })
            .map(|(id, _)| *id)
            .collect();

        progress.emit(ProgressEvent::new(
            group,
            ProgressState::ToDownload {
                todownload: to_fetch.len(),
            },
            format!("Have {} objects to get...", to_fetch.len()),
        ));

        let mut fetched = Vec::new();
        if !to_fetch.is_empty() {
            let results = fetch_with_progress(source, group, &to_fetch, progress).await?;
            for (id, result) in to_fetch.iter().zip(results) {
                match result {
                    Err(failure) => {
                        warn!(%id, %failure, "object fetch failed, dropping local copy");
                        if cache.objects.contains(*id) {
                            cache.remove_object(*id);
                            report.removed += 1;
                        }
                        report.failures.push(SyncFailure {
                            group,
                            id: *id,
                            reason: failure.reason,
                        });
                    }
                    Ok(record) => {
                        let object = ObjectRecord::try_from(record)?;
                        let time = times.get(id).copied().unwrap_or(ModifyTime::UNCHECKED);
                        let order_count = object.order_count;
                        cache.objects.put(*id, time, object)?;
                        fetched.push((*id, order_count));
                        report.fetched += 1;
                    }
                }
            }
        }

        self.sweep_deleted(cache, group, &times, report);
        rebuild_containment(cache)?;

        progress.emit(ProgressEvent::new(group, ProgressState::Finished, "Gotten all objects..."));
        Ok(fetched)
    }

    // ── Boards ───────────────────────────────────────────────────

    async fn refresh_boards(
        &self,
        cache: &mut Cache,
        source: &dyn RemoteSource,
        progress: &mut dyn ProgressSink,
        report: &mut SyncReport,
    ) -> SyncResult<Vec<(EntityId, u32)>> {
        let group = Collection::Boards;
        progress.emit(ProgressEvent::new(group, ProgressState::Start, "Getting boards..."));

        let listing = source.enumerate(group).await?;
        let times: HashMap<EntityId, ModifyTime> = listing.iter().copied().collect();
        let to_fetch: Vec<EntityId> = listing
            .iter()
            .filter(|(id, time)| {
                cache
                    .boards
                    .timestamp_of(*id)
                    .map_or(true, |stored| *time > stored)
            })
            .map(|(id, _)| *id)
            .collect();

        progress.emit(ProgressEvent::new(
            group,
            ProgressState::ToDownload {
                todownload: to_fetch.len(),
            },
            format!("Have {} boards to get...", to_fetch.len()),
        ));

        let mut fetched = Vec::new();
        if !to_fetch.is_empty() {
            let results = fetch_with_progress(source, group, &to_fetch, progress).await?;
            for (id, result) in to_fetch.iter().zip(results) {
                match result {
                    Err(failure) => {
                        warn!(%id, %failure, "board fetch failed, dropping local copy");
                        if cache.boards.contains(*id) {
                            cache.remove_board(*id);
                            report.removed += 1;
                        }
                        report.failures.push(SyncFailure {
                            group,
                            id: *id,
                            reason: failure.reason,
                        });
                    }
                    Ok(record) => {
                        let board = BoardRecord::try_from(record)?;
                        let time = times.get(id).copied().unwrap_or(ModifyTime::UNCHECKED);
                        let message_count = board.message_count;
                        cache.boards.put(*id, time, board)?;
                        fetched.push((*id, message_count));
                        report.fetched += 1;
                    }
                }
            }
        }

        self.sweep_deleted(cache, group, &times, report);

        progress.emit(ProgressEvent::new(group, ProgressState::Finished, "Gotten all boards..."));
        Ok(fetched)
    }

    /// Drops every locally-held id the enumeration no longer reports,
    /// together with its dependent sub-collection.
    fn sweep_deleted(
        &self,
        cache: &mut Cache,
        group: Collection,
        known: &HashMap<EntityId, ModifyTime>,
        report: &mut SyncReport,
    ) {
        let stale: Vec<EntityId> = match group {
            Collection::Objects => cache.objects.ids(),
            Collection::Boards => cache.boards.ids(),
            _ => return,
        }
        .into_iter()
        .filter(|id| !known.contains_key(id))
        .collect();

        for id in stale {
            debug!(%id, %group, "server no longer reports id, dropping");
            match group {
                Collection::Objects => cache.remove_object(id),
                Collection::Boards => cache.remove_board(id),
                _ => {}
            }
            report.removed += 1;
        }
    }

    // ── Sub-collections ──────────────────────────────────────────

    /// Re-fetches the sub-collections of every parent fetched this
    /// round, pipelined: all requests go out first, then exactly as
    /// many responses are drained in submission order.
    async fn refresh_children<V>(
        &self,
        kind: Collection,
        source: &dyn RemoteSource,
        progress: &mut dyn ProgressSink,
        report: &mut SyncReport,
        parents: &[(EntityId, u32)],
        lists: &mut HashMap<EntityId, PendingList<V>>,
    ) -> SyncResult<()>
    where
        V: TryFrom<Record, Error = WrongRecord> + Send,
    {
        if parents.is_empty() {
            return Ok(());
        }
        progress.emit(ProgressEvent::new(kind, ProgressState::Start, format!("Getting {kind}...")));

        source.set_pipelined(true).await?;
        let drained = self
            .drain_children(kind, source, progress, report, parents, lists)
            .await;
        let restored = source.set_pipelined(false).await;
        drained?;
        restored?;

        progress.emit(ProgressEvent::new(kind, ProgressState::Finished, format!("Gotten all {kind}...")));
        Ok(())
    }

    async fn drain_children<V>(
        &self,
        kind: Collection,
        source: &dyn RemoteSource,
        progress: &mut dyn ProgressSink,
        report: &mut SyncReport,
        parents: &[(EntityId, u32)],
        lists: &mut HashMap<EntityId, PendingList<V>>,
    ) -> SyncResult<()>
    where
        V: TryFrom<Record, Error = WrongRecord> + Send,
    {
        let mut awaiting = Vec::new();
        for (parent, count) in parents {
            if *count == 0 {
                lists.insert(*parent, PendingList::new());
                continue;
            }
            source.request_children(kind, *parent, 0..*count).await?;
            awaiting.push(*parent);
        }

        progress.emit(ProgressEvent::new(
            kind,
            ProgressState::ToDownload {
                todownload: awaiting.len(),
            },
            format!("Have {} {kind} lists to get...", awaiting.len()),
        ));

        for parent in awaiting {
            // Responses complete strictly in submission order.
            let batch = loop {
                if let Some(batch) = source.poll().await? {
                    break batch;
                }
            };
            match batch {
                Ok(records) => {
                    let mut list = PendingList::new();
                    for record in records {
                        list.push_confirmed(V::try_from(record)?);
                    }
                    debug!(%parent, %kind, items = list.len(), "stored sub-collection");
                    lists.insert(parent, list);
                    progress.emit(ProgressEvent::new(
                        kind,
                        ProgressState::Downloaded { amount: 1 },
                        format!("Got {kind} for id {parent}..."),
                    ));
                }
                Err(failure) => {
                    warn!(%parent, %kind, %failure, "sub-collection fetch failed, storing empty list");
                    lists.insert(parent, PendingList::new());
                    report.failures.push(SyncFailure {
                        group: kind,
                        id: parent,
                        reason: failure.reason,
                    });
                    progress.emit(ProgressEvent::new(
                        kind,
                        ProgressState::Failure,
                        format!("Get {kind} for id {parent} failed..."),
                    ));
                }
            }
        }
        Ok(())
    }

    // ── Descriptors ──────────────────────────────────────────────

    async fn refresh_descriptors(
        &self,
        kind: Collection,
        registry: &mut DescriptorRegistry,
        source: &dyn RemoteSource,
        progress: &mut dyn ProgressSink,
        report: &mut SyncReport,
    ) -> SyncResult<()> {
        progress.emit(ProgressEvent::new(kind, ProgressState::Start, format!("Getting {kind}...")));

        let listing = source.enumerate(kind).await?;
        let to_fetch: Vec<EntityId> = listing
            .iter()
            .filter(|(id, time)| {
                registry
                    .get(SchemaId::new(id.as_u32()))
                    .map_or(true, |d| *time > d.modify_time)
            })
            .map(|(id, _)| *id)
            .collect();

        progress.emit(ProgressEvent::new(
            kind,
            ProgressState::ToDownload {
                todownload: to_fetch.len(),
            },
            format!("Have {} {kind} to get...", to_fetch.len()),
        ));

        if !to_fetch.is_empty() {
            let results = fetch_with_progress(source, kind, &to_fetch, progress).await?;
            for (id, result) in to_fetch.iter().zip(results) {
                let schema = SchemaId::new(id.as_u32());
                match result {
                    Err(failure) => {
                        warn!(%schema, %kind, %failure, "descriptor fetch failed");
                        registry.remove(schema);
                        report.failures.push(SyncFailure {
                            group: kind,
                            id: *id,
                            reason: failure.reason,
                        });
                    }
                    Ok(record) => {
                        let descriptor = DescriptorRecord::try_from(record)?;
                        registry.register(descriptor)?;
                        report.fetched += 1;
                    }
                }
            }
        }

        let known: HashSet<SchemaId> = listing
            .iter()
            .map(|(id, _)| SchemaId::new(id.as_u32()))
            .collect();
        for schema in registry.ids() {
            if !known.contains(&schema) {
                registry.remove(schema);
                report.removed += 1;
            }
        }

        progress.emit(ProgressEvent::new(kind, ProgressState::Finished, format!("Gotten all {kind}...")));
        Ok(())
    }

    // ── Simple kinds ─────────────────────────────────────────────

    async fn refresh_simple(
        &self,
        kind: Collection,
        cache: &mut Cache,
        source: &dyn RemoteSource,
        progress: &mut dyn ProgressSink,
        report: &mut SyncReport,
    ) -> SyncResult<()> {
        progress.emit(ProgressEvent::new(kind, ProgressState::Start, format!("Getting {kind}...")));

        let listing = source.enumerate(kind).await?;
        let times: HashMap<EntityId, ModifyTime> = listing.iter().copied().collect();
        let to_fetch: Vec<EntityId> = {
            let store = simple_store(cache, kind)?;
            listing
                .iter()
                .filter(|(id, time)| {
                    store.timestamp_of(*id).map_or(true, |stored| *time > stored)
                })
                .map(|(id, _)| *id)
                .collect()
        };

        progress.emit(ProgressEvent::new(
            kind,
            ProgressState::ToDownload {
                todownload: to_fetch.len(),
            },
            format!("Have {} {kind} to get...", to_fetch.len()),
        ));

        if !to_fetch.is_empty() {
            let results = fetch_with_progress(source, kind, &to_fetch, progress).await?;
            for (id, result) in to_fetch.iter().zip(results) {
                match result {
                    Err(failure) => {
                        warn!(%id, %kind, %failure, "fetch failed, dropping local copy");
                        let store = simple_store_mut(cache, kind)?;
                        if store.remove(*id).is_some() {
                            report.removed += 1;
                        }
                        report.failures.push(SyncFailure {
                            group: kind,
                            id: *id,
                            reason: failure.reason,
                        });
                    }
                    Ok(record) => {
                        let value = GenericRecord::try_from(record)?;
                        let time = times.get(id).copied().unwrap_or(ModifyTime::UNCHECKED);
                        simple_store_mut(cache, kind)?.put(*id, time, value)?;
                        report.fetched += 1;
                    }
                }
            }
        }

        let store = simple_store_mut(cache, kind)?;
        for id in store.ids() {
            if !times.contains_key(&id) {
                store.remove(id);
                report.removed += 1;
            }
        }

        progress.emit(ProgressEvent::new(kind, ProgressState::Finished, format!("Gotten all {kind}...")));
        Ok(())
    }
}

/// Issues one batched fetch, narrating each arriving item through the
/// progress sink. A response that does not align with the request is a
/// structural failure.
async fn fetch_with_progress(
    source: &dyn RemoteSource,
    group: Collection,
    ids: &[EntityId],
    progress: &mut dyn ProgressSink,
) -> SyncResult<Vec<FetchResult>> {
    let results = {
        let mut on_item = |result: &FetchResult| match result {
            Ok(record) => {
                let id = record
                    .id()
                    .map(|i| i.to_string())
                    .unwrap_or_else(|| record.schema().to_string());
                progress.emit(ProgressEvent::new(
                    group,
                    ProgressState::Downloaded { amount: 1 },
                    format!("Got {group} with id {id}..."),
                ));
            }
            Err(_) => {
                progress.emit(ProgressEvent::new(
                    group,
                    ProgressState::Failure,
                    format!("Getting {group} failed..."),
                ));
            }
        };
        source.fetch(group, ids, &mut on_item).await?
    };
    if results.len() != ids.len() {
        return Err(SyncError::Transport(
            "fetch response does not align with request".into(),
        ));
    }
    Ok(results)
}

/// Rebuilds the parent/child containment tree from the root object,
/// setting back-references. A contained id missing from the store is
/// fatal.
fn rebuild_containment(cache: &mut Cache) -> SyncResult<()> {
    if !cache.objects.contains(EntityId::ROOT) {
        if cache.objects.is_empty() {
            return Ok(());
        }
        return Err(SyncError::MissingReference {
            parent: EntityId::ROOT,
            child: EntityId::ROOT,
        });
    }

    let mut stack = vec![EntityId::ROOT];
    let mut visited: HashSet<EntityId> = HashSet::from([EntityId::ROOT]);
    while let Some(id) = stack.pop() {
        let contains = match cache.objects.get(id) {
            Some(object) => object.contains.clone(),
            None => continue,
        };
        for child in contains {
            let Some(child_object) = cache.objects.get_mut(child) else {
                return Err(SyncError::MissingReference { parent: id, child });
            };
            child_object.parent = id;
            if visited.insert(child) {
                stack.push(child);
            }
        }
    }
    Ok(())
}

fn simple_store(cache: &Cache, kind: Collection) -> SyncResult<&VersionedStore<GenericRecord>> {
    match kind {
        Collection::Features => Ok(&cache.features),
        Collection::Resources => Ok(&cache.resources),
        Collection::Components => Ok(&cache.components),
        Collection::Properties => Ok(&cache.properties),
        Collection::Players => Ok(&cache.players),
        Collection::Categories => Ok(&cache.categories),
        Collection::Designs => Ok(&cache.designs),
        other => Err(SyncError::InvalidRequest(format!(
            "{other} is not a simple store"
        ))),
    }
}

fn simple_store_mut(
    cache: &mut Cache,
    kind: Collection,
) -> SyncResult<&mut VersionedStore<GenericRecord>> {
    match kind {
        Collection::Features => Ok(&mut cache.features),
        Collection::Resources => Ok(&mut cache.resources),
        Collection::Components => Ok(&mut cache.components),
        Collection::Properties => Ok(&mut cache.properties),
        Collection::Players => Ok(&mut cache.players),
        Collection::Categories => Ok(&mut cache.categories),
        Collection::Designs => Ok(&mut cache.designs),
        other => Err(SyncError::InvalidRequest(format!(
            "{other} is not a simple store"
        ))),
    }
}
