//! The two-phase optimistic mutation pipeline.
//!
//! Local edits travel in two phases. `apply` runs on the owning
//! application side: it validates the request, performs the local half
//! immediately for compound collections (so callers see the edit
//! before confirmation), and returns a dirty event. `reconcile` runs
//! on the network-owning side: it translates the dirty event into
//! remote mutation calls addressed by wire slot, re-fetches the
//! canonical server representation, rewrites the event to carry it,
//! and only then commits. A remote failure leaves the optimistic state
//! pending and never commits.
//!
//! Concurrent edits to one node are rejected at the source: a node
//! with an unconfirmed pending transition refuses a second change or
//! removal until the first resolves. Per-node resolution is strictly
//! FIFO.

use crate::error::{SyncError, SyncResult};
use crate::source::{FetchResult, RemoteSource};
use orrery_cache::{Cache, CacheError, PendingList, PendingState};
use orrery_types::{
    CacheEvent, Collection, EntityId, EventChange, GenericRecord, MessageRecord, MutationAction,
    NodeHandle, OrderRecord, Record,
};
use tracing::debug;

/// One requested local edit, built by the presentation layer.
#[derive(Debug, Clone)]
pub struct MutationRequest {
    pub collection: Collection,
    pub action: MutationAction,
    /// Entity id for simple collections, parent id for compound ones.
    pub id: EntityId,
    /// Anchor node for `create_before`/`create_after`, target node for
    /// single-node `change`.
    pub node: Option<NodeHandle>,
    /// Target nodes for a batched removal.
    pub nodes: Vec<NodeHandle>,
    /// The proposed value, where the action carries one.
    pub value: Option<Record>,
}

impl MutationRequest {
    fn new(collection: Collection, action: MutationAction, id: EntityId) -> Self {
        Self {
            collection,
            action,
            id,
            node: None,
            nodes: Vec::new(),
            value: None,
        }
    }

    /// Append a new value (simple collection or end of a compound
    /// list).
    pub fn create(collection: Collection, id: EntityId, value: Record) -> Self {
        Self {
            value: Some(value),
            ..Self::new(collection, MutationAction::Create, id)
        }
    }

    /// Splice a new value before `anchor`.
    pub fn create_before(
        collection: Collection,
        id: EntityId,
        anchor: NodeHandle,
        value: Record,
    ) -> Self {
        Self {
            node: Some(anchor),
            value: Some(value),
            ..Self::new(collection, MutationAction::CreateBefore, id)
        }
    }

    /// Splice a new value after `anchor`.
    pub fn create_after(
        collection: Collection,
        id: EntityId,
        anchor: NodeHandle,
        value: Record,
    ) -> Self {
        Self {
            node: Some(anchor),
            value: Some(value),
            ..Self::new(collection, MutationAction::CreateAfter, id)
        }
    }

    /// Replace a simple entity in place.
    pub fn change(collection: Collection, id: EntityId, value: Record) -> Self {
        Self {
            value: Some(value),
            ..Self::new(collection, MutationAction::Change, id)
        }
    }

    /// Replace one compound node's value.
    pub fn change_node(
        collection: Collection,
        id: EntityId,
        node: NodeHandle,
        value: Record,
    ) -> Self {
        Self {
            node: Some(node),
            value: Some(value),
            ..Self::new(collection, MutationAction::Change, id)
        }
    }

    /// Remove a simple entity.
    pub fn remove(collection: Collection, id: EntityId) -> Self {
        Self::new(collection, MutationAction::Remove, id)
    }

    /// Remove one or more compound nodes.
    pub fn remove_nodes(collection: Collection, id: EntityId, nodes: Vec<NodeHandle>) -> Self {
        Self {
            nodes,
            ..Self::new(collection, MutationAction::Remove, id)
        }
    }
}

/// Which node(s) an applied compound edit landed on.
enum Proposed {
    One(NodeHandle),
    Many(Vec<NodeHandle>),
}

/// The local-propose / remote-confirm protocol for user edits.
pub struct MutationPipeline;

impl MutationPipeline {
    /// Validates a request and performs its local half.
    ///
    /// Compound edits take effect immediately as pending state; the
    /// returned dirty event references the actual node(s) touched.
    /// Simple edits only validate here and take effect at commit.
    pub fn apply(cache: &mut Cache, request: MutationRequest) -> SyncResult<CacheEvent> {
        let MutationRequest {
            collection,
            action,
            id,
            node,
            nodes,
            value,
        } = request;

        if collection.is_read_only() {
            return Err(SyncError::InvalidRequest(format!(
                "collection {collection} is read-only"
            )));
        }
        if action.is_compound_only() && !collection.is_compound() {
            return Err(SyncError::InvalidRequest(format!(
                "action {action} requires a compound collection"
            )));
        }

        if collection.is_compound() {
            Self::apply_compound(cache, collection, action, id, node, nodes, value)
        } else {
            Self::apply_simple(cache, collection, action, id, value)
        }
    }

    fn apply_simple(
        cache: &mut Cache,
        collection: Collection,
        action: MutationAction,
        id: EntityId,
        value: Option<Record>,
    ) -> SyncResult<CacheEvent> {
        match action {
            MutationAction::Create | MutationAction::Change => {
                let value = value.ok_or_else(|| {
                    SyncError::InvalidRequest(format!("{action} requires a value"))
                })?;
                // Shape check now so the network side never sees a
                // malformed proposal.
                GenericRecord::try_from(value.clone())
                    .map_err(|e| SyncError::InvalidRequest(e.to_string()))?;
                Ok(CacheEvent::dirty(collection, action, id, EventChange::Value(value)))
            }
            MutationAction::Remove => {
                let store = match collection {
                    Collection::Categories => &cache.categories,
                    Collection::Designs => &cache.designs,
                    other => {
                        return Err(SyncError::InvalidRequest(format!(
                            "{other} is not a simple read-write collection"
                        )))
                    }
                };
                let current = store.get(id).ok_or_else(|| {
                    SyncError::InvalidRequest(format!("no {collection} with id {id}"))
                })?;
                Ok(CacheEvent::dirty(
                    collection,
                    action,
                    id,
                    EventChange::Value(Record::Generic(current.clone())),
                ))
            }
            MutationAction::CreateBefore | MutationAction::CreateAfter => Err(
                SyncError::InvalidRequest(format!("action {action} requires a compound collection")),
            ),
        }
    }

    fn apply_compound(
        cache: &mut Cache,
        collection: Collection,
        action: MutationAction,
        id: EntityId,
        node: Option<NodeHandle>,
        nodes: Vec<NodeHandle>,
        value: Option<Record>,
    ) -> SyncResult<CacheEvent> {
        let proposed = match collection {
            Collection::Orders => {
                let typed = value.clone().map(as_order).transpose()?;
                Self::propose(cache.orders_mut(id), action, node, nodes, typed)?
            }
            Collection::Messages => {
                let typed = value.clone().map(as_message).transpose()?;
                Self::propose(cache.messages_mut(id), action, node, nodes, typed)?
            }
            other => {
                return Err(SyncError::InvalidRequest(format!(
                    "{other} is not a compound collection"
                )))
            }
        };

        let change = match proposed {
            Proposed::One(node) => {
                let value = value.ok_or_else(|| {
                    SyncError::InvalidRequest(format!("{action} requires a value"))
                })?;
                EventChange::Node { node, value }
            }
            Proposed::Many(nodes) => EventChange::Nodes(nodes),
        };
        Ok(CacheEvent::dirty(collection, action, id, change))
    }

    /// The local half of a compound edit: splice a creating node or
    /// push pending state onto the affected node(s).
    fn propose<V>(
        list: &mut PendingList<V>,
        action: MutationAction,
        node: Option<NodeHandle>,
        nodes: Vec<NodeHandle>,
        value: Option<V>,
    ) -> SyncResult<Proposed> {
        match action {
            MutationAction::Create => {
                let value = value
                    .ok_or_else(|| SyncError::InvalidRequest("create requires a value".into()))?;
                Ok(Proposed::One(list.push_creating(value)))
            }
            MutationAction::CreateBefore | MutationAction::CreateAfter => {
                let anchor = node.ok_or_else(|| {
                    SyncError::InvalidRequest(format!("{action} requires an anchor node"))
                })?;
                let value = value
                    .ok_or_else(|| SyncError::InvalidRequest("create requires a value".into()))?;
                let spliced = if action == MutationAction::CreateBefore {
                    list.insert_creating_before(anchor, value)
                } else {
                    list.insert_creating_after(anchor, value)
                };
                spliced.map(Proposed::One).map_err(reject_unknown_node)
            }
            MutationAction::Change => {
                let target = node.ok_or_else(|| {
                    SyncError::InvalidRequest("change requires a target node".into())
                })?;
                Self::require_settled(list, target)?;
                let value = value
                    .ok_or_else(|| SyncError::InvalidRequest("change requires a value".into()))?;
                list.add_state(target, PendingState::Updating, Some(value))
                    .map_err(reject_unknown_node)?;
                Ok(Proposed::One(target))
            }
            MutationAction::Remove => {
                let targets = if nodes.is_empty() {
                    node.map(|n| vec![n]).unwrap_or_default()
                } else {
                    nodes
                };
                if targets.is_empty() {
                    return Err(SyncError::InvalidRequest(
                        "remove requires at least one node".into(),
                    ));
                }
                for target in &targets {
                    Self::require_settled(list, *target)?;
                }
                for target in &targets {
                    list.add_state(*target, PendingState::Removing, None)
                        .map_err(reject_unknown_node)?;
                }
                Ok(Proposed::Many(targets))
            }
        }
    }

    /// The single-outstanding-edit contract: a node with an
    /// unconfirmed transition cannot accept another.
    fn require_settled<V>(list: &PendingList<V>, node: NodeHandle) -> SyncResult<()> {
        let n = list.node(node).map_err(reject_unknown_node)?;
        if n.has_pending() {
            return Err(SyncError::InvalidRequest(format!(
                "node {node} already has an unconfirmed {} pending",
                n.last_state()
            )));
        }
        Ok(())
    }

    /// Commits a dirty event after remote confirmation, reclassifying
    /// it as an update.
    ///
    /// Compound edits resolve their pending state (promoting the
    /// confirmed value, or unlinking on removal); simple edits write
    /// or remove the versioned entry with the server-confirmed
    /// value and timestamp.
    pub fn commit(cache: &mut Cache, evt: CacheEvent) -> SyncResult<CacheEvent> {
        if !evt.is_dirty() {
            return Err(SyncError::InvalidRequest("event is already committed".into()));
        }
        if evt.collection.is_compound() {
            Self::commit_compound(cache, evt)
        } else {
            Self::commit_simple(cache, evt)
        }
    }

    fn commit_simple(cache: &mut Cache, evt: CacheEvent) -> SyncResult<CacheEvent> {
        let store = match evt.collection {
            Collection::Categories => &mut cache.categories,
            Collection::Designs => &mut cache.designs,
            other => {
                return Err(SyncError::InvalidRequest(format!(
                    "{other} is not a simple read-write collection"
                )))
            }
        };
        match evt.action {
            MutationAction::Create | MutationAction::Change => {
                let value = evt.change.value().ok_or_else(|| {
                    SyncError::InvalidRequest("commit requires the confirmed value".into())
                })?;
                let record = GenericRecord::try_from(value.clone())
                    .map_err(|e| SyncError::InvalidRequest(e.to_string()))?;
                store.put(record.id, record.modify_time, record)?;
            }
            MutationAction::Remove => {
                store.remove(evt.id);
            }
            other => {
                return Err(SyncError::InvalidRequest(format!(
                    "cannot commit a {other} on {}",
                    evt.collection
                )))
            }
        }
        debug!(event = %evt, "committed");
        Ok(evt.confirm())
    }

    fn commit_compound(cache: &mut Cache, evt: CacheEvent) -> SyncResult<CacheEvent> {
        match evt.collection {
            Collection::Orders => {
                let list = cache.orders.get_mut(&evt.id).ok_or_else(|| {
                    SyncError::InvalidRequest(format!("no order list for id {}", evt.id))
                })?;
                let typed = evt.change.value().cloned().map(as_order).transpose()?;
                let delta = Self::resolve(list, &evt.change, typed)?;
                if let Some(object) = cache.objects.get_mut(evt.id) {
                    object.order_count = object.order_count.saturating_add_signed(delta);
                }
            }
            Collection::Messages => {
                let list = cache.messages.get_mut(&evt.id).ok_or_else(|| {
                    SyncError::InvalidRequest(format!("no message list for id {}", evt.id))
                })?;
                let typed = evt.change.value().cloned().map(as_message).transpose()?;
                let delta = Self::resolve(list, &evt.change, typed)?;
                if let Some(board) = cache.boards.get_mut(evt.id) {
                    board.message_count = board.message_count.saturating_add_signed(delta);
                }
            }
            other => {
                return Err(SyncError::InvalidRequest(format!(
                    "{other} is not a compound collection"
                )))
            }
        }
        debug!(event = %evt, "committed");
        Ok(evt.confirm())
    }

    /// Pops pending state per the event's change, swapping in the
    /// canonical confirmed value. Returns how the parent's server-side
    /// item count moved.
    fn resolve<V>(
        list: &mut PendingList<V>,
        change: &EventChange,
        typed: Option<V>,
    ) -> SyncResult<i32> {
        match change {
            EventChange::Node { node, .. } => {
                if let Some(value) = typed {
                    list.update_pending(*node, value)?;
                }
                let popped = list.pop_state(*node)?;
                Ok(i32::from(popped == PendingState::Creating))
            }
            EventChange::Nodes(nodes) => {
                let mut removed = 0i32;
                for node in nodes {
                    if list.pop_state(*node)? == PendingState::Removing {
                        removed -= 1;
                    }
                }
                Ok(removed)
            }
            EventChange::Value(_) => Err(SyncError::InvalidRequest(
                "compound commit requires node references".into(),
            )),
        }
    }

    /// The remote half: pushes a dirty event to the remote authority,
    /// re-fetches the canonical representation of the affected item,
    /// rewrites the event to carry it, then commits.
    ///
    /// Any remote failure returns without committing; the local
    /// optimistic state stays pending and the caller decides whether
    /// to retry or roll back.
    pub async fn reconcile(
        source: &dyn RemoteSource,
        cache: &mut Cache,
        evt: CacheEvent,
    ) -> SyncResult<CacheEvent> {
        if !evt.is_dirty() {
            return Err(SyncError::InvalidRequest("event is already committed".into()));
        }
        if evt.collection.is_compound() {
            Self::reconcile_compound(source, cache, evt).await
        } else {
            Self::reconcile_simple(source, cache, evt).await
        }
    }

    async fn reconcile_compound(
        source: &dyn RemoteSource,
        cache: &mut Cache,
        mut evt: CacheEvent,
    ) -> SyncResult<CacheEvent> {
        let kind = evt.collection;
        match evt.action {
            MutationAction::Create | MutationAction::CreateBefore | MutationAction::CreateAfter => {
                let (node, value) = single_node_change(&evt)?;
                let slot = child_insertion_slot(cache, kind, evt.id, node)?;
                source.insert_child(kind, evt.id, Some(slot), &value).await?;
                let canonical = source.fetch_child(kind, evt.id, slot).await?;
                evt.change = EventChange::Node {
                    node,
                    value: canonical,
                };
                Self::commit(cache, evt)
            }
            MutationAction::Change => {
                let (node, value) = single_node_change(&evt)?;
                let slot = child_slot(cache, kind, evt.id, node)?;
                // The wire protocol replaces in place as remove+insert
                // at the same slot.
                source.remove_children(kind, evt.id, &[slot]).await?;
                source.insert_child(kind, evt.id, Some(slot), &value).await?;
                let canonical = source.fetch_child(kind, evt.id, slot).await?;
                evt.change = EventChange::Node {
                    node,
                    value: canonical,
                };
                Self::commit(cache, evt)
            }
            MutationAction::Remove => {
                let nodes = match &evt.change {
                    EventChange::Nodes(nodes) => nodes.clone(),
                    _ => {
                        return Err(SyncError::InvalidRequest(
                            "remove event must reference nodes".into(),
                        ))
                    }
                };
                let mut slots = Vec::with_capacity(nodes.len());
                for node in &nodes {
                    slots.push(child_slot(cache, kind, evt.id, *node)?);
                }
                source.remove_children(kind, evt.id, &slots).await?;
                Self::commit(cache, evt)
            }
        }
    }

    async fn reconcile_simple(
        source: &dyn RemoteSource,
        cache: &mut Cache,
        mut evt: CacheEvent,
    ) -> SyncResult<CacheEvent> {
        let kind = evt.collection;
        match evt.action {
            MutationAction::Create => {
                let value = required_value(&evt)?;
                let id = source.insert_entity(kind, &value).await?;
                let canonical = fetch_single(source, kind, id).await?;
                evt.id = id;
                evt.change = EventChange::Value(canonical);
                Self::commit(cache, evt)
            }
            MutationAction::Change => {
                let value = required_value(&evt)?;
                source.change_entity(kind, &value).await?;
                let canonical = fetch_single(source, kind, evt.id).await?;
                evt.change = EventChange::Value(canonical);
                Self::commit(cache, evt)
            }
            MutationAction::Remove => {
                source.remove_entity(kind, evt.id).await?;
                Self::commit(cache, evt)
            }
            other => Err(SyncError::InvalidRequest(format!(
                "cannot reconcile a {other} on {kind}"
            ))),
        }
    }
}

fn as_order(value: Record) -> SyncResult<OrderRecord> {
    OrderRecord::try_from(value).map_err(|e| SyncError::InvalidRequest(e.to_string()))
}

fn as_message(value: Record) -> SyncResult<MessageRecord> {
    MessageRecord::try_from(value).map_err(|e| SyncError::InvalidRequest(e.to_string()))
}

fn reject_unknown_node(e: CacheError) -> SyncError {
    match e {
        CacheError::UnknownNode(node) => {
            SyncError::InvalidRequest(format!("node {node} is not in this list"))
        }
        other => SyncError::Cache(other),
    }
}

fn single_node_change(evt: &CacheEvent) -> SyncResult<(NodeHandle, Record)> {
    match &evt.change {
        EventChange::Node { node, value } => Ok((*node, value.clone())),
        _ => Err(SyncError::InvalidRequest(
            "event must reference a single node".into(),
        )),
    }
}

/// Fetches the canonical server representation of one simple entity.
async fn fetch_single(
    source: &dyn RemoteSource,
    kind: Collection,
    id: EntityId,
) -> SyncResult<Record> {
    let mut on_item = |_: &FetchResult| {};
    let results = source.fetch(kind, &[id], &mut on_item).await?;
    match results.into_iter().next() {
        Some(Ok(record)) => Ok(record),
        Some(Err(failure)) => Err(SyncError::Remote(failure)),
        None => Err(SyncError::Transport("empty fetch response".into())),
    }
}

fn required_value(evt: &CacheEvent) -> SyncResult<Record> {
    evt.change
        .value()
        .cloned()
        .ok_or_else(|| SyncError::InvalidRequest("event carries no value".into()))
}

fn child_slot(cache: &Cache, kind: Collection, parent: EntityId, node: NodeHandle) -> SyncResult<u32> {
    let slot = match kind {
        Collection::Orders => cache
            .orders
            .get(&parent)
            .ok_or_else(|| SyncError::InvalidRequest(format!("no order list for id {parent}")))?
            .slot(node)?,
        Collection::Messages => cache
            .messages
            .get(&parent)
            .ok_or_else(|| SyncError::InvalidRequest(format!("no message list for id {parent}")))?
            .slot(node)?,
        other => {
            return Err(SyncError::InvalidRequest(format!(
                "{other} is not a compound collection"
            )))
        }
    };
    let slot = slot.ok_or_else(|| {
        SyncError::InvalidRequest(format!("node {node} is not server-visible yet"))
    })?;
    Ok(slot as u32)
}

fn child_insertion_slot(
    cache: &Cache,
    kind: Collection,
    parent: EntityId,
    node: NodeHandle,
) -> SyncResult<u32> {
    let slot = match kind {
        Collection::Orders => cache
            .orders
            .get(&parent)
            .ok_or_else(|| SyncError::InvalidRequest(format!("no order list for id {parent}")))?
            .insertion_slot(node)?,
        Collection::Messages => cache
            .messages
            .get(&parent)
            .ok_or_else(|| SyncError::InvalidRequest(format!("no message list for id {parent}")))?
            .insertion_slot(node)?,
        other => {
            return Err(SyncError::InvalidRequest(format!(
                "{other} is not a compound collection"
            )))
        }
    };
    Ok(slot as u32)
}
