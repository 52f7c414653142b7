//! Ordered per-parent sub-collections with optimistic pending state.
//!
//! A `PendingList` mirrors one parent's slot-addressed sub-collection
//! (a unit's order queue, a board's messages). Each node carries the
//! last server-confirmed value plus a FIFO queue of locally proposed,
//! unconfirmed transitions. The list is a doubly linked chain stored
//! in an arena and addressed by generational [`NodeHandle`]s, so
//! handles stay valid across splices and a freed slot can never be
//! confused with its successor.
//!
//! Two positions exist for every node: `index` counts every node in
//! the chain, `slot` counts only nodes the remote authority can see
//! (everything not still in `creating`). `slot` is what goes on the
//! wire.

use crate::error::{CacheError, CacheResult};
use orrery_types::NodeHandle;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;

/// Lifecycle state of a pending transition.
///
/// Legal transitions: `creating -> idle` (confirm), `idle -> updating
/// -> idle` (edit, confirm), `idle -> removing -> removed` (remove,
/// confirm, unlink). `removed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PendingState {
    /// Spliced locally, not yet visible to the remote authority.
    Creating,
    /// At rest; the confirmed value is authoritative.
    Idle,
    /// A replacement value awaits confirmation.
    Updating,
    /// Removal awaits confirmation.
    Removing,
    /// Confirmed removed and unlinked. Terminal.
    Removed,
}

impl PendingState {
    /// Stable lowercase name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            PendingState::Creating => "creating",
            PendingState::Idle => "idle",
            PendingState::Updating => "updating",
            PendingState::Removing => "removing",
            PendingState::Removed => "removed",
        }
    }
}

impl fmt::Display for PendingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One element of a [`PendingList`].
#[derive(Debug, Clone)]
pub struct PendingNode<V> {
    /// Value as last confirmed by the remote authority. `None` until
    /// the node's creation is confirmed.
    confirmed: Option<V>,
    /// Locally proposed transitions, resolved strictly FIFO.
    queue: VecDeque<(PendingState, Option<V>)>,
    prev: Option<NodeHandle>,
    next: Option<NodeHandle>,
}

impl<V> PendingNode<V> {
    fn new(confirmed: Option<V>) -> Self {
        Self {
            confirmed,
            queue: VecDeque::new(),
            prev: None,
            next: None,
        }
    }

    /// The server-confirmed value, if the node was ever confirmed.
    pub fn confirmed(&self) -> Option<&V> {
        self.confirmed.as_ref()
    }

    /// The oldest unresolved transition, `Idle` when nothing pends.
    #[must_use]
    pub fn current_state(&self) -> PendingState {
        self.queue.front().map_or(PendingState::Idle, |(s, _)| *s)
    }

    /// The newest queued transition, `Idle` when nothing pends.
    #[must_use]
    pub fn last_state(&self) -> PendingState {
        self.queue.back().map_or(PendingState::Idle, |(s, _)| *s)
    }

    /// The value callers should display: the most recent non-empty
    /// pending value, else the confirmed value.
    pub fn current_value(&self) -> Option<&V> {
        self.queue
            .iter()
            .rev()
            .find_map(|(_, v)| v.as_ref())
            .or(self.confirmed.as_ref())
    }

    /// Whether any transition is awaiting confirmation.
    #[must_use]
    pub fn has_pending(&self) -> bool {
        !self.queue.is_empty()
    }
}

#[derive(Debug, Clone)]
struct Slot<V> {
    generation: u32,
    node: Option<PendingNode<V>>,
}

/// Doubly linked ordered sequence of [`PendingNode`]s backed by an
/// arena with a free list.
#[derive(Debug, Clone)]
pub struct PendingList<V> {
    slots: Vec<Slot<V>>,
    free: Vec<u32>,
    head: Option<NodeHandle>,
    tail: Option<NodeHandle>,
    len: usize,
}

impl<V> Default for PendingList<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> PendingList<V> {
    /// Creates an empty list.
    #[must_use]
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            head: None,
            tail: None,
            len: 0,
        }
    }

    /// Number of linked nodes, including ones still in `creating`.
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the chain is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// First node of the chain.
    #[must_use]
    pub fn first(&self) -> Option<NodeHandle> {
        self.head
    }

    /// Last node of the chain.
    #[must_use]
    pub fn last(&self) -> Option<NodeHandle> {
        self.tail
    }

    /// Whether `handle` resolves to a live node.
    #[must_use]
    pub fn contains(&self, handle: NodeHandle) -> bool {
        self.node(handle).is_ok()
    }

    /// Borrows the node behind a handle.
    pub fn node(&self, handle: NodeHandle) -> CacheResult<&PendingNode<V>> {
        self.slots
            .get(handle.index as usize)
            .filter(|slot| slot.generation == handle.generation)
            .and_then(|slot| slot.node.as_ref())
            .ok_or(CacheError::UnknownNode(handle))
    }

    fn node_mut(&mut self, handle: NodeHandle) -> CacheResult<&mut PendingNode<V>> {
        self.slots
            .get_mut(handle.index as usize)
            .filter(|slot| slot.generation == handle.generation)
            .and_then(|slot| slot.node.as_mut())
            .ok_or(CacheError::UnknownNode(handle))
    }

    // ── Construction / splicing ──────────────────────────────────

    /// Appends an already-confirmed node (the bulk-sync path: every
    /// retrieved sub-item arrives wrapped as a fresh idle node).
    pub fn push_confirmed(&mut self, value: V) -> NodeHandle {
        let handle = self.alloc(PendingNode::new(Some(value)));
        self.splice(self.tail, None, handle);
        handle
    }

    /// Appends a node in `creating` state carrying the proposed value.
    pub fn push_creating(&mut self, value: V) -> NodeHandle {
        let mut node = PendingNode::new(None);
        node.queue.push_back((PendingState::Creating, Some(value)));
        let handle = self.alloc(node);
        self.splice(self.tail, None, handle);
        handle
    }

    /// Splices a node in `creating` state after `anchor`.
    ///
    /// If the anchor is itself no longer cleanly linked, the splice
    /// resolves through the anchor's remembered neighbours instead.
    pub fn insert_creating_after(&mut self, anchor: NodeHandle, value: V) -> CacheResult<NodeHandle> {
        let anchor_node = self.node(anchor)?;
        let (before, after) = if self.is_linked(anchor, anchor_node) {
            (Some(anchor), anchor_node.next)
        } else {
            let next = anchor_node.next.ok_or(CacheError::UnknownNode(anchor))?;
            (self.node(next)?.prev, Some(next))
        };

        let mut node = PendingNode::new(None);
        node.queue.push_back((PendingState::Creating, Some(value)));
        let handle = self.alloc(node);
        self.splice(before, after, handle);
        Ok(handle)
    }

    /// Splices a node in `creating` state before `anchor`.
    pub fn insert_creating_before(&mut self, anchor: NodeHandle, value: V) -> CacheResult<NodeHandle> {
        let anchor_node = self.node(anchor)?;
        let (before, after) = if self.is_linked(anchor, anchor_node) {
            (anchor_node.prev, Some(anchor))
        } else {
            let prev = anchor_node.prev.ok_or(CacheError::UnknownNode(anchor))?;
            (Some(prev), self.node(prev)?.next)
        };

        let mut node = PendingNode::new(None);
        node.queue.push_back((PendingState::Creating, Some(value)));
        let handle = self.alloc(node);
        self.splice(before, after, handle);
        Ok(handle)
    }

    // ── Pending-state machine ────────────────────────────────────

    /// Queues a proposed transition onto a node.
    ///
    /// Fails with [`CacheError::NodeRemoving`] once the node's last
    /// queued state is `removing`; only `updating` and `removing` may
    /// be queued, and only on a node whose last effective state is
    /// `idle` (one outstanding transition at a time, resolved FIFO).
    pub fn add_state(
        &mut self,
        handle: NodeHandle,
        state: PendingState,
        value: Option<V>,
    ) -> CacheResult<()> {
        let node = self.node_mut(handle)?;
        let last = node.last_state();

        if matches!(last, PendingState::Removing | PendingState::Removed) {
            return Err(CacheError::NodeRemoving(handle));
        }
        let legal = matches!(state, PendingState::Updating | PendingState::Removing)
            && last == PendingState::Idle
            && node.confirmed.is_some();
        if !legal {
            return Err(CacheError::IllegalTransition {
                node: handle,
                from: last,
                to: state,
            });
        }
        if state == PendingState::Updating && value.is_none() {
            return Err(CacheError::MissingValue(handle, state));
        }

        node.queue.push_back((state, value));
        Ok(())
    }

    /// Resolves the oldest pending transition on a node.
    ///
    /// Popping `creating` or `updating` promotes the proposed value to
    /// the confirmed value; popping `removing` physically unlinks the
    /// node and retires its handle. Returns the popped state.
    pub fn pop_state(&mut self, handle: NodeHandle) -> CacheResult<PendingState> {
        let node = self.node_mut(handle)?;
        let (state, value) = node
            .queue
            .pop_front()
            .ok_or(CacheError::EmptyQueue(handle))?;

        match state {
            PendingState::Creating | PendingState::Updating => {
                if let Some(value) = value {
                    node.confirmed = Some(value);
                }
            }
            PendingState::Removing => {
                self.unlink(handle)?;
            }
            PendingState::Idle | PendingState::Removed => {}
        }
        Ok(state)
    }

    /// Rewrites the value of the oldest pending transition with the
    /// canonical server representation (used when the remote authority
    /// echoes back the accepted item).
    pub fn update_pending(&mut self, handle: NodeHandle, value: V) -> CacheResult<()> {
        let node = self.node_mut(handle)?;
        match node.queue.front_mut() {
            Some((_, slot)) => {
                *slot = Some(value);
                Ok(())
            }
            None => Err(CacheError::EmptyQueue(handle)),
        }
    }

    /// The display value for a node (latest pending, else confirmed).
    pub fn current_value(&self, handle: NodeHandle) -> CacheResult<Option<&V>> {
        Ok(self.node(handle)?.current_value())
    }

    /// The confirmed value for a node.
    pub fn confirmed_value(&self, handle: NodeHandle) -> CacheResult<Option<&V>> {
        Ok(self.node(handle)?.confirmed())
    }

    /// The oldest unresolved state for a node.
    pub fn current_state(&self, handle: NodeHandle) -> CacheResult<PendingState> {
        Ok(self.node(handle)?.current_state())
    }

    /// The newest queued state for a node.
    pub fn last_state(&self, handle: NodeHandle) -> CacheResult<PendingState> {
        Ok(self.node(handle)?.last_state())
    }

    // ── Positions ────────────────────────────────────────────────

    /// Absolute position of a node, counting every node in the chain.
    pub fn index(&self, handle: NodeHandle) -> CacheResult<usize> {
        self.node(handle)?;
        for (i, (h, _)) in self.iter().enumerate() {
            if h == handle {
                return Ok(i);
            }
        }
        Err(CacheError::UnknownNode(handle))
    }

    /// Wire position of a node, counting only nodes visible to the
    /// remote authority. `None` for a node still in `creating` (it has
    /// no server-side slot yet).
    pub fn slot(&self, handle: NodeHandle) -> CacheResult<Option<usize>> {
        self.node(handle)?;
        let mut slot = 0usize;
        for (h, node) in self.iter() {
            if h == handle {
                if node.current_state() == PendingState::Creating {
                    return Ok(None);
                }
                return Ok(Some(slot));
            }
            if node.current_state() != PendingState::Creating {
                slot += 1;
            }
        }
        Err(CacheError::UnknownNode(handle))
    }

    /// The wire slot a node in `creating` will occupy once confirmed:
    /// the number of server-visible nodes strictly before it. Equals
    /// [`slot`](Self::slot) for a node that is already visible.
    pub fn insertion_slot(&self, handle: NodeHandle) -> CacheResult<usize> {
        self.node(handle)?;
        let mut slot = 0usize;
        for (h, node) in self.iter() {
            if h == handle {
                return Ok(slot);
            }
            if node.current_state() != PendingState::Creating {
                slot += 1;
            }
        }
        Err(CacheError::UnknownNode(handle))
    }

    /// First node whose confirmed value matches the predicate.
    pub fn find(&self, mut predicate: impl FnMut(&V) -> bool) -> Option<NodeHandle> {
        self.iter()
            .find(|(_, node)| node.confirmed().is_some_and(|v| predicate(v)))
            .map(|(h, _)| h)
    }

    /// Iterates the chain in order.
    pub fn iter(&self) -> ChainIter<'_, V> {
        ChainIter {
            list: self,
            cursor: self.head,
        }
    }

    /// Confirmed values in chain order (never-confirmed nodes are
    /// skipped).
    pub fn confirmed_values(&self) -> impl Iterator<Item = &V> {
        self.iter().filter_map(|(_, node)| node.confirmed())
    }

    // ── Arena internals ──────────────────────────────────────────

    fn alloc(&mut self, node: PendingNode<V>) -> NodeHandle {
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.node = Some(node);
            NodeHandle::new(index, slot.generation)
        } else {
            let index = self.slots.len() as u32;
            self.slots.push(Slot {
                generation: 0,
                node: Some(node),
            });
            NodeHandle::new(index, 0)
        }
    }

    /// Whether the chain's links agree that `handle` is a member.
    fn is_linked(&self, handle: NodeHandle, node: &PendingNode<V>) -> bool {
        let prev_ok = match node.prev {
            Some(p) => self
                .node(p)
                .map(|n| n.next == Some(handle))
                .unwrap_or(false),
            None => self.head == Some(handle),
        };
        let next_ok = match node.next {
            Some(n) => self
                .node(n)
                .map(|n| n.prev == Some(handle))
                .unwrap_or(false),
            None => self.tail == Some(handle),
        };
        prev_ok && next_ok
    }

    /// Links `handle` between `before` and `after`.
    fn splice(&mut self, before: Option<NodeHandle>, after: Option<NodeHandle>, handle: NodeHandle) {
        if let Some(b) = before {
            if let Ok(node) = self.node_mut(b) {
                node.next = Some(handle);
            }
        } else {
            self.head = Some(handle);
        }
        if let Some(a) = after {
            if let Ok(node) = self.node_mut(a) {
                node.prev = Some(handle);
            }
        } else {
            self.tail = Some(handle);
        }
        if let Ok(node) = self.node_mut(handle) {
            node.prev = before;
            node.next = after;
        }
        self.len += 1;
    }

    /// Unlinks a node and retires its slot.
    fn unlink(&mut self, handle: NodeHandle) -> CacheResult<()> {
        let (prev, next) = {
            let node = self.node(handle)?;
            (node.prev, node.next)
        };
        match prev {
            Some(p) => self.node_mut(p)?.next = next,
            None => self.head = next,
        }
        match next {
            Some(n) => self.node_mut(n)?.prev = prev,
            None => self.tail = prev,
        }

        let slot = &mut self.slots[handle.index as usize];
        slot.node = None;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(handle.index);
        self.len -= 1;
        Ok(())
    }
}

/// Iterator over a chain in list order.
pub struct ChainIter<'a, V> {
    list: &'a PendingList<V>,
    cursor: Option<NodeHandle>,
}

impl<'a, V> Iterator for ChainIter<'a, V> {
    type Item = (NodeHandle, &'a PendingNode<V>);

    fn next(&mut self) -> Option<Self::Item> {
        let handle = self.cursor?;
        let node = self.list.node(handle).ok()?;
        self.cursor = node.next;
        Some((handle, node))
    }
}
