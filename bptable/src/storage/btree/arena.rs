//! Slot arena holding every node of one tree.
//!
//! Nodes refer to each other by [`NodeId`] instead of pointers, so parent
//! back-links and the leaf chain never form ownership cycles. Released slots
//! go on a free list and are reused by later splits.

use crate::storage::btree::node::Node;

/// Stable handle to a node slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

impl NodeId {
    #[must_use]
    pub const fn new(index: usize) -> Self {
        Self(index)
    }

    #[must_use]
    pub const fn index(self) -> usize {
        self.0
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug)]
pub struct Arena<K, V> {
    slots: Vec<Option<Node<K, V>>>,
    free: Vec<NodeId>,
}

impl<K, V> Arena<K, V> {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
        }
    }

    /// Rebuild an arena from a slot dump, recovering the free list.
    #[must_use]
    pub fn from_slots(slots: Vec<Option<Node<K, V>>>) -> Self {
        let free = slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.is_none())
            .map(|(i, _)| NodeId(i))
            .rev()
            .collect();
        Self { slots, free }
    }

    pub fn alloc(&mut self, node: Node<K, V>) -> NodeId {
        if let Some(id) = self.free.pop() {
            self.slots[id.0] = Some(node);
            id
        } else {
            self.slots.push(Some(node));
            NodeId(self.slots.len() - 1)
        }
    }

    /// Free a slot, handing back the node it held.
    pub fn release(&mut self, id: NodeId) -> Option<Node<K, V>> {
        let node = self.slots.get_mut(id.0)?.take()?;
        self.free.push(id);
        Some(node)
    }

    #[must_use]
    pub fn get(&self, id: NodeId) -> Option<&Node<K, V>> {
        self.slots.get(id.0)?.as_ref()
    }

    pub fn get_mut(&mut self, id: NodeId) -> Option<&mut Node<K, V>> {
        self.slots.get_mut(id.0)?.as_mut()
    }

    /// Borrow two distinct live nodes mutably at once.
    pub fn pair_mut(&mut self, a: NodeId, b: NodeId) -> Option<(&mut Node<K, V>, &mut Node<K, V>)> {
        if a == b || a.0 >= self.slots.len() || b.0 >= self.slots.len() {
            return None;
        }
        let (first, second) = if a.0 < b.0 {
            let (lo, hi) = self.slots.split_at_mut(b.0);
            (&mut lo[a.0], &mut hi[0])
        } else {
            let (lo, hi) = self.slots.split_at_mut(a.0);
            (&mut hi[0], &mut lo[b.0])
        };
        Some((first.as_mut()?, second.as_mut()?))
    }

    /// Number of live nodes.
    #[must_use]
    pub fn live_count(&self) -> usize {
        self.slots.len() - self.free.len()
    }

    /// Every live node, in id order.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Node<K, V>> {
        self.slots.iter_mut().flatten()
    }

    /// All slots, live or free, in id order.
    pub fn slots(&self) -> impl Iterator<Item = (NodeId, Option<&Node<K, V>>)> {
        self.slots
            .iter()
            .enumerate()
            .map(|(i, slot)| (NodeId(i), slot.as_ref()))
    }

    #[must_use]
    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }
}

impl<K, V> Default for Arena<K, V> {
    fn default() -> Self {
        Self::new()
    }
}
