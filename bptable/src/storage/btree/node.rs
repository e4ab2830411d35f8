//! B+Tree node types.
//!
//! The tree has two kinds of node:
//! - Internal nodes: store separator keys and child ids
//! - Leaf nodes: store key-value pairs, singly linked for range scans
//!
//! Separator routing is left-inclusive: a key equal to a separator belongs to
//! the child on the separator's right.

use crate::storage::btree::arena::NodeId;

/// Smallest usable order. With order 2 an internal split would leave a node
/// with no separators at all.
pub const MIN_ORDER: usize = 3;

/// Order used when none is given.
pub const DEFAULT_ORDER: usize = 4;

/// Tree order `m`: the maximum number of children of an internal node.
///
/// A node overflows above `m - 1` keys; a non-root node underflows below
/// `m / 2` keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Order(usize);

impl Order {
    /// Returns `None` for orders below [`MIN_ORDER`].
    #[must_use]
    pub const fn new(order: usize) -> Option<Self> {
        if order < MIN_ORDER {
            None
        } else {
            Some(Self(order))
        }
    }

    #[must_use]
    pub const fn get(self) -> usize {
        self.0
    }

    #[must_use]
    pub const fn max_keys(self) -> usize {
        self.0 - 1
    }

    #[must_use]
    pub const fn min_keys(self) -> usize {
        self.0 / 2
    }

    #[must_use]
    pub const fn is_overflowing(self, key_count: usize) -> bool {
        key_count > self.max_keys()
    }

    #[must_use]
    pub const fn is_underflowing(self, key_count: usize) -> bool {
        key_count < self.min_keys()
    }

    /// Whether a sibling holding `key_count` keys can give one away and still
    /// meet the minimum.
    #[must_use]
    pub const fn can_lend(self, key_count: usize) -> bool {
        key_count > self.min_keys()
    }
}

impl Default for Order {
    fn default() -> Self {
        Self(DEFAULT_ORDER)
    }
}

/// Which neighbour of a node a borrow or merge involves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Left,
    Right,
}

/// A tree node.
#[derive(Debug)]
pub enum Node<K, V> {
    Leaf(LeafNode<K, V>),
    Internal(InternalNode<K>),
}

impl<K, V> Node<K, V> {
    #[must_use]
    pub const fn is_leaf(&self) -> bool {
        matches!(self, Self::Leaf(_))
    }

    #[must_use]
    pub fn keys(&self) -> &[K] {
        match self {
            Self::Leaf(leaf) => &leaf.keys,
            Self::Internal(internal) => &internal.keys,
        }
    }

    #[must_use]
    pub fn key_count(&self) -> usize {
        self.keys().len()
    }

    /// Child ids, empty for a leaf.
    #[must_use]
    pub fn children(&self) -> &[NodeId] {
        match self {
            Self::Leaf(_) => &[],
            Self::Internal(internal) => &internal.children,
        }
    }

    /// Next leaf in the chain, always `None` for an internal node.
    #[must_use]
    pub const fn next_leaf(&self) -> Option<NodeId> {
        match self {
            Self::Leaf(leaf) => leaf.next_leaf,
            Self::Internal(_) => None,
        }
    }

    #[must_use]
    pub const fn parent(&self) -> Option<NodeId> {
        match self {
            Self::Leaf(leaf) => leaf.parent,
            Self::Internal(internal) => internal.parent,
        }
    }

    pub const fn set_parent(&mut self, parent: Option<NodeId>) {
        match self {
            Self::Leaf(leaf) => leaf.parent = parent,
            Self::Internal(internal) => internal.parent = parent,
        }
    }

    #[must_use]
    pub const fn as_leaf(&self) -> Option<&LeafNode<K, V>> {
        match self {
            Self::Leaf(leaf) => Some(leaf),
            Self::Internal(_) => None,
        }
    }

    #[must_use]
    pub const fn as_internal(&self) -> Option<&InternalNode<K>> {
        match self {
            Self::Leaf(_) => None,
            Self::Internal(internal) => Some(internal),
        }
    }
}

/// An internal (non-leaf) node.
///
/// Stores N separator keys and N+1 children.
/// `children[0]` holds keys < `keys[0]`,
/// `children[i+1]` holds keys in `[keys[i], keys[i+1])`,
/// the last child holds keys >= the last separator.
#[derive(Debug)]
pub struct InternalNode<K> {
    /// Separators in ascending order.
    pub keys: Vec<K>,
    /// `children.len()` == `keys.len()` + 1
    pub children: Vec<NodeId>,
    pub parent: Option<NodeId>,
}

impl<K: Ord> InternalNode<K> {
    #[must_use]
    pub fn with_children(parent: Option<NodeId>, left: NodeId, key: K, right: NodeId) -> Self {
        Self {
            keys: vec![key],
            children: vec![left, right],
            parent,
        }
    }

    /// Index of the child whose range contains `key`.
    #[must_use]
    pub fn find_child_index(&self, key: &K) -> usize {
        // Number of separators <= key; equal keys route right.
        self.keys.partition_point(|separator| separator <= key)
    }

    #[must_use]
    pub fn find_child(&self, key: &K) -> NodeId {
        self.children[self.find_child_index(key)]
    }

    /// Position of `child` among this node's children.
    #[must_use]
    pub fn position_of(&self, child: NodeId) -> Option<usize> {
        self.children.iter().position(|&c| c == child)
    }

    /// Insert a separator with its right child.
    ///
    /// The caller is responsible for pointing `child` at this node. Returns
    /// the promoted key and new right sibling if the node split.
    pub fn insert(&mut self, key: K, child: NodeId, order: Order) -> Option<(K, Self)> {
        let idx = self.keys.partition_point(|k| k < &key);
        self.keys.insert(idx, key);
        self.children.insert(idx + 1, child);

        if order.is_overflowing(self.keys.len()) {
            return Some(self.split());
        }
        None
    }

    /// Split the node, returning the median key and the new right node.
    ///
    /// The median moves up to the parent and is kept in neither half.
    /// Children of the returned node still name this node as their parent.
    #[must_use]
    pub fn split(&mut self) -> (K, Self) {
        let mid = self.keys.len() / 2;

        // Right node gets keys and children after median
        let right_keys: Vec<K> = self.keys.drain(mid + 1..).collect();
        let right_children: Vec<NodeId> = self.children.drain(mid + 1..).collect();

        let median_key = self.keys.remove(mid);

        let right_node = Self {
            keys: right_keys,
            children: right_children,
            parent: self.parent,
        };

        (median_key, right_node)
    }

    /// Remove separator `key_index` and the child to its right.
    ///
    /// Returns whether the node is now underfull.
    pub fn delete_key(&mut self, key_index: usize, order: Order) -> bool {
        if key_index >= self.keys.len() {
            return false;
        }

        self.keys.remove(key_index);
        self.children.remove(key_index + 1);

        order.is_underflowing(self.keys.len())
    }

    /// Rotate one key/child pair from `sibling` through the parent.
    ///
    /// `separator` is the parent key between the two nodes; it moves down into
    /// this node. Returns the sibling key that replaces it in the parent and
    /// the child that moved over, which must be re-parented by the caller.
    pub fn borrow_from_sibling(
        &mut self,
        sibling: &mut Self,
        side: Side,
        separator: K,
    ) -> Option<(K, NodeId)> {
        if sibling.keys.is_empty() {
            return None;
        }
        match side {
            Side::Left => {
                let child = sibling.children.pop()?;
                let up_key = sibling.keys.pop()?;
                self.keys.insert(0, separator);
                self.children.insert(0, child);
                Some((up_key, child))
            }
            Side::Right => {
                let child = sibling.children.remove(0);
                let up_key = sibling.keys.remove(0);
                self.keys.push(separator);
                self.children.push(child);
                Some((up_key, child))
            }
        }
    }

    /// Merge with a sibling, pulling `separator` down between the two halves.
    ///
    /// With [`Side::Left`] the left sibling absorbs this node; with
    /// [`Side::Right`] this node absorbs the right sibling. Returns the
    /// children that changed owner.
    pub fn merge_with_sibling(&mut self, sibling: &mut Self, side: Side, separator: K) -> Vec<NodeId> {
        let (survivor, absorbed) = match side {
            Side::Left => (sibling, self),
            Side::Right => (self, sibling),
        };
        survivor.keys.push(separator);
        survivor.keys.append(&mut absorbed.keys);
        let moved: Vec<NodeId> = absorbed.children.drain(..).collect();
        survivor.children.extend_from_slice(&moved);
        moved
    }
}

/// A leaf node.
///
/// Stores key-value pairs and the link to the next leaf.
#[derive(Debug)]
pub struct LeafNode<K, V> {
    /// Keys in ascending order.
    pub keys: Vec<K>,
    /// `values[i]` belongs to `keys[i]`.
    pub values: Vec<V>,
    pub parent: Option<NodeId>,
    pub next_leaf: Option<NodeId>,
}

/// Outcome of [`LeafNode::insert`].
#[derive(Debug)]
pub enum LeafInsert<K, V> {
    /// The key was already present; its value was overwritten.
    Updated,
    /// A new pair was added without overflowing.
    Inserted,
    /// A new pair was added and the leaf split off this right sibling.
    Split(LeafNode<K, V>),
}

/// A pair removed by [`LeafNode::delete`].
#[derive(Debug)]
pub struct Removal<V> {
    pub value: V,
    /// Whether the leaf now holds fewer than the minimum number of keys.
    pub underflow: bool,
}

impl<K: Ord, V> LeafNode<K, V> {
    #[must_use]
    pub const fn new(parent: Option<NodeId>) -> Self {
        Self {
            keys: Vec::new(),
            values: Vec::new(),
            parent,
            next_leaf: None,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Find the index where a key should be inserted (or exists).
    pub fn find_index(&self, key: &K) -> Result<usize, usize> {
        self.keys.binary_search(key)
    }

    /// Insert or overwrite a pair, splitting if the leaf overflows.
    pub fn insert(&mut self, key: K, value: V, order: Order) -> LeafInsert<K, V> {
        match self.find_index(&key) {
            Ok(i) => {
                self.values[i] = value;
                LeafInsert::Updated
            }
            Err(i) => {
                self.keys.insert(i, key);
                self.values.insert(i, value);
                if order.is_overflowing(self.keys.len()) {
                    LeafInsert::Split(self.split())
                } else {
                    LeafInsert::Inserted
                }
            }
        }
    }

    /// Split the node, returning the new right node.
    ///
    /// The right node takes over this leaf's `next_leaf`; the caller links
    /// this leaf to the right node once it has an id. The right node's first
    /// key is the separator for the parent.
    #[must_use]
    pub fn split(&mut self) -> Self {
        let mid = self.keys.len() / 2;

        Self {
            keys: self.keys.drain(mid..).collect(),
            values: self.values.drain(mid..).collect(),
            parent: self.parent,
            next_leaf: self.next_leaf,
        }
    }

    #[must_use]
    pub fn find(&self, key: &K) -> Option<&V> {
        self.find_index(key).ok().map(|i| &self.values[i])
    }

    /// Overwrite the value of an existing key. Returns whether it existed.
    pub fn update(&mut self, key: &K, value: V) -> bool {
        match self.find_index(key) {
            Ok(i) => {
                self.values[i] = value;
                true
            }
            Err(_) => false,
        }
    }

    /// Remove a pair by key.
    pub fn delete(&mut self, key: &K, order: Order) -> Option<Removal<V>> {
        let i = self.find_index(key).ok()?;
        self.keys.remove(i);
        let value = self.values.remove(i);
        Some(Removal {
            value,
            underflow: order.is_underflowing(self.keys.len()),
        })
    }

    /// Pairs of this leaf only with `start <= key <= end`.
    pub fn range_query<'a>(&'a self, start: &'a K, end: &'a K) -> impl Iterator<Item = (&'a K, &'a V)> {
        self.keys
            .iter()
            .zip(&self.values)
            .filter(move |(key, _)| start <= *key && *key <= end)
    }
}

impl<K: Ord + Clone, V> LeafNode<K, V> {
    /// Move one pair over from a sibling.
    ///
    /// From the left sibling its last pair is prepended here and this leaf's
    /// new first key is returned. From the right sibling its first pair is
    /// appended here and the sibling's new first key is returned, or the
    /// borrowed key itself if the sibling was left empty. The returned key
    /// replaces the parent separator between the two leaves.
    pub fn borrow_from_sibling(&mut self, sibling: &mut Self, side: Side) -> Option<K> {
        match side {
            Side::Left => {
                let key = sibling.keys.pop()?;
                let value = sibling.values.pop()?;
                self.keys.insert(0, key);
                self.values.insert(0, value);
                self.keys.first().cloned()
            }
            Side::Right => {
                if sibling.keys.is_empty() {
                    return None;
                }
                let key = sibling.keys.remove(0);
                let value = sibling.values.remove(0);
                let separator = sibling.keys.first().cloned().unwrap_or_else(|| key.clone());
                self.keys.push(key);
                self.values.push(value);
                Some(separator)
            }
        }
    }

    /// Merge with a sibling leaf and splice the chain around the absorbed one.
    ///
    /// With [`Side::Left`] the left sibling absorbs this leaf; with
    /// [`Side::Right`] this leaf absorbs the right sibling.
    pub fn merge_with_sibling(&mut self, sibling: &mut Self, side: Side) {
        let (survivor, absorbed) = match side {
            Side::Left => (sibling, self),
            Side::Right => (self, sibling),
        };
        survivor.keys.append(&mut absorbed.keys);
        survivor.values.append(&mut absorbed.values);
        survivor.next_leaf = absorbed.next_leaf.take();
    }
}
