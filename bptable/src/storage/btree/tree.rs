//! In-memory B+Tree.
//!
//! All pairs live in leaves. Internal nodes only route lookups. Leaves are
//! linked left to right, and that chain is the only way scans move between
//! leaves.
//!
//! Rebalancing on delete follows a fixed preference order: borrow from the
//! left sibling, borrow from the right sibling, merge into the left sibling,
//! merge with the right sibling. A leaf emptied by a delete is left in place.

use tracing::debug;

use crate::storage::btree::arena::{Arena, NodeId};
use crate::storage::btree::invariants::InvariantViolation;
use crate::storage::btree::node::{
    InternalNode, LeafInsert, LeafNode, MIN_ORDER, Node, Order, Side,
};
use crate::storage::codec::CodecError;

/// An ordered map backed by a B+Tree.
#[derive(Debug)]
pub struct BPlusTree<K, V> {
    pub(super) nodes: Arena<K, V>,
    pub(super) root: NodeId,
    /// Number of levels; a lone root leaf is height 1.
    pub(super) height: usize,
    pub(super) order: Order,
    pub(super) len: usize,
}

impl<K: Ord + Clone, V> BPlusTree<K, V> {
    /// Create an empty tree of the default order.
    #[must_use]
    pub fn new() -> Self {
        Self::empty(Order::default())
    }

    /// Create an empty tree where internal nodes hold at most `order` children.
    pub fn with_order(order: usize) -> Result<Self, BTreeError> {
        let order = Order::new(order).ok_or(BTreeError::InvalidOrder(order))?;
        Ok(Self::empty(order))
    }

    fn empty(order: Order) -> Self {
        let mut nodes = Arena::new();
        let root = nodes.alloc(Node::Leaf(LeafNode::new(None)));
        Self {
            nodes,
            root,
            height: 1,
            order,
            len: 0,
        }
    }

    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[must_use]
    pub const fn height(&self) -> usize {
        self.height
    }

    #[must_use]
    pub const fn order(&self) -> usize {
        self.order.get()
    }

    #[must_use]
    pub const fn root_id(&self) -> NodeId {
        self.root
    }

    /// Read-only access to a node, for walking the structure.
    #[must_use]
    pub fn node(&self, id: NodeId) -> Option<&Node<K, V>> {
        self.nodes.get(id)
    }

    /// Id of the leftmost leaf, where the leaf chain starts.
    #[must_use]
    pub fn first_leaf(&self) -> NodeId {
        let mut current = self.root;
        while let Some(Node::Internal(internal)) = self.nodes.get(current) {
            let Some(&child) = internal.children.first() else {
                break;
            };
            current = child;
        }
        current
    }

    /// Find the leaf that owns `key`.
    fn find_leaf(&self, key: &K) -> NodeId {
        let mut current = self.root;
        while let Some(Node::Internal(internal)) = self.nodes.get(current) {
            current = internal.find_child(key);
        }
        current
    }

    fn leaf(&self, id: NodeId) -> Option<&LeafNode<K, V>> {
        self.nodes.get(id)?.as_leaf()
    }

    fn leaf_mut(&mut self, id: NodeId) -> Option<&mut LeafNode<K, V>> {
        match self.nodes.get_mut(id)? {
            Node::Leaf(leaf) => Some(leaf),
            Node::Internal(_) => None,
        }
    }

    fn internal(&self, id: NodeId) -> Option<&InternalNode<K>> {
        self.nodes.get(id)?.as_internal()
    }

    fn internal_mut(&mut self, id: NodeId) -> Option<&mut InternalNode<K>> {
        match self.nodes.get_mut(id)? {
            Node::Internal(internal) => Some(internal),
            Node::Leaf(_) => None,
        }
    }

    fn parent_of(&self, id: NodeId) -> Option<NodeId> {
        self.nodes.get(id)?.parent()
    }

    fn set_parent(&mut self, id: NodeId, parent: Option<NodeId>) {
        if let Some(node) = self.nodes.get_mut(id) {
            node.set_parent(parent);
        }
    }

    /// Look up the value stored under `key`.
    #[must_use]
    pub fn find(&self, key: &K) -> Option<&V> {
        self.leaf(self.find_leaf(key))?.find(key)
    }

    #[must_use]
    pub fn contains_key(&self, key: &K) -> bool {
        self.find(key).is_some()
    }

    /// Insert or overwrite a pair.
    ///
    /// Returns `true` if the key was new, `false` if an existing value was
    /// replaced. Overwriting never changes the tree's shape.
    pub fn insert(&mut self, key: K, value: V) -> bool {
        let leaf_id = self.find_leaf(&key);
        let order = self.order;
        let Some(leaf) = self.leaf_mut(leaf_id) else {
            return false;
        };

        let right = match leaf.insert(key, value, order) {
            LeafInsert::Updated => return false,
            LeafInsert::Inserted => {
                self.len += 1;
                return true;
            }
            LeafInsert::Split(right) => right,
        };
        self.len += 1;

        // The new leaf's first key separates it from the old one
        let separator = right.keys[0].clone();
        let right_id = self.nodes.alloc(Node::Leaf(right));
        if let Some(leaf) = self.leaf_mut(leaf_id) {
            leaf.next_leaf = Some(right_id);
        }

        self.insert_in_parent(leaf_id, separator, right_id);
        true
    }

    /// Hook a freshly split `right` node into the tree next to `left`.
    fn insert_in_parent(&mut self, left: NodeId, separator: K, right: NodeId) {
        let Some(parent_id) = self.parent_of(left) else {
            // No parent - need to create a new root
            let root = InternalNode::with_children(None, left, separator, right);
            let root_id = self.nodes.alloc(Node::Internal(root));
            self.set_parent(left, Some(root_id));
            self.set_parent(right, Some(root_id));
            self.root = root_id;
            self.height += 1;
            debug!(root = %root_id, height = self.height, "root split");
            return;
        };

        let order = self.order;
        self.set_parent(right, Some(parent_id));
        let Some((median, sibling)) = self
            .internal_mut(parent_id)
            .and_then(|parent| parent.insert(separator, right, order))
        else {
            return;
        };

        let sibling_id = self.nodes.alloc(Node::Internal(sibling));
        self.adopt_children(sibling_id);
        self.insert_in_parent(parent_id, median, sibling_id);
    }

    /// Point every child of `parent` back at it.
    fn adopt_children(&mut self, parent: NodeId) {
        let Some(children) = self.internal(parent).map(|node| node.children.clone()) else {
            return;
        };
        for child in children {
            self.set_parent(child, Some(parent));
        }
    }

    /// Overwrite the value of an existing key. Returns whether it existed.
    pub fn update(&mut self, key: &K, value: V) -> bool {
        let leaf_id = self.find_leaf(key);
        self.leaf_mut(leaf_id)
            .is_some_and(|leaf| leaf.update(key, value))
    }

    /// Remove a key. Returns whether it was present.
    pub fn delete(&mut self, key: &K) -> bool {
        self.remove(key).is_some()
    }

    /// Remove a key, returning its value.
    pub fn remove(&mut self, key: &K) -> Option<V> {
        let leaf_id = self.find_leaf(key);
        let order = self.order;
        let removal = self.leaf_mut(leaf_id)?.delete(key, order)?;
        self.len -= 1;

        if removal.underflow && self.leaf(leaf_id).is_some_and(|leaf| !leaf.is_empty()) {
            self.handle_underflow(leaf_id);
        }
        self.collapse_root();

        Some(removal.value)
    }

    /// Restore minimum fill for `node_id` by borrowing or merging.
    fn handle_underflow(&mut self, node_id: NodeId) {
        let Some(parent_id) = self.parent_of(node_id) else {
            return;
        };
        let Some(parent) = self.internal(parent_id) else {
            return;
        };
        let Some(index) = parent.position_of(node_id) else {
            return;
        };
        let left = index.checked_sub(1).map(|i| parent.children[i]);
        let right = parent.children.get(index + 1).copied();
        let order = self.order;

        let can_lend = |id: NodeId| {
            self.nodes
                .get(id)
                .is_some_and(|node| order.can_lend(node.key_count()))
        };
        if let Some(left_id) = left.filter(|&id| can_lend(id)) {
            self.borrow(node_id, left_id, parent_id, index - 1, Side::Left);
            return;
        }
        if let Some(right_id) = right.filter(|&id| can_lend(id)) {
            self.borrow(node_id, right_id, parent_id, index, Side::Right);
            return;
        }

        let parent_underflow = if let Some(left_id) = left {
            self.merge(node_id, left_id, parent_id, index - 1, Side::Left)
        } else if let Some(right_id) = right {
            self.merge(node_id, right_id, parent_id, index, Side::Right)
        } else {
            // Only child of a separator-less node; nothing to rebalance with.
            return;
        };

        // A parent left without separators keeps its single child as is.
        if parent_underflow && self.internal(parent_id).is_some_and(|p| !p.keys.is_empty()) {
            self.handle_underflow(parent_id);
        }
    }

    /// Move one entry from `sibling_id` into `node_id` and fix the separator
    /// at `key_index` in the parent.
    fn borrow(
        &mut self,
        node_id: NodeId,
        sibling_id: NodeId,
        parent_id: NodeId,
        key_index: usize,
        side: Side,
    ) {
        let Some(separator) = self
            .internal(parent_id)
            .and_then(|parent| parent.keys.get(key_index))
            .cloned()
        else {
            return;
        };

        let (new_separator, moved_child) = match self.nodes.pair_mut(node_id, sibling_id) {
            Some((Node::Leaf(node), Node::Leaf(sibling))) => {
                (node.borrow_from_sibling(sibling, side), None)
            }
            Some((Node::Internal(node), Node::Internal(sibling))) => {
                match node.borrow_from_sibling(sibling, side, separator) {
                    Some((key, child)) => (Some(key), Some(child)),
                    None => (None, None),
                }
            }
            // Siblings always sit at the same depth
            _ => return,
        };

        if let (Some(key), Some(parent)) = (new_separator, self.internal_mut(parent_id)) {
            parent.keys[key_index] = key;
        }
        if let Some(child) = moved_child {
            self.set_parent(child, Some(node_id));
        }
    }

    /// Merge `node_id` with `sibling_id`, dropping the separator at
    /// `key_index` and the absorbed node. Returns whether the parent is now
    /// underfull.
    fn merge(
        &mut self,
        node_id: NodeId,
        sibling_id: NodeId,
        parent_id: NodeId,
        key_index: usize,
        side: Side,
    ) -> bool {
        let Some(separator) = self
            .internal(parent_id)
            .and_then(|parent| parent.keys.get(key_index))
            .cloned()
        else {
            return false;
        };
        let (survivor, absorbed) = match side {
            Side::Left => (sibling_id, node_id),
            Side::Right => (node_id, sibling_id),
        };

        let moved = match self.nodes.pair_mut(node_id, sibling_id) {
            Some((Node::Leaf(node), Node::Leaf(sibling))) => {
                node.merge_with_sibling(sibling, side);
                Vec::new()
            }
            Some((Node::Internal(node), Node::Internal(sibling))) => {
                node.merge_with_sibling(sibling, side, separator)
            }
            _ => return false,
        };

        for child in moved {
            self.set_parent(child, Some(survivor));
        }
        self.nodes.release(absorbed);

        let order = self.order;
        self.internal_mut(parent_id)
            .is_some_and(|parent| parent.delete_key(key_index, order))
    }

    /// Replace a separator-less internal root with its only child.
    ///
    /// Runs once per delete, so a new root that is itself separator-less
    /// stays until the next delete.
    fn collapse_root(&mut self) {
        let Some(child) = self
            .internal(self.root)
            .filter(|root| root.keys.is_empty())
            .and_then(|root| root.children.first().copied())
        else {
            return;
        };

        self.nodes.release(self.root);
        self.set_parent(child, None);
        self.root = child;
        self.height -= 1;
        debug!(root = %child, height = self.height, "root collapsed");
    }

    /// Pairs with `start <= key <= end`, in key order.
    ///
    /// Starts at the leaf that would hold `start` and follows the leaf chain
    /// until a key passes `end`.
    #[must_use]
    pub fn range(&self, start: &K, end: &K) -> Iter<'_, K, V> {
        let leaf = self.leaf(self.find_leaf(start));
        Iter {
            nodes: &self.nodes,
            leaf,
            index: leaf.map_or(0, |leaf| leaf.keys.partition_point(|k| k < start)),
            end: Some(end.clone()),
        }
    }

    /// Collected form of [`BPlusTree::range`].
    #[must_use]
    pub fn range_query(&self, start: &K, end: &K) -> Vec<(&K, &V)> {
        self.range(start, end).collect()
    }

    /// Every pair in key order.
    #[must_use]
    pub fn iter(&self) -> Iter<'_, K, V> {
        Iter {
            nodes: &self.nodes,
            leaf: self.leaf(self.first_leaf()),
            index: 0,
            end: None,
        }
    }

    /// Every pair with mutable access to the value, in no particular order.
    pub fn values_mut(&mut self) -> impl Iterator<Item = (&K, &mut V)> {
        self.nodes
            .iter_mut()
            .filter_map(|node| match node {
                Node::Leaf(leaf) => Some(leaf),
                Node::Internal(_) => None,
            })
            .flat_map(|leaf| {
                let LeafNode { keys, values, .. } = leaf;
                keys.iter().zip(values.iter_mut())
            })
    }

    /// Verify the structural invariants of the whole tree.
    pub fn check_invariants(&self) -> Result<(), InvariantViolation> {
        crate::storage::btree::invariants::check(self)
    }
}

impl<K: Ord + Clone, V> Default for BPlusTree<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'a, K: Ord + Clone, V> IntoIterator for &'a BPlusTree<K, V> {
    type Item = (&'a K, &'a V);
    type IntoIter = Iter<'a, K, V>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Iterator following the leaf chain.
pub struct Iter<'a, K, V> {
    nodes: &'a Arena<K, V>,
    leaf: Option<&'a LeafNode<K, V>>,
    index: usize,
    /// Inclusive upper bound, `None` for a full scan.
    end: Option<K>,
}

impl<'a, K: Ord, V> Iterator for Iter<'a, K, V> {
    type Item = (&'a K, &'a V);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let leaf = self.leaf?;

            if let (Some(key), Some(value)) = (leaf.keys.get(self.index), leaf.values.get(self.index)) {
                if self.end.as_ref().is_some_and(|end| key > end) {
                    self.leaf = None;
                    return None;
                }
                self.index += 1;
                return Some((key, value));
            }

            // Move to next leaf
            self.leaf = leaf
                .next_leaf
                .and_then(|id| self.nodes.get(id))
                .and_then(Node::as_leaf);
            self.index = 0;
        }
    }
}

/// Errors that can occur during B+Tree operations.
#[derive(Debug)]
pub enum BTreeError {
    /// Order below the supported minimum.
    InvalidOrder(usize),
    /// File I/O error.
    Io(std::io::Error),
    /// Malformed persisted bytes.
    Codec(CodecError),
    /// A loaded node graph is not a valid tree.
    Corrupt(InvariantViolation),
}

impl std::fmt::Display for BTreeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidOrder(order) => {
                write!(f, "invalid tree order {order}: must be at least {MIN_ORDER}")
            }
            Self::Io(e) => write!(f, "I/O error: {e}"),
            Self::Codec(e) => write!(f, "codec error: {e}"),
            Self::Corrupt(e) => write!(f, "corrupt index: {e}"),
        }
    }
}

impl std::error::Error for BTreeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::InvalidOrder(_) => None,
            Self::Io(e) => Some(e),
            Self::Codec(e) => Some(e),
            Self::Corrupt(e) => Some(e),
        }
    }
}

impl From<std::io::Error> for BTreeError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<CodecError> for BTreeError {
    fn from(e: CodecError) -> Self {
        Self::Codec(e)
    }
}

impl From<InvariantViolation> for BTreeError {
    fn from(e: InvariantViolation) -> Self {
        Self::Corrupt(e)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    use super::*;
    use crate::storage::btree::node::DEFAULT_ORDER;

    fn tree_with(order: usize, keys: impl IntoIterator<Item = i64>) -> BPlusTree<i64, i64> {
        let mut tree = BPlusTree::with_order(order).expect("valid order");
        for k in keys {
            assert!(tree.insert(k, k * 10));
        }
        tree
    }

    fn keys_of(tree: &BPlusTree<i64, i64>, id: NodeId) -> Vec<i64> {
        tree.node(id).expect("live node").keys().to_vec()
    }

    fn child(tree: &BPlusTree<i64, i64>, id: NodeId, i: usize) -> NodeId {
        tree.node(id).expect("live node").children()[i]
    }

    fn collect_keys(tree: &BPlusTree<i64, i64>) -> Vec<i64> {
        tree.iter().map(|(k, _)| *k).collect()
    }

    #[test]
    fn test_new_tree() {
        let tree: BPlusTree<i64, i64> = BPlusTree::new();
        assert!(tree.is_empty());
        assert_eq!(tree.height(), 1);
        assert_eq!(tree.order(), DEFAULT_ORDER);
        assert!(tree.node(tree.root_id()).expect("root").is_leaf());
        assert_eq!(tree.find(&1), None);
        tree.check_invariants().expect("invariants hold");
    }

    #[test]
    fn test_with_order_rejects_small_orders() {
        assert!(matches!(
            BPlusTree::<i64, i64>::with_order(2),
            Err(BTreeError::InvalidOrder(2))
        ));
        assert!(BPlusTree::<i64, i64>::with_order(3).is_ok());
    }

    #[test]
    fn test_insert_order_three_builds_expected_shape() {
        let mut tree = tree_with(3, [1, 2, 3]);

        let root = tree.root_id();
        assert_eq!(keys_of(&tree, root), vec![2]);
        assert_eq!(keys_of(&tree, child(&tree, root, 0)), vec![1]);
        assert_eq!(keys_of(&tree, child(&tree, root, 1)), vec![2, 3]);
        assert_eq!(tree.height(), 2);

        assert!(tree.insert(4, 40));
        assert!(tree.insert(5, 50));

        let root = tree.root_id();
        assert_eq!(keys_of(&tree, root), vec![3]);

        let left = child(&tree, root, 0);
        assert_eq!(keys_of(&tree, left), vec![2]);
        assert_eq!(keys_of(&tree, child(&tree, left, 0)), vec![1]);
        assert_eq!(keys_of(&tree, child(&tree, left, 1)), vec![2]);

        let right = child(&tree, root, 1);
        assert_eq!(keys_of(&tree, right), vec![4]);
        assert_eq!(keys_of(&tree, child(&tree, right, 0)), vec![3]);
        assert_eq!(keys_of(&tree, child(&tree, right, 1)), vec![4, 5]);

        assert_eq!(tree.height(), 3);
        tree.check_invariants().expect("invariants hold");
    }

    #[test]
    fn test_insert_then_find() {
        let tree = tree_with(4, (0..100).rev());
        for k in 0..100 {
            assert_eq!(tree.find(&k), Some(&(k * 10)), "missing {k}");
        }
        assert_eq!(tree.find(&100), None);
        assert_eq!(tree.len(), 100);
        tree.check_invariants().expect("invariants hold");
    }

    #[test]
    fn test_insert_existing_key_updates() {
        let mut tree = tree_with(4, 0..10);
        assert!(!tree.insert(5, 999));
        assert_eq!(tree.len(), 10);
        assert_eq!(tree.find(&5), Some(&999));
        assert_eq!(collect_keys(&tree).iter().filter(|&&k| k == 5).count(), 1);
    }

    #[test]
    fn test_update() {
        let mut tree = tree_with(4, 0..10);
        assert!(tree.update(&3, -3));
        assert!(!tree.update(&42, 0));
        assert_eq!(tree.find(&3), Some(&-3));
        assert_eq!(tree.len(), 10);
    }

    #[test]
    fn test_delete_roundtrip() {
        let mut tree = tree_with(4, 0..50);
        assert!(tree.delete(&17));
        assert!(!tree.delete(&17));
        assert_eq!(tree.find(&17), None);
        assert!(!collect_keys(&tree).contains(&17));
        assert_eq!(tree.remove(&18), Some(180));
        assert_eq!(tree.len(), 48);
        tree.check_invariants().expect("invariants hold");
    }

    #[test]
    fn test_delete_merges_with_right_sibling() {
        // root [3, 5] over [1, 2] [3, 4] [5, 6]
        let mut tree = tree_with(4, 1..=6);
        assert_eq!(keys_of(&tree, tree.root_id()), vec![3, 5]);

        assert!(tree.delete(&1));
        let root = tree.root_id();
        assert_eq!(keys_of(&tree, root), vec![5]);
        assert_eq!(keys_of(&tree, child(&tree, root, 0)), vec![2, 3, 4]);
        assert_eq!(keys_of(&tree, child(&tree, root, 1)), vec![5, 6]);
        tree.check_invariants().expect("invariants hold");
    }

    #[test]
    fn test_delete_borrows_from_left_sibling() {
        let mut tree = tree_with(4, 1..=6);
        assert!(tree.delete(&1));
        assert!(tree.delete(&6));

        let root = tree.root_id();
        assert_eq!(keys_of(&tree, root), vec![4]);
        assert_eq!(keys_of(&tree, child(&tree, root, 0)), vec![2, 3]);
        assert_eq!(keys_of(&tree, child(&tree, root, 1)), vec![4, 5]);
        tree.check_invariants().expect("invariants hold");
    }

    #[test]
    fn test_delete_borrows_from_right_sibling() {
        let mut tree = tree_with(4, 1..=6);
        assert!(tree.delete(&1));
        assert!(tree.delete(&6));
        assert!(tree.insert(6, 60));

        // [2, 3] [4, 5, 6]: the right sibling can spare a key
        assert!(tree.delete(&2));
        let root = tree.root_id();
        assert_eq!(keys_of(&tree, root), vec![5]);
        assert_eq!(keys_of(&tree, child(&tree, root, 0)), vec![3, 4]);
        assert_eq!(keys_of(&tree, child(&tree, root, 1)), vec![5, 6]);
        tree.check_invariants().expect("invariants hold");
    }

    #[test]
    fn test_delete_merge_collapses_root() {
        let mut tree = tree_with(4, 1..=6);
        assert!(tree.delete(&1));
        assert!(tree.delete(&6));

        // [2, 3] [4, 5]: merging into the left sibling empties the root
        assert!(tree.delete(&5));
        assert_eq!(tree.height(), 1);
        let root = tree.root_id();
        assert!(tree.node(root).expect("root").is_leaf());
        assert_eq!(keys_of(&tree, root), vec![2, 3, 4]);
        assert_eq!(tree.node(root).expect("root").parent(), None);
        tree.check_invariants().expect("invariants hold");
    }

    #[test]
    fn test_merge_leaves_separator_less_parent_in_place() {
        // root [7] over [3, 5] and [9]; the right subtree holds [7, 8] [9, 10]
        let mut tree = tree_with(4, 1..=10);
        assert_eq!(keys_of(&tree, tree.root_id()), vec![7]);
        assert_eq!(tree.height(), 3);

        assert!(tree.delete(&8));
        let root = tree.root_id();
        assert_eq!(keys_of(&tree, root), vec![7]);
        assert_eq!(tree.height(), 3);

        let left = child(&tree, root, 0);
        assert_eq!(keys_of(&tree, left), vec![3, 5]);
        assert_eq!(keys_of(&tree, child(&tree, left, 2)), vec![5, 6]);

        let right = child(&tree, root, 1);
        assert!(keys_of(&tree, right).is_empty());
        assert_eq!(tree.node(right).expect("live node").children().len(), 1);
        assert_eq!(keys_of(&tree, child(&tree, right, 0)), vec![7, 9, 10]);
        tree.check_invariants().expect("invariants hold");
    }

    #[test]
    fn test_underflow_below_separator_less_parent() {
        let mut tree = tree_with(4, 1..=10);
        assert!(tree.delete(&8));

        // The lone leaf under the empty parent has no sibling to use
        assert!(tree.delete(&10));
        assert!(tree.delete(&9));
        let right = child(&tree, tree.root_id(), 1);
        assert_eq!(keys_of(&tree, child(&tree, right, 0)), vec![7]);
        assert_eq!(tree.height(), 3);
        tree.check_invariants().expect("invariants hold");

        assert!(tree.delete(&7));
        assert_eq!(tree.find(&7), None);
        assert!(tree.insert(8, 80));
        assert_eq!(collect_keys(&tree), vec![1, 2, 3, 4, 5, 6, 8]);
        tree.check_invariants().expect("invariants hold");
    }

    #[test]
    fn test_delete_everything() {
        let mut tree = tree_with(4, 0..200);
        for k in 0..200 {
            assert!(tree.delete(&k), "failed to delete {k}");
            tree.check_invariants().expect("invariants hold");
        }
        assert!(tree.is_empty());
        assert_eq!(tree.iter().count(), 0);

        // The emptied tree still accepts inserts
        assert!(tree.insert(7, 70));
        assert_eq!(tree.find(&7), Some(&70));
    }

    #[test]
    fn test_range_query_inclusive() {
        let tree = tree_with(4, (0..100).map(|k| k * 2));

        let keys: Vec<i64> = tree.range_query(&10, &20).iter().map(|(k, _)| **k).collect();
        assert_eq!(keys, vec![10, 12, 14, 16, 18, 20]);

        // Bounds that fall between keys
        let keys: Vec<i64> = tree.range(&11, &15).map(|(k, _)| *k).collect();
        assert_eq!(keys, vec![12, 14]);

        assert!(tree.range_query(&20, &10).is_empty());
        assert!(tree.range_query(&1000, &2000).is_empty());
        assert_eq!(tree.range_query(&-5, &0).len(), 1);
    }

    #[test]
    fn test_iter_follows_leaf_chain() {
        let tree = tree_with(3, [5, 1, 9, 3, 7, 2, 8]);
        assert_eq!(collect_keys(&tree), vec![1, 2, 3, 5, 7, 8, 9]);
        assert_eq!((&tree).into_iter().count(), 7);
    }

    #[test]
    fn test_values_mut() {
        let mut tree = tree_with(4, 0..20);
        for (key, value) in tree.values_mut() {
            *value = -key;
        }
        assert_eq!(tree.find(&7), Some(&-7));
    }

    fn run_random_ops(order: usize, seed: u64) {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut tree = BPlusTree::with_order(order).expect("valid order");
        let mut model = BTreeMap::new();

        for step in 0..3000 {
            let key: i64 = rng.random_range(0..300);
            match rng.random_range(0..10) {
                0..=4 => {
                    let value: i64 = rng.random();
                    let inserted = tree.insert(key, value);
                    assert_eq!(inserted, model.insert(key, value).is_none(), "step {step}");
                }
                5..=7 => {
                    assert_eq!(tree.remove(&key), model.remove(&key), "step {step}");
                }
                8 => {
                    let updated = tree.update(&key, 0);
                    assert_eq!(updated, model.contains_key(&key), "step {step}");
                    if let Some(value) = model.get_mut(&key) {
                        *value = 0;
                    }
                }
                _ => {
                    let end = key + rng.random_range(0..40);
                    let actual: Vec<(i64, i64)> =
                        tree.range(&key, &end).map(|(k, v)| (*k, *v)).collect();
                    let expected: Vec<(i64, i64)> =
                        model.range(key..=end).map(|(k, v)| (*k, *v)).collect();
                    assert_eq!(actual, expected, "step {step}");
                }
            }

            if let Err(e) = tree.check_invariants() {
                panic!("order {order}, seed {seed}, step {step}: {e}");
            }
            assert_eq!(tree.len(), model.len());
        }

        let all: Vec<(i64, i64)> = tree.iter().map(|(k, v)| (*k, *v)).collect();
        let expected: Vec<(i64, i64)> = model.into_iter().collect();
        assert_eq!(all, expected);
    }

    #[test]
    fn test_random_operations_match_model() {
        for order in [3, 4, 5, 8] {
            for seed in 0..4 {
                run_random_ops(order, seed);
            }
        }
    }
}
