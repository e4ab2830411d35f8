//! Structural checks for a [`BPlusTree`].
//!
//! Minimum fill is not checked: a leaf emptied by a delete stays in the tree.

use crate::storage::btree::arena::NodeId;
use crate::storage::btree::node::Node;
use crate::storage::btree::tree::BPlusTree;

/// The first broken invariant found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvariantViolation {
    /// A node id that does not name a live node.
    DanglingId(NodeId),
    /// A node reachable along more than one path.
    SharedNode(NodeId),
    /// A node whose parent link disagrees with the node that owns it.
    WrongParent {
        node: NodeId,
        expected: Option<NodeId>,
        found: Option<NodeId>,
    },
    /// A leaf at a depth other than the tree height.
    LeafDepth {
        leaf: NodeId,
        depth: usize,
        height: usize,
    },
    /// An internal node whose child count is not its key count plus one.
    ChildCount {
        node: NodeId,
        keys: usize,
        children: usize,
    },
    /// A leaf with a different number of keys and values.
    ValueCount {
        leaf: NodeId,
        keys: usize,
        values: usize,
    },
    /// Keys within a node out of strictly ascending order.
    UnsortedKeys(NodeId),
    /// A key outside the range its parent's separators allow.
    SeparatorBounds(NodeId),
    /// The leaf chain disagrees with the left-to-right leaf order.
    LeafChain {
        expected: Option<NodeId>,
        found: Option<NodeId>,
    },
    /// Keys do not ascend across the leaf chain.
    ChainOrder(NodeId),
    /// The stored length differs from the number of keys in the leaves.
    LenMismatch { stored: usize, counted: usize },
    /// Live nodes that cannot be reached from the root.
    Unreachable { live: usize, reachable: usize },
}

impl std::fmt::Display for InvariantViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DanglingId(id) => write!(f, "node {id} does not exist"),
            Self::SharedNode(id) => write!(f, "node {id} is reachable more than once"),
            Self::WrongParent {
                node,
                expected,
                found,
            } => write!(
                f,
                "node {node} has parent {found:?}, expected {expected:?}"
            ),
            Self::LeafDepth {
                leaf,
                depth,
                height,
            } => write!(f, "leaf {leaf} at depth {depth}, tree height is {height}"),
            Self::ChildCount {
                node,
                keys,
                children,
            } => write!(f, "internal node {node} has {keys} keys but {children} children"),
            Self::ValueCount { leaf, keys, values } => {
                write!(f, "leaf {leaf} has {keys} keys but {values} values")
            }
            Self::UnsortedKeys(id) => write!(f, "keys of node {id} are not strictly ascending"),
            Self::SeparatorBounds(id) => write!(f, "keys of node {id} fall outside its separators"),
            Self::LeafChain { expected, found } => {
                write!(f, "leaf chain reached {found:?}, expected {expected:?}")
            }
            Self::ChainOrder(id) => write!(f, "leaf {id} breaks ascending order along the chain"),
            Self::LenMismatch { stored, counted } => {
                write!(f, "tree records {stored} keys but leaves hold {counted}")
            }
            Self::Unreachable { live, reachable } => {
                write!(f, "{live} live nodes but only {reachable} reachable from the root")
            }
        }
    }
}

impl std::error::Error for InvariantViolation {}

struct Frame<'a, K> {
    id: NodeId,
    parent: Option<NodeId>,
    depth: usize,
    lower: Option<&'a K>,
    upper: Option<&'a K>,
}

pub(super) fn check<K: Ord, V>(tree: &BPlusTree<K, V>) -> Result<(), InvariantViolation> {
    let mut seen = vec![false; tree.nodes.slot_count()];
    let mut leaves = Vec::new();
    let mut stack = vec![Frame {
        id: tree.root,
        parent: None,
        depth: 1,
        lower: None,
        upper: None,
    }];

    // Depth-first, children pushed in reverse so leaves come out left to right
    while let Some(frame) = stack.pop() {
        let node = tree
            .nodes
            .get(frame.id)
            .ok_or(InvariantViolation::DanglingId(frame.id))?;
        if std::mem::replace(&mut seen[frame.id.index()], true) {
            return Err(InvariantViolation::SharedNode(frame.id));
        }

        if node.parent() != frame.parent {
            return Err(InvariantViolation::WrongParent {
                node: frame.id,
                expected: frame.parent,
                found: node.parent(),
            });
        }

        let keys = node.keys();
        if !keys.windows(2).all(|pair| pair[0] < pair[1]) {
            return Err(InvariantViolation::UnsortedKeys(frame.id));
        }
        let below = keys
            .first()
            .zip(frame.lower)
            .is_some_and(|(first, lower)| first < lower);
        let above = keys
            .last()
            .zip(frame.upper)
            .is_some_and(|(last, upper)| last >= upper);
        if below || above {
            return Err(InvariantViolation::SeparatorBounds(frame.id));
        }

        match node {
            Node::Leaf(leaf) => {
                if leaf.values.len() != leaf.keys.len() {
                    return Err(InvariantViolation::ValueCount {
                        leaf: frame.id,
                        keys: leaf.keys.len(),
                        values: leaf.values.len(),
                    });
                }
                if frame.depth != tree.height {
                    return Err(InvariantViolation::LeafDepth {
                        leaf: frame.id,
                        depth: frame.depth,
                        height: tree.height,
                    });
                }
                leaves.push(frame.id);
            }
            Node::Internal(internal) => {
                if internal.children.len() != internal.keys.len() + 1 {
                    return Err(InvariantViolation::ChildCount {
                        node: frame.id,
                        keys: internal.keys.len(),
                        children: internal.children.len(),
                    });
                }
                for (i, &child) in internal.children.iter().enumerate().rev() {
                    let lower = match i {
                        0 => frame.lower,
                        _ => Some(&internal.keys[i - 1]),
                    };
                    stack.push(Frame {
                        id: child,
                        parent: Some(frame.id),
                        depth: frame.depth + 1,
                        lower,
                        upper: internal.keys.get(i).or(frame.upper),
                    });
                }
            }
        }
    }

    let reachable = seen.iter().filter(|&&s| s).count();
    if reachable != tree.nodes.live_count() {
        return Err(InvariantViolation::Unreachable {
            live: tree.nodes.live_count(),
            reachable,
        });
    }

    check_leaf_chain(tree, &leaves)
}

fn check_leaf_chain<K: Ord, V>(
    tree: &BPlusTree<K, V>,
    leaves: &[NodeId],
) -> Result<(), InvariantViolation> {
    let mut cursor = leaves.first().copied();
    let mut previous: Option<&K> = None;
    let mut counted = 0;

    for &expected in leaves {
        if cursor != Some(expected) {
            return Err(InvariantViolation::LeafChain {
                expected: Some(expected),
                found: cursor,
            });
        }
        let node = tree
            .nodes
            .get(expected)
            .ok_or(InvariantViolation::DanglingId(expected))?;
        for key in node.keys() {
            if previous.is_some_and(|p| p >= key) {
                return Err(InvariantViolation::ChainOrder(expected));
            }
            previous = Some(key);
        }
        counted += node.key_count();
        cursor = node.next_leaf();
    }

    if cursor.is_some() {
        return Err(InvariantViolation::LeafChain {
            expected: None,
            found: cursor,
        });
    }
    if counted != tree.len {
        return Err(InvariantViolation::LenMismatch {
            stored: tree.len,
            counted,
        });
    }
    Ok(())
}
