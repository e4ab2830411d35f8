//! B+Tree index used by tables.
//!
//! # Structure
//!
//! The tree consists of:
//! - Internal nodes: store separator keys and child node ids
//! - Leaf nodes: store key-value pairs, singly linked for range scans
//!
//! Nodes live in an [`arena`](Arena) and refer to each other by [`NodeId`],
//! including the parent back-links used while rebalancing.
//!
//! # Usage
//!
//! ```
//! use bptable::storage::btree::BPlusTree;
//!
//! let mut tree = BPlusTree::with_order(3).expect("order 3 is valid");
//! for k in 1..=5 {
//!     tree.insert(k, k * 10);
//! }
//!
//! assert_eq!(tree.find(&4), Some(&40));
//! assert_eq!(tree.height(), 3);
//!
//! let keys: Vec<i64> = tree.range(&2, &4).map(|(k, _)| *k).collect();
//! assert_eq!(keys, vec![2, 3, 4]);
//! ```

mod arena;
mod invariants;
mod node;
mod persist;
mod tree;

pub use arena::{Arena, NodeId};
pub use invariants::InvariantViolation;
pub use node::{
    DEFAULT_ORDER, InternalNode, LeafInsert, LeafNode, MIN_ORDER, Node, Order, Removal, Side,
};
pub use persist::INDEX_MAGIC;
pub use tree::{BPlusTree, BTreeError, Iter};
