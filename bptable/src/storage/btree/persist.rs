//! On-disk form of a [`BPlusTree`].
//!
//! The arena is written slot by slot, free slots included, so node ids keep
//! their meaning across a save and load:
//! ```text
//! order u64 | height u64 | root u64 | len u64 | slot count u64 | slots...
//!
//! free:     0x00
//! leaf:     0x01 | parent | next_leaf | keys | values
//! internal: 0x02 | parent | keys | child count u64 | child ids
//! ```
//! Optional ids use `u64::MAX` for "none". The payload is wrapped in the
//! standard artifact frame.

use std::path::Path;

use tracing::debug;

use crate::storage::btree::arena::{Arena, NodeId};
use crate::storage::btree::node::{InternalNode, LeafNode, Node, Order};
use crate::storage::btree::tree::{BPlusTree, BTreeError};
use crate::storage::codec::{
    Codec, CodecError, Reader, decode_seq, encode_seq, frame, read_if_exists, unframe, write_len,
    write_u8, write_u64,
};

/// Magic number identifying an index artifact.
pub const INDEX_MAGIC: [u8; 8] = *b"BPTINDEX";

const NO_NODE: u64 = u64::MAX;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
enum SlotTag {
    Free = 0x00,
    Leaf = 0x01,
    Internal = 0x02,
}

impl TryFrom<u8> for SlotTag {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x00 => Ok(Self::Free),
            0x01 => Ok(Self::Leaf),
            0x02 => Ok(Self::Internal),
            _ => Err(value),
        }
    }
}

fn write_id(buf: &mut Vec<u8>, id: NodeId) {
    write_u64(buf, id.index() as u64);
}

fn write_optional_id(buf: &mut Vec<u8>, id: Option<NodeId>) {
    match id {
        Some(id) => write_id(buf, id),
        None => write_u64(buf, NO_NODE),
    }
}

fn read_usize(reader: &mut Reader<'_>) -> Result<usize, CodecError> {
    let raw = reader.read_u64()?;
    usize::try_from(raw).map_err(|_| CodecError::LengthOverflow(raw))
}

fn read_optional_id(reader: &mut Reader<'_>) -> Result<Option<NodeId>, CodecError> {
    let raw = reader.read_u64()?;
    if raw == NO_NODE {
        return Ok(None);
    }
    usize::try_from(raw)
        .map(|index| Some(NodeId::new(index)))
        .map_err(|_| CodecError::LengthOverflow(raw))
}

impl<K: Ord + Clone + Codec, V: Codec> BPlusTree<K, V> {
    /// Serialize the whole node graph into one framed artifact.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut payload = Vec::new();
        write_len(&mut payload, self.order.get());
        write_len(&mut payload, self.height);
        write_id(&mut payload, self.root);
        write_len(&mut payload, self.len);
        write_len(&mut payload, self.nodes.slot_count());

        for (_, slot) in self.nodes.slots() {
            match slot {
                None => write_u8(&mut payload, SlotTag::Free as u8),
                Some(Node::Leaf(leaf)) => {
                    write_u8(&mut payload, SlotTag::Leaf as u8);
                    write_optional_id(&mut payload, leaf.parent);
                    write_optional_id(&mut payload, leaf.next_leaf);
                    encode_seq(&mut payload, &leaf.keys);
                    encode_seq(&mut payload, &leaf.values);
                }
                Some(Node::Internal(internal)) => {
                    write_u8(&mut payload, SlotTag::Internal as u8);
                    write_optional_id(&mut payload, internal.parent);
                    encode_seq(&mut payload, &internal.keys);
                    write_len(&mut payload, internal.children.len());
                    for &child in &internal.children {
                        write_id(&mut payload, child);
                    }
                }
            }
        }

        frame(&INDEX_MAGIC, &payload)
    }

    /// Rebuild a tree from [`BPlusTree::to_bytes`] output.
    ///
    /// The decoded graph is checked with the full invariant checker before it
    /// is handed out, so dangling ids and broken links are rejected here.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, BTreeError> {
        let payload = unframe(&INDEX_MAGIC, bytes)?;
        let mut reader = Reader::new(payload);

        let raw_order = read_usize(&mut reader)?;
        let order = Order::new(raw_order).ok_or(BTreeError::InvalidOrder(raw_order))?;
        let height = read_usize(&mut reader)?;
        let root = NodeId::new(read_usize(&mut reader)?);
        let len = read_usize(&mut reader)?;

        // Every slot takes at least one byte
        let slot_count = reader.read_len()?;
        let mut slots = Vec::with_capacity(slot_count);
        for _ in 0..slot_count {
            let tag = reader.read_u8()?;
            let tag = SlotTag::try_from(tag).map_err(|tag| CodecError::InvalidTag { what: "slot", tag })?;
            let slot = match tag {
                SlotTag::Free => None,
                SlotTag::Leaf => {
                    let parent = read_optional_id(&mut reader)?;
                    let next_leaf = read_optional_id(&mut reader)?;
                    Some(Node::Leaf(LeafNode {
                        keys: decode_seq(&mut reader)?,
                        values: decode_seq(&mut reader)?,
                        parent,
                        next_leaf,
                    }))
                }
                SlotTag::Internal => {
                    let parent = read_optional_id(&mut reader)?;
                    let keys = decode_seq(&mut reader)?;
                    let child_count = reader.read_len()?;
                    let mut children = Vec::with_capacity(child_count);
                    for _ in 0..child_count {
                        children.push(NodeId::new(read_usize(&mut reader)?));
                    }
                    Some(Node::Internal(InternalNode {
                        keys,
                        children,
                        parent,
                    }))
                }
            };
            slots.push(slot);
        }
        reader.finish()?;

        let tree = Self {
            nodes: Arena::from_slots(slots),
            root,
            height,
            order,
            len,
        };
        tree.check_invariants()?;
        Ok(tree)
    }

    pub fn save(&self, path: &Path) -> Result<(), BTreeError> {
        std::fs::write(path, self.to_bytes())?;
        debug!(path = %path.display(), len = self.len, height = self.height, "index saved");
        Ok(())
    }

    /// Load a tree saved with [`BPlusTree::save`].
    ///
    /// Returns `Ok(None)` if the file does not exist.
    pub fn load(path: &Path) -> Result<Option<Self>, BTreeError> {
        let Some(bytes) = read_if_exists(path)? else {
            debug!(path = %path.display(), "no index file");
            return Ok(None);
        };
        Self::from_bytes(&bytes).map(Some)
    }
}
