//! B+ tree nodes in their disk form.
//!
//! One node starts at one INDEX_NODE page and continues on OVERFLOW pages
//! when its serialized form exceeds the page's data capacity. Layout:
//!
//! ```text
//! u8   format (2 = current, 1 = legacy without the subtree count)
//! u8   leaf flag
//! u16  key count
//! u32  parent page id
//! u32  previous sibling page id (leaf level)
//! u32  next sibling page id (leaf level)
//! u64  subtree entry count (format 2 only)
//! keys: key count × (u16 arity, tagged values)
//! leaf: key count × tagged doc-id value
//! internal: (key count + 1) × u32 child page id
//! ```
//!
//! The loader accepts both formats; the writer always emits the current
//! one, so legacy nodes migrate on their first rewrite.

use crate::document::codec::ByteReader;
use crate::error::{Error, Result};
use crate::index::IndexKey;
use crate::types::PageId;
use crate::value::Value;

/// Current node format byte
pub const NODE_FORMAT: u8 = 2;

/// Legacy node format byte: no subtree entry count
pub const NODE_FORMAT_LEGACY: u8 = 1;

/// A fully parsed B+ tree node
#[derive(Debug, Clone)]
pub struct TreeNode {
    /// Page this node starts on
    pub page_id: PageId,
    /// Leaf bit
    pub leaf: bool,
    /// Parent node's page, NONE at the root
    pub parent: PageId,
    /// Previous leaf sibling, NONE at the leftmost leaf
    pub prev: PageId,
    /// Next leaf sibling, NONE at the rightmost leaf
    pub next: PageId,
    /// Entries in this node's subtree (own entries for a leaf)
    pub entry_count: u64,
    /// Sorted keys
    pub keys: Vec<IndexKey>,
    /// Child pages, `keys.len() + 1` of them (internal nodes only)
    pub children: Vec<PageId>,
    /// Doc-ids parallel to `keys` (leaf nodes only)
    pub entries: Vec<Value>,
}

impl TreeNode {
    /// A fresh empty leaf
    pub fn new_leaf(page_id: PageId) -> Self {
        Self {
            page_id,
            leaf: true,
            parent: PageId::NONE,
            prev: PageId::NONE,
            next: PageId::NONE,
            entry_count: 0,
            keys: Vec::new(),
            children: Vec::new(),
            entries: Vec::new(),
        }
    }

    /// A fresh internal node
    pub fn new_internal(page_id: PageId) -> Self {
        Self {
            leaf: false,
            ..Self::new_leaf(page_id)
        }
    }

    /// Serialize to the current format
    pub fn serialize(&self) -> Vec<u8> {
        crate::document::with_buffer(|buf| {
            buf.push(NODE_FORMAT);
            buf.push(self.leaf as u8);
            buf.extend_from_slice(&(self.keys.len() as u16).to_le_bytes());
            buf.extend_from_slice(&self.parent.value().to_le_bytes());
            buf.extend_from_slice(&self.prev.value().to_le_bytes());
            buf.extend_from_slice(&self.next.value().to_le_bytes());
            buf.extend_from_slice(&self.entry_count.to_le_bytes());
            for key in &self.keys {
                key.write(buf);
            }
            if self.leaf {
                for entry in &self.entries {
                    entry.write_tagged(buf);
                }
            } else {
                for child in &self.children {
                    buf.extend_from_slice(&child.value().to_le_bytes());
                }
            }
            buf.clone()
        })
    }

    /// Parse a node image, accepting the legacy format
    pub fn deserialize(page_id: PageId, bytes: &[u8]) -> Result<Self> {
        let mut r = ByteReader::new(bytes);
        let format = r.read_u8()?;
        if format != NODE_FORMAT && format != NODE_FORMAT_LEGACY {
            return Err(Error::invalid_page(format!(
                "node {page_id} has unknown format {format}"
            )));
        }
        let leaf = match r.read_u8()? {
            0 => false,
            1 => true,
            other => {
                return Err(Error::invalid_page(format!(
                    "node {page_id} has bad leaf flag {other}"
                )))
            }
        };
        let key_count = r.read_u16()? as usize;
        let parent = PageId::new(r.read_u32()?);
        let prev = PageId::new(r.read_u32()?);
        let next = PageId::new(r.read_u32()?);
        let entry_count = if format == NODE_FORMAT {
            r.read_u64()?
        } else if leaf {
            key_count as u64
        } else {
            // refreshed when the subtree is next written
            0
        };

        let mut keys = Vec::with_capacity(key_count);
        for _ in 0..key_count {
            keys.push(IndexKey::read(&mut r)?);
        }

        let mut children = Vec::new();
        let mut entries = Vec::new();
        if leaf {
            entries.reserve(key_count);
            for _ in 0..key_count {
                entries.push(Value::read_tagged(&mut r)?);
            }
        } else {
            children.reserve(key_count + 1);
            for _ in 0..key_count + 1 {
                children.push(PageId::new(r.read_u32()?));
            }
        }

        Ok(Self {
            page_id,
            leaf,
            parent,
            prev,
            next,
            entry_count,
            keys,
            children,
            entries,
        })
    }

    /// Position of a child page within this internal node
    pub fn child_index(&self, child: PageId) -> Option<usize> {
        self.children.iter().position(|&c| c == child)
    }

    /// Descent index for an insert: entries equal to a separator live in
    /// the child to its right
    pub fn descend_upper(&self, key: &IndexKey) -> usize {
        self.keys.partition_point(|k| k <= key)
    }

    /// Descent index for lookups and deletes: the leftmost child that can
    /// still hold the key (duplicate runs may straddle a separator)
    pub fn descend_lower(&self, key: &IndexKey) -> usize {
        self.keys.partition_point(|k| k < key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ObjectId;

    fn sample_leaf() -> TreeNode {
        let mut node = TreeNode::new_leaf(PageId::new(5));
        node.parent = PageId::new(2);
        node.prev = PageId::new(4);
        node.next = PageId::new(6);
        node.keys = vec![
            IndexKey::single(Value::Int32(1)),
            IndexKey::single(Value::Int32(2)),
            IndexKey::single(Value::String("x".into())),
        ];
        node.entries = vec![
            Value::ObjectId(ObjectId::new()),
            Value::Int64(42),
            Value::ObjectId(ObjectId::new()),
        ];
        node.entry_count = 3;
        node
    }

    fn assert_nodes_equal(a: &TreeNode, b: &TreeNode) {
        assert_eq!(a.page_id, b.page_id);
        assert_eq!(a.leaf, b.leaf);
        assert_eq!(a.parent, b.parent);
        assert_eq!(a.prev, b.prev);
        assert_eq!(a.next, b.next);
        assert_eq!(a.entry_count, b.entry_count);
        assert_eq!(a.keys, b.keys);
        assert_eq!(a.children, b.children);
        assert_eq!(a.entries, b.entries);
    }

    #[test]
    fn test_leaf_roundtrip() {
        let node = sample_leaf();
        let bytes = node.serialize();
        let back = TreeNode::deserialize(node.page_id, &bytes).unwrap();
        assert_nodes_equal(&node, &back);
    }

    #[test]
    fn test_internal_roundtrip() {
        let mut node = TreeNode::new_internal(PageId::new(2));
        node.keys = vec![
            IndexKey::single(Value::Int32(10)),
            IndexKey::single(Value::Int32(20)),
        ];
        node.children = vec![PageId::new(5), PageId::new(6), PageId::new(7)];
        node.entry_count = 17;
        let bytes = node.serialize();
        let back = TreeNode::deserialize(node.page_id, &bytes).unwrap();
        assert_nodes_equal(&node, &back);
    }

    #[test]
    fn test_legacy_leaf_accepted() {
        let node = sample_leaf();
        let mut bytes = node.serialize();
        // rewrite as the legacy layout: drop the u64 subtree count at 16..24
        bytes[0] = NODE_FORMAT_LEGACY;
        bytes.drain(16..24);
        let back = TreeNode::deserialize(node.page_id, &bytes).unwrap();
        assert_eq!(back.entry_count, node.keys.len() as u64);
        assert_eq!(back.keys, node.keys);
        assert_eq!(back.entries, node.entries);
        // a rewrite emits the current format
        assert_eq!(back.serialize()[0], NODE_FORMAT);
    }

    #[test]
    fn test_unknown_format_rejected() {
        let mut bytes = sample_leaf().serialize();
        bytes[0] = 9;
        assert!(TreeNode::deserialize(PageId::new(5), &bytes).is_err());
    }

    #[test]
    fn test_truncated_rejected() {
        let bytes = sample_leaf().serialize();
        assert!(TreeNode::deserialize(PageId::new(5), &bytes[..bytes.len() - 3]).is_err());
    }

    #[test]
    fn test_descent_indexes() {
        let mut node = TreeNode::new_internal(PageId::new(2));
        node.keys = vec![
            IndexKey::single(Value::Int32(10)),
            IndexKey::single(Value::Int32(20)),
        ];
        node.children = vec![PageId::new(5), PageId::new(6), PageId::new(7)];

        let key = IndexKey::single(Value::Int32(10));
        // equal keys go right on insert, left on lookup
        assert_eq!(node.descend_upper(&key), 1);
        assert_eq!(node.descend_lower(&key), 0);

        let low = IndexKey::single(Value::Int32(5));
        let high = IndexKey::single(Value::Int32(25));
        assert_eq!(node.descend_upper(&low), 0);
        assert_eq!(node.descend_lower(&high), 2);
    }
}
