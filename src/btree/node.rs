//! B+Tree node (de)serialization against a page's data area, per spec.md
//! §3/§4.4: an 11-byte node header `{isLeaf:u8, keyCount:u16, next:u32,
//! prev:u32}` followed by a sequential (not slotted — the tree rewrites a
//! node wholesale on every mutation) array of variable-length keys plus
//! either leaf values or internal child pointers.
//!
//! Grounded on `small-db-small-db/src/btree/page/{leaf_page,internal_page}.rs`
//! for the header-then-entries shape and the leaf/internal split, adapted
//! to this crate's variable-length KeyString keys (the teacher's B+Tree
//! keys are fixed-width integers) and to whole-node rewrite rather than an
//! in-place slot array.

use crate::storage::constants::{BTREE_ORDER, PAGE_DATA_SIZE};

const NODE_HEADER_SIZE: usize = 11;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeBody {
    Leaf { values: Vec<Vec<u8>> },
    Internal { children: Vec<u32> },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BTreeNode {
    pub page_id: u32,
    pub next: u32,
    pub prev: u32,
    pub keys: Vec<Vec<u8>>,
    pub body: NodeBody,
}

impl BTreeNode {
    #[must_use]
    pub fn new_leaf(page_id: u32) -> Self {
        Self { page_id, next: 0, prev: 0, keys: Vec::new(), body: NodeBody::Leaf { values: Vec::new() } }
    }

    #[must_use]
    pub fn new_internal(page_id: u32, children: Vec<u32>) -> Self {
        Self { page_id, next: 0, prev: 0, keys: Vec::new(), body: NodeBody::Internal { children } }
    }

    #[must_use]
    pub fn is_leaf(&self) -> bool {
        matches!(self.body, NodeBody::Leaf { .. })
    }

    #[must_use]
    pub fn key_count(&self) -> usize {
        self.keys.len()
    }

    /// Split threshold: a node is full once it holds `order - 1` keys.
    #[must_use]
    pub fn is_full(&self) -> bool {
        self.key_count() >= BTREE_ORDER - 1
    }

    #[must_use]
    pub fn min_keys() -> usize {
        (BTREE_ORDER - 1) / 2
    }

    #[must_use]
    pub fn is_underflow(&self) -> bool {
        self.key_count() < Self::min_keys()
    }

    /// Checks the structural invariants from spec.md §3: `children.len ==
    /// keyCount + 1` for internal nodes, `children.len == 0` (i.e. a flat
    /// values array of matching length) for leaves.
    #[must_use]
    pub fn check_structure(&self) -> bool {
        match &self.body {
            NodeBody::Leaf { values } => values.len() == self.keys.len(),
            NodeBody::Internal { children } => children.len() == self.keys.len() + 1,
        }
    }

    /// Approximate serialized byte weight, used to choose a split point
    /// that balances serialized size rather than raw key count.
    #[must_use]
    pub fn serialized_weight(&self) -> usize {
        let key_bytes: usize = self.keys.iter().map(|k| k.len() + 2).sum();
        match &self.body {
            NodeBody::Leaf { values } => key_bytes + values.iter().map(|v| v.len() + 2).sum::<usize>(),
            NodeBody::Internal { children } => key_bytes + children.len() * 4,
        }
    }

    #[must_use]
    pub fn to_bytes(&self) -> [u8; PAGE_DATA_SIZE] {
        let mut buf = [0u8; PAGE_DATA_SIZE];
        buf[0] = u8::from(self.is_leaf());
        buf[1..3].copy_from_slice(&(self.keys.len() as u16).to_le_bytes());
        buf[3..7].copy_from_slice(&self.next.to_le_bytes());
        buf[7..11].copy_from_slice(&self.prev.to_le_bytes());

        let mut cursor = NODE_HEADER_SIZE;
        match &self.body {
            NodeBody::Internal { children } => {
                buf[cursor..cursor + 4].copy_from_slice(&children[0].to_le_bytes());
                cursor += 4;
                for (key, &child) in self.keys.iter().zip(children.iter().skip(1)) {
                    cursor = write_blob(&mut buf, cursor, key);
                    buf[cursor..cursor + 4].copy_from_slice(&child.to_le_bytes());
                    cursor += 4;
                }
            }
            NodeBody::Leaf { values } => {
                for (key, value) in self.keys.iter().zip(values.iter()) {
                    cursor = write_blob(&mut buf, cursor, key);
                    cursor = write_blob(&mut buf, cursor, value);
                }
            }
        }
        buf
    }

    /// # Errors
    /// Returns an error string describing which invariant failed; the
    /// caller (`btree::tree`) wraps it into `BTreeError::PageCorrupted`.
    pub fn from_bytes(page_id: u32, buf: &[u8; PAGE_DATA_SIZE]) -> Result<Self, String> {
        let is_leaf = buf[0] != 0;
        let key_count = u16::from_le_bytes(buf[1..3].try_into().unwrap()) as usize;
        let next = u32::from_le_bytes(buf[3..7].try_into().unwrap());
        let prev = u32::from_le_bytes(buf[7..11].try_into().unwrap());

        let mut cursor = NODE_HEADER_SIZE;
        let mut keys = Vec::with_capacity(key_count);

        let body = if is_leaf {
            let mut values = Vec::with_capacity(key_count);
            for _ in 0..key_count {
                let (key, next_cursor) = read_blob(buf, cursor)?;
                cursor = next_cursor;
                let (value, next_cursor) = read_blob(buf, cursor)?;
                cursor = next_cursor;
                keys.push(key);
                values.push(value);
            }
            NodeBody::Leaf { values }
        } else {
            let mut children = Vec::with_capacity(key_count + 1);
            if cursor + 4 > PAGE_DATA_SIZE {
                return Err("internal node truncated reading first child".into());
            }
            children.push(u32::from_le_bytes(buf[cursor..cursor + 4].try_into().unwrap()));
            cursor += 4;
            for _ in 0..key_count {
                let (key, next_cursor) = read_blob(buf, cursor)?;
                cursor = next_cursor;
                if cursor + 4 > PAGE_DATA_SIZE {
                    return Err("internal node truncated reading child pointer".into());
                }
                children.push(u32::from_le_bytes(buf[cursor..cursor + 4].try_into().unwrap()));
                cursor += 4;
            }
            NodeBody::Internal { children }
        };

        let node = Self { page_id, next, prev, keys, body };
        if !node.check_structure() {
            return Err(format!("node {page_id} failed structural invariant check"));
        }
        Ok(node)
    }
}

fn write_blob(buf: &mut [u8; PAGE_DATA_SIZE], cursor: usize, blob: &[u8]) -> usize {
    buf[cursor..cursor + 2].copy_from_slice(&(blob.len() as u16).to_le_bytes());
    buf[cursor + 2..cursor + 2 + blob.len()].copy_from_slice(blob);
    cursor + 2 + blob.len()
}

fn read_blob(buf: &[u8; PAGE_DATA_SIZE], cursor: usize) -> Result<(Vec<u8>, usize), String> {
    if cursor + 2 > PAGE_DATA_SIZE {
        return Err("node truncated reading blob length".into());
    }
    let len = u16::from_le_bytes(buf[cursor..cursor + 2].try_into().unwrap()) as usize;
    let start = cursor + 2;
    if start + len > PAGE_DATA_SIZE {
        return Err("node truncated reading blob body".into());
    }
    Ok((buf[start..start + len].to_vec(), start + len))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn leaf_round_trips() {
        let mut node = BTreeNode::new_leaf(3);
        node.keys.push(b"k1".to_vec());
        if let NodeBody::Leaf { values } = &mut node.body {
            values.push(b"v1".to_vec());
        }
        node.next = 4;
        node.prev = 2;

        let bytes = node.to_bytes();
        let parsed = BTreeNode::from_bytes(3, &bytes).unwrap();
        assert_eq!(parsed, node);
    }

    #[test]
    fn internal_round_trips() {
        let node = BTreeNode { page_id: 1, next: 0, prev: 0, keys: vec![b"m".to_vec()], body: NodeBody::Internal { children: vec![10, 20] } };
        let bytes = node.to_bytes();
        let parsed = BTreeNode::from_bytes(1, &bytes).unwrap();
        assert_eq!(parsed, node);
    }

    #[test]
    fn mismatched_children_count_fails_structure_check() {
        let node = BTreeNode { page_id: 1, next: 0, prev: 0, keys: vec![b"m".to_vec()], body: NodeBody::Internal { children: vec![10] } };
        assert!(!node.check_structure());
    }
}
