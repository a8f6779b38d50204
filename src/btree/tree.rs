//! B+Tree over pages (L2): order-50, byte-comparable keys, leaf
//! doubly-linked list, split/borrow/merge rebalancing, per spec.md §4.4.
//! Keys are raw bytes produced by [`crate::keystring`]; lexicographic
//! `Vec<u8>`/`[u8]` ordering is exactly the order the encoder guarantees,
//! so the tree itself never needs to know what a key "means".
//!
//! Grounded on `small-db-small-db/src/btree/table/{insert,delete}.rs` for
//! the preemptive-split-on-descent insert shape and the
//! borrow-then-merge delete shape; generalized from the teacher's
//! fixed-width integer keys to variable-length byte strings and from its
//! page-pointer node references to page ids read through the pager, per
//! spec.md §9's note that the tree must route every node access through
//! the pager to sidestep ownership cycles.

use crate::btree::node::{BTreeNode, NodeBody};
use crate::btree::BTreeError;
use crate::storage::page::{Page, PageType};
use crate::storage::pager::Pager;

fn read_node(pager: &mut Pager, page_id: u32) -> Result<BTreeNode, BTreeError> {
    let page = pager.read_page(page_id)?;
    BTreeNode::from_bytes(page_id, &page.data).map_err(BTreeError::PageCorrupted)
}

fn write_node(pager: &mut Pager, node: &BTreeNode) -> Result<(), BTreeError> {
    let mut page = Page::new(node.page_id, PageType::Index);
    page.item_count = node.key_count() as u16;
    page.next_page_id = node.next;
    page.prev_page_id = node.prev;
    *page.data = node.to_bytes();
    pager.write_page(page)?;
    Ok(())
}

/// First child index to descend into for `key`: the smallest `i` such
/// that `key < keys[i]`, else the last child.
fn child_index_for_key(node: &BTreeNode, key: &[u8]) -> usize {
    let i = node.keys.iter().position(|k| key < k.as_slice()).unwrap_or(node.keys.len());
    i
}

#[derive(Debug, Clone)]
pub struct BTree {
    pub root_page_id: u32,
}

impl BTree {
    /// Allocates a fresh leaf-root page and returns a tree rooted there.
    ///
    /// # Errors
    /// Returns `BTreeError::Pager` on allocation failure.
    pub fn create(pager: &mut Pager) -> Result<Self, BTreeError> {
        let page = pager.allocate_page(PageType::Index)?;
        let root = BTreeNode::new_leaf(page.page_id);
        write_node(pager, &root)?;
        Ok(Self { root_page_id: root.page_id })
    }

    /// Reopens a tree whose root page id was previously recorded in the
    /// catalog.
    #[must_use]
    pub fn open(root_page_id: u32) -> Self {
        Self { root_page_id }
    }

    /// # Errors
    /// Returns `BTreeError` on a corrupted node or pager failure.
    pub fn search(&self, pager: &mut Pager, key: &[u8]) -> Result<Option<Vec<u8>>, BTreeError> {
        let mut cur = self.root_page_id;
        loop {
            let node = read_node(pager, cur)?;
            match &node.body {
                NodeBody::Leaf { values } => {
                    return Ok(node
                        .keys
                        .iter()
                        .position(|k| k.as_slice() == key)
                        .map(|i| values[i].clone()));
                }
                NodeBody::Internal { children } => {
                    let i = child_index_for_key(&node, key);
                    cur = children[i];
                }
            }
        }
    }

    /// Range scan over `[lower, upper)` (either bound optional), in
    /// ascending key order, walking the leaf chain after descending once.
    ///
    /// # Errors
    /// Returns `BTreeError` on a corrupted node or pager failure.
    pub fn range(
        &self,
        pager: &mut Pager,
        lower: Option<&[u8]>,
        upper: Option<&[u8]>,
    ) -> Result<Vec<(Vec<u8>, Vec<u8>)>, BTreeError> {
        let mut cur = self.root_page_id;
        loop {
            let node = read_node(pager, cur)?;
            match &node.body {
                NodeBody::Leaf { .. } => break,
                NodeBody::Internal { children } => {
                    let i = lower.map_or(0, |k| child_index_for_key(&node, k));
                    cur = children[i];
                }
            }
        }
        let mut out = Vec::new();
        let mut cur = Some(cur);
        'outer: while let Some(page_id) = cur {
            let node = read_node(pager, page_id)?;
            let NodeBody::Leaf { values } = &node.body else {
                return Err(BTreeError::PageCorrupted(format!("leaf chain hit non-leaf page {page_id}")));
            };
            for (k, v) in node.keys.iter().zip(values.iter()) {
                if let Some(lo) = lower {
                    if k.as_slice() < lo {
                        continue;
                    }
                }
                if let Some(hi) = upper {
                    if k.as_slice() >= hi {
                        break 'outer;
                    }
                }
                out.push((k.clone(), v.clone()));
            }
            cur = if node.next == 0 { None } else { Some(node.next) };
        }
        Ok(out)
    }

    /// # Errors
    /// Returns `BTreeError::DuplicateKey` if `unique` and `key` already
    /// exists, or other `BTreeError` variants on structural/pager failure.
    pub fn insert(&mut self, pager: &mut Pager, key: Vec<u8>, value: Vec<u8>, unique: bool) -> Result<(), BTreeError> {
        let root = read_node(pager, self.root_page_id)?;
        if root.is_full() {
            let new_root_page = pager.allocate_page(PageType::Index)?;
            let mut new_root = BTreeNode::new_internal(new_root_page.page_id, vec![self.root_page_id]);
            write_node(pager, &new_root)?;
            self.split_child(pager, &mut new_root, 0)?;
            self.root_page_id = new_root.page_id;
        }
        self.insert_non_full(pager, self.root_page_id, key, value, unique)
    }

    fn insert_non_full(
        &mut self,
        pager: &mut Pager,
        node_id: u32,
        key: Vec<u8>,
        value: Vec<u8>,
        unique: bool,
    ) -> Result<(), BTreeError> {
        let mut node = read_node(pager, node_id)?;
        match &node.body {
            NodeBody::Leaf { .. } => {
                let pos = node.keys.partition_point(|k| k.as_slice() < key.as_slice());
                if unique && pos < node.keys.len() && node.keys[pos] == key {
                    return Err(BTreeError::DuplicateKey);
                }
                node.keys.insert(pos, key);
                if let NodeBody::Leaf { values } = &mut node.body {
                    values.insert(pos, value);
                }
                write_node(pager, &node)
            }
            NodeBody::Internal { children } => {
                let mut i = child_index_for_key(&node, &key);
                let child_id = children[i];
                let child = read_node(pager, child_id)?;
                if child.is_full() {
                    self.split_child(pager, &mut node, i)?;
                    if let NodeBody::Internal { .. } = &node.body {
                        if key.as_slice() >= node.keys[i].as_slice() {
                            i += 1;
                        }
                    }
                }
                let next_child = match &node.body {
                    NodeBody::Internal { children } => children[i],
                    NodeBody::Leaf { .. } => unreachable!(),
                };
                self.insert_non_full(pager, next_child, key, value, unique)
            }
        }
    }

    /// Splits `parent.children()[child_index]` in place, promoting a
    /// median key into `parent` and inserting the new sibling's page id.
    /// Writes the child, the new sibling, then the parent, per spec.md
    /// §4.4's write-ordering note.
    fn split_child(&mut self, pager: &mut Pager, parent: &mut BTreeNode, child_index: usize) -> Result<(), BTreeError> {
        let child_id = match &parent.body {
            NodeBody::Internal { children } => children[child_index],
            NodeBody::Leaf { .. } => return Err(BTreeError::PageCorrupted("split_child called on a leaf parent".into())),
        };
        let mut child = read_node(pager, child_id)?;
        if !child.check_structure() {
            return Err(BTreeError::PageCorrupted(format!("page {child_id} failed structural invariant check")));
        }

        let sibling_page = pager.allocate_page(PageType::Index)?;
        let sibling_id = sibling_page.page_id;

        let split = split_point(&child);

        match child.body.clone() {
            NodeBody::Leaf { values } => {
                let sibling_keys = child.keys.split_off(split);
                let sibling_values_all = values;
                let sibling_values = sibling_values_all[split..].to_vec();
                let child_values = sibling_values_all[..split].to_vec();
                let promoted = sibling_keys[0].clone();

                let mut sibling = BTreeNode {
                    page_id: sibling_id,
                    next: child.next,
                    prev: child.page_id,
                    keys: sibling_keys,
                    body: NodeBody::Leaf { values: sibling_values },
                };
                child.body = NodeBody::Leaf { values: child_values };
                child.next = sibling_id;

                if sibling.next != 0 {
                    let mut old_successor = read_node(pager, sibling.next)?;
                    old_successor.prev = sibling_id;
                    write_node(pager, &old_successor)?;
                }

                write_node(pager, &child)?;
                write_node(pager, &sibling)?;

                if let NodeBody::Internal { children } = &mut parent.body {
                    parent.keys.insert(child_index, promoted);
                    children.insert(child_index + 1, sibling_id);
                }
                write_node(pager, parent)?;
            }
            NodeBody::Internal { children: child_children } => {
                if !(1..child.keys.len()).contains(&split) {
                    return Err(BTreeError::PageCorrupted(format!("page {child_id} has an invalid split point")));
                }
                let promoted = child.keys[split].clone();
                let sibling_keys = child.keys.split_off(split + 1);
                let popped_separator = child.keys.pop();
                debug_assert_eq!(popped_separator.as_ref(), Some(&promoted));

                let sibling_children = child_children[split + 1..].to_vec();
                let child_children_kept = child_children[..=split].to_vec();

                let sibling = BTreeNode {
                    page_id: sibling_id,
                    next: 0,
                    prev: 0,
                    keys: sibling_keys,
                    body: NodeBody::Internal { children: sibling_children },
                };
                child.body = NodeBody::Internal { children: child_children_kept };

                if !child.check_structure() || !sibling.check_structure() {
                    pager.free_page(sibling_id)?;
                    return Err(BTreeError::PageCorrupted(format!("split of page {child_id} violated structural invariants")));
                }

                write_node(pager, &child)?;
                write_node(pager, &sibling)?;

                if let NodeBody::Internal { children } = &mut parent.body {
                    parent.keys.insert(child_index, promoted);
                    children.insert(child_index + 1, sibling_id);
                }
                write_node(pager, parent)?;
            }
        }
        Ok(())
    }

    /// # Errors
    /// Returns `BTreeError` on a corrupted node or pager failure.
    pub fn delete(&mut self, pager: &mut Pager, key: &[u8]) -> Result<bool, BTreeError> {
        let mut stack: Vec<u32> = Vec::new();
        let mut cur = self.root_page_id;
        loop {
            let mut node = read_node(pager, cur)?;
            match node.body.clone() {
                NodeBody::Leaf { mut values } => {
                    let Some(pos) = node.keys.iter().position(|k| k.as_slice() == key) else {
                        return Ok(false);
                    };
                    node.keys.remove(pos);
                    values.remove(pos);
                    node.body = NodeBody::Leaf { values };
                    write_node(pager, &node)?;
                    break;
                }
                NodeBody::Internal { children } => {
                    stack.push(cur);
                    let i = child_index_for_key(&node, key);
                    cur = children[i];
                }
            }
        }

        let mut child_id = cur;
        while let Some(parent_id) = stack.pop() {
            let child = read_node(pager, child_id)?;
            if !child.is_underflow() {
                break;
            }
            self.fix_underflow(pager, parent_id, child_id)?;
            child_id = parent_id;
        }

        let root = read_node(pager, self.root_page_id)?;
        if let NodeBody::Internal { children } = &root.body {
            if root.keys.is_empty() && children.len() == 1 {
                let new_root = children[0];
                pager.free_page(self.root_page_id)?;
                self.root_page_id = new_root;
            }
        }
        Ok(true)
    }

    fn fix_underflow(&mut self, pager: &mut Pager, parent_id: u32, child_id: u32) -> Result<(), BTreeError> {
        let mut parent = read_node(pager, parent_id)?;
        let children = match &parent.body {
            NodeBody::Internal { children } => children.clone(),
            NodeBody::Leaf { .. } => return Err(BTreeError::PageCorrupted("fix_underflow called with a leaf parent".into())),
        };
        let idx = children
            .iter()
            .position(|&c| c == child_id)
            .ok_or_else(|| BTreeError::PageCorrupted(format!("page {child_id} is not a child of {parent_id}")))?;

        if idx > 0 {
            let left_id = children[idx - 1];
            let left = read_node(pager, left_id)?;
            if left.key_count() > BTreeNode::min_keys() {
                let child = read_node(pager, child_id)?;
                self.borrow_from_left(pager, &mut parent, idx, left, child)?;
                return Ok(());
            }
        }
        if idx + 1 < children.len() {
            let right_id = children[idx + 1];
            let right = read_node(pager, right_id)?;
            if right.key_count() > BTreeNode::min_keys() {
                let child = read_node(pager, child_id)?;
                self.borrow_from_right(pager, &mut parent, idx, child, right)?;
                return Ok(());
            }
        }

        if idx > 0 {
            let left = read_node(pager, children[idx - 1])?;
            let child = read_node(pager, child_id)?;
            self.merge_nodes(pager, &mut parent, idx - 1, left, child)
        } else {
            let child = read_node(pager, child_id)?;
            let right = read_node(pager, children[idx + 1])?;
            self.merge_nodes(pager, &mut parent, idx, child, right)
        }
    }

    fn borrow_from_left(
        &mut self,
        pager: &mut Pager,
        parent: &mut BTreeNode,
        idx: usize,
        mut left: BTreeNode,
        mut child: BTreeNode,
    ) -> Result<(), BTreeError> {
        match (&mut left.body, &mut child.body) {
            (NodeBody::Leaf { values: left_values }, NodeBody::Leaf { values: child_values }) => {
                let borrowed_key = left.keys.pop().expect("left sibling has keys to lend");
                let borrowed_value = left_values.pop().expect("left sibling has values to lend");
                child.keys.insert(0, borrowed_key.clone());
                child_values.insert(0, borrowed_value);
                parent.keys[idx - 1] = borrowed_key;
            }
            (NodeBody::Internal { children: left_children }, NodeBody::Internal { children: child_children }) => {
                let borrowed_child = left_children.pop().expect("left sibling has children to lend");
                let separator_down = parent.keys[idx - 1].clone();
                child.keys.insert(0, separator_down);
                child_children.insert(0, borrowed_child);
                let new_separator = left.keys.pop().expect("left sibling has keys to lend");
                parent.keys[idx - 1] = new_separator;
            }
            _ => return Err(BTreeError::PageCorrupted("borrow_from_left between mismatched node kinds".into())),
        }
        write_node(pager, &left)?;
        write_node(pager, &child)?;
        write_node(pager, parent)?;
        Ok(())
    }

    fn borrow_from_right(
        &mut self,
        pager: &mut Pager,
        parent: &mut BTreeNode,
        idx: usize,
        mut child: BTreeNode,
        mut right: BTreeNode,
    ) -> Result<(), BTreeError> {
        match (&mut child.body, &mut right.body) {
            (NodeBody::Leaf { values: child_values }, NodeBody::Leaf { values: right_values }) => {
                let borrowed_key = right.keys.remove(0);
                let borrowed_value = right_values.remove(0);
                child.keys.push(borrowed_key);
                child_values.push(borrowed_value);
                parent.keys[idx] = right.keys[0].clone();
            }
            (NodeBody::Internal { children: child_children }, NodeBody::Internal { children: right_children }) => {
                let separator_down = parent.keys[idx].clone();
                child.keys.push(separator_down);
                child_children.push(right_children.remove(0));
                let new_separator = right.keys.remove(0);
                parent.keys[idx] = new_separator;
            }
            _ => return Err(BTreeError::PageCorrupted("borrow_from_right between mismatched node kinds".into())),
        }
        write_node(pager, &child)?;
        write_node(pager, &right)?;
        write_node(pager, parent)?;
        Ok(())
    }

    fn merge_nodes(
        &mut self,
        pager: &mut Pager,
        parent: &mut BTreeNode,
        left_idx: usize,
        mut left: BTreeNode,
        right: BTreeNode,
    ) -> Result<(), BTreeError> {
        let right_id = right.page_id;
        match (&mut left.body, right.body) {
            (NodeBody::Leaf { values: left_values }, NodeBody::Leaf { values: right_values }) => {
                left.keys.extend(right.keys);
                left_values.extend(right_values);
                left.next = right.next;
                if left.next != 0 {
                    let mut successor = read_node(pager, left.next)?;
                    successor.prev = left.page_id;
                    write_node(pager, &successor)?;
                }
            }
            (NodeBody::Internal { children: left_children }, NodeBody::Internal { children: right_children }) => {
                let separator = parent.keys[left_idx].clone();
                left.keys.push(separator);
                left.keys.extend(right.keys);
                left_children.extend(right_children);
            }
            _ => return Err(BTreeError::PageCorrupted("merge_nodes between mismatched node kinds".into())),
        }
        if let NodeBody::Internal { children } = &mut parent.body {
            parent.keys.remove(left_idx);
            children.remove(left_idx + 1);
        }
        write_node(pager, &left)?;
        write_node(pager, parent)?;
        pager.free_page(right_id)?;
        Ok(())
    }

    /// Asserts `children.len == keyCount + 1` for every internal node and
    /// `children.len == 0` (flat values array matching `keys.len`) for
    /// every leaf, across the whole tree.
    ///
    /// # Errors
    /// Returns `BTreeError::PageCorrupted` naming the first page that
    /// fails its structural check.
    pub fn check_tree_integrity(&self, pager: &mut Pager) -> Result<(), BTreeError> {
        self.check_subtree(pager, self.root_page_id)
    }

    fn check_subtree(&self, pager: &mut Pager, page_id: u32) -> Result<(), BTreeError> {
        let node = read_node(pager, page_id)?;
        if !node.check_structure() {
            return Err(BTreeError::PageCorrupted(format!("page {page_id} failed structural invariant check")));
        }
        if let NodeBody::Internal { children } = &node.body {
            for &child in children {
                self.check_subtree(pager, child)?;
            }
        }
        Ok(())
    }

    /// Walks the leaf chain from the leftmost leaf, asserting `prev`
    /// backlinks and strictly increasing keys across node boundaries.
    ///
    /// # Errors
    /// Returns `BTreeError::PageCorrupted` on a broken backlink or a
    /// non-increasing key sequence.
    pub fn check_leaf_chain(&self, pager: &mut Pager) -> Result<(), BTreeError> {
        let mut cur = self.root_page_id;
        loop {
            let node = read_node(pager, cur)?;
            match &node.body {
                NodeBody::Leaf { .. } => break,
                NodeBody::Internal { children } => cur = children[0],
            }
        }

        let mut prev_id = 0u32;
        let mut last_key: Option<Vec<u8>> = None;
        let mut next = Some(cur);
        while let Some(page_id) = next {
            let node = read_node(pager, page_id)?;
            if node.prev != prev_id {
                return Err(BTreeError::PageCorrupted(format!(
                    "leaf {page_id} has prev={}, expected {prev_id}",
                    node.prev
                )));
            }
            for key in &node.keys {
                if let Some(last) = &last_key {
                    if key <= last {
                        return Err(BTreeError::PageCorrupted(format!("leaf chain keys are not strictly increasing at page {page_id}")));
                    }
                }
                last_key = Some(key.clone());
            }
            prev_id = page_id;
            next = if node.next == 0 { None } else { Some(node.next) };
        }
        Ok(())
    }
}

/// Byte-weight-based split point, clamped to `[1, keyCount - 1]` so both
/// halves remain non-empty.
fn split_point(node: &BTreeNode) -> usize {
    let total_weight = node.serialized_weight().max(1);
    let half = total_weight / 2;
    let mut acc = 0usize;
    let mut split = node.key_count() / 2;
    for (i, key) in node.keys.iter().enumerate() {
        acc += key.len() + 2;
        if let NodeBody::Leaf { values } = &node.body {
            acc += values[i].len() + 2;
        } else {
            acc += 4;
        }
        if acc >= half {
            split = i;
            break;
        }
    }
    split.clamp(1, node.key_count().saturating_sub(1).max(1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn key(n: u32) -> Vec<u8> {
        n.to_be_bytes().to_vec()
    }

    #[test]
    fn insert_and_search_round_trip() {
        let dir = tempdir().unwrap();
        let mut pager = Pager::open(&dir.path().join("t.db"), 64).unwrap();
        let mut tree = BTree::create(&mut pager).unwrap();

        for i in 0..200u32 {
            tree.insert(&mut pager, key(i), format!("v{i}").into_bytes(), true).unwrap();
        }
        for i in 0..200u32 {
            let v = tree.search(&mut pager, &key(i)).unwrap().unwrap();
            assert_eq!(v, format!("v{i}").into_bytes());
        }
        tree.check_tree_integrity(&mut pager).unwrap();
        tree.check_leaf_chain(&mut pager).unwrap();
    }

    #[test]
    fn duplicate_unique_key_rejected() {
        let dir = tempdir().unwrap();
        let mut pager = Pager::open(&dir.path().join("t.db"), 64).unwrap();
        let mut tree = BTree::create(&mut pager).unwrap();
        tree.insert(&mut pager, key(1), b"a".to_vec(), true).unwrap();
        let err = tree.insert(&mut pager, key(1), b"b".to_vec(), true).unwrap_err();
        assert!(matches!(err, BTreeError::DuplicateKey));
    }

    #[test]
    fn delete_then_reinsert_restores_entry_set() {
        let dir = tempdir().unwrap();
        let mut pager = Pager::open(&dir.path().join("t.db"), 64).unwrap();
        let mut tree = BTree::create(&mut pager).unwrap();
        for i in 0..300u32 {
            tree.insert(&mut pager, key(i), key(i), true).unwrap();
        }
        for i in (0..300u32).step_by(2) {
            assert!(tree.delete(&mut pager, &key(i)).unwrap());
        }
        tree.check_tree_integrity(&mut pager).unwrap();
        tree.check_leaf_chain(&mut pager).unwrap();
        for i in 0..300u32 {
            let found = tree.search(&mut pager, &key(i)).unwrap();
            if i % 2 == 0 {
                assert!(found.is_none());
            } else {
                assert!(found.is_some());
            }
        }
    }

    #[test]
    fn range_scan_is_ordered_and_bounded() {
        let dir = tempdir().unwrap();
        let mut pager = Pager::open(&dir.path().join("t.db"), 64).unwrap();
        let mut tree = BTree::create(&mut pager).unwrap();
        for i in 0..50u32 {
            tree.insert(&mut pager, key(i), key(i), true).unwrap();
        }
        let results = tree.range(&mut pager, Some(&key(10)), Some(&key(15))).unwrap();
        let got: Vec<u32> = results.iter().map(|(k, _)| u32::from_be_bytes(k[..4].try_into().unwrap())).collect();
        assert_eq!(got, vec![10, 11, 12, 13, 14]);
    }
}
