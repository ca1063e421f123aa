//! The disk-backed B+ tree.
//!
//! An ordered multimap from composite key to document id. Nodes live on
//! INDEX_NODE pages (chained over OVERFLOW pages when large) and reference
//! each other by page id only. The root page id is fixed for the tree's
//! lifetime: root splits move the old root's content to a fresh page and the
//! root page becomes the new internal node, so the catalog never has to
//! chase a moving root.
//!
//! Duplicate handling: a non-unique tree stores equal keys as a run. Runs
//! may straddle a separator after borrows, so lookups and deletes descend
//! with "equal goes left" and walk the sibling chain forward, while inserts
//! descend with "equal goes right".

use crate::buffer::BufferPool;
use crate::cancel::CancelToken;
use crate::error::{Error, Result};
use crate::index::node::TreeNode;
use crate::index::IndexKey;
use crate::types::{PageId, PageType};
use crate::value::Value;
use std::sync::Arc;

/// Outcome of a recursive insert below some node
enum InsertOutcome {
    Done { added: bool },
    Split {
        sep: IndexKey,
        right: PageId,
        added: bool,
    },
}

/// A disk-backed B+ tree
pub struct BTree {
    pool: Arc<BufferPool>,
    root: PageId,
    order: usize,
    unique: bool,
    name: String,
}

impl BTree {
    /// Create a fresh tree with an empty leaf root
    pub fn create(
        pool: Arc<BufferPool>,
        name: impl Into<String>,
        order: usize,
        unique: bool,
    ) -> Result<Self> {
        let root = pool.new_page(PageType::IndexNode)?.id();
        let tree = Self {
            pool,
            root,
            order: order.max(4),
            unique,
            name: name.into(),
        };
        tree.store(&TreeNode::new_leaf(root))?;
        Ok(tree)
    }

    /// Open an existing tree rooted at `root`
    pub fn open(
        pool: Arc<BufferPool>,
        name: impl Into<String>,
        root: PageId,
        order: usize,
        unique: bool,
    ) -> Self {
        Self {
            pool,
            root,
            order: order.max(4),
            unique,
            name: name.into(),
        }
    }

    /// The fixed root page id
    pub fn root_page(&self) -> PageId {
        self.root
    }

    /// Whether this tree enforces key uniqueness
    pub fn is_unique(&self) -> bool {
        self.unique
    }

    /// Total entries in the tree
    pub fn count(&self) -> Result<u64> {
        Ok(self.load(self.root)?.entry_count)
    }

    fn min_keys(&self) -> usize {
        self.order / 2
    }

    // ------------------------------------------------------------------
    // Node I/O
    // ------------------------------------------------------------------

    pub(crate) fn load(&self, page_id: PageId) -> Result<Arc<TreeNode>> {
        if let Some(node) = self.pool.parsed_get::<TreeNode>(page_id) {
            return Ok(node);
        }
        let bytes = self.pool.read_chain(page_id)?;
        let node = Arc::new(TreeNode::deserialize(page_id, &bytes)?);
        self.pool.parsed_put(page_id, Arc::clone(&node));
        Ok(node)
    }

    fn store(&self, node: &TreeNode) -> Result<()> {
        let bytes = node.serialize();
        self.pool.write_chain(node.page_id, &bytes)?;
        // re-cache after write_chain invalidated the entry
        self.pool.parsed_put(node.page_id, Arc::new(node.clone()));
        Ok(())
    }

    // ------------------------------------------------------------------
    // Insert
    // ------------------------------------------------------------------

    /// Insert a (key, doc-id) entry.
    ///
    /// A unique tree rejects an equal key with `DuplicateKey`; a non-unique
    /// tree treats an identical (key, doc-id) pair as a no-op. Returns
    /// whether an entry was added.
    pub fn insert(&mut self, key: &IndexKey, doc_id: &Value, token: &CancelToken) -> Result<bool> {
        token.check()?;
        match self.insert_rec(self.root, key, doc_id)? {
            InsertOutcome::Done { added } => Ok(added),
            InsertOutcome::Split { sep, right, added } => {
                self.split_root(sep, right)?;
                Ok(added)
            }
        }
    }

    fn insert_rec(&self, page_id: PageId, key: &IndexKey, doc_id: &Value) -> Result<InsertOutcome> {
        let node = self.load(page_id)?;
        if node.leaf {
            return self.insert_leaf((*node).clone(), key, doc_id);
        }

        let idx = node.descend_upper(key);
        let child = node.children[idx];
        let outcome = self.insert_rec(child, key, doc_id)?;

        let mut node = (*node).clone();
        match outcome {
            InsertOutcome::Done { added } => {
                if added {
                    node.entry_count += 1;
                    self.store(&node)?;
                }
                Ok(InsertOutcome::Done { added })
            }
            InsertOutcome::Split { sep, right, added } => {
                if added {
                    node.entry_count += 1;
                }
                node.keys.insert(idx, sep);
                node.children.insert(idx + 1, right);
                if node.keys.len() > self.order {
                    let (sep2, right2) = self.split_internal(&mut node)?;
                    self.store(&node)?;
                    Ok(InsertOutcome::Split {
                        sep: sep2,
                        right: right2,
                        added,
                    })
                } else {
                    self.store(&node)?;
                    Ok(InsertOutcome::Done { added })
                }
            }
        }
    }

    fn insert_leaf(
        &self,
        mut node: TreeNode,
        key: &IndexKey,
        doc_id: &Value,
    ) -> Result<InsertOutcome> {
        let pos = node.keys.partition_point(|k| k <= key);
        if self.unique && pos > 0 && node.keys[pos - 1] == *key {
            return Err(Error::DuplicateKey {
                index: self.name.clone(),
                key: key.to_string(),
            });
        }
        if !self.unique && self.run_contains_pair(&node, pos, key, doc_id)? {
            return Ok(InsertOutcome::Done { added: false });
        }

        node.keys.insert(pos, key.clone());
        node.entries.insert(pos, doc_id.clone());
        node.entry_count += 1;

        if node.keys.len() > self.order {
            let (sep, right) = self.split_leaf(&mut node)?;
            self.store(&node)?;
            Ok(InsertOutcome::Split {
                sep,
                right,
                added: true,
            })
        } else {
            self.store(&node)?;
            Ok(InsertOutcome::Done { added: true })
        }
    }

    /// Whether the duplicate run for `key` already holds this exact pair.
    ///
    /// The run can extend backwards across sibling leaves.
    fn run_contains_pair(
        &self,
        node: &TreeNode,
        upper: usize,
        key: &IndexKey,
        doc_id: &Value,
    ) -> Result<bool> {
        let mut i = upper;
        while i > 0 && node.keys[i - 1] == *key {
            if node.entries[i - 1] == *doc_id {
                return Ok(true);
            }
            i -= 1;
        }
        if i > 0 {
            // the run starts inside this leaf
            return Ok(false);
        }
        let mut prev = node.prev;
        while prev.is_some() {
            let sib = self.load(prev)?;
            let mut j = sib.keys.len();
            while j > 0 && sib.keys[j - 1] == *key {
                if sib.entries[j - 1] == *doc_id {
                    return Ok(true);
                }
                j -= 1;
            }
            if j > 0 || sib.keys.is_empty() {
                return Ok(false);
            }
            prev = sib.prev;
        }
        Ok(false)
    }

    fn split_leaf(&self, left: &mut TreeNode) -> Result<(IndexKey, PageId)> {
        let mid = left.keys.len() / 2;
        let right_id = self.pool.new_page(PageType::IndexNode)?.id();

        let mut right = TreeNode::new_leaf(right_id);
        right.keys = left.keys.split_off(mid);
        right.entries = left.entries.split_off(mid);
        right.parent = left.parent;
        right.prev = left.page_id;
        right.next = left.next;
        right.entry_count = right.keys.len() as u64;
        left.entry_count = left.keys.len() as u64;
        left.next = right_id;

        if right.next.is_some() {
            let mut after = (*self.load(right.next)?).clone();
            after.prev = right_id;
            self.store(&after)?;
        }

        let sep = right.keys[0].clone();
        self.store(&right)?;
        Ok((sep, right_id))
    }

    fn split_internal(&self, left: &mut TreeNode) -> Result<(IndexKey, PageId)> {
        let mid = left.keys.len() / 2;
        let right_id = self.pool.new_page(PageType::IndexNode)?.id();

        let mut right = TreeNode::new_internal(right_id);
        right.keys = left.keys.split_off(mid + 1);
        let sep = left.keys.remove(mid);
        right.children = left.children.split_off(mid + 1);
        right.parent = left.parent;

        let mut moved = 0u64;
        for &child in &right.children {
            let mut node = (*self.load(child)?).clone();
            node.parent = right_id;
            moved += node.entry_count;
            self.store(&node)?;
        }
        right.entry_count = moved;
        left.entry_count -= moved;

        self.store(&right)?;
        Ok((sep, right_id))
    }

    /// Grow the tree by one level, keeping the root page id fixed
    fn split_root(&self, sep: IndexKey, right_id: PageId) -> Result<()> {
        let old_root = self.load(self.root)?;
        let left_id = self.pool.new_page(PageType::IndexNode)?.id();

        let mut left = (*old_root).clone();
        left.page_id = left_id;
        left.parent = self.root;

        let mut right = (*self.load(right_id)?).clone();
        right.parent = self.root;
        if right.leaf {
            right.prev = left_id;
        }
        self.store(&right)?;

        if !left.leaf {
            for &child in &left.children {
                let mut node = (*self.load(child)?).clone();
                node.parent = left_id;
                self.store(&node)?;
            }
        }
        self.store(&left)?;

        let mut new_root = TreeNode::new_internal(self.root);
        new_root.keys = vec![sep];
        new_root.children = vec![left_id, right_id];
        new_root.entry_count = left.entry_count + right.entry_count;
        self.store(&new_root)
    }

    // ------------------------------------------------------------------
    // Delete
    // ------------------------------------------------------------------

    /// Remove the entry matching (key, doc-id). Returns whether it existed.
    pub fn delete(&mut self, key: &IndexKey, doc_id: &Value, token: &CancelToken) -> Result<bool> {
        token.check()?;
        let Some((leaf, idx)) = self.find_entry(key, doc_id)? else {
            return Ok(false);
        };

        let mut node = (*leaf).clone();
        node.keys.remove(idx);
        node.entries.remove(idx);
        node.entry_count -= 1;
        self.store(&node)?;
        self.propagate_removal(node.parent)?;

        if node.page_id != self.root && node.keys.len() < self.min_keys() {
            self.rebalance(node)?;
        }
        Ok(true)
    }

    /// Locate the leaf and slot holding the exact (key, doc-id) pair
    fn find_entry(&self, key: &IndexKey, doc_id: &Value) -> Result<Option<(Arc<TreeNode>, usize)>> {
        let mut node = self.find_leaf_lower(key)?;
        loop {
            let start = node.keys.partition_point(|k| k < key);
            for i in start..node.keys.len() {
                if node.keys[i] != *key {
                    return Ok(None);
                }
                if node.entries[i] == *doc_id {
                    return Ok(Some((node, i)));
                }
            }
            if node.next.is_none() {
                return Ok(None);
            }
            node = self.load(node.next)?;
        }
    }

    fn propagate_removal(&self, mut parent: PageId) -> Result<()> {
        while parent.is_some() {
            let mut node = (*self.load(parent)?).clone();
            node.entry_count = node.entry_count.saturating_sub(1);
            self.store(&node)?;
            parent = node.parent;
        }
        Ok(())
    }

    fn rebalance(&self, node: TreeNode) -> Result<()> {
        let parent = (*self.load(node.parent)?).clone();
        let idx = parent.child_index(node.page_id).ok_or_else(|| {
            Error::invalid_page(format!(
                "node {} is not a child of its parent {}",
                node.page_id, parent.page_id
            ))
        })?;

        if idx > 0 {
            let left = (*self.load(parent.children[idx - 1])?).clone();
            if left.keys.len() > self.min_keys() {
                return self.borrow_from_left(parent, idx, left, node);
            }
        }
        if idx + 1 < parent.children.len() {
            let right = (*self.load(parent.children[idx + 1])?).clone();
            if right.keys.len() > self.min_keys() {
                return self.borrow_from_right(parent, idx, node, right);
            }
        }

        if idx > 0 {
            let left = (*self.load(parent.children[idx - 1])?).clone();
            self.merge(parent, idx - 1, left, node)
        } else {
            let right = (*self.load(parent.children[idx + 1])?).clone();
            self.merge(parent, idx, node, right)
        }
    }

    fn borrow_from_left(
        &self,
        mut parent: TreeNode,
        idx: usize,
        mut left: TreeNode,
        mut node: TreeNode,
    ) -> Result<()> {
        if node.leaf {
            let last = left.keys.len() - 1;
            let key = left.keys.remove(last);
            let entry = left.entries.remove(last);
            left.entry_count -= 1;
            node.keys.insert(0, key);
            node.entries.insert(0, entry);
            node.entry_count += 1;
            parent.keys[idx - 1] = node.keys[0].clone();
        } else {
            let sep = parent.keys[idx - 1].clone();
            let last_key = left.keys.len() - 1;
            parent.keys[idx - 1] = left.keys.remove(last_key);
            let moved = left.children.remove(left.children.len() - 1);
            node.keys.insert(0, sep);
            node.children.insert(0, moved);

            let mut child = (*self.load(moved)?).clone();
            child.parent = node.page_id;
            let count = child.entry_count;
            self.store(&child)?;
            left.entry_count -= count;
            node.entry_count += count;
        }
        self.store(&left)?;
        self.store(&node)?;
        self.store(&parent)
    }

    fn borrow_from_right(
        &self,
        mut parent: TreeNode,
        idx: usize,
        mut node: TreeNode,
        mut right: TreeNode,
    ) -> Result<()> {
        if node.leaf {
            let key = right.keys.remove(0);
            let entry = right.entries.remove(0);
            right.entry_count -= 1;
            node.keys.push(key);
            node.entries.push(entry);
            node.entry_count += 1;
            parent.keys[idx] = right.keys[0].clone();
        } else {
            let sep = parent.keys[idx].clone();
            parent.keys[idx] = right.keys.remove(0);
            let moved = right.children.remove(0);
            node.keys.push(sep);
            node.children.push(moved);

            let mut child = (*self.load(moved)?).clone();
            child.parent = node.page_id;
            let count = child.entry_count;
            self.store(&child)?;
            right.entry_count -= count;
            node.entry_count += count;
        }
        self.store(&right)?;
        self.store(&node)?;
        self.store(&parent)
    }

    /// Merge `right` into `left` (adjacent siblings, separator at
    /// `parent.keys[sep_idx]`), freeing `right`'s pages
    fn merge(
        &self,
        mut parent: TreeNode,
        sep_idx: usize,
        mut left: TreeNode,
        right: TreeNode,
    ) -> Result<()> {
        if left.leaf {
            left.keys.extend(right.keys);
            left.entries.extend(right.entries);
            left.entry_count += right.entry_count;
            left.next = right.next;
            if left.next.is_some() {
                let mut after = (*self.load(left.next)?).clone();
                after.prev = left.page_id;
                self.store(&after)?;
            }
        } else {
            left.keys.push(parent.keys[sep_idx].clone());
            for &child in &right.children {
                let mut node = (*self.load(child)?).clone();
                node.parent = left.page_id;
                self.store(&node)?;
            }
            left.keys.extend(right.keys);
            left.children.extend(right.children);
            left.entry_count += right.entry_count;
        }

        parent.keys.remove(sep_idx);
        parent.children.remove(sep_idx + 1);
        self.store(&left)?;
        self.pool.free_chain(right.page_id)?;

        if parent.page_id == self.root && parent.keys.is_empty() {
            // height shrinks: fold the single remaining child into the root page
            self.collapse_root(left)
        } else {
            let underflow = parent.page_id != self.root && parent.keys.len() < self.min_keys();
            self.store(&parent)?;
            if underflow {
                self.rebalance(parent)?;
            }
            Ok(())
        }
    }

    fn collapse_root(&self, child: TreeNode) -> Result<()> {
        let mut new_root = child.clone();
        new_root.page_id = self.root;
        new_root.parent = PageId::NONE;
        if new_root.leaf {
            new_root.prev = PageId::NONE;
            new_root.next = PageId::NONE;
        } else {
            for &grandchild in &new_root.children {
                let mut node = (*self.load(grandchild)?).clone();
                node.parent = self.root;
                self.store(&node)?;
            }
        }
        self.store(&new_root)?;
        self.pool.free_chain(child.page_id)
    }

    // ------------------------------------------------------------------
    // Lookups
    // ------------------------------------------------------------------

    /// First doc-id stored under a key equal to `key`
    pub fn find_exact(&self, key: &IndexKey) -> Result<Option<Value>> {
        let mut node = self.find_leaf_lower(key)?;
        loop {
            let start = node.keys.partition_point(|k| k < key);
            if start < node.keys.len() {
                return Ok(if node.keys[start] == *key {
                    Some(node.entries[start].clone())
                } else {
                    None
                });
            }
            if node.next.is_none() {
                return Ok(None);
            }
            node = self.load(node.next)?;
        }
    }

    /// Doc-ids whose keys fall in `[lo, hi]` with per-bound inclusivity,
    /// in ascending key order
    pub fn find_range(
        &self,
        lo: &IndexKey,
        hi: &IndexKey,
        inclusive_lo: bool,
        inclusive_hi: bool,
        token: &CancelToken,
    ) -> Result<Vec<Value>> {
        let mut out = Vec::new();
        let mut node = self.find_leaf_lower(lo)?;
        'walk: loop {
            token.check()?;
            let start = node
                .keys
                .partition_point(|k| if inclusive_lo { k < lo } else { k <= lo });
            for i in start..node.keys.len() {
                let k = &node.keys[i];
                if k > hi || (!inclusive_hi && k == hi) {
                    break 'walk;
                }
                out.push(node.entries[i].clone());
            }
            if node.next.is_none() {
                break;
            }
            node = self.load(node.next)?;
        }
        Ok(out)
    }

    /// `find_range` walking backward through prev-links, descending key order
    pub fn find_range_reverse(
        &self,
        lo: &IndexKey,
        hi: &IndexKey,
        inclusive_lo: bool,
        inclusive_hi: bool,
        token: &CancelToken,
    ) -> Result<Vec<Value>> {
        let mut out = Vec::new();
        let mut node = self.find_leaf_upper(hi)?;
        'walk: loop {
            token.check()?;
            for i in (0..node.keys.len()).rev() {
                let k = &node.keys[i];
                if k > hi || (!inclusive_hi && k == hi) {
                    continue;
                }
                if k < lo || (!inclusive_lo && k == lo) {
                    break 'walk;
                }
                out.push(node.entries[i].clone());
            }
            if node.prev.is_none() {
                break;
            }
            node = self.load(node.prev)?;
        }
        Ok(out)
    }

    /// All (key, doc-id) entries in ascending key order
    pub fn get_all(&self, token: &CancelToken) -> Result<Vec<(IndexKey, Value)>> {
        let mut out = Vec::new();
        let mut node = self.leftmost_leaf()?;
        loop {
            token.check()?;
            for i in 0..node.keys.len() {
                out.push((node.keys[i].clone(), node.entries[i].clone()));
            }
            if node.next.is_none() {
                return Ok(out);
            }
            node = self.load(node.next)?;
        }
    }

    /// All (key, doc-id) entries in descending key order
    pub fn get_all_reverse(&self, token: &CancelToken) -> Result<Vec<(IndexKey, Value)>> {
        let mut out = Vec::new();
        let mut node = self.rightmost_leaf()?;
        loop {
            token.check()?;
            for i in (0..node.keys.len()).rev() {
                out.push((node.keys[i].clone(), node.entries[i].clone()));
            }
            if node.prev.is_none() {
                return Ok(out);
            }
            node = self.load(node.prev)?;
        }
    }

    /// Smallest (key, doc-id) entry in the tree
    pub fn min_entry(&self) -> Result<Option<(IndexKey, Value)>> {
        let node = self.leftmost_leaf()?;
        Ok(node
            .keys
            .first()
            .cloned()
            .zip(node.entries.first().cloned()))
    }

    /// Largest (key, doc-id) entry in the tree
    pub fn max_entry(&self) -> Result<Option<(IndexKey, Value)>> {
        let node = self.rightmost_leaf()?;
        Ok(node.keys.last().cloned().zip(node.entries.last().cloned()))
    }

    pub(crate) fn leftmost_leaf(&self) -> Result<Arc<TreeNode>> {
        let mut node = self.load(self.root)?;
        while !node.leaf {
            node = self.load(node.children[0])?;
        }
        Ok(node)
    }

    pub(crate) fn rightmost_leaf(&self) -> Result<Arc<TreeNode>> {
        let mut node = self.load(self.root)?;
        while !node.leaf {
            node = self.load(node.children[node.children.len() - 1])?;
        }
        Ok(node)
    }

    fn find_leaf_lower(&self, key: &IndexKey) -> Result<Arc<TreeNode>> {
        let mut node = self.load(self.root)?;
        while !node.leaf {
            let idx = node.descend_lower(key);
            node = self.load(node.children[idx])?;
        }
        Ok(node)
    }

    fn find_leaf_upper(&self, key: &IndexKey) -> Result<Arc<TreeNode>> {
        let mut node = self.load(self.root)?;
        while !node.leaf {
            let idx = node.descend_upper(key);
            node = self.load(node.children[idx])?;
        }
        Ok(node)
    }

    // ------------------------------------------------------------------
    // Maintenance
    // ------------------------------------------------------------------

    /// Free every page of the tree. The tree is unusable afterwards.
    pub fn free_pages(&mut self) -> Result<()> {
        let mut stack = vec![self.root];
        let mut pages = Vec::new();
        while let Some(id) = stack.pop() {
            let node = self.load(id)?;
            if !node.leaf {
                stack.extend(node.children.iter().copied());
            }
            pages.push(id);
        }
        for id in pages {
            self.pool.free_chain(id)?;
        }
        Ok(())
    }

    /// Check every structural invariant of the tree.
    ///
    /// Keys are strictly increasing for a unique tree (non-decreasing
    /// otherwise), all leaves sit at the same depth, every non-root node
    /// meets minimum occupancy, parent and sibling links are consistent,
    /// and subtree entry counts add up.
    pub fn validate(&self) -> Result<()> {
        let root_info = self.validate_rec(self.root, PageId::NONE, true)?;

        // the leaf chain must enumerate the same keys, in order, with
        // consistent back-links
        let mut expected_prev = PageId::NONE;
        let mut chain_entries = 0u64;
        let mut last_key: Option<IndexKey> = None;
        let mut node = self.leftmost_leaf()?;
        loop {
            if node.prev != expected_prev {
                return Err(Error::invalid_page(format!(
                    "leaf {} prev-link {} does not match {}",
                    node.page_id, node.prev, expected_prev
                )));
            }
            for key in &node.keys {
                if let Some(prev_key) = &last_key {
                    let ok = if self.unique {
                        prev_key < key
                    } else {
                        prev_key <= key
                    };
                    if !ok {
                        return Err(Error::invalid_page(format!(
                            "keys out of order at leaf {}: {prev_key} then {key}",
                            node.page_id
                        )));
                    }
                }
                last_key = Some(key.clone());
            }
            chain_entries += node.keys.len() as u64;
            expected_prev = node.page_id;
            if node.next.is_none() {
                break;
            }
            node = self.load(node.next)?;
        }

        if chain_entries != root_info.count {
            return Err(Error::invalid_page(format!(
                "leaf chain holds {chain_entries} entries, subtree counts say {}",
                root_info.count
            )));
        }
        Ok(())
    }

    fn validate_rec(
        &self,
        page_id: PageId,
        expected_parent: PageId,
        is_root: bool,
    ) -> Result<SubtreeInfo> {
        let node = self.load(page_id)?;
        if node.parent != expected_parent {
            return Err(Error::invalid_page(format!(
                "node {page_id} parent {} is not {expected_parent}",
                node.parent
            )));
        }
        if !is_root && node.keys.len() < self.min_keys() {
            return Err(Error::invalid_page(format!(
                "node {page_id} below minimum occupancy: {} < {}",
                node.keys.len(),
                self.min_keys()
            )));
        }
        for pair in node.keys.windows(2) {
            let ok = if self.unique {
                pair[0] < pair[1]
            } else {
                pair[0] <= pair[1]
            };
            if !ok {
                return Err(Error::invalid_page(format!(
                    "node {page_id} keys out of order"
                )));
            }
        }

        if node.leaf {
            if node.entries.len() != node.keys.len() {
                return Err(Error::invalid_page(format!(
                    "leaf {page_id} has {} entries for {} keys",
                    node.entries.len(),
                    node.keys.len()
                )));
            }
            if node.entry_count != node.keys.len() as u64 {
                return Err(Error::invalid_page(format!(
                    "leaf {page_id} count {} does not match {} keys",
                    node.entry_count,
                    node.keys.len()
                )));
            }
            return Ok(SubtreeInfo {
                depth: 1,
                count: node.entry_count,
                min: node.keys.first().cloned(),
                max: node.keys.last().cloned(),
            });
        }

        if node.children.len() != node.keys.len() + 1 {
            return Err(Error::invalid_page(format!(
                "internal {page_id} has {} children for {} keys",
                node.children.len(),
                node.keys.len()
            )));
        }

        let mut depth = None;
        let mut total = 0u64;
        let mut min = None;
        let mut max = None;
        for (i, &child) in node.children.iter().enumerate() {
            let info = self.validate_rec(child, page_id, false)?;
            match depth {
                None => depth = Some(info.depth),
                Some(d) if d != info.depth => {
                    return Err(Error::invalid_page(format!(
                        "leaves below {page_id} at unequal depths"
                    )))
                }
                _ => {}
            }
            total += info.count;
            if i == 0 {
                min = info.min.clone();
            }
            max = info.max.clone().or(max);

            // separators bound their subtrees
            if i < node.keys.len() {
                if let Some(sub_max) = &info.max {
                    let ok = if self.unique {
                        sub_max < &node.keys[i]
                    } else {
                        sub_max <= &node.keys[i]
                    };
                    if !ok {
                        return Err(Error::invalid_page(format!(
                            "separator {} of node {page_id} below subtree max",
                            node.keys[i]
                        )));
                    }
                }
            }
            if i > 0 {
                if let Some(sub_min) = &info.min {
                    if sub_min < &node.keys[i - 1] {
                        return Err(Error::invalid_page(format!(
                            "separator {} of node {page_id} above subtree min",
                            node.keys[i - 1]
                        )));
                    }
                }
            }
        }

        if node.entry_count != total {
            return Err(Error::invalid_page(format!(
                "internal {page_id} count {} does not match children total {total}",
                node.entry_count
            )));
        }
        Ok(SubtreeInfo {
            depth: depth.unwrap_or(1) + 1,
            count: total,
            min,
            max,
        })
    }
}

struct SubtreeInfo {
    depth: usize,
    count: u64,
    min: Option<IndexKey>,
    max: Option<IndexKey>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::DiskManager;
    use crate::types::DEFAULT_PAGE_SIZE;
    use rand::prelude::*;
    use tempfile::tempdir;

    fn open_pool(dir: &tempfile::TempDir) -> Arc<BufferPool> {
        let path = dir.path().join("tree.db");
        let (disk, header, _) = DiskManager::open(&path, DEFAULT_PAGE_SIZE).unwrap();
        Arc::new(BufferPool::new(Arc::new(disk), header, 64))
    }

    fn key(i: i32) -> IndexKey {
        IndexKey::single(Value::Int32(i))
    }

    fn token() -> CancelToken {
        CancelToken::new()
    }

    #[test]
    fn test_insert_and_find() -> Result<()> {
        let dir = tempdir().unwrap();
        let mut tree = BTree::create(open_pool(&dir), "n", 4, true)?;

        for i in 0..100 {
            tree.insert(&key(i), &Value::Int64(i as i64 * 10), &token())?;
        }
        tree.validate()?;
        assert_eq!(tree.count()?, 100);

        for i in 0..100 {
            assert_eq!(
                tree.find_exact(&key(i))?,
                Some(Value::Int64(i as i64 * 10)),
                "key {i}"
            );
        }
        assert_eq!(tree.find_exact(&key(100))?, None);
        Ok(())
    }

    #[test]
    fn test_get_all_sorted() -> Result<()> {
        let dir = tempdir().unwrap();
        let mut tree = BTree::create(open_pool(&dir), "n", 4, true)?;

        let mut values: Vec<i32> = (0..200).collect();
        values.shuffle(&mut StdRng::seed_from_u64(7));
        for i in values {
            tree.insert(&key(i), &Value::Int32(i), &token())?;
        }
        tree.validate()?;

        let all = tree.get_all(&token())?;
        let keys: Vec<i32> = all
            .iter()
            .map(|(k, _)| match k.values()[0] {
                Value::Int32(i) => i,
                _ => unreachable!(),
            })
            .collect();
        assert_eq!(keys, (0..200).collect::<Vec<_>>());

        let reversed = tree.get_all_reverse(&token())?;
        assert_eq!(reversed.len(), 200);
        assert_eq!(reversed[0].0, key(199));
        assert_eq!(reversed[199].0, key(0));
        Ok(())
    }

    #[test]
    fn test_unique_rejects_duplicates() -> Result<()> {
        let dir = tempdir().unwrap();
        let mut tree = BTree::create(open_pool(&dir), "emails", 4, true)?;

        tree.insert(&key(5), &Value::Int32(1), &token())?;
        let err = tree.insert(&key(5), &Value::Int32(2), &token());
        assert!(matches!(err, Err(Error::DuplicateKey { .. })));
        assert_eq!(tree.count()?, 1);
        Ok(())
    }

    #[test]
    fn test_non_unique_duplicates_and_idempotency() -> Result<()> {
        let dir = tempdir().unwrap();
        let mut tree = BTree::create(open_pool(&dir), "n", 4, false)?;

        for doc in 0..20 {
            assert!(tree.insert(&key(1), &Value::Int32(doc), &token())?);
        }
        // identical (key, doc-id) pair is a no-op
        assert!(!tree.insert(&key(1), &Value::Int32(3), &token())?);
        assert_eq!(tree.count()?, 20);
        tree.validate()?;

        let hits = tree.find_range(&key(1), &key(1), true, true, &token())?;
        assert_eq!(hits.len(), 20);
        Ok(())
    }

    #[test]
    fn test_delete_specific_pair() -> Result<()> {
        let dir = tempdir().unwrap();
        let mut tree = BTree::create(open_pool(&dir), "n", 4, false)?;

        for doc in 0..10 {
            tree.insert(&key(7), &Value::Int32(doc), &token())?;
        }
        assert!(tree.delete(&key(7), &Value::Int32(4), &token())?);
        assert!(!tree.delete(&key(7), &Value::Int32(4), &token())?);
        assert_eq!(tree.count()?, 9);
        tree.validate()?;

        let remaining = tree.find_range(&key(7), &key(7), true, true, &token())?;
        assert_eq!(remaining.len(), 9);
        assert!(!remaining.contains(&Value::Int32(4)));
        Ok(())
    }

    #[test]
    fn test_delete_down_to_empty() -> Result<()> {
        let dir = tempdir().unwrap();
        let mut tree = BTree::create(open_pool(&dir), "n", 4, true)?;

        for i in 0..64 {
            tree.insert(&key(i), &Value::Int32(i), &token())?;
        }
        for i in 0..64 {
            assert!(tree.delete(&key(i), &Value::Int32(i), &token())?, "key {i}");
            tree.validate()?;
        }
        assert_eq!(tree.count()?, 0);
        assert_eq!(tree.get_all(&token())?.len(), 0);
        Ok(())
    }

    #[test]
    fn test_randomized_insert_delete() -> Result<()> {
        let dir = tempdir().unwrap();
        let mut tree = BTree::create(open_pool(&dir), "n", 8, true)?;
        let mut rng = StdRng::seed_from_u64(42);

        let mut keys: Vec<i32> = (0..2000).collect();
        keys.shuffle(&mut rng);
        for &i in &keys {
            tree.insert(&key(i), &Value::Int32(i), &token())?;
        }
        tree.validate()?;

        keys.shuffle(&mut rng);
        let (gone, kept) = keys.split_at(800);
        for &i in gone {
            assert!(tree.delete(&key(i), &Value::Int32(i), &token())?);
        }
        tree.validate()?;
        assert_eq!(tree.count()?, kept.len() as u64);

        // in-order iteration is strictly increasing
        let all = tree.get_all(&token())?;
        for pair in all.windows(2) {
            assert!(pair[0].0 < pair[1].0);
        }
        for &i in kept {
            assert!(tree.find_exact(&key(i))?.is_some(), "key {i}");
        }
        for &i in gone {
            assert!(tree.find_exact(&key(i))?.is_none(), "key {i}");
        }
        Ok(())
    }

    #[test]
    fn test_range_queries() -> Result<()> {
        let dir = tempdir().unwrap();
        let mut tree = BTree::create(open_pool(&dir), "n", 4, true)?;

        for i in 0..50 {
            tree.insert(&key(i * 2), &Value::Int32(i * 2), &token())?;
        }

        let hits = tree.find_range(&key(10), &key(20), true, true, &token())?;
        assert_eq!(
            hits,
            (5..=10).map(|i| Value::Int32(i * 2)).collect::<Vec<_>>()
        );

        let exclusive = tree.find_range(&key(10), &key(20), false, false, &token())?;
        assert_eq!(
            exclusive,
            (6..=9).map(|i| Value::Int32(i * 2)).collect::<Vec<_>>()
        );

        // bounds falling between stored keys
        let between = tree.find_range(&key(9), &key(21), true, true, &token())?;
        assert_eq!(between.len(), 6);

        let reverse = tree.find_range_reverse(&key(10), &key(20), true, true, &token())?;
        assert_eq!(
            reverse,
            (5..=10).rev().map(|i| Value::Int32(i * 2)).collect::<Vec<_>>()
        );
        Ok(())
    }

    #[test]
    fn test_composite_range() -> Result<()> {
        let dir = tempdir().unwrap();
        let mut tree = BTree::create(open_pool(&dir), "n", 8, false)?;

        for country in ["cn", "de", "us"] {
            for city in 0..30 {
                let k = IndexKey::new(vec![
                    Value::String(country.into()),
                    Value::Int32(city),
                ]);
                tree.insert(&k, &Value::Int32(city), &token())?;
            }
        }
        tree.validate()?;

        let lo = IndexKey::new(vec![Value::String("de".into()), Value::MinKey]);
        let hi = IndexKey::new(vec![Value::String("de".into()), Value::MaxKey]);
        let hits = tree.find_range(&lo, &hi, true, true, &token())?;
        assert_eq!(hits, (0..30).map(Value::Int32).collect::<Vec<_>>());
        Ok(())
    }

    #[test]
    fn test_cancellation() -> Result<()> {
        let dir = tempdir().unwrap();
        let mut tree = BTree::create(open_pool(&dir), "n", 4, true)?;
        let cancelled = CancelToken::new();
        cancelled.cancel();
        assert!(matches!(
            tree.insert(&key(1), &Value::Int32(1), &cancelled),
            Err(Error::Cancelled)
        ));
        Ok(())
    }

    #[test]
    fn test_free_pages_returns_space() -> Result<()> {
        let dir = tempdir().unwrap();
        let pool = open_pool(&dir);
        let mut tree = BTree::create(Arc::clone(&pool), "n", 4, true)?;
        for i in 0..100 {
            tree.insert(&key(i), &Value::Int32(i), &token())?;
        }
        let allocated = pool.header().page_count - 1;
        tree.free_pages()?;
        assert_eq!(pool.free_page_count()?, allocated);
        Ok(())
    }
}
