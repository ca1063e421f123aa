//! Indexing: composite keys, the disk B+ tree, and the per-collection
//! index manager.

mod key;
mod node;
mod tree;

pub use key::IndexKey;
pub use tree::BTree;

pub(crate) use node::TreeNode;

use crate::buffer::BufferPool;
use crate::cancel::CancelToken;
use crate::document::Document;
use crate::error::{Error, Result};
use crate::types::{PageId, ID_FIELD};
use crate::value::Value;
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Persistent description of one index, stored in the catalog
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexDescriptor {
    /// Index name, unique per collection
    pub name: String,
    /// Ordered field list the key tuple is extracted from
    pub fields: Vec<String>,
    /// Whether equal keys are rejected
    pub unique: bool,
    /// Creation order for declared indexes (lower first)
    pub priority: i32,
    /// Fixed root page of the backing tree
    pub root: PageId,
}

/// Parameters for creating an index
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexOptions {
    pub name: String,
    pub fields: Vec<String>,
    pub unique: bool,
    pub priority: i32,
}

impl IndexOptions {
    /// Describe an index over the given fields
    pub fn new(name: impl Into<String>, fields: &[&str]) -> Self {
        Self {
            name: name.into(),
            fields: fields.iter().map(|f| (*f).to_owned()).collect(),
            unique: false,
            priority: 0,
        }
    }

    /// Reject duplicate keys
    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    /// Set the creation priority (lower creates first)
    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }
}

/// One named index over a collection
pub struct Index {
    descriptor: IndexDescriptor,
    tree: RwLock<BTree>,
    timeout: Duration,
}

impl Index {
    /// Index name
    pub fn name(&self) -> &str {
        &self.descriptor.name
    }

    /// Ordered field list
    pub fn fields(&self) -> &[String] {
        &self.descriptor.fields
    }

    /// Whether this index enforces uniqueness
    pub fn is_unique(&self) -> bool {
        self.descriptor.unique
    }

    /// The persistent descriptor
    pub fn descriptor(&self) -> &IndexDescriptor {
        &self.descriptor
    }

    /// Extract this index's key tuple from a document. Field names resolve
    /// as dotted paths into nested documents; a missing field contributes
    /// a `Null` component.
    pub fn extract_key(&self, doc: &Document) -> IndexKey {
        IndexKey::new(
            self.descriptor
                .fields
                .iter()
                .map(|f| doc.get_path(f).cloned().unwrap_or(Value::Null))
                .collect(),
        )
    }

    /// First doc-id under a key equal to `key`
    pub fn find_exact(&self, key: &IndexKey) -> Result<Option<Value>> {
        self.read_tree()?.find_exact(key)
    }

    /// Doc-ids with keys in the interval, ascending; materialized under the
    /// read lock (snapshot iteration)
    pub fn find_range(
        &self,
        lo: &IndexKey,
        hi: &IndexKey,
        inclusive_lo: bool,
        inclusive_hi: bool,
        token: &CancelToken,
    ) -> Result<Vec<Value>> {
        self.read_tree()?
            .find_range(lo, hi, inclusive_lo, inclusive_hi, token)
    }

    /// `find_range`, descending through prev-links
    pub fn find_range_reverse(
        &self,
        lo: &IndexKey,
        hi: &IndexKey,
        inclusive_lo: bool,
        inclusive_hi: bool,
        token: &CancelToken,
    ) -> Result<Vec<Value>> {
        self.read_tree()?
            .find_range_reverse(lo, hi, inclusive_lo, inclusive_hi, token)
    }

    /// Every (key, doc-id) entry in key order, materialized under the lock
    pub fn find_all(&self, token: &CancelToken) -> Result<Vec<(IndexKey, Value)>> {
        self.read_tree()?.get_all(token)
    }

    /// `find_all` in reverse key order
    pub fn find_all_reverse(&self, token: &CancelToken) -> Result<Vec<(IndexKey, Value)>> {
        self.read_tree()?.get_all_reverse(token)
    }

    /// Number of entries
    pub fn count(&self) -> Result<u64> {
        self.read_tree()?.count()
    }

    /// The smallest (key, doc-id) entry, if any
    pub fn min(&self) -> Result<Option<(IndexKey, Value)>> {
        self.read_tree()?.min_entry()
    }

    /// The largest (key, doc-id) entry, if any
    pub fn max(&self) -> Result<Option<(IndexKey, Value)>> {
        self.read_tree()?.max_entry()
    }

    /// Check the backing tree's structural invariants
    pub fn validate(&self) -> Result<()> {
        self.read_tree()?.validate()
    }

    /// Streaming iteration in key order.
    ///
    /// The returned iterator holds the index read lock for its lifetime;
    /// callers that need to suspend should use [`Index::find_all`] instead.
    pub fn stream(&self) -> Result<IndexStream<'_>> {
        let tree = self.read_tree()?;
        let node = Some(tree.leftmost_leaf()?);
        Ok(IndexStream { tree, node, pos: 0 })
    }

    pub(crate) fn insert_entry(
        &self,
        key: &IndexKey,
        doc_id: &Value,
        token: &CancelToken,
    ) -> Result<bool> {
        self.write_tree()?.insert(key, doc_id, token)
    }

    pub(crate) fn delete_entry(
        &self,
        key: &IndexKey,
        doc_id: &Value,
        token: &CancelToken,
    ) -> Result<bool> {
        self.write_tree()?.delete(key, doc_id, token)
    }

    fn read_tree(&self) -> Result<RwLockReadGuard<'_, BTree>> {
        self.tree
            .try_read_for(self.timeout)
            .ok_or(Error::LockTimeout("index"))
    }

    fn write_tree(&self) -> Result<RwLockWriteGuard<'_, BTree>> {
        self.tree
            .try_write_for(self.timeout)
            .ok_or(Error::LockTimeout("index"))
    }
}

/// Streaming iterator over an index; holds the tree read lock while alive
pub struct IndexStream<'a> {
    tree: RwLockReadGuard<'a, BTree>,
    node: Option<Arc<TreeNode>>,
    pos: usize,
}

impl Iterator for IndexStream<'_> {
    type Item = Result<(IndexKey, Value)>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let node = self.node.as_ref()?;
            if self.pos < node.keys.len() {
                let item = (node.keys[self.pos].clone(), node.entries[self.pos].clone());
                self.pos += 1;
                return Some(Ok(item));
            }
            if node.next.is_none() {
                self.node = None;
                return None;
            }
            match self.tree.load(node.next) {
                Ok(next) => {
                    self.node = Some(next);
                    self.pos = 0;
                }
                Err(e) => {
                    self.node = None;
                    return Some(Err(e));
                }
            }
        }
    }
}

/// The per-collection index registry.
///
/// Holds the primary `_id` index plus any declared secondary indexes and
/// fans document mutations out to all of them.
pub struct IndexManager {
    pool: Arc<BufferPool>,
    order: usize,
    timeout: Duration,
    indexes: Vec<Arc<Index>>,
}

impl IndexManager {
    /// Manager with no indexes yet (new collection)
    pub(crate) fn create(pool: Arc<BufferPool>, order: usize, timeout: Duration) -> Self {
        Self {
            pool,
            order,
            timeout,
            indexes: Vec::new(),
        }
    }

    /// Open existing indexes from their catalog descriptors
    pub(crate) fn open(
        pool: Arc<BufferPool>,
        order: usize,
        timeout: Duration,
        descriptors: Vec<IndexDescriptor>,
    ) -> Self {
        let indexes = descriptors
            .into_iter()
            .map(|descriptor| {
                let tree = BTree::open(
                    Arc::clone(&pool),
                    descriptor.name.clone(),
                    descriptor.root,
                    order,
                    descriptor.unique,
                );
                Arc::new(Index {
                    descriptor,
                    tree: RwLock::new(tree),
                    timeout,
                })
            })
            .collect();
        Self {
            pool,
            order,
            timeout,
            indexes,
        }
    }

    /// Make sure the unique primary-key index exists; returns whether it
    /// was created now
    pub(crate) fn ensure_primary(&mut self) -> Result<bool> {
        if self.indexes.iter().any(|i| i.name() == ID_FIELD) {
            return Ok(false);
        }
        self.create_index(IndexOptions::new(ID_FIELD, &[ID_FIELD]).unique())?;
        Ok(true)
    }

    /// The primary-key index
    pub fn primary(&self) -> Result<Arc<Index>> {
        self.get_index(ID_FIELD)
    }

    /// Create a new index. Fails with `IndexExists` when the name is taken.
    pub fn create_index(&mut self, options: IndexOptions) -> Result<Arc<Index>> {
        if self.indexes.iter().any(|i| i.name() == options.name) {
            return Err(Error::IndexExists(options.name));
        }
        if options.fields.is_empty() {
            return Err(Error::invalid_operation("index needs at least one field"));
        }
        let tree = BTree::create(
            Arc::clone(&self.pool),
            options.name.clone(),
            self.order,
            options.unique,
        )?;
        let descriptor = IndexDescriptor {
            name: options.name,
            fields: options.fields,
            unique: options.unique,
            priority: options.priority,
            root: tree.root_page(),
        };
        let index = Arc::new(Index {
            descriptor,
            tree: RwLock::new(tree),
            timeout: self.timeout,
        });
        self.indexes.push(Arc::clone(&index));
        Ok(index)
    }

    /// Drop an index and free its pages
    pub fn drop_index(&mut self, name: &str) -> Result<()> {
        if name == ID_FIELD {
            return Err(Error::invalid_operation(
                "the primary-key index cannot be dropped",
            ));
        }
        let pos = self
            .indexes
            .iter()
            .position(|i| i.name() == name)
            .ok_or_else(|| Error::IndexNotFound(name.to_owned()))?;
        let index = self.indexes.remove(pos);
        let result = index
            .tree
            .try_write_for(self.timeout)
            .ok_or(Error::LockTimeout("index"))?
            .free_pages();
        result
    }

    /// Look an index up by name
    pub fn get_index(&self, name: &str) -> Result<Arc<Index>> {
        self.indexes
            .iter()
            .find(|i| i.name() == name)
            .cloned()
            .ok_or_else(|| Error::IndexNotFound(name.to_owned()))
    }

    /// All indexes in creation order
    pub fn list(&self) -> Vec<Arc<Index>> {
        self.indexes.clone()
    }

    /// Catalog descriptors of all indexes
    pub fn descriptors(&self) -> Vec<IndexDescriptor> {
        self.indexes.iter().map(|i| i.descriptor.clone()).collect()
    }

    /// Enter a document into every index. On a unique violation the
    /// entries already made into sibling indexes are rolled back.
    pub(crate) fn insert_document(
        &self,
        doc: &Document,
        doc_id: &Value,
        token: &CancelToken,
    ) -> Result<()> {
        let mut done: Vec<(&Arc<Index>, IndexKey)> = Vec::new();
        for index in &self.indexes {
            token.check()?;
            let key = index.extract_key(doc);
            match index.insert_entry(&key, doc_id, token) {
                Ok(_) => done.push((index, key)),
                Err(e) => {
                    for (sibling, key) in done.iter().rev() {
                        // best effort: the original error wins
                        let _ = sibling.delete_entry(key, doc_id, token);
                    }
                    return Err(e);
                }
            }
        }
        Ok(())
    }

    /// Remove a document from every index
    pub(crate) fn delete_document(
        &self,
        doc: &Document,
        doc_id: &Value,
        token: &CancelToken,
    ) -> Result<()> {
        for index in &self.indexes {
            token.check()?;
            let key = index.extract_key(doc);
            index.delete_entry(&key, doc_id, token)?;
        }
        Ok(())
    }

    /// Re-key a document across every index. Old and new keys are computed
    /// independently per index; a unique violation rolls the completed
    /// re-keys back.
    pub(crate) fn update_document(
        &self,
        old_doc: &Document,
        new_doc: &Document,
        doc_id: &Value,
        token: &CancelToken,
    ) -> Result<()> {
        let mut done: Vec<(&Arc<Index>, IndexKey, IndexKey)> = Vec::new();
        for index in &self.indexes {
            token.check()?;
            let old_key = index.extract_key(old_doc);
            let new_key = index.extract_key(new_doc);
            if old_key == new_key {
                continue;
            }
            index.delete_entry(&old_key, doc_id, token)?;
            if let Err(e) = index.insert_entry(&new_key, doc_id, token) {
                // restore this index, then unwind the ones already re-keyed
                let _ = index.insert_entry(&old_key, doc_id, token);
                for (sibling, old_k, new_k) in done.iter().rev() {
                    let _ = sibling.delete_entry(new_k, doc_id, token);
                    let _ = sibling.insert_entry(old_k, doc_id, token);
                }
                return Err(e);
            }
            done.push((index, old_key, new_key));
        }
        Ok(())
    }

    /// The best index for a query over `fields`.
    ///
    /// Each matched prefix position `i` against an index's field list earns
    /// `(index_arity - i) * 10`; uniqueness breaks ties with +5. Only
    /// positive scores qualify.
    pub fn best_index(&self, fields: &[&str]) -> Option<Arc<Index>> {
        let mut best: Option<(i32, Arc<Index>)> = None;
        for index in &self.indexes {
            let mut score = 0i32;
            for (i, field) in fields.iter().enumerate() {
                match index.fields().get(i) {
                    Some(f) if f == field => {
                        score += (index.fields().len() - i) as i32 * 10;
                    }
                    _ => break,
                }
            }
            if score == 0 {
                continue;
            }
            if index.is_unique() {
                score += 5;
            }
            let better = match &best {
                Some((s, _)) => score > *s,
                None => true,
            };
            if better {
                best = Some((score, Arc::clone(index)));
            }
        }
        best.map(|(_, index)| index)
    }

    /// Free every index's pages (collection drop)
    pub(crate) fn free_all(&mut self) -> Result<()> {
        for index in self.indexes.drain(..) {
            index
                .tree
                .try_write_for(self.timeout)
                .ok_or(Error::LockTimeout("index"))?
                .free_pages()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::DiskManager;
    use crate::types::DEFAULT_PAGE_SIZE;
    use tempfile::tempdir;

    fn manager(dir: &tempfile::TempDir) -> IndexManager {
        let path = dir.path().join("idx.db");
        let (disk, header, _) = DiskManager::open(&path, DEFAULT_PAGE_SIZE).unwrap();
        let pool = Arc::new(BufferPool::new(Arc::new(disk), header, 64));
        let mut manager = IndexManager::create(pool, 8, Duration::from_secs(5));
        manager.ensure_primary().unwrap();
        manager
    }

    fn doc(id: i32, email: &str, age: i32) -> (Document, Value) {
        let d = Document::new()
            .with(ID_FIELD, id)
            .with("email", email)
            .with("age", age);
        (d, Value::Int32(id))
    }

    fn token() -> CancelToken {
        CancelToken::new()
    }

    #[test]
    fn test_primary_always_exists() {
        let dir = tempdir().unwrap();
        let m = manager(&dir);
        let primary = m.primary().unwrap();
        assert!(primary.is_unique());
        assert_eq!(primary.fields(), ["_id"]);
    }

    #[test]
    fn test_create_and_drop() -> Result<()> {
        let dir = tempdir().unwrap();
        let mut m = manager(&dir);

        m.create_index(IndexOptions::new("by_email", &["email"]).unique())?;
        assert!(matches!(
            m.create_index(IndexOptions::new("by_email", &["email"])),
            Err(Error::IndexExists(_))
        ));
        assert_eq!(m.list().len(), 2);

        m.drop_index("by_email")?;
        assert!(matches!(
            m.get_index("by_email"),
            Err(Error::IndexNotFound(_))
        ));
        assert!(m.drop_index("_id").is_err());
        Ok(())
    }

    #[test]
    fn test_document_fanout() -> Result<()> {
        let dir = tempdir().unwrap();
        let mut m = manager(&dir);
        m.create_index(IndexOptions::new("by_email", &["email"]).unique())?;
        m.create_index(IndexOptions::new("by_age", &["age"]))?;

        let (d1, id1) = doc(1, "a@x", 30);
        let (d2, id2) = doc(2, "b@x", 30);
        m.insert_document(&d1, &id1, &token())?;
        m.insert_document(&d2, &id2, &token())?;

        assert_eq!(
            m.get_index("by_email")?
                .find_exact(&IndexKey::single("a@x"))?,
            Some(id1.clone())
        );
        assert_eq!(m.get_index("by_age")?.count()?, 2);

        m.delete_document(&d1, &id1, &token())?;
        assert_eq!(m.primary()?.count()?, 1);
        assert_eq!(m.get_index("by_age")?.count()?, 1);
        Ok(())
    }

    #[test]
    fn test_duplicate_rolls_back_siblings() -> Result<()> {
        let dir = tempdir().unwrap();
        let mut m = manager(&dir);
        m.create_index(IndexOptions::new("by_email", &["email"]).unique())?;

        let (d1, id1) = doc(1, "a@x", 30);
        m.insert_document(&d1, &id1, &token())?;

        // same email, different id: the primary insert succeeds first and
        // must be rolled back when by_email rejects
        let (d2, id2) = doc(2, "a@x", 40);
        assert!(matches!(
            m.insert_document(&d2, &id2, &token()),
            Err(Error::DuplicateKey { .. })
        ));
        assert_eq!(m.primary()?.count()?, 1);
        assert_eq!(
            m.primary()?.find_exact(&IndexKey::single(Value::Int32(2)))?,
            None
        );
        assert_eq!(m.get_index("by_email")?.count()?, 1);
        Ok(())
    }

    #[test]
    fn test_update_rekeys_and_rolls_back() -> Result<()> {
        let dir = tempdir().unwrap();
        let mut m = manager(&dir);
        m.create_index(IndexOptions::new("by_email", &["email"]).unique())?;

        let (d1, id1) = doc(1, "a@x", 30);
        let (d2, id2) = doc(2, "b@x", 30);
        m.insert_document(&d1, &id1, &token())?;
        m.insert_document(&d2, &id2, &token())?;

        // clean re-key
        let (d2_new, _) = doc(2, "c@x", 31);
        m.update_document(&d2, &d2_new, &id2, &token())?;
        assert_eq!(
            m.get_index("by_email")?
                .find_exact(&IndexKey::single("c@x"))?,
            Some(id2.clone())
        );

        // conflicting re-key restores the old entry
        let (d2_bad, _) = doc(2, "a@x", 31);
        assert!(m.update_document(&d2_new, &d2_bad, &id2, &token()).is_err());
        assert_eq!(
            m.get_index("by_email")?
                .find_exact(&IndexKey::single("c@x"))?,
            Some(id2)
        );
        Ok(())
    }

    #[test]
    fn test_missing_field_is_null() -> Result<()> {
        let dir = tempdir().unwrap();
        let mut m = manager(&dir);
        let by_age = m.create_index(IndexOptions::new("by_age", &["age"]))?;

        let d = Document::new().with(ID_FIELD, 9).with("email", "x@y");
        m.insert_document(&d, &Value::Int32(9), &token())?;
        assert_eq!(
            by_age.find_exact(&IndexKey::single(Value::Null))?,
            Some(Value::Int32(9))
        );
        Ok(())
    }

    #[test]
    fn test_best_index_prefix_scoring() -> Result<()> {
        let dir = tempdir().unwrap();
        let mut m = manager(&dir);
        m.create_index(IndexOptions::new("abc", &["a", "b", "c"]))?;
        m.create_index(IndexOptions::new("a", &["a"]))?;
        m.create_index(IndexOptions::new("b", &["b"]))?;

        // the composite wins on every prefix of its field list
        for query in [&["a"][..], &["a", "b"][..], &["a", "b", "c"][..]] {
            assert_eq!(m.best_index(query).map(|i| i.name().to_owned()), Some("abc".into()));
        }
        // a non-prefix field prefers its own index
        assert_eq!(
            m.best_index(&["b"]).map(|i| i.name().to_owned()),
            Some("b".into())
        );
        assert!(m.best_index(&["zzz"]).is_none());
        Ok(())
    }

    #[test]
    fn test_unique_breaks_ties() -> Result<()> {
        let dir = tempdir().unwrap();
        let mut m = manager(&dir);
        m.create_index(IndexOptions::new("plain", &["x"]))?;
        m.create_index(IndexOptions::new("uniq", &["x"]).unique())?;
        assert_eq!(
            m.best_index(&["x"]).map(|i| i.name().to_owned()),
            Some("uniq".into())
        );
        Ok(())
    }

    #[test]
    fn test_stream_holds_order() -> Result<()> {
        let dir = tempdir().unwrap();
        let mut m = manager(&dir);
        let by_age = m.create_index(IndexOptions::new("by_age", &["age"]))?;
        for i in 0..50 {
            let (d, id) = doc(i, "e@x", 100 - i);
            m.insert_document(&d, &id, &token())?;
        }
        let keys: Vec<IndexKey> = by_age
            .stream()?
            .collect::<Result<Vec<_>>>()?
            .into_iter()
            .map(|(k, _)| k)
            .collect();
        assert_eq!(keys.len(), 50);
        for pair in keys.windows(2) {
            assert!(pair[0] <= pair[1]);
        }
        Ok(())
    }
}
