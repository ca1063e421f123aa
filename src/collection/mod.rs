//! Collections: the document heap wired to its index manager.
//!
//! [`CollectionCore`] owns a collection's storage state and performs the
//! actual document operations. It is always driven under the engine's
//! transaction scope and the collection's reader/writer lock; the public
//! handle lives at the engine layer.

mod store;

pub use store::{DocumentStore, SlotId, StoreScan};

use crate::buffer::BufferPool;
use crate::cancel::CancelToken;
use crate::document::Document;
use crate::error::{Error, Result};
use crate::index::{IndexDescriptor, IndexKey, IndexManager, IndexOptions};
use crate::types::{ObjectId, PageId, ID_FIELD};
use crate::value::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Storage state of one collection
pub struct CollectionCore {
    name: String,
    store: DocumentStore,
    indexes: IndexManager,
    id_map: HashMap<Value, SlotId>,
}

impl CollectionCore {
    /// Create a fresh collection: one DATA page and the primary index
    pub(crate) fn create(
        pool: Arc<BufferPool>,
        name: impl Into<String>,
        order: usize,
        timeout: Duration,
    ) -> Result<Self> {
        let store = DocumentStore::create(Arc::clone(&pool))?;
        let mut indexes = IndexManager::create(pool, order, timeout);
        indexes.ensure_primary()?;
        Ok(Self {
            name: name.into(),
            store,
            indexes,
            id_map: HashMap::new(),
        })
    }

    /// Open an existing collection from its catalog entry, rebuilding the
    /// id → locator map from the DATA chain
    pub(crate) fn open(
        pool: Arc<BufferPool>,
        name: impl Into<String>,
        head: PageId,
        descriptors: Vec<IndexDescriptor>,
        order: usize,
        timeout: Duration,
    ) -> Result<Self> {
        let store = DocumentStore::open(Arc::clone(&pool), head)?;
        let indexes = IndexManager::open(pool, order, timeout, descriptors);
        let mut core = Self {
            name: name.into(),
            store,
            indexes,
            id_map: HashMap::new(),
        };
        core.indexes.primary()?;

        let mut id_map = HashMap::new();
        for item in core.store.scan() {
            let (slot, bytes) = item?;
            let doc = Document::from_bytes(&bytes)?;
            let id = doc.id().cloned().ok_or_else(|| {
                Error::invalid_page(format!("stored document without {ID_FIELD}"))
            })?;
            id_map.insert(id, slot);
        }
        core.id_map = id_map;
        Ok(core)
    }

    /// Collection name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Head page of the DATA chain (catalog pointer)
    pub(crate) fn head(&self) -> PageId {
        self.store.head()
    }

    /// Catalog descriptors of all indexes
    pub(crate) fn index_descriptors(&self) -> Vec<IndexDescriptor> {
        self.indexes.descriptors()
    }

    /// The index manager
    pub fn indexes(&self) -> &IndexManager {
        &self.indexes
    }

    /// Insert a document, generating an object-id `_id` when absent.
    /// Returns the document's id.
    pub fn insert(&mut self, mut doc: Document, token: &CancelToken) -> Result<Value> {
        token.check()?;
        let id = match doc.id() {
            Some(id) => id.clone(),
            None => Value::ObjectId(ObjectId::new()),
        };
        doc.insert_front(ID_FIELD, id.clone());

        let bytes = doc.to_bytes();
        let slot = self.store.insert(&bytes)?;
        if let Err(e) = self.indexes.insert_document(&doc, &id, token) {
            // leave no dangling slot behind the failed index fan-out
            let _ = self.store.delete(slot);
            return Err(e);
        }
        self.id_map.insert(id.clone(), slot);
        Ok(id)
    }

    /// Fetch a document by id. The lookup goes through the primary index.
    pub fn get(&self, id: &Value, token: &CancelToken) -> Result<Option<Document>> {
        token.check()?;
        let primary = self.indexes.primary()?;
        if primary
            .find_exact(&IndexKey::single(id.clone()))?
            .is_none()
        {
            return Ok(None);
        }
        let slot = self.id_map.get(id).ok_or_else(|| {
            Error::invalid_page(format!("{}: primary index entry without a slot", self.name))
        })?;
        let bytes = self.store.get(*slot)?;
        Ok(Some(Document::from_bytes(&bytes)?))
    }

    /// Replace the document stored under `id`. Returns false when no such
    /// document exists.
    pub fn update(&mut self, id: &Value, mut doc: Document, token: &CancelToken) -> Result<bool> {
        token.check()?;
        let Some(&slot) = self.id_map.get(id) else {
            return Ok(false);
        };
        doc.insert_front(ID_FIELD, id.clone());

        let old_bytes = self.store.get(slot)?;
        let old_doc = Document::from_bytes(&old_bytes)?;
        let new_slot = self.store.update(slot, &doc.to_bytes())?;

        if let Err(e) = self.indexes.update_document(&old_doc, &doc, id, token) {
            // put the previous image back where it now lives
            let restored = self.store.update(new_slot, &old_bytes)?;
            self.id_map.insert(id.clone(), restored);
            return Err(e);
        }
        self.id_map.insert(id.clone(), new_slot);
        Ok(true)
    }

    /// Insert the document, or replace the existing one when its `_id` is
    /// already present. Returns the document's id.
    pub fn upsert(&mut self, doc: Document, token: &CancelToken) -> Result<Value> {
        match doc.id() {
            Some(id) if self.id_map.contains_key(id) => {
                let id = id.clone();
                self.update(&id, doc, token)?;
                Ok(id)
            }
            _ => self.insert(doc, token),
        }
    }

    /// Delete the document stored under `id`. Returns whether it existed.
    pub fn delete(&mut self, id: &Value, token: &CancelToken) -> Result<bool> {
        token.check()?;
        let Some(&slot) = self.id_map.get(id) else {
            return Ok(false);
        };
        let old_doc = Document::from_bytes(&self.store.get(slot)?)?;
        self.store.delete(slot)?;
        self.indexes.delete_document(&old_doc, id, token)?;
        self.id_map.remove(id);
        Ok(true)
    }

    /// Documents whose key in the named index equals `key`
    pub fn find_by_index(
        &self,
        index_name: &str,
        key: &IndexKey,
        token: &CancelToken,
    ) -> Result<Vec<Document>> {
        let index = self.indexes.get_index(index_name)?;
        let ids = index.find_range(key, key, true, true, token)?;
        self.fetch_all(&ids, token)
    }

    /// Documents whose key in the named index falls inside the interval,
    /// in ascending key order
    pub fn find_range_by_index(
        &self,
        index_name: &str,
        lo: &IndexKey,
        hi: &IndexKey,
        inclusive_lo: bool,
        inclusive_hi: bool,
        token: &CancelToken,
    ) -> Result<Vec<Document>> {
        let index = self.indexes.get_index(index_name)?;
        let ids = index.find_range(lo, hi, inclusive_lo, inclusive_hi, token)?;
        self.fetch_all(&ids, token)
    }

    fn fetch_all(&self, ids: &[Value], token: &CancelToken) -> Result<Vec<Document>> {
        let mut docs = Vec::with_capacity(ids.len());
        for id in ids {
            token.check()?;
            let slot = self.id_map.get(id).ok_or_else(|| {
                Error::invalid_page(format!("{}: index entry without a document", self.name))
            })?;
            docs.push(Document::from_bytes(&self.store.get(*slot)?)?);
        }
        Ok(docs)
    }

    /// Verify that storage and every index describe the same documents.
    ///
    /// Each stored document must be reachable through the primary index
    /// and carry an entry in every other index; no index may hold an
    /// entry whose doc-id resolves to nothing.
    pub fn check_integrity(&self, token: &CancelToken) -> Result<()> {
        let count = self.count()?;
        let mut seen = 0u64;
        for item in self.store.scan() {
            token.check()?;
            let (slot, bytes) = item?;
            let doc = Document::from_bytes(&bytes)?;
            let id = doc.id().ok_or_else(|| {
                Error::invalid_page(format!("{}: stored document without an id", self.name))
            })?;
            if self.id_map.get(id) != Some(&slot) {
                return Err(Error::invalid_page(format!(
                    "{}: document {id} maps to the wrong slot",
                    self.name
                )));
            }
            for index in self.indexes.list() {
                let key = index.extract_key(&doc);
                let hits = index.find_range(&key, &key, true, true, token)?;
                if !hits.contains(id) {
                    return Err(Error::invalid_page(format!(
                        "{}: document {id} missing from index '{}'",
                        self.name,
                        index.name()
                    )));
                }
            }
            seen += 1;
        }
        if seen != count {
            return Err(Error::invalid_page(format!(
                "{}: primary index counts {count} documents, storage holds {seen}",
                self.name
            )));
        }

        for index in self.indexes.list() {
            index.validate()?;
            if index.count()? != count {
                return Err(Error::invalid_page(format!(
                    "{}: index '{}' counts {} entries for {count} documents",
                    self.name,
                    index.name(),
                    index.count()?
                )));
            }
            for entry in index.find_all(token)? {
                let (_, id) = entry;
                if !self.id_map.contains_key(&id) {
                    return Err(Error::invalid_page(format!(
                        "{}: index '{}' holds a dangling entry for {id}",
                        self.name,
                        index.name()
                    )));
                }
            }
        }
        Ok(())
    }

    /// Materialize every document, walking the DATA chain directly
    /// (indexes are bypassed)
    pub fn scan(&self, token: &CancelToken) -> Result<Vec<Document>> {
        let mut docs = Vec::new();
        for item in self.store.scan() {
            token.check()?;
            let (_, bytes) = item?;
            docs.push(Document::from_bytes(&bytes)?);
        }
        Ok(docs)
    }

    /// Number of documents, answered by the primary index
    pub fn count(&self) -> Result<u64> {
        self.indexes.primary()?.count()
    }

    /// Create an index and backfill it from the existing documents.
    /// A unique violation during backfill drops the half-built index.
    pub fn ensure_index(&mut self, options: IndexOptions, token: &CancelToken) -> Result<()> {
        let name = options.name.clone();
        let index = self.indexes.create_index(options)?;
        for item in self.store.scan() {
            token.check()?;
            let (_, bytes) = match item {
                Ok(v) => v,
                Err(e) => {
                    self.indexes.drop_index(&name)?;
                    return Err(e);
                }
            };
            let doc = Document::from_bytes(&bytes)?;
            let id = doc.id().cloned().unwrap_or(Value::Null);
            let key = index.extract_key(&doc);
            if let Err(e) = index.insert_entry(&key, &id, token) {
                self.indexes.drop_index(&name)?;
                return Err(e);
            }
        }
        Ok(())
    }

    /// Drop an index by name
    pub fn drop_index(&mut self, name: &str) -> Result<()> {
        self.indexes.drop_index(name)
    }

    /// Free every page belonging to this collection (drop)
    pub(crate) fn free_all(&mut self, token: &CancelToken) -> Result<()> {
        self.store.free_all(token)?;
        self.indexes.free_all()?;
        self.id_map.clear();
        Ok(())
    }
}
