//! The engine: database lifecycle, catalog, transactions, and the public
//! collection API.
//!
//! One engine owns one database file. Mutations run under a single-writer
//! lock and collect page pre-images; commit runs the journal protocol.
//! Readers take the shared lock and, because writers are fully serialized,
//! observe a stable snapshot of the buffer pool for their duration.
//!
//! Lock hierarchy, acquired strictly top-down: engine transaction lock,
//! catalog mutex, per-collection reader/writer lock, per-index lock,
//! buffer-pool internals.

mod transaction;

pub use transaction::Transaction;

use crate::buffer::BufferPool;
use crate::cancel::CancelToken;
use crate::collection::{CollectionCore, DocumentStore, SlotId};
use crate::document::Document;
use crate::error::{Error, Result};
use crate::index::{Index, IndexDescriptor, IndexKey, IndexOptions};
use crate::storage::{DiskManager, Journal, JournalWriter};
use crate::types::{
    PageId, DEFAULT_CACHE_PAGES, DEFAULT_LOCK_TIMEOUT_MS, DEFAULT_PAGE_SIZE, DEFAULT_TREE_ORDER,
    ID_FIELD, META_COLLECTION,
};
use crate::value::Value;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, ThreadId};
use std::time::Duration;

/// Engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineOptions {
    /// Page size for a newly created file (existing files keep theirs)
    pub page_size: u32,
    /// Buffer pool capacity in pages
    pub cache_pages: u32,
    /// Whether commits run the before-image journal protocol
    pub enable_journaling: bool,
    /// Upper bound on lock acquisition in milliseconds
    pub lock_timeout_ms: u32,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            cache_pages: DEFAULT_CACHE_PAGES,
            enable_journaling: true,
            lock_timeout_ms: DEFAULT_LOCK_TIMEOUT_MS,
        }
    }
}

impl EngineOptions {
    /// Default options
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the page size used when creating the file
    pub fn page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size;
        self
    }

    /// Set the buffer pool capacity
    pub fn cache_pages(mut self, cache_pages: u32) -> Self {
        self.cache_pages = cache_pages;
        self
    }

    /// Enable or disable journaling
    pub fn enable_journaling(mut self, enabled: bool) -> Self {
        self.enable_journaling = enabled;
        self
    }

    /// Set the lock timeout in milliseconds
    pub fn lock_timeout_ms(mut self, timeout: u32) -> Self {
        self.lock_timeout_ms = timeout;
        self
    }
}

/// Point-in-time statistics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineStats {
    pub page_size: u32,
    pub page_count: u64,
    pub free_pages: u64,
    pub collections: u64,
    pub cached_pages: u64,
    pub cache_capacity: u64,
}

/// The database engine
#[derive(Clone)]
pub struct Engine {
    inner: Arc<EngineInner>,
}

pub(crate) struct EngineInner {
    pool: Arc<BufferPool>,
    journal: Journal,
    journaling: bool,
    timeout: Duration,
    order: usize,
    catalog: Mutex<Catalog>,
    txn: RwLock<()>,
    active_txn: Mutex<Option<ThreadId>>,
    closed: AtomicBool,
}

struct Catalog {
    meta: DocumentStore,
    meta_slots: HashMap<String, SlotId>,
    collections: HashMap<String, Arc<CollectionHandle>>,
}

pub(crate) struct CollectionHandle {
    core: RwLock<CollectionCore>,
}

impl Engine {
    /// Open a database file, creating it when absent.
    ///
    /// Recovery runs first: an incomplete commit in the journal is replayed
    /// onto the file before anything reads it.
    pub fn open(path: impl AsRef<Path>, options: EngineOptions) -> Result<Engine> {
        let path = path.as_ref();
        let journal = Journal::for_db(path);
        if path.exists() {
            journal.recover(path)?;
        } else {
            journal.clear()?;
        }

        let (disk, header, _created) = DiskManager::open(path, options.page_size)?;
        let pool = Arc::new(BufferPool::new(
            Arc::new(disk),
            header,
            options.cache_pages as usize,
        ));

        let meta = if pool.header().catalog_root.is_none() {
            let store = DocumentStore::create(Arc::clone(&pool))?;
            pool.update_header(|h| h.catalog_root = store.head());
            pool.flush()?;
            pool.sync()?;
            store
        } else {
            DocumentStore::open(Arc::clone(&pool), pool.header().catalog_root)?
        };

        let mut meta_slots = HashMap::new();
        for item in meta.scan() {
            let (slot, bytes) = item?;
            let doc = Document::from_bytes(&bytes)?;
            let name = doc
                .id()
                .and_then(|v| v.as_str())
                .ok_or_else(|| Error::invalid_db("catalog entry without a name"))?;
            meta_slots.insert(name.to_owned(), slot);
        }

        Ok(Engine {
            inner: Arc::new(EngineInner {
                pool,
                journal,
                journaling: options.enable_journaling,
                timeout: Duration::from_millis(options.lock_timeout_ms as u64),
                order: DEFAULT_TREE_ORDER,
                catalog: Mutex::new(Catalog {
                    meta,
                    meta_slots,
                    collections: HashMap::new(),
                }),
                txn: RwLock::new(()),
                active_txn: Mutex::new(None),
                closed: AtomicBool::new(false),
            }),
        })
    }

    /// A handle to the named collection, creating it on first use
    pub fn collection(&self, name: &str) -> Result<Collection> {
        self.inner.check_open()?;
        let exists = self
            .inner
            .read_scope(|| Ok(self.inner.catalog.lock().meta_slots.contains_key(name)))?;
        if exists {
            return Ok(Collection {
                name: name.to_owned(),
                inner: Arc::clone(&self.inner),
            });
        }
        match self.create_collection(name) {
            Ok(c) => Ok(c),
            Err(Error::CollectionExists(_)) => Ok(Collection {
                name: name.to_owned(),
                inner: Arc::clone(&self.inner),
            }),
            Err(e) => Err(e),
        }
    }

    /// Create a collection, failing with `CollectionExists` when present
    pub fn create_collection(&self, name: &str) -> Result<Collection> {
        if name.is_empty() || name == META_COLLECTION {
            return Err(Error::invalid_operation(format!(
                "'{name}' is not a valid collection name"
            )));
        }
        let token = CancelToken::new();
        self.inner.write_scope(&token, || {
            let mut catalog = self.inner.catalog.lock();
            if catalog.meta_slots.contains_key(name) {
                return Err(Error::CollectionExists(name.to_owned()));
            }
            let core = CollectionCore::create(
                Arc::clone(&self.inner.pool),
                name,
                self.inner.order,
                self.inner.timeout,
            )?;
            let doc = collection_meta_doc(name, core.head(), &core.index_descriptors());
            let slot = catalog.meta.insert(&doc.to_bytes())?;
            catalog.meta_slots.insert(name.to_owned(), slot);
            catalog.collections.insert(
                name.to_owned(),
                Arc::new(CollectionHandle {
                    core: RwLock::new(core),
                }),
            );
            Ok(())
        })?;
        Ok(Collection {
            name: name.to_owned(),
            inner: Arc::clone(&self.inner),
        })
    }

    /// Drop a collection, freeing every page it owns
    pub fn drop_collection(&self, name: &str) -> Result<()> {
        let token = CancelToken::new();
        self.inner.write_scope(&token, || {
            let mut catalog = self.inner.catalog.lock();
            let Some(&slot) = catalog.meta_slots.get(name) else {
                return Err(Error::CollectionNotFound(name.to_owned()));
            };

            let handle = match catalog.collections.remove(name) {
                Some(handle) => handle,
                None => {
                    let bytes = catalog.meta.get(slot)?;
                    let (head, descriptors) = parse_meta_doc(&Document::from_bytes(&bytes)?)?;
                    Arc::new(CollectionHandle {
                        core: RwLock::new(CollectionCore::open(
                            Arc::clone(&self.inner.pool),
                            name,
                            head,
                            descriptors,
                            self.inner.order,
                            self.inner.timeout,
                        )?),
                    })
                }
            };
            handle
                .core
                .try_write_for(self.inner.timeout)
                .ok_or(Error::LockTimeout("collection"))?
                .free_all(&token)?;

            catalog.meta.delete(slot)?;
            catalog.meta_slots.remove(name);
            Ok(())
        })
    }

    /// Rename a collection, keeping its pages and indexes
    pub fn rename_collection(&self, from: &str, to: &str) -> Result<()> {
        if to.is_empty() || to == META_COLLECTION {
            return Err(Error::invalid_operation(format!(
                "'{to}' is not a valid collection name"
            )));
        }
        let token = CancelToken::new();
        self.inner.write_scope(&token, || {
            let mut catalog = self.inner.catalog.lock();
            if catalog.meta_slots.contains_key(to) {
                return Err(Error::CollectionExists(to.to_owned()));
            }
            let Some(&slot) = catalog.meta_slots.get(from) else {
                return Err(Error::CollectionNotFound(from.to_owned()));
            };
            let mut doc = Document::from_bytes(&catalog.meta.get(slot)?)?;
            doc.set(ID_FIELD, to);
            let new_slot = catalog.meta.update(slot, &doc.to_bytes())?;
            catalog.meta_slots.remove(from);
            catalog.meta_slots.insert(to.to_owned(), new_slot);
            // the cached core carries the old name; rebuild on next access
            catalog.collections.remove(from);
            Ok(())
        })
    }

    /// Release trailing free pages back to the file system.
    ///
    /// Pages at the end of the file that sit on the free list are removed
    /// from it and the file is truncated. Returns the number of pages
    /// reclaimed. Interior free pages stay available for reuse.
    pub fn shrink(&self) -> Result<u64> {
        if self.inner.current_thread_owns_txn() {
            return Err(Error::invalid_operation(
                "shrink cannot run inside a transaction",
            ));
        }
        let token = CancelToken::new();
        let (old_count, new_count) = self.inner.write_scope(&token, || {
            let header = self.inner.pool.header();
            let mut free = Vec::new();
            let mut current = header.free_head;
            while current.is_some() {
                token.check()?;
                free.push(current);
                if free.len() as u64 > header.page_count {
                    return Err(Error::invalid_page("cycle in free list"));
                }
                current = self.inner.pool.get_page(current)?.read().next_page();
            }

            let free_set: std::collections::HashSet<u32> =
                free.iter().map(|id| id.value()).collect();
            let mut new_count = header.page_count;
            while new_count > 1 && free_set.contains(&(new_count as u32 - 1)) {
                new_count -= 1;
            }
            if new_count == header.page_count {
                return Ok((header.page_count, new_count));
            }

            // relink the free list without the truncated tail pages
            let kept: Vec<_> = free
                .iter()
                .copied()
                .filter(|id| u64::from(id.value()) < new_count)
                .collect();
            for (i, &id) in kept.iter().enumerate() {
                let next = kept.get(i + 1).copied().unwrap_or(PageId::NONE);
                let pin = self.inner.pool.get_page(id)?;
                pin.write().set_next_page(next);
            }
            self.inner.pool.update_header(|h| {
                h.free_head = kept.first().copied().unwrap_or(PageId::NONE);
                h.page_count = new_count;
            });
            Ok((header.page_count, new_count))
        })?;

        if new_count < old_count {
            // the commit above made the shorter page count durable;
            // dropping the trailing bytes afterwards is safe in every
            // crash window
            let _guard = self
                .inner
                .txn
                .try_write_for(self.inner.timeout)
                .ok_or(Error::LockTimeout("engine"))?;
            self.inner.pool.discard_frames_from(new_count);
            self.inner.pool.truncate_file(new_count)?;
        }
        Ok(old_count - new_count)
    }

    /// Names of all collections, sorted
    pub fn collections(&self) -> Result<Vec<String>> {
        self.inner.read_scope(|| {
            let catalog = self.inner.catalog.lock();
            let mut names: Vec<String> = catalog.meta_slots.keys().cloned().collect();
            names.sort();
            Ok(names)
        })
    }

    /// Point-in-time statistics
    pub fn stats(&self) -> Result<EngineStats> {
        self.inner.read_scope(|| {
            let header = self.inner.pool.header();
            Ok(EngineStats {
                page_size: header.page_size,
                page_count: header.page_count,
                free_pages: self.inner.pool.free_page_count()?,
                collections: self.inner.catalog.lock().meta_slots.len() as u64,
                cached_pages: self.inner.pool.cached_pages() as u64,
                cache_capacity: self.inner.pool.capacity() as u64,
            })
        })
    }

    /// Begin an explicit transaction holding the single-writer lock
    pub fn begin_transaction(&self) -> Result<Transaction<'_>> {
        Transaction::begin(&self.inner)
    }

    /// Write all dirty pages and sync the file
    pub fn checkpoint(&self) -> Result<()> {
        self.inner.check_open()?;
        let _guard = self
            .inner
            .txn
            .try_write_for(self.inner.timeout)
            .ok_or(Error::LockTimeout("engine"))?;
        self.inner.pool.flush()?;
        self.inner.pool.sync()
    }

    /// Flush and close. Every later operation fails with `Disposed`.
    pub fn close(&self) -> Result<()> {
        self.inner.check_open()?;
        let _guard = self
            .inner
            .txn
            .try_write_for(self.inner.timeout)
            .ok_or(Error::LockTimeout("engine"))?;
        self.inner.pool.flush()?;
        self.inner.pool.sync()?;
        self.inner.closed.store(true, Ordering::Release);
        Ok(())
    }
}

impl EngineInner {
    pub(crate) fn check_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            Err(Error::Disposed)
        } else {
            Ok(())
        }
    }

    pub(crate) fn timeout(&self) -> Duration {
        self.timeout
    }

    pub(crate) fn pool(&self) -> &Arc<BufferPool> {
        &self.pool
    }

    fn current_thread_owns_txn(&self) -> bool {
        *self.active_txn.lock() == Some(thread::current().id())
    }

    pub(crate) fn set_active_txn(&self, owner: Option<ThreadId>) {
        *self.active_txn.lock() = owner;
    }

    /// Rebuild catalog state from the (restored) pages after a rollback.
    ///
    /// Cached collection cores and the in-memory catalog map may describe
    /// state the rollback reverted; everything is re-read from disk on
    /// next access.
    pub(crate) fn reload_catalog(&self) -> Result<()> {
        let mut catalog = self.catalog.lock();
        catalog.collections.clear();
        let meta = DocumentStore::open(Arc::clone(&self.pool), self.pool.header().catalog_root)?;
        let mut meta_slots = HashMap::new();
        for item in meta.scan() {
            let (slot, bytes) = item?;
            let doc = Document::from_bytes(&bytes)?;
            let name = doc
                .id()
                .and_then(|v| v.as_str())
                .ok_or_else(|| Error::invalid_db("catalog entry without a name"))?;
            meta_slots.insert(name.to_owned(), slot);
        }
        catalog.meta = meta;
        catalog.meta_slots = meta_slots;
        Ok(())
    }

    /// Run `f` under the single-writer lock inside an implicit transaction.
    ///
    /// When the calling thread already owns an explicit transaction, `f`
    /// simply joins it and the commit is deferred to the transaction.
    pub(crate) fn write_scope<R>(
        &self,
        token: &CancelToken,
        f: impl FnOnce() -> Result<R>,
    ) -> Result<R> {
        self.check_open()?;
        if self.current_thread_owns_txn() {
            return f();
        }
        let _guard = self
            .txn
            .try_write_for(self.timeout)
            .ok_or(Error::LockTimeout("engine"))?;
        self.pool.begin_capture();
        match f() {
            Ok(value) => {
                self.commit_capture(token)?;
                Ok(value)
            }
            Err(e) => {
                let _ = self.pool.rollback_capture();
                let _ = self.reload_catalog();
                Err(e)
            }
        }
    }

    /// Run `f` under the shared lock (stable snapshot)
    pub(crate) fn read_scope<R>(&self, f: impl FnOnce() -> Result<R>) -> Result<R> {
        self.check_open()?;
        if self.current_thread_owns_txn() {
            return f();
        }
        let _guard = self
            .txn
            .try_read_for(self.timeout)
            .ok_or(Error::LockTimeout("engine"))?;
        f()
    }

    /// Commit the active capture: journal pre-images, sync, write dirty
    /// pages, sync, mark the journal done.
    ///
    /// Cancellation is honored up to the journal sync; past it the commit
    /// always completes.
    pub(crate) fn commit_capture(&self, token: &CancelToken) -> Result<()> {
        if token.is_cancelled() {
            self.pool.rollback_capture()?;
            let _ = self.reload_catalog();
            return Err(Error::Cancelled);
        }
        let records = self.pool.capture_records();
        if records.is_empty() {
            self.pool.end_capture();
            return Ok(());
        }

        if self.journaling {
            let prepared: Result<JournalWriter> = (|| {
                let mut writer = self.journal.begin()?;
                for (page_id, image) in &records {
                    writer.append(*page_id, image)?;
                }
                writer.sync()?;
                Ok(writer)
            })();
            let writer = match prepared {
                Ok(writer) => writer,
                Err(e) => {
                    let _ = self.pool.rollback_capture();
                    let _ = self.reload_catalog();
                    let _ = self.journal.clear();
                    return Err(e);
                }
            };
            // the journal is durable: past the point of no return
            self.pool.end_capture();
            self.pool.flush()?;
            self.pool.sync()?;
            writer.commit()?;
        } else {
            self.pool.end_capture();
            self.pool.flush()?;
            self.pool.sync()?;
        }
        Ok(())
    }

    /// Resolve a collection handle by name, opening it from the catalog
    /// when not cached
    fn handle_for(&self, name: &str) -> Result<Arc<CollectionHandle>> {
        let mut catalog = self.catalog.lock();
        if let Some(handle) = catalog.collections.get(name) {
            return Ok(Arc::clone(handle));
        }
        let Some(&slot) = catalog.meta_slots.get(name) else {
            return Err(Error::CollectionNotFound(name.to_owned()));
        };
        let bytes = catalog.meta.get(slot)?;
        let (head, descriptors) = parse_meta_doc(&Document::from_bytes(&bytes)?)?;
        let core = CollectionCore::open(
            Arc::clone(&self.pool),
            name,
            head,
            descriptors,
            self.order,
            self.timeout,
        )?;
        let handle = Arc::new(CollectionHandle {
            core: RwLock::new(core),
        });
        catalog.collections.insert(name.to_owned(), Arc::clone(&handle));
        Ok(handle)
    }

    /// Rewrite a collection's catalog document
    fn save_meta(&self, name: &str, head: PageId, descriptors: &[IndexDescriptor]) -> Result<()> {
        let mut catalog = self.catalog.lock();
        let Some(&slot) = catalog.meta_slots.get(name) else {
            return Err(Error::CollectionNotFound(name.to_owned()));
        };
        let doc = collection_meta_doc(name, head, descriptors);
        let new_slot = catalog.meta.update(slot, &doc.to_bytes())?;
        catalog.meta_slots.insert(name.to_owned(), new_slot);
        Ok(())
    }
}

impl Drop for EngineInner {
    fn drop(&mut self) {
        // a live capture means an uncommitted transaction: leave the file
        // untouched so reopening rolls back cleanly
        if !self.closed.load(Ordering::Acquire) && !self.pool.capture_active() {
            let _ = self.pool.flush();
            let _ = self.pool.sync();
        }
    }
}

/// A handle to one collection.
///
/// Handles are cheap name-bound references; the underlying state lives in
/// the engine and survives rollbacks by being re-opened from disk.
#[derive(Clone)]
pub struct Collection {
    name: String,
    inner: Arc<EngineInner>,
}

impl Collection {
    /// Collection name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Insert a document; a missing `_id` gets a generated object-id.
    /// Returns the document's id.
    pub fn insert(&self, doc: Document) -> Result<Value> {
        self.insert_with(doc, &CancelToken::new())
    }

    /// `insert` with a cancellation token
    pub fn insert_with(&self, doc: Document, token: &CancelToken) -> Result<Value> {
        self.write_core(token, |core| core.insert(doc, token))
    }

    /// Insert the document, or replace the stored one when its `_id`
    /// already exists. Returns the document's id.
    pub fn upsert(&self, doc: Document) -> Result<Value> {
        self.upsert_with(doc, &CancelToken::new())
    }

    /// `upsert` with a cancellation token
    pub fn upsert_with(&self, doc: Document, token: &CancelToken) -> Result<Value> {
        self.write_core(token, |core| core.upsert(doc, token))
    }

    /// Fetch a document by id
    pub fn get(&self, id: &Value) -> Result<Option<Document>> {
        self.get_with(id, &CancelToken::new())
    }

    /// `get` with a cancellation token
    pub fn get_with(&self, id: &Value, token: &CancelToken) -> Result<Option<Document>> {
        self.read_core(|core| core.get(id, token))
    }

    /// Replace the document stored under `id`; false when absent
    pub fn update(&self, id: &Value, doc: Document) -> Result<bool> {
        self.update_with(id, doc, &CancelToken::new())
    }

    /// `update` with a cancellation token
    pub fn update_with(&self, id: &Value, doc: Document, token: &CancelToken) -> Result<bool> {
        self.write_core(token, |core| core.update(id, doc, token))
    }

    /// Delete the document stored under `id`; false when absent
    pub fn delete(&self, id: &Value) -> Result<bool> {
        self.delete_with(id, &CancelToken::new())
    }

    /// `delete` with a cancellation token
    pub fn delete_with(&self, id: &Value, token: &CancelToken) -> Result<bool> {
        self.write_core(token, |core| core.delete(id, token))
    }

    /// Documents whose key in the named index equals `key`
    pub fn find_by_index(&self, index_name: &str, key: &IndexKey) -> Result<Vec<Document>> {
        let token = CancelToken::new();
        self.read_core(|core| core.find_by_index(index_name, key, &token))
    }

    /// Documents whose key in the named index falls inside `[lo, hi]`
    pub fn find_range_by_index(
        &self,
        index_name: &str,
        lo: &IndexKey,
        hi: &IndexKey,
        inclusive_lo: bool,
        inclusive_hi: bool,
    ) -> Result<Vec<Document>> {
        let token = CancelToken::new();
        self.read_core(|core| {
            core.find_range_by_index(index_name, lo, hi, inclusive_lo, inclusive_hi, &token)
        })
    }

    /// Verify storage/index consistency for this collection
    pub fn check_integrity(&self) -> Result<()> {
        let token = CancelToken::new();
        self.read_core(|core| core.check_integrity(&token))
    }

    /// Iterate over all documents: a snapshot materialized under the
    /// shared lock, walking the DATA chain directly
    pub fn scan(&self) -> Result<std::vec::IntoIter<Document>> {
        self.scan_with(&CancelToken::new())
    }

    /// `scan` with a cancellation token
    pub fn scan_with(&self, token: &CancelToken) -> Result<std::vec::IntoIter<Document>> {
        Ok(self.read_core(|core| core.scan(token))?.into_iter())
    }

    /// Number of documents
    pub fn count(&self) -> Result<u64> {
        self.read_core(|core| core.count())
    }

    /// Create an index (backfilled from existing documents) and persist
    /// its descriptor in the catalog
    pub fn ensure_index(&self, options: IndexOptions) -> Result<()> {
        self.ensure_index_with(options, &CancelToken::new())
    }

    /// `ensure_index` with a cancellation token
    pub fn ensure_index_with(&self, options: IndexOptions, token: &CancelToken) -> Result<()> {
        self.inner.write_scope(token, || {
            let handle = self.inner.handle_for(&self.name)?;
            let (head, descriptors) = {
                let mut core = handle
                    .core
                    .try_write_for(self.inner.timeout)
                    .ok_or(Error::LockTimeout("collection"))?;
                core.ensure_index(options, token)?;
                (core.head(), core.index_descriptors())
            };
            self.inner.save_meta(&self.name, head, &descriptors)
        })
    }

    /// Drop an index and persist the catalog change
    pub fn drop_index(&self, name: &str) -> Result<()> {
        let token = CancelToken::new();
        self.inner.write_scope(&token, || {
            let handle = self.inner.handle_for(&self.name)?;
            let (head, descriptors) = {
                let mut core = handle
                    .core
                    .try_write_for(self.inner.timeout)
                    .ok_or(Error::LockTimeout("collection"))?;
                core.drop_index(name)?;
                (core.head(), core.index_descriptors())
            };
            self.inner.save_meta(&self.name, head, &descriptors)
        })
    }

    /// A named index, for the planner-facing primitives
    /// (`find_exact`, `find_range`, `find_all`, `count`)
    pub fn index(&self, name: &str) -> Result<Arc<Index>> {
        self.read_core(|core| core.indexes().get_index(name))
    }

    /// Descriptors of every index on this collection
    pub fn indexes(&self) -> Result<Vec<IndexDescriptor>> {
        self.read_core(|core| Ok(core.index_descriptors()))
    }

    /// The best index for a query filtering on `fields`, by prefix score
    pub fn best_index(&self, fields: &[&str]) -> Result<Option<Arc<Index>>> {
        self.read_core(|core| Ok(core.indexes().best_index(fields)))
    }

    fn write_core<R>(
        &self,
        token: &CancelToken,
        f: impl FnOnce(&mut CollectionCore) -> Result<R>,
    ) -> Result<R> {
        self.inner.write_scope(token, || {
            let handle = self.inner.handle_for(&self.name)?;
            let mut core = handle
                .core
                .try_write_for(self.inner.timeout)
                .ok_or(Error::LockTimeout("collection"))?;
            f(&mut core)
        })
    }

    fn read_core<R>(&self, f: impl FnOnce(&CollectionCore) -> Result<R>) -> Result<R> {
        self.inner.read_scope(|| {
            let handle = self.inner.handle_for(&self.name)?;
            let core = handle
                .core
                .try_read_for(self.inner.timeout)
                .ok_or(Error::LockTimeout("collection"))?;
            f(&core)
        })
    }
}

// ----------------------------------------------------------------------
// Catalog document mapping
// ----------------------------------------------------------------------

fn collection_meta_doc(name: &str, head: PageId, descriptors: &[IndexDescriptor]) -> Document {
    let indexes: Vec<Value> = descriptors
        .iter()
        .map(|d| {
            Value::Document(
                Document::new()
                    .with("name", d.name.clone())
                    .with(
                        "fields",
                        Value::Array(
                            d.fields
                                .iter()
                                .map(|f| Value::String(f.clone()))
                                .collect(),
                        ),
                    )
                    .with("unique", d.unique)
                    .with("priority", d.priority)
                    .with("root", Value::Int64(i64::from(d.root.value()))),
            )
        })
        .collect();
    Document::new()
        .with(ID_FIELD, name)
        .with("head", Value::Int64(i64::from(head.value())))
        .with("indexes", Value::Array(indexes))
}

fn parse_meta_doc(doc: &Document) -> Result<(PageId, Vec<IndexDescriptor>)> {
    let head = match doc.get("head") {
        Some(Value::Int64(v)) => PageId::new(*v as u32),
        _ => return Err(Error::invalid_db("catalog entry without a head pointer")),
    };
    let raw_indexes = doc
        .get("indexes")
        .and_then(|v| v.as_array())
        .ok_or_else(|| Error::invalid_db("catalog entry without an index list"))?;

    let mut descriptors = Vec::with_capacity(raw_indexes.len());
    for entry in raw_indexes {
        let entry = entry
            .as_document()
            .ok_or_else(|| Error::invalid_db("index descriptor is not a document"))?;
        let name = entry
            .get("name")
            .and_then(|v| v.as_str())
            .ok_or_else(|| Error::invalid_db("index descriptor without a name"))?
            .to_owned();
        let fields = entry
            .get("fields")
            .and_then(|v| v.as_array())
            .ok_or_else(|| Error::invalid_db("index descriptor without fields"))?
            .iter()
            .map(|f| {
                f.as_str()
                    .map(str::to_owned)
                    .ok_or_else(|| Error::invalid_db("index field is not a string"))
            })
            .collect::<Result<Vec<String>>>()?;
        let unique = matches!(entry.get("unique"), Some(Value::Boolean(true)));
        let priority = match entry.get("priority") {
            Some(Value::Int32(p)) => *p,
            _ => 0,
        };
        let root = match entry.get("root") {
            Some(Value::Int64(v)) => PageId::new(*v as u32),
            _ => return Err(Error::invalid_db("index descriptor without a root")),
        };
        descriptors.push(IndexDescriptor {
            name,
            fields,
            unique,
            priority,
            root,
        });
    }
    // declared indexes open and create in priority order
    descriptors.sort_by_key(|d| d.priority);
    Ok((head, descriptors))
}
