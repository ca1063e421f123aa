//! Buffer pool implementation.
//!
//! Frames cache page images read from disk. Pinned frames are ineligible
//! for eviction; dirty frames are written back on eviction, checkpoint, or
//! commit. While a transaction capture is active the pool is strictly
//! no-steal: dirty frames stay in memory so the main file never sees
//! uncommitted bytes and rollback never touches disk.

use crate::buffer::lru::LruList;
use crate::error::{Error, Result};
use crate::page::{data_capacity, RawPage};
use crate::storage::{DiskManager, FileHeader};
use crate::types::{PageId, PageType};
use parking_lot::{Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::any::Any;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

/// One cached page
struct Frame {
    page: RwLock<RawPage>,
    dirty: AtomicBool,
    pins: AtomicU32,
}

/// Pre-images collected for the active transaction
struct Capture {
    pre_images: HashMap<PageId, Vec<u8>>,
    /// Pages allocated by extending the file inside this transaction;
    /// they have no on-disk pre-image and are simply dropped on rollback
    fresh: HashSet<PageId>,
    header_before: FileHeader,
    header_image: Vec<u8>,
}

/// The page cache and allocation layer
pub struct BufferPool {
    disk: Arc<DiskManager>,
    header: RwLock<FileHeader>,
    header_dirty: AtomicBool,
    frames: Mutex<HashMap<PageId, Arc<Frame>>>,
    lru: Mutex<LruList>,
    parsed: Mutex<HashMap<PageId, Arc<dyn Any + Send + Sync>>>,
    capture: Mutex<Option<Capture>>,
    capacity: usize,
}

impl BufferPool {
    /// Create a pool over an opened disk manager
    pub fn new(disk: Arc<DiskManager>, header: FileHeader, capacity: usize) -> Self {
        let capacity = capacity.max(8);
        Self {
            disk,
            header: RwLock::new(header),
            header_dirty: AtomicBool::new(false),
            frames: Mutex::new(HashMap::with_capacity(capacity)),
            lru: Mutex::new(LruList::new(capacity)),
            parsed: Mutex::new(HashMap::new()),
            capture: Mutex::new(None),
            capacity,
        }
    }

    /// Page size of the underlying file
    pub fn page_size(&self) -> u32 {
        self.disk.page_size()
    }

    /// Data-region capacity of one page
    pub fn page_capacity(&self) -> usize {
        data_capacity(self.disk.page_size())
    }

    /// Snapshot of the file header
    pub fn header(&self) -> FileHeader {
        *self.header.read()
    }

    /// Mutate the file header, marking it dirty
    pub fn update_header<R>(&self, f: impl FnOnce(&mut FileHeader) -> R) -> R {
        let mut header = self.header.write();
        let result = f(&mut header);
        self.header_dirty.store(true, Ordering::Release);
        result
    }

    /// Number of frames currently cached
    pub fn cached_pages(&self) -> usize {
        self.frames.lock().len()
    }

    /// Configured frame capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    // ------------------------------------------------------------------
    // Page access
    // ------------------------------------------------------------------

    /// Fetch a page, pinning it until the returned handle drops
    pub fn get_page(&self, page_id: PageId) -> Result<PagePin<'_>> {
        if page_id.is_none() {
            return Err(Error::invalid_operation("page 0 is the file header"));
        }
        let frame = self.frame(page_id)?;
        frame.pins.fetch_add(1, Ordering::AcqRel);
        self.lru.lock().touch(page_id);
        Ok(PagePin {
            pool: self,
            page_id,
            frame,
        })
    }

    /// Allocate a page of the requested type, pinned and zeroed.
    ///
    /// Pages come off the free list first; the file grows only when the
    /// free list is empty.
    pub fn new_page(&self, page_type: PageType) -> Result<PagePin<'_>> {
        let free_head = self.header().free_head;
        if free_head.is_some() {
            let pin = self.get_page(free_head)?;
            let next = {
                let mut page = pin.write();
                let next = page.next_page();
                page.reset(page_type);
                next
            };
            self.update_header(|h| h.free_head = next);
            return Ok(pin);
        }

        self.evict_if_needed()?;
        let page_id = self.update_header(|h| h.allocate_page());
        let page = RawPage::new(self.disk.page_size(), page_id, page_type);
        let frame = Arc::new(Frame {
            page: RwLock::new(page),
            dirty: AtomicBool::new(true),
            pins: AtomicU32::new(1),
        });
        if let Some(cap) = self.capture.lock().as_mut() {
            cap.fresh.insert(page_id);
        }
        self.frames.lock().insert(page_id, Arc::clone(&frame));
        self.lru.lock().touch(page_id);
        Ok(PagePin {
            pool: self,
            page_id,
            frame,
        })
    }

    /// Zero a page and push it onto the free list
    pub fn free_page(&self, page_id: PageId) -> Result<()> {
        let pin = self.get_page(page_id)?;
        {
            let mut page = pin.write();
            page.reset(PageType::Free);
            page.set_next_page(self.header().free_head);
        }
        self.update_header(|h| h.free_head = page_id);
        Ok(())
    }

    /// Free every page of a chain starting at `head`
    pub fn free_chain(&self, head: PageId) -> Result<()> {
        let ids = self.chain_ids(head)?;
        for id in ids {
            self.free_page(id)?;
        }
        Ok(())
    }

    /// Collect the page ids of a chain, following next-links
    pub fn chain_ids(&self, head: PageId) -> Result<Vec<PageId>> {
        let limit = self.header().page_count;
        let mut ids = Vec::new();
        let mut current = head;
        while current.is_some() {
            if ids.len() as u64 > limit {
                return Err(Error::invalid_page(format!(
                    "cycle in page chain starting at {head}"
                )));
            }
            let pin = self.get_page(current)?;
            let next = pin.read().next_page();
            ids.push(current);
            current = next;
        }
        Ok(ids)
    }

    /// Read the concatenated data regions of a chain
    pub fn read_chain(&self, head: PageId) -> Result<Vec<u8>> {
        let limit = self.header().page_count;
        let mut out = Vec::new();
        let mut hops = 0u64;
        let mut current = head;
        while current.is_some() {
            hops += 1;
            if hops > limit {
                return Err(Error::invalid_page(format!(
                    "cycle in page chain starting at {head}"
                )));
            }
            let pin = self.get_page(current)?;
            let page = pin.read();
            let len = page.data_len().min(page.capacity());
            out.extend_from_slice(&page.data()[..len]);
            current = page.next_page();
        }
        Ok(out)
    }

    /// Write `bytes` across the chain starting at `head`, growing it with
    /// OVERFLOW pages or freeing surplus tail pages as needed.
    ///
    /// The head page keeps its type; continuation pages are OVERFLOW.
    pub fn write_chain(&self, head: PageId, bytes: &[u8]) -> Result<()> {
        let cap = self.page_capacity();
        let chunks: Vec<&[u8]> = if bytes.is_empty() {
            vec![&bytes[0..0]]
        } else {
            bytes.chunks(cap).collect()
        };

        let mut current = head;
        let mut prev: Option<PagePin<'_>> = None;
        for chunk in chunks {
            let pin = if current.is_some() {
                self.get_page(current)?
            } else {
                let fresh = self.new_page(PageType::Overflow)?;
                if let Some(prev_pin) = prev.as_ref() {
                    prev_pin.write().set_next_page(fresh.id());
                    fresh.write().set_prev_page(prev_pin.id());
                }
                fresh
            };
            {
                let mut page = pin.write();
                page.data_mut()[..chunk.len()].copy_from_slice(chunk);
                page.data_mut()[chunk.len()..].fill(0);
                page.set_data_len(chunk.len());
            }
            current = pin.read().next_page();
            prev = Some(pin);
        }

        // the new image is shorter: detach and free the surplus tail
        if current.is_some() {
            if let Some(prev_pin) = prev.as_ref() {
                prev_pin.write().set_next_page(PageId::NONE);
            }
            drop(prev);
            self.free_chain(current)?;
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Parsed-form cache
    // ------------------------------------------------------------------

    /// Look up the cached parsed form of a page
    pub fn parsed_get<T: Any + Send + Sync>(&self, page_id: PageId) -> Option<Arc<T>> {
        let entry = self.parsed.lock().get(&page_id).cloned()?;
        entry.downcast::<T>().ok()
    }

    /// Cache the parsed form of a page; dropped again on any write access
    pub fn parsed_put<T: Any + Send + Sync>(&self, page_id: PageId, value: Arc<T>) {
        self.parsed.lock().insert(page_id, value);
    }

    // ------------------------------------------------------------------
    // Transaction capture
    // ------------------------------------------------------------------

    /// Start collecting pre-images for a transaction
    pub fn begin_capture(&self) {
        let header = self.header();
        let mut image = vec![0u8; self.disk.page_size() as usize];
        header.write(&mut image);
        *self.capture.lock() = Some(Capture {
            pre_images: HashMap::new(),
            fresh: HashSet::new(),
            header_before: header,
            header_image: image,
        });
    }

    /// Whether a capture is active
    pub fn capture_active(&self) -> bool {
        self.capture.lock().is_some()
    }

    /// Pre-image records of the active capture in ascending page order,
    /// the header page included. Empty when no capture is active or nothing
    /// was touched. The capture stays active so rollback remains possible
    /// until [`BufferPool::end_capture`].
    pub fn capture_records(&self) -> Vec<(PageId, Vec<u8>)> {
        let guard = self.capture.lock();
        let Some(cap) = guard.as_ref() else {
            return Vec::new();
        };
        if cap.pre_images.is_empty() && cap.fresh.is_empty() && self.header() == cap.header_before
        {
            return Vec::new();
        }
        let mut records: Vec<(PageId, Vec<u8>)> = cap
            .pre_images
            .iter()
            .map(|(id, image)| (*id, image.clone()))
            .collect();
        records.push((PageId::HEADER, cap.header_image.clone()));
        records.sort_by_key(|(id, _)| id.value());
        records
    }

    /// Discard the capture without reverting anything (the commit is past
    /// its point of no return)
    pub fn end_capture(&self) {
        self.capture.lock().take();
    }

    /// Revert every page the capture touched to its pre-image and drop
    /// pages allocated inside the transaction
    pub fn rollback_capture(&self) -> Result<()> {
        let Some(cap) = self.capture.lock().take() else {
            return Ok(());
        };

        {
            let frames = self.frames.lock();
            for (id, image) in &cap.pre_images {
                if let Some(frame) = frames.get(id) {
                    let mut page = frame.page.write();
                    *page = RawPage::from_bytes(image.clone())?;
                    // matches the on-disk image again
                    frame.dirty.store(false, Ordering::Release);
                }
            }
        }
        {
            let mut frames = self.frames.lock();
            let mut lru = self.lru.lock();
            for id in &cap.fresh {
                frames.remove(id);
                lru.remove(*id);
            }
        }
        {
            let mut parsed = self.parsed.lock();
            for id in cap.pre_images.keys().chain(cap.fresh.iter()) {
                parsed.remove(id);
            }
        }
        *self.header.write() = cap.header_before;
        self.header_dirty.store(false, Ordering::Release);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Flushing
    // ------------------------------------------------------------------

    /// Write all dirty pages in ascending page order, then the header
    pub fn flush(&self) -> Result<()> {
        let mut dirty: Vec<(PageId, Arc<Frame>)> = self
            .frames
            .lock()
            .iter()
            .filter(|(_, f)| f.dirty.load(Ordering::Acquire))
            .map(|(id, f)| (*id, Arc::clone(f)))
            .collect();
        dirty.sort_by_key(|(id, _)| id.value());

        for (id, frame) in dirty {
            let mut page = frame.page.write();
            page.update_checksum();
            self.disk.write_page(id, page.as_bytes())?;
            frame.dirty.store(false, Ordering::Release);
        }
        if self.header_dirty.swap(false, Ordering::AcqRel) {
            self.disk.write_header(&self.header())?;
        }
        Ok(())
    }

    /// Sync the underlying file
    pub fn sync(&self) -> Result<()> {
        self.disk.sync()
    }

    /// Drop cached frames for pages at or above `page_count` (after the
    /// file was truncated)
    pub fn discard_frames_from(&self, page_count: u64) {
        let mut frames = self.frames.lock();
        let mut lru = self.lru.lock();
        let mut parsed = self.parsed.lock();
        let stale: Vec<PageId> = frames
            .keys()
            .filter(|id| u64::from(id.value()) >= page_count)
            .copied()
            .collect();
        for id in stale {
            frames.remove(&id);
            lru.remove(id);
            parsed.remove(&id);
        }
    }

    /// Truncate the underlying file to exactly `page_count` pages
    pub fn truncate_file(&self, page_count: u64) -> Result<()> {
        self.disk.truncate_pages(page_count)?;
        self.disk.sync()
    }

    /// Count pages on the free list (walks the chain)
    pub fn free_page_count(&self) -> Result<u64> {
        let limit = self.header().page_count;
        let mut count = 0u64;
        let mut current = self.header().free_head;
        while current.is_some() {
            count += 1;
            if count > limit {
                return Err(Error::invalid_page("cycle in free list"));
            }
            current = self.get_page(current)?.read().next_page();
        }
        Ok(count)
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    fn frame(&self, page_id: PageId) -> Result<Arc<Frame>> {
        if let Some(frame) = self.frames.lock().get(&page_id) {
            return Ok(Arc::clone(frame));
        }

        // not cached: load outside the frames lock
        self.evict_if_needed()?;
        let image = self.disk.read_page(page_id)?;
        let page = RawPage::from_bytes(image)?;
        page.verify_checksum()?;
        if page.page_id() != page_id {
            return Err(Error::invalid_page(format!(
                "page {page_id} carries id {}",
                page.page_id()
            )));
        }

        let mut frames = self.frames.lock();
        // another thread may have loaded it meanwhile
        if let Some(frame) = frames.get(&page_id) {
            return Ok(Arc::clone(frame));
        }
        let frame = Arc::new(Frame {
            page: RwLock::new(page),
            dirty: AtomicBool::new(false),
            pins: AtomicU32::new(0),
        });
        frames.insert(page_id, Arc::clone(&frame));
        drop(frames);
        self.lru.lock().touch(page_id);
        Ok(frame)
    }

    /// Evict one cold frame if the pool is at capacity.
    ///
    /// Pinned frames are skipped. Dirty frames are skipped while a capture
    /// is active (no-steal); otherwise they are written back first. When
    /// nothing is evictable the pool simply grows.
    fn evict_if_needed(&self) -> Result<()> {
        let candidate = {
            let frames = self.frames.lock();
            if frames.len() < self.capacity {
                return Ok(());
            }
            let capture_active = self.capture.lock().is_some();
            let lru = self.lru.lock();
            let mut found = None;
            for id in lru.coldest_first() {
                if let Some(frame) = frames.get(&id) {
                    let dirty = frame.dirty.load(Ordering::Acquire);
                    if frame.pins.load(Ordering::Acquire) == 0 && !(capture_active && dirty) {
                        found = Some((id, Arc::clone(frame)));
                        break;
                    }
                }
            }
            match found {
                Some(c) => c,
                None => return Ok(()),
            }
        };

        let (id, frame) = candidate;
        if frame.dirty.load(Ordering::Acquire) {
            let mut page = frame.page.write();
            page.update_checksum();
            self.disk.write_page(id, page.as_bytes())?;
            frame.dirty.store(false, Ordering::Release);
        }

        let mut frames = self.frames.lock();
        if let Some(current) = frames.get(&id) {
            if Arc::ptr_eq(current, &frame) && frame.pins.load(Ordering::Acquire) == 0 {
                frames.remove(&id);
                self.lru.lock().remove(id);
                self.parsed.lock().remove(&id);
            }
        }
        Ok(())
    }

    fn prepare_write(&self, page_id: PageId, frame: &Frame) {
        {
            let mut capture = self.capture.lock();
            if let Some(cap) = capture.as_mut() {
                if !cap.fresh.contains(&page_id) && !cap.pre_images.contains_key(&page_id) {
                    let image = frame.page.read().as_bytes().to_vec();
                    cap.pre_images.insert(page_id, image);
                }
            }
        }
        frame.dirty.store(true, Ordering::Release);
        self.parsed.lock().remove(&page_id);
    }
}

/// A pinned page handle.
///
/// Holding the pin keeps the frame resident; dropping it releases the pin.
/// Write access records the page's pre-image into the active transaction
/// capture, marks the frame dirty, and invalidates its parsed form.
pub struct PagePin<'a> {
    pool: &'a BufferPool,
    page_id: PageId,
    frame: Arc<Frame>,
}

impl PagePin<'_> {
    /// The pinned page's id
    pub fn id(&self) -> PageId {
        self.page_id
    }

    /// Read access to the page
    pub fn read(&self) -> RwLockReadGuard<'_, RawPage> {
        self.frame.page.read()
    }

    /// Write access to the page; marks dirty and captures the pre-image
    pub fn write(&self) -> RwLockWriteGuard<'_, RawPage> {
        self.pool.prepare_write(self.page_id, &self.frame);
        self.frame.page.write()
    }
}

impl Drop for PagePin<'_> {
    fn drop(&mut self) {
        self.frame.pins.fetch_sub(1, Ordering::AcqRel);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DEFAULT_PAGE_SIZE;
    use tempfile::tempdir;

    fn open_pool(dir: &tempfile::TempDir, capacity: usize) -> BufferPool {
        let path = dir.path().join("test.db");
        let (disk, header, _) = DiskManager::open(&path, DEFAULT_PAGE_SIZE).unwrap();
        BufferPool::new(Arc::new(disk), header, capacity)
    }

    #[test]
    fn test_new_page_and_fetch() -> Result<()> {
        let dir = tempdir().unwrap();
        let pool = open_pool(&dir, 16);

        let id = {
            let pin = pool.new_page(PageType::Data)?;
            pin.write().data_mut()[0..5].copy_from_slice(b"hello");
            pin.id()
        };
        assert_eq!(id, PageId::new(1));

        let pin = pool.get_page(id)?;
        assert_eq!(&pin.read().data()[0..5], b"hello");
        assert_eq!(pin.read().page_type(), PageType::Data);
        Ok(())
    }

    #[test]
    fn test_flush_and_reload() -> Result<()> {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.db");
        let id;
        {
            let (disk, header, _) = DiskManager::open(&path, DEFAULT_PAGE_SIZE)?;
            let pool = BufferPool::new(Arc::new(disk), header, 16);
            let pin = pool.new_page(PageType::Data)?;
            pin.write().data_mut()[0] = 0xAB;
            id = pin.id();
            drop(pin);
            pool.flush()?;
            pool.sync()?;
        }
        let (disk, header, created) = DiskManager::open(&path, DEFAULT_PAGE_SIZE)?;
        assert!(!created);
        assert_eq!(header.page_count, 2);
        let pool = BufferPool::new(Arc::new(disk), header, 16);
        let pin = pool.get_page(id)?;
        assert_eq!(pin.read().data()[0], 0xAB);
        Ok(())
    }

    #[test]
    fn test_corrupt_page_detected() -> Result<()> {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.db");
        let id;
        {
            let (disk, header, _) = DiskManager::open(&path, DEFAULT_PAGE_SIZE)?;
            let pool = BufferPool::new(Arc::new(disk), header, 16);
            let pin = pool.new_page(PageType::Data)?;
            pin.write().data_mut()[0] = 1;
            id = pin.id();
            drop(pin);
            pool.flush()?;
            pool.sync()?;
        }
        // flip a data byte behind the pool's back
        {
            use std::io::{Seek, SeekFrom, Write};
            let mut f = std::fs::OpenOptions::new().write(true).open(&path)?;
            f.seek(SeekFrom::Start(DEFAULT_PAGE_SIZE as u64 + 100))?;
            f.write_all(&[0xEE])?;
        }
        let (disk, header, _) = DiskManager::open(&path, DEFAULT_PAGE_SIZE)?;
        let pool = BufferPool::new(Arc::new(disk), header, 16);
        assert!(matches!(pool.get_page(id), Err(Error::CorruptPage { .. })));
        Ok(())
    }

    #[test]
    fn test_free_list_reuse() -> Result<()> {
        let dir = tempdir().unwrap();
        let pool = open_pool(&dir, 16);

        let a = pool.new_page(PageType::Data)?.id();
        let b = pool.new_page(PageType::Data)?.id();
        assert_eq!((a, b), (PageId::new(1), PageId::new(2)));

        pool.free_page(a)?;
        assert_eq!(pool.header().free_head, a);
        assert_eq!(pool.free_page_count()?, 1);

        // freed page is zeroed
        {
            let pin = pool.get_page(a)?;
            assert_eq!(pin.read().page_type(), PageType::Free);
            assert!(pin.read().data().iter().all(|&x| x == 0));
        }

        // reused before extending the file
        let c = pool.new_page(PageType::IndexNode)?;
        assert_eq!(c.id(), a);
        assert_eq!(pool.header().free_head, PageId::NONE);
        assert_eq!(pool.header().page_count, 3);
        Ok(())
    }

    #[test]
    fn test_chain_roundtrip() -> Result<()> {
        let dir = tempdir().unwrap();
        let pool = open_pool(&dir, 32);

        let head = pool.new_page(PageType::IndexNode)?.id();
        let big: Vec<u8> = (0..pool.page_capacity() * 2 + 500)
            .map(|i| (i % 251) as u8)
            .collect();
        pool.write_chain(head, &big)?;
        assert_eq!(pool.read_chain(head)?, big);
        assert_eq!(pool.chain_ids(head)?.len(), 3);

        // shrinking frees the surplus tail
        let small = vec![7u8; 100];
        pool.write_chain(head, &small)?;
        assert_eq!(pool.read_chain(head)?, small);
        assert_eq!(pool.chain_ids(head)?.len(), 1);
        assert_eq!(pool.free_page_count()?, 2);
        Ok(())
    }

    #[test]
    fn test_eviction_respects_capacity() -> Result<()> {
        let dir = tempdir().unwrap();
        let pool = open_pool(&dir, 8);

        let mut ids = Vec::new();
        for _ in 0..32 {
            let pin = pool.new_page(PageType::Data)?;
            pin.write().data_mut()[0] = pin.id().value() as u8;
            ids.push(pin.id());
        }
        // dirty pages with no capture are written back on eviction
        assert!(pool.cached_pages() <= 9);
        for id in ids {
            let pin = pool.get_page(id)?;
            assert_eq!(pin.read().data()[0], id.value() as u8);
        }
        Ok(())
    }

    #[test]
    fn test_capture_rollback_restores_pages() -> Result<()> {
        let dir = tempdir().unwrap();
        let pool = open_pool(&dir, 16);

        let id = {
            let pin = pool.new_page(PageType::Data)?;
            pin.write().data_mut()[0] = 1;
            pin.id()
        };
        pool.flush()?;
        let header_before = pool.header();

        pool.begin_capture();
        {
            let pin = pool.get_page(id)?;
            pin.write().data_mut()[0] = 99;
        }
        let fresh = pool.new_page(PageType::Data)?.id();
        assert_eq!(fresh, PageId::new(2));
        pool.rollback_capture()?;

        assert_eq!(pool.get_page(id)?.read().data()[0], 1);
        assert_eq!(pool.header(), header_before);
        // the fresh page is gone from the cache and the id is reusable
        assert_eq!(pool.new_page(PageType::Data)?.id(), fresh);
        Ok(())
    }

    #[test]
    fn test_capture_records_pre_images_once() -> Result<()> {
        let dir = tempdir().unwrap();
        let pool = open_pool(&dir, 16);

        let id = {
            let pin = pool.new_page(PageType::Data)?;
            pin.write().data_mut()[0] = 5;
            pin.id()
        };
        pool.flush()?;

        pool.begin_capture();
        {
            let pin = pool.get_page(id)?;
            pin.write().data_mut()[0] = 6;
            pin.write().data_mut()[0] = 7;
        }
        let records = pool.capture_records();
        // the mutated page plus the header image
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].0, PageId::HEADER);
        assert_eq!(records[1].0, id);
        // the pre-image carries the value before the transaction
        assert_eq!(records[1].1[crate::types::PAGE_HEADER_SIZE], 5);
        pool.end_capture();
        assert!(!pool.capture_active());
        Ok(())
    }

    #[test]
    fn test_parsed_cache_invalidated_on_write() -> Result<()> {
        let dir = tempdir().unwrap();
        let pool = open_pool(&dir, 16);

        let pin = pool.new_page(PageType::IndexNode)?;
        let id = pin.id();
        pool.parsed_put(id, Arc::new(42usize));
        assert_eq!(pool.parsed_get::<usize>(id).as_deref(), Some(&42));

        let _ = pin.write();
        assert!(pool.parsed_get::<usize>(id).is_none());
        Ok(())
    }
}
