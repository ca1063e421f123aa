//! The document heap.
//!
//! Documents live in a doubly linked chain of DATA pages. Each page keeps a
//! slot directory at the tail of its data region (4 bytes per slot: u16
//! record offset, u16 record length) and records growing from the front.
//! A record is:
//!
//! ```text
//! u32  total encoded document length
//! u32  overflow chain head page (0 = fully inline)
//! u16  inline capacity reserved after this header
//! [inline bytes]
//! ```
//!
//! Small documents are stored inline; a document that cannot fit a page
//! spills entirely into its own OVERFLOW chain referenced from the record.
//! A document's `(page, slot)` locator is stable until an update outgrows
//! the slot's capacity, at which point the document is reallocated.

use crate::buffer::BufferPool;
use crate::cancel::CancelToken;
use crate::error::{Error, Result};
use crate::page::RawPage;
use crate::types::{PageId, PageType};
use std::sync::Arc;

/// Bytes per slot directory entry
const SLOT_SIZE: usize = 4;

/// Bytes of record header before the inline payload
const RECORD_HEADER: usize = 10;

/// Slot offset marking a deleted slot
const FREE_SLOT: u16 = 0xFFFF;

/// A document's location: page plus slot index
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SlotId {
    pub page: PageId,
    pub slot: u16,
}

impl SlotId {
    pub fn new(page: PageId, slot: u16) -> Self {
        Self { page, slot }
    }
}

/// Parsed record header
#[derive(Debug, Clone, Copy)]
struct Record {
    offset: usize,
    total_len: usize,
    overflow: PageId,
    inline_cap: usize,
}

/// Slot heap over a chain of DATA pages
pub struct DocumentStore {
    pool: Arc<BufferPool>,
    head: PageId,
    tail: PageId,
}

impl DocumentStore {
    /// Allocate a fresh store with one empty DATA page
    pub fn create(pool: Arc<BufferPool>) -> Result<Self> {
        let head = pool.new_page(PageType::Data)?.id();
        Ok(Self {
            pool,
            head,
            tail: head,
        })
    }

    /// Open an existing store; walks to the chain's tail
    pub fn open(pool: Arc<BufferPool>, head: PageId) -> Result<Self> {
        let ids = pool.chain_ids(head)?;
        let tail = *ids.last().unwrap_or(&head);
        Ok(Self { pool, head, tail })
    }

    /// First page of the DATA chain
    pub fn head(&self) -> PageId {
        self.head
    }

    /// Largest document that still stores inline
    fn inline_limit(&self) -> usize {
        self.pool.page_capacity() - RECORD_HEADER - SLOT_SIZE
    }

    /// Store a new document image, returning its locator
    pub fn insert(&mut self, bytes: &[u8]) -> Result<SlotId> {
        if bytes.len() <= self.inline_limit() {
            self.place(bytes, bytes.len(), PageId::NONE, 0)
        } else {
            let chain = self.pool.new_page(PageType::Overflow)?.id();
            self.pool.write_chain(chain, bytes)?;
            self.place(&[], 0, chain, bytes.len())
        }
    }

    /// Fetch a document image by locator
    pub fn get(&self, slot: SlotId) -> Result<Vec<u8>> {
        let pin = self.pool.get_page(slot.page)?;
        let page = pin.read();
        let record = read_record(&page, slot)?;
        if record.overflow.is_some() {
            drop(page);
            drop(pin);
            let mut bytes = self.pool.read_chain(record.overflow)?;
            if bytes.len() < record.total_len {
                return Err(Error::invalid_page(format!(
                    "overflow chain of {slot:?} holds {} of {} bytes",
                    bytes.len(),
                    record.total_len
                )));
            }
            bytes.truncate(record.total_len);
            Ok(bytes)
        } else {
            let start = record.offset + RECORD_HEADER;
            Ok(page.data()[start..start + record.total_len].to_vec())
        }
    }

    /// Rewrite a document. Stays in place when the new image fits the
    /// slot's capacity (or resizes its overflow chain); otherwise the
    /// document is reallocated and the old slot freed. Returns the
    /// (possibly new) locator.
    pub fn update(&mut self, slot: SlotId, bytes: &[u8]) -> Result<SlotId> {
        let record = {
            let pin = self.pool.get_page(slot.page)?;
            let page = pin.read();
            read_record(&page, slot)?
        };

        if record.overflow.is_some() && bytes.len() > self.inline_limit() {
            // resize the existing chain in place
            self.pool.write_chain(record.overflow, bytes)?;
            let pin = self.pool.get_page(slot.page)?;
            let mut page = pin.write();
            write_record_header(&mut page, record.offset, bytes.len(), record.overflow, 0);
            return Ok(slot);
        }

        if record.overflow.is_none() && bytes.len() <= record.inline_cap {
            let pin = self.pool.get_page(slot.page)?;
            let mut page = pin.write();
            write_record_header(
                &mut page,
                record.offset,
                bytes.len(),
                PageId::NONE,
                record.inline_cap,
            );
            let start = record.offset + RECORD_HEADER;
            page.data_mut()[start..start + bytes.len()].copy_from_slice(bytes);
            return Ok(slot);
        }

        // shape changed: reallocate
        self.delete(slot)?;
        self.insert(bytes)
    }

    /// Remove a document, freeing its overflow chain and, when the page
    /// empties, the page itself
    pub fn delete(&mut self, slot: SlotId) -> Result<()> {
        let (overflow, now_empty) = {
            let pin = self.pool.get_page(slot.page)?;
            let mut page = pin.write();
            let record = read_record(&page, slot)?;
            set_slot(&mut page, slot.slot, FREE_SLOT, 0);
            (record.overflow, live_slots(&page) == 0)
        };
        if overflow.is_some() {
            self.pool.free_chain(overflow)?;
        }
        if now_empty && slot.page != self.head {
            self.unlink_page(slot.page)?;
        } else if now_empty {
            // head page: reset the record area in place
            let pin = self.pool.get_page(self.head)?;
            let mut page = pin.write();
            page.set_item_count(0);
            page.set_data_len(0);
            page.data_mut().fill(0);
        }
        Ok(())
    }

    /// Iterate over all documents, one page of records at a time
    pub fn scan(&self) -> StoreScan<'_> {
        StoreScan {
            store: self,
            next_page: self.head,
            buffered: Vec::new(),
        }
    }

    /// Free every page of the store, overflow chains included. The store
    /// is unusable afterwards.
    pub fn free_all(&mut self, token: &CancelToken) -> Result<()> {
        let pages = self.pool.chain_ids(self.head)?;
        for &page_id in &pages {
            token.check()?;
            let chains: Vec<PageId> = {
                let pin = self.pool.get_page(page_id)?;
                let page = pin.read();
                (0..page.item_count())
                    .filter_map(|i| {
                        let (offset, _) = slot(&page, i);
                        if offset == FREE_SLOT {
                            return None;
                        }
                        read_record(&page, SlotId::new(page_id, i))
                            .ok()
                            .filter(|r| r.overflow.is_some())
                            .map(|r| r.overflow)
                    })
                    .collect()
            };
            for chain in chains {
                self.pool.free_chain(chain)?;
            }
            self.pool.free_page(page_id)?;
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    /// Write a record into the tail page, growing the chain when full
    fn place(
        &mut self,
        inline: &[u8],
        inline_cap: usize,
        overflow: PageId,
        overflow_len: usize,
    ) -> Result<SlotId> {
        let record_len = RECORD_HEADER + inline_cap;
        let total_len = if overflow.is_some() {
            overflow_len
        } else {
            inline.len()
        };

        let target = {
            let pin = self.pool.get_page(self.tail)?;
            let page = pin.read();
            let fits = page_free_space(&page) >= record_len + SLOT_SIZE;
            if fits {
                self.tail
            } else {
                PageId::NONE
            }
        };

        let page_id = if target.is_some() {
            target
        } else {
            let fresh = self.pool.new_page(PageType::Data)?.id();
            {
                let pin = self.pool.get_page(self.tail)?;
                pin.write().set_next_page(fresh);
            }
            {
                let pin = self.pool.get_page(fresh)?;
                pin.write().set_prev_page(self.tail);
            }
            self.tail = fresh;
            fresh
        };

        let pin = self.pool.get_page(page_id)?;
        let mut page = pin.write();
        let offset = page.data_len();
        write_record_header(&mut page, offset, total_len, overflow, inline_cap);
        let start = offset + RECORD_HEADER;
        page.data_mut()[start..start + inline.len()].copy_from_slice(inline);
        page.set_data_len(offset + record_len);

        // reuse a freed slot index when one exists
        let count = page.item_count();
        let slot_idx = (0..count)
            .find(|&i| slot(&page, i).0 == FREE_SLOT)
            .unwrap_or(count);
        if slot_idx == count {
            page.set_item_count(count + 1);
        }
        set_slot(&mut page, slot_idx, offset as u16, record_len as u16);
        Ok(SlotId::new(page_id, slot_idx))
    }

    /// Detach an empty page from the chain and free it
    fn unlink_page(&mut self, page_id: PageId) -> Result<()> {
        let (prev, next) = {
            let pin = self.pool.get_page(page_id)?;
            let page = pin.read();
            (page.prev_page(), page.next_page())
        };
        if prev.is_some() {
            let pin = self.pool.get_page(prev)?;
            pin.write().set_next_page(next);
        }
        if next.is_some() {
            let pin = self.pool.get_page(next)?;
            pin.write().set_prev_page(prev);
        }
        if self.tail == page_id {
            self.tail = if prev.is_some() { prev } else { self.head };
        }
        self.pool.free_page(page_id)
    }
}

/// Page-at-a-time iterator over a store's documents
pub struct StoreScan<'a> {
    store: &'a DocumentStore,
    next_page: PageId,
    buffered: Vec<(SlotId, Vec<u8>)>,
}

impl Iterator for StoreScan<'_> {
    type Item = Result<(SlotId, Vec<u8>)>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(item) = self.buffered.pop() {
                return Some(Ok(item));
            }
            if self.next_page.is_none() {
                return None;
            }
            match self.load_page() {
                Ok(()) => {}
                Err(e) => {
                    self.next_page = PageId::NONE;
                    return Some(Err(e));
                }
            }
        }
    }
}

impl StoreScan<'_> {
    fn load_page(&mut self) -> Result<()> {
        let page_id = self.next_page;
        let slots: Vec<SlotId> = {
            let pin = self.store.pool.get_page(page_id)?;
            let page = pin.read();
            self.next_page = page.next_page();
            (0..page.item_count())
                .filter(|&i| slot(&page, i).0 != FREE_SLOT)
                .map(|i| SlotId::new(page_id, i))
                .collect()
        };
        // push in reverse so pop() yields slots in directory order
        for slot_id in slots.into_iter().rev() {
            let bytes = self.store.get(slot_id)?;
            self.buffered.push((slot_id, bytes));
        }
        Ok(())
    }
}

fn slot(page: &RawPage, index: u16) -> (u16, u16) {
    let cap = page.capacity();
    let at = cap - SLOT_SIZE * (index as usize + 1);
    let data = page.data();
    let offset = u16::from_le_bytes([data[at], data[at + 1]]);
    let len = u16::from_le_bytes([data[at + 2], data[at + 3]]);
    (offset, len)
}

fn set_slot(page: &mut RawPage, index: u16, offset: u16, len: u16) {
    let cap = page.capacity();
    let at = cap - SLOT_SIZE * (index as usize + 1);
    let data = page.data_mut();
    data[at..at + 2].copy_from_slice(&offset.to_le_bytes());
    data[at + 2..at + 4].copy_from_slice(&len.to_le_bytes());
}

fn live_slots(page: &RawPage) -> usize {
    (0..page.item_count())
        .filter(|&i| slot(page, i).0 != FREE_SLOT)
        .count()
}

fn page_free_space(page: &RawPage) -> usize {
    let directory = SLOT_SIZE * page.item_count() as usize;
    page.capacity()
        .saturating_sub(page.data_len())
        .saturating_sub(directory)
}

fn read_record(page: &RawPage, slot_id: SlotId) -> Result<Record> {
    if slot_id.slot >= page.item_count() {
        return Err(Error::invalid_page(format!(
            "slot {} out of range on page {}",
            slot_id.slot,
            page.page_id()
        )));
    }
    let (offset, len) = slot(page, slot_id.slot);
    if offset == FREE_SLOT {
        return Err(Error::invalid_page(format!(
            "slot {} on page {} is free",
            slot_id.slot,
            page.page_id()
        )));
    }
    let offset = offset as usize;
    if offset + RECORD_HEADER > page.capacity() || offset + len as usize > page.capacity() {
        return Err(Error::invalid_page(format!(
            "record at {offset} overruns page {}",
            page.page_id()
        )));
    }
    let data = page.data();
    let total_len =
        u32::from_le_bytes([data[offset], data[offset + 1], data[offset + 2], data[offset + 3]])
            as usize;
    let overflow = PageId::new(u32::from_le_bytes([
        data[offset + 4],
        data[offset + 5],
        data[offset + 6],
        data[offset + 7],
    ]));
    let inline_cap = u16::from_le_bytes([data[offset + 8], data[offset + 9]]) as usize;
    Ok(Record {
        offset,
        total_len,
        overflow,
        inline_cap,
    })
}

fn write_record_header(
    page: &mut RawPage,
    offset: usize,
    total_len: usize,
    overflow: PageId,
    inline_cap: usize,
) {
    let data = page.data_mut();
    data[offset..offset + 4].copy_from_slice(&(total_len as u32).to_le_bytes());
    data[offset + 4..offset + 8].copy_from_slice(&overflow.value().to_le_bytes());
    data[offset + 8..offset + 10].copy_from_slice(&(inline_cap as u16).to_le_bytes());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::DiskManager;
    use crate::types::DEFAULT_PAGE_SIZE;
    use tempfile::tempdir;

    fn open_store(dir: &tempfile::TempDir) -> (Arc<BufferPool>, DocumentStore) {
        let path = dir.path().join("store.db");
        let (disk, header, _) = DiskManager::open(&path, DEFAULT_PAGE_SIZE).unwrap();
        let pool = Arc::new(BufferPool::new(Arc::new(disk), header, 64));
        let store = DocumentStore::create(Arc::clone(&pool)).unwrap();
        (pool, store)
    }

    #[test]
    fn test_insert_get_roundtrip() -> Result<()> {
        let dir = tempdir().unwrap();
        let (_, mut store) = open_store(&dir);

        let a = store.insert(b"first document")?;
        let b = store.insert(b"second")?;
        assert_eq!(store.get(a)?, b"first document");
        assert_eq!(store.get(b)?, b"second");
        assert_eq!(a.page, b.page);
        assert_ne!(a.slot, b.slot);
        Ok(())
    }

    #[test]
    fn test_update_in_place_when_it_fits() -> Result<()> {
        let dir = tempdir().unwrap();
        let (_, mut store) = open_store(&dir);

        let slot = store.insert(b"roomy original content")?;
        let updated = store.update(slot, b"smaller")?;
        assert_eq!(updated, slot);
        assert_eq!(store.get(slot)?, b"smaller");
        Ok(())
    }

    #[test]
    fn test_update_relocates_when_it_grows() -> Result<()> {
        let dir = tempdir().unwrap();
        let (_, mut store) = open_store(&dir);

        let a = store.insert(b"tiny")?;
        let b = store.insert(b"neighbor")?;
        let big = vec![9u8; 300];
        let moved = store.update(a, &big)?;
        assert_eq!(store.get(moved)?, big);
        // the neighbor is untouched by the reallocation
        assert_eq!(store.get(b)?, b"neighbor");
        Ok(())
    }

    #[test]
    fn test_oversized_document_spills_to_overflow() -> Result<()> {
        let dir = tempdir().unwrap();
        let (pool, mut store) = open_store(&dir);

        let big: Vec<u8> = (0..pool.page_capacity() * 3 / 2).map(|i| i as u8).collect();
        let slot = store.insert(&big)?;
        assert_eq!(store.get(slot)?, big);

        // shrink in place through the chain
        let smaller: Vec<u8> = (0..pool.page_capacity() + 10).map(|i| (i / 2) as u8).collect();
        assert_eq!(store.update(slot, &smaller)?, slot);
        assert_eq!(store.get(slot)?, smaller);

        // delete releases the chain
        let before = pool.free_page_count()?;
        store.delete(slot)?;
        assert!(pool.free_page_count()? > before);
        Ok(())
    }

    #[test]
    fn test_pages_chain_as_they_fill() -> Result<()> {
        let dir = tempdir().unwrap();
        let (pool, mut store) = open_store(&dir);

        let doc = vec![1u8; 1000];
        let mut slots = Vec::new();
        for _ in 0..40 {
            slots.push(store.insert(&doc)?);
        }
        assert!(pool.chain_ids(store.head())?.len() > 1);

        let all: Vec<_> = store.scan().collect::<Result<Vec<_>>>()?;
        assert_eq!(all.len(), 40);
        for (_, bytes) in &all {
            assert_eq!(bytes, &doc);
        }
        Ok(())
    }

    #[test]
    fn test_empty_page_is_unlinked_and_freed() -> Result<()> {
        let dir = tempdir().unwrap();
        let (pool, mut store) = open_store(&dir);

        let doc = vec![1u8; 1000];
        let mut slots = Vec::new();
        for _ in 0..40 {
            slots.push(store.insert(&doc)?);
        }
        let pages_before = pool.chain_ids(store.head())?.len();
        for slot in slots {
            store.delete(slot)?;
        }
        assert_eq!(pool.chain_ids(store.head())?.len(), 1);
        assert!(pool.free_page_count()? >= (pages_before - 1) as u64);

        // the store still accepts inserts afterwards
        let slot = store.insert(b"again")?;
        assert_eq!(store.get(slot)?, b"again");
        Ok(())
    }

    #[test]
    fn test_slot_reuse() -> Result<()> {
        let dir = tempdir().unwrap();
        let (_, mut store) = open_store(&dir);

        let a = store.insert(b"aaa")?;
        let _b = store.insert(b"bbb")?;
        store.delete(a)?;
        let c = store.insert(b"ccc")?;
        // the freed slot index is reused
        assert_eq!(c, a);
        assert_eq!(store.get(c)?, b"ccc");
        Ok(())
    }

    #[test]
    fn test_free_all() -> Result<()> {
        let dir = tempdir().unwrap();
        let (pool, mut store) = open_store(&dir);
        for _ in 0..40 {
            store.insert(&vec![2u8; 1000])?;
        }
        store.insert(&vec![3u8; pool.page_capacity() * 2])?;
        let allocated = pool.header().page_count - 1;
        store.free_all(&CancelToken::new())?;
        assert_eq!(pool.free_page_count()?, allocated);
        Ok(())
    }

    #[test]
    fn test_reopen_finds_tail() -> Result<()> {
        let dir = tempdir().unwrap();
        let (pool, mut store) = open_store(&dir);
        for _ in 0..40 {
            store.insert(&vec![4u8; 1000])?;
        }
        let head = store.head();
        let count_before = store.scan().count();
        drop(store);

        let mut reopened = DocumentStore::open(pool, head)?;
        assert_eq!(reopened.scan().count(), count_before);
        reopened.insert(b"after reopen")?;
        Ok(())
    }
}
