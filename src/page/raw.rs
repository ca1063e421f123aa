//! Raw page buffers.
//!
//! A `RawPage` owns one page-sized byte buffer and exposes typed access to
//! the header fields and the data region. The buffer pool is the only
//! component that creates these; everything else borrows them through
//! pinned handles.

use crate::error::{Error, Result};
use crate::page::PageHeader;
use crate::types::{PageId, PageType, PAGE_HEADER_SIZE};

/// One page-sized buffer with header accessors
#[derive(Clone)]
pub struct RawPage {
    buf: Vec<u8>,
}

impl RawPage {
    /// Create a zeroed page of the given size with a fresh header
    pub fn new(page_size: u32, page_id: PageId, page_type: PageType) -> Self {
        let mut page = Self {
            buf: vec![0u8; page_size as usize],
        };
        PageHeader::new(page_id, page_type).write(&mut page.buf);
        page
    }

    /// Adopt a page image read from disk, validating its header
    pub fn from_bytes(buf: Vec<u8>) -> Result<Self> {
        PageHeader::read(&buf)?;
        Ok(Self { buf })
    }

    /// The parsed header
    pub fn header(&self) -> PageHeader {
        // the constructor and `from_bytes` guarantee a valid header
        PageHeader::read(&self.buf).unwrap_or_else(|_| PageHeader::new(PageId::NONE, PageType::Free))
    }

    /// Full page image
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    /// Page size in bytes
    pub fn page_size(&self) -> u32 {
        self.buf.len() as u32
    }

    /// Capacity of the data region
    pub fn capacity(&self) -> usize {
        self.buf.len() - PAGE_HEADER_SIZE
    }

    pub fn page_id(&self) -> PageId {
        PageId::new(u32::from_le_bytes([
            self.buf[0],
            self.buf[1],
            self.buf[2],
            self.buf[3],
        ]))
    }

    pub fn page_type(&self) -> PageType {
        PageType::from_byte(self.buf[4]).unwrap_or(PageType::Free)
    }

    pub fn set_page_type(&mut self, page_type: PageType) {
        self.buf[4] = page_type as u8;
    }

    pub fn item_count(&self) -> u16 {
        u16::from_le_bytes([self.buf[5], self.buf[6]])
    }

    pub fn set_item_count(&mut self, count: u16) {
        self.buf[5..7].copy_from_slice(&count.to_le_bytes());
    }

    pub fn prev_page(&self) -> PageId {
        PageId::new(u32::from_le_bytes([
            self.buf[8],
            self.buf[9],
            self.buf[10],
            self.buf[11],
        ]))
    }

    pub fn set_prev_page(&mut self, id: PageId) {
        self.buf[8..12].copy_from_slice(&id.value().to_le_bytes());
    }

    pub fn next_page(&self) -> PageId {
        PageId::new(u32::from_le_bytes([
            self.buf[12],
            self.buf[13],
            self.buf[14],
            self.buf[15],
        ]))
    }

    pub fn set_next_page(&mut self, id: PageId) {
        self.buf[12..16].copy_from_slice(&id.value().to_le_bytes());
    }

    pub fn data_len(&self) -> usize {
        u32::from_le_bytes([self.buf[16], self.buf[17], self.buf[18], self.buf[19]]) as usize
    }

    pub fn set_data_len(&mut self, len: usize) {
        self.buf[16..20].copy_from_slice(&(len as u32).to_le_bytes());
    }

    pub fn flags(&self) -> u32 {
        u32::from_le_bytes([self.buf[24], self.buf[25], self.buf[26], self.buf[27]])
    }

    pub fn set_flags(&mut self, flags: u32) {
        self.buf[24..28].copy_from_slice(&flags.to_le_bytes());
    }

    /// The whole data region
    pub fn data(&self) -> &[u8] {
        &self.buf[PAGE_HEADER_SIZE..]
    }

    /// The whole data region, mutable
    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.buf[PAGE_HEADER_SIZE..]
    }

    /// Recompute and store the data-region checksum
    pub fn update_checksum(&mut self) {
        let sum = crc32fast::hash(&self.buf[PAGE_HEADER_SIZE..]);
        self.buf[20..24].copy_from_slice(&sum.to_le_bytes());
    }

    /// Verify the stored checksum against the data region
    pub fn verify_checksum(&self) -> Result<()> {
        let stored = u32::from_le_bytes([self.buf[20], self.buf[21], self.buf[22], self.buf[23]]);
        let computed = crc32fast::hash(&self.buf[PAGE_HEADER_SIZE..]);
        if stored != computed {
            return Err(Error::CorruptPage {
                page_id: self.page_id(),
                stored,
                computed,
            });
        }
        Ok(())
    }

    /// Zero the data region and reset the header, keeping the page id.
    ///
    /// Used when a page is pushed onto the free list.
    pub fn reset(&mut self, page_type: PageType) {
        let id = self.page_id();
        self.buf.fill(0);
        PageHeader::new(id, page_type).write(&mut self.buf);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DEFAULT_PAGE_SIZE;

    #[test]
    fn test_new_page_is_zeroed() {
        let page = RawPage::new(DEFAULT_PAGE_SIZE, PageId::new(3), PageType::Data);
        assert_eq!(page.page_id(), PageId::new(3));
        assert_eq!(page.page_type(), PageType::Data);
        assert_eq!(page.item_count(), 0);
        assert!(page.data().iter().all(|&b| b == 0));
        assert_eq!(page.capacity(), DEFAULT_PAGE_SIZE as usize - PAGE_HEADER_SIZE);
    }

    #[test]
    fn test_field_accessors() {
        let mut page = RawPage::new(512, PageId::new(9), PageType::IndexNode);
        page.set_item_count(5);
        page.set_prev_page(PageId::new(8));
        page.set_next_page(PageId::new(10));
        page.set_data_len(100);
        page.set_flags(1);
        assert_eq!(page.item_count(), 5);
        assert_eq!(page.prev_page(), PageId::new(8));
        assert_eq!(page.next_page(), PageId::new(10));
        assert_eq!(page.data_len(), 100);
        assert_eq!(page.flags(), 1);
    }

    #[test]
    fn test_checksum_roundtrip() {
        let mut page = RawPage::new(512, PageId::new(1), PageType::Data);
        page.data_mut()[0..4].copy_from_slice(b"abcd");
        page.update_checksum();
        assert!(page.verify_checksum().is_ok());

        let image = page.as_bytes().to_vec();
        let loaded = RawPage::from_bytes(image).unwrap();
        assert!(loaded.verify_checksum().is_ok());
    }

    #[test]
    fn test_checksum_detects_corruption() {
        let mut page = RawPage::new(512, PageId::new(1), PageType::Data);
        page.data_mut()[10] = 0x55;
        page.update_checksum();
        let mut image = page.as_bytes().to_vec();
        image[40] ^= 0xFF;
        let corrupted = RawPage::from_bytes(image).unwrap();
        assert!(matches!(
            corrupted.verify_checksum(),
            Err(Error::CorruptPage { .. })
        ));
    }

    #[test]
    fn test_reset_keeps_id() {
        let mut page = RawPage::new(512, PageId::new(4), PageType::Data);
        page.data_mut()[0] = 9;
        page.set_item_count(3);
        page.reset(PageType::Free);
        assert_eq!(page.page_id(), PageId::new(4));
        assert_eq!(page.page_type(), PageType::Free);
        assert_eq!(page.item_count(), 0);
        assert!(page.data().iter().all(|&b| b == 0));
    }
}
