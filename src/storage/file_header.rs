//! The database file header.
//!
//! Page 0 of the file carries the header. Unlike every other page it has no
//! 32-byte page header; its layout is fixed:
//!
//! ```text
//! Offset  Size  Description
//! 0       8     Magic "TINYDB\0\0"
//! 8       4     Format version (little-endian)
//! 12      4     Page size
//! 16      4     Root catalog page ID
//! 20      4     Free-list head page ID
//! 24      8     Total page count
//! 32      ...   Reserved, zeroed
//! ```

use crate::error::{Error, Result};
use crate::types::{PageId, MIN_PAGE_SIZE};

/// Magic bytes identifying a database file
pub const MAGIC: &[u8; 8] = b"TINYDB\0\0";

/// Current on-disk format version
pub const FORMAT_VERSION: u32 = 1;

/// Parsed form of the header page
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileHeader {
    /// Format version the file was written with
    pub version: u32,
    /// Page size chosen at creation, immutable thereafter
    pub page_size: u32,
    /// Head of the catalog collection's DATA chain, NONE until created
    pub catalog_root: PageId,
    /// Head of the free-list chain, NONE when no pages are free
    pub free_head: PageId,
    /// Total pages in the file, including this header page
    pub page_count: u64,
}

impl FileHeader {
    /// Create a header for a new, empty database
    pub fn new(page_size: u32) -> Self {
        Self {
            version: FORMAT_VERSION,
            page_size,
            catalog_root: PageId::NONE,
            free_head: PageId::NONE,
            page_count: 1,
        }
    }

    /// Read a header from the start of a page-0 image
    pub fn read(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < 32 {
            return Err(Error::invalid_db("header page too short"));
        }
        if &bytes[0..8] != MAGIC {
            return Err(Error::invalid_db("missing magic bytes"));
        }
        let version = u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]);
        if version != FORMAT_VERSION {
            return Err(Error::invalid_db(format!(
                "unsupported format version {version}"
            )));
        }
        let page_size = u32::from_le_bytes([bytes[12], bytes[13], bytes[14], bytes[15]]);
        if page_size < MIN_PAGE_SIZE || !page_size.is_power_of_two() {
            return Err(Error::invalid_db(format!("bad page size {page_size}")));
        }
        Ok(Self {
            version,
            page_size,
            catalog_root: PageId::new(u32::from_le_bytes([
                bytes[16], bytes[17], bytes[18], bytes[19],
            ])),
            free_head: PageId::new(u32::from_le_bytes([
                bytes[20], bytes[21], bytes[22], bytes[23],
            ])),
            page_count: u64::from_le_bytes([
                bytes[24], bytes[25], bytes[26], bytes[27], bytes[28], bytes[29], bytes[30],
                bytes[31],
            ]),
        })
    }

    /// Write this header into a zeroed page-0 image
    pub fn write(&self, bytes: &mut [u8]) {
        bytes.fill(0);
        bytes[0..8].copy_from_slice(MAGIC);
        bytes[8..12].copy_from_slice(&self.version.to_le_bytes());
        bytes[12..16].copy_from_slice(&self.page_size.to_le_bytes());
        bytes[16..20].copy_from_slice(&self.catalog_root.value().to_le_bytes());
        bytes[20..24].copy_from_slice(&self.free_head.value().to_le_bytes());
        bytes[24..32].copy_from_slice(&self.page_count.to_le_bytes());
    }

    /// Take the next page ID, extending the file's page count
    pub fn allocate_page(&mut self) -> PageId {
        let id = PageId::new(self.page_count as u32);
        self.page_count += 1;
        id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DEFAULT_PAGE_SIZE;

    #[test]
    fn test_header_roundtrip() {
        let header = FileHeader {
            version: FORMAT_VERSION,
            page_size: DEFAULT_PAGE_SIZE,
            catalog_root: PageId::new(1),
            free_head: PageId::new(17),
            page_count: 99,
        };
        let mut bytes = vec![0u8; DEFAULT_PAGE_SIZE as usize];
        header.write(&mut bytes);
        assert_eq!(FileHeader::read(&bytes).unwrap(), header);
        // reserved remainder stays zeroed
        assert!(bytes[32..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_bad_magic_rejected() {
        let mut bytes = vec![0u8; 512];
        bytes[0..8].copy_from_slice(b"NOTADB\0\0");
        assert!(FileHeader::read(&bytes).is_err());
    }

    #[test]
    fn test_bad_page_size_rejected() {
        let mut bytes = vec![0u8; 512];
        FileHeader::new(DEFAULT_PAGE_SIZE).write(&mut bytes);
        bytes[12..16].copy_from_slice(&100u32.to_le_bytes());
        assert!(FileHeader::read(&bytes).is_err());
    }

    #[test]
    fn test_allocate_page() {
        let mut header = FileHeader::new(DEFAULT_PAGE_SIZE);
        assert_eq!(header.page_count, 1);
        assert_eq!(header.allocate_page(), PageId::new(1));
        assert_eq!(header.allocate_page(), PageId::new(2));
        assert_eq!(header.page_count, 3);
    }
}
