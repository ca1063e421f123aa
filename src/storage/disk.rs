//! The disk manager.
//!
//! Owns the database file and reads/writes whole page images at
//! `page_id * page_size`. Allocation policy (free list, extension) lives in
//! the buffer pool; the disk manager only moves bytes and syncs.

use crate::error::{Error, Result};
use crate::storage::FileHeader;
use crate::types::{PageId, MIN_PAGE_SIZE};
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// File-backed page I/O
pub struct DiskManager {
    file: Mutex<File>,
    page_size: u32,
    path: PathBuf,
}

impl DiskManager {
    /// Open an existing database file or create a new one.
    ///
    /// For a new file the header page is written with `create_page_size`;
    /// for an existing file the page size recorded in the header wins and
    /// `create_page_size` is ignored. Returns the manager, the parsed file
    /// header, and whether the file was created.
    pub fn open(path: &Path, create_page_size: u32) -> Result<(Self, FileHeader, bool)> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        let len = file.metadata()?.len();
        if len == 0 {
            if create_page_size < MIN_PAGE_SIZE || !create_page_size.is_power_of_two() {
                return Err(Error::invalid_operation(format!(
                    "page size must be a power of two >= {MIN_PAGE_SIZE}, got {create_page_size}"
                )));
            }
            let header = FileHeader::new(create_page_size);
            let mut image = vec![0u8; create_page_size as usize];
            header.write(&mut image);
            file.seek(SeekFrom::Start(0))?;
            file.write_all(&image)?;
            file.sync_all()?;

            let manager = Self {
                file: Mutex::new(file),
                page_size: create_page_size,
                path: path.to_owned(),
            };
            return Ok((manager, header, true));
        }

        // the header's own prefix tells us the page size
        let mut prefix = [0u8; 32];
        file.seek(SeekFrom::Start(0))?;
        file.read_exact(&mut prefix)?;
        let header = FileHeader::read(&prefix)?;

        let manager = Self {
            page_size: header.page_size,
            file: Mutex::new(file),
            path: path.to_owned(),
        };
        Ok((manager, header, false))
    }

    /// Page size of this file
    pub fn page_size(&self) -> u32 {
        self.page_size
    }

    /// Path of the database file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read one page image
    pub fn read_page(&self, page_id: PageId) -> Result<Vec<u8>> {
        if page_id.is_none() {
            return Err(Error::invalid_operation(
                "the header page is not read through the page interface",
            ));
        }
        let mut buf = vec![0u8; self.page_size as usize];
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(page_id.file_offset(self.page_size)))?;
        file.read_exact(&mut buf)?;
        Ok(buf)
    }

    /// Write one page image, extending the file if needed
    pub fn write_page(&self, page_id: PageId, image: &[u8]) -> Result<()> {
        if page_id.is_none() {
            return Err(Error::invalid_operation(
                "the header page is not written through the page interface",
            ));
        }
        if image.len() != self.page_size as usize {
            return Err(Error::invalid_operation(format!(
                "page image must be {} bytes, got {}",
                self.page_size,
                image.len()
            )));
        }
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(page_id.file_offset(self.page_size)))?;
        file.write_all(image)?;
        Ok(())
    }

    /// Rewrite the header page
    pub fn write_header(&self, header: &FileHeader) -> Result<()> {
        let mut image = vec![0u8; self.page_size as usize];
        header.write(&mut image);
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(0))?;
        file.write_all(&image)?;
        Ok(())
    }

    /// Flush file contents and metadata to stable storage
    pub fn sync(&self) -> Result<()> {
        self.file.lock().sync_all()?;
        Ok(())
    }

    /// Current file length in bytes
    pub fn file_len(&self) -> Result<u64> {
        Ok(self.file.lock().metadata()?.len())
    }

    /// Truncate the file to exactly `page_count` pages
    pub fn truncate_pages(&self, page_count: u64) -> Result<()> {
        let file = self.file.lock();
        file.set_len(page_count * self.page_size as u64)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DEFAULT_PAGE_SIZE;
    use tempfile::tempdir;

    #[test]
    fn test_create_new_database() -> Result<()> {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.db");

        let (dm, header, created) = DiskManager::open(&path, DEFAULT_PAGE_SIZE)?;
        assert!(created);
        assert_eq!(header.page_count, 1);
        assert_eq!(header.page_size, DEFAULT_PAGE_SIZE);
        assert_eq!(dm.file_len()?, DEFAULT_PAGE_SIZE as u64);
        Ok(())
    }

    #[test]
    fn test_reopen_keeps_page_size() -> Result<()> {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.db");

        {
            let (_dm, header, created) = DiskManager::open(&path, 4096)?;
            assert!(created);
            assert_eq!(header.page_size, 4096);
        }
        // the requested size is ignored on reopen
        let (dm, header, created) = DiskManager::open(&path, DEFAULT_PAGE_SIZE)?;
        assert!(!created);
        assert_eq!(header.page_size, 4096);
        assert_eq!(dm.page_size(), 4096);
        Ok(())
    }

    #[test]
    fn test_page_roundtrip() -> Result<()> {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.db");

        let (dm, _, _) = DiskManager::open(&path, 4096)?;
        let mut image = vec![0u8; 4096];
        image[100..105].copy_from_slice(b"hello");
        dm.write_page(PageId::new(2), &image)?;
        dm.sync()?;

        let read = dm.read_page(PageId::new(2))?;
        assert_eq!(&read[100..105], b"hello");
        // writing page 2 extended the file over page 1 as well
        assert_eq!(dm.file_len()?, 3 * 4096);
        Ok(())
    }

    #[test]
    fn test_header_rewrite() -> Result<()> {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.db");

        let (dm, mut header, _) = DiskManager::open(&path, 4096)?;
        header.catalog_root = PageId::new(1);
        header.page_count = 3;
        dm.write_header(&header)?;
        dm.sync()?;
        drop(dm);

        let (_, reread, created) = DiskManager::open(&path, 4096)?;
        assert!(!created);
        assert_eq!(reread, header);
        Ok(())
    }

    #[test]
    fn test_rejects_bad_page_size() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.db");
        assert!(DiskManager::open(&path, 100).is_err());
    }
}
