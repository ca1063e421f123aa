//! The before-image journal.
//!
//! A sibling file `<db>.journal` receives the pre-image of every page a
//! transaction mutated, before any of those pages reach the main file:
//!
//! 1. append pre-image records, 2. sync the journal, 3. write dirty pages,
//! 4. sync the main file, 5. append the footer and sync, 6. truncate.
//!
//! Each record is `u32 LE length | u32 LE page-id | u32 LE CRC-32 | bytes`.
//! The footer is 16 bytes: magic `JRNL-END` plus the u64 LE record count,
//! appended only after the main file is durable — its presence is the
//! commit marker. Recovery on open therefore has two cases: footer present
//! means the commit completed and the journal is stale (truncate, keep the
//! post-commit state); footer absent means the commit never finished
//! (replay the valid-checksum prefix onto the main file, restoring the
//! pre-commit state, and discard any malformed tail).

use crate::error::Result;
use crate::types::PageId;
use std::fs::{File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Footer magic bytes
const FOOTER_MAGIC: &[u8; 8] = b"JRNL-END";

/// Record header size: length + page id + checksum
const RECORD_HEADER: usize = 12;

/// Footer size: magic + record count
const FOOTER_SIZE: usize = 16;

/// Handle to a database's journal file
pub struct Journal {
    path: PathBuf,
}

impl Journal {
    /// The journal that belongs to the given database file
    pub fn for_db(db_path: &Path) -> Self {
        Self {
            path: journal_path(db_path),
        }
    }

    /// Path of the journal file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether a non-empty journal file exists
    pub fn has_content(&self) -> bool {
        std::fs::metadata(&self.path).map(|m| m.len() > 0).unwrap_or(false)
    }

    /// Start writing a fresh journal for one commit
    pub fn begin(&self) -> Result<JournalWriter> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&self.path)?;
        Ok(JournalWriter { file, count: 0 })
    }

    /// Discard any journal content (rollback path)
    pub fn clear(&self) -> Result<()> {
        if self.path.exists() {
            let file = OpenOptions::new().write(true).open(&self.path)?;
            file.set_len(0)?;
            file.sync_all()?;
        }
        Ok(())
    }

    /// Recover the database file from this journal, if needed.
    ///
    /// Must run before the file is opened for normal use. Returns the number
    /// of pre-image records replayed (0 when the journal was empty, absent,
    /// or carried a complete commit).
    pub fn recover(&self, db_path: &Path) -> Result<usize> {
        let bytes = match std::fs::read(&self.path) {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };
        if bytes.is_empty() {
            return Ok(0);
        }

        let records = parse_records(&bytes)?;
        let replayed = match records {
            Parsed::Committed => 0,
            Parsed::Incomplete(records) => {
                if !records.is_empty() {
                    let mut db = OpenOptions::new().read(true).write(true).open(db_path)?;
                    for (page_id, image) in &records {
                        let offset = page_id.value() as u64 * image.len() as u64;
                        db.seek(SeekFrom::Start(offset))?;
                        db.write_all(image)?;
                    }
                    db.sync_all()?;
                }
                records.len()
            }
        };

        self.clear()?;
        Ok(replayed)
    }
}

enum Parsed {
    /// Footer present: the commit completed, nothing to replay
    Committed,
    /// Footer absent: these records carry valid checksums, the rest is junk
    Incomplete(Vec<(PageId, Vec<u8>)>),
}

fn parse_records(bytes: &[u8]) -> Result<Parsed> {
    let mut records = Vec::new();
    let mut pos = 0usize;

    loop {
        let remaining = bytes.len() - pos;
        if remaining == 0 {
            return Ok(Parsed::Incomplete(records));
        }
        if remaining >= 8 && &bytes[pos..pos + 8] == FOOTER_MAGIC {
            if remaining == FOOTER_SIZE {
                let count = u64::from_le_bytes([
                    bytes[pos + 8],
                    bytes[pos + 9],
                    bytes[pos + 10],
                    bytes[pos + 11],
                    bytes[pos + 12],
                    bytes[pos + 13],
                    bytes[pos + 14],
                    bytes[pos + 15],
                ]);
                if count == records.len() as u64 {
                    return Ok(Parsed::Committed);
                }
            }
            // footer-shaped junk: discard it with the rest of the tail
            return Ok(Parsed::Incomplete(records));
        }
        if remaining < RECORD_HEADER {
            return Ok(Parsed::Incomplete(records));
        }

        let len = u32::from_le_bytes([bytes[pos], bytes[pos + 1], bytes[pos + 2], bytes[pos + 3]])
            as usize;
        let page_id = PageId::new(u32::from_le_bytes([
            bytes[pos + 4],
            bytes[pos + 5],
            bytes[pos + 6],
            bytes[pos + 7],
        ]));
        let stored = u32::from_le_bytes([
            bytes[pos + 8],
            bytes[pos + 9],
            bytes[pos + 10],
            bytes[pos + 11],
        ]);

        let body_start = pos + RECORD_HEADER;
        if len == 0 || bytes.len() - body_start < len {
            // partially written tail record
            return Ok(Parsed::Incomplete(records));
        }
        let body = &bytes[body_start..body_start + len];
        if crc32fast::hash(body) != stored {
            return Ok(Parsed::Incomplete(records));
        }
        records.push((page_id, body.to_vec()));
        pos = body_start + len;
    }
}

/// Writer for one commit's worth of pre-images
pub struct JournalWriter {
    file: File,
    count: u64,
}

impl JournalWriter {
    /// Append one page pre-image record
    pub fn append(&mut self, page_id: PageId, image: &[u8]) -> Result<()> {
        let mut header = [0u8; RECORD_HEADER];
        header[0..4].copy_from_slice(&(image.len() as u32).to_le_bytes());
        header[4..8].copy_from_slice(&page_id.value().to_le_bytes());
        header[8..12].copy_from_slice(&crc32fast::hash(image).to_le_bytes());
        self.file.write_all(&header)?;
        self.file.write_all(image)?;
        self.count += 1;
        Ok(())
    }

    /// Number of records appended so far
    pub fn record_count(&self) -> u64 {
        self.count
    }

    /// Sync appended records to stable storage (commit step 2)
    pub fn sync(&mut self) -> Result<()> {
        self.file.sync_all()?;
        Ok(())
    }

    /// Mark the commit durable and discard the journal (steps 5 and 6).
    ///
    /// Only call after the main file has been synced.
    pub fn commit(mut self) -> Result<()> {
        let mut footer = [0u8; FOOTER_SIZE];
        footer[0..8].copy_from_slice(FOOTER_MAGIC);
        footer[8..16].copy_from_slice(&self.count.to_le_bytes());
        self.file.write_all(&footer)?;
        self.file.sync_all()?;
        self.file.set_len(0)?;
        self.file.sync_all()?;
        Ok(())
    }
}

fn journal_path(db_path: &Path) -> PathBuf {
    let mut name = db_path.as_os_str().to_owned();
    name.push(".journal");
    PathBuf::from(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn page_image(size: usize, fill: u8) -> Vec<u8> {
        vec![fill; size]
    }

    fn write_db(path: &Path, pages: &[Vec<u8>]) {
        let mut all = Vec::new();
        for p in pages {
            all.extend_from_slice(p);
        }
        std::fs::write(path, all).unwrap();
    }

    #[test]
    fn test_recover_without_journal_is_noop() -> Result<()> {
        let dir = tempdir().unwrap();
        let db = dir.path().join("test.db");
        write_db(&db, &[page_image(512, 1)]);
        let journal = Journal::for_db(&db);
        assert_eq!(journal.recover(&db)?, 0);
        Ok(())
    }

    #[test]
    fn test_incomplete_commit_replays_pre_images() -> Result<()> {
        let dir = tempdir().unwrap();
        let db = dir.path().join("test.db");
        // page 1 starts as all-1s, the "crashed" commit left all-2s behind
        write_db(&db, &[page_image(512, 0), page_image(512, 2)]);

        let journal = Journal::for_db(&db);
        let mut w = journal.begin()?;
        w.append(PageId::new(1), &page_image(512, 1))?;
        w.sync()?;
        // crash before commit(): no footer
        drop(w);

        assert_eq!(journal.recover(&db)?, 1);
        let restored = std::fs::read(&db)?;
        assert!(restored[512..].iter().all(|&b| b == 1));
        assert!(!journal.has_content());
        Ok(())
    }

    #[test]
    fn test_completed_commit_is_not_replayed() -> Result<()> {
        let dir = tempdir().unwrap();
        let db = dir.path().join("test.db");
        write_db(&db, &[page_image(512, 0), page_image(512, 2)]);

        let journal = Journal::for_db(&db);
        let mut w = journal.begin()?;
        w.append(PageId::new(1), &page_image(512, 1))?;
        w.sync()?;
        w.commit()?;

        // commit() truncated; even an uncleared copy with a footer must not
        // roll the main file back
        assert_eq!(journal.recover(&db)?, 0);
        let kept = std::fs::read(&db)?;
        assert!(kept[512..].iter().all(|&b| b == 2));
        Ok(())
    }

    #[test]
    fn test_footer_present_means_committed() -> Result<()> {
        let dir = tempdir().unwrap();
        let db = dir.path().join("test.db");
        write_db(&db, &[page_image(512, 0), page_image(512, 2)]);

        // hand-build a journal that crashed between footer sync and truncate
        let journal = Journal::for_db(&db);
        let mut w = journal.begin()?;
        w.append(PageId::new(1), &page_image(512, 1))?;
        w.sync()?;
        let mut bytes = std::fs::read(journal.path())?;
        bytes.extend_from_slice(FOOTER_MAGIC);
        bytes.extend_from_slice(&1u64.to_le_bytes());
        std::fs::write(journal.path(), &bytes)?;
        drop(w);

        assert_eq!(journal.recover(&db)?, 0);
        let kept = std::fs::read(&db)?;
        assert!(kept[512..].iter().all(|&b| b == 2));
        Ok(())
    }

    #[test]
    fn test_corrupt_tail_record_discarded() -> Result<()> {
        let dir = tempdir().unwrap();
        let db = dir.path().join("test.db");
        write_db(&db, &[page_image(512, 0), page_image(512, 9), page_image(512, 9)]);

        let journal = Journal::for_db(&db);
        let mut w = journal.begin()?;
        w.append(PageId::new(1), &page_image(512, 1))?;
        w.append(PageId::new(2), &page_image(512, 2))?;
        w.sync()?;
        drop(w);

        // corrupt the second record's body
        let mut bytes = std::fs::read(journal.path())?;
        let second_body = 12 + 512 + 12;
        bytes[second_body + 5] ^= 0xFF;
        std::fs::write(journal.path(), &bytes)?;

        // only the first record replays
        assert_eq!(journal.recover(&db)?, 1);
        let restored = std::fs::read(&db)?;
        assert!(restored[512..1024].iter().all(|&b| b == 1));
        assert!(restored[1024..].iter().all(|&b| b == 9));
        Ok(())
    }

    #[test]
    fn test_journal_path_is_sibling() {
        let journal = Journal::for_db(Path::new("/tmp/data.db"));
        assert_eq!(journal.path(), Path::new("/tmp/data.db.journal"));
    }
}
