//! Page identifier type.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Unique identifier for a page in the database file.
///
/// Page IDs are 0-indexed. Page 0 is reserved for the file header, so 0
/// doubles as the "no page" sentinel in chain links and catalog pointers.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct PageId(pub u32);

impl PageId {
    /// The "no page" sentinel (page 0 is the file header and is never linked)
    pub const NONE: PageId = PageId(0);

    /// Page ID of the file header page
    pub const HEADER: PageId = PageId(0);

    /// Create a new page ID
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    /// Get the raw page ID value
    pub const fn value(self) -> u32 {
        self.0
    }

    /// Whether this ID refers to an actual page (not the sentinel)
    pub const fn is_some(self) -> bool {
        self.0 != 0
    }

    /// Whether this is the "no page" sentinel
    pub const fn is_none(self) -> bool {
        self.0 == 0
    }

    /// Calculate the byte offset of this page in the file
    pub const fn file_offset(self, page_size: u32) -> u64 {
        self.0 as u64 * page_size as u64
    }
}

impl fmt::Display for PageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for PageId {
    fn from(id: u32) -> Self {
        Self(id)
    }
}

impl From<PageId> for u32 {
    fn from(id: PageId) -> Self {
        id.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DEFAULT_PAGE_SIZE;

    #[test]
    fn test_page_id_basics() {
        let id = PageId::new(42);
        assert_eq!(id.value(), 42);
        assert!(id.is_some());
        assert!(PageId::NONE.is_none());
    }

    #[test]
    fn test_page_id_file_offset() {
        let id = PageId::new(3);
        assert_eq!(id.file_offset(DEFAULT_PAGE_SIZE), 3 * DEFAULT_PAGE_SIZE as u64);
    }

    #[test]
    fn test_page_id_display() {
        assert_eq!(format!("{}", PageId::new(42)), "42");
    }
}
