//! LRU tracking for the buffer pool.

use crate::types::PageId;
use std::collections::HashMap;

/// Tracks page recency with an intrusive doubly-linked list over a slab.
///
/// `touch` is O(1); eviction scans from the cold end so that the pool can
/// skip pages it must not evict (pinned or dirty-under-transaction).
pub struct LruList {
    index: HashMap<PageId, usize>,
    slab: Vec<Node>,
    head: Option<usize>,
    tail: Option<usize>,
    free: Vec<usize>,
}

#[derive(Clone, Copy)]
struct Node {
    page_id: PageId,
    prev: Option<usize>,
    next: Option<usize>,
}

impl LruList {
    pub fn new(capacity: usize) -> Self {
        Self {
            index: HashMap::with_capacity(capacity),
            slab: Vec::with_capacity(capacity),
            head: None,
            tail: None,
            free: Vec::new(),
        }
    }

    /// Mark a page as most recently used, inserting it if unknown
    pub fn touch(&mut self, page_id: PageId) {
        if let Some(&slot) = self.index.get(&page_id) {
            self.unlink(slot);
            self.push_front(slot);
        } else {
            let node = Node {
                page_id,
                prev: None,
                next: None,
            };
            let slot = match self.free.pop() {
                Some(slot) => {
                    self.slab[slot] = node;
                    slot
                }
                None => {
                    self.slab.push(node);
                    self.slab.len() - 1
                }
            };
            self.index.insert(page_id, slot);
            self.push_front(slot);
        }
    }

    /// Forget a page entirely
    pub fn remove(&mut self, page_id: PageId) {
        if let Some(slot) = self.index.remove(&page_id) {
            self.unlink(slot);
            self.free.push(slot);
        }
    }

    /// Pages from least to most recently used
    pub fn coldest_first(&self) -> impl Iterator<Item = PageId> + '_ {
        ColdIter {
            list: self,
            cursor: self.tail,
        }
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    fn push_front(&mut self, slot: usize) {
        self.slab[slot].prev = None;
        self.slab[slot].next = self.head;
        if let Some(old) = self.head {
            self.slab[old].prev = Some(slot);
        }
        self.head = Some(slot);
        if self.tail.is_none() {
            self.tail = Some(slot);
        }
    }

    fn unlink(&mut self, slot: usize) {
        let node = self.slab[slot];
        match node.prev {
            Some(p) => self.slab[p].next = node.next,
            None => self.head = node.next,
        }
        match node.next {
            Some(n) => self.slab[n].prev = node.prev,
            None => self.tail = node.prev,
        }
    }
}

struct ColdIter<'a> {
    list: &'a LruList,
    cursor: Option<usize>,
}

impl Iterator for ColdIter<'_> {
    type Item = PageId;

    fn next(&mut self) -> Option<PageId> {
        let slot = self.cursor?;
        let node = self.list.slab[slot];
        self.cursor = node.prev;
        Some(node.page_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(list: &LruList) -> Vec<u32> {
        list.coldest_first().map(|p| p.value()).collect()
    }

    #[test]
    fn test_touch_order() {
        let mut lru = LruList::new(4);
        lru.touch(PageId::new(1));
        lru.touch(PageId::new(2));
        lru.touch(PageId::new(3));
        assert_eq!(ids(&lru), [1, 2, 3]);

        lru.touch(PageId::new(1));
        assert_eq!(ids(&lru), [2, 3, 1]);
    }

    #[test]
    fn test_remove_and_reuse() {
        let mut lru = LruList::new(4);
        lru.touch(PageId::new(1));
        lru.touch(PageId::new(2));
        lru.touch(PageId::new(3));
        lru.remove(PageId::new(2));
        assert_eq!(ids(&lru), [1, 3]);
        assert_eq!(lru.len(), 2);

        // slab slot is recycled
        lru.touch(PageId::new(4));
        assert_eq!(ids(&lru), [1, 3, 4]);
        assert_eq!(lru.slab.len(), 3);
    }

    #[test]
    fn test_empty() {
        let mut lru = LruList::new(2);
        assert_eq!(lru.len(), 0);
        assert_eq!(ids(&lru), Vec::<u32>::new());
        lru.remove(PageId::new(9));
    }
}
