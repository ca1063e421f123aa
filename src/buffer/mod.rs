//! Buffer pool: the page cache and allocation layer.
//!
//! The pool is the only owner of page byte buffers. Every other component
//! reaches pages through pinned handles ([`PagePin`]) that release their pin
//! on drop. The pool also owns the file header state (free list head, page
//! count, catalog pointer), the parsed-form cache for index nodes, and the
//! pre-image capture used by transactions.

mod lru;
mod pool;

pub use pool::{BufferPool, PagePin};
