//! Pooled byte buffers for encode paths.
//!
//! Document and node serialization happen on every write; routing them
//! through a small buffer pool avoids a fresh allocation per encode.

use once_cell::sync::Lazy;
use parking_lot::Mutex;

/// Buffers larger than this are not returned to the pool
const MAX_POOLED_CAPACITY: usize = 256 * 1024;

/// Upper bound on pooled buffer count
const MAX_POOLED_BUFFERS: usize = 16;

static POOL: Lazy<Mutex<Vec<Vec<u8>>>> = Lazy::new(|| Mutex::new(Vec::new()));

/// Run `f` with a cleared buffer borrowed from the pool.
///
/// The buffer is returned to the pool afterwards unless it grew past the
/// pooling threshold.
pub(crate) fn with_buffer<R>(f: impl FnOnce(&mut Vec<u8>) -> R) -> R {
    let mut buf = POOL.lock().pop().unwrap_or_default();
    buf.clear();
    let result = f(&mut buf);
    if buf.capacity() <= MAX_POOLED_CAPACITY {
        let mut pool = POOL.lock();
        if pool.len() < MAX_POOLED_BUFFERS {
            pool.push(buf);
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_starts_empty() {
        with_buffer(|buf| {
            buf.extend_from_slice(b"leftover");
        });
        with_buffer(|buf| {
            assert!(buf.is_empty());
        });
    }

    #[test]
    fn test_nested_use() {
        let outer = with_buffer(|a| {
            a.push(1);
            let inner = with_buffer(|b| {
                b.push(2);
                b.len()
            });
            a.len() + inner
        });
        assert_eq!(outer, 2);
    }
}
