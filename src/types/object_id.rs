//! 12-byte causally-orderable object identifiers.
//!
//! Layout, big-endian: 4-byte Unix-seconds timestamp, 3-byte machine hash,
//! 2-byte process id, 3-byte monotonic counter. Byte-lexicographic order on
//! the 12 bytes equals chronological-then-causal order for ids generated in
//! one process.

use crate::error::{Error, Result};
use rand::Rng;
use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Process-wide monotonic counter, randomly seeded at first use
static COUNTER: AtomicU32 = AtomicU32::new(u32::MAX);

/// A 12-byte object identifier
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObjectId([u8; 12]);

impl ObjectId {
    /// Generate a new id for the current process and instant
    pub fn new() -> Self {
        let secs = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as u32)
            .unwrap_or(0);
        let machine = machine_hash();
        let pid = std::process::id() as u16;
        let count = next_count();

        let mut bytes = [0u8; 12];
        bytes[0..4].copy_from_slice(&secs.to_be_bytes());
        bytes[4..7].copy_from_slice(&machine);
        bytes[7..9].copy_from_slice(&pid.to_be_bytes());
        bytes[9..12].copy_from_slice(&count.to_be_bytes()[1..4]);
        Self(bytes)
    }

    /// Construct from raw bytes
    pub const fn from_bytes(bytes: [u8; 12]) -> Self {
        Self(bytes)
    }

    /// The raw 12 bytes
    pub const fn as_bytes(&self) -> &[u8; 12] {
        &self.0
    }

    /// The embedded Unix-seconds timestamp
    pub fn timestamp(&self) -> u32 {
        u32::from_be_bytes([self.0[0], self.0[1], self.0[2], self.0[3]])
    }

    /// Parse from 24 hex characters
    pub fn parse(s: &str) -> Result<Self> {
        if s.len() != 24 {
            return Err(Error::invalid_encoding(format!(
                "object id must be 24 hex chars, got {}",
                s.len()
            )));
        }
        let raw = hex::decode(s)
            .map_err(|e| Error::invalid_encoding(format!("object id hex: {e}")))?;
        let mut bytes = [0u8; 12];
        bytes.copy_from_slice(&raw);
        Ok(Self(bytes))
    }
}

impl Default for ObjectId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectId({})", self)
    }
}

/// Take the next counter value, seeding the counter randomly on first use
fn next_count() -> u32 {
    loop {
        let current = COUNTER.load(Ordering::Relaxed);
        if current != u32::MAX {
            return COUNTER.fetch_add(1, Ordering::Relaxed) & 0x00FF_FFFF;
        }
        let seed = rand::thread_rng().gen_range(0..0x00F0_0000u32);
        if COUNTER
            .compare_exchange(u32::MAX, seed, Ordering::Relaxed, Ordering::Relaxed)
            .is_ok()
        {
            return COUNTER.fetch_add(1, Ordering::Relaxed) & 0x00FF_FFFF;
        }
    }
}

/// Three bytes derived from the host name
fn machine_hash() -> [u8; 3] {
    let mut hasher = DefaultHasher::new();
    std::env::var_os("HOSTNAME")
        .unwrap_or_else(|| "localhost".into())
        .hash(&mut hasher);
    let h = hasher.finish();
    [(h >> 16) as u8, (h >> 8) as u8, h as u8]
}
