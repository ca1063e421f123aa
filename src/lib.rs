//! # tinydb
//!
//! An embedded, single-file document database engine: collections of
//! self-describing binary documents with ACID-style durability, automatic
//! indexing, and safe in-process concurrent access.
//!
//! ## Architecture
//!
//! The engine is composed of layered, swappable components:
//!
//! - **Value model** (`value`): tagged values with a total order and a
//!   self-describing encoding
//! - **Document codec** (`document`): ordered field maps round-tripped
//!   byte-for-byte
//! - **Storage layer** (`storage`): the paged file, its header, and the
//!   before-image journal
//! - **Buffer pool** (`buffer`): LRU page cache with pinning, checksums,
//!   and transaction pre-image capture
//! - **Indexing** (`index`): disk-backed B+ trees and the per-collection
//!   index manager
//! - **Collections** (`collection`): the document heap over DATA pages
//! - **Engine** (`engine`): catalog, locking, and transactions
//!
//! ## Usage
//!
//! ```rust,ignore
//! use tinydb::{Document, Engine, EngineOptions};
//!
//! let engine = Engine::open("data.db", EngineOptions::default())?;
//! let people = engine.collection("people")?;
//!
//! let id = people.insert(Document::new().with("name", "ada"))?;
//! let doc = people.get(&id)?;
//!
//! for doc in people.scan()? {
//!     println!("{doc}");
//! }
//! ```

pub mod buffer;
pub mod cancel;
pub mod collection;
pub mod document;
pub mod engine;
pub mod error;
pub mod index;
pub mod page;
pub mod storage;
pub mod types;
pub mod value;

pub use cancel::CancelToken;
pub use document::Document;
pub use engine::{Collection, Engine, EngineOptions, EngineStats, Transaction};
pub use error::{Error, Result};
pub use index::{Index, IndexKey, IndexOptions};
pub use types::{ObjectId, PageId};
pub use value::{Value, ValueTag};
