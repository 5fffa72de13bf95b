//! # replisync Storage
//!
//! Persistence gateway trait and snapshot stores for replisync.
//!
//! The sync engine never talks to a concrete database. It loads and saves
//! whole [`Snapshot`]s keyed by set id through the [`PersistenceGateway`]
//! trait, and this crate provides two implementations of it.
//!
//! ## Design Principles
//!
//! - A snapshot is an opaque load/store unit; stores do not merge
//! - A missing snapshot is `Ok(None)`, not an error
//! - `save` is idempotent: writing the same snapshot twice stores the same value
//! - Stores must be `Send + Sync` for use from the background worker
//!
//! ## Available Stores
//!
//! - [`MemoryStore`] - For testing and ephemeral state
//! - [`FileStore`] - One file per set, JSON or CBOR encoded
//!
//! ## Example
//!
//! ```rust
//! use replisync_protocol::Snapshot;
//! use replisync_storage::{MemoryStore, PersistenceGateway};
//!
//! # let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
//! # rt.block_on(async {
//! let store = MemoryStore::<String>::new();
//! store.save("todos", &Snapshot::new("todos", vec!["a".into()])).await.unwrap();
//! assert_eq!(store.load("todos").await.unwrap().unwrap().items, vec!["a"]);
//! # });
//! ```
//!
//! [`Snapshot`]: replisync_protocol::Snapshot

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod encoding;
mod error;
mod file;
mod gateway;
mod memory;

pub use encoding::SnapshotEncoding;
pub use error::{StorageError, StorageResult};
pub use file::{FileStore, FileStoreConfig};
pub use gateway::PersistenceGateway;
pub use memory::MemoryStore;
