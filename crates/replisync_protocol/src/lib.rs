//! # replisync Protocol
//!
//! Replicated data types and conflict resolution for replisync.
//!
//! This crate provides:
//! - [`ReplicatedSet`], a grow-only set CRDT keyed by a stable set id
//! - [`Snapshot`], the persisted and wire form `{ "id": ..., "items": [...] }`
//! - [`ConflictResolver`] and [`ResolutionStrategy`] for reconciling a local
//!   state with a fetched remote state
//! - Shallow field-precedence merge for structured [`Record`]s
//!
//! This is a pure crate with no I/O operations.
//!
//! Set elements must be totally ordered (see [`Element`]), so every replica
//! stores and emits a set's items in the same order.
//!
//! ## Example
//!
//! ```rust
//! use replisync_protocol::{ConflictResolver, ReplicatedSet, ResolutionStrategy};
//!
//! let local = ReplicatedSet::new("todos").add("a".to_string());
//! let remote = ReplicatedSet::new("todos").add("b".to_string());
//!
//! let resolver = ConflictResolver::new(ResolutionStrategy::Merge);
//! let resolved = resolver.resolve_sets(&local, &remote);
//! assert_eq!(resolved.len(), 2);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod conflict;
mod error;
mod set;
mod snapshot;

pub use conflict::{
    ConflictResolver, Record, Resolvable, ResolutionContext, ResolutionStrategy,
    RESOLVED_AT_FIELD,
};
pub use error::{ProtocolError, ProtocolResult};
pub use set::{Element, ReplicatedSet};
pub use snapshot::Snapshot;
