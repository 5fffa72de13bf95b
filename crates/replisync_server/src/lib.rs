//! # replisync Server
//!
//! Reference authoritative store for replisync.
//!
//! This crate provides:
//! - [`SyncServer`], which keeps the authoritative snapshot of every set in
//!   any [`PersistenceGateway`](replisync_storage::PersistenceGateway)
//! - HTTP routing (`GET /sets/{id}`, `PUT /sets/{id}`) through the
//!   engine's [`LoopbackServer`](replisync_engine::LoopbackServer) trait
//! - [`ServerTransport`], which connects an orchestrator to a server
//!   in-process
//!
//! # Push Policy
//!
//! By default a push replaces the stored snapshot: the client has already
//! resolved against the state it fetched. With [`PushPolicy::Merge`] the
//! server unions every push into its stored state instead, so concurrent
//! clients can never overwrite each other's elements.

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod config;
mod error;
mod handler;
mod server;
mod transport;

pub use config::{PushPolicy, ServerConfig};
pub use error::{ServerError, ServerResult};
pub use server::{ServerStats, SyncServer};
pub use transport::ServerTransport;
