//! # replisync Engine
//!
//! Sync orchestrator and background request channel for replisync.
//!
//! This crate provides:
//! - Sync state machine (idle → connecting → fetching → resolving →
//!   persisting → pushing → completed)
//! - Retry with exponential backoff and jitter, per phase
//! - Cooperative cancellation up to the persisting step
//! - Progress observers
//! - A bounded request channel with correlation ids, deduplication and
//!   per-set ordering
//! - Transport abstraction with mock and HTTP implementations
//!
//! ## Architecture
//!
//! A caller submits a [`SyncRequest`] to a [`SyncChannel`] and gets a
//! [`SyncTicket`] back immediately. A background dispatcher routes the
//! request to the lane of its set id; each lane runs its requests one at a
//! time through the [`SyncOrchestrator`], which:
//! 1. Opens the local store and connects the transport
//! 2. Loads local state and fetches remote state concurrently
//! 3. Resolves them with the configured strategy
//! 4. Persists the result locally
//! 5. Pushes the result upstream
//!
//! ## Key Invariants
//!
//! - Requests for the same set id complete in submission order
//! - Every accepted request yields exactly one outcome
//! - A persisted write is never repeated by a retry of a later phase
//! - Cancellation is honored only before persisting starts
//! - A panicking observer never fails a cycle

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod channel;
mod config;
mod error;
mod http;
mod observer;
mod request;
mod state;
mod transport;

pub use channel::{SyncChannel, SyncTicket};
pub use config::{ChannelConfig, RetryConfig, SyncConfig};
pub use error::{ErrorKind, SyncError, SyncResult, TransportError, TransportResult};
pub use http::{
    decode_path_segment, encode_path_segment, HttpClient, HttpMethod, HttpResponse, HttpTransport,
    LoopbackClient, LoopbackServer,
};
pub use observer::{BroadcastObserver, ProgressEvent, SyncObserver, TracingObserver};
pub use request::{CorrelationId, OutcomeStatus, SyncOperation, SyncOutcome, SyncRequest};
pub use state::{CancelToken, SyncExecutor, SyncOrchestrator, SyncState, SyncStats};
pub use transport::{MockTransport, TransportGateway};
