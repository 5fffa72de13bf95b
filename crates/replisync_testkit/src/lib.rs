//! # replisync Testkit
//!
//! Test utilities for replisync.
//!
//! This crate provides:
//! - Test fixtures backed by temporary directories
//! - Property-based test generators using proptest
//! - Fault-injecting gateways for exercising retries and cancellation
//! - A recording observer for asserting on state transitions
//!
//! ## Usage
//!
//! ```rust,ignore
//! use replisync_testkit::prelude::*;
//!
//! #[tokio::test]
//! async fn persists_to_disk() {
//!     let store = TestStore::<String>::new();
//!     // ... drive an orchestrator over `store`
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod faults;
pub mod fixtures;
pub mod generators;
pub mod observer;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::faults::*;
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::observer::*;
}

pub use faults::*;
pub use fixtures::*;
pub use generators::*;
pub use observer::*;
