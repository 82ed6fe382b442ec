//! # oxistore
//!
//! Control plane of a distributed object-storage cluster:
//! - Versioned cluster map (Smap) with monotonic, persisted publishes
//! - Two-phase bucket-metadata (BMD) transactions driven by the primary
//! - Completion-notification tracking for long-running operations
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────┐
//! │          Primary (coordinator)             │
//! │   Smap/BMD/RMD owners (clone-modify-publish)│
//! │   txn: begin → mutate → metasync → commit  │
//! │   notifs: push / pull / membership paths   │
//! └───────────┬────────────────────────────────┘
//!             │ HTTP (intra-control)
//!   ┌─────────┴──────────┬──────────────┐
//!   │                    │              │
//! ┌─▼─────────┐   ┌─────▼──────┐   ┌──▼───────────┐
//! │ Target 1  │   │ Target 2   │   │ Target N     │
//! │ /v1/txn   │   │ /v1/txn    │   │ /v1/txn      │
//! │ /v1/notifs│   │  reports   │   │  reports     │
//! └───────────┘   └────────────┘   └──────────────┘
//! ```
//!
//! ## Usage
//!
//! ### Start a coordinator
//! ```bash
//! oxistore-proxy serve \
//!   --id p1 \
//!   --bind 0.0.0.0:8080 \
//!   --confdir ./proxy-conf \
//!   --public-url http://localhost:8080
//! ```

pub mod cluster;
pub mod common;
pub mod coordinator;

// Re-export commonly used types
pub use common::{Config, Error, Result};
pub use coordinator::{Coordinator, Daemon};

/// Current version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Build info
pub const BUILD_INFO: &str = concat!(env!("CARGO_PKG_VERSION"), " (", env!("CARGO_PKG_NAME"), ")");
