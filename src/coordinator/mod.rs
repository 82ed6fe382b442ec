//! Coordinator implementation
//!
//! The coordinator runs on the primary and is responsible for:
//! - Bucket-metadata transactions (two-phase, across the target fleet)
//! - Metadata fan-out (metasync) with acknowledgement quorum
//! - Completion-notification tracking for long-running operations
//! - The control-plane HTTP surface

pub mod bcast;
pub mod http;
pub mod metasync;
pub mod notifs;
pub mod server;
pub mod txn;

pub use server::Daemon;
pub use txn::{Coordinator, Owners};
