//! Common utilities and types shared across oxistore

pub mod config;
pub mod error;
pub mod jsp;
pub mod utils;

pub use config::{ClusterConf, Config, HousekeepConf, TimeoutConf};
pub use error::{Error, Result};
pub use jsp::Revs;
pub use utils::{debug_enabled, gen_uuid, timestamp_now, timestamp_now_nanos};
