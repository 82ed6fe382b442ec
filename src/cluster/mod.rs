//! Cluster state: membership, bucket metadata, owners and listeners

pub mod bmd;
pub mod listeners;
pub mod namelock;
pub mod node;
pub mod owner;
pub mod rmd;
pub mod smap;

pub use bmd::{Bck, Bmd, BucketProps, EcConf, MirrorConf, PropsToUpdate, Provider};
pub use listeners::{SmapListener, SmapListeners};
pub use namelock::{NameLockGuard, NameLocker};
pub use node::{DaemonRole, NetInfo, Snode, SnodeFlags};
pub use owner::{BmdOwner, RmdOwner, SmapModifier, SmapOwner};
pub use rmd::Rmd;
pub use smap::{NodeMap, Smap, DEFAULT_IC_SIZE};
