//! Metadata fan-out
//!
//! Distributes freshly published Smap/BMD/RMD versions to the rest of
//! the cluster and lets the caller wait for an acknowledgement quorum.
//! Transactions hand off the sync while still holding the BMD lock and
//! `wait()` on the handle after releasing it.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use crate::cluster::{Smap, Snode};
use crate::common::{Result, Revs};
use crate::coordinator::bcast::Broadcaster;

pub const PATH_METASYNC: &str = "/v1/metasync";

/// One versioned payload within a sync message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RevsPayload {
    pub tag: String,
    pub version: i64,
    pub payload: serde_json::Value,
}

impl RevsPayload {
    pub fn from_revs<T: Revs>(val: &T) -> Result<Self> {
        Ok(Self {
            tag: T::TAG.to_string(),
            version: val.version(),
            payload: serde_json::to_value(val)?,
        })
    }
}

/// Wire message carried by a metasync round
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncMsg {
    pub action: String,
    pub uuid: String,
    pub revs: Vec<RevsPayload>,
}

/// Result of one metasync round
#[derive(Debug, Clone, Copy)]
pub struct SyncOutcome {
    pub acked: usize,
    pub total: usize,
}

impl SyncOutcome {
    pub fn quorum(&self) -> bool {
        self.total == 0 || self.acked > self.total / 2
    }
}

/// Awaitable hand-off of an in-flight sync
pub struct SyncHandle {
    task: tokio::task::JoinHandle<SyncOutcome>,
}

impl SyncHandle {
    pub async fn wait(self) -> SyncOutcome {
        match self.task.await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::error!("metasync task failed: {}", e);
                SyncOutcome { acked: 0, total: 0 }
            }
        }
    }
}

pub struct Metasyncer {
    bcast: Arc<Broadcaster>,
    self_id: String,
    timeout: Duration,
}

impl Metasyncer {
    pub fn new(bcast: Arc<Broadcaster>, self_id: String, timeout: Duration) -> Self {
        Self {
            bcast,
            self_id,
            timeout,
        }
    }

    /// Fan a sync message out to every other cluster member. Returns
    /// immediately; the handle resolves once all recipients answered or
    /// timed out. A quorum shortfall is logged loudly, not fatal: the
    /// next publish re-delivers current versions.
    pub fn sync(&self, smap: &Smap, msg: SyncMsg) -> SyncHandle {
        let nodes: Vec<Snode> = smap
            .pmap
            .values()
            .chain(smap.tmap.values())
            .filter(|si| si.id != self.self_id)
            .cloned()
            .collect();
        let bcast = Arc::clone(&self.bcast);
        let timeout = self.timeout;
        let task = tokio::spawn(async move {
            let total = nodes.len();
            if total == 0 {
                return SyncOutcome { acked: 0, total: 0 };
            }
            let body = match serde_json::to_vec(&msg) {
                Ok(b) => b,
                Err(e) => {
                    tracing::error!("metasync: failed to encode {}: {}", msg.action, e);
                    return SyncOutcome { acked: 0, total };
                }
            };
            let results = bcast
                .post(&nodes, PATH_METASYNC, &[], body, timeout)
                .await;
            let acked = results.iter().filter(|r| r.is_ok()).count();
            let outcome = SyncOutcome { acked, total };
            if !outcome.quorum() {
                tracing::error!(
                    "metasync {}: no quorum ({}/{} acks)",
                    msg.action,
                    acked,
                    total
                );
                for res in results.iter().filter(|r| !r.is_ok()) {
                    tracing::error!("metasync {}: node {}: {:?}", msg.action, res.sid, res.err);
                }
            }
            outcome
        });
        SyncHandle { task }
    }

    /// Convenience: sync a single revision
    pub fn sync_revs<T: Revs>(&self, smap: &Smap, action: &str, val: &T) -> Result<SyncHandle> {
        let msg = SyncMsg {
            action: action.to_string(),
            uuid: String::new(),
            revs: vec![RevsPayload::from_revs(val)?],
        };
        Ok(self.sync(smap, msg))
    }
}

impl std::fmt::Debug for Metasyncer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Metasyncer")
            .field("self_id", &self.self_id)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::Bmd;

    #[tokio::test]
    async fn test_sync_empty_cluster_is_trivial() {
        let bcast = Arc::new(Broadcaster::new());
        let syncer = Metasyncer::new(bcast, "p0".to_string(), Duration::from_millis(100));
        let smap = Smap::new();
        let handle = syncer
            .sync_revs(&smap, "create-bucket", &Bmd::new())
            .unwrap();
        let outcome = handle.wait().await;
        assert_eq!(outcome.total, 0);
        assert!(outcome.quorum());
    }

    #[test]
    fn test_revs_payload() {
        let mut bmd = Bmd::new();
        bmd.version = 3;
        let revs = RevsPayload::from_revs(&bmd).unwrap();
        assert_eq!(revs.tag, "bmd");
        assert_eq!(revs.version, 3);
    }
}
