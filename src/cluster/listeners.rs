//! Cluster-map change notifications
//!
//! A single worker task fans "map changed" events out to registered
//! subscribers. Publishers never block: the post queue is bounded and a
//! full queue coalesces events, so subscribers treat the event as a
//! hint and read the current map themselves.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

use crate::common::{Error, Result};

const POST_QUEUE_SIZE: usize = 8;
const STOP_SENTINEL: i64 = -1;

/// Subscriber to cluster-map changes.
///
/// `on_smap_changed` must not call `reg`/`unreg` on the same bus.
pub trait SmapListener: Send + Sync {
    /// Stable identity; duplicate registration under one name is an error
    fn name(&self) -> &str;

    fn on_smap_changed(&self);
}

struct Inner {
    listeners: HashMap<String, Arc<dyn SmapListener>>,
    tx: Option<mpsc::Sender<i64>>,
}

/// Fan-out bus for cluster-map change events
pub struct SmapListeners {
    inner: Mutex<Inner>,
}

impl SmapListeners {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(Inner {
                listeners: HashMap::with_capacity(POST_QUEUE_SIZE),
                tx: None,
            }),
        })
    }

    /// Register a subscriber. The first registration starts the worker.
    pub fn reg(self: &Arc<Self>, sl: Arc<dyn SmapListener>) -> Result<()> {
        let name = sl.name().to_string();
        if name.is_empty() {
            return Err(Error::Internal("listener name must be non-empty".into()));
        }
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if inner.listeners.contains_key(&name) {
            return Err(Error::Internal(format!(
                "listener {:?} already registered",
                name
            )));
        }
        inner.listeners.insert(name.clone(), sl);
        if inner.listeners.len() == 1 {
            let (tx, rx) = mpsc::channel(POST_QUEUE_SIZE);
            inner.tx = Some(tx);
            let this = Arc::clone(self);
            tokio::spawn(this.run(rx));
        }
        drop(inner);
        tracing::info!("registered Smap listener {:?}", name);
        Ok(())
    }

    /// Unregister a subscriber. The last unregistration stops the worker.
    pub fn unreg(&self, name: &str) -> Result<()> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if inner.listeners.remove(name).is_none() {
            return Err(Error::Internal(format!(
                "listener {:?} is not registered",
                name
            )));
        }
        if inner.listeners.is_empty() {
            if let Some(tx) = inner.tx.take() {
                let _ = tx.try_send(STOP_SENTINEL);
            }
        }
        Ok(())
    }

    /// Post a version hint; fire-and-forget, coalesced when the queue
    /// is full.
    pub fn notify(&self, ver: i64) {
        crate::dassert!(ver >= 0);
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(tx) = &inner.tx {
            let _ = tx.try_send(ver);
        }
    }

    async fn run(self: Arc<Self>, mut rx: mpsc::Receiver<i64>) {
        while let Some(ver) = rx.recv().await {
            if ver == STOP_SENTINEL {
                break;
            }
            // snapshot so callbacks run without the registration lock
            let snapshot: Vec<Arc<dyn SmapListener>> = {
                let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
                inner.listeners.values().cloned().collect()
            };
            for sl in snapshot {
                sl.on_smap_changed();
            }
        }
        // drain whatever was posted after the sentinel
        while rx.try_recv().is_ok() {}
    }
}
