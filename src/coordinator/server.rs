//! Coordinator daemon bootstrap
//!
//! Wires the owners, the notification registry, and the HTTP surface
//! together. All singletons take their dependencies by injection; the
//! test suite builds isolated instances the same way.

use std::sync::Arc;

use crate::cluster::{
    BmdOwner, DaemonRole, NetInfo, RmdOwner, SmapModifier, SmapOwner, Snode, SnodeFlags,
};
use crate::common::{Config, Result};
use crate::coordinator::bcast::Broadcaster;
use crate::coordinator::http::{create_router, CoordState};
use crate::coordinator::notifs::Notifs;
use crate::coordinator::txn::{Coordinator, Owners};

pub struct Daemon {
    config: Config,
    coordinator: Arc<Coordinator>,
    notifs: Arc<Notifs>,
    hk_task: Option<tokio::task::JoinHandle<()>>,
}

impl Daemon {
    /// Build the daemon: load persisted state (or run genesis), stand
    /// up the owners and the notification registry.
    pub async fn init(config: Config) -> Result<Self> {
        config.validate()?;
        std::fs::create_dir_all(&config.confdir)?;

        let si = Snode::new(
            config.node_id.clone(),
            DaemonRole::Proxy,
            NetInfo::new(config.intra_url().to_string()),
            NetInfo::new(config.public_url.clone()),
        );

        let smap_owner = SmapOwner::new(config.clone());
        let loaded = smap_owner.load()?;
        if loaded {
            tracing::info!("loaded {}", smap_owner.get());
        }
        if !loaded || smap_owner.get().get_node(&si.id).is_none() {
            Self::genesis(&smap_owner, &si).await?;
        }

        let bmd_owner = BmdOwner::new(config.confdir.clone());
        if bmd_owner.load()? {
            tracing::info!("loaded {}", bmd_owner.get());
        }
        let rmd_owner = RmdOwner::new(config.confdir.clone());
        rmd_owner.load()?;

        let bcast = Arc::new(Broadcaster::new());
        let notifs = Notifs::new(
            Arc::clone(&smap_owner),
            Arc::clone(&bcast),
            config.housekeep.clone(),
            config.timeout.max_keepalive(),
        );
        notifs.init()?;

        let owner = Owners {
            smap: smap_owner,
            bmd: bmd_owner,
            rmd: rmd_owner,
        };
        let coordinator = Arc::new(Coordinator::new(
            si,
            config.clone(),
            owner,
            bcast,
            Arc::clone(&notifs),
        ));

        Ok(Self {
            config,
            coordinator,
            notifs,
            hk_task: None,
        })
    }

    /// First start ever (or a map that lost this node): create/extend
    /// the map with ourselves as primary and staff the IC.
    async fn genesis(smap_owner: &Arc<SmapOwner>, si: &Snode) -> Result<()> {
        let si = si.clone();
        let ic_size = smap_owner.ic_size();
        let published = smap_owner
            .modify(SmapModifier::new(move |clone| {
                if clone.uuid.is_empty() {
                    clone.uuid = uuid::Uuid::new_v4().simple().to_string();
                    clone.creation_time = chrono::Utc::now().to_rfc3339();
                }
                clone.put_node(si.clone(), SnodeFlags::empty())?;
                if clone.primary_id.is_empty() {
                    clone.primary_id = si.id.clone();
                }
                clone.staff_ic(ic_size)
            }))
            .await?;
        tracing::info!("genesis: {}", published);
        Ok(())
    }

    pub fn coordinator(&self) -> &Arc<Coordinator> {
        &self.coordinator
    }

    /// Serve the control plane until shutdown.
    pub async fn serve(mut self) -> Result<()> {
        self.hk_task = Some(self.notifs.spawn_housekeeper());

        let state = CoordState {
            coordinator: Arc::clone(&self.coordinator),
        };
        let router = create_router(state);
        let listener = tokio::net::TcpListener::bind(self.config.bind_addr).await?;
        tracing::info!(
            "coordinator {} ready on {}",
            self.coordinator.si(),
            self.config.bind_addr
        );
        axum::serve(listener, router)
            .await
            .map_err(|e| crate::Error::Http(e.to_string()))?;
        Ok(())
    }
}

impl Drop for Daemon {
    fn drop(&mut self) {
        if let Some(task) = self.hk_task.take() {
            task.abort();
        }
        self.notifs.term();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn test_config(confdir: &std::path::Path) -> Config {
        Config {
            node_id: "p0".to_string(),
            confdir: confdir.to_path_buf(),
            public_url: "http://127.0.0.1:8080".to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_genesis_and_reload() {
        let dir = tempdir().unwrap();

        {
            let daemon = Daemon::init(test_config(dir.path())).await.unwrap();
            let smap = daemon.coordinator().owner.smap.get();
            assert!(smap.is_valid());
            assert!(smap.is_primary("p0"));
            assert!(smap.is_ic("p0"));
            assert!(!smap.uuid.is_empty());
            assert!(smap.version > 0);
        }

        // second boot loads the persisted map instead of running genesis
        let daemon = Daemon::init(test_config(dir.path())).await.unwrap();
        let smap = daemon.coordinator().owner.smap.get();
        assert!(smap.is_primary("p0"));
        assert_eq!(smap.count_proxies(), 1);
    }
}
