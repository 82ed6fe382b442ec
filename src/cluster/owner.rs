//! Metadata owners
//!
//! Each owner exclusively holds the current pointer to one piece of
//! versioned cluster metadata (Smap, BMD, RMD). Readers take a snapshot
//! with a single atomic load and never block; writers serialize under
//! the owner's lock and follow the clone -> modify -> persist ->
//! publish discipline. A failed persist aborts the publish; a publish
//! is a single pointer swap and can never be observed half-done.

use arc_swap::ArcSwap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard};

use crate::cluster::bmd::Bmd;
use crate::cluster::listeners::SmapListeners;
use crate::cluster::rmd::Rmd;
use crate::cluster::smap::Smap;
use crate::common::{jsp, Config, Error, Result, Revs};

/// Smap basename under the configuration directory
pub const SMAP_FNAME: &str = ".ais.smap";
pub const BMD_FNAME: &str = ".ais.bmd";
pub const RMD_FNAME: &str = ".ais.rmd";

/// Coordinated Smap mutation
pub struct SmapModifier {
    /// Mutates the clone; an error aborts the attempt before persistence
    pub pre: Box<dyn FnMut(&mut Smap) -> Result<()> + Send>,
    /// Runs under the owner's lock, after the publish
    pub post: Option<Box<dyn FnMut(&Arc<Smap>) + Send>>,
    /// Runs outside the lock
    pub fin: Option<Box<dyn FnOnce(&Arc<Smap>) + Send>>,
}

impl SmapModifier {
    pub fn new(pre: impl FnMut(&mut Smap) -> Result<()> + Send + 'static) -> Self {
        Self {
            pre: Box::new(pre),
            post: None,
            fin: None,
        }
    }
}

/// Owner of the cluster-map pointer
pub struct SmapOwner {
    mu: Mutex<()>,
    smap: ArcSwap<Smap>,
    listeners: Arc<SmapListeners>,
    config: std::sync::Mutex<Config>,
    ic_size: usize,
}

impl SmapOwner {
    pub fn new(config: Config) -> Arc<Self> {
        let ic_size = config.cluster.ic_size;
        Arc::new(Self {
            mu: Mutex::new(()),
            smap: ArcSwap::from_pointee(Smap::new()),
            listeners: SmapListeners::new(),
            config: std::sync::Mutex::new(config),
            ic_size,
        })
    }

    /// Lock-free snapshot of the current map
    pub fn get(&self) -> Arc<Smap> {
        self.smap.load_full()
    }

    pub fn listeners(&self) -> &Arc<SmapListeners> {
        &self.listeners
    }

    pub fn ic_size(&self) -> usize {
        self.ic_size
    }

    /// Load the persisted map, if any. An existing file holding an
    /// invalid or version-0 map is an error.
    pub fn load(&self) -> Result<bool> {
        let path = {
            let config = self.config.lock().unwrap_or_else(|e| e.into_inner());
            config.confdir.join(SMAP_FNAME)
        };
        let Some(smap) = jsp::load::<Smap>(&path)? else {
            return Ok(false);
        };
        if smap.version == 0 || !smap.is_valid() {
            return Err(Error::InvalidSmap(format!(
                "persistent {} at {} is invalid",
                smap,
                path.display()
            )));
        }
        self.smap.store(Arc::new(smap));
        Ok(true)
    }

    fn put(&self, clone: Smap) -> Arc<Smap> {
        let arc = Arc::new(clone);
        self.smap.store(Arc::clone(&arc));
        self.listeners.notify(arc.version);
        arc
    }

    /// Rewrite the config file (with the new primary URL) and the map
    /// envelope. The in-memory primary URL is rolled back when the
    /// config write fails; either failure aborts the publish.
    fn persist(&self, new_smap: &Smap) -> Result<()> {
        let mut config = self.config.lock().unwrap_or_else(|e| e.into_inner());
        let orig_url = config.cluster.primary_url.clone();
        if let Some(primary) = new_smap.primary() {
            config.cluster.primary_url = primary.public.url.clone();
        }
        let config_path = config.file_path();
        if let Err(e) = config.to_file(&config_path) {
            config.cluster.primary_url = orig_url;
            return Err(Error::Persistence {
                what: format!("config file {}", config_path.display()),
                reason: e.to_string(),
            });
        }
        jsp::save(config.confdir.join(SMAP_FNAME), new_smap)
    }

    /// Run a coordinated mutation: lock, clone, `pre`, persist,
    /// publish, `post` (under the lock), `fin` (outside).
    pub async fn modify(&self, mut ctx: SmapModifier) -> Result<Arc<Smap>> {
        let published = {
            let _guard = self.mu.lock().await;
            let mut clone = (*self.get()).clone();
            (ctx.pre)(&mut clone)?;
            if crate::common::debug_enabled() {
                clone.check_invariants(self.ic_size)?;
            }
            self.persist(&clone)?;
            let arc = self.put(clone);
            if let Some(post) = ctx.post.as_mut() {
                post(&arc);
            }
            arc
        };
        if let Some(fin) = ctx.fin {
            fin(&published);
        }
        Ok(published)
    }

    /// Accept a remote map: reject invalid maps and version downgrades
    /// (equal versions are a no-op), persist, then publish.
    pub async fn synchronize(&self, new_smap: Smap, caller: &str) -> Result<()> {
        if !new_smap.is_valid() {
            return Err(Error::InvalidSmap(format!("{} from {}", new_smap, caller)));
        }
        let _guard = self.mu.lock().await;
        let cur = self.get();
        cur.validate_uuid(&new_smap, caller)?;
        if new_smap.version <= cur.version {
            if new_smap.version < cur.version {
                // considered benign in most cases
                return Err(Error::Downgrade {
                    tag: Smap::TAG.to_string(),
                    cur: cur.version,
                    new: new_smap.version,
                });
            }
            return Ok(());
        }
        self.persist(&new_smap)?;
        self.put(new_smap);
        Ok(())
    }
}

/// Owner of the bucket-metadata pointer.
///
/// Unlike `SmapOwner`, transactions need to keep the BMD locked across
/// pre-checks, mutation and the metasync hand-off; the lock is exposed
/// and `put` demands proof of holding it.
pub struct BmdOwner {
    mu: Mutex<()>,
    bmd: ArcSwap<Bmd>,
    confdir: PathBuf,
}

impl BmdOwner {
    pub fn new(confdir: PathBuf) -> Arc<Self> {
        Arc::new(Self {
            mu: Mutex::new(()),
            bmd: ArcSwap::from_pointee(Bmd::new()),
            confdir,
        })
    }

    pub fn get(&self) -> Arc<Bmd> {
        self.bmd.load_full()
    }

    pub fn load(&self) -> Result<bool> {
        let Some(bmd) = jsp::load::<Bmd>(self.confdir.join(BMD_FNAME))? else {
            return Ok(false);
        };
        self.bmd.store(Arc::new(bmd));
        Ok(true)
    }

    /// Writer critical section
    pub async fn lock(&self) -> MutexGuard<'_, ()> {
        self.mu.lock().await
    }

    /// Persist and publish a modified clone; callers hold the lock.
    pub fn put(&self, _guard: &MutexGuard<'_, ()>, clone: Bmd) -> Result<Arc<Bmd>> {
        crate::dassert!(clone.version > self.get().version);
        jsp::save(self.confdir.join(BMD_FNAME), &clone)?;
        let arc = Arc::new(clone);
        self.bmd.store(Arc::clone(&arc));
        Ok(arc)
    }
}

/// Owner of the rebalance-metadata pointer
pub struct RmdOwner {
    mu: Mutex<()>,
    rmd: ArcSwap<Rmd>,
    confdir: PathBuf,
}

impl RmdOwner {
    pub fn new(confdir: PathBuf) -> Arc<Self> {
        Arc::new(Self {
            mu: Mutex::new(()),
            rmd: ArcSwap::from_pointee(Rmd::new()),
            confdir,
        })
    }

    pub fn get(&self) -> Arc<Rmd> {
        self.rmd.load_full()
    }

    pub fn load(&self) -> Result<bool> {
        let Some(rmd) = jsp::load::<Rmd>(self.confdir.join(RMD_FNAME))? else {
            return Ok(false);
        };
        self.rmd.store(Arc::new(rmd));
        Ok(true)
    }

    /// Clone, mutate, persist, publish.
    pub async fn modify(&self, pre: impl FnOnce(&mut Rmd)) -> Result<Arc<Rmd>> {
        let _guard = self.mu.lock().await;
        let mut clone = (*self.get()).clone();
        pre(&mut clone);
        jsp::save(self.confdir.join(RMD_FNAME), &clone)?;
        let arc = Arc::new(clone);
        self.rmd.store(Arc::clone(&arc));
        Ok(arc)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::node::{DaemonRole, NetInfo, Snode, SnodeFlags};
    use tempfile::tempdir;

    fn test_config(confdir: &std::path::Path) -> Config {
        Config {
            node_id: "p0".to_string(),
            confdir: confdir.to_path_buf(),
            public_url: "http://127.0.0.1:8080".to_string(),
            ..Default::default()
        }
    }

    fn mock_node(id: &str, role: DaemonRole, port: u16) -> Snode {
        Snode::new(
            id,
            role,
            NetInfo::new(format!("http://127.0.0.1:{}", port)),
            NetInfo::new(format!("http://10.0.0.1:{}", port)),
        )
    }

    async fn seed(owner: &SmapOwner) -> Arc<Smap> {
        owner
            .modify(SmapModifier::new(|clone: &mut Smap| {
                clone.uuid = "cluster-1".to_string();
                clone.put_node(mock_node("p0", DaemonRole::Proxy, 8080), SnodeFlags::empty())?;
                clone.put_node(mock_node("t1", DaemonRole::Target, 9001), SnodeFlags::empty())?;
                clone.primary_id = "p0".to_string();
                clone.staff_ic(crate::cluster::smap::DEFAULT_IC_SIZE)
            }))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_modify_persists_and_publishes() {
        let dir = tempdir().unwrap();
        let owner = SmapOwner::new(test_config(dir.path()));

        let published = seed(&owner).await;
        assert!(published.version > 0);
        assert_eq!(owner.get().version, published.version);

        // versions strictly increase across transitions
        let v1 = published.version;
        let v2 = owner
            .modify(SmapModifier::new(|clone: &mut Smap| {
                clone.put_node(mock_node("t2", DaemonRole::Target, 9002), SnodeFlags::empty())?;
                Ok(())
            }))
            .await
            .unwrap()
            .version;
        assert!(v2 > v1);

        // the envelope on disk reflects the latest publish
        let reloaded = SmapOwner::new(test_config(dir.path()));
        assert!(reloaded.load().unwrap());
        assert_eq!(reloaded.get().version, v2);

        // the config file carries the primary's public URL
        let config = Config::from_file(dir.path().join("oxistore.json")).unwrap();
        assert_eq!(config.cluster.primary_url, "http://10.0.0.1:8080");
    }

    #[tokio::test]
    async fn test_modify_pre_failure_is_clean() {
        let dir = tempdir().unwrap();
        let owner = SmapOwner::new(test_config(dir.path()));
        seed(&owner).await;
        let before = owner.get().version;

        let err = owner
            .modify(SmapModifier::new(|clone: &mut Smap| {
                clone.put_node(mock_node("t1", DaemonRole::Proxy, 7000), SnodeFlags::empty())?;
                Ok(())
            }))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "duplicate-id");
        assert_eq!(owner.get().version, before);
    }

    #[tokio::test]
    async fn test_synchronize_downgrade() {
        let dir = tempdir().unwrap();
        let owner = SmapOwner::new(test_config(dir.path()));
        let cur = seed(&owner).await;

        let mut newer = (*cur).clone();
        newer.version = cur.version + 5;
        owner.synchronize(newer, "peer").await.unwrap();
        let cur = owner.get();

        // older version: distinguished soft error, no publish
        let mut older = (*cur).clone();
        older.version = cur.version - 1;
        let err = owner.synchronize(older, "peer").await.unwrap_err();
        assert_eq!(err.kind(), "downgrade");
        assert_eq!(owner.get().version, cur.version);

        // equal version: silent no-op
        let same = (*cur).clone();
        owner.synchronize(same, "peer").await.unwrap();
        assert_eq!(owner.get().version, cur.version);

        // disk still reflects the newest version
        let reloaded = SmapOwner::new(test_config(dir.path()));
        assert!(reloaded.load().unwrap());
        assert_eq!(reloaded.get().version, cur.version);
    }

    #[tokio::test]
    async fn test_synchronize_uuid_mismatch() {
        let dir = tempdir().unwrap();
        let owner = SmapOwner::new(test_config(dir.path()));
        let cur = seed(&owner).await;

        let mut alien = (*cur).clone();
        alien.uuid = "cluster-2".to_string();
        alien.version = cur.version + 1;
        let err = owner.synchronize(alien, "stranger").await.unwrap_err();
        assert_eq!(err.kind(), "cluster-integrity-error");
    }

    #[tokio::test]
    async fn test_bmd_owner_lock_and_put() {
        let dir = tempdir().unwrap();
        let owner = BmdOwner::new(dir.path().to_path_buf());
        let bck = crate::cluster::bmd::Bck::new("foo");

        {
            let guard = owner.lock().await;
            let mut clone = (*owner.get()).clone();
            assert!(clone.add(&bck, Default::default()));
            owner.put(&guard, clone).unwrap();
        }
        assert_eq!(owner.get().version, 1);
        assert!(owner.get().get(&bck).is_some());

        let reloaded = BmdOwner::new(dir.path().to_path_buf());
        assert!(reloaded.load().unwrap());
        assert_eq!(reloaded.get().version, 1);
    }

    #[tokio::test]
    async fn test_rmd_modify() {
        let dir = tempdir().unwrap();
        let owner = RmdOwner::new(dir.path().to_path_buf());
        let rmd = owner
            .modify(|clone| {
                clone.inc();
                clone.resilver = true;
            })
            .await
            .unwrap();
        assert_eq!(rmd.version, 1);
        assert!(rmd.resilver);
        assert_eq!(owner.get().version, 1);
    }
}
