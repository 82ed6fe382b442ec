//! Two-phase bucket-metadata transactions
//!
//! Every metadata mutation runs the same skeleton, with minor
//! variations per operation:
//!
//! ```text
//! 0. bucket-name lock (try-lock for non-idempotent ops)
//! 1. pre-check under the BMD lock
//! 2. begin   -- broadcast to all targets; any failure aborts
//! 3. local BMD mutate + publish
//! 4. metasync the new BMD (wait after releasing the BMD lock)
//! 5. register a completion listener (long-running operations)
//! 6. commit  -- broadcast; durable once any target commits
//! ```
//!
//! Abort broadcasts are best-effort and their errors are swallowed.
//! Bucket locks are released on return, except when a listener was
//! registered: then the guards are parked in the listener and released
//! by its completion callback.

use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

use crate::cluster::{
    Bck, BmdOwner, BucketProps, NameLockGuard, NameLocker, PropsToUpdate, RmdOwner, Smap, Snode,
    SmapOwner,
};
use crate::cluster::bmd::RENAMED_MARKER;
use crate::common::{gen_uuid, Config, Error, Result};
use crate::coordinator::bcast::{Broadcaster, CallResult};
use crate::coordinator::metasync::{Metasyncer, RevsPayload, SyncMsg};
use crate::coordinator::notifs::{
    NlScope, NotifCallback, NotifListenMsg, NotifListener, Notifs, PATH_IC,
};

// Transaction action identifiers (protocol-level; must match across nodes)
pub const ACT_CREATE_BUCKET: &str = "create-bucket";
pub const ACT_DESTROY_BUCKET: &str = "destroy-bucket";
pub const ACT_RENAME_BUCKET: &str = "rename-bucket";
pub const ACT_COPY_BUCKET: &str = "copy-bucket";
pub const ACT_MAKE_NCOPIES: &str = "make-n-copies";
pub const ACT_SET_BPROPS: &str = "set-props";
pub const ACT_RESET_BPROPS: &str = "reset-props";
pub const ACT_EC_ENCODE: &str = "ec-encode";

pub const QPARAM_TXN_TIMEOUT: &str = "txn-timeout";
pub const QPARAM_NOTIFY_ME: &str = "notify-me";
pub const QPARAM_WAIT_METASYNC: &str = "wait-metasync";
pub const QPARAM_PROVIDER: &str = "provider";
pub const QPARAM_NAMESPACE: &str = "namespace";

/// Transaction phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Begin,
    Commit,
    Abort,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Begin => "begin",
            Phase::Commit => "commit",
            Phase::Abort => "abort",
        }
    }
}

/// Action message carried by transaction requests and metasync rounds
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ActionMsg {
    pub action: String,
    #[serde(default)]
    pub value: serde_json::Value,
    #[serde(default)]
    pub uuid: String,
    #[serde(default)]
    pub smap_version: i64,
    #[serde(default)]
    pub bmd_version: i64,
    #[serde(default)]
    pub rmd_version: i64,
}

/// Per-transaction client context: uuid, Smap snapshot taken at begin,
/// request path/query and the per-phase timeout.
struct TxnClientCtx {
    uuid: String,
    smap: Arc<Smap>,
    msg: ActionMsg,
    path: String,
    query: Vec<(String, String)>,
    timeout: Duration,
}

/// Shared owner handles, injected so tests can build isolated instances
#[derive(Clone)]
pub struct Owners {
    pub smap: Arc<SmapOwner>,
    pub bmd: Arc<BmdOwner>,
    pub rmd: Arc<RmdOwner>,
}

/// Drives control-plane transactions from the primary
pub struct Coordinator {
    si: Snode,
    config: Config,
    pub owner: Owners,
    bcast: Arc<Broadcaster>,
    metasync: Metasyncer,
    pub notifs: Arc<Notifs>,
    locker: NameLocker,
}

impl Coordinator {
    pub fn new(
        si: Snode,
        config: Config,
        owner: Owners,
        bcast: Arc<Broadcaster>,
        notifs: Arc<Notifs>,
    ) -> Self {
        let metasync = Metasyncer::new(
            Arc::clone(&bcast),
            si.id.clone(),
            config.timeout.max_keepalive(),
        );
        Self {
            si,
            config,
            owner,
            bcast,
            metasync,
            notifs,
            locker: NameLocker::new(),
        }
    }

    pub fn si(&self) -> &Snode {
        &self.si
    }

    // =========================================================
    // the seven transactions
    // =========================================================

    /// create-bucket: { check non-existence -- begin -- create locally
    /// -- metasync -- commit }
    pub async fn create_bucket(&self, bck: &Bck, props: Option<BucketProps>) -> Result<()> {
        let props = props.unwrap_or_default();
        props.validate(self.owner.smap.get().count_targets())?;

        let _lock = self.locker.lock(&bck.uname()).await;

        // 1. try add
        {
            let _g = self.owner.bmd.lock().await;
            if self.owner.bmd.get().get(bck).is_some() {
                return Err(Error::BucketExists(bck.uname()));
            }
        }

        // 2. begin
        let c = self.prep_txn_client(ACT_CREATE_BUCKET, bck, json!(props));
        self.begin_with_abort(&c).await?;

        // 3. lock & update BMD locally, 4. metasync & unlock
        let handle = {
            let g = self.owner.bmd.lock().await;
            let mut clone = (*self.owner.bmd.get()).clone();
            if !clone.add(bck, props) {
                self.bcast_abort(&c).await;
                return Err(Error::BucketExists(bck.uname()));
            }
            let arc = self.owner.bmd.put(&g, clone)?;
            self.sync_bmd(&c, &arc)?
        };
        handle.wait().await;

        // 5. commit -- must go through; roll back otherwise
        let results = self.bcast_txn(&c, Phase::Commit, self.config.timeout.long()).await;
        if let Err(err) = Self::first_err(&c, Phase::Commit, &results) {
            tracing::error!("{}", err);
            self.undo_create_bucket(&c, bck).await;
            return Err(err);
        }
        Ok(())
    }

    /// destroy-bucket: { confirm existence -- begin -- delete locally
    /// -- metasync -- commit }
    pub async fn destroy_bucket(&self, bck: &Bck) -> Result<()> {
        let _lock = self.locker.lock(&bck.uname()).await;

        {
            let _g = self.owner.bmd.lock().await;
            if self.owner.bmd.get().get(bck).is_none() {
                return Err(Error::BucketDoesNotExist(bck.uname()));
            }
        }

        let c = self.prep_txn_client(ACT_DESTROY_BUCKET, bck, json!(null));
        self.begin_with_abort(&c).await?;

        let handle = {
            let g = self.owner.bmd.lock().await;
            let mut clone = (*self.owner.bmd.get()).clone();
            if !clone.del(bck) {
                self.bcast_abort(&c).await;
                return Err(Error::BucketDoesNotExist(bck.uname()));
            }
            let arc = self.owner.bmd.put(&g, clone)?;
            self.sync_bmd(&c, &arc)?
        };
        handle.wait().await;

        let results = self.bcast_txn(&c, Phase::Commit, self.config.timeout.long()).await;
        if let Err(err) = Self::first_err(&c, Phase::Commit, &results) {
            // no rollback once the bucket is gone locally
            tracing::error!("{}", err);
            return Err(err);
        }
        Ok(())
    }

    /// make-n-copies: { confirm existence -- begin -- update locally --
    /// metasync -- listen -- commit }
    pub async fn make_n_copies(&self, bck: &Bck, copies: i64) -> Result<String> {
        if copies < 1 {
            return Err(Error::InvalidProps(format!(
                "invalid number of copies: {}",
                copies
            )));
        }
        let lock = self
            .locker
            .try_lock(&bck.uname())
            .ok_or_else(|| Error::BucketBusy(bck.uname()))?;

        // 1. confirm existence
        let prev = {
            let _g = self.owner.bmd.lock().await;
            self.owner
                .bmd
                .get()
                .get(bck)
                .map(|p| p.mirror.clone())
                .ok_or_else(|| Error::BucketDoesNotExist(bck.uname()))?
        };

        // 2. begin
        let mut c = self.prep_txn_client(ACT_MAKE_NCOPIES, bck, json!(copies));
        self.begin_with_abort(&c).await?;

        // 3 & 4. update locally, metasync
        let handle = {
            let g = self.owner.bmd.lock().await;
            let mut clone = (*self.owner.bmd.get()).clone();
            let mut nprops = clone
                .get(bck)
                .cloned()
                .ok_or_else(|| Error::BucketDoesNotExist(bck.uname()))?;
            nprops.mirror.enabled = copies > 1;
            nprops.mirror.copies = copies;
            clone.set(bck, nprops)?;
            let arc = self.owner.bmd.put(&g, clone)?;
            self.sync_bmd(&c, &arc)?
        };
        handle.wait().await;

        // 5. start waiting for `finished` notifications
        self.register_listener(&mut c, NlScope::Bucket(bck.clone()), vec![lock])
            .await;

        // 6. commit
        let results = self.bcast_txn(&c, Phase::Commit, self.config.timeout.long()).await;
        if let Err(err) = Self::first_err(&c, Phase::Commit, &results) {
            tracing::error!("{}", err);
            self.undo_update_copies(&c, bck, prev).await;
            return Err(err);
        }
        Ok(c.uuid)
    }

    /// set-bucket-props: { confirm existence -- begin -- apply props --
    /// metasync -- listen (when re-mirroring / re-encoding) -- commit }
    pub async fn set_bucket_props(
        &self,
        bck: &Bck,
        upd: &PropsToUpdate,
    ) -> Result<Option<String>> {
        let lock = self
            .locker
            .try_lock(&bck.uname())
            .ok_or_else(|| Error::BucketBusy(bck.uname()))?;

        // 1. confirm existence
        let bprops = {
            let _g = self.owner.bmd.lock().await;
            self.owner
                .bmd
                .get()
                .get(bck)
                .cloned()
                .ok_or_else(|| Error::BucketDoesNotExist(bck.uname()))?
        };

        // 2. make and validate new props, then begin
        let (nprops, ..) = self.make_nprops(&bprops, upd)?;
        let mut c = self.prep_txn_client(ACT_SET_BPROPS, bck, json!(nprops));
        self.begin_with_abort(&c).await?;

        // 3 & 4. recompute under the BMD lock (authoritative), metasync
        let (handle, remirror, reec) = {
            let g = self.owner.bmd.lock().await;
            let mut clone = (*self.owner.bmd.get()).clone();
            let bprops = clone
                .get(bck)
                .cloned()
                .ok_or_else(|| Error::BucketDoesNotExist(bck.uname()))?;
            let (nprops, remirror, reec) = self.make_nprops(&bprops, upd)?;
            c.msg.value = json!(nprops);
            clone.set(bck, nprops)?;
            let arc = self.owner.bmd.put(&g, clone)?;
            (self.sync_bmd(&c, &arc)?, remirror, reec)
        };
        handle.wait().await;

        // 5. when the change re-mirrors or re-encodes, wait for targets
        let mut xact_id = None;
        if remirror || reec {
            self.register_listener(&mut c, NlScope::Bucket(bck.clone()), vec![lock])
                .await;
            xact_id = Some(c.uuid.clone());
        }

        // 6. commit
        let results = self.bcast_txn(&c, Phase::Commit, self.config.timeout.long()).await;
        if let Err(err) = Self::first_err(&c, Phase::Commit, &results) {
            tracing::error!("{}", err);
        }
        Ok(xact_id)
    }

    /// reset-bucket-props: same skeleton, new props are the defaults
    pub async fn reset_bucket_props(&self, bck: &Bck) -> Result<()> {
        let _lock = self
            .locker
            .try_lock(&bck.uname())
            .ok_or_else(|| Error::BucketBusy(bck.uname()))?;

        {
            let _g = self.owner.bmd.lock().await;
            if self.owner.bmd.get().get(bck).is_none() {
                return Err(Error::BucketDoesNotExist(bck.uname()));
            }
        }

        let c = self.prep_txn_client(ACT_RESET_BPROPS, bck, json!(BucketProps::default()));
        self.begin_with_abort(&c).await?;

        let handle = {
            let g = self.owner.bmd.lock().await;
            let mut clone = (*self.owner.bmd.get()).clone();
            clone.set(bck, BucketProps::default())?;
            let arc = self.owner.bmd.put(&g, clone)?;
            self.sync_bmd(&c, &arc)?
        };
        handle.wait().await;

        let results = self.bcast_txn(&c, Phase::Commit, self.config.timeout.long()).await;
        if let Err(err) = Self::first_err(&c, Phase::Commit, &results) {
            tracing::error!("{}", err);
        }
        Ok(())
    }

    /// rename-bucket: { confirm existence & non-existence -- begin --
    /// mark & add -- metasync -- RMD bump -- listen -- commit }
    ///
    /// The source entry stays in the BMD, marked renamed, until the
    /// data migration finishes; the RMD bump (with resilver) starts the
    /// migration on all targets.
    pub async fn rename_bucket(&self, bck_from: &Bck, bck_to: &Bck) -> Result<String> {
        let lock_from = self
            .locker
            .try_lock(&bck_from.uname())
            .ok_or_else(|| Error::BucketBusy(bck_from.uname()))?;
        let lock_to = self
            .locker
            .try_lock(&bck_to.uname())
            .ok_or_else(|| Error::BucketBusy(bck_to.uname()))?;

        // 1. confirm existence & non-existence
        {
            let _g = self.owner.bmd.lock().await;
            let bmd = self.owner.bmd.get();
            if bmd.get(bck_from).is_none() {
                return Err(Error::BucketDoesNotExist(bck_from.uname()));
            }
            if bmd.get(bck_to).is_some() {
                return Err(Error::BucketExists(bck_to.uname()));
            }
        }

        // 2. begin
        let mut c = self.prep_txn_client(ACT_RENAME_BUCKET, bck_from, json!(bck_to));
        self.begin_with_abort(&c).await?;

        // 3 & 4. mark the source, add the destination, metasync
        let handle = {
            let g = self.owner.bmd.lock().await;
            let mut clone = (*self.owner.bmd.get()).clone();
            let mut bprops = clone
                .get(bck_from)
                .cloned()
                .ok_or_else(|| Error::BucketDoesNotExist(bck_from.uname()))?;
            if !clone.add(bck_to, bprops.clone()) {
                self.bcast_abort(&c).await;
                return Err(Error::BucketExists(bck_to.uname()));
            }
            bprops.renamed = RENAMED_MARKER.to_string();
            clone.set(bck_from, bprops)?;
            let arc = self.owner.bmd.put(&g, clone)?;
            self.sync_bmd(&c, &arc)?
        };
        handle.wait().await;

        // start rebalance and resilver
        let rmd = self
            .owner
            .rmd
            .modify(|clone| {
                clone.inc();
                clone.resilver = true;
            })
            .await?;
        c.msg.rmd_version = rmd.version;

        // 5. start waiting for `finished` notifications
        self.register_listener(
            &mut c,
            NlScope::FromTo {
                from: bck_from.clone(),
                to: bck_to.clone(),
            },
            vec![lock_from, lock_to],
        )
        .await;

        // 6. commit
        let results = self.bcast_txn(&c, Phase::Commit, self.config.timeout.long()).await;
        if let Err(err) = Self::first_err(&c, Phase::Commit, &results) {
            tracing::error!("{}", err);
        }

        // 7. propagate the RMD bump
        let rmd_handle = self
            .metasync
            .sync(
                &c.smap,
                SyncMsg {
                    action: c.msg.action.clone(),
                    uuid: c.uuid.clone(),
                    revs: vec![RevsPayload::from_revs(rmd.as_ref())?],
                },
            );
        rmd_handle.wait().await;
        Ok(c.uuid)
    }

    /// copy-bucket: { confirm existence -- begin -- conditional create
    /// & metasync -- listen -- commit }
    ///
    /// Reads the source, so the source holds a shared lock only.
    pub async fn copy_bucket(&self, bck_from: &Bck, bck_to: &Bck) -> Result<String> {
        let lock_from = self
            .locker
            .try_rlock(&bck_from.uname())
            .ok_or_else(|| Error::BucketBusy(bck_from.uname()))?;
        let lock_to = self
            .locker
            .try_lock(&bck_to.uname())
            .ok_or_else(|| Error::BucketBusy(bck_to.uname()))?;

        // 1. confirm existence
        {
            let _g = self.owner.bmd.lock().await;
            if self.owner.bmd.get().get(bck_from).is_none() {
                return Err(Error::BucketDoesNotExist(bck_from.uname()));
            }
        }

        // 2. begin
        let mut c = self.prep_txn_client(ACT_COPY_BUCKET, bck_from, json!(bck_to));
        self.begin_with_abort(&c).await?;

        // 3 & 4. create the destination only when it doesn't exist yet
        let handle = {
            let g = self.owner.bmd.lock().await;
            let mut clone = (*self.owner.bmd.get()).clone();
            let bprops = clone
                .get(bck_from)
                .cloned()
                .ok_or_else(|| Error::BucketDoesNotExist(bck_from.uname()))?;
            if clone.get(bck_to).is_none() {
                clone.add(bck_to, bprops);
                let arc = self.owner.bmd.put(&g, clone)?;
                c.query
                    .push((QPARAM_WAIT_METASYNC.to_string(), "true".to_string()));
                Some(self.sync_bmd(&c, &arc)?)
            } else {
                None
            }
        };
        if let Some(handle) = handle {
            handle.wait().await;
        }

        // 5. start waiting for `finished` notifications
        self.register_listener(
            &mut c,
            NlScope::FromTo {
                from: bck_from.clone(),
                to: bck_to.clone(),
            },
            vec![lock_from, lock_to],
        )
        .await;

        // 6. commit
        let results = self.bcast_txn(&c, Phase::Commit, self.config.timeout.long()).await;
        if let Err(err) = Self::first_err(&c, Phase::Commit, &results) {
            tracing::error!("{}", err);
        }
        Ok(c.uuid)
    }

    /// ec-encode: { confirm existence -- begin -- update locally --
    /// metasync -- listen -- commit }
    pub async fn ec_encode(&self, bck: &Bck, data_slices: i64, parity_slices: i64) -> Result<String> {
        if data_slices < 1 || parity_slices < 1 {
            return Err(Error::InvalidProps("invalid number of slices".into()));
        }
        let lock = self
            .locker
            .try_lock(&bck.uname())
            .ok_or_else(|| Error::BucketBusy(bck.uname()))?;

        // 1. confirm existence; changing slice counts on the fly is
        // unsupported
        {
            let _g = self.owner.bmd.lock().await;
            let bmd = self.owner.bmd.get();
            let props = bmd
                .get(bck)
                .ok_or_else(|| Error::BucketDoesNotExist(bck.uname()))?;
            if props.ec.enabled {
                return Err(Error::InvalidProps(format!(
                    "EC is already enabled for bucket {}",
                    bck
                )));
            }
        }

        // 2. begin
        let mut c = self.prep_txn_client(
            ACT_EC_ENCODE,
            bck,
            json!({"data_slices": data_slices, "parity_slices": parity_slices}),
        );
        self.begin_with_abort(&c).await?;

        // 3 & 4. update locally, metasync
        let handle = {
            let g = self.owner.bmd.lock().await;
            let mut clone = (*self.owner.bmd.get()).clone();
            let mut nprops = clone
                .get(bck)
                .cloned()
                .ok_or_else(|| Error::BucketDoesNotExist(bck.uname()))?;
            nprops.ec.enabled = true;
            nprops.ec.data_slices = data_slices;
            nprops.ec.parity_slices = parity_slices;
            nprops.validate(c.smap.count_targets())?;
            clone.set(bck, nprops)?;
            let arc = self.owner.bmd.put(&g, clone)?;
            self.sync_bmd(&c, &arc)?
        };
        handle.wait().await;

        // 5. start waiting for `finished` notifications
        self.register_listener(&mut c, NlScope::Bucket(bck.clone()), vec![lock])
            .await;

        // 6. commit
        let results = self
            .bcast_txn(&c, Phase::Commit, self.config.timeout.cplane())
            .await;
        if let Err(err) = Self::first_err(&c, Phase::Commit, &results) {
            tracing::error!("{}", err);
            return Err(err);
        }
        Ok(c.uuid)
    }

    // =========================================================
    // rollback & helpers
    // =========================================================

    fn prep_txn_client(&self, action: &str, bck: &Bck, value: serde_json::Value) -> TxnClientCtx {
        let uuid = gen_uuid();
        let smap = self.owner.smap.get();
        let timeout = self.config.timeout.cplane();
        let msg = ActionMsg {
            action: action.to_string(),
            value,
            uuid: uuid.clone(),
            smap_version: smap.version,
            bmd_version: self.owner.bmd.get().version,
            rmd_version: self.owner.rmd.get().version,
        };
        let mut query = vec![
            (QPARAM_PROVIDER.to_string(), bck.provider.as_str().to_string()),
            (
                QPARAM_TXN_TIMEOUT.to_string(),
                timeout.as_millis().to_string(),
            ),
        ];
        if !bck.ns.is_empty() {
            query.push((QPARAM_NAMESPACE.to_string(), bck.ns.clone()));
        }
        TxnClientCtx {
            uuid,
            smap,
            msg,
            path: format!("/v1/txn/{}", bck.name),
            query,
            timeout,
        }
    }

    async fn bcast_txn(&self, c: &TxnClientCtx, phase: Phase, timeout: Duration) -> Vec<CallResult> {
        let targets: Vec<Snode> = c.smap.tmap.values().cloned().collect();
        let path = format!("{}/{}", c.path, phase.as_str());
        let body = serde_json::to_vec(&c.msg).unwrap_or_default();
        self.bcast.post(&targets, &path, &c.query, body, timeout).await
    }

    /// Broadcast begin; on any failure broadcast abort (best-effort)
    /// and surface the begin error.
    async fn begin_with_abort(&self, c: &TxnClientCtx) -> Result<()> {
        let results = self.bcast_txn(c, Phase::Begin, c.timeout).await;
        if let Err(err) = Self::first_err(c, Phase::Begin, &results) {
            self.bcast_abort(c).await;
            return Err(err);
        }
        Ok(())
    }

    async fn bcast_abort(&self, c: &TxnClientCtx) {
        let _ = self.bcast_txn(c, Phase::Abort, c.timeout).await;
    }

    fn first_err(c: &TxnClientCtx, phase: Phase, results: &[CallResult]) -> Result<()> {
        for res in results {
            if let Some(err) = &res.err {
                return Err(Error::TxnPhase {
                    action: c.msg.action.clone(),
                    phase: phase.as_str().to_string(),
                    node: res.sid.clone(),
                    reason: err.to_string(),
                });
            }
        }
        Ok(())
    }

    /// Metasync the freshly published BMD; called under the BMD lock,
    /// awaited after releasing it.
    fn sync_bmd(
        &self,
        c: &TxnClientCtx,
        bmd: &Arc<crate::cluster::Bmd>,
    ) -> Result<crate::coordinator::metasync::SyncHandle> {
        let msg = SyncMsg {
            action: c.msg.action.clone(),
            uuid: c.uuid.clone(),
            revs: vec![RevsPayload::from_revs(bmd.as_ref())?],
        };
        Ok(self.metasync.sync(&c.smap, msg))
    }

    /// Register a completion listener with this node (when in the IC)
    /// and announce it to the other IC members. The commit request gets
    /// a notify-me query entry per IC member so targets know whom to
    /// report to. Bucket locks move into the listener and are released
    /// by its callback. No-op on an empty target fleet.
    async fn register_listener(
        &self,
        c: &mut TxnClientCtx,
        scope: NlScope,
        guards: Vec<NameLockGuard>,
    ) {
        let srcs: Vec<String> = c.smap.tmap.keys().cloned().collect();
        if srcs.is_empty() {
            return; // nothing will ever report
        }
        let nl = NotifListener::new(
            c.uuid.clone(),
            c.msg.action.clone(),
            scope,
            srcs,
            true,
            Self::nl_done_cb(),
        );
        nl.park_locks(guards);

        let mut ic_others: Vec<Snode> = Vec::new();
        let mut self_ic = c.smap.ic_count() == 0; // degenerate map: track locally
        for psi in c.smap.ic_members() {
            c.query
                .push((QPARAM_NOTIFY_ME.to_string(), psi.id.clone()));
            if psi.id == self.si.id {
                self_ic = true;
            } else {
                ic_others.push(psi.clone());
            }
        }
        if self_ic {
            if let Err(err) = self.notifs.add(Arc::clone(&nl)) {
                tracing::error!("{}", err);
            }
        }
        if !ic_others.is_empty() {
            let msg = NotifListenMsg::from_listener(&nl);
            let body = serde_json::to_vec(&msg).unwrap_or_default();
            let results = self
                .bcast
                .put(
                    &ic_others,
                    PATH_IC,
                    &[],
                    body,
                    self.config.timeout.max_keepalive(),
                )
                .await;
            for res in results.iter().filter(|r| !r.is_ok()) {
                tracing::error!("IC announce {}: node {}: {:?}", c.uuid, res.sid, res.err);
            }
        }
    }

    fn nl_done_cb() -> NotifCallback {
        Box::new(|nl, err| match err {
            Some(err) => tracing::error!("{} failed: {}", nl, err),
            None => tracing::info!("{} finished", nl),
        })
    }

    /// rollback create-bucket
    async fn undo_create_bucket(&self, c: &TxnClientCtx, bck: &Bck) {
        let g = self.owner.bmd.lock().await;
        let mut clone = (*self.owner.bmd.get()).clone();
        if !clone.del(bck) {
            return;
        }
        match self.owner.bmd.put(&g, clone) {
            Ok(arc) => {
                if let Ok(handle) = self.sync_bmd(c, &arc) {
                    drop(handle); // fire-and-forget
                }
            }
            Err(err) => tracing::error!("undo {}: {}", c.msg.action, err),
        }
    }

    /// rollback make-n-copies
    async fn undo_update_copies(
        &self,
        c: &TxnClientCtx,
        bck: &Bck,
        prev: crate::cluster::MirrorConf,
    ) {
        let g = self.owner.bmd.lock().await;
        let mut clone = (*self.owner.bmd.get()).clone();
        let Some(mut props) = clone.get(bck).cloned() else {
            return;
        };
        props.mirror = prev;
        if let Err(err) = clone.set(bck, props) {
            tracing::error!("undo {}: {}", c.msg.action, err);
            return;
        }
        match self.owner.bmd.put(&g, clone) {
            Ok(arc) => {
                if let Ok(handle) = self.sync_bmd(c, &arc) {
                    drop(handle);
                }
            }
            Err(err) => tracing::error!("undo {}: {}", c.msg.action, err),
        }
    }

    /// make and validate new props; detects re-mirror and re-encode.
    /// Computed both before begin and again under the BMD lock; the
    /// second computation is authoritative.
    fn make_nprops(
        &self,
        bprops: &BucketProps,
        upd: &PropsToUpdate,
    ) -> Result<(BucketProps, bool, bool)> {
        let mut nprops = bprops.clone();
        nprops.apply(upd);
        let (mut remirror, mut reec) = (false, false);

        if bprops.ec.enabled && nprops.ec.enabled {
            if bprops.ec != nprops.ec {
                return Err(Error::InvalidProps(
                    "once enabled, EC configuration can only be disabled but cannot change".into(),
                ));
            }
        } else if nprops.ec.enabled {
            if nprops.ec.data_slices == 0 {
                nprops.ec.data_slices = 1;
            }
            if nprops.ec.parity_slices == 0 {
                nprops.ec.parity_slices = 1;
            }
            reec = true;
        }
        if !bprops.mirror.enabled && nprops.mirror.enabled {
            if nprops.mirror.copies == 1 {
                nprops.mirror.copies = 2;
            }
            remirror = true;
        } else if nprops.mirror.copies == 1 {
            nprops.mirror.enabled = false;
        }
        // cannot run make-n-copies and EC on the same bucket at the same time
        if remirror && reec {
            return Err(Error::InvalidProps(
                "cannot enable mirroring and erasure coding in a single transaction".into(),
            ));
        }
        nprops.validate(self.owner.smap.get().count_targets())?;
        Ok((nprops, remirror, reec))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn coordinator_for_props() -> Coordinator {
        let config = Config {
            node_id: "p0".to_string(),
            public_url: "http://127.0.0.1:8080".to_string(),
            ..Default::default()
        };
        let smap = SmapOwner::new(config.clone());
        let dir = std::env::temp_dir();
        let owner = Owners {
            smap: Arc::clone(&smap),
            bmd: BmdOwner::new(dir.clone()),
            rmd: RmdOwner::new(dir),
        };
        let bcast = Arc::new(Broadcaster::new());
        let notifs = Notifs::new(
            Arc::clone(&smap),
            Arc::clone(&bcast),
            Default::default(),
            Duration::from_millis(100),
        );
        let si = Snode::new(
            "p0",
            crate::cluster::DaemonRole::Proxy,
            crate::cluster::NetInfo::new("http://127.0.0.1:8080"),
            crate::cluster::NetInfo::new("http://127.0.0.1:8080"),
        );
        Coordinator::new(si, config, owner, bcast, notifs)
    }

    #[test]
    fn test_make_nprops_mirror_ec_exclusive() {
        let coord = coordinator_for_props();
        let bprops = BucketProps::default();
        let upd = PropsToUpdate {
            mirror_enabled: Some(true),
            mirror_copies: Some(3),
            ec_enabled: Some(true),
            ec_data_slices: Some(1),
            ec_parity_slices: Some(1),
        };
        let err = coord.make_nprops(&bprops, &upd).unwrap_err();
        assert_eq!(err.kind(), "invalid-props");
    }

    #[test]
    fn test_make_nprops_defaults() {
        let coord = coordinator_for_props();
        let bprops = BucketProps::default();

        // enabling mirroring with 1 copy bumps to 2
        let upd = PropsToUpdate {
            mirror_enabled: Some(true),
            mirror_copies: Some(1),
            ..Default::default()
        };
        let (nprops, remirror, reec) = coord.make_nprops(&bprops, &upd).unwrap();
        assert!(remirror && !reec);
        assert_eq!(nprops.mirror.copies, 2);

        // frozen EC config cannot change once enabled
        let mut enabled = BucketProps::default();
        enabled.ec.enabled = true;
        enabled.ec.data_slices = 2;
        enabled.ec.parity_slices = 1;
        let upd = PropsToUpdate {
            ec_data_slices: Some(4),
            ..Default::default()
        };
        assert!(coord.make_nprops(&enabled, &upd).is_err());
    }

    #[test]
    fn test_phase_strings() {
        assert_eq!(Phase::Begin.as_str(), "begin");
        assert_eq!(Phase::Commit.as_str(), "commit");
        assert_eq!(Phase::Abort.as_str(), "abort");
    }
}
