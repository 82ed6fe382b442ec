//! Notification registry
//!
//! Tracks one listener per long-running operation until every expected
//! notifier has reported (or one aborted, or went missing), then runs
//! the listener's callback exactly once. Completion arrives on any of
//! four paths: a pushed report, a housekeeping status pull, a 404 at a
//! notifier, or a cluster-map change that removed a notifier.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use crate::cluster::{Bck, NameLockGuard, SmapListener, SmapOwner};
use crate::common::config::HousekeepConf;
use crate::common::{timestamp_now_nanos, Error, Result};
use crate::coordinator::bcast::Broadcaster;

pub const PATH_NOTIFS: &str = "/v1/notifs";
pub const PATH_IC: &str = "/v1/ic";
pub const PATH_XACTIONS: &str = "/v1/xactions";

pub const QPARAM_UUID: &str = "uuid";
pub const QPARAM_WHAT: &str = "what";
pub const WHAT_XACT_STATS: &str = "stats";

const NOTIFS_NAME: &str = ".notifications.coordinator";

// === wire messages ===

/// Per-target statistics of a long-running operation
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct XactStats {
    pub id: String,
    pub kind: String,
    #[serde(default)]
    pub objects: i64,
    #[serde(default)]
    pub bytes: i64,
    #[serde(default)]
    pub finished: bool,
    #[serde(default)]
    pub aborted: bool,
}

/// Target-to-coordinator completion/error report
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifMsg {
    #[serde(rename = "type")]
    pub ty: String,
    pub snode: String,
    pub data: Option<XactStats>,
    pub err: Option<String>,
}

/// Coordinator-to-IC announcement: start tracking this listener
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifListenMsg {
    pub uuid: String,
    pub action: String,
    pub srcs: Vec<String>,
    #[serde(default)]
    pub bcks: Vec<Bck>,
}

impl NotifListenMsg {
    pub fn from_listener(nl: &NotifListener) -> Self {
        Self {
            uuid: nl.uuid.clone(),
            action: nl.action.clone(),
            srcs: nl.notifier_ids(),
            bcks: nl.scope.bcks(),
        }
    }
}

// === listener ===

/// What the tracked operation is working on
#[derive(Debug, Clone)]
pub enum NlScope {
    Bucket(Bck),
    FromTo { from: Bck, to: Bck },
}

impl NlScope {
    pub fn bcks(&self) -> Vec<Bck> {
        match self {
            NlScope::Bucket(bck) => vec![bck.clone()],
            NlScope::FromTo { from, to } => vec![from.clone(), to.clone()],
        }
    }
}

pub type NotifCallback = Box<dyn Fn(&NotifListener, Option<&Error>) + Send + Sync>;

struct NlInner {
    /// notifier ID -> already reported
    srcs: HashMap<String, bool>,
    rc: usize,
    errs: HashMap<String, String>,
    first_err: Option<Error>,
}

/// Tracks one long-running operation
pub struct NotifListener {
    pub uuid: String,
    pub action: String,
    pub scope: NlScope,
    /// registered by this node (vs announced by another IC member)
    pub owned: bool,
    inner: Mutex<NlInner>,
    /// 0 = running; CAS'd to 1, then the finish timestamp
    tfin: AtomicI64,
    f: NotifCallback,
    locks: Mutex<Vec<NameLockGuard>>,
}

impl NotifListener {
    pub fn new(
        uuid: impl Into<String>,
        action: impl Into<String>,
        scope: NlScope,
        srcs: impl IntoIterator<Item = String>,
        owned: bool,
        f: NotifCallback,
    ) -> Arc<Self> {
        let srcs: HashMap<String, bool> = srcs.into_iter().map(|id| (id, false)).collect();
        crate::dassert!(!srcs.is_empty());
        Arc::new(Self {
            uuid: uuid.into(),
            action: action.into(),
            scope,
            owned,
            inner: Mutex::new(NlInner {
                srcs,
                rc: 0,
                errs: HashMap::new(),
                first_err: None,
            }),
            tfin: AtomicI64::new(0),
            f,
            locks: Mutex::new(Vec::new()),
        })
    }

    /// Park bucket locks until the completion callback has run
    pub fn park_locks(&self, guards: Vec<NameLockGuard>) {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        *locks = guards;
    }

    fn release_locks(&self) {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        locks.clear();
    }

    pub fn notifier_ids(&self) -> Vec<String> {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.srcs.keys().cloned().collect()
    }

    fn pending_ids(&self) -> Vec<String> {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner
            .srcs
            .iter()
            .filter(|(_, reported)| !**reported)
            .map(|(id, _)| id.clone())
            .collect()
    }

    pub fn fin_time(&self) -> i64 {
        self.tfin.load(Ordering::SeqCst)
    }

    pub fn finished(&self) -> bool {
        self.fin_time() > 0
    }

    pub fn rc(&self) -> usize {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).rc
    }

    fn add_err(&self, sid: &str, err: Error) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.errs.insert(sid.to_string(), err.to_string());
        if inner.first_err.is_none() {
            inner.first_err = Some(err);
        }
    }

    pub fn status(&self) -> NlStatus {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        NlStatus {
            uuid: self.uuid.clone(),
            action: self.action.clone(),
            finished: self.finished(),
            rc: inner.rc,
            total: inner.srcs.len(),
            errs: inner.errs.clone(),
        }
    }
}

impl std::fmt::Display for NotifListener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if self.finished() {
            if inner.errs.is_empty() {
                write!(f, "nl-{}-{}[done]", self.action, self.uuid)
            } else {
                write!(f, "nl-{}-{}[fail({:?})]", self.action, self.uuid, inner.errs)
            }
        } else {
            write!(
                f,
                "nl-{}-{}[{}/{}]",
                self.action,
                self.uuid,
                inner.rc,
                inner.srcs.len()
            )
        }
    }
}

/// Listener summary for the status endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NlStatus {
    pub uuid: String,
    pub action: String,
    pub finished: bool,
    pub rc: usize,
    pub total: usize,
    pub errs: HashMap<String, String>,
}

// === registry ===

/// Notification registry: running and finished listeners under
/// separate locks.
pub struct Notifs {
    running: RwLock<HashMap<String, Arc<NotifListener>>>,
    finished: RwLock<HashMap<String, Arc<NotifListener>>>,
    smap: Arc<SmapOwner>,
    bcast: Arc<Broadcaster>,
    hk: HousekeepConf,
    pull_timeout: Duration,
    smap_ver: AtomicI64,
}

impl Notifs {
    pub fn new(
        smap: Arc<SmapOwner>,
        bcast: Arc<Broadcaster>,
        hk: HousekeepConf,
        pull_timeout: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            running: RwLock::new(HashMap::new()),
            finished: RwLock::new(HashMap::new()),
            smap,
            bcast,
            hk,
            pull_timeout,
            smap_ver: AtomicI64::new(0),
        })
    }

    /// Subscribe to cluster-map changes so listeners waiting on departed
    /// nodes fail promptly.
    pub fn init(self: &Arc<Self>) -> Result<()> {
        self.smap.listeners().reg(Arc::clone(self) as Arc<dyn SmapListener>)
    }

    pub fn term(&self) {
        let _ = self.smap.listeners().unreg(NOTIFS_NAME);
    }

    /// Start tracking. Listener uuids are unique; a duplicate is an
    /// internal error.
    pub fn add(&self, nl: Arc<NotifListener>) -> Result<()> {
        crate::dassert!(!nl.uuid.is_empty());
        let mut running = self.running.write().unwrap_or_else(|e| e.into_inner());
        if running.contains_key(&nl.uuid) {
            return Err(Error::Internal(format!(
                "listener {} already registered",
                nl.uuid
            )));
        }
        tracing::info!("tracking {}", nl);
        running.insert(nl.uuid.clone(), nl);
        Ok(())
    }

    pub fn entry(&self, uuid: &str) -> Option<Arc<NotifListener>> {
        {
            let running = self.running.read().unwrap_or_else(|e| e.into_inner());
            if let Some(nl) = running.get(uuid) {
                return Some(Arc::clone(nl));
            }
        }
        let finished = self.finished.read().unwrap_or_else(|e| e.into_inner());
        finished.get(uuid).map(Arc::clone)
    }

    pub fn running_count(&self) -> usize {
        self.running.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn finished_count(&self) -> usize {
        self.finished.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Push path: a notifier POSTed its completion (or error) report.
    pub fn handle_report(
        &self,
        uuid: &str,
        sid: &str,
        src_err: Option<Error>,
    ) -> Result<()> {
        let Some(nl) = self.entry(uuid) else {
            return Err(Error::UnknownXaction(uuid.to_string()));
        };
        if nl.finished() {
            // late report, nothing left to account
            return Ok(());
        }
        let done = self.handle_msg(&nl, sid, src_err)?;
        if done {
            self.finalize(&nl, None);
        }
        Ok(())
    }

    /// Account one report. Duplicate reports from the same source are a
    /// silent no-op; the refcount never passes the notifier count.
    fn handle_msg(&self, nl: &Arc<NotifListener>, sid: &str, src_err: Option<Error>) -> Result<bool> {
        let mut inner = nl.inner.lock().unwrap_or_else(|e| e.into_inner());
        let Some(reported) = inner.srcs.get_mut(sid) else {
            return Err(Error::NodeNotFound(sid.to_string()));
        };
        if *reported {
            return Ok(false);
        }
        *reported = true;
        inner.rc += 1;
        if let Some(err) = src_err {
            inner.errs.insert(sid.to_string(), err.to_string());
            if inner.first_err.is_none() {
                inner.first_err = Some(err);
            }
        }
        Ok(inner.rc >= inner.srcs.len())
    }

    /// Terminal transition: runs the callback exactly once (guarded by
    /// a CAS on the finish timestamp), releases any parked bucket locks
    /// even when the callback panics, and retires the listener into
    /// `finished`.
    fn finalize(&self, nl: &Arc<NotifListener>, now: Option<i64>) {
        if nl
            .tfin
            .compare_exchange(0, 1, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }
        let first_err = {
            let mut inner = nl.inner.lock().unwrap_or_else(|e| e.into_inner());
            inner.first_err.take()
        };
        let res = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            (nl.f)(nl.as_ref(), first_err.as_ref());
        }));
        if let Err(panic) = res {
            tracing::error!("{}: callback panicked: {:?}", nl, panic);
        }
        nl.release_locks();
        nl.tfin
            .store(now.unwrap_or_else(timestamp_now_nanos), Ordering::SeqCst);

        {
            let mut running = self.running.write().unwrap_or_else(|e| e.into_inner());
            running.remove(&nl.uuid);
        }
        let mut finished = self.finished.write().unwrap_or_else(|e| e.into_inner());
        finished.insert(nl.uuid.clone(), Arc::clone(nl));
        tracing::info!("{}", nl);
    }

    /// Pull path + garbage collection; runs every housekeeping interval.
    pub async fn housekeep_once(&self) {
        let now = timestamp_now_nanos();
        let retention = self.hk.retention().as_nanos() as i64;
        {
            let mut finished = self.finished.write().unwrap_or_else(|e| e.into_inner());
            finished.retain(|_, nl| now - nl.fin_time() <= retention);
        }

        // snapshot so network I/O runs without the registry lock
        let running: Vec<Arc<NotifListener>> = {
            let running = self.running.read().unwrap_or_else(|e| e.into_inner());
            running.values().cloned().collect()
        };
        if running.is_empty() {
            return;
        }
        let smap = self.smap.get();
        for nl in running {
            if nl.finished() {
                continue;
            }
            let query = [
                (QPARAM_UUID.to_string(), nl.uuid.clone()),
                (QPARAM_WHAT.to_string(), WHAT_XACT_STATS.to_string()),
            ];
            for sid in nl.pending_ids() {
                let Some(si) = smap.get_node(&sid) else {
                    // the map-change path will fail this listener
                    continue;
                };
                let res = match self
                    .bcast
                    .call(
                        reqwest::Method::GET,
                        si,
                        PATH_XACTIONS,
                        &query,
                        None,
                        self.pull_timeout,
                    )
                    .await
                {
                    Ok(res) => res,
                    Err(err) => {
                        tracing::debug!("{}: pull from {} failed: {}", nl, sid, err);
                        continue;
                    }
                };
                if res.not_found() {
                    // not found at one notifier means all done
                    let err = Error::UnknownXaction(format!("{} not found at {}", nl.uuid, sid));
                    nl.add_err(&sid, err);
                    self.finalize(&nl, Some(now));
                    break;
                }
                if !res.is_ok() {
                    tracing::debug!("{}: node {}: {:?}", nl, sid, res.err);
                    continue;
                }
                let stats: XactStats = match serde_json::from_slice(&res.body) {
                    Ok(stats) => stats,
                    Err(e) => {
                        tracing::error!("{}: bad stats from {}: {}", nl, sid, e);
                        continue;
                    }
                };
                if !stats.finished {
                    continue;
                }
                if stats.aborted {
                    // one abort means all done
                    let err = Error::Aborted(stats.kind.clone(), sid.clone());
                    nl.add_err(&sid, err);
                    self.finalize(&nl, Some(now));
                    break;
                }
                match self.handle_msg(&nl, &sid, None) {
                    Ok(true) => {
                        self.finalize(&nl, Some(now));
                        break;
                    }
                    Ok(false) => {}
                    Err(err) => tracing::error!("{}: {}", nl, err),
                }
            }
        }
    }

    pub fn spawn_housekeeper(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(this.hk.interval());
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await; // immediate first tick
            loop {
                ticker.tick().await;
                this.housekeep_once().await;
            }
        })
    }

    pub fn statuses(&self) -> Vec<NlStatus> {
        let mut out = Vec::new();
        {
            let running = self.running.read().unwrap_or_else(|e| e.into_inner());
            out.extend(running.values().map(|nl| nl.status()));
        }
        let finished = self.finished.read().unwrap_or_else(|e| e.into_inner());
        out.extend(finished.values().map(|nl| nl.status()));
        out
    }
}

impl SmapListener for Notifs {
    fn name(&self) -> &str {
        NOTIFS_NAME
    }

    /// Membership path: fail every listener that waits on a node no
    /// longer present in the cluster map.
    fn on_smap_changed(&self) {
        let smap = self.smap.get();
        let seen = self.smap_ver.load(Ordering::SeqCst);
        if smap.version <= seen {
            return;
        }
        self.smap_ver.store(smap.version, Ordering::SeqCst);

        let running: Vec<Arc<NotifListener>> = {
            let running = self.running.read().unwrap_or_else(|e| e.into_inner());
            running.values().cloned().collect()
        };
        if running.is_empty() {
            return;
        }
        let now = timestamp_now_nanos();
        for nl in running {
            let missing = nl
                .pending_ids()
                .into_iter()
                .find(|sid| smap.get_node(sid).is_none());
            if let Some(sid) = missing {
                tracing::warn!("{}: stop waiting for departed node {}", nl, sid);
                nl.add_err(&sid, Error::NodeNotFound(sid.clone()));
                self.finalize(&nl, Some(now));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::Config;
    use std::sync::atomic::AtomicUsize;

    fn test_notifs() -> Arc<Notifs> {
        let config = Config {
            node_id: "p0".to_string(),
            public_url: "http://127.0.0.1:8080".to_string(),
            ..Default::default()
        };
        let smap = SmapOwner::new(config);
        Notifs::new(
            smap,
            Arc::new(Broadcaster::new()),
            HousekeepConf::default(),
            Duration::from_millis(200),
        )
    }

    fn counting_listener(
        uuid: &str,
        srcs: &[&str],
        hits: Arc<AtomicUsize>,
    ) -> Arc<NotifListener> {
        NotifListener::new(
            uuid,
            "make-n-copies",
            NlScope::Bucket(Bck::new("foo")),
            srcs.iter().map(|s| s.to_string()),
            true,
            Box::new(move |_nl, _err| {
                hits.fetch_add(1, Ordering::SeqCst);
            }),
        )
    }

    #[tokio::test]
    async fn test_push_reports_fire_callback_once() {
        let notifs = test_notifs();
        let hits = Arc::new(AtomicUsize::new(0));
        let nl = counting_listener("x1", &["t1", "t2"], hits.clone());
        notifs.add(Arc::clone(&nl)).unwrap();

        notifs.handle_report("x1", "t1", None).unwrap();
        assert_eq!(nl.rc(), 1);
        assert!(!nl.finished());
        assert_eq!(notifs.running_count(), 1);

        notifs.handle_report("x1", "t2", None).unwrap();
        assert!(nl.finished());
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(notifs.running_count(), 0);
        assert_eq!(notifs.finished_count(), 1);

        // late report after finishing: accepted, nothing changes
        notifs.handle_report("x1", "t1", None).unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_duplicate_report_is_idempotent() {
        let notifs = test_notifs();
        let hits = Arc::new(AtomicUsize::new(0));
        let nl = counting_listener("x2", &["t1", "t2"], hits.clone());
        notifs.add(Arc::clone(&nl)).unwrap();

        for _ in 0..5 {
            notifs.handle_report("x2", "t1", None).unwrap();
        }
        assert_eq!(nl.rc(), 1);
        assert!(!nl.finished());
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_report_from_unknown_source() {
        let notifs = test_notifs();
        let nl = counting_listener("x3", &["t1"], Arc::new(AtomicUsize::new(0)));
        notifs.add(nl).unwrap();

        let err = notifs.handle_report("x3", "t9", None).unwrap_err();
        assert_eq!(err.kind(), "node-not-found");

        let err = notifs.handle_report("nope", "t1", None).unwrap_err();
        assert_eq!(err.kind(), "unknown-xaction");
    }

    #[tokio::test]
    async fn test_per_source_errors_reach_callback() {
        let notifs = test_notifs();
        let seen_err = Arc::new(Mutex::new(None::<String>));
        let seen = Arc::clone(&seen_err);
        let nl = NotifListener::new(
            "x4",
            "ec-encode",
            NlScope::Bucket(Bck::new("foo")),
            ["t1".to_string(), "t2".to_string()],
            true,
            Box::new(move |_nl, err| {
                *seen.lock().unwrap() = err.map(|e| e.kind().to_string());
            }),
        );
        notifs.add(Arc::clone(&nl)).unwrap();

        notifs
            .handle_report("x4", "t1", Some(Error::Aborted("ec-encode".into(), "t1".into())))
            .unwrap();
        notifs.handle_report("x4", "t2", None).unwrap();

        assert!(nl.finished());
        assert_eq!(seen_err.lock().unwrap().as_deref(), Some("aborted"));
        let status = nl.status();
        assert_eq!(status.errs.len(), 1);
        assert!(status.errs.contains_key("t1"));
    }

    #[tokio::test]
    async fn test_callback_panic_still_retires() {
        let notifs = test_notifs();
        let nl = NotifListener::new(
            "x5",
            "copy-bucket",
            NlScope::FromTo {
                from: Bck::new("a"),
                to: Bck::new("b"),
            },
            ["t1".to_string()],
            true,
            Box::new(|_nl, _err| panic!("boom")),
        );
        notifs.add(Arc::clone(&nl)).unwrap();

        notifs.handle_report("x5", "t1", None).unwrap();
        assert!(nl.finished());
        assert_eq!(notifs.finished_count(), 1);
    }

    #[tokio::test]
    async fn test_housekeep_gc() {
        let notifs = test_notifs();
        let hits = Arc::new(AtomicUsize::new(0));
        let nl = counting_listener("x6", &["t1"], hits.clone());
        notifs.add(Arc::clone(&nl)).unwrap();
        notifs.handle_report("x6", "t1", None).unwrap();
        assert_eq!(notifs.finished_count(), 1);

        // age the finish timestamp past retention
        let retention = HousekeepConf::default().retention().as_nanos() as i64;
        nl.tfin
            .store(timestamp_now_nanos() - retention - 1, Ordering::SeqCst);
        notifs.housekeep_once().await;
        assert_eq!(notifs.finished_count(), 0);
    }
}
