//! Cluster-state integration: map changes driving the notification
//! registry through the listener bus

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

use oxistore::cluster::{
    Bck, DaemonRole, NetInfo, SmapModifier, SmapOwner, Snode, SnodeFlags, DEFAULT_IC_SIZE,
};
use oxistore::common::config::HousekeepConf;
use oxistore::common::Config;
use oxistore::coordinator::bcast::Broadcaster;
use oxistore::coordinator::notifs::{NlScope, NotifListener, Notifs, XactStats};

fn mock_node(id: &str, role: DaemonRole, port: u16) -> Snode {
    Snode::new(
        id,
        role,
        NetInfo::new(format!("http://127.0.0.1:{}", port)),
        NetInfo::new(format!("http://10.0.0.1:{}", port)),
    )
}

async fn seed_cluster(dir: &TempDir) -> Arc<SmapOwner> {
    let config = Config {
        node_id: "p0".to_string(),
        confdir: dir.path().to_path_buf(),
        public_url: "http://127.0.0.1:8080".to_string(),
        ..Default::default()
    };
    let owner = SmapOwner::new(config);
    owner
        .modify(SmapModifier::new(|clone| {
            clone.uuid = "cluster-1".to_string();
            clone.put_node(mock_node("p0", DaemonRole::Proxy, 8080), SnodeFlags::empty())?;
            clone.primary_id = "p0".to_string();
            clone.put_node(mock_node("t1", DaemonRole::Target, 9001), SnodeFlags::empty())?;
            clone.put_node(mock_node("t2", DaemonRole::Target, 9002), SnodeFlags::empty())?;
            clone.staff_ic(DEFAULT_IC_SIZE)
        }))
        .await
        .unwrap();
    owner
}

#[tokio::test(flavor = "multi_thread")]
async fn listener_fails_when_notifier_leaves_cluster() {
    let dir = TempDir::new().unwrap();
    let smap_owner = seed_cluster(&dir).await;

    // zero-length retention so the final housekeeping assertion does
    // not have to wait out the production window
    let notifs = Notifs::new(
        Arc::clone(&smap_owner),
        Arc::new(Broadcaster::new()),
        HousekeepConf {
            interval_secs: 0,
            retention_mult: 3,
        },
        Duration::from_millis(200),
    );
    notifs.init().unwrap();

    let hits = Arc::new(AtomicUsize::new(0));
    let seen_kind = Arc::new(std::sync::Mutex::new(None::<String>));
    let (hits2, seen2) = (Arc::clone(&hits), Arc::clone(&seen_kind));
    let nl = NotifListener::new(
        "job-1",
        "copy-bucket",
        NlScope::FromTo {
            from: Bck::new("src"),
            to: Bck::new("dst"),
        },
        ["t1".to_string(), "t2".to_string()],
        true,
        Box::new(move |_nl, err| {
            hits2.fetch_add(1, Ordering::SeqCst);
            *seen2.lock().unwrap() = err.map(|e| e.kind().to_string());
        }),
    );
    notifs.add(Arc::clone(&nl)).unwrap();

    // T1 reports done
    notifs.handle_report("job-1", "t1", None).unwrap();
    assert_eq!(nl.rc(), 1);
    assert!(!nl.finished());

    // T2 leaves the cluster; the bus delivers the change to the registry
    smap_owner
        .modify(SmapModifier::new(|clone| clone.remove_node("t2")))
        .await
        .unwrap();

    let mut done = false;
    for _ in 0..100 {
        if nl.finished() {
            done = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(done, "listener was not failed by the membership change");
    assert_eq!(hits.load(Ordering::SeqCst), 1);
    assert_eq!(seen_kind.lock().unwrap().as_deref(), Some("node-not-found"));

    let status = nl.status();
    assert!(status.errs.contains_key("t2"));
    assert_eq!(notifs.running_count(), 0);
    assert_eq!(notifs.finished_count(), 1);

    // after the retention window, housekeeping deletes the entry
    tokio::time::sleep(Duration::from_millis(10)).await;
    notifs.housekeep_once().await;
    assert_eq!(notifs.finished_count(), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn unrelated_map_change_keeps_listeners_running() {
    let dir = TempDir::new().unwrap();
    let smap_owner = seed_cluster(&dir).await;

    let notifs = Notifs::new(
        Arc::clone(&smap_owner),
        Arc::new(Broadcaster::new()),
        HousekeepConf::default(),
        Duration::from_millis(200),
    );
    notifs.init().unwrap();

    let nl = NotifListener::new(
        "job-2",
        "ec-encode",
        NlScope::Bucket(Bck::new("data")),
        ["t1".to_string(), "t2".to_string()],
        true,
        Box::new(|_nl, _err| {}),
    );
    notifs.add(Arc::clone(&nl)).unwrap();

    // a proxy joins; both notifiers are still present
    smap_owner
        .modify(SmapModifier::new(|clone| {
            clone
                .put_node(mock_node("p1", DaemonRole::Proxy, 8081), SnodeFlags::empty())
                .map(|_| ())
        }))
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!nl.finished());
    assert_eq!(notifs.running_count(), 1);
}

/// Stand up a stub notifier answering status pulls with the given
/// response (a stats payload, or a plain 404).
async fn spawn_notifier(id: &str, port_hint: u16, stats: Option<XactStats>) -> Snode {
    use axum::routing::get;

    let app = axum::Router::new().route(
        "/v1/xactions",
        get(move || {
            let stats = stats.clone();
            async move {
                match stats {
                    Some(stats) => (
                        axum::http::StatusCode::OK,
                        serde_json::to_string(&stats).unwrap(),
                    ),
                    None => (axum::http::StatusCode::NOT_FOUND, String::new()),
                }
            }
        }),
    );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    Snode::new(
        id,
        DaemonRole::Target,
        NetInfo::new(format!("http://{}", addr)),
        NetInfo::new(format!("http://10.0.0.2:{}", port_hint)),
    )
}

async fn seed_with_targets(dir: &TempDir, targets: Vec<Snode>) -> Arc<SmapOwner> {
    let config = Config {
        node_id: "p0".to_string(),
        confdir: dir.path().to_path_buf(),
        public_url: "http://127.0.0.1:8080".to_string(),
        ..Default::default()
    };
    let owner = SmapOwner::new(config);
    owner
        .modify(SmapModifier::new(move |clone| {
            clone.uuid = "cluster-1".to_string();
            clone.put_node(mock_node("p0", DaemonRole::Proxy, 8080), SnodeFlags::empty())?;
            clone.primary_id = "p0".to_string();
            for tsi in &targets {
                clone.put_node(tsi.clone(), SnodeFlags::empty())?;
            }
            clone.staff_ic(DEFAULT_IC_SIZE)
        }))
        .await
        .unwrap();
    owner
}

#[tokio::test(flavor = "multi_thread")]
async fn housekeeping_pull_collects_finished_notifiers() {
    let done = XactStats {
        id: "job-3".to_string(),
        kind: "make-n-copies".to_string(),
        finished: true,
        ..Default::default()
    };
    let t1 = spawn_notifier("t1", 9001, Some(done.clone())).await;
    let t2 = spawn_notifier("t2", 9002, Some(done)).await;

    let dir = TempDir::new().unwrap();
    let smap_owner = seed_with_targets(&dir, vec![t1, t2]).await;
    let notifs = Notifs::new(
        Arc::clone(&smap_owner),
        Arc::new(Broadcaster::new()),
        HousekeepConf::default(),
        Duration::from_millis(500),
    );

    let hits = Arc::new(AtomicUsize::new(0));
    let hits2 = Arc::clone(&hits);
    let nl = NotifListener::new(
        "job-3",
        "make-n-copies",
        NlScope::Bucket(Bck::new("foo")),
        ["t1".to_string(), "t2".to_string()],
        true,
        Box::new(move |_nl, _err| {
            hits2.fetch_add(1, Ordering::SeqCst);
        }),
    );
    notifs.add(Arc::clone(&nl)).unwrap();

    notifs.housekeep_once().await;
    assert!(nl.finished());
    assert_eq!(hits.load(Ordering::SeqCst), 1);
    assert_eq!(notifs.finished_count(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn housekeeping_pull_404_fails_listener() {
    // one notifier never heard of the operation: all done, with error
    let t1 = spawn_notifier("t1", 9011, None).await;

    let dir = TempDir::new().unwrap();
    let smap_owner = seed_with_targets(&dir, vec![t1]).await;
    let notifs = Notifs::new(
        Arc::clone(&smap_owner),
        Arc::new(Broadcaster::new()),
        HousekeepConf::default(),
        Duration::from_millis(500),
    );

    let seen_kind = Arc::new(std::sync::Mutex::new(None::<String>));
    let seen2 = Arc::clone(&seen_kind);
    let nl = NotifListener::new(
        "job-4",
        "ec-encode",
        NlScope::Bucket(Bck::new("foo")),
        ["t1".to_string()],
        true,
        Box::new(move |_nl, err| {
            *seen2.lock().unwrap() = err.map(|e| e.kind().to_string());
        }),
    );
    notifs.add(Arc::clone(&nl)).unwrap();

    notifs.housekeep_once().await;
    assert!(nl.finished());
    assert_eq!(seen_kind.lock().unwrap().as_deref(), Some("unknown-xaction"));
}

#[tokio::test(flavor = "multi_thread")]
async fn housekeeping_pull_abort_fails_listener() {
    let aborted = XactStats {
        id: "job-5".to_string(),
        kind: "copy-bucket".to_string(),
        finished: true,
        aborted: true,
        ..Default::default()
    };
    let t1 = spawn_notifier("t1", 9021, Some(aborted)).await;

    let dir = TempDir::new().unwrap();
    let smap_owner = seed_with_targets(&dir, vec![t1]).await;
    let notifs = Notifs::new(
        Arc::clone(&smap_owner),
        Arc::new(Broadcaster::new()),
        HousekeepConf::default(),
        Duration::from_millis(500),
    );

    let seen_kind = Arc::new(std::sync::Mutex::new(None::<String>));
    let seen2 = Arc::clone(&seen_kind);
    let nl = NotifListener::new(
        "job-5",
        "copy-bucket",
        NlScope::FromTo {
            from: Bck::new("a"),
            to: Bck::new("b"),
        },
        ["t1".to_string()],
        true,
        Box::new(move |_nl, err| {
            *seen2.lock().unwrap() = err.map(|e| e.kind().to_string());
        }),
    );
    notifs.add(Arc::clone(&nl)).unwrap();

    notifs.housekeep_once().await;
    assert!(nl.finished());
    assert_eq!(seen_kind.lock().unwrap().as_deref(), Some("aborted"));
}
