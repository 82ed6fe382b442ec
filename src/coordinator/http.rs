//! Control-plane HTTP surface
//!
//! Inbound endpoints of the primary: bucket action messages,
//! target-to-coordinator completion reports, IC announcements, remote
//! cluster-map hand-offs, and read-only probes.

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;

use crate::cluster::{Bck, Provider, PropsToUpdate, Smap};
use crate::common::Error;
use crate::coordinator::notifs::{NlScope, NotifListenMsg, NotifListener, NotifMsg};
use crate::coordinator::txn::{
    ActionMsg, Coordinator, ACT_COPY_BUCKET, ACT_CREATE_BUCKET, ACT_DESTROY_BUCKET, ACT_EC_ENCODE,
    ACT_MAKE_NCOPIES, ACT_RENAME_BUCKET, ACT_RESET_BPROPS, ACT_SET_BPROPS, QPARAM_NAMESPACE,
    QPARAM_PROVIDER,
};

/// Sender node ID header on intra-cluster requests
pub const HEADER_CALLER_ID: &str = "caller-id";

/// Shared coordinator state for HTTP handlers.
#[derive(Clone)]
pub struct CoordState {
    pub coordinator: Arc<Coordinator>,
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.to_http_status();
        let body = Json(json!({
            "kind": self.kind(),
            "error": self.to_string(),
        }));
        (status, body).into_response()
    }
}

/// Creates the HTTP router with all control-plane endpoints.
pub fn create_router(state: CoordState) -> Router {
    Router::new()
        .route("/v1/health", get(health))
        .route("/v1/daemon", get(get_daemon))
        .route("/v1/daemon/smap", put(put_smap))
        .route("/v1/buckets/:bucket", post(bucket_action))
        .route("/v1/notifs", post(post_notif).get(list_notifs))
        .route("/v1/ic", put(put_ic_listener))
        .with_state(state)
}

/// Health check endpoint with cluster-map role info.
async fn health(State(state): State<CoordState>) -> impl IntoResponse {
    let coord = &state.coordinator;
    let smap = coord.owner.smap.get();
    Json(json!({
        "status": "healthy",
        "node_id": coord.si().id,
        "smap_version": smap.version,
        "is_primary": smap.is_primary(&coord.si().id),
    }))
}

/// GET /v1/daemon?what=smap|bmd|rmd
async fn get_daemon(
    State(state): State<CoordState>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Json<serde_json::Value>, Error> {
    let coord = &state.coordinator;
    match params.get("what").map(String::as_str) {
        Some("smap") => Ok(Json(serde_json::to_value(&*coord.owner.smap.get())?)),
        Some("bmd") => Ok(Json(serde_json::to_value(&*coord.owner.bmd.get())?)),
        Some("rmd") => Ok(Json(serde_json::to_value(&*coord.owner.rmd.get())?)),
        what => Err(Error::InvalidConfig(format!("unknown what={:?}", what))),
    }
}

/// PUT /v1/daemon/smap: a remote cluster map arrives
async fn put_smap(
    State(state): State<CoordState>,
    headers: HeaderMap,
    Json(newsmap): Json<Smap>,
) -> Result<StatusCode, Error> {
    let caller = caller_id(&headers).unwrap_or_else(|| "?".to_string());
    state
        .coordinator
        .owner
        .smap
        .synchronize(newsmap, &caller)
        .await?;
    Ok(StatusCode::OK)
}

fn parse_bck(
    name: &str,
    params: &HashMap<String, String>,
) -> Result<Bck, Error> {
    let provider = match params.get(QPARAM_PROVIDER) {
        Some(p) => Provider::parse(p)?,
        None => Provider::Ais,
    };
    Ok(Bck {
        provider,
        ns: params.get(QPARAM_NAMESPACE).cloned().unwrap_or_default(),
        name: name.to_string(),
    })
}

/// POST /v1/buckets/{bucket}: dispatch a bucket action message
async fn bucket_action(
    State(state): State<CoordState>,
    Path(bucket): Path<String>,
    Query(params): Query<HashMap<String, String>>,
    Json(msg): Json<ActionMsg>,
) -> Result<Json<serde_json::Value>, Error> {
    let coord = &state.coordinator;
    let bck = parse_bck(&bucket, &params)?;
    let xact_id = match msg.action.as_str() {
        ACT_CREATE_BUCKET => {
            let props = if msg.value.is_null() {
                None
            } else {
                Some(serde_json::from_value(msg.value)?)
            };
            coord.create_bucket(&bck, props).await?;
            None
        }
        ACT_DESTROY_BUCKET => {
            coord.destroy_bucket(&bck).await?;
            None
        }
        ACT_RENAME_BUCKET => {
            let bck_to: Bck = serde_json::from_value(msg.value)?;
            Some(coord.rename_bucket(&bck, &bck_to).await?)
        }
        ACT_COPY_BUCKET => {
            let bck_to: Bck = serde_json::from_value(msg.value)?;
            Some(coord.copy_bucket(&bck, &bck_to).await?)
        }
        ACT_MAKE_NCOPIES => {
            let copies: i64 = serde_json::from_value(msg.value)?;
            Some(coord.make_n_copies(&bck, copies).await?)
        }
        ACT_SET_BPROPS => {
            let upd: PropsToUpdate = serde_json::from_value(msg.value)?;
            coord.set_bucket_props(&bck, &upd).await?
        }
        ACT_RESET_BPROPS => {
            coord.reset_bucket_props(&bck).await?;
            None
        }
        ACT_EC_ENCODE => {
            let ec: serde_json::Value = msg.value;
            let data = ec.get("data_slices").and_then(|v| v.as_i64()).unwrap_or(0);
            let parity = ec.get("parity_slices").and_then(|v| v.as_i64()).unwrap_or(0);
            Some(coord.ec_encode(&bck, data, parity).await?)
        }
        other => {
            return Err(Error::InvalidConfig(format!("unknown action {:?}", other)));
        }
    };
    Ok(Json(json!({ "uuid": xact_id })))
}

fn caller_id(headers: &HeaderMap) -> Option<String> {
    headers
        .get(HEADER_CALLER_ID)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

/// POST /v1/notifs: target completion/error report
async fn post_notif(
    State(state): State<CoordState>,
    headers: HeaderMap,
    Json(msg): Json<NotifMsg>,
) -> Result<StatusCode, Error> {
    if msg.ty != "xaction" {
        return Err(Error::InvalidConfig(format!(
            "unknown notification type {:?}",
            msg.ty
        )));
    }
    let sid = caller_id(&headers).unwrap_or_else(|| msg.snode.clone());
    let uuid = msg
        .data
        .as_ref()
        .map(|stats| stats.id.clone())
        .unwrap_or_default();
    if uuid.is_empty() {
        return Err(Error::InvalidConfig("notification without an ID".into()));
    }
    let src_err = msg.err.map(Error::Other);
    state.coordinator.notifs.handle_report(&uuid, &sid, src_err)?;
    Ok(StatusCode::OK)
}

/// GET /v1/notifs: listener status listing
async fn list_notifs(State(state): State<CoordState>) -> impl IntoResponse {
    Json(json!({ "listeners": state.coordinator.notifs.statuses() }))
}

/// PUT /v1/ic: another IC member announced a listener; start tracking
/// it (not owned locally).
async fn put_ic_listener(
    State(state): State<CoordState>,
    Json(msg): Json<NotifListenMsg>,
) -> Result<StatusCode, Error> {
    let scope = match msg.bcks.len() {
        2 => NlScope::FromTo {
            from: msg.bcks[0].clone(),
            to: msg.bcks[1].clone(),
        },
        _ => NlScope::Bucket(msg.bcks.first().cloned().unwrap_or_default()),
    };
    let nl = NotifListener::new(
        msg.uuid,
        msg.action,
        scope,
        msg.srcs,
        false,
        Box::new(|nl, err| match err {
            Some(err) => tracing::error!("{} failed: {}", nl, err),
            None => tracing::info!("{} finished", nl),
        }),
    );
    state.coordinator.notifs.add(nl)?;
    Ok(StatusCode::OK)
}
