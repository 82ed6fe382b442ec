//! Parallel control-plane fan-out
//!
//! One HTTP call per node, all in flight at once, each with the same
//! per-phase timeout. Callers inspect per-node results; the broadcast
//! itself never fails as a whole.

use futures::future::join_all;
use std::time::Duration;

use crate::cluster::Snode;
use crate::common::{Error, Result};

/// Outcome of one call within a broadcast
#[derive(Debug)]
pub struct CallResult {
    pub sid: String,
    pub status: u16,
    pub err: Option<Error>,
    pub body: Vec<u8>,
}

impl CallResult {
    pub fn is_ok(&self) -> bool {
        self.err.is_none()
    }

    pub fn not_found(&self) -> bool {
        self.status == 404
    }
}

/// HTTP fan-out client for the intra-control network
pub struct Broadcaster {
    client: reqwest::Client,
}

impl Default for Broadcaster {
    fn default() -> Self {
        Self::new()
    }
}

impl Broadcaster {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }

    pub async fn post(
        &self,
        nodes: &[Snode],
        path: &str,
        query: &[(String, String)],
        body: Vec<u8>,
        timeout: Duration,
    ) -> Vec<CallResult> {
        self.bcast(reqwest::Method::POST, nodes, path, query, Some(body), timeout)
            .await
    }

    pub async fn put(
        &self,
        nodes: &[Snode],
        path: &str,
        query: &[(String, String)],
        body: Vec<u8>,
        timeout: Duration,
    ) -> Vec<CallResult> {
        self.bcast(reqwest::Method::PUT, nodes, path, query, Some(body), timeout)
            .await
    }

    async fn bcast(
        &self,
        method: reqwest::Method,
        nodes: &[Snode],
        path: &str,
        query: &[(String, String)],
        body: Option<Vec<u8>>,
        timeout: Duration,
    ) -> Vec<CallResult> {
        let calls = nodes.iter().map(|si| {
            let method = method.clone();
            let body = body.clone();
            async move {
                match self.call(method, si, path, query, body, timeout).await {
                    Ok(res) => res,
                    Err(err) => CallResult {
                        sid: si.id.clone(),
                        status: 0,
                        err: Some(err),
                        body: Vec::new(),
                    },
                }
            }
        });
        join_all(calls).await
    }

    /// Single call to one node; also used by the housekeeping pulls.
    pub async fn call(
        &self,
        method: reqwest::Method,
        si: &Snode,
        path: &str,
        query: &[(String, String)],
        body: Option<Vec<u8>>,
        timeout: Duration,
    ) -> Result<CallResult> {
        let url = format!("{}{}", si.intra_control.url.trim_end_matches('/'), path);
        let mut req = self.client.request(method, &url).timeout(timeout);
        if !query.is_empty() {
            req = req.query(query);
        }
        if let Some(body) = body {
            req = req
                .header(reqwest::header::CONTENT_TYPE, "application/json")
                .body(body);
        }
        let resp = req.send().await?;
        let status = resp.status();
        let body = resp.bytes().await.map(|b| b.to_vec()).unwrap_or_default();
        let err = if status.is_success() {
            None
        } else {
            Some(Error::Http(format!(
                "{} {} from {}: {}",
                status.as_u16(),
                path,
                si.id,
                String::from_utf8_lossy(&body)
            )))
        };
        Ok(CallResult {
            sid: si.id.clone(),
            status: status.as_u16(),
            err,
            body,
        })
    }
}
