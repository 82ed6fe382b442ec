//! Error types for oxistore

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    // === I/O Errors ===
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // === Bucket Errors ===
    #[error("bucket {0} already exists")]
    BucketExists(String),

    #[error("bucket {0} does not exist")]
    BucketDoesNotExist(String),

    #[error("bucket {0} is busy")]
    BucketBusy(String),

    #[error("invalid bucket properties: {0}")]
    InvalidProps(String),

    // === Cluster Map Errors ===
    #[error("duplicate node ID: {0}")]
    DuplicateId(String),

    #[error("duplicate node URL: {url} (nodes {id} and {other})")]
    DuplicateUrl {
        url: String,
        id: String,
        other: String,
    },

    #[error("cluster integrity error: Smaps have different UUIDs: {local} vs {remote} (from {caller})")]
    ClusterIntegrity {
        local: String,
        remote: String,
        caller: String,
    },

    #[error("attempt to downgrade {tag} v{cur} to v{new}")]
    Downgrade { tag: String, cur: i64, new: i64 },

    #[error("invalid cluster map: {0}")]
    InvalidSmap(String),

    #[error("node {0} not found in the cluster map")]
    NodeNotFound(String),

    // === Transaction Errors ===
    #[error("{action}: {phase} phase failed on {node}: {reason}")]
    TxnPhase {
        action: String,
        phase: String,
        node: String,
        reason: String,
    },

    #[error("{0} was aborted at {1}")]
    Aborted(String, String),

    #[error("unknown operation ID: {0}")]
    UnknownXaction(String),

    // === Persistence Errors ===
    #[error("failed to persist {what}: {reason}")]
    Persistence { what: String, reason: String },

    #[error("corrupted metadata in {0}")]
    Corrupted(String),

    // === Network Errors ===
    #[error("HTTP error: {0}")]
    Http(String),

    #[error("operation timed out: {0}")]
    Timeout(String),

    // === Config Errors ===
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    // === Generic ===
    #[error("internal error: {0}")]
    Internal(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Machine-readable kind carried in error payloads (protocol-level).
    pub fn kind(&self) -> &'static str {
        match self {
            Error::BucketExists(_) => "bucket-exists",
            Error::BucketDoesNotExist(_) => "bucket-does-not-exist",
            Error::BucketBusy(_) => "bucket-busy",
            Error::InvalidProps(_) => "invalid-props",
            Error::DuplicateId(_) => "duplicate-id",
            Error::DuplicateUrl { .. } => "duplicate-url",
            Error::ClusterIntegrity { .. } => "cluster-integrity-error",
            Error::Downgrade { .. } => "downgrade",
            Error::InvalidSmap(_) => "invalid-smap",
            Error::NodeNotFound(_) => "node-not-found",
            Error::TxnPhase { .. } => "transaction-phase-failure",
            Error::Aborted(..) => "aborted",
            Error::UnknownXaction(_) => "unknown-xaction",
            Error::Persistence { .. } | Error::Io(_) => "persistence-error",
            Error::Corrupted(_) => "corrupted",
            Error::Http(_) => "http-error",
            Error::Timeout(_) => "timeout",
            Error::InvalidConfig(_) => "invalid-config",
            Error::Internal(_) | Error::Other(_) => "internal",
        }
    }

    /// Is this a retryable error?
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::BucketBusy(_) | Error::Timeout(_) | Error::Http(_)
        )
    }

    /// Convert to HTTP status code
    pub fn to_http_status(&self) -> axum::http::StatusCode {
        use axum::http::StatusCode;
        match self {
            Error::BucketDoesNotExist(_) | Error::NodeNotFound(_) | Error::UnknownXaction(_) => {
                StatusCode::NOT_FOUND
            }
            Error::BucketExists(_)
            | Error::DuplicateId(_)
            | Error::DuplicateUrl { .. }
            | Error::Downgrade { .. } => StatusCode::CONFLICT,
            Error::BucketBusy(_) => StatusCode::LOCKED,
            Error::InvalidProps(_) | Error::InvalidConfig(_) | Error::InvalidSmap(_) => {
                StatusCode::BAD_REQUEST
            }
            Error::ClusterIntegrity { .. } => StatusCode::FORBIDDEN,
            Error::Timeout(_) => StatusCode::REQUEST_TIMEOUT,
            Error::TxnPhase { .. } | Error::Aborted(..) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<&str> for Error {
    fn from(s: &str) -> Self {
        Error::Other(s.to_string())
    }
}

impl From<String> for Error {
    fn from(s: String) -> Self {
        Error::Other(s)
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Error::Timeout(e.to_string())
        } else {
            Error::Http(e.to_string())
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Internal(format!("serialization error: {}", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        assert_eq!(Error::BucketExists("ais://x".into()).kind(), "bucket-exists");
        assert_eq!(Error::BucketBusy("ais://x".into()).kind(), "bucket-busy");
        assert_eq!(
            Error::Downgrade {
                tag: "smap".into(),
                cur: 10,
                new: 8
            }
            .kind(),
            "downgrade"
        );
        assert_eq!(Error::NodeNotFound("t1".into()).kind(), "node-not-found");
    }

    #[test]
    fn test_http_status() {
        use axum::http::StatusCode;
        assert_eq!(
            Error::BucketDoesNotExist("ais://x".into()).to_http_status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            Error::BucketBusy("ais://x".into()).to_http_status(),
            StatusCode::LOCKED
        );
        assert_eq!(
            Error::BucketExists("ais://x".into()).to_http_status(),
            StatusCode::CONFLICT
        );
    }

    #[test]
    fn test_retryable() {
        assert!(Error::BucketBusy("ais://x".into()).is_retryable());
        assert!(!Error::BucketExists("ais://x".into()).is_retryable());
    }
}
