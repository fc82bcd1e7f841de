//! Failure taxonomy for the request path.
//!
//! Every failed call is classified into one [`FailureKind`]. Connectivity
//! failures (`Offline`, `ServerUnreachable`) carry a tag so callers can skip
//! their own error UI: the connectivity banner already tells the user.

use std::fmt;

use reqwest::StatusCode;
use thiserror::Error;

use super::auth::KeychainError;

/// Classification of a failed request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    /// No local network.
    Offline,
    /// Local network is up but the server did not answer.
    ServerUnreachable,
    /// 401 / 403.
    Authentication,
    /// 404.
    NotFound,
    /// 5xx.
    ServerError,
    /// Any other 4xx.
    ApplicationError,
}

impl FailureKind {
    /// Classify an HTTP status that came back from the server.
    pub fn from_status(status: StatusCode) -> Self {
        match status.as_u16() {
            401 | 403 => FailureKind::Authentication,
            404 => FailureKind::NotFound,
            s if s >= 500 => FailureKind::ServerError,
            _ => FailureKind::ApplicationError,
        }
    }

    /// `true` for the two response-less kinds.
    pub fn is_connectivity(self) -> bool {
        matches!(self, FailureKind::Offline | FailureKind::ServerUnreachable)
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FailureKind::Offline => "OFFLINE",
            FailureKind::ServerUnreachable => "SERVER_UNREACHABLE",
            FailureKind::Authentication => "AUTHENTICATION",
            FailureKind::NotFound => "NOT_FOUND",
            FailureKind::ServerError => "SERVER_ERROR",
            FailureKind::ApplicationError => "APPLICATION_ERROR",
        };
        f.write_str(name)
    }
}

/// A failure where no response was received.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    #[error("request timed out after {0}s")]
    Timeout(u64),
    #[error("connection failed: {0}")]
    Connect(String),
    #[error("transport failure: {0}")]
    Other(String),
}

impl TransportError {
    /// Map a reqwest error that carries no response.
    pub fn from_reqwest(err: &reqwest::Error, timeout_secs: u64) -> Self {
        if err.is_timeout() {
            TransportError::Timeout(timeout_secs)
        } else if err.is_connect() {
            TransportError::Connect(err.to_string())
        } else {
            TransportError::Other(err.to_string())
        }
    }
}

/// Error returned to callers of the request pipeline.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Response-less failure. The request was queued for replay on reconnect.
    #[error("{kind}: {source}")]
    Connectivity {
        kind: FailureKind,
        #[source]
        source: TransportError,
    },

    /// The server answered with a non-success status.
    #[error("{kind} (HTTP {status}): {body}")]
    Status {
        kind: FailureKind,
        status: u16,
        body: String,
    },

    /// Credentials could not be renewed; the user has been signed out.
    #[error("session expired -- sign-in required")]
    SessionExpired,

    #[error("credential store error: {0}")]
    Credentials(#[from] KeychainError),

    #[error("failed to decode response: {0}")]
    Decode(#[from] serde_json::Error),
}

impl ApiError {
    /// Build a status error from a response.
    pub fn from_status(status: StatusCode, body: String) -> Self {
        ApiError::Status {
            kind: FailureKind::from_status(status),
            status: status.as_u16(),
            body,
        }
    }

    /// Failure classification, where one applies.
    pub fn kind(&self) -> Option<FailureKind> {
        match self {
            ApiError::Connectivity { kind, .. } | ApiError::Status { kind, .. } => Some(*kind),
            ApiError::SessionExpired => Some(FailureKind::Authentication),
            ApiError::Credentials(_) | ApiError::Decode(_) => None,
        }
    }

    /// `true` when higher layers should suppress their own error messaging.
    pub fn is_connectivity(&self) -> bool {
        matches!(self, ApiError::Connectivity { .. })
    }

    pub fn is_not_found(&self) -> bool {
        self.kind() == Some(FailureKind::NotFound)
    }
}
