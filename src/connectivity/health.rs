//! Server reachability probe against the health endpoint.
//!
//! GET /system/health?_=<token> with a random cache-busting token, cookies
//! included, and a short timeout distinct from the main request timeout.

use std::time::Duration;

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use reqwest::Client;
use thiserror::Error;

use crate::api::client::{HttpTransport, CLIENT_TYPE, CLIENT_TYPE_HEADER};

/// Default health endpoint path.
pub const HEALTH_PATH: &str = "/system/health";

#[derive(Debug, Clone, Error)]
pub enum ProbeError {
    #[error("health check timed out")]
    Timeout,
    #[error("health check network error: {0}")]
    Network(String),
    #[error("health check returned HTTP {0}")]
    Status(u16),
}

/// Trait abstracting the liveness check for testability.
pub trait HealthCheck: Send + Sync {
    /// `Ok` when the server answered with a 2xx.
    fn check(&self) -> BoxFuture<'_, Result<(), ProbeError>>;
}

/// reqwest-backed health check sharing the transport's client (and cookie jar).
pub struct HttpHealthCheck {
    client: Client,
    url: String,
    timeout: Duration,
}

impl HttpHealthCheck {
    pub fn new(transport: &HttpTransport, path: &str, timeout: Duration) -> Self {
        Self {
            client: transport.client().clone(),
            url: transport.url(path),
            timeout,
        }
    }

    async fn probe(&self) -> Result<(), ProbeError> {
        let token = format!("{:x}", rand::random::<u64>());
        let resp = self
            .client
            .get(&self.url)
            .query(&[("_", token.as_str())])
            .header(CLIENT_TYPE_HEADER, CLIENT_TYPE)
            .header(reqwest::header::CACHE_CONTROL, "no-cache")
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ProbeError::Timeout
                } else {
                    ProbeError::Network(e.to_string())
                }
            })?;

        if resp.status().is_success() {
            Ok(())
        } else {
            Err(ProbeError::Status(resp.status().as_u16()))
        }
    }
}

impl HealthCheck for HttpHealthCheck {
    fn check(&self) -> BoxFuture<'_, Result<(), ProbeError>> {
        self.probe().boxed()
    }
}
