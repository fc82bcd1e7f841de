//! Request pipeline wrapped around every API call.
//!
//! - Attaches the current access token to outbound requests
//! - Response-less failures are queued for replay on reconnect and returned
//!   to the caller tagged as connectivity errors
//! - A 401 triggers (or joins) the single shared credential refresh and the
//!   request is re-issued once with the new token
//! - A second 401 for the same request, or a failed refresh, signs the user out
//! - Everything else is returned unchanged
//!
//! Replays happen opportunistically: the original caller never waits for them.

use std::sync::Arc;

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;

use super::auth::CredentialStore;
use super::client::Transport;
use super::error::{ApiError, FailureKind, TransportError};
use super::refresh::{RefreshCycle, RefreshError, RefreshOutcome};
use super::types::{ApiRequest, ApiResponse, RefreshRequest, RefreshResponse, TokenPair};
use crate::cache::ResponseCache;
use crate::connectivity::{ConnectivityMonitor, Navigator, RetryTask};

/// A failed exchange, as seen by [`RequestPipeline::on_response_error`].
#[derive(Debug)]
pub enum Failure {
    /// No response was received.
    Transport(TransportError),
    /// The server answered with a non-success status.
    Status(ApiResponse),
}

/// Cache entries to drop after a successful write.
#[derive(Debug, Clone, Copy)]
pub enum Invalidate<'a> {
    /// Exact key.
    Key(&'a str),
    /// Every key containing the pattern.
    Pattern(&'a str),
}

/// The pass-through request function used by every API call site.
pub struct RequestPipeline {
    transport: Arc<dyn Transport>,
    credentials: Arc<dyn CredentialStore>,
    monitor: Arc<ConnectivityMonitor>,
    navigator: Arc<dyn Navigator>,
    cache: Arc<ResponseCache<ApiResponse>>,
    refresh: RefreshCycle,
    refresh_path: String,
}

impl RequestPipeline {
    pub fn new(
        transport: Arc<dyn Transport>,
        credentials: Arc<dyn CredentialStore>,
        monitor: Arc<ConnectivityMonitor>,
        navigator: Arc<dyn Navigator>,
        cache: Arc<ResponseCache<ApiResponse>>,
        refresh_path: impl Into<String>,
    ) -> Arc<Self> {
        Arc::new(Self {
            transport,
            credentials,
            monitor,
            navigator,
            cache,
            refresh: RefreshCycle::new(),
            refresh_path: refresh_path.into(),
        })
    }

    pub fn monitor(&self) -> &Arc<ConnectivityMonitor> {
        &self.monitor
    }

    pub fn cache(&self) -> &Arc<ResponseCache<ApiResponse>> {
        &self.cache
    }

    /// Number of credential refresh cycles started by this pipeline.
    pub fn refresh_cycles(&self) -> u64 {
        self.refresh.cycles_started()
    }

    /// Inject the current access token, if one is stored.
    pub fn on_request(&self, mut request: ApiRequest) -> ApiRequest {
        if let Some(token) = self.credentials.access_token() {
            request.access_token = Some(token);
        }
        request
    }

    /// Send a request through the pipeline.
    pub fn send(
        self: &Arc<Self>,
        request: ApiRequest,
    ) -> BoxFuture<'static, Result<ApiResponse, ApiError>> {
        let this = Arc::clone(self);
        async move {
            let request = this.on_request(request);
            let failure = match this.transport.send(&request).await {
                Ok(resp) if resp.is_success() => return Ok(resp),
                Ok(resp) => Failure::Status(resp),
                Err(e) => Failure::Transport(e),
            };
            this.on_response_error(request, failure).await
        }
        .boxed()
    }

    /// Send and decode a JSON body.
    pub async fn send_json<T: DeserializeOwned>(
        self: &Arc<Self>,
        request: ApiRequest,
    ) -> Result<T, ApiError> {
        Ok(self.send(request).await?.json()?)
    }

    /// Handle a failed exchange for `request`.
    pub async fn on_response_error(
        self: &Arc<Self>,
        request: ApiRequest,
        failure: Failure,
    ) -> Result<ApiResponse, ApiError> {
        match failure {
            Failure::Transport(source) => Err(self.on_connectivity_failure(request, source)),
            Failure::Status(resp) if resp.status == StatusCode::UNAUTHORIZED => {
                if request.retried {
                    log::warn!(
                        "{} {} still unauthorized after refresh",
                        request.method,
                        request.path
                    );
                    self.sign_out();
                    return Err(ApiError::SessionExpired);
                }
                self.refresh_and_retry(request).await
            }
            Failure::Status(resp) => Err(ApiError::from_status(resp.status, resp.text())),
        }
    }

    fn on_connectivity_failure(
        self: &Arc<Self>,
        request: ApiRequest,
        source: TransportError,
    ) -> ApiError {
        let kind = self.monitor.classify_failure(None);
        log::warn!(
            "{} {} failed ({}): {} -- queued for retry",
            request.method,
            request.path,
            kind,
            source
        );

        let label = format!("{} {}", request.method, request.path);
        let this = Arc::clone(self);
        self.monitor.enqueue_retry(RetryTask::new(label, move || async move {
            this.send(request).await.map(|_| ()).map_err(|e| e.to_string())
        }));

        if kind == FailureKind::ServerUnreachable {
            let monitor = Arc::clone(&self.monitor);
            tokio::spawn(async move {
                monitor.probe_server_reachability(false).await;
            });
        }

        ApiError::Connectivity { kind, source }
    }

    async fn refresh_and_retry(
        self: &Arc<Self>,
        mut request: ApiRequest,
    ) -> Result<ApiResponse, ApiError> {
        request.retried = true;

        // Sent with an older token than the one now stored: a refresh already
        // completed, so just re-issue.
        let current = self.credentials.access_token();
        if current.is_some() && current != request.access_token && !self.refresh.is_pending() {
            log::debug!("{} {} used a stale token, re-issuing", request.method, request.path);
            return self.send(request).await;
        }

        let cycle = self.refresh.join_or_start(|| self.start_refresh());
        match cycle.await {
            Ok(_) => self.send(request).await,
            Err(e) => {
                log::debug!("{} {} rejected: refresh failed ({})", request.method, request.path, e);
                Err(ApiError::SessionExpired)
            }
        }
    }

    /// Build the refresh future. Runs once per cycle no matter how many
    /// requests wait on it; a failure signs the user out exactly once.
    fn start_refresh(&self) -> BoxFuture<'static, RefreshOutcome> {
        let transport = Arc::clone(&self.transport);
        let credentials = Arc::clone(&self.credentials);
        let navigator = Arc::clone(&self.navigator);
        let path = self.refresh_path.clone();

        async move {
            let outcome =
                refresh_credentials(transport.as_ref(), credentials.as_ref(), &path).await;
            match &outcome {
                Ok(_) => log::info!("Credential refresh succeeded"),
                Err(e) => {
                    log::warn!("Credential refresh failed: {}", e);
                    if let Err(e) = credentials.clear() {
                        log::warn!("Failed to clear credentials: {}", e);
                    }
                    navigator.redirect_to_sign_in();
                }
            }
            outcome
        }
        .boxed()
    }

    /// Clear credentials and send the user to sign-in.
    pub fn sign_out(&self) {
        if let Err(e) = self.credentials.clear() {
            log::warn!("Failed to clear credentials: {}", e);
        }
        self.navigator.redirect_to_sign_in();
    }

    /// Serve an idempotent read from cache, or send it and write the response through.
    pub async fn fetch(
        self: &Arc<Self>,
        key: &str,
        request: ApiRequest,
    ) -> Result<ApiResponse, ApiError> {
        if !request.is_idempotent_read() {
            return self.send(request).await;
        }
        if let Some(hit) = self.cache.get(key) {
            log::debug!("Cache hit: {}", key);
            return Ok(hit);
        }
        let resp = self.send(request).await?;
        self.cache.set(key, resp.clone());
        Ok(resp)
    }

    /// [`Self::fetch`] and decode a JSON body.
    pub async fn fetch_json<T: DeserializeOwned>(
        self: &Arc<Self>,
        key: &str,
        request: ApiRequest,
    ) -> Result<T, ApiError> {
        Ok(self.fetch(key, request).await?.json()?)
    }

    /// Send a write and, on success, invalidate the affected cache entries.
    pub async fn mutate(
        self: &Arc<Self>,
        request: ApiRequest,
        invalidate: &[Invalidate<'_>],
    ) -> Result<ApiResponse, ApiError> {
        let resp = self.send(request).await?;
        for target in invalidate {
            match *target {
                Invalidate::Key(key) => self.cache.remove(key),
                Invalidate::Pattern(pattern) => {
                    self.cache.clear(Some(pattern));
                }
            }
        }
        Ok(resp)
    }
}

/// POST the stored refresh token and persist the returned pair.
async fn refresh_credentials(
    transport: &dyn Transport,
    credentials: &dyn CredentialStore,
    path: &str,
) -> Result<TokenPair, RefreshError> {
    let refresh_token = credentials
        .refresh_token()?
        .ok_or(RefreshError::NoRefreshToken)?;

    let request = ApiRequest::post_json(path, &RefreshRequest { refresh_token })
        .map_err(|e| RefreshError::Malformed(e.to_string()))?;

    let resp = transport.send(&request).await?;
    if !resp.is_success() {
        return Err(RefreshError::Rejected(resp.status.as_u16()));
    }

    let tokens: TokenPair = resp
        .json::<RefreshResponse>()
        .map_err(|e| RefreshError::Malformed(e.to_string()))?
        .into();
    credentials.store(&tokens)?;
    Ok(tokens)
}
