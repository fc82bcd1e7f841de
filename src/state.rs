//! Application context for the CipherBox client.
//!
//! Built once at process start and passed to every call site. Holds the one
//! connectivity monitor, request pipeline and response cache for the process,
//! so there is no hidden global state.

use std::sync::Arc;

use crate::api::auth::CredentialStore;
use crate::api::client::{HttpTransport, Transport};
use crate::api::interceptor::RequestPipeline;
use crate::api::types::ApiResponse;
use crate::cache::ResponseCache;
use crate::config::ClientConfig;
use crate::connectivity::{
    ConnectivityMonitor, HealthCheck, HttpHealthCheck, MonitorConfig, Navigator, Notifier,
    PlatformSignal,
};

/// Shared state for the request layer.
pub struct AppContext {
    pub config: ClientConfig,
    pub monitor: Arc<ConnectivityMonitor>,
    pub pipeline: Arc<RequestPipeline>,
    pub cache: Arc<ResponseCache<ApiResponse>>,
    pub credentials: Arc<dyn CredentialStore>,
    /// Platform online flag, updated from native online/offline events.
    pub signal: Arc<PlatformSignal>,
}

impl AppContext {
    /// Create the context with the reqwest transport and health check.
    pub fn new(
        config: ClientConfig,
        credentials: Arc<dyn CredentialStore>,
        notifier: Arc<dyn Notifier>,
        navigator: Arc<dyn Navigator>,
    ) -> Result<Self, reqwest::Error> {
        let transport = HttpTransport::new(
            &config.api_base_url,
            config.request_timeout,
            config.connect_timeout,
        )?;
        let health = Arc::new(HttpHealthCheck::new(
            &transport,
            &config.health_path,
            config.health_timeout,
        ));

        Ok(Self::with_parts(
            config,
            Arc::new(transport),
            health,
            Arc::new(PlatformSignal::default()),
            credentials,
            notifier,
            navigator,
        ))
    }

    /// Assemble the context from explicit collaborators.
    pub fn with_parts(
        config: ClientConfig,
        transport: Arc<dyn Transport>,
        health: Arc<dyn HealthCheck>,
        signal: Arc<PlatformSignal>,
        credentials: Arc<dyn CredentialStore>,
        notifier: Arc<dyn Notifier>,
        navigator: Arc<dyn Navigator>,
    ) -> Self {
        let monitor = ConnectivityMonitor::new(
            MonitorConfig::from(&config),
            health,
            signal.clone(),
            notifier,
        );
        let cache = Arc::new(ResponseCache::with_default_ttl(config.cache_ttl));
        let pipeline = RequestPipeline::new(
            transport,
            Arc::clone(&credentials),
            Arc::clone(&monitor),
            navigator,
            Arc::clone(&cache),
            config.refresh_path.clone(),
        );

        Self {
            config,
            monitor,
            pipeline,
            cache,
            credentials,
            signal,
        }
    }

    /// Entry point for the platform's online/offline events.
    pub async fn platform_network_changed(&self, online: bool) {
        self.signal.set_online(online);
        self.monitor.report_local_network_change(online).await;
    }

    /// Forget credentials and every cached response.
    ///
    /// Called on logout and before exit.
    pub fn clear_session(&self) {
        if let Err(e) = self.credentials.clear() {
            log::warn!("Failed to clear credentials: {}", e);
        }
        let removed = self.cache.clear(None);
        log::info!("Session cleared ({} cached responses dropped)", removed);
    }
}
