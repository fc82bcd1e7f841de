//! Unit tests for the request pipeline.
//!
//! A mock backend implements both Transport and HealthCheck so connectivity,
//! credential expiry and refresh behaviour can be scripted per test.

#[cfg(test)]
mod pipeline_tests {
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use futures_util::future::{join_all, BoxFuture};
    use futures_util::FutureExt;
    use reqwest::StatusCode;

    use crate::api::auth::{CredentialStore, MemoryStore};
    use crate::api::client::Transport;
    use crate::api::error::{ApiError, FailureKind, TransportError};
    use crate::api::interceptor::{Failure, Invalidate, RequestPipeline};
    use crate::api::types::{ApiRequest, ApiResponse, TokenPair};
    use crate::cache::{self, ResponseCache};
    use crate::connectivity::{
        Banner, ConnectionStatus, ConnectivityMonitor, HealthCheck, LogNotifier, MonitorConfig,
        Navigator, PlatformSignal, ProbeError,
    };

    const REFRESH_PATH: &str = "/auth/refresh";

    // ── Mock Backend ─────────────────────────────────────────────────────

    /// Accepts exactly one access token; `/auth/refresh` rotates it.
    struct MockBackend {
        valid_token: Mutex<String>,
        refresh_succeeds: bool,
        refresh_delay: Duration,
        refresh_calls: AtomicU32,
        unreachable: AtomicBool,
        /// Server rejects the rotated token as well.
        revoke_refreshed: AtomicBool,
        /// Paths that reached the server with a valid token, in order.
        served: Mutex<Vec<String>>,
    }

    impl MockBackend {
        fn new(valid_token: &str) -> Arc<Self> {
            Self::build(valid_token, true)
        }

        fn build(valid_token: &str, refresh_succeeds: bool) -> Arc<Self> {
            Arc::new(Self {
                valid_token: Mutex::new(valid_token.to_string()),
                refresh_succeeds,
                refresh_delay: Duration::from_millis(100),
                refresh_calls: AtomicU32::new(0),
                unreachable: AtomicBool::new(false),
                revoke_refreshed: AtomicBool::new(false),
                served: Mutex::new(Vec::new()),
            })
        }

        fn set_unreachable(&self, down: bool) {
            self.unreachable.store(down, Ordering::SeqCst);
        }

        fn refresh_calls(&self) -> u32 {
            self.refresh_calls.load(Ordering::SeqCst)
        }

        fn served(&self) -> Vec<String> {
            self.served.lock().unwrap().clone()
        }

        async fn handle(&self, request: &ApiRequest) -> Result<ApiResponse, TransportError> {
            if self.unreachable.load(Ordering::SeqCst) {
                return Err(TransportError::Connect("connection refused".into()));
            }

            if request.path == REFRESH_PATH {
                self.refresh_calls.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(self.refresh_delay).await;
                if !self.refresh_succeeds {
                    return Ok(ApiResponse::new(StatusCode::UNAUTHORIZED, "expired"));
                }
                let accepted = if self.revoke_refreshed.load(Ordering::SeqCst) {
                    "revoked"
                } else {
                    "access-2"
                };
                *self.valid_token.lock().unwrap() = accepted.to_string();
                return Ok(ApiResponse::new(
                    StatusCode::OK,
                    r#"{"accessToken":"access-2","refreshToken":"refresh-2"}"#,
                ));
            }

            if request.path == "/missing" {
                return Ok(ApiResponse::new(StatusCode::NOT_FOUND, "no such file"));
            }

            let valid = self.valid_token.lock().unwrap().clone();
            if request.access_token.as_deref() != Some(valid.as_str()) {
                return Ok(ApiResponse::new(StatusCode::UNAUTHORIZED, "token expired"));
            }

            self.served.lock().unwrap().push(request.path.clone());
            Ok(ApiResponse::new(StatusCode::OK, request.path.clone()))
        }
    }

    impl Transport for MockBackend {
        fn send<'a>(
            &'a self,
            request: &'a ApiRequest,
        ) -> BoxFuture<'a, Result<ApiResponse, TransportError>> {
            self.handle(request).boxed()
        }
    }

    impl HealthCheck for MockBackend {
        fn check(&self) -> BoxFuture<'_, Result<(), ProbeError>> {
            let down = self.unreachable.load(Ordering::SeqCst);
            async move {
                if down {
                    Err(ProbeError::Network("connection refused".into()))
                } else {
                    Ok(())
                }
            }
            .boxed()
        }
    }

    #[derive(Default)]
    struct CountingNavigator {
        redirects: AtomicU32,
    }

    impl CountingNavigator {
        fn redirects(&self) -> u32 {
            self.redirects.load(Ordering::SeqCst)
        }
    }

    impl Navigator for CountingNavigator {
        fn redirect_to_sign_in(&self) {
            self.redirects.fetch_add(1, Ordering::SeqCst);
        }
    }

    // ── Helpers ──────────────────────────────────────────────────────────

    struct Harness {
        pipeline: Arc<RequestPipeline>,
        backend: Arc<MockBackend>,
        store: Arc<MemoryStore>,
        navigator: Arc<CountingNavigator>,
        monitor: Arc<ConnectivityMonitor>,
    }

    fn harness(backend: Arc<MockBackend>, online: bool) -> Harness {
        let store = Arc::new(MemoryStore::with_tokens(TokenPair {
            access_token: "access-1".into(),
            refresh_token: "refresh-1".into(),
        }));
        let navigator = Arc::new(CountingNavigator::default());
        let monitor = ConnectivityMonitor::new(
            MonitorConfig::default(),
            backend.clone(),
            Arc::new(PlatformSignal::new(online)),
            Arc::new(LogNotifier),
        );
        let pipeline = RequestPipeline::new(
            backend.clone(),
            store.clone(),
            monitor.clone(),
            navigator.clone(),
            Arc::new(ResponseCache::new()),
            REFRESH_PATH,
        );
        Harness {
            pipeline,
            backend,
            store,
            navigator,
            monitor,
        }
    }

    fn paths(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("/files/{}", i)).collect()
    }

    // ── Tests ────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_on_request_attaches_token() {
        let h = harness(MockBackend::new("access-1"), true);
        let req = h.pipeline.on_request(ApiRequest::get("/vault"));
        assert_eq!(req.access_token.as_deref(), Some("access-1"));

        h.store.clear().unwrap();
        let req = h.pipeline.on_request(ApiRequest::get("/vault"));
        assert!(req.access_token.is_none());
    }

    #[tokio::test]
    async fn test_success_passes_through() {
        let h = harness(MockBackend::new("access-1"), true);
        let resp = h.pipeline.send(ApiRequest::get("/vault")).await.unwrap();
        assert_eq!(resp.text(), "/vault");
        assert_eq!(h.backend.refresh_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_401s_share_one_refresh() {
        let h = harness(MockBackend::new("access-2"), true);

        let requests = paths(5)
            .into_iter()
            .map(|p| h.pipeline.send(ApiRequest::get(p)));
        let results = join_all(requests).await;

        assert_eq!(h.backend.refresh_calls(), 1);
        assert_eq!(h.pipeline.refresh_cycles(), 1);
        assert!(results.iter().all(|r| r.is_ok()), "{:?}", results);
        assert_eq!(h.backend.served().len(), 5);
        assert_eq!(h.store.access_token().as_deref(), Some("access-2"));
        assert_eq!(h.store.refresh_token().unwrap().as_deref(), Some("refresh-2"));
        assert_eq!(h.navigator.redirects(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_refresh_rejects_all_and_signs_out_once() {
        let h = harness(MockBackend::build("access-2", false), true);

        let requests = paths(5)
            .into_iter()
            .map(|p| h.pipeline.send(ApiRequest::get(p)));
        let results = join_all(requests).await;

        assert_eq!(h.backend.refresh_calls(), 1);
        assert!(results
            .iter()
            .all(|r| matches!(r, Err(ApiError::SessionExpired))));
        assert_eq!(h.navigator.redirects(), 1);
        assert!(h.store.access_token().is_none());
        assert!(h.store.refresh_token().unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_401_after_refresh_signs_out() {
        let backend = MockBackend::new("access-2");
        backend.revoke_refreshed.store(true, Ordering::SeqCst);
        let h = harness(backend, true);

        let result = h.pipeline.send(ApiRequest::get("/vault")).await;

        assert!(matches!(result, Err(ApiError::SessionExpired)));
        assert_eq!(h.backend.refresh_calls(), 1);
        assert_eq!(h.navigator.redirects(), 1);
        assert!(h.store.access_token().is_none());
        assert!(h.backend.served().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_token_is_reissued_without_refresh() {
        let h = harness(MockBackend::new("access-2"), true);
        h.store
            .store(&TokenPair {
                access_token: "access-2".into(),
                refresh_token: "refresh-2".into(),
            })
            .unwrap();

        let mut stale = ApiRequest::get("/vault");
        stale.access_token = Some("access-1".into());
        let failure = Failure::Status(ApiResponse::new(StatusCode::UNAUTHORIZED, ""));

        let resp = h.pipeline.on_response_error(stale, failure).await.unwrap();
        assert_eq!(resp.text(), "/vault");
        assert_eq!(h.backend.refresh_calls(), 0);
    }

    #[tokio::test]
    async fn test_other_errors_propagate_unchanged() {
        let h = harness(MockBackend::new("access-1"), true);

        let err = h.pipeline.send(ApiRequest::get("/missing")).await.unwrap_err();

        assert!(err.is_not_found());
        assert!(!err.is_connectivity());
        assert!(matches!(err, ApiError::Status { status: 404, .. }));
        assert_eq!(h.backend.refresh_calls(), 0);
        assert_eq!(h.monitor.retry_queue_len(), 0);
    }

    #[tokio::test]
    async fn test_offline_requests_queue_and_replay_in_order() {
        let backend = MockBackend::new("access-1");
        backend.set_unreachable(true);
        let h = harness(backend, false);

        for p in paths(3) {
            let err = h.pipeline.send(ApiRequest::get(p)).await.unwrap_err();
            assert!(err.is_connectivity());
            assert_eq!(err.kind(), Some(FailureKind::Offline));
        }
        assert_eq!(h.monitor.retry_queue_len(), 3);
        assert!(h.backend.served().is_empty());

        h.backend.set_unreachable(false);
        h.monitor.report_local_network_change(true).await;

        assert_eq!(h.backend.served(), paths(3));
        assert_eq!(h.monitor.retry_queue_len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_server_unreachable_triggers_probe() {
        let backend = MockBackend::new("access-1");
        backend.set_unreachable(true);
        let h = harness(backend, true);

        let err = h.pipeline.send(ApiRequest::get("/vault")).await.unwrap_err();
        assert_eq!(err.kind(), Some(FailureKind::ServerUnreachable));

        // Let the spawned probe run.
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(h.monitor.status(), ConnectionStatus::OnlineDegraded);
        assert_eq!(h.monitor.active_banner(), Some(Banner::ServerDown));

        h.backend.set_unreachable(false);
        h.monitor.probe_server_reachability(true).await;

        assert_eq!(h.monitor.status(), ConnectionStatus::OnlineConnected);
        assert_eq!(h.backend.served(), vec!["/vault".to_string()]);
    }

    #[tokio::test]
    async fn test_fetch_uses_cache_and_mutate_invalidates() {
        let h = harness(MockBackend::new("access-1"), true);
        let thumb = cache::key("file", "1", Some("thumb"));
        let full = cache::key("file", "1", Some("full"));

        h.pipeline.fetch(&thumb, ApiRequest::get("/files/1/thumb")).await.unwrap();
        h.pipeline.fetch(&thumb, ApiRequest::get("/files/1/thumb")).await.unwrap();
        h.pipeline.fetch(&full, ApiRequest::get("/files/1")).await.unwrap();
        assert_eq!(h.backend.served().len(), 2);

        h.pipeline
            .mutate(
                ApiRequest::delete("/files/1/thumb"),
                &[Invalidate::Pattern("thumb")],
            )
            .await
            .unwrap();
        assert!(h.pipeline.cache().get(&thumb).is_none());
        assert!(h.pipeline.cache().get(&full).is_some());

        h.pipeline.fetch(&thumb, ApiRequest::get("/files/1/thumb")).await.unwrap();
        assert_eq!(h.backend.served().len(), 4);
    }

    #[tokio::test]
    async fn test_failed_fetch_is_not_cached() {
        let h = harness(MockBackend::new("access-1"), true);
        let key = cache::key("file", "missing", None);

        assert!(h.pipeline.fetch(&key, ApiRequest::get("/missing")).await.is_err());
        assert!(h.pipeline.cache().get(&key).is_none());
    }
}
