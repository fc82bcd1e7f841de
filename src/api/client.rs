//! HTTP transport with the desktop client type header.
//!
//! All requests include `X-Client-Type: desktop` so the backend returns
//! refresh tokens in the response body instead of cookies. The transport
//! itself knows nothing about credentials beyond attaching the bearer token
//! the pipeline put on the request; a response with any status is `Ok`.

use std::time::Duration;

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use reqwest::Client;

use super::error::TransportError;
use super::types::{ApiRequest, ApiResponse, RequestBody};

pub const CLIENT_TYPE_HEADER: &str = "X-Client-Type";
pub const CLIENT_TYPE: &str = "desktop";

/// Something that can put an [`ApiRequest`] on the wire.
///
/// `Err` means no response was received (timeout, refused connection, DNS).
pub trait Transport: Send + Sync {
    fn send<'a>(
        &'a self,
        request: &'a ApiRequest,
    ) -> BoxFuture<'a, Result<ApiResponse, TransportError>>;
}

/// reqwest-backed transport for CipherBox API communication.
#[derive(Clone)]
pub struct HttpTransport {
    client: Client,
    base_url: String,
    timeout: Duration,
}

impl HttpTransport {
    /// Create a transport for the given base URL with a fixed per-request timeout.
    pub fn new(
        base_url: &str,
        timeout: Duration,
        connect_timeout: Duration,
    ) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(connect_timeout)
            .cookie_store(true)
            .build()?;
        Ok(Self::with_client(client, base_url, timeout))
    }

    /// Wrap an existing client. `timeout` is only used for error reporting.
    pub fn with_client(client: Client, base_url: &str, timeout: Duration) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout,
        }
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn url(&self, path_and_query: &str) -> String {
        format!("{}{}", self.base_url, path_and_query)
    }

    async fn execute(&self, request: &ApiRequest) -> Result<ApiResponse, TransportError> {
        let url = self.url(&request.path_and_query());
        log::debug!("{} {}", request.method, request.path);

        let mut builder = self
            .client
            .request(request.method.clone(), &url)
            .header(CLIENT_TYPE_HEADER, CLIENT_TYPE);

        if let Some(ref token) = request.access_token {
            builder = builder.bearer_auth(token);
        }

        builder = match request.body {
            Some(RequestBody::Json(ref value)) => builder.json(value),
            Some(RequestBody::Bytes(ref bytes)) => builder
                .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
                .body(bytes.clone()),
            None => builder,
        };

        let timeout_secs = self.timeout.as_secs();
        let resp = builder
            .send()
            .await
            .map_err(|e| TransportError::from_reqwest(&e, timeout_secs))?;

        let status = resp.status();
        // A body cut off mid-stream is as good as no response.
        let body = resp
            .bytes()
            .await
            .map_err(|e| TransportError::from_reqwest(&e, timeout_secs))?;

        Ok(ApiResponse { status, body })
    }
}

impl Transport for HttpTransport {
    fn send<'a>(
        &'a self,
        request: &'a ApiRequest,
    ) -> BoxFuture<'a, Result<ApiResponse, TransportError>> {
        self.execute(request).boxed()
    }
}
