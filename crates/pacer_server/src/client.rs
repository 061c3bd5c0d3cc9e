//! One HTTP attempt against an upstream host.

use bytes::Bytes;
use pacer_error::{
    PacerError, PacerResult, ServerError, ServerErrorKind, UpstreamError, UpstreamErrorKind,
};
use pacer_rate_limit::{Provider, ProviderConfig, UpstreamResponse};
use reqwest::StatusCode;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue};
use tracing::{debug, instrument, warn};

/// Header some hosts use to name the scope of a throttle.
pub const HEADER_SCOPE: &str = "x-ratelimit-scope";

/// Thin reqwest wrapper for one provider.
///
/// Every call is a single attempt; retries belong to the orchestrator.
#[derive(Debug, Clone)]
pub struct UpstreamClient {
    provider: Provider,
    base_url: String,
    credential: Option<String>,
    require_credential: bool,
    http: reqwest::Client,
}

impl UpstreamClient {
    /// Build a client for `provider`.
    ///
    /// # Errors
    ///
    /// Returns a server error if the HTTP client cannot be built.
    #[instrument(skip(config), fields(base_url = %config.base_url))]
    pub fn new(
        provider: Provider,
        config: &ProviderConfig,
        require_credential: bool,
    ) -> PacerResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout())
            .user_agent(concat!("pacer/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| {
                PacerError::from(ServerError::new(ServerErrorKind::Client(format!(
                    "{}: {}",
                    provider, e
                ))))
            })?;
        debug!("Created upstream client");

        Ok(Self {
            provider,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            credential: config.credential(),
            require_credential,
            http,
        })
    }

    /// Provider this client talks to.
    pub fn provider(&self) -> Provider {
        self.provider
    }

    /// True when calls go out without a credential.
    pub fn is_anonymous(&self) -> bool {
        self.credential.is_none()
    }

    /// POST `body` to `path` under the base URL.
    ///
    /// # Errors
    ///
    /// - `Unauthorized` when a credential is required but not configured
    /// - `Transient` on network failures and timeouts
    /// - `Status` on 408 and the retryable 5xx answers
    #[instrument(skip(self, body, content_type), fields(provider = %self.provider, bytes = body.len()))]
    pub async fn post(
        &self,
        path: &str,
        body: Bytes,
        content_type: Option<HeaderValue>,
    ) -> PacerResult<UpstreamResponse> {
        if self.require_credential && self.credential.is_none() {
            return Err(UpstreamError::new(UpstreamErrorKind::Unauthorized(format!(
                "No credential configured for {}",
                self.provider
            )))
            .into());
        }

        let url = format!("{}/{}", self.base_url, path.trim_start_matches('/'));
        let mut request = self.http.post(&url).body(body);
        if let Some(content_type) = content_type {
            request = request.header(CONTENT_TYPE, content_type);
        }
        if let Some(credential) = &self.credential {
            request = request.header(AUTHORIZATION, format!("Bearer {}", credential));
        }

        let response = request.send().await.map_err(|e| {
            warn!(url = %url, error = %e, "Upstream request failed");
            UpstreamError::new(UpstreamErrorKind::Transient(format!(
                "Request to {} failed: {}",
                url, e
            )))
        })?;

        let status = response.status();
        let headers = response.headers().clone();
        let body = response.bytes().await.map_err(|e| {
            UpstreamError::new(UpstreamErrorKind::Transient(format!(
                "Failed to read response body from {}: {}",
                url, e
            )))
        })?;
        debug!(status = status.as_u16(), bytes = body.len(), "Upstream answered");

        if status.is_server_error() || status == StatusCode::REQUEST_TIMEOUT {
            let kind = UpstreamErrorKind::Status {
                status: status.as_u16(),
                message: String::from_utf8_lossy(&body).chars().take(200).collect(),
            };
            if kind.is_retryable() {
                warn!(url = %url, status = status.as_u16(), "Upstream failed transiently");
                return Err(UpstreamError::new(kind).into());
            }
        }

        let scope = scope_hint(&headers);
        let response = UpstreamResponse::new(status, headers, body);
        Ok(match scope {
            Some(global) => response.with_global_hint(global),
            None => response,
        })
    }
}

/// `global` marks an account-wide throttle; `user`/`shared` a scoped one.
fn scope_hint(headers: &HeaderMap) -> Option<bool> {
    let scope = headers.get(HEADER_SCOPE)?.to_str().ok()?.trim();
    match scope.to_ascii_lowercase().as_str() {
        "global" => Some(true),
        "user" | "shared" => Some(false),
        _ => None,
    }
}
