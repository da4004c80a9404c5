use reqwest::Client;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use super::types::{parse_identity_response, ExperimentStats, Route};
use crate::config::{RequestConfig, ServerConfig};
use crate::error::{SyncError, SyncResult};
use crate::identity::IdentityKind;

/// Header carrying the page's cross-site-request-forgery token.
pub const CSRF_HEADER: &str = "X-CSRFToken";

/// Form-encoded POST transport towards the experiment platform.
#[derive(Clone)]
pub struct SessionSyncClient {
    client: Client,
    base_url: String,
    csrf_token: String,
    request_config: RequestConfig,
}

impl SessionSyncClient {
    /// Create a new session sync client
    pub fn new(config: &ServerConfig, request_config: RequestConfig) -> SyncResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(request_config.timeout_ms))
            .build()
            .map_err(SyncError::Http)?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            csrf_token: config.csrf_token.clone(),
            request_config,
        })
    }

    /// POST a single `key=value` pair.
    pub async fn post_key_value(&self, route: Route, key: &str, value: &str) -> SyncResult<String> {
        self.post_form(route, &[(key, value)]).await
    }

    /// POST a session update in the `key=<key>&value=<value>` form.
    pub async fn post_update(&self, route: Route, key: &str, value: &str) -> SyncResult<String> {
        self.post_form(route, &[("key", key), ("value", value)]).await
    }

    /// POST a pre-serialized payload as `value=<serialized>`.
    pub async fn post_value(&self, route: Route, serialized: &str) -> SyncResult<String> {
        self.post_form(route, &[("value", serialized)]).await
    }

    /// Ask the server to obtain or confirm an identity.
    ///
    /// An absent identity is sent as an empty value. Returns the `pk` of the
    /// first record in the response.
    pub async fn check_identity(
        &self,
        kind: IdentityKind,
        existing: Option<&str>,
    ) -> SyncResult<String> {
        let route = kind.check_route();
        let body = self
            .post_key_value(route, kind.form_field(), existing.unwrap_or(""))
            .await?;
        parse_identity_response(route, &body)
    }

    /// Fetch per-session-label counts for an experiment.
    pub async fn fetch_experiment_stats(&self, slug: &str) -> SyncResult<ExperimentStats> {
        let route = Route::ExperimentStat;
        let body = self.post_key_value(route, "slug", slug).await?;

        serde_json::from_str(&body).map_err(|e| SyncError::MalformedResponse {
            route: route.path().to_string(),
            message: format!("Failed to parse stats: {}", e),
        })
    }

    /// POST form fields with bounded retry and exponential backoff.
    async fn post_form(&self, route: Route, fields: &[(&str, &str)]) -> SyncResult<String> {
        let url = format!("{}/{}", self.base_url, route.path());

        let mut last_error = None;
        let mut retries = 0;

        while retries <= self.request_config.max_retries {
            if retries > 0 {
                let delay = Duration::from_millis(backoff_delay_ms(
                    self.request_config.retry_delay_ms,
                    retries,
                ));
                warn!(
                    route = %route,
                    retry = retries,
                    delay_ms = delay.as_millis(),
                    "Retrying session sync request"
                );
                tokio::time::sleep(delay).await;
            }

            let start = Instant::now();

            match self.execute_request(&url, route, fields).await {
                Ok(body) => {
                    info!(
                        route = %route,
                        latency_ms = start.elapsed().as_millis(),
                        "Session sync request succeeded"
                    );
                    return Ok(body);
                }
                Err(e) => {
                    error!(
                        route = %route,
                        error = %e,
                        latency_ms = start.elapsed().as_millis(),
                        retry = retries,
                        "Session sync request failed"
                    );
                    if !e.is_transient() {
                        return Err(e);
                    }
                    last_error = Some(e);
                    retries += 1;
                }
            }
        }

        Err(SyncError::Unavailable {
            message: last_error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "Unknown error".to_string()),
            retries,
        })
    }

    /// Execute a single request (internal)
    async fn execute_request(
        &self,
        url: &str,
        route: Route,
        fields: &[(&str, &str)],
    ) -> SyncResult<String> {
        debug!(route = %route, fields = fields.len(), "Posting to server");

        let response = self
            .client
            .post(url)
            .header(CSRF_HEADER, &self.csrf_token)
            .form(fields)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    SyncError::Timeout {
                        timeout_ms: self.request_config.timeout_ms,
                    }
                } else {
                    SyncError::Http(e)
                }
            })?;

        let status = response.status();

        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            return Err(SyncError::Api {
                status: status.as_u16(),
                message: error_body,
            });
        }

        response.text().await.map_err(SyncError::Http)
    }

    /// Get the base URL (for testing)
    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

/// Delay before retry number `retry` (1-based): `base * 2^(retry - 1)`,
/// saturating instead of overflowing.
fn backoff_delay_ms(base_ms: u64, retry: u32) -> u64 {
    2_u64
        .checked_pow(retry.saturating_sub(1))
        .map_or(u64::MAX, |factor| base_ms.saturating_mul(factor))
}
